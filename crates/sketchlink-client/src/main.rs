//! Terminal shell for SketchLink collaboration sessions.
//!
//! Starts a session in a new room (or joins `--room`), prints what other
//! participants send and broadcasts an update for every line read from stdin.

use anyhow::Context;
use clap::Parser;
use sketchlink_core::{CollabConfig, RoomId, SessionEvent, SessionManager, Update};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(name = "sketchlink", about = "Join a SketchLink collaboration room")]
struct Args {
    /// Room server base URL [default: $SKETCHLINK_SERVER_URL, then http://localhost:8080]
    #[arg(long)]
    server: Option<String>,

    /// Display name announced to the room
    #[arg(long, default_value = "")]
    name: String,

    /// Join this room instead of starting a new one
    #[arg(long)]
    room: Option<String>,

    /// Push-channel reconnect attempts (0 disables reconnects)
    #[arg(long)]
    max_reconnects: Option<u32>,
}

/// A line of user input.
enum Command {
    Send(Update),
    Quit,
    Ignore,
}

fn parse_command(line: &str) -> Command {
    match line.trim() {
        "" => Command::Ignore,
        "/quit" => Command::Quit,
        "/init" => Command::Send(Update::Init),
        _ => Command::Send(Update::UpdateEvent),
    }
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::PeerJoined { name: Some(name) } => format!("{} joined", name),
        SessionEvent::PeerJoined { name: None } => "someone joined".to_string(),
        SessionEvent::InitRequested => "init requested".to_string(),
        SessionEvent::RemoteUpdate => "drawing updated".to_string(),
        SessionEvent::Error { message } => format!("connection problem: {}", message),
        SessionEvent::Reconnected => "reconnected".to_string(),
        SessionEvent::Disconnected => "disconnected".to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = CollabConfig::from_env();
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(attempts) = args.max_reconnects {
        config.reconnect.max_attempts = attempts;
    }
    log::info!("Starting SketchLink client against {}", config.server_url);

    let mut manager = SessionManager::with_http(config).context("invalid configuration")?;
    manager.set_username(&args.name);

    let room = match args.room.as_deref().and_then(RoomId::parse) {
        Some(room) => {
            manager
                .join_room(room.clone())
                .await
                .with_context(|| format!("could not join room {}", room))?;
            room
        }
        None => manager
            .start_session(&args.name)
            .await
            .context("could not start a session")?,
    };
    println!("Connected to room {}", room);
    println!("Type a line to send an update, /init to send init, /quit to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = manager.next_event() => match event {
                Some(event) => {
                    println!("* {}", describe(&event));
                    if event == SessionEvent::Disconnected {
                        break;
                    }
                }
                None => break,
            },
            line = lines.next_line() => {
                let line = match line.context("reading stdin")? {
                    Some(line) => line,
                    None => break,
                };
                match parse_command(&line) {
                    Command::Send(update) => {
                        if let Err(e) = manager.broadcast(&update).await {
                            log::error!("Broadcast failed: {}", e);
                        }
                    }
                    Command::Quit => break,
                    Command::Ignore => {}
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.leave().await;
    println!("Left room {}", room);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert!(matches!(parse_command("/quit"), Command::Quit));
        assert!(matches!(parse_command("  "), Command::Ignore));
        assert!(matches!(parse_command("/init"), Command::Send(Update::Init)));
        assert!(matches!(
            parse_command("moved a box"),
            Command::Send(Update::UpdateEvent)
        ));
    }

    #[test]
    fn test_describe_anonymous_join() {
        assert_eq!(
            describe(&SessionEvent::PeerJoined { name: None }),
            "someone joined"
        );
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["sketchlink"]).unwrap();
        assert_eq!(args.name, "");
        assert!(args.server.is_none());
        assert!(args.room.is_none());
    }
}

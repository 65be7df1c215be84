//! Session channel: join handshake plus the live push subscription.
//!
//! A [`SessionChannel`] announces its session to a room, then keeps the push
//! subscription running on a background task. Inbound updates are decoded and
//! dispatched into [`SessionEvent`]s, which the owner drains with
//! [`SessionChannel::poll_events`] or awaits with [`SessionChannel::next_event`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ReconnectPolicy;
use crate::error::{CollabError, CollabResult};
use crate::ids::{RoomId, SessionId};
use crate::transport::{PushStream, Transport};
use crate::update::{self, SessionPayload, Update};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The push stream failed; a reconnect may be in progress.
    Error,
}

/// Events from a session channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A participant entered the room
    PeerJoined { name: Option<String> },
    /// A participant sent the reserved init message
    InitRequested,
    /// A participant sent a drawing update
    RemoteUpdate,
    /// The push stream reported an error
    Error { message: String },
    /// The push stream was re-opened after an error
    Reconnected,
    /// The push stream is gone and will not be re-opened
    Disconnected,
}

impl From<Update> for SessionEvent {
    fn from(update: Update) -> Self {
        match update {
            Update::Join { name } => SessionEvent::PeerJoined { name },
            Update::Init => SessionEvent::InitRequested,
            Update::UpdateEvent => SessionEvent::RemoteUpdate,
        }
    }
}

/// One participant's connection to a room.
pub struct SessionChannel {
    room: RoomId,
    session: SessionId,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    state: ConnectionState,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    pump: Option<JoinHandle<()>>,
    /// Cleared by the pump while the push stream is down.
    linked: Arc<AtomicBool>,
}

impl SessionChannel {
    /// Create a channel that has not joined yet.
    pub fn new(
        transport: Arc<dyn Transport>,
        room: RoomId,
        session: SessionId,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            room,
            session,
            transport,
            policy,
            state: ConnectionState::Disconnected,
            events: None,
            pump: None,
            linked: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether the push subscription is still being serviced.
    pub fn is_open(&self) -> bool {
        self.pump.as_ref().is_some_and(|pump| !pump.is_finished())
    }

    /// Perform the join handshake and open the push subscription.
    ///
    /// Returns only once the subscription is open. A rejected handshake
    /// leaves the channel disconnected with no subscription.
    pub async fn join(&mut self, name: Option<String>) -> CollabResult<()> {
        if self.pump.is_some() {
            return Err(CollabError::AlreadyJoined);
        }

        self.state = ConnectionState::Connecting;
        match self.open(name).await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                log::info!("Joined room {} as session {}", self.room, self.session);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                log::warn!("Failed to join room {}: {}", self.room, e);
                Err(e)
            }
        }
    }

    async fn open(&mut self, name: Option<String>) -> CollabResult<()> {
        let body = SessionPayload::new(self.session.clone(), &Update::Join { name })?;
        self.transport.join(&self.room, &body).await?;

        let stream = self.transport.subscribe(&self.room, &self.session).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.linked = Arc::new(AtomicBool::new(true));
        let pump = Pump {
            transport: Arc::clone(&self.transport),
            room: self.room.clone(),
            session: self.session.clone(),
            policy: self.policy,
            events: tx,
            linked: Arc::clone(&self.linked),
        };
        self.pump = Some(tokio::spawn(pump.run(stream)));
        self.events = Some(rx);
        Ok(())
    }

    /// Send an update to the other participants of the room.
    ///
    /// Fire-and-forget: there is no acknowledgment and no retry. Only allowed
    /// while connected; a push stream that is down or reconnecting fails with
    /// [`CollabError::NotConnected`] even before its events have been drained.
    pub async fn broadcast(&self, update: &Update) -> CollabResult<()> {
        if !self.is_connected() || !self.linked.load(Ordering::SeqCst) {
            return Err(CollabError::NotConnected);
        }
        let body = SessionPayload::new(self.session.clone(), update)?;
        log::debug!("Broadcasting {} to room {}", update.kind(), self.room);
        self.transport.broadcast(&self.room, &body).await
    }

    /// Poll for pending events (non-blocking).
    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if let Some(rx) = self.events.as_mut() {
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
        }
        for event in &events {
            self.track(event);
        }
        events
    }

    /// Wait for the next event. Returns `None` once the channel is closed
    /// and every pending event has been delivered.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let rx = self.events.as_mut()?;
        let event = rx.recv().await?;
        self.track(&event);
        Some(event)
    }

    fn track(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Error { .. } => self.state = ConnectionState::Error,
            SessionEvent::Reconnected => self.state = ConnectionState::Connected,
            SessionEvent::Disconnected => self.state = ConnectionState::Disconnected,
            SessionEvent::PeerJoined { .. }
            | SessionEvent::InitRequested
            | SessionEvent::RemoteUpdate => {}
        }
    }

    /// Close the push subscription. Undelivered events are discarded.
    ///
    /// Resolves after the transport has released the subscription. Safe to
    /// call repeatedly or on a channel that never joined.
    pub async fn close(&mut self) {
        self.events = None;
        if let Some(pump) = self.pump.take() {
            pump.abort();
            let _ = pump.await;
            log::info!("Left room {} (session {})", self.room, self.session);
        }
        self.state = ConnectionState::Disconnected;
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Background task owning the push stream.
struct Pump {
    transport: Arc<dyn Transport>,
    room: RoomId,
    session: SessionId,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<SessionEvent>,
    linked: Arc<AtomicBool>,
}

/// Why a push stream stopped being drained.
enum Drained {
    Failed(String),
    Ended,
    ReceiverGone,
}

impl Pump {
    async fn run(self, mut stream: PushStream) {
        // Only a stream that delivered something earns a fresh set of attempts.
        let mut attempt = 0;
        loop {
            let (drained, received) = self.drain(&mut stream).await;
            self.linked.store(false, Ordering::SeqCst);
            if received > 0 {
                attempt = 0;
            }
            match drained {
                Drained::ReceiverGone => return,
                Drained::Failed(message) => {
                    log::error!("Push stream error in room {}: {}", self.room, message);
                    if self.events.send(SessionEvent::Error { message }).is_err() {
                        return;
                    }
                }
                Drained::Ended => {
                    log::info!("Push stream for room {} closed by server", self.room);
                }
            }

            // Release the old subscription before asking for a new one.
            drop(stream);
            match self.reconnect(&mut attempt).await {
                Some(reopened) => {
                    stream = reopened;
                    self.linked.store(true, Ordering::SeqCst);
                    if self.events.send(SessionEvent::Reconnected).is_err() {
                        return;
                    }
                }
                None => {
                    let _ = self.events.send(SessionEvent::Disconnected);
                    return;
                }
            }
        }
    }

    /// Dispatch inbound data until the stream stops. Also returns how many
    /// items the server delivered, decodable or not.
    async fn drain(&self, stream: &mut PushStream) -> (Drained, usize) {
        let mut received = 0;
        while let Some(item) = stream.next().await {
            let data = match item {
                Ok(data) => data,
                Err(e) => return (Drained::Failed(e.to_string()), received),
            };
            received += 1;
            match update::decode(&data) {
                Ok(update) => {
                    log::debug!("Received {} in room {}", update.kind(), self.room);
                    if self.events.send(SessionEvent::from(update)).is_err() {
                        return (Drained::ReceiverGone, received);
                    }
                }
                Err(e) => {
                    log::warn!("Dropping inbound message in room {}: {}", self.room, e);
                }
            }
        }
        (Drained::Ended, received)
    }

    async fn reconnect(&self, attempt: &mut u32) -> Option<PushStream> {
        while *attempt < self.policy.max_attempts {
            let delay = self.policy.delay(*attempt);
            *attempt += 1;
            log::info!(
                "Reconnecting to room {} in {:?} (attempt {}/{})",
                self.room,
                delay,
                attempt,
                self.policy.max_attempts
            );
            tokio::time::sleep(delay).await;
            if self.events.is_closed() {
                return None;
            }
            match self.transport.subscribe(&self.room, &self.session).await {
                Ok(stream) => return Some(stream),
                Err(e) => log::warn!("Reconnect to room {} failed: {}", self.room, e),
            }
        }
        log::error!("Giving up on push stream for room {}", self.room);
        None
    }
}

//! In-memory transport implementation.

use super::{BoxFuture, PushStream, Transport};
use crate::error::{CollabError, CollabResult};
use crate::ids::{RoomId, SessionId};
use crate::update::SessionPayload;
use futures_util::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

type PushSender = mpsc::UnboundedSender<CollabResult<String>>;

/// A transport operation, as recorded by [`MemoryTransport::calls`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Join { room: RoomId, session: SessionId },
    Subscribe { room: RoomId, session: SessionId },
    /// A push stream was released.
    Unsubscribe { room: RoomId, session: SessionId },
    Broadcast { room: RoomId, session: SessionId },
}

#[derive(Default)]
struct Relay {
    /// Open subscriptions per room, keyed by session.
    rooms: HashMap<RoomId, HashMap<SessionId, (u64, PushSender)>>,
    next_subscription: u64,
    calls: Vec<TransportCall>,
    reject_joins: Option<u16>,
    refuse_subscriptions: bool,
}

impl Relay {
    /// Forward a raw event to every subscriber in `room` except `except`.
    fn fan_out(&self, room: &RoomId, except: Option<&SessionId>, item: CollabResult<String>) {
        if let Some(peers) = self.rooms.get(room) {
            for (session, (_, tx)) in peers {
                if Some(session) != except {
                    let _ = tx.send(item.clone());
                }
            }
        }
    }
}

/// In-process room relay for testing and ephemeral use.
///
/// Rooms behave like the HTTP room server: a join is forwarded to the other
/// subscribers of the room, broadcasts reach everyone but the sender. Every
/// operation is recorded so tests can check ordering.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    relay: Arc<Mutex<Relay>>,
}

impl MemoryTransport {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    fn relay(&self) -> MutexGuard<'_, Relay> {
        self.relay.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail subsequent joins with the given status, or accept them again with `None`.
    pub fn reject_joins(&self, status: Option<u16>) {
        self.relay().reject_joins = status;
    }

    /// Make subsequent subscribe calls fail.
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.relay().refuse_subscriptions = refuse;
    }

    /// Recorded operations, oldest first.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.relay().calls.clone()
    }

    /// Number of push streams currently open across all rooms.
    pub fn open_subscriptions(&self) -> usize {
        self.relay().rooms.values().map(HashMap::len).sum()
    }

    /// Push raw event data to every subscriber in a room.
    pub fn inject(&self, room: &RoomId, data: &str) {
        self.relay().fan_out(room, None, Ok(data.to_string()));
    }

    /// Report a transport failure on every push stream in a room.
    pub fn inject_error(&self, room: &RoomId, message: &str) {
        self.relay()
            .fan_out(room, None, Err(CollabError::Transport(message.to_string())));
    }
}

impl Transport for MemoryTransport {
    fn join(&self, room: &RoomId, body: &SessionPayload) -> BoxFuture<'_, CollabResult<()>> {
        let room = room.clone();
        let body = body.clone();
        Box::pin(async move {
            let mut relay = self.relay();
            relay.calls.push(TransportCall::Join {
                room: room.clone(),
                session: body.id.clone(),
            });
            if let Some(status) = relay.reject_joins {
                return Err(CollabError::JoinRejected { status });
            }
            relay.fan_out(&room, Some(&body.id), Ok(body.payload));
            Ok(())
        })
    }

    fn subscribe(
        &self,
        room: &RoomId,
        session: &SessionId,
    ) -> BoxFuture<'_, CollabResult<PushStream>> {
        let room = room.clone();
        let session = session.clone();
        Box::pin(async move {
            let mut relay = self.relay();
            relay.calls.push(TransportCall::Subscribe {
                room: room.clone(),
                session: session.clone(),
            });
            if relay.refuse_subscriptions {
                return Err(CollabError::Transport("push subscription refused".to_string()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let id = relay.next_subscription;
            relay.next_subscription += 1;
            relay
                .rooms
                .entry(room.clone())
                .or_default()
                .insert(session.clone(), (id, tx));

            Ok(Box::pin(MemorySubscription {
                id,
                room,
                session,
                rx,
                relay: Arc::clone(&self.relay),
            }) as PushStream)
        })
    }

    fn broadcast(&self, room: &RoomId, body: &SessionPayload) -> BoxFuture<'_, CollabResult<()>> {
        let room = room.clone();
        let body = body.clone();
        Box::pin(async move {
            let mut relay = self.relay();
            relay.calls.push(TransportCall::Broadcast {
                room: room.clone(),
                session: body.id.clone(),
            });
            relay.fan_out(&room, Some(&body.id), Ok(body.payload));
            Ok(())
        })
    }
}

/// Push stream handed out by [`MemoryTransport`]. Unregisters on drop.
struct MemorySubscription {
    id: u64,
    room: RoomId,
    session: SessionId,
    rx: mpsc::UnboundedReceiver<CollabResult<String>>,
    relay: Arc<Mutex<Relay>>,
}

impl Stream for MemorySubscription {
    type Item = CollabResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        let mut relay = self.relay.lock().unwrap_or_else(PoisonError::into_inner);
        relay.calls.push(TransportCall::Unsubscribe {
            room: self.room.clone(),
            session: self.session.clone(),
        });
        let now_empty = match relay.rooms.get_mut(&self.room) {
            Some(peers) => {
                // A resubscribe under the same session replaces the entry.
                if peers.get(&self.session).is_some_and(|(id, _)| *id == self.id) {
                    peers.remove(&self.session);
                }
                peers.is_empty()
            }
            None => false,
        };
        if now_empty {
            relay.rooms.remove(&self.room);
        }
    }
}

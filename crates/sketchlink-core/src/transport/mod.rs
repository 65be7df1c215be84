//! Transport abstraction for the room server.
//!
//! A transport knows how to perform the three room-server exchanges:
//! the join handshake, the server-push subscription and one-shot broadcasts.

mod http;
mod memory;

pub use http::HttpTransport;
pub use memory::{MemoryTransport, TransportCall};

use crate::error::CollabResult;
use crate::ids::{RoomId, SessionId};
use crate::update::SessionPayload;
use futures_util::Stream;
use std::future::Future;
use std::pin::Pin;

/// Boxed future for transport operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Inbound push events. Each item is the raw `data` of one event (an encoded
/// update) or a transport failure.
pub type PushStream = Pin<Box<dyn Stream<Item = CollabResult<String>> + Send>>;

/// Room server operations used by a session channel.
pub trait Transport: Send + Sync {
    /// Announce a session to a room. Non-success responses fail with
    /// [`CollabError::JoinRejected`](crate::CollabError::JoinRejected).
    fn join(&self, room: &RoomId, body: &SessionPayload) -> BoxFuture<'_, CollabResult<()>>;

    /// Open the push subscription for one session. Resolves once the
    /// subscription is open and ready to deliver events.
    fn subscribe(&self, room: &RoomId, session: &SessionId)
    -> BoxFuture<'_, CollabResult<PushStream>>;

    /// Send an update to the other participants. No acknowledgment.
    fn broadcast(&self, room: &RoomId, body: &SessionPayload) -> BoxFuture<'_, CollabResult<()>>;
}

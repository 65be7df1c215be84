//! SketchLink Core Library
//!
//! Client side of the SketchLink collaboration protocol: room and session
//! identifiers, the update codec, push-channel sessions and the session
//! manager that the UI layer talks to.

pub mod channel;
pub mod config;
pub mod error;
pub mod ids;
pub mod manager;
pub mod transport;
pub mod update;

pub use channel::{ConnectionState, SessionChannel, SessionEvent};
pub use config::{CollabConfig, ReconnectPolicy};
pub use error::{CollabError, CollabResult};
pub use ids::{RoomId, SessionId};
pub use manager::SessionManager;
pub use transport::{HttpTransport, MemoryTransport, Transport};
pub use update::{SessionPayload, Update};

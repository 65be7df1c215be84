//! Session management for the UI layer.
//!
//! The [`SessionManager`] is the single owner of the active collaboration
//! session. It turns user intent (start a session, join a room, leave) into
//! [`SessionChannel`] operations and keeps the user-visible state: connection
//! state, display name and the last error.

use std::sync::Arc;

use crate::channel::{ConnectionState, SessionChannel, SessionEvent};
use crate::config::CollabConfig;
use crate::error::{CollabError, CollabResult};
use crate::ids::{RoomId, SessionId};
use crate::transport::{HttpTransport, Transport};
use crate::update::Update;

/// Normalize free-text name input. Empty input means no name; anything else
/// is announced exactly as typed.
pub fn normalize_name(input: &str) -> Option<String> {
    if input.is_empty() {
        None
    } else {
        Some(input.to_string())
    }
}

/// Owns at most one active session channel.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    config: CollabConfig,
    username: Option<String>,
    active: Option<SessionChannel>,
    last_error: Option<String>,
}

impl SessionManager {
    /// Create a manager using the given transport.
    pub fn new(transport: Arc<dyn Transport>, config: CollabConfig) -> Self {
        Self {
            transport,
            config,
            username: None,
            active: None,
            last_error: None,
        }
    }

    /// Create a manager talking HTTP to `config.server_url`.
    pub fn with_http(config: CollabConfig) -> CollabResult<Self> {
        let transport = HttpTransport::new(&config.server_url)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    /// Set the display name from user input.
    pub fn set_username(&mut self, input: &str) {
        self.username = normalize_name(input);
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        self.active
            .as_ref()
            .map_or(ConnectionState::Disconnected, SessionChannel::state)
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The last join failure, for display. Cleared by a successful join.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn active_session(&self) -> Option<&SessionChannel> {
        self.active.as_ref()
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.active.as_ref().map(SessionChannel::room)
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.active.as_ref().map(SessionChannel::session)
    }

    /// Start a session in a fresh room under the given display name.
    ///
    /// Any active session is closed first. Returns the new room, which other
    /// participants pass to [`join_room`](Self::join_room).
    pub async fn start_session(&mut self, display_name: &str) -> CollabResult<RoomId> {
        self.set_username(display_name);
        let room = RoomId::generate();
        self.join_room(room.clone()).await?;
        Ok(room)
    }

    /// Join an existing room with a fresh session, replacing any active one.
    pub async fn join_room(&mut self, room: RoomId) -> CollabResult<()> {
        self.leave().await;

        let mut channel = SessionChannel::new(
            Arc::clone(&self.transport),
            room,
            SessionId::generate(),
            self.config.reconnect,
        );
        match channel.join(self.username.clone()).await {
            Ok(()) => {
                self.last_error = None;
                self.active = Some(channel);
                Ok(())
            }
            Err(e) => {
                log::error!("Could not start collaboration session: {}", e);
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Close the active session, if any.
    pub async fn leave(&mut self) {
        if let Some(mut channel) = self.active.take() {
            channel.close().await;
        }
    }

    /// Broadcast an update through the active session.
    pub async fn broadcast(&self, update: &Update) -> CollabResult<()> {
        match &self.active {
            Some(channel) => channel.broadcast(update).await,
            None => Err(CollabError::NotConnected),
        }
    }

    /// Poll the active session for pending events (non-blocking).
    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        self.active
            .as_mut()
            .map(SessionChannel::poll_events)
            .unwrap_or_default()
    }

    /// Wait for the next event of the active session.
    ///
    /// Returns `None` when there is no active session or it has ended.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.active.as_mut()?.next_event().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;
    use crate::transport::{BoxFuture, MemoryTransport, PushStream, TransportCall};
    use crate::update::{SessionPayload, encode};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Holds every opened subscription until the gate is released.
    struct GatedTransport {
        inner: MemoryTransport,
        gate: Arc<Notify>,
    }

    impl Transport for GatedTransport {
        fn join(&self, room: &RoomId, body: &SessionPayload) -> BoxFuture<'_, CollabResult<()>> {
            self.inner.join(room, body)
        }

        fn subscribe(
            &self,
            room: &RoomId,
            session: &SessionId,
        ) -> BoxFuture<'_, CollabResult<PushStream>> {
            let opened = self.inner.subscribe(room, session);
            Box::pin(async move {
                let stream = opened.await?;
                self.gate.notified().await;
                Ok(stream)
            })
        }

        fn broadcast(&self, room: &RoomId, body: &SessionPayload) -> BoxFuture<'_, CollabResult<()>> {
            self.inner.broadcast(room, body)
        }
    }

    fn manager(transport: &MemoryTransport) -> SessionManager {
        let config = CollabConfig {
            reconnect: ReconnectPolicy::disabled(),
            ..CollabConfig::default()
        };
        SessionManager::new(Arc::new(transport.clone()), config)
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name(""), None);
        assert_eq!(normalize_name("   "), Some("   ".to_string()));
        assert_eq!(normalize_name(" Alice "), Some(" Alice ".to_string()));
    }

    #[test]
    fn test_new_manager_is_disconnected() {
        let manager = manager(&MemoryTransport::new());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.room_id().is_none());
        assert!(manager.username().is_none());
    }

    #[tokio::test]
    async fn test_start_session_connects() {
        let transport = MemoryTransport::new();
        let mut manager = manager(&transport);

        let room = manager.start_session("Alice").await.unwrap();

        assert!(manager.is_connected());
        assert_eq!(manager.username(), Some("Alice"));
        assert_eq!(manager.room_id(), Some(&room));
        assert_eq!(transport.open_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_second_start_closes_first_before_joining() {
        let transport = MemoryTransport::new();
        let mut manager = manager(&transport);

        let first_room = manager.start_session("Alice").await.unwrap();
        let first_session = manager.session_id().cloned().unwrap();
        let second_room = manager.start_session("Bob").await.unwrap();
        let second_session = manager.session_id().cloned().unwrap();

        assert_ne!(first_room, second_room);
        assert_ne!(first_session, second_session);
        assert_eq!(transport.open_subscriptions(), 1);
        assert_eq!(manager.username(), Some("Bob"));
        assert_eq!(
            transport.calls(),
            vec![
                TransportCall::Join {
                    room: first_room.clone(),
                    session: first_session.clone(),
                },
                TransportCall::Subscribe {
                    room: first_room.clone(),
                    session: first_session.clone(),
                },
                TransportCall::Unsubscribe {
                    room: first_room,
                    session: first_session,
                },
                TransportCall::Join {
                    room: second_room.clone(),
                    session: second_session.clone(),
                },
                TransportCall::Subscribe {
                    room: second_room,
                    session: second_session,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_join_surfaces_error() {
        let transport = MemoryTransport::new();
        transport.reject_joins(Some(500));
        let mut manager = manager(&transport);

        let result = manager.start_session("Alice").await;

        assert_eq!(result, Err(CollabError::JoinRejected { status: 500 }));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.active_session().is_none());
        assert_eq!(manager.last_error(), Some("Unable to connect: 500"));
        assert_eq!(transport.open_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_failed_restart_leaves_prior_session_closed() {
        let transport = MemoryTransport::new();
        let mut manager = manager(&transport);
        manager.start_session("Alice").await.unwrap();

        transport.reject_joins(Some(503));
        assert!(manager.start_session("Alice").await.is_err());

        assert!(manager.active_session().is_none());
        assert_eq!(transport.open_subscriptions(), 0);

        transport.reject_joins(None);
        manager.start_session("Alice").await.unwrap();
        assert!(manager.is_connected());
        assert_eq!(manager.last_error(), None);
    }

    #[tokio::test]
    async fn test_blank_name_joins_anonymously() {
        let transport = MemoryTransport::new();
        let mut host = manager(&transport);
        let room = host.start_session("Host").await.unwrap();

        let mut guest = manager(&transport);
        guest.set_username("Guest");
        guest.set_username("");
        guest.join_room(room).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), host.next_event())
            .await
            .unwrap();
        assert_eq!(event, Some(SessionEvent::PeerJoined { name: None }));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_other_participant() {
        let transport = MemoryTransport::new();
        let mut alice = manager(&transport);
        let room = alice.start_session("Alice").await.unwrap();
        let mut bob = manager(&transport);
        bob.set_username("Bob");
        bob.join_room(room.clone()).await.unwrap();

        bob.broadcast(&Update::UpdateEvent).await.unwrap();

        let mut received = Vec::new();
        while received.len() < 2 {
            let event = tokio::time::timeout(Duration::from_secs(5), alice.next_event())
                .await
                .unwrap()
                .unwrap();
            received.push(event);
        }
        assert_eq!(
            received,
            vec![
                SessionEvent::PeerJoined {
                    name: Some("Bob".to_string())
                },
                SessionEvent::RemoteUpdate,
            ]
        );

        transport.inject(&room, "garbage");
        tokio::task::yield_now().await;
        assert!(alice.poll_events().is_empty());
        assert!(alice.is_connected());
    }

    #[tokio::test]
    async fn test_leave_and_broadcast_without_session() {
        let transport = MemoryTransport::new();
        let mut manager = manager(&transport);
        manager.leave().await;
        assert_eq!(
            manager.broadcast(&Update::Init).await,
            Err(CollabError::NotConnected)
        );

        let room = manager.start_session("").await.unwrap();
        manager.leave().await;
        manager.leave().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_subscriptions(), 0);
        assert!(manager.poll_events().is_empty());

        // Leaving released the room; nothing is listening any more.
        transport.inject(&room, &encode(&Update::UpdateEvent).unwrap());
        assert_eq!(manager.next_event().await, None);
    }

    #[tokio::test]
    async fn test_with_http_rejects_bad_url() {
        let config = CollabConfig {
            server_url: "::nope::".to_string(),
            ..CollabConfig::default()
        };
        assert!(matches!(
            SessionManager::with_http(config),
            Err(CollabError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_abandoned_start_session_leaks_nothing() {
        let transport = MemoryTransport::new();
        let gate = Arc::new(Notify::new());
        let gated = GatedTransport {
            inner: transport.clone(),
            gate: Arc::clone(&gate),
        };
        let config = CollabConfig {
            reconnect: ReconnectPolicy::disabled(),
            ..CollabConfig::default()
        };
        let mut manager = SessionManager::new(Arc::new(gated), config);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), manager.start_session("Alice")).await;
        assert!(abandoned.is_err());

        gate.notify_one();
        tokio::task::yield_now().await;

        assert!(manager.active_session().is_none());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.open_subscriptions(), 0);
        assert!(matches!(
            transport.calls().last(),
            Some(TransportCall::Unsubscribe { .. })
        ));

        // The stored permit lets the next subscription through.
        manager.start_session("Alice").await.unwrap();
        assert!(manager.is_connected());
        assert_eq!(transport.open_subscriptions(), 1);
    }
}

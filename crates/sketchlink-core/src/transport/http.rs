//! HTTP room-server transport.
//!
//! Join is `POST /collab/{room}`, broadcast is `PUT /collab/{room}` and the
//! push subscription is an event stream at `GET /collab/{room}/{session}`.

use super::{BoxFuture, PushStream, Transport};
use crate::error::{CollabError, CollabResult};
use crate::ids::{RoomId, SessionId};
use crate::update::SessionPayload;
use eventsource_stream::Eventsource;
use futures_util::{StreamExt, future};
use reqwest::header::ACCEPT;
use url::Url;

/// Transport talking to a room server over HTTP and Server-Sent Events.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    /// Create a transport for the server at `server_url`.
    pub fn new(server_url: &str) -> CollabResult<Self> {
        Self::with_client(reqwest::Client::new(), server_url)
    }

    pub fn with_client(client: reqwest::Client, server_url: &str) -> CollabResult<Self> {
        let base = Url::parse(server_url)?;
        if base.cannot_be_a_base() {
            return Err(CollabError::InvalidUrl(server_url.to_string()));
        }
        Ok(Self { client, base })
    }

    /// `/collab/{room}`
    pub fn room_url(&self, room: &RoomId) -> CollabResult<Url> {
        self.endpoint(&["collab", room.as_str()])
    }

    /// `/collab/{room}/{session}`
    pub fn session_url(&self, room: &RoomId, session: &SessionId) -> CollabResult<Url> {
        self.endpoint(&["collab", room.as_str(), session.as_str()])
    }

    fn endpoint(&self, segments: &[&str]) -> CollabResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| CollabError::InvalidUrl(self.base.to_string()))?
            .clear()
            .extend(segments);
        Ok(url)
    }
}

impl Transport for HttpTransport {
    fn join(&self, room: &RoomId, body: &SessionPayload) -> BoxFuture<'_, CollabResult<()>> {
        let url = self.room_url(room);
        let body = body.clone();
        Box::pin(async move {
            let url = url?;
            log::debug!("POST {}", url);
            let response = self.client.post(url).json(&body).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(CollabError::JoinRejected {
                    status: status.as_u16(),
                });
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        room: &RoomId,
        session: &SessionId,
    ) -> BoxFuture<'_, CollabResult<PushStream>> {
        let url = self.session_url(room, session);
        Box::pin(async move {
            let url = url?;
            log::debug!("GET {} (event stream)", url);
            let response = self
                .client
                .get(url)
                .header(ACCEPT, "text/event-stream")
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(CollabError::Transport(format!(
                    "push subscription refused: {}",
                    status
                )));
            }

            // Only unnamed events reach an EventSource "message" listener.
            let events = response
                .bytes_stream()
                .eventsource()
                .filter_map(|item| {
                    future::ready(match item {
                        Ok(event) if event.event.is_empty() || event.event == "message" => {
                            Some(Ok(event.data))
                        }
                        Ok(event) => {
                            log::debug!("Ignoring '{}' push event", event.event);
                            None
                        }
                        Err(e) => Some(Err(CollabError::Transport(e.to_string()))),
                    })
                });
            Ok(Box::pin(events) as PushStream)
        })
    }

    fn broadcast(&self, room: &RoomId, body: &SessionPayload) -> BoxFuture<'_, CollabResult<()>> {
        let url = self.room_url(room);
        let body = body.clone();
        Box::pin(async move {
            let url = url?;
            log::debug!("PUT {}", url);
            let response = self.client.put(url).json(&body).send().await?;
            if !response.status().is_success() {
                log::warn!("Broadcast not accepted: {}", response.status());
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_url() {
        let transport = HttpTransport::new("http://localhost:8080").unwrap();
        let url = transport.room_url(&RoomId::from("r1")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/collab/r1");
    }

    #[test]
    fn test_session_url_replaces_base_path() {
        let transport = HttpTransport::new("https://draw.example.com/app/index.html").unwrap();
        let url = transport
            .session_url(&RoomId::from("r1"), &SessionId::from("s1"))
            .unwrap();
        assert_eq!(url.as_str(), "https://draw.example.com/collab/r1/s1");
    }

    #[test]
    fn test_ids_are_percent_encoded() {
        let transport = HttpTransport::new("http://localhost:8080").unwrap();
        let url = transport.room_url(&RoomId::from("a/b c")).unwrap();
        assert_eq!(url.path(), "/collab/a%2Fb%20c");
    }

    #[test]
    fn test_invalid_server_url() {
        assert!(matches!(
            HttpTransport::new("not a url"),
            Err(CollabError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpTransport::new("mailto:someone@example.com"),
            Err(CollabError::InvalidUrl(_))
        ));
    }
}

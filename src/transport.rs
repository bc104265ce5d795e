//! Reconnecting controller link
//!
//! Keeps one WebSocket open from the phone to the session server. When the
//! connection drops the link waits a fixed delay and reconnects with the join
//! token it was given, so the server re-attaches the same role. Detector state
//! lives outside the link and is unaffected by reconnects.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::controller::LinkState;
use crate::error::PartyError;
use crate::protocol::{ControllerMessage, ServerMessage};
use crate::session::Role;

/// Fixed-delay reconnect
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), or `None` to give up
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt > max => None,
            _ => Some(self.delay),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerLink {
    server: String,
    session: String,
    role: Role,
    token: Option<String>,
    policy: ReconnectPolicy,
}

/// How one connection ended
enum Ended {
    /// Outgoing channel closed: the device is done
    Finished,
    /// Socket lost; `joined` if the server had accepted the role first
    Dropped { joined: bool },
    /// Server answered the join with an error
    Refused(String),
}

impl ControllerLink {
    /// `server` is the WebSocket base, e.g. `ws://192.168.1.20:8080`
    pub fn new(server: impl Into<String>, session: impl Into<String>, role: Role) -> Self {
        Self {
            server: server.into().trim_end_matches('/').to_string(),
            session: session.into(),
            role,
            token: None,
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn url(&self) -> String {
        let mut url = format!(
            "{}/ws/controller?session={}&role={}",
            self.server, self.session, self.role
        );
        if let Some(token) = &self.token {
            url.push_str("&token=");
            url.push_str(token);
        }
        url
    }

    /// Remember the join token handed out by the server
    pub fn observe(&mut self, message: &ServerMessage) {
        if let ServerMessage::Joined { role, token } = message {
            if *role == self.role && self.token.as_deref() != Some(token.as_str()) {
                debug!(%role, "join token stored");
                self.token = Some(token.clone());
            }
        }
    }

    /// Run until `outgoing` closes, the server refuses the join, or the
    /// reconnect policy gives up.
    ///
    /// Server messages are forwarded to `incoming`; link state changes are
    /// published on `state`. Only a connection that got as far as `joined`
    /// resets the attempt count.
    pub async fn run(
        mut self,
        mut outgoing: mpsc::UnboundedReceiver<ControllerMessage>,
        incoming: mpsc::UnboundedSender<ServerMessage>,
        state: watch::Sender<LinkState>,
    ) -> Result<(), PartyError> {
        let mut attempt = 0u32;
        loop {
            let _ = state.send(if attempt == 0 {
                LinkState::Connecting
            } else {
                LinkState::Reconnecting { attempt }
            });

            match connect_async(self.url()).await {
                Ok((socket, _)) => {
                    debug!(session = %self.session, role = %self.role, "controller socket open");
                    match self.pump(socket, &mut outgoing, &incoming, &state).await {
                        Ended::Finished => {
                            let _ = state.send(LinkState::Disconnected);
                            return Ok(());
                        }
                        Ended::Refused(message) => {
                            warn!(
                                session = %self.session,
                                role = %self.role,
                                %message,
                                "join refused"
                            );
                            let _ = state.send(LinkState::Rejected);
                            return Err(PartyError::JoinRefused(message));
                        }
                        Ended::Dropped { joined } => {
                            if joined {
                                attempt = 0;
                            }
                            warn!(session = %self.session, joined, "controller link dropped");
                        }
                    }
                }
                Err(err) => debug!(error = %err, "controller link connect failed"),
            }

            attempt += 1;
            let Some(delay) = self.policy.next_delay(attempt) else {
                let _ = state.send(LinkState::Disconnected);
                return Err(PartyError::Transport(format!(
                    "gave up after {} reconnect attempts",
                    attempt - 1
                )));
            };
            let _ = state.send(LinkState::Reconnecting { attempt });
            tokio::time::sleep(delay).await;
        }
    }

    async fn pump(
        &mut self,
        socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
        outgoing: &mut mpsc::UnboundedReceiver<ControllerMessage>,
        incoming: &mpsc::UnboundedSender<ServerMessage>,
        state: &watch::Sender<LinkState>,
    ) -> Ended {
        let (mut sink, mut stream) = socket.split();
        let mut joined = false;
        loop {
            tokio::select! {
                out = outgoing.recv() => {
                    let Some(message) = out else {
                        let _ = sink.send(Message::Close(None)).await;
                        return Ended::Finished;
                    };
                    let json = match message.to_json() {
                        Ok(json) => json,
                        Err(err) => {
                            warn!(error = %err, "failed to encode controller message");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(json)).await.is_err() {
                        return Ended::Dropped { joined };
                    }
                }
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                            return Ended::Dropped { joined }
                        }
                        Some(Ok(_)) => continue,
                    };
                    let message = match ServerMessage::parse(&text) {
                        Ok(message) => message,
                        Err(err) => {
                            warn!(error = %err, "dropping malformed server message");
                            continue;
                        }
                    };
                    self.observe(&message);
                    let refusal = match &message {
                        ServerMessage::Joined { role, .. } if *role == self.role && !joined => {
                            info!(
                                session = %self.session,
                                role = %self.role,
                                "controller link joined"
                            );
                            joined = true;
                            let _ = state.send(LinkState::Connected);
                            None
                        }
                        ServerMessage::Error { message } if !joined => Some(message.clone()),
                        _ => None,
                    };
                    let _ = incoming.send(message);
                    if let Some(reason) = refusal {
                        return Ended::Refused(reason);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartyConfig;
    use crate::server::{router, BaseUrl, Hub};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_url_carries_token_after_join() {
        let mut link = ControllerLink::new("ws://10.0.0.2:8080/", "abc", Role::Player1);
        assert_eq!(link.url(), "ws://10.0.0.2:8080/ws/controller?session=abc&role=player1");

        // another role's token is not ours
        link.observe(&ServerMessage::Joined {
            role: Role::Player2,
            token: "t2".into(),
        });
        assert_eq!(link.token(), None);

        link.observe(&ServerMessage::Joined {
            role: Role::Player1,
            token: "t1".into(),
        });
        assert_eq!(
            link.url(),
            "ws://10.0.0.2:8080/ws/controller?session=abc&role=player1&token=t1"
        );
    }

    #[test]
    fn test_reconnect_policy() {
        let forever = ReconnectPolicy::default();
        assert_eq!(forever.next_delay(50), Some(Duration::from_secs(2)));
        let bounded = ReconnectPolicy {
            delay: Duration::from_millis(10),
            max_attempts: Some(2),
        };
        assert_eq!(bounded.next_delay(2), Some(Duration::from_millis(10)));
        assert_eq!(bounded.next_delay(3), None);
    }

    #[tokio::test]
    async fn test_gives_up_when_server_unreachable() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("ws://127.0.0.1:{}", port);
        let link = ControllerLink::new(url, "abc", Role::Player1).with_policy(ReconnectPolicy {
            delay: Duration::from_millis(10),
            max_attempts: Some(2),
        });
        let (_out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, _in_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let result = link.run(out_rx, in_tx, state_tx).await;
        assert!(matches!(result, Err(PartyError::Transport(_))));
        assert_eq!(*state_rx.borrow(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_joins_running_server() {
        let hub = Hub::new(PartyConfig::default(), Arc::new(BaseUrl::new("http://localhost")));
        let session = hub.create();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(hub.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });

        // a display keeps the session alive
        let (display_tx, _display_rx) = mpsc::unbounded_channel();
        session
            .attach(uuid::Uuid::new_v4(), crate::server::Join::Display, display_tx)
            .unwrap();

        let link = ControllerLink::new(format!("ws://{}", addr), session.id(), Role::Player1);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, mut in_rx) = mpsc::unbounded_channel();
        let (state_tx, _state_rx) = watch::channel(LinkState::Disconnected);
        let task = tokio::spawn(link.run(out_rx, in_tx, state_tx));

        let joined = in_rx.recv().await.unwrap();
        assert!(matches!(joined, ServerMessage::Joined { role: Role::Player1, .. }));

        out_tx.send(ControllerMessage::Ping).unwrap();
        assert_eq!(in_rx.recv().await.unwrap(), ServerMessage::Pong);

        drop(out_tx);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_refused_role_stops_the_link() {
        let hub = Hub::new(PartyConfig::default(), Arc::new(BaseUrl::new("http://localhost")));
        let session = hub.create();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(hub.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });

        // player1 is already held by another phone
        let (holder_tx, _holder_rx) = mpsc::unbounded_channel();
        session
            .attach(
                uuid::Uuid::new_v4(),
                crate::server::Join::Controller {
                    role: Role::Player1,
                    token: None,
                },
                holder_tx,
            )
            .unwrap();

        let url = format!("ws://{}", addr);
        let policy = ReconnectPolicy {
            delay: Duration::from_millis(20),
            max_attempts: Some(5),
        };
        let link = ControllerLink::new(url, session.id(), Role::Player1).with_policy(policy);
        let (_out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, mut in_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);

        let result = tokio::time::timeout(Duration::from_secs(3), link.run(out_rx, in_tx, state_tx))
            .await
            .expect("link kept redialing a refused role");
        assert!(matches!(result, Err(PartyError::JoinRefused(ref m)) if m.contains("player1")));
        assert_eq!(*state_rx.borrow(), LinkState::Rejected);

        let mut errors = 0;
        while let Ok(message) = in_rx.try_recv() {
            if matches!(message, ServerMessage::Error { .. }) {
                errors += 1;
            }
        }
        assert_eq!(errors, 1);
    }
}

//! Realtime collaborative editing channel
//!
//! Each connection is authenticated once at upgrade time. Authorization for
//! room joins and mutating events goes through [`SessionGate`], a small
//! per-connection cache over the access resolver, so a revoked share or ACL
//! edit is reflected within the cache TTL. Authorization failures are
//! reported as `error` events; the connection stays open.

use crate::{
    auth::{self, Claims},
    AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use inkboard_applications::AccessResolver;
use inkboard_core::{DrawingAccess, InkboardResult, Principal};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Client -> server events
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Request to join a drawing's room
    JoinRoom { drawing_id: String },
    /// Cursor position update (read-only; requires prior membership)
    CursorMove { drawing_id: String, x: f64, y: f64 },
    /// Element mutation (requires edit access, re-checked per event)
    ElementUpdate {
        drawing_id: String,
        elements: serde_json::Value,
    },
    /// Presence heartbeat (read-only; requires prior membership)
    UserActivity {
        drawing_id: String,
        #[serde(default)]
        idle: bool,
    },
}

/// Server -> client events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Acknowledges a successful room join
    RoomJoined {
        drawing_id: String,
        access: DrawingAccess,
        participant: Participant,
    },
    /// Full participant list after membership changes
    PresenceUpdate {
        drawing_id: String,
        participants: Vec<Participant>,
    },
    /// Relayed cursor movement
    CursorMove {
        drawing_id: String,
        participant_id: String,
        x: f64,
        y: f64,
    },
    /// Relayed element mutation
    ElementUpdate {
        drawing_id: String,
        participant_id: String,
        elements: serde_json::Value,
    },
    /// Relayed activity heartbeat
    UserActivity {
        drawing_id: String,
        participant_id: String,
        idle: bool,
    },
    /// Authorization or protocol failure; the connection stays open
    Error { code: String, message: String },
}

/// Error codes carried by [`ServerEvent::Error`].
pub mod error_code {
    pub const ROOM_ACCESS_DENIED: &str = "room-access-denied";
    pub const EDIT_ACCESS_DENIED: &str = "edit-access-denied";
    pub const NOT_IN_ROOM: &str = "not-in-room";
    pub const INVALID_EVENT: &str = "invalid-event";
    pub const INTERNAL: &str = "internal";
}

/// A room participant as other clients see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Connection-scoped id
    pub id: String,
    /// Account id for authenticated participants
    pub user_id: Option<String>,
    pub display_name: String,
}

impl Participant {
    /// Derive the presence identity server-side. Client-supplied name
    /// fields are never trusted: anonymous identities come from the
    /// connection id, authenticated ones from the verified session claims.
    fn derive(connection_id: &str, principal: &Principal, claims: Option<&Claims>) -> Self {
        match principal {
            Principal::User(user_id) => Self {
                id: connection_id.to_string(),
                user_id: Some(user_id.clone()),
                display_name: claims
                    .and_then(|claims| claims.name.clone())
                    .unwrap_or_else(|| user_id.clone()),
            },
            Principal::Anonymous => Self {
                id: connection_id.to_string(),
                user_id: None,
                display_name: format!("guest-{}", &connection_id[..8]),
            },
        }
    }
}

/// A message fanned out to a room's subscribers.
#[derive(Debug, Clone)]
pub struct RoomMessage {
    /// Originating connection id; receivers filter their own messages
    pub from: String,
    pub event: ServerEvent,
}

struct Room {
    broadcaster: broadcast::Sender<RoomMessage>,
    participants: HashMap<String, Participant>,
}

/// Process-local registry of live rooms.
///
/// Membership is scoped to connection lifetimes: a disconnect removes the
/// connection from every room it joined, and empty rooms are dropped.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant, returning a subscription and the current roster.
    async fn join(
        &self,
        drawing_id: &str,
        participant: Participant,
    ) -> (broadcast::Receiver<RoomMessage>, Vec<Participant>) {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(drawing_id.to_string()).or_insert_with(|| Room {
            broadcaster: broadcast::channel(64).0,
            participants: HashMap::new(),
        });
        room.participants.insert(participant.id.clone(), participant);
        let receiver = room.broadcaster.subscribe();
        let roster = room.participants.values().cloned().collect();
        (receiver, roster)
    }

    /// Remove a participant. Returns the remaining roster, or `None` when
    /// the room emptied and was dropped.
    async fn leave(&self, drawing_id: &str, connection_id: &str) -> Option<Vec<Participant>> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(drawing_id)?;
        room.participants.remove(connection_id);
        if room.participants.is_empty() {
            rooms.remove(drawing_id);
            None
        } else {
            Some(room.participants.values().cloned().collect())
        }
    }

    async fn broadcast(&self, drawing_id: &str, message: RoomMessage) {
        let rooms = self.rooms.read().await;
        if let Some(room) = rooms.get(drawing_id) {
            // Send errors only mean there are no subscribers right now.
            let _ = room.broadcaster.send(message);
        }
    }

    /// Number of participants currently in a room.
    pub async fn room_size(&self, drawing_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms
            .get(drawing_id)
            .map(|room| room.participants.len())
            .unwrap_or(0)
    }
}

/// Per-connection authorization cache.
///
/// Decisions are cached for a short TTL and refreshed through the access
/// resolver when stale, bounding how long a revoked grant can keep acting.
pub struct SessionGate {
    principal: Principal,
    ttl: Duration,
    cache: HashMap<String, (DrawingAccess, Instant)>,
}

impl SessionGate {
    pub fn new(principal: Principal, ttl: Duration) -> Self {
        Self {
            principal,
            ttl,
            cache: HashMap::new(),
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Effective access for a drawing, served from cache while fresh.
    pub async fn access(
        &mut self,
        resolver: &AccessResolver,
        drawing_id: &str,
    ) -> InkboardResult<DrawingAccess> {
        if let Some((access, checked_at)) = self.cache.get(drawing_id) {
            if checked_at.elapsed() < self.ttl {
                return Ok(*access);
            }
        }

        let access = resolver
            .resolve(&self.principal, drawing_id, Utc::now())
            .await?;
        self.cache
            .insert(drawing_id.to_string(), (access, Instant::now()));
        Ok(access)
    }
}

/// Collaboration WebSocket handler
pub async fn collab_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    // Authenticate once at connect time; anonymous is allowed only when
    // authentication is not globally required.
    let (principal, claims) =
        match auth::principal_from_headers(&headers, state.config.inkboard.realtime.require_auth) {
            Ok(resolved) => resolved,
            Err(err) => return err.into_response(),
        };

    ws.on_upgrade(move |socket| handle_collab_socket(socket, state, principal, claims))
}

struct JoinedRoom {
    forward: JoinHandle<()>,
}

async fn handle_collab_socket(
    socket: WebSocket,
    state: AppState,
    principal: Principal,
    claims: Option<Claims>,
) {
    let connection_id = uuid::Uuid::new_v4().simple().to_string();
    let participant = Participant::derive(&connection_id, &principal, claims.as_ref());
    info!(connection_id = %connection_id, principal = %principal, "Collaboration socket connected");

    let (ws_sender, mut ws_receiver) = socket.split();

    // Single writer task owns the sink half; room forwarders and the event
    // loop all feed it through one channel.
    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(64);
    let writer = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(event) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut gate = SessionGate::new(
        principal,
        Duration::from_millis(state.config.inkboard.realtime.access_cache_ttl_ms),
    );
    let mut joined: HashMap<String, JoinedRoom> = HashMap::new();

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let outcome = handle_client_event(
                    &text,
                    &state,
                    &mut gate,
                    &participant,
                    &mut joined,
                    &out_tx,
                )
                .await;
                if outcome.is_err() {
                    // The writer is gone; nothing more can be delivered.
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!(connection_id = %participant.id, "Client closed collaboration socket");
                break;
            }
            Err(e) => {
                error!("Collaboration socket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Disconnect: drop out of every room and let the others know.
    for (drawing_id, joined_room) in joined {
        joined_room.forward.abort();
        if let Some(remaining) = state.rooms.leave(&drawing_id, &participant.id).await {
            state
                .rooms
                .broadcast(
                    &drawing_id,
                    RoomMessage {
                        from: participant.id.clone(),
                        event: ServerEvent::PresenceUpdate {
                            drawing_id: drawing_id.clone(),
                            participants: remaining,
                        },
                    },
                )
                .await;
        }
    }
    writer.abort();
    info!(connection_id = %participant.id, "Collaboration socket disconnected");
}

type SendResult = Result<(), mpsc::error::SendError<ServerEvent>>;

async fn handle_client_event(
    text: &str,
    state: &AppState,
    gate: &mut SessionGate,
    participant: &Participant,
    joined: &mut HashMap<String, JoinedRoom>,
    out_tx: &mpsc::Sender<ServerEvent>,
) -> SendResult {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!("Unparsable client event: {}", e);
            return out_tx
                .send(ServerEvent::Error {
                    code: error_code::INVALID_EVENT.to_string(),
                    message: "Event could not be parsed".to_string(),
                })
                .await;
        }
    };

    match event {
        ClientEvent::JoinRoom { drawing_id } => {
            let access = match gate.access(&state.access, &drawing_id).await {
                Ok(access) => access,
                Err(err) => return internal_error(out_tx, err).await,
            };
            if !access.can_view() {
                return out_tx
                    .send(ServerEvent::Error {
                        code: error_code::ROOM_ACCESS_DENIED.to_string(),
                        message: "You do not have access to this drawing".to_string(),
                    })
                    .await;
            }

            if joined.contains_key(&drawing_id) {
                // Re-join refreshes access but keeps the existing membership.
                return out_tx
                    .send(ServerEvent::RoomJoined {
                        drawing_id,
                        access,
                        participant: participant.clone(),
                    })
                    .await;
            }

            let (receiver, roster) = state.rooms.join(&drawing_id, participant.clone()).await;
            let forward = tokio::spawn(forward_room_events(
                receiver,
                out_tx.clone(),
                participant.id.clone(),
            ));
            joined.insert(drawing_id.clone(), JoinedRoom { forward });

            out_tx
                .send(ServerEvent::RoomJoined {
                    drawing_id: drawing_id.clone(),
                    access,
                    participant: participant.clone(),
                })
                .await?;
            out_tx
                .send(ServerEvent::PresenceUpdate {
                    drawing_id: drawing_id.clone(),
                    participants: roster.clone(),
                })
                .await?;
            state
                .rooms
                .broadcast(
                    &drawing_id,
                    RoomMessage {
                        from: participant.id.clone(),
                        event: ServerEvent::PresenceUpdate {
                            drawing_id: drawing_id.clone(),
                            participants: roster,
                        },
                    },
                )
                .await;
            Ok(())
        }
        ClientEvent::ElementUpdate {
            drawing_id,
            elements,
        } => {
            if !joined.contains_key(&drawing_id) {
                return not_in_room(out_tx).await;
            }
            // Mutations re-validate on every event; the gate refreshes its
            // cache when stale so revocations take effect within the TTL.
            let access = match gate.access(&state.access, &drawing_id).await {
                Ok(access) => access,
                Err(err) => return internal_error(out_tx, err).await,
            };
            if !access.can_edit() {
                warn!(
                    participant = %participant.id,
                    drawing_id = %drawing_id,
                    "Dropped element update without edit access"
                );
                return out_tx
                    .send(ServerEvent::Error {
                        code: error_code::EDIT_ACCESS_DENIED.to_string(),
                        message: "Edit access is required to modify elements".to_string(),
                    })
                    .await;
            }

            state
                .rooms
                .broadcast(
                    &drawing_id,
                    RoomMessage {
                        from: participant.id.clone(),
                        event: ServerEvent::ElementUpdate {
                            drawing_id: drawing_id.clone(),
                            participant_id: participant.id.clone(),
                            elements,
                        },
                    },
                )
                .await;
            Ok(())
        }
        ClientEvent::CursorMove { drawing_id, x, y } => {
            // Read-only: membership was authorized at join time and cursor
            // positions cannot alter protected state.
            if !joined.contains_key(&drawing_id) {
                return not_in_room(out_tx).await;
            }
            state
                .rooms
                .broadcast(
                    &drawing_id,
                    RoomMessage {
                        from: participant.id.clone(),
                        event: ServerEvent::CursorMove {
                            drawing_id: drawing_id.clone(),
                            participant_id: participant.id.clone(),
                            x,
                            y,
                        },
                    },
                )
                .await;
            Ok(())
        }
        ClientEvent::UserActivity { drawing_id, idle } => {
            if !joined.contains_key(&drawing_id) {
                return not_in_room(out_tx).await;
            }
            state
                .rooms
                .broadcast(
                    &drawing_id,
                    RoomMessage {
                        from: participant.id.clone(),
                        event: ServerEvent::UserActivity {
                            drawing_id: drawing_id.clone(),
                            participant_id: participant.id.clone(),
                            idle,
                        },
                    },
                )
                .await;
            Ok(())
        }
    }
}

async fn not_in_room(out_tx: &mpsc::Sender<ServerEvent>) -> SendResult {
    out_tx
        .send(ServerEvent::Error {
            code: error_code::NOT_IN_ROOM.to_string(),
            message: "Join the room before sending events".to_string(),
        })
        .await
}

async fn internal_error(
    out_tx: &mpsc::Sender<ServerEvent>,
    err: inkboard_core::InkboardError,
) -> SendResult {
    error!("Access resolution failed: {}", err);
    out_tx
        .send(ServerEvent::Error {
            code: error_code::INTERNAL.to_string(),
            message: "Could not check access; try again".to_string(),
        })
        .await
}

/// Pump room broadcasts into the connection's writer, skipping messages
/// the connection itself originated.
async fn forward_room_events(
    mut receiver: broadcast::Receiver<RoomMessage>,
    out_tx: mpsc::Sender<ServerEvent>,
    connection_id: String,
) {
    loop {
        match receiver.recv().await {
            Ok(message) => {
                if message.from == connection_id {
                    continue;
                }
                if out_tx.send(message.event).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Room subscriber lagged behind, skipped {} messages", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkboard_applications::{
        AclEntry, DrawingDirectory, DrawingRecord, InMemoryDirectory, LinkSharePolicy,
        LinkSharePolicyStore,
    };
    use inkboard_core::GrantLevel;

    async fn resolver_with_drawing() -> (Arc<InMemoryDirectory>, AccessResolver) {
        let directory = Arc::new(InMemoryDirectory::new());
        directory
            .create_drawing(DrawingRecord::new("d1", "owner", "Board"))
            .await
            .unwrap();
        let resolver = AccessResolver::new(directory.clone());
        (directory, resolver)
    }

    #[tokio::test]
    async fn gate_caches_decisions_within_ttl() {
        let (directory, resolver) = resolver_with_drawing().await;
        let mut gate = SessionGate::new(
            Principal::User("u2".to_string()),
            Duration::from_secs(60),
        );

        assert_eq!(
            gate.access(&resolver, "d1").await.unwrap(),
            DrawingAccess::None
        );

        // The grant lands, but the cached decision still answers.
        directory
            .upsert_acl_entry(AclEntry::new("d1", "u2", GrantLevel::Edit))
            .await
            .unwrap();
        assert_eq!(
            gate.access(&resolver, "d1").await.unwrap(),
            DrawingAccess::None
        );
    }

    #[tokio::test]
    async fn gate_refreshes_stale_entries() {
        let (directory, resolver) = resolver_with_drawing().await;
        // Zero TTL: every check goes back to the resolver.
        let mut gate = SessionGate::new(Principal::User("u2".to_string()), Duration::ZERO);

        assert_eq!(
            gate.access(&resolver, "d1").await.unwrap(),
            DrawingAccess::None
        );

        directory
            .upsert_acl_entry(AclEntry::new("d1", "u2", GrantLevel::Edit))
            .await
            .unwrap();
        assert_eq!(
            gate.access(&resolver, "d1").await.unwrap(),
            DrawingAccess::Edit
        );
    }

    #[tokio::test]
    async fn gate_sees_link_share_revocation_after_ttl() {
        let (directory, resolver) = resolver_with_drawing().await;
        let shares = LinkSharePolicyStore::new(directory.clone(), LinkSharePolicy::default());
        let mut gate = SessionGate::new(Principal::Anonymous, Duration::ZERO);

        let share = shares
            .create_or_replace("d1", GrantLevel::Edit, None, Utc::now())
            .await
            .unwrap();
        assert!(gate.access(&resolver, "d1").await.unwrap().can_edit());

        shares.revoke("d1", &share.id, Utc::now()).await.unwrap();
        assert!(!gate.access(&resolver, "d1").await.unwrap().can_view());
    }

    #[tokio::test]
    async fn registry_tracks_membership_and_drops_empty_rooms() {
        let registry = RoomRegistry::new();
        let alice = Participant {
            id: "conn-a".to_string(),
            user_id: Some("u1".to_string()),
            display_name: "Alice".to_string(),
        };
        let guest = Participant {
            id: "conn-b".to_string(),
            user_id: None,
            display_name: "guest-conn-b".to_string(),
        };

        let (_rx_a, roster) = registry.join("d1", alice.clone()).await;
        assert_eq!(roster.len(), 1);
        let (_rx_b, roster) = registry.join("d1", guest.clone()).await;
        assert_eq!(roster.len(), 2);
        assert_eq!(registry.room_size("d1").await, 2);

        let remaining = registry.leave("d1", "conn-a").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "conn-b");

        assert!(registry.leave("d1", "conn-b").await.is_none());
        assert_eq!(registry.room_size("d1").await, 0);
    }

    #[test]
    fn anonymous_presence_identity_comes_from_the_connection() {
        let participant = Participant::derive(
            "abcdef0123456789abcdef0123456789",
            &Principal::Anonymous,
            None,
        );
        assert_eq!(participant.display_name, "guest-abcdef01");
        assert!(participant.user_id.is_none());
    }

    #[test]
    fn authenticated_presence_identity_comes_from_claims() {
        let claims = Claims::new("u9".to_string(), Some("Ada".to_string()));
        let participant = Participant::derive(
            "abcdef0123456789abcdef0123456789",
            &Principal::User("u9".to_string()),
            Some(&claims),
        );
        assert_eq!(participant.user_id.as_deref(), Some("u9"));
        assert_eq!(participant.display_name, "Ada");
    }

    #[test]
    fn client_events_use_kebab_case_tags() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"join-room","drawing_id":"d1"}"#).unwrap();
        assert!(matches!(event, ClientEvent::JoinRoom { .. }));

        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"element-update","drawing_id":"d1","elements":[]}"#,
        )
        .unwrap();
        assert!(matches!(event, ClientEvent::ElementUpdate { .. }));

        let text = serde_json::to_string(&ServerEvent::Error {
            code: error_code::NOT_IN_ROOM.to_string(),
            message: "Join the room before sending events".to_string(),
        })
        .unwrap();
        assert!(text.contains(r#""type":"error""#));
    }
}

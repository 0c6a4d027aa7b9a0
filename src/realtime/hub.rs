// src/realtime/hub.rs

//! The Realtime Hub (C10): thin layer binding a client connection to the
//! Session Registry (C8) and Broadcast Router (C9) (spec §4.10).
//!
//! Authentication and the gameplay RPC surface itself are out of scope
//! (spec Non-goals); `JwtVerifier` and `GameplayRpcSurface` are the minimal
//! trait seams the hub needs to call out to whatever implements them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::realtime::message::{RoutedMessage, TargetKind};
use crate::realtime::router::BroadcastRouter;
use crate::realtime::session::{DisconnectReason, GroupScope, SessionRegistry};
use crate::serialization;

/// Verifies an inbound bearer token and returns the principal id it
/// authenticates. A concrete implementation (token format, key material,
/// revocation) is outside this crate (spec Non-goals).
#[async_trait]
pub trait JwtVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> CoreResult<String>;
}

/// Where validated gameplay events are forwarded once the hub has
/// confirmed the caller's principal matches their claimed identity. A
/// concrete gameplay RPC surface is outside this crate (spec Non-goals).
#[async_trait]
pub trait GameplayRpcSurface: Send + Sync {
    async fn handle_event(&self, event: &RealtimeEvent) -> CoreResult<()>;
}

/// The realtime events the hub accepts from a client connection (spec
/// §4.10: "ready status, position, chat, game events").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RealtimeEvent {
    Ready { principal_id: String, ready: bool },
    Position { principal_id: String, x: f32, y: f32, z: f32 },
    Chat { principal_id: String, text: String },
    GameEvent { principal_id: String, name: String, payload: Vec<u8> },
    PlayerLeft { principal_id: String },
}

impl RealtimeEvent {
    pub fn principal_id(&self) -> &str {
        match self {
            RealtimeEvent::Ready { principal_id, .. }
            | RealtimeEvent::Position { principal_id, .. }
            | RealtimeEvent::Chat { principal_id, .. }
            | RealtimeEvent::GameEvent { principal_id, .. }
            | RealtimeEvent::PlayerLeft { principal_id } => principal_id,
        }
    }
}

/// Binds a client connection's lifecycle to the Session Registry and
/// Broadcast Router, and validates inbound events against the Session
/// before forwarding them.
pub struct RealtimeHub {
    sessions: Arc<SessionRegistry>,
    router: Arc<BroadcastRouter>,
    jwt: Arc<dyn JwtVerifier>,
    rpc: Option<Arc<dyn GameplayRpcSurface>>,
}

impl RealtimeHub {
    pub fn new(sessions: Arc<SessionRegistry>, router: Arc<BroadcastRouter>, jwt: Arc<dyn JwtVerifier>) -> Self {
        Self {
            sessions,
            router,
            jwt,
            rpc: None,
        }
    }

    pub fn with_rpc_surface(mut self, rpc: Arc<dyn GameplayRpcSurface>) -> Self {
        self.rpc = Some(rpc);
        self
    }

    /// Registers the Session for a newly-opened connection.
    pub fn on_connect(&self, connection_id: &str) -> CoreResult<()> {
        self.sessions.register(connection_id, None, HashMap::new())?;
        debug!(connection_id, "connection registered");
        Ok(())
    }

    /// Verifies `token` via the external JWT collaborator and associates
    /// the resulting principal id with the Session.
    pub async fn authenticate(&self, connection_id: &str, token: &str) -> CoreResult<String> {
        let principal_id = self.jwt.verify(token).await?;
        self.sessions.authenticate(connection_id, principal_id.clone())?;
        info!(connection_id, principal_id, "connection authenticated");
        Ok(principal_id)
    }

    /// Binds the Session to a room's Broadcast Group.
    pub fn join_room(&self, connection_id: &str, room_id: &str) -> CoreResult<()> {
        self.sessions.join_group(connection_id, GroupScope::Room, room_id)
    }

    pub fn leave_room(&self, connection_id: &str, room_id: &str) {
        self.sessions.leave_group(connection_id, GroupScope::Room, room_id);
    }

    /// Validates that `event`'s claimed principal matches the Session's
    /// authenticated principal, then forwards it to the Broadcast Router
    /// scoped to the Session's current room, and to the gameplay RPC
    /// surface if one is configured.
    pub async fn handle_event(&self, connection_id: &str, event: RealtimeEvent) -> CoreResult<()> {
        let session = self
            .sessions
            .get(connection_id)
            .ok_or_else(|| CoreError::InvalidArgument(format!("unknown connection {connection_id}")))?;

        match &session.principal_id {
            Some(principal_id) if principal_id == event.principal_id() => {}
            _ => {
                return Err(CoreError::Unauthorized(format!(
                    "event principal {} does not match session principal",
                    event.principal_id()
                )));
            }
        }

        self.sessions.touch(connection_id);

        let room_id = session
            .metadata
            .get(GroupScope::Room.as_str())
            .cloned()
            .ok_or_else(|| CoreError::RouteInvalid(format!("connection {connection_id} is not in a room")))?;

        let payload = serialization::encode(&event)?;
        let message = RoutedMessage::new(uuid::Uuid::new_v4().to_string(), payload, TargetKind::Room)
            .with_targets(vec![room_id]);

        self.router.route(&message).await?;

        if let Some(rpc) = &self.rpc {
            rpc.handle_event(&event).await?;
        }

        Ok(())
    }

    /// Removes the Session from every group it belongs to and broadcasts
    /// a "player left" notice to each room it was in.
    pub async fn on_disconnect(&self, connection_id: &str, reason: DisconnectReason) {
        let groups = self.sessions.groups_of(connection_id);
        let principal_id = self
            .sessions
            .get(connection_id)
            .and_then(|s| s.principal_id)
            .unwrap_or_default();

        self.sessions.unregister(connection_id, reason);
        self.router.mark_offline(connection_id);

        for key in groups {
            if !key.starts_with("room:") {
                continue;
            }
            let room_id = key.trim_start_matches("room:").to_string();
            let notice = RealtimeEvent::PlayerLeft {
                principal_id: principal_id.clone(),
            };
            let payload = match serialization::encode(&notice) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(connection_id, error = %e, "failed to encode player-left notice");
                    continue;
                }
            };
            let message = RoutedMessage::new(uuid::Uuid::new_v4().to_string(), payload, TargetKind::Room)
                .with_targets(vec![room_id])
                .with_exclusions(vec![connection_id.to_string()]);
            if let Err(e) = self.router.route(&message).await {
                warn!(connection_id, error = %e, "failed to broadcast player-left notice");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RouterConfig, SessionConfig};
    use crate::realtime::session::group_key;

    struct AlwaysVerify;

    #[async_trait]
    impl JwtVerifier for AlwaysVerify {
        async fn verify(&self, token: &str) -> CoreResult<String> {
            Ok(token.to_string())
        }
    }

    fn hub() -> RealtimeHub {
        let sessions = SessionRegistry::new(SessionConfig {
            max_pool_size: 10,
            connection_timeout_seconds: 5,
            idle_timeout_seconds: 3600,
            cleanup_interval_seconds: 60,
        });
        let router = BroadcastRouter::new(
            sessions.clone(),
            RouterConfig {
                max_concurrent_deliveries: 10,
                receiver_max_age_seconds: 3600,
                cleanup_interval_seconds: 60,
            },
        );
        RealtimeHub::new(sessions, router, Arc::new(AlwaysVerify))
    }

    #[tokio::test]
    async fn connect_authenticate_and_join_room() {
        let hub = hub();
        hub.on_connect("c1").unwrap();
        let principal = hub.authenticate("c1", "p1").await.unwrap();
        assert_eq!(principal, "p1");
        hub.join_room("c1", "r1").unwrap();
    }

    #[tokio::test]
    async fn event_with_mismatched_principal_is_unauthorized() {
        let hub = hub();
        hub.on_connect("c1").unwrap();
        hub.authenticate("c1", "p1").await.unwrap();
        hub.join_room("c1", "r1").unwrap();

        let event = RealtimeEvent::Chat {
            principal_id: "someone-else".to_string(),
            text: "hi".to_string(),
        };
        let result = hub.handle_event("c1", event).await;
        assert!(matches!(result, Err(CoreError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn disconnect_removes_session_from_groups() {
        let hub = hub();
        hub.on_connect("c1").unwrap();
        hub.authenticate("c1", "p1").await.unwrap();
        hub.join_room("c1", "r1").unwrap();

        hub.on_disconnect("c1", DisconnectReason::ClientClosed).await;
        assert!(hub.sessions.sessions_in_group(&group_key(GroupScope::Room, "r1")).is_empty());
    }
}

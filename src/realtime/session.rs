// src/realtime/session.rs

//! The Session Registry (C8): owns the mapping from connection id to
//! Session, plus reverse indexes by principal id and by Broadcast Group
//! key (spec §4.8).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::{CoreError, CoreResult};
use crate::metrics::{SESSIONS_EXPIRED_TOTAL, SESSIONS_ONLINE, SESSIONS_REGISTERED_TOTAL};

/// A Broadcast Group's identity: `<scope>:<scope-id>` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupScope {
    Room,
    Area,
    Role,
    Principal,
}

impl GroupScope {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            GroupScope::Room => "room",
            GroupScope::Area => "area",
            GroupScope::Role => "role",
            GroupScope::Principal => "principal",
        }
    }
}

/// Builds a group key of the shape `<scope>:<scope-id>`.
pub fn group_key(scope: GroupScope, scope_id: &str) -> String {
    format!("{}:{}", scope.as_str(), scope_id)
}

/// One live client connection (spec §3 "Session").
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: String,
    pub principal_id: Option<String>,
    pub metadata: HashMap<String, String>,
    pub connected_at: Instant,
    pub last_active: Instant,
    pub disconnected_at: Option<Instant>,
    pub online: bool,
}

impl Session {
    fn new(connection_id: String, principal_id: Option<String>, metadata: HashMap<String, String>) -> Self {
        let now = Instant::now();
        Self {
            connection_id,
            principal_id,
            metadata,
            connected_at: now,
            last_active: now,
            disconnected_at: None,
            online: true,
        }
    }
}

/// Why a Session was removed from the registry; carried into the "player
/// left" broadcast by the Realtime Hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    IdleTimeout,
    Kicked,
    ServerShutdown,
}

/// Owns Sessions and the indexes needed to answer membership queries
/// without scanning the whole registry (spec §4.8).
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    by_principal: DashMap<String, HashSet<String>>,
    by_group: DashMap<String, HashSet<String>>,
    config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            by_principal: DashMap::new(),
            by_group: DashMap::new(),
            config,
        })
    }

    /// Inserts a new Session. Refuses admission when the pool is still at
    /// capacity after an attempted cleanup of expired Sessions.
    pub fn register(
        &self,
        connection_id: impl Into<String>,
        principal_id: Option<String>,
        metadata: HashMap<String, String>,
    ) -> CoreResult<()> {
        if self.sessions.len() >= self.config.max_pool_size {
            self.cleanup_expired();
        }
        if self.sessions.len() >= self.config.max_pool_size {
            return Err(CoreError::PoolFull(format!(
                "session pool at capacity ({})",
                self.config.max_pool_size
            )));
        }

        let connection_id = connection_id.into();
        if let Some(principal) = &principal_id {
            self.by_principal
                .entry(principal.clone())
                .or_default()
                .insert(connection_id.clone());
        }

        self.sessions
            .insert(connection_id.clone(), Session::new(connection_id, principal_id, metadata));
        SESSIONS_REGISTERED_TOTAL.inc();
        SESSIONS_ONLINE.set(self.sessions.len() as f64);
        Ok(())
    }

    /// Marks a Session disconnected and removes it from every group and
    /// reverse index.
    pub fn unregister(&self, connection_id: &str, reason: DisconnectReason) {
        if let Some((_, mut session)) = self.sessions.remove(connection_id) {
            session.online = false;
            session.disconnected_at = Some(Instant::now());
            debug!(connection_id, ?reason, "session unregistered");

            if let Some(principal) = &session.principal_id {
                if let Some(mut members) = self.by_principal.get_mut(principal) {
                    members.remove(connection_id);
                }
            }
            for mut entry in self.by_group.iter_mut() {
                entry.value_mut().remove(connection_id);
            }
            self.by_group.retain(|_, members| !members.is_empty());
            SESSIONS_ONLINE.set(self.sessions.len() as f64);
        }
    }

    pub fn touch(&self, connection_id: &str) -> bool {
        if let Some(mut session) = self.sessions.get_mut(connection_id) {
            session.last_active = Instant::now();
            true
        } else {
            false
        }
    }

    /// Sets the principal id on an already-registered Session, e.g. once
    /// authentication completes (spec §4.10).
    pub fn authenticate(&self, connection_id: &str, principal_id: impl Into<String>) -> CoreResult<()> {
        let principal_id = principal_id.into();
        let mut session = self
            .sessions
            .get_mut(connection_id)
            .ok_or_else(|| CoreError::InvalidArgument(format!("unknown connection {connection_id}")))?;
        session.principal_id = Some(principal_id.clone());
        self.by_principal.entry(principal_id).or_default().insert(connection_id.to_string());
        Ok(())
    }

    /// Adds a Session to a group and records the scope/scope-id in its
    /// metadata so `cleanup_expired`/group invariants stay consistent.
    pub fn join_group(&self, connection_id: &str, scope: GroupScope, scope_id: &str) -> CoreResult<()> {
        if !self.sessions.contains_key(connection_id) {
            return Err(CoreError::InvalidArgument(format!("unknown connection {connection_id}")));
        }
        if let Some(mut session) = self.sessions.get_mut(connection_id) {
            session.metadata.insert(scope.as_str().to_string(), scope_id.to_string());
        }
        self.by_group
            .entry(group_key(scope, scope_id))
            .or_default()
            .insert(connection_id.to_string());
        Ok(())
    }

    pub fn leave_group(&self, connection_id: &str, scope: GroupScope, scope_id: &str) {
        let key = group_key(scope, scope_id);
        if let Some(mut members) = self.by_group.get_mut(&key) {
            members.remove(connection_id);
            if members.is_empty() {
                drop(members);
                self.by_group.remove(&key);
            }
        }
        if let Some(mut session) = self.sessions.get_mut(connection_id) {
            session.metadata.remove(scope.as_str());
        }
    }

    /// Every group key a Session currently belongs to, for emitting
    /// "player left" notifications on disconnect.
    pub fn groups_of(&self, connection_id: &str) -> Vec<String> {
        self.by_group
            .iter()
            .filter(|entry| entry.value().contains(connection_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn sessions_by_principal(&self, principal_id: &str) -> Vec<Session> {
        self.by_principal
            .get(principal_id)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| self.sessions.get(id).map(|s| s.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn sessions_in_group(&self, group_key: &str) -> Vec<Session> {
        self.by_group
            .get(group_key)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| self.sessions.get(id).map(|s| s.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, connection_id: &str) -> Option<Session> {
        self.sessions.get(connection_id).map(|s| s.clone())
    }

    pub fn is_online(&self, connection_id: &str) -> bool {
        self.sessions.get(connection_id).map(|s| s.online).unwrap_or(false)
    }

    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn all_online(&self) -> Vec<Session> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Evicts Sessions whose last-active exceeds the configured
    /// idle-timeout. Idempotent: calling it repeatedly with no newly-idle
    /// Sessions removes nothing further.
    pub fn cleanup_expired(&self) -> usize {
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_seconds);
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().last_active.elapsed() > idle_timeout)
            .map(|entry| entry.key().clone())
            .collect();

        for connection_id in &stale {
            self.unregister(connection_id, DisconnectReason::IdleTimeout);
        }
        if !stale.is_empty() {
            SESSIONS_EXPIRED_TOTAL.inc_by(stale.len() as f64);
        }
        stale.len()
    }

    pub async fn run_cleanup_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("session cleanup task started");
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.cleanup_interval_seconds));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.cleanup_expired();
                    if evicted > 0 {
                        debug!(evicted, "session cleanup evicted idle sessions");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("session cleanup task shutting down");
                    return;
                }
            }
        }
    }
}

// src/realtime/message.rs

//! Routed Message data types for the Broadcast Router (C9), per spec §3.

use chrono::{DateTime, Utc};

/// Target kind, driving the selection rules in spec §4.9's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Unicast,
    Multicast,
    Broadcast,
    Room,
    Area,
    Role,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Unicast => "unicast",
            TargetKind::Multicast => "multicast",
            TargetKind::Broadcast => "broadcast",
            TargetKind::Room => "room",
            TargetKind::Area => "area",
            TargetKind::Role => "role",
        }
    }
}

/// A typed payload carrying a routing descriptor (spec §3 "Routed
/// Message").
#[derive(Debug, Clone)]
pub struct RoutedMessage {
    pub message_id: String,
    pub payload: Vec<u8>,
    pub target_kind: TargetKind,
    pub target_ids: Vec<String>,
    pub exclude_ids: Vec<String>,
    pub require_ack: bool,
    pub max_hops: u32,
    pub current_hops: u32,
    pub priority: u8,
    pub deadline: Option<DateTime<Utc>>,
}

impl RoutedMessage {
    pub fn new(message_id: impl Into<String>, payload: Vec<u8>, target_kind: TargetKind) -> Self {
        Self {
            message_id: message_id.into(),
            payload,
            target_kind,
            target_ids: Vec::new(),
            exclude_ids: Vec::new(),
            require_ack: false,
            max_hops: 8,
            current_hops: 0,
            priority: 0,
            deadline: None,
        }
    }

    pub fn with_targets(mut self, ids: Vec<String>) -> Self {
        self.target_ids = ids;
        self
    }

    pub fn with_exclusions(mut self, ids: Vec<String>) -> Self {
        self.exclude_ids = ids;
        self
    }

    pub fn with_require_ack(mut self, require_ack: bool) -> Self {
        self.require_ack = require_ack;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// A message is eligible for routing only if it hasn't exceeded its
    /// hop budget and hasn't passed its deadline (spec §3 invariant).
    pub fn validation_error(&self) -> Option<String> {
        if self.current_hops >= self.max_hops {
            return Some(format!(
                "message {} exceeded max hops ({}/{})",
                self.message_id, self.current_hops, self.max_hops
            ));
        }
        if let Some(deadline) = self.deadline {
            if Utc::now() > deadline {
                return Some(format!("message {} past deadline", self.message_id));
            }
        }
        match self.target_kind {
            TargetKind::Unicast | TargetKind::Multicast if self.target_ids.is_empty() => {
                Some(format!("message {} has no target ids", self.message_id))
            }
            TargetKind::Room | TargetKind::Area | TargetKind::Role if self.target_ids.len() != 1 => Some(format!(
                "message {} must carry exactly one target id for kind {:?}",
                self.message_id, self.target_kind
            )),
            _ => None,
        }
    }
}

/// An acknowledgement tuple correlated by message id (spec §4.9:
/// "Delivery").
#[derive(Debug, Clone)]
pub struct AckRecord {
    pub message_id: String,
    pub receiver_id: String,
    pub ack_status: AckStatus,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Delivered,
    Failed,
}

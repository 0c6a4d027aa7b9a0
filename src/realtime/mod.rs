// src/realtime/mod.rs

//! The realtime layer: Session Registry (C8), Broadcast Router (C9), and
//! Realtime Hub (C10).

pub mod hub;
pub mod message;
pub mod router;
pub mod session;

pub use hub::{GameplayRpcSurface, JwtVerifier, RealtimeEvent, RealtimeHub};
pub use message::{AckRecord, AckStatus, RoutedMessage, TargetKind};
pub use router::{BroadcastRouter, ReceiverHandle, RouteOutcome, RouterStatistics};
pub use session::{DisconnectReason, GroupScope, Session, SessionRegistry, group_key};

// src/cache_strategy/categories.rs

//! The fixed set of cache categories named in spec §4.4's TTL table. Each
//! category gets its own key namespace (`<prefix>:<category>:<key>`) and a
//! sensible default TTL, both overridable per-deployment in `CacheConfig`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A cache category, used both to namespace keys and to pick a default TTL
/// when the caller does not specify one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheCategory {
    PlayerSession,
    PlayerState,
    PlayerPosition,
    RoomState,
    RoomPlayers,
    MatchmakingQueue,
    ChatMessages,
    SystemConfig,
    TempVerification,
    RateLimitCounter,
}

impl CacheCategory {
    /// The short namespace segment used in cache keys, e.g.
    /// `<prefix>:player-session:<logical-key>`.
    pub fn as_str(self) -> &'static str {
        match self {
            CacheCategory::PlayerSession => "player-session",
            CacheCategory::PlayerState => "player-state",
            CacheCategory::PlayerPosition => "player-position",
            CacheCategory::RoomState => "room-state",
            CacheCategory::RoomPlayers => "room-players",
            CacheCategory::MatchmakingQueue => "matchmaking-queue",
            CacheCategory::ChatMessages => "chat-messages",
            CacheCategory::SystemConfig => "system-config",
            CacheCategory::TempVerification => "temp-verification",
            CacheCategory::RateLimitCounter => "rate-limit-counter",
        }
    }

    /// The built-in default TTL, taken from the midpoint of spec §4.4's
    /// table for categories expressed as a range.
    pub fn default_ttl(self) -> Duration {
        match self {
            CacheCategory::PlayerSession => Duration::from_secs(2 * 60 * 60),
            CacheCategory::PlayerState => Duration::from_secs(38 * 60),
            CacheCategory::PlayerPosition => Duration::from_secs(18 * 60),
            CacheCategory::RoomState => Duration::from_secs(20 * 60),
            CacheCategory::RoomPlayers => Duration::from_secs(15 * 60),
            CacheCategory::MatchmakingQueue => Duration::from_secs(7 * 60),
            CacheCategory::ChatMessages => Duration::from_secs(20 * 60),
            CacheCategory::SystemConfig => Duration::from_secs(90 * 60),
            CacheCategory::TempVerification => Duration::from_secs(3 * 60),
            CacheCategory::RateLimitCounter => Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_has_a_positive_default_ttl() {
        for cat in [
            CacheCategory::PlayerSession,
            CacheCategory::PlayerState,
            CacheCategory::PlayerPosition,
            CacheCategory::RoomState,
            CacheCategory::RoomPlayers,
            CacheCategory::MatchmakingQueue,
            CacheCategory::ChatMessages,
            CacheCategory::SystemConfig,
            CacheCategory::TempVerification,
            CacheCategory::RateLimitCounter,
        ] {
            assert!(cat.default_ttl() > Duration::ZERO);
            assert!(!cat.as_str().is_empty());
        }
    }
}

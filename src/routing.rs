// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Game Routing Vocabulary
//!
//! Exchange names, routing keys and the message payloads exchanged between
//! the game server and its clients. The exchanges themselves are created by
//! the broker administration, not by this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direct exchange for control messages matched by exact key
pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
/// Topic exchange for wildcard-routed game events
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
/// Exchange receiving discarded and expired messages
pub const EXCHANGE_PERIL_DEAD_LETTER: &str = "peril_dlx";

pub const PAUSE_KEY: &str = "pause";
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// Per-user transient queue receiving pause notifications, e.g. `pause.alice`.
pub fn pause_queue_name(username: &str) -> String {
    format!("{PAUSE_KEY}.{username}")
}

/// Per-user routing key, e.g. `army_moves.alice`.
pub fn user_key(prefix: &str, username: &str) -> String {
    format!("{prefix}.{username}")
}

/// Topic pattern matching every user under `prefix`, e.g. `war.*`.
pub fn wildcard_key(prefix: &str) -> String {
    format!("{prefix}.*")
}

/// Pause/resume broadcast sent by the server on [`PAUSE_KEY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayingState {
    pub is_paused: bool,
}

/// Free-text game log record, published with the binary codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameLog {
    pub current_time: DateTime<Utc>,
    pub message: String,
    pub username: String,
}

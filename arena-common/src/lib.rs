// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{collections::HashMap, fmt, str::FromStr, sync::LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub mod assignment;

pub use assignment::{Assignment, PlanError, assign, sampling_weights};

pub const DEFAULT_PHASE: &str = "Init";
pub const SYSTEM_SENDER: &str = "System";

/// Opaque name of an LLM backend configuration.
pub type CandidateModel = String;
pub type AgentId = String;

/// Prior match count per model. Only ever read by the planner.
pub type GameCountIndex = HashMap<CandidateModel, u64>;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
    #[default]
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Observe,
    Participate,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Observe => "observe",
            Self::Participate => "participate",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "observe" => Ok(Self::Observe),
            "participate" => Ok(Self::Participate),
            _ => Err("mode must be 'observe' or 'participate'".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    #[default]
    State,
    Message,
}

/// One event emitted by a running game, before the session stamps it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GameEvent {
    #[serde(default)]
    pub kind: SnapshotKind,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub round: Option<u64>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl GameEvent {
    pub fn state(payload: serde_json::Value) -> Self {
        Self {
            kind: SnapshotKind::State,
            payload,
            ..Self::default()
        }
    }

    pub fn message(payload: serde_json::Value) -> Self {
        Self {
            kind: SnapshotKind::Message,
            payload,
            ..Self::default()
        }
    }

    pub fn at(mut self, phase: impl Into<String>, round: u64) -> Self {
        self.phase = Some(phase.into());
        self.round = Some(round);
        self
    }

    /// A chat-style message attributed to the system rather than an agent.
    pub fn system_message(content: impl Into<String>) -> Self {
        Self::message(serde_json::json!({
            "sender": SYSTEM_SENDER,
            "content": content.into(),
            "role": "assistant",
        }))
    }
}

/// Immutable, sequenced unit of observable match output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub seq: u64,
    pub kind: SnapshotKind,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub round: Option<u64>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn from_event(seq: u64, event: GameEvent) -> Self {
        Self {
            seq,
            kind: event.kind,
            phase: event.phase,
            round: event.round,
            payload: event.payload,
            created_at: Utc::now(),
        }
    }

    pub fn phase_label(&self) -> &str {
        self.phase
            .as_deref()
            .map(str::trim)
            .filter(|phase| !phase.is_empty())
            .unwrap_or(DEFAULT_PHASE)
    }

    pub fn round_no(&self) -> u64 {
        self.round.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryIndexEntry {
    pub index: usize,
    pub phase: String,
    pub round: u64,
    pub kind: SnapshotKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub index: usize,
    pub phase: String,
    pub round: u64,
    pub kind: SnapshotKind,
    pub snapshot: Snapshot,
}

impl HistoryEntry {
    pub fn new(index: usize, snapshot: Snapshot) -> Self {
        Self {
            index,
            phase: snapshot.phase_label().to_string(),
            round: snapshot.round_no(),
            kind: snapshot.kind,
            snapshot,
        }
    }

    pub fn metadata(&self) -> HistoryIndexEntry {
        HistoryIndexEntry {
            index: self.index,
            phase: self.phase.clone(),
            round: self.round,
            kind: self.kind,
        }
    }
}

/// Messages pushed from the server to an observer connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    StateSnapshot(Snapshot),
    ModeInfo {
        mode: Option<Mode>,
        user_agent_id: Option<AgentId>,
        game: Option<String>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Messages a client may send over its observer connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    UserInput {
        #[serde(deserialize_with = "agent_id_from_any")]
        agent_id: AgentId,
        #[serde(default)]
        content: String,
    },
}

/// Per-role outcome reported by the game engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleOutcome {
    pub role_name: String,
    #[serde(default)]
    pub final_state: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<CandidateModel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    #[serde(default)]
    pub roles: Vec<RoleOutcome>,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartMatchRequest {
    #[serde(default = "default_game")]
    pub game: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default, deserialize_with = "optional_agent_id_from_any")]
    pub user_agent_id: Option<AgentId>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub models: Option<Vec<CandidateModel>>,
    #[serde(default)]
    pub num_players: Option<usize>,
    /// Engine-specific options (language, max_phases, ...), passed through untouched.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

fn default_game() -> String {
    "avalon".to_string()
}

fn default_mode() -> String {
    Mode::Observe.as_str().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartMatchResponse {
    pub status: String,
    pub message: String,
    pub game: String,
    pub mode: Mode,
    pub match_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: MatchState,
    pub match_id: Option<Uuid>,
    pub game: Option<String>,
    pub mode: Option<Mode>,
    pub user_agent_id: Option<AgentId>,
    pub history_len: usize,
    pub observers: usize,
    pub pending_inputs: Vec<AgentId>,
    pub assignment: Option<Assignment>,
    pub result: Option<MatchResult>,
    pub failure: Option<String>,
}

/// Browsers send seat numbers as JSON numbers; the engine keys agents by string.
pub fn agent_id_from_any<'de, D>(deserializer: D) -> Result<AgentId, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(value) => Ok(value),
        serde_json::Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "agent_id must be a string or number, got {other}"
        ))),
    }
}

fn optional_agent_id_from_any<'de, D>(deserializer: D) -> Result<Option<AgentId>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(value) => Ok(Some(value)),
        serde_json::Value::Number(value) => Ok(Some(value.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "user_agent_id must be a string or number, got {other}"
        ))),
    }
}

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned()
}

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

use std::collections::BTreeMap;

use anyhow::Context;
use arena_common::{CandidateModel, GameCountIndex, expand_env_vars};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{broadcast::DEFAULT_OBSERVER_BUFFER, input::InputPolicy};

pub const CONFIG_PATH_VAR: &str = "ARENA_CONFIG_PATH";

const DIPLOMACY_POWERS: [&str; 7] = [
    "AUSTRIA", "ENGLAND", "FRANCE", "GERMANY", "ITALY", "RUSSIA", "TURKEY",
];

#[derive(Debug, Clone, Deserialize)]
pub struct ArenaConfig {
    #[serde(default)]
    pub arena: ArenaSection,
    #[serde(default)]
    pub input_policy: InputPolicy,
    #[serde(default = "default_observer_buffer")]
    pub observer_buffer: usize,
    #[serde(default)]
    pub default_model: DefaultModelConfig,
    #[serde(default = "default_games")]
    pub games: BTreeMap<String, GameConfig>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            arena: ArenaSection::default(),
            input_policy: InputPolicy::default(),
            observer_buffer: DEFAULT_OBSERVER_BUFFER,
            default_model: DefaultModelConfig::default(),
            games: default_games(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArenaSection {
    #[serde(default)]
    pub models: Vec<CandidateModel>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub game_counts: GameCountIndex,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameConfig {
    /// argv of the engine process; empty means the game cannot be started.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub num_players: Option<usize>,
    #[serde(default)]
    pub slot_names: Option<Vec<String>>,
    #[serde(default)]
    pub defaults: serde_json::Map<String, Value>,
}

impl GameConfig {
    /// Named slots fix the count; otherwise the request may override
    /// `num_players`.
    pub fn slot_count(&self, requested: Option<usize>) -> Result<usize, String> {
        if let Some(names) = self.named_slots() {
            return Ok(names.len());
        }
        match requested.or(self.num_players) {
            Some(0) => Err("num_players must be at least 1".to_string()),
            Some(slots) => Ok(slots),
            None => Err("num_players is not configured for this game".to_string()),
        }
    }

    pub fn named_slots(&self) -> Option<&[String]> {
        self.slot_names
            .as_deref()
            .filter(|names| !names.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefaultModelConfig {
    #[serde(default)]
    pub model_name: String,
    #[serde(default, alias = "url")]
    pub api_base: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for DefaultModelConfig {
    fn default() -> Self {
        Self {
            model_name: String::new(),
            api_base: String::new(),
            api_key: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl DefaultModelConfig {
    /// Empty `api_key` and `api_base` fall back to `OPENAI_API_KEY` and
    /// `OPENAI_BASE_URL`.
    pub fn resolved(&self) -> Self {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut resolved = self.clone();
        if resolved.api_key.trim().is_empty() {
            resolved.api_key = lookup("OPENAI_API_KEY").unwrap_or_default();
        }
        if resolved.api_base.trim().is_empty() {
            resolved.api_base = lookup("OPENAI_BASE_URL").unwrap_or_default();
        }
        resolved
    }
}

impl ArenaConfig {
    /// Option payload for the start form.
    ///
    /// Without a game: known games, the candidate pool and the default model.
    /// With a game: its slot layout and default settings, or `None` if the
    /// game is unknown.
    pub fn options(&self, game: Option<&str>) -> Option<Value> {
        match game.map(str::trim).filter(|name| !name.is_empty()) {
            None => Some(json!({
                "games": self.games.keys().cloned().collect::<Vec<String>>(),
                "models": self.arena.models,
                "default_model": self.default_model.resolved(),
            })),
            Some(name) => {
                let game = self.games.get(name)?;
                Some(json!({
                    "game": name,
                    "slots": game.slot_count(None).ok(),
                    "slot_names": game.named_slots(),
                    "defaults": game.defaults,
                }))
            }
        }
    }
}

pub fn parse_arena_config(raw: &str) -> anyhow::Result<ArenaConfig> {
    serde_yaml::from_str(&expand_env_vars(raw)).context("failed to parse arena config yaml")
}

pub fn load_arena_config() -> ArenaConfig {
    let Some(path) = std::env::var(CONFIG_PATH_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        info!("{CONFIG_PATH_VAR} not set; using built-in arena config");
        return ArenaConfig::default();
    };

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read arena config file");
            return ArenaConfig::default();
        }
    };

    if raw.trim().is_empty() {
        warn!(path = %path, "arena config file is empty");
        return ArenaConfig::default();
    }

    match parse_arena_config(&raw) {
        Ok(config) => {
            info!(
                path = %path,
                games = config.games.len(),
                models = config.arena.models.len(),
                "loaded arena config"
            );
            config
        }
        Err(error) => {
            warn!(
                path = %path,
                error = %format!("{error:#}"),
                "falling back to built-in arena config"
            );
            ArenaConfig::default()
        }
    }
}

fn default_observer_buffer() -> usize {
    DEFAULT_OBSERVER_BUFFER
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_games() -> BTreeMap<String, GameConfig> {
    let avalon = GameConfig {
        num_players: Some(5),
        defaults: json_object(json!({"num_players": 5, "language": "en"})),
        ..GameConfig::default()
    };
    let diplomacy = GameConfig {
        slot_names: Some(DIPLOMACY_POWERS.iter().map(|power| power.to_string()).collect()),
        defaults: json_object(json!({
            "map_name": "standard",
            "max_phases": 20,
            "negotiation_rounds": 3,
            "language": "en",
        })),
        ..GameConfig::default()
    };
    BTreeMap::from([
        ("avalon".to_string(), avalon),
        ("diplomacy".to_string(), diplomacy),
    ])
}

fn json_object(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

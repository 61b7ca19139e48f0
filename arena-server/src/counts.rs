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

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use arena_common::GameCountIndex;
use async_trait::async_trait;
use tracing::info;

use crate::config::ArenaConfig;

pub const GAME_COUNTS_URL_VAR: &str = "ARENA_GAME_COUNTS_URL";

const LEADERBOARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Where per-model play counts come from when planning an assignment.
#[async_trait]
pub trait GameCountSource: Send + Sync {
    async fn game_counts(&self) -> anyhow::Result<GameCountIndex>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticGameCounts {
    counts: GameCountIndex,
}

impl StaticGameCounts {
    pub fn new(counts: GameCountIndex) -> Self {
        Self { counts }
    }
}

#[async_trait]
impl GameCountSource for StaticGameCounts {
    async fn game_counts(&self) -> anyhow::Result<GameCountIndex> {
        Ok(self.counts.clone())
    }
}

/// Leaderboard endpoint answering `GET` with `{"model": count, ..}`.
#[derive(Debug, Clone)]
pub struct LeaderboardGameCounts {
    client: reqwest::Client,
    url: String,
}

impl LeaderboardGameCounts {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl GameCountSource for LeaderboardGameCounts {
    async fn game_counts(&self) -> anyhow::Result<GameCountIndex> {
        let response = self
            .client
            .get(&self.url)
            .timeout(LEADERBOARD_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("failed to call leaderboard {}", self.url))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read leaderboard response body")?;
        if !status.is_success() {
            anyhow::bail!("leaderboard {} returned {}: {}", self.url, status, body);
        }

        serde_json::from_str::<GameCountIndex>(&body).context("failed to decode leaderboard counts")
    }
}

/// `ARENA_GAME_COUNTS_URL` wins over counts listed in the config file.
pub fn game_count_source(config: &ArenaConfig) -> Arc<dyn GameCountSource> {
    let url = std::env::var(GAME_COUNTS_URL_VAR)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    match url {
        Some(url) => {
            info!(url = %url, "using leaderboard game counts");
            Arc::new(LeaderboardGameCounts::new(reqwest::Client::new(), url))
        }
        None => Arc::new(StaticGameCounts::new(config.arena.game_counts.clone())),
    }
}

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

use std::{collections::BTreeMap, sync::Arc};

use arena_common::{AgentId, Assignment, MatchResult, Mode};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{config::ArenaConfig, engine::ProcessWorkflow, runner::MatchContext};

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRequest {
    pub match_id: Uuid,
    pub game: String,
    pub mode: Mode,
    pub user_agent_id: Option<AgentId>,
    pub assignment: Assignment,
    pub slot_names: Option<Vec<String>>,
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// `ctx` calls fail with `SessionStopped` once the match is cancelled.
#[async_trait]
pub trait Workflow: Send + Sync {
    async fn execute(
        &self,
        ctx: MatchContext,
        request: WorkflowRequest,
    ) -> anyhow::Result<MatchResult>;
}

#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    workflows: BTreeMap<String, Arc<dyn Workflow>>,
}

impl WorkflowRegistry {
    pub fn from_config(config: &ArenaConfig) -> Self {
        let mut registry = Self::default();
        for (game, game_config) in &config.games {
            match ProcessWorkflow::from_game_config(game_config, &config.default_model) {
                Some(workflow) => {
                    info!(
                        game = %game,
                        program = %workflow.program(),
                        "registered engine workflow"
                    );
                    registry.register(game.clone(), Arc::new(workflow));
                }
                None => {
                    warn!(game = %game, "no engine command configured; game cannot be started");
                }
            }
        }
        registry
    }

    pub fn register(&mut self, game: impl Into<String>, workflow: Arc<dyn Workflow>) {
        self.workflows.insert(game.into(), workflow);
    }

    pub fn get(&self, game: &str) -> Option<Arc<dyn Workflow>> {
        self.workflows.get(game).cloned()
    }

    pub fn games(&self) -> Vec<String> {
        self.workflows.keys().cloned().collect()
    }
}

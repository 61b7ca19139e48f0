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

//! Drives an external game engine over newline-delimited JSON.
//!
//! The server writes one init line (the serialized [`WorkflowRequest`]) and
//! then answers each `input_request` with `{"agent_id", "content"}`. The
//! engine writes one event object per line on stdout:
//!
//! ```text
//! {"event":"snapshot","kind":"state","phase":"Night","round":1,"payload":{..}}
//! {"event":"input_request","agent_id":"0"}
//! {"event":"log","level":"info","message":".."}
//! {"event":"result","roles":[..],"details":{..}}
//! ```

use std::{collections::BTreeMap, process::Stdio};

use anyhow::Context;
use arena_common::{AgentId, GameEvent, MatchResult, agent_id_from_any};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{ChildStdin, Command},
};
use tracing::{debug, info, warn};

use crate::{
    config::{DefaultModelConfig, GameConfig},
    error::SessionError,
    runner::MatchContext,
    workflow::{Workflow, WorkflowRequest},
};

const MAX_LOGGED_LINE_CHARS: usize = 300;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EngineEvent {
    Snapshot(GameEvent),
    InputRequest {
        #[serde(deserialize_with = "agent_id_from_any")]
        agent_id: AgentId,
    },
    Log {
        #[serde(default)]
        level: Option<String>,
        message: String,
    },
    Result(MatchResult),
}

#[derive(Serialize)]
struct EngineReply<'a> {
    agent_id: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone)]
pub struct ProcessWorkflow {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl ProcessWorkflow {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    /// `None` when the game has no engine command configured.
    pub fn from_game_config(game: &GameConfig, default_model: &DefaultModelConfig) -> Option<Self> {
        let (program, args) = game.command.split_first()?;
        let mut workflow = Self::new(program.clone(), args.to_vec());

        let model = default_model.resolved();
        workflow.env.insert("ARENA_DEFAULT_MODEL".to_string(), model.model_name);
        workflow.env.insert("ARENA_API_BASE".to_string(), model.api_base);
        workflow.env.insert("ARENA_API_KEY".to_string(), model.api_key);
        workflow
            .env
            .insert("ARENA_TEMPERATURE".to_string(), model.temperature.to_string());
        workflow
            .env
            .insert("ARENA_MAX_TOKENS".to_string(), model.max_tokens.to_string());
        workflow.env.extend(game.env.clone());
        Some(workflow)
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Workflow for ProcessWorkflow {
    async fn execute(
        &self,
        ctx: MatchContext,
        request: WorkflowRequest,
    ) -> anyhow::Result<MatchResult> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn engine process `{}`", self.program))?;
        let mut stdin = child.stdin.take().context("engine stdin was not captured")?;
        let stdout = child.stdout.take().context("engine stdout was not captured")?;
        let mut lines = BufReader::new(stdout).lines();
        info!(
            match_id = %ctx.match_id(),
            program = %self.program,
            pid = ?child.id(),
            "engine process started"
        );

        write_line(&mut stdin, &request)
            .await
            .context("failed to send init line to engine")?;

        let mut result = None;
        loop {
            let line = tokio::select! {
                () = ctx.cancelled() => {
                    let _ = child.kill().await;
                    return Err(SessionError::SessionStopped.into());
                }
                line = lines.next_line() => line.context("failed to read engine output")?,
            };
            let Some(line) = line else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let event = match serde_json::from_str::<EngineEvent>(line) {
                Ok(event) => event,
                Err(error) => {
                    warn!(
                        error = %error,
                        line = %truncate_chars(line, MAX_LOGGED_LINE_CHARS),
                        "ignoring malformed engine line"
                    );
                    continue;
                }
            };

            match event {
                EngineEvent::Snapshot(event) => {
                    ctx.record(event)?;
                }
                EngineEvent::InputRequest { agent_id } => {
                    let content = ctx.request_user_input(&agent_id).await?;
                    let reply = EngineReply {
                        agent_id: &agent_id,
                        content: &content,
                    };
                    // An engine that stops reading stdin must not pin the match.
                    tokio::select! {
                        () = ctx.cancelled() => {
                            let _ = child.kill().await;
                            return Err(SessionError::SessionStopped.into());
                        }
                        written = write_line(&mut stdin, &reply) => {
                            written.context("failed to send user input to engine")?;
                        }
                    }
                }
                EngineEvent::Log { level, message } => match level.as_deref() {
                    Some("warn" | "warning" | "error") => {
                        warn!(engine = %self.program, "{message}")
                    }
                    Some("debug") => debug!(engine = %self.program, "{message}"),
                    _ => info!(engine = %self.program, "{message}"),
                },
                EngineEvent::Result(outcome) => {
                    debug!(roles = outcome.roles.len(), "engine reported result");
                    result = Some(outcome);
                }
            }
        }

        drop(stdin);
        let status = child.wait().await.context("failed to wait for engine process")?;
        if !status.success() {
            anyhow::bail!("engine process exited with {status}");
        }
        result.context("engine exited without reporting a result")
    }
}

async fn write_line<T: Serialize>(stdin: &mut ChildStdin, value: &T) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    stdin.write_all(&line).await?;
    stdin.flush().await?;
    Ok(())
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

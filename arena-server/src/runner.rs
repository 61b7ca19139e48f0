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

use std::sync::Arc;

use arena_common::{GameEvent, MatchResult, Snapshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::SessionError,
    session::SessionManager,
    workflow::{Workflow, WorkflowRequest},
};

/// Calls from a stopped or replaced match fail with `SessionStopped`.
#[derive(Clone)]
pub struct MatchContext {
    session: Arc<SessionManager>,
    match_id: Uuid,
    cancel: CancellationToken,
}

impl MatchContext {
    pub(crate) fn new(
        session: Arc<SessionManager>,
        match_id: Uuid,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            match_id,
            cancel,
        }
    }

    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn record(&self, event: GameEvent) -> Result<Snapshot, SessionError> {
        self.session.record_for(Some(self.match_id), event)
    }

    pub async fn request_user_input(&self, agent_id: &str) -> Result<String, SessionError> {
        self.session
            .request_user_input_for(Some(self.match_id), agent_id)
            .await
    }
}

pub(crate) fn spawn_match(
    ctx: MatchContext,
    workflow: Arc<dyn Workflow>,
    request: WorkflowRequest,
) {
    tokio::spawn(async move {
        let session = Arc::clone(&ctx.session);
        let match_id = ctx.match_id;
        let assignment = request.assignment.clone();
        let slot_names = request.slot_names.clone();
        info!(%match_id, game = %request.game, "match runner started");

        // Separate task so a panicking workflow surfaces as a JoinError here.
        let worker = tokio::spawn(async move { workflow.execute(ctx, request).await });
        let outcome: Result<MatchResult, String> = match worker.await {
            Ok(Ok(mut result)) => {
                assignment.annotate(&mut result, slot_names.as_deref());
                Ok(result)
            }
            Ok(Err(error)) => Err(format!("{error:#}")),
            Err(join_error) => {
                warn!(%match_id, error = %join_error, "match workflow task aborted");
                Err(format!("workflow task aborted: {join_error}"))
            }
        };

        if !session.finish(match_id, outcome) {
            info!(%match_id, "match runner exited after the match was stopped");
        }
    });
}

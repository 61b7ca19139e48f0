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

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arena_common::{
    AgentId, Assignment, CandidateModel, GameCountIndex, GameEvent, HistoryEntry,
    HistoryIndexEntry, MatchResult, MatchState, Mode, ServerMessage, SessionStatus, Snapshot,
    assign,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    broadcast::{BroadcastHub, ObserverHandle, ObserverId},
    error::SessionError,
    history::HistoryLog,
    input::{InputChannel, InputDelivery, InputPolicy, PendingInput},
    runner::{self, MatchContext},
    workflow::{Workflow, WorkflowRequest},
};

const STOPPED_NOTICE: &str = "Match stopped by user.";
const FINISHED_NOTICE: &str = "Match finished.";

#[derive(Debug, Clone)]
pub struct MatchPlan {
    pub game: String,
    pub mode: Mode,
    pub user_agent_id: Option<AgentId>,
    pub pool: Vec<CandidateModel>,
    pub slots: usize,
    pub counts: GameCountIndex,
    pub seed: Option<u64>,
    pub slot_names: Option<Vec<String>>,
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct MatchStarted {
    pub match_id: Uuid,
    pub assignment: Assignment,
}

struct ActiveMatch {
    id: Uuid,
    cancel: CancellationToken,
}

struct SessionInner {
    state: MatchState,
    current: Option<ActiveMatch>,
    game: Option<String>,
    mode: Option<Mode>,
    user_agent_id: Option<AgentId>,
    assignment: Option<Assignment>,
    history: HistoryLog,
    inputs: InputChannel,
    result: Option<MatchResult>,
    failure: Option<String>,
}

impl SessionInner {
    fn new(policy: InputPolicy) -> Self {
        Self {
            state: MatchState::Idle,
            current: None,
            game: None,
            mode: None,
            user_agent_id: None,
            assignment: None,
            history: HistoryLog::default(),
            inputs: InputChannel::new(policy),
            result: None,
            failure: None,
        }
    }

    fn active_token(&self, match_id: Option<Uuid>) -> Result<CancellationToken, SessionError> {
        match (&self.state, &self.current) {
            (MatchState::Running, Some(active)) if match_id.is_none_or(|id| id == active.id) => {
                Ok(active.cancel.clone())
            }
            _ => Err(SessionError::SessionStopped),
        }
    }

    fn halt(&mut self) -> Option<Uuid> {
        self.state = MatchState::Stopped;
        let active = self.current.as_ref()?;
        active.cancel.cancel();
        Some(active.id)
    }

    fn terminal_notice(&self, content: impl Into<String>) -> ServerMessage {
        ServerMessage::StateSnapshot(Snapshot::from_event(
            self.history.len() as u64,
            GameEvent::system_message(content),
        ))
    }
}

// Appends and their fan-out happen under `inner`, so observers see record order.
pub struct SessionManager {
    inner: Mutex<SessionInner>,
    hub: BroadcastHub,
    input_policy: InputPolicy,
}

impl SessionManager {
    pub fn new(input_policy: InputPolicy, observer_buffer: usize) -> Self {
        Self {
            inner: Mutex::new(SessionInner::new(input_policy)),
            hub: BroadcastHub::new(observer_buffer),
            input_policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> MatchState {
        self.lock().state
    }

    pub fn describe(&self) -> SessionStatus {
        let inner = self.lock();
        SessionStatus {
            state: inner.state,
            match_id: inner.current.as_ref().map(|active| active.id),
            game: inner.game.clone(),
            mode: inner.mode,
            user_agent_id: inner.user_agent_id.clone(),
            history_len: inner.history.len(),
            observers: self.hub.observer_count(),
            pending_inputs: inner.inputs.pending_agents(),
            assignment: inner.assignment.clone(),
            result: inner.result.clone(),
            failure: inner.failure.clone(),
        }
    }

    /// Plans the assignment before any state changes.
    pub fn start(
        self: &Arc<Self>,
        plan: MatchPlan,
        workflow: Arc<dyn Workflow>,
    ) -> Result<MatchStarted, SessionError> {
        let (ctx, request) = {
            let mut inner = self.lock();
            if inner.state == MatchState::Running {
                return Err(SessionError::AlreadyRunning);
            }
            let assignment = assign(&plan.pool, plan.slots, &plan.counts, plan.seed)?;

            let match_id = Uuid::new_v4();
            let cancel = CancellationToken::new();
            let abandoned = inner.inputs.cancel_all();
            if abandoned > 0 {
                debug!(abandoned, "discarded input slots from previous match");
            }
            *inner = SessionInner::new(self.input_policy);
            inner.state = MatchState::Running;
            inner.current = Some(ActiveMatch {
                id: match_id,
                cancel: cancel.clone(),
            });
            inner.game = Some(plan.game.clone());
            inner.mode = Some(plan.mode);
            inner.user_agent_id = plan.user_agent_id.clone();
            inner.assignment = Some(assignment.clone());

            info!(
                %match_id,
                game = %plan.game,
                mode = %plan.mode,
                assignment = ?assignment.models(),
                "match started"
            );

            let ctx = MatchContext::new(Arc::clone(self), match_id, cancel);
            let request = WorkflowRequest {
                match_id,
                game: plan.game,
                mode: plan.mode,
                user_agent_id: plan.user_agent_id,
                assignment,
                slot_names: plan.slot_names,
                config: plan.config,
            };
            (ctx, request)
        };

        let started = MatchStarted {
            match_id: request.match_id,
            assignment: request.assignment.clone(),
        };
        runner::spawn_match(ctx, workflow, request);
        Ok(started)
    }

    /// The stop notice is broadcast but not kept in history.
    pub fn stop(&self) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if inner.state != MatchState::Running {
            return Err(SessionError::NotRunning);
        }
        let match_id = inner.halt();
        let woken = inner.inputs.cancel_all();
        info!(match_id = ?match_id, woken_inputs = woken, "match stopped by user");

        if let Some(latest) = inner.history.latest_state() {
            self.hub
                .fanout(&ServerMessage::StateSnapshot(latest.clone()));
        }
        self.hub.fanout(&inner.terminal_notice(STOPPED_NOTICE));
        Ok(())
    }

    pub fn reset(&self) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if inner.state == MatchState::Running {
            return Err(SessionError::AlreadyRunning);
        }
        *inner = SessionInner::new(self.input_policy);
        info!("session reset");
        Ok(())
    }

    /// `false` if the match was already stopped or replaced.
    pub(crate) fn finish(&self, match_id: Uuid, outcome: Result<MatchResult, String>) -> bool {
        let mut inner = self.lock();
        if inner.active_token(Some(match_id)).is_err() {
            return false;
        }
        inner.halt();
        inner.inputs.cancel_all();

        match outcome {
            Ok(result) => {
                info!(%match_id, roles = result.roles.len(), "match finished");
                inner.result = Some(result);
                self.hub.fanout(&inner.terminal_notice(FINISHED_NOTICE));
            }
            Err(reason) => {
                warn!(%match_id, reason = %reason, "match failed");
                self.hub
                    .fanout(&inner.terminal_notice(format!("Match failed: {reason}")));
                self.hub.fanout(&ServerMessage::error(reason.clone()));
                inner.failure = Some(reason);
            }
        }
        true
    }

    pub fn record(&self, event: GameEvent) -> Result<Snapshot, SessionError> {
        self.record_for(None, event)
    }

    pub(crate) fn record_for(
        &self,
        match_id: Option<Uuid>,
        event: GameEvent,
    ) -> Result<Snapshot, SessionError> {
        let mut inner = self.lock();
        inner.active_token(match_id)?;

        let snapshot = Snapshot::from_event(inner.history.len() as u64, event);
        let index = inner.history.append(snapshot.clone());
        let delivered = self
            .hub
            .fanout(&ServerMessage::StateSnapshot(snapshot.clone()));
        debug!(
            index,
            kind = ?snapshot.kind,
            phase = snapshot.phase_label(),
            delivered,
            "recorded snapshot"
        );
        Ok(snapshot)
    }

    pub fn put_user_input(
        &self,
        agent_id: &str,
        content: String,
    ) -> Result<InputDelivery, SessionError> {
        let mut inner = self.lock();
        if inner.state != MatchState::Running {
            return Err(SessionError::SessionStopped);
        }
        // Only the participant may answer, and only for its own seat.
        let is_participant_seat = inner.mode == Some(Mode::Participate)
            && inner.user_agent_id.as_deref() == Some(agent_id);
        if !is_participant_seat {
            return Err(SessionError::NotParticipant(agent_id.to_string()));
        }
        let delivery = inner.inputs.put(agent_id, content)?;
        debug!(agent_id, ?delivery, "user input accepted");
        Ok(delivery)
    }

    pub async fn request_user_input(&self, agent_id: &str) -> Result<String, SessionError> {
        self.request_user_input_for(None, agent_id).await
    }

    pub(crate) async fn request_user_input_for(
        &self,
        match_id: Option<Uuid>,
        agent_id: &str,
    ) -> Result<String, SessionError> {
        let (pending, cancel) = {
            let mut inner = self.lock();
            let cancel = inner.active_token(match_id)?;
            (inner.inputs.register(agent_id)?, cancel)
        };

        match pending {
            PendingInput::Ready(content) => Ok(content),
            PendingInput::Waiting(receiver) => {
                debug!(agent_id, "waiting for user input");
                tokio::select! {
                    received = receiver => received.map_err(|_| SessionError::SessionStopped),
                    () = cancel.cancelled() => Err(SessionError::SessionStopped),
                }
            }
        }
    }

    pub fn attach(&self) -> ObserverHandle {
        let inner = self.lock();
        let mut greeting = Vec::with_capacity(2);
        if let Some(latest) = inner.history.latest_state() {
            greeting.push(ServerMessage::StateSnapshot(latest.clone()));
        }
        greeting.push(ServerMessage::ModeInfo {
            mode: inner.mode,
            user_agent_id: inner.user_agent_id.clone(),
            game: inner.game.clone(),
        });
        self.hub.attach(greeting)
    }

    pub fn detach(&self, id: ObserverId) -> bool {
        self.hub.detach(id)
    }

    pub fn history_list(&self) -> Vec<HistoryIndexEntry> {
        self.lock().history.list()
    }

    pub fn history_get(&self, index: usize) -> Result<HistoryEntry, SessionError> {
        self.lock().history.get(index)
    }
}

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

use arena_common::{
    GameCountIndex, HistoryEntry, HistoryIndexEntry, MatchState, Mode, SessionStatus,
    StartMatchRequest, StartMatchResponse, StatusResponse,
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::ArenaConfig,
    counts::{GameCountSource, game_count_source},
    error::SessionError,
    session::{MatchPlan, SessionManager},
    workflow::WorkflowRegistry,
    ws::ws_handler,
};

const DEFAULT_USER_AGENT_ID: &str = "0";

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<SessionManager>,
    pub config: Arc<ArenaConfig>,
    pub workflows: Arc<WorkflowRegistry>,
    pub game_counts: Arc<dyn GameCountSource>,
}

impl AppState {
    pub fn from_config(config: ArenaConfig) -> Self {
        Self {
            session: Arc::new(SessionManager::new(
                config.input_policy,
                config.observer_buffer,
            )),
            workflows: Arc::new(WorkflowRegistry::from_config(&config)),
            game_counts: game_count_source(&config),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/api/start-game", post(start_game_handler))
        .route("/api/stop-game", post(stop_game_handler))
        .route("/api/reset", post(reset_handler))
        .route("/api/status", get(status_handler))
        .route("/api/history", get(history_list_handler))
        .route("/api/history/{index}", get(history_entry_handler))
        .route("/api/options", get(options_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "arena-server"}))
}

async fn start_game_handler(
    State(state): State<AppState>,
    Json(request): Json<StartMatchRequest>,
) -> Result<Json<StartMatchResponse>, ApiError> {
    let mode: Mode = request.mode.parse().map_err(ApiError::bad_request)?;
    let game = request.game.trim().to_string();
    let game_config = state
        .config
        .games
        .get(&game)
        .ok_or_else(|| SessionError::InvalidConfiguration(format!("unknown game '{game}'")))?;
    let workflow = state.workflows.get(&game).ok_or_else(|| {
        SessionError::InvalidConfiguration(format!("no engine configured for game '{game}'"))
    })?;
    let slots = game_config
        .slot_count(request.num_players)
        .map_err(SessionError::InvalidConfiguration)?;

    let user_agent_id = match mode {
        Mode::Observe => None,
        Mode::Participate => {
            let agent_id = request
                .user_agent_id
                .unwrap_or_else(|| DEFAULT_USER_AGENT_ID.to_string());
            validate_user_seat(&agent_id, slots, game_config.named_slots())?;
            Some(agent_id)
        }
    };

    let pool = request
        .models
        .filter(|models| !models.is_empty())
        .unwrap_or_else(|| state.config.arena.models.clone());
    // Fail fast before the leaderboard round trip; `start` re-checks under its lock.
    if state.session.state() == MatchState::Running {
        return Err(SessionError::AlreadyRunning.into());
    }
    let counts = match state.game_counts.game_counts().await {
        Ok(counts) => counts,
        Err(error) => {
            warn!(
                error = %format!("{error:#}"),
                "failed to load game counts; treating every model as unplayed"
            );
            GameCountIndex::new()
        }
    };

    let mut config = game_config.defaults.clone();
    config.extend(request.config);

    let plan = MatchPlan {
        game: game.clone(),
        mode,
        user_agent_id,
        pool,
        slots,
        counts,
        seed: request.seed.or(state.config.arena.seed),
        slot_names: game_config.named_slots().map(<[String]>::to_vec),
        config,
    };
    let started = state.session.start(plan, workflow)?;

    Ok(Json(StartMatchResponse {
        status: "ok".to_string(),
        message: format!("{game} match started in {mode} mode"),
        game,
        mode,
        match_id: started.match_id,
    }))
}

/// A participant must sit at an existing seat: an index below `slots`, or
/// one of the named slots.
fn validate_user_seat(
    agent_id: &str,
    slots: usize,
    slot_names: Option<&[String]>,
) -> Result<(), SessionError> {
    if let Ok(seat) = agent_id.parse::<usize>() {
        if seat < slots {
            return Ok(());
        }
    } else if slot_names.is_some_and(|names| names.iter().any(|name| name == agent_id)) {
        return Ok(());
    }
    Err(SessionError::InvalidConfiguration(format!(
        "user_agent_id '{agent_id}' does not name one of the {slots} seats"
    )))
}

async fn stop_game_handler(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.session.stop()?;
    Ok(Json(StatusResponse::ok("Match stopped")))
}

async fn reset_handler(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    state.session.reset()?;
    info!("session reset via api");
    Ok(Json(StatusResponse::ok("Session reset")))
}

async fn status_handler(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.session.describe())
}

async fn history_list_handler(State(state): State<AppState>) -> Json<Vec<HistoryIndexEntry>> {
    Json(state.session.history_list())
}

async fn history_entry_handler(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<HistoryEntry>, ApiError> {
    Ok(Json(state.session.history_get(index)?))
}

#[derive(Debug, Default, Deserialize)]
struct OptionsQuery {
    game: Option<String>,
}

async fn options_handler(
    State(state): State<AppState>,
    Query(query): Query<OptionsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .config
        .options(query.game.as_deref())
        .map(Json)
        .ok_or_else(|| {
            ApiError::not_found(format!(
                "unknown game '{}'",
                query.game.unwrap_or_default()
            ))
        })
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::InvalidConfiguration(_)
            | SessionError::AlreadyRunning
            | SessionError::NotRunning => Self::bad_request(error.to_string()),
            SessionError::IndexOutOfRange { .. } => Self::not_found(error.to_string()),
            SessionError::NoPendingRequest(_)
            | SessionError::NotParticipant(_)
            | SessionError::InputAlreadyPending(_)
            | SessionError::SessionStopped => Self::internal(error.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        counts::StaticGameCounts,
        runner::MatchContext,
        workflow::{Workflow, WorkflowRequest},
    };
    use arena_common::{GameEvent, MatchResult, assign};
    use async_trait::async_trait;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    /// Records each request it is started with, then idles until stopped.
    #[derive(Default)]
    struct RecordingWorkflow {
        requests: Mutex<Vec<WorkflowRequest>>,
    }

    #[async_trait]
    impl Workflow for RecordingWorkflow {
        async fn execute(
            &self,
            ctx: MatchContext,
            request: WorkflowRequest,
        ) -> anyhow::Result<MatchResult> {
            self.requests.lock().unwrap().push(request);
            ctx.cancelled().await;
            Err(SessionError::SessionStopped.into())
        }
    }

    #[derive(Default)]
    struct CountingCounts {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GameCountSource for CountingCounts {
        async fn game_counts(&self) -> anyhow::Result<GameCountIndex> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GameCountIndex::new())
        }
    }

    struct UnavailableCounts;

    #[async_trait]
    impl GameCountSource for UnavailableCounts {
        async fn game_counts(&self) -> anyhow::Result<GameCountIndex> {
            anyhow::bail!("leaderboard offline")
        }
    }

    fn app_state_with(
        workflow: Arc<RecordingWorkflow>,
        game_counts: Arc<dyn GameCountSource>,
    ) -> AppState {
        let mut config = ArenaConfig::default();
        config.arena.models = vec![
            "gpt-4o".to_string(),
            "claude-sonnet".to_string(),
            "qwen-max".to_string(),
        ];
        let mut workflows = WorkflowRegistry::default();
        workflows.register("avalon", workflow.clone());
        workflows.register("diplomacy", workflow);
        AppState {
            session: Arc::new(SessionManager::new(config.input_policy, config.observer_buffer)),
            config: Arc::new(config),
            workflows: Arc::new(workflows),
            game_counts,
        }
    }

    fn app_state() -> AppState {
        app_state_with(
            Arc::new(RecordingWorkflow::default()),
            Arc::new(StaticGameCounts::default()),
        )
    }

    fn start_request(body: serde_json::Value) -> Json<StartMatchRequest> {
        Json(serde_json::from_value(body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_service_name() {
        let body = health().await.0;
        assert_eq!(body["ok"], true);
        assert_eq!(body["service"], "arena-server");
    }

    #[tokio::test]
    async fn start_then_second_start_conflicts() {
        let state = app_state();
        let response =
            start_game_handler(State(state.clone()), start_request(serde_json::json!({})))
                .await
                .unwrap()
                .0;
        assert_eq!(response.status, "ok");
        assert_eq!(response.game, "avalon");
        assert_eq!(response.mode, Mode::Observe);

        let status = status_handler(State(state.clone())).await.0;
        assert_eq!(status.state, MatchState::Running);
        assert_eq!(status.match_id, Some(response.match_id));
        assert_eq!(status.assignment.unwrap().len(), 5);

        let err = start_game_handler(State(state.clone()), start_request(serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let _ = stop_game_handler(State(state.clone())).await.unwrap();
        let err = stop_game_handler(State(state)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn participate_defaults_user_seat_and_merges_config() {
        let workflow = Arc::new(RecordingWorkflow::default());
        let state = app_state_with(workflow.clone(), Arc::new(StaticGameCounts::default()));
        let _ = start_game_handler(
            State(state.clone()),
            start_request(serde_json::json!({
                "game": "avalon",
                "mode": "participate",
                "num_players": 6,
                "config": {"language": "zh"}
            })),
        )
        .await
        .unwrap();

        let status = state.session.describe();
        assert_eq!(status.user_agent_id.as_deref(), Some("0"));
        assert_eq!(status.assignment.unwrap().len(), 6);

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while workflow.requests.lock().unwrap().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let request = workflow.requests.lock().unwrap()[0].clone();
        assert_eq!(request.config["language"], "zh");
        assert_eq!(request.user_agent_id.as_deref(), Some("0"));
        state.session.stop().unwrap();
    }

    #[tokio::test]
    async fn bad_start_requests_are_rejected_without_starting() {
        let state = app_state();
        for body in [
            serde_json::json!({"game": "chess"}),
            serde_json::json!({"mode": "spectate"}),
            serde_json::json!({"num_players": 0}),
            serde_json::json!({"mode": "participate", "user_agent_id": 9}),
            serde_json::json!({
                "game": "diplomacy",
                "mode": "participate",
                "user_agent_id": "PRUSSIA"
            }),
        ] {
            let err = start_game_handler(State(state.clone()), start_request(body.clone()))
                .await
                .unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST, "{body}");
        }
        assert_eq!(state.session.state(), MatchState::Idle);
    }

    #[tokio::test]
    async fn empty_model_pool_is_bad_request() {
        let state = app_state();
        let mut config = (*state.config).clone();
        config.arena.models.clear();
        let state = AppState {
            config: Arc::new(config),
            ..state
        };

        let err = start_game_handler(State(state.clone()), start_request(serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("empty"));
        assert_eq!(state.session.state(), MatchState::Idle);
    }

    #[tokio::test]
    async fn requested_models_and_seed_drive_assignment() {
        let state = app_state();
        let models = vec!["a".to_string(), "b".to_string()];
        let _ = start_game_handler(
            State(state.clone()),
            start_request(serde_json::json!({
                "game": "diplomacy",
                "models": models,
                "seed": 5,
                "mode": "participate",
                "user_agent_id": "FRANCE"
            })),
        )
        .await
        .unwrap();

        let expected = assign(&models, 7, &GameCountIndex::new(), Some(5)).unwrap();
        assert_eq!(state.session.describe().assignment, Some(expected));
        state.session.stop().unwrap();
    }

    #[tokio::test]
    async fn unavailable_counts_still_start_match() {
        let state = app_state_with(
            Arc::new(RecordingWorkflow::default()),
            Arc::new(UnavailableCounts),
        );
        let _ = start_game_handler(State(state.clone()), start_request(serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(state.session.state(), MatchState::Running);
        state.session.stop().unwrap();
    }

    #[tokio::test]
    async fn start_while_running_skips_count_lookup() {
        let counts = Arc::new(CountingCounts::default());
        let state = app_state_with(Arc::new(RecordingWorkflow::default()), counts.clone());
        let _ = start_game_handler(State(state.clone()), start_request(serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(counts.calls.load(Ordering::SeqCst), 1);

        let err = start_game_handler(State(state.clone()), start_request(serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(counts.calls.load(Ordering::SeqCst), 1);
        state.session.stop().unwrap();
    }

    #[tokio::test]
    async fn history_endpoints() {
        let state = app_state();
        let _ = start_game_handler(State(state.clone()), start_request(serde_json::json!({})))
            .await
            .unwrap();
        state
            .session
            .record(GameEvent::state(serde_json::json!({"quest": 1})).at("Quest", 1))
            .unwrap();

        let list = history_list_handler(State(state.clone())).await.0;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].phase, "Quest");

        let entry = history_entry_handler(State(state.clone()), Path(0))
            .await
            .unwrap()
            .0;
        assert_eq!(entry.snapshot.payload["quest"], 1);

        let err = history_entry_handler(State(state.clone()), Path(1))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        state.session.stop().unwrap();
    }

    #[tokio::test]
    async fn reset_only_when_not_running() {
        let state = app_state();
        let _ = start_game_handler(State(state.clone()), start_request(serde_json::json!({})))
            .await
            .unwrap();
        let err = reset_handler(State(state.clone())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let _ = stop_game_handler(State(state.clone())).await.unwrap();
        let _ = reset_handler(State(state.clone())).await.unwrap();
        assert_eq!(state.session.state(), MatchState::Idle);
    }

    #[tokio::test]
    async fn options_known_and_unknown_games() {
        let state = app_state();
        let overall = options_handler(State(state.clone()), Query(OptionsQuery::default()))
            .await
            .unwrap()
            .0;
        assert_eq!(overall["models"].as_array().unwrap().len(), 3);

        let avalon = options_handler(
            State(state.clone()),
            Query(OptionsQuery {
                game: Some("avalon".to_string()),
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(avalon["slots"], 5);

        let err = options_handler(
            State(state),
            Query(OptionsQuery {
                game: Some("chess".to_string()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn session_errors_map_to_statuses() {
        let cases = [
            (SessionError::AlreadyRunning, StatusCode::BAD_REQUEST),
            (SessionError::NotRunning, StatusCode::BAD_REQUEST),
            (
                SessionError::InvalidConfiguration("x".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                SessionError::IndexOutOfRange { index: 3, len: 1 },
                StatusCode::NOT_FOUND,
            ),
            (SessionError::SessionStopped, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status, status);
        }
    }
}

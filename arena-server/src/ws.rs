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

use arena_common::{ClientMessage, ServerMessage};
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use tracing::{debug, warn};

use crate::{api::AppState, session::SessionManager};

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.session))
}

async fn handle_socket(mut socket: WebSocket, session: Arc<SessionManager>) {
    let mut observer = session.attach();
    let observer_id = observer.id;
    debug!(observer_id = %observer_id, "websocket observer connected");

    loop {
        tokio::select! {
            outbound = observer.receiver.recv() => {
                // None once the hub dropped us for falling behind.
                let Some(message) = outbound else {
                    debug!(observer_id = %observer_id, "observer queue closed");
                    break;
                };
                if send_message(&mut socket, &message).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_text(&session, text.as_str()) {
                            if send_message(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        debug!(
                            observer_id = %observer_id,
                            error = %error,
                            "websocket receive failed"
                        );
                        break;
                    }
                }
            }
        }
    }

    session.detach(observer_id);
    debug!(observer_id = %observer_id, "websocket observer disconnected");
}

/// Apply one client frame; returns a reply for the sender only.
fn handle_client_text(session: &SessionManager, text: &str) -> Option<ServerMessage> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return Some(ServerMessage::error("Invalid JSON format")),
    };

    match serde_json::from_value::<ClientMessage>(value) {
        Ok(ClientMessage::UserInput { agent_id, content }) => {
            match session.put_user_input(&agent_id, content) {
                Ok(_) => None,
                Err(error) => Some(ServerMessage::error(error.to_string())),
            }
        }
        Err(error) => Some(ServerMessage::error(format!("Unsupported message: {error}"))),
    }
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let payload = match serde_json::to_string(message) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(error = %error, "failed to encode websocket message");
            return Ok(());
        }
    };
    socket
        .send(Message::Text(payload.into()))
        .await
        .map_err(|error| {
            debug!(error = ?error, "failed to push websocket message to observer");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        input::InputPolicy,
        runner::MatchContext,
        session::MatchPlan,
        workflow::{Workflow, WorkflowRequest},
    };
    use arena_common::{GameCountIndex, MatchResult, Mode};
    use async_trait::async_trait;

    struct IdleWorkflow;

    #[async_trait]
    impl Workflow for IdleWorkflow {
        async fn execute(
            &self,
            ctx: MatchContext,
            _request: WorkflowRequest,
        ) -> anyhow::Result<MatchResult> {
            ctx.cancelled().await;
            Ok(MatchResult::default())
        }
    }

    fn running_session(policy: InputPolicy) -> Arc<SessionManager> {
        running_session_in(policy, Mode::Participate)
    }

    fn running_session_in(policy: InputPolicy, mode: Mode) -> Arc<SessionManager> {
        let session = Arc::new(SessionManager::new(policy, 16));
        let user_agent_id = match mode {
            Mode::Participate => Some("3".to_string()),
            Mode::Observe => None,
        };
        session
            .start(
                MatchPlan {
                    game: "avalon".to_string(),
                    mode,
                    user_agent_id,
                    pool: vec!["m".to_string()],
                    slots: 5,
                    counts: GameCountIndex::new(),
                    seed: None,
                    slot_names: None,
                    config: serde_json::Map::new(),
                },
                Arc::new(IdleWorkflow),
            )
            .unwrap();
        session
    }

    fn error_text(reply: Option<ServerMessage>) -> String {
        match reply {
            Some(ServerMessage::Error { message }) => message,
            other => panic!("expected error reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_json_gets_error_reply() {
        let session = running_session(InputPolicy::Buffer);
        let reply = handle_client_text(&session, "{not json");
        assert_eq!(error_text(reply), "Invalid JSON format");
        session.stop().unwrap();
    }

    #[tokio::test]
    async fn unknown_message_type_gets_error_reply() {
        let session = running_session(InputPolicy::Buffer);
        let reply = handle_client_text(&session, r#"{"type":"chat","text":"hi"}"#);
        assert!(error_text(reply).starts_with("Unsupported message"));
        session.stop().unwrap();
    }

    #[tokio::test]
    async fn numeric_agent_id_input_reaches_request() {
        let session = running_session(InputPolicy::Buffer);
        let reply = handle_client_text(
            &session,
            r#"{"type":"user_input","agent_id":3,"content":"approve team"}"#,
        );
        assert!(reply.is_none());
        assert_eq!(
            session.request_user_input("3").await.unwrap(),
            "approve team"
        );
        session.stop().unwrap();
    }

    #[tokio::test]
    async fn rejected_input_is_reported_to_sender() {
        let session = running_session(InputPolicy::Reject);
        let reply = handle_client_text(
            &session,
            r#"{"type":"user_input","agent_id":"3","content":"too early"}"#,
        );
        assert!(error_text(reply).contains("no pending input request"));
        session.stop().unwrap();
    }

    #[tokio::test]
    async fn input_while_idle_is_refused() {
        let session = SessionManager::new(InputPolicy::Buffer, 16);
        let reply = handle_client_text(
            &session,
            r#"{"type":"user_input","agent_id":"0","content":"hello"}"#,
        );
        assert_eq!(error_text(reply), "session stopped");
    }

    #[tokio::test]
    async fn observer_cannot_answer_for_any_seat() {
        let session = running_session_in(InputPolicy::Buffer, Mode::Observe);
        for seat in ["0", "2", "spam-7"] {
            let frame =
                format!(r#"{{"type":"user_input","agent_id":"{seat}","content":"forged"}}"#);
            let reply = handle_client_text(&session, &frame);
            assert!(error_text(reply).contains("not the participant's seat"));
        }
        assert!(session.describe().pending_inputs.is_empty());
        session.stop().unwrap();
    }

    #[tokio::test]
    async fn participant_cannot_answer_for_another_seat() {
        let session = running_session(InputPolicy::Buffer);
        let reply = handle_client_text(
            &session,
            r#"{"type":"user_input","agent_id":2,"content":"forged"}"#,
        );
        assert!(error_text(reply).contains("agent 2"));
        session.stop().unwrap();
    }
}

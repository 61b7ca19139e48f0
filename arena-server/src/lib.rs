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

pub mod api;
pub mod broadcast;
pub mod config;
pub mod counts;
pub mod engine;
pub mod error;
pub mod history;
pub mod input;
pub mod runner;
pub mod session;
pub mod workflow;
pub mod ws;

pub use api::{AppState, build_router};
pub use error::SessionError;
pub use runner::MatchContext;
pub use session::{MatchPlan, MatchStarted, SessionManager};
pub use workflow::{Workflow, WorkflowRegistry, WorkflowRequest};

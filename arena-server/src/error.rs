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

use arena_common::PlanError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("a match is already running")]
    AlreadyRunning,
    #[error("no match is currently running")]
    NotRunning,
    #[error("no pending input request for agent {0}")]
    NoPendingRequest(String),
    #[error("agent {0} is not the participant's seat")]
    NotParticipant(String),
    #[error("agent {0} already has a pending input request")]
    InputAlreadyPending(String),
    #[error("session stopped")]
    SessionStopped,
    #[error("history index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

impl From<PlanError> for SessionError {
    fn from(error: PlanError) -> Self {
        Self::InvalidConfiguration(error.to_string())
    }
}

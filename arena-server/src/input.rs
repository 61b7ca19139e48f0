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

use std::collections::HashMap;

use arena_common::AgentId;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::SessionError;

/// What to do with input that arrives while no request is pending.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InputPolicy {
    #[default]
    Buffer,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDelivery {
    Delivered,
    Buffered,
}

#[derive(Debug)]
pub enum PendingInput {
    Ready(String),
    Waiting(oneshot::Receiver<String>),
}

#[derive(Debug)]
enum Slot {
    Waiting(oneshot::Sender<String>),
    Buffered(String),
}

#[derive(Debug, Default)]
pub struct InputChannel {
    policy: InputPolicy,
    slots: HashMap<AgentId, Slot>,
}

impl InputChannel {
    pub fn new(policy: InputPolicy) -> Self {
        Self {
            policy,
            slots: HashMap::new(),
        }
    }

    pub fn put(&mut self, agent_id: &str, content: String) -> Result<InputDelivery, SessionError> {
        let content = match self.slots.remove(agent_id) {
            Some(Slot::Waiting(waiter)) => match waiter.send(content) {
                Ok(()) => return Ok(InputDelivery::Delivered),
                // Reader went away without being answered.
                Err(content) => content,
            },
            Some(Slot::Buffered(_)) | None => content,
        };

        match self.policy {
            InputPolicy::Buffer => {
                self.slots
                    .insert(agent_id.to_string(), Slot::Buffered(content));
                Ok(InputDelivery::Buffered)
            }
            InputPolicy::Reject => Err(SessionError::NoPendingRequest(agent_id.to_string())),
        }
    }

    pub fn register(&mut self, agent_id: &str) -> Result<PendingInput, SessionError> {
        match self.slots.remove(agent_id) {
            Some(Slot::Buffered(content)) => return Ok(PendingInput::Ready(content)),
            Some(Slot::Waiting(waiter)) if !waiter.is_closed() => {
                self.slots
                    .insert(agent_id.to_string(), Slot::Waiting(waiter));
                return Err(SessionError::InputAlreadyPending(agent_id.to_string()));
            }
            Some(Slot::Waiting(_)) | None => {}
        }

        let (waiter, receiver) = oneshot::channel();
        self.slots
            .insert(agent_id.to_string(), Slot::Waiting(waiter));
        Ok(PendingInput::Waiting(receiver))
    }

    pub fn pending_agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Waiting(waiter) if !waiter.is_closed()))
            .map(|(agent_id, _)| agent_id.clone())
            .collect();
        agents.sort();
        agents
    }

    /// Drop every waiter and buffered answer. Blocked readers observe a closed channel.
    pub fn cancel_all(&mut self) -> usize {
        let waiting = self
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Waiting(_)))
            .count();
        self.slots.clear();
        waiting
    }
}

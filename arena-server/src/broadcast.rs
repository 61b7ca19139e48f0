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

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use arena_common::ServerMessage;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_OBSERVER_BUFFER: usize = 256;

pub type ObserverId = Uuid;

#[derive(Debug)]
pub struct ObserverHandle {
    pub id: ObserverId,
    pub receiver: mpsc::Receiver<ServerMessage>,
}

#[derive(Debug)]
pub struct BroadcastHub {
    capacity: usize,
    observers: Mutex<HashMap<ObserverId, mpsc::Sender<ServerMessage>>>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_OBSERVER_BUFFER)
    }
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            observers: Mutex::new(HashMap::new()),
        }
    }

    fn observers(&self) -> MutexGuard<'_, HashMap<ObserverId, mpsc::Sender<ServerMessage>>> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new observer; `greeting` is queued ahead of any later fan-out.
    pub fn attach(&self, greeting: Vec<ServerMessage>) -> ObserverHandle {
        let (sender, receiver) = mpsc::channel(self.capacity.max(greeting.len() + 1));
        for message in greeting {
            // Fresh channel with room for the greeting: cannot fail.
            let _ = sender.try_send(message);
        }

        let id = Uuid::new_v4();
        let mut observers = self.observers();
        observers.insert(id, sender);
        info!(observer_id = %id, observers = observers.len(), "observer attached");
        ObserverHandle { id, receiver }
    }

    pub fn detach(&self, id: ObserverId) -> bool {
        let mut observers = self.observers();
        let removed = observers.remove(&id).is_some();
        if removed {
            info!(observer_id = %id, observers = observers.len(), "observer detached");
        }
        removed
    }

    // Never waits: a full or closed observer is detached instead.
    pub fn fanout(&self, message: &ServerMessage) -> usize {
        let mut observers = self.observers();
        let mut delivered = 0;
        observers.retain(|id, sender| match sender.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(observer_id = %id, "observer queue full; detaching slow observer");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(observer_id = %id, "observer connection gone; detaching");
                false
            }
        });
        delivered
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }
}

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

use arena_common::{HistoryEntry, HistoryIndexEntry, Snapshot, SnapshotKind};

use crate::error::SessionError;

/// Append-only record of everything a match emitted. Index is array position.
#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    pub fn append(&mut self, snapshot: Snapshot) -> usize {
        let index = self.entries.len();
        self.entries.push(HistoryEntry::new(index, snapshot));
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn list(&self) -> Vec<HistoryIndexEntry> {
        self.entries.iter().map(HistoryEntry::metadata).collect()
    }

    pub fn get(&self, index: usize) -> Result<HistoryEntry, SessionError> {
        self.entries
            .get(index)
            .cloned()
            .ok_or(SessionError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }

    pub fn latest_state(&self) -> Option<&Snapshot> {
        self.entries
            .iter()
            .rev()
            .map(|entry| &entry.snapshot)
            .find(|snapshot| snapshot.kind == SnapshotKind::State)
    }
}

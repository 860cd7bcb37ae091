//! Presence (awareness) state of the clients connected to one document.
//!
//! An update lists `(client, clock, state)` entries; a `null` state removes
//! the client. An entry only wins over the stored one when its clock is
//! newer, or when it removes a client at the same clock.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;
use yrs::encoding::read::{Cursor, Read};
use yrs::encoding::write::Write;

use crate::error::ProtocolError;
use crate::replica::ConnectionId;

/// Clients whose presence changed while applying one update.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub added: Vec<u64>,
    pub updated: Vec<u64>,
    pub removed: Vec<u64>,
}

impl PresenceChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Every client touched by the change.
    pub fn changed(&self) -> impl Iterator<Item = &u64> {
        self.added
            .iter()
            .chain(self.updated.iter())
            .chain(self.removed.iter())
    }
}

/// Encoded presence update fanned out to the connections of a document.
#[derive(Debug, Clone)]
pub struct PresenceUpdate {
    /// Connection the change came from; `None` for server-side cleanup.
    pub origin: Option<ConnectionId>,
    pub payload: Arc<[u8]>,
}

#[derive(Debug, Default)]
pub struct PresenceTable {
    states: HashMap<u64, Value>,
    clocks: HashMap<u64, u32>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, client: u64) -> Option<&Value> {
        self.states.get(&client)
    }

    /// Apply an encoded update.
    pub fn apply(&mut self, payload: &[u8]) -> Result<PresenceChange, ProtocolError> {
        let entries = decode_entries(payload)?;
        let mut change = PresenceChange::default();

        for (client, clock, state) in entries {
            let current_clock = self.clocks.get(&client).copied().unwrap_or(0);
            let present = self.states.contains_key(&client);
            let newer = current_clock < clock;
            let removes_at_same_clock = current_clock == clock && state.is_null() && present;
            if !newer && !removes_at_same_clock {
                continue;
            }

            if state.is_null() {
                self.states.remove(&client);
            } else {
                let previous = self.states.insert(client, state.clone());
                match previous {
                    None => change.added.push(client),
                    Some(previous) if previous != state => change.updated.push(client),
                    Some(_) => {}
                }
            }
            if state.is_null() && present {
                change.removed.push(client);
            }
            self.clocks.insert(client, clock);
        }

        Ok(change)
    }

    /// Drop the given clients, returning the update that announces it.
    pub fn remove<'a>(&mut self, clients: impl IntoIterator<Item = &'a u64>) -> Option<Vec<u8>> {
        let mut removed = Vec::new();
        for client in clients {
            if self.states.remove(client).is_some() {
                // Clocks come from clients; one pinned at the maximum keeps it
                // and the removal still wins there as a same-clock null.
                let clock = self.clocks.entry(*client).or_insert(0);
                *clock = clock.saturating_add(1);
                removed.push(*client);
            }
        }
        if removed.is_empty() {
            None
        } else {
            Some(self.encode(&removed))
        }
    }

    /// Encode the current entries of `clients`. Absent clients encode as removed.
    pub fn encode(&self, clients: &[u64]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_var(clients.len() as u32);
        for client in clients {
            let clock = self.clocks.get(client).copied().unwrap_or(0);
            let state = self.states.get(client).unwrap_or(&Value::Null);
            buf.write_var(*client);
            buf.write_var(clock);
            buf.write_string(&state.to_string());
        }
        buf
    }

    /// Every live entry, for newly opened connections.
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        if self.states.is_empty() {
            return None;
        }
        let clients: Vec<u64> = self
            .states
            .keys()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Some(self.encode(&clients))
    }
}

fn decode_entries(payload: &[u8]) -> Result<Vec<(u64, u32, Value)>, ProtocolError> {
    let malformed = |e: yrs::encoding::read::Error| ProtocolError::Malformed(e.to_string());
    let mut cursor = Cursor::new(payload);
    let count: u32 = cursor.read_var().map_err(malformed)?;
    let mut entries = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        let client: u64 = cursor.read_var().map_err(malformed)?;
        let clock: u32 = cursor.read_var().map_err(malformed)?;
        let state = cursor.read_string().map_err(malformed)?;
        let state: Value = serde_json::from_str(state)
            .map_err(|e| ProtocolError::Malformed(format!("presence state: {}", e)))?;
        entries.push((client, clock, state));
    }
    Ok(entries)
}

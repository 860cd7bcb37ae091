//! Keyed async slots.
//!
//! A `KeyedSlots` map gives every key its own async mutex, so check-and-insert
//! and check-and-remove on one key are atomic without serializing unrelated
//! keys. A slot left empty when its guard drops is retired and unlinked; a task
//! that was waiting on a retired slot starts over on a fresh one, so two values
//! can never be live for the same key.

use std::hash::Hash;
use std::mem;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

enum SlotState<V> {
    Vacant,
    Occupied(V),
    Retired,
}

type Slot<V> = Arc<Mutex<SlotState<V>>>;

/// Map from key to an exclusively lockable, optionally occupied slot.
pub struct KeyedSlots<K, V> {
    slots: Arc<DashMap<K, Slot<V>>>,
}

impl<K, V> KeyedSlots<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Lock the slot of `key`, creating an empty one if needed.
    pub async fn lock(&self, key: &K) -> SlotGuard<K, V> {
        loop {
            let slot = self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(SlotState::Vacant)))
                .value()
                .clone();
            let guard = slot.clone().lock_owned().await;
            if matches!(*guard, SlotState::Retired) {
                continue;
            }
            return SlotGuard {
                key: key.clone(),
                slot,
                guard,
                slots: self.slots.clone(),
            };
        }
    }

    /// Lock the slot of `key` only if one exists.
    pub async fn lock_existing(&self, key: &K) -> Option<SlotGuard<K, V>> {
        loop {
            let slot = self.slots.get(key)?.value().clone();
            let guard = slot.clone().lock_owned().await;
            if matches!(*guard, SlotState::Retired) {
                continue;
            }
            return Some(SlotGuard {
                key: key.clone(),
                slot,
                guard,
                slots: self.slots.clone(),
            });
        }
    }

    /// Lock the slot of `key` if it exists and nobody else holds it.
    pub fn try_lock_existing(&self, key: &K) -> Option<SlotGuard<K, V>> {
        let slot = self.slots.get(key)?.value().clone();
        let guard = slot.clone().try_lock_owned().ok()?;
        if matches!(*guard, SlotState::Retired) {
            return None;
        }
        Some(SlotGuard {
            key: key.clone(),
            slot,
            guard,
            slots: self.slots.clone(),
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.slots.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<K, V> Default for KeyedSlots<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one slot. Dropping an empty guard retires the slot.
pub struct SlotGuard<K, V>
where
    K: Eq + Hash,
{
    key: K,
    slot: Slot<V>,
    guard: OwnedMutexGuard<SlotState<V>>,
    slots: Arc<DashMap<K, Slot<V>>>,
}

impl<K, V> SlotGuard<K, V>
where
    K: Eq + Hash,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn get(&self) -> Option<&V> {
        match &*self.guard {
            SlotState::Occupied(value) => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut V> {
        match &mut *self.guard {
            SlotState::Occupied(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_occupied(&self) -> bool {
        matches!(*self.guard, SlotState::Occupied(_))
    }

    /// Store a value, returning the previous one.
    pub fn insert(&mut self, value: V) -> Option<V> {
        match mem::replace(&mut *self.guard, SlotState::Occupied(value)) {
            SlotState::Occupied(previous) => Some(previous),
            _ => None,
        }
    }

    /// Remove the value. The slot is retired when the guard drops.
    pub fn take(&mut self) -> Option<V> {
        match mem::replace(&mut *self.guard, SlotState::Vacant) {
            SlotState::Occupied(value) => Some(value),
            _ => None,
        }
    }
}

impl<K, V> Drop for SlotGuard<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if matches!(*self.guard, SlotState::Vacant) {
            *self.guard = SlotState::Retired;
            let slot = &self.slot;
            self.slots.remove_if(&self.key, |_, current| Arc::ptr_eq(current, slot));
        }
    }
}

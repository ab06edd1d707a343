//! # Process Value Store
//!
//! The boundary between the poll scheduler and the rest of the application.
//! Each channel holds two read slots, `current` and `next`, plus a pending
//! write slot. Tasks decode into `next`; at the cycle boundary the scheduler
//! calls [`promote`](ProcessValueStore::promote), which advances `next` to
//! `current` and clears `next`.
//!
//! Because promotion consumes `next`, a channel whose element failed to
//! decode (or whose task did not run) this cycle reads as undefined, not as
//! the previous cycle's value. "Never read" and "read as zero" stay
//! distinguishable, and stale values never masquerade as fresh ones.
//!
//! The scheduler is the sole writer of read values for its bound channels.
//! Pending writes may be set concurrently by external callers, so the write
//! path takes the pending value as one snapshot and clears it only when the
//! stored value still equals that snapshot, preserving writes that arrive
//! while a transaction is in flight.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::value::SemanticValue;

/// Sink/source for typed application values, keyed by channel identifier.
pub trait ProcessValueStore: Send + Sync {
    /// Record a value decoded from the device into the channel's `next`
    /// slot. Visible to readers after the next [`promote`](Self::promote).
    fn set_read_value(&self, channel: &str, value: SemanticValue);

    /// The channel's `current` value, or `None` if nothing was decoded for
    /// it in the last promoted cycle.
    fn read_value(&self, channel: &str) -> Option<SemanticValue>;

    /// Advance every channel's `next` slot to `current`, clearing `next`.
    ///
    /// Called once per cycle by the scheduler; a channel not written since
    /// the previous promotion becomes undefined.
    fn promote(&self);

    /// Queue a value to be written to the device on the next write task.
    /// Replaces any still-pending value for the channel.
    fn set_pending_write(&self, channel: &str, value: SemanticValue);

    /// Snapshot of the pending write value, without consuming it.
    fn pending_write(&self, channel: &str) -> Option<SemanticValue>;

    /// Clear the pending write, but only if it still equals `written`.
    ///
    /// A value queued after the snapshot was taken survives and goes out on
    /// the next cycle.
    fn clear_pending_write(&self, channel: &str, written: &SemanticValue);
}

#[derive(Debug, Default, Clone)]
struct ChannelSlot {
    current: Option<SemanticValue>,
    next: Option<SemanticValue>,
    pending_write: Option<SemanticValue>,
}

/// Thread-safe in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryValueStore {
    channels: Arc<RwLock<HashMap<String, ChannelSlot>>>,
}

impl MemoryValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels that have ever been touched.
    pub fn channel_count(&self) -> usize {
        self.read_lock().len()
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ChannelSlot>> {
        self.channels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ChannelSlot>> {
        self.channels.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProcessValueStore for MemoryValueStore {
    fn set_read_value(&self, channel: &str, value: SemanticValue) {
        self.write_lock()
            .entry(channel.to_string())
            .or_default()
            .next = Some(value);
    }

    fn read_value(&self, channel: &str) -> Option<SemanticValue> {
        self.read_lock()
            .get(channel)
            .and_then(|slot| slot.current.clone())
    }

    fn promote(&self) {
        for slot in self.write_lock().values_mut() {
            slot.current = slot.next.take();
        }
    }

    fn set_pending_write(&self, channel: &str, value: SemanticValue) {
        self.write_lock()
            .entry(channel.to_string())
            .or_default()
            .pending_write = Some(value);
    }

    fn pending_write(&self, channel: &str) -> Option<SemanticValue> {
        self.read_lock()
            .get(channel)
            .and_then(|slot| slot.pending_write.clone())
    }

    fn clear_pending_write(&self, channel: &str, written: &SemanticValue) {
        if let Some(slot) = self.write_lock().get_mut(channel) {
            if slot.pending_write.as_ref() == Some(written) {
                slot.pending_write = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unread_channel_is_undefined() {
        let store = MemoryValueStore::new();
        assert_eq!(store.read_value("power"), None);

        store.set_read_value("power", SemanticValue::Unsigned(0));
        store.promote();
        assert_eq!(store.read_value("power"), Some(SemanticValue::Unsigned(0)));
    }

    #[test]
    fn test_next_value_invisible_until_promoted() {
        let store = MemoryValueStore::new();
        store.set_read_value("power", SemanticValue::Unsigned(7));
        assert_eq!(store.read_value("power"), None);

        store.promote();
        assert_eq!(store.read_value("power"), Some(SemanticValue::Unsigned(7)));
    }

    #[test]
    fn test_promote_clears_unwritten_next() {
        let store = MemoryValueStore::new();
        store.set_read_value("power", SemanticValue::Float(1.0));
        store.promote();
        assert_eq!(store.read_value("power"), Some(SemanticValue::Float(1.0)));

        // No decode this cycle: the channel goes undefined instead of
        // carrying the stale value forward.
        store.promote();
        assert_eq!(store.read_value("power"), None);
    }

    #[test]
    fn test_promote_leaves_pending_writes_alone() {
        let store = MemoryValueStore::new();
        store.set_pending_write("setpoint", SemanticValue::Float(21.0));
        store.promote();
        assert_eq!(
            store.pending_write("setpoint"),
            Some(SemanticValue::Float(21.0))
        );
    }

    #[test]
    fn test_pending_write_snapshot_clear() {
        let store = MemoryValueStore::new();
        store.set_pending_write("setpoint", SemanticValue::Float(21.0));

        let snapshot = store.pending_write("setpoint").unwrap();
        store.clear_pending_write("setpoint", &snapshot);
        assert_eq!(store.pending_write("setpoint"), None);
    }

    #[test]
    fn test_clear_preserves_newer_write() {
        let store = MemoryValueStore::new();
        store.set_pending_write("setpoint", SemanticValue::Float(21.0));
        let snapshot = store.pending_write("setpoint").unwrap();

        // A caller queues a newer value while the transaction is in flight.
        store.set_pending_write("setpoint", SemanticValue::Float(23.5));
        store.clear_pending_write("setpoint", &snapshot);

        assert_eq!(
            store.pending_write("setpoint"),
            Some(SemanticValue::Float(23.5))
        );
    }

    #[test]
    fn test_pending_write_replaced_not_queued() {
        let store = MemoryValueStore::new();
        store.set_pending_write("mode", SemanticValue::Unsigned(1));
        store.set_pending_write("mode", SemanticValue::Unsigned(2));
        assert_eq!(store.pending_write("mode"), Some(SemanticValue::Unsigned(2)));
    }

    #[test]
    fn test_shared_across_clones() {
        let store = MemoryValueStore::new();
        let clone = store.clone();
        clone.set_read_value("soc", SemanticValue::Unsigned(87));
        store.promote();
        assert_eq!(store.read_value("soc"), Some(SemanticValue::Unsigned(87)));
        assert_eq!(store.channel_count(), 1);
    }
}

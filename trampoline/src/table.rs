use std::sync::Arc;

use parking_lot::Mutex;
use slab::Slab;
use tracing::{debug, trace};

use crate::task::TaskHandle;

/// Work body stored in a slot. Zero arguments, no return value; anything the
/// body needs it captures itself.
type TaskFn = Arc<dyn Fn() + Send + Sync + 'static>;

/// Opaque handle to one table slot.
///
/// Holders forward it back to the table that issued it; the fields carry no
/// meaning anywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle {
    slot: u32,
    generation: u32,
}

impl RawHandle {
    /// The never-valid handle. Invoking or adopting it fails with
    /// [`InvokeError::UninitializedHandle`].
    pub const NULL: RawHandle = RawHandle {
        slot: u32::MAX,
        generation: 0,
    };

    /// Pack into a `u64` for transport across an ABI boundary.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.slot) << 32) | u64::from(self.generation)
    }

    /// Inverse of [`RawHandle::to_bits`]. Bits that did not come from
    /// `to_bits` are not a safety hazard; they are rejected on first use.
    pub fn from_bits(bits: u64) -> RawHandle {
        RawHandle {
            slot: (bits >> 32) as u32,
            generation: bits as u32,
        }
    }

    pub fn is_null(self) -> bool {
        self.slot == u32::MAX
    }
}

impl Default for RawHandle {
    fn default() -> Self {
        RawHandle::NULL
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeError {
    #[error("use after release: slot={slot} generation={generation}")]
    UseAfterRelease { slot: u32, generation: u32 },

    #[error("uninitialized handle")]
    UninitializedHandle,
}

struct Entry {
    body: TaskFn,
    generation: u32,
}

#[derive(Default)]
struct Slots {
    entries: Slab<Entry>,
    /// Current generation per slot index, bumped on release. A stale handle
    /// can therefore never reach a reused slot's new occupant.
    generations: Vec<u32>,
}

impl Slots {
    fn lookup(&self, raw: RawHandle) -> Result<&Entry, InvokeError> {
        if raw.is_null() || raw.slot as usize >= self.generations.len() {
            return Err(InvokeError::UninitializedHandle);
        }
        match self.entries.get(raw.slot as usize) {
            Some(entry) if entry.generation == raw.generation => Ok(entry),
            _ => Err(InvokeError::UseAfterRelease {
                slot: raw.slot,
                generation: raw.generation,
            }),
        }
    }
}

/// The pairing mechanism: allocates a slot per registered body and issues the
/// owning [`TaskHandle`] bound to it.
///
/// Cloning is cheap and shares the same table.
#[derive(Clone, Default)]
pub struct TaskTable {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    slots: Mutex<Slots>,
}

impl TaskTable {
    pub fn new() -> TaskTable {
        TaskTable::default()
    }

    pub fn with_capacity(capacity: usize) -> TaskTable {
        TaskTable {
            inner: Arc::new(Inner {
                slots: Mutex::new(Slots {
                    entries: Slab::with_capacity(capacity),
                    generations: Vec::with_capacity(capacity),
                }),
            }),
        }
    }

    /// Pair a fresh slot with its owning wrapper. This is the only way a
    /// [`TaskHandle`] comes into existence with a new slot, so a wrapper
    /// without a backing body cannot be constructed.
    pub fn register<F>(&self, body: F) -> TaskHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let raw = {
            let mut slots = self.inner.slots.lock();
            let Slots {
                entries,
                generations,
            } = &mut *slots;

            let entry = entries.vacant_entry();
            let key = entry.key();
            if key >= generations.len() {
                generations.resize(key + 1, 0);
            }
            let generation = generations[key];
            entry.insert(Entry {
                body: Arc::new(body),
                generation,
            });
            RawHandle {
                slot: key as u32,
                generation,
            }
        };
        trace!(slot = raw.slot, generation = raw.generation, "registered task");
        TaskHandle::bind(self.clone(), raw)
    }

    /// Run the body paired with `raw` on the calling thread.
    ///
    /// The slot lock is dropped before the body runs, so a blocking body
    /// never blocks the table.
    pub fn invoke_raw(&self, raw: RawHandle) -> Result<(), InvokeError> {
        let body = {
            let slots = self.inner.slots.lock();
            slots.lookup(raw)?.body.clone()
        };
        trace!(slot = raw.slot, generation = raw.generation, "invoking task");
        body();
        Ok(())
    }

    /// Release the slot paired with `raw`. Returns `false` if it was already
    /// gone; releasing twice is a no-op, never a double free.
    pub fn release_raw(&self, raw: RawHandle) -> bool {
        let removed = {
            let mut slots = self.inner.slots.lock();
            if slots.lookup(raw).is_err() {
                return false;
            }
            let idx = raw.slot as usize;
            let entry = slots.entries.remove(idx);
            slots.generations[idx] = slots.generations[idx].wrapping_add(1);
            entry
        };
        debug!(slot = raw.slot, generation = raw.generation, "released task");
        // The body (and whatever it captured) is dropped here, outside the lock.
        drop(removed);
        true
    }

    /// Reclaim ownership of a handle previously exported with
    /// [`TaskHandle::into_raw`].
    ///
    /// Fails with [`InvokeError::UninitializedHandle`] for [`RawHandle::NULL`]
    /// or a handle this table never issued, and with
    /// [`InvokeError::UseAfterRelease`] for a stale one.
    pub fn adopt(&self, raw: RawHandle) -> Result<TaskHandle, InvokeError> {
        self.inner.slots.lock().lookup(raw)?;
        Ok(TaskHandle::bind(self.clone(), raw))
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.inner.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

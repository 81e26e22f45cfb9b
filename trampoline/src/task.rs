use std::fmt;

use tracing::error;

use crate::table::{InvokeError, RawHandle, TaskTable};

/// Owning wrapper around one table slot.
///
/// This is the object an external scheduler holds: it forwards [`invoke`] to
/// the registered body and releases its slot exactly once, either through
/// [`release`] or at drop. Deliberately not `Clone`: one owner per slot.
///
/// [`invoke`]: TaskHandle::invoke
/// [`release`]: TaskHandle::release
pub struct TaskHandle {
    table: TaskTable,
    raw: RawHandle,
}

impl TaskHandle {
    /// Construction is restricted to the table; see [`TaskTable::register`]
    /// and [`TaskTable::adopt`].
    pub(crate) fn bind(table: TaskTable, raw: RawHandle) -> TaskHandle {
        TaskHandle { table, raw }
    }

    /// The forwardable opaque id for this slot.
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    /// Run the registered body on the calling thread.
    ///
    /// May block for as long as the body blocks; imposes no ordering between
    /// calls and no synchronization of the body. Once the slot is gone this
    /// fails with [`InvokeError::UseAfterRelease`], and there is no fallback
    /// execution path, so the error is fatal to the invocation.
    pub fn invoke(&self) -> Result<(), InvokeError> {
        self.table.invoke_raw(self.raw)
    }

    /// Release the slot now instead of at drop. Returns `false` if the slot
    /// was already released.
    pub fn release(&mut self) -> bool {
        self.table.release_raw(self.raw)
    }

    /// Export ownership as a raw handle, skipping the drop-time release.
    /// Reclaim it with [`TaskTable::adopt`]; a handle that is never
    /// reclaimed leaks its slot.
    pub fn into_raw(self) -> RawHandle {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }

    /// Single-invocation closure for schedulers that consume plain callables.
    ///
    /// Runs the body once, then releases by dropping the handle. A failed
    /// invocation has no recovery path and is logged rather than returned.
    pub fn into_job(self) -> impl FnOnce() + Send {
        move || {
            if let Err(err) = self.invoke() {
                error!(%err, "task invocation failed");
            }
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("raw", &self.raw).finish()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.table.release_raw(self.raw);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::table::TaskTable;

    #[test]
    fn into_job_invokes_once_then_releases() {
        let table = TaskTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let task = table.register(move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        let job = task.into_job();
        job();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn job_on_an_externally_released_slot_does_not_panic() {
        // The scheduler thread must survive a job whose slot was disposed
        // between queueing and execution.
        let table = TaskTable::new();
        let task = table.register(|| {});
        table.release_raw(task.raw());

        let job = task.into_job();
        job();

        assert!(table.is_empty());
    }
}

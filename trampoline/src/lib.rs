//! trampoline
//!
//! Callable handles over foreign-owned work bodies.
//!
//! A registering layer pairs a zero-argument body with a slot in a
//! [`TaskTable`]; the owning [`TaskHandle`] is what an external scheduler
//! holds and invokes, on whatever thread it likes. Slots are released
//! deterministically (explicitly or at drop), and stale handles fail with
//! [`InvokeError::UseAfterRelease`] instead of reaching a reused slot.
//!
//! This crate deliberately contains no queue, run loop, or scheduler; the
//! executor is always someone else.

pub mod table;
pub mod task;

pub use table::{InvokeError, RawHandle, TaskTable};
pub use task::TaskHandle;

use std::sync::atomic::{AtomicU64, Ordering};

use super::{ScriptResult, ScriptValue};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one scripting context (one interpreter state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Generation-checked handle to a script instance (the `self` a callback
/// runs against). A slot index is reused after its instance is deleted,
/// with a bumped generation, so a stale handle never validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle {
    index: u32,
    generation: u32,
}

impl InstanceHandle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Reference to a script function held alive by the runtime until released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackRef(u64);

impl CallbackRef {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// The slice of a scripting runtime the push bridge needs.
///
/// All methods are called on the scripting thread. `call` may re-enter the
/// bridge (a callback can call `register` again), so implementations must
/// not hold internal borrows across it.
pub trait ScriptRuntime {
    fn context_id(&self) -> ContextId;

    /// The instance running the current script call, if any.
    fn current_instance(&self) -> Option<InstanceHandle>;

    fn is_instance_valid(&self, instance: InstanceHandle) -> bool;

    /// Invokes `callback` with `instance` as `self` followed by `args`.
    /// Errors raised by the script are returned, never unwound.
    fn call(
        &self,
        callback: CallbackRef,
        instance: InstanceHandle,
        args: Vec<ScriptValue>,
    ) -> ScriptResult<()>;

    /// Drops the runtime's reference to `callback`.
    fn release(&self, callback: CallbackRef);
}

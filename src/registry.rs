//! # Callback Registry
//!
//! Holds the two callback slots of the push module:
//!
//! * `register`: one-shot, consumed by the next registration result.
//! * `listener`: persistent, invoked for every push message until replaced.
//!
//! Each slot stores a [`CallbackTarget`]: a weak reference to the runtime
//! that registered it, the callback reference and the instance it runs
//! against. Nothing here keeps a scripting context alive; delivery
//! revalidates the target through [`CallbackTarget::resolve`].
//!
//! The registry lives on the scripting thread only.

use std::rc::{Rc, Weak};

use tracing::{debug, error, trace};

use crate::{
    dispatch::DiscardReason,
    script::{CallbackRef, ContextId, InstanceHandle, ScriptError, ScriptResult, ScriptRuntime},
};

#[derive(Clone)]
pub struct CallbackTarget {
    runtime: Weak<dyn ScriptRuntime>,
    context: ContextId,
    callback: CallbackRef,
    instance: InstanceHandle,
}

impl std::fmt::Debug for CallbackTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackTarget")
            .field("context", &self.context)
            .field("callback", &self.callback)
            .field("instance", &self.instance)
            .finish()
    }
}

impl CallbackTarget {
    /// Captures `callback` together with the runtime's current instance.
    pub fn capture(runtime: &Rc<dyn ScriptRuntime>, callback: CallbackRef) -> ScriptResult<Self> {
        let instance = runtime
            .current_instance()
            .ok_or(ScriptError::NoInstance {
                context: runtime.context_id().value(),
            })?;
        Ok(Self {
            runtime: Rc::downgrade(runtime),
            context: runtime.context_id(),
            callback,
            instance,
        })
    }

    /// Returns the runtime if both it and the stored instance are still alive.
    pub fn resolve(&self) -> Result<Rc<dyn ScriptRuntime>, DiscardReason> {
        let runtime = self.runtime.upgrade().ok_or(DiscardReason::ContextGone)?;
        if !runtime.is_instance_valid(self.instance) {
            return Err(DiscardReason::InstanceDeleted);
        }
        Ok(runtime)
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn callback(&self) -> CallbackRef {
        self.callback
    }

    pub fn instance(&self) -> InstanceHandle {
        self.instance
    }
}

/// A stored callback. Dropping it releases the callback reference in its
/// runtime, if that runtime still exists, unless it was retired while
/// another slot holds the same reference.
#[derive(Debug)]
pub struct CallbackRegistration {
    target: CallbackTarget,
    owned: bool,
}

impl CallbackRegistration {
    pub fn new(target: CallbackTarget) -> Self {
        Self {
            target,
            owned: true,
        }
    }

    pub fn target(&self) -> &CallbackTarget {
        &self.target
    }

    fn disown(mut self) {
        self.owned = false;
    }
}

impl Drop for CallbackRegistration {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Some(runtime) = self.target.runtime.upgrade() {
            debug!("releasing callback {}", self.target.callback.value());
            runtime.release(self.target.callback);
        }
    }
}

#[derive(Debug, Default)]
pub struct CallbackRegistry {
    register: Option<CallbackRegistration>,
    listener: Option<CallbackRegistration>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Stores the one-shot registration callback. A callback still waiting
    /// for its result is dropped and will never be invoked.
    pub fn set_register(&mut self, registration: CallbackRegistration) {
        if let Some(previous) = self.register.replace(registration) {
            error!(
                "Unexpected callback set: dropping pending registration callback {}",
                previous.target.callback.value()
            );
            self.retire(previous);
        }
    }

    /// Empties the registration slot, handing the callback to the caller.
    /// Hand it back through [`CallbackRegistry::retire`] once done with it.
    pub fn take_register(&mut self) -> Option<CallbackRegistration> {
        self.register.take()
    }

    pub fn is_register_pending(&self) -> bool {
        self.register.is_some()
    }

    pub fn set_listener(&mut self, registration: CallbackRegistration) {
        if let Some(previous) = self.listener.replace(registration) {
            debug!(
                "replacing listener callback {}",
                previous.target.callback.value()
            );
            self.retire(previous);
        }
    }

    /// Target of the current listener. The slot keeps its registration.
    pub fn listener_target(&self) -> Option<CallbackTarget> {
        self.listener.as_ref().map(|r| r.target.clone())
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Whether a slot still stores `callback` of `context`.
    pub fn holds(&self, context: ContextId, callback: CallbackRef) -> bool {
        [&self.register, &self.listener]
            .into_iter()
            .flatten()
            .any(|r| r.target.context == context && r.target.callback == callback)
    }

    /// Drops a registration that left its slot. The callback reference is
    /// released only if no slot stores it anymore.
    pub fn retire(&self, registration: CallbackRegistration) {
        if self.holds(registration.target.context, registration.target.callback) {
            trace!(
                "callback {} still stored, keeping it",
                registration.target.callback.value()
            );
            registration.disown();
        }
    }

    /// Releases every callback owned by `context`. Returns how many slots
    /// were cleared.
    pub fn clear_context(&mut self, context: ContextId) -> usize {
        let mut cleared = Vec::new();
        for slot in [&mut self.register, &mut self.listener] {
            if slot.as_ref().map(|r| r.target.context) == Some(context) {
                cleared.extend(slot.take());
            }
        }
        let count = cleared.len();
        for registration in cleared {
            self.retire(registration);
        }
        count
    }
}

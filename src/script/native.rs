//! In-process [`ScriptRuntime`] whose callbacks are Rust closures.
//!
//! Instances live in generation-checked slots. Callbacks are reference
//! counted by the runtime the same way an interpreter's registry would
//! hold function references, so tests and tools can check that the bridge
//! releases what it stores.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use tracing::trace;

use super::{
    CallbackRef, ContextId, InstanceHandle, ScriptError, ScriptResult, ScriptRuntime, ScriptValue,
};

type NativeFn = Box<dyn FnMut(InstanceHandle, &[ScriptValue]) -> ScriptResult<()>>;

#[derive(Debug, Clone, Copy)]
struct InstanceSlot {
    generation: u32,
    alive: bool,
}

pub struct NativeRuntime {
    context_id: ContextId,
    instances: RefCell<Vec<InstanceSlot>>,
    free_slots: RefCell<Vec<u32>>,
    callbacks: RefCell<HashMap<CallbackRef, Rc<RefCell<NativeFn>>>>,
    next_callback: Cell<u64>,
    current: Cell<Option<InstanceHandle>>,
}

impl Default for NativeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeRuntime {
    pub fn new() -> Self {
        Self::with_context_id(ContextId::next())
    }

    pub fn with_context_id(context_id: ContextId) -> Self {
        Self {
            context_id,
            instances: RefCell::new(Vec::new()),
            free_slots: RefCell::new(Vec::new()),
            callbacks: RefCell::new(HashMap::new()),
            next_callback: Cell::new(1),
            current: Cell::new(None),
        }
    }

    pub fn spawn_instance(&self) -> InstanceHandle {
        let mut instances = self.instances.borrow_mut();
        if let Some(index) = self.free_slots.borrow_mut().pop() {
            let slot = &mut instances[index as usize];
            slot.alive = true;
            return InstanceHandle::new(index, slot.generation);
        }
        instances.push(InstanceSlot {
            generation: 0,
            alive: true,
        });
        InstanceHandle::new((instances.len() - 1) as u32, 0)
    }

    /// Deletes an instance. Returns `false` if the handle was already stale.
    pub fn delete_instance(&self, instance: InstanceHandle) -> bool {
        if !self.is_instance_valid(instance) {
            return false;
        }
        let mut instances = self.instances.borrow_mut();
        let slot = &mut instances[instance.index() as usize];
        slot.alive = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.borrow_mut().push(instance.index());
        if self.current.get() == Some(instance) {
            self.current.set(None);
        }
        true
    }

    /// Selects the instance subsequent script API calls run as.
    pub fn set_current_instance(&self, instance: Option<InstanceHandle>) {
        self.current.set(instance);
    }

    pub fn create_callback<F>(&self, f: F) -> CallbackRef
    where
        F: FnMut(InstanceHandle, &[ScriptValue]) -> ScriptResult<()> + 'static,
    {
        let id = self.next_callback.get();
        self.next_callback.set(id + 1);
        let callback = CallbackRef::new(id);
        self.callbacks
            .borrow_mut()
            .insert(callback, Rc::new(RefCell::new(Box::new(f))));
        callback
    }

    pub fn is_callback_live(&self, callback: CallbackRef) -> bool {
        self.callbacks.borrow().contains_key(&callback)
    }

    pub fn live_callbacks(&self) -> usize {
        self.callbacks.borrow().len()
    }
}

impl ScriptRuntime for NativeRuntime {
    fn context_id(&self) -> ContextId {
        self.context_id
    }

    fn current_instance(&self) -> Option<InstanceHandle> {
        self.current.get()
    }

    fn is_instance_valid(&self, instance: InstanceHandle) -> bool {
        self.instances
            .borrow()
            .get(instance.index() as usize)
            .map(|slot| slot.alive && slot.generation == instance.generation())
            .unwrap_or(false)
    }

    fn call(
        &self,
        callback: CallbackRef,
        instance: InstanceHandle,
        args: Vec<ScriptValue>,
    ) -> ScriptResult<()> {
        if !self.is_instance_valid(instance) {
            return Err(ScriptError::InstanceDeleted);
        }
        let function = self
            .callbacks
            .borrow()
            .get(&callback)
            .cloned()
            .ok_or(ScriptError::UnknownCallback {
                callback: callback.value(),
            })?;
        let mut function = function.try_borrow_mut().map_err(|_| ScriptError::Reentrant {
            callback: callback.value(),
        })?;

        trace!("calling callback {} with {} args", callback.value(), args.len());
        let previous = self.current.replace(Some(instance));
        let f: &mut NativeFn = &mut function;
        let result = f(instance, &args);
        self.current.set(previous);
        result
    }

    fn release(&self, callback: CallbackRef) {
        self.callbacks.borrow_mut().remove(&callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_generations() {
        let runtime = NativeRuntime::new();
        let first = runtime.spawn_instance();
        assert!(runtime.is_instance_valid(first));

        assert!(runtime.delete_instance(first));
        assert!(!runtime.is_instance_valid(first));
        assert!(!runtime.delete_instance(first));

        let reused = runtime.spawn_instance();
        assert_eq!(reused.index(), first.index());
        assert!(runtime.is_instance_valid(reused));
        assert!(!runtime.is_instance_valid(first));
    }

    #[test]
    fn test_call_sets_current_instance() {
        let runtime = Rc::new(NativeRuntime::new());
        let instance = runtime.spawn_instance();
        let seen = Rc::new(Cell::new(None));

        let seen_clone = seen.clone();
        let runtime_clone = runtime.clone();
        let callback = runtime.create_callback(move |this, args| {
            assert_eq!(args, &[ScriptValue::from("x")]);
            seen_clone.set(runtime_clone.current_instance());
            assert_eq!(runtime_clone.current_instance(), Some(this));
            Ok(())
        });

        runtime
            .call(callback, instance, vec![ScriptValue::from("x")])
            .unwrap();
        assert_eq!(seen.get(), Some(instance));
        assert_eq!(runtime.current_instance(), None);
    }

    #[test]
    fn test_script_error_is_returned() {
        let runtime = NativeRuntime::new();
        let instance = runtime.spawn_instance();
        let callback = runtime.create_callback(|_, _| Err(ScriptError::runtime("boom")));

        let result = runtime.call(callback, instance, vec![]);
        assert_eq!(result, Err(ScriptError::runtime("boom")));
    }

    #[test]
    fn test_release() {
        let runtime = NativeRuntime::new();
        let instance = runtime.spawn_instance();
        let callback = runtime.create_callback(|_, _| Ok(()));
        assert_eq!(runtime.live_callbacks(), 1);

        runtime.release(callback);
        assert!(!runtime.is_callback_live(callback));
        assert_eq!(
            runtime.call(callback, instance, vec![]),
            Err(ScriptError::UnknownCallback {
                callback: callback.value()
            })
        );
    }
}

//! # Dispatch Loop
//!
//! Runs on the scripting thread. Each wake takes exactly one [`Command`]
//! from the channel, hands it to the matching handler and drops it, so its
//! payloads are freed whatever the handler did.
//!
//! Script errors raised inside a callback are logged and reported in the
//! [`DispatchOutcome`]; they never stop the loop.

use std::{cell::RefCell, rc::Rc};

use tracing::{debug, error, trace};

use crate::{
    event::{Command, CommandReceiver},
    registry::{CallbackRegistry, CallbackTarget},
    script::{json, ScriptError, ScriptRuntime, ScriptValue},
};

pub type SharedRegistry = Rc<RefCell<CallbackRegistry>>;

/// Error text handed to the registration callback when the platform
/// reported neither an id nor an error.
pub const UNKNOWN_REGISTRATION_ERROR: &str = "unknown registration error";

/// Why a command reached no callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DiscardReason {
    /// No callback was registered for the command's kind.
    NoCallback,
    /// The scripting context that registered the callback is gone.
    ContextGone,
    /// The instance the callback runs against has been deleted.
    InstanceDeleted,
    /// The message payload was not valid JSON.
    InvalidPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered,
    CallbackFailed(ScriptError),
    Discarded(DiscardReason),
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered)
    }
}

pub struct Dispatcher {
    registry: SharedRegistry,
    receiver: CommandReceiver,
    dispatched: u64,
}

impl Dispatcher {
    pub fn new(registry: SharedRegistry, receiver: CommandReceiver) -> Self {
        Self {
            registry,
            receiver,
            dispatched: 0,
        }
    }

    /// Handles one command. The command, and everything it owns, is dropped
    /// before this returns.
    pub fn dispatch(&mut self, command: Command) -> DispatchOutcome {
        let kind = command.kind();
        trace!("dispatching {} (status {})", kind, command.status());
        let outcome = match command {
            Command::RegistrationResult {
                registration_id,
                error,
                ..
            } => self.handle_registration(registration_id.as_deref(), error.as_deref()),
            Command::MessageResult { payload, .. } => self.handle_message(&payload),
        };
        self.dispatched += 1;
        debug!("{} dispatched: {:?}", kind, outcome);
        outcome
    }

    /// Waits for the next command and dispatches it. Returns `None` once the
    /// channel is closed and drained.
    pub async fn next_event(&mut self) -> Option<DispatchOutcome> {
        let command = self.receiver.recv().await?;
        Some(self.dispatch(command))
    }

    /// Dispatches until the channel is closed. Returns the number of
    /// commands handled by this call.
    pub async fn run(&mut self) -> u64 {
        let mut handled = 0;
        while self.next_event().await.is_some() {
            handled += 1;
        }
        debug!("dispatch loop finished after {} commands", handled);
        handled
    }

    /// Dispatches every command already queued, without waiting.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(command) = self.receiver.try_recv() {
            self.dispatch(command);
            handled += 1;
        }
        handled
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Closes the read end and drops whatever is still queued.
    pub fn close(&mut self) -> usize {
        self.receiver.close();
        let mut dropped = 0;
        while self.receiver.try_recv().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("dropped {} undelivered commands on close", dropped);
        }
        dropped
    }

    fn handle_registration(
        &mut self,
        registration_id: Option<&str>,
        error: Option<&str>,
    ) -> DispatchOutcome {
        // Taken before the call so a callback registering again keeps its
        // new slot.
        let registration = self.registry.borrow_mut().take_register();
        let Some(registration) = registration else {
            error!("No registration callback set; dropping registration result");
            return DispatchOutcome::Discarded(DiscardReason::NoCallback);
        };

        let target = registration.target().clone();
        let outcome = match target.resolve() {
            Ok(runtime) => {
                let args = match registration_id {
                    Some(id) => vec![ScriptValue::from(id), ScriptValue::Nil],
                    None => {
                        let message = error.unwrap_or(UNKNOWN_REGISTRATION_ERROR);
                        error!("Push registration error: {}", message);
                        vec![ScriptValue::Nil, ScriptValue::error_descriptor(message)]
                    }
                };
                invoke(runtime.as_ref(), &target, args)
            }
            Err(reason) => {
                error!(
                    "Could not run push callback because the instance has been deleted ({})",
                    reason
                );
                DispatchOutcome::Discarded(reason)
            }
        };

        // The callback may have stored itself again.
        self.registry.borrow().retire(registration);
        outcome
    }

    fn handle_message(&mut self, payload: &str) -> DispatchOutcome {
        let target = self.registry.borrow().listener_target();
        let Some(target) = target else {
            error!("No listener set; dropping push message");
            return DispatchOutcome::Discarded(DiscardReason::NoCallback);
        };

        let runtime = match target.resolve() {
            Ok(runtime) => runtime,
            Err(reason) => {
                error!(
                    "Could not run push listener because the instance has been deleted ({})",
                    reason
                );
                return DispatchOutcome::Discarded(reason);
            }
        };

        let value = match json::decode(payload) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to parse push message: {}", e);
                return DispatchOutcome::Discarded(DiscardReason::InvalidPayload);
            }
        };

        invoke(runtime.as_ref(), &target, vec![value])
    }
}

fn invoke(
    runtime: &dyn ScriptRuntime,
    target: &CallbackTarget,
    args: Vec<ScriptValue>,
) -> DispatchOutcome {
    match runtime.call(target.callback(), target.instance(), args) {
        Ok(()) => DispatchOutcome::Delivered,
        Err(e) => {
            error!("Error running push callback: {}", e);
            DispatchOutcome::CallbackFailed(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::channel,
        registry::CallbackRegistration,
        script::{native::NativeRuntime, CallbackRef, InstanceHandle},
    };
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    type Calls = Rc<RefCell<Vec<Vec<ScriptValue>>>>;

    struct Fixture {
        native: Rc<NativeRuntime>,
        runtime: Rc<dyn ScriptRuntime>,
        registry: SharedRegistry,
        dispatcher: Dispatcher,
        sender: channel::CommandSender,
    }

    fn fixture() -> Fixture {
        let native = Rc::new(NativeRuntime::new());
        native.set_current_instance(Some(native.spawn_instance()));
        let runtime: Rc<dyn ScriptRuntime> = native.clone();
        let registry = SharedRegistry::default();
        let (sender, receiver) = channel::open();
        let dispatcher = Dispatcher::new(registry.clone(), receiver);
        Fixture {
            native,
            runtime,
            registry,
            dispatcher,
            sender,
        }
    }

    fn recording(native: &NativeRuntime, calls: &Calls) -> CallbackRef {
        let calls = calls.clone();
        native.create_callback(move |_: InstanceHandle, args: &[ScriptValue]| {
            calls.borrow_mut().push(args.to_vec());
            Ok(())
        })
    }

    fn target(f: &Fixture, callback: CallbackRef) -> CallbackRegistration {
        CallbackRegistration::new(CallbackTarget::capture(&f.runtime, callback).unwrap())
    }

    #[test]
    fn test_registration_success_is_one_shot() {
        let mut f = fixture();
        let calls = Calls::default();
        let callback = recording(&f.native, &calls);
        f.registry.borrow_mut().set_register(target(&f, callback));

        let outcome = f
            .dispatcher
            .dispatch(Command::registration(Some("abc123"), None));
        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(
            *calls.borrow(),
            vec![vec![ScriptValue::from("abc123"), ScriptValue::Nil]]
        );
        assert!(!f.registry.borrow().is_register_pending());
        assert!(!f.native.is_callback_live(callback));

        let outcome = f
            .dispatcher
            .dispatch(Command::registration(Some("again"), None));
        assert_eq!(outcome, DispatchOutcome::Discarded(DiscardReason::NoCallback));
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn test_registration_failure_descriptor() {
        let mut f = fixture();
        let calls = Calls::default();
        let callback = recording(&f.native, &calls);
        f.registry.borrow_mut().set_register(target(&f, callback));

        f.dispatcher
            .dispatch(Command::registration(None, Some("quota exceeded")));
        assert_eq!(
            *calls.borrow(),
            vec![vec![
                ScriptValue::Nil,
                ScriptValue::error_descriptor("quota exceeded")
            ]]
        );
        assert!(!f.registry.borrow().is_register_pending());
    }

    #[test]
    fn test_registration_without_id_or_error() {
        let mut f = fixture();
        let calls = Calls::default();
        let callback = recording(&f.native, &calls);
        f.registry.borrow_mut().set_register(target(&f, callback));

        f.dispatcher.dispatch(Command::registration(None, None));
        assert_eq!(
            calls.borrow()[0],
            vec![
                ScriptValue::Nil,
                ScriptValue::error_descriptor(UNKNOWN_REGISTRATION_ERROR)
            ]
        );
    }

    #[test]
    fn test_id_wins_over_error() {
        let mut f = fixture();
        let calls = Calls::default();
        let callback = recording(&f.native, &calls);
        f.registry.borrow_mut().set_register(target(&f, callback));

        f.dispatcher
            .dispatch(Command::registration(Some("id"), Some("ignored")));
        assert_eq!(
            calls.borrow()[0],
            vec![ScriptValue::from("id"), ScriptValue::Nil]
        );
    }

    #[test]
    fn test_script_error_is_swallowed_and_slot_cleared() {
        let mut f = fixture();
        let callback = f
            .native
            .create_callback(|_, _| Err(ScriptError::runtime("attempt to index nil")));
        f.registry.borrow_mut().set_register(target(&f, callback));

        let outcome = f
            .dispatcher
            .dispatch(Command::registration(Some("abc123"), None));
        assert_eq!(
            outcome,
            DispatchOutcome::CallbackFailed(ScriptError::runtime("attempt to index nil"))
        );
        assert!(!f.registry.borrow().is_register_pending());
        assert!(!f.native.is_callback_live(callback));
    }

    #[test]
    fn test_callback_registering_itself_again_is_called_again() {
        let mut f = fixture();
        let this = Rc::new(Cell::new(None::<CallbackRef>));
        let calls = Rc::new(Cell::new(0));
        let (slot, count) = (this.clone(), calls.clone());
        let registry = f.registry.clone();
        let runtime = Rc::downgrade(&f.runtime);
        let callback = f.native.create_callback(move |_, _| {
            count.set(count.get() + 1);
            if count.get() == 1 {
                let runtime = runtime.upgrade().ok_or(ScriptError::ContextGone)?;
                let me = slot.get().ok_or(ScriptError::ContextGone)?;
                registry
                    .borrow_mut()
                    .set_register(CallbackRegistration::new(CallbackTarget::capture(
                        &runtime, me,
                    )?));
            }
            Ok(())
        });
        this.set(Some(callback));
        f.registry.borrow_mut().set_register(target(&f, callback));

        let first = f
            .dispatcher
            .dispatch(Command::registration(None, Some("timeout")));
        assert_eq!(first, DispatchOutcome::Delivered);
        assert!(f.registry.borrow().is_register_pending());
        assert!(f.native.is_callback_live(callback));

        let second = f
            .dispatcher
            .dispatch(Command::registration(Some("abc123"), None));
        assert_eq!(second, DispatchOutcome::Delivered);
        assert_eq!(calls.get(), 2);
        assert!(!f.registry.borrow().is_register_pending());
        assert!(!f.native.is_callback_live(callback));
    }

    #[test]
    fn test_registration_instance_deleted() {
        let mut f = fixture();
        let calls = Calls::default();
        let callback = recording(&f.native, &calls);
        let registration = target(&f, callback);
        let instance = registration.target().instance();
        f.registry.borrow_mut().set_register(registration);
        f.native.delete_instance(instance);

        let outcome = f
            .dispatcher
            .dispatch(Command::registration(Some("abc123"), None));
        assert_eq!(
            outcome,
            DispatchOutcome::Discarded(DiscardReason::InstanceDeleted)
        );
        assert!(calls.borrow().is_empty());
        assert!(!f.registry.borrow().is_register_pending());
    }

    #[test]
    fn test_listener_persists_across_messages() {
        let mut f = fixture();
        let calls = Calls::default();
        let callback = recording(&f.native, &calls);
        f.registry.borrow_mut().set_listener(target(&f, callback));

        for i in 0..3 {
            let outcome = f
                .dispatcher
                .dispatch(Command::message(format!(r#"{{"n":{}}}"#, i)));
            assert!(outcome.is_delivered());
        }
        assert_eq!(calls.borrow().len(), 3);
        assert_eq!(
            calls.borrow()[2][0].get("n"),
            Some(&ScriptValue::Number(2.0))
        );
        assert!(f.registry.borrow().has_listener());
    }

    #[test]
    fn test_malformed_message_is_discarded() {
        let mut f = fixture();
        let calls = Calls::default();
        let callback = recording(&f.native, &calls);
        f.registry.borrow_mut().set_listener(target(&f, callback));

        let outcome = f.dispatcher.dispatch(Command::message(r#"{"a":"#));
        assert_eq!(
            outcome,
            DispatchOutcome::Discarded(DiscardReason::InvalidPayload)
        );
        let outcome = f.dispatcher.dispatch(Command::message(""));
        assert_eq!(
            outcome,
            DispatchOutcome::Discarded(DiscardReason::InvalidPayload)
        );
        assert!(calls.borrow().is_empty());

        assert!(f.dispatcher.dispatch(Command::message("[1]")).is_delivered());
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn test_message_without_listener() {
        let mut f = fixture();
        let outcome = f.dispatcher.dispatch(Command::message("{}"));
        assert_eq!(outcome, DispatchOutcome::Discarded(DiscardReason::NoCallback));
        assert_eq!(f.dispatcher.dispatched(), 1);
    }

    #[test]
    fn test_listener_context_gone() {
        let mut f = fixture();
        let calls = Calls::default();
        let callback = recording(&f.native, &calls);
        f.registry.borrow_mut().set_listener(target(&f, callback));

        let Fixture {
            native,
            runtime,
            mut dispatcher,
            ..
        } = f;
        drop(runtime);
        drop(native);

        let outcome = dispatcher.dispatch(Command::message("{}"));
        assert_eq!(outcome, DispatchOutcome::Discarded(DiscardReason::ContextGone));
        assert!(calls.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_pump_and_next_event() {
        let mut f = fixture();
        let calls = Calls::default();
        let callback = recording(&f.native, &calls);
        f.registry.borrow_mut().set_listener(target(&f, callback));

        f.sender.send(Command::message("1")).unwrap();
        f.sender.send(Command::message("2")).unwrap();
        assert_eq!(f.dispatcher.pending(), 2);
        assert_eq!(f.dispatcher.pump(), 2);
        assert_eq!(f.dispatcher.pump(), 0);

        f.sender.send(Command::message("3")).unwrap();
        assert_eq!(
            f.dispatcher.next_event().await,
            Some(DispatchOutcome::Delivered)
        );
        let numbers: Vec<ScriptValue> = calls.borrow().iter().map(|c| c[0].clone()).collect();
        assert_eq!(
            numbers,
            vec![
                ScriptValue::Number(1.0),
                ScriptValue::Number(2.0),
                ScriptValue::Number(3.0)
            ]
        );
    }

    #[tokio::test]
    async fn test_run_ends_when_senders_drop() {
        let mut f = fixture();
        f.sender.send(Command::message("{}")).unwrap();
        f.sender.send(Command::message("{}")).unwrap();
        drop(f.sender);

        assert_eq!(f.dispatcher.run().await, 2);
        assert_eq!(f.dispatcher.dispatched(), 2);
    }

    #[test]
    fn test_close_drops_queued() {
        let mut f = fixture();
        f.sender.send(Command::message("{}")).unwrap();
        assert_eq!(f.dispatcher.close(), 1);
        assert!(f.sender.send(Command::message("{}")).is_err());
    }
}

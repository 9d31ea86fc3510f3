//! # Push extension lifecycle
//!
//! [`PushExtension`] is the subsystem state: channel, callback registry,
//! platform handle and dispatcher. The host drives it through four hooks:
//!
//! | hook               | does                                                  |
//! |--------------------|-------------------------------------------------------|
//! | `app_initialize`   | open channel, start the platform with the sender id   |
//! | `initialize`       | expose a [`PushModule`] to one scripting context      |
//! | `finalize`         | release callbacks owned by that context               |
//! | `app_finalize`     | stop the platform, close channel                      |
//!
//! Between those, the host wakes the dispatcher from its own loop with
//! [`PushExtension::next_event`] (async) or [`PushExtension::pump`]
//! (once per frame).

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use tracing::{debug, error, info};

use crate::{
    config::{ConfigFile, PushConfig},
    dispatch::{DispatchOutcome, Dispatcher, SharedRegistry},
    event::channel,
    platform::{PlatformEvents, PushPlatform},
    registry::{CallbackRegistration, CallbackTarget},
    script::{CallbackRef, ContextId, ScriptError, ScriptRuntime, ScriptValue},
    InternalResult,
};

pub const MODULE_NAME: &str = "push";

type SharedPlatform = Rc<RefCell<Box<dyn PushPlatform>>>;

pub struct PushExtension {
    config: PushConfig,
    events: PlatformEvents,
    registry: SharedRegistry,
    platform: SharedPlatform,
    dispatcher: Dispatcher,
}

impl PushExtension {
    /// Opens the event channel and starts the platform SDK with the
    /// `android.gcm_sender_id` setting of `config`.
    pub fn app_initialize<P>(config: &ConfigFile, platform: P) -> InternalResult<Self>
    where
        P: PushPlatform + 'static,
    {
        Self::with_config(PushConfig::from_config_file(config), platform)
    }

    pub fn with_config<P>(config: PushConfig, mut platform: P) -> InternalResult<Self>
    where
        P: PushPlatform + 'static,
    {
        let (sender, receiver) = channel::open();
        let events = PlatformEvents::new(sender);

        if let Err(e) = platform.start(events.clone(), &config.sender_id) {
            error!("Could not start push platform: {}", e);
            return Err(e.into());
        }

        let registry = SharedRegistry::default();
        let dispatcher = Dispatcher::new(registry.clone(), receiver);
        let platform: Box<dyn PushPlatform> = Box::new(platform);
        info!("push extension initialized");

        Ok(Self {
            config,
            events,
            registry,
            platform: Rc::new(RefCell::new(platform)),
            dispatcher,
        })
    }

    /// Registers the push module with a scripting context.
    pub fn initialize(&self, runtime: &Rc<dyn ScriptRuntime>) -> PushModule {
        debug!(
            "registering module '{}' in context {}",
            MODULE_NAME,
            runtime.context_id().value()
        );
        PushModule {
            runtime: Rc::downgrade(runtime),
            registry: self.registry.clone(),
            platform: self.platform.clone(),
        }
    }

    /// Called when a scripting context is destroyed.
    pub fn finalize(&self, context: ContextId) {
        let cleared = self.registry.borrow_mut().clear_context(context);
        if cleared > 0 {
            debug!(
                "released {} push callback(s) of context {}",
                cleared,
                context.value()
            );
        }
    }

    /// Stops the platform and closes the channel. Commands still queued are
    /// dropped undelivered.
    pub fn app_finalize(mut self) -> InternalResult<()> {
        let stopped = self.platform.borrow_mut().stop();
        if let Err(e) = &stopped {
            error!("Could not stop push platform: {}", e);
        }
        let dropped = self.dispatcher.close();
        info!(
            "push extension finalized ({} dispatched, {} dropped)",
            self.dispatcher.dispatched(),
            dropped
        );
        stopped.map_err(Into::into)
    }

    /// Sink for platform notifications; hand this to platform callback
    /// threads.
    pub fn platform_events(&self) -> PlatformEvents {
        self.events.clone()
    }

    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    pub async fn next_event(&mut self) -> Option<DispatchOutcome> {
        self.dispatcher.next_event().await
    }

    pub fn pump(&mut self) -> usize {
        self.dispatcher.pump()
    }

    pub fn is_register_pending(&self) -> bool {
        self.registry.borrow().is_register_pending()
    }

    pub fn has_listener(&self) -> bool {
        self.registry.borrow().has_listener()
    }
}

/// Script-facing API of the push module, bound to one scripting context.
#[derive(Clone)]
pub struct PushModule {
    runtime: Weak<dyn ScriptRuntime>,
    registry: SharedRegistry,
    platform: SharedPlatform,
}

impl PushModule {
    /// `push.register(sender_config, callback)`
    ///
    /// Stores `callback` for the next registration result and asks the
    /// platform to register. `sender_config` carries notification options
    /// only some platforms consume; it is accepted and ignored here.
    ///
    /// The module takes ownership of `callback`: it is released once the
    /// result is delivered, when replaced, or on error.
    pub fn register(
        &self,
        sender_config: &ScriptValue,
        callback: CallbackRef,
    ) -> InternalResult<()> {
        let target = self.capture(callback)?;
        debug!("push.register (sender config: {})", sender_config.type_name());
        self.registry
            .borrow_mut()
            .set_register(CallbackRegistration::new(target));

        let requested = self.platform.borrow_mut().register();
        if let Err(e) = requested {
            error!("Push registration request failed: {}", e);
            let pending = self.registry.borrow_mut().take_register();
            if let Some(pending) = pending {
                self.registry.borrow().retire(pending);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// `push.set_listener(callback)`
    ///
    /// Installs `callback` as the message listener, releasing the previous
    /// one.
    pub fn set_listener(&self, callback: CallbackRef) -> InternalResult<()> {
        let target = self.capture(callback)?;
        self.registry
            .borrow_mut()
            .set_listener(CallbackRegistration::new(target));
        Ok(())
    }

    fn capture(&self, callback: CallbackRef) -> InternalResult<CallbackTarget> {
        let runtime = self.runtime.upgrade().ok_or(ScriptError::ContextGone)?;
        CallbackTarget::capture(&runtime, callback).map_err(|e| {
            if !self.registry.borrow().holds(runtime.context_id(), callback) {
                runtime.release(callback);
            }
            e.into()
        })
    }
}

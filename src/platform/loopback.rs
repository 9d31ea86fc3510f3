//! In-process push platform.
//!
//! Answers registration requests from a background thread the way a real
//! push SDK would, and lets tools and tests inject messages from any thread
//! through a [`LoopbackHandle`].

use std::{
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{PlatformError, PlatformEvents, PlatformResult, PushPlatform};

/// What the loopback platform answers to `register()`.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    /// Succeed with a fresh random registration id.
    Generated,
    /// Succeed with a fixed id.
    Fixed(String),
    /// Fail with the given error text.
    Fail(String),
}

type SharedEvents = Arc<Mutex<Option<PlatformEvents>>>;

pub struct LoopbackPlatform {
    events: SharedEvents,
    sender_id: Option<String>,
    outcome: RegistrationOutcome,
    delay: Duration,
    workers: Vec<JoinHandle<()>>,
}

impl Default for LoopbackPlatform {
    fn default() -> Self {
        Self::new(RegistrationOutcome::Generated)
    }
}

impl LoopbackPlatform {
    pub fn new(outcome: RegistrationOutcome) -> Self {
        Self {
            events: Arc::new(Mutex::new(None)),
            sender_id: None,
            outcome,
            delay: Duration::ZERO,
            workers: Vec::new(),
        }
    }

    /// Delay before a registration result is reported.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            events: self.events.clone(),
        }
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.sender_id.as_deref()
    }

    fn join_workers(&mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("loopback registration worker panicked");
            }
        }
    }
}

impl PushPlatform for LoopbackPlatform {
    fn start(&mut self, events: PlatformEvents, sender_id: &str) -> PlatformResult<()> {
        let mut slot = self.events.lock().map_err(|e| PlatformError::StartFailed {
            message: e.to_string(),
        })?;
        *slot = Some(events);
        self.sender_id = Some(sender_id.to_string());
        info!("loopback push platform started (sender id {:?})", sender_id);
        Ok(())
    }

    fn register(&mut self) -> PlatformResult<()> {
        let events = self
            .events
            .lock()
            .map_err(|e| PlatformError::RegisterFailed {
                message: e.to_string(),
            })?
            .clone()
            .ok_or(PlatformError::NotStarted)?;

        let outcome = self.outcome.clone();
        let delay = self.delay;
        let worker = thread::Builder::new()
            .name("loopback-push-register".to_string())
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                let result = match outcome {
                    RegistrationOutcome::Generated => {
                        let id = Uuid::new_v4().simple().to_string();
                        events.on_registration(Some(&id), None)
                    }
                    RegistrationOutcome::Fixed(id) => events.on_registration(Some(&id), None),
                    RegistrationOutcome::Fail(error) => events.on_registration(None, Some(&error)),
                };
                if let Err(e) = result {
                    warn!("loopback registration result dropped: {}", e);
                }
            })
            .map_err(|e| PlatformError::RegisterFailed {
                message: e.to_string(),
            })?;
        self.workers.push(worker);
        debug!("loopback registration requested");
        Ok(())
    }

    fn stop(&mut self) -> PlatformResult<()> {
        self.join_workers();
        let mut slot = self.events.lock().map_err(|e| PlatformError::StopFailed {
            message: e.to_string(),
        })?;
        *slot = None;
        info!("loopback push platform stopped");
        Ok(())
    }
}

impl Drop for LoopbackPlatform {
    fn drop(&mut self) {
        self.join_workers();
    }
}

/// Thread-safe handle for injecting platform events.
#[derive(Clone)]
pub struct LoopbackHandle {
    events: SharedEvents,
}

impl LoopbackHandle {
    pub fn deliver_message(&self, json: &str) -> PlatformResult<()> {
        self.with_events(|events| events.on_message(json).is_ok())
    }

    pub fn deliver_registration(
        &self,
        registration_id: Option<&str>,
        error: Option<&str>,
    ) -> PlatformResult<()> {
        self.with_events(|events| events.on_registration(registration_id, error).is_ok())
    }

    fn with_events<F>(&self, f: F) -> PlatformResult<()>
    where
        F: FnOnce(&PlatformEvents) -> bool,
    {
        let guard = self.events.lock().map_err(|_| PlatformError::NotStarted)?;
        let events = guard.as_ref().ok_or(PlatformError::NotStarted)?;
        if f(events) {
            Ok(())
        } else {
            Err(PlatformError::NotStarted)
        }
    }
}

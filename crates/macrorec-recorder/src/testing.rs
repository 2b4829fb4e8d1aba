//! Test doubles for the capture and injection seams.
//!
//! [`ManualCapture`] invokes handlers synchronously on the caller's thread,
//! [`ManualClock`] hands out controlled timestamps and [`RecordingInjector`]
//! remembers every synthetic action together with the instant it happened.

use crate::capture::{CaptureHandlers, InputCapture, PointerInput, SubscriptionId};
use crate::events::KeyRef;
use crate::recorder::Clock;
use macrorec_core::{InjectedAction, InputInjection, MacroError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

#[derive(Default)]
pub struct ManualCapture {
    current: Mutex<Option<(SubscriptionId, CaptureHandlers)>>,
    last: Mutex<Option<CaptureHandlers>>,
    deny: AtomicBool,
    next_id: AtomicU64,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl ManualCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following subscribe fail, as if the OS refused the hook
    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn is_subscribed(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// Deliver a pointer event to the active subscription. Returns false when none.
    pub fn pointer(&self, input: PointerInput) -> bool {
        let handlers = self.current.lock().as_ref().map(|(_, h)| h.clone());
        match handlers {
            Some(h) => {
                (h.on_pointer)(input);
                true
            }
            None => false,
        }
    }

    pub fn key(&self, key: KeyRef) -> bool {
        let handlers = self.current.lock().as_ref().map(|(_, h)| h.clone());
        match handlers {
            Some(h) => {
                (h.on_key)(key);
                true
            }
            None => false,
        }
    }

    /// Handlers of the most recent subscription, even after it was released.
    /// Lets a test play a hook that fires late.
    pub fn stale_handlers(&self) -> Option<CaptureHandlers> {
        self.last.lock().clone()
    }
}

impl InputCapture for ManualCapture {
    fn subscribe(&self, handlers: CaptureHandlers) -> Result<SubscriptionId> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(MacroError::CaptureUnavailable(
                "input monitoring permission denied".into(),
            ));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        *self.last.lock() = Some(handlers.clone());
        *self.current.lock() = Some((id, handlers));
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut current = self.current.lock();
        if matches!(current.as_ref(), Some((active, _)) if *active == id) {
            *current = None;
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Clock whose time only moves when told to
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, t: f64) {
        *self.now.lock() = t;
    }

    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

#[derive(Default)]
pub struct RecordingInjector {
    calls: Mutex<Vec<(Instant, InjectedAction)>>,
    fail_after: Mutex<Option<usize>>,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call once `n` calls have succeeded
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock() = Some(n);
    }

    pub fn actions(&self) -> Vec<InjectedAction> {
        self.calls.lock().iter().map(|(_, a)| a.clone()).collect()
    }

    pub fn instants(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(t, _)| *t).collect()
    }

    fn push(&self, action: InjectedAction) -> Result<()> {
        let mut calls = self.calls.lock();
        if let Some(n) = *self.fail_after.lock() {
            if calls.len() >= n {
                return Err(MacroError::Injection("injector unplugged".into()));
            }
        }
        calls.push((Instant::now(), action));
        Ok(())
    }
}

impl InputInjection for RecordingInjector {
    fn click_at(&self, x: i32, y: i32) -> Result<()> {
        self.push(InjectedAction::Click { x, y })
    }

    fn press_key(&self, token: &str) -> Result<()> {
        self.push(InjectedAction::Press {
            key: token.to_string(),
        })
    }
}

//! Input capture seam
//!
//! The OS hook that reports raw pointer and keyboard occurrences sits behind
//! [`InputCapture`]. [`ChannelCapture`] is a portable implementation fed through
//! crossbeam channels, with one pump thread per source.

use crate::events::{KeyRef, MouseButton};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use macrorec_core::{MacroError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A raw pointer button transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerInput {
    pub x: i32,
    pub y: i32,
    pub button: MouseButton,
    pub pressed: bool,
}

pub type PointerHandler = Arc<dyn Fn(PointerInput) + Send + Sync>;
pub type KeyHandler = Arc<dyn Fn(KeyRef) + Send + Sync>;

/// Callbacks installed by a subscriber. Either may be invoked from any thread,
/// including concurrently with the other.
#[derive(Clone)]
pub struct CaptureHandlers {
    pub on_pointer: PointerHandler,
    pub on_key: KeyHandler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub trait InputCapture: Send + Sync {
    /// Install hooks for both pointer and keyboard sources.
    fn subscribe(&self, handlers: CaptureHandlers) -> Result<SubscriptionId>;

    /// Release the hooks. Occurrences the facility already accepted are delivered
    /// first. Must not return while a handler of this subscription is still
    /// running, and no handler may run afterwards.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Producer side of a [`ChannelCapture`]
#[derive(Clone)]
pub struct CaptureSender {
    pointer: Sender<PointerInput>,
    key: Sender<KeyRef>,
}

impl CaptureSender {
    /// Returns false once the capture side is gone
    pub fn pointer(&self, input: PointerInput) -> bool {
        self.pointer.send(input).is_ok()
    }

    pub fn key(&self, key: KeyRef) -> bool {
        self.key.send(key).is_ok()
    }
}

struct Pump {
    id: SubscriptionId,
    stop: Arc<AtomicBool>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl Pump {
    fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        for t in self.threads {
            let _ = t.join();
        }
    }
}

/// Capture collaborator that reads inputs from channels.
///
/// One subscription at a time. Inputs sent while nothing is subscribed are
/// discarded when the next subscription starts, the way a real hook never sees them.
/// Inputs queued when `unsubscribe` is called still reach the handlers before it returns.
pub struct ChannelCapture {
    pointer_rx: Receiver<PointerInput>,
    key_rx: Receiver<KeyRef>,
    poll: Duration,
    next_id: AtomicU64,
    active: Mutex<Option<Pump>>,
}

impl ChannelCapture {
    pub fn new() -> (Self, CaptureSender) {
        let (pointer_tx, pointer_rx) = unbounded();
        let (key_tx, key_rx) = unbounded();
        let capture = Self {
            pointer_rx,
            key_rx,
            poll: Duration::from_millis(20),
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
        };
        let sender = CaptureSender {
            pointer: pointer_tx,
            key: key_tx,
        };
        (capture, sender)
    }

    pub fn is_subscribed(&self) -> bool {
        self.active.lock().is_some()
    }
}

fn spawn_pump<T: Send + 'static>(
    name: &str,
    rx: Receiver<T>,
    stop: Arc<AtomicBool>,
    poll: Duration,
    deliver: impl Fn(T) + Send + 'static,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name(name.to_string()).spawn(move || loop {
        if stop.load(Ordering::SeqCst) {
            // Flush what was queued when unsubscribe began. Bounded by the
            // snapshot so a busy producer cannot hold unsubscribe open.
            for _ in 0..rx.len() {
                match rx.try_recv() {
                    Ok(input) => deliver(input),
                    Err(_) => break,
                }
            }
            break;
        }
        match rx.recv_timeout(poll) {
            Ok(input) => deliver(input),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    })
}

impl InputCapture for ChannelCapture {
    fn subscribe(&self, handlers: CaptureHandlers) -> Result<SubscriptionId> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(MacroError::CaptureUnavailable(
                "capture hook already in use".into(),
            ));
        }

        while self.pointer_rx.try_recv().is_ok() {}
        while self.key_rx.try_recv().is_ok() {}

        let stop = Arc::new(AtomicBool::new(false));
        let on_pointer = handlers.on_pointer;
        let pointer = spawn_pump(
            "capture-pointer",
            self.pointer_rx.clone(),
            stop.clone(),
            self.poll,
            move |p| on_pointer(p),
        )
        .map_err(|e| MacroError::CaptureUnavailable(e.to_string()))?;

        let on_key = handlers.on_key;
        let keyboard = match spawn_pump(
            "capture-keyboard",
            self.key_rx.clone(),
            stop.clone(),
            self.poll,
            move |k| on_key(k),
        ) {
            Ok(t) => t,
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                let _ = pointer.join();
                return Err(MacroError::CaptureUnavailable(e.to_string()));
            }
        };

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        *active = Some(Pump {
            id,
            stop,
            threads: vec![pointer, keyboard],
        });
        tracing::debug!(id = id.0, "capture subscribed");
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let pump = {
            let mut active = self.active.lock();
            match active.take() {
                Some(p) if p.id == id => p,
                other => {
                    *active = other;
                    return;
                }
            }
        };
        pump.shutdown();
        tracing::debug!(id = id.0, "capture released");
    }
}

impl Drop for ChannelCapture {
    fn drop(&mut self) {
        if let Some(pump) = self.active.get_mut().take() {
            pump.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn collecting() -> (CaptureHandlers, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let p = seen.clone();
        let k = seen.clone();
        let handlers = CaptureHandlers {
            on_pointer: Arc::new(move |i: PointerInput| p.lock().push(format!("{},{}", i.x, i.y))),
            on_key: Arc::new(move |key: KeyRef| k.lock().push(key.token().into_owned())),
        };
        (handlers, seen)
    }

    fn wait_for(seen: &Mutex<Vec<String>>, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().len() < n && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn delivers_both_sources_until_unsubscribed() {
        let (capture, tx) = ChannelCapture::new();
        let (handlers, seen) = collecting();

        let id = capture.subscribe(handlers).unwrap();
        assert!(capture.is_subscribed());
        tx.pointer(PointerInput {
            x: 3,
            y: 4,
            button: MouseButton::Left,
            pressed: true,
        });
        tx.key(KeyRef::Char('q'));
        wait_for(&seen, 2);

        capture.unsubscribe(id);
        assert!(!capture.is_subscribed());
        tx.key(KeyRef::Char('z'));
        thread::sleep(Duration::from_millis(60));

        let mut got = seen.lock().clone();
        got.sort();
        assert_eq!(got, vec!["3,4".to_string(), "q".to_string()]);
    }

    #[test]
    fn second_subscription_is_refused() {
        let (capture, _tx) = ChannelCapture::new();
        let (a, _) = collecting();
        let (b, _) = collecting();
        let id = capture.subscribe(a).unwrap();
        assert!(matches!(
            capture.subscribe(b),
            Err(MacroError::CaptureUnavailable(_))
        ));
        capture.unsubscribe(id);
    }

    #[test]
    fn inputs_before_subscribe_are_dropped() {
        let (capture, tx) = ChannelCapture::new();
        tx.key(KeyRef::Named("esc".into()));

        let (handlers, seen) = collecting();
        let id = capture.subscribe(handlers).unwrap();
        tx.key(KeyRef::Char('k'));
        wait_for(&seen, 1);
        thread::sleep(Duration::from_millis(40));
        capture.unsubscribe(id);

        assert_eq!(*seen.lock(), vec!["k".to_string()]);
    }

    #[test]
    fn unsubscribe_flushes_queued_inputs() {
        const N: usize = 100_000;
        let (capture, tx) = ChannelCapture::new();
        let count = Arc::new(AtomicU64::new(0));
        let handlers = {
            let p = count.clone();
            let k = count.clone();
            CaptureHandlers {
                on_pointer: Arc::new(move |_: PointerInput| {
                    p.fetch_add(1, Ordering::SeqCst);
                }),
                on_key: Arc::new(move |_: KeyRef| {
                    k.fetch_add(1, Ordering::SeqCst);
                }),
            }
        };

        let id = capture.subscribe(handlers).unwrap();
        for i in 0..N {
            if i % 2 == 0 {
                tx.key(KeyRef::Char('k'));
            } else {
                tx.pointer(PointerInput {
                    x: 1,
                    y: 1,
                    button: MouseButton::Left,
                    pressed: true,
                });
            }
        }
        capture.unsubscribe(id);

        assert_eq!(count.load(Ordering::SeqCst), N as u64);
        tx.key(KeyRef::Char('z'));
        thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::SeqCst), N as u64);
    }
}

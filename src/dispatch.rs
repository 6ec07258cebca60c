//! Cross-thread event delivery.
//!
//! Device callbacks arrive on transport threads at arbitrary times. The
//! application observes them on one consumer thread only: producers
//! [`enqueue`](EventDispatcher::enqueue) actions, and the consumer runs them in
//! FIFO order each time it calls [`drain`](EventDispatcher::drain).
//!
//! ```
//! use std::sync::Arc;
//! use gc2link::dispatch::EventDispatcher;
//!
//! let dispatcher = Arc::new(EventDispatcher::new());
//! let producer = Arc::clone(&dispatcher);
//! std::thread::spawn(move || producer.enqueue(|| println!("hello")).unwrap())
//!     .join()
//!     .unwrap();
//! assert_eq!(dispatcher.drain().unwrap(), 1);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use parking_lot::Mutex;

use crate::error::DispatchError;
use crate::protocol::{DeviceStatus, ShotSample};

/// A unit of work to run on the consumer thread.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// How [`EventDispatcher::execute`] ran its action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Ran to completion before `execute` returned.
    Immediate,
    /// Queued for the consumer's next drain.
    Deferred,
}

/// What to do with pending actions at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Run everything still queued (consumer thread only).
    Flush,
    /// Drop everything still queued without running it.
    Discard,
}

/// Multi-producer, single-consumer action queue.
///
/// The consumer thread is the thread that constructed the dispatcher, or the
/// one passed to [`with_consumer`](Self::with_consumer). Every accepted
/// action runs exactly once, unless it is still queued at a
/// [`ShutdownMode::Discard`] shutdown (or when the dispatcher is dropped), in
/// which case it is dropped and the count is logged.
pub struct EventDispatcher {
    tx: Sender<Action>,
    rx: Receiver<Action>,
    consumer: ThreadId,
    closed: AtomicBool,
}

impl EventDispatcher {
    /// Create a dispatcher whose consumer is the calling thread.
    pub fn new() -> Self {
        Self::with_consumer(thread::current().id())
    }

    pub fn with_consumer(consumer: ThreadId) -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            consumer,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_consumer_thread(&self) -> bool {
        thread::current().id() == self.consumer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Actions queued and not yet run.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Queue `action` for the next drain. Safe from any thread.
    ///
    /// After shutdown the action is dropped unrun and `Closed` is returned.
    pub fn enqueue<F>(&self, action: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_boxed(Box::new(action))
    }

    pub fn enqueue_boxed(&self, action: Action) -> Result<(), DispatchError> {
        if self.is_closed() {
            log::debug!("dropping action enqueued after shutdown");
            return Err(DispatchError::Closed);
        }
        // Both channel ends live in `self`, so the send cannot fail.
        self.tx.send(action).map_err(|_| DispatchError::Closed)
    }

    /// Run `action` now if called on the consumer thread, otherwise defer it
    /// exactly like [`enqueue`](Self::enqueue).
    ///
    /// Producers never run actions themselves, so consumer state is only ever
    /// touched from the consumer thread.
    pub fn execute<F>(&self, action: F) -> Result<Execution, DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }
        if self.is_consumer_thread() {
            action();
            Ok(Execution::Immediate)
        } else {
            self.enqueue(action).map(|()| Execution::Deferred)
        }
    }

    /// Run every action queued at the time of the call, in FIFO order.
    ///
    /// Actions enqueued while draining (including by the actions themselves)
    /// wait for the next drain. Returns the number of actions run.
    pub fn drain(&self) -> Result<usize, DispatchError> {
        if !self.is_consumer_thread() {
            return Err(DispatchError::NotConsumerThread);
        }
        let snapshot = self.rx.len();
        let mut ran = 0;
        while ran < snapshot {
            match self.rx.try_recv() {
                Ok(action) => {
                    action();
                    ran += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        Ok(ran)
    }

    /// Stop accepting actions and dispose of what is queued.
    ///
    /// `Flush` runs the remaining actions and must be called on the consumer
    /// thread. Returns the number of actions run (`Flush`) or dropped
    /// (`Discard`). A second shutdown is a no-op returning 0.
    pub fn shutdown(&self, mode: ShutdownMode) -> Result<usize, DispatchError> {
        if mode == ShutdownMode::Flush && !self.is_consumer_thread() {
            return Err(DispatchError::NotConsumerThread);
        }
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }
        let mut count = 0;
        while let Ok(action) = self.rx.try_recv() {
            match mode {
                ShutdownMode::Flush => action(),
                ShutdownMode::Discard => drop(action),
            }
            count += 1;
        }
        match mode {
            ShutdownMode::Flush => log::debug!("dispatcher shut down, flushed {count} actions"),
            ShutdownMode::Discard if count > 0 => {
                log::warn!("dispatcher shut down, discarded {count} pending actions")
            }
            ShutdownMode::Discard => log::debug!("dispatcher shut down"),
        }
        Ok(count)
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        let dropped = self.rx.len();
        if dropped > 0 {
            log::warn!("dispatcher dropped with {dropped} pending actions; discarding");
        }
    }
}

// ---------------------------------------------------------------------------
// Typed events
// ---------------------------------------------------------------------------

/// Something the application needs to hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ShotReceived(ShotSample),
    ConnectionChanged(bool),
    Error(String),
    DeviceStatusChanged(DeviceStatus),
}

impl Event {
    /// Deliver to the matching handler method.
    pub fn deliver(&self, handler: &mut dyn EventHandler) {
        match self {
            Event::ShotReceived(shot) => handler.on_shot(shot),
            Event::ConnectionChanged(connected) => handler.on_connection_changed(*connected),
            Event::Error(message) => handler.on_error(message),
            Event::DeviceStatusChanged(status) => handler.on_device_status(status),
        }
    }
}

/// Consumer-side event receiver. Every method defaults to a no-op.
pub trait EventHandler: Send {
    fn on_shot(&mut self, _shot: &ShotSample) {}
    fn on_connection_changed(&mut self, _connected: bool) {}
    fn on_error(&mut self, _message: &str) {}
    fn on_device_status(&mut self, _status: &DeviceStatus) {}
}

/// Producer-side event outlet. Implementations must not call consumer code
/// on the emitting thread, and may be called with lifecycle locks held.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// [`EventSink`] that delivers each event to `handler` through an
/// [`EventDispatcher`].
pub struct DispatchSink<H> {
    dispatcher: Arc<EventDispatcher>,
    handler: Arc<Mutex<H>>,
}

impl<H: EventHandler + 'static> DispatchSink<H> {
    pub fn new(dispatcher: Arc<EventDispatcher>, handler: Arc<Mutex<H>>) -> Self {
        Self {
            dispatcher,
            handler,
        }
    }
}

impl<H: EventHandler + 'static> EventSink for DispatchSink<H> {
    fn emit(&self, event: Event) {
        let handler = Arc::clone(&self.handler);
        let result = self.dispatcher.enqueue(move || {
            let mut guard = handler.lock();
            event.deliver(&mut *guard);
        });
        if let Err(e) = result {
            log::debug!("event not delivered: {e}");
        }
    }
}

type ShotFn = Box<dyn FnMut(&ShotSample) + Send>;
type ConnectionFn = Box<dyn FnMut(bool) + Send>;
type ErrorFn = Box<dyn FnMut(&str) + Send>;
type StatusFn = Box<dyn FnMut(&DeviceStatus) + Send>;

/// [`EventHandler`] built from individually registered closures.
#[derive(Default)]
pub struct Callbacks {
    on_shot: Option<ShotFn>,
    on_connection: Option<ConnectionFn>,
    on_error: Option<ErrorFn>,
    on_status: Option<StatusFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_shot(&mut self, f: impl FnMut(&ShotSample) + Send + 'static) {
        self.on_shot = Some(Box::new(f));
    }

    pub fn set_on_connection_changed(&mut self, f: impl FnMut(bool) + Send + 'static) {
        self.on_connection = Some(Box::new(f));
    }

    pub fn set_on_error(&mut self, f: impl FnMut(&str) + Send + 'static) {
        self.on_error = Some(Box::new(f));
    }

    pub fn set_on_device_status(&mut self, f: impl FnMut(&DeviceStatus) + Send + 'static) {
        self.on_status = Some(Box::new(f));
    }
}

impl EventHandler for Callbacks {
    fn on_shot(&mut self, shot: &ShotSample) {
        if let Some(cb) = self.on_shot.as_mut() {
            cb(shot);
        }
    }

    fn on_connection_changed(&mut self, connected: bool) {
        if let Some(cb) = self.on_connection.as_mut() {
            cb(connected);
        }
    }

    fn on_error(&mut self, message: &str) {
        if let Some(cb) = self.on_error.as_mut() {
            cb(message);
        }
    }

    fn on_device_status(&mut self, status: &DeviceStatus) {
        if let Some(cb) = self.on_status.as_mut() {
            cb(status);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

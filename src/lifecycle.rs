//! Connection state machine between a [`Transport`] and the event surface.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──transport ok──▶ Connected
//!       ▲                        │                            │
//!       └──── failure / unplug / disconnect ◀─────────────────┘
//! ```
//!
//! Transport callbacks arrive on transport-owned threads. Everything the
//! consumer sees goes out through an [`EventSink`].
//!
//! Lock order is transport, then state. The transport lock is held for the
//! whole of an availability check or identity query; a callback that needs
//! the transport while one is running (link loss cleanup) defers the work to
//! the next [`ConnectionLifecycle::connect`] instead of waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::dispatch::{Event, EventSink};
use crate::error::TransportError;
use crate::protocol::{DeviceStatus, Message};
use crate::transport::{ConnectOutcome, Transport, TransportListener};

/// Connection state as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Returned by [`ConnectionLifecycle::connect`] for an attempt that failed
    /// on the spot. Never held: the error goes out as [`Event::Error`] and
    /// the state is `Disconnected` again.
    Failed,
}

/// Identity of the open device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial: String,
    pub firmware: String,
    /// Club head tracking (HMT) unit attached.
    pub club_tracking: bool,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    device_info: Option<DeviceInfo>,
    last_status: Option<DeviceStatus>,
    /// Status that arrived while the identity query was running.
    pending_status: Option<DeviceStatus>,
    /// Last shot forwarded, for dropping repeated readings.
    last_shot_id: Option<u32>,
    /// Link lost while the transport was busy; close it before reconnecting.
    stale_link: bool,
}

/// Owns the transport and the connection state; turns transport callbacks
/// and device frames into [`Event`]s.
///
/// Construct one per device and share the returned `Arc`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use parking_lot::Mutex;
/// use gc2link::dispatch::{Callbacks, DispatchSink, EventDispatcher};
/// use gc2link::lifecycle::ConnectionLifecycle;
/// use gc2link::transport::{TcpTransport, DEFAULT_ADDR};
///
/// let dispatcher = Arc::new(EventDispatcher::new());
/// let mut callbacks = Callbacks::new();
/// callbacks.set_on_shot(|shot| println!("{:.1} mph", shot.ball_speed));
/// let sink = DispatchSink::new(Arc::clone(&dispatcher), Arc::new(Mutex::new(callbacks)));
///
/// let transport = TcpTransport::new(DEFAULT_ADDR, Duration::from_secs(2))?;
/// let gc2 = ConnectionLifecycle::new(Box::new(transport), Arc::new(sink));
/// gc2.connect();
/// loop {
///     dispatcher.drain()?;
///     std::thread::sleep(Duration::from_millis(16));
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct ConnectionLifecycle {
    transport: Mutex<Box<dyn Transport>>,
    inner: Mutex<Inner>,
    sink: Arc<dyn EventSink>,
    shut_down: AtomicBool,
    listener: Arc<dyn TransportListener>,
}

impl ConnectionLifecycle {
    pub fn new(transport: Box<dyn Transport>, sink: Arc<dyn EventSink>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| Self {
            transport: Mutex::new(transport),
            inner: Mutex::new(Inner::default()),
            sink,
            shut_down: AtomicBool::new(false),
            listener: Arc::new(Listener {
                owner: weak.clone(),
            }),
        })
    }

    /// Start connecting. Returns the state after the call, or `Failed`.
    ///
    /// A no-op while `Connecting` or `Connected`. Failures are reported as
    /// events and leave the state `Disconnected`.
    pub fn connect(&self) -> ConnectionState {
        if self.is_shut_down() {
            return ConnectionState::Disconnected;
        }
        {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Connected | ConnectionState::Connecting => return inner.state,
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    inner.state = ConnectionState::Connecting
                }
            }
        }

        let outcome = {
            let mut transport = self.transport.lock();
            if std::mem::take(&mut self.inner.lock().stale_link) {
                transport.disconnect();
            }
            if transport.is_available() {
                transport.connect(Arc::clone(&self.listener))
            } else {
                Err(TransportError::DeviceNotFound)
            }
        };

        match outcome {
            Ok(ConnectOutcome::Connected) => self.handle_connected(),
            Ok(ConnectOutcome::Pending) => log::debug!("connect pending"),
            Err(e) => {
                self.handle_lost(Some(e));
                return ConnectionState::Failed;
            }
        }
        self.state()
    }

    /// Close the link. Emits `ConnectionChanged(false)` if a link was open
    /// or opening.
    pub fn disconnect(&self) {
        let was_active = {
            let mut inner = self.inner.lock();
            let was_active = inner.state != ConnectionState::Disconnected;
            Self::reset(&mut inner);
            was_active
        };
        self.transport.lock().disconnect();
        if was_active {
            log::info!("disconnected");
            self.emit(Event::ConnectionChanged(false));
        }
    }

    /// Disconnect and refuse all further transitions.
    pub fn shutdown(&self) {
        if self.is_shut_down() {
            return;
        }
        self.disconnect();
        self.shut_down.store(true, Ordering::Release);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_shut_down() {
            return ConnectionState::Disconnected;
        }
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether the transport can see a device right now.
    ///
    /// Holds the transport for the duration of the check. Frame delivery and
    /// link loss reports do not wait on it.
    pub fn is_device_available(&self) -> bool {
        !self.is_shut_down() && self.transport.lock().is_available()
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        if self.is_shut_down() {
            return None;
        }
        self.inner.lock().device_info.clone()
    }

    pub fn device_serial(&self) -> Option<String> {
        self.device_info().map(|info| info.serial)
    }

    pub fn firmware_version(&self) -> Option<String> {
        self.device_info().map(|info| info.firmware)
    }

    /// Last status reported by the device, or [`DeviceStatus::UNKNOWN`].
    pub fn last_status(&self) -> DeviceStatus {
        if self.is_shut_down() {
            return DeviceStatus::UNKNOWN;
        }
        self.inner
            .lock()
            .last_status
            .clone()
            .unwrap_or(DeviceStatus::UNKNOWN)
    }

    // -- transport callbacks --

    fn handle_connected(&self) {
        if self.is_shut_down() || self.state() != ConnectionState::Connecting {
            return;
        }
        // Identity query runs without the state lock, so frames keep flowing
        // into `handle_frame` meanwhile.
        let info = match self.transport.lock().query_device_info() {
            Ok(info) => Some(info),
            Err(e) => {
                log::warn!("device info query failed: {e}");
                None
            }
        };

        // Emit under the state lock so a status frame racing in cannot be
        // reported ahead of the connection change.
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Connecting {
            return;
        }
        match &info {
            Some(info) => log::info!(
                "connected: serial {} firmware {}",
                info.serial,
                info.firmware
            ),
            None => log::info!("connected"),
        }
        inner.state = ConnectionState::Connected;
        inner.device_info = info;
        self.emit(Event::ConnectionChanged(true));
        if let Some(status) = inner.pending_status.take() {
            inner.last_status = Some(status.clone());
            self.emit(Event::DeviceStatusChanged(status));
        }
    }

    /// Failed connect or unsolicited link loss. Reported once; a second
    /// report for the same loss finds the state already `Disconnected`.
    fn handle_lost(&self, error: Option<TransportError>) {
        if self.is_shut_down() {
            return;
        }
        {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Disconnected {
                return;
            }
            Self::reset(&mut inner);
        }
        match self.transport.try_lock() {
            Some(mut transport) => transport.disconnect(),
            None => {
                log::debug!("transport busy, closing link on next connect");
                self.inner.lock().stale_link = true;
            }
        }

        if let Some(e) = error {
            log::warn!("connection failed: {e}");
            self.emit(Event::Error(e.to_string()));
        } else {
            log::info!("device disconnected");
        }
        self.emit(Event::ConnectionChanged(false));
    }

    /// Shots are forwarded only while `Connected`. A status seen while
    /// `Connecting` is kept and reported right after the connection change.
    ///
    /// Each swing arrives twice with one `SHOT_ID`: an early reading with
    /// total spin only, then the final one. Only the final reading goes out,
    /// and a repeated `SHOT_ID` is dropped.
    fn handle_frame(&self, payload: &str) {
        if self.is_shut_down() {
            return;
        }
        let Some(message) = Message::parse(payload) else {
            return;
        };
        let mut inner = self.inner.lock();
        match (inner.state, message) {
            (ConnectionState::Connected, Message::Shot(shot)) => {
                if shot.provisional {
                    log::debug!("shot {}: early reading, waiting for final", shot.shot_id);
                    return;
                }
                if shot.shot_id != 0 && inner.last_shot_id == Some(shot.shot_id) {
                    log::debug!("shot {}: repeated reading dropped", shot.shot_id);
                    return;
                }
                inner.last_shot_id = Some(shot.shot_id);
                drop(inner);
                log::debug!("shot {} {:.1} mph", shot.shot_id, shot.ball_speed);
                self.emit(Event::ShotReceived(shot));
            }
            (ConnectionState::Connected, Message::DeviceStatus(status)) => {
                if inner.last_status.as_ref() == Some(&status) {
                    return;
                }
                inner.last_status = Some(status.clone());
                drop(inner);
                self.emit(Event::DeviceStatusChanged(status));
            }
            (ConnectionState::Connecting, Message::DeviceStatus(status)) => {
                inner.pending_status = Some(status);
            }
            _ => {}
        }
    }

    fn reset(inner: &mut Inner) {
        inner.state = ConnectionState::Disconnected;
        inner.device_info = None;
        inner.last_status = None;
        inner.pending_status = None;
        inner.last_shot_id = None;
    }

    fn emit(&self, event: Event) {
        self.sink.emit(event);
    }
}

/// Routes transport callbacks to the lifecycle without keeping it alive.
struct Listener {
    owner: Weak<ConnectionLifecycle>,
}

impl TransportListener for Listener {
    fn on_connected(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.handle_connected();
        }
    }

    fn on_connect_failed(&self, error: TransportError) {
        if let Some(owner) = self.owner.upgrade() {
            owner.handle_lost(Some(error));
        }
    }

    fn on_disconnected(&self, error: Option<TransportError>) {
        if let Some(owner) = self.owner.upgrade() {
            owner.handle_lost(error);
        }
    }

    fn on_frame(&self, payload: &str) {
        if let Some(owner) = self.owner.upgrade() {
            owner.handle_frame(payload);
        }
    }
}

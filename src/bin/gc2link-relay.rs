//! Bridge a GC2 stream to a golf simulator over Open Connect.
//!
//! Usage: gc2link-relay [config.toml]
//!
//! Connects to the device stream, forwards validated shots and readiness
//! changes to the relay, keeps the relay alive with heartbeats, and
//! reconnects both sides after a drop.

use std::env;
use std::error::Error;
use std::io::Write;
use std::net::{SocketAddr, ToSocketAddrs};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use gc2link::config::{Config, RelayConfig};
use gc2link::dispatch::{DispatchSink, EventDispatcher, EventHandler, ShutdownMode};
use gc2link::lifecycle::{ConnectionLifecycle, ConnectionState};
use gc2link::protocol::{DeviceStatus, ShotSample};
use gc2link::relay::RelayClient;
use gc2link::transport::TcpTransport;

/// Consumer tick period.
const TICK: Duration = Duration::from_millis(16);

/// Delay between relay reconnect attempts.
const RELAY_RETRY: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Relay side
// ---------------------------------------------------------------------------

/// Consumer-thread handler: forwards device events to the relay.
struct Bridge {
    config: RelayConfig,
    relay: Option<RelayClient>,
    last_attempt: Option<Instant>,
    last_heartbeat: Instant,
    last_status: Option<DeviceStatus>,
}

impl Bridge {
    fn new(config: RelayConfig) -> Self {
        Self {
            config,
            relay: None,
            last_attempt: None,
            last_heartbeat: Instant::now(),
            last_status: None,
        }
    }

    /// Periodic work: relay reconnect and heartbeats.
    fn tick(&mut self, now: Instant) {
        if !self.config.enabled {
            return;
        }
        if self.relay.is_none() {
            let due = self
                .last_attempt
                .is_none_or(|t| now.duration_since(t) >= RELAY_RETRY);
            if due {
                self.last_attempt = Some(now);
                self.connect_relay();
            }
            return;
        }
        if now.duration_since(self.last_heartbeat) >= self.config.heartbeat_interval() {
            self.last_heartbeat = now;
            let result = self.relay.as_mut().map(RelayClient::send_heartbeat);
            if let Some(Err(e)) = result {
                self.drop_relay(&e);
            }
        }
    }

    fn connect_relay(&mut self) {
        let addr = match resolve(&self.config.address) {
            Some(addr) => addr,
            None => {
                log::error!("cannot resolve relay address {}", self.config.address);
                return;
            }
        };
        match RelayClient::connect_timeout(&addr, self.config.response_timeout()) {
            Ok(mut relay) => {
                relay.set_response_timeout(self.config.response_timeout());
                // Bring the simulator up to date with the device.
                if let Some(status) = &self.last_status
                    && let Err(e) = relay.send_status(status)
                {
                    log::warn!("relay status failed: {e}");
                }
                self.last_heartbeat = Instant::now();
                self.relay = Some(relay);
            }
            Err(e) => log::warn!("relay {addr} unavailable: {e}"),
        }
    }

    fn drop_relay(&mut self, e: &dyn Error) {
        log::warn!("relay connection lost: {e}");
        if let Some(relay) = self.relay.take() {
            let _ = relay.shutdown();
        }
    }
}

impl EventHandler for Bridge {
    fn on_shot(&mut self, shot: &ShotSample) {
        log::info!(
            "shot {}: {:.1} mph, VLA {:.1}°, HLA {:.1}°, spin {:.0} rpm (back {:.0}, side {:.0}){}",
            shot.shot_id,
            shot.ball_speed,
            shot.launch_angle,
            shot.direction,
            shot.total_spin,
            shot.back_spin,
            shot.side_spin,
            if shot.has_club_data() { " +club" } else { "" },
        );
        let Some(relay) = self.relay.as_mut() else {
            if self.config.enabled {
                log::warn!("shot {} not relayed: relay not connected", shot.shot_id);
            }
            return;
        };
        match relay.send_shot(shot) {
            Ok(ack) => log::info!("relay: {} {}", ack.code, ack.message),
            Err(e) => self.drop_relay(&e),
        }
    }

    fn on_connection_changed(&mut self, connected: bool) {
        log::info!(
            "launch monitor {}",
            if connected { "connected" } else { "disconnected" }
        );
        if !connected {
            self.last_status = None;
        }
    }

    fn on_error(&mut self, message: &str) {
        log::error!("launch monitor: {message}");
    }

    fn on_device_status(&mut self, status: &DeviceStatus) {
        log::info!(
            "device {} ball {}",
            if status.is_ready { "ready" } else { "not ready" },
            if status.ball_detected { "detected" } else { "absent" },
        );
        self.last_status = Some(status.clone());
        let result = self.relay.as_mut().map(|r| r.send_status(status));
        if let Some(Err(e)) = result {
            self.drop_relay(&e);
        }
    }
}

fn resolve(addr: &str) -> Option<SocketAddr> {
    addr.to_socket_addrs().ok()?.next()
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let config = match env::args().nth(1) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .format(|buf, record| {
        writeln!(
            buf,
            "[{}] {} - {}",
            record.level(),
            record.target(),
            record.args()
        )
    })
    .init();

    log::info!("gc2link-relay starting");
    log::info!("  Device: {}", config.device.address);
    if config.relay.enabled {
        log::info!("  Relay: {}", config.relay.address);
    } else {
        log::info!("  Relay: disabled");
    }

    let dispatcher = Arc::new(EventDispatcher::new());
    let bridge = Arc::new(Mutex::new(Bridge::new(config.relay.clone())));
    let sink = DispatchSink::new(Arc::clone(&dispatcher), Arc::clone(&bridge));

    let transport = TcpTransport::new(
        config.device.address.as_str(),
        config.device.connect_timeout(),
    )?;
    let gc2 = ConnectionLifecycle::new(Box::new(transport), Arc::new(sink));

    let reconnect = config.device.reconnect_interval();
    let mut next_attempt = Some(Instant::now());

    loop {
        let now = Instant::now();
        if gc2.state() == ConnectionState::Disconnected {
            match next_attempt {
                Some(at) if now >= at => {
                    gc2.connect();
                    next_attempt = reconnect.map(|interval| now + interval);
                }
                Some(_) => {}
                None => break,
            }
        }

        dispatcher.drain()?;
        bridge.lock().tick(now);
        thread::sleep(TICK);
    }

    log::info!("device disconnected and reconnect disabled; exiting");
    gc2.shutdown();
    dispatcher.shutdown(ShutdownMode::Flush)?;
    Ok(())
}

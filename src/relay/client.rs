//! TCP client for a GSPro Open Connect peer on port 921.
//!
//! Handles TCP I/O, message encoding and response extraction. No retry
//! policy; callers decide when to reconnect.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use super::message::OpenConnectMessage;
use super::{CODE_PLAYER_INFO, PlayerInfo, RelayResponse, ResponseBuffer};
use crate::error::RelayError;
use crate::protocol::{DeviceStatus, ShotSample};

/// Default relay address and port.
pub const DEFAULT_ADDR: &str = "127.0.0.1:921";

/// How long [`RelayClient::send_shot`] waits for an acknowledgement unless
/// changed with [`RelayClient::set_response_timeout`].
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

type SendHook = Box<dyn FnMut(&OpenConnectMessage) + Send>;
type RecvHook = Box<dyn FnMut(&RelayResponse) + Send>;

/// Connection to a simulator accepting Open Connect v1.
///
/// Synchronous. Shots block until the peer acknowledges; heartbeats and
/// status updates are fire-and-forget.
///
/// # Example
///
/// ```no_run
/// use gc2link::protocol::ShotSample;
/// use gc2link::relay::RelayClient;
///
/// let mut relay = RelayClient::connect(gc2link::relay::client::DEFAULT_ADDR)?;
/// let shot = ShotSample { ball_speed: 150.0, launch_angle: 12.0, total_spin: 3000.0, ..Default::default() };
/// let ack = relay.send_shot(&shot)?;
/// println!("{} {}", ack.code, ack.message);
/// # Ok::<(), gc2link::RelayError>(())
/// ```
pub struct RelayClient {
    stream: TcpStream,
    responses: ResponseBuffer,
    read_buf: [u8; 4096],
    shot_number: u32,
    player: Option<PlayerInfo>,
    response_timeout: Duration,
    on_send: Option<SendHook>,
    on_recv: Option<RecvHook>,
}

impl RelayClient {
    /// Connect with the system default timeout and register with a heartbeat.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, RelayError> {
        let stream = TcpStream::connect(addr)?;
        Self::register(stream)
    }

    /// Connect with an explicit timeout and register with a heartbeat.
    pub fn connect_timeout(addr: &SocketAddr, timeout: Duration) -> Result<Self, RelayError> {
        let stream = TcpStream::connect_timeout(addr, timeout)?;
        Self::register(stream)
    }

    fn register(stream: TcpStream) -> Result<Self, RelayError> {
        // Messages are a few hundred bytes; disable Nagle to avoid latency.
        let _ = stream.set_nodelay(true);
        let mut client = Self {
            stream,
            responses: ResponseBuffer::new(),
            read_buf: [0u8; 4096],
            shot_number: 0,
            player: None,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            on_send: None,
            on_recv: None,
        };
        log::info!("connected to relay at {}", client.peer_addr()?);
        // The simulator registers a launch monitor on its first message.
        client.send_heartbeat()?;
        Ok(client)
    }

    /// Register a callback invoked before every message is written.
    pub fn set_on_send(&mut self, f: impl FnMut(&OpenConnectMessage) + Send + 'static) {
        self.on_send = Some(Box::new(f));
    }

    /// Register a callback invoked for every decoded response.
    pub fn set_on_recv(&mut self, f: impl FnMut(&RelayResponse) + Send + 'static) {
        self.on_recv = Some(Box::new(f));
    }

    pub fn set_response_timeout(&mut self, timeout: Duration) {
        self.response_timeout = timeout;
    }

    /// Number of the last shot sent (0 before the first).
    pub fn shot_number(&self) -> u32 {
        self.shot_number
    }

    /// Player state from the most recent `201` response.
    pub fn current_player(&self) -> Option<&PlayerInfo> {
        self.player.as_ref()
    }

    /// Send a shot and wait for its acknowledgement.
    ///
    /// A non-2xx response is returned as `Ok`; check
    /// [`RelayResponse::is_success`].
    pub fn send_shot(&mut self, shot: &ShotSample) -> Result<RelayResponse, RelayError> {
        self.discard_stale()?;
        self.shot_number += 1;
        let message = OpenConnectMessage::shot(shot, self.shot_number);
        self.send(&message)?;

        let response = self.recv_timeout(self.response_timeout)?;
        if response.code == CODE_PLAYER_INFO
            && let Some(player) = &response.player
        {
            log::info!(
                "player: {} club {} target {:.0} yd",
                player.handed,
                player.club,
                player.distance_to_target
            );
            self.player = Some(player.clone());
        }
        if !response.is_success() {
            log::warn!(
                "relay rejected shot {}: {} {}",
                self.shot_number,
                response.code,
                response.message
            );
        }
        Ok(response)
    }

    /// Keep-alive. Not acknowledged by the peer.
    pub fn send_heartbeat(&mut self) -> Result<(), RelayError> {
        self.send(&OpenConnectMessage::heartbeat(self.shot_number))
    }

    /// Readiness update. Not acknowledged by the peer.
    pub fn send_status(&mut self, status: &DeviceStatus) -> Result<(), RelayError> {
        log::debug!(
            "relay status: ready={} ball={}",
            status.is_ready,
            status.ball_detected
        );
        self.send(&OpenConnectMessage::status(status, self.shot_number))
    }

    /// Write one message.
    pub fn send(&mut self, message: &OpenConnectMessage) -> Result<(), RelayError> {
        if let Some(cb) = self.on_send.as_mut() {
            cb(message);
        }
        let json = message.to_json()?;
        self.stream.write_all(json.as_bytes())?;
        log::trace!("relay >> {json}");
        Ok(())
    }

    /// Block up to `timeout` for the next response.
    ///
    /// Returns `RelayError::Timeout` if no complete response arrives in time.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<RelayResponse, RelayError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(response) = self.responses.next_response() {
                if let Some(cb) = self.on_recv.as_mut() {
                    cb(&response);
                }
                return Ok(response);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RelayError::Timeout { timeout });
            }
            self.stream.set_read_timeout(Some(remaining))?;
            match self.stream.read(&mut self.read_buf) {
                Ok(0) => return Err(RelayError::Disconnected),
                Ok(n) => self.responses.push(&self.read_buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Err(RelayError::Timeout { timeout });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// The peer address of the underlying TCP connection.
    pub fn peer_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.stream.peer_addr()?)
    }

    /// Shut down the TCP connection.
    pub fn shutdown(&self) -> Result<(), RelayError> {
        self.stream.shutdown(Shutdown::Both)?;
        log::info!("relay connection closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    /// Drop responses left over from earlier messages so the next read
    /// belongs to the next shot.
    fn discard_stale(&mut self) -> Result<(), RelayError> {
        let mut dropped = self.responses.pending();
        self.responses.clear();

        self.stream.set_nonblocking(true)?;
        let result = loop {
            match self.stream.read(&mut self.read_buf) {
                Ok(0) => break Err(RelayError::Disconnected),
                Ok(n) => dropped += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break Err(e.into()),
            }
        };
        self.stream.set_nonblocking(false)?;

        if dropped > 0 {
            log::debug!("discarded {dropped} bytes of stale relay data");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex, mpsc};
    use std::thread;

    use super::*;
    use crate::protocol::ClubMetrics;

    /// Read inbound messages until `stop` matches one; return all of them.
    fn read_until(
        stream: &mut TcpStream,
        stop: impl Fn(&OpenConnectMessage) -> bool,
    ) -> Vec<OpenConnectMessage> {
        let mut buf = ResponseBuffer::new();
        let mut chunk = [0u8; 1024];
        let mut seen = Vec::new();
        loop {
            while let Some(object) = buf.next_object() {
                let msg = OpenConnectMessage::from_json(&object).unwrap();
                let done = stop(&msg);
                seen.push(msg);
                if done {
                    return seen;
                }
            }
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                return seen;
            }
            buf.push(&chunk[..n]);
        }
    }

    fn shot() -> ShotSample {
        ShotSample {
            shot_id: 1,
            ball_speed: 132.5,
            launch_angle: 17.1,
            direction: 1.4,
            total_spin: 6120.0,
            back_spin: 6050.0,
            side_spin: 921.0,
            spin_axis: 8.66,
            club: Some(ClubMetrics {
                speed: 88.0,
                path: 2.0,
                attack_angle: -3.5,
                face_to_target: 1.1,
                dynamic_loft: 24.0,
                lie: 61.0,
            }),
            ..Default::default()
        }
    }

    fn server() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[test]
    fn shot_acknowledged_with_player_info() {
        let (listener, addr) = server();
        let peer = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let seen = read_until(&mut s, OpenConnectMessage::is_shot);
            s.write_all(
                br#"{"Code":201,"Message":"Shot received","Player":{"Handed":"LH","Club":"7I","DistanceToTarget":150}}"#,
            )
            .unwrap();
            seen
        });

        let mut relay = RelayClient::connect(addr).unwrap();
        let ack = relay.send_shot(&shot()).unwrap();
        assert_eq!(ack.code, 201);
        assert!(ack.is_success());
        assert_eq!(relay.shot_number(), 1);
        let player = relay.current_player().unwrap();
        assert_eq!(player.handed, "LH");
        assert_eq!(player.club, "7I");

        let seen = peer.join().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_heartbeat());
        assert_eq!(seen[1].shot_number, 1);
        assert_eq!(seen[1].to_shot_sample().unwrap().ball_speed, 132.5);
        assert!(seen[1].shot_data_options.contains_club_data);
    }

    #[test]
    fn batched_responses_are_read_in_order() {
        let (listener, addr) = server();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let peer = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            read_until(&mut s, OpenConnectMessage::is_shot);
            s.write_all(br#"{"Code":200,"Message":"OK"}{"Code":202,"Message":"queued"}"#)
                .unwrap();
            let _ = done_rx.recv();
        });

        let mut relay = RelayClient::connect(addr).unwrap();
        let codes = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::clone(&codes);
        relay.set_on_recv(move |r| c.lock().unwrap().push(r.code));

        assert_eq!(relay.send_shot(&shot()).unwrap().code, 200);
        assert_eq!(
            relay.recv_timeout(Duration::from_secs(5)).unwrap().code,
            202
        );
        assert_eq!(*codes.lock().unwrap(), [200, 202]);
        assert!(relay.current_player().is_none());

        done_tx.send(()).unwrap();
        peer.join().unwrap();
    }

    #[test]
    fn status_and_heartbeat_do_not_wait() {
        let (listener, addr) = server();
        let peer = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            read_until(&mut s, |m| m.shot_data_options.launch_monitor_ball_detected)
        });

        let mut relay = RelayClient::connect(addr).unwrap();
        relay.send_heartbeat().unwrap();
        relay.send_status(&DeviceStatus::from_codes(7, 1)).unwrap();

        let seen = peer.join().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].is_heartbeat() && seen[1].is_heartbeat());
        assert!(seen[2].shot_data_options.launch_monitor_is_ready);
        assert!(!seen[2].is_shot());
        assert_eq!(relay.shot_number(), 0);
    }

    #[test]
    fn silent_peer_times_out() {
        let (listener, addr) = server();
        let peer = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            // Swallow everything until the client hangs up.
            read_until(&mut s, |_| false);
        });

        let mut relay = RelayClient::connect(addr).unwrap();
        relay.set_response_timeout(Duration::from_millis(200));
        let err = relay.send_shot(&shot()).unwrap_err();
        assert!(matches!(err, RelayError::Timeout { .. }), "{err}");

        relay.shutdown().unwrap();
        drop(relay);
        peer.join().unwrap();
    }

    #[test]
    fn closed_peer_is_an_error() {
        let (listener, addr) = server();
        let peer = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            read_until(&mut s, OpenConnectMessage::is_heartbeat);
        });

        let mut relay = RelayClient::connect(addr).unwrap();
        peer.join().unwrap();

        let err = relay.send_shot(&shot()).unwrap_err();
        assert!(
            matches!(err, RelayError::Disconnected | RelayError::Io(_)),
            "{err}"
        );
    }

    #[test]
    fn refused_connect_is_io_error() {
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let err = RelayClient::connect_timeout(&addr, Duration::from_millis(500)).err();
        assert!(matches!(err, Some(RelayError::Io(_))));
    }
}

//! Device transport capability.
//!
//! A transport moves raw text frames from the launch monitor and reports
//! link lifecycle changes. Platform bridges (libusb, HID, serial drivers)
//! implement [`Transport`]; [`TcpTransport`] speaks the same byte stream over
//! TCP, as served by the GC2 simulator and USB-to-network bridges.

use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::frame::FrameAccumulator;
use crate::lifecycle::DeviceInfo;

/// Default simulator / bridge address.
pub const DEFAULT_ADDR: &str = "127.0.0.1:5555";

/// Size of one USB interrupt transfer from the GC2.
pub const PACKET_SIZE: usize = 64;

/// Result of starting a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The link is up when `connect` returns.
    Connected,
    /// The outcome will arrive later through the listener.
    Pending,
}

/// Receives transport notifications. Called from transport-owned threads.
pub trait TransportListener: Send + Sync {
    /// A `Pending` connect completed.
    fn on_connected(&self);
    /// A `Pending` connect failed.
    fn on_connect_failed(&self, error: TransportError);
    /// The link dropped without being asked to (unplug, EOF, I/O error).
    fn on_disconnected(&self, error: Option<TransportError>);
    /// One complete message payload.
    fn on_frame(&self, payload: &str);
}

/// Platform link to the launch monitor.
///
/// Implementations must not call the listener synchronously from inside
/// [`connect`](Self::connect) or [`disconnect`](Self::disconnect); the
/// caller may be holding the transport while those run.
pub trait Transport: Send {
    /// Whether a device is present and could be opened.
    fn is_available(&mut self) -> bool;

    /// Open the link. Frames and lifecycle changes go to `listener`.
    fn connect(&mut self, listener: Arc<dyn TransportListener>) -> Result<ConnectOutcome>;

    /// Close the link. Must not report `on_disconnected` for this close.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Query serial number, firmware and capabilities of the open device.
    fn query_device_info(&mut self) -> Result<DeviceInfo>;
}

/// [`Transport`] over a TCP byte stream carrying GC2 text frames.
pub struct TcpTransport {
    addr: SocketAddr,
    timeout: Duration,
    link: Option<Link>,
}

/// One live connection: the socket plus the reader thread's stop flag.
struct Link {
    stream: TcpStream,
    closing: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
}

impl TcpTransport {
    pub fn new(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or(TransportError::DeviceNotFound)?;
        Ok(Self {
            addr,
            timeout,
            link: None,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Transport for TcpTransport {
    fn is_available(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        match TcpStream::connect_timeout(&self.addr, self.timeout) {
            Ok(probe) => {
                let _ = probe.shutdown(Shutdown::Both);
                true
            }
            Err(e) => {
                log::debug!("device probe {} failed: {e}", self.addr);
                false
            }
        }
    }

    fn connect(&mut self, listener: Arc<dyn TransportListener>) -> Result<ConnectOutcome> {
        if self.is_connected() {
            return Ok(ConnectOutcome::Connected);
        }
        let stream = TcpStream::connect_timeout(&self.addr, self.timeout).map_err(|e| {
            match e.kind() {
                io::ErrorKind::ConnectionRefused | io::ErrorKind::TimedOut => {
                    TransportError::DeviceNotFound
                }
                io::ErrorKind::PermissionDenied => TransportError::PermissionDenied(e.to_string()),
                _ => TransportError::Io(e),
            }
        })?;
        // 64-byte frames; don't let Nagle batch them.
        let _ = stream.set_nodelay(true);
        let reader = stream.try_clone()?;

        let closing = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));
        {
            let closing = Arc::clone(&closing);
            let alive = Arc::clone(&alive);
            thread::Builder::new()
                .name("gc2-reader".into())
                .spawn(move || read_loop(reader, listener, closing, alive))?;
        }

        log::info!("connected to device stream at {}", self.addr);
        self.link = Some(Link {
            stream,
            closing,
            alive,
        });
        Ok(ConnectOutcome::Connected)
    }

    fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            link.closing.store(true, Ordering::Release);
            let _ = link.stream.shutdown(Shutdown::Both);
            log::info!("disconnected from device stream at {}", self.addr);
        }
    }

    fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|l| l.alive.load(Ordering::Acquire))
    }

    fn query_device_info(&mut self) -> Result<DeviceInfo> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        // The text stream carries no identity records; report the endpoint.
        Ok(DeviceInfo {
            serial: format!("tcp:{}", self.addr),
            firmware: String::from("unknown"),
            club_tracking: false,
        })
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn read_loop(
    mut stream: TcpStream,
    listener: Arc<dyn TransportListener>,
    closing: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
) {
    let mut acc = FrameAccumulator::new();
    let mut buf = [0u8; 4096];

    let error = loop {
        match stream.read(&mut buf) {
            Ok(0) => break None,
            Ok(n) => {
                for payload in acc.feed(&buf[..n]) {
                    listener.on_frame(&payload);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break Some(TransportError::Io(e)),
        }
    };

    alive.store(false, Ordering::Release);
    if closing.load(Ordering::Acquire) {
        log::debug!("reader thread exiting after local disconnect");
        return;
    }
    match &error {
        Some(e) => log::warn!("device stream failed: {e}"),
        None => log::info!("device stream closed by peer"),
    }
    listener.on_disconnected(error);
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::mpsc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, PartialEq)]
    enum Note {
        Frame(String),
        Disconnected(bool),
    }

    struct Probe {
        tx: Mutex<mpsc::Sender<Note>>,
    }

    impl TransportListener for Probe {
        fn on_connected(&self) {}
        fn on_connect_failed(&self, _error: TransportError) {}
        fn on_disconnected(&self, error: Option<TransportError>) {
            let _ = self.tx.lock().send(Note::Disconnected(error.is_some()));
        }
        fn on_frame(&self, payload: &str) {
            let _ = self.tx.lock().send(Note::Frame(payload.to_string()));
        }
    }

    fn probe() -> (Arc<Probe>, mpsc::Receiver<Note>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Probe { tx: Mutex::new(tx) }), rx)
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn frames_split_across_packets_arrive_whole() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let mut transport = TcpTransport::new(addr, WAIT).unwrap();
        let (listener, rx) = probe();

        assert_eq!(transport.connect(listener).unwrap(), ConnectOutcome::Connected);
        let (mut peer, _) = server.accept().unwrap();

        let msg = "0M\nFLAGS=7\nBALLS=1\nBALL1=198,206,12\n\t0H\nSHOT_ID=1\nSPEED_MPH=150.00\n\t";
        for chunk in msg.as_bytes().chunks(PACKET_SIZE) {
            peer.write_all(chunk).unwrap();
            peer.flush().unwrap();
        }

        let first = rx.recv_timeout(WAIT).unwrap();
        let second = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(first, Note::Frame("0M\nFLAGS=7\nBALLS=1\nBALL1=198,206,12".into()));
        assert_eq!(second, Note::Frame("0H\nSHOT_ID=1\nSPEED_MPH=150.00".into()));
        assert!(transport.is_connected());

        let info = transport.query_device_info().unwrap();
        assert_eq!(info.serial, format!("tcp:{addr}"));
    }

    #[test]
    fn peer_close_reports_disconnect() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let mut transport = TcpTransport::new(addr, WAIT).unwrap();
        let (listener, rx) = probe();

        transport.connect(listener).unwrap();
        let (peer, _) = server.accept().unwrap();
        drop(peer);

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Note::Disconnected(false));
        assert!(!transport.is_connected());
    }

    #[test]
    fn local_disconnect_is_silent() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let mut transport = TcpTransport::new(addr, WAIT).unwrap();
        let (listener, rx) = probe();

        transport.connect(listener).unwrap();
        let _peer = server.accept().unwrap();
        transport.disconnect();

        assert!(!transport.is_connected());
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn refused_connect_is_device_not_found() {
        // Bind then drop to get a port with nothing listening.
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let mut transport = TcpTransport::new(addr, Duration::from_millis(500)).unwrap();
        let (listener, _rx) = probe();
        assert!(!transport.is_available());
        assert!(matches!(
            transport.connect(listener),
            Err(TransportError::DeviceNotFound)
        ));
        assert!(matches!(
            transport.query_device_info(),
            Err(TransportError::Disconnected)
        ));
    }
}

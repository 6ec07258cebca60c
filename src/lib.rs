pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod protocol;
pub mod relay;
pub mod transport;

pub use config::Config;
pub use dispatch::{Callbacks, DispatchSink, Event, EventDispatcher, EventHandler, EventSink};
pub use error::{ConfigError, DispatchError, RelayError, TransportError};
pub use frame::{FrameAccumulator, RawFrame};
pub use lifecycle::{ConnectionLifecycle, ConnectionState, DeviceInfo};
pub use protocol::{DeviceStatus, Message, ShotSample};
pub use relay::{RelayClient, RelayResponse};
pub use transport::{TcpTransport, Transport, TransportListener};

//! # Connector
//!
//! Instrument connection module.
//!
//! Responsibilities:
//! - Probe reachability of instruments and bulk-transfer services
//! - Start the bulk-transfer service locally when needed
//! - Attach instrument (SCPI) and bulk-transfer (DataLink) control channels
//! - Provide a scripted mock transport for tests

pub mod connections;
pub mod datalink;
pub mod mock;
pub mod probe;
pub mod scpi;
pub mod service;
pub mod zmq_transport;

pub use connections::{dlt_host, Connections, Connector, DeviceLink};
pub use datalink::{DataLinkClient, SaveRequest, SessionError, SessionId, SessionStatus};
pub use mock::{CommandLog, MockTransport};
pub use probe::{is_local, probe};
pub use scpi::{truncate_answer, ScpiClient};
pub use service::ServiceLauncher;
pub use zmq_transport::ZmqTransport;

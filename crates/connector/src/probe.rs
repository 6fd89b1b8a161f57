//! TCP reachability probe

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

/// Default probe timeout
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether a TCP connection to `address:port` can be opened within `timeout`
///
/// Single attempt, no retry.
pub async fn probe(address: &str, port: u16, timeout: Duration) -> bool {
    let reachable = matches!(
        tokio::time::timeout(timeout, TcpStream::connect((address, port))).await,
        Ok(Ok(_))
    );
    debug!(address, port, reachable, "probe");
    reachable
}

/// Whether the address designates this computer
pub fn is_local(address: &str) -> bool {
    matches!(address, "127.0.0.1" | "localhost")
}

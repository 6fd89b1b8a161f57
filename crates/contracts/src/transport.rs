//! Transport trait - synchronous request/response channel to an instrument
//!
//! One text request, one text answer. Used for both the instrument control channel
//! and the bulk-transfer service control channel.

use crate::ContractError;

/// Instrument control channel port
pub const SCPI_PORT: u16 = 5555;

/// Bulk-transfer service control port
pub const DLT_PORT: u16 = 6060;

/// Stream port of raw channel `c` is `STREAM_BASE_PORT + c`
pub const STREAM_BASE_PORT: u16 = 4241;

/// Marker the instrument puts in an answer to a rejected command
pub const SCPI_ERROR_MARKER: &str = "SCPI_ERR_";

/// Request/response channel
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Remote endpoint (used for logging)
    fn endpoint(&self) -> &str;

    /// Send one request and wait for its answer
    ///
    /// # Errors
    /// Returns transport failure (socket closed, undecodable answer)
    async fn exchange(&mut self, request: &str) -> Result<String, ContractError>;
}

//! Bulk-transfer service client
//!
//! Text commands, JSON answers. An answer carrying `{"error": {"description": ...}}` is
//! turned into a command error.

use std::fmt;
use std::path::Path;

use contracts::{ChannelKind, ContractError, RawFormat, Transport};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Session identifier assigned by the service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error reported by the service for a session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionError {
    #[serde(default)]
    pub description: String,
}

/// Status of a capture session
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionStatus {
    /// Number of acquisitions still buffered by the service
    #[serde(default)]
    pub acquisitions_count: i64,

    /// Seconds since the last received data
    #[serde(default, alias = "seconds_since_last_activity")]
    pub inactivity: f64,

    #[serde(default)]
    pub errors: Vec<SessionError>,
}

/// Save request for one raw channel
#[derive(Debug, Clone)]
pub struct SaveRequest<'a> {
    /// Instrument address
    pub address: &'a str,
    pub channel: u8,
    pub path: &'a Path,
    pub format: RawFormat,
    pub with_ref_index: bool,
}

impl SaveRequest<'_> {
    /// `start-save` command line, backslashes in the path are escaped
    pub fn command(&self) -> String {
        let path = self.path.display().to_string().replace('\\', "\\\\");
        let mut command = format!(
            "start-save --address {} --channel {} --filename \"{}\" --format {}",
            self.address,
            self.channel,
            path,
            self.format.as_str()
        );
        if self.with_ref_index {
            command.push_str(" --with-ref-index");
        }
        command
    }
}

/// Control channel of the bulk-transfer service serving one instrument
pub struct DataLinkClient<T> {
    transport: T,
    address: String,
    target: String,
}

impl<T: Transport> DataLinkClient<T> {
    /// `address` is the instrument address, used to label errors
    pub fn new(transport: T, address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            transport,
            target: format!("{}@{address}", ChannelKind::DataLink),
            address,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Execute a command, `None` for an empty answer
    pub async fn exec(&mut self, command: &str) -> Result<Option<Value>, ContractError> {
        debug!(target_channel = %self.target, "{command}");
        let answer = self.transport.exchange(command).await?;
        if answer.trim().is_empty() {
            return Ok(None);
        }
        debug!(target_channel = %self.target, "{answer}");

        let value: Value = serde_json::from_str(&answer).map_err(|e| {
            ContractError::command(
                ChannelKind::DataLink,
                &self.address,
                format!("invalid answer to '{command}': {e}"),
            )
        })?;
        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            let description = error
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ContractError::command(
                ChannelKind::DataLink,
                &self.address,
                description,
            ));
        }
        Ok(Some(value))
    }

    /// Start saving a raw channel to a file
    pub async fn start_save(&mut self, request: &SaveRequest<'_>) -> Result<SessionId, ContractError> {
        let command = request.command();
        self.start(&command).await
    }

    /// Start streaming a raw channel on `stream_port`
    pub async fn start_stream(
        &mut self,
        address: &str,
        channel: u8,
        stream_port: u16,
    ) -> Result<SessionId, ContractError> {
        let command =
            format!("start-stream --address {address} --channel {channel} --stream-port {stream_port}");
        self.start(&command).await
    }

    async fn start(&mut self, command: &str) -> Result<SessionId, ContractError> {
        let answer = self.exec(command).await?;
        answer
            .as_ref()
            .and_then(|v| v.get("id"))
            .and_then(SessionId::from_value)
            .ok_or_else(|| {
                ContractError::command(
                    ChannelKind::DataLink,
                    &self.address,
                    format!("no session id in answer to '{command}'"),
                )
            })
    }

    /// Stop a session, returning the errors it reported
    pub async fn stop(&mut self, id: &SessionId) -> Result<Vec<SessionError>, ContractError> {
        let answer = self.exec(&format!("stop {id}")).await?;
        let errors = answer
            .as_ref()
            .and_then(|v| v.get("status"))
            .and_then(|s| s.get("errors"))
            .cloned()
            .map(serde_json::from_value::<Vec<SessionError>>)
            .transpose()
            .map_err(|e| {
                ContractError::command(
                    ChannelKind::DataLink,
                    &self.address,
                    format!("invalid stop answer: {e}"),
                )
            })?;
        Ok(errors.unwrap_or_default())
    }

    /// Status of a session
    pub async fn status(&mut self, id: &SessionId) -> Result<SessionStatus, ContractError> {
        let command = format!("status {id}");
        let answer = self.exec(&command).await?.unwrap_or(Value::Null);
        serde_json::from_value(answer).map_err(|e| {
            ContractError::command(
                ChannelKind::DataLink,
                &self.address,
                format!("invalid answer to '{command}': {e}"),
            )
        })
    }

    /// Active sessions
    pub async fn list(&mut self) -> Result<Vec<SessionId>, ContractError> {
        let answer = self.exec("list").await?;
        Ok(match answer {
            Some(Value::Array(items)) => items.iter().filter_map(SessionId::from_value).collect(),
            _ => Vec::new(),
        })
    }
}

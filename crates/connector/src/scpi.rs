//! Instrument control client
//!
//! One text command per request; an answer containing the instrument error marker is
//! turned into a command error naming the instrument address.

use contracts::{ChannelKind, ContractError, Transport, SCPI_ERROR_MARKER};
use tracing::debug;

/// Shorten an answer for logging, keeping `max_len` characters including a trailing `...`
pub fn truncate_answer(answer: &str, max_len: Option<usize>) -> String {
    match max_len {
        Some(max) if answer.chars().count() > max => {
            let kept: String = answer.chars().take(max.saturating_sub(3)).collect();
            format!("{kept}...")
        }
        _ => answer.to_string(),
    }
}

/// Control channel of one instrument
pub struct ScpiClient<T> {
    transport: T,
    address: String,
    target: String,
}

impl<T: Transport> ScpiClient<T> {
    pub fn new(transport: T, address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            transport,
            target: format!("{}@{address}", ChannelKind::Scpi),
            address,
        }
    }

    /// Instrument address
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Execute a command, returning the raw answer
    ///
    /// # Errors
    /// Command error when the instrument rejects the command
    pub async fn exec(&mut self, command: &str) -> Result<String, ContractError> {
        self.exec_logged(command, None).await
    }

    /// Execute a command, logging at most `answer_len` characters of its answer
    pub async fn exec_logged(
        &mut self,
        command: &str,
        answer_len: Option<usize>,
    ) -> Result<String, ContractError> {
        debug!(target_channel = %self.target, "{command}");
        let answer = self.transport.exchange(command).await?;
        if !answer.is_empty() {
            debug!(target_channel = %self.target, "{}", truncate_answer(&answer, answer_len));
        }
        if answer.contains(SCPI_ERROR_MARKER) {
            return Err(ContractError::command(
                ChannelKind::Scpi,
                &self.address,
                format!("'{command}' rejected: {}", answer.trim()),
            ));
        }
        Ok(answer)
    }

    /// Query an integer value
    pub async fn query_i64(&mut self, command: &str) -> Result<i64, ContractError> {
        let answer = self.exec(command).await?;
        parse_number(&answer).ok_or_else(|| self.unexpected(command, &answer))
    }

    /// Query a numeric value, tolerating a unit suffix such as `TB`
    pub async fn query_f64(&mut self, command: &str, suffix: &str) -> Result<f64, ContractError> {
        let answer = self.exec(command).await?;
        let trimmed = answer.trim();
        let value = trimmed.strip_suffix(suffix).unwrap_or(trimmed);
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| self.unexpected(command, &answer))
    }

    /// Query a bracketed list of counts such as `[0,3,1]`
    pub async fn query_counts(
        &mut self,
        command: &str,
        answer_len: Option<usize>,
    ) -> Result<Vec<u64>, ContractError> {
        let answer = self.exec_logged(command, answer_len).await?;
        parse_counts(&answer).ok_or_else(|| self.unexpected(command, &answer))
    }

    fn unexpected(&self, command: &str, answer: &str) -> ContractError {
        ContractError::command(
            ChannelKind::Scpi,
            &self.address,
            format!(
                "unexpected answer to '{command}': {}",
                truncate_answer(answer.trim(), Some(80))
            ),
        )
    }
}

fn parse_number(answer: &str) -> Option<i64> {
    let trimmed = answer.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().map(|v| v as i64))
}

fn parse_counts(answer: &str) -> Option<Vec<u64>> {
    let inner = answer
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    inner
        .split(',')
        .map(|v| v.trim().parse::<u64>().ok())
        .collect()
}

//! Capture sessions and end-of-acquisition polling

use std::collections::BTreeMap;
use std::time::Duration;

use connector::{SessionId, SessionStatus};
use contracts::ContractError;

/// Device name -> raw acquisition index -> session
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    sessions: BTreeMap<String, BTreeMap<u8, SessionId>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: &str, index: u8, id: SessionId) {
        self.sessions
            .entry(device.to_string())
            .or_default()
            .insert(index, id);
    }

    pub fn get(&self, device: &str, index: u8) -> Option<&SessionId> {
        self.sessions.get(device).and_then(|s| s.get(&index))
    }

    /// Every session as `(device, index, id)`
    pub fn entries(&self) -> Vec<(String, u8, SessionId)> {
        self.sessions
            .iter()
            .flat_map(|(device, sessions)| {
                sessions
                    .iter()
                    .map(move |(index, id)| (device.clone(), *index, id.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

/// Waiting for the bulk-transfer service to finish
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    /// Added to the acquisition duration before the first poll
    pub guard: Duration,
    pub poll_interval: Duration,
    /// A session inactive for less than this is considered finished
    pub inactivity_timeout: Duration,
    /// Give up after this many polling rounds (None = never)
    pub max_polls: Option<u32>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            guard: Duration::from_millis(100),
            poll_interval: Duration::from_secs(1),
            inactivity_timeout: Duration::from_secs(2),
            max_polls: None,
        }
    }
}

impl WaitPolicy {
    /// A session is settled once it is plausibly finished: nothing buffered, or
    /// recently active, or no error reported
    pub fn is_settled(&self, status: &SessionStatus) -> bool {
        status.acquisitions_count <= 0
            || status.inactivity < self.inactivity_timeout.as_secs_f64()
            || status.errors.is_empty()
    }

    /// Fail once `polls` rounds did not settle every session
    pub(crate) fn check_polls(&self, polls: u32, pending: usize) -> Result<(), ContractError> {
        match self.max_polls {
            Some(max) if polls >= max => Err(ContractError::acquisition(format!(
                "{pending} capture session(s) still busy after {polls} status polls"
            ))),
            _ => Ok(()),
        }
    }
}

//! Scripted mock transport
//!
//! Used by unit tests and end-to-end tests to play instrument conversations.
//! Answers are chosen by exact command match first, then by longest matching prefix.
//! Rules added later win ties. Unmatched commands get an empty answer.

use std::collections::VecDeque;
use std::sync::Arc;

use contracts::{ContractError, Transport};
use parking_lot::Mutex;

/// Dynamic answer generator
pub type Responder = Arc<dyn Fn(&str) -> String + Send + Sync>;

enum Answer {
    /// Successive answers, the last one repeats
    Queue(VecDeque<String>),
    Dynamic(Responder),
}

struct Rule {
    prefix: String,
    answer: Answer,
}

/// Shared record of (endpoint, command) exchanges, in order
#[derive(Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<(String, String)>>>);

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, endpoint: &str, command: &str) {
        self.0.lock().push((endpoint.to_string(), command.to_string()));
    }

    /// All exchanges in order
    pub fn entries(&self) -> Vec<(String, String)> {
        self.0.lock().clone()
    }

    /// All commands in order
    pub fn commands(&self) -> Vec<String> {
        self.0.lock().iter().map(|(_, c)| c.clone()).collect()
    }

    /// Commands sent to one endpoint
    pub fn commands_for(&self, endpoint: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Scripted request/response transport
pub struct MockTransport {
    endpoint: String,
    rules: Arc<Mutex<Vec<Rule>>>,
    log: CommandLog,
}

impl MockTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_log(endpoint, CommandLog::new())
    }

    /// Create a transport recording into a shared log
    pub fn with_log(endpoint: impl Into<String>, log: CommandLog) -> Self {
        Self {
            endpoint: endpoint.into(),
            rules: Arc::new(Mutex::new(Vec::new())),
            log,
        }
    }

    /// Answer `answer` to commands starting with `prefix`
    pub fn respond(self, prefix: impl Into<String>, answer: impl Into<String>) -> Self {
        self.respond_seq(prefix, [answer.into()])
    }

    /// Answer successive values to commands starting with `prefix`, repeating the last
    pub fn respond_seq<I, S>(self, prefix: impl Into<String>, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.lock().push(Rule {
            prefix: prefix.into(),
            answer: Answer::Queue(answers.into_iter().map(Into::into).collect()),
        });
        self
    }

    /// Compute the answer to commands starting with `prefix`
    pub fn respond_with<F>(self, prefix: impl Into<String>, responder: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.rules.lock().push(Rule {
            prefix: prefix.into(),
            answer: Answer::Dynamic(Arc::new(responder)),
        });
        self
    }

    /// Commands received by this transport
    pub fn commands(&self) -> Vec<String> {
        self.log.commands_for(&self.endpoint)
    }

    pub fn log(&self) -> &CommandLog {
        &self.log
    }

    fn answer(&self, request: &str) -> String {
        let mut rules = self.rules.lock();
        let chosen = rules
            .iter()
            .rposition(|r| r.prefix == request)
            .or_else(|| {
                rules
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| request.starts_with(r.prefix.as_str()))
                    .max_by_key(|(_, r)| r.prefix.len())
                    .map(|(i, _)| i)
            });

        match chosen.map(|i| &mut rules[i].answer) {
            Some(Answer::Queue(queue)) => {
                if queue.len() > 1 {
                    queue.pop_front().unwrap_or_default()
                } else {
                    queue.front().cloned().unwrap_or_default()
                }
            }
            Some(Answer::Dynamic(responder)) => responder(request),
            None => String::new(),
        }
    }
}

impl Transport for MockTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn exchange(&mut self, request: &str) -> Result<String, ContractError> {
        self.log.push(&self.endpoint, request);
        Ok(self.answer(request))
    }
}

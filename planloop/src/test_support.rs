//! Test-only helpers: scripted invokers for driving the engine without
//! spawning processes.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::core::protocol::AgentEvent;
use crate::io::invoker::{InvokeError, InvokeOutcome, InvokeRequest, Invoker};
use crate::io::process::AbortFlag;

/// One scripted invocation: events published to the sink, then an outcome.
#[derive(Debug, Clone)]
pub struct ScriptedInvoke {
    pub events: Vec<AgentEvent>,
    pub outcome: ScriptedOutcome,
}

/// Outcome materialized when the scripted invocation runs.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Succeed { text: String, session_id: String },
    AgentError { message: String },
    Timeout,
    ProcessFailure { diagnostic: String },
    Aborted,
}

impl ScriptedInvoke {
    pub fn succeed(text: &str, session_id: &str) -> Self {
        Self {
            events: Vec::new(),
            outcome: ScriptedOutcome::Succeed {
                text: text.to_string(),
                session_id: session_id.to_string(),
            },
        }
    }

    pub fn agent_error(message: &str) -> Self {
        Self {
            events: Vec::new(),
            outcome: ScriptedOutcome::AgentError {
                message: message.to_string(),
            },
        }
    }

    pub fn timeout() -> Self {
        Self {
            events: Vec::new(),
            outcome: ScriptedOutcome::Timeout,
        }
    }

    pub fn process_failure(diagnostic: &str) -> Self {
        Self {
            events: Vec::new(),
            outcome: ScriptedOutcome::ProcessFailure {
                diagnostic: diagnostic.to_string(),
            },
        }
    }

    pub fn aborted() -> Self {
        Self {
            events: Vec::new(),
            outcome: ScriptedOutcome::Aborted,
        }
    }

    /// Publish these events to the sink before resolving the outcome.
    pub fn with_events(mut self, events: Vec<AgentEvent>) -> Self {
        self.events = events;
        self
    }
}

/// Invoker that replays a fixed script and records every request.
///
/// Panics if invoked more times than the script has entries, which makes
/// "the engine must not invoke the agent" assertions fall out of a passing
/// test with an empty script.
pub struct ScriptedInvoker {
    script: Mutex<VecDeque<ScriptedInvoke>>,
    requests: Mutex<Vec<InvokeRequest>>,
}

impl ScriptedInvoker {
    pub fn new(script: Vec<ScriptedInvoke>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests observed so far, in invocation order.
    pub fn requests(&self) -> Vec<InvokeRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

impl Invoker for ScriptedInvoker {
    fn invoke(
        &self,
        request: &InvokeRequest,
        _abort: &AbortFlag,
        on_event: &(dyn Fn(&AgentEvent) + Sync),
    ) -> Result<InvokeOutcome, InvokeError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let scripted = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .expect("scripted invoker exhausted: unexpected invocation");

        for event in &scripted.events {
            on_event(event);
        }

        match scripted.outcome {
            ScriptedOutcome::Succeed { text, session_id } => Ok(InvokeOutcome {
                text,
                session_id,
                usage: None,
                duration: Duration::from_millis(1),
            }),
            ScriptedOutcome::AgentError { message } => Err(InvokeError::Agent { message }),
            ScriptedOutcome::Timeout => Err(InvokeError::Timeout(Duration::from_millis(1))),
            ScriptedOutcome::ProcessFailure { diagnostic } => Err(InvokeError::Process {
                code: Some(1),
                diagnostic,
            }),
            ScriptedOutcome::Aborted => Err(InvokeError::Aborted),
        }
    }
}

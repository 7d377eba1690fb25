//! JSON command envelope carried over the control channel
//!
//! Host tooling sends one envelope per line:
//! `{"commands":[{"command":"pause","data":{"pause":false}}]}`

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::control::framer::CommandHandler;
use crate::error::ControlError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandRequest {
    pub fn parse(line: &[u8]) -> Result<Self, ControlError> {
        let request: CommandRequest = serde_json::from_slice(line)?;
        if request.commands.is_empty() {
            return Err(ControlError::Empty);
        }
        Ok(request)
    }
}

/// Decodes each line and forwards the request; bad lines are logged and skipped.
pub struct JsonCommandHandler<F> {
    on_request: F,
    rejected: u64,
}

impl<F> JsonCommandHandler<F>
where
    F: FnMut(CommandRequest),
{
    pub fn new(on_request: F) -> Self {
        Self {
            on_request,
            rejected: 0,
        }
    }

    /// Lines that failed to decode so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl<F> CommandHandler for JsonCommandHandler<F>
where
    F: FnMut(CommandRequest),
{
    fn handle(&mut self, line: &[u8]) {
        match CommandRequest::parse(line) {
            Ok(request) => (self.on_request)(request),
            Err(e) => {
                self.rejected += 1;
                warn!("dropping control line: {}", e);
            }
        }
    }
}

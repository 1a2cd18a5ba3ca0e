use serde_json::Value;
use shared::protocol::{Command, CommandResponse};
use storage::StoreError;
use tracing::{debug, warn};

use crate::CaseRegistry;

/// Routes commands to the registry and replies once the operation is persisted.
#[derive(Clone)]
pub struct Dispatcher {
    registry: CaseRegistry,
}

impl Dispatcher {
    pub fn new(registry: CaseRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CaseRegistry {
        &self.registry
    }

    pub async fn dispatch(&self, command: Command) -> Result<CommandResponse, StoreError> {
        let command_name = command.name();
        let response = match command {
            Command::CaptureLink { url, opened_at } => {
                let added = self.registry.capture(&url, opened_at).await?;
                CommandResponse::Captured { ok: true, added }
            }
            Command::UpdateCaseType { url, case_type } => {
                CommandResponse::ack(self.registry.classify(&url, &case_type).await?)
            }
            Command::MarkCompleted { url } => {
                CommandResponse::ack(self.registry.complete(&url).await?)
            }
            Command::RemoveQueueItem { url } => {
                CommandResponse::ack(self.registry.remove(&url).await?)
            }
            Command::AddCaseType { name } => {
                CommandResponse::ack(self.registry.add_type(&name).await?)
            }
            Command::RemoveCaseType { name } => {
                CommandResponse::ack(self.registry.remove_type(&name).await?)
            }
            Command::ClearHistory => {
                self.registry.clear_history().await?;
                CommandResponse::ack(true)
            }
            Command::GetData => CommandResponse::Data(self.registry.snapshot().await?),
        };
        debug!(command = command_name, ok = response.is_ok(), "command dispatched");
        Ok(response)
    }

    /// Wire-level entry point. Payloads that do not decode to a known command
    /// get `{ok: false}` so older or newer callers are never met with an error.
    pub async fn dispatch_json(&self, payload: Value) -> Result<CommandResponse, StoreError> {
        let tag = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match serde_json::from_value::<Command>(payload) {
            Ok(command) => self.dispatch(command).await,
            Err(err) => {
                warn!(command = %tag, %err, "unrecognised command");
                Ok(CommandResponse::nack())
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod tests;

//! # Bulk Service
//!
//! The external surface of the pipeline: submit a command, query its
//! status. Commands are published on the command stream partitioned by
//! action name; status reads go straight to the KV store.

use crate::config::BulkConfig;
use crate::error::{BulkError, Result};
use crate::kv::KvStore;
use crate::messaging::codec;
use crate::messaging::{BulkCommand, BulkState, BulkStatus};
use crate::stages::COMMAND_STREAM;
use crate::transport::{LogTransport, Record};
use std::sync::Arc;
use tracing::info;

/// Client-facing handle over a shared transport and KV store
#[derive(Clone)]
pub struct BulkService {
    transport: Arc<dyn LogTransport>,
    kv: Arc<dyn KvStore>,
    config: Arc<BulkConfig>,
}

impl BulkService {
    pub fn new(
        transport: Arc<dyn LogTransport>,
        kv: Arc<dyn KvStore>,
        config: Arc<BulkConfig>,
    ) -> Self {
        Self {
            transport,
            kv,
            config,
        }
    }

    /// Submit a command for execution, returning its id.
    ///
    /// The command is published keyed by action name, and a SCHEDULED
    /// status is persisted immediately so `status` answers before the
    /// Scroller picks the command up.
    pub async fn submit(&self, command: BulkCommand) -> Result<String> {
        if self.config.action(&command.action).is_none() {
            return Err(BulkError::UnknownAction {
                action: command.action.clone(),
            });
        }
        let scheduled = BulkStatus::delta(&command.id).with_state(BulkState::Scheduled);
        self.kv
            .put(
                &BulkStatus::status_key(&command.id),
                codec::encode(&scheduled)?,
            )
            .await
            .map_err(|e| BulkError::kv(e.to_string()))?;

        let record = Record::new(command.action.clone(), codec::encode(&command)?);
        self.transport
            .append(COMMAND_STREAM, record)
            .map_err(|e| BulkError::transport(e.to_string()))?;
        info!(
            command_id = %command.id,
            action = %command.action,
            username = %command.username,
            "bulk command submitted"
        );
        Ok(command.id)
    }

    /// Current status of a command; absent key means the command is unknown
    pub async fn status(&self, command_id: &str) -> Result<BulkStatus> {
        let bytes = self
            .kv
            .get(&BulkStatus::status_key(command_id))
            .await
            .map_err(|e| BulkError::kv(e.to_string()))?;
        match bytes {
            Some(bytes) => codec::decode(&bytes),
            None => Err(BulkError::UnknownCommand {
                command_id: command_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActionConfig;
    use crate::kv::MemoryKvStore;
    use crate::transport::MemoryLog;

    fn service() -> BulkService {
        let transport = Arc::new(MemoryLog::new());
        transport.create_stream(COMMAND_STREAM, 1).unwrap();
        let kv = Arc::new(MemoryKvStore::new());
        let config = Arc::new(BulkConfig::default().with_action(ActionConfig::new("reindex")));
        BulkService::new(transport, kv, config)
    }

    #[tokio::test]
    async fn test_submit_then_status_is_scheduled() {
        let service = service();
        let command = BulkCommand::new("reindex", "q", "admin", "default");
        let id = service.submit(command).await.unwrap();
        let status = service.status(&id).await.unwrap();
        assert_eq!(status.state, Some(BulkState::Scheduled));
    }

    #[tokio::test]
    async fn test_submit_unknown_action_rejected() {
        let service = service();
        let command = BulkCommand::new("nope", "q", "admin", "default");
        assert!(matches!(
            service.submit(command).await,
            Err(BulkError::UnknownAction { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_unknown_command() {
        let service = service();
        assert!(matches!(
            service.status("missing").await,
            Err(BulkError::UnknownCommand { .. })
        ));
    }
}

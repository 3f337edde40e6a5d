//! 日志中心
//!
//! 按操作 ID 登记操作日志和结果，支持实时订阅；已结束且无人订阅的记录可清理

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::domain::deploy::LogLine;

use super::operation_log::OperationLog;

/// 操作结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    Running,
    Succeeded,
    Failed,
}

/// 已登记操作的概要
#[derive(Clone, Debug)]
pub struct OperationSummary {
    pub id: String,
    /// deploy / backup / restore / ...
    pub kind: String,
    /// `project/environment`
    pub environment: String,
    pub status: OperationStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct OperationEntry {
    log: Arc<OperationLog>,
    summary: OperationSummary,
}

/// 日志中心
#[derive(Default)]
pub struct LogHub {
    operations: RwLock<HashMap<String, OperationEntry>>,
}

impl LogHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记操作并返回其日志；同一 ID 重复登记返回已有日志
    pub async fn create(&self, operation_id: &str, kind: &str, environment: &str) -> Arc<OperationLog> {
        let mut operations = self.operations.write().await;

        if let Some(entry) = operations.get(operation_id) {
            return entry.log.clone();
        }

        let log = Arc::new(OperationLog::new());
        operations.insert(
            operation_id.to_string(),
            OperationEntry {
                log: log.clone(),
                summary: OperationSummary {
                    id: operation_id.to_string(),
                    kind: kind.to_string(),
                    environment: environment.to_string(),
                    status: OperationStatus::Running,
                    started_at: Utc::now(),
                    finished_at: None,
                },
            },
        );
        tracing::debug!(operation = %operation_id, kind, environment, "Registered operation log");

        log
    }

    pub async fn subscribe(&self, operation_id: &str) -> Option<broadcast::Receiver<LogLine>> {
        let operations = self.operations.read().await;
        operations.get(operation_id).map(|e| e.log.subscribe())
    }

    pub async fn get(&self, operation_id: &str) -> Option<Arc<OperationLog>> {
        let operations = self.operations.read().await;
        operations.get(operation_id).map(|e| e.log.clone())
    }

    /// 记录操作结果
    pub async fn finish(&self, operation_id: &str, succeeded: bool) {
        let mut operations = self.operations.write().await;
        if let Some(entry) = operations.get_mut(operation_id) {
            entry.summary.status = if succeeded {
                OperationStatus::Succeeded
            } else {
                OperationStatus::Failed
            };
            entry.summary.finished_at = Some(Utc::now());
        }
    }

    pub async fn summary(&self, operation_id: &str) -> Option<OperationSummary> {
        let operations = self.operations.read().await;
        operations.get(operation_id).map(|e| e.summary.clone())
    }

    /// 移除已结束且没有订阅者的记录，返回移除数量
    pub async fn cleanup(&self) -> usize {
        let mut operations = self.operations.write().await;
        let before = operations.len();
        operations.retain(|_, e| e.summary.status == OperationStatus::Running || e.log.receiver_count() > 0);
        before - operations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::operation_log::LogSink;

    #[tokio::test]
    async fn test_create_returns_same_log_for_same_id() {
        let hub = LogHub::new();

        let log = hub.create("op-1", "deploy", "shop/prod").await;
        let mut receiver = hub.subscribe("op-1").await.unwrap();
        log.stdout("Deploying abc123 to prod");

        let line = receiver.recv().await.unwrap();
        assert_eq!(line.content, "Deploying abc123 to prod");

        let again = hub.create("op-1", "deploy", "shop/prod").await;
        assert_eq!(again.content(), "Deploying abc123 to prod");
        assert!(Arc::ptr_eq(&log, &again));
    }

    #[tokio::test]
    async fn test_finish_records_outcome() {
        let hub = LogHub::new();
        hub.create("op-1", "backup", "shop/prod").await;
        hub.create("op-2", "restore", "shop/staging").await;

        let running = hub.summary("op-1").await.unwrap();
        assert_eq!(running.status, OperationStatus::Running);
        assert_eq!(running.environment, "shop/prod");
        assert!(running.finished_at.is_none());

        hub.finish("op-1", false).await;
        let summary = hub.summary("op-1").await.unwrap();
        assert_eq!(summary.status, OperationStatus::Failed);
        assert!(summary.finished_at.is_some());
        assert_eq!(hub.summary("op-2").await.unwrap().status, OperationStatus::Running);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_running_and_subscribed() {
        let hub = LogHub::new();
        hub.create("running", "deploy", "shop/prod").await;
        hub.create("watched", "deploy", "shop/prod").await;
        hub.create("done", "deploy", "shop/prod").await;

        let _receiver = hub.subscribe("watched").await;
        hub.finish("watched", true).await;
        hub.finish("done", true).await;

        assert_eq!(hub.cleanup().await, 1);
        assert!(hub.get("done").await.is_none());
        assert!(hub.get("watched").await.is_some());
        assert!(hub.get("running").await.is_some());
    }
}

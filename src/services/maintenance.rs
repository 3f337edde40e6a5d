//! 维护模式控制
//!
//! 维护页面开关影响线上流量，失败必须上报给调用方，不能静默忽略

use std::sync::Arc;

use crate::domain::environment::Environment;
use crate::error::{MaintenanceAction, OrchestratorError};
use crate::infra::command::TaskExecutor;
use crate::infra::remote_task::{actions, roles, RemoteTaskBuilder};
use crate::state::operation_log::LogSink;

#[derive(Clone)]
pub struct MaintenanceController {
    executor: Arc<dyn TaskExecutor>,
    builder: RemoteTaskBuilder,
}

impl MaintenanceController {
    pub fn new(executor: Arc<dyn TaskExecutor>, builder: RemoteTaskBuilder) -> Self {
        Self { executor, builder }
    }

    /// 开启维护页面
    pub async fn enable(&self, environment: &Environment, log: &dyn LogSink) -> Result<(), OrchestratorError> {
        self.toggle(MaintenanceAction::Enable, environment, log).await
    }

    /// 关闭维护页面
    pub async fn disable(&self, environment: &Environment, log: &dyn LogSink) -> Result<(), OrchestratorError> {
        self.toggle(MaintenanceAction::Disable, environment, log).await
    }

    async fn toggle(
        &self,
        action: MaintenanceAction,
        environment: &Environment,
        log: &dyn LogSink,
    ) -> Result<(), OrchestratorError> {
        let task_name = match action {
            MaintenanceAction::Enable => actions::MAINTENANCE_ENABLE,
            MaintenanceAction::Disable => actions::MAINTENANCE_DISABLE,
        };
        let task = self
            .builder
            .build(task_name, roles::WEB, environment, Vec::new(), log);

        match task.run(self.executor.as_ref(), log).await {
            Ok(()) => {
                let message = match action {
                    MaintenanceAction::Enable => format!("Maintenance mode enabled on {}", environment),
                    MaintenanceAction::Disable => format!("Maintenance mode disabled on {}", environment),
                };
                log.stdout(&message);
                tracing::info!(environment = %environment.key(), %action, "Maintenance mode toggled");
                Ok(())
            }
            Err(failure) => {
                log.stderr(&format!("Failed to {} maintenance mode on {}", action, environment));
                tracing::error!(environment = %environment.key(), %action, error = %failure, "Maintenance toggle failed");
                Err(OrchestratorError::Maintenance { action, failure })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepFailure;
    use crate::state::operation_log::OperationLog;
    use crate::test_support::{prod_environment, FakeExecutor};

    fn controller(executor: Arc<FakeExecutor>) -> MaintenanceController {
        MaintenanceController::new(executor, RemoteTaskBuilder::new("dep", "/var/history"))
    }

    #[tokio::test]
    async fn test_enable_runs_web_task_and_confirms() {
        let executor = Arc::new(FakeExecutor::new());
        let log = OperationLog::new();

        controller(executor.clone())
            .enable(&prod_environment(), &log)
            .await
            .unwrap();

        assert_eq!(executor.actions(), vec![actions::MAINTENANCE_ENABLE]);
        assert!(executor
            .rendered(actions::MAINTENANCE_ENABLE)
            .unwrap()
            .contains("maintenance:enable web"));
        assert!(log.contains("Maintenance mode enabled on prod"));
    }

    #[tokio::test]
    async fn test_disable_failure_carries_output() {
        let executor = Arc::new(FakeExecutor::new().fail_with(actions::MAINTENANCE_DISABLE, "ssh: connection refused"));
        let log = OperationLog::new();

        let err = controller(executor)
            .disable(&prod_environment(), &log)
            .await
            .unwrap_err();

        match err {
            OrchestratorError::Maintenance { action, failure } => {
                assert_eq!(action, MaintenanceAction::Disable);
                assert_eq!(
                    failure,
                    StepFailure::Remote {
                        output: "ssh: connection refused".to_string()
                    }
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!log.contains("Maintenance mode disabled"));
    }
}

//! 部署编排
//!
//! 顺序：deployStart 回调 → 开启维护 → [生成部署包] → deploy → deploy:cleanup（总是执行）
//! → 处理维护页面 → deployEnd 回调。
//! deploy 失败时清理和维护页面处理照常进行，最终报告 `Deploy` 错误

pub mod hooks;
pub mod package;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::env::AlertConfig;
use crate::domain::deploy::DeployRequest;
use crate::domain::environment::Environment;
use crate::error::OrchestratorError;
use crate::infra::alert::{AlertSender, OperatorAlert};
use crate::infra::command::TaskExecutor;
use crate::infra::remote_task::{actions, roles, RemoteTaskBuilder};
use crate::services::maintenance::MaintenanceController;
use crate::state::env_locks::EnvironmentLocks;
use crate::state::operation_log::LogSink;

pub use hooks::{DeployEvent, DeployHooks, DeployObserver, HistoryObserver};
pub use package::{CommandPackageGenerator, PackageGenerator};

/// 部署编排器
pub struct DeployOrchestrator {
    executor: Arc<dyn TaskExecutor>,
    builder: RemoteTaskBuilder,
    maintenance: MaintenanceController,
    hooks: DeployHooks,
    package_generator: Option<Arc<dyn PackageGenerator>>,
    alert: AlertConfig,
    alert_sender: Option<Arc<dyn AlertSender>>,
    locks: Arc<EnvironmentLocks>,
    cancel_token: CancellationToken,
}

impl DeployOrchestrator {
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        builder: RemoteTaskBuilder,
        locks: Arc<EnvironmentLocks>,
    ) -> Self {
        Self {
            maintenance: MaintenanceController::new(executor.clone(), builder.clone()),
            executor,
            builder,
            hooks: DeployHooks::new(),
            package_generator: None,
            alert: AlertConfig::default(),
            alert_sender: None,
            locks,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: DeployHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_package_generator(mut self, generator: Arc<dyn PackageGenerator>) -> Self {
        self.package_generator = Some(generator);
        self
    }

    pub fn with_alerts(mut self, alert: AlertConfig, sender: Option<Arc<dyn AlertSender>>) -> Self {
        self.alert = alert;
        self.alert_sender = sender;
        self
    }

    /// 取消只在步骤之间生效，不会中断正在执行的远端命令
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// 执行一次完整部署
    pub async fn deploy(
        &self,
        environment: &Environment,
        request: &DeployRequest,
        log: &dyn LogSink,
    ) -> Result<(), OrchestratorError> {
        let _lease = self.locks.try_acquire(&environment.key())?;
        let event = DeployEvent {
            environment,
            request,
        };

        self.hooks.deploy_start(&event)?;

        log.stdout(&format!("Deploying {} to {}", request.build, environment));
        info!(environment = %environment.key(), build = %request.build, "Starting deployment");

        self.maintenance.enable(environment, log).await?;

        let mut args = vec![("build".to_string(), request.build.clone())];
        if let Some(ref generator) = self.package_generator {
            log.stdout(&format!("Generating package for {}", request.build));
            let package = match generator.generate(&request.build, log).await {
                Ok(Some(path)) => path,
                Ok(None) => {
                    log.stderr("Package generation produced no artifact");
                    return Err(OrchestratorError::PackageGeneration(format!(
                        "no package produced for build {}",
                        request.build
                    )));
                }
                Err(e) => {
                    log.stderr(&format!("Package generation failed: {}", e));
                    return Err(OrchestratorError::PackageGeneration(e.to_string()));
                }
            };
            log.stdout(&format!("Package ready: {}", package.display()));
            args.push(("package".to_string(), package.display().to_string()));
        }

        if self.cancel_token.is_cancelled() {
            log.stderr("=== Deployment CANCELLED ===");
            return Err(OrchestratorError::Cancelled("deploy"));
        }

        let task = self
            .builder
            .build(actions::DEPLOY, roles::WEB, environment, args, log);
        let deploy_result = task.run(self.executor.as_ref(), log).await;
        match deploy_result {
            Ok(()) => log.stdout("Deploy command finished"),
            Err(ref failure) => {
                log.stderr(&format!("Deploy command failed: {}", failure));
                error!(environment = %environment.key(), error = %failure, "Deploy command failed");
            }
        }

        self.cleanup(environment, log).await;

        let maintenance_result = self
            .resolve_maintenance(environment, request, deploy_result.is_ok(), log)
            .await;

        if let Err(failure) = deploy_result {
            if let Err(e) = maintenance_result {
                warn!(environment = %environment.key(), error = %e, "Maintenance resolution failed after failed deploy");
            }
            log.stderr(&format!("=== Deployment of {} to {} FAILED ===", request.build, environment));
            return Err(OrchestratorError::Deploy(failure));
        }
        maintenance_result?;

        self.hooks.deploy_end(&event)?;

        log.stdout(&format!("=== Deployed {} to {} ===", request.build, environment));
        info!(environment = %environment.key(), build = %request.build, "Deployment finished");
        Ok(())
    }

    /// 部署后清理，失败不影响部署结果，但需要告警
    async fn cleanup(&self, environment: &Environment, log: &dyn LogSink) {
        let task = self
            .builder
            .build(actions::DEPLOY_CLEANUP, roles::WEB, environment, Vec::new(), log);

        let failure = match task.run(self.executor.as_ref(), log).await {
            Ok(()) => {
                log.stdout("Cleanup finished");
                return;
            }
            Err(failure) => failure,
        };

        log.stderr(&format!("Cleanup failed: {}", failure));
        warn!(environment = %environment.key(), error = %failure, "Post-deploy cleanup failed");

        let Some(ref recipient) = self.alert.recipient else {
            warn!(environment = %environment.key(), "No alert recipient configured, cleanup failure only logged");
            return;
        };
        let Some(ref sender) = self.alert_sender else {
            warn!(recipient = %recipient, "Alert recipient configured without a delivery channel");
            return;
        };

        let alert = OperatorAlert::cleanup_failed(
            recipient,
            &environment.project.name,
            &environment.name,
            &log.content(),
        );
        match sender.send(&alert).await {
            Ok(()) => log.stdout(&format!("Operator alert sent to {}", recipient)),
            Err(e) => {
                log.stderr(&format!("Failed to send operator alert: {}", e));
                warn!(error = %e, "Failed to send operator alert");
            }
        }
    }

    /// 处理维护页面
    ///
    /// 要求保留时重新开启；否则只在部署成功（或明确要求失败时也关闭）时关闭
    async fn resolve_maintenance(
        &self,
        environment: &Environment,
        request: &DeployRequest,
        deployed: bool,
        log: &dyn LogSink,
    ) -> Result<(), OrchestratorError> {
        if request.leave_maintenance_page {
            log.stdout("Leaving maintenance page enabled as requested");
            return self.maintenance.enable(environment, log).await;
        }
        if deployed || request.disable_maintenance_on_failure {
            return self.maintenance.disable(environment, log).await;
        }
        log.stderr("Deploy failed, leaving maintenance page enabled for inspection");
        Ok(())
    }

    /// 预检（deploy:check）
    pub async fn check(&self, environment: &Environment, log: &dyn LogSink) -> Result<(), OrchestratorError> {
        let task = self
            .builder
            .build(actions::DEPLOY_CHECK, roles::WEB, environment, Vec::new(), log);
        match task.run(self.executor.as_ref(), log).await {
            Ok(()) => {
                log.stdout(&format!("Pre-flight check passed for {}", environment));
                Ok(())
            }
            Err(failure) => {
                log.stderr(&format!("Pre-flight check failed for {}", environment));
                Err(OrchestratorError::Check(failure))
            }
        }
    }

    /// 单独切换维护页面
    pub async fn set_maintenance(
        &self,
        environment: &Environment,
        enabled: bool,
        log: &dyn LogSink,
    ) -> Result<(), OrchestratorError> {
        let _lease = self.locks.try_acquire(&environment.key())?;
        if enabled {
            self.maintenance.enable(environment, log).await
        } else {
            self.maintenance.disable(environment, log).await
        }
    }
}

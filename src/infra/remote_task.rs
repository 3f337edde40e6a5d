//! 远端任务构建
//!
//! 把 (任务名, 角色, 环境, 参数) 组装成一次远端任务执行器调用。
//! 每次调用都新建一个 `RemoteTask`，构建后不再修改

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::config::env::constants::COMMAND_TIMEOUT_SECS;
use crate::domain::environment::Environment;
use crate::error::StepFailure;
use crate::state::operation_log::LogSink;

use super::command::{is_valid_env_name, shell_quote, CommandLine, TaskExecutor};

/// 远端任务名
pub mod actions {
    pub const DEPLOY: &str = "deploy";
    pub const DEPLOY_CLEANUP: &str = "deploy:cleanup";
    pub const DEPLOY_CHECK: &str = "deploy:check";
    pub const DEPLOY_MIGRATE: &str = "deploy:migrate";
    pub const MAINTENANCE_ENABLE: &str = "maintenance:enable";
    pub const MAINTENANCE_DISABLE: &str = "maintenance:disable";
    pub const DATA_GET_DB: &str = "data:getdb";
    pub const DATA_GET_ASSETS: &str = "data:getassets";
    pub const DATA_PUSH_DB: &str = "data:pushdb";
    pub const DATA_PUSH_ASSETS: &str = "data:pushassets";
}

/// 角色选择器
pub mod roles {
    pub const WEB: &str = "web";
    pub const DB: &str = "db";
}

/// 一次远端任务调用
#[derive(Debug, Clone)]
pub struct RemoteTask {
    pub action: String,
    pub role: String,
    pub environment: String,
    /// 有序参数
    pub args: Vec<(String, String)>,
    /// 已转义的环境变量串，如 `APP_ENV=prod DB_PASS='x y'`
    pub env_string: String,
    pub timeout: Duration,
    command_line: CommandLine,
}

impl RemoteTask {
    pub fn command_line(&self) -> &CommandLine {
        &self.command_line
    }

    /// 渲染后的完整调用
    pub fn invocation(&self) -> String {
        self.command_line.render()
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 执行任务，失败统一转换为 `StepFailure`
    pub async fn run(&self, executor: &dyn TaskExecutor, log: &dyn LogSink) -> Result<(), StepFailure> {
        match executor.execute(&self.command_line, self.timeout, log).await {
            Ok(outcome) if outcome.success => Ok(()),
            Ok(outcome) => Err(StepFailure::from_outcome(&outcome)),
            Err(e) => {
                log.stderr(&format!("Failed to start {}: {}", self.action, e));
                Err(StepFailure::from(e))
            }
        }
    }
}

/// 远端任务构建器
#[derive(Debug, Clone)]
pub struct RemoteTaskBuilder {
    /// 远端任务执行器程序
    runner: String,
    /// 传给执行器的 recipe 文件
    recipe: Option<PathBuf>,
    /// 本地操作历史目录，总是以 `history_path` 参数注入
    history_dir: PathBuf,
}

impl RemoteTaskBuilder {
    pub fn new(runner: impl Into<String>, history_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner: runner.into(),
            recipe: None,
            history_dir: history_dir.into(),
        }
    }

    pub fn with_recipe(mut self, recipe: impl Into<PathBuf>) -> Self {
        self.recipe = Some(recipe.into());
        self
    }

    /// 构建远端任务
    ///
    /// 项目没有可解析的环境变量时记录警告并继续（不注入变量）。
    /// 构建完成后把调用串写入操作日志以便审计
    pub fn build(
        &self,
        action: &str,
        role: &str,
        environment: &Environment,
        args: Vec<(String, String)>,
        log: &dyn LogSink,
    ) -> RemoteTask {
        let variables: Vec<(String, String)> = match environment.resolve_variables() {
            Ok(vars) => vars
                .iter()
                .filter(|(key, _)| {
                    let valid = is_valid_env_name(key);
                    if !valid {
                        warn!(variable = %key, "Skipping invalid environment variable name");
                    }
                    valid
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Err(e) => {
                warn!(environment = %environment.key(), error = %e, "Proceeding without injected variables");
                log.stderr(&format!("Warning: {}", e));
                Vec::new()
            }
        };

        let mut all_args = vec![(
            "history_path".to_string(),
            self.history_dir.display().to_string(),
        )];
        all_args.extend(args);

        let mut line = CommandLine::new(&self.runner).arg(action).arg(role);
        if let Some(ref recipe) = self.recipe {
            line = line.arg(format!("--file={}", recipe.display()));
        }
        line = line
            .arg("--no-interaction")
            .arg("-o")
            .arg(format!("environment={}", environment.name));
        for (key, value) in &all_args {
            line = line.arg("-o").arg(format!("{}={}", key, value));
        }
        for (key, value) in &variables {
            line = line.env(key, value);
        }

        let env_string = variables
            .iter()
            .map(|(k, v)| format!("{}={}", k, shell_quote(v)))
            .collect::<Vec<_>>()
            .join(" ");

        let task = RemoteTask {
            action: action.to_string(),
            role: role.to_string(),
            environment: environment.name.clone(),
            args: all_args,
            env_string,
            timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
            command_line: line,
        };

        log.stdout(&format!(">>> {}", task.invocation()));
        task
    }
}

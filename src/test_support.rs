//! 测试辅助
//!
//! 记录所有命令并按任务名返回预设结果的假执行器

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::environment::{Environment, Project};
use crate::infra::alert::{AlertError, AlertSender, OperatorAlert};
use crate::infra::command::{CommandError, CommandLine, CommandOutcome, TaskExecutor};
use crate::state::operation_log::LogSink;

type Effect = Box<dyn Fn(&CommandLine) + Send + Sync>;

enum Scripted {
    Fail(String),
    Unlaunchable,
    TimedOut,
}

#[derive(Default)]
pub struct FakeExecutor {
    scripted: HashMap<String, Scripted>,
    effects: HashMap<String, Effect>,
    calls: Mutex<Vec<CommandLine>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(mut self, action: &str, output: &str) -> Self {
        self.scripted
            .insert(action.to_string(), Scripted::Fail(output.to_string()));
        self
    }

    pub fn unlaunchable(mut self, action: &str) -> Self {
        self.scripted.insert(action.to_string(), Scripted::Unlaunchable);
        self
    }

    pub fn time_out(mut self, action: &str) -> Self {
        self.scripted.insert(action.to_string(), Scripted::TimedOut);
        self
    }

    /// 执行到某个任务时运行的副作用（如创建输出文件）
    pub fn with_effect(
        mut self,
        action: &str,
        effect: impl Fn(&CommandLine) + Send + Sync + 'static,
    ) -> Self {
        self.effects.insert(action.to_string(), Box::new(effect));
        self
    }

    pub fn calls(&self) -> Vec<CommandLine> {
        self.calls.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.action().map(str::to_string))
            .collect()
    }

    pub fn count(&self, action: &str) -> usize {
        self.actions().iter().filter(|a| a.as_str() == action).count()
    }

    /// 某任务第一次调用的完整命令行
    pub fn rendered(&self, action: &str) -> Option<String> {
        self.calls()
            .iter()
            .find(|c| c.action() == Some(action))
            .map(|c| c.render())
    }
}

#[async_trait]
impl TaskExecutor for FakeExecutor {
    async fn execute(
        &self,
        command: &CommandLine,
        timeout: Duration,
        log: &dyn LogSink,
    ) -> Result<CommandOutcome, CommandError> {
        self.calls.lock().unwrap().push(command.clone());
        let action = command.action().unwrap_or_default().to_string();

        match self.scripted.get(&action) {
            Some(Scripted::Fail(output)) => {
                log.stderr(output);
                Ok(CommandOutcome::failed(1, output.clone()))
            }
            Some(Scripted::Unlaunchable) => Err(CommandError::SpawnFailed(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "runner not found",
            ))),
            Some(Scripted::TimedOut) => Ok(CommandOutcome::timed_out(timeout)),
            None => {
                if let Some(effect) = self.effects.get(&action) {
                    effect(command);
                }
                log.stdout(&format!("{} ok", action));
                Ok(CommandOutcome::succeeded())
            }
        }
    }
}

/// 只记录不投递的告警发送器
#[derive(Default)]
pub struct RecordingAlertSender {
    alerts: Mutex<Vec<OperatorAlert>>,
}

impl RecordingAlertSender {
    pub fn alerts(&self) -> Vec<OperatorAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSender for RecordingAlertSender {
    async fn send(&self, alert: &OperatorAlert) -> Result<(), AlertError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

pub fn prod_environment() -> Environment {
    Environment::new(Arc::new(Project::new("shop")), "prod")
        .with_full_name("prod")
        .with_variable("APP_ENV", "production")
}

/// 从 `--key=value` 形式的参数中取值
pub fn flag_value(command: &CommandLine, flag: &str) -> Option<String> {
    let prefix = format!("{}=", flag);
    command
        .args
        .iter()
        .find_map(|a| a.strip_prefix(&prefix).map(str::to_string))
}

/// 从 `-o key=value` 形式的远端参数中取值
pub fn option_value(command: &CommandLine, key: &str) -> Option<String> {
    let prefix = format!("{}=", key);
    command
        .args
        .windows(2)
        .find_map(|w| (w[0] == "-o").then(|| w[1].strip_prefix(&prefix).map(str::to_string)).flatten())
}

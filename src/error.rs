//! 统一错误处理
//!
//! `OrchestratorError` 覆盖编排过程中所有对调用方可见的失败类型，
//! 每个主步骤失败都携带远端输出（`StepFailure`）

use std::fmt;

use thiserror::Error;

use crate::infra::command::{CommandError, CommandOutcome};

/// 步骤失败详情
///
/// 区分"命令执行了但报告失败"与"命令根本无法启动"，两者都按步骤失败处理
#[derive(Debug, Clone, PartialEq)]
pub enum StepFailure {
    /// 远端命令以非零状态退出
    Remote { output: String },
    /// 超过命令超时时间
    TimedOut { after_secs: u64 },
    /// 无法启动命令
    Invocation { message: String },
}

impl StepFailure {
    /// 从执行结果构造（仅在失败时调用）
    pub fn from_outcome(outcome: &CommandOutcome) -> Self {
        if outcome.timed_out {
            Self::TimedOut {
                after_secs: outcome.elapsed_secs,
            }
        } else {
            Self::Remote {
                output: outcome.error_output.clone(),
            }
        }
    }

    /// 捕获到的输出或错误描述
    pub fn output(&self) -> String {
        match self {
            Self::Remote { output } => output.clone(),
            Self::TimedOut { after_secs } => format!("command timed out after {}s", after_secs),
            Self::Invocation { message } => message.clone(),
        }
    }
}

impl From<CommandError> for StepFailure {
    fn from(err: CommandError) -> Self {
        Self::Invocation {
            message: err.to_string(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { output } if output.is_empty() => write!(f, "remote command failed"),
            Self::Remote { output } => write!(f, "remote command failed: {}", output),
            Self::TimedOut { after_secs } => write!(f, "command timed out after {}s", after_secs),
            Self::Invocation { message } => write!(f, "could not invoke command: {}", message),
        }
    }
}

/// 无法为项目解析环境变量（非致命，命令在没有注入变量的情况下继续）
#[derive(Debug, Clone, Error)]
#[error("configuration error: {0}")]
pub struct ConfigurationError(pub String);

/// 维护模式操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceAction {
    Enable,
    Disable,
}

impl fmt::Display for MaintenanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaintenanceAction::Enable => write!(f, "enable"),
            MaintenanceAction::Disable => write!(f, "disable"),
        }
    }
}

/// 编排错误
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to {action} maintenance mode: {failure}")]
    Maintenance {
        action: MaintenanceAction,
        failure: StepFailure,
    },

    #[error("package generation failed: {0}")]
    PackageGeneration(String),

    #[error("deploy failed: {0}")]
    Deploy(StepFailure),

    #[error("pre-flight check failed: {0}")]
    Check(StepFailure),

    #[error("backup failed during {step}: {failure}")]
    Backup {
        step: &'static str,
        failure: StepFailure,
    },

    #[error("packaging failed: {0}")]
    Packaging(StepFailure),

    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("restore failed during {step}: {failure}")]
    Restore {
        step: &'static str,
        failure: StepFailure,
    },

    #[error("rebuild failed: {0}")]
    Rebuild(StepFailure),

    #[error("cleanup failed: {0}")]
    Cleanup(String),

    #[error("hook {hook} failed: {message}")]
    Hook { hook: &'static str, message: String },

    #[error("environment {0} already has an operation in progress")]
    Busy(String),

    #[error("operation cancelled before {0}")]
    Cancelled(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// 步骤失败时捕获的远端输出
    pub fn captured_output(&self) -> Option<String> {
        match self {
            Self::Maintenance { failure, .. }
            | Self::Deploy(failure)
            | Self::Check(failure)
            | Self::Backup { failure, .. }
            | Self::Packaging(failure)
            | Self::Restore { failure, .. }
            | Self::Rebuild(failure) => Some(failure.output()),
            _ => None,
        }
    }

    /// 简短的错误类型标识
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Maintenance { .. } => "maintenance",
            Self::PackageGeneration(_) => "package_generation",
            Self::Deploy(_) => "deploy",
            Self::Check(_) => "check",
            Self::Backup { .. } => "backup",
            Self::Packaging(_) => "packaging",
            Self::InvalidArchive(_) => "invalid_archive",
            Self::Restore { .. } => "restore",
            Self::Rebuild(_) => "rebuild",
            Self::Cleanup(_) => "cleanup",
            Self::Hook { .. } => "hook",
            Self::Busy(_) => "busy",
            Self::Cancelled(_) => "cancelled",
            Self::Io(_) => "io",
        }
    }
}

/// 便捷类型别名
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failure_output() {
        let failure = StepFailure::Remote {
            output: "permission denied".to_string(),
        };
        assert_eq!(failure.output(), "permission denied");

        let failure = StepFailure::TimedOut { after_secs: 3600 };
        assert!(failure.output().contains("3600"));
    }

    #[test]
    fn test_captured_output_only_for_step_errors() {
        let err = OrchestratorError::Deploy(StepFailure::Remote {
            output: "boom".to_string(),
        });
        assert_eq!(err.captured_output(), Some("boom".to_string()));
        assert_eq!(err.kind(), "deploy");

        let err = OrchestratorError::Busy("shop/prod".to_string());
        assert!(err.captured_output().is_none());
    }

    #[test]
    fn test_maintenance_error_message() {
        let err = OrchestratorError::Maintenance {
            action: MaintenanceAction::Disable,
            failure: StepFailure::Invocation {
                message: "No such file".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "failed to disable maintenance mode: could not invoke command: No such file"
        );
    }
}

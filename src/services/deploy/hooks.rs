//! 部署前后回调
//!
//! 按注册顺序同步调用；开始回调失败时在任何副作用之前中止部署

use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::deploy::DeployRequest;
use crate::domain::environment::Environment;
use crate::error::OrchestratorError;

/// 回调参数
pub struct DeployEvent<'a> {
    pub environment: &'a Environment,
    pub request: &'a DeployRequest,
}

/// 部署观察者
pub trait DeployObserver: Send + Sync {
    fn deploy_start(&self, _event: &DeployEvent<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn deploy_end(&self, _event: &DeployEvent<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 有序的观察者列表
#[derive(Clone, Default)]
pub struct DeployHooks {
    observers: Vec<Arc<dyn DeployObserver>>,
}

impl DeployHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn DeployObserver>) {
        self.observers.push(observer);
    }

    pub fn deploy_start(&self, event: &DeployEvent<'_>) -> Result<(), OrchestratorError> {
        for observer in &self.observers {
            observer.deploy_start(event).map_err(|e| OrchestratorError::Hook {
                hook: "deployStart",
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn deploy_end(&self, event: &DeployEvent<'_>) -> Result<(), OrchestratorError> {
        for observer in &self.observers {
            observer.deploy_end(event).map_err(|e| OrchestratorError::Hook {
                hook: "deployEnd",
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct HistoryRecord<'a> {
    timestamp: String,
    event: &'a str,
    project: &'a str,
    environment: &'a str,
    build: &'a str,
}

/// 把部署开始 / 结束写入本地历史目录（deploys.jsonl）
pub struct HistoryObserver {
    history_dir: PathBuf,
}

impl HistoryObserver {
    pub fn new(history_dir: impl Into<PathBuf>) -> Self {
        Self {
            history_dir: history_dir.into(),
        }
    }

    pub fn history_file(&self) -> PathBuf {
        self.history_dir.join("deploys.jsonl")
    }

    fn record(&self, event: &str, deploy: &DeployEvent<'_>) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.history_dir)?;
        let record = HistoryRecord {
            timestamp: Utc::now().to_rfc3339(),
            event,
            project: &deploy.environment.project.name,
            environment: &deploy.environment.name,
            build: &deploy.request.build,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_file())?;
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
        Ok(())
    }
}

impl DeployObserver for HistoryObserver {
    fn deploy_start(&self, event: &DeployEvent<'_>) -> anyhow::Result<()> {
        self.record("deploy_start", event)
    }

    fn deploy_end(&self, event: &DeployEvent<'_>) -> anyhow::Result<()> {
        self.record("deploy_end", event)
    }
}

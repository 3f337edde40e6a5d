//! 部署相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 日志行
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: String, // stdout | stderr
    pub content: String,
}

impl LogLine {
    /// 创建新日志行
    pub fn new(stream: &str, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: stream.to_string(),
            content: content.into(),
        }
    }

    /// 创建 stdout 日志行
    pub fn stdout(content: impl Into<String>) -> Self {
        Self::new("stdout", content)
    }

    /// 创建 stderr 日志行
    pub fn stderr(content: impl Into<String>) -> Self {
        Self::new("stderr", content)
    }

    pub fn is_stderr(&self) -> bool {
        self.stream == "stderr"
    }
}

/// 部署请求
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployRequest {
    /// 版本 / 构建标识（commit hash、tag 等）
    pub build: String,
    /// 部署结束后保持维护页面
    #[serde(default)]
    pub leave_maintenance_page: bool,
    /// 部署失败时也关闭维护页面（默认失败时保留，便于排查）
    #[serde(default)]
    pub disable_maintenance_on_failure: bool,
}

impl DeployRequest {
    pub fn new(build: impl Into<String>) -> Self {
        Self {
            build: build.into(),
            leave_maintenance_page: false,
            disable_maintenance_on_failure: false,
        }
    }

    pub fn leave_maintenance_page(mut self, leave: bool) -> Self {
        self.leave_maintenance_page = leave;
        self
    }

    pub fn disable_maintenance_on_failure(mut self, disable: bool) -> Self {
        self.disable_maintenance_on_failure = disable;
        self
    }
}

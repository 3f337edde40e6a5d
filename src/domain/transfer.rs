//! 数据传输模型

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::environment::Environment;

/// 传输方向
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 从环境拉取数据（备份）
    Pull,
    /// 向环境推送数据（恢复）
    Push,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Pull => "pull",
            Direction::Push => "push",
        }
    }
}

/// 数据范围
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    All,
    Db,
    Assets,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::All => "all",
            TransferMode::Db => "db",
            TransferMode::Assets => "assets",
        }
    }

    pub fn includes_db(&self) -> bool {
        matches!(self, TransferMode::All | TransferMode::Db)
    }

    pub fn includes_assets(&self) -> bool {
        matches!(self, TransferMode::All | TransferMode::Assets)
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(TransferMode::All),
            "db" => Ok(TransferMode::Db),
            "assets" => Ok(TransferMode::Assets),
            other => Err(format!("unknown transfer mode: {}", other)),
        }
    }
}

/// 一次数据传输请求
///
/// 由调用方创建，状态也由调用方维护；编排器只报告成功或失败
#[derive(Clone, Debug)]
pub struct DataTransfer {
    pub id: String,
    pub direction: Direction,
    pub mode: TransferMode,
    pub environment: Environment,
    pub author: String,
}

impl DataTransfer {
    pub fn new(
        direction: Direction,
        mode: TransferMode,
        environment: Environment,
        author: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            direction,
            mode,
            environment,
            author: author.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_scope() {
        assert!(TransferMode::All.includes_db());
        assert!(TransferMode::All.includes_assets());
        assert!(TransferMode::Db.includes_db());
        assert!(!TransferMode::Db.includes_assets());
        assert!(!TransferMode::Assets.includes_db());
        assert!(TransferMode::Assets.includes_assets());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("db".parse::<TransferMode>(), Ok(TransferMode::Db));
        assert!("everything".parse::<TransferMode>().is_err());
        assert_eq!(
            serde_json::to_string(&TransferMode::Assets).unwrap(),
            "\"assets\""
        );
    }
}

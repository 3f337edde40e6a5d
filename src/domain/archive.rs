//! 数据归档模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::environment::Environment;
use super::transfer::TransferMode;

/// 打包后的数据快照
///
/// 文件可能暂缺：等待人工上传的归档处于 pending 状态，通过 `upload_token` 关联上传
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DataArchive {
    pub id: String,
    pub mode: TransferMode,
    pub project: String,
    /// 数据来源环境
    pub origin_environment: String,
    /// 数据所属环境
    pub environment: String,
    pub author: String,
    pub is_backup: bool,
    /// 内容哈希 (sha256 hex)
    pub content_hash: Option<String>,
    /// 归档文件
    pub file: Option<PathBuf>,
    /// 人工上传令牌
    pub upload_token: Option<String>,
    /// 关联过的传输 ID
    #[serde(default)]
    pub transfer_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl DataArchive {
    /// 备份流程使用的占位归档（尚无文件）
    pub fn backup_placeholder(mode: TransferMode, author: &str, environment: &Environment) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            mode,
            project: environment.project.name.clone(),
            origin_environment: environment.name.clone(),
            environment: environment.name.clone(),
            author: author.to_string(),
            is_backup: true,
            content_hash: None,
            file: None,
            upload_token: None,
            transfer_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// 等待人工上传的归档
    pub fn pending(
        mode: TransferMode,
        author: &str,
        environment: &Environment,
        upload_token: String,
    ) -> Self {
        Self {
            is_backup: false,
            upload_token: Some(upload_token),
            ..Self::backup_placeholder(mode, author, environment)
        }
    }

    pub fn is_pending(&self) -> bool {
        self.file.is_none()
    }

    /// 登记打包完成的文件
    pub fn register_file(&mut self, file: PathBuf, content_hash: String) {
        self.file = Some(file);
        self.content_hash = Some(content_hash);
        self.upload_token = None;
    }

    /// 关联传输（同一归档可被多次传输复用）
    pub fn associate_transfer(&mut self, transfer_id: &str) {
        if !self.transfer_ids.iter().any(|id| id == transfer_id) {
            self.transfer_ids.push(transfer_id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::environment::Project;
    use std::sync::Arc;

    fn env() -> Environment {
        Environment::new(Arc::new(Project::new("shop")), "staging")
    }

    #[test]
    fn test_placeholder_is_pending_until_registered() {
        let mut archive = DataArchive::backup_placeholder(TransferMode::Db, "alice", &env());
        assert!(archive.is_pending());
        assert!(archive.is_backup);
        assert_eq!(archive.origin_environment, "staging");

        archive.register_file(PathBuf::from("/tmp/a.tar.gz"), "abc".to_string());
        assert!(!archive.is_pending());
        assert_eq!(archive.content_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn test_associate_transfer_deduplicates() {
        let mut archive = DataArchive::pending(TransferMode::All, "bob", &env(), "ABCD1234".into());
        assert!(!archive.is_backup);
        archive.associate_transfer("t1");
        archive.associate_transfer("t2");
        archive.associate_transfer("t1");
        assert_eq!(archive.transfer_ids, vec!["t1", "t2"]);
    }
}

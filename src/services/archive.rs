//! 归档打包辅助
//!
//! 文件命名、工作目录路径、内容哈希、上传令牌，以及归档元数据的持久化

use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::config::env::constants::UPLOAD_TOKEN_LEN;
use crate::domain::archive::DataArchive;
use crate::domain::transfer::TransferMode;
use crate::error::OrchestratorError;

const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 路径组件只保留 `[a-zA-Z0-9-_.]`，其余字符替换为 `_`
pub fn sanitize_component(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // 防止 "." / ".." 逃出目录
    if sanitized.chars().all(|c| c == '.') {
        sanitized.replace('.', "_")
    } else {
        sanitized
    }
}

/// 归档文件名：`{project}-{environment}-{mode}-{yyyymmdd}-{random}.tar.gz`
pub fn archive_file_name(
    project: &str,
    environment: &str,
    mode: TransferMode,
    date: NaiveDate,
    random: &str,
) -> String {
    format!(
        "{}-{}-{}-{}-{}.tar.gz",
        sanitize_component(project),
        sanitize_component(environment),
        mode,
        date.format("%Y%m%d"),
        sanitize_component(random)
    )
}

/// 随机后缀（8 位十六进制）
pub fn random_suffix() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

/// 传输工作目录：`{root}/{project}/{environment}/transfer-{id}/`
pub fn transfer_workdir_path(root: &Path, project: &str, environment: &str, transfer_id: &str) -> PathBuf {
    root.join(sanitize_component(project))
        .join(sanitize_component(environment))
        .join(format!("transfer-{}", sanitize_component(transfer_id)))
}

/// 计算文件 sha256（十六进制小写）
pub async fn content_hash(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// 生成 8 位大写字母数字上传令牌
pub fn generate_upload_token() -> String {
    let mut rng = rand::thread_rng();
    (0..UPLOAD_TOKEN_LEN)
        .map(|_| TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())] as char)
        .collect()
}

/// 归档元数据持久化接口
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// 保存归档记录，返回记录位置
    async fn save(&self, archive: &DataArchive) -> Result<PathBuf, OrchestratorError>;

    /// 删除记录（不存在时忽略）
    async fn remove(&self, archive: &DataArchive) -> Result<(), OrchestratorError>;
}

/// JSON 文件存储
///
/// 有文件的归档写在文件旁边（`<file>.json`），pending 归档写在 `<root>/<id>.json`
#[derive(Debug, Clone)]
pub struct JsonArchiveStore {
    root: PathBuf,
}

impl JsonArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_path(&self, archive: &DataArchive) -> PathBuf {
        match archive.file {
            Some(ref file) => PathBuf::from(format!("{}.json", file.display())),
            None => self.root.join(format!("{}.json", sanitize_component(&archive.id))),
        }
    }

    /// 读取元数据文件
    pub async fn load(path: &Path) -> Result<DataArchive, OrchestratorError> {
        let content = fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| {
            OrchestratorError::InvalidArchive(format!("unreadable metadata {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl ArchiveStore for JsonArchiveStore {
    async fn save(&self, archive: &DataArchive) -> Result<PathBuf, OrchestratorError> {
        let path = self.metadata_path(archive);
        let temp_path = path.with_extension("json.tmp");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(archive)
            .map_err(|e| OrchestratorError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        // 原子写入
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        info!(path = %path.display(), archive = %archive.id, "Saved archive metadata");
        Ok(path)
    }

    async fn remove(&self, archive: &DataArchive) -> Result<(), OrchestratorError> {
        let path = self.metadata_path(archive);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 用人工上传的文件完成一个 pending 归档
///
/// 令牌必须匹配；文件移动到归档目录后计算哈希并登记
pub async fn attach_upload(
    store: &dyn ArchiveStore,
    archive_root: &Path,
    archive: &mut DataArchive,
    token: &str,
    upload: &Path,
) -> Result<PathBuf, OrchestratorError> {
    if !archive.is_pending() {
        return Err(OrchestratorError::InvalidArchive(format!(
            "archive {} already has a file",
            archive.id
        )));
    }
    match archive.upload_token {
        Some(ref expected) if expected == token => {}
        _ => {
            warn!(archive = %archive.id, "Upload token mismatch");
            return Err(OrchestratorError::InvalidArchive(format!(
                "upload token does not match archive {}",
                archive.id
            )));
        }
    }

    let metadata = fs::metadata(upload).await?;
    if !metadata.is_file() || metadata.len() == 0 {
        return Err(OrchestratorError::InvalidArchive(format!(
            "uploaded file {} is empty or not a file",
            upload.display()
        )));
    }

    fs::create_dir_all(archive_root).await?;
    let dest = archive_root.join(archive_file_name(
        &archive.project,
        &archive.environment,
        archive.mode,
        archive.created_at.date_naive(),
        &random_suffix(),
    ));
    move_file(upload, &dest).await?;

    let hash = content_hash(&dest).await?;

    // pending 记录和完成后的记录位置不同
    let previous = archive.clone();
    archive.register_file(dest.clone(), hash);
    store.save(archive).await?;
    if let Err(e) = store.remove(&previous).await {
        warn!(archive = %archive.id, error = %e, "Failed to remove pending archive record");
    }

    info!(archive = %archive.id, file = %dest.display(), "Attached uploaded archive");
    Ok(dest)
}

/// 移动文件，跨设备时退化为复制后删除
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to).await?;
            fs::remove_file(from).await
        }
    }
}

//! 传输工作目录
//!
//! 可能包含未加密的敏感数据：创建时仅属主可访问，任何退出路径上都会被删除

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[cfg(unix)]
const WORKDIR_MODE: u32 = 0o700;

/// 作用域工作目录，`remove` 只执行一次，未显式删除时 drop 兜底
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    removed: bool,
}

impl WorkDir {
    /// 创建目录（父目录一并创建）
    ///
    /// 目录在创建时即为 0o700；已存在时收紧权限后沿用
    pub async fn create(path: PathBuf) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let target = path.clone();
        tokio::task::spawn_blocking(move || create_private_dir(&target))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

        debug!(path = %path.display(), "Created transfer working directory");
        Ok(Self { path, removed: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// 删除目录；重复调用无副作用
    pub async fn remove(&mut self) -> std::io::Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    match std::fs::DirBuilder::new().mode(WORKDIR_MODE).create(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(WORKDIR_MODE))
        }
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove working directory on drop");
            }
        }
    }
}

//! 恢复（push）
//!
//! 校验和解包都在本地完成，通过之后才会触碰目标环境。
//! 一旦开启维护模式，无论推送成功与否都会执行恢复清理（rebuild + 删除工作目录）并关闭维护模式

use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::domain::archive::DataArchive;
use crate::domain::transfer::DataTransfer;
use crate::error::OrchestratorError;
use crate::infra::archive_tool::{ASSETS_DIR, DB_DUMP_FILE};
use crate::infra::remote_task::{actions, roles};
use crate::services::archive::transfer_workdir_path;
use crate::state::operation_log::LogSink;

use super::{TransferOrchestrator, WorkDir};

/// 解包后待推送的内容
struct Extracted {
    db_dump: Option<PathBuf>,
    assets_dir: Option<PathBuf>,
}

impl TransferOrchestrator {
    /// 把归档恢复到目标环境
    ///
    /// 错误优先级：推送失败 > rebuild 失败 > 关闭维护失败；
    /// 工作目录删除失败只记录
    pub async fn restore(
        &self,
        transfer: &DataTransfer,
        mut archive: DataArchive,
        log: &dyn LogSink,
    ) -> Result<DataArchive, OrchestratorError> {
        let environment = &transfer.environment;
        let _lease = self.locks.try_acquire(&environment.key())?;

        log.stdout(&format!(
            "Restoring {} data from archive {} to {}",
            transfer.mode, archive.id, environment
        ));

        let file = check_archive(transfer, &archive)?;

        let mut workdir = WorkDir::create(transfer_workdir_path(
            &self.transfer_root,
            &environment.project.name,
            &environment.name,
            &transfer.id,
        ))
        .await?;

        let extracted = match self.extract(transfer, &file, &workdir, log).await {
            Ok(extracted) => extracted,
            Err(e) => {
                self.remove_workdir(&mut workdir, log).await;
                return Err(e);
            }
        };

        if let Err(e) = self.check_cancelled("maintenance:enable", log) {
            self.remove_workdir(&mut workdir, log).await;
            return Err(e);
        }

        if let Err(e) = self.maintenance.enable(environment, log).await {
            self.remove_workdir(&mut workdir, log).await;
            return Err(e);
        }

        let push_result = self.push(transfer, &extracted, log).await;

        // 恢复清理：只执行一次
        let rebuild_result = self.run_rebuild(environment, log).await;
        self.remove_workdir(&mut workdir, log).await;

        let disable_result = self.maintenance.disable(environment, log).await;

        if let Err(e) = push_result {
            if let Err(ref rebuild) = rebuild_result {
                warn!(transfer = %transfer.id, error = %rebuild, "Rebuild also failed after restore failure");
            }
            if let Err(ref disable) = disable_result {
                warn!(transfer = %transfer.id, error = %disable, "Maintenance left enabled after restore failure");
            }
            log.stderr(&format!("=== Restore to {} FAILED ===", environment));
            return Err(e);
        }
        if let Err(e) = rebuild_result {
            if let Err(ref disable) = disable_result {
                warn!(transfer = %transfer.id, error = %disable, "Maintenance left enabled after rebuild failure");
            }
            log.stderr(&format!("=== Restore to {} FAILED during rebuild ===", environment));
            return Err(e);
        }
        disable_result?;

        archive.associate_transfer(&transfer.id);
        if let Err(e) = self.store.save(&archive).await {
            warn!(archive = %archive.id, error = %e, "Failed to record transfer on archive");
        }

        log.stdout(&format!("=== Restore to {} finished ===", environment));
        info!(transfer = %transfer.id, archive = %archive.id, "Restore finished");
        Ok(archive)
    }

    /// 校验（可修复）并解包到工作目录
    async fn extract(
        &self,
        transfer: &DataTransfer,
        file: &Path,
        workdir: &WorkDir,
        log: &dyn LogSink,
    ) -> Result<Extracted, OrchestratorError> {
        log.stdout(&format!("Validating archive {}", file.display()));
        if let Err(failure) = self.archive_tool.validate(file, log).await {
            log.stderr(&format!("Archive validation failed: {}", failure));
            return Err(OrchestratorError::InvalidArchive(failure.output()));
        }

        if let Err(failure) = self.archive_tool.unpack(file, workdir.path(), log).await {
            log.stderr(&format!("Archive unpack failed: {}", failure));
            return Err(OrchestratorError::InvalidArchive(failure.output()));
        }

        let db_dump = transfer.mode.includes_db().then(|| workdir.join(DB_DUMP_FILE));
        let assets_dir = transfer.mode.includes_assets().then(|| workdir.join(ASSETS_DIR));

        if let Some(ref dump) = db_dump {
            if !tokio::fs::try_exists(dump).await.unwrap_or(false) {
                return Err(missing_content(DB_DUMP_FILE, log));
            }
        }
        if let Some(ref assets) = assets_dir {
            if !tokio::fs::try_exists(assets).await.unwrap_or(false) {
                return Err(missing_content(ASSETS_DIR, log));
            }
        }

        Ok(Extracted { db_dump, assets_dir })
    }

    /// 依次推送数据库和资源，第一个失败即停止
    async fn push(&self, transfer: &DataTransfer, extracted: &Extracted, log: &dyn LogSink) -> Result<(), OrchestratorError> {
        let environment = &transfer.environment;

        if let Some(ref dump) = extracted.db_dump {
            log.stdout("Pushing database");
            let task = self.builder.build(
                actions::DATA_PUSH_DB,
                roles::DB,
                environment,
                vec![("dump".to_string(), dump.display().to_string())],
                log,
            );
            if let Err(failure) = task.run(self.executor.as_ref(), log).await {
                log.stderr(&format!("Database push failed: {}", failure));
                error!(transfer = %transfer.id, error = %failure, "Database push failed");
                return Err(OrchestratorError::Restore {
                    step: actions::DATA_PUSH_DB,
                    failure,
                });
            }
        }

        if let Some(ref assets) = extracted.assets_dir {
            log.stdout("Pushing assets");
            let task = self.builder.build(
                actions::DATA_PUSH_ASSETS,
                roles::WEB,
                environment,
                vec![("assets".to_string(), assets.display().to_string())],
                log,
            );
            if let Err(failure) = task.run(self.executor.as_ref(), log).await {
                log.stderr(&format!("Asset push failed: {}", failure));
                error!(transfer = %transfer.id, error = %failure, "Asset push failed");
                return Err(OrchestratorError::Restore {
                    step: actions::DATA_PUSH_ASSETS,
                    failure,
                });
            }
        }

        Ok(())
    }

    async fn remove_workdir(&self, workdir: &mut WorkDir, log: &dyn LogSink) {
        match workdir.remove().await {
            Ok(()) => log.stdout("Removed working directory"),
            Err(e) => {
                log.stderr(&format!("Failed to remove working directory: {}", e));
                warn!(path = %workdir.path().display(), error = %e, "Restore working directory not removed");
            }
        }
    }
}

/// 远端调用之前的检查：归档已有文件，且包含本次需要的数据
fn check_archive(transfer: &DataTransfer, archive: &DataArchive) -> Result<PathBuf, OrchestratorError> {
    let file = match archive.file {
        Some(ref file) => file.clone(),
        None => {
            return Err(OrchestratorError::InvalidArchive(format!(
                "archive {} is still awaiting upload",
                archive.id
            )))
        }
    };
    if (transfer.mode.includes_db() && !archive.mode.includes_db())
        || (transfer.mode.includes_assets() && !archive.mode.includes_assets())
    {
        return Err(OrchestratorError::InvalidArchive(format!(
            "archive {} holds {} data, cannot restore {}",
            archive.id, archive.mode, transfer.mode
        )));
    }
    Ok(file)
}

fn missing_content(name: &str, log: &dyn LogSink) -> OrchestratorError {
    log.stderr(&format!("Archive does not contain {}", name));
    OrchestratorError::InvalidArchive(format!("archive does not contain {}", name))
}

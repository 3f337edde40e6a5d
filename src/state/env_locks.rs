//! 环境级互斥
//!
//! 同一环境同一时间只允许一个操作（部署、备份、恢复、维护切换）

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::OrchestratorError;

/// 正在操作中的环境集合
#[derive(Default)]
pub struct EnvironmentLocks {
    busy: Mutex<HashSet<String>>,
}

impl EnvironmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试占用环境，已被占用时立即返回 `Busy`
    pub fn try_acquire(self: &Arc<Self>, key: &str) -> Result<EnvironmentLease, OrchestratorError> {
        let mut busy = match self.busy.lock() {
            Ok(busy) => busy,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !busy.insert(key.to_string()) {
            tracing::warn!(environment = %key, "Rejected concurrent operation");
            return Err(OrchestratorError::Busy(key.to_string()));
        }
        Ok(EnvironmentLease {
            locks: self.clone(),
            key: key.to_string(),
        })
    }

    pub fn is_busy(&self, key: &str) -> bool {
        match self.busy.lock() {
            Ok(busy) => busy.contains(key),
            Err(poisoned) => poisoned.into_inner().contains(key),
        }
    }

    fn release(&self, key: &str) {
        let mut busy = match self.busy.lock() {
            Ok(busy) => busy,
            Err(poisoned) => poisoned.into_inner(),
        };
        busy.remove(key);
    }
}

/// 环境占用凭证，drop 时释放
pub struct EnvironmentLease {
    locks: Arc<EnvironmentLocks>,
    key: String,
}

impl Drop for EnvironmentLease {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}

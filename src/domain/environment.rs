//! 项目与环境模型
//!
//! 持久化由外部负责，这里只保存一次操作期间不可变的快照

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConfigurationError;

/// 项目
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Project {
    /// 项目名称（用于归档命名）
    pub name: String,
    /// 源码仓库地址
    #[serde(default)]
    pub repository: Option<String>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repository: None,
        }
    }
}

/// 部署目标环境
#[derive(Clone, Debug, PartialEq)]
pub struct Environment {
    /// 环境名称（传给远端任务执行器，如 "prod"）
    pub name: String,
    /// 可读全名（如 "Shop Production"）
    pub full_name: String,
    /// 所属项目
    pub project: Arc<Project>,
    /// 注入远端命令的环境变量，`None` 表示无法解析
    pub variables: Option<BTreeMap<String, String>>,
}

impl Environment {
    pub fn new(project: Arc<Project>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            full_name: format!("{} {}", project.name, name),
            name,
            project,
            variables: Some(BTreeMap::new()),
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = full_name.into();
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn without_variables(mut self) -> Self {
        self.variables = None;
        self
    }

    /// 解析注入的环境变量
    pub fn resolve_variables(&self) -> Result<&BTreeMap<String, String>, ConfigurationError> {
        self.variables.as_ref().ok_or_else(|| {
            ConfigurationError(format!(
                "no environment variables could be resolved for project {}",
                self.project.name
            ))
        })
    }

    /// 锁和日志使用的唯一键 (project/environment)
    pub fn key(&self) -> String {
        format!("{}/{}", self.project.name, self.name)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_key_and_display() {
        let env = Environment::new(Arc::new(Project::new("shop")), "prod")
            .with_full_name("Shop Production");
        assert_eq!(env.key(), "shop/prod");
        assert_eq!(env.to_string(), "Shop Production");
    }

    #[test]
    fn test_resolve_variables() {
        let env = Environment::new(Arc::new(Project::new("shop")), "prod")
            .with_variable("APP_ENV", "production");
        assert_eq!(
            env.resolve_variables().unwrap().get("APP_ENV").map(String::as_str),
            Some("production")
        );

        let env = env.without_variables();
        let err = env.resolve_variables().unwrap_err();
        assert!(err.to_string().contains("shop"));
    }
}

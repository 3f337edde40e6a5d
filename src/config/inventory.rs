//! 项目 / 环境清单
//!
//! 项目与环境记录由外部系统维护，命令行从 JSON 清单文件读取快照

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::domain::environment::{Environment, Project};

#[derive(Debug, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    projects: Vec<ProjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    name: String,
    #[serde(default)]
    repository: Option<String>,
    #[serde(default)]
    environments: Vec<EnvironmentEntry>,
}

#[derive(Debug, Deserialize)]
struct EnvironmentEntry {
    name: String,
    #[serde(default)]
    full_name: Option<String>,
    /// 缺省表示无法解析该环境的变量
    #[serde(default)]
    variables: Option<BTreeMap<String, String>>,
}

/// 已加载的清单
#[derive(Debug, Default)]
pub struct Inventory {
    environments: Vec<Environment>,
}

impl Inventory {
    /// 解析 JSON 清单
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let file: InventoryFile = serde_json::from_str(content)?;
        let mut environments = Vec::new();

        for entry in file.projects {
            let project = Arc::new(Project {
                name: entry.name,
                repository: entry.repository,
            });
            for env in entry.environments {
                environments.push(Environment {
                    full_name: env
                        .full_name
                        .unwrap_or_else(|| format!("{} {}", project.name, env.name)),
                    name: env.name,
                    project: project.clone(),
                    variables: env.variables,
                });
            }
        }

        Ok(Self { environments })
    }

    /// 从文件加载
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("failed to read inventory {}: {}", path.display(), e)
        })?;
        let inventory = Self::from_json(&content)?;
        tracing::info!(
            path = %path.display(),
            environments = inventory.environments.len(),
            "Loaded inventory"
        );
        Ok(inventory)
    }

    /// 查找环境
    pub fn environment(&self, project: &str, name: &str) -> Option<&Environment> {
        self.environments
            .iter()
            .find(|e| e.project.name == project && e.name == name)
    }

    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "projects": [
            {
                "name": "shop",
                "repository": "git@example.com:shop.git",
                "environments": [
                    {"name": "prod", "full_name": "Shop Production", "variables": {"APP_ENV": "prod"}},
                    {"name": "staging"}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_inventory() {
        let inventory = Inventory::from_json(SAMPLE).unwrap();
        assert_eq!(inventory.environments().len(), 2);

        let prod = inventory.environment("shop", "prod").unwrap();
        assert_eq!(prod.full_name, "Shop Production");
        assert_eq!(
            prod.project.repository.as_deref(),
            Some("git@example.com:shop.git")
        );
        assert!(prod.resolve_variables().is_ok());

        let staging = inventory.environment("shop", "staging").unwrap();
        assert_eq!(staging.full_name, "shop staging");
        assert!(staging.resolve_variables().is_err());

        assert!(inventory.environment("shop", "qa").is_none());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = Inventory::load(Path::new("/nonexistent/inventory.json")).await;
        assert!(result.is_err());
    }
}

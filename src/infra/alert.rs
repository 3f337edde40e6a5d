//! 运维告警
//!
//! 部署后清理失败时通知运维人员，告警内容附带截断后的操作日志

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::env::constants::{ALERT_LOG_TAIL_CHARS, TRUNCATION_MARKER};

/// 告警错误
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Alert endpoint returned status {0}")]
    NonSuccessStatus(u16),
}

/// 运维告警
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OperatorAlert {
    pub recipient: String,
    pub subject: String,
    pub project: String,
    pub environment: String,
    /// 截断后的日志
    pub excerpt: String,
}

impl OperatorAlert {
    /// 部署后清理失败告警
    pub fn cleanup_failed(recipient: &str, project: &str, environment: &str, log_content: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            subject: format!("Cleanup failed after deploying {} to {}", project, environment),
            project: project.to_string(),
            environment: environment.to_string(),
            excerpt: trim_log_excerpt(log_content, ALERT_LOG_TAIL_CHARS),
        }
    }
}

/// 截取日志尾部
///
/// 保留最后 `tail_chars` 个字符，并从其后的第一个换行处开始（不截断半行），
/// 前面加上截断标记。窗口内没有换行时返回完整内容
pub fn trim_log_excerpt(content: &str, tail_chars: usize) -> String {
    let total = content.chars().count();
    if total <= tail_chars {
        return content.to_string();
    }

    let cut = content
        .char_indices()
        .nth(total - tail_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let window = &content[cut..];

    match window.find('\n') {
        Some(pos) => format!("{}\n{}", TRUNCATION_MARKER, &window[pos + 1..]),
        None => content.to_string(),
    }
}

/// 告警发送接口
#[async_trait]
pub trait AlertSender: Send + Sync {
    async fn send(&self, alert: &OperatorAlert) -> Result<(), AlertError>;
}

/// 通过 HTTP webhook 投递告警
#[derive(Clone)]
pub struct WebhookAlertClient {
    client: Client,
    url: String,
}

impl WebhookAlertClient {
    pub fn new(url: impl Into<String>) -> Result<Self, AlertError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertSender for WebhookAlertClient {
    async fn send(&self, alert: &OperatorAlert) -> Result<(), AlertError> {
        let mut last_error = None;

        for attempt in 1..=3 {
            match self.client.post(&self.url).json(alert).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        recipient = %alert.recipient,
                        project = %alert.project,
                        environment = %alert.environment,
                        attempt = attempt,
                        "Operator alert delivered"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(status = %resp.status(), attempt = attempt, "Alert endpoint returned non-success status");
                    last_error = Some(AlertError::NonSuccessStatus(resp.status().as_u16()));
                }
                Err(e) => {
                    warn!(error = %e, attempt = attempt, "Failed to deliver operator alert, will retry");
                    last_error = Some(AlertError::Network(e));
                }
            }

            if attempt < 3 {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }

        error!(recipient = %alert.recipient, "Failed to deliver operator alert after 3 attempts");
        Err(last_error.unwrap_or(AlertError::NonSuccessStatus(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_log_is_untrimmed() {
        let content = "line one\nline two";
        assert_eq!(trim_log_excerpt(content, 3000), content);
    }

    #[test]
    fn test_long_log_starts_at_line_boundary() {
        let content: String = (0..500)
            .map(|i| format!("log line number {:04}", i))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(content.len() > 3000);

        let excerpt = trim_log_excerpt(&content, 3000);
        let (marker, rest) = excerpt.split_once('\n').unwrap();
        assert_eq!(marker, TRUNCATION_MARKER);

        // 保留部分从完整的一行开始，并以原日志结尾
        assert!(rest.starts_with("log line number "));
        assert!(content.ends_with(rest));
        assert!(rest.chars().count() <= 3000);

        let first = rest.lines().next().unwrap();
        assert!(content.contains(&format!("\n{}\n", first)));
    }

    #[test]
    fn test_long_log_without_line_break_is_kept_whole() {
        let content = "x".repeat(5000);
        assert_eq!(trim_log_excerpt(&content, 3000), content);
    }

    #[test]
    fn test_multibyte_content_is_cut_on_char_boundary() {
        let content = format!("{}\n{}", "部署".repeat(2000), "完成");
        let excerpt = trim_log_excerpt(&content, 3000);
        assert_eq!(excerpt, format!("{}\n完成", TRUNCATION_MARKER));
    }

    #[test]
    fn test_cleanup_alert_contents() {
        let alert = OperatorAlert::cleanup_failed("ops@example.com", "shop", "prod", "a\nb");
        assert_eq!(alert.recipient, "ops@example.com");
        assert!(alert.subject.contains("shop"));
        assert!(alert.subject.contains("prod"));
        assert_eq!(alert.excerpt, "a\nb");
    }

    #[test]
    fn test_webhook_client_keeps_url() {
        let client = WebhookAlertClient::new("https://alerts.example.com/hook").unwrap();
        assert_eq!(client.url(), "https://alerts.example.com/hook");
    }
}

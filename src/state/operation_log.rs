//! 操作日志
//!
//! 每个顶层操作（deploy / backup / restore）对应一份只追加的日志，
//! 所有子步骤共享；同时通过广播通道供并发读者实时订阅

use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::config::env::constants::LOG_CHANNEL_CAPACITY;
use crate::domain::deploy::LogLine;

/// 日志输出端
pub trait LogSink: Send + Sync {
    /// 追加一行
    fn append(&self, line: LogLine);

    /// 已累积的全部内容（按行拼接）
    fn content(&self) -> String;

    fn stdout(&self, content: &str) {
        self.append(LogLine::stdout(content));
    }

    fn stderr(&self, content: &str) {
        self.append(LogLine::stderr(content));
    }
}

/// 内存中的操作日志
pub struct OperationLog {
    lines: Mutex<Vec<LogLine>>,
    sender: broadcast::Sender<LogLine>,
}

impl OperationLog {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self {
            lines: Mutex::new(Vec::new()),
            sender,
        }
    }

    /// 订阅后续追加的日志行
    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.sender.subscribe()
    }

    /// 活跃订阅者数量
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// 当前所有日志行
    pub fn lines(&self) -> Vec<LogLine> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 从第 `start` 行开始的日志行
    pub fn lines_from(&self, start: usize) -> Vec<LogLine> {
        let lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.get(start..).map(<[LogLine]>::to_vec).unwrap_or_default()
    }

    /// 是否有某行包含指定内容
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.content.contains(needle))
    }
}

/// 日志读取游标
///
/// 广播通道只用作唤醒信号，内容总是从日志本身按位置读取，
/// 通道积压（lagged）时也不会漏行
#[derive(Debug, Default)]
pub struct LogCursor {
    next: usize,
}

impl LogCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出上次读取之后新增的行
    pub fn take_new(&mut self, log: &OperationLog) -> Vec<LogLine> {
        let lines = log.lines_from(self.next);
        self.next += lines.len();
        lines
    }
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for OperationLog {
    fn append(&self, line: LogLine) {
        let mut lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.push(line.clone());
        // 没有订阅者时发送失败，忽略
        let _ = self.sender.send(line);
    }

    fn content(&self) -> String {
        self.lines()
            .iter()
            .map(|l| l.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_content() {
        let log = OperationLog::new();
        assert!(log.lines().is_empty());

        log.stdout("first");
        log.stderr("second");

        assert_eq!(log.lines().len(), 2);
        assert_eq!(log.content(), "first\nsecond");
        assert!(log.lines()[1].is_stderr());
        assert!(log.contains("sec"));
    }

    #[tokio::test]
    async fn test_subscriber_sees_lines_live() {
        let log = OperationLog::new();
        let mut receiver = log.subscribe();

        log.stdout("Hello");

        let line = receiver.recv().await.unwrap();
        assert_eq!(line.content, "Hello");
    }

    #[tokio::test]
    async fn test_cursor_recovers_lines_skipped_by_lagged_receiver() {
        use tokio::sync::broadcast::error::RecvError;

        let log = OperationLog::new();
        let mut receiver = log.subscribe();
        let mut cursor = LogCursor::new();

        for i in 0..300 {
            log.stdout(&format!("line {}", i));
        }

        assert!(matches!(receiver.recv().await, Err(RecvError::Lagged(_))));

        let lines = cursor.take_new(&log);
        assert_eq!(lines.len(), 300);
        assert_eq!(lines[0].content, "line 0");
        assert_eq!(lines[299].content, "line 299");

        log.stderr("tail");
        let lines = cursor.take_new(&log);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].is_stderr());
        assert!(cursor.take_new(&log).is_empty());
    }
}

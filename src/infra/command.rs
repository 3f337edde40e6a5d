//! 命令执行器
//!
//! 提供统一的命令执行接口，支持：
//! - 参数与环境变量的 shell 转义
//! - 实时日志流式输出到操作日志
//! - 超时控制
//! - stdout/stderr 分离，失败时返回 stderr

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, warn};

use crate::config::env::constants::PIPE_DRAIN_GRACE_SECS;
use crate::domain::deploy::LogLine;
use crate::state::operation_log::LogSink;

/// 命令执行错误（命令无法启动或无法等待）
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to spawn command: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Failed to wait for command: {0}")]
    WaitFailed(#[source] std::io::Error),

    #[error("Command {0} pipe was not captured")]
    MissingPipe(&'static str),
}

/// 命令执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// 失败时捕获的错误输出
    pub error_output: String,
    /// 是否因超时而终止
    pub timed_out: bool,
    pub elapsed_secs: u64,
}

impl CommandOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            error_output: String::new(),
            timed_out: false,
            elapsed_secs: 0,
        }
    }

    pub fn failed(exit_code: i32, error_output: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            error_output: error_output.into(),
            timed_out: false,
            elapsed_secs: 0,
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self {
            success: false,
            exit_code: None,
            error_output: format!("Command timed out after {}s", after.as_secs()),
            timed_out: true,
            elapsed_secs: after.as_secs(),
        }
    }
}

/// 文本形式的命令行
///
/// 所有参数与环境变量值在渲染时都经过 shell 转义
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub work_dir: Option<PathBuf>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            work_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// 第一个参数（远端任务名 / 工具子命令）
    pub fn action(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// 渲染为可交给 `sh -c` 执行的单行命令
    pub fn render(&self) -> String {
        let mut parts = Vec::with_capacity(self.envs.len() + self.args.len() + 1);
        for (key, value) in &self.envs {
            parts.push(format!("{}={}", key, shell_quote(value)));
        }
        parts.push(shell_quote(&self.program));
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }
}

/// 对单个参数做 shell 转义
///
/// 只含安全字符时原样返回，否则用单引号包裹，内部单引号替换为 `'\''`
pub fn shell_quote(value: &str) -> String {
    let is_safe = !value.is_empty()
        && value.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | ',' | '+' | '%')
        });
    if is_safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// 是否为合法的环境变量名
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// 命令执行接口
///
/// 远端非零退出码通过 `CommandOutcome.success = false` 报告，
/// 只有无法启动进程时才返回 `Err`
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        command: &CommandLine,
        timeout: Duration,
        log: &dyn LogSink,
    ) -> Result<CommandOutcome, CommandError>;
}

/// 基于本地 shell 的命令执行器
pub struct CommandRunner {
    shell: String,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// 指定 shell 程序
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn spawn(&self, rendered: &str, work_dir: Option<&Path>) -> Result<tokio::process::Child, CommandError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(rendered)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }
        cmd.spawn().map_err(CommandError::SpawnFailed)
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// 按行读取管道
///
/// 读的是原始字节，非 UTF-8 内容按有损方式转换，保证管道一直被读空。
/// 未读完的半行保留在 `buf` 中，`next_line` 在 `select!` 中被取消后可以继续
struct PipeLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    open: bool,
}

impl<R: AsyncRead + Unpin> PipeLines<R> {
    fn new(pipe: R) -> Self {
        Self {
            reader: BufReader::new(pipe),
            buf: Vec::new(),
            open: true,
        }
    }

    async fn next_line(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) => {
                self.open = false;
                None
            }
            Ok(_) => {
                let mut end = self.buf.len();
                while end > 0 && matches!(self.buf[end - 1], b'\n' | b'\r') {
                    end -= 1;
                }
                let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
                self.buf.clear();
                Some(line)
            }
            Err(e) => {
                warn!(error = %e, "Failed to read command output");
                self.open = false;
                None
            }
        }
    }
}

#[async_trait]
impl TaskExecutor for CommandRunner {
    async fn execute(
        &self,
        command: &CommandLine,
        timeout: Duration,
        log: &dyn LogSink,
    ) -> Result<CommandOutcome, CommandError> {
        let rendered = command.render();
        debug!(command = %rendered, "Spawning command");

        let started = Instant::now();
        let mut child = self.spawn(&rendered, command.work_dir.as_deref())?;

        let stdout = child.stdout.take().ok_or(CommandError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(CommandError::MissingPipe("stderr"))?;
        let mut stdout = PipeLines::new(stdout);
        let mut stderr = PipeLines::new(stderr);
        let mut captured: Vec<String> = Vec::new();

        // 结果以进程退出为准，不等管道 EOF。两个流各自保持顺序，彼此之间不保证顺序
        let run = async {
            loop {
                tokio::select! {
                    line = stdout.next_line(), if stdout.open => {
                        if let Some(line) = line {
                            log.append(LogLine::stdout(line));
                        }
                    }
                    line = stderr.next_line(), if stderr.open => {
                        if let Some(line) = line {
                            captured.push(line.clone());
                            log.append(LogLine::stderr(line));
                        }
                    }
                    status = child.wait() => break status,
                }
            }
        };
        let result = tokio::time::timeout(timeout, run).await;

        let status = match result {
            Ok(status) => status.map_err(CommandError::WaitFailed)?,
            Err(_) => {
                error!(command = %rendered, "Command timed out after {:?}", timeout);
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed out command");
                }
                let outcome = CommandOutcome::timed_out(timeout);
                log.stderr(&outcome.error_output);
                return Ok(outcome);
            }
        };

        // 进程已退出，剩余输出在宽限期内读完；后台子进程可能一直占着管道
        let drain = async {
            while stdout.open || stderr.open {
                tokio::select! {
                    line = stdout.next_line(), if stdout.open => {
                        if let Some(line) = line {
                            log.append(LogLine::stdout(line));
                        }
                    }
                    line = stderr.next_line(), if stderr.open => {
                        if let Some(line) = line {
                            captured.push(line.clone());
                            log.append(LogLine::stderr(line));
                        }
                    }
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(PIPE_DRAIN_GRACE_SECS), drain)
            .await
            .is_err()
        {
            warn!(command = %rendered, "Output pipes still open after command exited, stopped reading");
        }

        let exit_code = status.code();
        let elapsed_secs = started.elapsed().as_secs();
        if status.success() {
            return Ok(CommandOutcome {
                success: true,
                exit_code,
                error_output: String::new(),
                timed_out: false,
                elapsed_secs,
            });
        }

        let error_output = if captured.is_empty() {
            format!("Command exited with code {}", exit_code.unwrap_or(-1))
        } else {
            captured.join("\n")
        };
        Ok(CommandOutcome {
            success: false,
            exit_code,
            error_output,
            timed_out: false,
            elapsed_secs,
        })
    }
}

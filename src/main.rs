//! XJP Orchestrator - 部署与数据迁移编排
//!
//! Usage:
//! - Deploy: `xjp-orchestrator deploy shop prod --build abc123`
//! - Backup: `xjp-orchestrator backup shop prod --mode db`
//! - Restore: `xjp-orchestrator restore shop staging --archive /path/to/archive.tar.gz.json`
//! - Maintenance: `xjp-orchestrator maintenance enable shop prod`

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use xjp_orchestrator::config::env::constants::VERSION;
use xjp_orchestrator::config::{Inventory, OrchestratorConfig};
use xjp_orchestrator::domain::{DataTransfer, DeployRequest, Direction, Environment, LogLine, TransferMode};
use xjp_orchestrator::infra::alert::AlertSender;
use xjp_orchestrator::infra::{CommandRunner, RemoteTaskBuilder, TaskExecutor, WebhookAlertClient};
use xjp_orchestrator::services::archive::attach_upload;
use xjp_orchestrator::services::deploy::{CommandPackageGenerator, DeployHooks, HistoryObserver};
use xjp_orchestrator::services::{
    DeployOrchestrator, JsonArchiveStore, TransferOrchestrator, TransferOutcome,
};
use xjp_orchestrator::state::{EnvironmentLocks, LogCursor, LogHub, OperationLog};
use xjp_orchestrator::OrchestratorError;

#[derive(Parser)]
#[command(name = "xjp-orchestrator", version, about = "Deploy, backup and restore orchestrator")]
struct Cli {
    /// 项目 / 环境清单（JSON）
    #[arg(long, global = true, default_value = "inventory.json")]
    inventory: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy a build to an environment
    Deploy {
        project: String,
        environment: String,
        #[arg(long)]
        build: String,
        /// Keep the maintenance page up after deploying
        #[arg(long)]
        leave_maintenance: bool,
        /// Take the maintenance page down even if the deploy fails
        #[arg(long)]
        disable_maintenance_on_failure: bool,
    },
    /// Pull data from an environment into a packaged archive
    Backup {
        project: String,
        environment: String,
        #[arg(long, value_enum, default_value_t = ModeArg::All)]
        mode: ModeArg,
        #[arg(long)]
        author: Option<String>,
    },
    /// Push an archive into an environment
    Restore {
        project: String,
        environment: String,
        /// Archive metadata file
        #[arg(long)]
        archive: PathBuf,
        /// Defaults to the archive's mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        #[arg(long)]
        author: Option<String>,
    },
    /// Toggle the maintenance page
    Maintenance {
        #[arg(value_enum)]
        action: ToggleArg,
        project: String,
        environment: String,
    },
    /// Run the rebuild / migrate task
    Rebuild { project: String, environment: String },
    /// Run the pre-flight check
    Check { project: String, environment: String },
    /// Create an archive placeholder awaiting a manual upload
    PendingArchive {
        project: String,
        environment: String,
        #[arg(long, value_enum, default_value_t = ModeArg::All)]
        mode: ModeArg,
        #[arg(long)]
        author: Option<String>,
    },
    /// Complete a pending archive with an uploaded file
    AttachUpload {
        #[arg(long)]
        archive: PathBuf,
        #[arg(long)]
        token: String,
        #[arg(long)]
        file: PathBuf,
    },
}

impl Command {
    /// 操作类型与目标环境（`project/environment`）
    fn describe(&self) -> (&'static str, String) {
        match self {
            Command::Deploy { project, environment, .. } => ("deploy", format!("{}/{}", project, environment)),
            Command::Backup { project, environment, .. } => ("backup", format!("{}/{}", project, environment)),
            Command::Restore { project, environment, .. } => ("restore", format!("{}/{}", project, environment)),
            Command::Maintenance { project, environment, .. } => {
                ("maintenance", format!("{}/{}", project, environment))
            }
            Command::Rebuild { project, environment } => ("rebuild", format!("{}/{}", project, environment)),
            Command::Check { project, environment } => ("check", format!("{}/{}", project, environment)),
            Command::PendingArchive { project, environment, .. } => {
                ("pending-archive", format!("{}/{}", project, environment))
            }
            Command::AttachUpload { archive, .. } => ("attach-upload", archive.display().to_string()),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    All,
    Db,
    Assets,
}

impl From<ModeArg> for TransferMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::All => TransferMode::All,
            ModeArg::Db => TransferMode::Db,
            ModeArg::Assets => TransferMode::Assets,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ToggleArg {
    Enable,
    Disable,
}

/// 运行期依赖
struct Runtime {
    config: OrchestratorConfig,
    executor: Arc<dyn TaskExecutor>,
    builder: RemoteTaskBuilder,
    locks: Arc<EnvironmentLocks>,
    cancel_token: CancellationToken,
}

impl Runtime {
    fn new(config: OrchestratorConfig, cancel_token: CancellationToken) -> Self {
        let mut builder = RemoteTaskBuilder::new(&config.task_runner, &config.history_dir);
        if let Some(ref recipe) = config.recipe_file {
            builder = builder.with_recipe(recipe);
        }
        Self {
            executor: Arc::new(CommandRunner::new()),
            builder,
            locks: Arc::new(EnvironmentLocks::new()),
            cancel_token,
            config,
        }
    }

    fn deploy_orchestrator(&self) -> anyhow::Result<DeployOrchestrator> {
        let mut hooks = DeployHooks::new();
        hooks.register(Arc::new(HistoryObserver::new(&self.config.history_dir)));

        let sender: Option<Arc<dyn AlertSender>> = match self.config.alert.webhook_url {
            Some(ref url) => Some(Arc::new(WebhookAlertClient::new(url)?)),
            None => None,
        };

        let mut orchestrator = DeployOrchestrator::new(self.executor.clone(), self.builder.clone(), self.locks.clone())
            .with_hooks(hooks)
            .with_alerts(self.config.alert.clone(), sender)
            .with_cancel_token(self.cancel_token.clone());
        if let Some(ref package) = self.config.package {
            orchestrator = orchestrator.with_package_generator(Arc::new(CommandPackageGenerator::new(
                package.clone(),
                self.executor.clone(),
            )));
        }
        Ok(orchestrator)
    }

    fn transfer_orchestrator(&self) -> TransferOrchestrator {
        TransferOrchestrator::new(
            &self.config,
            self.executor.clone(),
            self.builder.clone(),
            Arc::new(JsonArchiveStore::new(&self.config.archive_root)),
            self.locks.clone(),
        )
        .with_cancel_token(self.cancel_token.clone())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // 诊断日志走 stderr，stdout 只输出操作日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("xjp_orchestrator=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!(version = VERSION, "XJP Orchestrator starting");

    let cancel_token = CancellationToken::new();
    {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current step");
                token.cancel();
            }
        });
    }

    let runtime = Runtime::new(OrchestratorConfig::from_env(), cancel_token);

    match run(cli, runtime).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<OrchestratorError>() {
                Some(err) => {
                    error!(kind = err.kind(), "Operation failed");
                    eprintln!("Error ({}): {}", err.kind(), err);
                }
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, runtime: Runtime) -> anyhow::Result<()> {
    let hub = LogHub::new();
    let operation_id = uuid::Uuid::new_v4().simple().to_string();
    let (kind, target) = cli.command.describe();
    let log = hub.create(&operation_id, kind, &target).await;
    let done = CancellationToken::new();
    let printer = tokio::spawn(print_log(log.clone(), log.subscribe(), done.clone()));

    let result = execute(cli, &runtime, &log).await;

    hub.finish(&operation_id, result.is_ok()).await;
    done.cancel();
    let _ = printer.await;
    if let Some(summary) = hub.summary(&operation_id).await {
        let elapsed = summary.finished_at.map(|end| (end - summary.started_at).num_seconds());
        info!(
            operation = %summary.id,
            kind = %summary.kind,
            environment = %summary.environment,
            status = ?summary.status,
            elapsed_secs = ?elapsed,
            "Operation finished"
        );
    }
    hub.cleanup().await;

    result
}

async fn execute(cli: Cli, runtime: &Runtime, log: &OperationLog) -> anyhow::Result<()> {
    let config = &runtime.config;

    match cli.command {
        Command::Deploy {
            project,
            environment,
            build,
            leave_maintenance,
            disable_maintenance_on_failure,
        } => {
            let environment = find_environment(&cli.inventory, &project, &environment).await?;
            let request = DeployRequest::new(build)
                .leave_maintenance_page(leave_maintenance)
                .disable_maintenance_on_failure(disable_maintenance_on_failure);
            runtime
                .deploy_orchestrator()?
                .deploy(&environment, &request, log)
                .await?;
        }
        Command::Backup {
            project,
            environment,
            mode,
            author,
        } => {
            let environment = find_environment(&cli.inventory, &project, &environment).await?;
            let transfer = DataTransfer::new(Direction::Pull, mode.into(), environment, author_or_default(author));
            if let TransferOutcome::BackedUp(archive) = runtime.transfer_orchestrator().run(&transfer, None, log).await? {
                if let Some(file) = archive.file {
                    println!("{}", file.display());
                }
            }
        }
        Command::Restore {
            project,
            environment,
            archive,
            mode,
            author,
        } => {
            let environment = find_environment(&cli.inventory, &project, &environment).await?;
            let archive = JsonArchiveStore::load(&archive).await?;
            let mode = mode.map(TransferMode::from).unwrap_or(archive.mode);
            let transfer = DataTransfer::new(Direction::Push, mode, environment, author_or_default(author));
            runtime
                .transfer_orchestrator()
                .run(&transfer, Some(archive), log)
                .await?;
        }
        Command::Maintenance {
            action,
            project,
            environment,
        } => {
            let environment = find_environment(&cli.inventory, &project, &environment).await?;
            let enabled = matches!(action, ToggleArg::Enable);
            runtime
                .deploy_orchestrator()?
                .set_maintenance(&environment, enabled, log)
                .await?;
        }
        Command::Rebuild { project, environment } => {
            let environment = find_environment(&cli.inventory, &project, &environment).await?;
            runtime.transfer_orchestrator().rebuild(&environment, log).await?;
        }
        Command::Check { project, environment } => {
            let environment = find_environment(&cli.inventory, &project, &environment).await?;
            runtime.deploy_orchestrator()?.check(&environment, log).await?;
        }
        Command::PendingArchive {
            project,
            environment,
            mode,
            author,
        } => {
            let environment = find_environment(&cli.inventory, &project, &environment).await?;
            let archive = runtime
                .transfer_orchestrator()
                .create_pending_archive(mode.into(), &author_or_default(author), &environment)
                .await?;
            println!("archive: {}", archive.id);
            if let Some(token) = archive.upload_token {
                println!("upload token: {}", token);
            }
        }
        Command::AttachUpload { archive, token, file } => {
            let store = JsonArchiveStore::new(&config.archive_root);
            let mut record = JsonArchiveStore::load(&archive).await?;
            let dest = attach_upload(&store, &config.archive_root, &mut record, &token, &file).await?;
            println!("{}", dest.display());
        }
    }

    Ok(())
}

async fn find_environment(inventory: &Path, project: &str, environment: &str) -> anyhow::Result<Environment> {
    let inventory = Inventory::load(inventory).await?;
    inventory
        .environment(project, environment)
        .cloned()
        .with_context(|| format!("environment {}/{} not found in inventory", project, environment))
}

fn author_or_default(author: Option<String>) -> String {
    author
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "cli".to_string())
}

/// 实时打印操作日志，完成后排空剩余行
///
/// 通道只负责唤醒，内容按游标从日志读取，积压时不会丢行
async fn print_log(log: Arc<OperationLog>, mut rx: broadcast::Receiver<LogLine>, done: CancellationToken) {
    let mut cursor = LogCursor::new();
    loop {
        tokio::select! {
            biased;
            signal = rx.recv() => {
                if let Err(RecvError::Lagged(skipped)) = signal {
                    debug!(skipped, "Log printer lagged, catching up from the log");
                }
                print_lines(cursor.take_new(&log));
                if matches!(signal, Err(RecvError::Closed)) {
                    break;
                }
            }
            _ = done.cancelled() => {
                print_lines(cursor.take_new(&log));
                break;
            }
        }
    }
}

fn print_lines(lines: Vec<LogLine>) {
    for line in lines {
        if line.is_stderr() {
            eprintln!("{}", line.content);
        } else {
            println!("{}", line.content);
        }
    }
}

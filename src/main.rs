use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crontab::{Application, Ordinals, ShutdownManager};
use crontab_core::{AppConfig, NewTask, TaskKind, TaskPatch, TaskStatus};
use crontab_dispatcher::CommandClient;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 分布式定时任务工作池
#[derive(Parser, Debug)]
#[command(name = "crontab")]
#[command(version = "1.0.0")]
#[command(about = "分布式定时任务工作池")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别，默认取配置文件
    #[arg(short, long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式，默认取配置文件
    #[arg(long, value_parser = ["json", "pretty"])]
    log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 启动工作池
    Serve {
        /// 只运行指定序号的Worker（多进程部署时使用）
        #[arg(long)]
        ordinal: Option<u32>,
    },
    /// 创建任务
    Create {
        #[arg(long)]
        title: String,
        /// 任务类型: command/class/url/eval/shell 或 1-5
        #[arg(long, value_parser = parse_kind)]
        kind: TaskKind,
        /// cron表达式，5段或6段
        #[arg(long)]
        rule: String,
        #[arg(long)]
        target: String,
        /// JSON参数
        #[arg(long)]
        parameter: Option<String>,
        /// 只执行一次
        #[arg(long)]
        singleton: bool,
        /// 创建后保持禁用
        #[arg(long)]
        disabled: bool,
        #[arg(long)]
        sort: Option<i64>,
        #[arg(long)]
        remark: Option<String>,
        #[command(flatten)]
        target_addr: AddrArgs,
    },
    /// 更新任务
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, value_parser = parse_kind)]
        kind: Option<TaskKind>,
        #[arg(long)]
        rule: Option<String>,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        parameter: Option<String>,
        #[arg(long)]
        singleton: Option<bool>,
        /// enabled/disabled
        #[arg(long, value_parser = parse_status)]
        status: Option<TaskStatus>,
        #[arg(long)]
        sort: Option<i64>,
        #[arg(long)]
        remark: Option<String>,
        #[command(flatten)]
        target_addr: AddrArgs,
    },
    /// 删除任务
    Delete {
        id: i64,
        #[command(flatten)]
        target_addr: AddrArgs,
    },
    /// 重新启用并加载任务
    Reload {
        id: i64,
        #[command(flatten)]
        target_addr: AddrArgs,
    },
}

#[derive(clap::Args, Debug)]
struct AddrArgs {
    /// 命令服务地址，默认取配置中的监听地址
    #[arg(long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;

    let log_level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    init_logging(log_level, log_format)?;

    match cli.command {
        Commands::Serve { ordinal } => serve(config, ordinal).await,
        Commands::Create {
            title,
            kind,
            rule,
            target,
            parameter,
            singleton,
            disabled,
            sort,
            remark,
            target_addr,
        } => {
            let mut task = NewTask::new(title, kind, rule, target).with_singleton(singleton);
            task.parameter = parameter;
            task.sort = sort;
            task.remark = remark;
            if disabled {
                task = task.with_status(TaskStatus::Disabled);
            }
            if let Err(reason) = task.validate() {
                return Err(anyhow::anyhow!(reason));
            }

            let mut client = connect(&config, target_addr);
            client.create(&task).await.context("发送创建命令失败")?;
            info!("创建命令已发送: {}", task.title);
            Ok(())
        }
        Commands::Update {
            id,
            title,
            kind,
            rule,
            target,
            parameter,
            singleton,
            status,
            sort,
            remark,
            target_addr,
        } => {
            let patch = TaskPatch {
                id,
                title,
                kind,
                rule,
                target,
                parameter,
                singleton,
                status,
                sort,
                remark,
            };
            if patch.is_empty() {
                return Err(anyhow::anyhow!("没有需要更新的字段"));
            }

            let mut client = connect(&config, target_addr);
            client.update(&patch).await.context("发送更新命令失败")?;
            info!("更新命令已发送: 任务 {}", id);
            Ok(())
        }
        Commands::Delete { id, target_addr } => {
            let mut client = connect(&config, target_addr);
            client.delete(id).await.context("发送删除命令失败")?;
            info!("删除命令已发送: 任务 {}", id);
            Ok(())
        }
        Commands::Reload { id, target_addr } => {
            let mut client = connect(&config, target_addr);
            client.reload(id).await.context("发送重载命令失败")?;
            info!("重载命令已发送: 任务 {}", id);
            Ok(())
        }
    }
}

async fn serve(config: AppConfig, ordinal: Option<u32>) -> Result<()> {
    info!("启动分布式定时任务工作池");

    let ordinals = match ordinal {
        Some(ordinal) => Ordinals::Single(ordinal),
        None => Ordinals::All,
    };

    let app = Application::new(config).await?;
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_manager = shutdown_manager.clone();
        tokio::spawn(async move {
            if let Err(e) = app.run(ordinals, shutdown_manager.clone()).await {
                error!("应用运行失败: {e:#}");
                // 启动失败时也让主流程退出
                shutdown_manager.shutdown().await;
            }
        })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
        _ = wait_until_shutdown(&shutdown_manager) => {}
    }

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("工作池已退出");
    Ok(())
}

fn connect(config: &AppConfig, args: AddrArgs) -> CommandClient {
    let addr = args
        .addr
        .unwrap_or_else(|| config.task.listen.replace("0.0.0.0", "127.0.0.1"));
    CommandClient::new(addr)
}

fn parse_kind(value: &str) -> Result<TaskKind, String> {
    if let Ok(code) = value.parse::<i64>() {
        return TaskKind::from_code(code).ok_or_else(|| format!("未知的任务类型: {value}"));
    }

    [
        TaskKind::CommandExec,
        TaskKind::ClassMethod,
        TaskKind::UrlFetch,
        TaskKind::EvalExpr,
        TaskKind::ShellExec,
    ]
    .into_iter()
    .find(|kind| kind.as_str() == value)
    .ok_or_else(|| format!("未知的任务类型: {value}"))
}

fn parse_status(value: &str) -> Result<TaskStatus, String> {
    match value {
        "enabled" | "1" => Ok(TaskStatus::Enabled),
        "disabled" | "0" => Ok(TaskStatus::Disabled),
        _ => Err(format!("未知的任务状态: {value}")),
    }
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

async fn wait_until_shutdown(shutdown_manager: &ShutdownManager) {
    let mut rx = shutdown_manager.subscribe().await;
    let _ = rx.recv().await;
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

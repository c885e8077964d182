use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use datatrans_core::config::{AppConfig, ObservabilityConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::{wait_for_shutdown_signal, ShutdownManager};

fn cli() -> Command {
    Command::new("datatrans")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分页批量数据传输管道")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时按默认路径查找"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["worker", "create", "split", "dispatch", "redispatch", "progress"])
                .default_value("worker"),
        )
        .arg(
            Arg::new("mission-id")
                .long("mission-id")
                .value_name("ID")
                .help("Mission ID (split/dispatch/redispatch/progress模式)")
                .required_if_eq_any([
                    ("mode", "split"),
                    ("mode", "dispatch"),
                    ("mode", "redispatch"),
                    ("mode", "progress"),
                ]),
        )
        .arg(
            Arg::new("pipeline-id")
                .long("pipeline-id")
                .value_name("ID")
                .help("管道ID (create模式)")
                .required_if_eq("mode", "create"),
        )
        .arg(
            Arg::new("batches")
                .long("batches")
                .value_name("COUNT")
                .help("批次数 (create模式)")
                .value_parser(clap::value_parser!(i32))
                .required_if_eq("mode", "create"),
        )
        .arg(
            Arg::new("total-records")
                .long("total-records")
                .value_name("COUNT")
                .help("记录总数 (create模式)，未指定时统计源表")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;

    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.observability.log_level);
    let log_format = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.observability.log_format);
    init_logging(log_level, log_format)?;

    let mode = parse_app_mode(&matches)?;
    info!("启动数据传输系统，模式: {:?}", mode);

    if mode == AppMode::Worker {
        init_metrics(&config.observability)?;
    }

    let app = Application::new(config).await?;
    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;

    if mode != AppMode::Worker {
        return app.run(mode, shutdown_rx).await;
    }

    let mut app_handle = tokio::spawn(app.run(mode, shutdown_rx));

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown().await;
        }
        result = &mut app_handle => {
            return match result {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("应用任务异常退出: {e}")),
            };
        }
    }

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(Ok(()))) => info!("应用已优雅关闭"),
        Ok(Ok(Err(e))) => error!("应用关闭时发生错误: {e:#}"),
        Ok(Err(e)) => error!("应用任务异常退出: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("数据传输系统已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
        _ => return Err(anyhow::anyhow!("不支持的日志格式: {log_format}")),
    }

    Ok(())
}

/// 启用时在配置的地址上暴露Prometheus指标
fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.metrics_enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .metrics_bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {}", config.metrics_bind_address))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("启动Prometheus指标导出器失败")?;

    info!("Prometheus指标导出器监听 {}", addr);
    Ok(())
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a String> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| anyhow::anyhow!("缺少参数 --{name}"))
}

/// 解析应用运行模式
fn parse_app_mode(matches: &ArgMatches) -> Result<AppMode> {
    let mode = required(matches, "mode")?;
    match mode.as_str() {
        "worker" => Ok(AppMode::Worker),
        "create" => Ok(AppMode::Create {
            pipeline_id: required(matches, "pipeline-id")?.clone(),
            batch_count: matches
                .get_one::<i32>("batches")
                .copied()
                .ok_or_else(|| anyhow::anyhow!("缺少参数 --batches"))?,
            total_records: matches.get_one::<i64>("total-records").copied(),
        }),
        "split" => Ok(AppMode::Split {
            mission_id: required(matches, "mission-id")?.clone(),
        }),
        "dispatch" => Ok(AppMode::Dispatch {
            mission_id: required(matches, "mission-id")?.clone(),
        }),
        "redispatch" => Ok(AppMode::Redispatch {
            mission_id: required(matches, "mission-id")?.clone(),
        }),
        "progress" => Ok(AppMode::Progress {
            mission_id: required(matches, "mission-id")?.clone(),
        }),
        _ => Err(anyhow::anyhow!("不支持的运行模式: {mode}")),
    }
}

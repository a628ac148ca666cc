use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use tokio::signal;
use tracing::{error, info, warn};

use taskplane::{handlers::builtin_registry, Application, ShutdownManager};
use taskplane_core::AppConfig;
use taskplane_infrastructure::{init_structured_logging, install_prometheus_recorder, LoggingConfig};

/// 组件退出的最长等待时间，超过后直接退出进程
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("taskplane")
        .version(env!("CARGO_PKG_VERSION"))
        .about("任务处理控制平面")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/taskplane.toml、taskplane.toml"),
        )
        .arg(
            Arg::new("instance-id")
                .long("instance-id")
                .value_name("ID")
                .help("实例标识，用于领导选举与Worker命名，默认取主机名"),
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
                .value_parser(["json", "pretty", "compact"]),
        )
        .arg(
            Arg::new("print-default-config")
                .long("print-default-config")
                .help("输出默认配置后退出")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    if matches.get_flag("print-default-config") {
        let rendered =
            toml::to_string_pretty(&AppConfig::default()).context("序列化默认配置失败")?;
        println!("{rendered}");
        return Ok(());
    }

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).context("加载配置失败")?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    let logging = LoggingConfig::new(
        config.observability.log_level.clone(),
        &config.observability.log_format,
    )
    .context("日志配置无效")?;
    init_structured_logging(logging).context("初始化日志系统失败")?;

    let instance_id = match matches.get_one::<String>("instance-id") {
        Some(id) => id.clone(),
        None => default_instance_id(),
    };
    info!(instance = %instance_id, config = ?config_path, "启动Taskplane");

    let prometheus = if config.observability.metrics_enabled {
        Some(install_prometheus_recorder().context("初始化指标导出失败")?)
    } else {
        None
    };

    let app = Application::new(config, instance_id, builtin_registry(), prometheus)?;
    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let shutdown_manager = shutdown_manager.clone();
        tokio::spawn(async move { app.run(shutdown_manager).await })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
        result = &mut app_handle => {
            // 组件在收到信号之前就退出了，通常是启动失败
            shutdown_manager.shutdown().await;
            return match result {
                Ok(inner) => inner,
                Err(e) => Err(anyhow::anyhow!("应用任务异常退出: {e}")),
            };
        }
    }

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_GRACE, app_handle).await {
        Ok(Ok(Ok(()))) => info!("应用已优雅关闭"),
        Ok(Ok(Err(e))) => error!(error = %e, "应用运行失败"),
        Ok(Err(e)) => error!(error = %e, "应用任务异常退出"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("Taskplane已退出");
    Ok(())
}

fn default_instance_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{host}-{}", std::process::id())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "安装Ctrl+C信号处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "安装SIGTERM信号处理器失败");
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

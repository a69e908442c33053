use std::path::PathBuf;

use maplabel_config::{AppConfig, ConfigError};
use maplabel_frontend::cli::DemoOptions;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

fn main() {
    let mut args = std::env::args().skip(1);
    let mut config_override: Option<PathBuf> = None;
    let mut options = DemoOptions::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_override = Some(required_path(&mut args, "--config")),
            "--map" => options.map = Some(required_path(&mut args, "--map")),
            "--out" => options.out = Some(required_path(&mut args, "--out")),
            other => {
                eprintln!("未知参数：{other}");
                std::process::exit(1);
            }
        }
    }

    let config = load_configuration(config_override);
    init_logging(&config);
    info!("启动地图标注应用");

    match maplabel_frontend::run_cli_demo(&config, &options) {
        Ok(report) => info!(
            tested = report.frame.labels_tested,
            conflicted = report.frame.conflicted,
            saved = report.saved.is_some(),
            "CLI 演示完成"
        ),
        Err(err) => {
            error!(error = %err, "执行 CLI 演示失败");
            std::process::exit(1);
        }
    }
}

fn required_path(args: &mut impl Iterator<Item = String>, flag: &str) -> PathBuf {
    let Some(path) = args.next() else {
        eprintln!("`{flag}` 需要提供路径");
        std::process::exit(1);
    };
    PathBuf::from(path)
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}

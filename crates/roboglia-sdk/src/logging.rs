//! 日志初始化
//!
//! 安装 `tracing-subscriber` 的 fmt 订阅者，并通过 `tracing-log` 把 `log` crate
//! 的记录桥接进来。`RUST_LOG` 优先于配置中的过滤器。

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// 日志配置
///
/// ```toml
/// [logging]
/// filter = "info,roboglia_driver=debug"
/// ansi = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` 语法的过滤器
    pub filter: String,
    /// 终端颜色
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            ansi: true,
        }
    }
}

/// 以缺省配置（`info`）初始化日志
///
/// 已经初始化过时不做任何事并返回 `false`。
pub fn init_logger() -> bool {
    init_logger_with(&LoggingConfig::default())
}

/// 以指定配置初始化日志
pub fn init_logger_with(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }
    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::debug!("log bridge not installed: {}", e);
    }
    tracing::debug!("Logger initialized with filter '{}'", config.filter);
    true
}

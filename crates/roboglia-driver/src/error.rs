//! 驱动层错误类型定义

use roboglia_bus::BusError;
use roboglia_protocol::ConversionError;
use std::time::Duration;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 总线通信或端口错误
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// 取值不在转换变体的定义域内（如未映射的枚举值）
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// 配置错误（构造期发现，只影响正在构造的对象）
    #[error("Configuration error: {0}")]
    Config(String),

    /// 设备上不存在该寄存器
    #[error("Device '{device}' has no register '{register}'")]
    UnknownRegister { device: String, register: String },

    /// setup 在耐心窗口内没有完成
    #[error("Setup took longer than {patience:?} for '{name}'")]
    SetupTimeout { name: String, patience: Duration },

    /// setup 失败（返回错误或 panic）
    #[error("Setup failed for '{name}': {reason}")]
    SetupCrashed { name: String, reason: String },

    /// 多次有界 join 后工作线程仍未退出
    #[error("'{name}' did not stop after {attempts} join attempts")]
    StopTimeout { name: String, attempts: u32 },

    /// 线程创建失败
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

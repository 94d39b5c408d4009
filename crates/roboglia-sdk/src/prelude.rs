//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use roboglia_sdk::prelude::*;
//! ```

// 装配
pub use crate::config::{BusSpec, SdkConfig};
pub use crate::robot::Robot;

// 模型
pub use roboglia_driver::{Device, Register};
pub use roboglia_protocol::{RegisterSpec, Value};

// 循环
pub use roboglia_driver::{LoopConfig, PeriodicLoop, PeriodicWork, SyncKind, SyncLoop};

// 总线
pub use roboglia_bus::Bus;

// 错误类型
pub use crate::config::ConfigError;
pub use roboglia_bus::BusError;
pub use roboglia_driver::DriverError;

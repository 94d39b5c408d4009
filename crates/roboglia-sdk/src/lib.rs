//! # roboglia SDK
//!
//! 机器人硬件抽象和实时轮询框架的统一入口。
//!
//! # 分层
//!
//! - **协议层** ([`protocol`]): 寄存器单位换算、Dynamixel 指令包编解码
//! - **总线层** ([`bus`]): 总线抽象、仲裁门、批量事务、Dynamixel / I2C / Mock 实现
//! - **驱动层** ([`driver`]): 寄存器 / 设备模型、受控线程、周期循环、同步循环
//! - **装配层**: [`SdkConfig`]（TOML）和 [`Robot`]
//!
//! # 快速开始
//!
//! ```no_run
//! use roboglia_sdk::prelude::*;
//!
//! roboglia_sdk::init_logger();
//! let config = SdkConfig::from_file("robot.toml")?;
//! let mut robot = Robot::from_config(&config)?;
//! robot.start()?;
//! let position = robot.device("d01").unwrap().register("present_position")?.get_value()?;
//! println!("{}", position);
//! robot.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod logging;
pub mod prelude;
mod robot;

pub use roboglia_bus as bus;
pub use roboglia_driver as driver;
pub use roboglia_protocol as protocol;

pub use config::{BusSpec, ConfigError, SdkConfig};
pub use logging::{LoggingConfig, init_logger, init_logger_with};
pub use robot::{Robot, default_bus};

pub use roboglia_bus::{Bus, BusError};
pub use roboglia_driver::{
    Device, DriverError, LoopConfig, PeriodicLoop, Register, SyncKind, SyncLoop,
};
pub use roboglia_protocol::Value;

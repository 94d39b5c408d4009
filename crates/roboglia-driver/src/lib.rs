//! # roboglia Driver
//!
//! 寄存器 / 设备模型和后台循环引擎：
//!
//! - [`Register`] / [`Device`]：寄存器缓存、单位换算、主动或被动同步
//! - [`ControlledThread`]：可启动 / 停止 / 暂停 / 恢复的后台任务
//! - [`PeriodicLoop`]：带自适应频率调节的周期循环
//! - [`SyncLoop`]：每个 tick 执行批量总线事务的同步循环
//!
//! # 示例
//!
//! ```
//! use roboglia_bus::{Bus, MockBus};
//! use roboglia_driver::{Device, LoopConfig, SyncGroup, SyncKind, SyncLoop};
//! use roboglia_protocol::RegisterSpec;
//! use std::sync::Arc;
//!
//! let bus = Arc::new(MockBus::new("mock"));
//! bus.add_device(1);
//! bus.open().unwrap();
//!
//! let specs = [RegisterSpec::new("present_position", 36).size(2)];
//! let device = Device::new("d01", 1, bus.clone(), &specs).unwrap();
//!
//! let group = SyncGroup::new("read", vec![device], vec!["present_position".into()]).unwrap();
//! let mut sync = SyncLoop::new(SyncKind::GroupRead, group, LoopConfig::new(100.0)).unwrap();
//! sync.start(true).unwrap();
//! sync.stop(true).unwrap();
//! ```

mod config;
mod device;
mod error;
mod metrics;
pub mod periodic;
mod register;
mod regulator;
pub mod sync;
mod thread;

pub use config::LoopConfig;
pub use device::{DIRECT_ACCESS_TIMEOUT, Device, DeviceSpec};
pub use error::DriverError;
pub use metrics::{LoopMetrics, LoopMetricsSnapshot, SyncMetrics, SyncMetricsSnapshot};
pub use periodic::{FnWork, PeriodicLoop, PeriodicTask, PeriodicWork};
pub use register::Register;
pub use regulator::{FrequencyRegulator, Review};
pub use sync::{
    BulkReadWork, BulkWriteWork, GroupReadWork, GroupWriteWork, RangeReadWork, RangeWriteWork,
    Slot, SyncGroup, SyncKind, SyncLoop, SyncSpec,
};
pub use thread::{ControlledThread, DEFAULT_PATIENCE, Signals, Task, ThreadState};

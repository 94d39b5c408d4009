//! 同步循环
//!
//! 同步循环是一个周期循环，其工作单元每个 tick 对一组设备执行批量总线事务，
//! 让被动同步寄存器的缓存和硬件保持一致。
//!
//! # 事务形态
//!
//! | [`SyncKind`] | 工作单元 | 每 tick 的事务 |
//! |---|---|---|
//! | `GroupWrite` | [`GroupWriteWork`] | 每个寄存器名一个 SyncWrite |
//! | `GroupRead` | [`GroupReadWork`] | 每个寄存器名一个 SyncRead |
//! | `BulkWrite` | [`BulkWriteWork`] | 每个寄存器名一个 BulkWrite |
//! | `BulkRead` | [`BulkReadWork`] | 每个寄存器名一个 BulkRead |
//! | `RangeRead` | [`RangeReadWork`] | 每个设备一个块读 |
//! | `RangeWrite` | [`RangeWriteWork`] | 每个设备一个块写 |
//!
//! 形态在装配时通过 [`SyncLoop::from_spec`] 的 `match` 解析一次。

mod group;
mod work;

pub use group::{Slot, SyncGroup};
pub use work::{
    BulkReadWork, BulkWriteWork, GroupReadWork, GroupWriteWork, RangeReadWork, RangeWriteWork,
};

use crate::config::LoopConfig;
use crate::device::Device;
use crate::error::DriverError;
use crate::metrics::{LoopMetricsSnapshot, SyncMetrics, SyncMetricsSnapshot};
use crate::periodic::{PeriodicLoop, PeriodicWork};
use crate::thread::ThreadState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// 同步事务形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    GroupWrite,
    #[default]
    GroupRead,
    BulkWrite,
    BulkRead,
    RangeRead,
    RangeWrite,
}

impl SyncKind {
    /// 是否为读方向
    pub fn is_read(self) -> bool {
        matches!(
            self,
            SyncKind::GroupRead | SyncKind::BulkRead | SyncKind::RangeRead
        )
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SyncKind::GroupWrite => "group_write",
            SyncKind::GroupRead => "group_read",
            SyncKind::BulkWrite => "bulk_write",
            SyncKind::BulkRead => "bulk_read",
            SyncKind::RangeRead => "range_read",
            SyncKind::RangeWrite => "range_write",
        };
        f.write_str(text)
    }
}

/// 同步循环 schema 条目
///
/// # TOML 示例
///
/// ```toml
/// [[syncs]]
/// name = "read_pos"
/// kind = "group_read"
/// devices = ["d01", "d02"]
/// registers = ["present_position"]
/// frequency = 100.0
/// throttle = 0.05
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSpec {
    pub name: String,
    pub kind: SyncKind,
    /// 参与设备名称（有序）
    pub devices: Vec<String>,
    /// 寄存器名称（有序）
    pub registers: Vec<String>,
    /// 频率等循环参数
    #[serde(flatten)]
    pub timing: LoopConfig,
    /// 机器人启动时是否自动启动
    pub auto_start: bool,
}

impl Default for SyncSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: SyncKind::default(),
            devices: Vec::new(),
            registers: Vec::new(),
            timing: LoopConfig::default(),
            auto_start: true,
        }
    }
}

/// 同步循环
pub struct SyncLoop {
    inner: PeriodicLoop<Box<dyn PeriodicWork>>,
    kind: SyncKind,
    auto_start: bool,
    metrics: Arc<SyncMetrics>,
}

impl SyncLoop {
    /// 按形态选择工作单元并创建循环
    ///
    /// 总线不支持该形态时返回配置错误。
    pub fn new(kind: SyncKind, group: SyncGroup, config: LoopConfig) -> Result<Self, DriverError> {
        let name = group.name().to_string();
        let metrics = group.metrics().clone();
        let work: Box<dyn PeriodicWork> = match kind {
            SyncKind::GroupWrite => Box::new(GroupWriteWork::new(group)?),
            SyncKind::GroupRead => Box::new(GroupReadWork::new(group)?),
            SyncKind::BulkWrite => Box::new(BulkWriteWork::new(group)?),
            SyncKind::BulkRead => Box::new(BulkReadWork::new(group)?),
            SyncKind::RangeRead => Box::new(RangeReadWork::new(group)?),
            SyncKind::RangeWrite => Box::new(RangeWriteWork::new(group)?),
        };
        Ok(Self {
            inner: PeriodicLoop::new(name, config, work)?,
            kind,
            auto_start: true,
            metrics,
        })
    }

    /// 由 schema 条目创建；`resolve` 按名称查找设备
    pub fn from_spec(
        spec: &SyncSpec,
        resolve: impl Fn(&str) -> Option<Arc<Device>>,
    ) -> Result<Self, DriverError> {
        let devices = spec
            .devices
            .iter()
            .map(|name| {
                resolve(name).ok_or_else(|| {
                    DriverError::Config(format!(
                        "sync '{}' refers to unknown device '{}'",
                        spec.name, name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let group = SyncGroup::new(spec.name.clone(), devices, spec.registers.clone())?;
        let mut sync = Self::new(spec.kind, group, spec.timing.clone())?;
        sync.auto_start = spec.auto_start;
        Ok(sync)
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn kind(&self) -> SyncKind {
        self.kind
    }

    pub fn auto_start(&self) -> bool {
        self.auto_start
    }

    /// 事务指标
    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 频率指标
    pub fn loop_metrics(&self) -> LoopMetricsSnapshot {
        self.inner.metrics()
    }

    /// 底层周期循环
    pub fn as_loop(&self) -> &PeriodicLoop<Box<dyn PeriodicWork>> {
        &self.inner
    }

    pub fn start(&mut self, wait: bool) -> Result<(), DriverError> {
        self.inner.start(wait)
    }

    pub fn stop(&mut self, wait: bool) -> Result<(), DriverError> {
        self.inner.stop(wait)
    }

    pub fn pause(&self) {
        self.inner.pause()
    }

    pub fn resume(&self) {
        self.inner.resume()
    }

    pub fn started(&self) -> bool {
        self.inner.started()
    }

    pub fn stopped(&self) -> bool {
        self.inner.stopped()
    }

    pub fn running(&self) -> bool {
        self.inner.running()
    }

    pub fn paused(&self) -> bool {
        self.inner.paused()
    }

    pub fn crashed(&self) -> bool {
        self.inner.crashed()
    }

    pub fn state(&self) -> ThreadState {
        self.inner.state()
    }
}

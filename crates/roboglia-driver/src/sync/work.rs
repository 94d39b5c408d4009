//! 同步循环的工作单元
//!
//! 每个 tick 对每个寄存器名（块事务则对每个设备）执行一次总线事务：
//!
//! 1. 构造事务（写：每个设备一个序列化值；读：每个设备一个 ID）
//! 2. `try_lock()` 获取仲裁门，失败则记录并跳过，本 tick 内不重试
//! 3. 执行事务后立即释放仲裁门，然后才解析结果
//! 4. 读事务把每个设备的数据直接写入对应寄存器的内部值
//!
//! 任何失败都只记录日志和指标，不会传出 `atomic()`。

use super::group::SyncGroup;
use crate::error::DriverError;
use crate::periodic::PeriodicWork;
use roboglia_bus::{BulkRead, BulkWrite, GroupOp, SyncRead, SyncWrite};
use roboglia_protocol::{from_le_bytes, to_le_bytes};
use std::sync::atomic::Ordering;
use tracing::{debug, error, trace, warn};

/// 仲裁门被占用：记录并跳过
macro_rules! skip_busy {
    ($group:expr, $what:expr) => {{
        warn!(
            "Sync '{}' failed to acquire bus '{}' for {}; skipping",
            $group.name(),
            $group.bus().name(),
            $what
        );
        $group.metrics().skipped.fetch_add(1, Ordering::Relaxed);
    }};
}

fn record_error(group: &SyncGroup, what: &str, err: &dyn std::fmt::Display) {
    error!("Sync '{}' {} failed: {}", group.name(), what, err);
    group.metrics().errors.fetch_add(1, Ordering::Relaxed);
}

fn record_success(group: &SyncGroup) {
    group.metrics().transactions.fetch_add(1, Ordering::Relaxed);
}

fn record_missing(group: &SyncGroup, id: u8, register: &str) {
    warn!(
        "Sync '{}': no data for device {} register '{}'",
        group.name(),
        id,
        register
    );
    group.metrics().missing.fetch_add(1, Ordering::Relaxed);
}

/// SyncWrite：每个寄存器名一个包，所有设备地址相同
#[derive(Debug)]
pub struct GroupWriteWork {
    group: SyncGroup,
    txs: Vec<SyncWrite>,
}

impl GroupWriteWork {
    pub fn new(group: SyncGroup) -> Result<Self, DriverError> {
        group.require_group(GroupOp::SyncWrite)?;
        Ok(Self {
            group,
            txs: Vec::new(),
        })
    }

    pub fn group(&self) -> &SyncGroup {
        &self.group
    }
}

impl PeriodicWork for GroupWriteWork {
    fn setup(&mut self) -> Result<(), DriverError> {
        self.group.require_open()?;
        self.txs = self
            .group
            .uniform_layout()
            .into_iter()
            .map(|(address, size)| SyncWrite::new(address, size))
            .collect();
        Ok(())
    }

    fn atomic(&mut self) {
        let group = &self.group;
        group.metrics().ticks.fetch_add(1, Ordering::Relaxed);
        let Ok(bus) = group.require_group(GroupOp::SyncWrite) else {
            return;
        };
        for (tx, (row, name)) in self
            .txs
            .iter_mut()
            .zip(group.slots().iter().zip(group.register_names()))
        {
            tx.clear();
            for slot in row {
                if let Err(e) = tx.add_param(slot.id, slot.register.internal()) {
                    record_error(group, name, &e);
                }
            }
            let Some(guard) = bus.gate().try_lock() else {
                skip_busy!(group, name);
                continue;
            };
            let result = bus.sync_write(tx);
            drop(guard);
            match result {
                Ok(()) => record_success(group),
                Err(e) => record_error(group, name, &e),
            }
        }
    }
}

/// SyncRead：每个寄存器名一个包，所有设备地址相同
#[derive(Debug)]
pub struct GroupReadWork {
    group: SyncGroup,
    txs: Vec<SyncRead>,
}

impl GroupReadWork {
    pub fn new(group: SyncGroup) -> Result<Self, DriverError> {
        group.require_group(GroupOp::SyncRead)?;
        Ok(Self {
            group,
            txs: Vec::new(),
        })
    }

    pub fn group(&self) -> &SyncGroup {
        &self.group
    }
}

impl PeriodicWork for GroupReadWork {
    fn setup(&mut self) -> Result<(), DriverError> {
        self.group.require_open()?;
        self.txs = Vec::with_capacity(self.group.slots().len());
        for ((address, size), row) in self.group.uniform_layout().into_iter().zip(self.group.slots()) {
            let mut tx = SyncRead::new(address, size);
            for slot in row {
                tx.add_param(slot.id)?;
            }
            self.txs.push(tx);
        }
        Ok(())
    }

    fn atomic(&mut self) {
        let group = &self.group;
        group.metrics().ticks.fetch_add(1, Ordering::Relaxed);
        let Ok(bus) = group.require_group(GroupOp::SyncRead) else {
            return;
        };
        for (tx, (row, name)) in self
            .txs
            .iter()
            .zip(group.slots().iter().zip(group.register_names()))
        {
            let Some(guard) = bus.gate().try_lock() else {
                skip_busy!(group, name);
                continue;
            };
            let result = bus.sync_read(tx);
            drop(guard);
            let data = match result {
                Ok(data) => data,
                Err(e) => {
                    record_error(group, name, &e);
                    continue;
                },
            };
            record_success(group);
            for slot in row {
                match data.get_data(slot.id, tx.address(), tx.size()) {
                    Some(value) => slot.register.set_internal(value),
                    None => record_missing(group, slot.id, name),
                }
            }
        }
    }
}

/// BulkWrite：每个寄存器名一个包，各设备按自己的地址写
#[derive(Debug)]
pub struct BulkWriteWork {
    group: SyncGroup,
    txs: Vec<BulkWrite>,
}

impl BulkWriteWork {
    pub fn new(group: SyncGroup) -> Result<Self, DriverError> {
        group.require_group(GroupOp::BulkWrite)?;
        Ok(Self {
            group,
            txs: Vec::new(),
        })
    }

    pub fn group(&self) -> &SyncGroup {
        &self.group
    }
}

impl PeriodicWork for BulkWriteWork {
    fn setup(&mut self) -> Result<(), DriverError> {
        self.group.require_open()?;
        self.txs = self.group.slots().iter().map(|_| BulkWrite::new()).collect();
        Ok(())
    }

    fn atomic(&mut self) {
        let group = &self.group;
        group.metrics().ticks.fetch_add(1, Ordering::Relaxed);
        let Ok(bus) = group.require_group(GroupOp::BulkWrite) else {
            return;
        };
        for (tx, (row, name)) in self
            .txs
            .iter_mut()
            .zip(group.slots().iter().zip(group.register_names()))
        {
            tx.clear();
            for slot in row {
                let reg = &slot.register;
                if let Err(e) = tx.add_param(slot.id, reg.address(), reg.size(), reg.internal()) {
                    record_error(group, name, &e);
                }
            }
            let Some(guard) = bus.gate().try_lock() else {
                skip_busy!(group, name);
                continue;
            };
            let result = bus.bulk_write(tx);
            drop(guard);
            match result {
                Ok(()) => record_success(group),
                Err(e) => record_error(group, name, &e),
            }
        }
    }
}

/// BulkRead：每个寄存器名一个包，各设备按自己的地址读
#[derive(Debug)]
pub struct BulkReadWork {
    group: SyncGroup,
    txs: Vec<BulkRead>,
}

impl BulkReadWork {
    pub fn new(group: SyncGroup) -> Result<Self, DriverError> {
        group.require_group(GroupOp::BulkRead)?;
        Ok(Self {
            group,
            txs: Vec::new(),
        })
    }

    pub fn group(&self) -> &SyncGroup {
        &self.group
    }
}

impl PeriodicWork for BulkReadWork {
    fn setup(&mut self) -> Result<(), DriverError> {
        self.group.require_open()?;
        self.txs = Vec::with_capacity(self.group.slots().len());
        for row in self.group.slots() {
            let mut tx = BulkRead::new();
            for slot in row {
                tx.add_param(slot.id, slot.register.address(), slot.register.size())?;
            }
            self.txs.push(tx);
        }
        Ok(())
    }

    fn atomic(&mut self) {
        let group = &self.group;
        group.metrics().ticks.fetch_add(1, Ordering::Relaxed);
        let Ok(bus) = group.require_group(GroupOp::BulkRead) else {
            return;
        };
        for (tx, (row, name)) in self
            .txs
            .iter()
            .zip(group.slots().iter().zip(group.register_names()))
        {
            let Some(guard) = bus.gate().try_lock() else {
                skip_busy!(group, name);
                continue;
            };
            let result = bus.bulk_read(tx);
            drop(guard);
            let data = match result {
                Ok(data) => data,
                Err(e) => {
                    record_error(group, name, &e);
                    continue;
                },
            };
            record_success(group);
            for slot in row {
                let reg = &slot.register;
                match data.get_data(slot.id, reg.address(), reg.size()) {
                    Some(value) => reg.set_internal(value),
                    None => record_missing(group, slot.id, name),
                }
            }
        }
    }
}

/// 块读：每个设备一个事务，覆盖全部参与寄存器的连续地址块
///
/// 用于不支持 SyncRead / BulkRead 的设备（如 AX 系列）和 I2C 设备。
#[derive(Debug)]
pub struct RangeReadWork {
    group: SyncGroup,
    ranges: Vec<(u16, usize)>,
}

impl RangeReadWork {
    pub fn new(group: SyncGroup) -> Result<Self, DriverError> {
        group.require_block()?;
        Ok(Self {
            group,
            ranges: Vec::new(),
        })
    }

    pub fn group(&self) -> &SyncGroup {
        &self.group
    }
}

impl PeriodicWork for RangeReadWork {
    fn setup(&mut self) -> Result<(), DriverError> {
        self.group.require_open()?;
        self.ranges = (0..self.group.devices().len())
            .map(|d| self.group.device_range(d))
            .collect();
        Ok(())
    }

    fn atomic(&mut self) {
        let group = &self.group;
        group.metrics().ticks.fetch_add(1, Ordering::Relaxed);
        let Ok(bus) = group.require_block() else {
            return;
        };
        for (d, (device, &(start, length))) in group.devices().iter().zip(&self.ranges).enumerate()
        {
            let Some(guard) = bus.gate().try_lock() else {
                skip_busy!(group, device.name());
                continue;
            };
            let result = bus.read_block(device.id(), start, length);
            drop(guard);
            let block = match result {
                Ok(block) => block,
                Err(e) => {
                    record_error(group, device.name(), &e);
                    continue;
                },
            };
            record_success(group);
            trace!("[RangeRead] dev={} {:?}", device.id(), block);
            for (row, name) in group.slots().iter().zip(group.register_names()) {
                let reg = &row[d].register;
                let pos = (reg.address() - start) as usize;
                match block
                    .get(pos..pos + reg.size() as usize)
                    .and_then(|bytes| from_le_bytes(bytes, reg.size()).ok())
                {
                    Some(value) => reg.set_internal(value),
                    None => record_missing(group, device.id(), name),
                }
            }
        }
    }
}

/// 块写：每个设备一个事务，覆盖全部参与寄存器的连续地址块
///
/// 块内不属于参与寄存器的字节写 0。
#[derive(Debug)]
pub struct RangeWriteWork {
    group: SyncGroup,
    ranges: Vec<(u16, usize)>,
}

impl RangeWriteWork {
    pub fn new(group: SyncGroup) -> Result<Self, DriverError> {
        group.require_block()?;
        Ok(Self {
            group,
            ranges: Vec::new(),
        })
    }

    pub fn group(&self) -> &SyncGroup {
        &self.group
    }
}

impl PeriodicWork for RangeWriteWork {
    fn setup(&mut self) -> Result<(), DriverError> {
        self.group.require_open()?;
        self.ranges = (0..self.group.devices().len())
            .map(|d| self.group.device_range(d))
            .collect();
        Ok(())
    }

    fn atomic(&mut self) {
        let group = &self.group;
        group.metrics().ticks.fetch_add(1, Ordering::Relaxed);
        let Ok(bus) = group.require_block() else {
            return;
        };
        for (d, (device, &(start, length))) in group.devices().iter().zip(&self.ranges).enumerate()
        {
            let mut block = vec![0u8; length];
            for row in group.slots() {
                let reg = &row[d].register;
                let pos = (reg.address() - start) as usize;
                match to_le_bytes(reg.internal(), reg.size()) {
                    Ok(bytes) => block[pos..pos + bytes.len()].copy_from_slice(&bytes),
                    Err(e) => record_error(group, reg.name(), &e),
                }
            }
            let Some(guard) = bus.gate().try_lock() else {
                skip_busy!(group, device.name());
                continue;
            };
            let result = bus.write_block(device.id(), start, &block);
            drop(guard);
            match result {
                Ok(()) => {
                    record_success(group);
                    debug!("Sync '{}' wrote block {:?} to {}", group.name(), block, device.name());
                },
                Err(e) => record_error(group, device.name(), &e),
            }
        }
    }
}

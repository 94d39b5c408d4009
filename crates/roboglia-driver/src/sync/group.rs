//! 同步组：参与设备、寄存器名称和共享总线

use crate::device::Device;
use crate::error::DriverError;
use crate::metrics::SyncMetrics;
use crate::register::Register;
use roboglia_bus::{BlockBus, Bus, GroupBus, GroupOp};
use std::sync::Arc;
use tracing::warn;

/// 一个参与设备上的一个寄存器
#[derive(Debug, Clone)]
pub struct Slot {
    /// 设备 ID
    pub id: u8,
    pub register: Arc<Register>,
}

/// 同步组
///
/// 构造时校验：至少一个设备和一个寄存器名；每个寄存器在每个设备上都存在；
/// 所有设备挂在同一条总线上。参与的寄存器会被标记为被动同步。
pub struct SyncGroup {
    name: String,
    bus: Arc<dyn Bus>,
    devices: Vec<Arc<Device>>,
    register_names: Vec<String>,
    /// `slots[r][d]`：第 r 个寄存器名在第 d 个设备上的寄存器
    slots: Vec<Vec<Slot>>,
    metrics: Arc<SyncMetrics>,
}

impl SyncGroup {
    pub fn new(
        name: impl Into<String>,
        devices: Vec<Arc<Device>>,
        register_names: Vec<String>,
    ) -> Result<Self, DriverError> {
        let name = name.into();
        let Some(first) = devices.first() else {
            return Err(DriverError::Config(format!("sync '{}' has no devices", name)));
        };
        if register_names.is_empty() {
            return Err(DriverError::Config(format!("sync '{}' has no registers", name)));
        }
        let bus = first.bus().clone();
        if let Some(other) = devices.iter().find(|d| !same_bus(d.bus(), &bus)) {
            return Err(DriverError::Config(format!(
                "devices used by sync '{}' must share one bus: '{}' is on '{}', '{}' is on '{}'",
                name,
                first.name(),
                bus.name(),
                other.name(),
                other.bus().name()
            )));
        }

        let mut slots = Vec::with_capacity(register_names.len());
        for reg_name in &register_names {
            let mut row = Vec::with_capacity(devices.len());
            for device in &devices {
                let register = device.register(reg_name)?.clone();
                register.set_sync(true);
                row.push(Slot {
                    id: device.id(),
                    register,
                });
            }
            slots.push(row);
        }

        Ok(Self {
            name,
            bus,
            devices,
            register_names,
            slots,
            metrics: Arc::new(SyncMetrics::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    pub fn register_names(&self) -> &[String] {
        &self.register_names
    }

    /// 按寄存器名分组的参与寄存器
    pub fn slots(&self) -> &[Vec<Slot>] {
        &self.slots
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    /// 确认总线支持指定的批量事务
    pub fn require_group(&self, op: GroupOp) -> Result<&dyn GroupBus, DriverError> {
        match self.bus.as_group() {
            Some(group) if group.supports(op) => Ok(group),
            _ => Err(DriverError::Config(format!(
                "sync '{}': bus '{}' does not support {}",
                self.name,
                self.bus.name(),
                op
            ))),
        }
    }

    /// 确认总线支持块读写
    pub fn require_block(&self) -> Result<&dyn BlockBus, DriverError> {
        self.bus.as_block().ok_or_else(|| {
            DriverError::Config(format!(
                "sync '{}': bus '{}' does not support block access",
                self.name,
                self.bus.name()
            ))
        })
    }

    /// 确认总线已打开（setup 阶段调用）
    pub fn require_open(&self) -> Result<(), DriverError> {
        if self.bus.is_open() {
            Ok(())
        } else {
            Err(roboglia_bus::BusError::NotOpen(self.bus.name().to_string()).into())
        }
    }

    /// 每个寄存器名的 `(address, size)`，取第一个参与设备的布局
    ///
    /// 其他设备布局不同时记录警告。统一地址的事务（SyncWrite / SyncRead）用这个布局。
    pub fn uniform_layout(&self) -> Vec<(u16, u8)> {
        self.slots
            .iter()
            .map(|row| {
                let first = &row[0].register;
                let layout = (first.address(), first.size());
                for slot in &row[1..] {
                    if (slot.register.address(), slot.register.size()) != layout {
                        warn!(
                            "Sync '{}': register '{}' on device {} is at {}/{} but the first \
                             device uses {}/{}; using the first layout",
                            self.name,
                            first.name(),
                            slot.id,
                            slot.register.address(),
                            slot.register.size(),
                            layout.0,
                            layout.1
                        );
                    }
                }
                layout
            })
            .collect()
    }

    /// 第 d 个设备上全部参与寄存器覆盖的连续地址块 `(start, length)`
    pub fn device_range(&self, device: usize) -> (u16, usize) {
        let mut start = u16::MAX;
        let mut end = 0usize;
        for row in &self.slots {
            let register = &row[device].register;
            start = start.min(register.address());
            end = end.max(register.address() as usize + register.size() as usize);
        }
        (start, end - start as usize)
    }
}

impl std::fmt::Debug for SyncGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncGroup")
            .field("name", &self.name)
            .field("bus", &self.bus.name())
            .field("devices", &self.devices.iter().map(|d| d.name()).collect::<Vec<_>>())
            .field("registers", &self.register_names)
            .finish()
    }
}

/// 比较两个总线句柄是否指向同一对象（忽略 vtable）
fn same_bus(a: &Arc<dyn Bus>, b: &Arc<dyn Bus>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

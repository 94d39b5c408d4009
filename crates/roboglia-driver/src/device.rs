//! 设备
//!
//! 设备是挂在总线上的一组命名寄存器。寄存器按 schema 顺序保存，
//! 名称索引在构造时建立一次，之后不再做动态查找。

use crate::error::DriverError;
use crate::register::{Register, RegisterLayout};
use roboglia_bus::{Bus, BusError};
use roboglia_protocol::{Conversion, RegisterSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 直接读写时等待仲裁门的最长时间
///
/// 循环内部从不等待；直接调用方允许短暂等待，以便和循环共存。
pub const DIRECT_ACCESS_TIMEOUT: Duration = Duration::from_millis(50);

/// 设备 schema 条目
///
/// # TOML 示例
///
/// ```toml
/// [[devices]]
/// name = "d01"
/// id = 1
/// bus = "ttys1"
///
/// [[devices.registers]]
/// name = "present_position"
/// address = 36
/// size = 2
/// sync = true
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSpec {
    pub name: String,
    pub id: u8,
    /// 总线名称（由装配层解析）
    pub bus: String,
    pub registers: Vec<RegisterSpec>,
}

/// 设备
pub struct Device {
    name: String,
    id: u8,
    bus: Arc<dyn Bus>,
    registers: Vec<Arc<Register>>,
    index: HashMap<String, usize>,
}

impl Device {
    /// 由寄存器 schema 构造设备
    ///
    /// 所有寄存器的转换变体和范围先解析完毕，任何一项无效都返回配置错误；
    /// 重复的寄存器名称同样是配置错误。`factor_reg` 在这里解析为同设备寄存器的句柄：
    /// 目标必须存在、不能是自身、本身不能再带 `factor_reg`，引用方必须是线性变体。
    pub fn new(
        name: impl Into<String>,
        id: u8,
        bus: Arc<dyn Bus>,
        specs: &[RegisterSpec],
    ) -> Result<Arc<Self>, DriverError> {
        let name = name.into();
        let mut layouts = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(DriverError::Config(format!(
                    "device '{}' declares register '{}' more than once",
                    name, spec.name
                )));
            }
            layouts.push(resolve(&name, spec)?);
        }
        let factors = specs
            .iter()
            .zip(&layouts)
            .map(|(spec, layout)| resolve_factor(&name, spec, layout, specs, &index))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Arc::new_cyclic(|weak| {
            // 系数寄存器先建立，引用它们的寄存器在第二轮建立
            let mut slots: Vec<Option<Arc<Register>>> = vec![None; layouts.len()];
            for scaled in [false, true] {
                for (i, layout) in layouts.iter().enumerate() {
                    if factors[i].is_some() != scaled {
                        continue;
                    }
                    let factor_reg = factors[i].and_then(|j| slots[j].clone());
                    slots[i] = Some(Arc::new(Register::new(
                        layout.clone(),
                        weak.clone(),
                        factor_reg,
                    )));
                }
            }
            Device {
                registers: slots.into_iter().flatten().collect(),
                name,
                id,
                bus,
                index,
            }
        }))
    }

    /// 由设备 schema 构造（总线由调用方解析）
    pub fn from_spec(spec: &DeviceSpec, bus: Arc<dyn Bus>) -> Result<Arc<Self>, DriverError> {
        Self::new(spec.name.clone(), spec.id, bus, &spec.registers)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 总线上的设备 ID
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }

    /// 全部寄存器（schema 顺序）
    pub fn registers(&self) -> &[Arc<Register>] {
        &self.registers
    }

    /// 按名称查找寄存器
    pub fn get(&self, name: &str) -> Option<&Arc<Register>> {
        self.index.get(name).map(|&i| &self.registers[i])
    }

    /// 按名称查找寄存器，不存在时返回 `UnknownRegister`
    pub fn register(&self, name: &str) -> Result<&Arc<Register>, DriverError> {
        self.get(name).ok_or_else(|| DriverError::UnknownRegister {
            device: self.name.clone(),
            register: name.to_string(),
        })
    }

    /// 按地址查找寄存器
    pub fn register_by_address(&self, address: u16) -> Option<&Arc<Register>> {
        self.registers.iter().find(|r| r.address() == address)
    }

    /// 读取一个寄存器的内部值（不更新缓存）
    pub fn read_register(&self, register: &Register) -> Result<u32, DriverError> {
        let _guard = self.acquire()?;
        let value = self.bus.read(self.id, register.address(), register.size())?;
        debug!("[{}] read {} = {}", self.name, register.name(), value);
        Ok(value)
    }

    /// 把内部值写到一个寄存器
    pub fn write_register(&self, register: &Register, value: u32) -> Result<(), DriverError> {
        let _guard = self.acquire()?;
        self.bus.write(self.id, register.address(), register.size(), value)?;
        debug!("[{}] wrote {} = {}", self.name, register.name(), value);
        Ok(())
    }

    /// 打开设备：把所有寄存器从总线读一遍
    ///
    /// 被动寄存器同样读取，写同步循环启动时发送的就是这里读到的值。
    /// 单个寄存器失败只记录日志，继续读取其余寄存器；最后返回第一个错误。
    pub fn open(&self) -> Result<(), DriverError> {
        let mut first_error = None;
        for register in &self.registers {
            if let Err(e) = register.read() {
                warn!(
                    "Device '{}' failed to read register '{}' on open: {}",
                    self.name,
                    register.name(),
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// 关闭设备
    pub fn close(&self) {
        debug!("Device '{}' closed", self.name);
    }

    fn acquire(&self) -> Result<roboglia_bus::GateGuard<'_>, BusError> {
        self.bus
            .gate()
            .lock_timeout(DIRECT_ACCESS_TIMEOUT)
            .ok_or_else(|| BusError::Busy(self.bus.name().to_string()))
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("bus", &self.bus.name())
            .field("registers", &self.registers.len())
            .finish()
    }
}

fn resolve(device: &str, spec: &RegisterSpec) -> Result<RegisterLayout, DriverError> {
    let invalid = |e: roboglia_protocol::ConversionError| {
        DriverError::Config(format!("device '{}' register '{}': {}", device, spec.name, e))
    };
    let conversion = spec.conversion().map_err(invalid)?;
    let (min, max) = spec.bounds(&conversion).map_err(invalid)?;
    Ok(RegisterLayout {
        name: spec.name.clone(),
        address: spec.address,
        size: spec.size,
        min,
        max,
        access: spec.access,
        conversion,
        default: spec.default,
        sync: spec.sync,
    })
}

/// 解析 `factor_reg`，返回系数寄存器的下标
fn resolve_factor(
    device: &str,
    spec: &RegisterSpec,
    layout: &RegisterLayout,
    specs: &[RegisterSpec],
    index: &HashMap<String, usize>,
) -> Result<Option<usize>, DriverError> {
    let Some(target) = spec.factor_reg.as_deref() else {
        return Ok(None);
    };
    let invalid = |reason: String| {
        DriverError::Config(format!(
            "device '{}' register '{}': factor_reg {}",
            device, spec.name, reason
        ))
    };
    if !matches!(layout.conversion, Conversion::Linear { .. }) {
        return Err(invalid(format!(
            "needs a linear conversion, got {}",
            layout.conversion.kind_name()
        )));
    }
    let &j = index
        .get(target)
        .ok_or_else(|| invalid(format!("'{}' is not a register of this device", target)))?;
    if target == spec.name {
        return Err(invalid("cannot refer to the register itself".to_string()));
    }
    if specs[j].factor_reg.is_some() {
        return Err(invalid(format!("'{}' has a dynamic factor of its own", target)));
    }
    Ok(Some(j))
}

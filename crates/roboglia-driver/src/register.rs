//! 寄存器
//!
//! 寄存器保存一个定宽的内部整数，并通过转换变体在内部值和外部值之间换算。
//!
//! # 两种维护模式
//!
//! - **主动**：`get_value()` 先从总线读取，`set_value()` 换算后立即写总线
//! - **被动同步**（`sync = true`）：访问器只读写缓存，由同步循环负责刷新
//!
//! # 动态系数
//!
//! 线性寄存器可以引用同一设备上的另一个寄存器（`factor_reg`），外部值再乘以
//! 该寄存器缓存值对应的外部值。换算只读缓存，不会触发对方的总线读取。
//!
//! 内部值用原子变量保存：同一时刻只有一个权威写入方（设备的直接读写路径或
//! 某个同步循环），读取方可以在任意线程无锁读取。

use crate::device::Device;
use crate::error::DriverError;
use roboglia_protocol::{Access, Conversion, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// 寄存器
#[derive(Debug)]
pub struct Register {
    name: String,
    address: u16,
    size: u8,
    min: u32,
    max: u32,
    access: Access,
    conversion: Conversion,
    internal: AtomicU32,
    sync: AtomicBool,
    factor_reg: Option<Arc<Register>>,
    device: Weak<Device>,
}

/// 已解析的寄存器参数（构造设备时先全部解析，再一次性建立回指）
#[derive(Debug, Clone)]
pub(crate) struct RegisterLayout {
    pub name: String,
    pub address: u16,
    pub size: u8,
    pub min: u32,
    pub max: u32,
    pub access: Access,
    pub conversion: Conversion,
    pub default: u32,
    pub sync: bool,
}

impl Register {
    pub(crate) fn new(
        layout: RegisterLayout,
        device: Weak<Device>,
        factor_reg: Option<Arc<Register>>,
    ) -> Self {
        Self {
            name: layout.name,
            address: layout.address,
            size: layout.size,
            min: layout.min,
            max: layout.max,
            access: layout.access,
            conversion: layout.conversion,
            // 默认值来自 schema，构造时不校验
            internal: AtomicU32::new(layout.default),
            sync: AtomicBool::new(layout.sync),
            factor_reg,
            device,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    /// 字节宽度
    pub fn size(&self) -> u8 {
        self.size
    }

    /// 内部最小值
    pub fn min(&self) -> u32 {
        self.min
    }

    /// 内部最大值
    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::RW
    }

    pub fn conversion(&self) -> &Conversion {
        &self.conversion
    }

    /// 提供动态系数的寄存器
    pub fn factor_reg(&self) -> Option<&Arc<Register>> {
        self.factor_reg.as_ref()
    }

    /// 所属设备（设备已释放时为 `None`）
    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.upgrade()
    }

    /// 是否由同步循环被动维护
    pub fn is_sync(&self) -> bool {
        self.sync.load(Ordering::Acquire)
    }

    pub fn set_sync(&self, sync: bool) {
        self.sync.store(sync, Ordering::Release);
    }

    /// 缓存的内部值（不访问总线）
    pub fn internal(&self) -> u32 {
        self.internal.load(Ordering::Acquire)
    }

    /// 直接写入内部值（不钳位、不访问总线）
    ///
    /// 供同步循环这类可信的批量路径使用。
    pub fn set_internal(&self, value: u32) {
        self.internal.store(value, Ordering::Release);
    }

    /// 缓存值对应的外部值（不访问总线）
    pub fn value(&self) -> Value {
        self.external(self.internal())
    }

    /// 读取外部值
    ///
    /// 主动模式下先从总线刷新内部值。
    pub fn get_value(&self) -> Result<Value, DriverError> {
        if !self.is_sync() {
            self.read()?;
        }
        Ok(self.value())
    }

    /// 写入外部值
    ///
    /// - 只读寄存器：记录警告后直接返回 `Ok`，不改变任何状态
    /// - 换算失败（如未映射的枚举值）：返回错误，内部值保持不变
    /// - 其余情况先钳位到 `[min, max]` 再保存；主动模式下随后写总线
    ///
    /// 主动模式下缓存先于总线写入更新：写总线失败时返回错误，
    /// 但缓存已经是新值，与设备上的值不一致，需要时调用 [`Register::read`] 重新同步。
    pub fn set_value(&self, value: impl Into<Value>) -> Result<(), DriverError> {
        let value = value.into();
        if !self.is_writable() {
            warn!("Attempted to write to read-only register '{}'; ignored", self.name);
            return Ok(());
        }
        let raw = match self.dynamic_factor() {
            Some(scale) => self.conversion.to_internal_scaled(value, self.internal(), scale)?,
            None => self.conversion.to_internal(value, self.internal())?,
        };
        let internal = self.clamp(raw);
        trace!("[{}] {} -> internal {}", self.name, value, internal);
        self.set_internal(internal);
        if !self.is_sync() {
            self.write()?;
        }
        Ok(())
    }

    /// 从总线读取并保存内部值
    pub fn read(&self) -> Result<u32, DriverError> {
        let value = self.attached()?.read_register(self)?;
        self.set_internal(value);
        Ok(value)
    }

    /// 把当前内部值写到总线
    pub fn write(&self) -> Result<(), DriverError> {
        self.attached()?.write_register(self, self.internal())
    }

    /// 外部形式的最小值
    pub fn min_ext(&self) -> Value {
        self.external(self.min)
    }

    /// 外部形式的最大值
    pub fn max_ext(&self) -> Value {
        self.external(self.max)
    }

    /// 外部形式的范围 `(min, max)`
    pub fn range_ext(&self) -> (Value, Value) {
        (self.min_ext(), self.max_ext())
    }

    fn dynamic_factor(&self) -> Option<f64> {
        self.factor_reg.as_ref().map(|reg| reg.value().as_f64())
    }

    fn external(&self, internal: u32) -> Value {
        match self.dynamic_factor() {
            Some(scale) => self.conversion.to_external_scaled(internal, scale),
            None => self.conversion.to_external(internal),
        }
    }

    fn clamp(&self, raw: i64) -> u32 {
        raw.clamp(self.min as i64, self.max as i64) as u32
    }

    fn attached(&self) -> Result<Arc<Device>, DriverError> {
        self.device.upgrade().ok_or_else(|| {
            DriverError::Config(format!("register '{}' is detached from its device", self.name))
        })
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let internal = self.internal();
        write!(
            f,
            "[{}]: {} ({})",
            self.name,
            self.external(internal),
            internal
        )
    }
}

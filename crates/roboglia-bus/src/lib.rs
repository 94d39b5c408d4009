//! # roboglia Bus Layer
//!
//! 总线抽象层：统一的单寄存器读写接口、非阻塞仲裁门，以及按协议提供的批量事务。
//!
//! ## 能力分层
//!
//! - [`Bus`]：打开 / 关闭 / 状态、单寄存器读写、仲裁门
//! - [`GroupBus`]：SyncWrite / SyncRead / BulkWrite / BulkRead
//! - [`BlockBus`]：单设备的连续地址块读写
//!
//! 调用方通常持有 `Arc<dyn Bus>`，通过 [`Bus::as_group`] / [`Bus::as_block`]
//! 在装配阶段确认能力。
//!
//! ## 实现
//!
//! - [`DynamixelBus`]：Dynamixel Protocol 1.0 / 2.0（Linux 串口）
//! - `I2cBus`：Linux `i2c-dev`
//! - `MockBus`：内存总线（`mock` feature）

mod error;
mod gate;
mod transaction;

pub mod dynamixel;

#[cfg(target_os = "linux")]
pub mod i2c;

#[cfg(feature = "mock")]
pub mod mock;

pub use dynamixel::{DynamixelBus, DynamixelConfig, Transport};
pub use error::{BusError, CommStatus, DeviceStatus};
pub use gate::{BusGate, GateGuard};
pub use transaction::{
    BulkRead, BulkReadParam, BulkWrite, BulkWriteParam, GroupData, GroupOp, SyncRead, SyncWrite,
};

#[cfg(target_os = "linux")]
pub use i2c::{I2cBus, I2cConfig};

#[cfg(feature = "mock")]
pub use mock::MockBus;

/// 总线能力
///
/// 所有方法取 `&self`：总线在多个循环和直接调用方之间共享（`Arc<dyn Bus>`），
/// 端口状态由实现内部加锁保护。
///
/// 单寄存器读写本身不获取仲裁门，由调用方（设备层）负责。
pub trait Bus: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self) -> Result<(), BusError>;

    fn close(&self) -> Result<(), BusError>;

    fn is_open(&self) -> bool;

    /// 读取设备 `id` 在 `address` 处 `size` 字节的内部值
    fn read(&self, id: u8, address: u16, size: u8) -> Result<u32, BusError>;

    /// 向设备 `id` 的 `address` 写入 `size` 字节
    fn write(&self, id: u8, address: u16, size: u8, value: u32) -> Result<(), BusError>;

    /// 仲裁门
    fn gate(&self) -> &BusGate;

    /// 非阻塞获取仲裁门
    fn try_acquire(&self) -> bool {
        self.gate().try_acquire()
    }

    fn release(&self) {
        self.gate().release()
    }

    /// 批量事务能力（不支持时为 `None`）
    fn as_group(&self) -> Option<&dyn GroupBus> {
        None
    }

    /// 块读写能力（不支持时为 `None`）
    fn as_block(&self) -> Option<&dyn BlockBus> {
        None
    }
}

/// 批量事务能力
pub trait GroupBus: Bus {
    /// 当前协议是否支持该操作
    fn supports(&self, op: GroupOp) -> bool;

    fn sync_write(&self, tx: &SyncWrite) -> Result<(), BusError>;

    fn sync_read(&self, tx: &SyncRead) -> Result<GroupData, BusError>;

    fn bulk_write(&self, tx: &BulkWrite) -> Result<(), BusError>;

    fn bulk_read(&self, tx: &BulkRead) -> Result<GroupData, BusError>;
}

/// 块读写能力（单设备、连续地址）
pub trait BlockBus: Bus {
    fn read_block(&self, id: u8, address: u16, length: usize) -> Result<Vec<u8>, BusError>;

    fn write_block(&self, id: u8, address: u16, data: &[u8]) -> Result<(), BusError>;
}

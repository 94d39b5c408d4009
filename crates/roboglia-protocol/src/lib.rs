//! # roboglia Protocol
//!
//! 寄存器数值模型与总线协议编解码（无硬件依赖）
//!
//! ## 模块
//!
//! - `value`: 寄存器外部值（`Value`）
//! - `conversion`: 内部整数 ↔ 外部值的转换变体
//! - `codec`: 寄存器字节序列化（低字节在前）
//! - `schema`: 寄存器 schema 条目（`RegisterSpec`）
//! - `dynamixel`: Dynamixel Protocol 1.0 / 2.0 数据包编解码
//!
//! ## 字节序
//!
//! 多字节寄存器统一使用小端字节序（低字节在前），与 Dynamixel 和 SMBus word 访问一致。

pub mod codec;
pub mod conversion;
pub mod dynamixel;
mod error;
pub mod schema;
pub mod value;

pub use codec::{from_le_bytes, max_for_size, to_le_bytes};
pub use conversion::{BitMode, BoolOptions, Conversion, EnumTable, round_internal};
pub use error::{ConversionError, ProtocolError};
pub use schema::{Access, ConversionKind, RegisterSpec};
pub use value::Value;

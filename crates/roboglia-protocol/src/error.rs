//! 协议层错误类型定义

use crate::dynamixel::Protocol;
use crate::value::Value;
use thiserror::Error;

/// 协议编解码错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// 包头不匹配
    #[error("Invalid packet header")]
    InvalidHeader,

    /// 长度不符合预期
    #[error("Invalid packet length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// 校验和（1.0）或 CRC（2.0）不匹配
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// 状态包来自非预期的设备
    #[error("Unexpected device id in status packet: expected {expected}, got {actual}")]
    UnexpectedId { expected: u8, actual: u8 },

    /// 寄存器宽度不受支持（只支持 1/2/4 字节）
    #[error("Unsupported register size: {size}")]
    UnsupportedSize { size: u8 },

    /// 数值超出寄存器宽度
    #[error("Value {value} does not fit in {size} byte(s)")]
    ValueOutOfRange { value: u32, size: u8 },

    /// 地址或长度超出协议字段宽度
    #[error("Address or length {value} out of range for {protocol}")]
    FieldOutOfRange { value: u32, protocol: Protocol },

    /// 协议不支持的指令
    #[error("{instruction} is not supported by {protocol}")]
    Unsupported {
        instruction: &'static str,
        protocol: Protocol,
    },
}

/// 数值转换错误
///
/// 由 `Conversion::to_internal` 同步抛给 setter 的调用方。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// 枚举转换表中不存在该外部值
    #[error("Value {value} is not mapped by the enumerated conversion")]
    NotMapped { value: Value },

    /// 转换参数无效（构造期检查）
    #[error("Invalid conversion parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidLength {
            expected: 8,
            actual: 4,
        };
        assert_eq!(format!("{}", err), "Invalid packet length: expected 8, got 4");

        let err = ProtocolError::Unsupported {
            instruction: "SyncRead",
            protocol: Protocol::V1,
        };
        assert!(format!("{}", err).contains("SyncRead"));
        assert!(format!("{}", err).contains("1.0"));
    }

    #[test]
    fn test_conversion_error_display() {
        let err = ConversionError::NotMapped {
            value: Value::Int(42),
        };
        assert_eq!(
            format!("{}", err),
            "Value 42 is not mapped by the enumerated conversion"
        );
    }
}

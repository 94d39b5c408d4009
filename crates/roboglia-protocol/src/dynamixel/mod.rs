//! Dynamixel Protocol 1.0 / 2.0
//!
//! 指令包编码、状态包解码，以及各种读写指令的参数布局。
//! 传输层（串口）不在这里，见 `roboglia-bus`。

mod crc;
mod packet;

pub use crc::crc16;
pub use packet::{
    InstructionPacket, StatusPacket, bulk_read_params, bulk_write_params, read_params,
    status_header_len, status_total_len, sync_read_params, sync_write_params, write_params,
};

use crate::error::ProtocolError;
use std::fmt;

/// 广播 ID（所有设备接收，但不回复状态包）
pub const BROADCAST_ID: u8 = 0xFE;

/// 协议版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "f64", into = "f64")
)]
pub enum Protocol {
    V1,
    #[default]
    V2,
}

impl Protocol {
    pub fn version(self) -> f64 {
        match self {
            Protocol::V1 => 1.0,
            Protocol::V2 => 2.0,
        }
    }

    /// 协议是否支持该批量指令
    pub fn supports(self, instruction: Instruction) -> bool {
        match instruction {
            Instruction::SyncRead | Instruction::BulkWrite => self == Protocol::V2,
            _ => true,
        }
    }

    /// 不支持时返回 `ProtocolError::Unsupported`
    pub fn require(self, instruction: Instruction) -> Result<(), ProtocolError> {
        if self.supports(instruction) {
            Ok(())
        } else {
            Err(ProtocolError::Unsupported {
                instruction: instruction.name(),
                protocol: self,
            })
        }
    }
}

impl TryFrom<f64> for Protocol {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value == 1.0 {
            Ok(Protocol::V1)
        } else if value == 2.0 {
            Ok(Protocol::V2)
        } else {
            Err(format!("unsupported Dynamixel protocol version {}", value))
        }
    }
}

impl From<Protocol> for f64 {
    fn from(value: Protocol) -> Self {
        value.version()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Protocol {:.1}", self.version())
    }
}

/// 指令码
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, num_enum::IntoPrimitive, num_enum::TryFromPrimitive,
)]
#[repr(u8)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    RegWrite = 0x04,
    Action = 0x05,
    FactoryReset = 0x06,
    Reboot = 0x08,
    /// 2.0 状态包的指令字段
    Status = 0x55,
    SyncRead = 0x82,
    SyncWrite = 0x83,
    BulkRead = 0x92,
    BulkWrite = 0x93,
}

impl Instruction {
    pub fn name(self) -> &'static str {
        match self {
            Instruction::Ping => "Ping",
            Instruction::Read => "Read",
            Instruction::Write => "Write",
            Instruction::RegWrite => "RegWrite",
            Instruction::Action => "Action",
            Instruction::FactoryReset => "FactoryReset",
            Instruction::Reboot => "Reboot",
            Instruction::Status => "Status",
            Instruction::SyncRead => "SyncRead",
            Instruction::SyncWrite => "SyncWrite",
            Instruction::BulkRead => "BulkRead",
            Instruction::BulkWrite => "BulkWrite",
        }
    }
}

const V1_ERROR_BITS: [&str; 7] = [
    "input voltage error",
    "angle limit error",
    "overheating error",
    "range error",
    "checksum error",
    "overload error",
    "instruction error",
];

/// 解析状态包错误字节
///
/// 1.0 为位标志；2.0 的低 7 位为错误码，最高位为硬件告警。
/// 无错误时返回空列表。
pub fn status_error_flags(protocol: Protocol, error: u8) -> Vec<&'static str> {
    let mut flags = Vec::new();
    match protocol {
        Protocol::V1 => {
            for (bit, name) in V1_ERROR_BITS.iter().enumerate() {
                if error & (1 << bit) != 0 {
                    flags.push(*name);
                }
            }
        },
        Protocol::V2 => {
            if error & 0x80 != 0 {
                flags.push("hardware error alert");
            }
            match error & 0x7F {
                0 => {},
                1 => flags.push("result fail"),
                2 => flags.push("instruction error"),
                3 => flags.push("CRC error"),
                4 => flags.push("data range error"),
                5 => flags.push("data length error"),
                6 => flags.push("data limit error"),
                7 => flags.push("access error"),
                _ => flags.push("unknown error"),
            }
        },
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_support() {
        assert!(Protocol::V1.supports(Instruction::SyncWrite));
        assert!(Protocol::V1.supports(Instruction::BulkRead));
        assert!(!Protocol::V1.supports(Instruction::SyncRead));
        assert!(!Protocol::V1.supports(Instruction::BulkWrite));
        assert!(Protocol::V2.supports(Instruction::SyncRead));
        assert!(Protocol::V1.require(Instruction::BulkWrite).is_err());
    }

    #[test]
    fn test_protocol_version_parsing() {
        assert_eq!(Protocol::try_from(1.0), Ok(Protocol::V1));
        assert_eq!(Protocol::try_from(2.0), Ok(Protocol::V2));
        assert!(Protocol::try_from(1.5).is_err());
        assert_eq!(Protocol::V1.to_string(), "Protocol 1.0");
    }

    #[test]
    fn test_instruction_codes() {
        assert_eq!(u8::from(Instruction::SyncRead), 0x82);
        assert_eq!(Instruction::try_from(0x93u8), Ok(Instruction::BulkWrite));
        assert!(Instruction::try_from(0x42u8).is_err());
    }

    #[test]
    fn test_status_error_flags() {
        assert!(status_error_flags(Protocol::V1, 0).is_empty());
        assert_eq!(
            status_error_flags(Protocol::V1, 0b0010_0100),
            vec!["overheating error", "overload error"]
        );
        assert_eq!(
            status_error_flags(Protocol::V2, 0x84),
            vec!["hardware error alert", "data range error"]
        );
    }
}

//! 总线层错误类型定义

use crate::transaction::GroupOp;
use roboglia_protocol::ProtocolError;
use roboglia_protocol::dynamixel::{Protocol, status_error_flags};
use std::fmt;
use thiserror::Error;

/// 传输层通信状态
///
/// 与 Dynamixel SDK 的 `COMM_*` 结果码一一对应，I2C 和 Mock 总线复用其中的子集。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommStatus {
    Success,
    /// 端口被占用
    PortBusy,
    /// 指令包发送失败
    TxFail,
    /// 状态包接收失败
    RxFail,
    /// 指令包构造错误
    TxError,
    /// 正在等待状态包
    RxWaiting,
    /// 状态包接收超时（设备无响应）
    RxTimeout,
    /// 状态包损坏（校验失败或长度不符）
    RxCorrupt,
    /// 该总线不支持此操作
    NotAvailable,
}

impl CommStatus {
    pub fn is_success(self) -> bool {
        self == CommStatus::Success
    }
}

impl fmt::Display for CommStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CommStatus::Success => "communication success",
            CommStatus::PortBusy => "port is in use",
            CommStatus::TxFail => "failed to transmit instruction packet",
            CommStatus::RxFail => "failed to get status packet",
            CommStatus::TxError => "incorrect instruction packet",
            CommStatus::RxWaiting => "now receiving status packet",
            CommStatus::RxTimeout => "no status packet",
            CommStatus::RxCorrupt => "incorrect status packet",
            CommStatus::NotAvailable => "operation not available",
        };
        f.write_str(text)
    }
}

/// 设备层状态（状态包中的错误字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStatus {
    pub error: u8,
    /// 错误字节的解释方式；`None` 表示非 Dynamixel 设备
    pub protocol: Option<Protocol>,
}

impl DeviceStatus {
    /// 无设备错误
    pub const fn none() -> Self {
        Self {
            error: 0,
            protocol: None,
        }
    }

    pub const fn dynamixel(protocol: Protocol, error: u8) -> Self {
        Self {
            error,
            protocol: Some(protocol),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error == 0
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error == 0 {
            return f.write_str("no device error");
        }
        match self.protocol {
            Some(protocol) => write!(
                f,
                "device error {:#04x} ({})",
                self.error,
                status_error_flags(protocol, self.error).join(", ")
            ),
            None => write!(f, "device error {:#04x}", self.error),
        }
    }
}

/// 总线层统一错误类型
#[derive(Error, Debug)]
pub enum BusError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// 通信失败：同时携带传输层状态和设备层状态，两者都正常才算成功
    #[error("Communication error: {transport}; {device}")]
    Communication {
        transport: CommStatus,
        device: DeviceStatus,
    },

    #[error("Bus `{0}` is not open")]
    NotOpen(String),

    /// 总线仲裁门被其他事务占用
    #[error("Bus `{0}` is busy")]
    Busy(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{op} is not supported by bus `{bus}`")]
    Unsupported { op: GroupOp, bus: String },

    /// 同一事务中重复添加设备
    #[error("Device {id} already added to the transaction")]
    DuplicateParam { id: u8 },

    #[error("Invalid bus configuration: {0}")]
    Config(String),
}

impl BusError {
    /// 纯传输层失败（设备层无错误）
    pub fn transport(status: CommStatus) -> Self {
        BusError::Communication {
            transport: status,
            device: DeviceStatus::none(),
        }
    }

    /// 传输成功但设备返回错误
    pub fn device(status: DeviceStatus) -> Self {
        BusError::Communication {
            transport: CommStatus::Success,
            device: status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comm_status_display() {
        assert_eq!(CommStatus::RxTimeout.to_string(), "no status packet");
        assert!(CommStatus::Success.is_success());
        assert!(!CommStatus::RxCorrupt.is_success());
    }

    #[test]
    fn test_communication_error_carries_both_statuses() {
        let err = BusError::device(DeviceStatus::dynamixel(Protocol::V1, 0b0000_0100));
        let msg = err.to_string();
        assert!(msg.contains("communication success"), "{}", msg);
        assert!(msg.contains("overheating error"), "{}", msg);

        let err = BusError::transport(CommStatus::RxTimeout);
        assert!(err.to_string().contains("no device error"));
    }

    #[test]
    fn test_protocol_error_conversion() {
        let err: BusError = ProtocolError::UnsupportedSize { size: 3 }.into();
        assert!(matches!(err, BusError::Protocol(_)));
    }
}

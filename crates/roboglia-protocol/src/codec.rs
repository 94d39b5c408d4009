//! 寄存器字节序列化
//!
//! 多字节寄存器统一低字节在前。支持 1 / 2 / 4 字节宽度。

use crate::error::ProtocolError;
use smallvec::SmallVec;

/// 寄存器字节缓冲（最多 4 字节，栈上分配）
pub type RegisterBytes = SmallVec<[u8; 4]>;

/// 给定宽度的最大内部值（`2^(8*size) - 1`）
pub fn max_for_size(size: u8) -> Result<u32, ProtocolError> {
    match size {
        1 => Ok(0xFF),
        2 => Ok(0xFFFF),
        4 => Ok(0xFFFF_FFFF),
        _ => Err(ProtocolError::UnsupportedSize { size }),
    }
}

/// 把内部值按小端序列化为 `size` 字节
pub fn to_le_bytes(value: u32, size: u8) -> Result<RegisterBytes, ProtocolError> {
    let max = max_for_size(size)?;
    if value > max {
        return Err(ProtocolError::ValueOutOfRange { value, size });
    }
    Ok(SmallVec::from_slice(&value.to_le_bytes()[..size as usize]))
}

/// 从小端字节解析内部值
///
/// `bytes` 长度必须等于 `size`。
pub fn from_le_bytes(bytes: &[u8], size: u8) -> Result<u32, ProtocolError> {
    max_for_size(size)?;
    if bytes.len() != size as usize {
        return Err(ProtocolError::InvalidLength {
            expected: size as usize,
            actual: bytes.len(),
        });
    }
    let mut buf = [0u8; 4];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(u32::from_le_bytes(buf))
}

//! 指令包 / 状态包编解码与参数布局
//!
//! ```text
//! 1.0: FF FF | ID | LEN | INST | PARAMS... | CHECKSUM
//! 2.0: FF FF FD 00 | ID | LEN_L LEN_H | INST | PARAMS... | CRC_L CRC_H
//! ```
//!
//! 2.0 对 INST 之后的字节做字节填充：出现 `FF FF FD` 时在其后插入 `FD`。

use super::{Instruction, Protocol, crc16};
use crate::error::ProtocolError;

const V1_HEADER: [u8; 2] = [0xFF, 0xFF];
const V2_HEADER: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];

/// 指令包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPacket {
    pub id: u8,
    pub instruction: Instruction,
    pub params: Vec<u8>,
}

impl InstructionPacket {
    pub fn new(id: u8, instruction: Instruction, params: Vec<u8>) -> Self {
        Self {
            id,
            instruction,
            params,
        }
    }

    /// 编码为线上字节
    pub fn encode(&self, protocol: Protocol) -> Result<Vec<u8>, ProtocolError> {
        protocol.require(self.instruction)?;
        encode_frame(protocol, self.id, self.instruction.into(), &self.params)
    }
}

/// 状态包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPacket {
    pub id: u8,
    /// 设备错误字节（0 表示无错误）
    pub error: u8,
    pub params: Vec<u8>,
}

impl StatusPacket {
    /// 从完整的线上字节解码
    pub fn decode(protocol: Protocol, bytes: &[u8]) -> Result<Self, ProtocolError> {
        let total = status_total_len(protocol, bytes)?;
        if bytes.len() != total {
            return Err(ProtocolError::InvalidLength {
                expected: total,
                actual: bytes.len(),
            });
        }
        match protocol {
            Protocol::V1 => {
                let expected = v1_checksum(&bytes[2..total - 1]);
                let actual = bytes[total - 1];
                if expected != actual {
                    return Err(ProtocolError::ChecksumMismatch {
                        expected: expected as u16,
                        actual: actual as u16,
                    });
                }
                Ok(StatusPacket {
                    id: bytes[2],
                    error: bytes[4],
                    params: bytes[5..total - 1].to_vec(),
                })
            },
            Protocol::V2 => {
                let expected = crc16(&bytes[..total - 2]);
                let actual = u16::from_le_bytes([bytes[total - 2], bytes[total - 1]]);
                if expected != actual {
                    return Err(ProtocolError::ChecksumMismatch { expected, actual });
                }
                let body = remove_stuffing(&bytes[7..total - 2]);
                if body.len() < 2 || body[0] != u8::from(Instruction::Status) {
                    return Err(ProtocolError::InvalidHeader);
                }
                Ok(StatusPacket {
                    id: bytes[4],
                    error: body[1],
                    params: body[2..].to_vec(),
                })
            },
        }
    }

    /// 编码为线上字节（模拟设备用）
    pub fn encode(&self, protocol: Protocol) -> Result<Vec<u8>, ProtocolError> {
        match protocol {
            Protocol::V1 => {
                let mut body = Vec::with_capacity(self.params.len() + 1);
                body.push(self.error);
                body.extend_from_slice(&self.params);
                encode_v1(self.id, &body)
            },
            Protocol::V2 => {
                let mut body = Vec::with_capacity(self.params.len() + 2);
                body.push(Instruction::Status.into());
                body.push(self.error);
                body.extend_from_slice(&self.params);
                encode_v2(self.id, &body)
            },
        }
    }
}

/// 状态包头长度（读取时先读这么多字节以确定总长度）
pub fn status_header_len(protocol: Protocol) -> usize {
    match protocol {
        Protocol::V1 => 4,
        Protocol::V2 => 7,
    }
}

/// 根据包头计算状态包总长度
pub fn status_total_len(protocol: Protocol, header: &[u8]) -> Result<usize, ProtocolError> {
    let header_len = status_header_len(protocol);
    if header.len() < header_len {
        return Err(ProtocolError::InvalidLength {
            expected: header_len,
            actual: header.len(),
        });
    }
    match protocol {
        Protocol::V1 => {
            if header[..2] != V1_HEADER {
                return Err(ProtocolError::InvalidHeader);
            }
            let len = header[3] as usize;
            if len < 2 {
                return Err(ProtocolError::InvalidLength {
                    expected: 2,
                    actual: len,
                });
            }
            Ok(header_len + len)
        },
        Protocol::V2 => {
            if header[..4] != V2_HEADER {
                return Err(ProtocolError::InvalidHeader);
            }
            let len = u16::from_le_bytes([header[5], header[6]]) as usize;
            if len < 4 {
                return Err(ProtocolError::InvalidLength {
                    expected: 4,
                    actual: len,
                });
            }
            Ok(header_len + len)
        },
    }
}

fn encode_frame(
    protocol: Protocol,
    id: u8,
    instruction: u8,
    params: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::with_capacity(params.len() + 1);
    body.push(instruction);
    body.extend_from_slice(params);
    match protocol {
        Protocol::V1 => encode_v1(id, &body),
        Protocol::V2 => encode_v2(id, &body),
    }
}

fn encode_v1(id: u8, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = body.len() + 1;
    if len > u8::MAX as usize {
        return Err(ProtocolError::FieldOutOfRange {
            value: len as u32,
            protocol: Protocol::V1,
        });
    }
    let mut out = Vec::with_capacity(len + 4);
    out.extend_from_slice(&V1_HEADER);
    out.push(id);
    out.push(len as u8);
    out.extend_from_slice(body);
    let checksum = v1_checksum(&out[2..]);
    out.push(checksum);
    Ok(out)
}

fn encode_v2(id: u8, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let stuffed = add_stuffing(body);
    let len = stuffed.len() + 2;
    if len > u16::MAX as usize {
        return Err(ProtocolError::FieldOutOfRange {
            value: len as u32,
            protocol: Protocol::V2,
        });
    }
    let mut out = Vec::with_capacity(len + 7);
    out.extend_from_slice(&V2_HEADER);
    out.push(id);
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&stuffed);
    let crc = crc16(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

fn v1_checksum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn add_stuffing(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 2);
    for (i, &b) in body.iter().enumerate() {
        out.push(b);
        if i >= 2 && body[i - 2..=i] == [0xFF, 0xFF, 0xFD] {
            out.push(0xFD);
        }
    }
    out
}

fn remove_stuffing(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    for (i, &b) in body.iter().enumerate() {
        if b == 0xFD && i >= 3 && body[i - 3..i] == [0xFF, 0xFF, 0xFD] {
            continue;
        }
        out.push(b);
    }
    out
}

fn check_v1_field(value: usize) -> Result<u8, ProtocolError> {
    u8::try_from(value).map_err(|_| ProtocolError::FieldOutOfRange {
        value: value as u32,
        protocol: Protocol::V1,
    })
}

fn check_v2_field(value: usize) -> Result<[u8; 2], ProtocolError> {
    u16::try_from(value)
        .map(u16::to_le_bytes)
        .map_err(|_| ProtocolError::FieldOutOfRange {
            value: value as u32,
            protocol: Protocol::V2,
        })
}

/// Read 指令参数
pub fn read_params(protocol: Protocol, address: u16, length: usize) -> Result<Vec<u8>, ProtocolError> {
    match protocol {
        Protocol::V1 => Ok(vec![
            check_v1_field(address as usize)?,
            check_v1_field(length)?,
        ]),
        Protocol::V2 => {
            let mut out = address.to_le_bytes().to_vec();
            out.extend_from_slice(&check_v2_field(length)?);
            Ok(out)
        },
    }
}

/// Write 指令参数
pub fn write_params(protocol: Protocol, address: u16, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = match protocol {
        Protocol::V1 => vec![check_v1_field(address as usize)?],
        Protocol::V2 => address.to_le_bytes().to_vec(),
    };
    out.extend_from_slice(data);
    Ok(out)
}

/// SyncWrite 指令参数：公共地址和长度，后接每个设备的 `(id, data)`
pub fn sync_write_params(
    protocol: Protocol,
    address: u16,
    length: usize,
    entries: &[(u8, &[u8])],
) -> Result<Vec<u8>, ProtocolError> {
    let mut out = match protocol {
        Protocol::V1 => vec![check_v1_field(address as usize)?, check_v1_field(length)?],
        Protocol::V2 => {
            let mut out = address.to_le_bytes().to_vec();
            out.extend_from_slice(&check_v2_field(length)?);
            out
        },
    };
    for (id, data) in entries {
        if data.len() != length {
            return Err(ProtocolError::InvalidLength {
                expected: length,
                actual: data.len(),
            });
        }
        out.push(*id);
        out.extend_from_slice(data);
    }
    Ok(out)
}

/// SyncRead 指令参数（仅 2.0）
pub fn sync_read_params(
    protocol: Protocol,
    address: u16,
    length: usize,
    ids: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    protocol.require(Instruction::SyncRead)?;
    let mut out = address.to_le_bytes().to_vec();
    out.extend_from_slice(&check_v2_field(length)?);
    out.extend_from_slice(ids);
    Ok(out)
}

/// BulkRead 指令参数，`entries` 为 `(id, address, length)`
pub fn bulk_read_params(
    protocol: Protocol,
    entries: &[(u8, u16, usize)],
) -> Result<Vec<u8>, ProtocolError> {
    match protocol {
        Protocol::V1 => {
            let mut out = vec![0x00];
            for (id, address, length) in entries {
                out.push(check_v1_field(*length)?);
                out.push(*id);
                out.push(check_v1_field(*address as usize)?);
            }
            Ok(out)
        },
        Protocol::V2 => {
            let mut out = Vec::with_capacity(entries.len() * 5);
            for (id, address, length) in entries {
                out.push(*id);
                out.extend_from_slice(&address.to_le_bytes());
                out.extend_from_slice(&check_v2_field(*length)?);
            }
            Ok(out)
        },
    }
}

/// BulkWrite 指令参数（仅 2.0），`entries` 为 `(id, address, data)`
pub fn bulk_write_params(
    protocol: Protocol,
    entries: &[(u8, u16, &[u8])],
) -> Result<Vec<u8>, ProtocolError> {
    protocol.require(Instruction::BulkWrite)?;
    let mut out = Vec::new();
    for (id, address, data) in entries {
        out.push(*id);
        out.extend_from_slice(&address.to_le_bytes());
        out.extend_from_slice(&check_v2_field(data.len())?);
        out.extend_from_slice(data);
    }
    Ok(out)
}

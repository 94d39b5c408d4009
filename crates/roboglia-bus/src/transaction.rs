//! 批量事务上下文
//!
//! 每种批量指令对应一个上下文：先为每个设备 `add_param`，再交给
//! [`GroupBus`](crate::GroupBus) 执行，最后 `clear` 以便下一周期复用。
//!
//! - `SyncWrite` / `SyncRead`：所有设备共用同一地址和长度
//! - `BulkWrite` / `BulkRead`：每个设备可以有各自的地址和长度，
//!   但同一个包里一个设备只能出现一次

use crate::error::BusError;
use roboglia_protocol::codec::RegisterBytes;
use roboglia_protocol::{from_le_bytes, to_le_bytes};
use std::collections::HashMap;
use std::fmt;

/// 批量操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupOp {
    SyncWrite,
    SyncRead,
    BulkWrite,
    BulkRead,
}

impl fmt::Display for GroupOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupOp::SyncWrite => "SyncWrite",
            GroupOp::SyncRead => "SyncRead",
            GroupOp::BulkWrite => "BulkWrite",
            GroupOp::BulkRead => "BulkRead",
        };
        f.write_str(name)
    }
}

/// SyncWrite 上下文
#[derive(Debug, Clone)]
pub struct SyncWrite {
    address: u16,
    size: u8,
    params: Vec<(u8, RegisterBytes)>,
}

impl SyncWrite {
    pub fn new(address: u16, size: u8) -> Self {
        Self {
            address,
            size,
            params: Vec::new(),
        }
    }

    /// 添加一个设备的值（按小端序列化）
    pub fn add_param(&mut self, id: u8, value: u32) -> Result<(), BusError> {
        if self.params.iter().any(|(i, _)| *i == id) {
            return Err(BusError::DuplicateParam { id });
        }
        self.params.push((id, to_le_bytes(value, self.size)?));
        Ok(())
    }

    pub fn clear(&mut self) {
        self.params.clear();
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn params(&self) -> &[(u8, RegisterBytes)] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// SyncRead 上下文
#[derive(Debug, Clone)]
pub struct SyncRead {
    address: u16,
    size: u8,
    ids: Vec<u8>,
}

impl SyncRead {
    pub fn new(address: u16, size: u8) -> Self {
        Self {
            address,
            size,
            ids: Vec::new(),
        }
    }

    pub fn add_param(&mut self, id: u8) -> Result<(), BusError> {
        if self.ids.contains(&id) {
            return Err(BusError::DuplicateParam { id });
        }
        self.ids.push(id);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn ids(&self) -> &[u8] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// BulkWrite 中单个设备的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkWriteParam {
    pub id: u8,
    pub address: u16,
    pub data: RegisterBytes,
}

/// BulkWrite 上下文
#[derive(Debug, Clone, Default)]
pub struct BulkWrite {
    params: Vec<BulkWriteParam>,
}

impl BulkWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_param(&mut self, id: u8, address: u16, size: u8, value: u32) -> Result<(), BusError> {
        if self.params.iter().any(|p| p.id == id) {
            return Err(BusError::DuplicateParam { id });
        }
        self.params.push(BulkWriteParam {
            id,
            address,
            data: to_le_bytes(value, size)?,
        });
        Ok(())
    }

    pub fn clear(&mut self) {
        self.params.clear();
    }

    pub fn params(&self) -> &[BulkWriteParam] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// BulkRead 中单个设备的参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkReadParam {
    pub id: u8,
    pub address: u16,
    pub size: u8,
}

/// BulkRead 上下文
#[derive(Debug, Clone, Default)]
pub struct BulkRead {
    params: Vec<BulkReadParam>,
}

impl BulkRead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_param(&mut self, id: u8, address: u16, size: u8) -> Result<(), BusError> {
        if self.params.iter().any(|p| p.id == id) {
            return Err(BusError::DuplicateParam { id });
        }
        self.params.push(BulkReadParam { id, address, size });
        Ok(())
    }

    pub fn clear(&mut self) {
        self.params.clear();
    }

    pub fn params(&self) -> &[BulkReadParam] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// 批量读取结果
///
/// 每个设备保存一段从 `start` 开始的原始字节。没有回应的设备不出现在结果中。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupData {
    data: HashMap<u8, (u16, Vec<u8>)>,
}

impl GroupData {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个设备的回应
    pub fn insert(&mut self, id: u8, start: u16, bytes: Vec<u8>) {
        self.data.insert(id, (start, bytes));
    }

    /// 是否包含 `id` 在 `[address, address + size)` 的数据
    pub fn is_available(&self, id: u8, address: u16, size: u8) -> bool {
        self.slice(id, address, size).is_some()
    }

    /// 取出 `id` 在 `address` 处 `size` 字节的值（小端）
    pub fn get_data(&self, id: u8, address: u16, size: u8) -> Option<u32> {
        self.slice(id, address, size)
            .and_then(|bytes| from_le_bytes(bytes, size).ok())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, id: u8) -> bool {
        self.data.contains_key(&id)
    }

    fn slice(&self, id: u8, address: u16, size: u8) -> Option<&[u8]> {
        let (start, bytes) = self.data.get(&id)?;
        let offset = address.checked_sub(*start)? as usize;
        bytes.get(offset..offset + size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_write_params() {
        let mut tx = SyncWrite::new(30, 2);
        tx.add_param(1, 0x0200).unwrap();
        tx.add_param(2, 0x03FF).unwrap();
        assert!(matches!(
            tx.add_param(1, 0),
            Err(BusError::DuplicateParam { id: 1 })
        ));
        assert!(matches!(tx.add_param(3, 0x1_0000), Err(BusError::Protocol(_))));
        assert_eq!(tx.params().len(), 2);
        assert_eq!(tx.params()[1].1.as_slice(), &[0xFF, 0x03]);
        tx.clear();
        assert!(tx.is_empty());
    }

    #[test]
    fn test_bulk_params() {
        let mut tx = BulkRead::new();
        tx.add_param(1, 36, 2).unwrap();
        tx.add_param(2, 132, 4).unwrap();
        assert!(tx.add_param(2, 36, 2).is_err());
        assert_eq!(tx.params()[1].address, 132);

        let mut tx = BulkWrite::new();
        tx.add_param(1, 64, 1, 1).unwrap();
        assert_eq!(tx.params()[0].data.as_slice(), &[1]);
    }

    #[test]
    fn test_group_data_lookup() {
        let mut data = GroupData::new();
        data.insert(1, 36, vec![0x00, 0x02, 0x10]);
        assert!(data.is_available(1, 36, 2));
        assert_eq!(data.get_data(1, 36, 2), Some(0x0200));
        assert_eq!(data.get_data(1, 38, 1), Some(0x10));
        assert!(!data.is_available(1, 37, 4));
        assert!(!data.is_available(1, 35, 1));
        assert!(!data.is_available(2, 36, 2));
        assert_eq!(data.len(), 1);
    }
}

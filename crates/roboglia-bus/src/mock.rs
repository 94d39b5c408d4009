//! 内存模拟总线（`mock` feature）
//!
//! 每个设备一块字节内存，支持全部批量事务和块读写，并提供：
//!
//! - 故障注入：整条总线失败、单个设备不回应
//! - 人工延迟：每个事务 sleep 一段时间，放大竞争窗口
//! - 仲裁审计：记录同时在线的事务数峰值，以及未持有仲裁门就执行的事务数

use crate::{
    BlockBus, Bus, BusError, BusGate, BulkRead, BulkWrite, CommStatus, GroupBus, GroupData,
    GroupOp, SyncRead, SyncWrite,
};
use parking_lot::Mutex;
use roboglia_protocol::{from_le_bytes, to_le_bytes};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::trace;

/// 每个模拟设备的内存大小
const DEVICE_MEMORY: usize = 1024;

/// 模拟总线
#[derive(Debug)]
pub struct MockBus {
    name: String,
    open: AtomicBool,
    gate: BusGate,
    memory: Mutex<HashMap<u8, Vec<u8>>>,
    silent: Mutex<HashSet<u8>>,
    unsupported: Mutex<HashSet<GroupOp>>,
    fail: AtomicBool,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    ungated: AtomicU64,
    transactions: AtomicU64,
}

/// 审计守卫：进入时计数，离开时扣减
struct InFlight<'a> {
    bus: &'a MockBus,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.bus.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockBus {
    /// 创建模拟总线（初始为关闭状态）
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            open: AtomicBool::new(false),
            gate: BusGate::new(),
            memory: Mutex::new(HashMap::new()),
            silent: Mutex::new(HashSet::new()),
            unsupported: Mutex::new(HashSet::new()),
            fail: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            ungated: AtomicU64::new(0),
            transactions: AtomicU64::new(0),
        }
    }

    /// 添加一个设备（内存清零）
    pub fn add_device(&self, id: u8) {
        self.memory.lock().entry(id).or_insert_with(|| vec![0; DEVICE_MEMORY]);
    }

    /// 直接设置设备内存（不经过事务、不计入审计）
    pub fn poke(&self, id: u8, address: u16, size: u8, value: u32) {
        if let Ok(bytes) = to_le_bytes(value, size) {
            let mut memory = self.memory.lock();
            let mem = memory.entry(id).or_insert_with(|| vec![0; DEVICE_MEMORY]);
            let start = address as usize;
            if let Some(slot) = mem.get_mut(start..start + bytes.len()) {
                slot.copy_from_slice(&bytes);
            }
        }
    }

    /// 直接读取设备内存
    pub fn peek(&self, id: u8, address: u16, size: u8) -> Option<u32> {
        let memory = self.memory.lock();
        let start = address as usize;
        let bytes = memory.get(&id)?.get(start..start + size as usize)?;
        from_le_bytes(bytes, size).ok()
    }

    /// 让所有事务以 `TxFail` 失败
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// 让某个设备不再回应
    pub fn set_silent(&self, id: u8, silent: bool) {
        let mut set = self.silent.lock();
        if silent {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    /// 模拟不支持某种批量事务的协议
    pub fn set_unsupported(&self, op: GroupOp) {
        self.unsupported.lock().insert(op);
    }

    /// 每个事务的人工延迟
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// 同时在线事务数的峰值
    pub fn max_concurrent(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// 未持有仲裁门就执行的事务数
    pub fn ungated_transactions(&self) -> u64 {
        self.ungated.load(Ordering::SeqCst)
    }

    /// 已执行的事务总数
    pub fn transactions(&self) -> u64 {
        self.transactions.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<InFlight<'_>, BusError> {
        if !self.is_open() {
            return Err(BusError::NotOpen(self.name.clone()));
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = InFlight { bus: self };
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.gate.is_held() {
            self.ungated.fetch_add(1, Ordering::SeqCst);
        }
        self.transactions.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(BusError::transport(CommStatus::TxFail));
        }
        Ok(guard)
    }

    fn load(&self, id: u8, address: u16, length: usize) -> Option<Vec<u8>> {
        if self.silent.lock().contains(&id) {
            return None;
        }
        let memory = self.memory.lock();
        let start = address as usize;
        memory.get(&id)?.get(start..start + length).map(<[u8]>::to_vec)
    }

    fn store(&self, id: u8, address: u16, data: &[u8]) -> bool {
        if self.silent.lock().contains(&id) {
            return false;
        }
        let mut memory = self.memory.lock();
        let start = address as usize;
        match memory
            .get_mut(&id)
            .and_then(|mem| mem.get_mut(start..start + data.len()))
        {
            Some(slot) => {
                slot.copy_from_slice(data);
                true
            },
            None => false,
        }
    }

    fn require(&self, op: GroupOp) -> Result<(), BusError> {
        if self.supports(op) {
            Ok(())
        } else {
            Err(BusError::Unsupported {
                op,
                bus: self.name.clone(),
            })
        }
    }
}

impl Bus for MockBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<(), BusError> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), BusError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn read(&self, id: u8, address: u16, size: u8) -> Result<u32, BusError> {
        let _tx = self.begin()?;
        let bytes = self
            .load(id, address, size as usize)
            .ok_or_else(|| BusError::transport(CommStatus::RxTimeout))?;
        trace!("[{}] read dev={} addr={} -> {:?}", self.name, id, address, bytes);
        Ok(from_le_bytes(&bytes, size)?)
    }

    fn write(&self, id: u8, address: u16, size: u8, value: u32) -> Result<(), BusError> {
        let bytes = to_le_bytes(value, size)?;
        let _tx = self.begin()?;
        if self.store(id, address, &bytes) {
            Ok(())
        } else {
            Err(BusError::transport(CommStatus::RxTimeout))
        }
    }

    fn gate(&self) -> &BusGate {
        &self.gate
    }

    fn as_group(&self) -> Option<&dyn GroupBus> {
        Some(self)
    }

    fn as_block(&self) -> Option<&dyn BlockBus> {
        Some(self)
    }
}

impl GroupBus for MockBus {
    fn supports(&self, op: GroupOp) -> bool {
        !self.unsupported.lock().contains(&op)
    }

    fn sync_write(&self, tx: &SyncWrite) -> Result<(), BusError> {
        self.require(GroupOp::SyncWrite)?;
        let _tx = self.begin()?;
        for (id, data) in tx.params() {
            self.store(*id, tx.address(), data);
        }
        Ok(())
    }

    fn sync_read(&self, tx: &SyncRead) -> Result<GroupData, BusError> {
        self.require(GroupOp::SyncRead)?;
        let _tx = self.begin()?;
        let mut data = GroupData::new();
        for id in tx.ids() {
            if let Some(bytes) = self.load(*id, tx.address(), tx.size() as usize) {
                data.insert(*id, tx.address(), bytes);
            }
        }
        Ok(data)
    }

    fn bulk_write(&self, tx: &BulkWrite) -> Result<(), BusError> {
        self.require(GroupOp::BulkWrite)?;
        let _tx = self.begin()?;
        for param in tx.params() {
            self.store(param.id, param.address, &param.data);
        }
        Ok(())
    }

    fn bulk_read(&self, tx: &BulkRead) -> Result<GroupData, BusError> {
        self.require(GroupOp::BulkRead)?;
        let _tx = self.begin()?;
        let mut data = GroupData::new();
        for param in tx.params() {
            if let Some(bytes) = self.load(param.id, param.address, param.size as usize) {
                data.insert(param.id, param.address, bytes);
            }
        }
        Ok(data)
    }
}

impl BlockBus for MockBus {
    fn read_block(&self, id: u8, address: u16, length: usize) -> Result<Vec<u8>, BusError> {
        let _tx = self.begin()?;
        self.load(id, address, length)
            .ok_or_else(|| BusError::transport(CommStatus::RxTimeout))
    }

    fn write_block(&self, id: u8, address: u16, data: &[u8]) -> Result<(), BusError> {
        let _tx = self.begin()?;
        if self.store(id, address, data) {
            Ok(())
        } else {
            Err(BusError::transport(CommStatus::RxTimeout))
        }
    }
}

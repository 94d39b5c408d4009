//! Dynamixel 总线
//!
//! 在一个串口 [`Transport`] 上实现 Protocol 1.0 / 2.0 的单寄存器读写、
//! 批量事务（SyncWrite / SyncRead / BulkWrite / BulkRead）和块读写。
//!
//! 端口由内部 `Mutex` 保护，一次只有一个指令包在线上；仲裁门是协作式的，
//! 由上层（设备、同步循环）负责获取。

#[cfg(target_os = "linux")]
mod serial;

#[cfg(target_os = "linux")]
pub use serial::SerialTransport;

use crate::{
    BlockBus, Bus, BusError, BusGate, BulkRead, BulkWrite, CommStatus, DeviceStatus, GroupBus,
    GroupData, GroupOp, SyncRead, SyncWrite,
};
use parking_lot::Mutex;
use roboglia_protocol::dynamixel::{
    BROADCAST_ID, Instruction, InstructionPacket, Protocol, StatusPacket, bulk_read_params,
    bulk_write_params, read_params, status_error_flags, status_header_len, status_total_len,
    sync_read_params, sync_write_params, write_params,
};
use roboglia_protocol::{from_le_bytes, max_for_size, to_le_bytes};
use std::io;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// 串口传输
///
/// `receive` 在 `timeout` 内尽量填满 `buf`，返回实际读到的字节数（超时不是错误）。
pub trait Transport: Send {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// 丢弃输入缓冲中的残留字节
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

type TransportFactory =
    Box<dyn Fn(&DynamixelConfig) -> Result<Box<dyn Transport>, BusError> + Send + Sync>;

/// Dynamixel 总线配置
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DynamixelConfig {
    pub name: String,
    /// 串口设备路径（如 `/dev/ttyUSB0`）
    pub port: String,
    pub baudrate: u32,
    pub protocol: Protocol,
    /// 状态包等待时间（毫秒），实际超时还会加上按波特率计算的传输时间
    pub timeout_ms: u64,
}

impl Default for DynamixelConfig {
    fn default() -> Self {
        Self {
            name: "dynamixel".to_string(),
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 1_000_000,
            protocol: Protocol::V2,
            timeout_ms: 20,
        }
    }
}

/// Dynamixel 总线
pub struct DynamixelBus {
    config: DynamixelConfig,
    port: Mutex<Option<Box<dyn Transport>>>,
    factory: TransportFactory,
    gate: BusGate,
}

impl std::fmt::Debug for DynamixelBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamixelBus")
            .field("config", &self.config)
            .field("open", &self.is_open())
            .finish()
    }
}

impl DynamixelBus {
    /// 使用系统串口创建总线（仅 Linux）
    pub fn new(config: DynamixelConfig) -> Self {
        Self::with_transport_factory(config, default_factory)
    }

    /// 使用自定义传输创建总线（测试或非标准端口）
    pub fn with_transport_factory<F>(config: DynamixelConfig, factory: F) -> Self
    where
        F: Fn(&DynamixelConfig) -> Result<Box<dyn Transport>, BusError> + Send + Sync + 'static,
    {
        Self {
            config,
            port: Mutex::new(None),
            factory: Box::new(factory),
            gate: BusGate::new(),
        }
    }

    pub fn config(&self) -> &DynamixelConfig {
        &self.config
    }

    pub fn protocol(&self) -> Protocol {
        self.config.protocol
    }

    /// Ping 设备
    ///
    /// 设备回应且无错误时返回 `true`；通信失败返回 `false`。
    pub fn ping(&self, id: u8) -> Result<bool, BusError> {
        let packet = InstructionPacket::new(id, Instruction::Ping, Vec::new());
        match self.with_port(|port| self.txrx(port, &packet)) {
            Ok(status) => Ok(status.error == 0),
            Err(BusError::NotOpen(name)) => Err(BusError::NotOpen(name)),
            Err(e) => {
                debug!("Ping of device {} on bus '{}' failed: {}", id, self.config.name, e);
                Ok(false)
            },
        }
    }

    fn with_port<R>(
        &self,
        f: impl FnOnce(&mut dyn Transport) -> Result<R, BusError>,
    ) -> Result<R, BusError> {
        let mut guard = self.port.lock();
        let port = guard
            .as_mut()
            .ok_or_else(|| BusError::NotOpen(self.config.name.clone()))?;
        f(port.as_mut())
    }

    /// 按 10 bit/字节估算传输时间，加上配置的等待时间
    fn packet_timeout(&self, bytes: usize) -> Duration {
        let per_byte_ns = 10_000_000_000u64 / self.config.baudrate.max(1) as u64;
        Duration::from_millis(self.config.timeout_ms) + Duration::from_nanos(per_byte_ns * bytes as u64)
    }

    fn tx(&self, port: &mut dyn Transport, packet: &InstructionPacket) -> Result<(), BusError> {
        let bytes = packet.encode(self.config.protocol)?;
        trace!("[{}] TX {:02X?}", self.config.name, bytes);
        port.clear_input().map_err(|e| {
            warn!("Failed to clear input of bus '{}': {}", self.config.name, e);
            BusError::transport(CommStatus::PortBusy)
        })?;
        port.send(&bytes).map_err(|e| {
            warn!("Failed to send on bus '{}': {}", self.config.name, e);
            BusError::transport(CommStatus::TxFail)
        })
    }

    fn rx(&self, port: &mut dyn Transport, expected_id: u8) -> Result<StatusPacket, BusError> {
        let protocol = self.config.protocol;
        let header_len = status_header_len(protocol);
        let mut buf = vec![0u8; header_len];
        let read = port
            .receive(&mut buf, self.packet_timeout(header_len))
            .map_err(|e| {
                warn!("Failed to receive on bus '{}': {}", self.config.name, e);
                BusError::transport(CommStatus::RxFail)
            })?;
        if read == 0 {
            return Err(BusError::transport(CommStatus::RxTimeout));
        }
        if read < header_len {
            return Err(BusError::transport(CommStatus::RxCorrupt));
        }
        let total = status_total_len(protocol, &buf)
            .map_err(|_| BusError::transport(CommStatus::RxCorrupt))?;
        buf.resize(total, 0);
        let rest = port
            .receive(&mut buf[header_len..], self.packet_timeout(total - header_len))
            .map_err(|_| BusError::transport(CommStatus::RxFail))?;
        if rest < total - header_len {
            return Err(BusError::transport(CommStatus::RxCorrupt));
        }
        trace!("[{}] RX {:02X?}", self.config.name, buf);
        let status = StatusPacket::decode(protocol, &buf)
            .map_err(|_| BusError::transport(CommStatus::RxCorrupt))?;
        if status.id != expected_id {
            warn!(
                "Bus '{}' expected status from device {} but got {}",
                self.config.name, expected_id, status.id
            );
            return Err(BusError::transport(CommStatus::RxCorrupt));
        }
        Ok(status)
    }

    fn txrx(&self, port: &mut dyn Transport, packet: &InstructionPacket) -> Result<StatusPacket, BusError> {
        self.tx(port, packet)?;
        self.rx(port, packet.id)
    }

    fn log_device_error(&self, id: u8, error: u8) {
        warn!(
            "Device {} on bus '{}' responded with a return error: {}",
            id,
            self.config.name,
            status_error_flags(self.config.protocol, error).join(", ")
        );
    }

    fn check_status(&self, status: &StatusPacket) -> Result<(), BusError> {
        if status.error != 0 {
            self.log_device_error(status.id, status.error);
            return Err(BusError::device(DeviceStatus::dynamixel(
                self.config.protocol,
                status.error,
            )));
        }
        Ok(())
    }

    fn require(&self, op: GroupOp) -> Result<(), BusError> {
        if self.supports(op) {
            Ok(())
        } else {
            Err(BusError::Unsupported {
                op,
                bus: self.config.name.clone(),
            })
        }
    }

    /// 广播指令后依次收集每个设备的状态包
    ///
    /// 至少一个设备回应即视为事务成功，缺失的设备由调用方通过 `GroupData` 发现。
    fn collect(
        &self,
        port: &mut dyn Transport,
        expected: impl Iterator<Item = (u8, u16, u8)>,
    ) -> Result<GroupData, BusError> {
        let mut data = GroupData::new();
        let mut first_error = None;
        for (id, address, size) in expected {
            match self.rx(port, id) {
                Ok(status) => {
                    if status.error != 0 {
                        self.log_device_error(id, status.error);
                    }
                    if status.params.len() == size as usize {
                        data.insert(id, address, status.params);
                    } else {
                        warn!(
                            "Device {} on bus '{}' returned {} bytes, expected {}",
                            id,
                            self.config.name,
                            status.params.len(),
                            size
                        );
                    }
                },
                Err(e) => {
                    debug!("No group response from device {} on bus '{}': {}", id, self.config.name, e);
                    first_error.get_or_insert(e);
                },
            }
        }
        match first_error {
            Some(e) if data.is_empty() => Err(e),
            _ => Ok(data),
        }
    }
}

#[cfg(target_os = "linux")]
fn default_factory(config: &DynamixelConfig) -> Result<Box<dyn Transport>, BusError> {
    Ok(Box::new(SerialTransport::open(&config.port, config.baudrate)?))
}

#[cfg(not(target_os = "linux"))]
fn default_factory(_config: &DynamixelConfig) -> Result<Box<dyn Transport>, BusError> {
    Err(BusError::Config(
        "serial transport is only available on Linux".to_string(),
    ))
}

impl Bus for DynamixelBus {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn open(&self) -> Result<(), BusError> {
        let mut port = self.port.lock();
        if port.is_some() {
            debug!("Bus '{}' is already open", self.config.name);
            return Ok(());
        }
        *port = Some((self.factory)(&self.config)?);
        info!(
            "Bus '{}' opened on {} at {} baud ({})",
            self.config.name, self.config.port, self.config.baudrate, self.config.protocol
        );
        Ok(())
    }

    fn close(&self) -> Result<(), BusError> {
        if self.port.lock().take().is_some() {
            info!("Bus '{}' closed", self.config.name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }

    fn read(&self, id: u8, address: u16, size: u8) -> Result<u32, BusError> {
        max_for_size(size)?;
        let params = read_params(self.config.protocol, address, size as usize)?;
        let packet = InstructionPacket::new(id, Instruction::Read, params);
        let status = self.with_port(|port| self.txrx(port, &packet))?;
        self.check_status(&status)?;
        from_le_bytes(&status.params, size).map_err(|_| BusError::transport(CommStatus::RxCorrupt))
    }

    fn write(&self, id: u8, address: u16, size: u8, value: u32) -> Result<(), BusError> {
        let data = to_le_bytes(value, size)?;
        let params = write_params(self.config.protocol, address, &data)?;
        let packet = InstructionPacket::new(id, Instruction::Write, params);
        self.with_port(|port| {
            if id == BROADCAST_ID {
                return self.tx(port, &packet);
            }
            let status = self.txrx(port, &packet)?;
            self.check_status(&status)
        })
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

impl GroupBus for DynamixelBus {
    fn supports(&self, op: GroupOp) -> bool {
        let instruction = match op {
            GroupOp::SyncWrite => Instruction::SyncWrite,
            GroupOp::SyncRead => Instruction::SyncRead,
            GroupOp::BulkWrite => Instruction::BulkWrite,
            GroupOp::BulkRead => Instruction::BulkRead,
        };
        self.config.protocol.supports(instruction)
    }

    fn sync_write(&self, tx: &SyncWrite) -> Result<(), BusError> {
        self.require(GroupOp::SyncWrite)?;
        if tx.is_empty() {
            return Ok(());
        }
        let entries: Vec<(u8, &[u8])> = tx
            .params()
            .iter()
            .map(|(id, data)| (*id, data.as_slice()))
            .collect();
        let params = sync_write_params(
            self.config.protocol,
            tx.address(),
            tx.size() as usize,
            &entries,
        )?;
        let packet = InstructionPacket::new(BROADCAST_ID, Instruction::SyncWrite, params);
        self.with_port(|port| self.tx(port, &packet))
    }

    fn sync_read(&self, tx: &SyncRead) -> Result<GroupData, BusError> {
        self.require(GroupOp::SyncRead)?;
        if tx.is_empty() {
            return Ok(GroupData::new());
        }
        let params = sync_read_params(
            self.config.protocol,
            tx.address(),
            tx.size() as usize,
            tx.ids(),
        )?;
        let packet = InstructionPacket::new(BROADCAST_ID, Instruction::SyncRead, params);
        self.with_port(|port| {
            self.tx(port, &packet)?;
            self.collect(
                port,
                tx.ids().iter().map(|id| (*id, tx.address(), tx.size())),
            )
        })
    }

    fn bulk_write(&self, tx: &BulkWrite) -> Result<(), BusError> {
        self.require(GroupOp::BulkWrite)?;
        if tx.is_empty() {
            return Ok(());
        }
        let entries: Vec<(u8, u16, &[u8])> = tx
            .params()
            .iter()
            .map(|p| (p.id, p.address, p.data.as_slice()))
            .collect();
        let params = bulk_write_params(self.config.protocol, &entries)?;
        let packet = InstructionPacket::new(BROADCAST_ID, Instruction::BulkWrite, params);
        self.with_port(|port| self.tx(port, &packet))
    }

    fn bulk_read(&self, tx: &BulkRead) -> Result<GroupData, BusError> {
        self.require(GroupOp::BulkRead)?;
        if tx.is_empty() {
            return Ok(GroupData::new());
        }
        let entries: Vec<(u8, u16, usize)> = tx
            .params()
            .iter()
            .map(|p| (p.id, p.address, p.size as usize))
            .collect();
        let params = bulk_read_params(self.config.protocol, &entries)?;
        let packet = InstructionPacket::new(BROADCAST_ID, Instruction::BulkRead, params);
        self.with_port(|port| {
            self.tx(port, &packet)?;
            self.collect(port, tx.params().iter().map(|p| (p.id, p.address, p.size)))
        })
    }
}

impl BlockBus for DynamixelBus {
    fn read_block(&self, id: u8, address: u16, length: usize) -> Result<Vec<u8>, BusError> {
        let params = read_params(self.config.protocol, address, length)?;
        let packet = InstructionPacket::new(id, Instruction::Read, params);
        let status = self.with_port(|port| self.txrx(port, &packet))?;
        if status.error != 0 {
            // 块读取与同步读取一致：设备错误只记录，数据照常返回
            self.log_device_error(id, status.error);
        }
        if status.params.len() != length {
            return Err(BusError::transport(CommStatus::RxCorrupt));
        }
        Ok(status.params)
    }

    fn write_block(&self, id: u8, address: u16, data: &[u8]) -> Result<(), BusError> {
        let params = write_params(self.config.protocol, address, data)?;
        let packet = InstructionPacket::new(id, Instruction::Write, params);
        self.with_port(|port| {
            let status = self.txrx(port, &packet)?;
            self.check_status(&status)
        })
    }
}

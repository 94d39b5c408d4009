//! Linux `i2c-dev` 总线
//!
//! 寄存器访问采用 SMBus 风格：先写寄存器地址，再读 / 写数据。
//! 支持 1 字节（byte）和 2 字节（word，低字节在前）寄存器，以及块读写。

use crate::{BlockBus, Bus, BusError, BusGate, CommStatus};
use parking_lot::Mutex;
use roboglia_protocol::{ProtocolError, from_le_bytes, to_le_bytes};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use tracing::{info, warn};

const I2C_SLAVE: u16 = 0x0703;

nix::ioctl_write_int_bad!(i2c_set_slave, I2C_SLAVE);

/// I2C 总线配置
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct I2cConfig {
    pub name: String,
    /// 设备节点（如 `/dev/i2c-1`）
    pub port: String,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            name: "i2c".to_string(),
            port: "/dev/i2c-1".to_string(),
        }
    }
}

/// I2C 总线
#[derive(Debug)]
pub struct I2cBus {
    config: I2cConfig,
    file: Mutex<Option<File>>,
    gate: BusGate,
}

impl I2cBus {
    pub fn new(config: I2cConfig) -> Self {
        Self {
            config,
            file: Mutex::new(None),
            gate: BusGate::new(),
        }
    }

    pub fn config(&self) -> &I2cConfig {
        &self.config
    }

    /// 选中从设备后执行 `f`
    fn with_device<R>(
        &self,
        id: u8,
        f: impl FnOnce(&mut File) -> Result<R, BusError>,
    ) -> Result<R, BusError> {
        let mut guard = self.file.lock();
        let file = guard
            .as_mut()
            .ok_or_else(|| BusError::NotOpen(self.config.name.clone()))?;
        // SAFETY: fd 在 guard 存活期间有效；I2C_SLAVE 以整数传参
        unsafe { i2c_set_slave(file.as_raw_fd(), id as libc::c_int) }.map_err(|e| {
            warn!("Failed to select I2C device {:#04x} on '{}': {}", id, self.config.name, e);
            BusError::transport(CommStatus::TxFail)
        })?;
        f(file)
    }

    fn write_bytes(&self, file: &mut File, bytes: &[u8]) -> Result<(), BusError> {
        file.write_all(bytes).map_err(|e| {
            warn!("I2C write on '{}' failed: {}", self.config.name, e);
            BusError::transport(CommStatus::TxFail)
        })
    }

    fn read_bytes(&self, file: &mut File, buf: &mut [u8]) -> Result<(), BusError> {
        file.read_exact(buf).map_err(|e| {
            warn!("I2C read on '{}' failed: {}", self.config.name, e);
            BusError::transport(CommStatus::RxFail)
        })
    }
}

fn register_address(address: u16) -> Result<u8, BusError> {
    u8::try_from(address).map_err(|_| {
        BusError::Config(format!("I2C register address {:#x} exceeds 8 bits", address))
    })
}

fn check_size(size: u8) -> Result<(), BusError> {
    match size {
        1 | 2 => Ok(()),
        _ => Err(ProtocolError::UnsupportedSize { size }.into()),
    }
}

impl Bus for I2cBus {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn open(&self) -> Result<(), BusError> {
        let mut file = self.file.lock();
        if file.is_none() {
            *file = Some(
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(&self.config.port)?,
            );
            info!("I2C bus '{}' opened on {}", self.config.name, self.config.port);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), BusError> {
        if self.file.lock().take().is_some() {
            info!("I2C bus '{}' closed", self.config.name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    fn read(&self, id: u8, address: u16, size: u8) -> Result<u32, BusError> {
        check_size(size)?;
        let reg = register_address(address)?;
        self.with_device(id, |file| {
            self.write_bytes(file, &[reg])?;
            let mut buf = [0u8; 2];
            self.read_bytes(file, &mut buf[..size as usize])?;
            Ok(from_le_bytes(&buf[..size as usize], size)?)
        })
    }

    fn write(&self, id: u8, address: u16, size: u8, value: u32) -> Result<(), BusError> {
        check_size(size)?;
        let reg = register_address(address)?;
        let data = to_le_bytes(value, size)?;
        self.with_device(id, |file| {
            let mut bytes = Vec::with_capacity(3);
            bytes.push(reg);
            bytes.extend_from_slice(&data);
            self.write_bytes(file, &bytes)
        })
    }

    fn gate(&self) -> &BusGate {
        &self.gate
    }

    fn as_block(&self) -> Option<&dyn BlockBus> {
        Some(self)
    }
}

impl BlockBus for I2cBus {
    fn read_block(&self, id: u8, address: u16, length: usize) -> Result<Vec<u8>, BusError> {
        let reg = register_address(address)?;
        self.with_device(id, |file| {
            self.write_bytes(file, &[reg])?;
            let mut buf = vec![0u8; length];
            self.read_bytes(file, &mut buf)?;
            Ok(buf)
        })
    }

    fn write_block(&self, id: u8, address: u16, data: &[u8]) -> Result<(), BusError> {
        let reg = register_address(address)?;
        self.with_device(id, |file| {
            let mut bytes = Vec::with_capacity(data.len() + 1);
            bytes.push(reg);
            bytes.extend_from_slice(data);
            self.write_bytes(file, &bytes)
        })
    }
}

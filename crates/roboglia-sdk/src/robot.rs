//! 机器人装配
//!
//! 把 [`SdkConfig`] 中的总线、设备和同步循环构造为对象，并按顺序启停：
//! 打开总线 → 打开设备 → 启动自动启动的同步循环；停止时反向进行。
//!
//! 总线的具体实现由调用方提供的构造函数决定，测试可以换成 `MockBus`。

use crate::config::{BusSpec, ConfigError, SdkConfig};
use roboglia_bus::{Bus, DynamixelBus};
use roboglia_driver::{Device, SyncLoop};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

#[cfg(target_os = "linux")]
use roboglia_bus::I2cBus;

/// 装配完成的机器人
pub struct Robot {
    buses: Vec<Arc<dyn Bus>>,
    devices: Vec<Arc<Device>>,
    device_index: HashMap<String, usize>,
    syncs: Vec<SyncLoop>,
}

/// 按 schema 条目创建真实硬件总线
pub fn default_bus(spec: &BusSpec) -> Result<Arc<dyn Bus>, ConfigError> {
    Ok(match spec {
        BusSpec::Dynamixel(config) => Arc::new(DynamixelBus::new(config.clone())),
        #[cfg(target_os = "linux")]
        BusSpec::I2c(config) => Arc::new(I2cBus::new(config.clone())),
    })
}

impl Robot {
    /// 使用真实硬件总线装配
    pub fn from_config(config: &SdkConfig) -> Result<Self, ConfigError> {
        Self::assemble(config, default_bus)
    }

    /// 使用自定义总线构造函数装配
    pub fn assemble(
        config: &SdkConfig,
        make_bus: impl Fn(&BusSpec) -> Result<Arc<dyn Bus>, ConfigError>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut buses = Vec::with_capacity(config.buses.len());
        let mut bus_index = HashMap::new();
        for spec in &config.buses {
            bus_index.insert(spec.name().to_string(), buses.len());
            buses.push(make_bus(spec)?);
        }

        let mut devices = Vec::with_capacity(config.devices.len());
        let mut device_index = HashMap::new();
        for spec in &config.devices {
            let bus = bus_index
                .get(&spec.bus)
                .map(|&i| buses[i].clone())
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "device '{}' refers to unknown bus '{}'",
                        spec.name, spec.bus
                    ))
                })?;
            device_index.insert(spec.name.clone(), devices.len());
            devices.push(Device::from_spec(spec, bus)?);
        }

        let mut syncs = Vec::with_capacity(config.syncs.len());
        for spec in &config.syncs {
            let sync = SyncLoop::from_spec(spec, |name| {
                device_index.get(name).map(|&i| devices[i].clone())
            })?;
            syncs.push(sync);
        }

        info!(
            "Robot assembled: {} buses, {} devices, {} syncs",
            buses.len(),
            devices.len(),
            syncs.len()
        );
        Ok(Self {
            buses,
            devices,
            device_index,
            syncs,
        })
    }

    /// 打开总线和设备，启动 `auto_start` 的同步循环
    ///
    /// 任何一步失败都会停止已启动的部分并返回错误。
    pub fn start(&mut self) -> Result<(), ConfigError> {
        if let Err(e) = self.start_inner() {
            error!("Robot failed to start: {}", e);
            self.stop();
            return Err(e);
        }
        info!("Robot started");
        Ok(())
    }

    fn start_inner(&mut self) -> Result<(), ConfigError> {
        for bus in &self.buses {
            bus.open()?;
        }
        for device in &self.devices {
            device.open()?;
        }
        for sync in self.syncs.iter_mut().filter(|s| s.auto_start()) {
            sync.start(true)?;
        }
        Ok(())
    }

    /// 反向停止同步循环、关闭设备和总线；错误只记录
    pub fn stop(&mut self) {
        for sync in self.syncs.iter_mut().rev() {
            if sync.started()
                && let Err(e) = sync.stop(true)
            {
                warn!("Failed to stop sync '{}': {}", sync.name(), e);
            }
        }
        for device in self.devices.iter().rev() {
            device.close();
        }
        for bus in self.buses.iter().rev() {
            if let Err(e) = bus.close() {
                warn!("Failed to close bus '{}': {}", bus.name(), e);
            }
        }
        info!("Robot stopped");
    }

    pub fn buses(&self) -> &[Arc<dyn Bus>] {
        &self.buses
    }

    pub fn bus(&self, name: &str) -> Option<&Arc<dyn Bus>> {
        self.buses.iter().find(|b| b.name() == name)
    }

    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    pub fn device(&self, name: &str) -> Option<&Arc<Device>> {
        self.device_index.get(name).map(|&i| &self.devices[i])
    }

    pub fn syncs(&self) -> &[SyncLoop] {
        &self.syncs
    }

    pub fn sync(&self, name: &str) -> Option<&SyncLoop> {
        self.syncs.iter().find(|s| s.name() == name)
    }

    pub fn sync_mut(&mut self, name: &str) -> Option<&mut SyncLoop> {
        self.syncs.iter_mut().find(|s| s.name() == name)
    }
}

impl std::fmt::Debug for Robot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Robot")
            .field("buses", &self.buses.iter().map(|b| b.name()).collect::<Vec<_>>())
            .field("devices", &self.devices.iter().map(|d| d.name()).collect::<Vec<_>>())
            .field("syncs", &self.syncs.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

//! 机器人配置（TOML）
//!
//! 一个配置文件描述总线、设备和同步循环，名称之间的引用在 [`SdkConfig::validate`]
//! 中一次性校验。
//!
//! ```toml
//! [logging]
//! filter = "info"
//!
//! [[buses]]
//! kind = "dynamixel"
//! name = "ttys1"
//! port = "/dev/ttyUSB0"
//! baudrate = 1000000
//! protocol = 1.0
//!
//! [[devices]]
//! name = "d01"
//! id = 1
//! bus = "ttys1"
//!
//! [[devices.registers]]
//! name = "present_position"
//! address = 36
//! size = 2
//!
//! [[syncs]]
//! name = "read_pos"
//! kind = "bulk_read"
//! devices = ["d01"]
//! registers = ["present_position"]
//! frequency = 50.0
//! ```

use crate::logging::LoggingConfig;
use roboglia_bus::{BusError, DynamixelConfig};
use roboglia_driver::{DeviceSpec, DriverError, SyncSpec};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[cfg(target_os = "linux")]
use roboglia_bus::I2cConfig;

/// 配置和装配错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// 总线 schema 条目，按 `kind` 区分实现
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusSpec {
    Dynamixel(DynamixelConfig),
    #[cfg(target_os = "linux")]
    I2c(I2cConfig),
}

impl BusSpec {
    pub fn name(&self) -> &str {
        match self {
            BusSpec::Dynamixel(config) => &config.name,
            #[cfg(target_os = "linux")]
            BusSpec::I2c(config) => &config.name,
        }
    }
}

/// 完整的机器人配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    pub logging: LoggingConfig,
    pub buses: Vec<BusSpec>,
    pub devices: Vec<DeviceSpec>,
    pub syncs: Vec<SyncSpec>,
}

impl SdkConfig {
    /// 解析并校验
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SdkConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 校验名称唯一性和交叉引用
    ///
    /// - 总线、设备、同步循环名称各自唯一
    /// - 设备引用的总线存在，同一总线上设备 ID 唯一
    /// - 同步循环引用的设备存在且至少一个设备、一个寄存器
    /// - 每个同步循环的频率参数合法
    pub fn validate(&self) -> Result<(), ConfigError> {
        unique("bus", self.buses.iter().map(BusSpec::name))?;
        unique("device", self.devices.iter().map(|d| d.name.as_str()))?;
        unique("sync", self.syncs.iter().map(|s| s.name.as_str()))?;

        let buses: HashSet<&str> = self.buses.iter().map(BusSpec::name).collect();
        let mut ids: HashMap<(&str, u8), &str> = HashMap::new();
        for device in &self.devices {
            if !buses.contains(device.bus.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "device '{}' refers to unknown bus '{}'",
                    device.name, device.bus
                )));
            }
            if let Some(other) = ids.insert((device.bus.as_str(), device.id), &device.name) {
                return Err(ConfigError::Invalid(format!(
                    "devices '{}' and '{}' share id {} on bus '{}'",
                    other, device.name, device.id, device.bus
                )));
            }
        }

        let devices: HashSet<&str> = self.devices.iter().map(|d| d.name.as_str()).collect();
        for sync in &self.syncs {
            if sync.devices.is_empty() || sync.registers.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "sync '{}' needs at least one device and one register",
                    sync.name
                )));
            }
            if let Some(missing) = sync.devices.iter().find(|d| !devices.contains(d.as_str())) {
                return Err(ConfigError::Invalid(format!(
                    "sync '{}' refers to unknown device '{}'",
                    sync.name, missing
                )));
            }
            sync.timing.validate()?;
        }
        Ok(())
    }

    pub fn bus(&self, name: &str) -> Option<&BusSpec> {
        self.buses.iter().find(|b| b.name() == name)
    }

    pub fn device(&self, name: &str) -> Option<&DeviceSpec> {
        self.devices.iter().find(|d| d.name == name)
    }
}

fn unique<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(ConfigError::Invalid(format!("{} without a name", what)));
        }
        if !seen.insert(name) {
            return Err(ConfigError::Invalid(format!("duplicate {} name '{}'", what, name)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use roboglia_driver::SyncKind;
    use roboglia_protocol::dynamixel::Protocol;
    use roboglia_protocol::{Access, ConversionKind};

    const ROBOT: &str = r#"
[logging]
filter = "debug"
ansi = false

[[buses]]
kind = "dynamixel"
name = "ttys1"
port = "/dev/ttyUSB0"
protocol = 1.0

[[devices]]
name = "d01"
id = 1
bus = "ttys1"

[[devices.registers]]
name = "goal_position"
address = 30
size = 2
max = 1023
access = "RW"
class = "linear"
factor = 3.41
offset = 512

[[devices.registers]]
name = "present_position"
address = 36
size = 2
max = 1023

[[devices]]
name = "d02"
id = 2
bus = "ttys1"

[[devices.registers]]
name = "present_position"
address = 36
size = 2

[[syncs]]
name = "read_pos"
kind = "bulk_read"
devices = ["d01", "d02"]
registers = ["present_position"]
frequency = 50.0
warning = 95

[[syncs]]
name = "write_pos"
kind = "group_write"
devices = ["d01"]
registers = ["goal_position"]
auto_start = false
"#;

    #[test]
    fn test_parse_robot() {
        let config = SdkConfig::from_toml_str(ROBOT).unwrap();
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.buses.len(), 1);
        match config.bus("ttys1").unwrap() {
            BusSpec::Dynamixel(bus) => {
                assert_eq!(bus.protocol, Protocol::V1);
                assert_eq!(bus.baudrate, 1_000_000);
            },
            #[cfg(target_os = "linux")]
            other => panic!("unexpected bus {:?}", other),
        }

        let d01 = config.device("d01").unwrap();
        assert_eq!(d01.registers.len(), 2);
        assert_eq!(d01.registers[0].access, Access::RW);
        assert_eq!(d01.registers[0].class, ConversionKind::Linear);
        assert_eq!(d01.registers[1].access, Access::R);

        assert_eq!(config.syncs[0].kind, SyncKind::BulkRead);
        assert_eq!(config.syncs[0].timing.frequency, 50.0);
        assert!(config.syncs[0].auto_start);
        assert_eq!(config.syncs[1].timing.frequency, 100.0);
        assert!(!config.syncs[1].auto_start);
    }

    #[test]
    fn test_unknown_references() {
        let bad_bus = ROBOT.replacen("bus = \"ttys1\"", "bus = \"ttys9\"", 1);
        assert!(matches!(
            SdkConfig::from_toml_str(&bad_bus),
            Err(ConfigError::Invalid(msg)) if msg.contains("ttys9")
        ));

        let bad_device = ROBOT.replace("devices = [\"d01\", \"d02\"]", "devices = [\"d01\", \"d07\"]");
        assert!(matches!(
            SdkConfig::from_toml_str(&bad_device),
            Err(ConfigError::Invalid(msg)) if msg.contains("d07")
        ));
    }

    #[test]
    fn test_duplicates_rejected() {
        let dup_id = ROBOT.replace("id = 2", "id = 1");
        assert!(matches!(
            SdkConfig::from_toml_str(&dup_id),
            Err(ConfigError::Invalid(msg)) if msg.contains("share id 1")
        ));

        let dup_name = ROBOT.replace("name = \"d02\"", "name = \"d01\"");
        assert!(matches!(
            SdkConfig::from_toml_str(&dup_name),
            Err(ConfigError::Invalid(msg)) if msg.contains("duplicate device")
        ));
    }

    #[test]
    fn test_invalid_timing() {
        let bad = ROBOT.replace("frequency = 50.0", "frequency = -1.0");
        assert!(matches!(
            SdkConfig::from_toml_str(&bad),
            Err(ConfigError::Driver(DriverError::Config(_)))
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            SdkConfig::from_toml_str("[[buses]]\nkind = \"can\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SdkConfig::from_file("/nonexistent/robot.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = SdkConfig::from_toml_str("").unwrap();
        assert!(config.buses.is_empty());
        assert_eq!(config.logging, LoggingConfig::default());
    }
}

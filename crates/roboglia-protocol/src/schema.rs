//! 寄存器 schema 条目
//!
//! `RegisterSpec` 是装配层交给核心的寄存器描述。`class` 字段在装配时
//! 解析一次为具体的 [`Conversion`]，此后不再按名称查找。
//!
//! # TOML 示例
//!
//! ```toml
//! [[registers]]
//! name = "present_position"
//! address = 36
//! size = 2
//! max = 1023
//! sync = true
//! class = "linear"
//! factor = 3.41
//! offset = 512
//! ```

use crate::codec::max_for_size;
use crate::conversion::{BitMode, BoolOptions, Conversion, EnumTable};
use crate::error::ConversionError;

/// 寄存器访问模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Access {
    /// 只读
    #[default]
    R,
    /// 读写
    RW,
}

/// 转换变体的 schema 名称
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ConversionKind {
    #[default]
    Identity,
    Boolean,
    Linear,
    Threshold,
    Enumerated,
    Logarithmic,
    /// AX 波特率预设（查表，范围 1..=207）
    AxBaudRate,
    /// AX compliance slope 预设（对数，最大 254）
    AxComplianceSlope,
}

/// 寄存器 schema 条目
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RegisterSpec {
    pub name: String,
    pub address: u16,
    /// 字节宽度（1 / 2 / 4）
    pub size: u8,
    /// 内部最小值，缺省为 0（预设变体有各自的缺省）
    pub min: Option<u32>,
    /// 内部最大值，缺省为 `2^(8*size) - 1`
    pub max: Option<u32>,
    pub access: Access,
    /// 构造时加载的内部值（不校验）
    pub default: u32,
    /// 被同步循环被动维护
    pub sync: bool,
    pub class: ConversionKind,
    pub factor: f64,
    pub offset: i64,
    pub sign_bit: Option<u8>,
    pub threshold: Option<i64>,
    pub bits: Option<u32>,
    pub mode: BitMode,
    pub mask: Option<u32>,
    /// `(内部码, 外部值)` 列表
    pub mapping: Option<Vec<(u32, i64)>>,
    /// 提供动态系数的同设备寄存器（仅线性变体）
    ///
    /// 外部值再乘以该寄存器缓存值对应的外部值。
    pub factor_reg: Option<String>,
}

impl Default for RegisterSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: 0,
            size: 1,
            min: None,
            max: None,
            access: Access::R,
            default: 0,
            sync: false,
            class: ConversionKind::Identity,
            factor: 1.0,
            offset: 0,
            sign_bit: None,
            threshold: None,
            bits: None,
            mode: BitMode::Any,
            mask: None,
            mapping: None,
            factor_reg: None,
        }
    }
}

impl RegisterSpec {
    pub fn new(name: impl Into<String>, address: u16) -> Self {
        Self {
            name: name.into(),
            address,
            ..Default::default()
        }
    }

    pub fn size(mut self, size: u8) -> Self {
        self.size = size;
        self
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// 读写寄存器
    pub fn writable(self) -> Self {
        self.access(Access::RW)
    }

    pub fn range(mut self, min: u32, max: u32) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn default_value(mut self, value: u32) -> Self {
        self.default = value;
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn linear(mut self, factor: f64, offset: i64) -> Self {
        self.class = ConversionKind::Linear;
        self.factor = factor;
        self.offset = offset;
        self
    }

    /// 线性转换再乘以寄存器 `name` 的外部值
    pub fn factor_reg(mut self, name: impl Into<String>) -> Self {
        self.factor_reg = Some(name.into());
        self
    }

    pub fn sign_bit(mut self, bit: u8) -> Self {
        self.sign_bit = Some(bit);
        self
    }

    pub fn threshold(mut self, factor: f64, threshold: i64) -> Self {
        self.class = ConversionKind::Threshold;
        self.factor = factor;
        self.threshold = Some(threshold);
        self
    }

    pub fn boolean(mut self) -> Self {
        self.class = ConversionKind::Boolean;
        self
    }

    pub fn bits(mut self, bits: u32, mode: BitMode) -> Self {
        self.class = ConversionKind::Boolean;
        self.bits = Some(bits);
        self.mode = mode;
        self
    }

    pub fn mask(mut self, mask: u32) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn enumerated(mut self, mapping: Vec<(u32, i64)>) -> Self {
        self.class = ConversionKind::Enumerated;
        self.mapping = Some(mapping);
        self
    }

    pub fn logarithmic(mut self) -> Self {
        self.class = ConversionKind::Logarithmic;
        self
    }

    pub fn ax_baud_rate(mut self) -> Self {
        self.class = ConversionKind::AxBaudRate;
        self
    }

    pub fn ax_compliance_slope(mut self) -> Self {
        self.class = ConversionKind::AxComplianceSlope;
        self
    }

    /// 解析转换变体
    ///
    /// 参数缺失或无效时返回 `InvalidParameter`（配置错误）。
    pub fn conversion(&self) -> Result<Conversion, ConversionError> {
        match self.class {
            ConversionKind::Identity => Ok(Conversion::Identity),
            ConversionKind::Boolean => Ok(Conversion::Boolean(BoolOptions {
                bits: self.bits,
                mode: self.mode,
                mask: self.mask,
            })),
            ConversionKind::Linear => {
                Conversion::linear_signed(self.factor, self.offset, self.sign_bit)
            },
            ConversionKind::Threshold => {
                let threshold = self.threshold.ok_or_else(|| ConversionError::InvalidParameter {
                    name: "threshold",
                    reason: "threshold conversion requires a threshold".to_string(),
                })?;
                Conversion::threshold(self.factor, threshold)
            },
            ConversionKind::Enumerated => {
                let mapping = self.mapping.clone().ok_or_else(|| {
                    ConversionError::InvalidParameter {
                        name: "mapping",
                        reason: "enumerated conversion requires a mapping".to_string(),
                    }
                })?;
                let table = EnumTable::new(mapping)?;
                Ok(Conversion::Enumerated(match self.mask {
                    Some(mask) => table.with_mask(mask),
                    None => table,
                }))
            },
            ConversionKind::Logarithmic | ConversionKind::AxComplianceSlope => {
                Ok(Conversion::Logarithmic)
            },
            ConversionKind::AxBaudRate => Ok(Conversion::Enumerated(EnumTable::ax_baud_rate())),
        }
    }

    /// 解析内部范围 `(min, max)`
    ///
    /// 缺省值按宽度和预设变体推导，最后由转换变体调整（例如简单布尔寄存器的 max 为 1）。
    pub fn bounds(&self, conversion: &Conversion) -> Result<(u32, u32), ConversionError> {
        let width_max =
            max_for_size(self.size).map_err(|e| ConversionError::InvalidParameter {
                name: "size",
                reason: e.to_string(),
            })?;
        let (preset_min, preset_max) = match self.class {
            ConversionKind::AxBaudRate => (1, 207),
            ConversionKind::AxComplianceSlope => (0, 254),
            _ => (0, width_max),
        };
        let min = self.min.unwrap_or(preset_min);
        let max = self.max.unwrap_or(preset_max);
        if max > width_max {
            return Err(ConversionError::InvalidParameter {
                name: "max",
                reason: format!("{} does not fit in {} byte(s)", max, self.size),
            });
        }
        if min > max {
            return Err(ConversionError::InvalidParameter {
                name: "min",
                reason: format!("min {} is greater than max {}", min, max),
            });
        }
        Ok(conversion.adjust_bounds(min, max))
    }
}

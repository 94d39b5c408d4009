//! 寄存器数值转换
//!
//! 每个寄存器在总线上保存一个定宽无符号整数（内部值），
//! 调用方看到的是带语义的外部值。`Conversion` 是一个封闭的变体集合，
//! 在装配阶段由 schema 解析一次，之后通过 `match` 静态分派。
//!
//! # 取整
//!
//! 所有浮点到整数的转换统一使用 round-half-to-even（银行家舍入），
//! 见 [`round_internal`]。

use crate::error::ConversionError;
use crate::value::Value;

/// 浮点到内部整数的统一取整（round-half-to-even）
///
/// ```
/// use roboglia_protocol::round_internal;
/// assert_eq!(round_internal(2.5), 2);
/// assert_eq!(round_internal(3.5), 4);
/// assert_eq!(round_internal(-0.5), 0);
/// ```
#[inline]
pub fn round_internal(value: f64) -> i64 {
    value.round_ties_even() as i64
}

/// Boolean 变体的位模式判定方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum BitMode {
    /// 位模式中任意一位置位即为 true
    #[default]
    Any,
    /// 位模式中所有位都置位才为 true
    All,
}

/// Boolean 变体参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoolOptions {
    /// 可选的位模式；为 `None` 时只比较内部值是否为 0
    pub bits: Option<u32>,
    /// 位模式判定方式
    pub mode: BitMode,
    /// 可选的部分写入掩码；掩码外的位在写入时保持不变
    pub mask: Option<u32>,
}

/// 枚举转换表（内部码 ↔ 外部值，一一对应）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnumTable {
    entries: Vec<(u32, i64)>,
    mask: Option<u32>,
}

impl EnumTable {
    /// 从 `(内部码, 外部值)` 列表构造
    ///
    /// 内部码或外部值重复时返回 `InvalidParameter`。
    pub fn new(entries: Vec<(u32, i64)>) -> Result<Self, ConversionError> {
        if entries.is_empty() {
            return Err(ConversionError::InvalidParameter {
                name: "mapping",
                reason: "mapping must not be empty".to_string(),
            });
        }
        for (i, (code, ext)) in entries.iter().enumerate() {
            if entries[..i].iter().any(|(c, e)| c == code || e == ext) {
                return Err(ConversionError::InvalidParameter {
                    name: "mapping",
                    reason: format!("duplicate entry ({}, {})", code, ext),
                });
            }
        }
        Ok(Self {
            entries,
            mask: None,
        })
    }

    /// 只让 `mask` 内的位参与映射
    pub fn with_mask(mut self, mask: u32) -> Self {
        self.mask = Some(mask);
        self
    }

    /// AX 系列舵机的波特率编码表
    pub fn ax_baud_rate() -> Self {
        Self {
            entries: vec![
                (1, 1_000_000),
                (3, 500_000),
                (4, 400_000),
                (7, 250_000),
                (9, 200_000),
                (16, 115_200),
                (34, 57_600),
                (103, 19_200),
                (207, 9_600),
            ],
            mask: None,
        }
    }

    pub fn entries(&self) -> &[(u32, i64)] {
        &self.entries
    }

    pub fn mask(&self) -> Option<u32> {
        self.mask
    }

    fn lookup_code(&self, code: u32) -> Option<i64> {
        let code = match self.mask {
            Some(mask) => code & mask,
            None => code,
        };
        self.entries.iter().find(|(c, _)| *c == code).map(|(_, e)| *e)
    }

    fn lookup_external(&self, external: f64) -> Option<u32> {
        self.entries.iter().find(|(_, e)| *e as f64 == external).map(|(c, _)| *c)
    }
}

/// 寄存器数值转换变体
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Conversion {
    /// 原样透传
    #[default]
    Identity,
    /// 布尔值（可带位模式和掩码）
    Boolean(BoolOptions),
    /// 线性转换：`internal = round(external * factor + offset)`
    ///
    /// `sign_bit` 给出时，内部值大于 `2^sign_bit / 2` 视为负数，
    /// 负数编码时加上 `2^sign_bit`。
    Linear {
        factor: f64,
        offset: i64,
        sign_bit: Option<u8>,
    },
    /// 阈值符号编码：阈值以上为非负数，阈值以下为负数的绝对值
    Threshold { factor: f64, threshold: i64 },
    /// 查表（未映射的外部值是错误，未映射的内部码解码为 0）
    Enumerated(EnumTable),
    /// 对数：`internal = 2^external`，`external = round(log2(internal))`
    Logarithmic,
}

impl Conversion {
    /// 带校验的线性转换构造
    pub fn linear(factor: f64, offset: i64) -> Result<Self, ConversionError> {
        Self::linear_signed(factor, offset, None)
    }

    /// 带符号位的线性转换构造
    pub fn linear_signed(
        factor: f64,
        offset: i64,
        sign_bit: Option<u8>,
    ) -> Result<Self, ConversionError> {
        check_factor(factor)?;
        if let Some(bit) = sign_bit
            && !(1..=32).contains(&bit)
        {
            return Err(ConversionError::InvalidParameter {
                name: "sign_bit",
                reason: format!("{} is outside 1..=32", bit),
            });
        }
        Ok(Conversion::Linear {
            factor,
            offset,
            sign_bit,
        })
    }

    /// 带校验的阈值转换构造
    pub fn threshold(factor: f64, threshold: i64) -> Result<Self, ConversionError> {
        check_factor(factor)?;
        Ok(Conversion::Threshold { factor, threshold })
    }

    /// 简单布尔转换（无位模式）
    pub fn boolean() -> Self {
        Conversion::Boolean(BoolOptions::default())
    }

    /// 外部值 → 内部整数
    ///
    /// `current` 是寄存器当前保存的内部值，只有带掩码的变体会用到
    /// （掩码外的位保持不变）。返回值尚未按寄存器范围钳位。
    pub fn to_internal(&self, value: Value, current: u32) -> Result<i64, ConversionError> {
        match self {
            Conversion::Identity => Ok(value.as_i64()),
            Conversion::Boolean(opts) => Ok(bool_to_internal(opts, value.as_bool(), current)),
            Conversion::Linear {
                factor,
                offset,
                sign_bit,
            } => {
                let raw = round_internal(value.as_f64() * factor + *offset as f64);
                match sign_bit {
                    Some(bit) if raw < 0 => Ok(raw + sign_weight(*bit)),
                    _ => Ok(raw),
                }
            },
            Conversion::Threshold { factor, threshold } => {
                let x = value.as_f64();
                if x < 0.0 {
                    Ok(round_internal(-x * factor))
                } else {
                    Ok(round_internal(x * factor) + threshold)
                }
            },
            Conversion::Enumerated(table) => {
                let code = table
                    .lookup_external(value.as_f64())
                    .ok_or(ConversionError::NotMapped { value })?;
                match table.mask {
                    Some(mask) => Ok(((current & !mask) | (code & mask)) as i64),
                    None => Ok(code as i64),
                }
            },
            Conversion::Logarithmic => Ok(round_internal(value.as_f64().exp2())),
        }
    }

    /// 内部整数 → 外部值
    pub fn to_external(&self, internal: u32) -> Value {
        match self {
            Conversion::Identity => Value::Int(internal as i64),
            Conversion::Boolean(opts) => Value::Bool(match opts.bits {
                None => internal != 0,
                Some(bits) => match opts.mode {
                    BitMode::Any => internal & bits != 0,
                    BitMode::All => internal & bits == bits,
                },
            }),
            Conversion::Linear {
                factor,
                offset,
                sign_bit,
            } => {
                let mut raw = internal as i64;
                if let Some(bit) = sign_bit {
                    let weight = sign_weight(*bit);
                    if raw > weight / 2 {
                        raw -= weight;
                    }
                }
                Value::Float((raw - offset) as f64 / factor)
            },
            Conversion::Threshold { factor, threshold } => {
                let raw = internal as i64;
                if raw >= *threshold {
                    Value::Float((raw - threshold) as f64 / factor)
                } else if raw == 0 {
                    Value::Float(0.0)
                } else {
                    Value::Float(-(raw as f64) / factor)
                }
            },
            Conversion::Enumerated(table) => Value::Int(table.lookup_code(internal).unwrap_or(0)),
            Conversion::Logarithmic => {
                if internal == 0 {
                    Value::Int(0)
                } else {
                    Value::Int(round_internal((internal as f64).log2()))
                }
            },
        }
    }

    /// 带动态系数的外部值：`external = to_external(internal) * scale`
    ///
    /// `scale` 通常是同一设备上另一个寄存器的外部值。
    pub fn to_external_scaled(&self, internal: u32, scale: f64) -> Value {
        Value::Float(self.to_external(internal).as_f64() * scale)
    }

    /// 带动态系数的内部值：外部值先除以 `scale` 再按本变体换算
    ///
    /// 线性变体即 `internal = round(external * factor / scale + offset)`。
    /// `scale` 为 0 或非有限值时无法换算，返回 `InvalidParameter`。
    pub fn to_internal_scaled(
        &self,
        value: Value,
        current: u32,
        scale: f64,
    ) -> Result<i64, ConversionError> {
        if scale == 0.0 || !scale.is_finite() {
            return Err(ConversionError::InvalidParameter {
                name: "factor_reg",
                reason: format!("dynamic factor {} cannot scale a value", scale),
            });
        }
        self.to_internal(Value::Float(value.as_f64() / scale), current)
    }

    /// 根据变体调整寄存器的内部范围
    ///
    /// 不带位模式和掩码的布尔寄存器最大值强制为 1。
    pub fn adjust_bounds(&self, min: u32, max: u32) -> (u32, u32) {
        match self {
            Conversion::Boolean(BoolOptions {
                bits: None,
                mask: None,
                ..
            }) => (min.min(1), 1),
            _ => (min, max),
        }
    }

    /// 变体名称（日志用）
    pub fn kind_name(&self) -> &'static str {
        match self {
            Conversion::Identity => "identity",
            Conversion::Boolean(_) => "boolean",
            Conversion::Linear { .. } => "linear",
            Conversion::Threshold { .. } => "threshold",
            Conversion::Enumerated(_) => "enumerated",
            Conversion::Logarithmic => "logarithmic",
        }
    }
}

fn check_factor(factor: f64) -> Result<(), ConversionError> {
    if factor == 0.0 || !factor.is_finite() {
        return Err(ConversionError::InvalidParameter {
            name: "factor",
            reason: format!("{} is not a usable conversion factor", factor),
        });
    }
    Ok(())
}

fn sign_weight(bit: u8) -> i64 {
    1i64 << bit
}

fn bool_to_internal(opts: &BoolOptions, value: bool, current: u32) -> i64 {
    match opts.mask {
        None => match (value, opts.bits) {
            (false, _) => 0,
            (true, Some(bits)) => bits as i64,
            (true, None) => 1,
        },
        Some(mask) => {
            let kept = current & !mask;
            if value {
                // 无位模式时置位整个掩码
                (kept | (opts.bits.unwrap_or(mask) & mask)) as i64
            } else {
                kept as i64
            }
        },
    }
}

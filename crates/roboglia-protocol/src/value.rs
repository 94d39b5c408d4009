//! 寄存器外部值
//!
//! 不同的转换变体产生不同类型的外部值（布尔、整数、浮点），
//! 用一个小的封闭枚举统一表示，避免动态类型。

use std::fmt;

/// 寄存器的外部（语义）值
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(untagged)
)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Value {
    /// 转换为浮点数（布尔值映射为 0.0 / 1.0）
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            },
            Value::Int(i) => i as f64,
            Value::Float(f) => f,
        }
    }

    /// 转换为布尔值（非零为 true）
    pub fn as_bool(self) -> bool {
        match self {
            Value::Bool(b) => b,
            Value::Int(i) => i != 0,
            Value::Float(f) => f != 0.0,
        }
    }

    /// 转换为整数（浮点按 round-half-to-even 取整）
    pub fn as_i64(self) -> i64 {
        match self {
            Value::Bool(b) => b as i64,
            Value::Int(i) => i,
            Value::Float(f) => crate::conversion::round_internal(f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Bool(true).as_f64(), 1.0);
        assert_eq!(Value::Int(-3).as_f64(), -3.0);
        assert!(Value::Float(0.5).as_bool());
        assert!(!Value::Int(0).as_bool());
        assert_eq!(Value::Float(2.5).as_i64(), 2);
        assert_eq!(Value::Float(3.5).as_i64(), 4);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Int(1000000).to_string(), "1000000");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
    }
}

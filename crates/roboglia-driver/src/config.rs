//! 循环配置

use crate::error::DriverError;
use crate::regulator::MAX_CORRECTION;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// 超过该频率时给出警告（普通线程调度难以保证）
const HIGH_FREQUENCY_HZ: f64 = 10_000.0;

/// 周期循环配置
///
/// # TOML 示例
///
/// ```toml
/// frequency = 100.0   # 目标频率 [Hz]
/// warning = 0.9       # 实际频率低于 90% 时告警（也可写成 90）
/// throttle = 0.1      # 每次评估的修正步长
/// review = 1.0        # 评估窗口 [s]
/// patience = 1.0      # setup 耐心窗口 [s]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// 目标频率 [Hz]
    pub frequency: f64,

    /// 告警阈值（目标频率的比例）
    ///
    /// `>= 2` 且 `<= 110` 的值按百分比解释；超过 110 为配置错误。
    pub warning: f64,

    /// 修正步长，范围 `[0, 1)`
    pub throttle: f64,

    /// 评估窗口 [s]
    pub review: f64,

    /// 等待 setup 完成的时间 [s]
    pub patience: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            frequency: 100.0,
            warning: 0.9,
            throttle: 0.1,
            review: 1.0,
            patience: 1.0,
        }
    }
}

impl LoopConfig {
    /// 以缺省参数创建指定频率的配置
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency,
            ..Default::default()
        }
    }

    pub fn with_warning(mut self, warning: f64) -> Self {
        self.warning = warning;
        self
    }

    pub fn with_throttle(mut self, throttle: f64) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_review(mut self, review: f64) -> Self {
        self.review = review;
        self
    }

    pub fn with_patience(mut self, patience: f64) -> Self {
        self.patience = patience;
        self
    }

    /// 校验并返回规范化后的配置（百分比形式的 `warning` 换算为比例）
    pub fn validate(&self) -> Result<LoopConfig, DriverError> {
        if !self.frequency.is_finite() || self.frequency <= 0.0 {
            return Err(DriverError::Config(format!(
                "frequency must be positive, got {}",
                self.frequency
            )));
        }
        if self.frequency > HIGH_FREQUENCY_HZ {
            warn!(
                "Loop frequency {} Hz is very high; the OS scheduler may not keep up",
                self.frequency
            );
        }
        let warning = normalize_warning(self.warning)?;
        if !(0.0..1.0).contains(&self.throttle) {
            return Err(DriverError::Config(format!(
                "throttle must be in [0, 1), got {}",
                self.throttle
            )));
        }
        if !self.review.is_finite() || self.review <= 0.0 {
            return Err(DriverError::Config(format!(
                "review must be positive, got {}",
                self.review
            )));
        }
        if !self.patience.is_finite() || self.patience <= 0.0 {
            return Err(DriverError::Config(format!(
                "patience must be positive, got {}",
                self.patience
            )));
        }
        // 修正后的睡眠时长和耐心窗口都必须能表示为 Duration
        seconds("period", MAX_CORRECTION / self.frequency)?;
        seconds("patience", self.patience)?;
        Ok(LoopConfig {
            warning,
            ..self.clone()
        })
    }

    /// 标称周期（未校验的配置超出范围时取 `Duration::MAX`）
    pub fn period(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.frequency).unwrap_or(Duration::MAX)
    }

    pub fn patience_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.patience).unwrap_or(Duration::MAX)
    }
}

fn seconds(name: &str, secs: f64) -> Result<Duration, DriverError> {
    Duration::try_from_secs_f64(secs).map_err(|e| {
        DriverError::Config(format!("{} of {} s is out of range: {}", name, secs, e))
    })
}

fn normalize_warning(warning: f64) -> Result<f64, DriverError> {
    match warning {
        w if (0.0..2.0).contains(&w) => Ok(w),
        w if (2.0..=110.0).contains(&w) => Ok(w / 100.0),
        w => Err(DriverError::Config(format!(
            "warning must be a ratio in [0, 2) or a percentage up to 110, got {}",
            w
        ))),
    }
}

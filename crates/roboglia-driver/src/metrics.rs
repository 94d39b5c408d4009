//! 循环运行指标
//!
//! 所有计数器都是原子变量，工作线程写入、任意线程读取，不引入锁。

use std::sync::atomic::{AtomicU64, Ordering};

/// 周期循环指标
///
/// 浮点量以位模式保存在 `AtomicU64` 中。
#[derive(Debug)]
pub struct LoopMetrics {
    ticks: AtomicU64,
    reviews: AtomicU64,
    warnings: AtomicU64,
    actual_frequency: AtomicU64,
    correction: AtomicU64,
}

impl LoopMetrics {
    /// 新建指标；实际频率初始为目标频率，修正系数初始为 1.0
    pub fn new(frequency: f64) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            reviews: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            actual_frequency: AtomicU64::new(frequency.to_bits()),
            correction: AtomicU64::new(1.0f64.to_bits()),
        }
    }

    pub(crate) fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_review(&self, actual_frequency: f64, correction: f64, below_warning: bool) {
        self.actual_frequency
            .store(actual_frequency.to_bits(), Ordering::Relaxed);
        self.correction.store(correction.to_bits(), Ordering::Relaxed);
        self.reviews.fetch_add(1, Ordering::Relaxed);
        if below_warning {
            self.warnings.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> LoopMetricsSnapshot {
        LoopMetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            reviews: self.reviews.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            actual_frequency: f64::from_bits(self.actual_frequency.load(Ordering::Relaxed)),
            correction: f64::from_bits(self.correction.load(Ordering::Relaxed)),
        }
    }

    /// 清零计数器（频率和修正系数保持不变）
    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Relaxed);
        self.reviews.store(0, Ordering::Relaxed);
        self.warnings.store(0, Ordering::Relaxed);
    }
}

/// 周期循环指标快照
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopMetricsSnapshot {
    /// 执行 `atomic()` 的次数
    pub ticks: u64,
    /// 频率评估次数
    pub reviews: u64,
    /// 低于警告阈值的评估次数
    pub warnings: u64,
    /// 最近一次评估得到的实际频率 [Hz]
    pub actual_frequency: f64,
    /// 当前的睡眠修正系数
    pub correction: f64,
}

/// 同步循环指标
///
/// # 使用示例
///
/// ```rust
/// use roboglia_driver::SyncMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = SyncMetrics::default();
/// metrics.skipped.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().skipped, 1);
/// ```
#[derive(Debug, Default)]
pub struct SyncMetrics {
    /// 执行的 tick 数
    pub ticks: AtomicU64,
    /// 成功完成的总线事务数
    pub transactions: AtomicU64,
    /// 因总线被占用而跳过的事务数
    pub skipped: AtomicU64,
    /// 失败的事务数
    pub errors: AtomicU64,
    /// 读事务中缺失的设备数据条数
    pub missing: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            missing: self.missing.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Relaxed);
        self.transactions.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.missing.store(0, Ordering::Relaxed);
    }
}

/// 同步循环指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMetricsSnapshot {
    pub ticks: u64,
    pub transactions: u64,
    pub skipped: u64,
    pub errors: u64,
    pub missing: u64,
}

impl SyncMetricsSnapshot {
    /// 跳过率（百分比），没有任何尝试时为 0.0
    pub fn skip_rate(&self) -> f64 {
        let attempts = self.transactions + self.skipped + self.errors;
        if attempts == 0 {
            return 0.0;
        }
        (self.skipped as f64 / attempts as f64) * 100.0
    }
}

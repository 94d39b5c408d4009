//! 自适应频率调节
//!
//! 离散反馈：每累计约 `frequency * review` 次执行，计算实际频率，
//! 低于目标时按 `(1 - throttle)` 缩小睡眠修正系数，否则按 `(1 + throttle)` 放大。

use crate::config::LoopConfig;
use std::time::{Duration, Instant};

/// 修正系数下限（系数按乘法调整，到 0 后无法恢复）
const MIN_CORRECTION: f64 = 0.01;

/// 修正系数上限
pub(crate) const MAX_CORRECTION: f64 = 2.0;

/// 一次频率评估的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Review {
    /// 窗口内的实际频率 [Hz]
    pub actual_frequency: f64,
    /// 调整后的修正系数
    pub correction: f64,
    /// 是否低于告警阈值
    pub below_warning: bool,
}

/// 频率调节器
#[derive(Debug, Clone)]
pub struct FrequencyRegulator {
    target: f64,
    period: Duration,
    warning: f64,
    throttle: f64,
    window_ticks: f64,
    correction: f64,
    actual_frequency: f64,
    count: u64,
    window_start: Instant,
}

impl FrequencyRegulator {
    /// `config` 应当已经通过 [`LoopConfig::validate`]
    pub fn new(config: &LoopConfig) -> Self {
        Self {
            target: config.frequency,
            period: config.period(),
            warning: config.warning,
            throttle: config.throttle,
            window_ticks: config.frequency * config.review,
            correction: 1.0,
            actual_frequency: config.frequency,
            count: 0,
            window_start: Instant::now(),
        }
    }

    pub fn correction(&self) -> f64 {
        self.correction
    }

    pub fn actual_frequency(&self) -> f64 {
        self.actual_frequency
    }

    /// 本次执行耗时 `elapsed` 后应睡眠的时长
    pub fn sleep_for(&self, elapsed: Duration) -> Duration {
        self.period.saturating_sub(elapsed).mul_f64(self.correction)
    }

    /// 丢弃当前窗口的统计（暂停期间调用）
    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&mut self, now: Instant) {
        self.count = 0;
        self.window_start = now;
    }

    /// 记录一次执行；窗口满时返回评估结果
    pub fn tick(&mut self) -> Option<Review> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Option<Review> {
        self.count += 1;
        if (self.count as f64) < self.window_ticks {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.window_start).as_secs_f64();
        let actual = if elapsed > 0.0 {
            self.count as f64 / elapsed
        } else {
            self.target
        };
        let factor = if actual < self.target {
            1.0 - self.throttle
        } else {
            1.0 + self.throttle
        };
        self.correction = (self.correction * factor).clamp(MIN_CORRECTION, MAX_CORRECTION);
        self.actual_frequency = actual;
        self.reset_at(now);
        Some(Review {
            actual_frequency: actual,
            correction: self.correction,
            below_warning: actual < self.target * self.warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LoopConfig {
        LoopConfig::new(10.0).with_throttle(0.02).validate().unwrap()
    }

    /// 模拟：每次执行耗时 `per_tick`，返回第一次评估
    fn run_window(reg: &mut FrequencyRegulator, start: Instant, per_tick: Duration) -> Review {
        reg.reset_at(start);
        let mut now = start;
        loop {
            now += per_tick;
            if let Some(review) = reg.tick_at(now) {
                return review;
            }
        }
    }

    #[test]
    fn test_slow_loop_shrinks_correction() {
        let mut reg = FrequencyRegulator::new(&config());
        let review = run_window(&mut reg, Instant::now(), Duration::from_millis(105));
        assert!((review.actual_frequency - 10.0 / 1.05).abs() < 1e-6);
        assert!((review.correction - 0.98).abs() < 1e-12);
        // 9.52 Hz 仍高于 9 Hz 告警线
        assert!(!review.below_warning);
        assert_eq!(reg.correction(), review.correction);
    }

    #[test]
    fn test_fast_loop_grows_correction() {
        let mut reg = FrequencyRegulator::new(&config());
        let review = run_window(&mut reg, Instant::now(), Duration::from_millis(95));
        assert!(review.actual_frequency > 10.0);
        assert!((review.correction - 1.02).abs() < 1e-12);
    }

    #[test]
    fn test_warning_threshold() {
        let mut reg = FrequencyRegulator::new(&config());
        let review = run_window(&mut reg, Instant::now(), Duration::from_millis(125));
        assert!(review.actual_frequency < 9.0);
        assert!(review.below_warning);
    }

    #[test]
    fn test_correction_is_bounded() {
        let mut reg = FrequencyRegulator::new(&LoopConfig::new(10.0).with_throttle(0.5));
        let mut start = Instant::now();
        for _ in 0..50 {
            run_window(&mut reg, start, Duration::from_millis(500));
            start += Duration::from_secs(10);
        }
        assert_eq!(reg.correction(), MIN_CORRECTION);
        for _ in 0..50 {
            run_window(&mut reg, start, Duration::from_millis(1));
            start += Duration::from_secs(10);
        }
        assert_eq!(reg.correction(), MAX_CORRECTION);
    }

    #[test]
    fn test_sleep_scaled_by_correction() {
        let mut reg = FrequencyRegulator::new(&config());
        assert_eq!(reg.sleep_for(Duration::from_millis(30)), Duration::from_millis(70));
        assert_eq!(reg.sleep_for(Duration::from_millis(150)), Duration::ZERO);
        run_window(&mut reg, Instant::now(), Duration::from_millis(105));
        let sleep = reg.sleep_for(Duration::from_millis(50));
        assert!((sleep.as_secs_f64() - 0.049).abs() < 1e-6);
    }

    /// 重置后旧窗口的执行次数不计入新窗口
    #[test]
    fn test_reset_discards_window() {
        let mut reg = FrequencyRegulator::new(&config());
        let start = Instant::now();
        reg.reset_at(start);
        for i in 1..=9 {
            assert!(reg.tick_at(start + Duration::from_millis(100 * i)).is_none());
        }
        let resume = start + Duration::from_secs(5);
        reg.reset_at(resume);
        // 需要再完整执行 10 次才评估，且只用暂停之后的时间
        for i in 1..=9 {
            assert!(reg.tick_at(resume + Duration::from_millis(100 * i)).is_none());
        }
        let review = reg.tick_at(resume + Duration::from_millis(1000)).unwrap();
        assert!((review.actual_frequency - 10.0).abs() < 1e-6);
    }
}

//! 周期循环
//!
//! 以目标频率重复执行一个工作单元（[`PeriodicWork`]），睡眠时长按
//! [`FrequencyRegulator`] 的修正系数调整。工作单元通过组合接入，
//! 不需要继承或子类化。
//!
//! # 睡眠与唤醒
//!
//! - 执行后睡眠 `(period - elapsed) * correction`，按不超过 [`MAX_NAP`] 的片段睡眠，
//!   每个片段之间检查停止信号
//! - 暂停时每次空转 `min(period, PAUSE_IDLE)`，并丢弃当前统计窗口

use crate::config::LoopConfig;
use crate::error::DriverError;
use crate::metrics::{LoopMetrics, LoopMetricsSnapshot};
use crate::regulator::FrequencyRegulator;
use crate::thread::{ControlledThread, Signals, Task, ThreadState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 单次睡眠片段的上限
pub const MAX_NAP: Duration = Duration::from_millis(50);

/// 暂停时单次空转的上限
const PAUSE_IDLE: Duration = Duration::from_millis(100);

/// 周期工作单元
///
/// `atomic()` 必须尽快完成且不向外传播错误：实现者自行记录失败。
/// `atomic()` 中的 panic 会使整个循环以崩溃结束。
pub trait PeriodicWork: Send + 'static {
    fn setup(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn atomic(&mut self);

    fn teardown(&mut self) {}
}

impl PeriodicWork for Box<dyn PeriodicWork> {
    fn setup(&mut self) -> Result<(), DriverError> {
        (**self).setup()
    }

    fn atomic(&mut self) {
        (**self).atomic()
    }

    fn teardown(&mut self) {
        (**self).teardown()
    }
}

/// 闭包工作单元，见 [`from_fn`]
pub struct FnWork<F>(F);

impl<F: FnMut() + Send + 'static> PeriodicWork for FnWork<F> {
    fn atomic(&mut self) {
        (self.0)()
    }
}

/// 用闭包作为工作单元
pub fn from_fn<F: FnMut() + Send + 'static>(f: F) -> FnWork<F> {
    FnWork(f)
}

/// 周期任务：把工作单元放进频率调节循环
pub struct PeriodicTask<W: PeriodicWork> {
    name: String,
    config: LoopConfig,
    work: W,
    metrics: Arc<LoopMetrics>,
}

impl<W: PeriodicWork> Task for PeriodicTask<W> {
    fn setup(&mut self) -> Result<(), DriverError> {
        #[cfg(feature = "realtime")]
        {
            use thread_priority::*;
            match set_current_thread_priority(ThreadPriority::Max) {
                Ok(_) => info!("Loop '{}' thread priority set to MAX (realtime)", self.name),
                Err(e) => warn!(
                    "Failed to set loop '{}' thread priority: {:?}. \
                     On Linux this needs CAP_SYS_NICE or an rtprio limit.",
                    self.name, e
                ),
            }
        }
        self.work.setup()
    }

    fn run(&mut self, signals: &Signals) -> Result<(), DriverError> {
        let mut regulator = FrequencyRegulator::new(&self.config);
        let period = self.config.period();
        debug!("Loop '{}' running at {} Hz", self.name, self.config.frequency);

        while !signals.stopped() {
            if signals.paused() {
                regulator.reset();
                nap(signals, period.min(PAUSE_IDLE));
                continue;
            }

            let start = Instant::now();
            self.work.atomic();
            self.metrics.record_tick();
            nap(signals, regulator.sleep_for(start.elapsed()));

            if let Some(review) = regulator.tick() {
                self.metrics.record_review(
                    review.actual_frequency,
                    review.correction,
                    review.below_warning,
                );
                if review.below_warning {
                    warn!(
                        "Loop '{}' running under warning threshold at {:.2} Hz ({:.0}%)",
                        self.name,
                        review.actual_frequency,
                        review.actual_frequency / self.config.frequency * 100.0
                    );
                }
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        self.work.teardown();
    }
}

/// 分片睡眠，停止信号出现时提前返回
fn nap(signals: &Signals, duration: Duration) {
    // 超出 Instant 表示范围的时长视为无限，只等停止信号
    let deadline = Instant::now().checked_add(duration);
    loop {
        let now = Instant::now();
        if signals.stopped() || deadline.is_some_and(|d| now >= d) {
            return;
        }
        let remaining = deadline.map_or(MAX_NAP, |d| d - now);
        spin_sleep::sleep(remaining.min(MAX_NAP));
    }
}

/// 周期循环
///
/// # 示例
///
/// ```
/// use roboglia_driver::{LoopConfig, PeriodicLoop, periodic};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// let ticks = Arc::new(AtomicU64::new(0));
/// let counter = ticks.clone();
/// let mut lp = PeriodicLoop::new(
///     "counter",
///     LoopConfig::new(200.0),
///     periodic::from_fn(move || {
///         counter.fetch_add(1, Ordering::Relaxed);
///     }),
/// )
/// .unwrap();
///
/// lp.start(true).unwrap();
/// std::thread::sleep(std::time::Duration::from_millis(50));
/// lp.stop(true).unwrap();
/// assert!(ticks.load(Ordering::Relaxed) > 0);
/// ```
pub struct PeriodicLoop<W: PeriodicWork> {
    thread: ControlledThread<PeriodicTask<W>>,
    config: LoopConfig,
    metrics: Arc<LoopMetrics>,
}

impl<W: PeriodicWork> PeriodicLoop<W> {
    /// 校验配置并创建循环（不启动）
    pub fn new(name: impl Into<String>, config: LoopConfig, work: W) -> Result<Self, DriverError> {
        let name = name.into();
        let config = config.validate()?;
        let metrics = Arc::new(LoopMetrics::new(config.frequency));
        let task = PeriodicTask {
            name: name.clone(),
            config: config.clone(),
            work,
            metrics: metrics.clone(),
        };
        let thread = ControlledThread::new(name, task).with_patience(config.patience_duration());
        info!(
            "Loop '{}' created: {} Hz, warning {:.0}%, throttle {}, review {}s",
            thread.name(),
            config.frequency,
            config.warning * 100.0,
            config.throttle,
            config.review
        );
        Ok(Self {
            thread,
            config,
            metrics,
        })
    }

    pub fn name(&self) -> &str {
        self.thread.name()
    }

    /// 规范化后的配置
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn frequency(&self) -> f64 {
        self.config.frequency
    }

    pub fn period(&self) -> Duration {
        self.config.period()
    }

    /// 最近一次评估得到的实际频率
    pub fn actual_frequency(&self) -> f64 {
        self.metrics.snapshot().actual_frequency
    }

    pub fn metrics(&self) -> LoopMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 在循环停止时访问工作单元
    pub fn with_work<R>(&self, f: impl FnOnce(&mut W) -> R) -> Option<R> {
        self.thread.with_task(|task| f(&mut task.work))
    }

    pub fn start(&mut self, wait: bool) -> Result<(), DriverError> {
        self.thread.start(wait)
    }

    pub fn stop(&mut self, wait: bool) -> Result<(), DriverError> {
        self.thread.stop(wait)
    }

    pub fn pause(&self) {
        self.thread.pause()
    }

    pub fn resume(&self) {
        self.thread.resume()
    }

    pub fn started(&self) -> bool {
        self.thread.started()
    }

    pub fn stopped(&self) -> bool {
        self.thread.stopped()
    }

    pub fn running(&self) -> bool {
        self.thread.running()
    }

    pub fn paused(&self) -> bool {
        self.thread.paused()
    }

    pub fn crashed(&self) -> bool {
        self.thread.crashed()
    }

    pub fn state(&self) -> ThreadState {
        self.thread.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    fn counting_loop(frequency: f64) -> (Arc<AtomicU64>, PeriodicLoop<impl PeriodicWork>) {
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = ticks.clone();
        let lp = PeriodicLoop::new(
            "counter",
            LoopConfig::new(frequency),
            from_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        (ticks, lp)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = PeriodicLoop::new("bad", LoopConfig::new(0.0), from_fn(|| {}));
        assert!(matches!(result, Err(DriverError::Config(_))));
    }

    #[test]
    fn test_huge_patience_is_config_error() {
        let config = LoopConfig::new(10.0).with_patience(1e30);
        let result = PeriodicLoop::new("patient", config, from_fn(|| {}));
        assert!(matches!(result, Err(DriverError::Config(_))));
    }

    /// 周期极长的循环仍能及时响应停止
    #[test]
    fn test_very_slow_loop_stops_promptly() {
        let (ticks, mut lp) = counting_loop(1e-15);
        lp.start(true).unwrap();
        let deadline = Instant::now() + Duration::from_secs(1);
        while ticks.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        let begin = Instant::now();
        lp.stop(true).unwrap();
        assert!(begin.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_start_then_immediate_stop() {
        let (ticks, mut lp) = counting_loop(100.0);
        lp.start(true).unwrap();
        lp.stop(true).unwrap();
        assert_eq!(lp.state(), ThreadState::Stopped);
        let after = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }

    #[test]
    fn test_pause_stops_atomic_calls() {
        let (ticks, mut lp) = counting_loop(200.0);
        lp.start(true).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(ticks.load(Ordering::SeqCst) > 0);

        lp.pause();
        // 等待正在进行的一次执行结束
        thread::sleep(Duration::from_millis(20));
        let frozen = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(ticks.load(Ordering::SeqCst), frozen);

        lp.resume();
        thread::sleep(Duration::from_millis(50));
        assert!(ticks.load(Ordering::SeqCst) > frozen);
        lp.stop(true).unwrap();
        assert_eq!(lp.metrics().ticks, ticks.load(Ordering::SeqCst));
    }

    #[test]
    fn test_slow_loop_stops_promptly() {
        // 1 Hz 的循环在睡眠中也能在一个片段内响应停止
        let (_ticks, mut lp) = counting_loop(1.0);
        lp.start(true).unwrap();
        thread::sleep(Duration::from_millis(20));
        let begin = Instant::now();
        lp.stop(true).unwrap();
        assert!(begin.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_setup_failure_propagates() {
        struct Unreachable;
        impl PeriodicWork for Unreachable {
            fn setup(&mut self) -> Result<(), DriverError> {
                Err(DriverError::Config("bus is closed".to_string()))
            }
            fn atomic(&mut self) {}
        }

        let mut lp = PeriodicLoop::new("sync", LoopConfig::new(10.0), Unreachable).unwrap();
        let err = lp.start(true).unwrap_err();
        assert!(matches!(err, DriverError::SetupCrashed { .. }));
        assert!(lp.stopped());
    }

    #[test]
    fn test_boxed_work() {
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = ticks.clone();
        let work: Box<dyn PeriodicWork> = Box::new(from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let mut lp = PeriodicLoop::new("boxed", LoopConfig::new(100.0), work).unwrap();
        lp.start(true).unwrap();
        thread::sleep(Duration::from_millis(50));
        lp.stop(true).unwrap();
        assert!(ticks.load(Ordering::SeqCst) > 0);
        assert!(lp.with_work(|_| ()).is_some());
    }
}

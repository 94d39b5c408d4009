//! 总线仲裁门
//!
//! 非阻塞的互斥原语：`try_acquire()` 失败立即返回，调用方跳过本周期，
//! 而不是排队等待。没有公平性保证，竞争激烈时可能饥饿。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// 有界等待时的轮询间隔
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// 总线仲裁门
///
/// # 示例
///
/// ```
/// use roboglia_bus::BusGate;
///
/// let gate = BusGate::new();
/// assert!(gate.try_acquire());
/// assert!(!gate.try_acquire()); // 已被持有，立即失败
/// gate.release();
/// assert!(gate.try_acquire());
/// ```
#[derive(Debug, Default)]
pub struct BusGate {
    held: AtomicBool,
    acquired: AtomicU64,
    contended: AtomicU64,
}

impl BusGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试获取（非阻塞）
    pub fn try_acquire(&self) -> bool {
        let ok = self
            .held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        if ok {
            self.acquired.fetch_add(1, Ordering::Relaxed);
        } else {
            self.contended.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// 释放
    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// 在 `timeout` 内反复尝试获取
    ///
    /// 给非循环的直接读写调用方使用；循环内部只用 `try_acquire`。
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(ACQUIRE_POLL_INTERVAL);
        }
    }

    /// 非阻塞获取，返回 RAII 守卫
    pub fn try_lock(&self) -> Option<GateGuard<'_>> {
        self.try_acquire().then_some(GateGuard { gate: self })
    }

    /// 有界等待获取，返回 RAII 守卫
    pub fn lock_timeout(&self, timeout: Duration) -> Option<GateGuard<'_>> {
        self.acquire_timeout(timeout).then_some(GateGuard { gate: self })
    }

    /// 成功获取次数
    pub fn acquired_count(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// 获取失败（竞争）次数
    pub fn contended_count(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }
}

/// 仲裁门守卫，Drop 时释放
#[derive(Debug)]
#[must_use = "the gate is released as soon as the guard is dropped"]
pub struct GateGuard<'a> {
    gate: &'a BusGate,
}

impl GateGuard<'_> {
    /// 显式释放（等价于 drop）
    pub fn release(self) {}
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

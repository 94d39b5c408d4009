//! 受控线程
//!
//! 把一个后台任务包装成可以启动、停止、暂停、恢复的线程。
//!
//! # 状态
//!
//! 由两个独立信号 `started` / `paused` 加上崩溃标志派生：
//!
//! ```text
//! Stopped ──start──▶ Starting ──setup ok──▶ Running ⇄ Paused
//!    ▲                   │                      │
//!    └──── stop / run 正常返回 ◀────────────────┘
//! 任意阶段出错或 panic ──▶ Crashed（直到下次 start）
//! ```
//!
//! 停止是协作式的：`stop()` 清除信号，由任务自己在 `run()` 中轮询后退出；
//! 等待时使用多次有界 join，调用方线程不会无限挂起。

use crate::error::DriverError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// 每次有界 join 的时长
const JOIN_SLICE: Duration = Duration::from_secs(1);

/// `stop()` 最多尝试 join 的次数
const STOP_JOIN_ATTEMPTS: u32 = 5;

/// Drop 时最多尝试 join 的次数
const DROP_JOIN_ATTEMPTS: u32 = 2;

/// 缺省的 setup 耐心窗口
pub const DEFAULT_PATIENCE: Duration = Duration::from_secs(1);

/// 后台任务
///
/// `run()` 必须周期性地检查 [`Signals`]：`stopped()` 为真时尽快返回，
/// `paused()` 为真时不做实际工作。
pub trait Task: Send + 'static {
    /// 启动前的准备工作；返回错误视为 setup 崩溃
    fn setup(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    /// 主体工作
    fn run(&mut self, signals: &Signals) -> Result<(), DriverError>;

    /// `run()` 正常返回后的清理
    fn teardown(&mut self) {}
}

/// 线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Stopped,
    /// setup 进行中
    Starting,
    Running,
    Paused,
    /// 上一次运行因错误或 panic 结束
    Crashed,
}

/// 控制信号
///
/// 调用方线程写、工作线程轮询。
#[derive(Debug, Default)]
pub struct Signals {
    started: AtomicBool,
    paused: AtomicBool,
    crashed: AtomicBool,
    starting: AtomicBool,
}

impl Signals {
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        !self.started()
    }

    pub fn running(&self) -> bool {
        self.started() && !self.paused.load(Ordering::SeqCst)
    }

    pub fn paused(&self) -> bool {
        self.started() && self.paused.load(Ordering::SeqCst)
    }

    pub fn crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    fn crash(&self) {
        self.crashed.store(true, Ordering::SeqCst);
        self.starting.store(false, Ordering::SeqCst);
        self.clear();
    }
}

/// setup 握手结果
type SetupOutcome = Result<(), String>;

/// 工作线程句柄
///
/// `done` 通道没有发送方之外的任何消息：工作线程退出时发送端被 drop，
/// 接收端随即断开，借此实现不消耗 `JoinHandle` 的有界等待。
struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl Worker {
    /// 多次有界等待；超时返回原句柄，调用方可以稍后再试
    fn join_bounded(self, attempts: u32, signals: &Signals) -> Result<(), Worker> {
        for _ in 0..attempts {
            signals.clear();
            match self.done.recv_timeout(JOIN_SLICE) {
                Err(RecvTimeoutError::Disconnected) => {
                    // 任务里的 panic 已被捕获，这里的 join 不会再带出 panic
                    let _ = self.handle.join();
                    return Ok(());
                },
                Ok(()) | Err(RecvTimeoutError::Timeout) => {},
            }
        }
        Err(self)
    }
}

/// 受控线程
///
/// 任务放在 `Arc<Mutex<_>>` 中，线程停止后可以再次启动同一个任务。
///
/// # 示例
///
/// ```
/// use roboglia_driver::{ControlledThread, DriverError, Signals, Task};
/// use std::time::Duration;
///
/// struct Idle;
///
/// impl Task for Idle {
///     fn run(&mut self, signals: &Signals) -> Result<(), DriverError> {
///         while !signals.stopped() {
///             std::thread::sleep(Duration::from_millis(5));
///         }
///         Ok(())
///     }
/// }
///
/// let mut thread = ControlledThread::new("idle", Idle);
/// thread.start(true).unwrap();
/// assert!(thread.running());
/// thread.stop(true).unwrap();
/// assert!(thread.stopped());
/// ```
pub struct ControlledThread<T: Task> {
    name: String,
    patience: Duration,
    task: Arc<Mutex<T>>,
    signals: Arc<Signals>,
    worker: Option<Worker>,
}

impl<T: Task> ControlledThread<T> {
    pub fn new(name: impl Into<String>, task: T) -> Self {
        Self {
            name: name.into(),
            patience: DEFAULT_PATIENCE,
            task: Arc::new(Mutex::new(task)),
            signals: Arc::new(Signals::default()),
            worker: None,
        }
    }

    /// 设置 setup 耐心窗口
    pub fn with_patience(mut self, patience: Duration) -> Self {
        self.patience = patience;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn patience(&self) -> Duration {
        self.patience
    }

    /// 控制信号（只读视图）
    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// 在线程未运行时访问任务
    ///
    /// 任务正被工作线程持有时返回 `None`。
    pub fn with_task<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.task.try_lock().map(|mut task| f(&mut task))
    }

    pub fn started(&self) -> bool {
        self.signals.started()
    }

    pub fn stopped(&self) -> bool {
        self.signals.stopped()
    }

    pub fn running(&self) -> bool {
        self.signals.running()
    }

    pub fn paused(&self) -> bool {
        self.signals.paused()
    }

    pub fn crashed(&self) -> bool {
        self.signals.crashed()
    }

    pub fn state(&self) -> ThreadState {
        if self.signals.crashed() {
            ThreadState::Crashed
        } else if self.signals.paused() {
            ThreadState::Paused
        } else if self.signals.started() {
            ThreadState::Running
        } else if self.signals.starting.load(Ordering::SeqCst) {
            ThreadState::Starting
        } else {
            ThreadState::Stopped
        }
    }

    /// 启动线程
    ///
    /// 已经在运行时先完整地 `stop()`。`wait` 为真时最多等待耐心窗口：
    /// setup 报错或 panic 返回 [`DriverError::SetupCrashed`]，
    /// 窗口内没有完成返回 [`DriverError::SetupTimeout`]。两种失败都会先回收工作线程。
    pub fn start(&mut self, wait: bool) -> Result<(), DriverError> {
        info!("Start requested for '{}'", self.name);
        if self.started() {
            info!("'{}' already running. Stopping first.", self.name);
            self.stop(true)?;
        }
        self.reap()?;

        let (ready_tx, ready_rx) = bounded::<SetupOutcome>(1);
        let (done_tx, done_rx) = bounded::<()>(0);
        let abort = Arc::new(AtomicBool::new(false));

        self.signals.crashed.store(false, Ordering::SeqCst);
        self.signals.starting.store(true, Ordering::SeqCst);

        let task = self.task.clone();
        let signals = self.signals.clone();
        let worker_abort = abort.clone();
        let name = self.name.clone();
        let patience = self.patience;

        let spawned = thread::Builder::new().name(self.name.clone()).spawn(move || {
            let _done = done_tx;
            worker_main(&name, patience, &task, &signals, &worker_abort, ready_tx);
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                self.signals.starting.store(false, Ordering::SeqCst);
                return Err(DriverError::Spawn {
                    name: self.name.clone(),
                    source,
                });
            },
        };
        self.worker = Some(Worker {
            handle,
            done: done_rx,
        });
        info!("'{}' starting", self.name);

        if !wait {
            return Ok(());
        }

        let failure = match ready_rx.recv_timeout(self.patience) {
            Ok(Ok(())) => None,
            Ok(Err(reason)) => Some(DriverError::SetupCrashed {
                name: self.name.clone(),
                reason,
            }),
            Err(RecvTimeoutError::Timeout) => {
                abort.store(true, Ordering::SeqCst);
                self.signals.clear();
                Some(if self.signals.crashed() {
                    DriverError::SetupCrashed {
                        name: self.name.clone(),
                        reason: "setup failed near the patience deadline".to_string(),
                    }
                } else {
                    DriverError::SetupTimeout {
                        name: self.name.clone(),
                        patience: self.patience,
                    }
                })
            },
            Err(RecvTimeoutError::Disconnected) => Some(DriverError::SetupCrashed {
                name: self.name.clone(),
                reason: "worker exited before reporting setup".to_string(),
            }),
        };

        match failure {
            None => {
                info!("'{}' successfully started", self.name);
                Ok(())
            },
            Some(err) => {
                if let Some(worker) = self.worker.take()
                    && let Err(worker) = worker.join_bounded(STOP_JOIN_ATTEMPTS, &self.signals)
                {
                    warn!("'{}' worker still busy after failed setup", self.name);
                    self.worker = Some(worker);
                }
                self.signals.starting.store(false, Ordering::SeqCst);
                error!("{}", err);
                Err(err)
            },
        }
    }

    /// 停止线程
    ///
    /// 清除信号请求任务退出；`wait` 为真时通过多次有界 join 等待工作线程结束，
    /// 全部超时返回 [`DriverError::StopTimeout`]（工作线程不会被强制终止）。
    pub fn stop(&mut self, wait: bool) -> Result<(), DriverError> {
        info!("Stop requested for '{}'", self.name);
        if !self.started() {
            info!("'{}' is not running; nothing to do", self.name);
            return self.reap();
        }
        self.signals.clear();
        info!("'{}' stopping", self.name);
        if wait && let Some(worker) = self.worker.take() {
            if let Err(worker) = worker.join_bounded(STOP_JOIN_ATTEMPTS, &self.signals) {
                self.worker = Some(worker);
                error!("'{}' did not stop in time", self.name);
                return Err(DriverError::StopTimeout {
                    name: self.name.clone(),
                    attempts: STOP_JOIN_ATTEMPTS,
                });
            }
        }
        info!("'{}' successfully stopped", self.name);
        Ok(())
    }

    /// 暂停（仅在 Running 时生效）
    pub fn pause(&self) {
        info!("Pause requested for '{}'", self.name);
        if self.running() {
            self.signals.paused.store(true, Ordering::SeqCst);
            info!("'{}' paused", self.name);
        } else {
            info!("'{}' is not running; nothing to do", self.name);
        }
    }

    /// 恢复（仅在 Paused 时生效）
    pub fn resume(&self) {
        info!("Resume requested for '{}'", self.name);
        if self.paused() {
            self.signals.paused.store(false, Ordering::SeqCst);
            info!("'{}' resumed", self.name);
        } else {
            info!("'{}' is not paused; nothing to do", self.name);
        }
    }

    /// 回收已经退出（或正在退出）的工作线程
    fn reap(&mut self) -> Result<(), DriverError> {
        if let Some(worker) = self.worker.take()
            && let Err(worker) = worker.join_bounded(STOP_JOIN_ATTEMPTS, &self.signals)
        {
            self.worker = Some(worker);
            return Err(DriverError::StopTimeout {
                name: self.name.clone(),
                attempts: STOP_JOIN_ATTEMPTS,
            });
        }
        Ok(())
    }
}

impl<T: Task> Drop for ControlledThread<T> {
    fn drop(&mut self) {
        self.signals.clear();
        if let Some(worker) = self.worker.take()
            && worker.join_bounded(DROP_JOIN_ATTEMPTS, &self.signals).is_err()
        {
            error!("'{}' worker did not exit within the drop timeout", self.name);
        }
    }
}

fn worker_main<T: Task>(
    name: &str,
    patience: Duration,
    task: &Mutex<T>,
    signals: &Signals,
    abort: &AtomicBool,
    ready: Sender<SetupOutcome>,
) {
    // 上一轮超时未退出的工作线程可能仍持有任务
    let Some(mut task) = task.try_lock_for(patience) else {
        signals.crash();
        let _ = ready.send(Err("task is still held by a previous worker".to_string()));
        return;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| task.setup())) {
        Ok(Ok(())) => {},
        Ok(Err(e)) => {
            signals.crash();
            error!("Setup failed for '{}': {}", name, e);
            let _ = ready.send(Err(e.to_string()));
            return;
        },
        Err(payload) => {
            signals.crash();
            let reason = panic_message(payload.as_ref());
            error!("Setup panicked for '{}': {}", name, reason);
            let _ = ready.send(Err(reason));
            return;
        },
    }

    signals.paused.store(false, Ordering::SeqCst);
    signals.started.store(true, Ordering::SeqCst);
    signals.starting.store(false, Ordering::SeqCst);
    if abort.load(Ordering::SeqCst) {
        // 调用方已放弃等待
        signals.clear();
        task.teardown();
        return;
    }
    let _ = ready.send(Ok(()));

    match panic::catch_unwind(AssertUnwindSafe(|| task.run(signals))) {
        Ok(Ok(())) => {
            signals.clear();
            task.teardown();
            info!("'{}' finished", name);
        },
        Ok(Err(e)) => {
            signals.crash();
            error!("'{}' crashed: {}", name, e);
        },
        Err(payload) => {
            signals.crash();
            error!("'{}' panicked: {}", name, panic_message(payload.as_ref()));
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

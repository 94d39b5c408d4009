//! 周期循环和同步循环的运行场景测试
//!
//! 这些测试依赖真实时间，时长控制在几秒以内。

use roboglia_bus::{Bus, MockBus};
use roboglia_driver::{
    ControlledThread, Device, DriverError, LoopConfig, PeriodicLoop, PeriodicWork, Signals,
    SyncGroup, SyncKind, SyncLoop, Task, ThreadState, periodic,
};
use roboglia_protocol::RegisterSpec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// 每次执行固定耗时的工作单元
struct Overrun {
    busy: Duration,
}

impl PeriodicWork for Overrun {
    fn atomic(&mut self) {
        spin_sleep_for(self.busy);
    }
}

fn spin_sleep_for(d: Duration) {
    let end = Instant::now() + d;
    while Instant::now() < end {
        thread::sleep(Duration::from_micros(500));
    }
}

/// 10 Hz 循环每次执行 105ms：一个评估窗口后修正系数下降
#[test]
fn test_overrun_shrinks_correction() {
    init_tracing();
    let config = LoopConfig::new(10.0).with_throttle(0.02).with_review(1.0);
    let mut lp = PeriodicLoop::new(
        "overrun",
        config,
        Overrun {
            busy: Duration::from_millis(105),
        },
    )
    .unwrap();

    lp.start(true).unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    while lp.metrics().reviews == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    lp.stop(true).unwrap();

    let metrics = lp.metrics();
    assert!(metrics.reviews >= 1, "no review happened: {:?}", metrics);
    assert!(metrics.correction < 1.0, "correction = {}", metrics.correction);
    assert!(metrics.actual_frequency < 10.0);
}

/// 实际频率低于告警阈值时计入告警
#[test]
fn test_warning_counted_below_threshold() {
    // 阈值 99%：105ms 一次约为 95%
    let config = LoopConfig::new(10.0)
        .with_throttle(0.02)
        .with_warning(99.0);
    let mut lp = PeriodicLoop::new(
        "slow",
        config,
        Overrun {
            busy: Duration::from_millis(105),
        },
    )
    .unwrap();

    lp.start(true).unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    while lp.metrics().reviews == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    lp.stop(true).unwrap();
    assert!(lp.metrics().warnings >= 1);
}

/// setup 出错：start 在耐心窗口内报告崩溃，状态不是 Running
#[test]
fn test_setup_failure_reported_within_patience() {
    struct BrokenSetup;
    impl Task for BrokenSetup {
        fn setup(&mut self) -> Result<(), DriverError> {
            Err(DriverError::Config("bus unreachable".to_string()))
        }
        fn run(&mut self, _signals: &Signals) -> Result<(), DriverError> {
            Ok(())
        }
    }

    let mut thread = ControlledThread::new("broken", BrokenSetup).with_patience(Duration::from_secs(1));
    let begin = Instant::now();
    let err = thread.start(true).unwrap_err();
    assert!(begin.elapsed() < Duration::from_millis(1100));
    match err {
        DriverError::SetupCrashed { name, reason } => {
            assert_eq!(name, "broken");
            assert!(reason.contains("bus unreachable"));
        },
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(thread.stopped());
    assert!(!thread.running());
}

/// setup panic 同样报告为崩溃
#[test]
fn test_setup_panic_reported() {
    struct PanickingSetup;
    impl PeriodicWork for PanickingSetup {
        fn setup(&mut self) -> Result<(), DriverError> {
            panic!("device table missing");
        }
        fn atomic(&mut self) {}
    }

    let mut lp = PeriodicLoop::new("panic", LoopConfig::new(20.0), PanickingSetup).unwrap();
    let err = lp.start(true).unwrap_err();
    assert!(matches!(err, DriverError::SetupCrashed { ref reason, .. } if reason.contains("device table")));
    assert!(lp.stopped());
    assert_eq!(lp.state(), ThreadState::Crashed);
}

/// 暂停期间的统计被丢弃，不与恢复后的统计混合
#[test]
fn test_pause_discards_statistics() {
    let ticks = Arc::new(AtomicU64::new(0));
    let counter = ticks.clone();
    let mut lp = PeriodicLoop::new(
        "pausable",
        LoopConfig::new(50.0).with_review(0.2),
        periodic::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    )
    .unwrap();

    lp.start(true).unwrap();
    thread::sleep(Duration::from_millis(100));
    lp.pause();
    thread::sleep(Duration::from_millis(30));
    let frozen = ticks.load(Ordering::SeqCst);
    let reviews_at_pause = lp.metrics().reviews;
    thread::sleep(Duration::from_millis(400));
    assert_eq!(ticks.load(Ordering::SeqCst), frozen);
    assert_eq!(lp.metrics().reviews, reviews_at_pause);

    lp.resume();
    let deadline = Instant::now() + Duration::from_secs(2);
    while lp.metrics().reviews == reviews_at_pause && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    lp.stop(true).unwrap();
    // 暂停的 400ms 若计入窗口，实际频率会远低于 50 Hz
    let actual = lp.metrics().actual_frequency;
    assert!(actual > 30.0, "actual frequency {} blended the pause", actual);
}

fn shared_bus_devices(bus: &Arc<MockBus>, ids: &[u8]) -> Vec<Arc<Device>> {
    let specs = vec![
        RegisterSpec::new("goal_position", 30).size(2).writable(),
        RegisterSpec::new("present_position", 36).size(2),
    ];
    ids.iter()
        .map(|&id| {
            bus.add_device(id);
            Device::new(format!("d{:02}", id), id, bus.clone(), &specs).unwrap()
        })
        .collect()
}

/// 两个同步循环共享一条总线：任何时刻最多一个事务占用总线，竞争时跳过而不崩溃
#[test]
fn test_two_syncs_share_bus() {
    init_tracing();
    let bus = Arc::new(MockBus::new("shared"));
    let devices = shared_bus_devices(&bus, &[1, 2, 3]);
    bus.open().unwrap();
    bus.set_latency(Duration::from_millis(3));

    let read = SyncGroup::new("read", devices.clone(), vec!["present_position".into()]).unwrap();
    let write = SyncGroup::new("write", devices, vec!["goal_position".into()]).unwrap();
    let mut reader = SyncLoop::new(SyncKind::GroupRead, read, LoopConfig::new(200.0)).unwrap();
    let mut writer = SyncLoop::new(SyncKind::GroupWrite, write, LoopConfig::new(200.0)).unwrap();

    reader.start(true).unwrap();
    writer.start(true).unwrap();
    thread::sleep(Duration::from_millis(700));
    writer.stop(true).unwrap();
    reader.stop(true).unwrap();

    assert_eq!(bus.max_concurrent(), 1);
    assert_eq!(bus.ungated_transactions(), 0);
    assert!(!reader.crashed() && !writer.crashed());

    let r = reader.metrics();
    let w = writer.metrics();
    assert!(r.transactions > 0 && w.transactions > 0);
    assert!(r.skipped + w.skipped > 0, "no contention observed: {:?} {:?}", r, w);
    assert_eq!(r.errors + w.errors, 0);
}

/// 同步循环运行时，直接读写通过有界等待与循环共存
#[test]
fn test_direct_access_coexists_with_sync() {
    let bus = Arc::new(MockBus::new("shared"));
    let devices = shared_bus_devices(&bus, &[1]);
    bus.open().unwrap();
    bus.set_latency(Duration::from_millis(1));

    let group = SyncGroup::new("read", devices.clone(), vec!["present_position".into()]).unwrap();
    let mut reader = SyncLoop::new(SyncKind::GroupRead, group, LoopConfig::new(200.0)).unwrap();
    reader.start(true).unwrap();

    let goal = devices[0].register("goal_position").unwrap();
    for i in 0..20u32 {
        goal.set_value(i * 10).unwrap();
    }
    reader.stop(true).unwrap();

    assert_eq!(bus.peek(1, 30, 2), Some(190));
    assert_eq!(bus.max_concurrent(), 1);
    assert_eq!(bus.ungated_transactions(), 0);
}

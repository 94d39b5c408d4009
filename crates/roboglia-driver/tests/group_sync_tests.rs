//! 同步循环对模拟总线的端到端测试

use roboglia_bus::{Bus, MockBus};
use roboglia_driver::{Device, LoopConfig, SyncGroup, SyncKind, SyncLoop};
use rand::Rng;
use roboglia_protocol::RegisterSpec;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn servo_specs() -> Vec<RegisterSpec> {
    vec![
        RegisterSpec::new("torque_enable", 24).boolean().writable(),
        RegisterSpec::new("goal_position", 30).size(2).writable().range(0, 1023),
        RegisterSpec::new("moving_speed", 32).size(2).writable(),
        RegisterSpec::new("present_position", 36).size(2),
        RegisterSpec::new("present_speed", 38).size(2),
    ]
}

fn make_devices(bus: &Arc<MockBus>, ids: &[u8], specs: &[RegisterSpec]) -> Vec<Arc<Device>> {
    ids.iter()
        .map(|&id| {
            bus.add_device(id);
            Device::new(format!("d{:02}", id), id, bus.clone(), specs).unwrap()
        })
        .collect()
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// 运行到条件满足或超时
fn run_until(sync: &mut SyncLoop, mut done: impl FnMut(&SyncLoop) -> bool) {
    sync.start(true).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done(sync) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    sync.stop(true).unwrap();
}

/// 组读把每个设备的数据写入各自的寄存器，互不串扰
#[test]
fn test_group_read_isolates_devices() {
    let bus = Arc::new(MockBus::new("mock"));
    let ids = [1u8, 2, 3, 4, 5, 6];
    let devices = make_devices(&bus, &ids, &servo_specs());
    let mut rng = rand::thread_rng();
    let mut expected = HashMap::new();
    for &id in &ids {
        let position = rng.gen_range(0..1024u32);
        let speed = rng.gen_range(0..1024u32);
        bus.poke(id, 36, 2, position);
        bus.poke(id, 38, 2, speed);
        expected.insert(id, (position, speed));
    }
    bus.open().unwrap();

    let group = SyncGroup::new(
        "read",
        devices.clone(),
        names(&["present_position", "present_speed"]),
    )
    .unwrap();
    let mut sync = SyncLoop::new(SyncKind::GroupRead, group, LoopConfig::new(100.0)).unwrap();
    run_until(&mut sync, |s| s.metrics().ticks >= 3);

    for device in &devices {
        let (position, speed) = expected[&device.id()];
        assert_eq!(device.register("present_position").unwrap().internal(), position);
        assert_eq!(device.register("present_speed").unwrap().internal(), speed);
    }
    let metrics = sync.metrics();
    assert_eq!(metrics.errors, 0);
    assert_eq!(metrics.missing, 0);
}

/// 被动同步寄存器的 get_value 返回缓存，不触发总线事务
#[test]
fn test_sync_registers_served_from_cache() {
    let bus = Arc::new(MockBus::new("mock"));
    let devices = make_devices(&bus, &[1], &servo_specs());
    bus.poke(1, 36, 2, 512);
    bus.open().unwrap();

    let group = SyncGroup::new("read", devices.clone(), names(&["present_position"])).unwrap();
    let mut sync = SyncLoop::new(SyncKind::GroupRead, group, LoopConfig::new(100.0)).unwrap();
    run_until(&mut sync, |s| s.metrics().transactions >= 1);

    let before = bus.transactions();
    let reg = devices[0].register("present_position").unwrap();
    assert!(reg.is_sync());
    assert_eq!(reg.get_value().unwrap().as_i64(), 512);
    assert_eq!(bus.transactions(), before);
}

/// 组写把寄存器缓存写到每个设备
#[test]
fn test_group_write_pushes_cached_values() {
    let bus = Arc::new(MockBus::new("mock"));
    let devices = make_devices(&bus, &[1, 2, 3], &servo_specs());
    bus.open().unwrap();

    let group = SyncGroup::new(
        "write",
        devices.clone(),
        names(&["goal_position", "moving_speed"]),
    )
    .unwrap();
    for (i, device) in devices.iter().enumerate() {
        // 被动同步后 set_value 只更新缓存
        device.register("goal_position").unwrap().set_value(200 + i as i64).unwrap();
        device.register("moving_speed").unwrap().set_value(50 + i as i64).unwrap();
    }
    assert_eq!(bus.peek(1, 30, 2), Some(0));

    let mut sync = SyncLoop::new(SyncKind::GroupWrite, group, LoopConfig::new(100.0)).unwrap();
    run_until(&mut sync, |s| s.metrics().transactions >= 2);

    for (i, device) in devices.iter().enumerate() {
        let id = device.id();
        assert_eq!(bus.peek(id, 30, 2), Some(200 + i as u32));
        assert_eq!(bus.peek(id, 32, 2), Some(50 + i as u32));
    }
}

/// 设备打开时读回硬件上的目标位置，写循环启动后不会把 schema 默认值发出去
#[test]
fn test_write_loop_after_open_keeps_hardware_values() {
    let bus = Arc::new(MockBus::new("mock"));
    let devices = make_devices(&bus, &[1, 2], &servo_specs());
    bus.poke(1, 30, 2, 700);
    bus.poke(2, 30, 2, 333);
    bus.open().unwrap();

    let group = SyncGroup::new("write", devices.clone(), names(&["goal_position"])).unwrap();
    for device in &devices {
        device.open().unwrap();
    }
    assert_eq!(devices[0].register("goal_position").unwrap().internal(), 700);

    let mut sync = SyncLoop::new(SyncKind::GroupWrite, group, LoopConfig::new(100.0)).unwrap();
    run_until(&mut sync, |s| s.metrics().transactions >= 3);

    assert_eq!(bus.peek(1, 30, 2), Some(700));
    assert_eq!(bus.peek(2, 30, 2), Some(333));
}

/// 批量读允许各设备的寄存器地址不同
#[test]
fn test_bulk_read_with_different_addresses() {
    let bus = Arc::new(MockBus::new("mock"));
    let mut devices = make_devices(&bus, &[1], &servo_specs());
    // 另一种型号：present_position 在 132，4 字节
    let other = vec![RegisterSpec::new("present_position", 132).size(4)];
    devices.extend(make_devices(&bus, &[2], &other));
    bus.poke(1, 36, 2, 300);
    bus.poke(2, 132, 4, 70_000);
    bus.open().unwrap();

    let group = SyncGroup::new("bulk", devices.clone(), names(&["present_position"])).unwrap();
    let mut sync = SyncLoop::new(SyncKind::BulkRead, group, LoopConfig::new(100.0)).unwrap();
    run_until(&mut sync, |s| s.metrics().transactions >= 1);

    assert_eq!(devices[0].register("present_position").unwrap().internal(), 300);
    assert_eq!(devices[1].register("present_position").unwrap().internal(), 70_000);
}

/// 批量写按各设备自己的地址写入
#[test]
fn test_bulk_write_with_different_addresses() {
    let bus = Arc::new(MockBus::new("mock"));
    let mut devices = make_devices(&bus, &[1], &servo_specs());
    let other = vec![RegisterSpec::new("goal_position", 116).size(4).writable()];
    devices.extend(make_devices(&bus, &[2], &other));
    bus.open().unwrap();

    let group = SyncGroup::new("bulk", devices.clone(), names(&["goal_position"])).unwrap();
    devices[0].register("goal_position").unwrap().set_internal(400);
    devices[1].register("goal_position").unwrap().set_internal(90_000);
    let mut sync = SyncLoop::new(SyncKind::BulkWrite, group, LoopConfig::new(100.0)).unwrap();
    run_until(&mut sync, |s| s.metrics().transactions >= 1);

    assert_eq!(bus.peek(1, 30, 2), Some(400));
    assert_eq!(bus.peek(2, 116, 4), Some(90_000));
}

/// 块读：每个设备一次读出覆盖全部寄存器的连续地址块
#[test]
fn test_range_read_covers_registers() {
    let bus = Arc::new(MockBus::new("mock"));
    let devices = make_devices(&bus, &[1, 2], &servo_specs());
    for &id in &[1u8, 2] {
        bus.poke(id, 24, 1, 1);
        bus.poke(id, 36, 2, 600 + id as u32);
    }
    bus.open().unwrap();

    let group = SyncGroup::new(
        "range",
        devices.clone(),
        names(&["torque_enable", "present_position"]),
    )
    .unwrap();
    let mut sync = SyncLoop::new(SyncKind::RangeRead, group, LoopConfig::new(100.0)).unwrap();
    run_until(&mut sync, |s| s.metrics().transactions >= 2);

    for device in &devices {
        assert_eq!(device.register("torque_enable").unwrap().internal(), 1);
        assert_eq!(
            device.register("present_position").unwrap().internal(),
            600 + device.id() as u32
        );
    }
    // 每个 tick 每个设备一个事务
    let metrics = sync.metrics();
    assert_eq!(metrics.transactions % 2, 0);
}

/// 块写：寄存器之间的空隙写 0
#[test]
fn test_range_write_zero_fills_gaps() {
    let bus = Arc::new(MockBus::new("mock"));
    let devices = make_devices(&bus, &[1], &servo_specs());
    // 空隙中预置非零字节
    bus.poke(1, 26, 2, 0xBEEF);
    bus.open().unwrap();

    let group = SyncGroup::new(
        "range",
        devices.clone(),
        names(&["torque_enable", "goal_position"]),
    )
    .unwrap();
    devices[0].register("torque_enable").unwrap().set_internal(1);
    devices[0].register("goal_position").unwrap().set_internal(777);
    let mut sync = SyncLoop::new(SyncKind::RangeWrite, group, LoopConfig::new(100.0)).unwrap();
    run_until(&mut sync, |s| s.metrics().transactions >= 1);

    assert_eq!(bus.peek(1, 24, 1), Some(1));
    assert_eq!(bus.peek(1, 30, 2), Some(777));
    assert_eq!(bus.peek(1, 26, 2), Some(0));
}

/// 不回应的设备计入 missing，其他设备照常更新
#[test]
fn test_silent_device_counted_missing() {
    let bus = Arc::new(MockBus::new("mock"));
    let devices = make_devices(&bus, &[1, 2], &servo_specs());
    bus.poke(1, 36, 2, 11);
    bus.poke(2, 36, 2, 22);
    bus.set_silent(2, true);
    bus.open().unwrap();

    let group = SyncGroup::new("read", devices.clone(), names(&["present_position"])).unwrap();
    let mut sync = SyncLoop::new(SyncKind::GroupRead, group, LoopConfig::new(100.0)).unwrap();
    run_until(&mut sync, |s| s.metrics().missing >= 2);

    assert_eq!(devices[0].register("present_position").unwrap().internal(), 11);
    assert_eq!(devices[1].register("present_position").unwrap().internal(), 0);
    assert!(sync.metrics().missing >= 2);
    assert!(!sync.crashed());
}

/// 总线故障只计入错误，循环继续运行并在恢复后更新
#[test]
fn test_bus_failure_does_not_stop_loop() {
    let bus = Arc::new(MockBus::new("mock"));
    let devices = make_devices(&bus, &[1], &servo_specs());
    bus.poke(1, 36, 2, 42);
    bus.open().unwrap();
    bus.set_fail(true);

    let group = SyncGroup::new("read", devices.clone(), names(&["present_position"])).unwrap();
    let mut sync = SyncLoop::new(SyncKind::GroupRead, group, LoopConfig::new(100.0)).unwrap();
    sync.start(true).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while sync.metrics().errors < 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(sync.running());
    assert_eq!(devices[0].register("present_position").unwrap().internal(), 0);

    bus.set_fail(false);
    let deadline = Instant::now() + Duration::from_secs(2);
    while devices[0].register("present_position").unwrap().internal() != 42
        && Instant::now() < deadline
    {
        thread::sleep(Duration::from_millis(5));
    }
    sync.stop(true).unwrap();

    assert_eq!(devices[0].register("present_position").unwrap().internal(), 42);
    assert!(sync.metrics().errors >= 3);
    assert!(!sync.crashed());
}

/// 外部持有仲裁门时循环跳过事务而不阻塞
#[test]
fn test_held_gate_skips_ticks() {
    let bus = Arc::new(MockBus::new("mock"));
    let devices = make_devices(&bus, &[1], &servo_specs());
    bus.open().unwrap();

    let group = SyncGroup::new("read", devices, names(&["present_position"])).unwrap();
    let mut sync = SyncLoop::new(SyncKind::GroupRead, group, LoopConfig::new(100.0)).unwrap();

    assert!(bus.try_acquire());
    run_until(&mut sync, |s| s.metrics().skipped >= 3);
    bus.release();

    let metrics = sync.metrics();
    assert!(metrics.skipped >= 3);
    assert_eq!(metrics.transactions, 0);
    assert_eq!(bus.transactions(), 0);
}

//! MockBus 集成测试：批量事务、故障注入和仲裁审计

use roboglia_bus::{
    Bus, BusError, BulkRead, BulkWrite, CommStatus, GroupOp, MockBus, SyncRead, SyncWrite,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn open_bus(ids: &[u8]) -> MockBus {
    let bus = MockBus::new("mock");
    for id in ids {
        bus.add_device(*id);
    }
    bus.open().unwrap();
    bus
}

#[test]
fn test_closed_bus_rejects_io() {
    let bus = MockBus::new("mock");
    bus.add_device(1);
    assert!(matches!(bus.read(1, 0, 1), Err(BusError::NotOpen(_))));
    bus.open().unwrap();
    assert!(bus.is_open());
    bus.close().unwrap();
    assert!(!bus.is_open());
}

#[test]
fn test_single_register_io() {
    let bus = open_bus(&[1]);
    bus.write(1, 30, 2, 0x0234).unwrap();
    assert_eq!(bus.read(1, 30, 2).unwrap(), 0x0234);
    assert_eq!(bus.peek(1, 30, 1), Some(0x34));
    assert!(matches!(
        bus.read(9, 30, 2),
        Err(BusError::Communication {
            transport: CommStatus::RxTimeout,
            ..
        })
    ));
}

/// 测试批量读取的每个设备值互不串扰
#[test]
fn test_group_read_attribution() {
    let bus = open_bus(&[1, 2, 3]);
    bus.poke(1, 36, 2, 100);
    bus.poke(2, 36, 2, 200);
    bus.poke(3, 36, 2, 300);

    let group = bus.as_group().unwrap();
    let mut tx = SyncRead::new(36, 2);
    for id in [1, 2, 3] {
        tx.add_param(id).unwrap();
    }
    let data = group.sync_read(&tx).unwrap();
    assert_eq!(data.get_data(1, 36, 2), Some(100));
    assert_eq!(data.get_data(2, 36, 2), Some(200));
    assert_eq!(data.get_data(3, 36, 2), Some(300));

    bus.set_silent(2, true);
    let data = group.sync_read(&tx).unwrap();
    assert!(!data.is_available(2, 36, 2));
    assert_eq!(data.len(), 2);
}

#[test]
fn test_group_writes() {
    let bus = open_bus(&[1, 2]);
    let group = bus.as_group().unwrap();

    let mut tx = SyncWrite::new(30, 2);
    tx.add_param(1, 512).unwrap();
    tx.add_param(2, 700).unwrap();
    group.sync_write(&tx).unwrap();
    assert_eq!(bus.peek(1, 30, 2), Some(512));
    assert_eq!(bus.peek(2, 30, 2), Some(700));

    let mut tx = BulkWrite::new();
    tx.add_param(1, 24, 1, 1).unwrap();
    tx.add_param(2, 64, 1, 1).unwrap();
    group.bulk_write(&tx).unwrap();
    assert_eq!(bus.peek(1, 24, 1), Some(1));
    assert_eq!(bus.peek(2, 64, 1), Some(1));

    let mut tx = BulkRead::new();
    tx.add_param(1, 24, 1).unwrap();
    tx.add_param(2, 64, 1).unwrap();
    let data = group.bulk_read(&tx).unwrap();
    assert_eq!(data.get_data(1, 24, 1), Some(1));
    assert_eq!(data.get_data(2, 64, 1), Some(1));
}

#[test]
fn test_failure_injection_and_unsupported() {
    let bus = open_bus(&[1]);
    bus.set_fail(true);
    assert!(matches!(
        bus.read(1, 0, 1),
        Err(BusError::Communication {
            transport: CommStatus::TxFail,
            ..
        })
    ));
    bus.set_fail(false);
    assert!(bus.read(1, 0, 1).is_ok());

    bus.set_unsupported(GroupOp::SyncRead);
    let group = bus.as_group().unwrap();
    assert!(!group.supports(GroupOp::SyncRead));
    assert!(matches!(
        group.sync_read(&SyncRead::new(0, 1)),
        Err(BusError::Unsupported { .. })
    ));
}

#[test]
fn test_block_io() {
    let bus = open_bus(&[5]);
    let block = bus.as_block().unwrap();
    block.write_block(5, 10, &[1, 2, 3, 4]).unwrap();
    assert_eq!(block.read_block(5, 10, 4).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(bus.peek(5, 10, 2), Some(0x0201));
}

/// 测试审计：只要都通过仲裁门，同时在线的事务最多一个
#[test]
fn test_gated_transactions_never_overlap() {
    let bus = Arc::new(open_bus(&[1]));
    bus.set_latency(Duration::from_millis(1));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let bus = bus.clone();
            thread::spawn(move || {
                let mut done = 0;
                while done < 10 {
                    if let Some(_guard) = bus.gate().try_lock() {
                        bus.read(1, 0, 1).unwrap();
                        done += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(bus.max_concurrent(), 1);
    assert_eq!(bus.ungated_transactions(), 0);
    assert_eq!(bus.transactions(), 30);
}

#[test]
fn test_ungated_transactions_are_audited() {
    let bus = open_bus(&[1]);
    bus.read(1, 0, 1).unwrap();
    assert_eq!(bus.ungated_transactions(), 1);
}

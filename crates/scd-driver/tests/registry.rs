//! Registry lifecycle, timing overrides and concurrency

use scd_driver::{
    Direction, EngineConfig, Protocol, Registry, ScdError, SimDevice, SimulatedScd, SmbusData,
    SmbusError, TimingParams,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const BASE_A: u32 = 0x8000;
const BASE_B: u32 = 0x8080;

fn sim() -> Arc<SimulatedScd> {
    let sim = Arc::new(SimulatedScd::new(0x1_0000));
    sim.add_master(BASE_A, 1);
    sim.add_master(BASE_B, 2);
    for base in [BASE_A, BASE_B] {
        for bus in 0..4 {
            sim.add_device(base, bus, 0x50, SimDevice::new().with_bytes(0, &[bus; 16]));
        }
    }
    sim
}

fn registry(sim: &Arc<SimulatedScd>) -> Registry {
    let registry = Registry::new(EngineConfig::without_delays());
    registry
        .add_context("ctx", sim.clone())
        .expect("add context");
    registry
}

#[test]
fn test_add_master_numbers_and_names_buses() {
    let sim = sim();
    let registry = registry(&sim);

    let a = registry.add_master("ctx", BASE_A, 1, 4).expect("master a");
    let b = registry.add_master("ctx", BASE_B, 2, 3).expect("master b");
    assert!(!a.fast_block_read);
    assert!(b.fast_block_read);
    assert_eq!(b.version, 2);
    assert_eq!(a.max_retries, 3);

    let buses = registry.buses();
    assert_eq!(buses.len(), 7);
    assert_eq!(
        buses.iter().map(|b| b.number()).collect::<Vec<_>>(),
        (0..7).collect::<Vec<_>>()
    );
    assert_eq!(buses[2].name(), "SCD ctx SMBus master 1 bus 2");
    assert_eq!(buses[4].name(), "SCD ctx SMBus master 2 bus 0");
    assert_eq!(buses[4].id(), 0);

    // registration resets each master once
    assert_eq!(sim.stats(BASE_A).resets, 1);
    assert_eq!(sim.stats(BASE_B).resets, 1);
}

#[test]
fn test_duplicates_are_rejected() {
    let sim = sim();
    let registry = registry(&sim);

    registry.add_master("ctx", BASE_A, 1, 2).expect("first");
    assert!(matches!(
        registry.add_master("ctx", BASE_B, 1, 2),
        Err(ScdError::AlreadyExists { .. })
    ));
    assert!(matches!(
        registry.add_context("ctx", sim.clone()),
        Err(ScdError::AlreadyExists { .. })
    ));
    // the rejected master left nothing behind
    assert_eq!(registry.buses().len(), 2);
    assert_eq!(sim.stats(BASE_B).resets, 0);
}

#[test]
fn test_invalid_master_arguments() {
    let sim = sim();
    let registry = registry(&sim);

    for count in [0, 17] {
        assert!(matches!(
            registry.add_master("ctx", BASE_A, 1, count),
            Err(ScdError::InvalidArgument { .. })
        ));
    }
    assert!(registry.add_master("ctx", BASE_A, 1, 16).is_ok());
    assert!(matches!(
        registry.add_master("ctx", 0x8002, 2, 1),
        Err(ScdError::InvalidArgument { .. })
    ));
    assert!(matches!(
        registry.add_master("ctx", 0xFFF0, 3, 1),
        Err(ScdError::InvalidArgument { .. })
    ));
    assert!(matches!(
        registry.add_master("nope", BASE_B, 4, 1),
        Err(ScdError::NotFound { .. })
    ));
}

#[test]
fn test_failed_probe_rolls_back() {
    let sim = sim();
    let registry = registry(&sim);

    sim.fail_register(Some(BASE_A + 0x20));
    let err = registry
        .add_master("ctx", BASE_A, 1, 4)
        .expect_err("reset fails");
    assert!(matches!(
        err,
        ScdError::Smbus {
            source: SmbusError::Register { .. }
        }
    ));
    assert!(registry.buses().is_empty());
    assert!(matches!(
        registry.master_info("ctx", 1),
        Err(ScdError::NotFound { .. })
    ));

    sim.fail_register(None);
    registry.add_master("ctx", BASE_A, 1, 4).expect("retry");
    // bus numbers are never reused
    assert_eq!(registry.buses()[0].number(), 4);
}

#[test]
fn test_remove_master() {
    let sim = sim();
    let registry = registry(&sim);
    registry.add_master("ctx", BASE_A, 1, 2).expect("master a");
    registry.add_master("ctx", BASE_B, 2, 2).expect("master b");

    let stale = registry.bus(0).expect("bus 0");
    registry
        .set_timing_override(0, 0x50, TimingParams { t: 3, ..TimingParams::DEFAULT })
        .expect("override");
    let resets = sim.stats(BASE_A).resets;

    registry.remove_master("ctx", 1).expect("remove");

    assert!(matches!(registry.bus(0), Err(ScdError::NotFound { .. })));
    assert!(matches!(registry.bus(1), Err(ScdError::NotFound { .. })));
    assert!(registry.bus(2).is_ok());
    assert_eq!(sim.stats(BASE_A).resets, resets + 1);
    assert!(stale.timing_overrides().is_empty());

    let err = stale.read_byte_data(0x50, 0).expect_err("removed");
    assert_eq!(*err.kind(), SmbusError::BusRemoved);

    assert!(matches!(
        registry.remove_master("ctx", 1),
        Err(ScdError::NotFound { .. })
    ));
    assert!(matches!(
        registry.submit(0, 0x50, Direction::Read, 0, Protocol::ByteData, SmbusData::None),
        Err(ScdError::NotFound { .. })
    ));

    // the id is free again
    registry.add_master("ctx", BASE_A, 1, 2).expect("re-add");
    assert_eq!(registry.buses().len(), 4);
}

#[test]
fn test_remove_context() {
    let sim = sim();
    let registry = registry(&sim);
    registry.add_master("ctx", BASE_A, 1, 2).expect("master a");
    registry.add_master("ctx", BASE_B, 2, 2).expect("master b");

    registry.remove_context("ctx").expect("remove");
    assert!(registry.buses().is_empty());
    assert_eq!(sim.stats(BASE_A).resets, 2);
    assert_eq!(sim.stats(BASE_B).resets, 2);
    assert!(matches!(
        registry.remove_context("ctx"),
        Err(ScdError::NotFound { .. })
    ));
    assert!(matches!(
        registry.add_master("ctx", BASE_A, 1, 2),
        Err(ScdError::NotFound { .. })
    ));
}

#[test]
fn test_timing_override_lookup() {
    let sim = sim();
    let registry = registry(&sim);
    registry.add_master("ctx", BASE_A, 1, 4).expect("master");

    let slow = TimingParams {
        t: 3,
        datw: 0,
        datr: 1,
        ed: 1,
    };
    registry.set_timing_override(2, 0x48, slow).expect("set");
    assert_eq!(registry.timing_params(2, 0x48).expect("get"), slow);
    assert_eq!(
        registry.timing_params(2, 0x49).expect("get"),
        TimingParams::DEFAULT
    );
    assert_eq!(
        registry.timing_params(1, 0x48).expect("get"),
        TimingParams::DEFAULT
    );

    // update in place
    let slower = TimingParams { t: 2, ..slow };
    registry.set_timing_override(2, 0x48, slower).expect("set");
    assert_eq!(registry.timing_params(2, 0x48).expect("get"), slower);
    assert_eq!(registry.bus(2).expect("bus").timing_overrides().len(), 1);

    assert!(matches!(
        registry.set_timing_override(9, 0x48, slow),
        Err(ScdError::NotFound { .. })
    ));
}

#[test]
fn test_apply_tweaks() {
    let sim = sim();
    let registry = registry(&sim);
    registry.add_master("ctx", BASE_A, 1, 4).expect("master");

    let applied = registry
        .apply_tweaks("0x1 0x48 0x3 0x1 0x2 0x1\n\n2 0x50 0 3 3 0\n")
        .expect("tweaks");
    assert_eq!(applied, 2);
    assert_eq!(
        registry.timing_params(1, 0x48).expect("get"),
        TimingParams {
            t: 3,
            datr: 1,
            datw: 2,
            ed: 1
        }
    );
    assert_eq!(registry.timing_params(2, 0x50).expect("get").t, 0);

    // unknown bus on line 2: nothing from the batch is applied
    match registry.apply_tweaks("3 0x20 1 1 1 1\n9 0x20 1 1 1 1") {
        Err(ScdError::InvalidConfig { line, .. }) => assert_eq!(line, 2),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(
        registry.timing_params(3, 0x20).expect("get"),
        TimingParams::DEFAULT
    );

    assert!(matches!(
        registry.apply_tweaks("1 0x48 3 1"),
        Err(ScdError::InvalidConfig { line: 1, .. })
    ));
}

#[test]
fn test_master_info_and_retries() {
    let sim = sim();
    let registry = registry(&sim);
    registry.add_master("ctx", BASE_B, 7, 2).expect("master");

    registry.set_max_retries("ctx", 7, 9).expect("set");
    let info = registry.master_info("ctx", 7).expect("info");
    assert_eq!(info.max_retries, 9);
    assert_eq!(info.base, BASE_B);
    assert_eq!(info.bus_count, 2);
    assert_eq!(info.parent, "ctx");
    assert!(matches!(
        registry.set_max_retries("ctx", 8, 1),
        Err(ScdError::NotFound { .. })
    ));
}

#[test]
fn test_submit() {
    let sim = sim();
    let registry = registry(&sim);
    registry.add_master("ctx", BASE_A, 1, 4).expect("master");

    let out = registry
        .submit(3, 0x50, Direction::Read, 0x04, Protocol::ByteData, SmbusData::None)
        .expect("read");
    assert_eq!(out, SmbusData::Byte(3));

    let out = registry
        .submit(3, 0x50, Direction::Write, 0x04, Protocol::WordData, SmbusData::Word(0x0102))
        .expect("write");
    assert_eq!(out, SmbusData::None);

    let err = registry
        .submit(3, 0x33, Direction::Read, 0x04, Protocol::ByteData, SmbusData::None)
        .expect_err("no device");
    assert!(matches!(
        err.smbus_kind(),
        Some(SmbusError::AckError { .. })
    ));
    assert!(matches!(err, ScdError::Transfer(_)));
}

#[test]
fn test_concurrent_transactions_are_serialized_per_master() {
    let sim = sim();
    let registry = Arc::new(registry(&sim));
    registry.add_master("ctx", BASE_A, 1, 4).expect("master a");
    registry.add_master("ctx", BASE_B, 2, 4).expect("master b");

    let handles: Vec<_> = registry
        .buses()
        .into_iter()
        .map(|bus| {
            thread::spawn(move || {
                let id = bus.id();
                for i in 0..50u8 {
                    let reg = 0x20 + (i % 8);
                    bus.write_byte_data(0x50, reg, i).expect("write");
                    assert_eq!(bus.read_byte_data(0x50, reg).expect("read"), i);
                    assert_eq!(bus.read_byte_data(0x50, 0).expect("id"), id);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().expect("worker");
    }

    // 4 buses × 50 × 3 transactions per master, no failure, no recovery
    for base in [BASE_A, BASE_B] {
        let stats = sim.stats(base);
        assert_eq!(stats.transactions, 4 * 50 * 3);
        assert_eq!(stats.resets, 1);
    }
}

#[test]
fn test_removal_while_busy() {
    let sim = sim();
    let registry = Arc::new(registry(&sim));
    registry.add_master("ctx", BASE_A, 1, 2).expect("master");

    let stop = Arc::new(AtomicBool::new(false));
    let workers: Vec<_> = registry
        .buses()
        .into_iter()
        .map(|bus| {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    if let Err(e) = bus.read_byte_data(0x50, 0) {
                        return Some(e.kind().clone());
                    }
                }
                None
            })
        })
        .collect();

    thread::sleep(std::time::Duration::from_millis(5));
    registry.remove_master("ctx", 1).expect("remove");
    stop.store(true, Ordering::Relaxed);

    for w in workers {
        if let Some(kind) = w.join().expect("worker") {
            assert_eq!(kind, SmbusError::BusRemoved);
        }
    }
    assert_eq!(sim.stats(BASE_A).resets, 2);
}

//! Transaction engine against the simulated bus-master
//!
//! Every test drives real `Bus` calls through the registry and inspects what
//! the simulated hardware saw.

use scd_driver::{
    Bus, Direction, EngineConfig, Fault, Message, Protocol, Registry, SimDevice, SimulatedScd,
    SmbusData, SmbusError, TimingParams, TransferError,
};
use std::sync::Arc;

const BASE: u32 = 0x8000;
const DEV: u16 = 0x50;

fn setup(version: u8) -> (Arc<SimulatedScd>, Registry, Arc<Bus>) {
    let sim = Arc::new(SimulatedScd::new(0x1_0000));
    sim.add_master(BASE, version);
    sim.add_device(
        BASE,
        0,
        DEV,
        SimDevice::new()
            .with_bytes(0x10, &[0xAB])
            .with_bytes(0x20, &[0x34, 0x12])
            .with_bytes(0x60, &[1, 2, 3, 4]),
    );

    let registry = Registry::new(EngineConfig::without_delays());
    registry
        .add_context("test", sim.clone())
        .expect("add context");
    registry
        .add_master("test", BASE, 0, 4)
        .expect("add master");
    let bus = registry.bus(0).expect("bus 0");
    sim.clear_log(BASE);
    (sim, registry, bus)
}

fn kind(err: &TransferError) -> &SmbusError {
    err.kind()
}

#[test]
fn test_byte_data_write_frames_three_cycles() {
    let (sim, _registry, bus) = setup(1);

    bus.write_byte_data(DEV, 0x10, 0x07).expect("write byte data");

    let log = sim.request_log(BASE);
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].ss, 3);
    assert_eq!(log[0].d, 0xA0);
    assert_eq!(log[1].d, 0x10);
    assert_eq!(log[2].d, 0x07);
    assert!(log[2].sp);
    assert!(!log[0].sp && !log[1].sp);

    let dev = sim.device(BASE, 0, DEV).expect("device");
    assert_eq!(dev.byte(0x10), 0x07);
    // only the registration reset
    assert_eq!(sim.stats(BASE).resets, 1);
}

#[test]
fn test_byte_and_word_reads() {
    let (_sim, _registry, bus) = setup(1);

    assert_eq!(bus.read_byte_data(DEV, 0x10).expect("byte"), 0xAB);
    assert_eq!(bus.read_word_data(DEV, 0x20).expect("word"), 0x1234);

    bus.write_word_data(DEV, 0x22, 0xBEEF).expect("write word");
    assert_eq!(bus.read_word_data(DEV, 0x22).expect("word"), 0xBEEF);
    assert_eq!(bus.read_byte_data(DEV, 0x22).expect("low byte"), 0xEF);
}

#[test]
fn test_send_receive_byte_and_quick() {
    let (sim, _registry, bus) = setup(1);

    bus.write_byte(DEV, 0x60).expect("send byte");
    assert_eq!(bus.read_byte(DEV).expect("receive byte"), 1);
    assert_eq!(bus.read_byte(DEV).expect("receive byte"), 2);

    sim.clear_log(BASE);
    bus.write_quick(DEV, Direction::Read).expect("quick");
    let log = sim.request_log(BASE);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].d, 0xA1);
}

#[test]
fn test_block_round_trip_generic_path() {
    let (sim, registry, bus) = setup(1);
    sim.add_device(BASE, 1, 0x51, SimDevice::new().with_block(0x30, &[]));
    let bus1 = registry.bus(1).expect("bus 1");

    let payload: Vec<u8> = (1..=8).collect();
    bus1.write_block_data(0x51, 0x30, &payload).expect("block write");
    assert_eq!(
        sim.device(BASE, 1, 0x51).expect("device").block(0x30),
        Some(&payload[..])
    );

    sim.clear_log(BASE);
    let back = bus1.read_block_data(0x51, 0x30).expect("block read");
    assert_eq!(back, payload);

    // size probe, then 4 + n cycles
    let log = sim.request_log(BASE);
    assert_eq!(log.len(), 4 + 4 + payload.len());
    assert!(log.iter().all(|c| !c.br));
    assert!(log.iter().all(|c| c.bs == 1));
    assert_eq!(bus.functionality().bits(), 0x0F7F_0001);
}

#[test]
fn test_block_round_trip_fast_path() {
    let (sim, _registry, bus) = setup(2);
    sim.add_device(BASE, 0, 0x52, SimDevice::new().with_block(0x30, &[]));

    let payload = [0xDE, 0xAD, 0xBE, 0xEF, 0x01];
    bus.write_block_data(0x52, 0x30, &payload).expect("block write");

    sim.clear_log(BASE);
    let before = sim.stats(BASE);
    let back = bus.read_block_data(0x52, 0x30).expect("block read");
    assert_eq!(back, payload);

    let log = sim.request_log(BASE);
    assert_eq!(log.len(), 3);
    assert!(log[2].br && log[2].st);
    assert!(log.iter().all(|c| !c.sp));

    let after = sim.stats(BASE);
    assert_eq!(after.transactions - before.transactions, 1);
    assert_eq!(after.resets, before.resets);
}

#[test]
fn test_empty_block() {
    let (sim, _registry, bus) = setup(2);
    sim.add_device(BASE, 0, 0x52, SimDevice::new().with_block(0x30, &[]));
    assert!(bus.read_block_data(0x52, 0x30).expect("empty block").is_empty());
}

#[test]
fn test_i2c_block_round_trip() {
    let (sim, _registry, bus) = setup(1);

    bus.write_i2c_block_data(DEV, 0x40, &[9, 8, 7]).expect("write");
    let dev = sim.device(BASE, 0, DEV).expect("device");
    assert_eq!((dev.byte(0x40), dev.byte(0x41), dev.byte(0x42)), (9, 8, 7));

    sim.clear_log(BASE);
    let back = bus.read_i2c_block_data(DEV, 0x40, 3).expect("read");
    assert_eq!(back, vec![9, 8, 7]);
    assert_eq!(sim.request_log(BASE).len(), 3 + 3);
}

#[test]
fn test_raw_transfer_read_and_write() {
    let (sim, _registry, bus) = setup(1);

    let mut buf = [0u8; 4];
    let mut msgs = [
        Message::Write {
            address: DEV,
            data: &[0x60],
        },
        Message::Read {
            address: DEV,
            buffer: &mut buf,
        },
    ];
    assert_eq!(bus.i2c_transfer(&mut msgs).expect("read transfer"), 2);
    assert_eq!(buf, [1, 2, 3, 4]);

    let mut msgs = [
        Message::Write {
            address: DEV,
            data: &[0x70],
        },
        Message::Write {
            address: DEV,
            data: &[5, 6, 7],
        },
    ];
    sim.clear_log(BASE);
    assert_eq!(bus.i2c_transfer(&mut msgs).expect("write transfer"), 2);
    assert_eq!(sim.request_log(BASE).len(), 2 + 3);
    let dev = sim.device(BASE, 0, DEV).expect("device");
    assert_eq!((dev.byte(0x70), dev.byte(0x71), dev.byte(0x72)), (5, 6, 7));
}

#[test]
fn test_raw_block_through_smbus_xfer() {
    let (_sim, _registry, bus) = setup(1);
    let out = bus
        .smbus_xfer(
            DEV,
            Direction::Read,
            0x60,
            Protocol::I2cBlockMsg,
            SmbusData::Block(vec![0; 2]),
        )
        .expect("raw block read");
    assert_eq!(out, SmbusData::Block(vec![1, 2]));
}

#[test]
fn test_raw_transfer_shape_errors_never_touch_hardware() {
    let (sim, _registry, bus) = setup(1);
    let before = sim.stats(BASE);

    let mut buf = [0u8; 2];
    let mut three = [
        Message::Write {
            address: DEV,
            data: &[0x60],
        },
        Message::Write {
            address: DEV,
            data: &[1],
        },
        Message::Read {
            address: DEV,
            buffer: &mut buf,
        },
    ];
    let err = bus.i2c_transfer(&mut three).expect_err("three messages");
    assert!(matches!(
        kind(&err),
        SmbusError::UnsupportedRequestShape { .. }
    ));

    let mut one = [Message::Write {
        address: DEV,
        data: &[0x60],
    }];
    let err = bus.i2c_transfer(&mut one).expect_err("one message");
    assert!(matches!(
        kind(&err),
        SmbusError::UnsupportedRequestShape { .. }
    ));

    let mut cmd = [0u8; 1];
    let mut read_first = [
        Message::Read {
            address: DEV,
            buffer: &mut cmd,
        },
        Message::Write {
            address: DEV,
            data: &[1],
        },
    ];
    let err = bus.i2c_transfer(&mut read_first).expect_err("read command");
    assert!(matches!(kind(&err), SmbusError::MalformedCommand { .. }));

    let mut long_command = [
        Message::Write {
            address: DEV,
            data: &[0x60, 0x61],
        },
        Message::Write {
            address: DEV,
            data: &[1],
        },
    ];
    let err = bus
        .i2c_transfer(&mut long_command)
        .expect_err("two-byte command");
    assert!(matches!(kind(&err), SmbusError::MalformedCommand { .. }));

    let big = [0u8; 62];
    let mut too_long = [
        Message::Write {
            address: DEV,
            data: &[0x60],
        },
        Message::Write {
            address: DEV,
            data: &big,
        },
    ];
    let err = bus.i2c_transfer(&mut too_long).expect_err("64 cycles");
    assert!(matches!(
        kind(&err),
        SmbusError::UnsupportedRequestShape { .. }
    ));

    let err = bus
        .write_block_data(DEV, 0x30, &[0; 33])
        .expect_err("33-byte block");
    assert!(matches!(
        kind(&err),
        SmbusError::UnsupportedRequestShape { .. }
    ));

    let after = sim.stats(BASE);
    assert_eq!(after.transactions, before.transactions);
    assert_eq!(after.resets, before.resets);
    assert!(sim.request_log(BASE).is_empty());
}

#[test]
fn test_transaction_id_mismatch_resets_once() {
    let (sim, registry, bus) = setup(1);
    registry.set_max_retries("test", 0, 0).expect("retries");
    sim.inject(BASE, Fault::TransactionIdSkew(1), Some(1));

    let before = sim.stats(BASE).resets;
    let err = bus.read_byte_data(DEV, 0x10).expect_err("skewed id");
    assert!(matches!(
        kind(&err),
        SmbusError::TransactionIdMismatch {
            cycle: 0,
            expected: 0,
            got: 1,
            ..
        }
    ));
    assert_eq!(sim.stats(BASE).resets - before, 1);

    // the fifo was flushed: the next transaction is clean
    assert_eq!(bus.read_byte_data(DEV, 0x10).expect("clean"), 0xAB);
}

#[test]
fn test_transaction_id_mismatch_is_retried() {
    let (sim, _registry, bus) = setup(1);
    sim.inject(BASE, Fault::TransactionIdSkew(1), Some(1));

    let before = sim.stats(BASE);
    assert_eq!(bus.read_byte_data(DEV, 0x10).expect("retried"), 0xAB);
    let after = sim.stats(BASE);
    assert_eq!(after.resets - before.resets, 1);
    assert_eq!(after.transactions - before.transactions, 2);
}

#[test]
fn test_persistent_ack_error_exhausts_retries() {
    let (sim, registry, bus) = setup(1);
    sim.inject(BASE, Fault::AckError, None);

    let before = sim.stats(BASE);
    let err = bus.read_byte_data(DEV, 0x10).expect_err("ack");
    assert!(matches!(kind(&err), SmbusError::AckError { cycle: 0, .. }));
    let after = sim.stats(BASE);
    assert_eq!(after.transactions - before.transactions, 4);
    assert_eq!(after.resets - before.resets, 4);

    registry.set_max_retries("test", 0, 1).expect("retries");
    let before = sim.stats(BASE);
    bus.read_byte_data(DEV, 0x10).expect_err("ack");
    let after = sim.stats(BASE);
    assert_eq!(after.transactions - before.transactions, 2);
    assert_eq!(after.resets - before.resets, 2);
}

#[test]
fn test_missing_device_nacks() {
    let (_sim, _registry, bus) = setup(1);
    let err = bus.read_byte_data(0x77, 0).expect_err("nobody home");
    assert!(matches!(kind(&err), SmbusError::AckError { .. }));
    assert_eq!(err.address, 0x77);
    assert_eq!(err.direction, Direction::Read);
    assert_eq!(err.protocol, Protocol::ByteData);
    assert!(err.to_string().contains("SCD test SMBus master 0 bus 0"));
}

#[test]
fn test_response_flag_classification() {
    let cases = [
        (Fault::Timeout, "timeout"),
        (Fault::BusConflict, "conflict"),
        (Fault::Flushed, "flush"),
        (Fault::Overflow, "overflow"),
        (Fault::EmptyFifo, "fe"),
    ];
    for (fault, tag) in cases {
        let (sim, registry, bus) = setup(1);
        registry.set_max_retries("test", 0, 0).expect("retries");
        sim.inject(BASE, fault, Some(1));

        let before = sim.stats(BASE);
        let err = bus.write_byte_data(DEV, 0x10, 1).expect_err("fault");
        assert_eq!(kind(&err).tag(), tag, "{fault:?}");
        assert!(kind(&err).is_generic_io());
        assert_eq!(sim.stats(BASE).resets - before.resets, 1, "{fault:?}");

        if fault == Fault::EmptyFifo {
            assert_eq!(
                *kind(&err),
                SmbusError::FifoEmptyAfterRetries { cycle: 0, reads: 10 }
            );
            assert_eq!(sim.stats(BASE).response_reads - before.response_reads, 10);
        }
    }
}

#[test]
fn test_oversized_block_read_is_not_retried() {
    for version in [1, 2] {
        let (sim, _registry, bus) = setup(version);
        sim.add_device(BASE, 0, 0x53, SimDevice::new().with_block(0x30, &[0x5A; 34]));

        let before = sim.stats(BASE);
        let err = bus.read_block_data(0x53, 0x30).expect_err("too big");
        assert_eq!(
            *kind(&err),
            SmbusError::BufferTooSmall {
                index: 34,
                capacity: 34
            },
            "version {version}"
        );
        let after = sim.stats(BASE);
        assert_eq!(after.resets - before.resets, 1);
        // generic path stops after the size probe
        assert_eq!(after.transactions - before.transactions, 1);
    }
}

#[test]
fn test_reported_length_beyond_step_limit() {
    for version in [1, 2] {
        let (sim, _registry, bus) = setup(version);
        sim.add_device(BASE, 0, 0x53, SimDevice::new().with_block(0x30, &[0x5A; 60]));

        let before = sim.stats(BASE);
        let err = bus.read_block_data(0x53, 0x30).expect_err("too big");
        assert_eq!(
            *kind(&err),
            SmbusError::BufferTooSmall {
                index: 34,
                capacity: 34
            },
            "version {version}"
        );
        let after = sim.stats(BASE);
        assert_eq!(after.resets - before.resets, 1, "version {version}");
        assert_eq!(after.transactions - before.transactions, 1, "version {version}");
    }
}

#[test]
fn test_largest_block_that_fits() {
    for version in [1, 2] {
        let (sim, _registry, bus) = setup(version);
        sim.add_device(BASE, 0, 0x53, SimDevice::new().with_block(0x30, &[0xA5; 33]));
        let back = bus.read_block_data(0x53, 0x30).expect("33 bytes");
        assert_eq!(back, vec![0xA5; 33]);
    }
}

#[test]
fn test_fast_path_busy_until_budget_expiry() {
    let (sim, registry, bus) = setup(2);
    registry.set_max_retries("test", 0, 0).expect("retries");
    sim.add_device(BASE, 0, 0x52, SimDevice::new().with_block(0x30, &[7, 7]));

    for (t, budget) in [(0u8, 5u32), (1, 40), (4, 100)] {
        registry
            .set_timing_override(
                0,
                0x52,
                TimingParams {
                    t,
                    ..TimingParams::DEFAULT
                },
            )
            .expect("override");

        // clears on the last poll inside the budget
        sim.set_busy_polls(BASE, budget - 1);
        assert_eq!(bus.read_block_data(0x52, 0x30).expect("in budget"), [7, 7]);

        // clears only on the poll that exhausts the budget
        sim.set_busy_polls(BASE, budget);
        let err = bus.read_block_data(0x52, 0x30).expect_err("at budget");
        assert!(matches!(kind(&err), SmbusError::Timeout { cycle: None, .. }));

        sim.set_busy_polls(BASE, 2);
        sim.inject(BASE, Fault::StuckBusy, Some(1));
        let before = sim.stats(BASE);
        let err = bus.read_block_data(0x52, 0x30).expect_err("stuck");
        assert!(matches!(kind(&err), SmbusError::Timeout { cycle: None, .. }));
        let after = sim.stats(BASE);
        // one sample, budget polls, then the read-modify-write of the reset
        assert_eq!(after.cs_reads - before.cs_reads, budget + 1 + 1, "t={t}");
        assert_eq!(after.resets - before.resets, 1);
    }
}

#[test]
fn test_fast_path_timeout_is_retried() {
    let (sim, _registry, bus) = setup(2);
    sim.add_device(BASE, 0, 0x52, SimDevice::new().with_block(0x30, &[1]));
    sim.inject(BASE, Fault::StuckBusy, Some(2));

    let before = sim.stats(BASE);
    assert_eq!(bus.read_block_data(0x52, 0x30).expect("third try"), [1]);
    assert_eq!(sim.stats(BASE).transactions - before.transactions, 3);
}

#[test]
fn test_timing_override_reaches_the_wire() {
    let (sim, registry, bus) = setup(1);
    registry
        .set_timing_override(
            0,
            DEV,
            TimingParams {
                t: 2,
                datw: 1,
                datr: 0,
                ed: 1,
            },
        )
        .expect("override");

    bus.write_byte_data(DEV, 0x10, 1).expect("write");
    let log = sim.request_log(BASE);
    assert!(log.iter().all(|c| c.t == 2));
    assert_eq!(log[2].dat, 1);
    assert!(log[2].ed && !log[0].ed);

    sim.clear_log(BASE);
    bus.read_byte_data(DEV, 0x10).expect("read");
    let log = sim.request_log(BASE);
    assert_eq!(log[3].dat, 0);

    // other addresses keep the default
    sim.add_device(BASE, 0, 0x51, SimDevice::new());
    sim.clear_log(BASE);
    bus.write_byte_data(0x51, 0x10, 1).expect("write");
    let log = sim.request_log(BASE);
    assert!(log.iter().all(|c| c.t == TimingParams::DEFAULT.t));
    assert_eq!(log[2].dat, TimingParams::DEFAULT.datw);
}

//! `scd-smbus`: command-line access to the SMBus buses of an SCD.
//!
//! ```text
//! USAGE:
//!   scd-smbus --sim probe                         Show master and buses
//!   scd-smbus --pci 0000:04:00.0 read-byte-data 0 0x50 0x10
//!   scd-smbus --sim dump 0 0x50                   256-byte register dump
//!   scd-smbus --sim --tweak "0 0x50 3 1 1 0" read-block 0 0x20 0x01
//! ```

use anyhow::{Context as _, Result};
use clap::{ArgGroup, Parser, Subcommand};
use scd_driver::config::parse_c_int;
use scd_driver::{
    Bus, Direction, EngineConfig, MmioRegion, RegisterIo, Registry, SimDevice, SimulatedScd,
    DEFAULT_BUS_COUNT, DEFAULT_MAX_RETRIES,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Register space of the simulated device.
const SIM_SIZE: usize = 0x1_0000;

#[derive(Parser)]
#[command(name = "scd-smbus", about = "SMBus access through an SCD bus-master", version)]
#[command(group(ArgGroup::new("target").required(true).args(["pci", "sim"])))]
struct Cli {
    /// PCI address of the SCD (e.g. 0000:04:00.0); BAR0 is mapped.
    #[arg(long)]
    pci: Option<String>,

    /// Use simulated hardware populated with demo devices.
    #[arg(long)]
    sim: bool,

    /// Byte offset of the master's register window.
    #[arg(long, default_value = "0x8000", value_parser = parse_u32)]
    master_addr: u32,

    /// Master id.
    #[arg(long, default_value_t = 0)]
    master_id: u32,

    /// Number of buses behind the master.
    #[arg(long, default_value_t = DEFAULT_BUS_COUNT)]
    bus_count: u32,

    /// Retries after a generic I/O failure.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Timing override "<bus> <addr> <t> <datr> <datw> <ed>" (repeatable).
    #[arg(long)]
    tweak: Vec<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the master's version and its buses.
    Probe,
    /// Quick command: the read/write bit is the only data.
    Quick {
        bus: u32,
        #[arg(value_parser = parse_u16)]
        address: u16,
        /// Send the read bit instead of the write bit.
        #[arg(long)]
        read: bool,
    },
    /// Receive one byte.
    ReadByte {
        bus: u32,
        #[arg(value_parser = parse_u16)]
        address: u16,
    },
    /// Send one byte.
    WriteByte {
        bus: u32,
        #[arg(value_parser = parse_u16)]
        address: u16,
        #[arg(value_parser = parse_u8)]
        value: u8,
    },
    /// Read the byte at a command code.
    ReadByteData {
        bus: u32,
        #[arg(value_parser = parse_u16)]
        address: u16,
        #[arg(value_parser = parse_u8)]
        command: u8,
    },
    /// Write the byte at a command code.
    WriteByteData {
        bus: u32,
        #[arg(value_parser = parse_u16)]
        address: u16,
        #[arg(value_parser = parse_u8)]
        command: u8,
        #[arg(value_parser = parse_u8)]
        value: u8,
    },
    /// Read a little-endian word.
    ReadWord {
        bus: u32,
        #[arg(value_parser = parse_u16)]
        address: u16,
        #[arg(value_parser = parse_u8)]
        command: u8,
    },
    /// Write a little-endian word.
    WriteWord {
        bus: u32,
        #[arg(value_parser = parse_u16)]
        address: u16,
        #[arg(value_parser = parse_u8)]
        command: u8,
        #[arg(value_parser = parse_u16)]
        value: u16,
    },
    /// SMBus block read (length reported by the device).
    ReadBlock {
        bus: u32,
        #[arg(value_parser = parse_u16)]
        address: u16,
        #[arg(value_parser = parse_u8)]
        command: u8,
    },
    /// SMBus block write.
    WriteBlock {
        bus: u32,
        #[arg(value_parser = parse_u16)]
        address: u16,
        #[arg(value_parser = parse_u8)]
        command: u8,
        #[arg(value_parser = parse_u8, num_args = 1..=32, required = true)]
        values: Vec<u8>,
    },
    /// Dump all 256 registers through byte-data reads.
    Dump {
        bus: u32,
        #[arg(value_parser = parse_u16)]
        address: u16,
    },
}

fn parse_u32(s: &str) -> Result<u32, String> {
    u32::try_from(parse_c_int(s)?).map_err(|_| format!("{s} out of range"))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    u16::try_from(parse_c_int(s)?).map_err(|_| format!("{s} out of range"))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    u8::try_from(parse_c_int(s)?).map_err(|_| format!("{s} out of range"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    let registry = open(&cli)?;
    let context = context_name(&cli).to_string();

    match cli.command {
        Cmd::Probe => cmd_probe(&registry, &context, cli.master_id)?,
        Cmd::Quick { bus, address, read } => {
            let direction = if read { Direction::Read } else { Direction::Write };
            registry.bus(bus)?.write_quick(address, direction)?;
            println!("{address:#04x}: ack");
        }
        Cmd::ReadByte { bus, address } => {
            println!("{:#04x}", registry.bus(bus)?.read_byte(address)?);
        }
        Cmd::WriteByte { bus, address, value } => {
            registry.bus(bus)?.write_byte(address, value)?;
        }
        Cmd::ReadByteData { bus, address, command } => {
            println!("{:#04x}", registry.bus(bus)?.read_byte_data(address, command)?);
        }
        Cmd::WriteByteData {
            bus,
            address,
            command,
            value,
        } => {
            registry.bus(bus)?.write_byte_data(address, command, value)?;
        }
        Cmd::ReadWord { bus, address, command } => {
            println!("{:#06x}", registry.bus(bus)?.read_word_data(address, command)?);
        }
        Cmd::WriteWord {
            bus,
            address,
            command,
            value,
        } => {
            registry.bus(bus)?.write_word_data(address, command, value)?;
        }
        Cmd::ReadBlock { bus, address, command } => {
            let data = registry.bus(bus)?.read_block_data(address, command)?;
            println!("{} bytes: {}", data.len(), hex(&data));
        }
        Cmd::WriteBlock {
            bus,
            address,
            command,
            values,
        } => {
            registry.bus(bus)?.write_block_data(address, command, &values)?;
        }
        Cmd::Dump { bus, address } => cmd_dump(&*registry.bus(bus)?, address)?,
    }

    Ok(())
}

/// Build a registry holding the one master selected on the command line.
fn open(cli: &Cli) -> Result<Registry> {
    let name = context_name(cli);
    let io: Arc<dyn RegisterIo> = match (&cli.pci, cli.sim) {
        (Some(addr), false) => {
            let region = MmioRegion::from_pci(addr, 0)
                .with_context(|| format!("mapping BAR0 of {addr}"))?;
            Arc::new(region)
        }
        _ => demo_sim(cli.master_addr, cli.bus_count),
    };

    let config = EngineConfig::default().with_max_retries(cli.max_retries);
    let registry = Registry::new(config);
    registry.add_context(name, io)?;
    registry
        .add_master(name, cli.master_addr, cli.master_id, cli.bus_count)
        .with_context(|| format!("adding master {} at {:#x}", cli.master_id, cli.master_addr))?;

    if !cli.tweak.is_empty() {
        let applied = registry.apply_tweaks(&cli.tweak.join("\n"))?;
        tracing::debug!("Applied {applied} timing overrides");
    }
    Ok(registry)
}

fn context_name(cli: &Cli) -> &str {
    match (&cli.pci, cli.sim) {
        (Some(addr), false) => addr.as_str(),
        _ => "sim",
    }
}

/// Simulated SCD with an EEPROM, a sensor and a block device on every bus.
fn demo_sim(base: u32, bus_count: u32) -> Arc<SimulatedScd> {
    let sim = Arc::new(SimulatedScd::new(SIM_SIZE));
    sim.add_master(base, 2);

    let eeprom: Vec<u8> = (0..=255).collect();
    for bus in (0..bus_count).filter_map(|b| u8::try_from(b).ok()) {
        sim.add_device(base, bus, 0x50, SimDevice::new().with_bytes(0, &eeprom));
        sim.add_device(
            base,
            bus,
            0x4c,
            SimDevice::new().with_bytes(0x00, &[0x2a, 0x19]).with_bytes(0xfe, &[0x01, 0x21]),
        );
        sim.add_device(
            base,
            bus,
            0x20,
            SimDevice::new().with_block(0x01, b"SCD demo").with_bytes(0x10, &[bus]),
        );
    }
    sim
}

fn cmd_probe(registry: &Registry, context: &str, master_id: u32) -> Result<()> {
    let info = registry.master_info(context, master_id)?;

    println!("Master       : {} @ {:#x}", info.id, info.base);
    println!("Version      : {}", info.version);
    println!("Block read   : {}", if info.fast_block_read { "accelerated" } else { "generic" });
    println!("Max retries  : {}", info.max_retries);
    println!();

    for bus in registry.buses() {
        println!("[{}] {}", bus.number(), bus.name());
        println!("     Functionality {:#010x}", bus.functionality().bits());
        for (addr, p) in bus.timing_overrides() {
            println!(
                "     Override {addr:#04x}  t={} datr={} datw={} ed={}",
                p.t, p.datr, p.datw, p.ed
            );
        }
    }
    Ok(())
}

fn cmd_dump(bus: &Bus, address: u16) -> Result<()> {
    println!("     0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f");
    for row in 0..16u8 {
        let values = (0..16u8)
            .map(|col| bus.read_byte_data(address, row * 16 + col))
            .collect::<Result<Vec<_>, _>>()?;
        println!("{:02x}: {}", row * 16, hex(&values));
    }
    Ok(())
}

fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

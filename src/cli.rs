//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

const PROGRAMMER_HELP: &str = "Board to use: dev=/dev/ttyACM0[:baud] or ip=host:port";

#[derive(Parser)]
#[command(name = "ufprog")]
#[command(author, version, about = "Universal memory-device programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Extra device presets: a .ron file or a directory of them
    #[arg(long, global = true)]
    pub presets: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Board and device selection shared by the device commands
#[derive(clap::Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Board to use
    #[arg(short, long, help = PROGRAMMER_HELP)]
    pub programmer: String,

    /// Device preset name (see `ufprog presets`)
    #[arg(short, long)]
    pub device: String,
}

/// Supply rail
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RailArg {
    /// Device supply
    Vdd,
    /// Programming supply
    Vpp,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a simulated board on a TCP port
    ServeSim {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7878")]
        listen: String,

        /// Board configuration overrides (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Chip in the socket: sram:SIZE, eprom:SIZE, 27e:SIZE, 28c64,
        /// 28c256, 28f:SIZE, spi, 24c02 or 24c256
        #[arg(long)]
        chip: Option<String>,
    },

    /// Show both rails and the device engine state
    Status {
        /// Board to use
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,
    },

    /// Regulate VDD to a voltage
    Vdd {
        /// Board to use
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// Target voltage
        volts: f32,

        /// Connect the output to the socket once settled
        #[arg(long)]
        on: bool,

        /// Keep the rail up this many seconds before switching off
        #[arg(long, default_value = "0")]
        hold: u64,
    },

    /// Regulate VPP to a voltage
    Vpp {
        /// Board to use
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// Target voltage
        volts: f32,

        /// Connect the output to the socket once settled
        #[arg(long)]
        on: bool,

        /// Keep the rail up this many seconds before switching off
        #[arg(long, default_value = "0")]
        hold: u64,
    },

    /// Calibrate a rail against an external meter
    Calibrate {
        /// Board to use
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// Rail to calibrate
        #[arg(value_enum)]
        rail: RailArg,

        /// Meter reading; prompted for if omitted
        #[arg(long)]
        measured: Option<f32>,

        /// Store this offset directly instead of measuring
        #[arg(long, conflicts_with = "measured")]
        offset: Option<f32>,
    },

    /// Read device contents to a file
    Read {
        #[command(flatten)]
        device: DeviceArgs,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// First cell (hex with 0x prefix, or decimal)
        #[arg(long, default_value = "0", value_parser = parse_hex_u32)]
        base: u32,
    },

    /// Program a file into the device
    Program {
        #[command(flatten)]
        device: DeviceArgs,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// First cell (hex with 0x prefix, or decimal)
        #[arg(long, default_value = "0", value_parser = parse_hex_u32)]
        base: u32,

        /// Erase the device first
        #[arg(long)]
        erase: bool,

        /// Skip the read-back pass after programming
        #[arg(long)]
        no_verify: bool,
    },

    /// Compare the device against a file
    Verify {
        #[command(flatten)]
        device: DeviceArgs,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// First cell (hex with 0x prefix, or decimal)
        #[arg(long, default_value = "0", value_parser = parse_hex_u32)]
        base: u32,
    },

    /// Erase the device
    Erase {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Check that the device is erased
    BlankCheck {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Read the manufacturer and device ID
    Id {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Disable write protection
    Unprotect {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Enable write protection
    Protect {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// List device presets
    Presets {
        /// Only show presets whose name contains this
        #[arg(short, long)]
        filter: Option<String>,
    },
}

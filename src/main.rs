//! ufprog - universal memory-device programmer
//!
//! Host front end for a ufprog board. The board does the timing-critical
//! work (supplies, bus cycles, program/verify loops); this tool picks a
//! device preset, moves files in and out, and reports progress.
//!
//! `ufprog serve-sim` runs a simulated board on a TCP port, so every other
//! command can be tried without hardware:
//!
//! ```text
//! ufprog serve-sim --chip eprom:32k &
//! ufprog program -p ip=127.0.0.1:7878 -d 27C256 -i image.bin
//! ```

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use ufprog_host::PresetDb;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let presets = match load_presets(cli.presets.as_deref()) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to load device presets: {}", e);
            std::process::exit(1);
        }
    };

    log::debug!("Loaded {} device presets", presets.len());

    match cli.command {
        Commands::ServeSim {
            listen,
            config,
            chip,
        } => commands::sim::cmd_serve_sim(&listen, config.as_deref(), chip.as_deref()),
        Commands::Status { programmer } => commands::power::cmd_status(&programmer),
        Commands::Vdd {
            programmer,
            volts,
            on,
            hold,
        } => commands::power::cmd_rail(&programmer, cli::RailArg::Vdd.into(), volts, on, hold),
        Commands::Vpp {
            programmer,
            volts,
            on,
            hold,
        } => commands::power::cmd_rail(&programmer, cli::RailArg::Vpp.into(), volts, on, hold),
        Commands::Calibrate {
            programmer,
            rail,
            measured,
            offset,
        } => commands::power::cmd_calibrate(&programmer, rail.into(), measured, offset),
        Commands::Read {
            device,
            output,
            base,
        } => commands::device::cmd_read(&device, &presets, &output, base),
        Commands::Program {
            device,
            input,
            base,
            erase,
            no_verify,
        } => commands::device::cmd_program(&device, &presets, &input, base, erase, !no_verify),
        Commands::Verify {
            device,
            input,
            base,
        } => commands::device::cmd_verify(&device, &presets, &input, base),
        Commands::Erase { device } => commands::device::cmd_erase(&device, &presets),
        Commands::BlankCheck { device } => commands::device::cmd_blank_check(&device, &presets),
        Commands::Id { device } => commands::device::cmd_id(&device, &presets),
        Commands::Unprotect { device } => commands::device::cmd_unprotect(&device, &presets),
        Commands::Protect { device } => commands::device::cmd_protect(&device, &presets),
        Commands::Presets { filter } => {
            commands::list_presets(&presets, filter.as_deref());
            Ok(())
        }
    }
}

/// Built-in presets, plus a user file or directory layered on top
fn load_presets(path: Option<&Path>) -> Result<PresetDb, Box<dyn std::error::Error>> {
    let mut db = PresetDb::builtin()?;

    if let Some(path) = path {
        let count = if path.is_dir() {
            db.load_dir(path)?
        } else if path.is_file() {
            db.load_file(path)?
        } else {
            return Err(format!("Preset path not found: {}", path.display()).into());
        };
        log::debug!("Loaded {} presets from {}", count, path.display());
    }

    Ok(db)
}

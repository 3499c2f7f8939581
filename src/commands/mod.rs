//! CLI command implementations
//!
//! Every command that talks to a board opens it through
//! [`ufprog_host::open`], which synchronizes and checks the protocol
//! version. Device commands then send the preset's configuration before
//! doing anything else.
//!
//! Dropping the client switches the supplies off, so nothing stays powered
//! once a command returns. The first Ctrl-C stops a range operation before
//! its next chunk; a second one quits at once.

pub mod device;
mod list;
pub mod power;
pub mod sim;

pub use list::list_presets;

use std::sync::atomic::Ordering;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use ufprog_host::{Preset, PresetDb, Programmer, Transport};

use crate::cli::DeviceArgs;

/// Result type of every command
pub type CmdResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Client over whichever transport the connection string picked
pub type Board = Programmer<Box<dyn Transport>>;

/// Byte progress bar for one phase of an operation
pub fn progress_bar(total: u64, phase: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {}",
                phase
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Spinner for operations without a byte count (erase, settling)
pub fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Open the board and configure it for the named preset
pub fn open_device(args: &DeviceArgs, presets: &PresetDb) -> CmdResult<(Board, Preset)> {
    let preset = presets
        .find(&args.device)
        .ok_or_else(|| format!("Unknown device: {} (see `ufprog presets`)", args.device))?
        .clone();
    let mut board = ufprog_host::open(&args.programmer)?;
    let cancel = board.cancel_flag();
    ctrlc::set_handler(move || {
        if cancel.swap(true, Ordering::AcqRel) {
            std::process::exit(130);
        }
        eprintln!("Interrupted, stopping after the current chunk (Ctrl-C again to quit)");
    })?;
    board.configure(&preset.config())?;
    println!(
        "Device: {} ({}, {} cells)",
        preset.name,
        preset.family.name(),
        preset.size.cells()
    );
    Ok((board, preset))
}

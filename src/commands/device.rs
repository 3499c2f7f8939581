//! Device commands: read, program, verify, erase, blank check, ID and
//! write protection

use std::fs;
use std::path::Path;

use ufprog_host::{Preset, PresetDb};

use super::{open_device, progress_bar, spinner, Board, CmdResult};
use crate::cli::DeviceArgs;

/// Device size in bytes and the bytes left from cell `base`
fn span(board: &Board, preset: &Preset, base: u32) -> CmdResult<(usize, usize)> {
    let config = board
        .device()
        .copied()
        .unwrap_or_else(|| preset.config());
    let cell = config.cell_bytes();
    if base >= config.size {
        return Err(format!(
            "Base 0x{:X} is past the end of {} (0x{:X} cells)",
            base, preset.name, config.size
        )
        .into());
    }
    Ok((
        config.size as usize * cell,
        (config.size - base) as usize * cell,
    ))
}

fn load_image(input: &Path, room: usize, name: &str) -> CmdResult<Vec<u8>> {
    let data = fs::read(input)?;
    println!("Read {} bytes from {:?}", data.len(), input);
    if data.is_empty() {
        return Err(format!("{:?} is empty", input).into());
    }
    if data.len() > room {
        return Err(format!(
            "File size ({} bytes) exceeds the space left in {} ({} bytes)",
            data.len(),
            name,
            room
        )
        .into());
    }
    Ok(data)
}

/// Read from cell `base` to the end of the device into `output`
pub fn cmd_read(args: &DeviceArgs, presets: &PresetDb, output: &Path, base: u32) -> CmdResult {
    let (mut board, preset) = open_device(args, presets)?;
    let (_, len) = span(&board, &preset, base)?;

    let mut data = vec![0u8; len];
    let pb = progress_bar(len as u64, "Reading");
    board.read_range(base, &mut data, |done| pb.set_position(done as u64))?;
    pb.finish_with_message("Read complete");

    fs::write(output, &data)?;
    println!("Wrote {} bytes to {:?}", data.len(), output);
    Ok(())
}

/// Program `input` from cell `base`
pub fn cmd_program(
    args: &DeviceArgs,
    presets: &PresetDb,
    input: &Path,
    base: u32,
    erase: bool,
    verify: bool,
) -> CmdResult {
    let (mut board, preset) = open_device(args, presets)?;
    let (_, room) = span(&board, &preset, base)?;
    let data = load_image(input, room, &preset.name)?;

    if erase {
        let pb = spinner(format!("Erasing {}", preset.name));
        let result = board.erase();
        pb.finish_and_clear();
        result?;
        println!("Erased");
    }

    let pb = progress_bar(data.len() as u64, "Programming");
    let result = board.program_range(base, &data, |done| pb.set_position(done as u64));
    match result {
        Ok(()) => pb.finish_with_message("Program complete"),
        Err(e) => {
            pb.abandon_with_message("Program failed");
            return Err(e.into());
        }
    }

    if verify {
        verify_with_progress(&mut board, base, &data)?;
    }
    println!("Programmed {} bytes", data.len());
    Ok(())
}

/// Compare the device from cell `base` against `input`
pub fn cmd_verify(args: &DeviceArgs, presets: &PresetDb, input: &Path, base: u32) -> CmdResult {
    let (mut board, preset) = open_device(args, presets)?;
    let (size, room) = span(&board, &preset, base)?;
    let data = load_image(input, room, &preset.name)?;

    verify_with_progress(&mut board, base, &data)?;
    if data.len() < size {
        println!(
            "Note: only {} of {} bytes compared",
            data.len(),
            size
        );
    }
    println!("Verification passed!");
    Ok(())
}

fn verify_with_progress(board: &mut Board, base: u32, data: &[u8]) -> CmdResult {
    let pb = progress_bar(data.len() as u64, "Verifying");
    match board.verify_range(base, data, |done| pb.set_position(done as u64)) {
        Ok(()) => {
            pb.finish_with_message("Verification passed");
            Ok(())
        }
        Err(e) => {
            pb.abandon_with_message("Verification failed!");
            Err(e.into())
        }
    }
}

/// Erase the whole device
pub fn cmd_erase(args: &DeviceArgs, presets: &PresetDb) -> CmdResult {
    let (mut board, preset) = open_device(args, presets)?;
    let pb = spinner(format!("Erasing {}", preset.name));
    let result = board.erase();
    pb.finish_and_clear();
    result?;
    println!("Erase complete");
    Ok(())
}

/// Check that every cell holds the erased value
pub fn cmd_blank_check(args: &DeviceArgs, presets: &PresetDb) -> CmdResult {
    let (mut board, preset) = open_device(args, presets)?;
    let pb = spinner(format!("Blank checking {}", preset.name));
    let result = board.blank_check(0, preset.size.cells());
    pb.finish_and_clear();
    result?;
    println!("Device is blank");
    Ok(())
}

/// Read the ID and name the presets that carry it
pub fn cmd_id(args: &DeviceArgs, presets: &PresetDb) -> CmdResult {
    let (mut board, preset) = open_device(args, presets)?;
    let (manufacturer, device) = board.get_id()?;
    println!(
        "Manufacturer ID: 0x{:02X}, Device ID: 0x{:04X}",
        manufacturer, device
    );

    if let Some(expected) = preset.id {
        if expected != (manufacturer, device) {
            log::warn!(
                "{} should read {:02X} {:04X}",
                preset.name,
                expected.0,
                expected.1
            );
        }
    }
    let matches: Vec<&str> = presets
        .iter()
        .filter(|(_, p)| p.id == Some((manufacturer, device)))
        .map(|(_, p)| p.name.as_str())
        .collect();
    if !matches.is_empty() {
        println!("Matches: {}", matches.join(", "));
    }
    Ok(())
}

/// Disable write protection
pub fn cmd_unprotect(args: &DeviceArgs, presets: &PresetDb) -> CmdResult {
    let (mut board, preset) = open_device(args, presets)?;
    board.unprotect()?;
    println!("{} write protection disabled", preset.name);
    Ok(())
}

/// Enable write protection
pub fn cmd_protect(args: &DeviceArgs, presets: &PresetDb) -> CmdResult {
    let (mut board, preset) = open_device(args, presets)?;
    board.protect()?;
    println!("{} write protection enabled", preset.name);
    Ok(())
}

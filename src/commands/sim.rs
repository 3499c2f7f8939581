//! `serve-sim`: a simulated board behind a TCP port

use std::net::TcpListener;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use ufprog_sim::chip::{I2cChip, ParallelChip, ParallelKind, SpiChip, SpiChipConfig};
use ufprog_sim::link::TcpLink;
use ufprog_sim::{Board, BoardConfig};

use super::CmdResult;

/// A chip for the simulated socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimChip {
    Sram(usize),
    Eprom(usize),
    Eprom27E(usize),
    Eeprom28C64,
    Eeprom28C256,
    Flash28F(usize),
    Spi,
    I2c24C02,
    I2c24C256,
}

fn parse_size(s: &str) -> Result<usize, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => match s.strip_suffix(['k', 'K']) {
            Some(kib) => kib.parse::<usize>().map(|n| n * 1024),
            None => s.parse(),
        },
    };
    parsed.map_err(|_| format!("Invalid size: {}", s))
}

impl SimChip {
    /// `kind[:size]`, e.g. `eprom:32k` or `28c256`
    fn parse(spec: &str) -> Result<Self, String> {
        let (kind, size) = match spec.split_once(':') {
            Some((kind, size)) => (kind, Some(parse_size(size)?)),
            None => (spec, None),
        };
        let sized = |f: fn(usize) -> SimChip| {
            size.map(f)
                .ok_or_else(|| format!("{} needs a size, e.g. {}:32k", kind, kind))
        };
        match kind.to_ascii_lowercase().as_str() {
            "sram" => sized(SimChip::Sram),
            "eprom" => sized(SimChip::Eprom),
            "27e" => sized(SimChip::Eprom27E),
            "28f" => sized(SimChip::Flash28F),
            "28c64" => Ok(SimChip::Eeprom28C64),
            "28c256" => Ok(SimChip::Eeprom28C256),
            "spi" => Ok(SimChip::Spi),
            "24c02" => Ok(SimChip::I2c24C02),
            "24c256" => Ok(SimChip::I2c24C256),
            _ => Err(format!("Unknown simulated chip: {}", spec)),
        }
    }

    fn insert(self, board: &Board) {
        match self {
            SimChip::Sram(cells) => {
                board.insert(ParallelChip::sram(cells));
            }
            SimChip::Eprom(cells) => {
                board.insert(ParallelChip::eprom(cells));
            }
            SimChip::Eprom27E(cells) => {
                board.insert(ParallelChip::new(ParallelKind::Eprom27E, cells));
            }
            SimChip::Eeprom28C64 => {
                board.insert(ParallelChip::eeprom_28c64());
            }
            SimChip::Eeprom28C256 => {
                board.insert(ParallelChip::eeprom_28c256());
            }
            SimChip::Flash28F(cells) => {
                board.insert(ParallelChip::flash_28f(cells));
            }
            SimChip::Spi => {
                board.insert(SpiChip::new(SpiChipConfig::default()));
            }
            SimChip::I2c24C02 => {
                board.insert(I2cChip::c24c02());
            }
            SimChip::I2c24C256 => {
                board.insert(I2cChip::c24c256());
            }
        }
    }
}

/// Serve one client at a time until the process is killed
pub fn cmd_serve_sim(listen: &str, config: Option<&Path>, chip: Option<&str>) -> CmdResult {
    let config = match config {
        Some(path) => BoardConfig::load(path)?,
        None => BoardConfig::default(),
    };
    let board = Arc::new(Board::new(config));
    if let Some(spec) = chip {
        let chip = SimChip::parse(spec)?;
        chip.insert(&board);
        log::info!("sim: socket holds {:?}", chip);
    }

    // Ctrl-C cancels the running device operation, or quits when idle
    let handler = board.clone();
    ctrlc::set_handler(move || {
        if !handler.cancel() {
            std::process::exit(130);
        }
    })?;

    let listener = TcpListener::bind(listen)?;
    println!("Simulated board listening on {}", listener.local_addr()?);

    let stop = AtomicBool::new(false);
    let timeout = Duration::from_millis(board.config().frame_timeout_ms as u64);
    for stream in listener.incoming() {
        let stream = stream?;
        let peer = stream.peer_addr()?;
        log::info!("sim: client {} connected", peer);
        if let Err(e) = board.serve(TcpLink::new(stream, timeout)?, &stop) {
            log::warn!("sim: client {}: {}", peer, e);
        }
        log::info!("sim: client {} disconnected", peer);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sim_chip() {
        assert_eq!(SimChip::parse("eprom:32k"), Ok(SimChip::Eprom(32 * 1024)));
        assert_eq!(SimChip::parse("SRAM:0x800"), Ok(SimChip::Sram(0x800)));
        assert_eq!(SimChip::parse("28c256"), Ok(SimChip::Eeprom28C256));
        assert_eq!(SimChip::parse("24c02"), Ok(SimChip::I2c24C02));
    }

    #[test]
    fn test_parse_sim_chip_errors() {
        assert!(SimChip::parse("eprom").is_err());
        assert!(SimChip::parse("eprom:big").is_err());
        assert!(SimChip::parse("z80").is_err());
    }
}

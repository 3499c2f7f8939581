//! Supply commands: status, regulation and calibration

use std::io::{self, BufRead, Write};
use std::time::Duration;

use ufprog_core::regulator::{Rail, RegulatorStatus};

use super::{spinner, CmdResult};
use crate::cli::RailArg;

/// Longest wait for a rail to settle
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

impl From<RailArg> for Rail {
    fn from(arg: RailArg) -> Self {
        match arg {
            RailArg::Vdd => Rail::Vdd,
            RailArg::Vpp => Rail::Vpp,
        }
    }
}

fn rail_name(rail: Rail) -> &'static str {
    match rail {
        Rail::Vdd => "VDD",
        Rail::Vpp => "VPP",
    }
}

fn print_rail(rail: Rail, status: &RegulatorStatus, offset: f32) {
    println!(
        "{}: {:?}, target {:.2} V, measured {:.2} V, duty {:.1} %, offset {:+.3} V",
        rail_name(rail),
        status.phase,
        status.target,
        status.measured,
        status.duty,
        offset
    );
    if let Some(fault) = status.fault {
        println!("     fault: {:?}", fault);
    }
}

/// Show both rails and the engine state
pub fn cmd_status(programmer: &str) -> CmdResult {
    let mut board = ufprog_host::open(programmer)?;
    let summary = board.status()?;
    println!(
        "Protocol version {}.{}",
        summary.version >> 8,
        summary.version & 0xFF
    );
    print_rail(Rail::Vdd, &summary.vdd.status, summary.vdd.calibration);
    print_rail(Rail::Vpp, &summary.vpp.status, summary.vpp.calibration);
    println!("Device engine: {:?}", summary.state);
    Ok(())
}

/// Bring a rail to `volts`, optionally onto the socket for `hold` seconds
pub fn cmd_rail(programmer: &str, rail: Rail, volts: f32, on: bool, hold: u64) -> CmdResult {
    let mut board = ufprog_host::open(programmer)?;
    board.start(rail, volts)?;

    let pb = spinner(format!("Regulating {} to {:.2} V", rail_name(rail), volts));
    let status = board.wait_settled(rail, SETTLE_TIMEOUT);
    pb.finish_and_clear();
    let status = status?;
    let offset = board.calibration(rail)?;
    print_rail(rail, &status, offset);

    if on {
        board.set_output(rail, true)?;
        println!("{} output on", rail_name(rail));
    }
    if hold > 0 {
        let pb = spinner(format!("Holding for {} s", hold));
        std::thread::sleep(Duration::from_secs(hold));
        pb.finish_and_clear();
        print_rail(rail, &board.get_status(rail)?, offset);
    }

    board.shutdown()?;
    println!("Supplies off");
    Ok(())
}

/// Calibrate `rail` against a meter reading, or store a known offset
pub fn cmd_calibrate(
    programmer: &str,
    rail: Rail,
    measured: Option<f32>,
    offset: Option<f32>,
) -> CmdResult {
    let mut board = ufprog_host::open(programmer)?;

    if let Some(offset) = offset {
        board.set_calibration(rail, offset)?;
        println!("{} offset set to {:+.3} V", rail_name(rail), offset);
        return Ok(());
    }

    board.begin_calibration(rail)?;
    let pb = spinner(format!("Bringing {} to nominal", rail_name(rail)));
    let status = board.wait_settled(rail, SETTLE_TIMEOUT);
    pb.finish_and_clear();
    let status = status?;
    println!(
        "{} regulated to {:.2} V (uncalibrated reading)",
        rail_name(rail),
        status.measured
    );

    let measured = match measured {
        Some(volts) => volts,
        None => prompt_volts(&format!(
            "Measure {} at the socket and enter the reading: ",
            rail_name(rail)
        ))?,
    };
    let offset = board.finish_calibration(rail, measured)?;
    println!("{} offset {:+.3} V stored", rail_name(rail), offset);
    Ok(())
}

fn prompt_volts(prompt: &str) -> CmdResult<f32> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let volts = line
        .trim()
        .trim_end_matches(['V', 'v'])
        .trim()
        .parse::<f32>()
        .map_err(|_| format!("Not a voltage: {}", line.trim()))?;
    Ok(volts)
}

//! Whole-board tests: the unmodified core on the simulated hardware

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{pattern, Host};
use ufprog_core::device::{DeviceFlags, Family, SessionState};
use ufprog_core::protocol::{Command, Reply, PROTOCOL_VERSION};
use ufprog_core::regulator::{Fault, Phase, Rail};
use ufprog_core::Error;
use ufprog_sim::chip::{Chip, I2cChip, ParallelChip, SpiChip, SpiChipConfig};
use ufprog_sim::{Board, BoardConfig, Signal};

#[test]
fn test_version_over_raw_frames() {
    let mut host = Host::start(Board::default());
    let [lo, hi] = PROTOCOL_VERSION.to_le_bytes();
    assert_eq!(host.raw(&[0x00], 1), [0xA1]);
    assert_eq!(host.raw(&[0x0F], 3), [0xA1, lo, hi]);
    // Unknown opcode
    assert_eq!(host.raw(&[0x87], 6), [0xA0, 1, 0, 0, 0, 0]);
}

#[test]
fn test_device_commands_need_configure() {
    let mut host = Host::start(Board::default());
    assert_eq!(
        host.request(Command::Read { base: 0, count: 16 }),
        Err(Error::NotConfigured)
    );
}

#[test]
fn test_sram_program_read_verify() {
    let board = Board::default();
    let chip = board.insert(ParallelChip::sram(0x800));
    let mut host = Host::start(board);
    host.configure(Family::Sram, 0x800);

    let data = pattern(256);
    host.stage(&data);
    host.ok(Command::Program {
        base: 0x100,
        count: 256,
    });
    assert_eq!(chip.lock().unwrap().cell(0x100), data[0] as u16);
    assert_eq!(chip.lock().unwrap().cell(0x1FF), data[255] as u16);

    host.ok(Command::BufClear);
    host.ok(Command::Read {
        base: 0x100,
        count: 256,
    });
    assert_eq!(host.fetch(256), data);

    host.ok(Command::Verify {
        base: 0x100,
        count: 256,
    });
    let mut altered = data.clone();
    altered[0x80] ^= 0x01;
    host.stage(&altered);
    assert_eq!(
        host.request(Command::Verify {
            base: 0x100,
            count: 256
        }),
        Err(Error::ProgramVerifyFailed { addr: 0x180 })
    );

    // Supplies are off again after the session
    let pins = host.board.socket().pins();
    assert!(!pins.vdd && !pins.vpp);
}

#[test]
fn test_sram_16bit() {
    let board = Board::default();
    let chip = board.insert(ParallelChip::sram(0x400).wide());
    let mut host = Host::start(board);
    host.configure_with(Family::Sram, DeviceFlags::IS_16BIT, 0x400, 0);

    host.stage(&[0x12, 0x34, 0xAB, 0xCD]);
    host.ok(Command::Program { base: 2, count: 2 });
    assert_eq!(chip.lock().unwrap().cell(2), 0x1234);
    assert_eq!(chip.lock().unwrap().cell(3), 0xABCD);

    host.ok(Command::Read { base: 2, count: 2 });
    assert_eq!(host.fetch(4), [0x12, 0x34, 0xAB, 0xCD]);
}

#[test]
fn test_eprom_program_and_blank_check() {
    let board = Board::default();
    let chip = board.insert(ParallelChip::eprom(0x2000));
    let mut host = Host::start(board);
    host.configure(Family::Eprom, 0x2000);

    host.ok(Command::BlankCheck {
        base: 0,
        count: 0x2000,
    });

    let mut data = pattern(32);
    data[5] = 0xFF;
    host.stage(&data);
    host.ok(Command::Program { base: 0x40, count: 32 });
    assert_eq!(chip.lock().unwrap().contents()[0x40..0x60], data[..]);
    host.ok(Command::Verify { base: 0x40, count: 32 });

    assert_eq!(
        host.request(Command::BlankCheck {
            base: 0,
            count: 0x2000
        }),
        Err(Error::NotBlank { addr: 0x40 })
    );
    // Skipped cells must already be erased
    host.stage(&[0xFF]);
    assert_eq!(
        host.request(Command::Program { base: 0x41, count: 1 }),
        Err(Error::ProgramVerifyFailed { addr: 0x41 })
    );
}

#[test]
fn test_eprom_without_vpp_fails_verify() {
    let board = Board::default();
    board.insert(ParallelChip::eprom(0x2000));
    let mut host = Host::start(board);
    // Without PROG_WITH_VPP the part never sees a programming voltage
    host.configure_with(Family::Eprom, DeviceFlags::SKIP_FF, 0x2000, 0);
    host.ok(Command::SetAttempts(2));
    host.stage(&[0x00]);
    assert_eq!(
        host.request(Command::Program { base: 0, count: 1 }),
        Err(Error::ProgramVerifyFailed { addr: 0 })
    );
}

#[test]
fn test_eprom_signature() {
    let board = Board::default();
    board.insert(ParallelChip::eprom(0x8000).with_id(0x20, 0x8C));
    let mut host = Host::start(board);
    host.configure(Family::Eprom, 0x8000);
    assert_eq!(host.ok(Command::GetId), Reply::Dword(0x0020_008C));
    let pins = host.board.socket().pins();
    assert!(!pins.vpp && pins.routes == 0);
}

#[test]
fn test_signature_equal_to_data_is_no_response() {
    let board = Board::default();
    board.insert(ParallelChip::eprom(0x8000).with_id(0xFF, 0xFF));
    let mut host = Host::start(board);
    host.configure(Family::Eprom, 0x8000);
    assert_eq!(host.request(Command::GetId), Err(Error::NoResponse));
}

#[test]
fn test_empty_parallel_socket_has_no_id() {
    let mut host = Host::start(Board::default());
    host.configure(Family::Eprom, 0x8000);
    assert_eq!(host.request(Command::GetId), Err(Error::NoResponse));
}

#[test]
fn test_27e_erase() {
    let board = Board::default();
    let chip = board.insert(
        ParallelChip::new(ufprog_sim::chip::ParallelKind::Eprom27E, 0x1000)
            .with_contents(&[0u8; 0x100]),
    );
    let mut host = Host::start(board);
    host.configure(Family::Eprom27E, 0x1000);
    host.ok(Command::Erase);
    assert!(chip.lock().unwrap().contents().iter().all(|&b| b == 0xFF));
}

#[test]
fn test_28c_unprotect_then_write() {
    let board = Board::default();
    let chip = board.insert(ParallelChip::eeprom_28c64().protected());
    let mut host = Host::start(board);
    host.configure(Family::Eeprom28C64, 0x2000);
    host.ok(Command::SetTwc(200));

    host.stage(&[0x5A]);
    assert!(host.request(Command::Program { base: 0x10, count: 1 }).is_err());
    assert_eq!(chip.lock().unwrap().cell(0x10), 0xFF);

    host.ok(Command::Unprotect);
    assert!(!chip.lock().unwrap().is_protected());
    host.ok(Command::Program { base: 0x10, count: 1 });
    assert_eq!(chip.lock().unwrap().cell(0x10), 0x5A);

    host.ok(Command::Protect);
    assert!(chip.lock().unwrap().is_protected());
}

#[test]
fn test_28f_erase_and_id() {
    let board = Board::default();
    let chip = board.insert(
        ParallelChip::flash_28f(0x1000)
            .with_id(0x89, 0xB4)
            .with_contents(&[0x00; 0x20]),
    );
    let mut host = Host::start(board);
    host.configure(Family::Flash28F, 0x1000);

    assert_eq!(host.ok(Command::GetId), Reply::Dword(0x0089_00B4));
    host.ok(Command::Erase);
    assert!(chip.lock().unwrap().contents().iter().all(|&b| b == 0xFF));

    host.stage(&[0x11, 0x22]);
    host.ok(Command::Program { base: 0, count: 2 });
    assert_eq!(chip.lock().unwrap().contents()[..2], [0x11, 0x22]);
}

#[test]
fn test_spi_flash() {
    let board = Board::default();
    let chip = board.insert(SpiChip::new(SpiChipConfig::default()).with_contents(&[0u8; 0x3000]));
    let mut host = Host::start(board);
    host.configure_with(Family::SpiFlash, Family::SpiFlash.default_flags(), 0x2000, 0x1000);

    assert_eq!(host.ok(Command::GetId), Reply::Dword(0x00EF_4014));
    host.ok(Command::Erase);
    {
        let contents = chip.lock().unwrap().contents();
        assert!(contents[..0x2000].iter().all(|&b| b == 0xFF));
        assert_eq!(contents[0x2000], 0);
    }

    let data = pattern(64);
    host.stage(&data);
    host.ok(Command::Program {
        base: 0x1F0,
        count: 64,
    });
    assert_eq!(chip.lock().unwrap().contents()[0x1F0..0x230], data[..]);

    host.ok(Command::BufClear);
    host.ok(Command::Read {
        base: 0x1F0,
        count: 64,
    });
    assert_eq!(host.fetch(64), data);
}

#[test]
fn test_spi_unprotect() {
    let board = Board::default();
    let chip = board.insert(SpiChip::new(SpiChipConfig::default()).protected());
    let mut host = Host::start(board);
    host.configure_with(Family::SpiFlash, Family::SpiFlash.default_flags(), 0x1000, 0x1000);
    host.ok(Command::Unprotect);
    assert_eq!(chip.lock().unwrap().status() & 0x1C, 0);
}

#[test]
fn test_i2c_eeprom() {
    let board = Board::default();
    let chip = board.insert(I2cChip::c24c02().with_page_size(8));
    let mut host = Host::start(board);
    host.configure(Family::I2cEeprom, 256);
    host.ok(Command::SetTwc(100));

    let data = pattern(24);
    host.stage(&data);
    host.ok(Command::Program { base: 4, count: 24 });
    assert_eq!(chip.lock().unwrap().contents()[4..28], data[..]);

    host.ok(Command::BufClear);
    host.ok(Command::Read { base: 4, count: 24 });
    assert_eq!(host.fetch(24), data);
    assert_eq!(host.request(Command::GetId), Err(Error::UnsupportedOperation));
}

#[test]
fn test_empty_i2c_socket_is_no_response() {
    let mut host = Host::start(Board::default());
    host.configure(Family::I2cEeprom, 256);
    assert_eq!(
        host.request(Command::Read { base: 0, count: 1 }),
        Err(Error::NoResponse)
    );
}

#[test]
fn test_cancel_stops_blank_check_at_a_step() {
    let board = Board::default();
    board.insert(ParallelChip::eprom(0x80000));
    let mut host = Host::start(board);
    host.configure(Family::Eprom, 0x80000);
    // Nothing running yet
    assert!(!host.board.cancel());

    let finished = Arc::new(AtomicBool::new(false));
    let canceller = {
        let board = host.board.clone();
        let finished = finished.clone();
        thread::spawn(move || {
            while !finished.load(Ordering::Relaxed) {
                if board.cancel() {
                    return true;
                }
                thread::sleep(Duration::from_millis(2));
            }
            false
        })
    };
    let result = host.request(Command::BlankCheck {
        base: 0,
        count: 0x80000,
    });
    finished.store(true, Ordering::Relaxed);
    assert!(canceller.join().unwrap());

    assert_eq!(result, Err(Error::Cancelled));
    assert_eq!(
        host.ok(Command::State).byte().unwrap(),
        SessionState::Cancelled.code()
    );
    // Bus back in reset, supplies off
    let pins = host.board.socket().pins();
    assert!(!pins.ce && !pins.oe);
    assert!(!pins.vdd && !pins.vpp);
    assert_eq!(pins.routes, 0);

    // The flag does not leak into the next session
    host.ok(Command::BlankCheck {
        base: 0,
        count: 0x100,
    });
    assert_eq!(
        host.ok(Command::State).byte().unwrap(),
        SessionState::Completed.code()
    );
}

#[test]
fn test_generator_settles() {
    let mut host = Host::start(Board::default());
    host.ok(Command::Start {
        rail: Rail::Vpp,
        volts: 12.0,
    });
    let status = wait_settled(&mut host, Rail::Vpp);
    assert!((status.measured - 12.0).abs() < 0.6);
    assert!((host.board.vpp().volts() - 12.0).abs() < 0.7);

    host.ok(Command::Stop(Rail::Vpp));
    let status = host.ok(Command::GetStatus(Rail::Vpp)).status().unwrap();
    assert_eq!(status.phase, Phase::Idle);
}

#[test]
fn test_calibration_cancels_adc_error() {
    let mut config = BoardConfig::default();
    config.vpp.plant.adc_error = 0.3;
    let mut host = Host::start(Board::new(config));

    host.ok(Command::InitCalibration(Rail::Vpp));
    wait_settled(&mut host, Rail::Vpp);
    let measured = host.board.vpp().volts();
    let offset = host
        .ok(Command::SaveCalibration {
            rail: Rail::Vpp,
            measured,
        })
        .float()
        .unwrap();
    assert!((offset + 0.3).abs() < 0.1, "offset {}", offset);
    assert_eq!(
        host.ok(Command::GetCalibration(Rail::Vpp)),
        Reply::Float(offset)
    );
    assert!(!host.board.socket().pins().vpp);
}

#[test]
fn test_adc_failure_latches_hardware_fault() {
    let mut host = Host::start(Board::default());
    host.board.vdd().fail_adc(true);
    host.ok(Command::Start {
        rail: Rail::Vdd,
        volts: 5.0,
    });
    let mut status = host.ok(Command::GetStatus(Rail::Vdd)).status().unwrap();
    for _ in 0..200 {
        if status.fault.is_some() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
        status = host.ok(Command::GetStatus(Rail::Vdd)).status().unwrap();
    }
    assert_eq!(status.fault, Some(Fault::Hardware));
    assert_eq!(status.phase, Phase::Idle);
    assert_eq!(host.board.vdd().duty(), 0.0);
}

#[test]
fn test_pin_fault_is_hardware_error() {
    let mut host = Host::start(Board::default());
    host.board.socket().fail_pin(Some(Signal::VppOn));
    assert_eq!(
        host.request(Command::SetOutput {
            rail: Rail::Vpp,
            on: true
        }),
        Err(Error::Hardware)
    );
    host.board.socket().fail_pin(None);
    host.ok(Command::SetOutput {
        rail: Rail::Vpp,
        on: true,
    });
    assert!(host.board.socket().pins().vpp);
}

#[test]
fn test_bus_primitives() {
    let mut host = Host::start(Board::default());
    host.ok(Command::AddrSet(0x12345));
    assert_eq!(host.board.socket().pins().address, 0x12345);
    host.ok(Command::AddrIncrement);
    assert_eq!(host.board.socket().pins().address, 0x12346);
    host.ok(Command::AddrClear);
    assert_eq!(host.board.socket().pins().address, 0);

    host.ok(Command::DataSet(0xA5));
    assert_eq!(host.board.socket().pins().data & 0xFF, 0xA5);
    assert_eq!(host.ok(Command::DataGet), Reply::Byte(0xA5));

    host.ok(Command::Control {
        line: ufprog_core::bus::ControlLine::Oe,
        active: true,
    });
    assert!(host.board.socket().pins().oe);
}

fn wait_settled(host: &mut Host, rail: Rail) -> ufprog_core::regulator::RegulatorStatus {
    for _ in 0..400 {
        let status = host.ok(Command::GetStatus(rail)).status().unwrap();
        assert_eq!(status.fault, None);
        if status.phase == Phase::Settled {
            return status;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    panic!("{:?} did not settle", rail);
}

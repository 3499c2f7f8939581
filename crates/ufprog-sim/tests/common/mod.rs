//! Host side of the integration tests: raw frames over an in-process pipe

#![allow(dead_code)]

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ufprog_core::device::{DeviceFlags, Family};
use ufprog_core::protocol::{
    decode_response, schema_len, Command, Reply, ERROR_PAYLOAD, RESP_ERROR, RESP_OK,
};
use ufprog_core::Error;
use ufprog_sim::link::{self, PipeEnd};
use ufprog_sim::Board;

pub struct Host {
    pub board: Arc<Board>,
    link: PipeEnd,
    stop: Arc<AtomicBool>,
    server: Option<JoinHandle<ufprog_sim::Result<()>>>,
}

impl Host {
    pub fn start(board: Board) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let board = Arc::new(board);
        let timeout = Duration::from_millis(board.config().frame_timeout_ms as u64);
        let (host, device) = link::pipe(timeout);
        let mut host = host;
        host.set_timeout(Duration::from_secs(20));
        let stop = Arc::new(AtomicBool::new(false));
        let server = {
            let board = board.clone();
            let stop = stop.clone();
            thread::spawn(move || board.serve(device, &stop))
        };
        Self {
            board,
            link: host,
            stop,
            server: Some(server),
        }
    }

    /// Send raw bytes and read back `len` response bytes
    pub fn raw(&mut self, bytes: &[u8], len: usize) -> Vec<u8> {
        self.link.write_all(bytes).unwrap();
        let mut out = vec![0u8; len];
        self.link.read_exact(&mut out).unwrap();
        out
    }

    pub fn request(&mut self, command: Command) -> Result<Reply, Error> {
        let opcode = command.opcode();
        self.link.write_all(&command.encode().unwrap()).unwrap();
        let mut status = [0u8; 1];
        self.link.read_exact(&mut status).unwrap();
        let len = match status[0] {
            RESP_OK => schema_len(opcode.response()),
            RESP_ERROR => ERROR_PAYLOAD,
            other => panic!("bad status byte 0x{:02X}", other),
        };
        let mut frame = vec![status[0]; len + 1];
        self.link.read_exact(&mut frame[1..]).unwrap();
        decode_response(opcode, &frame)
    }

    pub fn ok(&mut self, command: Command) -> Reply {
        match self.request(command) {
            Ok(reply) => reply,
            Err(e) => panic!("{:?} failed: {}", command, e),
        }
    }

    pub fn configure(&mut self, family: Family, size: u32) {
        self.configure_with(family, family.default_flags(), size, 0);
    }

    pub fn configure_with(&mut self, family: Family, flags: DeviceFlags, size: u32, sector: u32) {
        self.ok(Command::Configure {
            family,
            flags,
            size,
            sector_size: sector,
        });
    }

    /// Fill the staging buffer from `data`
    pub fn stage(&mut self, data: &[u8]) {
        self.ok(Command::BufClear);
        for (i, block) in data.chunks(16).enumerate() {
            let mut padded = [0u8; 16];
            padded[..block.len()].copy_from_slice(block);
            let mut words = [0u32; 4];
            for (word, bytes) in words.iter_mut().zip(padded.chunks_exact(4)) {
                *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
            self.ok(Command::BufWrite {
                offset: (i * 16) as u16,
                words,
            });
        }
    }

    /// First `len` bytes of the staging buffer
    pub fn fetch(&mut self, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for offset in (0..len).step_by(16) {
            let words = self
                .ok(Command::BufRead {
                    offset: offset as u16,
                })
                .block()
                .unwrap();
            out.extend(words.iter().flat_map(|w| w.to_le_bytes()));
        }
        out.truncate(len);
        out
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(server) = self.server.take() {
            let _ = server.join();
        }
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

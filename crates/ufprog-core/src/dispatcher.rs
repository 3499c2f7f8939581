//! Frame dispatcher (Context B)
//!
//! Reads one request from the transport, hands the decoded [`Command`] to an
//! [`Executor`] and writes the response back. Requests are strictly
//! sequential: the next opcode byte is not read before the previous response
//! has been flushed.
//!
//! The transport's read timeout doubles as the frame payload timeout. While
//! waiting for an opcode a timeout just means the host is quiet; once the
//! opcode is in, a timeout before the payload is complete answers
//! `MalformedFrame` without executing anything.

use embedded_io::{Error as _, ErrorKind, Read, Write};

use crate::error::Error;
use crate::programmer::Executor;
use crate::protocol::{encode_error, encode_response, schema_len, Command, Frame, Opcode};

/// Largest request payload (`BufWrite`)
const MAX_PAYLOAD: usize = 18;

/// Outcome of one [`Dispatcher::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// No request arrived before the transport timed out
    Idle,
    /// A request was answered
    Handled,
    /// The transport reached end of stream
    Closed,
}

/// Request/response loop over a byte stream
pub struct Dispatcher<T, E> {
    transport: T,
    executor: E,
}

impl<T: Read + Write, E: Executor> Dispatcher<T, E> {
    /// Dispatcher serving `executor` over `transport`
    pub fn new(transport: T, executor: E) -> Self {
        Self {
            transport,
            executor,
        }
    }

    /// The executor
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Give back the transport and executor
    pub fn into_parts(self) -> (T, E) {
        (self.transport, self.executor)
    }

    /// Serve requests until the transport closes
    pub fn run(&mut self) -> Result<(), T::Error> {
        loop {
            if self.poll()? == Poll::Closed {
                log::info!("dispatcher: transport closed");
                return Ok(());
            }
        }
    }

    /// Wait for one request and answer it
    pub fn poll(&mut self) -> Result<Poll, T::Error> {
        let mut first = [0u8; 1];
        match self.transport.read(&mut first) {
            Ok(0) => return Ok(Poll::Closed),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(Poll::Idle),
            Err(e) => return Err(e),
        }

        let Some(opcode) = Opcode::from_u8(first[0]) else {
            log::warn!("dispatcher: unknown opcode 0x{:02X}", first[0]);
            self.reply(&encode_error(Error::MalformedFrame))?;
            return Ok(Poll::Handled);
        };

        let len = schema_len(opcode.request());
        let mut payload = [0u8; MAX_PAYLOAD];
        let got = self.read_payload(&mut payload[..len])?;
        let response = if got < len {
            log::warn!(
                "dispatcher: {:?} payload timed out after {} of {} bytes",
                opcode,
                got,
                len
            );
            encode_error(Error::MalformedFrame)
        } else {
            let result = Frame::decode_payload(opcode, &payload[..len])
                .and_then(|frame| Command::from_frame(&frame))
                .and_then(|command| self.executor.execute(command));
            if let Err(e) = &result {
                log::debug!("dispatcher: {:?} -> {}", opcode, e);
            }
            encode_response(opcode, result)
        };
        self.reply(&response)?;
        Ok(Poll::Handled)
    }

    /// Fill `buf`, stopping early on timeout or end of stream
    fn read_payload(&mut self, buf: &mut [u8]) -> Result<usize, T::Error> {
        let mut got = 0;
        while got < buf.len() {
            match self.transport.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }
        Ok(got)
    }

    fn reply(&mut self, bytes: &[u8]) -> Result<(), T::Error> {
        self.transport.write_all(bytes)?;
        self.transport.flush()
    }
}

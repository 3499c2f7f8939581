//! Byte-stream transports into a simulated board
//!
//! [`pipe`] joins a host and a board in the same process. [`TcpLink`] serves
//! a board to a remote host over TCP. Both present the `embedded-io` traits
//! the dispatcher expects, with a read timeout reported as
//! [`ErrorKind::TimedOut`] and a closed peer as end of stream.

use std::collections::VecDeque;
use std::io;
use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use embedded_io::{ErrorKind, ErrorType};

#[derive(Debug, Default)]
struct Queue {
    bytes: VecDeque<u8>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Channel {
    queue: Mutex<Queue>,
    ready: Condvar,
}

impl Channel {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }
}

/// One end of an in-process byte pipe
#[derive(Debug)]
pub struct PipeEnd {
    rx: Arc<Channel>,
    tx: Arc<Channel>,
    timeout: Duration,
}

/// Two connected ends; reads on either wait at most `timeout`
pub fn pipe(timeout: Duration) -> (PipeEnd, PipeEnd) {
    let a = Arc::new(Channel::default());
    let b = Arc::new(Channel::default());
    (
        PipeEnd {
            rx: a.clone(),
            tx: b.clone(),
            timeout,
        },
        PipeEnd {
            rx: b,
            tx: a,
            timeout,
        },
    )
}

impl PipeEnd {
    /// Change the read timeout of this end
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        if buf.is_empty() {
            return Ok(0);
        }
        let queue = self.rx.lock();
        let (mut queue, _) = self
            .rx
            .ready
            .wait_timeout_while(queue, self.timeout, |q| q.bytes.is_empty() && !q.closed)
            .unwrap_or_else(|p| p.into_inner());
        if queue.bytes.is_empty() {
            return if queue.closed {
                Ok(0)
            } else {
                Err(ErrorKind::TimedOut)
            };
        }
        let n = buf.len().min(queue.bytes.len());
        for (slot, byte) in buf.iter_mut().zip(queue.bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, ErrorKind> {
        let mut queue = self.tx.lock();
        if queue.closed {
            return Err(ErrorKind::BrokenPipe);
        }
        queue.bytes.extend(buf);
        drop(queue);
        self.tx.ready.notify_all();
        Ok(buf.len())
    }
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        self.rx.close();
        self.tx.close();
    }
}

impl ErrorType for PipeEnd {
    type Error = ErrorKind;
}

impl embedded_io::Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        self.receive(buf)
    }
}

impl embedded_io::Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorKind> {
        self.send(buf)
    }

    fn flush(&mut self) -> Result<(), ErrorKind> {
        Ok(())
    }
}

impl io::Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.receive(buf).map_err(io_error)
    }
}

impl io::Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf).map_err(io_error)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn io_error(kind: ErrorKind) -> io::Error {
    match kind {
        ErrorKind::TimedOut => io::Error::new(io::ErrorKind::TimedOut, "pipe read timed out"),
        ErrorKind::BrokenPipe => io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"),
        other => io::Error::new(io::ErrorKind::Other, format!("{:?}", other)),
    }
}

/// Board side of a TCP connection
#[derive(Debug)]
pub struct TcpLink {
    stream: TcpStream,
}

impl TcpLink {
    /// Serve over `stream`, with `timeout` as the read timeout
    pub fn new(stream: TcpStream, timeout: Duration) -> io::Result<Self> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

fn embedded_kind(e: &io::Error) -> ErrorKind {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ErrorKind::TimedOut,
        io::ErrorKind::BrokenPipe => ErrorKind::BrokenPipe,
        io::ErrorKind::ConnectionReset => ErrorKind::ConnectionReset,
        io::ErrorKind::ConnectionAborted => ErrorKind::ConnectionAborted,
        io::ErrorKind::Interrupted => ErrorKind::Interrupted,
        _ => ErrorKind::Other,
    }
}

impl ErrorType for TcpLink {
    type Error = ErrorKind;
}

impl embedded_io::Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ErrorKind> {
        io::Read::read(&mut self.stream, buf).map_err(|e| embedded_kind(&e))
    }
}

impl embedded_io::Write for TcpLink {
    fn write(&mut self, buf: &[u8]) -> Result<usize, ErrorKind> {
        io::Write::write(&mut self.stream, buf).map_err(|e| embedded_kind(&e))
    }

    fn flush(&mut self) -> Result<(), ErrorKind> {
        io::Write::flush(&mut self.stream).map_err(|e| embedded_kind(&e))
    }
}

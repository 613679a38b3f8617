//! Stream (TCP) subscriber protocol (§4.G): greeting, address-line
//! subscribe, linked `input` forwarding, ported from the reference's
//! `client_t` / `client_read` / `client_create`.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpStream;

use crate::tree::NodeHandle;

const VERSION_STRING: &str = "Info Beamer";
const INFO_URL: &str = "http://info-beamer.org/";

pub fn greeting(pid: u32) -> String {
    format!("{VERSION_STRING} ({INFO_URL}) [pid {pid}]. Select your channel!\n")
}

/// One connected stream subscriber. Holds a line-buffering read
/// accumulator and an opportunistically-flushed write queue, the
/// non-blocking analogue of `bufferevent`.
pub struct Client {
    pub socket: TcpStream,
    pub read_buf: Vec<u8>,
    pub write_queue: VecDeque<u8>,
    /// Once set, this client is subscribed for good (§9 resolved Open
    /// Question): a later address-shaped line is delivered as a plain
    /// `input` line, never re-subscribes.
    pub linked: Option<NodeHandle>,
}

impl Client {
    pub fn new(socket: TcpStream, pid: u32) -> std::io::Result<Self> {
        socket.set_nonblocking(true)?;
        let mut client = Self {
            socket,
            read_buf: Vec::new(),
            write_queue: VecDeque::new(),
            linked: None,
        };
        client.queue_write(greeting(pid).as_bytes());
        Ok(client)
    }

    pub fn queue_write(&mut self, data: &[u8]) {
        self.write_queue.extend(data);
    }

    /// Flushes as much of the pending write queue as the socket accepts
    /// right now, without blocking.
    pub fn flush(&mut self) {
        while !self.write_queue.is_empty() {
            let chunk: Vec<u8> = self.write_queue.iter().copied().collect();
            match self.socket.write(&chunk) {
                Ok(0) => break,
                Ok(n) => {
                    self.write_queue.drain(..n);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    /// Reads whatever is available non-blockingly and splits out
    /// complete LF-terminated lines, leaving any partial tail buffered.
    pub fn read_lines(&mut self) -> Vec<String> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.socket.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }

        let mut lines = Vec::new();
        while let Some(pos) = self.read_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.read_buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            lines.push(line);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_includes_pid() {
        let line = greeting(1234);
        assert!(line.contains("1234"));
        assert!(line.ends_with("Select your channel!\n"));
    }
}

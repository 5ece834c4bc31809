//! In-memory non-blocking socket double for client transport tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crate::client::transport::Socket;

#[derive(Debug)]
struct Shared {
    to_client: VecDeque<u8>,
    from_client: Vec<u8>,
    read_chunk: usize,
    write_chunk: usize,
    writable: bool,
    hung_up: bool,
    shut_down: bool,
}

/// Client end of the pair. Reads return `WouldBlock` when nothing is queued.
#[derive(Debug)]
pub struct MemorySocket {
    shared: Arc<Mutex<Shared>>,
}

/// Test-side handle controlling what the client socket sees.
#[derive(Debug, Clone)]
pub struct Peer {
    shared: Arc<Mutex<Shared>>,
}

impl MemorySocket {
    pub fn pair() -> (MemorySocket, Peer) {
        let shared = Arc::new(Mutex::new(Shared {
            to_client: VecDeque::new(),
            from_client: Vec::new(),
            read_chunk: usize::MAX,
            write_chunk: usize::MAX,
            writable: true,
            hung_up: false,
            shut_down: false,
        }));
        (
            MemorySocket {
                shared: shared.clone(),
            },
            Peer { shared },
        )
    }
}

impl Read for MemorySocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut shared = self.shared.lock().unwrap();
        if shared.to_client.is_empty() {
            if shared.hung_up {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(shared.read_chunk).min(shared.to_client.len());
        for (slot, byte) in buf.iter_mut().zip(shared.to_client.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemorySocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut shared = self.shared.lock().unwrap();
        if shared.shut_down || shared.hung_up {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if !shared.writable {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(shared.write_chunk);
        shared.from_client.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Socket for MemorySocket {
    fn is_connected(&self) -> bool {
        let shared = self.shared.lock().unwrap();
        !shared.hung_up && !shared.shut_down
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.shared.lock().unwrap().shut_down = true;
        Ok(())
    }
}

impl Peer {
    /// Queue bytes for the client to read.
    pub fn send(&self, bytes: &[u8]) {
        self.shared.lock().unwrap().to_client.extend(bytes.iter().copied());
    }

    /// Drain everything the client has written so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.shared.lock().unwrap().from_client)
    }

    /// Bytes queued for the client that it has not read yet.
    pub fn unread(&self) -> usize {
        self.shared.lock().unwrap().to_client.len()
    }

    /// Cap how many bytes a single client read returns.
    pub fn set_read_chunk(&self, n: usize) {
        self.shared.lock().unwrap().read_chunk = n;
    }

    /// Cap how many bytes a single client write accepts.
    pub fn set_write_chunk(&self, n: usize) {
        self.shared.lock().unwrap().write_chunk = n;
    }

    pub fn set_writable(&self, writable: bool) {
        self.shared.lock().unwrap().writable = writable;
    }

    /// Close the peer side: pending bytes stay readable, then EOF.
    pub fn hang_up(&self) {
        self.shared.lock().unwrap().hung_up = true;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().unwrap().shut_down
    }
}

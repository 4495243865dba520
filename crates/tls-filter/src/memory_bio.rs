//! The in-memory BIO bridge: a read queue and a write queue exposed through
//! ordinary `Read`/`Write`
//! so the `openssl` crate's `SslStream` can drive the handshake and
//! record layer without ever touching a real socket — the session's own
//! pump methods move bytes between these queues and the filter's
//! chained/sub-pipeline targets.

use pipeline::data::{Chunk, Data};
use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::rc::Rc;

#[derive(Default)]
pub struct MemoryBio {
    /// Ciphertext fed in from the peer; read by the SSL engine (rbio).
    inbound: RefCell<Data>,
    /// Ciphertext produced by the SSL engine, awaiting delivery (wbio).
    outbound: RefCell<Data>,
}

impl MemoryBio {
    pub fn new() -> Rc<MemoryBio> {
        Rc::new(MemoryBio::default())
    }

    pub fn feed_inbound(&self, mut data: Data) {
        self.inbound.borrow_mut().push(&mut data);
    }

    /// Drains everything the SSL engine has written so far.
    pub fn take_outbound(&self) -> Data {
        let mut taken = Data::new();
        taken.push(&mut self.outbound.borrow_mut());
        taken
    }
}

/// A cheap handle to a `MemoryBio`, implementing `Read`/`Write` so it can
/// be handed to `Ssl::accept`/`Ssl::connect`/`SslStream`. `read` reports
/// `WouldBlock` when the inbound queue is empty — exactly the condition
/// under which the handshake/pump loops must park rather than spin.
#[derive(Clone)]
pub struct BioStream(pub Rc<MemoryBio>);

impl Read for BioStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inbound = self.0.inbound.borrow_mut();
        if inbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no ciphertext available"));
        }
        let want = buf.len().min(inbound.size());
        let mut copied = 0;
        for chunk in inbound.chunks() {
            if copied >= want {
                break;
            }
            let take = chunk.len().min(want - copied);
            buf[copied..copied + take].copy_from_slice(&chunk[..take]);
            copied += take;
        }
        inbound.shift(copied);
        Ok(copied)
    }
}

impl Write for BioStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .outbound
            .borrow_mut()
            .push_chunk(Chunk::from_vec(buf.to_vec()));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_reports_would_block_on_empty_inbound() {
        let bio = MemoryBio::new();
        let mut stream = BioStream(bio);
        let mut buf = [0u8; 16];
        let err = stream.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn write_then_take_outbound_round_trips() {
        let bio = MemoryBio::new();
        let mut stream = BioStream(bio.clone());
        stream.write_all(b"hello").unwrap();
        let out = bio.take_outbound();
        assert_eq!(out.to_vec(), b"hello");
        assert!(bio.take_outbound().is_empty());
    }

    #[test]
    fn feed_inbound_then_read_drains_it() {
        let bio = MemoryBio::new();
        bio.feed_inbound(Data::from_bytes(b"abc".to_vec()));
        let mut stream = BioStream(bio);
        let mut buf = [0u8; 2];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..n], b"ab");
    }
}

//! Asynchronous file/socket stream adapter. Bridges a real
//! `tokio` `AsyncRead + AsyncWrite` transport into the event pipeline:
//! inbound bytes become `Data` events delivered to a downstream
//! `EventTarget`; `Data`/`StreamEnd` events received as input are written
//! out to the transport. Grounded on this codebase's own read/write pump
//! idiom, generalized to a Receiving/Pausing/Paused tap state machine.

use pipeline::data::{Data, Producer, RECEIVE_BUFFER_SIZE};
use pipeline::event::{Event, StreamEnd};
use pipeline::filter::EventTarget;
use pipeline::reactor::ReactorHandle;
use pipeline::tap::Tap;
use pipeline::ErrorKind;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

pub const DEFAULT_BUFFER_LIMIT: usize = 512 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Receiving,
    Pausing,
    Paused,
    Closed,
}

/// Options controlling read-limit, write buffering and handle ownership.
#[derive(Clone, Debug)]
pub struct NetStreamOptions {
    pub read_limit: Option<u64>,
    pub buffer_limit: usize,
    pub no_close: bool,
}

impl Default for NetStreamOptions {
    fn default() -> Self {
        NetStreamOptions {
            read_limit: None,
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            no_close: false,
        }
    }
}

/// Wraps a split `tokio` stream, pumping reads into the pipeline and
/// pipeline events out to the transport.
pub struct NetStream<S> {
    read_half: RefCell<Option<ReadHalf<S>>>,
    write_half: RefCell<WriteHalf<S>>,
    output: Rc<dyn EventTarget>,
    reactor: ReactorHandle,
    producer: std::sync::Arc<Producer>,

    state: Cell<State>,
    read_limit_remaining: Cell<Option<u64>>,
    write_buffer: RefCell<Data>,
    pumping: Cell<bool>,
    overflowed: Cell<bool>,
    ended: Cell<bool>,
    closed: Cell<bool>,
    buffer_limit: usize,
    no_close: bool,
    retain: RefCell<Option<Rc<NetStream<S>>>>,
    self_ref: Weak<NetStream<S>>,
}

impl<S> NetStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    pub fn new(stream: S, output: Rc<dyn EventTarget>, reactor: ReactorHandle) -> Rc<Self> {
        Self::with_options(stream, output, reactor, NetStreamOptions::default())
    }

    pub fn with_options(
        stream: S,
        output: Rc<dyn EventTarget>,
        reactor: ReactorHandle,
        options: NetStreamOptions,
    ) -> Rc<Self> {
        let (read_half, write_half) = tokio::io::split(stream);
        let this = Rc::new_cyclic(|weak| NetStream {
            read_half: RefCell::new(Some(read_half)),
            write_half: RefCell::new(write_half),
            output,
            reactor,
            producer: Producer::get("net-stream"),
            state: Cell::new(State::Receiving),
            read_limit_remaining: Cell::new(options.read_limit),
            write_buffer: RefCell::new(Data::new()),
            pumping: Cell::new(false),
            overflowed: Cell::new(false),
            ended: Cell::new(false),
            closed: Cell::new(false),
            buffer_limit: options.buffer_limit,
            no_close: options.no_close,
            retain: RefCell::new(None),
            self_ref: weak.clone(),
        });
        NetStream::spawn_read_loop(this.clone());
        this
    }

    fn spawn_read_loop(this: Rc<Self>) {
        this.reactor.clone().spawn_local(async move {
            this.read_loop().await;
        });
    }

    /// Issues one asynchronous read for up to
    /// `min(read_limit_remaining, RECEIVE_BUFFER_SIZE)` bytes per
    /// iteration; continues, pauses or finishes depending on the tap
    /// state and read limit after each completion.
    async fn read_loop(self: Rc<Self>) {
        loop {
            if self.state.get() == State::Closed {
                return;
            }
            let want = match self.read_limit_remaining.get() {
                Some(0) => {
                    self.finish(StreamEnd::no_error());
                    return;
                }
                Some(remaining) => remaining.min(RECEIVE_BUFFER_SIZE as u64) as usize,
                None => RECEIVE_BUFFER_SIZE,
            };

            let mut buf = self.producer.allocate(want);
            buf.resize(want, 0);
            let read_result = {
                let mut half = self.read_half.borrow_mut().take();
                let result = match half.as_mut() {
                    Some(h) => h.read(&mut buf).await,
                    None => return,
                };
                *self.read_half.borrow_mut() = half;
                result
            };

            match read_result {
                Ok(0) => {
                    self.finish(StreamEnd::no_error());
                    return;
                }
                Ok(n) => {
                    buf.truncate(n);
                    if let Some(remaining) = self.read_limit_remaining.get() {
                        self.read_limit_remaining.set(Some(remaining - n as u64));
                    }
                    let chunk = self.producer.make_chunk(buf);
                    self.output.input(Event::Data(Data::from_chunk(chunk)));

                    if self.read_limit_remaining.get() == Some(0) {
                        self.finish(StreamEnd::no_error());
                        return;
                    }
                    match self.state.get() {
                        State::Pausing => {
                            self.state.set(State::Paused);
                            *self.retain.borrow_mut() = Some(self.clone());
                            return;
                        }
                        State::Receiving => continue,
                        State::Paused | State::Closed => return,
                    }
                }
                Err(e) => {
                    let kind = classify_read_error(&e);
                    self.finish(StreamEnd::new(kind));
                    return;
                }
            }
        }
    }

    /// Enqueues `data` for output; drops it (after logging once) while
    /// the buffer is over `buffer_limit`, until the buffer has drained.
    pub fn write(&self, mut data: Data) {
        if self.closed.get() || self.overflowed.get() {
            return;
        }
        let mut buf = self.write_buffer.borrow_mut();
        buf.push(&mut data);
        let size = buf.size();
        drop(buf);
        if size > self.buffer_limit {
            self.overflowed.set(true);
            tracing::warn!(
                buffer_size = size,
                limit = self.buffer_limit,
                "net-stream write buffer overflow, dropping further writes until drain"
            );
        }
        self.need_flush();
    }

    /// Marks the stream as ended; closes immediately if the write buffer
    /// is already empty, otherwise closes once the buffer drains.
    pub fn end(&self) {
        self.ended.set(true);
        if self.write_buffer.borrow().is_empty() {
            self.close(None);
        } else {
            self.need_flush();
        }
    }

    fn need_flush(&self) {
        if !self.pumping.get() {
            self.schedule_pump();
        }
    }

    fn schedule_pump(&self) {
        if let Some(this) = self.self_ref.upgrade() {
            NetStream::resume_pump(this);
        }
    }

    /// Coalesces the write buffer into one asynchronous write; at most one
    /// outstanding write at a time.
    async fn pump(self: Rc<Self>) {
        if self.pumping.get() || self.closed.get() {
            return;
        }
        if self.write_buffer.borrow().is_empty() {
            if self.ended.get() {
                self.close(None);
            }
            return;
        }
        self.pumping.set(true);
        let bytes = self.write_buffer.borrow().to_vec();
        let result = {
            let mut half = self.write_half.borrow_mut();
            half.write(&bytes).await
        };
        self.pumping.set(false);

        match result {
            Ok(0) => {
                self.finish(StreamEnd::new(ErrorKind::WriteError));
            }
            Ok(n) => {
                self.write_buffer.borrow_mut().shift(n);
                let remaining = self.write_buffer.borrow().size();
                if self.overflowed.get() && remaining <= self.buffer_limit {
                    self.overflowed.set(false);
                }
                if remaining > 0 {
                    NetStream::resume_pump(self.clone());
                } else if self.ended.get() {
                    self.close(None);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "net-stream write error");
                self.finish(StreamEnd::new(ErrorKind::WriteError));
            }
        }
    }

    fn resume_pump(this: Rc<Self>) {
        this.reactor.clone().spawn_local(async move {
            this.pump().await;
        });
    }

    fn finish(&self, end: StreamEnd) {
        self.output.input(Event::StreamEnd(end.clone()));
        self.close(Some(end));
    }

    /// Idempotent. Releases the OS handle unless `no_close`; releases the
    /// pause retain if currently `Paused`.
    pub fn close(&self, _end: Option<StreamEnd>) {
        if self.closed.get() {
            return;
        }
        self.closed.set(true);
        self.state.set(State::Closed);
        if !self.no_close {
            // Dropping both halves releases the underlying fd/handle once
            // any in-flight read/write task holding the other half exits.
            self.read_half.borrow_mut().take();
        }
        self.retain.borrow_mut().take();
    }
}

fn classify_read_error(e: &std::io::Error) -> ErrorKind {
    use std::io::ErrorKind as IoKind;
    match e.kind() {
        IoKind::BrokenPipe | IoKind::ConnectionReset | IoKind::UnexpectedEof => {
            ErrorKind::NoError
        }
        _ => ErrorKind::ReadError,
    }
}

/// Consumes `Data`/`StreamEnd` events arriving from the pipeline side and
/// writes them out to the transport.
impl<S> EventTarget for NetStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    fn input(&self, event: Event) {
        match event {
            Event::Data(data) => self.write(data),
            Event::StreamEnd(_) => self.end(),
            Event::MessageStart | Event::MessageEnd | Event::Flush => {}
        }
    }
}

impl<S> Tap for NetStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + 'static,
{
    fn on_tap_close(&self) {
        if self.state.get() == State::Receiving {
            self.state.set(State::Pausing);
        }
    }

    fn on_tap_open(&self) {
        match self.state.get() {
            State::Paused => {
                self.state.set(State::Receiving);
                if let Some(this) = self.retain.borrow_mut().take() {
                    NetStream::spawn_read_loop(this);
                }
            }
            State::Pausing => {
                self.state.set(State::Receiving);
            }
            State::Receiving | State::Closed => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::reactor::Reactor;
    use std::time::Duration;

    #[derive(Default)]
    struct Collector(RefCell<Vec<Event>>);

    impl Collector {
        fn events(&self) -> Vec<Event> {
            self.0.borrow().clone()
        }

        fn bytes(&self) -> Vec<u8> {
            self.events()
                .iter()
                .filter_map(|e| e.as_data())
                .flat_map(|d| d.to_vec())
                .collect()
        }
    }

    impl EventTarget for Collector {
        fn input(&self, event: Event) {
            self.0.borrow_mut().push(event);
        }
    }

    // A tap closed mid-stream stops further reads once the in-flight one
    // completes, and reopening resumes with nothing lost.
    #[tokio::test]
    async fn tap_close_then_open_loses_nothing() {
        let reactor = Reactor::new();
        let (mut peer, stream_half) = tokio::io::duplex(8192);
        let collector = Rc::new(Collector::default());
        let net = NetStream::new(stream_half, collector.clone(), reactor.clone());

        reactor
            .run_until(async {
                peer.write_all(b"first-chunk").await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;

                // Closes the tap while the read loop is parked awaiting its
                // next read; no in-flight read to interrupt here, so this
                // takes effect the moment that next read would complete.
                net.on_tap_close();

                peer.write_all(b"second-chunk").await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;

                // Paused: further bytes sit in the duplex, unread.
                peer.write_all(b"third-chunk").await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;

                net.on_tap_open();
                tokio::time::sleep(Duration::from_millis(5)).await;
            })
            .await;

        assert_eq!(collector.bytes(), b"first-chunksecond-chunkthird-chunk");
    }

    // Writes past buffer_limit are dropped until the peer drains below
    // it; the connection is not torn down.
    #[tokio::test]
    async fn write_overflow_drops_until_drain() {
        let reactor = Reactor::new();
        let (mut peer, stream_half) = tokio::io::duplex(64);
        let collector = Rc::new(Collector::default());
        let options = NetStreamOptions {
            buffer_limit: 1024,
            ..Default::default()
        };
        let net = NetStream::with_options(stream_half, collector.clone(), reactor.clone(), options);

        // Draining `peer` has to happen while the reactor keeps polling
        // `net`'s own pump-retry tasks, so the whole exchange — including
        // the drain — runs inside one `run_until`.
        let received = reactor
            .run_until(async move {
                // The duplex's own tiny capacity (64 bytes) means this quickly
                // outpaces what `pump()` can flush in one write, so most of
                // it piles up in the write buffer past `buffer_limit`.
                net.write(Data::from_bytes(vec![b'x'; 2048]));
                tokio::time::sleep(Duration::from_millis(5)).await;

                // Dropped: buffer is over limit.
                net.write(Data::from_bytes(vec![b'y'; 16]));

                let mut received = Vec::new();
                let mut buf = [0u8; 256];
                loop {
                    match tokio::time::timeout(Duration::from_millis(50), peer.read(&mut buf)).await
                    {
                        Ok(Ok(0)) | Err(_) => break,
                        Ok(Ok(n)) => {
                            received.extend_from_slice(&buf[..n]);
                            if received.len() >= 2048 {
                                break;
                            }
                        }
                        Ok(Err(e)) => panic!("peer read failed: {e}"),
                    }
                }
                received
            })
            .await;

        assert_eq!(received.len(), 2048);
        assert!(received.iter().all(|&b| b == b'x'));
    }
}

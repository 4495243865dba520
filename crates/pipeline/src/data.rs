//! `Data` is an ordered sequence of reference-counted byte chunks.
//! `push`/`shift`/`pop` never copy chunk payloads; `shift`/`pop` only
//! adjust a chunk's head offset or length. Chunks come from a `Producer`
//! free-list keyed by label and are returned to it when their last
//! reference drops, mirroring the `SegQueue`-backed recycled-buffer pools
//! used elsewhere in this codebase's allocator layer.

use crossbeam_queue::SegQueue;
use std::collections::hash_map::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};

pub const RECEIVE_BUFFER_SIZE: usize = 16 * 1024;
const MAX_POOLED_CHUNKS: usize = 256;

struct ChunkInner {
    buf: Vec<u8>,
    producer: Option<Arc<Producer>>,
}

impl Drop for ChunkInner {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            let mut buf = std::mem::take(&mut self.buf);
            buf.clear();
            producer.recycle(buf);
        }
    }
}

/// One reference-counted, append-only byte buffer with a head/tail window.
#[derive(Clone)]
pub struct Chunk {
    inner: Arc<ChunkInner>,
    offset: usize,
    len: usize,
}

impl Chunk {
    /// Wraps an owned buffer as a chunk with no producer (not pooled).
    pub fn from_vec(buf: Vec<u8>) -> Self {
        let len = buf.len();
        Chunk {
            inner: Arc::new(ChunkInner { buf, producer: None }),
            offset: 0,
            len,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner.buf[self.offset..self.offset + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn shift_front(&mut self, n: usize) {
        let n = n.min(self.len);
        self.offset += n;
        self.len -= n;
    }

    fn shrink_back(&mut self, n: usize) {
        self.len = self.len.saturating_sub(n);
    }
}

/// A named allocator for `Data` chunks. Producers are process-wide,
/// addressed by label, and own a free-list of recycled chunk buffers.
pub struct Producer {
    #[allow(dead_code)]
    label: String,
    chunk_size: usize,
    pool: SegQueue<Vec<u8>>,
}

static PRODUCERS: OnceLock<Mutex<HashMap<String, Arc<Producer>>>> = OnceLock::new();

impl Producer {
    /// Looks up (or creates) the process-wide producer for `label`.
    pub fn get(label: &str) -> Arc<Producer> {
        Self::get_with_chunk_size(label, RECEIVE_BUFFER_SIZE)
    }

    pub fn get_with_chunk_size(label: &str, chunk_size: usize) -> Arc<Producer> {
        let registry = PRODUCERS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut guard = registry.lock().unwrap();
        guard
            .entry(label.to_string())
            .or_insert_with(|| {
                Arc::new(Producer {
                    label: label.to_string(),
                    chunk_size,
                    pool: SegQueue::new(),
                })
            })
            .clone()
    }

    /// Takes a buffer from the free list, or allocates a fresh one sized
    /// to at least `capacity`.
    pub fn allocate(self: &Arc<Self>, capacity: usize) -> Vec<u8> {
        if let Some(mut buf) = self.pool.pop() {
            if buf.capacity() < capacity {
                buf.reserve(capacity - buf.capacity());
            }
            buf
        } else {
            Vec::with_capacity(capacity.max(self.chunk_size))
        }
    }

    /// Wraps `buf` as a chunk that returns to this producer's pool on drop.
    pub fn make_chunk(self: &Arc<Self>, buf: Vec<u8>) -> Chunk {
        let len = buf.len();
        Chunk {
            inner: Arc::new(ChunkInner {
                buf,
                producer: Some(self.clone()),
            }),
            offset: 0,
            len,
        }
    }

    fn recycle(&self, buf: Vec<u8>) {
        if self.pool.len() < MAX_POOLED_CHUNKS {
            self.pool.push(buf);
        }
    }
}

/// An ordered sequence of chunks with O(1) push/shift/pop and a running
/// size counter.
#[derive(Clone, Default)]
pub struct Data {
    chunks: VecDeque<Chunk>,
    size: usize,
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data").field("size", &self.size).finish()
    }
}

impl Data {
    pub fn new() -> Self {
        Data::default()
    }

    pub fn from_chunk(chunk: Chunk) -> Self {
        let mut d = Data::default();
        d.push_chunk(chunk);
        d
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Data::from_chunk(Chunk::from_vec(bytes.into()))
    }

    pub fn push_chunk(&mut self, chunk: Chunk) {
        if chunk.is_empty() {
            return;
        }
        self.size += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Moves all chunks of `other` onto `self`; `other` becomes empty.
    pub fn push(&mut self, other: &mut Data) {
        self.size += other.size;
        self.chunks.append(&mut other.chunks);
        other.size = 0;
    }

    /// Removes up to `n` bytes from the front, in place.
    pub fn shift(&mut self, n: usize) {
        let mut remaining = n.min(self.size);
        self.size -= remaining;
        while remaining > 0 {
            let front_len = match self.chunks.front() {
                Some(c) => c.len(),
                None => break,
            };
            if front_len <= remaining {
                self.chunks.pop_front();
                remaining -= front_len;
            } else {
                let front = self.chunks.front_mut().unwrap();
                front.shift_front(remaining);
                remaining = 0;
            }
        }
    }

    /// Removes up to `n` bytes from the back, used after a partial read
    /// into a pre-sized buffer shrinks the actual byte count.
    pub fn pop(&mut self, n: usize) {
        let mut remaining = n.min(self.size);
        self.size -= remaining;
        while remaining > 0 {
            let back_len = match self.chunks.back() {
                Some(c) => c.len(),
                None => break,
            };
            if back_len <= remaining {
                self.chunks.pop_back();
                remaining -= back_len;
            } else {
                let back = self.chunks.back_mut().unwrap();
                back.shrink_back(remaining);
                remaining = 0;
            }
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Lazy, chunk-granularity iteration.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().map(|c| c.as_bytes())
    }

    /// Copies the full contents out as a single owned buffer. Intended for
    /// tests and small diagnostic snapshots, not the hot path.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size);
        for c in self.chunks() {
            out.extend_from_slice(c);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_concatenates_and_empties_source() {
        let mut a = Data::from_bytes(b"hello".to_vec());
        let mut b = Data::from_bytes(b" world".to_vec());
        a.push(&mut b);
        assert_eq!(a.to_vec(), b"hello world");
        assert!(b.is_empty());
    }

    #[test]
    fn shift_across_chunk_boundary() {
        let mut d = Data::new();
        d.push_chunk(Chunk::from_vec(b"abc".to_vec()));
        d.push_chunk(Chunk::from_vec(b"def".to_vec()));
        d.push_chunk(Chunk::from_vec(b"ghi".to_vec()));
        d.shift(4);
        assert_eq!(d.size(), 5);
        let parts: Vec<Vec<u8>> = d.chunks().map(|c| c.to_vec()).collect();
        assert_eq!(parts, vec![b"ef".to_vec(), b"ghi".to_vec()]);
    }

    #[test]
    fn shift_to_size_empties_buffer() {
        let mut d = Data::from_bytes(b"hello".to_vec());
        d.shift(d.size());
        assert_eq!(d.size(), 0);
        assert!(d.is_empty());
    }

    #[test]
    fn pop_truncates_trailing_bytes() {
        let mut d = Data::from_bytes(b"hello world".to_vec());
        d.pop(6);
        assert_eq!(d.to_vec(), b"hello");
    }

    #[test]
    fn producer_recycles_chunk_buffers() {
        let producer = Producer::get("test-recycle");
        let buf = producer.allocate(64);
        let chunk = producer.make_chunk(buf);
        drop(chunk);
        let buf2 = producer.allocate(64);
        assert!(buf2.capacity() >= 64);
    }
}

//! A reader that caches fixed-size chunks fetched from a [`Loader`].

use crate::{Loader, Location, ReadError, ReadResult, Reader, SubReader};
use anyhow::{Result, ensure};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Default chunk size is 64 KiB.
pub const DEFAULT_CHUNK_SHIFT: u32 = 16;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// A reader whose bytes are fetched on demand.
///
/// Synchronous reads never block. If any chunk covering a read is not resident, the read fails
/// with [`ReadError::NotLoaded`] carrying the exact range it needed. Call
/// [`PagedReader::ensure_loaded`] (usually through [`crate::with_load_scope`]) to fetch it.
///
/// Clones share the chunk cache, as do all sub-views and stream readers built on top of this
/// reader.
#[derive(Clone)]
pub struct PagedReader {
    inner: Rc<PagedInner>,
}

struct PagedInner {
    source: u64,
    loader: Rc<dyn Loader>,
    size: u64,
    chunk_shift: u32,
    chunks: RefCell<HashMap<u64, Chunk>>,
}

/// A chunk that is absent has no entry in the map. Once resident, a chunk stays resident.
enum Chunk {
    Fetching(Rc<Notify>),
    Resident(Rc<[u8]>),
}

enum Step {
    Done,
    Wait(Rc<Notify>),
    Fetch {
        first: u64,
        last: u64,
        notify: Rc<Notify>,
    },
}

impl PagedReader {
    /// Creates a reader with the default chunk size.
    pub fn new(loader: Rc<dyn Loader>) -> Self {
        Self::build(loader, DEFAULT_CHUNK_SHIFT)
    }

    /// Creates a reader with a specific chunk size, which must be a power of two.
    pub fn with_chunk_size(loader: Rc<dyn Loader>, chunk_size: u64) -> Result<Self> {
        ensure!(
            chunk_size.is_power_of_two(),
            "chunk size {chunk_size} is not a power of two"
        );
        Ok(Self::build(loader, chunk_size.trailing_zeros()))
    }

    fn build(loader: Rc<dyn Loader>, chunk_shift: u32) -> Self {
        Self {
            inner: Rc::new(PagedInner {
                source: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
                size: loader.size(),
                loader,
                chunk_shift,
                chunks: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Identifies this reader (and its clones) in [`ReadError::NotLoaded`].
    pub fn source_id(&self) -> u64 {
        self.inner.source
    }

    /// The chunk size in bytes.
    pub fn chunk_size(&self) -> u64 {
        1 << self.inner.chunk_shift
    }

    /// Returns `true` if every byte of `offset..offset + len` is resident.
    pub fn is_loaded(&self, offset: u64, len: u64) -> bool {
        let Some((first, last)) = self.chunk_range(offset, len) else {
            return true;
        };
        let chunks = self.inner.chunks.borrow();
        (first..=last).all(|c| matches!(chunks.get(&c), Some(Chunk::Resident(_))))
    }

    /// The range of chunk indexes covering `offset..offset + len`, clipped to the source size.
    fn chunk_range(&self, offset: u64, len: u64) -> Option<(u64, u64)> {
        let end = offset.saturating_add(len).min(self.inner.size);
        if offset >= end {
            return None;
        }
        let shift = self.inner.chunk_shift;
        Some((offset >> shift, (end - 1) >> shift))
    }

    /// Fetches every chunk covering `offset..offset + len` that is not resident yet.
    ///
    /// Each run of adjacent absent chunks is fetched with a single [`Loader::read`]. Chunks that
    /// another caller is already fetching are not fetched again; this call waits for that fetch
    /// instead.
    pub async fn ensure_loaded(&self, offset: u64, len: u64) -> Result<()> {
        let Some((begin, end)) = self.chunk_range(offset, len) else {
            return Ok(());
        };

        loop {
            match self.plan(begin, end) {
                Step::Done => return Ok(()),
                Step::Wait(notify) => notify.notified().await,
                Step::Fetch {
                    first,
                    last,
                    notify,
                } => self.fetch(first, last, notify).await?,
            }
        }
    }

    /// Picks the next thing to do for chunks `begin..=end`: fetch the first run of absent chunks,
    /// wait for an in-flight fetch, or nothing.
    fn plan(&self, begin: u64, end: u64) -> Step {
        let mut chunks = self.inner.chunks.borrow_mut();

        let mut absent: Option<(u64, u64)> = None;
        let mut in_flight = None;
        for c in begin..=end {
            match chunks.get(&c) {
                None => match &mut absent {
                    Some((_, last)) if *last + 1 == c => *last = c,
                    Some(_) => {}
                    None => absent = Some((c, c)),
                },
                Some(Chunk::Fetching(notify)) => {
                    if in_flight.is_none() {
                        in_flight = Some(notify.clone());
                    }
                }
                Some(Chunk::Resident(_)) => {}
            }
        }

        if let Some((first, last)) = absent {
            let notify = Rc::new(Notify::new());
            for c in first..=last {
                chunks
                    .entry(c)
                    .or_insert_with(|| Chunk::Fetching(notify.clone()));
            }
            Step::Fetch {
                first,
                last,
                notify,
            }
        } else if let Some(notify) = in_flight {
            Step::Wait(notify)
        } else {
            Step::Done
        }
    }

    async fn fetch(&self, first: u64, last: u64, notify: Rc<Notify>) -> Result<()> {
        let shift = self.inner.chunk_shift;
        let start = first << shift;
        let end = ((last + 1) << shift).min(self.inner.size);
        trace!(start, end, "fetching chunks {first}..={last}");

        let result = self.inner.loader.read(start, end - start).await;
        let result = match result {
            Ok(data) if data.len() as u64 == end - start => Ok(data),
            Ok(data) => Err(anyhow::anyhow!(
                "loader returned {} bytes, expected {}",
                data.len(),
                end - start
            )),
            Err(e) => Err(e),
        };

        {
            let mut chunks = self.inner.chunks.borrow_mut();
            for c in first..=last {
                let ours =
                    matches!(chunks.get(&c), Some(Chunk::Fetching(n)) if Rc::ptr_eq(n, &notify));
                if !ours {
                    continue;
                }
                match &result {
                    Ok(data) => {
                        let chunk_start = ((c << shift) - start) as usize;
                        let chunk_end = (((c + 1) << shift).min(end) - start) as usize;
                        chunks.insert(c, Chunk::Resident(data[chunk_start..chunk_end].into()));
                    }
                    Err(_) => {
                        chunks.remove(&c);
                    }
                }
            }
        }
        notify.notify_waiters();

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!("fetch of 0x{start:x}..0x{end:x} failed: {e:#}");
                Err(e.context(format!("failed to fetch bytes 0x{start:x}..0x{end:x}")))
            }
        }
    }

    /// Runs `f` over the resident slices covering `offset..offset + len`, or faults if any of them
    /// is missing.
    fn with_chunks(&self, offset: u64, len: u64, f: &mut dyn FnMut(&[u8])) -> ReadResult<()> {
        self.check_range(offset, len)?;
        let Some((first, last)) = self.chunk_range(offset, len) else {
            return Ok(());
        };

        let chunks = self.inner.chunks.borrow();
        for c in first..=last {
            if !matches!(chunks.get(&c), Some(Chunk::Resident(_))) {
                return Err(self.not_loaded(offset, len));
            }
        }

        let shift = self.inner.chunk_shift;
        let end = offset + len;
        for c in first..=last {
            let Some(Chunk::Resident(data)) = chunks.get(&c) else {
                continue;
            };
            let chunk_start = c << shift;
            let lo = (offset.max(chunk_start) - chunk_start) as usize;
            let hi = (end.min(chunk_start + data.len() as u64) - chunk_start) as usize;
            f(&data[lo..hi]);
        }
        Ok(())
    }

    fn not_loaded(&self, offset: u64, len: u64) -> ReadError {
        ReadError::NotLoaded {
            source: self.inner.source,
            offset,
            len,
        }
    }

    fn read_array<const N: usize>(&self, offset: u64) -> ReadResult<[u8; N]> {
        let mut out = [0u8; N];
        let mut pos = 0;
        self.with_chunks(offset, N as u64, &mut |piece| {
            out[pos..pos + piece.len()].copy_from_slice(piece);
            pos += piece.len();
        })?;
        Ok(out)
    }
}

impl Reader for PagedReader {
    type Base = Self;

    fn size(&self) -> u64 {
        self.inner.size
    }

    fn locate(&self, offset: u64) -> Location {
        Location::at_file_offset(offset)
    }

    fn u8(&self, offset: u64) -> ReadResult<u8> {
        Ok(self.read_array::<1>(offset)?[0])
    }

    fn u16(&self, offset: u64) -> ReadResult<u16> {
        Ok(u16::from_le_bytes(self.read_array(offset)?))
    }

    fn u32(&self, offset: u64) -> ReadResult<u32> {
        Ok(u32::from_le_bytes(self.read_array(offset)?))
    }

    /// Searches one chunk at a time, so a search only faults on the chunk it actually needs next.
    fn find_byte(&self, value: u8, from: u64, to: Option<u64>) -> ReadResult<Option<u64>> {
        let to = to.unwrap_or(self.inner.size);
        self.check_range(from, to.saturating_sub(from))?;

        let shift = self.inner.chunk_shift;
        let mut pos = from;
        while pos < to {
            let chunk_start = (pos >> shift) << shift;
            let chunk_end = (chunk_start + (1 << shift)).min(to);
            let chunks = self.inner.chunks.borrow();
            let Some(Chunk::Resident(data)) = chunks.get(&(pos >> shift)) else {
                return Err(self.not_loaded(pos, chunk_end - pos));
            };
            let lo = (pos - chunk_start) as usize;
            let hi = (chunk_end - chunk_start) as usize;
            if let Some(i) = data[lo..hi].iter().position(|&b| b == value) {
                return Ok(Some(pos + i as u64));
            }
            pos = chunk_end;
        }
        Ok(None)
    }

    fn enumerate_bytes(&self, offset: u64, len: u64, f: &mut dyn FnMut(&[u8])) -> ReadResult<()> {
        self.with_chunks(offset, len, f)
    }

    fn sub_view(&self, offset: u64, len: Option<u64>) -> SubReader<Self> {
        SubReader::new(self.clone(), offset, len)
    }
}

impl std::fmt::Debug for PagedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedReader")
            .field("source", &self.inner.source)
            .field("size", &self.inner.size)
            .field("chunk_size", &self.chunk_size())
            .finish()
    }
}

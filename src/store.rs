//! Append-only circular record store over a flash region.
//!
//! Layout: the region is a ring of pages. Each page carries a 12-byte header
//! (magic, generation counter, header crc32) followed by record frames:
//!
//! ```text
//! [2B frame len][record payload] ... [0x00 filler to page end]
//! ```
//!
//! A frame length of 0x0000 is filler (page finalized), 0xFFFF is erased
//! tail. Records never straddle pages. The generation counter increases each
//! time a page is opened, which both orders pages for readback and marks
//! overwritten pages stale after wraparound.
//!
//! Write cursor invariants: inside an open page it points at the first
//! unwritten byte; otherwise it sits on a page boundary. A page is erased
//! exactly once before its first write in a cycle.

use crate::flash::{FlashDevice, FlashError, FlashRegion};
use crate::record::{decode, DecodedRecord, EncodedRecord, MAX_RECORD_LEN};

const PAGE_MAGIC: u16 = 0x464C; // "FL"

/// Page header: magic u16, reserved u16, generation u32, crc32 u32.
pub const PAGE_HEADER_LEN: u32 = 12;

/// Filler byte programmed over a finalized page tail.
pub const FILLER: u8 = 0x00;

const FRAME_FILLER: u16 = 0x0000;
const FRAME_ERASED: u16 = 0xFFFF;

/// Bounded attempts for one record on transient device faults.
pub const APPEND_RETRY_LIMIT: u32 = 3;

enum PageState {
    /// Erased, never written in this cycle.
    Empty,
    /// Header intact; carries its generation.
    Valid(u32),
    /// Non-erased header failing magic or checksum.
    Corrupt,
}

/// Outcome of a synchronous flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushReport {
    pub written: u32,
    pub dropped: u32,
}

/// Append-only circular store over one flash region.
pub struct FlashStore<D: FlashDevice> {
    dev: D,
    region: FlashRegion,
    wraparound: bool,
    /// Region-relative offset of the next write.
    cursor: u32,
    page_open: bool,
    next_gen: u32,
}

impl<D: FlashDevice> FlashStore<D> {
    /// Open a store over `region`, resuming after whatever a previous run
    /// left behind: the cursor lands after the newest intact record, and a
    /// torn trailing record is abandoned with the rest of its page tail.
    pub fn mount(dev: D, region: FlashRegion, wraparound: bool) -> Result<Self, FlashError> {
        debug_assert!(region.size > 0 && region.size % region.page_size == 0);

        let mut store = Self {
            dev,
            region,
            wraparound,
            cursor: 0,
            page_open: false,
            next_gen: 1,
        };

        let mut newest: Option<(u32, u32)> = None;
        for page in 0..region.page_count() {
            if let PageState::Valid(gen) = store.page_state(page)? {
                if newest.map_or(true, |(_, g)| gen > g) {
                    newest = Some((page, gen));
                }
            }
        }

        if let Some((page, gen)) = newest {
            store.next_gen = gen.wrapping_add(1);
            store.resume_in_page(page)?;
        }
        Ok(store)
    }

    /// Append one record at the cursor, finalizing and advancing pages as
    /// needed. With wraparound enabled this never reports the region full;
    /// the oldest page is erased and reused instead.
    pub fn append(&mut self, rec: &EncodedRecord) -> Result<(), FlashError> {
        debug_assert!(!rec.is_empty());
        let frame_len = 2 + rec.len() as u32;

        loop {
            if self.page_open && self.cursor % self.region.page_size == 0 {
                // The last frame ended exactly on the boundary; the page is
                // complete with zero padding.
                self.page_open = false;
            }
            if self.cursor >= self.region.size {
                if !self.wraparound {
                    return Err(FlashError::RegionFull);
                }
                self.cursor = 0;
            }
            if !self.page_open {
                self.open_page()?;
            }

            let page_end = self.page_end(self.cursor);
            if self.cursor + frame_len <= page_end {
                let mut frame = [0u8; 2 + MAX_RECORD_LEN];
                frame[..2].copy_from_slice(&(rec.len() as u16).to_le_bytes());
                frame[2..2 + rec.len()].copy_from_slice(rec.as_bytes());
                self.dev
                    .program(self.abs(self.cursor), &frame[..frame_len as usize])?;
                self.cursor += frame_len;
                return Ok(());
            }

            self.finalize_page(page_end)?;
        }
    }

    /// [`append`](Self::append) with up to [`APPEND_RETRY_LIMIT`] attempts on
    /// transient device faults. `RegionFull` is never retried.
    pub fn append_with_retry(&mut self, rec: &EncodedRecord) -> Result<(), FlashError> {
        let mut attempts = 0;
        loop {
            match self.append(rec) {
                Err(FlashError::DeviceFault) => {
                    attempts += 1;
                    if attempts >= APPEND_RETRY_LIMIT {
                        return Err(FlashError::DeviceFault);
                    }
                }
                other => return other,
            }
        }
    }

    /// Synchronously persist every record, in order, retrying each within
    /// the bound. Returns only once each record is durable or has exhausted
    /// its retries. Fault-hook flush path.
    pub fn flush_all<I>(&mut self, records: I) -> FlushReport
    where
        I: IntoIterator<Item = EncodedRecord>,
    {
        let mut report = FlushReport {
            written: 0,
            dropped: 0,
        };
        for rec in records {
            match self.append_with_retry(&rec) {
                Ok(()) => report.written += 1,
                Err(_) => report.dropped += 1,
            }
        }
        report
    }

    /// Lazy walk over every stored record, oldest page to newest. Filler,
    /// torn records and pages with bad headers are skipped, never fatal.
    pub fn read_all(&self) -> ReadAll<'_, D> {
        ReadAll {
            store: self,
            walk: self.begin_walk(),
        }
    }

    /// Start a readback walk. Used by [`ReadAll`] and by callers that hold
    /// the store behind a lock guard.
    pub fn begin_walk(&self) -> ReadWalk {
        let page_count = self.region.page_count();
        let mut oldest: Option<(u32, u32)> = None;
        for page in 0..page_count {
            if let Ok(PageState::Valid(gen)) = self.page_state(page) {
                if oldest.map_or(true, |(_, g)| gen < g) {
                    oldest = Some((page, gen));
                }
            }
        }
        ReadWalk {
            start_page: oldest.map_or(0, |(p, _)| p),
            scanned: if oldest.is_some() { 0 } else { page_count },
            page_count,
            cur: None,
            last_gen: None,
            skipped_pages: 0,
            skipped_records: 0,
        }
    }

    /// Advance a walk by one record.
    pub fn walk_next(&self, walk: &mut ReadWalk) -> Option<DecodedRecord> {
        let page_size = self.region.page_size;
        loop {
            let (page_start, off) = match walk.cur {
                None => {
                    if walk.scanned >= walk.page_count {
                        return None;
                    }
                    let page = (walk.start_page + walk.scanned) % walk.page_count;
                    walk.scanned += 1;
                    match self.page_state(page) {
                        Ok(PageState::Valid(gen)) => {
                            // Generations must rise along the circular walk;
                            // anything else is a stale leftover.
                            if walk.last_gen.map_or(false, |g| gen <= g) {
                                walk.skipped_pages += 1;
                                continue;
                            }
                            walk.last_gen = Some(gen);
                            walk.cur = Some((page * page_size, PAGE_HEADER_LEN));
                            continue;
                        }
                        Ok(PageState::Empty) => continue,
                        Ok(PageState::Corrupt) | Err(_) => {
                            walk.skipped_pages += 1;
                            continue;
                        }
                    }
                }
                Some(cur) => cur,
            };

            if off + 2 > page_size {
                walk.cur = None;
                continue;
            }
            let mut len_bytes = [0u8; 2];
            if self.dev.read(self.abs(page_start + off), &mut len_bytes).is_err() {
                walk.skipped_records += 1;
                walk.cur = None;
                continue;
            }
            let len = u16::from_le_bytes(len_bytes);
            if len == FRAME_ERASED || len == FRAME_FILLER {
                walk.cur = None;
                continue;
            }
            let len = len as u32;
            if len > MAX_RECORD_LEN as u32 || off + 2 + len > page_size {
                // Torn frame; the rest of the page is unreliable.
                walk.skipped_records += 1;
                walk.cur = None;
                continue;
            }

            let mut payload = [0u8; MAX_RECORD_LEN];
            if self
                .dev
                .read(self.abs(page_start + off + 2), &mut payload[..len as usize])
                .is_err()
            {
                walk.skipped_records += 1;
                walk.cur = None;
                continue;
            }
            walk.cur = Some((page_start, off + 2 + len));

            match decode(&payload[..len as usize]) {
                Some(rec) => return Some(rec),
                None => {
                    walk.skipped_records += 1;
                    continue;
                }
            }
        }
    }

    /// Region-relative write cursor.
    #[inline]
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    #[inline]
    pub fn region(&self) -> FlashRegion {
        self.region
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    pub fn into_device(self) -> D {
        self.dev
    }

    #[inline]
    fn abs(&self, offset: u32) -> u32 {
        self.region.base + offset
    }

    #[inline]
    fn page_end(&self, offset: u32) -> u32 {
        offset - (offset % self.region.page_size) + self.region.page_size
    }

    fn page_state(&self, page: u32) -> Result<PageState, FlashError> {
        let mut hdr = [0u8; PAGE_HEADER_LEN as usize];
        self.dev
            .read(self.abs(page * self.region.page_size), &mut hdr)?;
        if hdr.iter().all(|b| *b == 0xFF) {
            return Ok(PageState::Empty);
        }
        let magic = u16::from_le_bytes([hdr[0], hdr[1]]);
        let gen = u32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]);
        let crc = u32::from_le_bytes([hdr[8], hdr[9], hdr[10], hdr[11]]);
        if magic == PAGE_MAGIC && crc32fast::hash(&hdr[..8]) == crc {
            Ok(PageState::Valid(gen))
        } else {
            Ok(PageState::Corrupt)
        }
    }

    /// Erase the page under the cursor and stamp its header.
    fn open_page(&mut self) -> Result<(), FlashError> {
        let page_start = self.cursor;
        debug_assert_eq!(page_start % self.region.page_size, 0);

        self.dev
            .erase_page(self.abs(page_start), self.region.page_size)?;

        let mut hdr = [0u8; PAGE_HEADER_LEN as usize];
        hdr[..2].copy_from_slice(&PAGE_MAGIC.to_le_bytes());
        hdr[4..8].copy_from_slice(&self.next_gen.to_le_bytes());
        let crc = crc32fast::hash(&hdr[..8]);
        hdr[8..12].copy_from_slice(&crc.to_le_bytes());
        self.dev.program(self.abs(page_start), &hdr)?;

        self.next_gen = self.next_gen.wrapping_add(1);
        self.page_open = true;
        self.cursor = page_start + PAGE_HEADER_LEN;
        Ok(())
    }

    /// Pad the open page's tail with filler and step to the next boundary.
    fn finalize_page(&mut self, page_end: u32) -> Result<(), FlashError> {
        let filler = [FILLER; 32];
        while self.cursor < page_end {
            let n = (page_end - self.cursor).min(filler.len() as u32);
            self.dev
                .program(self.abs(self.cursor), &filler[..n as usize])?;
            self.cursor += n;
        }
        self.page_open = false;
        Ok(())
    }

    /// Walk the newest valid page's frames to find where writing stopped.
    fn resume_in_page(&mut self, page: u32) -> Result<(), FlashError> {
        let page_size = self.region.page_size;
        let page_start = page * page_size;
        let mut off = PAGE_HEADER_LEN;

        loop {
            if off + 2 > page_size {
                self.close_resumed_page(page_start + page_size);
                return Ok(());
            }
            let mut len_bytes = [0u8; 2];
            self.dev.read(self.abs(page_start + off), &mut len_bytes)?;
            let len = u16::from_le_bytes(len_bytes);

            if len == FRAME_ERASED {
                // First unwritten byte; keep appending here.
                self.cursor = page_start + off;
                self.page_open = true;
                return Ok(());
            }
            let len = len as u32;
            if len == FRAME_FILLER as u32
                || len > MAX_RECORD_LEN as u32
                || off + 2 + len > page_size
            {
                // Finalized page, or a torn record lost to a power cut.
                self.close_resumed_page(page_start + page_size);
                return Ok(());
            }
            off += 2 + len;
        }
    }

    fn close_resumed_page(&mut self, page_end: u32) {
        self.page_open = false;
        self.cursor = if page_end >= self.region.size && self.wraparound {
            0
        } else {
            page_end
        };
    }
}

/// Lazy iterator over the stored records.
pub struct ReadAll<'a, D: FlashDevice> {
    store: &'a FlashStore<D>,
    walk: ReadWalk,
}

impl<'a, D: FlashDevice> ReadAll<'a, D> {
    /// Pages skipped for a bad header or stale generation.
    pub fn skipped_pages(&self) -> u32 {
        self.walk.skipped_pages
    }

    /// Torn or checksum-failing records skipped.
    pub fn skipped_records(&self) -> u32 {
        self.walk.skipped_records
    }
}

impl<'a, D: FlashDevice> Iterator for ReadAll<'a, D> {
    type Item = DecodedRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.store.walk_next(&mut self.walk)
    }
}

/// Cursor state for a readback walk, separable from the store borrow.
pub struct ReadWalk {
    start_page: u32,
    scanned: u32,
    page_count: u32,
    /// (page start offset, offset within page) of the next frame.
    cur: Option<(u32, u32)>,
    last_gen: Option<u32>,
    skipped_pages: u32,
    skipped_records: u32,
}

//! Log record encoding.
//!
//! A log call is captured as an ephemeral [`LogRecord`], rendered by
//! [`encode`] into a fixed-capacity [`EncodedRecord`], and read back after a
//! crash by [`decode`]. Fields are emitted in one fixed order; the mask byte
//! in the header tells a reader which optional fields are present, so records
//! are parseable with no configuration at all.
//!
//! Wire layout (little-endian):
//!
//! ```text
//! [1B header = mask | TRUNCATED]
//! [4B timestamp ms]              always present, zeroed unless TIME
//! [1B level]                     always present
//! [1B tag len][tag bytes]        len 0 unless TAG
//! [1B func len][func bytes]      only when FUNC
//! [4B line]                      only when LINE
//! [1B msg len][msg bytes]        always present
//! [1B checksum]                  XOR of all preceding bytes
//! ```

use core::fmt;

use crate::format::FmtFlags;

/// Maximum message length in bytes.
pub const MAX_MSG_LEN: usize = 120;

/// Maximum tag length in bytes.
pub const MAX_TAG_LEN: usize = 16;

/// Maximum function-name length in bytes.
pub const MAX_FUNC_LEN: usize = 32;

/// Worst-case encoded record size.
pub const MAX_RECORD_LEN: usize =
    1 + 4 + 1 + 1 + MAX_TAG_LEN + 1 + MAX_FUNC_LEN + 4 + 1 + MAX_MSG_LEN + 1;

/// Smallest well-formed record: header, timestamp, level, empty tag,
/// empty message, checksum.
pub const MIN_RECORD_LEN: usize = 1 + 4 + 1 + 1 + 1 + 1;

/// Log severity. `Assert` is most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Assert = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Verbose = 5,
}

impl LogLevel {
    /// Number of severity levels.
    pub const COUNT: usize = 6;

    /// Convert to string for output.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Assert => "ASSERT",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Verbose => "VERBOSE",
        }
    }

    /// Convert from a raw byte, rejecting out-of-range values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LogLevel::Assert),
            1 => Some(LogLevel::Error),
            2 => Some(LogLevel::Warn),
            3 => Some(LogLevel::Info),
            4 => Some(LogLevel::Debug),
            5 => Some(LogLevel::Verbose),
            _ => None,
        }
    }
}

/// One log call, borrowed from the call site. Consumed by [`encode`].
pub struct LogRecord<'a> {
    pub level: LogLevel,
    pub tag: &'a str,
    /// Milliseconds since boot.
    pub timestamp: u32,
    pub function: Option<&'a str>,
    pub line: Option<u32>,
    pub message: &'a str,
}

/// Length-prefixed encoded record payload.
#[derive(Clone, Copy)]
pub struct EncodedRecord {
    len: u16,
    bytes: [u8; MAX_RECORD_LEN],
}

impl EncodedRecord {
    pub const EMPTY: EncodedRecord = EncodedRecord {
        len: 0,
        bytes: [0; MAX_RECORD_LEN],
    };

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn push(&mut self, bytes: &[u8]) {
        let pos = self.len as usize;
        self.bytes[pos..pos + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len() as u16;
    }
}

/// XOR checksum over a byte slice.
#[inline]
fn xor_sum(bytes: &[u8]) -> u8 {
    let mut sum = 0u8;
    for b in bytes {
        sum ^= b;
    }
    sum
}

/// Clip a string to `max` bytes on a char boundary.
fn clip_str(s: &str, max: usize) -> (&str, bool) {
    if s.len() <= max {
        return (s, false);
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    (&s[..cut], true)
}

/// Render a record into its wire form.
///
/// Deterministic: identical inputs produce byte-identical output. Oversized
/// tag, function or message fields are clipped and flagged via
/// [`FmtFlags::TRUNCATED`] instead of being dropped silently.
pub fn encode(record: &LogRecord<'_>, mask: FmtFlags) -> EncodedRecord {
    let mut truncated = false;

    let tag = if mask.contains(FmtFlags::TAG) {
        let (tag, clipped) = clip_str(record.tag, MAX_TAG_LEN);
        truncated |= clipped;
        tag
    } else {
        ""
    };
    let func = if mask.contains(FmtFlags::FUNC) {
        let (func, clipped) = clip_str(record.function.unwrap_or(""), MAX_FUNC_LEN);
        truncated |= clipped;
        func
    } else {
        ""
    };
    let (msg, clipped) = clip_str(record.message, MAX_MSG_LEN);
    truncated |= clipped;

    let mut out = EncodedRecord::EMPTY;

    let mut header = mask.bits();
    if truncated {
        header |= FmtFlags::TRUNCATED.bits();
    }
    out.push(&[header]);

    let ts = if mask.contains(FmtFlags::TIME) {
        record.timestamp
    } else {
        0
    };
    out.push(&ts.to_le_bytes());
    out.push(&[record.level as u8]);

    out.push(&[tag.len() as u8]);
    out.push(tag.as_bytes());

    if mask.contains(FmtFlags::FUNC) {
        out.push(&[func.len() as u8]);
        out.push(func.as_bytes());
    }
    if mask.contains(FmtFlags::LINE) {
        out.push(&record.line.unwrap_or(0).to_le_bytes());
    }

    out.push(&[msg.len() as u8]);
    out.push(msg.as_bytes());

    let sum = xor_sum(out.as_bytes());
    out.push(&[sum]);

    out
}

/// A record read back from flash.
#[derive(Clone, Copy)]
pub struct DecodedRecord {
    pub flags: FmtFlags,
    pub timestamp: u32,
    pub level: LogLevel,
    pub line: Option<u32>,
    tag_len: u8,
    tag: [u8; MAX_TAG_LEN],
    func_len: u8,
    func: [u8; MAX_FUNC_LEN],
    msg_len: u8,
    msg: [u8; MAX_MSG_LEN],
}

impl DecodedRecord {
    pub fn tag(&self) -> &str {
        core::str::from_utf8(&self.tag[..self.tag_len as usize]).unwrap_or("<invalid utf8>")
    }

    pub fn function(&self) -> Option<&str> {
        if self.flags.contains(FmtFlags::FUNC) {
            Some(
                core::str::from_utf8(&self.func[..self.func_len as usize])
                    .unwrap_or("<invalid utf8>"),
            )
        } else {
            None
        }
    }

    pub fn message(&self) -> &str {
        core::str::from_utf8(&self.msg[..self.msg_len as usize]).unwrap_or("<invalid utf8>")
    }

    #[inline]
    pub fn truncated(&self) -> bool {
        self.flags.contains(FmtFlags::TRUNCATED)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn u32(&mut self) -> Option<u32> {
        let b = self.bytes.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn slice(&mut self, len: usize) -> Option<&'a [u8]> {
        let b = self.bytes.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(b)
    }
}

/// Parse a record payload. `None` means torn or corrupt.
pub fn decode(bytes: &[u8]) -> Option<DecodedRecord> {
    if bytes.len() < MIN_RECORD_LEN || bytes.len() > MAX_RECORD_LEN {
        return None;
    }
    let (body, sum) = bytes.split_at(bytes.len() - 1);
    if xor_sum(body) != sum[0] {
        return None;
    }

    let mut r = Reader { bytes: body, pos: 0 };
    let flags = FmtFlags::from_bits_truncate(r.u8()?);
    let timestamp = r.u32()?;
    let level = LogLevel::from_u8(r.u8()?)?;

    let tag_len = r.u8()?;
    if tag_len as usize > MAX_TAG_LEN {
        return None;
    }
    let tag_bytes = r.slice(tag_len as usize)?;

    let mut func_len = 0u8;
    let mut func = [0u8; MAX_FUNC_LEN];
    if flags.contains(FmtFlags::FUNC) {
        func_len = r.u8()?;
        if func_len as usize > MAX_FUNC_LEN {
            return None;
        }
        let bytes = r.slice(func_len as usize)?;
        func[..bytes.len()].copy_from_slice(bytes);
    }

    let line = if flags.contains(FmtFlags::LINE) {
        Some(r.u32()?)
    } else {
        None
    };

    let msg_len = r.u8()?;
    if msg_len as usize > MAX_MSG_LEN {
        return None;
    }
    let msg_bytes = r.slice(msg_len as usize)?;

    // Anything left over is corruption, not padding.
    if r.pos != body.len() {
        return None;
    }

    let mut tag = [0u8; MAX_TAG_LEN];
    tag[..tag_bytes.len()].copy_from_slice(tag_bytes);
    let mut msg = [0u8; MAX_MSG_LEN];
    msg[..msg_bytes.len()].copy_from_slice(msg_bytes);

    Some(DecodedRecord {
        flags,
        timestamp,
        level,
        line,
        tag_len,
        tag,
        func_len,
        func,
        msg_len,
        msg,
    })
}

/// Heapless message formatting buffer.
///
/// One byte of slack beyond [`MAX_MSG_LEN`] so an overflowing message is
/// still visible to the encoder's truncation flag.
pub struct MsgBuf {
    buf: [u8; MAX_MSG_LEN + 1],
    len: usize,
}

impl MsgBuf {
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl fmt::Write for MsgBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let remaining = self.buf.len() - self.len;
        let bytes = s.as_bytes();
        if bytes.len() <= remaining {
            self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
            self.len += bytes.len();
        } else {
            let mut cut = remaining;
            while cut > 0 && !s.is_char_boundary(cut) {
                cut -= 1;
            }
            self.buf[self.len..self.len + cut].copy_from_slice(&bytes[..cut]);
            self.len += cut;
        }
        Ok(())
    }
}

/// Format a message into a fixed buffer.
pub fn format_message(args: fmt::Arguments<'_>) -> MsgBuf {
    use fmt::Write;

    let mut buf = MsgBuf {
        buf: [0; MAX_MSG_LEN + 1],
        len: 0,
    };
    let _ = fmt::write(&mut buf, args);
    buf
}

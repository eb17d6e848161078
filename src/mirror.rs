//! Console mirroring of persisted records.
//!
//! Each record the engine persists may also be rendered as text to an
//! injected character-stream sink (typically a UART). Mirror failures are
//! counted and never block or fail the flash path.

use core::fmt::Write;

use crate::format::FmtFlags;
use crate::record::DecodedRecord;

/// Upper bound for one rendered record line.
pub const MAX_RENDER_LEN: usize = 256;

/// A mirror write failed. Carries no detail; the sink is best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorError;

/// Character-stream sink receiving rendered records.
pub trait MirrorSink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), MirrorError>;
}

/// Sink that discards everything.
pub struct NullMirror;

impl MirrorSink for NullMirror {
    fn write(&mut self, _bytes: &[u8]) -> Result<(), MirrorError> {
        Ok(())
    }
}

struct BufWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Write for BufWriter<'a> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buf.len() - self.pos;
        let to_write = bytes.len().min(remaining);
        self.buf[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
        self.pos += to_write;
        Ok(())
    }
}

/// Render a record as one text line, honoring its format mask.
///
/// Format: `[timestamp] LEVEL tag (func:line): message\n`, with each piece
/// present only when the corresponding mask bit is set.
pub fn render_record(rec: &DecodedRecord, buf: &mut [u8]) -> usize {
    let mut writer = BufWriter { buf, pos: 0 };

    if rec.flags.contains(FmtFlags::TIME) {
        let _ = write!(writer, "[{:8}] ", rec.timestamp);
    }
    if rec.flags.contains(FmtFlags::LVL) {
        let _ = write!(writer, "{} ", rec.level.as_str());
    }
    if rec.flags.contains(FmtFlags::TAG) && !rec.tag().is_empty() {
        let _ = write!(writer, "{} ", rec.tag());
    }
    if let Some(func) = rec.function() {
        match rec.line {
            Some(line) => {
                let _ = write!(writer, "({}:{}) ", func, line);
            }
            None => {
                let _ = write!(writer, "({}) ", func);
            }
        }
    } else if let Some(line) = rec.line {
        let _ = write!(writer, "(:{}) ", line);
    }

    let _ = write!(writer, ": {}", rec.message());
    if rec.truncated() {
        let _ = writer.write_str("~");
    }
    let _ = writer.write_str("\n");

    writer.pos
}

/// UART mirror on a TX-only driver.
#[cfg(target_os = "espidf")]
pub struct UartMirror<'d> {
    uart: esp_idf_svc::hal::uart::UartTxDriver<'d>,
}

#[cfg(target_os = "espidf")]
impl<'d> UartMirror<'d> {
    /// Wrap a configured TX driver.
    pub fn new(uart: esp_idf_svc::hal::uart::UartTxDriver<'d>) -> Self {
        Self { uart }
    }
}

#[cfg(target_os = "espidf")]
impl<'d> MirrorSink for UartMirror<'d> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), MirrorError> {
        self.uart.write(bytes).map(|_| ()).map_err(|_| MirrorError)
    }
}

/// Initialize UART1 TX-only for mirroring.
#[cfg(target_os = "espidf")]
pub fn init_uart_mirror<'d>(
    uart: impl esp_idf_svc::hal::peripheral::Peripheral<P = esp_idf_svc::hal::uart::UART1> + 'd,
    tx_pin: impl esp_idf_svc::hal::peripheral::Peripheral<P = impl esp_idf_svc::hal::gpio::OutputPin>
        + 'd,
    baud_rate: u32,
) -> Result<UartMirror<'d>, esp_idf_svc::sys::EspError> {
    use esp_idf_svc::hal::{gpio, uart};

    let uart_config =
        uart::config::Config::default().baudrate(esp_idf_svc::hal::units::Hertz(baud_rate));

    let driver = uart::UartTxDriver::new(
        uart,
        tx_pin,
        Option::<gpio::AnyIOPin>::None, // CTS
        Option::<gpio::AnyIOPin>::None, // RTS
        &uart_config,
    )?;
    Ok(UartMirror::new(driver))
}

//! The logging engine.
//!
//! ```text
//! log_i!() ──▶ encode ──▶ LogQueue ──▶ drain() ──▶ FlashStore
//!              (mask)     lock held      │            │
//!                         O(1) only      └─▶ mirror ◀─┘
//!
//! on_assertion_failure() ──▶ disable async+locking ──▶ drain_all
//!                            ──▶ flush_all ──▶ halt
//! ```
//!
//! Producers may log from any context; a timer task calls [`Engine::drain`].
//! A fatal assertion bypasses the queue lock path and synchronously flushes
//! everything buffered before the device halts.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use spin::Mutex;

use crate::fault::{EngineMode, FaultPhase, FaultState, SoleAccess};
use crate::flash::{FlashDevice, FlashError, FlashRegion};
use crate::format::{FmtFlags, FormatTable};
use crate::mirror::{render_record, MirrorSink, NullMirror, MAX_RENDER_LEN};
use crate::queue::{LogQueue, DEFAULT_QUEUE_CAPACITY};
use crate::record::{
    decode, encode, format_message, DecodedRecord, EncodedRecord, LogLevel, LogRecord,
};
use crate::store::FlashStore;

/// Configuration misuse. Fatal to the call, never to the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// C01: operation requires the engine not to be started
    AlreadyStarted,
    /// C02: region size is not a nonzero multiple of the page size
    RegionNotAligned,
    /// C03: page size not supported
    BadPageSize,
    /// C04: flash access failed while mounting the region
    Flash(FlashError),
}

impl ConfigError {
    /// Get error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyStarted => "C01",
            Self::RegionNotAligned => "C02",
            Self::BadPageSize => "C03",
            Self::Flash(_) => "C04",
        }
    }

    /// Get error message
    pub fn message(&self) -> &'static str {
        match self {
            Self::AlreadyStarted => "engine already started",
            Self::RegionNotAligned => "region size not a multiple of page size",
            Self::BadPageSize => "unsupported page size",
            Self::Flash(_) => "flash mount failed",
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// Engine configuration, fixed at construction.
#[derive(Clone, Copy)]
pub struct EngineConfig {
    pub region: FlashRegion,
    /// Reuse the oldest page when the region fills (default). When false,
    /// a full region fails appends with `RegionFull` and the engine keeps
    /// mirroring only.
    pub wraparound: bool,
    /// Millisecond clock stamped into records.
    pub clock: fn() -> u32,
}

fn zero_clock() -> u32 {
    0
}

impl EngineConfig {
    pub fn new(region: FlashRegion) -> Self {
        Self {
            region,
            wraparound: true,
            clock: zero_clock,
        }
    }
}

/// Counter snapshot. Queryable at any time, never raised to callers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Records rejected by a full queue.
    pub queue_dropped: u32,
    /// Records lost to exhausted retries or a full region.
    pub flash_dropped: u32,
    /// Mirror write failures (never fatal).
    pub mirror_errors: u32,
    /// Region exhausted with wraparound disabled.
    pub region_full: bool,
}

/// Drain-side state: the store, the mirror, and their counters share one
/// lock so a drain cycle and the fault flush serialize against each other.
struct Persist<D: FlashDevice, M: MirrorSink> {
    store: Option<FlashStore<D>>,
    mirror: Option<M>,
    flash_dropped: u32,
    mirror_errors: u32,
    region_full: bool,
}

impl<D: FlashDevice, M: MirrorSink> Persist<D, M> {
    /// Mirror a record and append it to flash. `Ok(false)` means the record
    /// went to the mirror only (region full, or engine not started).
    fn persist(&mut self, rec: &EncodedRecord) -> Result<bool, FlashError> {
        mirror_one(&mut self.mirror, &mut self.mirror_errors, rec);
        if self.region_full {
            return Ok(false);
        }
        let Some(store) = self.store.as_mut() else {
            return Ok(false);
        };
        match store.append_with_retry(rec) {
            Ok(()) => Ok(true),
            Err(FlashError::RegionFull) => {
                self.region_full = true;
                self.flash_dropped += 1;
                Err(FlashError::RegionFull)
            }
            Err(e) => {
                self.flash_dropped += 1;
                Err(e)
            }
        }
    }
}

fn mirror_one<M: MirrorSink>(mirror: &mut Option<M>, errors: &mut u32, rec: &EncodedRecord) {
    let Some(sink) = mirror.as_mut() else { return };
    let Some(dec) = decode(rec.as_bytes()) else { return };
    let mut buf = [0u8; MAX_RENDER_LEN];
    let len = render_record(&dec, &mut buf);
    if sink.write(&buf[..len]).is_err() {
        *errors += 1;
    }
}

/// Crash-safe buffered logging engine over one flash region.
pub struct Engine<D: FlashDevice, M: MirrorSink = NullMirror, const QN: usize = DEFAULT_QUEUE_CAPACITY>
{
    formats: Mutex<FormatTable>,
    queue: LogQueue<QN>,
    persist: Mutex<Persist<D, M>>,
    mode: EngineMode,
    fault: FaultState,
    started: AtomicBool,
    filter: AtomicU8,
    config: EngineConfig,
}

impl<D: FlashDevice, M: MirrorSink, const QN: usize> Engine<D, M, QN> {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            formats: Mutex::new(FormatTable::new()),
            queue: LogQueue::new(),
            persist: Mutex::new(Persist {
                store: None,
                mirror: None,
                flash_dropped: 0,
                mirror_errors: 0,
                region_full: false,
            }),
            mode: EngineMode::new(),
            fault: FaultState::new(),
            started: AtomicBool::new(false),
            filter: AtomicU8::new(LogLevel::Verbose as u8),
            config,
        }
    }

    /// Inject the console mirror collaborator.
    pub fn set_mirror(&self, mirror: M) {
        self.persist.lock().mirror = Some(mirror);
    }

    /// Configure the render mask for one level. Valid only before
    /// [`start`](Self::start); the on-flash layout must stay stable for
    /// whatever reads the region after a crash.
    pub fn set_format(&self, level: LogLevel, mask: FmtFlags) -> Result<(), ConfigError> {
        if self.started.load(Ordering::Acquire) {
            return Err(ConfigError::AlreadyStarted);
        }
        self.formats.lock().set(level, mask);
        Ok(())
    }

    /// Runtime severity threshold; records less severe than `level` are
    /// discarded at the call site.
    pub fn set_filter(&self, level: LogLevel) {
        self.filter.store(level as u8, Ordering::Relaxed);
    }

    /// Validate the region and mount the store. Fails without side effects
    /// on a bad region descriptor or double start.
    pub fn start(&self, dev: D) -> Result<(), ConfigError> {
        if self.started.load(Ordering::Acquire) {
            return Err(ConfigError::AlreadyStarted);
        }
        let region = self.config.region;
        if !region.page_size.is_power_of_two() || region.page_size < 256 {
            return Err(ConfigError::BadPageSize);
        }
        if region.size == 0 || region.size % region.page_size != 0 {
            return Err(ConfigError::RegionNotAligned);
        }

        let store =
            FlashStore::mount(dev, region, self.config.wraparound).map_err(ConfigError::Flash)?;
        self.persist.lock().store = Some(store);
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    /// Leveled log entry point. Safe from any context; never blocks beyond
    /// the short queue lock and never fails loudly.
    pub fn log(
        &self,
        level: LogLevel,
        tag: &str,
        function: Option<&str>,
        line: Option<u32>,
        args: fmt::Arguments<'_>,
    ) {
        if !self.started.load(Ordering::Acquire) || self.fault.phase() != FaultPhase::Normal {
            return;
        }
        if (level as u8) > self.filter.load(Ordering::Relaxed) {
            return;
        }

        let msg = format_message(args);
        let mask = self.formats.lock().get(level);
        let rec = encode(
            &LogRecord {
                level,
                tag,
                timestamp: (self.config.clock)(),
                function,
                line,
                message: msg.as_str(),
            },
            mask,
        );

        if self.mode.async_enabled() {
            // Overflow is counted inside the queue.
            let _ = self.queue.enqueue(&rec);
        } else {
            let _ = self.persist.lock().persist(&rec);
        }
    }

    /// Drain cycle: move queued records into flash, one at a time. The
    /// queue lock is never held across a flash write.
    ///
    /// Device faults beyond the retry bound surface only as dropped-record
    /// counts. The first `RegionFull` (wraparound disabled) is returned;
    /// afterwards records keep flowing to the mirror only.
    pub fn drain(&self) -> Result<usize, FlashError> {
        if !self.started.load(Ordering::Acquire) {
            return Ok(0);
        }
        let mut persisted = 0;
        let mut result = Ok(());
        while let Some(rec) = self.queue.drain_one() {
            let mut persist = self.persist.lock();
            match persist.persist(&rec) {
                Ok(true) => persisted += 1,
                Ok(false) => {}
                Err(FlashError::RegionFull) => result = Err(FlashError::RegionFull),
                Err(_) => {}
            }
        }
        result.map(|_| persisted)
    }

    /// Read back every record stored in the region, oldest first.
    pub fn read_logs<R>(&self, f: impl FnOnce(&mut dyn Iterator<Item = DecodedRecord>) -> R) -> R {
        let persist = self.persist.lock();
        match persist.store.as_ref() {
            Some(store) => f(&mut store.read_all()),
            None => f(&mut core::iter::empty()),
        }
    }

    /// Render every stored record to the mirror. Returns the record count.
    pub fn dump(&self) -> u32 {
        let mut persist = self.persist.lock();
        let Persist {
            store,
            mirror,
            mirror_errors,
            ..
        } = &mut *persist;
        let (Some(store), Some(sink)) = (store.as_ref(), mirror.as_mut()) else {
            return 0;
        };

        let mut n = 0;
        let mut walk = store.begin_walk();
        while let Some(rec) = store.walk_next(&mut walk) {
            let mut buf = [0u8; MAX_RENDER_LEN];
            let len = render_record(&rec, &mut buf);
            if sink.write(&buf[..len]).is_err() {
                *mirror_errors += 1;
            }
            n += 1;
        }
        n
    }

    pub fn stats(&self) -> EngineStats {
        let persist = self.persist.lock();
        EngineStats {
            queue_dropped: self.queue.dropped(),
            flash_dropped: persist.flash_dropped,
            mirror_errors: persist.mirror_errors,
            region_full: persist.region_full,
        }
    }

    /// Delivery-mode switches, observable by collaborators.
    pub fn mode(&self) -> &EngineMode {
        &self.mode
    }

    pub fn phase(&self) -> FaultPhase {
        self.fault.phase()
    }

    /// Records waiting in the queue.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Fatal-assertion hook: the sole external trigger of the fault path.
    ///
    /// Disables async delivery and locking (irreversibly for this run),
    /// records one `Assert` record describing the failure, synchronously
    /// flushes everything buffered, then enters the terminal phase. The
    /// caller is expected to follow with [`halt`](Self::halt).
    pub fn on_assertion_failure(&self, expr: &str, function: &str, line: u32) {
        if !self.fault.begin_fault() {
            return;
        }

        self.mode.set_async_enabled(false);
        self.mode.set_locking_enabled(false);

        // SAFETY: async delivery is off, producers are shut out by the
        // phase check, and the drain task never runs again. This context
        // is the only one left touching the engine.
        let token = unsafe { SoleAccess::assume() };

        let msg = format_message(format_args!(
            "({}) has assert failed at {}:{}",
            expr, function, line
        ));
        let mask = {
            // A holder interrupted by this fault can never resume.
            unsafe { self.formats.force_unlock() };
            self.formats.lock().get(LogLevel::Assert)
        };
        let rec = encode(
            &LogRecord {
                level: LogLevel::Assert,
                tag: "fault",
                timestamp: (self.config.clock)(),
                function: Some(function),
                line: Some(line),
                message: msg.as_str(),
            },
            mask,
        );
        let queued = self.queue.enqueue_exclusive(&rec, &token);

        unsafe { self.persist.force_unlock() };
        let mut persist = self.persist.lock();
        let Persist {
            store,
            mirror,
            mirror_errors,
            flash_dropped,
            region_full: _,
        } = &mut *persist;

        let drained = self
            .queue
            .drain_all(&token)
            .map(|r| {
                mirror_one(mirror, mirror_errors, &r);
                r
            });

        match store.as_mut() {
            Some(store) => {
                let report = store.flush_all(drained);
                *flash_dropped += report.dropped;
                if !queued {
                    // Queue was full; the assert record still goes last,
                    // preserving oldest-first order.
                    mirror_one(mirror, mirror_errors, &rec);
                    let report = store.flush_all(core::iter::once(rec));
                    *flash_dropped += report.dropped;
                }
            }
            None => {
                for _ in drained {}
                if !queued {
                    mirror_one(mirror, mirror_errors, &rec);
                }
            }
        }
        drop(persist);

        self.fault.enter_halted();
    }

    /// Terminal idle loop. The only exit is an external device reset.
    pub fn halt(&self) -> ! {
        loop {
            core::hint::spin_loop();
        }
    }
}

/// Log with an explicit level, capturing call-site module and line.
#[macro_export]
macro_rules! flog {
    ($engine:expr, $level:expr, $tag:expr, $($arg:tt)*) => {{
        $engine.log(
            $level,
            $tag,
            ::core::option::Option::Some(::core::module_path!()),
            ::core::option::Option::Some(::core::line!()),
            ::core::format_args!($($arg)*),
        );
    }};
}

/// Assert-level log.
#[macro_export]
macro_rules! log_a {
    ($engine:expr, $tag:expr, $($arg:tt)*) => {
        $crate::flog!($engine, $crate::LogLevel::Assert, $tag, $($arg)*)
    };
}

/// Error-level log.
#[macro_export]
macro_rules! log_e {
    ($engine:expr, $tag:expr, $($arg:tt)*) => {
        $crate::flog!($engine, $crate::LogLevel::Error, $tag, $($arg)*)
    };
}

/// Warn-level log.
#[macro_export]
macro_rules! log_w {
    ($engine:expr, $tag:expr, $($arg:tt)*) => {
        $crate::flog!($engine, $crate::LogLevel::Warn, $tag, $($arg)*)
    };
}

/// Info-level log.
#[macro_export]
macro_rules! log_i {
    ($engine:expr, $tag:expr, $($arg:tt)*) => {
        $crate::flog!($engine, $crate::LogLevel::Info, $tag, $($arg)*)
    };
}

/// Debug-level log.
#[macro_export]
macro_rules! log_d {
    ($engine:expr, $tag:expr, $($arg:tt)*) => {
        $crate::flog!($engine, $crate::LogLevel::Debug, $tag, $($arg)*)
    };
}

/// Verbose-level log.
#[macro_export]
macro_rules! log_v {
    ($engine:expr, $tag:expr, $($arg:tt)*) => {
        $crate::flog!($engine, $crate::LogLevel::Verbose, $tag, $($arg)*)
    };
}

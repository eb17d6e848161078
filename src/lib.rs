//! # FlashLog
//!
//! Crash-safe buffered log persistence to on-chip flash.
//!
//! ## Architecture
//!
//! Records flow one way: a leveled log call is encoded against its level's
//! format mask, queued in a fixed-capacity ring, and drained into an
//! append-only circular flash store by a timer task. A fatal assertion
//! bypasses the async path: it disables delivery locks, records the failure,
//! synchronously flushes everything buffered, and halts.
//!
//! ```text
//! Producers            LogQueue             Drain task
//! ─────────            ────────             ──────────
//!
//! log_i!() ─────────▶ [r0][r1][r2] ───────▶ FlashStore ──▶ flash pages
//! encode + enqueue     drop-newest            │
//! never blocks         lock held O(1)         └─▶ MirrorSink (UART)
//! ```
//!
//! Flash is the ground truth after a crash: records carry their own format
//! mask and checksum, pages carry a generation counter and header crc, so an
//! external tool can read the region back with no configuration at all.

#![cfg_attr(not(test), no_std)]

pub mod engine;
pub mod fault;
pub mod flash;
pub mod format;
pub mod mirror;
pub mod queue;
pub mod record;
pub mod store;

pub use engine::{ConfigError, Engine, EngineConfig, EngineStats};
pub use fault::{EngineMode, FaultPhase, FaultState, SoleAccess};
pub use flash::{FlashDevice, FlashError, FlashRegion, MemFlash};
pub use format::{FmtFlags, FormatTable};
pub use mirror::{MirrorSink, NullMirror};
pub use queue::LogQueue;
pub use record::{DecodedRecord, LogLevel, LogRecord};
pub use store::{FlashStore, FlushReport};

#[cfg(target_os = "espidf")]
pub use flash::PartitionFlash;
#[cfg(target_os = "espidf")]
pub use mirror::UartMirror;

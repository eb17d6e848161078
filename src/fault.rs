//! Fault-path state for the logging engine.
//!
//! A fatal assertion flips the engine into a degraded, synchronous,
//! lock-free mode and flushes everything buffered before the device halts.
//! Once flipped, nothing flips back; the only exit is an external reset.

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Process-wide delivery mode switches.
///
/// Both default to true. The fault hook clears both exactly once per run;
/// callers enforce the monotonic-once-disabled rule, not this type.
pub struct EngineMode {
    async_enabled: AtomicBool,
    locking_enabled: AtomicBool,
}

impl EngineMode {
    pub const fn new() -> Self {
        Self {
            async_enabled: AtomicBool::new(true),
            locking_enabled: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn set_async_enabled(&self, enabled: bool) {
        self.async_enabled.store(enabled, Ordering::Release);
    }

    #[inline]
    pub fn async_enabled(&self) -> bool {
        self.async_enabled.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_locking_enabled(&self, enabled: bool) {
        self.locking_enabled.store(enabled, Ordering::Release);
    }

    #[inline]
    pub fn locking_enabled(&self) -> bool {
        self.locking_enabled.load(Ordering::Acquire)
    }
}

impl Default for EngineMode {
    fn default() -> Self {
        Self::new()
    }
}

/// Fault-hook phase. `Normal` is the only phase serving user log calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FaultPhase {
    Normal = 0,
    Faulting = 1,
    Halted = 2,
}

impl FaultPhase {
    /// Convert from raw u8 value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => FaultPhase::Faulting,
            2 => FaultPhase::Halted,
            _ => FaultPhase::Normal,
        }
    }
}

/// Thread-safe fault phase tracker.
///
/// The transition sequence is one-way: `Normal → Faulting → Halted`.
pub struct FaultState {
    phase: AtomicU8,
}

impl FaultState {
    pub const fn new() -> Self {
        Self {
            phase: AtomicU8::new(FaultPhase::Normal as u8),
        }
    }

    #[inline]
    pub fn phase(&self) -> FaultPhase {
        FaultPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Attempt the `Normal → Faulting` transition.
    ///
    /// Returns false if another fault already won the race; the caller must
    /// then stay out of the fault path entirely.
    #[inline]
    pub fn begin_fault(&self) -> bool {
        self.phase
            .compare_exchange(
                FaultPhase::Normal as u8,
                FaultPhase::Faulting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Enter the terminal phase. Valid only from `Faulting`.
    #[inline]
    pub fn enter_halted(&self) {
        self.phase.store(FaultPhase::Halted as u8, Ordering::Release);
    }
}

impl Default for FaultState {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability token asserting "I am the only running context".
///
/// The fault hook constructs one after disabling async delivery; queue and
/// persistence operations that bypass locking demand it, so the bypass is
/// visible at every call site instead of hiding behind a global flag.
pub struct SoleAccess(());

impl SoleAccess {
    /// # Safety
    ///
    /// The caller must guarantee no other context can touch the engine for
    /// the token's lifetime. True during fault handling: producers are shut
    /// out and the drain task never runs again.
    #[inline]
    pub unsafe fn assume() -> Self {
        SoleAccess(())
    }
}

//! FlashLog - demo entry point
//!
//! On the ESP32 this wires the engine to a data partition and a UART
//! mirror: per-level formats first, then start, log, drain.
//!
//! On the host it runs the same flow against the in-memory flash double,
//! ending with a demonstration assertion flush instead of a halt.

#![cfg_attr(target_os = "espidf", no_std, no_main)]

use flashlog::{log_d, log_e, log_i, log_v, log_w};
use flashlog::{Engine, EngineConfig, FmtFlags, LogLevel};

/// Per-level formats: everything for asserts, compact lines for the middle
/// levels, no function/process noise for debug chatter.
fn apply_formats<D, M, const QN: usize>(engine: &Engine<D, M, QN>)
where
    D: flashlog::FlashDevice,
    M: flashlog::MirrorSink,
{
    let compact = FmtFlags::LVL | FmtFlags::TAG | FmtFlags::TIME;
    let chatter = FmtFlags::FULL
        .difference(FmtFlags::FUNC)
        .difference(FmtFlags::P_INFO);

    engine
        .set_format(LogLevel::Assert, FmtFlags::FULL.difference(FmtFlags::P_INFO))
        .expect("formats are configured before start");
    engine.set_format(LogLevel::Error, compact).expect("pre-start");
    engine.set_format(LogLevel::Warn, compact).expect("pre-start");
    engine.set_format(LogLevel::Info, compact).expect("pre-start");
    engine.set_format(LogLevel::Debug, chatter).expect("pre-start");
    engine.set_format(LogLevel::Verbose, chatter).expect("pre-start");
}

#[cfg(target_os = "espidf")]
fn timestamp_ms() -> u32 {
    (unsafe { esp_idf_svc::sys::esp_timer_get_time() } / 1000) as u32
}

#[cfg(target_os = "espidf")]
#[no_mangle]
fn main() {
    use flashlog::{PartitionFlash, UartMirror};

    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();

    let peripherals =
        esp_idf_svc::hal::peripherals::Peripherals::take().expect("peripherals already taken");
    let mirror = flashlog::mirror::init_uart_mirror(peripherals.uart1, peripherals.pins.gpio6, 115_200)
        .expect("uart mirror init");

    let flash = PartitionFlash::data_partition(c"flashlog").expect("log data partition missing");
    let mut config = EngineConfig::new(flash.region());
    config.clock = timestamp_ms;

    let engine: Engine<PartitionFlash, UartMirror<'static>> = Engine::new(config);
    engine.set_mirror(mirror);
    apply_formats(&engine);
    engine.start(flash).expect("flash region must mount");

    log_i!(engine, "boot", "FlashLog up, {} pending", engine.pending());
    log_w!(engine, "boot", "this is a warn sample");
    log_d!(engine, "boot", "this is a debug sample");

    // Show what earlier runs left in flash.
    engine.dump();

    loop {
        let _ = engine.drain();
        unsafe {
            esp_idf_svc::sys::vTaskDelay(10);
        }
    }
}

#[cfg(not(target_os = "espidf"))]
fn host_clock() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

#[cfg(not(target_os = "espidf"))]
struct StdoutMirror;

#[cfg(not(target_os = "espidf"))]
impl flashlog::MirrorSink for StdoutMirror {
    fn write(&mut self, bytes: &[u8]) -> Result<(), flashlog::mirror::MirrorError> {
        use std::io::Write;
        std::io::stdout()
            .write_all(bytes)
            .map_err(|_| flashlog::mirror::MirrorError)
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    let flash: flashlog::MemFlash<8192> = flashlog::MemFlash::new(512);
    let mut config = EngineConfig::new(flash.region());
    config.clock = host_clock;

    let engine: Engine<flashlog::MemFlash<8192>, StdoutMirror> = Engine::new(config);
    engine.set_mirror(StdoutMirror);
    apply_formats(&engine);
    engine.start(flash).expect("flash region must mount");

    log_e!(engine, "demo", "error sample");
    log_w!(engine, "demo", "warn sample");
    log_i!(engine, "demo", "info sample");
    log_d!(engine, "demo", "debug sample");
    log_v!(engine, "demo", "verbose sample");

    let persisted = engine.drain().expect("demo region cannot fill");
    println!("-- drained {} records to flash --", persisted);

    // Leave something in the queue, then crash on purpose.
    log_i!(engine, "demo", "queued right before the failure");
    engine.on_assertion_failure("x > 0", "main", line!());

    let stored = engine.read_logs(|records| records.count());
    println!(
        "-- after assert: {} records durable, stats {:?} --",
        stored,
        engine.stats()
    );
}

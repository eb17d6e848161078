//! Engine integration tests

use std::sync::{Arc, Mutex};

use flashlog::mirror::MirrorError;
use flashlog::{log_d, log_i, log_w};
use flashlog::{
    ConfigError, Engine, EngineConfig, FmtFlags, LogLevel, MemFlash, MirrorSink,
};

type TestEngine = Engine<MemFlash<8192>>;

fn started_engine() -> TestEngine {
    let flash: MemFlash<8192> = MemFlash::new(512);
    let engine = TestEngine::new(EngineConfig::new(flash.region()));
    engine.start(flash).unwrap();
    engine
}

/// Mirror writing into a shared buffer.
#[derive(Clone)]
struct SharedMirror(Arc<Mutex<Vec<u8>>>);

impl MirrorSink for SharedMirror {
    fn write(&mut self, bytes: &[u8]) -> Result<(), MirrorError> {
        self.0.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }
}

/// Mirror that always fails.
struct BrokenMirror;

impl MirrorSink for BrokenMirror {
    fn write(&mut self, _bytes: &[u8]) -> Result<(), MirrorError> {
        Err(MirrorError)
    }
}

#[test]
fn test_log_drain_read_round_trip() {
    let engine = started_engine();

    log_i!(engine, "app", "boot step {}", 1);
    log_w!(engine, "app", "boot step {}", 2);
    log_d!(engine, "app", "boot step {}", 3);
    assert_eq!(engine.pending(), 3);

    let persisted = engine.drain().unwrap();
    assert_eq!(persisted, 3);
    assert_eq!(engine.pending(), 0);

    let messages = engine.read_logs(|records| {
        records
            .map(|r| (r.level, r.message().to_string()))
            .collect::<Vec<_>>()
    });
    assert_eq!(
        messages,
        [
            (LogLevel::Info, "boot step 1".to_string()),
            (LogLevel::Warn, "boot step 2".to_string()),
            (LogLevel::Debug, "boot step 3".to_string()),
        ]
    );
}

#[test]
fn test_timestamp_from_injected_clock() {
    use std::sync::atomic::{AtomicU32, Ordering};

    static TS: AtomicU32 = AtomicU32::new(123_456);
    fn clock() -> u32 {
        TS.load(Ordering::Relaxed)
    }

    let flash: MemFlash<8192> = MemFlash::new(512);
    let mut config = EngineConfig::new(flash.region());
    config.clock = clock;
    let engine = TestEngine::new(config);
    engine
        .set_format(LogLevel::Info, FmtFlags::LVL | FmtFlags::TIME)
        .unwrap();
    engine.start(flash).unwrap();

    log_i!(engine, "clk", "stamped");
    engine.drain().unwrap();

    let ts = engine.read_logs(|records| records.next().unwrap().timestamp);
    assert_eq!(ts, 123_456);
}

#[test]
fn test_set_format_after_start_fails_unchanged() {
    let flash: MemFlash<8192> = MemFlash::new(512);
    let engine = TestEngine::new(EngineConfig::new(flash.region()));
    let compact = FmtFlags::LVL | FmtFlags::TAG | FmtFlags::TIME;
    engine.set_format(LogLevel::Info, compact).unwrap();
    engine.start(flash).unwrap();

    assert_eq!(
        engine.set_format(LogLevel::Info, FmtFlags::FULL),
        Err(ConfigError::AlreadyStarted)
    );

    // Records still encode with the pre-start mask.
    log_i!(engine, "fmt", "check");
    engine.drain().unwrap();
    let flags = engine.read_logs(|records| records.next().unwrap().flags);
    assert_eq!(flags, compact);
}

#[test]
fn test_filter_suppresses_below_threshold() {
    let engine = started_engine();
    engine.set_filter(LogLevel::Warn);

    log_i!(engine, "app", "too verbose");
    log_d!(engine, "app", "way too verbose");
    assert_eq!(engine.pending(), 0);

    log_w!(engine, "app", "important");
    assert_eq!(engine.pending(), 1);
}

#[test]
fn test_queue_overflow_counts_drops() {
    let flash: MemFlash<8192> = MemFlash::new(512);
    let engine: Engine<MemFlash<8192>, flashlog::NullMirror, 4> =
        Engine::new(EngineConfig::new(flash.region()));
    engine.start(flash).unwrap();

    for n in 0..6 {
        log_i!(engine, "burst", "msg {}", n);
    }
    assert_eq!(engine.pending(), 4);
    assert_eq!(engine.stats().queue_dropped, 2);

    // The four oldest survive.
    engine.drain().unwrap();
    let first = engine.read_logs(|records| records.next().unwrap().message().to_string());
    assert_eq!(first, "msg 0");
}

#[test]
fn test_mirror_receives_rendered_records() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let flash: MemFlash<8192> = MemFlash::new(512);
    let engine: Engine<MemFlash<8192>, SharedMirror> =
        Engine::new(EngineConfig::new(flash.region()));
    engine.set_mirror(SharedMirror(Arc::clone(&buffer)));
    engine.start(flash).unwrap();

    log_w!(engine, "radio", "signal lost");
    engine.drain().unwrap();

    let text = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(text.contains("WARN"));
    assert!(text.contains("radio"));
    assert!(text.contains("signal lost"));
    assert_eq!(engine.stats().mirror_errors, 0);
}

#[test]
fn test_mirror_failure_never_blocks_flash() {
    let flash: MemFlash<8192> = MemFlash::new(512);
    let engine: Engine<MemFlash<8192>, BrokenMirror> =
        Engine::new(EngineConfig::new(flash.region()));
    engine.set_mirror(BrokenMirror);
    engine.start(flash).unwrap();

    log_i!(engine, "app", "still durable");
    log_i!(engine, "app", "also durable");
    assert_eq!(engine.drain().unwrap(), 2);

    assert_eq!(engine.stats().mirror_errors, 2);
    assert_eq!(engine.read_logs(|records| records.count()), 2);
}

#[test]
fn test_dump_renders_stored_records() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let flash: MemFlash<8192> = MemFlash::new(512);
    let engine: Engine<MemFlash<8192>, SharedMirror> =
        Engine::new(EngineConfig::new(flash.region()));
    engine.set_mirror(SharedMirror(Arc::clone(&buffer)));
    engine.start(flash).unwrap();

    log_i!(engine, "app", "one");
    log_i!(engine, "app", "two");
    engine.drain().unwrap();
    buffer.lock().unwrap().clear();

    assert_eq!(engine.dump(), 2);
    let text = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(text.contains("one"));
    assert!(text.contains("two"));
}

#[test]
fn test_region_full_surfaces_once_then_mirror_only() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let flash: MemFlash<1024> = MemFlash::new(512);
    let mut config = EngineConfig::new(flash.region());
    config.wraparound = false;
    let engine: Engine<MemFlash<1024>, SharedMirror, 64> = Engine::new(config);
    engine.set_mirror(SharedMirror(Arc::clone(&buffer)));
    engine.start(flash).unwrap();

    // More than the two pages can hold.
    for n in 0..40 {
        log_i!(engine, "fill", "padded message number {:04}", n);
    }
    let result = engine.drain();
    assert!(result.is_err(), "first RegionFull must surface");
    assert!(engine.stats().region_full);

    // Logging keeps working, mirror-only.
    buffer.lock().unwrap().clear();
    log_i!(engine, "fill", "after the region filled");
    assert_eq!(engine.drain().unwrap(), 0);
    let text = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(text.contains("after the region filled"));
}

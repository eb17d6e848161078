//! Fault hook tests: assertion failure drives a synchronous flush.

use flashlog::log_i;
use flashlog::{
    Engine, EngineConfig, FaultPhase, FmtFlags, LogLevel, MemFlash, NullMirror,
};

type TestEngine = Engine<MemFlash<8192>>;

fn started_engine() -> TestEngine {
    let flash: MemFlash<8192> = MemFlash::new(512);
    let engine = TestEngine::new(EngineConfig::new(flash.region()));
    engine
        .set_format(LogLevel::Assert, FmtFlags::FULL)
        .unwrap();
    engine.start(flash).unwrap();
    engine
}

#[test]
fn test_assert_flushes_pending_then_assert_record() {
    let engine = started_engine();

    for n in 0..5 {
        log_i!(engine, "app", "pending {}", n);
    }
    assert_eq!(engine.pending(), 5);

    engine.on_assertion_failure("x > 0", "foo", 42);

    assert!(!engine.mode().async_enabled());
    assert!(!engine.mode().locking_enabled());
    assert_eq!(engine.phase(), FaultPhase::Halted);
    assert_eq!(engine.pending(), 0);

    let records = engine.read_logs(|records| {
        records
            .map(|r| (r.level, r.message().to_string()))
            .collect::<Vec<_>>()
    });
    assert_eq!(records.len(), 6);
    for (n, (level, msg)) in records[..5].iter().enumerate() {
        assert_eq!(*level, LogLevel::Info);
        assert_eq!(msg, &format!("pending {}", n));
    }

    let (level, msg) = &records[5];
    assert_eq!(*level, LogLevel::Assert);
    assert_eq!(msg, "(x > 0) has assert failed at foo:42");
}

#[test]
fn test_assert_record_carries_function_and_line() {
    let engine = started_engine();
    engine.on_assertion_failure("ptr != NULL", "init_dma", 131);

    let rec = engine.read_logs(|records| records.next().unwrap());
    assert_eq!(rec.level, LogLevel::Assert);
    assert_eq!(rec.function(), Some("init_dma"));
    assert_eq!(rec.line, Some(131));
    assert_eq!(rec.tag(), "fault");
}

#[test]
fn test_logs_after_halt_are_noops() {
    let engine = started_engine();
    log_i!(engine, "app", "survives");
    engine.on_assertion_failure("x > 0", "foo", 1);

    let before = engine.read_logs(|records| records.count());
    log_i!(engine, "app", "lost");
    engine.drain().unwrap();

    assert_eq!(engine.pending(), 0);
    assert_eq!(engine.read_logs(|records| records.count()), before);
}

#[test]
fn test_second_assert_is_noop() {
    let engine = started_engine();
    engine.on_assertion_failure("first", "foo", 1);
    let count = engine.read_logs(|records| records.count());

    engine.on_assertion_failure("second", "bar", 2);
    assert_eq!(engine.read_logs(|records| records.count()), count);
    assert_eq!(engine.phase(), FaultPhase::Halted);
}

#[test]
fn test_assert_with_full_queue_keeps_order() {
    let flash: MemFlash<8192> = MemFlash::new(512);
    let engine: Engine<MemFlash<8192>, NullMirror, 4> =
        Engine::new(EngineConfig::new(flash.region()));
    engine.start(flash).unwrap();

    for n in 0..4 {
        log_i!(engine, "app", "held {}", n);
    }
    assert_eq!(engine.pending(), 4);

    engine.on_assertion_failure("queue full", "foo", 9);

    let records = engine.read_logs(|records| {
        records
            .map(|r| (r.level, r.message().to_string()))
            .collect::<Vec<_>>()
    });
    assert_eq!(records.len(), 5);
    for (n, (level, msg)) in records[..4].iter().enumerate() {
        assert_eq!(*level, LogLevel::Info);
        assert_eq!(msg, &format!("held {}", n));
    }
    assert_eq!(records[4].0, LogLevel::Assert);
}

#[test]
fn test_assert_before_start_still_halts() {
    let flash: MemFlash<8192> = MemFlash::new(512);
    let engine = TestEngine::new(EngineConfig::new(flash.region()));
    drop(flash);

    engine.on_assertion_failure("early", "boot", 3);
    assert_eq!(engine.phase(), FaultPhase::Halted);
    assert!(!engine.mode().async_enabled());
    assert_eq!(engine.read_logs(|records| records.count()), 0);
}

#[test]
fn test_flush_retries_through_transient_faults() {
    // Two transient program faults are pending when the hook fires; the
    // bounded retries ride them out and every record still lands.
    let mut flash: MemFlash<8192> = MemFlash::new(512);
    let region = flash.region();
    flash.inject_program_faults(2);
    let engine = TestEngine::new(EngineConfig::new(region));
    engine.start(flash).unwrap();

    log_i!(engine, "app", "buffered");
    engine.on_assertion_failure("x > 0", "foo", 7);

    // Both records reached flash despite no drain ever running.
    let count = engine.read_logs(|records| records.count());
    assert_eq!(count, 2);
}

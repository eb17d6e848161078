//! Record encoder wire-format tests

use flashlog::record::{decode, encode, LogLevel, LogRecord, MAX_MSG_LEN};
use flashlog::FmtFlags;

fn sample<'a>(message: &'a str) -> LogRecord<'a> {
    LogRecord {
        level: LogLevel::Info,
        tag: "io",
        timestamp: 0x0102_0304,
        function: None,
        line: Some(7),
        message,
    }
}

#[test]
fn test_exact_wire_layout() {
    let rec = encode(&sample("ok"), FmtFlags::FULL);
    let bytes = rec.as_bytes();

    // header | ts | level | tag | func | line | msg | checksum
    assert_eq!(bytes.len(), 18);
    assert_eq!(bytes[0], FmtFlags::FULL.bits());
    assert_eq!(&bytes[1..5], &[0x04, 0x03, 0x02, 0x01]);
    assert_eq!(bytes[5], LogLevel::Info as u8);
    assert_eq!(bytes[6], 2);
    assert_eq!(&bytes[7..9], b"io");
    assert_eq!(bytes[9], 0); // FUNC set but no function supplied
    assert_eq!(&bytes[10..14], &[7, 0, 0, 0]);
    assert_eq!(bytes[14], 2);
    assert_eq!(&bytes[15..17], b"ok");

    let sum = bytes[..17].iter().fold(0u8, |acc, b| acc ^ b);
    assert_eq!(bytes[17], sum);
}

#[test]
fn test_encode_is_deterministic() {
    let a = encode(&sample("same input"), FmtFlags::FULL);
    let b = encode(&sample("same input"), FmtFlags::FULL);
    assert_eq!(a.as_bytes(), b.as_bytes());
}

#[test]
fn test_semantic_round_trip() {
    let rec = LogRecord {
        level: LogLevel::Error,
        tag: "sensor",
        timestamp: 99_000,
        function: Some("read_adc"),
        line: Some(311),
        message: "saturation on channel 2",
    };
    let encoded = encode(&rec, FmtFlags::FULL);
    let decoded = decode(encoded.as_bytes()).expect("valid record");

    assert_eq!(decoded.level, LogLevel::Error);
    assert_eq!(decoded.tag(), "sensor");
    assert_eq!(decoded.timestamp, 99_000);
    assert_eq!(decoded.function(), Some("read_adc"));
    assert_eq!(decoded.line, Some(311));
    assert_eq!(decoded.message(), "saturation on channel 2");
    assert_eq!(decoded.flags, FmtFlags::FULL);
}

#[test]
fn test_mask_controls_presence() {
    let mask = FmtFlags::LVL | FmtFlags::TIME;
    let encoded = encode(&sample("bare"), mask);
    let decoded = decode(encoded.as_bytes()).unwrap();

    assert_eq!(decoded.tag(), "");
    assert_eq!(decoded.function(), None);
    assert_eq!(decoded.line, None);
    assert_eq!(decoded.timestamp, 0x0102_0304);
    assert_eq!(decoded.message(), "bare");

    // Dropping TIME zeroes the stored timestamp as well.
    let encoded = encode(&sample("bare"), FmtFlags::LVL);
    assert_eq!(decode(encoded.as_bytes()).unwrap().timestamp, 0);
}

#[test]
fn test_oversized_message_truncates_with_flag() {
    let long = "m".repeat(MAX_MSG_LEN + 40);
    let encoded = encode(&sample(&long), FmtFlags::FULL);
    let decoded = decode(encoded.as_bytes()).unwrap();

    assert!(decoded.truncated());
    assert_eq!(decoded.message().len(), MAX_MSG_LEN);
    assert_eq!(decoded.message(), &long[..MAX_MSG_LEN]);
}

#[test]
fn test_fitting_message_not_flagged() {
    let exact = "m".repeat(MAX_MSG_LEN);
    let encoded = encode(&sample(&exact), FmtFlags::FULL);
    assert!(!decode(encoded.as_bytes()).unwrap().truncated());
}

#[test]
fn test_corrupt_bytes_rejected() {
    let encoded = encode(&sample("pristine"), FmtFlags::FULL);
    let good = encoded.as_bytes();

    for i in 0..good.len() {
        let mut bad = good.to_vec();
        bad[i] ^= 0x10;
        assert!(decode(&bad).is_none(), "flip at byte {} must be caught", i);
    }
    assert!(decode(good).is_some());
}

#[test]
fn test_decode_rejects_truncated_input() {
    let encoded = encode(&sample("cut short"), FmtFlags::FULL);
    let good = encoded.as_bytes();
    assert!(decode(&good[..good.len() - 3]).is_none());
    assert!(decode(&[]).is_none());
}

//! Per-shot measurement records.
//!
//! Samples live in a process-wide pool: guns [`acquire`] one per shot, fill
//! it, push it into an aggregator sink, and the aggregator [`release`]s it
//! after serializing. Releasing consumes the box, so a released sample can
//! not be touched again.

pub mod codec;

use std::error::Error as StdError;
use std::io;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;

use crate::error::BoxError;
use crate::pool::Pool;

// ─── Configuration ───────────────────────────────────────────────

/// Idle samples kept around between shots.
const SAMPLE_POOL_CAPACITY: usize = 64 * 1024;

/// Errno slot value when no OS error is recoverable from the error chain.
pub const UNKNOWN_ERRNO: i64 = 999;

static SAMPLE_POOL: Lazy<Pool<Sample>> = Lazy::new(|| Pool::new(SAMPLE_POOL_CAPACITY));

// ─── Fields ──────────────────────────────────────────────────────

/// Well-known slots of the fixed-size field vector, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Field {
    Rtt,
    Connect,
    Send,
    Latency,
    Receive,
    IntervalEvent,
    RequestBytes,
    ResponseBytes,
    Errno,
    ProtoCode,
}

pub const FIELD_COUNT: usize = 10;

// ─── Sample ──────────────────────────────────────────────────────

pub struct Sample {
    timestamp: DateTime<Utc>,
    started: Instant,
    tag: String,
    fields: [i64; FIELD_COUNT],
    err: Option<BoxError>,
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            started: Instant::now(),
            tag: String::new(),
            fields: [0; FIELD_COUNT],
            err: None,
        }
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("timestamp", &self.timestamp)
            .field("tag", &self.tag)
            .field("fields", &self.fields)
            .field("err", &self.err.as_ref().map(|e| e.to_string()))
            .finish()
    }
}

/// Takes a sample from the pool, stamped now and tagged `tag`.
pub fn acquire(tag: &str) -> Box<Sample> {
    let mut sample = SAMPLE_POOL.get();
    sample.reset(tag);
    sample
}

/// Returns a sample to the pool.
pub fn release(mut sample: Box<Sample>) {
    sample.err = None;
    SAMPLE_POOL.put(sample);
}

impl Sample {
    fn reset(&mut self, tag: &str) {
        self.timestamp = Utc::now();
        self.started = Instant::now();
        self.tag.clear();
        self.tag.push_str(tag);
        self.fields = [0; FIELD_COUNT];
        self.err = None;
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Appends a `|`-separated segment to the tag.
    pub fn add_tag(&mut self, segment: &str) {
        self.tag.push('|');
        self.tag.push_str(segment);
    }

    pub fn fields(&self) -> &[i64; FIELD_COUNT] {
        &self.fields
    }

    pub fn get(&self, field: Field) -> i64 {
        self.fields[field as usize]
    }

    pub fn set(&mut self, field: Field, value: i64) {
        self.fields[field as usize] = value;
    }

    /// Stores `elapsed` in microseconds.
    pub fn set_duration(&mut self, field: Field, elapsed: Duration) {
        self.set(field, micros(elapsed));
    }

    pub fn rtt(&self) -> i64 {
        self.get(Field::Rtt)
    }

    pub fn proto_code(&self) -> i64 {
        self.get(Field::ProtoCode)
    }

    pub fn errno(&self) -> i64 {
        self.get(Field::Errno)
    }

    pub fn err(&self) -> Option<&BoxError> {
        self.err.as_ref()
    }

    pub fn set_proto_code(&mut self, code: impl Into<i64>) {
        self.set(Field::ProtoCode, code.into());
        self.fill_rtt();
    }

    /// Records `err` as the last error and its OS errno (or
    /// [`UNKNOWN_ERRNO`]) in the errno slot.
    pub fn set_err(&mut self, err: impl Into<BoxError>) {
        let err = err.into();
        self.set(Field::Errno, errno_of(err.as_ref()));
        self.err = Some(err);
        self.fill_rtt();
    }

    /// First write wins: later codes or errors keep the original RTT.
    fn fill_rtt(&mut self) {
        if self.rtt() == 0 {
            self.set(Field::Rtt, micros(self.started.elapsed()).max(1));
        }
    }
}

fn micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

// ─── Errno extraction ────────────────────────────────────────────

/// Walks the cause chain looking for an `io::Error` carrying an OS code.
///
/// Custom `io::Error`s are descended into as well, since their `source()`
/// skips the wrapped error itself.
pub fn errno_of(err: &(dyn StdError + 'static)) -> i64 {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if let Some(code) = io_err.raw_os_error() {
                return i64::from(code);
            }
            if let Some(inner) = io_err.get_ref() {
                current = Some(inner as &(dyn StdError + 'static));
                continue;
            }
        }
        current = e.source();
    }
    UNKNOWN_ERRNO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("dial failed")]
    struct DialError(#[source] io::Error);

    #[derive(Debug, thiserror::Error)]
    #[error("request failed")]
    struct RequestError(#[source] DialError);

    #[test]
    fn acquire_resets_everything() {
        let mut s = acquire("first");
        s.set(Field::Latency, 42);
        s.add_tag("extra");
        s.set_err(io::Error::from_raw_os_error(104));
        release(s);

        let s = acquire("second");
        assert_eq!(s.tag(), "second");
        assert!(s.fields().iter().all(|&v| v == 0));
        assert!(s.err().is_none());
        release(s);
    }

    #[test]
    fn add_tag_appends_pipe_segments() {
        let mut s = acquire("REQUEST");
        s.add_tag("a");
        s.add_tag("b");
        assert_eq!(s.tag(), "REQUEST|a|b");
        release(s);
    }

    #[test]
    fn rtt_is_first_write_wins() {
        let mut s = acquire("t");
        std::thread::sleep(Duration::from_millis(2));
        s.set_proto_code(200);
        let rtt = s.rtt();
        assert!(rtt >= 2_000, "rtt {rtt}");

        std::thread::sleep(Duration::from_millis(2));
        s.set_err(io::Error::from_raw_os_error(110));
        assert_eq!(s.rtt(), rtt);
        assert_eq!(s.proto_code(), 200);
        assert_eq!(s.errno(), 110);
        release(s);
    }

    #[test]
    fn rtt_is_positive_even_when_immediate() {
        let mut s = acquire("t");
        s.set_proto_code(200);
        assert!(s.rtt() > 0);
        release(s);
    }

    #[test]
    fn set_err_fills_rtt_from_stamp() {
        let mut s = acquire("t");
        std::thread::sleep(Duration::from_millis(3));
        let before = micros(s.started.elapsed());
        s.set_err(io::Error::from_raw_os_error(111));
        assert!(s.rtt() >= before);
        release(s);
    }

    #[test]
    fn errno_walks_source_chain() {
        let err = RequestError(DialError(io::Error::from_raw_os_error(111)));
        assert_eq!(errno_of(&err), 111);
    }

    #[test]
    fn errno_descends_into_custom_io_errors() {
        let inner = DialError(io::Error::from_raw_os_error(113));
        let err = io::Error::new(io::ErrorKind::Other, inner);
        assert_eq!(errno_of(&err), 113);
    }

    #[test]
    fn errno_falls_back_to_sentinel() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "deadline");
        assert_eq!(errno_of(&err), UNKNOWN_ERRNO);

        let mut s = acquire("t");
        s.set_err("plain message");
        assert_eq!(s.errno(), UNKNOWN_ERRNO);
        release(s);
    }

    #[test]
    fn samples_cross_threads() {
        let s = acquire("moved");
        let handle = std::thread::spawn(move || {
            assert_eq!(s.tag(), "moved");
            release(s);
        });
        handle.join().unwrap();
    }
}

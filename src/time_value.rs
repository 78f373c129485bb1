//! Event timestamps in the two shapes the forward protocol accepts.

use chrono::{DateTime, Utc};

/// MessagePack extension type carrying an [`EventTime`].
pub const EVENT_TIME_EXT_TYPE: i8 = 0;
/// Length of the EventTime extension body.
pub const EVENT_TIME_LEN: u32 = 8;

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Sub-second timestamp encoded as `seconds:u32 ++ nanoseconds:u32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventTime {
    seconds: u32,
    nanoseconds: u32,
}

impl EventTime {
    /// Returns `None` when `nanoseconds` is not below one second.
    pub fn new(seconds: u32, nanoseconds: u32) -> Option<Self> {
        (nanoseconds < NANOS_PER_SEC).then_some(Self {
            seconds,
            nanoseconds,
        })
    }

    /// Split a fractional UNIX timestamp. Negative input clamps to the epoch.
    pub fn from_secs_f64(timestamp: f64) -> Self {
        let timestamp = if timestamp.is_finite() {
            timestamp.max(0.0)
        } else {
            0.0
        };
        let seconds = timestamp.trunc() as u32;
        let nanoseconds =
            ((timestamp.fract() * f64::from(NANOS_PER_SEC)) as u32).min(NANOS_PER_SEC - 1);
        Self {
            seconds,
            nanoseconds,
        }
    }

    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    pub fn nanoseconds(&self) -> u32 {
        self.nanoseconds
    }

    /// Big-endian extension body.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.seconds.to_be_bytes());
        out[4..].copy_from_slice(&self.nanoseconds.to_be_bytes());
        out
    }

    /// Parse an extension body produced by [`EventTime::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != EVENT_TIME_LEN as usize {
            return None;
        }
        let seconds = u32::from_be_bytes(bytes.get(..4)?.try_into().ok()?);
        let nanoseconds = u32::from_be_bytes(bytes.get(4..8)?.try_into().ok()?);
        Self::new(seconds, nanoseconds)
    }

    /// Fractional seconds since the epoch.
    pub fn as_secs_f64(&self) -> f64 {
        f64::from(self.seconds) + f64::from(self.nanoseconds) / f64::from(NANOS_PER_SEC)
    }
}

/// Timestamp attached to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeValue {
    /// Whole seconds since the UNIX epoch.
    Seconds(u64),
    /// Seconds plus nanoseconds, sent as extension type 0.
    EventTime(EventTime),
}

impl TimeValue {
    /// Current wall-clock time in the requested precision.
    pub fn now(nanosecond_precision: bool) -> Self {
        Self::from_datetime(Utc::now(), nanosecond_precision)
    }

    pub fn from_datetime(at: DateTime<Utc>, nanosecond_precision: bool) -> Self {
        let seconds = at.timestamp().max(0);
        if nanosecond_precision {
            // Leap seconds are reported as nanoseconds >= 1e9.
            let nanoseconds = at.timestamp_subsec_nanos().min(NANOS_PER_SEC - 1);
            let seconds = u32::try_from(seconds).unwrap_or(u32::MAX);
            TimeValue::EventTime(EventTime {
                seconds,
                nanoseconds,
            })
        } else {
            TimeValue::Seconds(seconds as u64)
        }
    }

    /// Convert a fractional timestamp, truncating unless nanoseconds are wanted.
    pub fn from_secs_f64(timestamp: f64, nanosecond_precision: bool) -> Self {
        if nanosecond_precision {
            TimeValue::EventTime(EventTime::from_secs_f64(timestamp))
        } else if timestamp.is_finite() && timestamp > 0.0 {
            TimeValue::Seconds(timestamp.trunc() as u64)
        } else {
            TimeValue::Seconds(0)
        }
    }
}

impl From<u64> for TimeValue {
    fn from(seconds: u64) -> Self {
        TimeValue::Seconds(seconds)
    }
}

impl From<EventTime> for TimeValue {
    fn from(time: EventTime) -> Self {
        TimeValue::EventTime(time)
    }
}

use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

/// The number of 100-nanosecond ticks in a millisecond.
pub const TICKS_PER_MILLISECOND: i64 = 10_000;

/// A server-side time limit for a command, sent as `maxTimeMS`.
///
/// The limit is kept in 100-nanosecond ticks. The only negative value that may be represented is
/// [`MaxTime::INFINITE`] (exactly -10000 ticks), which is sent as `0`, i.e. no limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaxTime {
    ticks: i64,
}

impl MaxTime {
    /// No time limit.
    pub const INFINITE: MaxTime = MaxTime {
        ticks: -TICKS_PER_MILLISECOND,
    };

    /// A zero limit, which the server also treats as "no limit".
    pub const ZERO: MaxTime = MaxTime { ticks: 0 };

    /// Creates a limit from a number of 100-nanosecond ticks.
    pub fn from_ticks(ticks: i64) -> Result<Self> {
        if ticks < 0 && ticks != Self::INFINITE.ticks {
            return Err(Error::invalid_argument(format!(
                "max time must be non-negative or infinite, got {} ticks",
                ticks
            )));
        }
        Ok(Self { ticks })
    }

    /// Creates a limit from a number of milliseconds.
    pub fn from_millis(millis: i64) -> Result<Self> {
        let ticks = millis.checked_mul(TICKS_PER_MILLISECOND).ok_or_else(|| {
            Error::invalid_argument(format!("max time of {} ms is out of range", millis))
        })?;
        Self::from_ticks(ticks)
    }

    /// The limit in 100-nanosecond ticks.
    pub fn ticks(&self) -> i64 {
        self.ticks
    }

    /// The value sent to the server: whole milliseconds rounded up and clamped to an `i32`.
    pub fn as_max_time_ms(&self) -> i32 {
        if self.ticks <= 0 {
            return 0;
        }
        let millis = (self.ticks + TICKS_PER_MILLISECOND - 1) / TICKS_PER_MILLISECOND;
        i32::try_from(millis).unwrap_or(i32::MAX)
    }
}

impl From<Duration> for MaxTime {
    fn from(duration: Duration) -> Self {
        let ticks = duration.as_nanos().div_ceil(100);
        Self {
            ticks: i64::try_from(ticks).unwrap_or(i64::MAX),
        }
    }
}

impl Serialize for MaxTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_max_time_ms())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::MaxTime;

    #[test]
    fn rounds_up_to_whole_milliseconds() {
        let table = [
            (-10000, 0),
            (0, 0),
            (1, 1),
            (9999, 1),
            (10000, 1),
            (10001, 2),
            (99999, 10),
        ];
        for (ticks, expected) in table {
            let max_time = MaxTime::from_ticks(ticks).unwrap();
            assert_eq!(max_time.as_max_time_ms(), expected, "ticks = {}", ticks);
        }
    }

    #[test]
    fn clamps_to_i32() {
        let max_time = MaxTime::from_ticks(i64::MAX).unwrap();
        assert_eq!(max_time.as_max_time_ms(), i32::MAX);
    }

    #[test]
    fn rejects_negative_values_other_than_infinite() {
        for ticks in [-10001, -9999, -1, i64::MIN] {
            let error = MaxTime::from_ticks(ticks).unwrap_err();
            assert!(error.is_invalid_argument(), "ticks = {}", ticks);
        }
        assert_eq!(MaxTime::from_ticks(-10000).unwrap(), MaxTime::INFINITE);
    }

    #[test]
    fn from_duration() {
        assert_eq!(MaxTime::from(Duration::from_millis(10)).ticks(), 100_000);
        assert_eq!(MaxTime::from(Duration::from_nanos(1)).as_max_time_ms(), 1);
    }

    #[test]
    fn serializes_as_int32() {
        let doc = bson::to_document(&Wrapper {
            max_time_ms: MaxTime::from_millis(5).unwrap(),
        })
        .unwrap();
        assert_eq!(doc.get("maxTimeMS"), Some(&bson::Bson::Int32(5)));
    }

    #[derive(serde::Serialize)]
    struct Wrapper {
        #[serde(rename = "maxTimeMS")]
        max_time_ms: MaxTime,
    }
}

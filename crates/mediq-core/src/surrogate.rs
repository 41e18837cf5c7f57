//! Surrogate-key encoding: a row id embedding its truncated creation instant.
//!
//! Layout: `(unix epoch milliseconds) << 20 | sequence`. The sequence
//! disambiguates rows ingested within the same millisecond. Because the
//! timestamp occupies the high bits, surrogate-id order is also coarse
//! last-modified order, which is what makes the `_lastUpdated` rewrite and
//! keyset pagination work.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

const SEQUENCE_BITS: u32 = 20;
const SEQUENCE_MAX: i64 = (1 << SEQUENCE_BITS) - 1;

///
/// SurrogateId
///

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub struct SurrogateId(pub i64);

impl SurrogateId {
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Smallest surrogate id a row stamped at `instant` can carry.
    #[must_use]
    pub fn lower_bound(instant: DateTime<Utc>) -> Self {
        Self(instant.timestamp_millis() << SEQUENCE_BITS)
    }

    /// Largest surrogate id a row stamped at `instant` can carry.
    #[must_use]
    pub fn upper_bound(instant: DateTime<Utc>) -> Self {
        Self((instant.timestamp_millis() << SEQUENCE_BITS) | SEQUENCE_MAX)
    }

    /// The embedded creation instant, truncated to milliseconds.
    #[must_use]
    pub fn instant(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0 >> SEQUENCE_BITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bounds_bracket_all_sequences_in_a_millisecond() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let lo = SurrogateId::lower_bound(instant);
        let hi = SurrogateId::upper_bound(instant);

        assert!(lo < hi);
        assert_eq!(hi.0 - lo.0, SEQUENCE_MAX);
        assert_eq!(lo.instant(), Some(instant));
        assert_eq!(hi.instant(), Some(instant));
    }

    #[test]
    fn id_order_follows_timestamp_order() {
        let earlier = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();

        assert!(SurrogateId::upper_bound(earlier) < SurrogateId::lower_bound(later));
    }
}

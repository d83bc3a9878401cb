//! Millisecond Unix timestamps and their compact rendering.
//!
//! Timestamps are 64-bit milliseconds since the Unix epoch, always UTC.
//! Segment file names embed them in the fixed-width `YYYYMMDDTHHMMSSMMM`
//! form so that lexicographic and chronological order coincide.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

use crate::error::{JournalError, JournalResult};

/// Converts a UTC datetime into a journal timestamp.
///
/// # Panics
///
/// Panics on pre-epoch datetimes; the journal never produces them.
#[must_use]
pub fn to_timestamp(t: DateTime<Utc>) -> u64 {
    let ms = t.timestamp_millis();
    assert!(ms >= 0, "pre-epoch timestamps are not representable");
    ms as u64
}

/// Converts a journal timestamp into a UTC datetime.
#[must_use]
pub fn to_datetime(ts: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ts as i64)
        .expect("journal timestamps are within the representable range")
}

/// Renders a timestamp in the compact `YYYYMMDDTHHMMSSMMM` form.
#[must_use]
pub fn format_compact(ts: u64) -> String {
    let t = to_datetime(ts);
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}{:03}",
        t.year(),
        t.month(),
        t.day(),
        t.hour(),
        t.minute(),
        t.second(),
        t.timestamp_subsec_millis()
    )
}

/// Parses the compact `YYYYMMDDTHHMMSSMMM` form back into a timestamp.
pub fn parse_compact(s: &str) -> JournalResult<u64> {
    let bytes = s.as_bytes();
    if bytes.len() != 18 || bytes[8] != b'T' || !bytes.iter().enumerate().all(is_digit_or_t) {
        return Err(JournalError::InvalidTimestamp);
    }

    let year: i32 = parse_digits(&s[0..4])?;
    let month: u32 = parse_digits(&s[4..6])?;
    let day: u32 = parse_digits(&s[6..8])?;
    let hour: u32 = parse_digits(&s[9..11])?;
    let minute: u32 = parse_digits(&s[11..13])?;
    let second: u32 = parse_digits(&s[13..15])?;
    let millis: i64 = parse_digits(&s[15..18])?;

    let t = Utc
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .ok_or(JournalError::InvalidTimestamp)?;
    Ok(to_timestamp(t + Duration::milliseconds(millis)))
}

fn is_digit_or_t((i, b): (usize, &u8)) -> bool {
    if i == 8 {
        *b == b'T'
    } else {
        b.is_ascii_digit()
    }
}

fn parse_digits<T: std::str::FromStr>(s: &str) -> JournalResult<T> {
    s.parse().map_err(|_| JournalError::InvalidTimestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_epoch() {
        assert_eq!(format_compact(0), "19700101T000000000");
    }

    #[test]
    fn round_trip() {
        for ts in [0, 1, 999, 1_000, 1_672_531_200_123, 1_704_067_200_000] {
            assert_eq!(parse_compact(&format_compact(ts)).unwrap(), ts);
        }
    }

    #[test]
    fn parse_known_value() {
        // 2023-01-01 00:00:00.123 UTC
        assert_eq!(parse_compact("20230101T000000123").unwrap(), 1_672_531_200_123);
    }

    #[test]
    fn parse_rejects_garbage() {
        for s in [
            "",
            "2023",
            "20230101X000000123",
            "20230101T0000001234",
            "2023010AT000000123",
            "20231301T000000123",
        ] {
            assert!(parse_compact(s).is_err(), "accepted {s:?}");
        }
    }

    #[test]
    fn datetime_round_trip() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 16, 40).unwrap() + Duration::milliseconds(26);
        let ts = to_timestamp(t);
        assert_eq!(to_datetime(ts), t);
    }
}

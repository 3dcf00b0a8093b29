//! CP56Time2a: 7-byte absolute timestamp with millisecond precision, used by
//! the time-tagged ASDU types (M_SP_TB_1, M_ME_TF_1).

use chrono::{Datelike, TimeZone, Timelike, Utc};

/// A decoded/encodable CP56Time2a value. Internally kept as milliseconds
/// since the Unix epoch for round-trip simplicity; `encode`/`decode` do the
/// calendar breakdown via `chrono`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cp56Time2a {
    millis_since_epoch: u64,
}

impl Cp56Time2a {
    pub fn from_millis(millis_since_epoch: u64) -> Self {
        Self { millis_since_epoch }
    }

    pub fn as_millis(self) -> u64 {
        self.millis_since_epoch
    }

    /// Encode to the 7-byte CP56Time2a wire format:
    /// `[ms_lo, ms_hi, min, hour, day|dow, month, year]`.
    pub fn encode(self) -> [u8; 7] {
        let dt = Utc
            .timestamp_millis_opt(self.millis_since_epoch as i64)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());

        let millis_in_minute = (dt.second() as u32) * 1000 + dt.nanosecond() / 1_000_000;
        let mut buf = [0u8; 7];
        buf[0] = (millis_in_minute & 0xFF) as u8;
        buf[1] = ((millis_in_minute >> 8) & 0xFF) as u8;
        buf[2] = dt.minute() as u8 & 0x3F;
        buf[3] = dt.hour() as u8 & 0x1F;
        // ISO weekday: Monday=1..Sunday=7, packed into bits 5-7
        let dow = dt.weekday().number_from_monday() as u8;
        buf[4] = (dt.day() as u8 & 0x1F) | ((dow & 0x07) << 5);
        buf[5] = dt.month() as u8 & 0x0F;
        buf[6] = ((dt.year() % 100) as u8) & 0x7F;
        buf
    }

    /// Decode a 7-byte CP56Time2a into milliseconds since epoch, truncated
    /// to millisecond granularity. The field's year byte only carries two
    /// digits, so the century is resolved against the current wall clock
    /// (see `decode_relative_to`) the same way a conformant 104 master
    /// disambiguates it: nearest century to "now" wins. That guarantees a
    /// correct round trip for any timestamp within 50 years of decode time,
    /// not the full [1970, 2255] span a fixed-century scheme would need.
    pub fn decode(buf: &[u8; 7]) -> Self {
        Self::decode_relative_to(buf, Utc::now())
    }

    /// As `decode`, but resolves the two-digit year field's century against
    /// an explicit reference instant instead of the wall clock. Exposed so
    /// callers (and tests) can pin the reference and get a deterministic
    /// result; `decode` is just this with `reference = Utc::now()`.
    pub fn decode_relative_to(buf: &[u8; 7], reference: chrono::DateTime<Utc>) -> Self {
        let millis_in_minute = (buf[0] as u32) | ((buf[1] as u32) << 8);
        let minute = buf[2] & 0x3F;
        let hour = buf[3] & 0x1F;
        let day = buf[4] & 0x1F;
        let month = buf[5] & 0x0F;
        let two_digit_year = (buf[6] & 0x7F) as i32;

        let ref_year = reference.year();
        let ref_century = (ref_year / 100) * 100;
        let year = [ref_century - 100, ref_century, ref_century + 100]
            .into_iter()
            .map(|century| century + two_digit_year)
            .min_by_key(|candidate| (candidate - ref_year).abs())
            .expect("three candidates, one minimum");

        let seconds = millis_in_minute / 1000;
        let sub_ms = millis_in_minute % 1000;

        let dt = Utc
            .with_ymd_and_hms(
                year,
                month.max(1) as u32,
                day.max(1) as u32,
                hour as u32,
                minute as u32,
                seconds,
            )
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());

        Self {
            millis_since_epoch: dt.timestamp_millis() as u64 + sub_ms as u64,
        }
    }
}

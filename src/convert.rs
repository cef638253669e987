//! Scalar wire encodings shared by the segment and message layers.
//!
//! All multi-byte integers are little-endian. Prices are fixed-point with four
//! implied decimal places, timestamps are nanoseconds since the Unix epoch
//! (UTC) and symbols are 8-byte ASCII fields right-padded with spaces.
use rust_decimal::Decimal;
use time::{Duration, OffsetDateTime};

use crate::error::FramingError;

/// Number of implied decimal places in a wire price.
pub const PRICE_SCALE: u32 = 4;

/// Width of a symbol field on the wire.
pub const SYMBOL_LEN: usize = 8;

/// Decode a fixed-point wire price. `10_000` is `1.0000`.
pub fn decode_price(raw: i64) -> Decimal {
    Decimal::new(raw, PRICE_SCALE)
}

/// Decode a nanosecond timestamp into a UTC instant.
///
/// Total: an `i64` nanosecond count spans 1677 to 2262, well inside the
/// range `OffsetDateTime` represents.
pub fn decode_timestamp(raw: i64) -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::nanoseconds(raw)
}

/// Decode a whole-second event time (used by scheduled auction times).
pub fn decode_event_time(raw: u32) -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::seconds(i64::from(raw))
}

/// Decode a space-padded ASCII field, dropping the trailing padding.
pub fn decode_symbol(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw.trim_ascii_end()).into_owned()
}

/// Forward-only little-endian cursor over a borrowed buffer.
///
/// Reads past the end return [`FramingError::Truncated`] instead of panicking.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn skip(&mut self, n: usize) -> Result<(), FramingError> {
        self.take(n).map(|_| ())
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], FramingError> {
        if n > self.remaining() {
            return Err(FramingError::Truncated {
                offset: self.pos,
                need: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FramingError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, FramingError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16, FramingError> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn u32(&mut self) -> Result<u32, FramingError> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn i64(&mut self) -> Result<i64, FramingError> {
        self.array().map(i64::from_le_bytes)
    }

    pub fn price(&mut self) -> Result<Decimal, FramingError> {
        self.i64().map(decode_price)
    }

    pub fn timestamp(&mut self) -> Result<OffsetDateTime, FramingError> {
        self.i64().map(decode_timestamp)
    }

    pub fn symbol(&mut self) -> Result<String, FramingError> {
        self.take(SYMBOL_LEN).map(decode_symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    #[test]
    fn price_is_exact_fixed_point() {
        assert_eq!(decode_price(10_000), dec!(1.0000));
        assert_eq!(decode_price(-10_000), dec!(-1.0000));
        assert_eq!(decode_price(1_234_567), dec!(123.4567));
        assert_eq!(decode_price(10_000).scale(), 4);
        assert_eq!(decode_price(10_000).to_string(), "1.0000");
    }

    #[test]
    fn timestamps_are_utc_nanoseconds() {
        assert_eq!(decode_timestamp(0), datetime!(1970-01-01 0:00 UTC));
        assert_eq!(decode_timestamp(1_000_000_000), datetime!(1970-01-01 0:00:01 UTC));
        assert_eq!(decode_timestamp(1_556_893_800_123_456_789), datetime!(2019-05-03 14:30:00.123456789 UTC));
        assert_eq!(decode_event_time(60), datetime!(1970-01-01 0:01 UTC));
    }

    #[test]
    fn every_wire_time_is_representable() {
        assert_eq!(decode_timestamp(i64::MAX), datetime!(2262-04-11 23:47:16.854775807 UTC));
        assert_eq!(decode_timestamp(i64::MIN), datetime!(1677-09-21 0:12:43.145224192 UTC));
        assert_eq!(decode_event_time(u32::MAX), datetime!(2106-02-07 6:28:15 UTC));
    }

    #[test]
    fn symbol_padding_is_stripped() {
        assert_eq!(decode_symbol(b"ZIEXT   "), "ZIEXT");
        assert_eq!(decode_symbol(b"AAPL    "), "AAPL");
        assert_eq!(decode_symbol(b"        "), "");
        assert_eq!(decode_symbol(b"BRK.A   "), "BRK.A");
    }

    #[test]
    fn reader_reports_truncation() {
        let mut r = ByteReader::new(&[1, 0, 2]);
        assert_eq!(r.u16().unwrap(), 1);
        assert_eq!(
            r.u32(),
            Err(FramingError::Truncated { offset: 2, need: 4, available: 1 })
        );
        assert_eq!(r.u8().unwrap(), 2);
        assert_eq!(r.remaining(), 0);
    }
}

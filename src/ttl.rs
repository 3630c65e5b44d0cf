use crate::{Error, Result};

/// Unit of a [`Ttl`] count
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum TtlUnit {
    /// No TTL
    #[default]
    Empty,

    /// Minutes
    Minute,

    /// Hours
    Hour,

    /// Days
    Day,

    /// Weeks
    Week,

    /// Months (fixed 31 days)
    Month,

    /// Years (fixed 365 days)
    Year,
}

impl From<TtlUnit> for u8 {
    fn from(value: TtlUnit) -> Self {
        match value {
            TtlUnit::Empty => 0,
            TtlUnit::Minute => 1,
            TtlUnit::Hour => 2,
            TtlUnit::Day => 3,
            TtlUnit::Week => 4,
            TtlUnit::Month => 5,
            TtlUnit::Year => 6,
        }
    }
}

impl From<u8> for TtlUnit {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Minute,
            2 => Self::Hour,
            3 => Self::Day,
            4 => Self::Week,
            5 => Self::Month,
            6 => Self::Year,
            // Unknown unit bytes behave like no TTL at all
            _ => Self::Empty,
        }
    }
}

/// Time-to-live of a needle or a whole volume, stored in 2 bytes
///
/// The readable form is a count with a trailing unit letter:
///
/// - `3m`: 3 minutes
/// - `4h`: 4 hours
/// - `5d`: 5 days
/// - `6w`: 6 weeks
/// - `7M`: 7 months
/// - `8y`: 8 years
///
/// A purely numeric literal is interpreted as minutes. The empty TTL
/// formats as the empty string.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Ttl {
    count: u8,
    unit: TtlUnit,
}

impl Ttl {
    /// TTL that never expires
    pub const EMPTY: Self = Self {
        count: 0,
        unit: TtlUnit::Empty,
    };

    /// Creates a TTL from a count and a unit.
    #[must_use]
    pub fn new(count: u8, unit: TtlUnit) -> Self {
        Self { count, unit }
    }

    /// Whether this TTL is the empty TTL.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0 || self.unit == TtlUnit::Empty
    }

    /// Reads the 2-byte stored form (count, unit).
    #[must_use]
    pub fn from_bytes(input: [u8; 2]) -> Self {
        Self {
            count: input[0],
            unit: TtlUnit::from(input[1]),
        }
    }

    /// Returns the 2-byte stored form (count, unit).
    #[must_use]
    pub fn as_bytes(&self) -> [u8; 2] {
        [self.count, u8::from(self.unit)]
    }

    /// Reads the stored form packed into the low 16 bits of a `u32`.
    #[must_use]
    pub fn from_u32(ttl: u32) -> Self {
        // NOTE: Truncation keeps the low two bytes, which is the packed form
        #[allow(clippy::cast_possible_truncation)]
        Self::from_bytes([(ttl >> 8) as u8, ttl as u8])
    }

    /// Packs the stored form into the low 16 bits of a `u32`.
    #[must_use]
    pub fn as_u32(&self) -> u32 {
        (u32::from(self.count) << 8) + u32::from(u8::from(self.unit))
    }

    /// Converts the TTL to minutes using fixed conversions
    /// (month = 31 days, year = 365 days).
    #[must_use]
    pub fn minutes(&self) -> u32 {
        let count = u32::from(self.count);
        match self.unit {
            TtlUnit::Empty => 0,
            TtlUnit::Minute => count,
            TtlUnit::Hour => count * 60,
            TtlUnit::Day => count * 60 * 24,
            TtlUnit::Week => count * 60 * 24 * 7,
            TtlUnit::Month => count * 60 * 24 * 31,
            TtlUnit::Year => count * 60 * 24 * 365,
        }
    }
}

impl std::str::FromStr for Ttl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::EMPTY);
        }

        let (count_str, unit) = match s.as_bytes().last() {
            Some(b'0'..=b'9') => (s, TtlUnit::Minute),
            Some(b'm') => (&s[..s.len() - 1], TtlUnit::Minute),
            Some(b'h') => (&s[..s.len() - 1], TtlUnit::Hour),
            Some(b'd') => (&s[..s.len() - 1], TtlUnit::Day),
            Some(b'w') => (&s[..s.len() - 1], TtlUnit::Week),
            Some(b'M') => (&s[..s.len() - 1], TtlUnit::Month),
            Some(b'y') => (&s[..s.len() - 1], TtlUnit::Year),
            _ => return Err(Error::InvalidArgument(format!("bad ttl literal: {s:?}"))),
        };

        let count = count_str
            .parse::<u8>()
            .map_err(|_| Error::InvalidArgument(format!("bad ttl literal: {s:?}")))?;

        Ok(Self { count, unit })
    }
}

impl std::fmt::Display for Ttl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            return Ok(());
        }
        let unit = match self.unit {
            TtlUnit::Empty => return Ok(()),
            TtlUnit::Minute => "m",
            TtlUnit::Hour => "h",
            TtlUnit::Day => "d",
            TtlUnit::Week => "w",
            TtlUnit::Month => "M",
            TtlUnit::Year => "y",
        };
        write!(f, "{}{unit}", self.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn ttl_literal_round_trip() -> crate::Result<()> {
        for literal in ["3m", "4h", "5d", "6w", "7M", "8y", "120m", ""] {
            let ttl = literal.parse::<Ttl>()?;
            assert_eq!(literal, ttl.to_string());
        }
        Ok(())
    }

    #[test]
    fn ttl_bare_number_is_minutes() -> crate::Result<()> {
        let ttl = "30".parse::<Ttl>()?;
        assert_eq!(30, ttl.minutes());
        assert_eq!("30m", ttl.to_string());
        Ok(())
    }

    #[test]
    fn ttl_minutes_conversions() -> crate::Result<()> {
        assert_eq!(60, "1h".parse::<Ttl>()?.minutes());
        assert_eq!(60 * 24, "1d".parse::<Ttl>()?.minutes());
        assert_eq!(60 * 24 * 7, "1w".parse::<Ttl>()?.minutes());
        assert_eq!(60 * 24 * 31, "1M".parse::<Ttl>()?.minutes());
        assert_eq!(60 * 24 * 365, "1y".parse::<Ttl>()?.minutes());
        assert_eq!(0, "".parse::<Ttl>()?.minutes());
        Ok(())
    }

    #[test]
    fn ttl_bytes_round_trip() -> crate::Result<()> {
        for literal in ["3m", "4h", "5d", ""] {
            let ttl = literal.parse::<Ttl>()?;
            assert_eq!(ttl, Ttl::from_bytes(ttl.as_bytes()));
            assert_eq!(ttl, Ttl::from_u32(ttl.as_u32()));
        }
        Ok(())
    }

    #[test]
    fn ttl_rejects_garbage() {
        assert!("5x".parse::<Ttl>().is_err());
        assert!("m".parse::<Ttl>().is_err());
        assert!("1000m".parse::<Ttl>().is_err());
    }
}

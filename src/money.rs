//! Fixed-point monetary amounts
use std::fmt;

use crate::error::EngineError;

/// A monetary amount held as integer minor units (hundredths).
///
/// Amounts are compared with exact integer equality; binary floating point
/// never enters the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(u64);

impl Money {
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }
    pub const fn minor(self) -> u64 {
        self.0
    }
    /// Parse a decimal string such as `"9.99"` into minor units.
    ///
    /// At most two fractional digits are accepted; a single fractional digit
    /// means tenths ("9.5" == "9.50"). Signs, separators and exponents are
    /// rejected.
    pub fn parse(input: &str) -> Result<Self, EngineError> {
        let trimmed = input.trim();
        let bad = || EngineError::InvalidInput(format!("invalid monetary amount {input:?}"));

        let (whole, frac) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        // 12 whole digits keeps whole * 100 far below u64::MAX
        if whole.is_empty() || whole.len() > 12 || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }

        let whole: u64 = whole.parse().map_err(|_| bad())?;
        let frac_minor = if frac.is_empty() {
            0
        } else {
            let digits: u64 = frac.parse().map_err(|_| bad())?;
            if frac.len() == 1 { digits * 10 } else { digits }
        };

        Ok(Self(whole * 100 + frac_minor))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl<C> minicbor::Encode<C> for Money {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.u64(self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Money {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        d.u64().map(Money)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_fractional_digits() {
        assert_eq!(Money::parse("9.99").unwrap(), Money::from_minor(999));
        assert_eq!(Money::parse("0.05").unwrap(), Money::from_minor(5));
        assert_eq!(Money::parse("120").unwrap(), Money::from_minor(12_000));
    }

    #[test]
    fn single_fractional_digit_means_tenths() {
        assert_eq!(Money::parse("9.5").unwrap(), Money::from_minor(950));
    }

    #[test]
    fn rejects_malformed_amounts() {
        for input in ["", "-1", "9.999", "1,00", "1e2", "abc", ".50"] {
            assert!(Money::parse(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn display_round_trips() {
        let amount = Money::from_minor(1_905);
        assert_eq!(amount.to_string(), "19.05");
        assert_eq!(Money::parse(&amount.to_string()).unwrap(), amount);
    }

    #[test]
    fn cbor_encoding() {
        let original = Money::from_minor(999);

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: Money = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }
}

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Smallest stake accepted by the backend.
pub const MIN_STAKE: Amount = Amount::from_cents(100);

/// Largest stake accepted by the backend.
pub const MAX_STAKE: Amount = Amount::from_cents(100_000);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("not a number: {0}")]
    NotANumber(String),
    #[error("amount must be finite and non-negative: {0}")]
    OutOfDomain(String),
}

/// A money amount with two decimal places, held as integer cents.
///
/// On the wire amounts are plain JSON numbers; they are rounded to the
/// nearest cent when decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Round a decimal value to the nearest cent.
    ///
    /// Returns `None` for negative, NaN or infinite input.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let cents = (value * 100.0).round();
        if cents > u64::MAX as f64 {
            return None;
        }
        Some(Self(cents as u64))
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Multiply by `factor`, rounding to the nearest cent.
    pub fn scale(self, factor: f64) -> Option<Self> {
        let cents = (self.0 as f64 * factor).round();
        if !cents.is_finite() || cents < 0.0 || cents > u64::MAX as f64 {
            return None;
        }
        Some(Self(cents as u64))
    }

    /// Profit on this stake when cashed out at `multiplier`: `stake * (multiplier - 1)`.
    pub fn win_at(self, multiplier: Multiplier) -> Self {
        let gain = multiplier.hundredths().saturating_sub(Multiplier::ONE.hundredths()) as u128;
        let cents = (self.0 as u128 * gain + 50) / 100;
        Self(u64::try_from(cents).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value = trimmed
            .parse::<f64>()
            .map_err(|_| AmountError::NotANumber(trimmed.to_string()))?;
        Self::from_f64(value).ok_or_else(|| AmountError::OutOfDomain(trimmed.to_string()))
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Self::from_f64(value).ok_or_else(|| D::Error::custom(format!("invalid amount: {value}")))
    }
}

/// Payout factor of a round, held in hundredths and never below 1.00.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Multiplier(u32);

impl Multiplier {
    pub const ONE: Self = Self(100);

    /// Values below 1.00 are raised to 1.00.
    pub const fn from_hundredths(hundredths: u32) -> Self {
        if hundredths < Self::ONE.0 {
            Self::ONE
        } else {
            Self(hundredths)
        }
    }

    pub const fn hundredths(self) -> u32 {
        self.0
    }

    /// Round to two decimals. Non-finite input and values below 1.00 map to 1.00.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Self::ONE;
        }
        let hundredths = (value * 100.0).round();
        if hundredths >= u32::MAX as f64 {
            return Self(u32::MAX);
        }
        if hundredths < 0.0 {
            return Self::ONE;
        }
        Self::from_hundredths(hundredths as u32)
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl Default for Multiplier {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Multiplier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Multiplier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        f64::deserialize(deserializer).map(Self::from_f64)
    }
}

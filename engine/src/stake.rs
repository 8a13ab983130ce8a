use crate::ActionError;
use crashline_types::{Amount, MAX_STAKE, MIN_STAKE};
use serde::Serialize;

/// Stake the player intends to bet next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StakeInput(Amount);

impl StakeInput {
    pub fn new(initial: Amount) -> Self {
        Self(initial)
    }

    pub fn value(&self) -> Amount {
        self.0
    }

    /// Store a raw value as typed; [Self::validate] brings it into range.
    pub fn set(&mut self, amount: Amount) {
        self.0 = amount;
    }

    /// Multiply the stake by `factor`, then clamp.
    pub fn scale(&mut self, factor: f64, balance: Option<Amount>) -> Result<Amount, ActionError> {
        let scaled = self.0.scale(factor).ok_or(ActionError::OutOfRange)?;
        self.0 = clamp(scaled, balance);
        Ok(self.0)
    }

    pub fn validate(&mut self, balance: Option<Amount>) -> Amount {
        self.0 = clamp(self.0, balance);
        self.0
    }
}

/// Clamp to the accepted stake range, then to the known balance.
///
/// A balance below the minimum stake wins over the range.
pub fn clamp(amount: Amount, balance: Option<Amount>) -> Amount {
    let mut amount = amount.clamp(MIN_STAKE, MAX_STAKE);
    if let Some(balance) = balance {
        amount = amount.min(balance);
    }
    amount
}

/// Whether `amount` lies within the accepted stake range.
pub fn in_range(amount: Amount) -> bool {
    (MIN_STAKE..=MAX_STAKE).contains(&amount)
}

//! Value types shared by the crashline crates.
//!
//! Money is held as integer cents and multipliers as integer hundredths so
//! that balances and payouts never accumulate floating point error.

pub mod amount;
pub use amount::{Amount, AmountError, Multiplier, MAX_STAKE, MIN_STAKE};
pub mod api;
pub use api::{
    BetSettlement, CashOutRequest, CashOutResponse, CrashState, Envelope, GameState, Inbound,
    MyBet, PlaceBetRequest, PlaceBetResponse, RoundAction, RoundUpdate, HISTORY_LIMIT,
};

use crashline_types::{Amount, Multiplier};
use serde::Serialize;

/// The player's single bet for the current round.
///
/// Optimistic actions move the ticket into `Pending` or `CashingOut`; the
/// matching push result then confirms (`Live`, `CashedOut`) or reverts it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BetTicket {
    #[default]
    Empty,
    /// Place-bet sent, credit result not yet received.
    Pending {
        stake: Amount,
        reference_id: Option<String>,
        #[serde(skip)]
        request: u64,
    },
    /// Confirmed and riding the multiplier.
    Live {
        stake: Amount,
        reference_id: Option<String>,
    },
    /// Cash-out sent at `multiplier`, debit result not yet received.
    ///
    /// `stake` is `None` once a crash forfeited the hold before confirmation.
    CashingOut {
        stake: Option<Amount>,
        reference_id: String,
        multiplier: Multiplier,
        provisional_win: Amount,
    },
    CashedOut {
        reference_id: Option<String>,
        stake: Option<Amount>,
        multiplier: Multiplier,
        win: Amount,
    },
}

impl BetTicket {
    pub fn reference_id(&self) -> Option<&str> {
        match self {
            Self::Empty => None,
            Self::Pending { reference_id, .. }
            | Self::Live { reference_id, .. }
            | Self::CashedOut { reference_id, .. } => reference_id.as_deref(),
            Self::CashingOut { reference_id, .. } => Some(reference_id),
        }
    }

    /// Stake currently held by this ticket, zero when none.
    pub fn stake(&self) -> Amount {
        match self {
            Self::Empty => Amount::ZERO,
            Self::Pending { stake, .. } | Self::Live { stake, .. } => *stake,
            Self::CashingOut { stake, .. } | Self::CashedOut { stake, .. } => {
                stake.unwrap_or(Amount::ZERO)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }

    pub fn is_cashed_out(&self) -> bool {
        matches!(self, Self::CashedOut { .. })
    }

    /// Pending or live: the player has a bet riding on this round.
    pub fn is_active(&self) -> bool {
        self.is_pending() || self.is_live()
    }

    /// Multiplier locked in by a requested or confirmed cash-out.
    pub fn cashed_out_multiplier(&self) -> Option<Multiplier> {
        match self {
            Self::CashingOut { multiplier, .. } | Self::CashedOut { multiplier, .. } => {
                Some(*multiplier)
            }
            _ => None,
        }
    }

    /// Win shown to the player: provisional while cashing out, final once confirmed.
    pub fn win(&self) -> Amount {
        match self {
            Self::CashingOut {
                provisional_win, ..
            } => *provisional_win,
            Self::CashedOut { win, .. } => *win,
            _ => Amount::ZERO,
        }
    }

    /// Whether `reference_id` names this ticket. A ticket with no known id
    /// matches any reference.
    pub fn matches(&self, reference_id: Option<&str>) -> bool {
        match (self.reference_id(), reference_id) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => !self.is_empty(),
        }
    }
}

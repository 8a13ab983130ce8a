//! Wire shapes of the push channel and the request/response backend.
//!
//! Field names follow the backend's camelCase JSON. Every optional field is
//! tolerated as absent or `null`.

use crate::{Amount, Multiplier};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hub target carrying round lifecycle transitions.
pub const TARGET_ROUND_UPDATE: &str = "roundUpdate";

/// Hub target confirming or denying a place-bet.
pub const TARGET_CREDIT_RESULT: &str = "creditResult";

/// Hub target confirming or denying a cash-out.
pub const TARGET_DEBIT_RESULT: &str = "debitResult";

/// Maximum number of past crash multipliers kept for display.
pub const HISTORY_LIMIT: usize = 10;

/// Server-reported lifecycle code of a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum RoundAction {
    Created,
    Running,
    Finished,
    Recovered,
}

impl RoundAction {
    pub const fn code(self) -> u16 {
        match self {
            Self::Created => 200,
            Self::Running => 210,
            Self::Finished => 220,
            Self::Recovered => 230,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownRoundAction(pub u16);

impl fmt::Display for UnknownRoundAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown round action code {}", self.0)
    }
}

impl TryFrom<u16> for RoundAction {
    type Error = UnknownRoundAction;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            200 => Ok(Self::Created),
            210 => Ok(Self::Running),
            220 => Ok(Self::Finished),
            230 => Ok(Self::Recovered),
            other => Err(UnknownRoundAction(other)),
        }
    }
}

impl From<RoundAction> for u16 {
    fn from(action: RoundAction) -> Self {
        action.code()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub current_action: RoundAction,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub multiplier: Option<Multiplier>,
}

/// `roundUpdate` push event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundUpdate {
    #[serde(default)]
    pub round_reference_id: Option<String>,
    pub round_id: u64,
    pub game_state: GameState,
}

/// Body of the `creditResult` and `debitResult` push events.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetSettlement {
    pub success: bool,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub bet_reference_id: Option<String>,
    #[serde(default)]
    pub round_reference_id: Option<String>,
    #[serde(default)]
    pub balance: Option<Amount>,
    #[serde(default)]
    pub game_state: Option<GameState>,
    #[serde(default)]
    pub sequence: Option<i64>,
    #[serde(default)]
    pub game_round_id: Option<u64>,
}

impl BetSettlement {
    /// Multiplier reported alongside the settlement, if any.
    pub fn multiplier(&self) -> Option<Multiplier> {
        self.game_state.as_ref().and_then(|state| state.multiplier)
    }
}

/// A typed event delivered by the push channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    RoundUpdate(RoundUpdate),
    CreditResult(BetSettlement),
    DebitResult(BetSettlement),
}

impl Inbound {
    /// Hub target this event is delivered on.
    pub fn target(&self) -> &'static str {
        match self {
            Self::RoundUpdate(_) => TARGET_ROUND_UPDATE,
            Self::CreditResult(_) => TARGET_CREDIT_RESULT,
            Self::DebitResult(_) => TARGET_DEBIT_RESULT,
        }
    }

    /// Decode the first argument of a hub invocation.
    ///
    /// Returns `Ok(None)` for targets this client does not handle.
    pub fn from_invocation(
        target: &str,
        argument: serde_json::Value,
    ) -> Result<Option<Self>, serde_json::Error> {
        let event = match target {
            TARGET_ROUND_UPDATE => Self::RoundUpdate(serde_json::from_value(argument)?),
            TARGET_CREDIT_RESULT => Self::CreditResult(serde_json::from_value(argument)?),
            TARGET_DEBIT_RESULT => Self::DebitResult(serde_json::from_value(argument)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Common response wrapper of the REST backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub data: Option<T>,
}

fn default_success() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBetRequest {
    pub game_round_id: u64,
    pub amount: Amount,
    pub is_free_bet: bool,
    pub sequence: u32,
    pub bet_index: u32,
}

impl PlaceBetRequest {
    pub fn new(game_round_id: u64, amount: Amount) -> Self {
        Self {
            game_round_id,
            amount,
            is_free_bet: false,
            sequence: 0,
            bet_index: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBetResponse {
    pub bet_reference_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashOutRequest {
    pub bet_reference_id: String,
    pub partial_cashout: bool,
    pub sequence: u32,
}

impl CashOutRequest {
    pub fn new(bet_reference_id: impl Into<String>) -> Self {
        Self {
            bet_reference_id: bet_reference_id.into(),
            partial_cashout: false,
            sequence: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashOutResponse {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// One of the player's own bets in the round snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyBet {
    #[serde(default)]
    pub bet_reference_id: Option<String>,
    #[serde(default)]
    pub amount: Amount,
    #[serde(default)]
    pub cashed_out: bool,
    #[serde(default)]
    pub cashout_multiplier: Option<Multiplier>,
}

/// `data` of the `crash-state` response: everything needed to resynchronize.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashState {
    #[serde(default)]
    pub game_round_id: Option<u64>,
    #[serde(default)]
    pub round_reference_id: Option<String>,
    #[serde(default)]
    pub game_state: Option<GameState>,
    #[serde(default)]
    pub history_multipliers: Vec<Multiplier>,
    #[serde(default)]
    pub my_bets: Vec<MyBet>,
    #[serde(default)]
    pub all_bets: Vec<serde_json::Value>,
    #[serde(default)]
    pub sequence: Option<i64>,
    #[serde(default)]
    pub total_bet_count: u64,
    #[serde(default)]
    pub balance: Option<Amount>,
}

impl CrashState {
    /// The bet the snapshot reports for this player, if any.
    pub fn active_bet(&self) -> Option<&MyBet> {
        self.my_bets.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_update_decodes() {
        let value = json!({
            "roundReferenceId": "r-1",
            "roundId": 42,
            "gameState": { "currentAction": 210, "startTime": 1700000000, "multiplier": 1.37 }
        });
        let update: RoundUpdate = serde_json::from_value(value).unwrap();
        assert_eq!(update.round_id, 42);
        assert_eq!(update.game_state.current_action, RoundAction::Running);
        assert_eq!(
            update.game_state.multiplier,
            Some(Multiplier::from_hundredths(137))
        );
    }

    #[test]
    fn test_null_multiplier_and_unknown_action() {
        let value = json!({ "roundId": 1, "gameState": { "currentAction": 200, "multiplier": null } });
        let update: RoundUpdate = serde_json::from_value(value).unwrap();
        assert_eq!(update.game_state.multiplier, None);
        assert_eq!(update.round_reference_id, None);

        let value = json!({ "roundId": 1, "gameState": { "currentAction": 999 } });
        assert!(serde_json::from_value::<RoundUpdate>(value).is_err());
    }

    #[test]
    fn test_settlement_with_sparse_fields() {
        let value = json!({ "success": false, "errorCode": 17 });
        let settlement: BetSettlement = serde_json::from_value(value).unwrap();
        assert!(!settlement.success);
        assert_eq!(settlement.error_code, Some(17));
        assert_eq!(settlement.multiplier(), None);
        assert_eq!(settlement.balance, None);
    }

    #[test]
    fn test_from_invocation() {
        let argument = json!({
            "success": true,
            "betReferenceId": "bet-9",
            "balance": 95.5,
            "gameState": { "currentAction": 210, "multiplier": 3.0 }
        });
        let event = Inbound::from_invocation(TARGET_DEBIT_RESULT, argument)
            .unwrap()
            .unwrap();
        let Inbound::DebitResult(settlement) = &event else {
            panic!("expected debit result");
        };
        assert_eq!(settlement.balance, Some(Amount::from_cents(9_550)));
        assert_eq!(settlement.multiplier(), Some(Multiplier::from_hundredths(300)));
        assert_eq!(event.target(), TARGET_DEBIT_RESULT);

        assert!(Inbound::from_invocation("chatMessage", json!({}))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_request_bodies() {
        let body = serde_json::to_value(PlaceBetRequest::new(7, Amount::from_cents(1_250))).unwrap();
        assert_eq!(
            body,
            json!({ "gameRoundId": 7, "amount": 12.5, "isFreeBet": false, "sequence": 0, "betIndex": 0 })
        );

        let body = serde_json::to_value(CashOutRequest::new("bet-1")).unwrap();
        assert_eq!(
            body,
            json!({ "betReferenceId": "bet-1", "partialCashout": false, "sequence": 1 })
        );
    }

    #[test]
    fn test_crash_state_envelope() {
        let value = json!({
            "success": true,
            "error": null,
            "data": {
                "gameRoundId": 12,
                "roundReferenceId": "round-12",
                "myBets": [{ "betReferenceId": "bet-3", "amount": 10, "cashedOut": false }],
                "allBets": [{ "player": "someone" }],
                "gameState": { "currentAction": 210, "multiplier": 2.35 },
                "historyMultipliers": [1.42, 7.1],
                "sequence": null,
                "totalBetCount": 4
            }
        });
        let envelope: Envelope<CrashState> = serde_json::from_value(value).unwrap();
        let state = envelope.data.unwrap();
        assert_eq!(state.game_round_id, Some(12));
        assert_eq!(state.history_multipliers.len(), 2);
        let bet = state.active_bet().unwrap();
        assert_eq!(bet.amount, Amount::from_cents(1_000));
        assert!(!bet.cashed_out);
        assert_eq!(bet.cashout_multiplier, None);
    }
}

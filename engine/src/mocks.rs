//! Scripted stand-ins for the push channel and the gateway.

use crate::{
    gateway::{Gateway, GatewayError},
    supervisor::PushChannel,
};
use crashline_types::{
    Amount, BetSettlement, CrashState, GameState, Inbound, Multiplier, RoundAction, RoundUpdate,
};
use futures::{channel::mpsc, Stream};
use std::{
    collections::VecDeque,
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

type Item = Result<Inbound, io::Error>;

/// What the next connection attempt does.
pub enum Outcome {
    /// Connect, deliver the events, then end the stream.
    Events(Vec<Inbound>),
    /// Fail to connect.
    Fail,
    /// Connect, deliver the events, and stay open.
    Held(Vec<Inbound>),
}

#[derive(Clone, Default)]
pub struct MockChannel {
    outcomes: Arc<Mutex<VecDeque<Outcome>>>,
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<Item>>>>,
    attempts: Arc<AtomicUsize>,
}

impl MockChannel {
    /// Attempts beyond the script fail.
    pub fn new(outcomes: Vec<Outcome>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into_iter().collect())),
            ..Self::default()
        }
    }

    pub fn script(&self, outcomes: Vec<Outcome>) {
        self.outcomes.lock().unwrap().extend(outcomes);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Deliver an event on the most recent held connection.
    pub fn push(&self, event: Inbound) {
        let senders = self.senders.lock().unwrap();
        let sender = senders.last().expect("no held connection");
        sender.unbounded_send(Ok(event)).expect("connection dropped");
    }

    /// End every held connection.
    pub fn drop_connection(&self) {
        self.senders.lock().unwrap().clear();
    }
}

impl PushChannel for MockChannel {
    type Error = io::Error;

    async fn connect(&self) -> Result<impl Stream<Item = Item> + Send, Self::Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Fail);
        let (sender, receiver) = mpsc::unbounded();
        match outcome {
            Outcome::Fail => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "scripted connect failure",
                ))
            }
            Outcome::Events(events) => {
                for event in events {
                    sender.unbounded_send(Ok(event)).unwrap();
                }
            }
            Outcome::Held(events) => {
                for event in events {
                    sender.unbounded_send(Ok(event)).unwrap();
                }
                self.senders.lock().unwrap().push(sender);
            }
        }
        Ok(receiver)
    }
}

pub fn round_update(round_id: u64, action: RoundAction, hundredths: Option<u32>) -> Inbound {
    Inbound::RoundUpdate(RoundUpdate {
        round_reference_id: Some(format!("round-{round_id}")),
        round_id,
        game_state: game_state(action, hundredths),
    })
}

pub fn game_state(action: RoundAction, hundredths: Option<u32>) -> GameState {
    GameState {
        current_action: action,
        start_time: None,
        multiplier: hundredths.map(Multiplier::from_hundredths),
    }
}

pub fn credit(reference: &str, balance: u64) -> Inbound {
    Inbound::CreditResult(BetSettlement {
        success: true,
        bet_reference_id: Some(reference.to_string()),
        balance: Some(Amount::from_cents(balance)),
        ..BetSettlement::default()
    })
}

pub fn credit_failed(reference: Option<&str>, code: i64) -> Inbound {
    Inbound::CreditResult(BetSettlement {
        success: false,
        error_code: Some(code),
        bet_reference_id: reference.map(str::to_string),
        ..BetSettlement::default()
    })
}

pub fn debit(reference: &str, balance: u64, hundredths: Option<u32>) -> Inbound {
    Inbound::DebitResult(BetSettlement {
        success: true,
        bet_reference_id: Some(reference.to_string()),
        balance: Some(Amount::from_cents(balance)),
        game_state: hundredths.map(|h| game_state(RoundAction::Running, Some(h))),
        ..BetSettlement::default()
    })
}

pub fn debit_failed(reference: &str, code: i64) -> Inbound {
    Inbound::DebitResult(BetSettlement {
        success: false,
        error_code: Some(code),
        bet_reference_id: Some(reference.to_string()),
        ..BetSettlement::default()
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    PlaceBet { round_id: u64, amount: Amount },
    CashOut(String),
    FetchBalance,
    FetchRoundSnapshot,
}

struct Script {
    calls: Vec<Call>,
    balance: Result<Amount, GatewayError>,
    snapshot: Result<CrashState, GatewayError>,
    bets: VecDeque<Result<String, GatewayError>>,
    cash_outs: VecDeque<Result<(), GatewayError>>,
}

/// Gateway that records every call and answers from a script.
///
/// Unscripted bets succeed as `bet-<n>`; unscripted cash-outs succeed.
#[derive(Clone)]
pub struct RecordingGateway {
    script: Arc<Mutex<Script>>,
}

impl RecordingGateway {
    pub fn new(balance: Amount, snapshot: CrashState) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                calls: Vec::new(),
                balance: Ok(balance),
                snapshot: Ok(snapshot),
                bets: VecDeque::new(),
                cash_outs: VecDeque::new(),
            })),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn set_balance(&self, balance: Result<Amount, GatewayError>) {
        self.script.lock().unwrap().balance = balance;
    }

    pub fn set_snapshot(&self, snapshot: Result<CrashState, GatewayError>) {
        self.script.lock().unwrap().snapshot = snapshot;
    }

    pub fn script_bet(&self, result: Result<String, GatewayError>) {
        self.script.lock().unwrap().bets.push_back(result);
    }

    pub fn script_cash_out(&self, result: Result<(), GatewayError>) {
        self.script.lock().unwrap().cash_outs.push_back(result);
    }
}

impl Gateway for RecordingGateway {
    async fn place_bet(&self, round_id: u64, amount: Amount) -> Result<String, GatewayError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::PlaceBet { round_id, amount });
        let n = script.calls.len();
        script
            .bets
            .pop_front()
            .unwrap_or_else(|| Ok(format!("bet-{n}")))
    }

    async fn cash_out(&self, reference_id: String) -> Result<(), GatewayError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::CashOut(reference_id));
        script.cash_outs.pop_front().unwrap_or(Ok(()))
    }

    async fn fetch_balance(&self) -> Result<Amount, GatewayError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::FetchBalance);
        script.balance.clone()
    }

    async fn fetch_round_snapshot(&self) -> Result<CrashState, GatewayError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call::FetchRoundSnapshot);
        script.snapshot.clone()
    }
}

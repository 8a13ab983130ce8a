//! Reconciliation of round phase, bet ticket and balance.
//!
//! [Machine] is a pure reducer: push events, gateway results, timer firings
//! and player commands go in, [Effect]s come out. It never performs I/O or
//! reads a clock; the session executes the effects and feeds their outcome
//! back as new events.

use crate::{
    gateway::GatewayError,
    round::{Phase, RoundSnapshot, COUNTDOWN_TICK, CRASHED_DURATION, FLASH_DURATION},
    stake::{self, StakeInput},
    supervisor::{ConnectionState, ConnectionStatus},
    ticket::BetTicket,
    ActionError,
};
use crashline_types::{
    Amount, BetSettlement, CrashState, Inbound, Multiplier, RoundAction, RoundUpdate,
};
use serde::Serialize;
use std::{collections::HashMap, fmt, mem, time::Duration};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// One-second tick of the pre-round countdown.
    Countdown,
    /// End of the crashed phase.
    Crashed,
    /// End of the cash-out acknowledgment window.
    Flash,
}

/// A scheduled timer. Only the most recently armed generation of each kind
/// is honored when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timer {
    pub kind: TimerKind,
    pub generation: u64,
}

/// Everything the machine reacts to, apart from player commands.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Push(Inbound),
    Connection(ConnectionStatus),
    Snapshot(Result<CrashState, GatewayError>),
    Balance(Result<Amount, GatewayError>),
    BetSubmitted {
        request: u64,
        result: Result<String, GatewayError>,
    },
    CashOutSubmitted {
        reference_id: String,
        result: Result<(), GatewayError>,
    },
    Timer(Timer),
}

/// Player-initiated commands.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Bet `stake`, or the stake editor's value when `None`.
    PlaceBet { stake: Option<Amount> },
    CashOut,
    SetStake(Amount),
    AdjustStake(f64),
    ValidateStake,
}

/// Work requested by the machine.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    PlaceBet {
        request: u64,
        round_id: u64,
        amount: Amount,
    },
    CashOut {
        reference_id: String,
    },
    FetchBalance,
    FetchRoundSnapshot,
    /// Arm `timer`, replacing any timer of the same kind.
    Schedule {
        timer: Timer,
        after: Duration,
    },
    Cancel(TimerKind),
    Notify(Notice),
}

/// A failure the player must be told about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    BetRejected { code: Option<i64> },
    CashOutRejected { code: Option<i64> },
    PlaceBetFailed { reason: String },
    CashOutFailed { reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::BetRejected { code: Some(code) } => write!(f, "bet rejected (code {code})"),
            Notice::BetRejected { code: None } => write!(f, "bet rejected"),
            Notice::CashOutRejected { code: Some(code) } => {
                write!(f, "cash-out rejected (code {code})")
            }
            Notice::CashOutRejected { code: None } => write!(f, "cash-out rejected"),
            Notice::PlaceBetFailed { reason } => write!(f, "bet failed: {reason}"),
            Notice::CashOutFailed { reason } => write!(f, "cash-out failed: {reason}"),
        }
    }
}

/// Read-only projection of the machine, published after every change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct View {
    pub phase: Phase,
    pub multiplier: Multiplier,
    pub round_id: Option<u64>,
    pub countdown: u32,
    pub history: Vec<Multiplier>,
    pub ticket: BetTicket,
    pub balance: Option<Amount>,
    pub connection: ConnectionStatus,
    pub flash: bool,
    pub stake: Amount,
}

#[derive(Default)]
struct Timers {
    next: u64,
    armed: HashMap<TimerKind, u64>,
}

impl Timers {
    fn arm(&mut self, kind: TimerKind, after: Duration, effects: &mut Vec<Effect>) {
        self.next += 1;
        self.armed.insert(kind, self.next);
        effects.push(Effect::Schedule {
            timer: Timer {
                kind,
                generation: self.next,
            },
            after,
        });
    }

    fn disarm(&mut self, kind: TimerKind, effects: &mut Vec<Effect>) -> bool {
        if self.armed.remove(&kind).is_some() {
            effects.push(Effect::Cancel(kind));
            return true;
        }
        false
    }

    fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    fn is_current(&self, timer: &Timer) -> bool {
        self.armed.get(&timer.kind) == Some(&timer.generation)
    }
}

pub struct Machine {
    round: RoundSnapshot,
    ticket: BetTicket,
    balance: Option<Amount>,
    connection: ConnectionStatus,
    stake: StakeInput,
    flash: bool,
    timers: Timers,
    next_request: u64,
    closed: bool,
}

impl Machine {
    pub fn new(default_stake: Amount) -> Self {
        Self {
            round: RoundSnapshot::default(),
            ticket: BetTicket::Empty,
            balance: None,
            connection: ConnectionStatus::default(),
            stake: StakeInput::new(default_stake),
            flash: false,
            timers: Timers::default(),
            next_request: 0,
            closed: false,
        }
    }

    /// Effects to issue once at startup: resynchronize round and balance.
    pub fn start(&self) -> Vec<Effect> {
        vec![Effect::FetchRoundSnapshot, Effect::FetchBalance]
    }

    pub fn round(&self) -> &RoundSnapshot {
        &self.round
    }

    pub fn ticket(&self) -> &BetTicket {
        &self.ticket
    }

    pub fn balance(&self) -> Option<Amount> {
        self.balance
    }

    pub fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether `timer` is still the armed generation of its kind.
    pub fn is_current(&self, timer: &Timer) -> bool {
        self.timers.is_current(timer)
    }

    /// Whether `event` answers something the machine no longer waits for.
    pub fn is_stale(&self, event: &Event) -> bool {
        match event {
            Event::Timer(timer) => !self.timers.is_current(timer),
            Event::BetSubmitted { request, .. } => !matches!(
                self.ticket,
                BetTicket::Pending { request: ours, .. } if ours == *request
            ),
            Event::CashOutSubmitted { reference_id, .. } => !matches!(
                &self.ticket,
                BetTicket::CashingOut { reference_id: ours, .. } if ours == reference_id
            ),
            _ => self.closed,
        }
    }

    pub fn view(&self) -> View {
        View {
            phase: self.round.phase,
            multiplier: self.round.multiplier,
            round_id: self.round.round_id,
            countdown: self.round.countdown,
            history: self.round.history.iter().copied().collect(),
            ticket: self.ticket.clone(),
            balance: self.balance,
            connection: self.connection,
            flash: self.flash,
            stake: self.stake.value(),
        }
    }

    /// Stop reacting to anything. Returns cancellations for every armed timer.
    pub fn close(&mut self) -> Vec<Effect> {
        self.closed = true;
        let mut kinds: Vec<TimerKind> = self.timers.armed.keys().copied().collect();
        kinds.sort_by_key(|kind| *kind as u8);
        self.timers.armed.clear();
        kinds.into_iter().map(Effect::Cancel).collect()
    }

    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.closed {
            debug!(?event, "ignoring event after close");
            return effects;
        }
        match event {
            Event::Push(Inbound::RoundUpdate(update)) => self.on_round_update(update, &mut effects),
            Event::Push(Inbound::CreditResult(settlement)) => {
                self.on_credit_result(settlement, &mut effects)
            }
            Event::Push(Inbound::DebitResult(settlement)) => {
                self.on_debit_result(settlement, &mut effects)
            }
            Event::Connection(status) => self.on_connection(status, &mut effects),
            Event::Snapshot(Ok(state)) => self.on_snapshot(state, &mut effects),
            Event::Snapshot(Err(err)) => {
                warn!(%err, "round snapshot unavailable");
            }
            Event::Balance(Ok(amount)) => {
                debug!(%amount, "balance fetched");
                self.balance = Some(amount);
            }
            Event::Balance(Err(err)) => {
                warn!(%err, "balance unavailable; keeping last known");
            }
            Event::BetSubmitted { request, result } => {
                self.on_bet_submitted(request, result, &mut effects)
            }
            Event::CashOutSubmitted {
                reference_id,
                result,
            } => self.on_cash_out_submitted(reference_id, result, &mut effects),
            Event::Timer(timer) => self.on_timer(timer, &mut effects),
        }
        effects
    }

    pub fn act(&mut self, command: Command) -> Result<Vec<Effect>, ActionError> {
        if self.closed {
            return Err(ActionError::Closed);
        }
        match command {
            Command::PlaceBet { stake } => self.place_bet(stake),
            Command::CashOut => self.cash_out(),
            Command::SetStake(amount) => {
                self.ensure_stake_editable()?;
                self.stake.set(amount);
                Ok(Vec::new())
            }
            Command::AdjustStake(factor) => {
                self.ensure_stake_editable()?;
                self.stake.scale(factor, self.balance)?;
                Ok(Vec::new())
            }
            Command::ValidateStake => {
                self.ensure_stake_editable()?;
                self.stake.validate(self.balance);
                Ok(Vec::new())
            }
        }
    }

    fn ensure_stake_editable(&self) -> Result<(), ActionError> {
        if self.round.phase != Phase::Betting || self.ticket.is_active() {
            return Err(ActionError::NotPermitted);
        }
        Ok(())
    }

    fn place_bet(&mut self, stake: Option<Amount>) -> Result<Vec<Effect>, ActionError> {
        if self.round.phase != Phase::Betting || self.ticket.is_active() {
            return Err(ActionError::NotPermitted);
        }
        let Some(round_id) = self.round.round_id else {
            return Err(ActionError::NotPermitted);
        };
        let amount = stake.unwrap_or_else(|| self.stake.value());
        if !stake::in_range(amount) {
            return Err(ActionError::OutOfRange);
        }
        if let Some(balance) = self.balance {
            if amount > balance {
                return Err(ActionError::InsufficientBalance);
            }
        }
        if !self.connection.is_usable() {
            return Err(ActionError::ConnectionLost);
        }

        self.next_request += 1;
        let request = self.next_request;
        self.ticket = BetTicket::Pending {
            stake: amount,
            reference_id: None,
            request,
        };
        info!(round_id, %amount, request, "placing bet");
        Ok(vec![Effect::PlaceBet {
            request,
            round_id,
            amount,
        }])
    }

    fn cash_out(&mut self) -> Result<Vec<Effect>, ActionError> {
        if self.round.phase != Phase::Running {
            return Err(ActionError::NotPermitted);
        }
        let BetTicket::Live {
            stake,
            reference_id: Some(reference_id),
        } = &self.ticket
        else {
            return Err(ActionError::NotPermitted);
        };
        if !self.connection.is_usable() {
            return Err(ActionError::ConnectionLost);
        }

        let stake = *stake;
        let reference_id = reference_id.clone();
        let multiplier = self.round.multiplier;
        let provisional_win = stake.win_at(multiplier);
        info!(%reference_id, %multiplier, %provisional_win, "cashing out");
        self.ticket = BetTicket::CashingOut {
            stake: Some(stake),
            reference_id: reference_id.clone(),
            multiplier,
            provisional_win,
        };
        Ok(vec![Effect::CashOut { reference_id }])
    }

    fn on_round_update(&mut self, update: RoundUpdate, effects: &mut Vec<Effect>) {
        let multiplier = update.game_state.multiplier;
        match update.game_state.current_action {
            RoundAction::Created => {
                self.round.round_id = Some(update.round_id);
                self.on_created(effects);
            }
            RoundAction::Running => {
                self.round.round_id = Some(update.round_id);
                self.on_running(multiplier, effects);
            }
            RoundAction::Finished => {
                if self.round.phase == Phase::Crashed
                    && self.round.round_id == Some(update.round_id)
                {
                    debug!(round_id = update.round_id, "duplicate round finished");
                    return;
                }
                self.round.round_id = Some(update.round_id);
                self.on_finished(multiplier, true, effects);
            }
            RoundAction::Recovered => {
                info!(round_id = update.round_id, "round recovered; resynchronizing");
                self.round.round_id = Some(update.round_id);
                effects.push(Effect::FetchRoundSnapshot);
            }
        }
    }

    fn on_created(&mut self, effects: &mut Vec<Effect>) {
        if self.round.phase == Phase::Crashed && self.timers.is_armed(TimerKind::Crashed) {
            debug!(round_id = self.round.round_id, "deferring betting until crash display ends");
            return;
        }
        self.timers.disarm(TimerKind::Crashed, effects);
        self.begin_betting(effects);
    }

    fn on_running(&mut self, multiplier: Option<Multiplier>, effects: &mut Vec<Effect>) {
        self.timers.disarm(TimerKind::Countdown, effects);
        self.timers.disarm(TimerKind::Crashed, effects);
        if self.round.phase == Phase::Crashed {
            // The betting phase was skipped entirely
            self.reset_ticket_for_new_round();
        }
        if self.round.phase != Phase::Running {
            info!(round_id = self.round.round_id, "round running");
        }
        self.round.enter_running(multiplier);
    }

    fn on_finished(
        &mut self,
        multiplier: Option<Multiplier>,
        record: bool,
        effects: &mut Vec<Effect>,
    ) {
        self.timers.disarm(TimerKind::Countdown, effects);
        self.round.enter_crashed(multiplier);
        if record {
            self.round.record(self.round.multiplier);
        }
        self.ticket = match mem::take(&mut self.ticket) {
            BetTicket::Pending { stake, .. } | BetTicket::Live { stake, .. } => {
                info!(%stake, "stake forfeited");
                BetTicket::Empty
            }
            BetTicket::CashingOut {
                reference_id,
                multiplier,
                provisional_win,
                ..
            } => BetTicket::CashingOut {
                stake: None,
                reference_id,
                multiplier,
                provisional_win,
            },
            other => other,
        };
        info!(
            round_id = self.round.round_id,
            multiplier = %self.round.multiplier,
            "round crashed"
        );
        self.timers.arm(TimerKind::Crashed, CRASHED_DURATION, effects);
    }

    fn begin_betting(&mut self, effects: &mut Vec<Effect>) {
        self.round.enter_betting();
        self.reset_ticket_for_new_round();
        info!(round_id = self.round.round_id, "betting open");
        self.timers.arm(TimerKind::Countdown, COUNTDOWN_TICK, effects);
    }

    /// Clear the ticket for a new round, keeping an outstanding cash-out.
    fn reset_ticket_for_new_round(&mut self) {
        if !matches!(self.ticket, BetTicket::CashingOut { .. }) {
            self.ticket = BetTicket::Empty;
        }
    }

    fn on_credit_result(&mut self, settlement: BetSettlement, effects: &mut Vec<Effect>) {
        let reference = settlement.bet_reference_id.as_deref();
        if !settlement.success {
            if self.ticket.is_active() && self.ticket.matches(reference) {
                warn!(code = ?settlement.error_code, "bet rejected");
                self.ticket = BetTicket::Empty;
                effects.push(Effect::Notify(Notice::BetRejected {
                    code: settlement.error_code,
                }));
            } else {
                debug!(?reference, "credit failure for untracked bet");
            }
            return;
        }

        let matches = self.ticket.matches(reference);
        match mem::take(&mut self.ticket) {
            BetTicket::Pending {
                stake,
                reference_id,
                ..
            } if matches => {
                let reference_id = settlement.bet_reference_id.clone().or(reference_id);
                info!(?reference_id, %stake, "bet confirmed");
                self.ticket = BetTicket::Live {
                    stake,
                    reference_id,
                };
            }
            BetTicket::Live {
                stake,
                reference_id: None,
            } => {
                self.ticket = BetTicket::Live {
                    stake,
                    reference_id: settlement.bet_reference_id.clone(),
                };
            }
            other => {
                if matches && other.is_live() {
                    debug!(?reference, "duplicate bet confirmation");
                } else {
                    // Its balance may predate ours; ask the backend instead
                    warn!(?reference, "credit result for untracked bet");
                    effects.push(Effect::FetchBalance);
                }
                self.ticket = other;
                return;
            }
        }
        if let Some(balance) = settlement.balance {
            self.balance = Some(balance);
        }
        if self.round.phase == Phase::Running {
            if let Some(multiplier) = settlement.multiplier() {
                self.round.multiplier = multiplier;
            }
        }
    }

    fn on_debit_result(&mut self, settlement: BetSettlement, effects: &mut Vec<Effect>) {
        let reference = settlement.bet_reference_id.as_deref();
        if !settlement.success {
            if matches!(self.ticket, BetTicket::CashingOut { .. }) && self.ticket.matches(reference)
            {
                warn!(code = ?settlement.error_code, "cash-out rejected");
                self.ticket = BetTicket::Empty;
                effects.push(Effect::Notify(Notice::CashOutRejected {
                    code: settlement.error_code,
                }));
            } else {
                debug!(?reference, "debit failure for untracked bet");
            }
            return;
        }

        if self.ticket.is_cashed_out() && self.ticket.matches(reference) {
            debug!(?reference, "duplicate cash-out confirmation");
            return;
        }

        let confirmed = match &self.ticket {
            BetTicket::CashingOut {
                stake,
                reference_id,
                multiplier,
                provisional_win,
            } if self.ticket.matches(reference) => {
                let multiplier = settlement.multiplier().unwrap_or(*multiplier);
                // Without a stake the provisional win is the best estimate left
                let win = match stake {
                    Some(stake) => stake.win_at(multiplier),
                    None => *provisional_win,
                };
                Some(BetTicket::CashedOut {
                    reference_id: Some(reference_id.clone()),
                    stake: *stake,
                    multiplier,
                    win,
                })
            }
            BetTicket::Live {
                stake,
                reference_id,
            } if self.ticket.matches(reference) => {
                let multiplier = settlement.multiplier().unwrap_or(self.round.multiplier);
                Some(BetTicket::CashedOut {
                    reference_id: reference_id
                        .clone()
                        .or_else(|| settlement.bet_reference_id.clone()),
                    stake: Some(*stake),
                    multiplier,
                    win: stake.win_at(multiplier),
                })
            }
            _ => None,
        };

        let Some(ticket) = confirmed else {
            debug!(?reference, "debit result for untracked bet");
            effects.push(Effect::FetchBalance);
            return;
        };
        if let Some(balance) = settlement.balance {
            self.balance = Some(balance);
        }
        info!(
            multiplier = %ticket.cashed_out_multiplier().unwrap_or(Multiplier::ONE),
            win = %ticket.win(),
            "cash-out confirmed"
        );
        self.ticket = ticket;
        self.flash = true;
        self.timers.arm(TimerKind::Flash, FLASH_DURATION, effects);
    }

    fn on_connection(&mut self, status: ConnectionStatus, effects: &mut Vec<Effect>) {
        let previous = self.connection;
        self.connection = status;
        if previous.state != status.state {
            info!(state = ?status.state, attempt = status.attempt, "connection changed");
        }
        if status.state == ConnectionState::Open && previous.state == ConnectionState::Reconnecting
        {
            effects.push(Effect::FetchRoundSnapshot);
            effects.push(Effect::FetchBalance);
        }
    }

    fn on_snapshot(&mut self, state: CrashState, effects: &mut Vec<Effect>) {
        let same_round = self.round.round_id.is_some()
            && state
                .game_round_id
                .map_or(true, |id| self.round.round_id == Some(id));
        if let Some(round_id) = state.game_round_id {
            self.round.round_id = Some(round_id);
        }
        if !state.history_multipliers.is_empty() {
            self.round
                .replace_history(state.history_multipliers.iter().copied());
        }
        if let Some(game_state) = &state.game_state {
            match game_state.current_action {
                RoundAction::Created if same_round && self.round.phase == Phase::Betting => {
                    debug!(round_id = self.round.round_id, "snapshot matches open betting round");
                }
                RoundAction::Created => self.on_created(effects),
                RoundAction::Running => self.on_running(game_state.multiplier, effects),
                RoundAction::Finished => {
                    if self.round.phase != Phase::Crashed {
                        self.on_finished(game_state.multiplier, false, effects);
                    }
                }
                RoundAction::Recovered => {
                    debug!("snapshot reports a recovered round; keeping phase");
                }
            }
        }

        if let Some(bet) = state.active_bet() {
            let reference_id = bet.bet_reference_id.clone();
            if bet.cashed_out {
                if !self.ticket.is_cashed_out() {
                    let multiplier = bet.cashout_multiplier.unwrap_or(Multiplier::ONE);
                    self.ticket = BetTicket::CashedOut {
                        reference_id,
                        stake: Some(bet.amount),
                        multiplier,
                        win: bet.amount.win_at(multiplier),
                    };
                }
            } else if self.round.phase != Phase::Crashed
                && matches!(self.ticket, BetTicket::Empty | BetTicket::Live { .. })
            {
                self.ticket = BetTicket::Live {
                    stake: bet.amount,
                    reference_id,
                };
            }
        }
        if let Some(balance) = state.balance {
            self.balance = Some(balance);
        }
        info!(
            round_id = self.round.round_id,
            phase = ?self.round.phase,
            multiplier = %self.round.multiplier,
            "round snapshot applied"
        );
    }

    fn on_bet_submitted(
        &mut self,
        request: u64,
        result: Result<String, GatewayError>,
        effects: &mut Vec<Effect>,
    ) {
        let pending =
            matches!(self.ticket, BetTicket::Pending { request: ours, .. } if ours == request);
        match result {
            Ok(id) if pending => {
                debug!(reference_id = %id, "bet accepted; awaiting confirmation");
                if let BetTicket::Pending { reference_id, .. } = &mut self.ticket {
                    reference_id.get_or_insert(id);
                }
            }
            Err(err) if pending => {
                warn!(%err, "bet failed");
                self.ticket = BetTicket::Empty;
                effects.push(Effect::Notify(Notice::PlaceBetFailed {
                    reason: err.to_string(),
                }));
            }
            Ok(id) => match &mut self.ticket {
                // Confirmation overtook the response
                BetTicket::Live { reference_id, .. } if reference_id.is_none() => {
                    *reference_id = Some(id);
                }
                _ => debug!(request, reference_id = %id, "stale place-bet result"),
            },
            Err(err) => {
                debug!(request, %err, "stale place-bet failure");
            }
        }
    }

    fn on_cash_out_submitted(
        &mut self,
        reference_id: String,
        result: Result<(), GatewayError>,
        effects: &mut Vec<Effect>,
    ) {
        let err = match result {
            Ok(()) => {
                debug!(%reference_id, "cash-out accepted; awaiting confirmation");
                return;
            }
            Err(err) => err,
        };
        let stake = match &self.ticket {
            BetTicket::CashingOut {
                stake,
                reference_id: ours,
                ..
            } if *ours == reference_id => *stake,
            _ => {
                debug!(%reference_id, %err, "stale cash-out failure");
                return;
            }
        };

        warn!(%err, "cash-out failed");
        self.ticket = match stake {
            Some(stake) if self.round.phase == Phase::Running => BetTicket::Live {
                stake,
                reference_id: Some(reference_id),
            },
            _ => BetTicket::Empty,
        };
        effects.push(Effect::Notify(Notice::CashOutFailed {
            reason: err.to_string(),
        }));
    }

    fn on_timer(&mut self, timer: Timer, effects: &mut Vec<Effect>) {
        if !self.timers.is_current(&timer) {
            debug!(?timer, "stale timer");
            return;
        }
        self.timers.armed.remove(&timer.kind);
        match timer.kind {
            TimerKind::Countdown => {
                if self.round.tick() {
                    self.timers.arm(TimerKind::Countdown, COUNTDOWN_TICK, effects);
                }
            }
            TimerKind::Crashed => {
                if self.round.phase == Phase::Crashed {
                    self.begin_betting(effects);
                }
            }
            TimerKind::Flash => {
                self.flash = false;
            }
        }
    }
}

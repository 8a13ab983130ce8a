use crashline_types::{Multiplier, HISTORY_LIMIT};
use serde::Serialize;
use std::{collections::VecDeque, time::Duration};

/// Length of the local pre-round countdown, in ticks.
pub const COUNTDOWN_SECONDS: u32 = 5;

/// Interval between countdown ticks.
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// How long the crashed phase is shown before betting reopens.
pub const CRASHED_DURATION: Duration = Duration::from_millis(2_000);

/// Length of the visual acknowledgment after a confirmed cash-out.
pub const FLASH_DURATION: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Betting,
    Running,
    Crashed,
}

/// Locally held view of the current round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoundSnapshot {
    pub phase: Phase,
    /// Always 1.00 while betting.
    pub multiplier: Multiplier,
    pub round_id: Option<u64>,
    /// Seconds left before the round starts. Only meaningful while betting.
    pub countdown: u32,
    /// Crash multipliers of past rounds, most recent first.
    pub history: VecDeque<Multiplier>,
}

impl Default for RoundSnapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Betting,
            multiplier: Multiplier::ONE,
            round_id: None,
            countdown: 0,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
        }
    }
}

impl RoundSnapshot {
    pub fn enter_betting(&mut self) {
        self.phase = Phase::Betting;
        self.multiplier = Multiplier::ONE;
        self.countdown = COUNTDOWN_SECONDS;
    }

    /// Enter the running phase, adopting `multiplier` when the server sent one.
    pub fn enter_running(&mut self, multiplier: Option<Multiplier>) {
        if self.phase == Phase::Betting {
            self.multiplier = Multiplier::ONE;
        }
        self.phase = Phase::Running;
        self.countdown = 0;
        if let Some(multiplier) = multiplier {
            self.multiplier = multiplier;
        }
    }

    pub fn enter_crashed(&mut self, multiplier: Option<Multiplier>) {
        self.phase = Phase::Crashed;
        self.countdown = 0;
        if let Some(multiplier) = multiplier {
            self.multiplier = multiplier;
        }
    }

    /// Put a crash multiplier at the front of the history.
    pub fn record(&mut self, multiplier: Multiplier) {
        self.history.push_front(multiplier);
        self.history.truncate(HISTORY_LIMIT);
    }

    /// Replace the history with the server's (already most recent first).
    pub fn replace_history(&mut self, history: impl IntoIterator<Item = Multiplier>) {
        self.history.clear();
        self.history.extend(history.into_iter().take(HISTORY_LIMIT));
    }

    /// Advance the countdown by one tick. Returns whether another tick is due.
    pub fn tick(&mut self) -> bool {
        if self.phase != Phase::Betting {
            return false;
        }
        self.countdown = self.countdown.saturating_sub(1);
        self.countdown > 0
    }
}

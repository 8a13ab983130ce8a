//! Runs the state machine against a live push channel and gateway.
//!
//! The session is the single writer of round, ticket and balance state. Every
//! input (player command, push event, connection change, gateway result,
//! timer) is handled to completion before the next one is looked at.

use crate::{
    backoff::ReconnectPolicy,
    gateway::Gateway,
    state_machine::{Command, Effect, Event, Machine, Notice, TimerKind, View},
    supervisor::{PushChannel, Signal, Supervisor},
    ActionError,
};
use commonware_macros::select;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use crashline_types::Amount;
use futures::{
    channel::{mpsc, oneshot},
    SinkExt, StreamExt,
};
use prometheus_client::metrics::counter::Counter;
use std::{collections::HashMap, sync::atomic::AtomicU64};
use tracing::{debug, info, warn};

pub struct Config<G: Gateway, P: PushChannel> {
    pub gateway: G,
    pub channel: P,
    pub reconnect: ReconnectPolicy,
    pub mailbox_size: usize,
    pub default_stake: Amount,
}

/// Published to subscribers as the session progresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Update {
    View(View),
    Notice(Notice),
}

pub enum Message {
    PlaceBet {
        stake: Option<Amount>,
        response: oneshot::Sender<Result<String, ActionError>>,
    },
    CashOut {
        response: oneshot::Sender<Result<(), ActionError>>,
    },
    Stake {
        command: Command,
        response: oneshot::Sender<Result<Amount, ActionError>>,
    },
    View {
        response: oneshot::Sender<View>,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

/// Handle for issuing player actions to a running [Session].
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    async fn request<T>(
        &mut self,
        message: impl FnOnce(oneshot::Sender<T>) -> Message,
    ) -> Result<T, ActionError> {
        let (response, receiver) = oneshot::channel();
        if self.sender.send(message(response)).await.is_err() {
            warn!("session mailbox closed");
            return Err(ActionError::Closed);
        }
        receiver.await.map_err(|_| ActionError::Closed)
    }

    /// Place a bet of `stake` (or the stake editor's value), resolving with
    /// the reference id once the gateway has answered.
    pub async fn place_bet(&mut self, stake: Option<Amount>) -> Result<String, ActionError> {
        self.request(|response| Message::PlaceBet { stake, response })
            .await?
    }

    pub async fn cash_out(&mut self) -> Result<(), ActionError> {
        self.request(|response| Message::CashOut { response })
            .await?
    }

    pub async fn set_stake(&mut self, amount: Amount) -> Result<Amount, ActionError> {
        self.stake(Command::SetStake(amount)).await
    }

    /// Multiply the stake by `factor` (e.g. 2.0 or 0.5), then clamp it.
    pub async fn adjust_stake(&mut self, factor: f64) -> Result<Amount, ActionError> {
        self.stake(Command::AdjustStake(factor)).await
    }

    pub async fn validate_stake(&mut self) -> Result<Amount, ActionError> {
        self.stake(Command::ValidateStake).await
    }

    async fn stake(&mut self, command: Command) -> Result<Amount, ActionError> {
        self.request(|response| Message::Stake { command, response })
            .await?
    }

    pub async fn view(&mut self) -> Result<View, ActionError> {
        self.request(|response| Message::View { response }).await
    }

    /// Tear the session down. Returns once it has stopped.
    pub async fn shutdown(&mut self) {
        let _ = self.request(|response| Message::Shutdown { response }).await;
    }
}

enum Input {
    Message(Option<Message>),
    Signal(Option<Signal>),
    Event(Option<Event>),
}

pub struct Session<E, G, P>
where
    E: Spawner + Clock + Metrics,
    G: Gateway,
    P: PushChannel,
{
    context: E,
    gateway: G,
    machine: Machine,
    supervisor: Supervisor<E, P>,

    mailbox: mpsc::Receiver<Message>,
    updates: mpsc::UnboundedSender<Update>,
    events: mpsc::UnboundedSender<Event>,
    inbox: mpsc::UnboundedReceiver<Event>,

    timers: HashMap<TimerKind, Handle<()>>,
    bet_replies: HashMap<u64, oneshot::Sender<Result<String, ActionError>>>,
    cash_out_replies: HashMap<String, oneshot::Sender<Result<(), ActionError>>>,
    published: Option<View>,

    events_applied: Counter<u64, AtomicU64>,
    actions_rejected: Counter<u64, AtomicU64>,
    stale_results: Counter<u64, AtomicU64>,
}

impl<E, G, P> Session<E, G, P>
where
    E: Spawner + Clock + Metrics,
    G: Gateway,
    P: PushChannel,
{
    pub fn new(
        context: E,
        config: Config<G, P>,
    ) -> (Self, Mailbox, mpsc::UnboundedReceiver<Update>) {
        let (sender, mailbox) = mpsc::channel(config.mailbox_size);
        let (updates, subscriber) = mpsc::unbounded();
        let (events, inbox) = mpsc::unbounded();

        let events_applied = Counter::default();
        let actions_rejected = Counter::default();
        let stale_results = Counter::default();
        context.register(
            "events_applied_total",
            "Number of events applied to the state machine",
            events_applied.clone(),
        );
        context.register(
            "actions_rejected_total",
            "Number of player actions refused before reaching the gateway",
            actions_rejected.clone(),
        );
        context.register(
            "stale_results_total",
            "Number of timer firings and gateway results that arrived too late to matter",
            stale_results.clone(),
        );

        let supervisor = Supervisor::new(context.clone(), config.channel, config.reconnect);
        (
            Self {
                context,
                gateway: config.gateway,
                machine: Machine::new(config.default_stake),
                supervisor,
                mailbox,
                updates,
                events,
                inbox,
                timers: HashMap::new(),
                bet_replies: HashMap::new(),
                cash_out_replies: HashMap::new(),
                published: None,
                events_applied,
                actions_rejected,
                stale_results,
            },
            Mailbox { sender },
            subscriber,
        )
    }

    pub fn start(self) -> Handle<()> {
        let context = self.context.clone();
        context.spawn(move |context| async move {
            let mut session = self;
            session.context = context;
            session.run().await;
        })
    }

    async fn run(mut self) {
        let effects = self.machine.start();
        self.execute(effects);
        self.supervisor.connect();
        self.publish();

        loop {
            let input = select! {
                message = self.mailbox.next() => { Input::Message(message) },
                signal = self.supervisor.next() => { Input::Signal(signal) },
                event = self.inbox.next() => { Input::Event(event) },
            };
            match input {
                Input::Message(Some(message)) => {
                    self.handle(message);
                    if self.machine.is_closed() {
                        return;
                    }
                }
                Input::Message(None) => {
                    debug!("all mailboxes dropped");
                    self.teardown();
                    return;
                }
                Input::Signal(Some(Signal::Status(status))) => {
                    self.apply(Event::Connection(status))
                }
                Input::Signal(Some(Signal::Inbound(inbound))) => self.apply(Event::Push(inbound)),
                Input::Signal(None) | Input::Event(None) => {
                    warn!("session input closed");
                    self.teardown();
                    return;
                }
                Input::Event(Some(event)) => self.apply(event),
            }
            self.publish();
        }
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::PlaceBet { stake, response } => {
                match self.machine.act(Command::PlaceBet { stake }) {
                    Ok(effects) => {
                        for effect in &effects {
                            if let Effect::PlaceBet { request, .. } = effect {
                                self.bet_replies.insert(*request, response);
                                break;
                            }
                        }
                        self.execute(effects);
                    }
                    Err(err) => {
                        self.actions_rejected.inc();
                        debug!(%err, "bet refused");
                        let _ = response.send(Err(err));
                    }
                }
            }
            Message::CashOut { response } => match self.machine.act(Command::CashOut) {
                Ok(effects) => {
                    for effect in &effects {
                        if let Effect::CashOut { reference_id } = effect {
                            self.cash_out_replies.insert(reference_id.clone(), response);
                            break;
                        }
                    }
                    self.execute(effects);
                }
                Err(err) => {
                    self.actions_rejected.inc();
                    debug!(%err, "cash-out refused");
                    let _ = response.send(Err(err));
                }
            },
            Message::Stake { command, response } => {
                let result = self
                    .machine
                    .act(command)
                    .map(|_| self.machine.view().stake);
                if result.is_err() {
                    self.actions_rejected.inc();
                }
                let _ = response.send(result);
            }
            Message::View { response } => {
                let _ = response.send(self.machine.view());
            }
            Message::Shutdown { response } => {
                self.teardown();
                let _ = response.send(());
            }
        }
    }

    fn apply(&mut self, event: Event) {
        if self.machine.is_stale(&event) {
            self.stale_results.inc();
        }
        match &event {
            Event::BetSubmitted { request, result } => {
                if let Some(reply) = self.bet_replies.remove(request) {
                    let _ = reply.send(result.clone().map_err(ActionError::from));
                }
            }
            Event::CashOutSubmitted {
                reference_id,
                result,
            } => {
                if let Some(reply) = self.cash_out_replies.remove(reference_id) {
                    let _ = reply.send(result.clone().map_err(ActionError::from));
                }
            }
            Event::Timer(timer) if self.machine.is_current(timer) => {
                self.timers.remove(&timer.kind);
            }
            _ => {}
        }

        self.events_applied.inc();
        let effects = self.machine.apply(event);
        self.execute(effects);
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::PlaceBet {
                    request,
                    round_id,
                    amount,
                } => {
                    let gateway = self.gateway.clone();
                    let events = self.events.clone();
                    self.context.with_label("place_bet").spawn(move |_| async move {
                        let result = gateway.place_bet(round_id, amount).await;
                        let _ = events.unbounded_send(Event::BetSubmitted { request, result });
                    });
                }
                Effect::CashOut { reference_id } => {
                    let gateway = self.gateway.clone();
                    let events = self.events.clone();
                    self.context.with_label("cash_out").spawn(move |_| async move {
                        let result = gateway.cash_out(reference_id.clone()).await;
                        let _ = events.unbounded_send(Event::CashOutSubmitted {
                            reference_id,
                            result,
                        });
                    });
                }
                Effect::FetchBalance => {
                    let gateway = self.gateway.clone();
                    let events = self.events.clone();
                    self.context
                        .with_label("fetch_balance")
                        .spawn(move |_| async move {
                            let result = gateway.fetch_balance().await;
                            let _ = events.unbounded_send(Event::Balance(result));
                        });
                }
                Effect::FetchRoundSnapshot => {
                    let gateway = self.gateway.clone();
                    let events = self.events.clone();
                    self.context
                        .with_label("fetch_snapshot")
                        .spawn(move |_| async move {
                            let result = gateway.fetch_round_snapshot().await;
                            let _ = events.unbounded_send(Event::Snapshot(result));
                        });
                }
                Effect::Schedule { timer, after } => {
                    let events = self.events.clone();
                    let handle = self
                        .context
                        .with_label("timer")
                        .spawn(move |context| async move {
                            context.sleep(after).await;
                            let _ = events.unbounded_send(Event::Timer(timer));
                        });
                    if let Some(previous) = self.timers.insert(timer.kind, handle) {
                        previous.abort();
                    }
                }
                Effect::Cancel(kind) => {
                    if let Some(handle) = self.timers.remove(&kind) {
                        handle.abort();
                    }
                }
                Effect::Notify(notice) => {
                    warn!(%notice, "player notice");
                    let _ = self.updates.unbounded_send(Update::Notice(notice));
                }
            }
        }
    }

    /// Publish the view if it changed since the last publication.
    fn publish(&mut self) {
        let view = self.machine.view();
        if self.published.as_ref() == Some(&view) {
            return;
        }
        let _ = self.updates.unbounded_send(Update::View(view.clone()));
        self.published = Some(view);
    }

    fn teardown(&mut self) {
        self.supervisor.disconnect();
        let effects = self.machine.close();
        self.execute(effects);
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        // Pending callers observe `Closed`
        self.bet_replies.clear();
        self.cash_out_replies.clear();
        info!("session closed");
    }
}

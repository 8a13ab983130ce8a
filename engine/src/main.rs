use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use commonware_runtime::{tokio, Metrics, Runner, Spawner};
use crashline_engine::{
    defaults::SESSION_TOKEN_ENV, session, Config, Mailbox, Session, Update, ValidatedConfig,
};
use crashline_types::Amount;
use futures::StreamExt;
use ::tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// A line typed by the player.
#[derive(Debug, PartialEq)]
enum Input {
    Bet(Option<Amount>),
    CashOut,
    Stake(Amount),
    Double,
    Half,
    Quit,
}

fn parse_input(line: &str) -> Result<Option<Input>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let amount = |word: Option<&str>| -> Result<Option<Amount>, String> {
        word.map(|word| word.parse::<Amount>().map_err(|err| err.to_string()))
            .transpose()
    };
    let input = match verb {
        "bet" => Input::Bet(amount(words.next())?),
        "cashout" | "cash" => Input::CashOut,
        "stake" => Input::Stake(amount(words.next())?.ok_or("usage: stake <amount>")?),
        "x2" => Input::Double,
        "half" => Input::Half,
        "quit" | "exit" => Input::Quit,
        other => return Err(format!("unknown command: {other}")),
    };
    if words.next().is_some() {
        return Err(format!("too many arguments for {verb}"));
    }
    Ok(Some(input))
}

async fn perform(mailbox: &mut Mailbox, input: Input) {
    let outcome = match input {
        Input::Bet(stake) => mailbox
            .place_bet(stake)
            .await
            .map(|reference| format!("bet placed ({reference})")),
        Input::CashOut => mailbox
            .cash_out()
            .await
            .map(|()| "cash-out requested".to_string()),
        Input::Stake(amount) => {
            if let Err(err) = mailbox.set_stake(amount).await {
                println!("? {err}");
                return;
            }
            mailbox
                .validate_stake()
                .await
                .map(|stake| format!("stake {stake}"))
        }
        Input::Double => mailbox
            .adjust_stake(2.0)
            .await
            .map(|stake| format!("stake {stake}")),
        Input::Half => mailbox
            .adjust_stake(0.5)
            .await
            .map(|stake| format!("stake {stake}")),
        Input::Quit => return,
    };
    match outcome {
        Ok(message) => println!("{message}"),
        Err(err) => println!("? {err}"),
    }
}

fn print_dry_run_report(config: &ValidatedConfig) {
    println!("dry-run report");
    println!("  api: {}", config.api_base_url);
    println!("  hub: {}", config.hub_url);
    println!(
        "  session_token: {}",
        if config.session_token.is_some() {
            "set"
        } else {
            "missing"
        }
    );
    println!(
        "  reconnect: max_attempts={} base_delay={:?} max_delay={:?}",
        config.reconnect.max_attempts, config.reconnect.base_delay, config.reconnect.max_delay
    );
    println!("  default_stake: {}", config.default_stake);
}

fn main() {
    if let Err(err) = main_result() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn main_result() -> Result<()> {
    // Parse arguments
    let matches = Command::new("crashline")
        .about("Terminal client for the crash game.")
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Validate config and exit without connecting")
                .action(ArgAction::SetTrue),
        )
        .arg(Arg::new("config").long("config").required(true))
        .get_matches();
    let dry_run = matches.get_flag("dry-run");

    // Load config
    let config_file = matches
        .get_one::<String>("config")
        .context("missing --config")?;
    let config_file = std::fs::read_to_string(config_file)
        .with_context(|| format!("Could not read config file {config_file}"))?;
    let mut config: Config =
        serde_yaml::from_str(&config_file).context("Could not parse config file")?;
    if let Ok(token) = std::env::var(SESSION_TOKEN_ENV) {
        config.session_token = Some(token);
    }

    if dry_run {
        println!("{:#?}", config.redacted_debug());
        let config = config.validate()?;
        config.client().context("Failed to create client")?;
        print_dry_run_report(&config);
        println!("config ok");
        return Ok(());
    }

    let config = config.validate()?;

    // Initialize runtime
    let cfg = tokio::Config::default()
        .with_worker_threads(config.worker_threads)
        .with_catch_panics(true);
    let executor = tokio::Runner::new(cfg);

    // Start runtime
    executor.start(|context| async move {
        let context = context.with_label("crashline");
        let result: Result<()> = async {
            // Configure telemetry
            tokio::telemetry::init(
                context.with_label("telemetry"),
                tokio::telemetry::Logging {
                    level: config.log_level,
                    json: config.json_logs,
                },
                None,
                None,
            );
            info!(
                api = %config.api_base_url,
                hub = %config.hub_url,
                "starting crashline"
            );
            if config.session_token.is_none() {
                warn!("no session token configured; the backend will likely refuse requests");
            }

            // Start session
            let client = config.client().context("Failed to create client")?;
            let (session, mut mailbox, mut updates) = Session::new(
                context.with_label("session"),
                session::Config {
                    gateway: client.clone(),
                    channel: client,
                    reconnect: config.reconnect,
                    mailbox_size: config.mailbox_size,
                    default_stake: config.default_stake,
                },
            );
            let handle = session.start();

            // Report updates
            context.with_label("updates").spawn(|_| async move {
                while let Some(update) = updates.next().await {
                    match update {
                        Update::View(view) => match serde_json::to_string(&view) {
                            Ok(view) => info!(%view, "state"),
                            Err(err) => warn!(?err, "failed to render view"),
                        },
                        Update::Notice(notice) => println!("! {notice}"),
                    }
                }
            });

            // Read player commands
            let mut lines = BufReader::new(::tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
                match parse_input(&line) {
                    Ok(None) => {}
                    Ok(Some(Input::Quit)) => break,
                    Ok(Some(input)) => perform(&mut mailbox, input).await,
                    Err(err) => println!("? {err}"),
                }
            }

            mailbox.shutdown().await;
            if let Err(e) = handle.await {
                error!(?e, "session task failed");
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            error!(?e, "crashline failed");
        }
    });
    Ok(())
}

//! `tvremote`: Samsung Smart TV remote for the command line.
//!
//! # Usage
//!
//! ```text
//! tvremote discover                     Find TVs on the LAN
//! tvremote connect <IP> [--name NAME]   Pair with a TV and remember it
//! tvremote key <KEY>                    Press one key (mute, volup, 7, ...)
//! tvremote channel <N>                  Type a channel number and ENTER
//! tvremote test <A> <B> [--step-secs S] Switch A → B → A, S seconds apart
//! tvremote status                       Show the saved TV
//! tvremote forget                       Forget the saved TV and its token
//! tvremote auto-connect <on|off>        Toggle reconnect on start
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                | Description                          |
//! |-------------------------|--------------------------------------|
//! | `TVREMOTE_CONFIG`       | Path to `config.toml`                |
//! | `TVREMOTE_TIMEOUT_SECS` | How long to wait for a connection    |
//! | `RUST_LOG`              | Log filter; overrides `log_level`    |
//!
//! Saved state lives in `state.toml` next to the config file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tvremote_controller::application::connection::ConnectionManager;
use tvremote_controller::application::dispatcher::CommandDispatcher;
use tvremote_controller::application::sequencer::{SequencerHandle, SequencerSettings};
use tvremote_controller::application::session::{SendOutcome, SessionHandle, SessionSettings};
use tvremote_controller::infrastructure::network::discovery::{
    mark_connected, DiscoveryEngine, DiscoveryEvent, DiscoverySettings,
};
use tvremote_controller::infrastructure::network::transport::WssChannel;
use tvremote_controller::infrastructure::storage::config::{
    config_file_path, load_config_from, AppConfig,
};
use tvremote_controller::infrastructure::storage::state::{
    KeyValueStore, MemoryStore, TomlStateStore,
};
use tvremote_core::{RemoteKey, SessionSnapshot, SessionStatus};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "tvremote",
    about = "Discover and control Samsung Smart TVs on the local network",
    version
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, env = "TVREMOTE_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds to wait for the TV to accept the connection.
    #[arg(long, global = true, default_value_t = 30, env = "TVREMOTE_TIMEOUT_SECS")]
    timeout_secs: u64,

    /// Keep saved state in memory only.
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search the LAN for Samsung TVs.
    Discover,
    /// Pair with a TV and save it as the default.
    Connect {
        ip: String,
        /// Display name stored with the TV.
        #[arg(long)]
        name: Option<String>,
    },
    /// Press one remote key.
    Key { key: RemoteKey },
    /// Type a channel number followed by ENTER.
    Channel { number: u32 },
    /// Switch to A, then B, then back to A.
    Test {
        channel_a: u32,
        channel_b: u32,
        #[arg(long, default_value_t = 10)]
        step_secs: u64,
    },
    /// Show the saved TV.
    Status,
    /// Forget the saved TV and its pairing token.
    Forget,
    /// Enable or disable reconnecting to the saved TV.
    AutoConnect {
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

// ── Wiring ────────────────────────────────────────────────────────────────────

struct App {
    config: AppConfig,
    timeout: Duration,
    manager: ConnectionManager,
}

impl App {
    fn build(config: AppConfig, store: Arc<dyn KeyValueStore>, timeout: Duration) -> Self {
        let session = SessionHandle::spawn(
            Arc::new(WssChannel::new()),
            store.clone(),
            SessionSettings::from_config(&config),
        );
        let manager = ConnectionManager::new(session, store, config.startup.settle_delay());
        Self {
            config,
            timeout,
            manager,
        }
    }

    fn session(&self) -> &SessionHandle {
        self.manager.session()
    }

    /// Reaches CONNECTED with the saved TV, or fails.
    async fn ensure_connected(&self) -> anyhow::Result<()> {
        if !self.manager.start() {
            let identity = self
                .manager
                .saved_identity()?
                .ok_or_else(|| anyhow!("no TV saved; run `tvremote connect <IP>` first"))?;
            self.session().connect(&identity.ip).await?;
        }
        wait_for_connection(self.session(), self.timeout).await?;
        Ok(())
    }
}

/// Waits for CONNECTED, telling the user when the TV shows its pairing prompt.
async fn wait_for_connection(
    session: &SessionHandle,
    timeout: Duration,
) -> anyhow::Result<SessionSnapshot> {
    let mut rx = session.subscribe();
    let wait = async {
        let mut prompted = false;
        loop {
            let snapshot = rx.borrow_and_update().clone();
            match snapshot.status {
                SessionStatus::Connected => return Ok(snapshot),
                SessionStatus::Error => bail!(
                    "connection failed: {}",
                    snapshot.last_error.as_deref().unwrap_or("unknown error")
                ),
                SessionStatus::Disconnected if snapshot.ip.is_some() => {
                    bail!("the TV closed the connection")
                }
                _ => {}
            }
            if snapshot.awaiting_pairing_approval && !prompted {
                println!("Allow this device on the TV screen to finish pairing.");
                prompted = true;
            }
            if rx.changed().await.is_err() {
                bail!("session stopped");
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .with_context(|| format!("no connection after {}s", timeout.as_secs()))?
}

fn open_store(config_path: &Path, ephemeral: bool) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    if ephemeral {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let state_path = config_path
        .parent()
        .map(|dir| dir.join("state.toml"))
        .unwrap_or_else(|| PathBuf::from("state.toml"));
    let store = TomlStateStore::open(&state_path)
        .with_context(|| format!("cannot open state file {}", state_path.display()))?;
    Ok(Arc::new(store))
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Searches the LAN while the saved TV auto-connects in the background, so
/// the listing can flag the TV that is live.
async fn discover(app: &App) -> anyhow::Result<()> {
    let saved_ip = app.manager.saved_identity()?.map(|identity| identity.ip);
    if app.manager.start() {
        debug!("auto-connecting to the saved TV during discovery");
    }

    let config = &app.config;
    let engine = DiscoveryEngine::new(DiscoverySettings::from_config(
        &config.discovery,
        &config.session,
    ));
    println!("Searching for TVs ({} ms)...", config.discovery.timeout_ms);

    let mut events = engine.start();
    while let Some(event) = events.recv().await {
        match event {
            DiscoveryEvent::Found(record) => debug!("found {}", record.ip),
            DiscoveryEvent::Updated(record) => debug!("{} is {}", record.ip, record.display_name()),
            DiscoveryEvent::Done(mut records) => {
                if records.is_empty() {
                    println!("No TVs found.");
                }
                mark_connected(&mut records, &app.session().snapshot());
                for record in records {
                    let marker = if record.is_connected {
                        " (connected)"
                    } else if saved_ip.as_deref() == Some(record.ip.as_str()) {
                        " (saved)"
                    } else {
                        ""
                    };
                    println!("{:<16} {}{}", record.ip, record.display_name(), marker);
                }
            }
        }
    }
    Ok(())
}

async fn connect(app: &App, ip: &str, name: Option<&str>) -> anyhow::Result<()> {
    app.manager.connect_to_tv(ip, name).await?;
    wait_for_connection(app.session(), app.timeout).await?;
    println!("Connected to {}.", name.unwrap_or(ip));
    Ok(())
}

async fn press_key(app: &App, key: RemoteKey) -> anyhow::Result<()> {
    app.ensure_connected().await?;
    let dispatcher = CommandDispatcher::new(app.session().clone());
    match dispatcher.send_key(key).await {
        SendOutcome::Sent => Ok(()),
        other => bail!("{key} not sent: {other:?}"),
    }
}

async fn type_channel(app: &App, number: u32) -> anyhow::Result<()> {
    app.ensure_connected().await?;
    let sequencer = spawn_sequencer(app);
    sequencer.send_digits_then_enter(number).await?;
    sequencer.wait_idle().await;
    Ok(())
}

async fn channel_test(app: &App, a: u32, b: u32, step: Duration) -> anyhow::Result<()> {
    app.ensure_connected().await?;
    let sequencer = spawn_sequencer(app);
    let plan = sequencer.run_channel_test(a, b, step).await?;
    println!("Running test {plan}: {a} → {b} → {a}, {}s apart. Ctrl-C cancels.", step.as_secs());

    tokio::select! {
        _ = sequencer.wait_idle() => println!("Test finished."),
        _ = tokio::signal::ctrl_c() => {
            sequencer.cancel().await?;
            println!("Test cancelled.");
        }
    }
    Ok(())
}

fn spawn_sequencer(app: &App) -> SequencerHandle {
    SequencerHandle::spawn(
        Arc::new(CommandDispatcher::new(app.session().clone())),
        SequencerSettings::from_config(&app.config.sequencer),
    )
}

fn status(app: &App) -> anyhow::Result<()> {
    match app.manager.saved_identity()? {
        Some(identity) => {
            println!("Saved TV:     {} ({})", identity.label(), identity.ip);
            println!(
                "Auto-connect: {}",
                if identity.auto_connect_enabled { "on" } else { "off" }
            );
        }
        None => println!("No TV saved."),
    }
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config_file_path()?,
    };
    let config = load_config_from(&config_path)
        .with_context(|| format!("cannot load config {}", config_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();
    debug!("config loaded from {}", config_path.display());

    let store = open_store(&config_path, cli.ephemeral)?;
    let app = App::build(config, store, Duration::from_secs(cli.timeout_secs));

    match cli.command {
        Command::Discover => discover(&app).await?,
        Command::Connect { ip, name } => connect(&app, &ip, name.as_deref()).await?,
        Command::Key { key } => press_key(&app, key).await?,
        Command::Channel { number } => type_channel(&app, number).await?,
        Command::Test {
            channel_a,
            channel_b,
            step_secs,
        } => channel_test(&app, channel_a, channel_b, Duration::from_secs(step_secs)).await?,
        Command::Status => status(&app)?,
        Command::Forget => {
            app.manager.forget_tv().await?;
            println!("Forgot the saved TV.");
        }
        Command::AutoConnect { state } => {
            app.manager.set_auto_connect(matches!(state, Toggle::On))?;
            status(&app)?;
        }
    }

    app.manager.disconnect().await?;
    info!("done");
    Ok(())
}

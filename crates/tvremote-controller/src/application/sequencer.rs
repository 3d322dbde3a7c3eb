//! Channel sequencer: timed key sequences.
//!
//! Two kinds of plans run here:
//!
//! - **Digit entry** types a channel number on the number pad and confirms it
//!   with ENTER.  `205` becomes `2@0ms, 0@200ms, 5@400ms, ENTER@700ms`.
//! - **A/B channel test** switches to channel A at `step`, to B at `2×step`,
//!   and back to A at `3×step`, typing each number as above.  One grace period
//!   after the last switch the test clears itself from the status.
//!
//! Every scheduled key lives in a single timer queue owned by the sequencer
//! actor and tagged with its plan id.  Starting a new A/B test cancels the
//! previous test's timers first.  [`SequencerHandle::cancel`] empties the
//! queue; once it returns no further key is pressed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use tvremote_core::domain::plan::{digit_schedule, validate_channel};
use tvremote_core::{ChannelTestPlan, PlanError, RemoteKey, TestPhase};
use uuid::Uuid;

use super::dispatcher::KeySink;
use super::session::SendOutcome;
use crate::infrastructure::storage::config::SequencerConfig;

/// Idle wake-up interval when no timer is pending.
const IDLE_WAKE: Duration = Duration::from_secs(3600);

/// Errors returned by [`SequencerHandle`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequencerError {
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    /// An A/B test needs a live session to start.
    #[error("not connected to a TV")]
    NotConnected,

    #[error("sequencer task has stopped")]
    Stopped,
}

/// Timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerSettings {
    pub digit_delay: Duration,
    pub enter_settle: Duration,
    pub auto_close_grace: Duration,
}

impl SequencerSettings {
    pub fn from_config(config: &SequencerConfig) -> Self {
        Self {
            digit_delay: config.digit_delay(),
            enter_settle: config.enter_settle(),
            auto_close_grace: config.auto_close_grace(),
        }
    }
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self::from_config(&SequencerConfig::default())
    }
}

/// The A/B test currently running, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTest {
    pub plan_id: Uuid,
    pub channel_a: u32,
    pub channel_b: u32,
    pub step: Duration,
    pub phase: TestPhase,
}

/// Observable sequencer state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SequencerStatus {
    pub active_test: Option<ActiveTest>,
    pub pending_timers: usize,
}

enum Command {
    Digits {
        number: u32,
        reply: oneshot::Sender<Result<Uuid, SequencerError>>,
    },
    ChannelTest {
        plan: ChannelTestPlan,
        reply: oneshot::Sender<Result<Uuid, SequencerError>>,
    },
    Cancel {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    Press(RemoteKey),
    EnterPhase(TestPhase),
    /// The test's last key has been typed; clear it from the status.
    AutoClose,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    plan: Uuid,
    action: TimerAction,
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cloneable front end of the sequencer actor.
///
/// Dropping every handle stops the actor and discards pending timers.
#[derive(Clone)]
pub struct SequencerHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SequencerStatus>,
}

impl SequencerHandle {
    pub fn spawn(sink: Arc<dyn KeySink>, settings: SequencerSettings) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(SequencerStatus::default());
        let actor = SequencerActor {
            sink,
            settings,
            commands: cmd_rx,
            status_tx,
            timers: BTreeMap::new(),
            next_seq: 0,
            active_test: None,
        };
        tokio::spawn(actor.run());
        Self {
            commands: cmd_tx,
            status: status_rx,
        }
    }

    /// Types `number` followed by ENTER.
    ///
    /// # Errors
    ///
    /// [`SequencerError::InvalidPlan`] for channel 0.
    pub async fn send_digits_then_enter(&self, number: u32) -> Result<Uuid, SequencerError> {
        validate_channel(number)?;
        let (reply, rx) = oneshot::channel();
        self.request(Command::Digits { number, reply }).await?;
        rx.await.map_err(|_| SequencerError::Stopped)?
    }

    /// Starts an A/B/A test, replacing any test already running.
    ///
    /// # Errors
    ///
    /// [`SequencerError::InvalidPlan`] for a zero channel or zero step, and
    /// [`SequencerError::NotConnected`] when the key sink cannot reach a TV.
    /// A rejected test leaves a running one untouched.
    pub async fn run_channel_test(
        &self,
        channel_a: u32,
        channel_b: u32,
        step: Duration,
    ) -> Result<Uuid, SequencerError> {
        let plan = ChannelTestPlan::new(channel_a, channel_b, step)?;
        let (reply, rx) = oneshot::channel();
        self.request(Command::ChannelTest { plan, reply }).await?;
        rx.await.map_err(|_| SequencerError::Stopped)?
    }

    /// Drops every pending timer.
    pub async fn cancel(&self) -> Result<(), SequencerError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Cancel { reply }).await?;
        rx.await.map_err(|_| SequencerError::Stopped)
    }

    pub fn status(&self) -> SequencerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SequencerStatus> {
        self.status.clone()
    }

    /// Waits until no timer is pending.
    pub async fn wait_idle(&self) {
        let mut rx = self.status.clone();
        let _ = rx.wait_for(|s| s.pending_timers == 0).await;
    }

    async fn request(&self, command: Command) -> Result<(), SequencerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SequencerError::Stopped)
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

struct SequencerActor {
    sink: Arc<dyn KeySink>,
    settings: SequencerSettings,
    commands: mpsc::Receiver<Command>,
    status_tx: watch::Sender<SequencerStatus>,
    /// Ordered by deadline, then by insertion.
    timers: BTreeMap<(Instant, u64), Timer>,
    next_seq: u64,
    active_test: Option<ActiveTest>,
}

impl SequencerActor {
    async fn run(mut self) {
        loop {
            let wake = self
                .timers
                .keys()
                .next()
                .map(|(at, _)| *at)
                .unwrap_or_else(|| Instant::now() + IDLE_WAKE);
            let has_timers = !self.timers.is_empty();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                _ = sleep_until(wake), if has_timers => self.fire_due().await,
            }
            self.publish();
        }
        debug!("sequencer actor stopped with {} timer(s) discarded", self.timers.len());
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Digits { number, reply } => {
                let plan = Uuid::new_v4();
                self.schedule_digits(plan, Instant::now(), number);
                debug!("typing channel {number} (plan {plan})");
                // Callers may wait_idle() as soon as the reply lands.
                self.publish();
                let _ = reply.send(Ok(plan));
            }
            Command::ChannelTest { plan, reply } => {
                if !self.sink.is_ready() {
                    warn!("cannot run channel test: not connected to a TV");
                    let _ = reply.send(Err(SequencerError::NotConnected));
                    return;
                }
                if let Some(previous) = self.active_test.take() {
                    info!("replacing running channel test {}", previous.plan_id);
                    self.drop_plan(previous.plan_id);
                }
                let id = Uuid::new_v4();
                let start = Instant::now();
                for switch in plan.switches() {
                    if let Some(phase) = switch.enters {
                        self.schedule(start + switch.at, id, TimerAction::EnterPhase(phase));
                    }
                    self.schedule_digits(id, start + switch.at, switch.channel);
                }
                self.schedule(
                    start + plan.auto_close_at(self.settings.auto_close_grace),
                    id,
                    TimerAction::AutoClose,
                );
                info!(
                    "channel test {id}: {} / {} every {:?}",
                    plan.channel_a, plan.channel_b, plan.step
                );
                self.active_test = Some(ActiveTest {
                    plan_id: id,
                    channel_a: plan.channel_a,
                    channel_b: plan.channel_b,
                    step: plan.step,
                    phase: TestPhase::Idle,
                });
                self.publish();
                let _ = reply.send(Ok(id));
            }
            Command::Cancel { reply } => {
                if !self.timers.is_empty() {
                    info!("cancelled {} pending key timer(s)", self.timers.len());
                }
                self.timers.clear();
                self.active_test = None;
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    fn schedule_digits(&mut self, plan: Uuid, start: Instant, number: u32) {
        for (offset, key) in digit_schedule(number, self.settings.digit_delay, self.settings.enter_settle) {
            self.schedule(start + offset, plan, TimerAction::Press(key));
        }
    }

    fn schedule(&mut self, at: Instant, plan: Uuid, action: TimerAction) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.insert((at, seq), Timer { plan, action });
    }

    fn drop_plan(&mut self, plan: Uuid) {
        self.timers.retain(|_, timer| timer.plan != plan);
    }

    /// Runs every timer whose deadline has passed, in order.
    async fn fire_due(&mut self) {
        let now = Instant::now();
        let due: Vec<(Instant, u64)> = self
            .timers
            .keys()
            .take_while(|(at, _)| *at <= now)
            .copied()
            .collect();

        for key in due {
            let Some(timer) = self.timers.remove(&key) else {
                continue;
            };
            match timer.action {
                TimerAction::Press(remote_key) => {
                    if self.sink.press(remote_key).await != SendOutcome::Sent {
                        warn!("{remote_key} was not delivered");
                    }
                }
                TimerAction::EnterPhase(phase) => {
                    if let Some(test) = self.active_test.as_mut().filter(|t| t.plan_id == timer.plan) {
                        test.phase = phase;
                        debug!("channel test {} phase {}", test.plan_id, phase.index());
                    }
                }
                TimerAction::AutoClose => {
                    if self.active_test.as_ref().map(|t| t.plan_id) == Some(timer.plan) {
                        info!("channel test {} finished", timer.plan);
                        self.active_test = None;
                    }
                }
            }
        }
    }

    fn publish(&self) {
        let status = SequencerStatus {
            active_test: self.active_test.clone(),
            pending_timers: self.timers.len(),
        };
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

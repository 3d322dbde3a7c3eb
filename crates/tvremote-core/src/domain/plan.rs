//! The scripted A/B channel test.
//!
//! A test alternates between two channels so a human can compare picture or
//! audio: switch to A, then B, then A again, one step apart.  The schedule is
//! pure arithmetic and lives here; the controller's sequencer turns it into
//! timers.

use std::time::Duration;

use thiserror::Error;

use crate::domain::key::RemoteKey;

/// Rejection reasons for a channel number or test plan.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("channel number must be positive")]
    ZeroChannel,
    #[error("step interval must be positive")]
    ZeroStep,
}

/// Progress of a running channel test.
///
/// A test starts in `Idle` while it waits for its first switch to channel A.
/// `First` is set at that switch; `Second` at the switch to B.  The final switch back to A does
/// not advance the phase; the test simply ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestPhase {
    #[default]
    Idle,
    First,
    Second,
}

impl TestPhase {
    /// Numeric form used in status output (0, 1, 2).
    pub fn index(self) -> u8 {
        match self {
            TestPhase::Idle => 0,
            TestPhase::First => 1,
            TestPhase::Second => 2,
        }
    }
}

/// A validated A/B/A test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTestPlan {
    pub channel_a: u32,
    pub channel_b: u32,
    pub step: Duration,
}

/// One scheduled channel switch within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedSwitch {
    /// Offset from the moment the test starts.
    pub at: Duration,
    pub channel: u32,
    /// Phase to enter once this switch has been typed, if it advances one.
    pub enters: Option<TestPhase>,
}

impl ChannelTestPlan {
    /// Validates inputs.  Both channels and the step must be non-zero.
    pub fn new(channel_a: u32, channel_b: u32, step: Duration) -> Result<Self, PlanError> {
        validate_channel(channel_a)?;
        validate_channel(channel_b)?;
        if step.is_zero() {
            return Err(PlanError::ZeroStep);
        }
        Ok(Self {
            channel_a,
            channel_b,
            step,
        })
    }

    /// The three switches: A at `step`, B at `2×step`, A at `3×step`.
    pub fn switches(&self) -> [PlannedSwitch; 3] {
        [
            PlannedSwitch {
                at: self.step,
                channel: self.channel_a,
                enters: Some(TestPhase::First),
            },
            PlannedSwitch {
                at: self.step * 2,
                channel: self.channel_b,
                enters: Some(TestPhase::Second),
            },
            PlannedSwitch {
                at: self.step * 3,
                channel: self.channel_a,
                enters: None,
            },
        ]
    }

    /// When the test deactivates itself: one grace period after the last
    /// switch.
    pub fn auto_close_at(&self, grace: Duration) -> Duration {
        self.step * 3 + grace
    }
}

/// Rejects channel zero.
pub fn validate_channel(channel: u32) -> Result<(), PlanError> {
    if channel == 0 {
        Err(PlanError::ZeroChannel)
    } else {
        Ok(())
    }
}

/// Key schedule for typing `channel` on the number pad.
///
/// Digit `i` is sent at `i × digit_delay`; ENTER follows the last digit by
/// `enter_settle` more, i.e. at `len × digit_delay + enter_settle`.
///
/// ```rust
/// use std::time::Duration;
/// use tvremote_core::domain::plan::digit_schedule;
/// use tvremote_core::RemoteKey;
///
/// let schedule = digit_schedule(205, Duration::from_millis(200), Duration::from_millis(100));
/// let offsets: Vec<u64> = schedule.iter().map(|(at, _)| at.as_millis() as u64).collect();
/// assert_eq!(offsets, vec![0, 200, 400, 700]);
/// assert_eq!(schedule[3].1, RemoteKey::Enter);
/// ```
pub fn digit_schedule(
    channel: u32,
    digit_delay: Duration,
    enter_settle: Duration,
) -> Vec<(Duration, RemoteKey)> {
    let digits = RemoteKey::digits_of(channel);
    let n = digits.len() as u32;
    let mut schedule: Vec<(Duration, RemoteKey)> = digits
        .into_iter()
        .enumerate()
        .map(|(i, key)| (digit_delay * i as u32, key))
        .collect();
    schedule.push((digit_delay * n + enter_settle, RemoteKey::Enter));
    schedule
}

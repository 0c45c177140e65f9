//! Drift-corrected daily timer driving the generate and push phases.
//!
//! The loop never sleeps all the way to a far-off target in one go. Long
//! waits stop 30 seconds short and re-sample the clock, so suspend/resume or
//! clock adjustments cannot make a phase fire late. Only when the target is
//! under a minute away does the loop sleep precisely up to it, then check
//! whether the current minute matches the generate or push time.
//!
//! ```text
//!   Idle ─▶ AwaitingGenerate ─(07:30)─▶ generate ─▶ AwaitingPush ─(08:00)─▶ push ─▶ Idle
//!     ▲                                                                        │
//!     └──────────────── ErrorBackoff (60 s) ◀── any iteration error ───────────┘
//! ```

use crate::delivery::CardArtifact;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Timelike};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Waits longer than this are split into a coarse sleep and a re-check.
const COARSE_THRESHOLD: Duration = Duration::from_secs(60);
/// How far short of the target a coarse sleep stops.
const COARSE_MARGIN: Duration = Duration::from_secs(30);
/// Pause after each fire window so the same minute is not handled twice.
const SETTLE_DELAY: Duration = Duration::from_secs(10);
const ERROR_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerPhase {
    #[default]
    Idle,
    AwaitingGenerate,
    AwaitingPush,
    ErrorBackoff,
}

/// Day-scoped scheduler bookkeeping, shared with the card service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerState {
    pub last_reset_date: Option<NaiveDate>,
    pub generated_today: bool,
    /// Card produced by the last generate phase and not yet pushed.
    pub cached: Option<CardArtifact>,
    pub phase: SchedulerPhase,
}

impl SchedulerState {
    /// Start a new day if `today` differs from the last reset date.
    ///
    /// Returns `true` when the daily flags were reset. A cached card from the
    /// previous day is kept until it is pushed or replaced.
    pub fn roll_date(&mut self, today: NaiveDate) -> bool {
        if self.last_reset_date == Some(today) {
            return false;
        }
        self.last_reset_date = Some(today);
        self.generated_today = false;
        true
    }
}

pub type SharedSchedulerState = Arc<Mutex<SchedulerState>>;

/// Source of the current time and of sleeping.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
    async fn sleep(&self, duration: Duration);
}

/// Wall clock at a fixed UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        chrono::Utc::now().with_timezone(&self.offset)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Configured times of day for the two phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub generate_at: NaiveTime,
    pub push_at: NaiveTime,
}

/// The work the scheduler triggers.
#[async_trait]
pub trait DailyJob: Send + Sync {
    /// Current schedule; read again on every loop iteration.
    async fn schedule(&self) -> DailySchedule;
    /// Produce and cache today's card.
    async fn generate(&self) -> Result<()>;
    /// Deliver the cached card.
    async fn push(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Generate,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub at: DateTime<FixedOffset>,
    pub kind: TargetKind,
}

/// `time` on the calendar day of `day`, in the same offset.
pub fn at_time(day: DateTime<FixedOffset>, time: NaiveTime) -> DateTime<FixedOffset> {
    let offset = *day.offset();
    let local = day.date_naive().and_time(time);
    let utc = local - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc, offset)
}

/// Next instant the loop should wake for.
///
/// The earliest of today's generate time (only if nothing was generated yet)
/// and today's push time that is still in the future; otherwise tomorrow's
/// generate time.
pub fn next_target(
    now: DateTime<FixedOffset>,
    generated_today: bool,
    generate_at: NaiveTime,
    push_at: NaiveTime,
) -> Target {
    let generate = Target {
        at: at_time(now, generate_at),
        kind: TargetKind::Generate,
    };
    let push = Target {
        at: at_time(now, push_at),
        kind: TargetKind::Push,
    };

    [(!generated_today).then_some(generate), Some(push)]
        .into_iter()
        .flatten()
        .filter(|t| t.at > now)
        .min_by_key(|t| t.at)
        .unwrap_or_else(|| Target {
            at: at_time(now + TimeDelta::days(1), generate_at),
            kind: TargetKind::Generate,
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Sleep this long, then re-plan.
    Coarse(Duration),
    /// Sleep exactly up to the target, then check the fire windows.
    Precise(Duration),
}

pub fn plan_wait(gap: Duration) -> Wait {
    if gap > COARSE_THRESHOLD {
        Wait::Coarse(gap - COARSE_MARGIN)
    } else {
        Wait::Precise(gap)
    }
}

/// Whether `now` falls in the same hour and minute as `time`.
pub fn matches_minute(now: DateTime<FixedOffset>, time: NaiveTime) -> bool {
    now.hour() == time.hour() && now.minute() == time.minute()
}

enum Flow {
    Continue,
    Stop,
}

/// Long-running loop firing the generate and push phases once a day.
pub struct DailyScheduler {
    job: Arc<dyn DailyJob>,
    state: SharedSchedulerState,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl DailyScheduler {
    pub fn new(
        job: Arc<dyn DailyJob>,
        state: SharedSchedulerState,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job,
            state,
            clock,
            cancel,
        }
    }

    /// Run until the cancellation token fires.
    ///
    /// Cancellation only interrupts sleeps; a phase that has started runs to
    /// completion. Errors never escape: they are logged and followed by a
    /// fixed backoff.
    #[instrument(level = "info", skip_all)]
    pub async fn run(&self) {
        info!("Scheduler started");
        while !self.cancel.is_cancelled() {
            match self.iterate().await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => {
                    error!(error = %e, backoff = ?ERROR_BACKOFF, "Scheduler iteration failed");
                    self.set_phase(SchedulerPhase::ErrorBackoff).await;
                    if !self.pause(ERROR_BACKOFF).await {
                        break;
                    }
                    self.set_phase(SchedulerPhase::Idle).await;
                }
            }
        }
        self.set_phase(SchedulerPhase::Idle).await;
        info!("Scheduler stopped");
    }

    async fn iterate(&self) -> Result<Flow> {
        let now = self.clock.now();
        let schedule = self.job.schedule().await;
        let generated_today = self.roll_date(now).await;

        let target = next_target(now, generated_today, schedule.generate_at, schedule.push_at);
        self.set_phase(match target.kind {
            TargetKind::Generate => SchedulerPhase::AwaitingGenerate,
            TargetKind::Push => SchedulerPhase::AwaitingPush,
        })
        .await;

        let gap = (target.at - now).to_std().unwrap_or_default();
        match plan_wait(gap) {
            Wait::Coarse(sleep) => {
                debug!(target = %target.at, kind = ?target.kind, ?sleep, "Coarse wait");
                return Ok(if self.pause(sleep).await { Flow::Continue } else { Flow::Stop });
            }
            Wait::Precise(sleep) => {
                debug!(target = %target.at, kind = ?target.kind, ?sleep, "Precise wait");
                if !self.pause(sleep).await {
                    return Ok(Flow::Stop);
                }
            }
        }

        let now = self.clock.now();
        let generated_today = self.roll_date(now).await;

        if matches_minute(now, schedule.generate_at) && !generated_today {
            info!(at = %now, "Generate window reached");
            self.job.generate().await?;
            self.state.lock().await.generated_today = true;
        }

        let has_card = self.state.lock().await.cached.is_some();
        if matches_minute(now, schedule.push_at) && has_card {
            info!(at = %now, "Push window reached");
            self.job.push().await?;
        }

        Ok(if self.pause(SETTLE_DELAY).await { Flow::Continue } else { Flow::Stop })
    }

    /// Apply the date roll and report whether today's card was generated.
    async fn roll_date(&self, now: DateTime<FixedOffset>) -> bool {
        let mut state = self.state.lock().await;
        if state.roll_date(now.date_naive()) {
            info!(date = %now.date_naive(), "New day; daily flags reset");
        }
        state.generated_today
    }

    async fn set_phase(&self, phase: SchedulerPhase) {
        self.state.lock().await.phase = phase;
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = self.clock.sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, sample_entry};
    use chrono::TimeZone;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
        offset().with_ymd_and_hms(2025, 6, 1, h, m, s).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    struct CountingJob {
        state: SharedSchedulerState,
        generated: Mutex<Vec<DateTime<FixedOffset>>>,
        pushed: Mutex<Vec<DateTime<FixedOffset>>>,
        clock: Arc<ManualClock>,
        fail_generates: AtomicUsize,
    }

    impl CountingJob {
        fn new(state: SharedSchedulerState, clock: Arc<ManualClock>) -> Self {
            Self {
                state,
                generated: Mutex::new(Vec::new()),
                pushed: Mutex::new(Vec::new()),
                clock,
                fail_generates: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DailyJob for CountingJob {
        async fn schedule(&self) -> DailySchedule {
            DailySchedule {
                generate_at: hm(7, 30),
                push_at: hm(8, 0),
            }
        }

        async fn generate(&self) -> Result<()> {
            if self.fail_generates.load(Ordering::SeqCst) > 0 {
                self.fail_generates.fetch_sub(1, Ordering::SeqCst);
                return Err(crate::error::Error::render("template missing"));
            }
            self.generated.lock().await.push(self.clock.now());
            self.state.lock().await.cached = Some(CardArtifact {
                path: PathBuf::from("card.png"),
                entry: sample_entry("alpha"),
            });
            Ok(())
        }

        async fn push(&self) -> Result<()> {
            self.pushed.lock().await.push(self.clock.now());
            self.state.lock().await.cached = None;
            Ok(())
        }
    }

    #[test]
    fn test_next_target() {
        let (generate_at, push_at) = (hm(7, 30), hm(8, 0));

        let t = next_target(at(7, 0, 0), false, generate_at, push_at);
        assert_eq!((t.at, t.kind), (at(7, 30, 0), TargetKind::Generate));

        let t = next_target(at(7, 0, 0), true, generate_at, push_at);
        assert_eq!((t.at, t.kind), (at(8, 0, 0), TargetKind::Push));

        let t = next_target(at(7, 45, 0), false, generate_at, push_at);
        assert_eq!((t.at, t.kind), (at(8, 0, 0), TargetKind::Push));

        let t = next_target(at(9, 0, 0), true, generate_at, push_at);
        assert_eq!(t.kind, TargetKind::Generate);
        assert_eq!(t.at, offset().with_ymd_and_hms(2025, 6, 2, 7, 30, 0).unwrap());
    }

    #[test]
    fn test_plan_wait() {
        assert_eq!(plan_wait(Duration::from_secs(1800)), Wait::Coarse(Duration::from_secs(1770)));
        assert_eq!(plan_wait(Duration::from_secs(60)), Wait::Precise(Duration::from_secs(60)));
        assert_eq!(plan_wait(Duration::ZERO), Wait::Precise(Duration::ZERO));
    }

    #[test]
    fn test_matches_minute() {
        assert!(matches_minute(at(7, 30, 0), hm(7, 30)));
        assert!(matches_minute(at(7, 30, 59), hm(7, 30)));
        assert!(!matches_minute(at(7, 31, 0), hm(7, 30)));
    }

    #[test]
    fn test_roll_date_resets_flags_once_per_day() {
        let mut state = SchedulerState {
            generated_today: true,
            ..Default::default()
        };
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert!(state.roll_date(day));
        assert!(!state.generated_today);

        state.generated_today = true;
        assert!(!state.roll_date(day));
        assert!(state.generated_today);
    }

    #[tokio::test]
    async fn test_daily_cycle_generates_and_pushes_once() {
        let clock = Arc::new(ManualClock::new(at(7, 0, 0)));
        let cancel = CancellationToken::new();
        clock.cancel_after(at(9, 0, 0), cancel.clone());

        let state = SharedSchedulerState::default();
        let job = Arc::new(CountingJob::new(state.clone(), clock.clone()));
        let scheduler = DailyScheduler::new(job.clone(), state.clone(), clock.clone(), cancel);
        scheduler.run().await;

        let generated = job.generated.lock().await.clone();
        let pushed = job.pushed.lock().await.clone();
        assert_eq!(generated, vec![at(7, 30, 0)]);
        assert_eq!(pushed, vec![at(8, 0, 0)]);

        let state = state.lock().await;
        assert!(state.cached.is_none());
        assert_eq!(state.phase, SchedulerPhase::Idle);
    }

    #[tokio::test]
    async fn test_failed_generate_backs_off_and_skips_push() {
        let clock = Arc::new(ManualClock::new(at(7, 0, 0)));
        let cancel = CancellationToken::new();
        clock.cancel_after(at(9, 0, 0), cancel.clone());

        let state = SharedSchedulerState::default();
        let job = Arc::new(CountingJob::new(state.clone(), clock.clone()));
        job.fail_generates.store(1, Ordering::SeqCst);
        let scheduler = DailyScheduler::new(job.clone(), state.clone(), clock.clone(), cancel);
        scheduler.run().await;

        assert!(job.generated.lock().await.is_empty());
        assert!(job.pushed.lock().await.is_empty());
        assert!(!state.lock().await.generated_today);
    }

    #[tokio::test]
    async fn test_cancellation_stops_a_long_wait() {
        let clock = Arc::new(ManualClock::new(at(9, 0, 0)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let state = SharedSchedulerState::default();
        let job = Arc::new(CountingJob::new(state.clone(), clock.clone()));
        DailyScheduler::new(job.clone(), state, clock.clone(), cancel)
            .run()
            .await;

        assert_eq!(clock.now(), at(9, 0, 0));
        assert!(job.generated.lock().await.is_empty());
    }
}

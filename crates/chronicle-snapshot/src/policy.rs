//! Snapshot policies.
//!
//! A policy answers one question after every successful save: should the
//! aggregate's state be captured now? Stateless policies are pure functions
//! of the aggregate and the event count. [`TimeBasedPolicy`] and
//! [`AdaptivePolicy`] keep per-aggregate bookkeeping behind a mutex owned by
//! the policy instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;
use uuid::Uuid;

use chronicle_core::aggregate::Aggregate;
use chronicle_core::clock::Clock;
use chronicle_core::config::{PolicyKind, SnapshotConfiguration};
use chronicle_core::error::DomainError;

/// Restore time above which the adaptive policy snapshots more often.
pub const SLOW_RESTORE_THRESHOLD: Duration = Duration::from_millis(100);

/// Weight of the newest sample in the adaptive policy's moving average.
pub const RESTORE_EMA_ALPHA: f64 = 0.3;

/// Decides when a snapshot is captured.
pub trait SnapshotPolicy: Send + Sync + fmt::Debug {
    /// Human-readable name, recorded in snapshot metadata.
    fn name(&self) -> String;

    /// Whether a snapshot should be taken for `aggregate` now.
    fn should_create_snapshot(&self, aggregate: &dyn Aggregate, event_count: i64) -> bool;

    /// Nominal spacing between snapshots, in the policy's own unit.
    fn snapshot_interval(&self) -> i64;

    /// Feeds a measured restore duration back into the policy.
    fn update_performance_metrics(&self, _aggregate_id: Uuid, _restore_time: Duration) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Snapshots every `threshold` events.
#[derive(Debug, Clone, Copy)]
pub struct EventCountPolicy {
    threshold: i64,
}

impl EventCountPolicy {
    /// Creates the policy.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` if `threshold < 1`.
    pub fn new(threshold: i64) -> Result<Self, DomainError> {
        if threshold < 1 {
            return Err(DomainError::InvalidConfiguration(format!(
                "event count threshold must be positive, got {threshold}"
            )));
        }
        Ok(Self { threshold })
    }
}

impl SnapshotPolicy for EventCountPolicy {
    fn name(&self) -> String {
        format!("event_count({})", self.threshold)
    }

    fn should_create_snapshot(&self, _aggregate: &dyn Aggregate, event_count: i64) -> bool {
        event_count > 0 && event_count % self.threshold == 0
    }

    fn snapshot_interval(&self) -> i64 {
        self.threshold
    }
}

/// Snapshots whenever the aggregate version reaches a multiple of
/// `interval`, regardless of the event count passed in.
#[derive(Debug, Clone, Copy)]
pub struct VersionBasedPolicy {
    interval: i64,
}

impl VersionBasedPolicy {
    /// Creates the policy.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` if `interval < 1`.
    pub fn new(interval: i64) -> Result<Self, DomainError> {
        if interval < 1 {
            return Err(DomainError::InvalidConfiguration(format!(
                "version interval must be positive, got {interval}"
            )));
        }
        Ok(Self { interval })
    }
}

impl SnapshotPolicy for VersionBasedPolicy {
    fn name(&self) -> String {
        format!("version_based({})", self.interval)
    }

    fn should_create_snapshot(&self, aggregate: &dyn Aggregate, _event_count: i64) -> bool {
        let version = aggregate.version();
        version > 0 && version % self.interval == 0
    }

    fn snapshot_interval(&self) -> i64 {
        self.interval
    }
}

/// Snapshots an aggregate when more than `interval` has passed since its
/// last triggered snapshot. The first decision for an aggregate is always
/// positive.
pub struct TimeBasedPolicy {
    interval: TimeDelta,
    clock: Arc<dyn Clock>,
    last_triggered: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl TimeBasedPolicy {
    /// Creates the policy.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` if `interval` is not
    /// positive.
    pub fn new(interval: TimeDelta, clock: Arc<dyn Clock>) -> Result<Self, DomainError> {
        if interval <= TimeDelta::zero() {
            return Err(DomainError::InvalidConfiguration(format!(
                "time interval must be positive, got {interval}"
            )));
        }
        Ok(Self {
            interval,
            clock,
            last_triggered: Mutex::new(HashMap::new()),
        })
    }

    /// Last time a snapshot was triggered for `aggregate_id`.
    #[must_use]
    pub fn last_triggered(&self, aggregate_id: Uuid) -> Option<DateTime<Utc>> {
        lock(&self.last_triggered).get(&aggregate_id).copied()
    }
}

impl fmt::Debug for TimeBasedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeBasedPolicy")
            .field("interval", &self.interval)
            .field("tracked", &lock(&self.last_triggered).len())
            .finish_non_exhaustive()
    }
}

impl SnapshotPolicy for TimeBasedPolicy {
    fn name(&self) -> String {
        format!("time_based({}m)", self.interval.num_minutes())
    }

    fn should_create_snapshot(&self, aggregate: &dyn Aggregate, _event_count: i64) -> bool {
        let now = self.clock.now();
        let mut last = lock(&self.last_triggered);
        let due = match last.get(&aggregate.aggregate_id()) {
            None => true,
            Some(previous) => self.clock.elapsed_since(*previous) > self.interval,
        };
        if due {
            last.insert(aggregate.aggregate_id(), now);
        }
        due
    }

    fn snapshot_interval(&self) -> i64 {
        self.interval.num_minutes()
    }
}

/// How a [`CompositePolicy`] combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeOperator {
    /// Every child must agree.
    And,
    /// Any child suffices.
    Or,
}

/// Combines child policies with AND or OR.
///
/// Children are evaluated in order and evaluation short-circuits, so a
/// stateful child placed after a deciding child does not record a trigger.
/// An empty composite never snapshots.
#[derive(Debug)]
pub struct CompositePolicy {
    operator: CompositeOperator,
    policies: Vec<Arc<dyn SnapshotPolicy>>,
}

impl CompositePolicy {
    /// Creates a composite of `policies`.
    #[must_use]
    pub fn new(operator: CompositeOperator, policies: Vec<Arc<dyn SnapshotPolicy>>) -> Self {
        Self { operator, policies }
    }

    /// Shorthand for an AND composite.
    #[must_use]
    pub fn all(policies: Vec<Arc<dyn SnapshotPolicy>>) -> Self {
        Self::new(CompositeOperator::And, policies)
    }

    /// Shorthand for an OR composite.
    #[must_use]
    pub fn any(policies: Vec<Arc<dyn SnapshotPolicy>>) -> Self {
        Self::new(CompositeOperator::Or, policies)
    }
}

impl SnapshotPolicy for CompositePolicy {
    fn name(&self) -> String {
        let joiner = match self.operator {
            CompositeOperator::And => " AND ",
            CompositeOperator::Or => " OR ",
        };
        let names: Vec<String> = self.policies.iter().map(|p| p.name()).collect();
        format!("composite({})", names.join(joiner))
    }

    fn should_create_snapshot(&self, aggregate: &dyn Aggregate, event_count: i64) -> bool {
        if self.policies.is_empty() {
            return false;
        }
        let mut decisions = self
            .policies
            .iter()
            .map(|p| p.should_create_snapshot(aggregate, event_count));
        match self.operator {
            CompositeOperator::And => decisions.all(|d| d),
            CompositeOperator::Or => decisions.any(|d| d),
        }
    }

    fn snapshot_interval(&self) -> i64 {
        let intervals = self.policies.iter().map(|p| p.snapshot_interval());
        let interval = match self.operator {
            CompositeOperator::And => intervals.max(),
            CompositeOperator::Or => intervals.min(),
        };
        interval.unwrap_or(0)
    }

    fn update_performance_metrics(&self, aggregate_id: Uuid, restore_time: Duration) {
        for policy in &self.policies {
            policy.update_performance_metrics(aggregate_id, restore_time);
        }
    }
}

type Predicate = dyn Fn(&dyn Aggregate, i64) -> bool + Send + Sync;

/// Business-rule policy backed by a caller-supplied predicate.
///
/// The predicate receives the aggregate as `&dyn Aggregate`; use
/// `aggregate.as_any().downcast_ref::<Order>()` to reach domain fields.
pub struct CustomPolicy {
    name: String,
    interval: i64,
    predicate: Box<Predicate>,
}

impl CustomPolicy {
    /// Creates a named policy around `predicate`.
    pub fn new<F>(name: impl Into<String>, interval: i64, predicate: F) -> Self
    where
        F: Fn(&dyn Aggregate, i64) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            interval,
            predicate: Box::new(predicate),
        }
    }
}

impl fmt::Debug for CustomPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomPolicy")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl SnapshotPolicy for CustomPolicy {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn should_create_snapshot(&self, aggregate: &dyn Aggregate, event_count: i64) -> bool {
        (self.predicate)(aggregate, event_count)
    }

    fn snapshot_interval(&self) -> i64 {
        self.interval
    }
}

/// Snapshots after every save.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPolicy;

impl SnapshotPolicy for AlwaysPolicy {
    fn name(&self) -> String {
        "always".to_owned()
    }

    fn should_create_snapshot(&self, _aggregate: &dyn Aggregate, _event_count: i64) -> bool {
        true
    }

    fn snapshot_interval(&self) -> i64 {
        1
    }
}

/// Never snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverPolicy;

impl SnapshotPolicy for NeverPolicy {
    fn name(&self) -> String {
        "never".to_owned()
    }

    fn should_create_snapshot(&self, _aggregate: &dyn Aggregate, _event_count: i64) -> bool {
        false
    }

    fn snapshot_interval(&self) -> i64 {
        i64::MAX
    }
}

/// Event-count policy whose threshold shrinks for aggregates that are slow
/// to restore.
///
/// Restore durations arrive through
/// [`SnapshotPolicy::update_performance_metrics`] and are smoothed with an
/// exponential moving average. While an aggregate's average exceeds
/// [`SLOW_RESTORE_THRESHOLD`] its threshold is
/// `max(1, base_threshold * adaptation_factor)`.
pub struct AdaptivePolicy {
    base_threshold: i64,
    adaptation_factor: f64,
    restore_ms: Mutex<HashMap<Uuid, f64>>,
}

impl AdaptivePolicy {
    /// Creates the policy.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` if `base_threshold < 1`
    /// or `adaptation_factor` is outside `(0, 1]`.
    pub fn new(base_threshold: i64, adaptation_factor: f64) -> Result<Self, DomainError> {
        if base_threshold < 1 {
            return Err(DomainError::InvalidConfiguration(format!(
                "adaptive base threshold must be positive, got {base_threshold}"
            )));
        }
        if !(adaptation_factor > 0.0 && adaptation_factor <= 1.0) {
            return Err(DomainError::InvalidConfiguration(format!(
                "adaptation factor must be in (0, 1], got {adaptation_factor}"
            )));
        }
        Ok(Self {
            base_threshold,
            adaptation_factor,
            restore_ms: Mutex::new(HashMap::new()),
        })
    }

    /// Smoothed restore time for `aggregate_id`, if any sample was recorded.
    #[must_use]
    pub fn average_restore_time(&self, aggregate_id: Uuid) -> Option<Duration> {
        lock(&self.restore_ms)
            .get(&aggregate_id)
            .map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }

    /// Threshold currently in force for `aggregate_id`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn effective_threshold(&self, aggregate_id: Uuid) -> i64 {
        let slow = self
            .average_restore_time(aggregate_id)
            .is_some_and(|avg| avg > SLOW_RESTORE_THRESHOLD);
        if slow {
            ((self.base_threshold as f64 * self.adaptation_factor).floor() as i64).max(1)
        } else {
            self.base_threshold
        }
    }
}

impl fmt::Debug for AdaptivePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptivePolicy")
            .field("base_threshold", &self.base_threshold)
            .field("adaptation_factor", &self.adaptation_factor)
            .finish_non_exhaustive()
    }
}

impl SnapshotPolicy for AdaptivePolicy {
    fn name(&self) -> String {
        format!("adaptive({}, {})", self.base_threshold, self.adaptation_factor)
    }

    fn should_create_snapshot(&self, aggregate: &dyn Aggregate, event_count: i64) -> bool {
        let threshold = self.effective_threshold(aggregate.aggregate_id());
        event_count > 0 && event_count % threshold == 0
    }

    fn snapshot_interval(&self) -> i64 {
        self.base_threshold
    }

    fn update_performance_metrics(&self, aggregate_id: Uuid, restore_time: Duration) {
        let sample = restore_time.as_secs_f64() * 1000.0;
        let mut averages = lock(&self.restore_ms);
        let average = averages
            .entry(aggregate_id)
            .and_modify(|avg| *avg = RESTORE_EMA_ALPHA * sample + (1.0 - RESTORE_EMA_ALPHA) * *avg)
            .or_insert(sample);
        debug!(%aggregate_id, average_ms = *average, "updated restore time average");
    }
}

/// Builds the policy selected by `config`.
///
/// `composite` means "event count OR time based" with the configured knobs.
///
/// # Errors
///
/// Returns `DomainError::InvalidConfiguration` if a knob is out of range.
pub fn policy_from_config(
    config: &SnapshotConfiguration,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn SnapshotPolicy>, DomainError> {
    let policy: Arc<dyn SnapshotPolicy> = match config.default_policy {
        PolicyKind::EventCount => Arc::new(EventCountPolicy::new(config.event_count_threshold)?),
        PolicyKind::VersionBased => Arc::new(VersionBasedPolicy::new(config.version_interval)?),
        PolicyKind::TimeBased => {
            Arc::new(TimeBasedPolicy::new(time_interval(config)?, clock)?)
        }
        PolicyKind::Always => Arc::new(AlwaysPolicy),
        PolicyKind::Never => Arc::new(NeverPolicy),
        PolicyKind::Adaptive => Arc::new(AdaptivePolicy::new(
            config.event_count_threshold,
            config.adaptive_factor,
        )?),
        PolicyKind::Composite => Arc::new(CompositePolicy::any(vec![
            Arc::new(EventCountPolicy::new(config.event_count_threshold)?),
            Arc::new(TimeBasedPolicy::new(time_interval(config)?, clock)?),
        ])),
    };
    Ok(policy)
}

fn time_interval(config: &SnapshotConfiguration) -> Result<TimeDelta, DomainError> {
    TimeDelta::try_minutes(config.time_interval_minutes).ok_or_else(|| {
        DomainError::InvalidConfiguration(format!(
            "time_interval_minutes {} is out of range",
            config.time_interval_minutes
        ))
    })
}

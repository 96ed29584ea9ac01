//! Token budget accounting and admission control.
//!
//! ## Responsibility
//! Count tokens per priority tier over the rolling hour and budget day,
//! price them with the model cost table, and decide whether a new request
//! of a given size may run.
//!
//! ## Guarantees
//! - One mutex guards every counter, so an admission check and the matching
//!   reservation are a single atomic step
//! - Daily counters reset together when the day rolls over at `reset_hour` UTC
//! - Hourly usage is kept in one-minute buckets and covers the trailing
//!   sixty minutes, so a burst just before the top of the hour still counts
//!   after it
//! - Costs accumulate in micro-dollars to avoid floating-point drift
//!
//! ## NOT Responsible For
//! - Emitting alerts (that belongs to `alerts`)
//! - Exact token counting; callers pass estimates or provider-reported usage

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{ModelCostConfig, TokenBudgetConfig};
use crate::types::PriorityTier;

const TIERS: usize = 5;
const HOUR_BUCKETS: usize = 61;

/// Budget accounting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    /// The trailing sixty minutes.
    Hourly,
    /// The current budget day, starting at `reset_hour` UTC.
    Daily,
}

/// Admission verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Admission {
    /// Below the warning threshold.
    Allow,
    /// At or above the warning threshold; run, but alert.
    Warn,
    /// At or above the hard stop, or over a per-request limit.
    Deny,
}

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionCheck {
    /// Verdict.
    pub admission: Admission,
    /// Tier the check was made for.
    pub tier: PriorityTier,
    /// Tokens requested.
    pub requested: u64,
    /// Ratio that decided the verdict: projected budget utilisation, or
    /// `requested / limit` when a per-request limit was exceeded.
    pub utilization: f64,
    /// Highest daily, hourly, or tier utilisation ratio. Per-request limits
    /// never contribute, so this is what threshold alerts should follow.
    pub budget_utilization: f64,
    /// Human-readable explanation.
    pub reason: String,
}

impl AdmissionCheck {
    /// Whether the request may run.
    pub fn is_allowed(&self) -> bool {
        self.admission != Admission::Deny
    }
}

/// Point-in-time budget summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    /// Tokens used this budget day.
    pub daily_used: u64,
    /// Configured daily limit.
    pub daily_limit: u64,
    /// `daily_limit - daily_used`, floored at zero.
    pub daily_remaining: u64,
    /// Daily usage as a percentage of the limit.
    pub daily_percent: f64,
    /// Tokens used this hour.
    pub hourly_used: u64,
    /// Configured hourly limit.
    pub hourly_limit: u64,
    /// `hourly_limit - hourly_used`, floored at zero.
    pub hourly_remaining: u64,
    /// Hourly usage as a percentage of the limit.
    pub hourly_percent: f64,
    /// Tokens currently reserved by in-flight requests.
    pub reserved: u64,
    /// Either period at or above the warning threshold.
    pub is_warning: bool,
    /// Either period at or above the hard stop.
    pub is_hard_stop: bool,
    /// Spend this budget day, USD.
    pub total_cost: f64,
    /// Requests recorded this budget day.
    pub requests: u64,
    /// Daily tokens per tier.
    pub by_tier: BTreeMap<PriorityTier, u64>,
}

fn f64_to_micro(usd: f64) -> u64 {
    (usd * 1_000_000.0) as u64
}

fn micro_to_f64(micro: u64) -> f64 {
    micro as f64 / 1_000_000.0
}

fn ratio(used: u64, limit: f64) -> f64 {
    if limit <= 0.0 {
        return if used > 0 { f64::INFINITY } else { 0.0 };
    }
    used as f64 / limit
}

/// Start of the budget day containing `now`.
fn day_start(now: DateTime<Utc>, reset_hour: u32) -> DateTime<Utc> {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|n| n.and_utc())
        .unwrap_or(now);
    let reset = midnight + Duration::hours(i64::from(reset_hour.min(23)));
    if now.hour() >= reset_hour.min(23) {
        reset
    } else {
        reset - Duration::days(1)
    }
}

fn minute_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::minutes(1)).unwrap_or(now)
}

struct BudgetState {
    day_start: DateTime<Utc>,
    daily: [u64; TIERS],
    /// `(minute start, per-tier tokens)`, oldest first.
    hourly: VecDeque<(DateTime<Utc>, [u64; TIERS])>,
    reserved: [u64; TIERS],
    cost_micro: u64,
    requests: u64,
}

impl BudgetState {
    fn new(now: DateTime<Utc>, reset_hour: u32) -> Self {
        Self {
            day_start: day_start(now, reset_hour),
            daily: [0; TIERS],
            hourly: VecDeque::with_capacity(HOUR_BUCKETS),
            reserved: [0; TIERS],
            cost_micro: 0,
            requests: 0,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>, reset_hour: u32) {
        let day = day_start(now, reset_hour);
        if day != self.day_start {
            tracing::info!(day_start = %day, "token budget day rolled over");
            self.day_start = day;
            self.daily = [0; TIERS];
            self.cost_micro = 0;
            self.requests = 0;
        }
        let horizon = now - Duration::hours(1);
        while let Some((start, _)) = self.hourly.front() {
            if *start + Duration::minutes(1) > horizon {
                break;
            }
            self.hourly.pop_front();
        }
    }

    fn add_hourly(&mut self, now: DateTime<Utc>, idx: usize, tokens: u64) {
        let minute = minute_start(now);
        match self.hourly.back_mut() {
            // A clock that steps backwards lands in the newest bucket.
            Some((start, bucket)) if *start >= minute => {
                bucket[idx] = bucket[idx].saturating_add(tokens);
            }
            _ => {
                let mut bucket = [0; TIERS];
                bucket[idx] = tokens;
                self.hourly.push_back((minute, bucket));
            }
        }
    }

    fn hourly_tier(&self, idx: usize) -> u64 {
        self.hourly.iter().map(|(_, b)| b[idx]).sum()
    }

    fn daily_total(&self) -> u64 {
        self.daily.iter().sum()
    }

    fn hourly_total(&self) -> u64 {
        self.hourly.iter().flat_map(|(_, b)| b.iter()).sum()
    }

    fn reserved_total(&self) -> u64 {
        self.reserved.iter().sum()
    }
}

struct TrackerInner {
    budget: TokenBudgetConfig,
    costs: ModelCostConfig,
    state: Mutex<BudgetState>,
}

impl TrackerInner {
    /// Highest projected ratio across the daily, hourly, and tier limits
    /// if `requested` more tokens were admitted.
    fn period_utilization(
        &self,
        state: &BudgetState,
        tier: PriorityTier,
        requested: u64,
    ) -> (&'static str, f64) {
        let b = &self.budget;
        let tier_limit = b.tier_limits.get(tier);
        let reserved = state.reserved_total();
        let idx = tier.index();
        let candidates = [
            (
                "daily",
                ratio(
                    state.daily_total() + reserved + requested,
                    b.daily_limit as f64,
                ),
            ),
            (
                "hourly",
                ratio(
                    state.hourly_total() + reserved + requested,
                    b.hourly_limit as f64,
                ),
            ),
            (
                "tier",
                ratio(
                    state.daily[idx] + state.reserved[idx] + requested,
                    tier_limit.daily_limit as f64 * tier_limit.burst_allowance,
                ),
            ),
        ];
        candidates
            .iter()
            .copied()
            .fold(("daily", 0.0_f64), |best, c| if c.1 > best.1 { c } else { best })
    }

    fn evaluate(
        &self,
        state: &BudgetState,
        tier: PriorityTier,
        requested: u64,
    ) -> AdmissionCheck {
        let b = &self.budget;
        let tier_limit = b.tier_limits.get(tier);

        // An oversized request never runs, so it is not charged to the
        // budget ratio reported alongside the rejection.
        let oversized = |limit: u64, reason: String| AdmissionCheck {
            admission: Admission::Deny,
            tier,
            requested,
            utilization: ratio(requested, limit as f64),
            budget_utilization: self.period_utilization(state, tier, 0).1,
            reason,
        };
        if requested > b.per_request_limit {
            return oversized(
                b.per_request_limit,
                format!(
                    "request of {requested} tokens exceeds per-request limit {}",
                    b.per_request_limit
                ),
            );
        }
        if requested > tier_limit.per_request_limit {
            return oversized(
                tier_limit.per_request_limit,
                format!(
                    "request of {requested} tokens exceeds {tier} per-request limit {}",
                    tier_limit.per_request_limit
                ),
            );
        }

        let (limit, utilization) = self.period_utilization(state, tier, requested);
        let pct = utilization * 100.0;
        let (admission, reason) = if utilization >= b.hard_stop_threshold {
            (
                Admission::Deny,
                format!("{limit} budget would reach {pct:.1}% (hard stop)"),
            )
        } else if utilization >= b.warning_threshold {
            (
                Admission::Warn,
                format!("{limit} budget would reach {pct:.1}%"),
            )
        } else {
            (
                Admission::Allow,
                format!("within budget ({pct:.1}% of {limit})"),
            )
        };
        AdmissionCheck {
            admission,
            tier,
            requested,
            utilization,
            budget_utilization: utilization,
            reason,
        }
    }

    fn calculate_cost(&self, input: u64, output: u64, model: &str) -> f64 {
        let cost = self.costs.cost_for(model);
        (input as f64 / 1000.0) * cost.input_cost_per_1k
            + (output as f64 / 1000.0) * cost.output_cost_per_1k
    }

    fn record_locked(
        &self,
        state: &mut BudgetState,
        tier: PriorityTier,
        input: u64,
        output: u64,
        model: &str,
        now: DateTime<Utc>,
    ) -> f64 {
        let total = input.saturating_add(output);
        let idx = tier.index();
        state.daily[idx] = state.daily[idx].saturating_add(total);
        state.add_hourly(now, idx, total);
        let cost = self.calculate_cost(input, output, model);
        state.cost_micro = state.cost_micro.saturating_add(f64_to_micro(cost));
        state.requests += 1;
        crate::metrics::inc_tokens(tier.as_str(), total);
        cost
    }
}

/// Tracks token usage against the configured budgets.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TokenTracker {
    inner: Arc<TrackerInner>,
}

impl TokenTracker {
    /// Tracker starting empty at the current instant.
    pub fn new(budget: TokenBudgetConfig, costs: ModelCostConfig) -> Self {
        Self::new_at(budget, costs, Utc::now())
    }

    /// Tracker starting empty at `now`.
    pub fn new_at(budget: TokenBudgetConfig, costs: ModelCostConfig, now: DateTime<Utc>) -> Self {
        let state = BudgetState::new(now, budget.reset_hour);
        Self {
            inner: Arc::new(TrackerInner {
                budget,
                costs,
                state: Mutex::new(state),
            }),
        }
    }

    /// Budget configuration in force.
    pub fn budget(&self) -> &TokenBudgetConfig {
        &self.inner.budget
    }

    /// USD cost of `input` and `output` tokens on `model`.
    ///
    /// Unknown models use the default cost.
    pub fn calculate_cost(&self, input: u64, output: u64, model: &str) -> f64 {
        self.inner.calculate_cost(input, output, model)
    }

    /// Record completed usage; returns its cost in USD.
    pub fn record_usage(&self, tier: PriorityTier, input: u64, output: u64, model: &str) -> f64 {
        self.record_usage_at(tier, input, output, model, Utc::now())
    }

    /// [`record_usage`](Self::record_usage) against an explicit clock.
    pub fn record_usage_at(
        &self,
        tier: PriorityTier,
        input: u64,
        output: u64,
        model: &str,
        now: DateTime<Utc>,
    ) -> f64 {
        let mut state = self.inner.state.lock();
        state.roll(now, self.inner.budget.reset_hour);
        self.inner
            .record_locked(&mut state, tier, input, output, model, now)
    }

    /// Tokens used in `period`, for one tier or all.
    pub fn usage(&self, period: BudgetPeriod, tier: Option<PriorityTier>) -> u64 {
        self.usage_at(period, tier, Utc::now())
    }

    /// [`usage`](Self::usage) against an explicit clock.
    pub fn usage_at(
        &self,
        period: BudgetPeriod,
        tier: Option<PriorityTier>,
        now: DateTime<Utc>,
    ) -> u64 {
        let mut state = self.inner.state.lock();
        state.roll(now, self.inner.budget.reset_hour);
        match (period, tier) {
            (BudgetPeriod::Daily, Some(t)) => state.daily[t.index()],
            (BudgetPeriod::Daily, None) => state.daily_total(),
            (BudgetPeriod::Hourly, Some(t)) => state.hourly_tier(t.index()),
            (BudgetPeriod::Hourly, None) => state.hourly_total(),
        }
    }

    /// Decide whether `requested` more tokens for `tier` may run.
    pub fn check_admission(&self, tier: PriorityTier, requested: u64) -> AdmissionCheck {
        self.check_admission_at(tier, requested, Utc::now())
    }

    /// [`check_admission`](Self::check_admission) against an explicit clock.
    pub fn check_admission_at(
        &self,
        tier: PriorityTier,
        requested: u64,
        now: DateTime<Utc>,
    ) -> AdmissionCheck {
        let mut state = self.inner.state.lock();
        state.roll(now, self.inner.budget.reset_hour);
        self.inner.evaluate(&state, tier, requested)
    }

    /// Check admission and, unless denied, hold `tokens` against the budget.
    ///
    /// # Errors
    ///
    /// Returns the denying [`AdmissionCheck`] when the request may not run.
    pub fn reserve(&self, tier: PriorityTier, tokens: u64) -> Result<Reservation, AdmissionCheck> {
        self.reserve_at(tier, tokens, Utc::now())
    }

    /// [`reserve`](Self::reserve) against an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns the denying [`AdmissionCheck`] when the request may not run.
    pub fn reserve_at(
        &self,
        tier: PriorityTier,
        tokens: u64,
        now: DateTime<Utc>,
    ) -> Result<Reservation, AdmissionCheck> {
        let mut state = self.inner.state.lock();
        state.roll(now, self.inner.budget.reset_hour);
        let check = self.inner.evaluate(&state, tier, tokens);
        if !check.is_allowed() {
            return Err(check);
        }
        let idx = tier.index();
        state.reserved[idx] = state.reserved[idx].saturating_add(tokens);
        Ok(Reservation {
            inner: Arc::clone(&self.inner),
            tier,
            tokens,
            check,
            settled: false,
        })
    }

    /// Summary of the current periods.
    pub fn status(&self) -> BudgetStatus {
        self.status_at(Utc::now())
    }

    /// [`status`](Self::status) against an explicit clock.
    pub fn status_at(&self, now: DateTime<Utc>) -> BudgetStatus {
        let b = &self.inner.budget;
        let mut state = self.inner.state.lock();
        state.roll(now, b.reset_hour);

        let daily_used = state.daily_total();
        let hourly_used = state.hourly_total();
        let daily_ratio = ratio(daily_used, b.daily_limit as f64);
        let hourly_ratio = ratio(hourly_used, b.hourly_limit as f64);
        let worst = daily_ratio.max(hourly_ratio);

        BudgetStatus {
            daily_used,
            daily_limit: b.daily_limit,
            daily_remaining: b.daily_limit.saturating_sub(daily_used),
            daily_percent: daily_ratio * 100.0,
            hourly_used,
            hourly_limit: b.hourly_limit,
            hourly_remaining: b.hourly_limit.saturating_sub(hourly_used),
            hourly_percent: hourly_ratio * 100.0,
            reserved: state.reserved_total(),
            is_warning: worst >= b.warning_threshold,
            is_hard_stop: worst >= b.hard_stop_threshold,
            total_cost: micro_to_f64(state.cost_micro),
            requests: state.requests,
            by_tier: PriorityTier::ALL
                .iter()
                .map(|t| (*t, state.daily[t.index()]))
                .collect(),
        }
    }

    /// Zero every counter, including outstanding reservations.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        *state = BudgetState::new(Utc::now(), self.inner.budget.reset_hour);
        tracing::info!("token budget reset");
    }
}

/// Tokens held against the budget for an in-flight request.
///
/// [`commit`](Self::commit) swaps the hold for actual usage; dropping an
/// uncommitted reservation releases the hold.
pub struct Reservation {
    inner: Arc<TrackerInner>,
    tier: PriorityTier,
    tokens: u64,
    check: AdmissionCheck,
    settled: bool,
}

impl Reservation {
    /// Tier the tokens are held for.
    pub fn tier(&self) -> PriorityTier {
        self.tier
    }

    /// Tokens held.
    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// The admission check that granted this reservation.
    pub fn check(&self) -> &AdmissionCheck {
        &self.check
    }

    fn release(&self, state: &mut BudgetState) {
        let idx = self.tier.index();
        state.reserved[idx] = state.reserved[idx].saturating_sub(self.tokens);
    }

    /// Release the hold and record actual usage; returns its cost in USD.
    pub fn commit(mut self, input: u64, output: u64, model: &str) -> f64 {
        let now = Utc::now();
        let mut state = self.inner.state.lock();
        state.roll(now, self.inner.budget.reset_hour);
        self.release(&mut state);
        self.settled = true;
        self.inner
            .record_locked(&mut state, self.tier, input, output, model, now)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            let mut state = self.inner.state.lock();
            self.release(&mut state);
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("tier", &self.tier)
            .field("tokens", &self.tokens)
            .field("settled", &self.settled)
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelCost, TierLimit, TierLimits};
    use chrono::TimeZone;

    fn budget() -> TokenBudgetConfig {
        TokenBudgetConfig {
            daily_limit: 10_000,
            hourly_limit: 5_000,
            per_request_limit: 2_000,
            warning_threshold: 0.8,
            hard_stop_threshold: 0.95,
            reset_hour: 0,
            tier_limits: TierLimits {
                critical: TierLimit::new(10_000, 2_000, 1.5),
                high: TierLimit::new(8_000, 2_000, 1.2),
                normal: TierLimit::new(6_000, 2_000, 1.0),
                low: TierLimit::new(3_000, 1_000, 1.0),
                batch: TierLimit::new(1_000, 500, 1.0),
            },
        }
    }

    fn costs() -> ModelCostConfig {
        let mut costs = ModelCostConfig::default();
        costs.models.insert(
            "priced".into(),
            ModelCost {
                input_cost_per_1k: 0.003,
                output_cost_per_1k: 0.015,
                context_window: 200_000,
            },
        );
        costs
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 6, h, m, 0)
            .single()
            .expect("test: valid datetime")
    }

    #[test]
    fn test_calculate_cost_uses_model_rates() {
        let tracker = TokenTracker::new(budget(), costs());
        let cost = tracker.calculate_cost(1_000, 2_000, "priced");
        assert!((cost - (0.003 + 0.030)).abs() < 1e-12);
    }

    #[test]
    fn test_calculate_cost_unknown_model_uses_default() {
        let c = costs();
        let tracker = TokenTracker::new(budget(), c.clone());
        let expected = c.default_cost.input_cost_per_1k + c.default_cost.output_cost_per_1k;
        let cost = tracker.calculate_cost(1_000, 1_000, "mystery");
        assert!((cost - expected).abs() < 1e-12);
    }

    #[test]
    fn test_record_usage_updates_daily_hourly_and_tier() {
        let tracker = TokenTracker::new_at(budget(), costs(), at(10, 0));
        tracker.record_usage_at(PriorityTier::High, 100, 50, "priced", at(10, 5));
        tracker.record_usage_at(PriorityTier::Low, 10, 0, "priced", at(10, 6));
        assert_eq!(tracker.usage_at(BudgetPeriod::Daily, None, at(10, 7)), 160);
        assert_eq!(
            tracker.usage_at(BudgetPeriod::Hourly, Some(PriorityTier::High), at(10, 7)),
            150
        );
    }

    #[test]
    fn test_hourly_usage_survives_top_of_hour() {
        let tracker = TokenTracker::new_at(budget(), costs(), at(10, 0));
        tracker.record_usage_at(PriorityTier::Normal, 500, 0, "priced", at(10, 59));
        assert_eq!(tracker.usage_at(BudgetPeriod::Hourly, None, at(11, 1)), 500);
        assert_eq!(
            tracker.usage_at(BudgetPeriod::Hourly, Some(PriorityTier::Normal), at(11, 58)),
            500
        );
        // The 10:59 bucket ends at 11:00 and leaves the window an hour later.
        assert_eq!(tracker.usage_at(BudgetPeriod::Hourly, None, at(12, 0)), 0);
        assert_eq!(tracker.usage_at(BudgetPeriod::Daily, None, at(12, 0)), 500);
    }

    #[test]
    fn test_burst_before_top_of_hour_still_denies_after_it() {
        let mut b = budget();
        b.daily_limit = 1_000_000;
        b.hourly_limit = 100_000;
        b.per_request_limit = 100_000;
        b.tier_limits.critical = TierLimit::new(1_000_000, 100_000, 1.0);
        let tracker = TokenTracker::new_at(b, costs(), at(10, 0));

        tracker.record_usage_at(PriorityTier::Critical, 94_000, 0, "priced", at(10, 59));
        let check = tracker.check_admission_at(PriorityTier::Critical, 90_000, at(11, 1));
        assert_eq!(check.admission, Admission::Deny);
        assert!(check.reason.starts_with("hourly"));

        let later = tracker.check_admission_at(PriorityTier::Critical, 90_000, at(12, 1));
        assert_eq!(later.admission, Admission::Warn);
    }

    #[test]
    fn test_old_buckets_are_pruned() {
        let tracker = TokenTracker::new_at(budget(), costs(), at(0, 0));
        for minute in 0..180 {
            let now = at(minute / 60, minute % 60);
            tracker.record_usage_at(PriorityTier::Low, 1, 0, "priced", now);
        }
        let state = tracker.inner.state.lock();
        assert!(state.hourly.len() <= HOUR_BUCKETS);
    }

    #[test]
    fn test_daily_counters_reset_at_reset_hour() {
        let mut b = budget();
        b.reset_hour = 6;
        let tracker = TokenTracker::new_at(b, costs(), at(5, 0));
        tracker.record_usage_at(PriorityTier::Normal, 500, 0, "priced", at(5, 30));
        assert_eq!(tracker.usage_at(BudgetPeriod::Daily, None, at(5, 59)), 500);
        assert_eq!(tracker.usage_at(BudgetPeriod::Daily, None, at(6, 0)), 0);
    }

    #[test]
    fn test_admission_allow_warn_deny_progression() {
        let tracker = TokenTracker::new_at(budget(), costs(), at(10, 0));
        let now = at(10, 1);
        assert_eq!(
            tracker.check_admission_at(PriorityTier::Critical, 100, now).admission,
            Admission::Allow
        );

        // Hourly limit 5 000: 3 900 used + 100 requested = 80%.
        tracker.record_usage_at(PriorityTier::Critical, 1_950, 1_950, "priced", now);
        assert_eq!(
            tracker.check_admission_at(PriorityTier::Critical, 100, now).admission,
            Admission::Warn
        );

        tracker.record_usage_at(PriorityTier::Critical, 800, 0, "priced", now);
        let check = tracker.check_admission_at(PriorityTier::Critical, 100, now);
        assert_eq!(check.admission, Admission::Deny);
        assert!(check.utilization >= 0.95);
    }

    #[test]
    fn test_per_request_limit_denies_outright() {
        let tracker = TokenTracker::new(budget(), costs());
        let global = tracker.check_admission(PriorityTier::Critical, 2_001);
        assert_eq!(global.admission, Admission::Deny);
        let tier = tracker.check_admission(PriorityTier::Batch, 501);
        assert_eq!(tier.admission, Admission::Deny);
        assert!(tier.reason.contains("batch"));
    }

    #[test]
    fn test_oversized_request_reports_untouched_budget() {
        let tracker = TokenTracker::new_at(budget(), costs(), at(10, 0));
        let now = at(10, 1);
        let check = tracker.check_admission_at(PriorityTier::Critical, 4_000, now);
        assert_eq!(check.admission, Admission::Deny);
        assert!((check.utilization - 2.0).abs() < 1e-9);
        assert_eq!(check.budget_utilization, 0.0);

        tracker.record_usage_at(PriorityTier::Critical, 1_000, 0, "priced", now);
        let check = tracker.check_admission_at(PriorityTier::Critical, 4_000, now);
        // 1 000 of the 5 000 hourly limit; the rejected 4 000 are not counted.
        assert!((check.budget_utilization - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_reservations_never_pass_hard_stop() {
        let mut b = budget();
        b.daily_limit = 1_000;
        b.hourly_limit = 1_000;
        b.tier_limits.critical = TierLimit::new(1_000, 100, 1.0);
        let tracker = TokenTracker::new_at(b, costs(), at(10, 0));
        let now = at(10, 1);
        tracker.record_usage_at(PriorityTier::Critical, 900, 0, "priced", now);

        let granted: Vec<Reservation> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..32)
                .map(|_| scope.spawn(|| tracker.reserve_at(PriorityTier::Critical, 10, now).ok()))
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().expect("test: thread joined"))
                .collect()
        });

        // 900 used; each grant must keep (used + held) / 1 000 below 0.95.
        let status = tracker.status_at(now);
        assert_eq!(status.reserved, granted.len() as u64 * 10);
        assert!(status.daily_used + status.reserved < 950);
        assert_eq!(granted.len(), 4);
    }

    #[test]
    fn test_tier_limit_applies_burst_allowance() {
        let tracker = TokenTracker::new_at(budget(), costs(), at(10, 0));
        let now = at(10, 1);
        // Batch: 1 000 * 1.0; 450 used + 500 requested = 95%.
        tracker.record_usage_at(PriorityTier::Batch, 450, 0, "priced", now);
        assert_eq!(
            tracker.check_admission_at(PriorityTier::Batch, 500, now).admission,
            Admission::Deny
        );
        // The same usage leaves plenty of room for critical.
        assert_eq!(
            tracker.check_admission_at(PriorityTier::Critical, 500, now).admission,
            Admission::Allow
        );
    }

    #[test]
    fn test_reservation_counts_against_later_checks() {
        let tracker = TokenTracker::new_at(budget(), costs(), at(10, 0));
        let now = at(10, 1);
        let first = tracker
            .reserve_at(PriorityTier::Critical, 2_000, now)
            .expect("test: first reservation");
        let _second = tracker
            .reserve_at(PriorityTier::Critical, 2_000, now)
            .expect("test: second reservation");
        // 4 000 held + 1 000 = 100% of the hourly limit.
        assert!(tracker.reserve_at(PriorityTier::Critical, 1_000, now).is_err());
        drop(first);
        assert!(tracker.reserve_at(PriorityTier::Critical, 1_000, now).is_ok());
    }

    #[test]
    fn test_commit_swaps_hold_for_usage() {
        let tracker = TokenTracker::new(budget(), costs());
        let reservation = tracker
            .reserve(PriorityTier::Normal, 1_000)
            .expect("test: reserve");
        assert_eq!(tracker.status().reserved, 1_000);
        let cost = reservation.commit(300, 200, "priced");
        let status = tracker.status();
        assert_eq!(status.reserved, 0);
        assert_eq!(status.daily_used, 500);
        assert_eq!(status.requests, 1);
        assert!(cost > 0.0);
    }

    #[test]
    fn test_status_reports_percent_and_flags() {
        let tracker = TokenTracker::new(budget(), costs());
        tracker.record_usage(PriorityTier::High, 4_000, 500, "priced");
        let status = tracker.status();
        assert_eq!(status.hourly_remaining, 500);
        assert!((status.hourly_percent - 90.0).abs() < 1e-9);
        assert!(status.is_warning);
        assert!(!status.is_hard_stop);
        assert_eq!(status.by_tier[&PriorityTier::High], 4_500);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let tracker = TokenTracker::new(budget(), costs());
        tracker.record_usage(PriorityTier::High, 100, 100, "priced");
        tracker.reset();
        let status = tracker.status();
        assert_eq!(status.daily_used, 0);
        assert_eq!(status.total_cost, 0.0);
    }
}

//! Time-of-day model routing.
//!
//! ## Responsibility
//! Pick a model from the local hour and weekday in the configured IANA
//! timezone: the weekend model on Saturday and Sunday, the off-peak model
//! inside the off-peak range, the peak model otherwise.
//!
//! ## Guarantees
//! - Precedence is weekend, then off-peak, then peak, then standard
//! - Off-peak ranges may wrap past midnight (`22..6`); peak ranges never do
//! - An unknown timezone name degrades to UTC with a warning, once
//!
//! ## NOT Responsible For
//! - Holidays or per-tenant calendars

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;

use crate::config::TimeBasedRoutingConfig;

/// Which routing period a moment falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimePeriod {
    /// Inside the peak range on a weekday.
    Peak,
    /// Inside the off-peak range on a weekday.
    OffPeak,
    /// Saturday or Sunday.
    Weekend,
    /// Outside both ranges, or routing disabled.
    Standard,
}

impl TimePeriod {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            TimePeriod::Peak => "peak",
            TimePeriod::OffPeak => "off-peak",
            TimePeriod::Weekend => "weekend",
            TimePeriod::Standard => "standard",
        }
    }
}

/// Outcome of [`TimeBasedRouter::route`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRoutingResult {
    /// Model for this period.
    pub model: String,
    /// Period the moment fell in.
    pub period: TimePeriod,
    /// Human-readable explanation.
    pub reason: String,
}

/// Routes by local time in a fixed timezone.
pub struct TimeBasedRouter {
    config: TimeBasedRoutingConfig,
    tz: Tz,
}

impl TimeBasedRouter {
    /// Build a router, resolving the timezone name once.
    pub fn new(config: &TimeBasedRoutingConfig) -> Self {
        let tz = config.timezone.parse::<Tz>().unwrap_or_else(|e| {
            tracing::warn!(timezone = %config.timezone, error = %e, "unknown timezone, routing in UTC");
            Tz::UTC
        });
        Self {
            config: config.clone(),
            tz,
        }
    }

    /// Resolved timezone.
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Route at `now`, or at the current instant when `None`.
    pub fn route(&self, now: Option<DateTime<Utc>>) -> TimeRoutingResult {
        let c = &self.config;
        if !c.enabled {
            return TimeRoutingResult {
                model: c.peak_model.clone(),
                period: TimePeriod::Standard,
                reason: "time-based routing disabled".to_string(),
            };
        }

        let local = now.unwrap_or_else(Utc::now).with_timezone(&self.tz);
        let hour = local.hour();

        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return TimeRoutingResult {
                model: c.weekend_model.clone(),
                period: TimePeriod::Weekend,
                reason: format!("weekend, using {}", c.weekend_model),
            };
        }
        if c.off_peak_hours.contains(hour) {
            return TimeRoutingResult {
                model: c.off_peak_model.clone(),
                period: TimePeriod::OffPeak,
                reason: format!(
                    "off-peak hours ({}:00-{}:00), using {}",
                    c.off_peak_hours.start, c.off_peak_hours.end, c.off_peak_model
                ),
            };
        }
        if c.peak_hours.contains_within_day(hour) {
            return TimeRoutingResult {
                model: c.peak_model.clone(),
                period: TimePeriod::Peak,
                reason: format!(
                    "peak hours ({}:00-{}:00), using {}",
                    c.peak_hours.start, c.peak_hours.end, c.peak_model
                ),
            };
        }
        TimeRoutingResult {
            model: c.peak_model.clone(),
            period: TimePeriod::Standard,
            reason: format!("standard hours, using {}", c.peak_model),
        }
    }

    /// Whether `now` falls in the peak period.
    pub fn is_peak(&self, now: Option<DateTime<Utc>>) -> bool {
        self.route(now).period == TimePeriod::Peak
    }

    /// Whether `now` falls in the off-peak period.
    pub fn is_off_peak(&self, now: Option<DateTime<Utc>>) -> bool {
        self.route(now).period == TimePeriod::OffPeak
    }

    /// Start of the next hour boundary named by either range, after `now`.
    ///
    /// Boundaries are whole local hours. When none remain today the first
    /// boundary of the next day is returned.
    pub fn next_period_change(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let c = &self.config;
        let local = now.with_timezone(&self.tz);
        let hour = local.hour();

        let mut boundaries = [
            c.peak_hours.start,
            c.peak_hours.end,
            c.off_peak_hours.start,
            c.off_peak_hours.end,
        ];
        boundaries.sort_unstable();

        let (date, boundary) = match boundaries.iter().find(|b| **b > hour) {
            Some(b) => (local.date_naive(), *b),
            None => (
                local.date_naive() + Duration::days(1),
                boundaries[0],
            ),
        };
        self.local_to_utc(date, boundary)
            .unwrap_or_else(|| now + Duration::hours(1))
    }

    fn local_to_utc(&self, date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
        let naive = date.and_hms_opt(hour, 0, 0)?;
        // A boundary inside a DST gap resolves one hour later.
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| self.tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
            .map(|t| t.with_timezone(&Utc))
    }
}

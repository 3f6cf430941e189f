use std::sync::Arc;

use chrono::{DateTime, Duration, Months, Utc};
use tracing::{info, warn};

use crate::conf::RetentionConfig;
use crate::error::Result;
use crate::es_client::EsClient;

/// Bucket granularities used by the time-series models. The numeric bucket
/// is the UTC timestamp collapsed to the granularity, e.g. minute
/// `202608051417`, day `20260805`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeGranularity {
    Record,
    Minute,
    Hour,
    Day,
    Month,
}

impl TimeGranularity {
    fn bucket_format(self) -> &'static str {
        match self {
            TimeGranularity::Record => "%Y%m%d%H%M%S",
            TimeGranularity::Minute => "%Y%m%d%H%M",
            TimeGranularity::Hour => "%Y%m%d%H",
            TimeGranularity::Day => "%Y%m%d",
            TimeGranularity::Month => "%Y%m",
        }
    }

    pub fn time_bucket(self, at: DateTime<Utc>) -> i64 {
        // the formats only emit digits, so this always parses
        at.format(self.bucket_format())
            .to_string()
            .parse()
            .unwrap_or_default()
    }
}

/// Translates the configured maximum ages into inclusive deletion bounds.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    config: RetentionConfig,
}

impl RetentionPolicy {
    pub fn new(config: RetentionConfig) -> Self {
        Self { config }
    }

    fn deadline(&self, granularity: TimeGranularity, now: DateTime<Utc>) -> DateTime<Utc> {
        match granularity {
            TimeGranularity::Record => {
                now - Duration::minutes(self.config.get_record_data_ttl() as i64)
            }
            TimeGranularity::Minute => {
                now - Duration::minutes(self.config.get_minute_metrics_data_ttl() as i64)
            }
            TimeGranularity::Hour => {
                now - Duration::hours(self.config.get_hour_metrics_data_ttl() as i64)
            }
            TimeGranularity::Day => {
                now - Duration::days(self.config.get_day_metrics_data_ttl() as i64)
            }
            TimeGranularity::Month => now
                .checked_sub_months(Months::new(self.config.get_month_metrics_data_ttl()))
                .unwrap_or(now),
        }
    }

    /// Everything with a bucket at or below this value has outlived its TTL.
    pub fn upper_bound(&self, granularity: TimeGranularity, now: DateTime<Utc>) -> i64 {
        granularity.time_bucket(self.deadline(granularity, now))
    }
}

/// Drives retention deletion for one model at a time. A scheduler above
/// this crate decides when to run it.
pub struct RetentionTask {
    client: Arc<EsClient>,
    policy: RetentionPolicy,
}

impl RetentionTask {
    pub fn new(client: Arc<EsClient>, config: RetentionConfig) -> Self {
        Self {
            client,
            policy: RetentionPolicy::new(config),
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub async fn purge(
        &self,
        model_name: &str,
        time_bucket_column: &str,
        granularity: TimeGranularity,
        now: DateTime<Utc>,
    ) -> Result<u16> {
        let upper_bound = self.policy.upper_bound(granularity, now);
        let status = self
            .client
            .delete_by_time_bucket(model_name, time_bucket_column, upper_bound)
            .await?;
        if (200..300).contains(&status) {
            info!(
                "retention purge of {} up to bucket {} returned {}",
                model_name, upper_bound, status
            );
        } else {
            warn!(
                "retention purge of {} up to bucket {} returned {}",
                model_name, upper_bound, status
            );
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn buckets_collapse_to_their_granularity() {
        let now = at(2026, 8, 5, 14, 17, 39);
        assert_eq!(TimeGranularity::Record.time_bucket(now), 20260805141739);
        assert_eq!(TimeGranularity::Minute.time_bucket(now), 202608051417);
        assert_eq!(TimeGranularity::Hour.time_bucket(now), 2026080514);
        assert_eq!(TimeGranularity::Day.time_bucket(now), 20260805);
        assert_eq!(TimeGranularity::Month.time_bucket(now), 202608);
    }

    #[test]
    fn day_bound_reaches_back_the_configured_days() {
        let policy = RetentionPolicy::new(RetentionConfig::new(90, 90, 36, 45, 18));
        let now = at(2026, 8, 5, 0, 30, 0);
        assert_eq!(policy.upper_bound(TimeGranularity::Day, now), 20260621);
    }

    #[test]
    fn minute_bound_crosses_midnight() {
        let policy = RetentionPolicy::new(RetentionConfig::new(90, 90, 36, 45, 18));
        let now = at(2026, 8, 5, 1, 0, 0);
        assert_eq!(
            policy.upper_bound(TimeGranularity::Minute, now),
            202608042330
        );
    }

    #[test]
    fn month_bound_uses_calendar_months() {
        let policy = RetentionPolicy::new(RetentionConfig::new(90, 90, 36, 45, 18));
        let now = at(2026, 8, 5, 12, 0, 0);
        assert_eq!(policy.upper_bound(TimeGranularity::Month, now), 202502);
    }

    #[test]
    fn hour_bound_subtracts_hours() {
        let policy = RetentionPolicy::new(RetentionConfig::new(90, 90, 36, 45, 18));
        let now = at(2026, 8, 5, 10, 0, 0);
        assert_eq!(policy.upper_bound(TimeGranularity::Hour, now), 2026080322);
    }
}

use crate::utils::error::{AtCleanError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// MJD of the Unix epoch.
const UNIX_EPOCH_MJD: f64 = 40587.0;

/// Days between discovery and the assumed start of the transient.
pub const DISC_DATE_BUFFER: f64 = 20.0;

pub fn datetime_to_mjd(datetime: DateTime<Utc>) -> f64 {
    datetime.timestamp_millis() as f64 / 86_400_000.0 + UNIX_EPOCH_MJD
}

pub fn now_mjd() -> f64 {
    datetime_to_mjd(Utc::now())
}

/// MJD of a TNS date such as `2020-01-01 12:34:56.789` (UTC); the time part
/// is optional.
pub fn parse_tns_date(value: &str) -> Result<f64> {
    let value = value.trim();
    let parsed = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d").map(|d| d.and_time(Default::default()))
        })
        .map_err(|e| AtCleanError::TnsError {
            message: format!("Invalid discovery date '{}': {}", value, e),
        })?;
    Ok(datetime_to_mjd(parsed.and_utc()))
}

/// Download range: `now - lookback` (or 50000) up to `max_mjd` (or now).
pub fn download_range(lookback: Option<f64>, max_mjd: Option<f64>, now: f64) -> Result<(f64, f64)> {
    let min_mjd = lookback.map_or(50000.0, |days| now - days);
    let max_mjd = max_mjd.unwrap_or(now);
    if min_mjd > max_mjd {
        return Err(AtCleanError::InvalidConfigValueError {
            field: "max_mjd".to_string(),
            value: max_mjd.to_string(),
            reason: format!("Maximum MJD is before the minimum MJD {}", min_mjd),
        });
    }
    Ok((min_mjd, max_mjd))
}

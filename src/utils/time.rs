use crate::domain::{TimeWindow, Timestamp};
use crate::utils::error::{EtlError, Result, TransformError};
use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const API_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

fn dotnet_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^/Date\((-?\d+)(?:([+-])(\d{2})(\d{2}))?\)/$").expect("static regex")
    })
}

/// 解析 API 回傳的時間字串：RFC 3339、無時區 ISO-8601、`/Date(ms)/` 或純日期
pub fn parse_timestamp_str(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();

    if let Some(caps) = dotnet_date().captures(raw) {
        let millis: i64 = caps[1].parse().ok()?;
        let offset_secs = match (caps.get(2), caps.get(3), caps.get(4)) {
            (Some(sign), Some(h), Some(m)) => {
                let secs = h.as_str().parse::<i32>().ok()? * 3600
                    + m.as_str().parse::<i32>().ok()? * 60;
                if sign.as_str() == "-" {
                    -secs
                } else {
                    secs
                }
            }
            _ => 0,
        };
        let offset = FixedOffset::east_opt(offset_secs)?;
        let utc = DateTime::<Utc>::from_timestamp_millis(millis)?;
        return Some(Timestamp::Aware(utc.with_timezone(&offset)));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(Timestamp::Aware(dt));
    }

    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Timestamp::Naive(dt));
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| Timestamp::Naive(d.and_time(NaiveTime::MIN)))
}

/// Accepts a timestamp string or epoch milliseconds.
pub fn parse_timestamp(raw: &serde_json::Value) -> Option<Timestamp> {
    match raw {
        serde_json::Value::String(s) => parse_timestamp_str(s),
        serde_json::Value::Number(n) => {
            let millis = n.as_i64()?;
            let utc = DateTime::<Utc>::from_timestamp_millis(millis)?;
            Some(Timestamp::Aware(utc.fixed_offset()))
        }
        _ => None,
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| EtlError::InvalidConfigValueError {
            field: "timezone".to_string(),
            value: name.to_string(),
            reason: "not an IANA timezone name".to_string(),
        })
}

/// Unit for elapsed-time outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    pub fn parse(raw: &str) -> std::result::Result<Self, TransformError> {
        match raw {
            "s" | "sec" | "seconds" => Ok(TimeUnit::Seconds),
            "m" | "min" | "minutes" => Ok(TimeUnit::Minutes),
            "h" | "hours" => Ok(TimeUnit::Hours),
            other => Err(TransformError::InvalidParameter {
                name: "unit".to_string(),
                reason: format!("unknown unit '{}', expected s, m or h", other),
            }),
        }
    }

    pub fn convert(&self, delta: Duration) -> f64 {
        let seconds = match delta.num_microseconds() {
            Some(us) => us as f64 / 1_000_000.0,
            None => delta.num_milliseconds() as f64 / 1000.0,
        };
        self.from_seconds(seconds)
    }

    pub fn from_seconds(&self, seconds: f64) -> f64 {
        match self {
            TimeUnit::Seconds => seconds,
            TimeUnit::Minutes => seconds / 60.0,
            TimeUnit::Hours => seconds / 3600.0,
        }
    }
}

/// Subtracts and orders timestamps that may mix naive and offset-carrying values.
///
/// Naive values are read as local times of `timezone`. Without a timezone only
/// like-for-like comparisons are possible; mixing the two kinds is a
/// [`TransformError::TimezoneMismatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeNormalizer {
    timezone: Option<Tz>,
}

impl TimeNormalizer {
    pub fn new(timezone: Option<Tz>) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Option<Tz> {
        self.timezone
    }

    pub fn to_utc(&self, ts: &Timestamp) -> std::result::Result<DateTime<Utc>, TransformError> {
        match ts {
            Timestamp::Aware(dt) => Ok(dt.with_timezone(&Utc)),
            Timestamp::Naive(naive) => {
                let tz = self.timezone.ok_or_else(|| {
                    TransformError::TimezoneMismatch(format!(
                        "'{}' has no offset and no timezone is configured",
                        naive
                    ))
                })?;
                tz.from_local_datetime(naive)
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or_else(|| {
                        TransformError::TimezoneMismatch(format!(
                            "'{}' is ambiguous or does not exist in {}",
                            naive, tz
                        ))
                    })
            }
        }
    }

    /// `end - start`
    pub fn elapsed(
        &self,
        start: &Timestamp,
        end: &Timestamp,
    ) -> std::result::Result<Duration, TransformError> {
        match (start, end) {
            (Timestamp::Naive(a), Timestamp::Naive(b)) => Ok(*b - *a),
            (Timestamp::Aware(a), Timestamp::Aware(b)) => Ok(b.signed_duration_since(*a)),
            _ => Ok(self.to_utc(end)? - self.to_utc(start)?),
        }
    }

    pub fn cmp(
        &self,
        a: &Timestamp,
        b: &Timestamp,
    ) -> std::result::Result<Ordering, TransformError> {
        Ok(self.elapsed(b, a)?.cmp(&Duration::zero()))
    }
}

pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
        EtlError::InvalidConfigValueError {
            field: field.to_string(),
            value: raw.to_string(),
            reason: format!("expected YYYY-mm-dd: {}", e),
        }
    })
}

/// Inclusive list of days from `start` to `end`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Converts a wall-clock time in `from` into an API timestamp string in `to`.
pub fn to_api_time(local: NaiveDateTime, from: Tz, to: Tz) -> Result<String> {
    let localized = from
        .from_local_datetime(&local)
        .earliest()
        .ok_or_else(|| EtlError::ProcessingError {
            message: format!("{} does not exist in timezone {}", local, from),
        })?;
    Ok(localized.with_timezone(&to).format(API_FORMAT).to_string())
}

/// 每日一個查詢區間：當日 00:00:00.000 至 23:59:59.999（系統時區），轉為 API 時區
pub fn day_windows(start: NaiveDate, end: NaiveDate, system: Tz, api: Tz) -> Result<Vec<TimeWindow>> {
    date_range(start, end)
        .into_iter()
        .map(|day| {
            let begin = day.and_time(NaiveTime::MIN);
            let finish = begin + Duration::days(1) - Duration::milliseconds(1);
            Ok(TimeWindow {
                day,
                start: to_api_time(begin, system, api)?,
                end: to_api_time(finish, system, api)?,
            })
        })
        .collect()
}

pub fn yesterday(today: NaiveDate) -> NaiveDate {
    today.pred_opt().unwrap_or(today)
}

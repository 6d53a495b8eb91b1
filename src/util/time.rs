use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown timezone '{0}'")]
pub struct InvalidTimezone(pub String);

pub fn parse_timezone(name: &str) -> Result<Tz, InvalidTimezone> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| InvalidTimezone(name.to_string()))
}

/// `instant` in `tz` as RFC 3339 with the zone's offset, to the second.
pub fn iso_in(instant: DateTime<Utc>, tz: Tz) -> String {
    instant
        .with_timezone(&tz)
        .to_rfc3339_opts(SecondsFormat::Secs, false)
}

pub fn now_iso(tz: Tz) -> String {
    iso_in(Utc::now(), tz)
}

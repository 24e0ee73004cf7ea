use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub models_dir: PathBuf,

    /// Socrata-style discovery catalog; discovery is off without it.
    pub catalog_url: Option<String>,
    pub discovery_enabled: bool,
    /// Retry zero-row syncs once against catalog-discovered endpoints.
    pub discovery_fallback: bool,

    /// Timezone the draw schedules are anchored to, e.g. "-05:00".
    pub schedule_offset: FixedOffset,

    pub max_concurrent_syncs: usize,
    pub fetch_timeout_secs: u64,
    pub fetch_max_attempts: u32,
    pub sync_batch_size: usize,
    pub max_session_draws: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let data_dir = PathBuf::from(var_or("DATA_DIR", "data"));
        let models_dir = std::env::var("MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let catalog_url = std::env::var("CATALOG_URL").ok().filter(|s| !s.is_empty());
        if let Some(url) = &catalog_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("CATALOG_URL must start with http:// or https://");
            }
        }

        let discovery_enabled = flag("DISCOVERY_ENABLED") && catalog_url.is_some();
        let discovery_fallback = flag("DISCOVERY_FALLBACK") && catalog_url.is_some();

        let offset_raw = var_or("SCHEDULE_TZ_OFFSET", "-05:00");
        let schedule_offset = parse_offset(&offset_raw)
            .with_context(|| format!("SCHEDULE_TZ_OFFSET '{offset_raw}' is not ±HH:MM"))?;

        Ok(Self {
            data_dir,
            models_dir,
            catalog_url,
            discovery_enabled,
            discovery_fallback,
            schedule_offset,
            max_concurrent_syncs: parse_var("MAX_CONCURRENT_SYNCS", 3)?,
            fetch_timeout_secs: parse_var("FETCH_TIMEOUT_SECS", 30)?,
            fetch_max_attempts: parse_var("FETCH_MAX_ATTEMPTS", 3)?,
            sync_batch_size: parse_var("SYNC_BATCH_SIZE", 100)?,
            max_session_draws: parse_var("MAX_SESSION_DRAWS", 12)?,
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

/// Parses a "±HH:MM" fixed UTC offset.
pub fn parse_offset(raw: &str) -> Result<FixedOffset> {
    let (sign, rest) = match raw.as_bytes().first() {
        Some(b'+') => (1i32, &raw[1..]),
        Some(b'-') => (-1i32, &raw[1..]),
        _ => bail!("missing sign"),
    };
    let (hours, minutes) = rest.split_once(':').context("missing ':'")?;
    let hours: i32 = hours.parse().context("bad hours")?;
    let minutes: i32 = minutes.parse().context("bad minutes")?;
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        bail!("offset out of range");
    }
    let seconds = sign * (hours * 3600 + minutes * 60);
    FixedOffset::east_opt(seconds).context("offset out of range")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_negative_offset() {
        let off = parse_offset("-05:00").unwrap();
        assert_eq!(off.local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn parses_positive_offset() {
        let off = parse_offset("+01:30").unwrap();
        assert_eq!(off.local_minus_utc(), 5400);
    }

    #[test]
    fn rejects_unsigned_offset() {
        assert!(parse_offset("05:00").is_err());
        assert!(parse_offset("-99:00").is_err());
    }
}

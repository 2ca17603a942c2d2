use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::engine::SchedulingPolicy;
use crate::limits::MAX_GENERATION_WEEKS;
use crate::messages::Locale;

/// Process configuration, read once from `CLASSBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub users_file: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub reschedule_limit: u32,
    pub txn_retries: u32,
    pub generation_weeks: u32,
    pub availability_days: u32,
    pub locale: Locale,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            users_file: None,
            metrics_port: None,
            compact_threshold: 1000,
            reschedule_limit: 2,
            txn_retries: 3,
            generation_weeks: 8,
            availability_days: 28,
            locale: Locale::PtBr,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Config::default();
        Self {
            bind: get("CLASSBOOK_BIND").unwrap_or(d.bind),
            port: parsed(&get, "CLASSBOOK_PORT").unwrap_or(d.port),
            data_dir: get("CLASSBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            users_file: get("CLASSBOOK_USERS_FILE").map(PathBuf::from),
            metrics_port: parsed(&get, "CLASSBOOK_METRICS_PORT"),
            compact_threshold: parsed(&get, "CLASSBOOK_COMPACT_THRESHOLD")
                .unwrap_or(d.compact_threshold),
            reschedule_limit: parsed(&get, "CLASSBOOK_RESCHEDULE_LIMIT")
                .unwrap_or(d.reschedule_limit),
            txn_retries: parsed(&get, "CLASSBOOK_TXN_RETRIES").unwrap_or(d.txn_retries),
            generation_weeks: parsed_in(&get, "CLASSBOOK_GENERATION_WEEKS", 1..=MAX_GENERATION_WEEKS)
                .unwrap_or(d.generation_weeks),
            availability_days: parsed(&get, "CLASSBOOK_AVAILABILITY_DAYS")
                .unwrap_or(d.availability_days),
            locale: get("CLASSBOOK_LOCALE")
                .and_then(|v| Locale::parse(&v))
                .unwrap_or(d.locale),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("classbook.wal")
    }

    pub fn policy(&self) -> SchedulingPolicy {
        SchedulingPolicy {
            student_reschedule_limit: self.reschedule_limit,
            max_txn_retries: self.txn_retries,
            generation_weeks: self.generation_weeks,
            availability_days: self.availability_days,
            locale: self.locale,
        }
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring {key}={raw:?}: not a valid value");
            None
        }
    }
}

/// Like [`parsed`], but values outside `range` fall back to the default too.
fn parsed_in<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    range: RangeInclusive<T>,
) -> Option<T>
where
    T: FromStr + PartialOrd + Display,
{
    let value = parsed(get, key)?;
    if !range.contains(&value) {
        warn!(
            "ignoring {key}={value}: must be between {} and {}",
            range.start(),
            range.end()
        );
        return None;
    }
    Some(value)
}

//! Process configuration.
//!
//! The configuration file is a flat list of `key = value` lines. It is read
//! once at startup, validated, and then passed down by value; nothing mutates
//! it afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use stream_source::{SourceOptions, StreamlinkSource};
use thiserror::Error;
use tracing::{info, warn};

use crate::utils::fs;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./twitch_archiver.config";

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "TWITCH_ARCHIVER_CONFIG";

const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_RESTART_DELAY_SECS: u64 = 5;
const DEFAULT_CHUNK_SIZE: usize = 2048;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' is not set")]
    Missing(&'static str),

    #[error("'{key}' is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("'out_dir' ({}) is not a directory or does not exist", .0.display())]
    NotADirectory(PathBuf),

    #[error("'out_dir' ({}) does not have write permissions", .0.display())]
    NotWritable(PathBuf),
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory receiving the recordings.
    pub out_dir: String,
    /// Channel name.
    pub streamer: String,
    pub oauth_token: Option<String>,
    pub record_reruns: bool,
    pub disable_hosting: bool,
    pub disable_ads: bool,
    /// strftime pattern for the broadcast start time in file names.
    pub time_format: String,
    /// Level name or `EnvFilter` directive.
    pub log_level: String,
    pub poll_interval: Duration,
    pub title_poll_interval: Duration,
    /// Grace delay between the end of one broadcast and the next liveness wait.
    pub restart_delay: Duration,
    /// Bytes read from the stream per copy-loop iteration.
    pub chunk_size: usize,
    pub streamlink_path: Option<String>,
    /// When set, logs are also written to daily files in this directory.
    pub log_dir: Option<PathBuf>,
    /// Keys present in the file that are not recognised.
    pub unknown_keys: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            out_dir: ".".to_string(),
            streamer: String::new(),
            oauth_token: None,
            record_reruns: false,
            disable_hosting: false,
            disable_ads: true,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            title_poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            restart_delay: Duration::from_secs(DEFAULT_RESTART_DELAY_SECS),
            chunk_size: DEFAULT_CHUNK_SIZE,
            streamlink_path: None,
            log_dir: None,
            unknown_keys: Vec::new(),
        }
    }
}

impl Config {
    /// Resolve the config file path: first CLI argument, then the environment, then the default.
    pub fn resolve_path(cli_arg: Option<String>) -> PathBuf {
        cli_arg
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_pairs(parse_pairs(&contents))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from raw key/value pairs, checking value syntax only.
    pub fn from_pairs(mut pairs: BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut take = |key: &str| pairs.remove(key).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let out_dir = take("out_dir").ok_or(ConfigError::Missing("out_dir"))?;
        let streamer = take("streamer").unwrap_or_default();
        let oauth_token = take("oauth_token");

        let record_reruns = parse_opt_bool("record_reruns", take("record_reruns"))?
            .unwrap_or(defaults.record_reruns);
        let disable_hosting = parse_opt_bool("disable_hosting", take("disable_hosting"))?
            .unwrap_or(defaults.disable_hosting);
        let disable_ads =
            parse_opt_bool("disable_ads", take("disable_ads"))?.unwrap_or(defaults.disable_ads);

        let time_format = take("time_format").unwrap_or(defaults.time_format);
        check_time_format(&time_format)?;

        let log_level = take("log_level").unwrap_or(defaults.log_level);

        let poll_interval = parse_opt_secs("poll_interval", take("poll_interval"))?
            .unwrap_or(defaults.poll_interval);
        let title_poll_interval =
            parse_opt_secs("title_poll_interval", take("title_poll_interval"))?
                .unwrap_or(poll_interval);
        let restart_delay = match take("restart_delay") {
            Some(v) => parse_secs("restart_delay", &v, true)?,
            None => defaults.restart_delay,
        };

        let chunk_size = match take("chunk_size") {
            Some(v) => match v.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::invalid("chunk_size", "expected a positive integer")),
            },
            None => defaults.chunk_size,
        };

        let streamlink_path = take("streamlink_path");
        let log_dir = take("log_dir").map(PathBuf::from);

        // Everything recognised has been taken out by now.
        let unknown_keys = pairs.into_keys().collect();

        Ok(Self {
            out_dir,
            streamer,
            oauth_token,
            record_reruns,
            disable_hosting,
            disable_ads,
            time_format,
            log_level,
            poll_interval,
            title_poll_interval,
            restart_delay,
            chunk_size,
            streamlink_path,
            log_dir,
            unknown_keys,
        })
    }

    /// Check the parts of the config that depend on the environment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let out_dir = Path::new(&self.out_dir);
        if !out_dir.is_dir() {
            return Err(ConfigError::NotADirectory(out_dir.to_path_buf()));
        }
        if fs::probe_writable(out_dir).is_err() {
            return Err(ConfigError::NotWritable(out_dir.to_path_buf()));
        }
        if self.streamer.trim().is_empty() {
            return Err(ConfigError::Missing("streamer"));
        }
        Ok(())
    }

    /// Plugin options handed to the stream source.
    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            oauth_token: self.oauth_token.clone(),
            record_reruns: self.record_reruns,
            disable_hosting: self.disable_hosting,
            disable_ads: self.disable_ads,
        }
    }

    /// The streamlink-backed source for the configured channel.
    pub fn streamlink_source(&self) -> StreamlinkSource {
        let source = StreamlinkSource::twitch(&self.streamer, self.source_options());
        match &self.streamlink_path {
            Some(path) => source.with_binary_path(path),
            None => source,
        }
    }

    /// Log every effective option, with the OAuth token redacted.
    pub fn log_summary(&self) {
        info!("config.out_dir={}", self.out_dir);
        info!("config.streamer={}", self.streamer);
        info!(
            "config.oauth_token={}",
            self.oauth_token.as_deref().map(redact_token).unwrap_or_default()
        );
        info!("config.record_reruns={}", self.record_reruns);
        info!("config.disable_hosting={}", self.disable_hosting);
        info!("config.disable_ads={}", self.disable_ads);
        info!("config.time_format={}", self.time_format);
        info!("config.log_level={}", self.log_level);
        info!("config.poll_interval={:?}", self.poll_interval);
        info!("config.title_poll_interval={:?}", self.title_poll_interval);
        info!("config.restart_delay={:?}", self.restart_delay);
        info!("config.chunk_size={}", self.chunk_size);
        if let Some(path) = &self.streamlink_path {
            info!("config.streamlink_path={path}");
        }
        if let Some(dir) = &self.log_dir {
            info!("config.log_dir={}", dir.display());
        }
        for key in &self.unknown_keys {
            warn!("ignoring unknown config key '{key}'");
        }
    }
}

/// Parse `key = value` lines. Comments (`#`) and blank lines are skipped.
pub fn parse_pairs(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Keep the first 6 characters of a token and mask the rest.
pub fn redact_token(token: &str) -> String {
    let visible: String = token.chars().take(6).collect();
    let hidden = token.chars().count().saturating_sub(6);
    format!("{visible}{}", "*".repeat(hidden))
}

fn parse_opt_bool(key: &'static str, value: Option<String>) -> Result<Option<bool>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(Some(true)),
        "false" | "no" | "0" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::invalid(key, format!("expected a boolean, got '{value}'"))),
    }
}

fn parse_opt_secs(key: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    value.map(|v| parse_secs(key, &v, false)).transpose()
}

fn parse_secs(key: &'static str, value: &str, allow_zero: bool) -> Result<Duration, ConfigError> {
    match value.parse::<f64>() {
        Ok(secs) if secs.is_finite() && (secs > 0.0 || (allow_zero && secs == 0.0)) => {
            Ok(Duration::from_secs_f64(secs))
        }
        _ => Err(ConfigError::invalid(
            key,
            format!("expected a number of seconds, got '{value}'"),
        )),
    }
}

fn check_time_format(format: &str) -> Result<(), ConfigError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigError::invalid(
            "time_format",
            format!("'{format}' is not a valid strftime pattern"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> BTreeMap<String, String> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_pairs() {
        let raw = "# comment\n\nout_dir = /rec/\n streamer=foo \noauth_token = a=b=c\nnot a pair\n";
        let parsed = parse_pairs(raw);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed["out_dir"], "/rec/");
        assert_eq!(parsed["streamer"], "foo");
        assert_eq!(parsed["oauth_token"], "a=b=c");
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_pairs(pairs(&[("out_dir", "/rec/"), ("streamer", "foo")])).unwrap();
        assert_eq!(config.time_format, DEFAULT_TIME_FORMAT);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.title_poll_interval, Duration::from_secs(5));
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.oauth_token, None);
        assert!(!config.record_reruns);
        assert!(config.unknown_keys.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_pairs(pairs(&[
            ("out_dir", "/rec/"),
            ("streamer", "foo"),
            ("oauth_token", ""),
            ("record_reruns", "True"),
            ("disable_hosting", "yes"),
            ("disable_ads", "0"),
            ("time_format", "%Y%m%d"),
            ("log_level", "DEBUG"),
            ("poll_interval", "10"),
            ("restart_delay", "0"),
            ("chunk_size", "1024"),
            ("colour", "blue"),
        ]))
        .unwrap();

        assert_eq!(config.oauth_token, None);
        assert!(config.record_reruns);
        assert!(config.disable_hosting);
        assert!(!config.disable_ads);
        assert_eq!(config.time_format, "%Y%m%d");
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.title_poll_interval, Duration::from_secs(10));
        assert_eq!(config.restart_delay, Duration::ZERO);
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.unknown_keys, vec!["colour".to_string()]);
    }

    #[test]
    fn test_invalid_values_name_the_key() {
        let cases = [
            ("record_reruns", "maybe"),
            ("poll_interval", "0"),
            ("poll_interval", "soon"),
            ("chunk_size", "0"),
            ("time_format", "%Y-%"),
        ];
        for (key, value) in cases {
            let err = Config::from_pairs(pairs(&[("out_dir", "/rec/"), (key, value)])).unwrap_err();
            assert!(
                err.to_string().contains(key),
                "error for {key}={value} should name the key: {err}"
            );
        }
    }

    #[test]
    fn test_missing_out_dir() {
        let err = Config::from_pairs(pairs(&[("streamer", "foo")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("out_dir")));
    }

    #[test]
    fn test_validate() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            out_dir: dir.path().to_string_lossy().into_owned(),
            streamer: "foo".to_string(),
            ..Config::default()
        };
        config.validate().unwrap();

        config.streamer = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("streamer"))));

        config.streamer = "foo".to_string();
        config.out_dir = dir.path().join("missing").to_string_lossy().into_owned();
        assert!(matches!(config.validate(), Err(ConfigError::NotADirectory(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twitch_archiver.config");
        std::fs::write(
            &path,
            format!("out_dir = {}\nstreamer = foo\n", dir.path().display()),
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.streamer, "foo");

        let err = Config::load(&dir.path().join("nope.config")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_redact_token() {
        assert_eq!(redact_token("abcdef123456"), "abcdef******");
        assert_eq!(redact_token("abc"), "abc");
        assert_eq!(redact_token(""), "");
    }

    #[test]
    fn test_source_options() {
        let config = Config {
            oauth_token: Some("tok".to_string()),
            record_reruns: true,
            ..Config::default()
        };
        let options = config.source_options();
        assert_eq!(options.oauth_token.as_deref(), Some("tok"));
        assert!(options.record_reruns);
        assert!(options.disable_ads);
    }
}

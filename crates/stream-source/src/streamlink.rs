//! Stream source backed by the `streamlink` command line tool.
//!
//! Liveness and metadata come from `streamlink --json <url>`, the byte stream
//! from `streamlink --stdout <url> best`.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::source::{SourceOptions, SourceStream, StreamSource};

pub const DEFAULT_STREAMLINK_PATH: &str = "streamlink";
const BEST_QUALITY: &str = "best";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

fn tokio_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd.kill_on_drop(true);
    cmd
}

#[derive(Debug, Clone)]
pub struct StreamlinkSource {
    url: String,
    binary_path: String,
    options: SourceOptions,
}

impl StreamlinkSource {
    /// Source for `https://twitch.tv/<channel>`.
    pub fn twitch(channel: &str, options: SourceOptions) -> Self {
        Self::new(format!("https://twitch.tv/{channel}"), options)
    }

    pub fn new(url: impl Into<String>, options: SourceOptions) -> Self {
        let binary_path =
            std::env::var("STREAMLINK_PATH").unwrap_or_else(|_| DEFAULT_STREAMLINK_PATH.to_string());
        Self {
            url: url.into(),
            binary_path,
            options,
        }
    }

    /// Override the streamlink binary.
    pub fn with_binary_path(mut self, binary_path: impl Into<String>) -> Self {
        self.binary_path = binary_path.into();
        self
    }

    pub fn binary_path(&self) -> &str {
        &self.binary_path
    }

    /// Twitch plugin flags derived from [`SourceOptions`].
    fn plugin_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(token) = self.options.oauth_token.as_deref().filter(|t| !t.is_empty()) {
            args.push(format!("--twitch-api-header=Authorization=OAuth {token}"));
        }
        if !self.options.record_reruns {
            args.push("--twitch-disable-reruns".to_string());
        }
        if self.options.disable_hosting {
            args.push("--twitch-disable-hosting".to_string());
        }
        if self.options.disable_ads {
            args.push("--twitch-disable-ads".to_string());
        }

        args
    }

    async fn run_json(&self) -> Result<StreamlinkJson, SourceError> {
        let mut cmd = tokio_command(&self.binary_path);
        cmd.arg("--json")
            .args(self.plugin_args())
            .arg(&self.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let out = cmd.output().await.map_err(|source| SourceError::Spawn {
            program: self.binary_path.clone(),
            source,
        })?;

        // Streamlink prints JSON to stdout in `--json` mode, errors included.
        let json: StreamlinkJson = match serde_json::from_slice(&out.stdout) {
            Ok(json) => json,
            Err(e) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                return Err(SourceError::Other(format!(
                    "failed to parse streamlink output: {e}; stderr: {}",
                    stderr.trim()
                )));
            }
        };

        match json.error.as_deref() {
            Some(err) => Err(map_streamlink_error(err)),
            None => Ok(json),
        }
    }
}

#[async_trait]
impl StreamSource for StreamlinkSource {
    fn url(&self) -> &str {
        &self.url
    }

    async fn check_live(&self) -> Result<bool, SourceError> {
        match self.run_json().await {
            Ok(json) => Ok(json.has_best()),
            Err(e) if e.is_offline() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn fetch_title(&self) -> Result<Option<String>, SourceError> {
        match self.run_json().await {
            Ok(json) => Ok(json.title()),
            Err(e) if e.is_offline() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn open_best(&self) -> Result<SourceStream, SourceError> {
        // Resolve first so refusals surface here instead of as an early EOF.
        let json = self.run_json().await?;
        if !json.has_best() {
            return Err(SourceError::NoStreams);
        }

        let mut cmd = tokio_command(&self.binary_path);
        cmd.arg("--stdout")
            .args(["--loglevel", "info"])
            .args(self.plugin_args())
            .arg(&self.url)
            .arg(BEST_QUALITY)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| SourceError::Spawn {
            program: self.binary_path.clone(),
            source,
        })?;
        debug!(url = %self.url, pid = ?child.id(), "opened streamlink stream");

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        SourceStream::from_child(child)
    }
}

/// Relay streamlink's own log lines until the process closes stderr.
async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_streamlink_output(&line) {
                Some(StreamlinkStatus::Error(msg)) => warn!("streamlink: {msg}"),
                Some(StreamlinkStatus::StreamEnded) => debug!("streamlink reported stream end"),
                Some(StreamlinkStatus::StreamOpened) => debug!("streamlink opened stream"),
                None => debug!("streamlink: {line}"),
            },
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "failed to read streamlink stderr");
                break;
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StreamlinkStatus {
    StreamOpened,
    StreamEnded,
    Error(String),
}

fn parse_streamlink_output(line: &str) -> Option<StreamlinkStatus> {
    if line.contains("[cli][info] Stream ended") {
        return Some(StreamlinkStatus::StreamEnded);
    }
    if line.contains("[cli][info] Opening stream") {
        return Some(StreamlinkStatus::StreamOpened);
    }
    if line.contains("[cli][error]") || line.contains("error: ") {
        return Some(StreamlinkStatus::Error(line.to_string()));
    }
    None
}

fn map_streamlink_error(msg: &str) -> SourceError {
    let lower = msg.to_lowercase();
    if lower.contains("no plugin can handle url") {
        return SourceError::Unsupported(msg.to_string());
    }
    if lower.contains("no streams found") || lower.contains("no playable streams") {
        return SourceError::NoStreams;
    }
    if lower.contains("refused")
        || lower.contains("session expired")
        || lower.contains("401 client error")
        || lower.contains("403 client error")
        || lower.contains("unauthorized")
    {
        return SourceError::ConnectionRefused(msg.to_string());
    }
    SourceError::Other(msg.to_string())
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StreamlinkJson {
    #[serde(default)]
    metadata: Option<StreamlinkMetadata>,
    #[serde(default)]
    streams: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    error: Option<String>,
}

impl StreamlinkJson {
    fn has_best(&self) -> bool {
        self.streams
            .as_ref()
            .is_some_and(|streams| streams.contains_key(BEST_QUALITY))
    }

    fn title(&self) -> Option<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.title.clone())
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StreamlinkMetadata {
    #[serde(default)]
    title: Option<String>,
}

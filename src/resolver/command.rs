//! Resolver backed by an external extractor executable.
//!
//! Runs the configured tool (`yt-dlp` by default) with `--dump-single-json`,
//! parses its output and picks the best audio format. The child process is
//! killed when the call times out or its future is dropped.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use super::{MediaMetadata, Resolution, ResolveError, Resolver};
use crate::config::ResolverConfig;

/// Resolver that shells out to an extractor tool.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    program: String,
    page_url: String,
    format: String,
    timeout: Duration,
    extra_args: Vec<String>,
}

impl CommandResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            program: config.command.clone(),
            page_url: config.page_url.clone(),
            format: config.format.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            extra_args: config.extra_args.clone(),
        }
    }

    /// Page URL handed to the extractor for `id`.
    pub fn page_url(&self, id: &str) -> String {
        self.page_url.replace("{id}", id)
    }

    fn command(&self, id: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--dump-single-json")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--skip-download")
            .arg("-f")
            .arg(&self.format)
            .args(&self.extra_args)
            .arg(self.page_url(id))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Resolver for CommandResolver {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn resolve(&self, id: &str) -> Result<Resolution, ResolveError> {
        tracing::debug!(id = %id, program = %self.program, "Running extractor");

        let output = match tokio::time::timeout(self.timeout, self.command(id).output()).await {
            Err(_) => {
                tracing::warn!(id = %id, timeout_secs = self.timeout.as_secs(), "Extractor timed out");
                return Err(ResolveError::Timeout);
            }
            Ok(Err(e)) => {
                return Err(ResolveError::Upstream(format!(
                    "failed to run {}: {}",
                    self.program, e
                )));
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        let info: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ResolveError::Upstream(format!("unparseable extractor output: {}", e)))?;

        parse_info(&info)
    }
}

/// Map extractor stderr onto the resolver error kinds.
fn classify_failure(stderr: &str) -> ResolveError {
    let lower = stderr.to_lowercase();

    if lower.contains("requested format is not available") {
        return ResolveError::NoPlayableFormat;
    }

    let not_found_markers = [
        "video unavailable",
        "private video",
        "has been removed",
        "does not exist",
        "is not available",
        "incomplete youtube id",
    ];
    if not_found_markers.iter().any(|m| lower.contains(m)) {
        return ResolveError::NotFound;
    }

    let last_line = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("extractor exited with an error")
        .trim();
    ResolveError::Upstream(last_line.to_string())
}

/// Build a [`Resolution`] from the extractor's JSON dump.
pub(crate) fn parse_info(info: &Value) -> Result<Resolution, ResolveError> {
    let metadata = MediaMetadata {
        title: info
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string(),
        duration: info.get("duration").and_then(Value::as_f64),
        thumbnail: last_thumbnail(info),
        formats: info
            .get("formats")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
    };

    // A top-level URL means the extractor already applied the format selector.
    if let Some(url) = info.get("url").and_then(Value::as_str) {
        let content_type = content_type_for(info);
        return Ok(Resolution::new(url, content_type).with_metadata(metadata));
    }

    if metadata.formats.is_empty() {
        return Err(ResolveError::NoPlayableFormat);
    }

    let best = select_audio_format(&metadata.formats).ok_or(ResolveError::NoPlayableFormat)?;
    let url = best
        .get("url")
        .and_then(Value::as_str)
        .ok_or(ResolveError::NoPlayableFormat)?
        .to_string();
    let content_type = content_type_for(best);

    let format_id = best
        .get("format_id")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    tracing::debug!(format_id, "Selected format");

    Ok(Resolution::new(url, content_type).with_metadata(metadata))
}

fn last_thumbnail(info: &Value) -> Option<String> {
    info.get("thumbnails")
        .and_then(Value::as_array)
        .and_then(|thumbs| thumbs.last())
        .and_then(|t| t.get("url"))
        .and_then(Value::as_str)
        .or_else(|| info.get("thumbnail").and_then(Value::as_str))
        .map(str::to_string)
}

/// Prefer formats carrying audio, then audio-only, then the highest audio bitrate.
fn select_audio_format(formats: &[Value]) -> Option<&Value> {
    let audio: Vec<&Value> = formats
        .iter()
        .filter(|f| f.get("acodec").and_then(Value::as_str) != Some("none"))
        .collect();

    let candidates: Vec<&Value> = if audio.is_empty() {
        tracing::warn!("No audio formats found, using all formats");
        formats.iter().collect()
    } else {
        audio
    };

    candidates.into_iter().min_by(|a, b| {
        has_video(a).cmp(&has_video(b)).then_with(|| {
            audio_bitrate(b)
                .partial_cmp(&audio_bitrate(a))
                .unwrap_or(Ordering::Equal)
        })
    })
}

fn has_video(format: &Value) -> bool {
    !matches!(
        format.get("vcodec").and_then(Value::as_str),
        None | Some("none")
    )
}

fn audio_bitrate(format: &Value) -> f64 {
    format.get("abr").and_then(Value::as_f64).unwrap_or(0.0)
}

fn content_type_for(format: &Value) -> &'static str {
    let ext = format
        .get("audio_ext")
        .and_then(Value::as_str)
        .filter(|e| *e != "none")
        .or_else(|| format.get("ext").and_then(Value::as_str))
        .unwrap_or("");

    match ext.to_lowercase().as_str() {
        "m4a" | "mp4" => "audio/mp4",
        "webm" => "audio/webm",
        "mp3" => "audio/mpeg",
        "opus" | "ogg" => "audio/ogg",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Tool discovery
// ---------------------------------------------------------------------------

/// Information about an external tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of the tool's `--version` output.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Check if the extractor is available and get its version.
pub fn check_tool(name: &str) -> ToolInfo {
    let result = std::process::Command::new(name).arg("--version").output();

    match result {
        Ok(output) if output.status.success() => ToolInfo {
            name: name.to_string(),
            available: true,
            version: String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string()),
            path: which::which(name).ok(),
        },
        _ => ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        },
    }
}

//! Upload command: wires configuration, input and progress into the engine.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context;
use bytelift_protocol::{DynamicFilePath, FilePathDefinition, UploadProgress, UploadedFile};
use bytelift_transfer::{BODY_CHUNK_SIZE, SpeedCalculator};
use bytelift_upload::{ApiKeyAuth, HttpUploadApi, UploadData, UploadManager, UploadParams};
use clap::Args;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;

/// Minimum time between two progress log lines.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// File to upload, or `-` for standard input
    pub file: String,

    /// Total size in bytes (required for standard input)
    #[arg(long)]
    pub size: Option<u64>,

    /// Destination folder
    #[arg(long)]
    pub folder: Option<String>,

    /// Destination file name
    #[arg(long)]
    pub file_name: Option<String>,

    /// Tag to attach (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// JSON metadata to attach
    #[arg(long)]
    pub metadata: Option<String>,

    /// MIME type, overriding detection
    #[arg(long)]
    pub mime: Option<String>,

    /// Parts uploaded at once
    #[arg(long)]
    pub concurrency: Option<usize>,
}

/// Uploads the file named by `args`. Cancelling `cancel` aborts the upload.
pub async fn upload(
    config: &Config,
    args: UploadArgs,
    cancel: CancellationToken,
) -> anyhow::Result<UploadedFile> {
    config.validate()?;

    let data = upload_data(&args.file, args.size)?;
    let metadata = parse_metadata(args.metadata.as_deref())?;

    let auth = Arc::new(ApiKeyAuth::new(&config.api_key)?);
    let api = HttpUploadApi::new(config.account_id.clone(), auth)?
        .with_base_url(config.base_url.clone());
    let manager = UploadManager::new(Arc::new(api));

    let reporter = Arc::new(ProgressReporter::new(PROGRESS_INTERVAL));
    let mut params = UploadParams::new()
        .max_concurrent_upload_parts(
            args.concurrency.unwrap_or(config.max_concurrent_upload_parts),
        )
        .cancellation_token(cancel)
        .on_progress({
            let reporter = Arc::clone(&reporter);
            move |p| reporter.record(p)
        });
    params.path = file_path_definition(args.folder, args.file_name);
    params.tags = args.tags;
    params.metadata = metadata;
    params.size = args.size;
    params.mime = args.mime;

    info!(file = %args.file, account = %config.account_id, "uploading");
    let file = manager.upload(data, params).await?;
    info!(path = %file.file_path, url = %file.file_url, "upload finished");
    Ok(file)
}

/// `-` reads standard input as a stream; anything else names a file.
fn upload_data(file: &str, size: Option<u64>) -> anyhow::Result<UploadData> {
    if file == "-" {
        if size.is_none() {
            anyhow::bail!("--size is required when uploading from standard input");
        }
        let stdin = ReaderStream::with_capacity(tokio::io::stdin(), BODY_CHUNK_SIZE);
        return Ok(UploadData::stream(stdin));
    }
    Ok(UploadData::Path(PathBuf::from(file)))
}

fn file_path_definition(
    folder: Option<String>,
    file_name: Option<String>,
) -> Option<FilePathDefinition> {
    if folder.is_none() && file_name.is_none() {
        return None;
    }
    Some(FilePathDefinition::Dynamic(DynamicFilePath {
        file_name,
        folder_path: folder,
        ..DynamicFilePath::default()
    }))
}

fn parse_metadata(raw: Option<&str>) -> anyhow::Result<Option<serde_json::Value>> {
    raw.map(|s| serde_json::from_str(s).context("--metadata must be valid JSON"))
        .transpose()
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Logs progress at most once per interval, plus the final event.
pub struct ProgressReporter {
    interval: Duration,
    speed: SpeedCalculator,
    state: Mutex<ReporterState>,
}

#[derive(Default)]
struct ReporterState {
    last_report: Option<Instant>,
    last_bytes: u64,
}

impl ProgressReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            speed: SpeedCalculator::new(None, None),
            state: Mutex::new(ReporterState::default()),
        }
    }

    pub fn record(&self, progress: UploadProgress) {
        if !self.observe(Instant::now(), progress) {
            return;
        }
        let remaining = progress.bytes_total.saturating_sub(progress.bytes_sent);
        info!(
            sent = progress.bytes_sent,
            total = progress.bytes_total,
            percent = progress.progress,
            rate = %format_rate(self.speed.bytes_per_second()),
            eta = %format_eta(self.speed.eta(remaining)),
            "upload progress"
        );
    }

    /// Feeds the rate window and decides whether `progress` is logged.
    fn observe(&self, now: Instant, progress: UploadProgress) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let delta = progress.bytes_sent.saturating_sub(state.last_bytes);
        state.last_bytes = state.last_bytes.max(progress.bytes_sent);
        self.speed.add_sample(delta);

        let due = progress.is_complete()
            || state
                .last_report
                .is_none_or(|last| now.duration_since(last) >= self.interval);
        if due {
            state.last_report = Some(now);
        }
        due
    }
}

fn format_rate(bytes_per_second: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_second;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return "-".into();
    };
    let secs = eta.as_secs();
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, secs % 3600 / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporter_throttles_between_intervals() {
        let reporter = ProgressReporter::new(Duration::from_millis(500));
        let start = Instant::now();

        let at = |ms| start + Duration::from_millis(ms);

        assert!(reporter.observe(start, UploadProgress::initial(100)));
        assert!(!reporter.observe(at(100), UploadProgress::new(10, 100)));
        assert!(!reporter.observe(at(499), UploadProgress::new(20, 100)));
        assert!(reporter.observe(at(500), UploadProgress::new(30, 100)));
    }

    #[test]
    fn reporter_always_logs_completion() {
        let reporter = ProgressReporter::new(Duration::from_secs(60));
        let start = Instant::now();

        assert!(reporter.observe(start, UploadProgress::initial(100)));
        assert!(reporter.observe(start, UploadProgress::new(100, 100)));
    }

    #[test]
    fn rate_formatting() {
        assert_eq!(format_rate(0.0), "0.0 B/s");
        assert_eq!(format_rate(512.0), "512.0 B/s");
        assert_eq!(format_rate(1536.0), "1.5 KiB/s");
        assert_eq!(format_rate(3.0 * 1024.0 * 1024.0), "3.0 MiB/s");
    }

    #[test]
    fn eta_formatting() {
        assert_eq!(format_eta(None), "-");
        assert_eq!(format_eta(Some(Duration::from_millis(4_900))), "4s");
        assert_eq!(format_eta(Some(Duration::from_secs(65))), "1m05s");
        assert_eq!(format_eta(Some(Duration::from_secs(7_380))), "2h03m");
    }

    #[test]
    fn path_definition_from_flags() {
        assert_eq!(file_path_definition(None, None), None);
        assert_eq!(
            file_path_definition(Some("/photos".into()), None),
            Some(FilePathDefinition::Dynamic(DynamicFilePath {
                folder_path: Some("/photos".into()),
                ..DynamicFilePath::default()
            }))
        );
    }

    #[test]
    fn metadata_must_be_json() {
        assert_eq!(parse_metadata(None).unwrap(), None);
        assert_eq!(
            parse_metadata(Some(r#"{"a":1}"#)).unwrap(),
            Some(serde_json::json!({ "a": 1 }))
        );
        assert!(parse_metadata(Some("{not json")).is_err());
    }

    #[tokio::test]
    async fn stdin_requires_size() {
        assert!(upload_data("-", None).is_err());
        assert!(matches!(upload_data("-", Some(10)).unwrap(), UploadData::Stream(_)));
        assert!(matches!(upload_data("a.txt", None).unwrap(), UploadData::Path(_)));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_upload() {
        let args = UploadArgs {
            file: "a.txt".into(),
            size: None,
            folder: None,
            file_name: None,
            tags: Vec::new(),
            metadata: None,
            mime: None,
            concurrency: None,
        };
        let err = upload(&Config::default(), args, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("API key"));
    }
}

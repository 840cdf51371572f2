use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    downloader::{DownloadTask, Downloader},
    ffmpeg::Assembler,
    hls::{is_valid_name_format, PlaylistEntry, PlaylistSource, PollError, Segment},
    ledger::{Cleanup, Ledger},
};

#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("invalid segment name format {0:?}")]
    InvalidNameFormat(String),
}

/// What to record in the manifest when part of a batch failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchPolicy {
    /// Append the segments that succeeded, in playlist order.
    #[default]
    Partial,
    /// Append nothing from a batch with any failed segment.
    AllOrNothing,
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Pause between two polls. Zero polls again right away.
    pub poll_interval: Duration,
    /// strftime pattern turning a publish time into a file name.
    pub name_format: String,
    pub manifest_name: String,
    pub batch_policy: BatchPolicy,
    /// Stop once no new segment has shown up for this long.
    pub stall_timeout: Option<Duration>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            name_format: "seg_%Y%m%d-%H%M%S%.3f.ts".to_string(),
            manifest_name: "filelist.txt".to_string(),
            batch_policy: BatchPolicy::Partial,
            stall_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    UpstreamEnded,
    Stalled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub dispatched: usize,
    pub recorded: usize,
    pub failed: usize,
    pub appended: usize,
    pub ended: bool,
}

#[derive(Debug)]
pub struct RecordingSummary {
    pub stop_reason: StopReason,
    pub segments_recorded: usize,
    pub segments_failed: usize,
    pub manifest: PathBuf,
    pub output: Option<PathBuf>,
}

/// Drives one recording session.
///
/// Each cycle polls the playlist, picks the entries published after the
/// cursor, downloads them as one batch and appends the finished names to the
/// ledger. The cursor and the ledger belong to this loop alone; download
/// tasks never touch them.
///
/// Cancellation is observed before a poll and while waiting between polls.
/// A batch that has been dispatched always runs to completion first. When the
/// loop stops, the assembler runs once, followed by the cleanup if assembly
/// succeeded.
pub struct Recorder {
    source: Arc<dyn PlaylistSource>,
    downloader: Downloader,
    ledger: Ledger,
    dir: PathBuf,
    config: RecorderConfig,
    cursor: Option<DateTime<Utc>>,
    assembler: Option<Arc<dyn Assembler>>,
    cleanup: Option<Arc<dyn Cleanup>>,
    segments_recorded: usize,
    segments_failed: usize,
    last_new_segment: Instant,
}

impl Recorder {
    pub async fn new(
        source: Arc<dyn PlaylistSource>,
        downloader: Downloader,
        dir: impl Into<PathBuf>,
        config: RecorderConfig,
    ) -> Result<Self, WorkerError> {
        if !is_valid_name_format(&config.name_format) {
            return Err(WorkerError::InvalidNameFormat(config.name_format));
        }

        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let ledger = Ledger::new(dir.join(&config.manifest_name));

        Ok(Self {
            source,
            downloader,
            ledger,
            dir,
            config,
            cursor: None,
            assembler: None,
            cleanup: None,
            segments_recorded: 0,
            segments_failed: 0,
            last_new_segment: Instant::now(),
        })
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn Assembler>) -> Self {
        self.assembler = Some(assembler);
        self
    }

    pub fn with_cleanup(mut self, cleanup: Arc<dyn Cleanup>) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.cursor
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Entries published after the cursor, in playlist order, along with the
    /// newest publish time seen among them.
    ///
    /// An entry that is not later than one already picked is a repeat and is
    /// dropped. So is an entry whose file name collides with one already in
    /// the batch, which happens when the name format is coarser than the
    /// segment spacing. The returned time still covers such entries, so they
    /// are not offered again.
    fn select_new(&self, entries: Vec<PlaylistEntry>) -> (Vec<Segment>, Option<DateTime<Utc>>) {
        let mut newest = self.cursor;
        let mut names = HashSet::new();
        let mut segments = Vec::new();

        for entry in entries {
            if newest.map_or(false, |t| entry.publish_time <= t) {
                continue;
            }
            newest = Some(entry.publish_time);

            let segment = Segment::new(entry, &self.config.name_format);
            if !names.insert(segment.local_name.clone()) {
                warn!(
                    "Skipping {}: file name {} is already taken in this batch",
                    segment.uri, segment.local_name
                );
                continue;
            }
            segments.push(segment);
        }

        (segments, newest)
    }

    /// Runs a single poll, diff and dispatch. A failed poll leaves the cursor
    /// untouched.
    pub async fn poll_cycle(&mut self) -> Result<CycleReport, PollError> {
        let snapshot = self.source.poll().await?;
        let (segments, newest) = self.select_new(snapshot.entries);

        // The batch is identified: move past all of it, including segments
        // that will end up failing or were skipped.
        self.cursor = newest;

        let mut report = CycleReport {
            ended: snapshot.ended,
            ..CycleReport::default()
        };
        if segments.is_empty() {
            return Ok(report);
        }

        info!("Found {} new segments", segments.len());
        self.last_new_segment = Instant::now();

        let tasks: Vec<DownloadTask> = segments
            .iter()
            .map(|segment| DownloadTask {
                url: segment.uri.clone(),
                path: self.dir.join(&segment.local_name),
            })
            .collect();
        let outcomes = self.downloader.run(&tasks).await;

        let recorded: Vec<String> = segments
            .iter()
            .zip(&outcomes)
            .filter(|(_, outcome)| outcome.is_success())
            .map(|(segment, _)| segment.local_name.clone())
            .collect();

        report.dispatched = segments.len();
        report.recorded = recorded.len();
        report.failed = report.dispatched - report.recorded;
        self.segments_recorded += report.recorded;
        self.segments_failed += report.failed;

        let appended = match self.config.batch_policy {
            BatchPolicy::AllOrNothing if report.failed > 0 => {
                warn!(
                    "Dropping batch of {} segments from the manifest, {} failed",
                    report.dispatched, report.failed
                );
                // Cleanup only removes what the manifest lists.
                for name in &recorded {
                    let path = self.dir.join(name);
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        warn!("Could not remove {}: {}", path.display(), e);
                    }
                }
                Vec::new()
            }
            _ => recorded,
        };

        match self.ledger.append(&appended).await {
            Ok(()) => report.appended = appended.len(),
            Err(e) => error!(
                "Could not append {} entries to {}: {}",
                appended.len(),
                self.ledger.path().display(),
                e
            ),
        }

        Ok(report)
    }

    /// Records until `token` is cancelled or the stream ends, then hands the
    /// manifest to the assembler.
    pub async fn run(mut self, token: CancellationToken) -> RecordingSummary {
        info!("Recording into {}", self.dir.display());
        self.last_new_segment = Instant::now();

        let stop_reason = loop {
            if token.is_cancelled() {
                break StopReason::Cancelled;
            }

            match self.poll_cycle().await {
                Ok(report) if report.ended => {
                    info!("Upstream stream has ended");
                    break StopReason::UpstreamEnded;
                }
                Ok(report) if report.failed > 0 => {
                    warn!("{} of {} segments failed", report.failed, report.dispatched)
                }
                Ok(_) => (),
                Err(e) => warn!("Playlist poll failed: {}", e),
            }

            if let Some(limit) = self.config.stall_timeout {
                if self.last_new_segment.elapsed() > limit {
                    info!("No new segments for {:?}, stopping", limit);
                    break StopReason::Stalled;
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break StopReason::Cancelled,
                _ = tokio::time::sleep(self.config.poll_interval) => (),
            }
        };

        self.finish(stop_reason).await
    }

    async fn finish(self, stop_reason: StopReason) -> RecordingSummary {
        info!(
            "Recording stopped ({:?}): {} segments recorded, {} failed",
            stop_reason, self.segments_recorded, self.segments_failed
        );

        let manifest = self.ledger.path().to_path_buf();
        let mut output = None;

        if let Some(assembler) = &self.assembler {
            match assembler.assemble(&manifest, &self.dir).await {
                Ok(path) => {
                    info!("Assembled {}", path.display());
                    output = Some(path);

                    if let Some(cleanup) = &self.cleanup {
                        if let Err(e) = cleanup.cleanup(&manifest, &self.dir).await {
                            error!("Cleanup of {} failed: {}", self.dir.display(), e);
                        }
                    }
                }
                Err(e) => error!("Could not assemble recording: {}", e),
            }
        }

        RecordingSummary {
            stop_reason,
            segments_recorded: self.segments_recorded,
            segments_failed: self.segments_failed,
            manifest,
            output,
        }
    }
}

use std::{
    io::Write,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{downloader::ProgressObserver, util};

/// Running totals for a recording session, printed as a single status line.
#[derive(Default)]
pub struct DownloadStatistics {
    pub bytes_downloaded: AtomicU64,
    pub segments_downloaded: AtomicU64,
    pub quiet: bool,
}

impl DownloadStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    /// The status line rewrites itself in place, which garbles interleaved
    /// log lines. Once info logging is on, progress goes to the log instead.
    pub fn for_terminal() -> Self {
        if log_enabled!(log::Level::Info) {
            Self::quiet()
        } else {
            Self::new()
        }
    }

    pub fn segments(&self) -> u64 {
        self.segments_downloaded.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::Relaxed)
    }

    pub fn print(&self) {
        print!(
            "\x1b[2K\rDownloaded {} segments ({})",
            self.segments(),
            util::format_bytes(self.bytes())
        );
        let _ = std::io::stdout().lock().flush();
    }
}

impl ProgressObserver for DownloadStatistics {
    fn segment_completed(&self, path: &Path, bytes: usize) {
        self.segments_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded
            .fetch_add(bytes as u64, Ordering::Relaxed);
        if self.quiet {
            debug!(
                "{} done, {} segments ({}) so far",
                path.display(),
                self.segments(),
                util::format_bytes(self.bytes())
            );
        } else {
            self.print();
        }
    }
}

use std::{
    collections::HashSet,
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

/// Append-only manifest of recorded segment file names, one per line, in
/// stream order.
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one batch as a contiguous block, keeping the given order.
    pub async fn append(&self, names: &[String]) -> io::Result<()> {
        if names.is_empty() {
            return Ok(());
        }

        let block: String = names.iter().map(|name| format!("{name}\n")).collect();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(block.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await
    }
}

/// Reads a manifest back, dropping repeated names but keeping the position of
/// their first occurrence. A batch may be appended twice after a restart.
pub async fn read_manifest(path: &Path) -> io::Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path).await?;
    let mut seen = HashSet::new();

    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && seen.insert(*line))
        .map(String::from)
        .collect())
}

/// Removes intermediate files once the recording has been assembled.
#[async_trait]
pub trait Cleanup: Send + Sync {
    async fn cleanup(&self, manifest: &Path, dir: &Path) -> io::Result<()>;
}

/// Deletes every segment listed in the manifest, then the manifest itself.
pub struct SegmentCleaner;

#[async_trait]
impl Cleanup for SegmentCleaner {
    async fn cleanup(&self, manifest: &Path, dir: &Path) -> io::Result<()> {
        let names = read_manifest(manifest).await?;
        let mut removed = 0;

        for name in &names {
            match tokio::fs::remove_file(dir.join(name)).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => (),
                Err(e) => return Err(e),
            }
        }

        tokio::fs::remove_file(manifest).await?;
        info!("Removed {} segment files and {}", removed, manifest.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn batches_are_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("filelist.txt"));

        ledger
            .append(&names(&["seg_100000.ts", "seg_100002.ts"]))
            .await
            .unwrap();
        ledger.append(&[]).await.unwrap();
        ledger.append(&names(&["seg_100004.ts"])).await.unwrap();

        let text = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(text, "seg_100000.ts\nseg_100002.ts\nseg_100004.ts\n");
    }

    #[tokio::test]
    async fn read_manifest_drops_replayed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("filelist.txt"));

        let batch = names(&["seg_100000.ts", "seg_100002.ts"]);
        ledger.append(&batch).await.unwrap();
        ledger.append(&batch).await.unwrap();
        ledger.append(&names(&["seg_100004.ts"])).await.unwrap();

        assert_eq!(
            read_manifest(ledger.path()).await.unwrap(),
            names(&["seg_100000.ts", "seg_100002.ts", "seg_100004.ts"])
        );
    }

    #[tokio::test]
    async fn cleaner_removes_listed_segments_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("filelist.txt"));
        std::fs::write(dir.path().join("a.ts"), b"a").unwrap();
        std::fs::write(dir.path().join("output.mp4"), b"out").unwrap();
        ledger
            .append(&names(&["a.ts", "missing.ts"]))
            .await
            .unwrap();

        SegmentCleaner
            .cleanup(ledger.path(), dir.path())
            .await
            .unwrap();

        assert!(!dir.path().join("a.ts").exists());
        assert!(!ledger.path().exists());
        assert!(dir.path().join("output.mp4").exists());
    }
}

//! Scripted collaborators shared by the unit tests.

use std::{
    collections::{HashMap, VecDeque},
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::{
    downloader::{Fetcher, ProgressObserver},
    ffmpeg::{Assembler, AssemblyError},
    hls::{PlaylistEntry, PlaylistSnapshot, PlaylistSource, PollError},
    ledger::{read_manifest, Cleanup},
    util::FetchError,
};

pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, h, m, s).unwrap()
}

/// Entries dated at the given times, served from `http://cdn.test/HHMMSS.ts`.
pub fn snapshot(times: &[(u32, u32, u32)], ended: bool) -> PlaylistSnapshot {
    PlaylistSnapshot {
        entries: times
            .iter()
            .map(|&(h, m, s)| PlaylistEntry {
                uri: format!("http://cdn.test/{h:02}{m:02}{s:02}.ts"),
                publish_time: at(h, m, s),
            })
            .collect(),
        ended,
    }
}

#[derive(Default)]
pub struct FakeFetcher {
    delays: HashMap<String, Duration>,
    failures: HashMap<String, usize>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    /// Fails the first `count` requests for `url`.
    pub fn fail_first(mut self, url: &str, count: usize) -> Self {
        self.failures.insert(url.to_string(), count);
        self
    }

    pub fn body_for(url: &str) -> Vec<u8> {
        format!("body of {url}").into_bytes()
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if call <= self.failures.get(url).copied().unwrap_or(0) {
            return Err(FetchError::EmptyBody(url.to_string()));
        }
        Ok(Self::body_for(url))
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    completed: Mutex<Vec<PathBuf>>,
}

impl RecordingObserver {
    pub fn completed(&self) -> Vec<PathBuf> {
        self.completed.lock().unwrap().clone()
    }
}

impl ProgressObserver for RecordingObserver {
    fn segment_completed(&self, path: &Path, _bytes: usize) {
        self.completed.lock().unwrap().push(path.to_path_buf());
    }
}

/// Serves queued poll results, then `fallback` forever.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<PlaylistSnapshot, PollError>>>,
    fallback: PlaylistSnapshot,
    polls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<PlaylistSnapshot, PollError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: PlaylistSnapshot {
                entries: Vec::new(),
                ended: true,
            },
            polls: AtomicUsize::new(0),
        }
    }

    pub fn repeating(snapshot: PlaylistSnapshot) -> Self {
        Self {
            fallback: snapshot,
            ..Self::new(Vec::new())
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaylistSource for ScriptedSource {
    async fn poll(&self) -> Result<PlaylistSnapshot, PollError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// Captures the manifest contents seen at each assembly.
#[derive(Default)]
pub struct RecordingAssembler {
    calls: Mutex<Vec<Vec<String>>>,
    fail: bool,
}

impl RecordingAssembler {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Assembler for RecordingAssembler {
    async fn assemble(&self, manifest: &Path, dir: &Path) -> Result<PathBuf, AssemblyError> {
        let names = match read_manifest(manifest).await {
            Ok(names) => names,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        self.calls.lock().unwrap().push(names);

        if self.fail {
            return Err(AssemblyError::EmptyManifest(manifest.to_path_buf()));
        }
        Ok(dir.join("output.mp4"))
    }
}

#[derive(Default)]
pub struct RecordingCleanup {
    calls: AtomicUsize,
}

impl RecordingCleanup {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Cleanup for RecordingCleanup {
    async fn cleanup(&self, _manifest: &Path, _dir: &Path) -> io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

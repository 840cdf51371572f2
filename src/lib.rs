//! # hls-recorder
//!
//! This crate records a live HLS stream to local storage. It polls the media
//! playlist, downloads every newly published segment with bounded
//! concurrency and retries, and keeps an ordered manifest of the recorded
//! files that is concatenated into a single output once the recording stops.
//!
//! ## Usage
//!
//! The `worker` module ties the pieces together. The playlist source, the
//! segment fetcher, the assembler and the cleanup step are all traits, so
//! each of them can be swapped out.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hls_recorder::{
//!     downloader::{Downloader, DownloaderConfig},
//!     ffmpeg::FfmpegAssembler,
//!     hls::HlsPlaylistSource,
//!     util::{FetchClient, FetchConfig, HttpClient},
//!     worker::{Recorder, RecorderConfig},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = FetchConfig::default();
//!
//!     // Playlist polls go through a session with transient-error retries
//!     let playlist = HttpClient::new(&config).unwrap();
//!     let source = HlsPlaylistSource::new(playlist, "https://example.com/live.m3u8").unwrap();
//!
//!     // Segments are fetched once per attempt, the downloader retries
//!     let fetcher = FetchClient::new(&config).unwrap();
//!     let downloader = Downloader::new(Arc::new(fetcher), DownloaderConfig::default());
//!
//!     let recorder = Recorder::new(Arc::new(source), downloader, "recording", RecorderConfig::default())
//!         .await
//!         .unwrap()
//!         .with_assembler(Arc::new(FfmpegAssembler::new("ffmpeg", "output.mp4")));
//!
//!     let token = CancellationToken::new();
//!     let summary = recorder.run(token).await;
//!     println!("Recorded {} segments", summary.segments_recorded);
//! }
//! ```

#![forbid(unsafe_code)]
#[macro_use]
extern crate log;

pub mod config;
pub mod downloader;
pub mod ffmpeg;
pub mod hls;
pub mod ledger;
pub mod stats;
pub mod util;
pub mod worker;

#[cfg(test)]
mod testing;

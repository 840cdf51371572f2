#[macro_use]
extern crate log;

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use hls_recorder::{
    config::Config,
    downloader::Downloader,
    ffmpeg::FfmpegAssembler,
    hls::HlsPlaylistSource,
    ledger::SegmentCleaner,
    stats::DownloadStatistics,
    util::{FetchClient, HttpClient},
    worker::Recorder,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(version, about = "Record a live HLS stream to disk")]
struct Args {
    /// Playlist URL of the stream (master or media playlist)
    url: String,

    /// Configuration file
    #[arg(short, long, default_value = "recorder.toml")]
    config: PathBuf,

    /// Directory that receives the recordings, overrides the config file
    #[arg(long)]
    storage_path: Option<PathBuf>,

    /// Proxy for every request, overrides the config file
    #[arg(long)]
    proxy: Option<String>,
}

/// Last path segment of the URL without its extension, e.g. `channel` for
/// `https://host/hls/channel.m3u8`.
fn stream_name(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.trim_end_matches('/').rsplit('/').next())
        .map(|last| last.split('.').next().unwrap_or(last))
        .filter(|name| !name.is_empty())
        .unwrap_or("stream")
        .to_string()
}

async fn record(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(&args.config)?;
    if args.proxy.is_some() {
        config.http.proxy = args.proxy;
    }
    if args.storage_path.is_some() {
        config.recorder.storage_path = args.storage_path;
    }

    let base = match config.recorder.storage_path.clone() {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let dir = base
        .join(stream_name(&args.url))
        .join(chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string());

    let fetch_config = config.fetch_config();
    let source = HlsPlaylistSource::new(HttpClient::new(&fetch_config)?, &args.url)?;
    let stats = Arc::new(DownloadStatistics::for_terminal());
    let downloader = Downloader::new(
        Arc::new(FetchClient::new(&fetch_config)?),
        config.downloader_config(),
    )
    .with_observer(stats.clone());

    let mut recorder = Recorder::new(
        Arc::new(source),
        downloader,
        dir,
        config.recorder_config(),
    )
    .await?;
    if config.output.concat {
        recorder = recorder.with_assembler(Arc::new(FfmpegAssembler::new(
            config.output.ffmpeg.clone(),
            config.output.file_name.clone(),
        )));
        if config.output.clean_cache {
            recorder = recorder.with_cleanup(Arc::new(SegmentCleaner));
        }
    }

    let token = CancellationToken::new();
    let stop = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stopping after the current batch");
            stop.cancel();
        }
    });

    println!("Recording {} (Ctrl-C to stop)", args.url);
    let summary = recorder.run(token).await;
    println!();
    println!(
        "Done: {} segments ({} failed), manifest {}",
        summary.segments_recorded,
        summary.segments_failed,
        summary.manifest.display()
    );
    if let Some(output) = summary.output {
        println!("Output written to {}", output.display());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match record(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

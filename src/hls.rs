use async_trait::async_trait;
use chrono::{format::Item, format::StrftimeItems, DateTime, TimeDelta, Utc};
use m3u8_rs::{MediaPlaylist, Playlist};
use tokio::sync::Mutex;
use url::Url;

use crate::util::{FetchError, HttpClient};

#[derive(thiserror::Error, Debug)]
pub enum PollError {
    #[error("playlist request failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("could not parse playlist: {0}")]
    Parse(String),
    #[error("master playlist has no variants")]
    NoVariants,
}

/// One `(uri, publish_time)` pair as listed by the playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub uri: String,
    pub publish_time: DateTime<Utc>,
}

/// Result of one playlist poll, entries in playlist order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistSnapshot {
    pub entries: Vec<PlaylistEntry>,
    /// Upstream has finished publishing; no further segments will appear.
    pub ended: bool,
}

#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn poll(&self) -> Result<PlaylistSnapshot, PollError>;
}

/// A newly discovered playlist entry with its on-disk name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub uri: String,
    pub publish_time: DateTime<Utc>,
    pub local_name: String,
}

impl Segment {
    /// `name_format` is a strftime pattern applied to the publish time; it
    /// must have been checked with [`is_valid_name_format`].
    pub fn new(entry: PlaylistEntry, name_format: &str) -> Self {
        let local_name = entry.publish_time.format(name_format).to_string();
        Self {
            uri: entry.uri,
            publish_time: entry.publish_time,
            local_name,
        }
    }
}

pub fn is_valid_name_format(name_format: &str) -> bool {
    !name_format.is_empty() && StrftimeItems::new(name_format).all(|item| item != Item::Error)
}

fn parse(body: &[u8]) -> Result<Playlist, PollError> {
    m3u8_rs::parse_playlist_res(body).map_err(|e| PollError::Parse(e.to_string()))
}

/// Collects the entries of a media playlist. Segments without their own
/// `EXT-X-PROGRAM-DATE-TIME` are dated from the previous segment's date
/// plus its duration; segments before the first date are skipped.
pub fn snapshot_from(playlist: &MediaPlaylist, base: &Url) -> Result<PlaylistSnapshot, PollError> {
    let mut entries = Vec::with_capacity(playlist.segments.len());
    let mut implied_time: Option<DateTime<Utc>> = None;

    for segment in &playlist.segments {
        let publish_time = match (segment.program_date_time, implied_time) {
            (Some(pdt), _) => pdt.with_timezone(&Utc),
            (None, Some(time)) => time,
            (None, None) => {
                debug!("Skipping undated segment {}", segment.uri);
                continue;
            }
        };

        let duration = f64::from(segment.duration);
        if !duration.is_finite() || duration < 0.0 {
            return Err(PollError::Parse(format!(
                "invalid duration {} for {}",
                segment.duration, segment.uri
            )));
        }
        implied_time = TimeDelta::try_milliseconds((duration * 1000.0).round() as i64)
            .and_then(|step| publish_time.checked_add_signed(step))
            .map(Some)
            .ok_or_else(|| {
                PollError::Parse(format!(
                    "duration {} of {} is out of range",
                    segment.duration, segment.uri
                ))
            })?;

        entries.push(PlaylistEntry {
            uri: base.join(&segment.uri)?.to_string(),
            publish_time,
        });
    }

    Ok(PlaylistSnapshot {
        entries,
        ended: playlist.end_list,
    })
}

pub fn parse_media_playlist(body: &[u8], base: &Url) -> Result<PlaylistSnapshot, PollError> {
    match parse(body)? {
        Playlist::MediaPlaylist(playlist) => snapshot_from(&playlist, base),
        Playlist::MasterPlaylist(_) => Err(PollError::Parse(
            "expected a media playlist, found a master playlist".to_string(),
        )),
    }
}

/// Polls a live HLS media playlist over HTTP.
///
/// If the configured URL points at a master playlist, its first variant is
/// followed once and polled from then on.
pub struct HlsPlaylistSource {
    client: HttpClient,
    url: Url,
    media_url: Mutex<Option<Url>>,
}

impl HlsPlaylistSource {
    pub fn new(client: HttpClient, url: &str) -> Result<Self, PollError> {
        Ok(Self {
            client,
            url: Url::parse(url)?,
            media_url: Mutex::new(None),
        })
    }

    async fn fetch(&self, url: &Url) -> Result<String, PollError> {
        Ok(self.client.fetch_text(url.as_str()).await?)
    }
}

#[async_trait]
impl PlaylistSource for HlsPlaylistSource {
    async fn poll(&self) -> Result<PlaylistSnapshot, PollError> {
        let mut media_url = self.media_url.lock().await;

        if let Some(url) = media_url.as_ref() {
            let body = self.fetch(url).await?;
            return parse_media_playlist(body.as_bytes(), url);
        }

        let body = self.fetch(&self.url).await?;
        match parse(body.as_bytes())? {
            Playlist::MediaPlaylist(playlist) => {
                let snapshot = snapshot_from(&playlist, &self.url)?;
                *media_url = Some(self.url.clone());
                Ok(snapshot)
            }
            Playlist::MasterPlaylist(master) => {
                let variant = master.variants.first().ok_or(PollError::NoVariants)?;
                let url = self.url.join(&variant.uri)?;
                info!("Following variant playlist {}", url);

                let body = self.fetch(&url).await?;
                let snapshot = parse_media_playlist(body.as_bytes(), &url)?;
                *media_url = Some(url);
                Ok(snapshot)
            }
        }
    }
}

use crate::config;
use crate::model::{AlbumId, Track, TrackId};
use anyhow::Result;
use lofty::prelude::{Accessor, AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::UNIX_EPOCH;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use symphonia::default::get_probe;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "aac", "opus"];
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// One row of the media index; every column may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRow {
    pub id: Option<TrackId>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_id: Option<AlbumId>,
    pub album_name: Option<String>,
    pub duration_ms: Option<u64>,
    pub path: Option<PathBuf>,
    pub date_added: Option<i64>,
}

/// A queryable index of music files.
pub trait MediaIndex {
    fn query_music(&self) -> Result<Vec<IndexRow>>;
}

/// Reads the index once. Query failures yield an empty library.
pub fn read_tracks(index: &dyn MediaIndex) -> Vec<Track> {
    let rows = match index.query_music() {
        Ok(rows) => rows,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "media index query failed");
            return Vec::new();
        }
    };

    let total = rows.len();
    let tracks: Vec<Track> = rows.into_iter().filter_map(track_from_row).collect();
    if tracks.len() != total {
        debug!(
            skipped = total - tracks.len(),
            "dropped index rows without id or path"
        );
    }
    tracks
}

fn track_from_row(row: IndexRow) -> Option<Track> {
    let id = row.id?;
    let path = row.path?;
    let title = row
        .title
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| file_stem(&path));
    let artist = row
        .artist
        .filter(|artist| !artist.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let album_name = resolve_album_name(row.album_name.as_deref(), &path);

    Some(Track {
        id,
        title,
        artist,
        album_id: row.album_id.unwrap_or_default(),
        album_name,
        duration_ms: row.duration_ms.unwrap_or(0),
        path,
        date_added: row.date_added.unwrap_or(0),
    })
}

/// Falls back to the parent directory for placeholder album names.
pub fn resolve_album_name(raw: Option<&str>, path: &Path) -> String {
    let raw = raw.map(str::trim).unwrap_or_default();
    let placeholder = raw.is_empty()
        || ["Unknown Album", "<unknown>", "Music"]
            .iter()
            .any(|name| raw.eq_ignore_ascii_case(name));
    if !placeholder {
        return raw.to_string();
    }

    let parent = path
        .parent()
        .and_then(Path::file_name)
        .and_then(OsStr::to_str)
        .map(str::trim)
        .unwrap_or_default();
    let generic = parent.is_empty()
        || ["Music", "Download", "Downloads"]
            .iter()
            .any(|name| parent.eq_ignore_ascii_case(name));
    if generic {
        UNKNOWN_ALBUM.to_string()
    } else {
        parent.to_string()
    }
}

/// Runs the index query on a worker thread and delivers one snapshot.
pub fn spawn_scan<I>(index: I) -> Receiver<Vec<Track>>
where
    I: MediaIndex + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(String::from("artic-scan"))
        .spawn(move || {
            let tracks = read_tracks(&index);
            info!(count = tracks.len(), "library scan finished");
            let _ = tx.send(tracks);
        });
    if let Err(err) = spawned {
        warn!(error = %err, "failed to start library scan");
    }
    rx
}

/// Media index backed by audio files under a set of folders.
#[derive(Debug, Clone, Default)]
pub struct FolderIndex {
    roots: Vec<PathBuf>,
}

impl FolderIndex {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

impl MediaIndex for FolderIndex {
    fn query_music(&self) -> Result<Vec<IndexRow>> {
        let mut rows = Vec::new();
        for root in &self.roots {
            if !root.is_dir() {
                warn!(root = %root.display(), "library folder is not a directory");
                continue;
            }
            rows.extend(scan_folder(root));
        }
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        rows.dedup_by(|a, b| a.path == b.path);
        Ok(rows)
    }
}

#[derive(Default)]
struct TrackMetadata {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    duration_ms: Option<u64>,
}

fn scan_folder(root: &Path) -> Vec<IndexRow> {
    let mut rows = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_audio(path) {
            continue;
        }

        let normalized = config::normalize_path(path);
        let metadata = metadata_for(&normalized);
        let album_id = metadata.album.as_deref().map(|album| {
            let parent = normalized.parent().unwrap_or(Path::new(""));
            stable_id(&format!("{album}\u{1f}{}", parent.display()))
        });

        rows.push(IndexRow {
            id: Some(stable_id(&normalized.to_string_lossy())),
            title: metadata.title,
            artist: metadata.artist,
            album_id: album_id.or_else(|| {
                normalized
                    .parent()
                    .map(|parent| stable_id(&parent.to_string_lossy()))
            }),
            album_name: metadata.album,
            duration_ms: metadata.duration_ms,
            date_added: modified_epoch_seconds(&normalized),
            path: Some(normalized),
        });
    }

    rows
}

/// Positive 63-bit id from the SHA-256 of `key`.
fn stable_id(key: &str) -> i64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) >> 1) as i64
}

fn modified_epoch_seconds(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|duration| duration.as_secs() as i64)
}

fn metadata_for(path: &Path) -> TrackMetadata {
    let mut metadata = symphonia_metadata(path);
    if metadata.title.is_some() && metadata.artist.is_some() && metadata.album.is_some() {
        return metadata;
    }

    let fallback = lofty_metadata(path);
    metadata.title = metadata.title.or(fallback.title);
    metadata.artist = metadata.artist.or(fallback.artist);
    metadata.album = metadata.album.or(fallback.album);
    metadata.duration_ms = metadata.duration_ms.or(fallback.duration_ms);
    metadata
}

fn symphonia_metadata(path: &Path) -> TrackMetadata {
    let Ok(file) = File::open(path) else {
        return TrackMetadata::default();
    };
    let source = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(OsStr::to_str) {
        hint.with_extension(extension);
    }

    let Ok(mut probed) = get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) else {
        return TrackMetadata::default();
    };

    let duration_ms = probed
        .format
        .default_track()
        .and_then(|track| codec_duration_ms(&track.codec_params));

    let metadata = probed.format.metadata();
    let Some(revision) = metadata.current() else {
        return TrackMetadata {
            duration_ms,
            ..TrackMetadata::default()
        };
    };

    let tags = revision.tags();
    TrackMetadata {
        title: tag_value(tags, StandardTagKey::TrackTitle, &["title"]),
        artist: tag_value(
            tags,
            StandardTagKey::Artist,
            &["artist", "albumartist", "album_artist"],
        ),
        album: tag_value(tags, StandardTagKey::Album, &["album"]),
        duration_ms,
    }
}

fn lofty_metadata(path: &Path) -> TrackMetadata {
    let Ok(tagged) = Probe::open(path).and_then(|probe| probe.read()) else {
        return TrackMetadata::default();
    };

    let duration_ms = u64::try_from(tagged.properties().duration().as_millis())
        .ok()
        .filter(|ms| *ms > 0);
    let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
        return TrackMetadata {
            duration_ms,
            ..TrackMetadata::default()
        };
    };

    TrackMetadata {
        title: tag.title().and_then(|value| clean_metadata_value(&value)),
        artist: tag.artist().and_then(|value| clean_metadata_value(&value)),
        album: tag.album().and_then(|value| clean_metadata_value(&value)),
        duration_ms,
    }
}

fn codec_duration_ms(codec_params: &symphonia::core::codecs::CodecParameters) -> Option<u64> {
    if let (Some(time_base), Some(frame_count)) = (codec_params.time_base, codec_params.n_frames) {
        let time = time_base.calc_time(frame_count);
        let millis = time.seconds.saturating_mul(1_000) + (time.frac * 1_000.0).round() as u64;
        return Some(millis);
    }

    codec_params
        .n_frames
        .zip(codec_params.sample_rate)
        .filter(|(_, sample_rate)| *sample_rate > 0)
        .map(|(frame_count, sample_rate)| {
            ((frame_count as f64) * 1_000.0 / (sample_rate as f64)).round() as u64
        })
}

fn tag_value(
    tags: &[symphonia::core::meta::Tag],
    standard_key: StandardTagKey,
    fallback_keys: &[&str],
) -> Option<String> {
    let from_standard = tags
        .iter()
        .find(|tag| tag.std_key == Some(standard_key))
        .map(|tag| tag.value.to_string());

    let from_fallback = || {
        tags.iter()
            .find(|tag| {
                fallback_keys
                    .iter()
                    .any(|key| tag.key.eq_ignore_ascii_case(key))
            })
            .map(|tag| tag.value.to_string())
    };

    from_standard
        .or_else(from_fallback)
        .and_then(|value| clean_metadata_value(&value))
}

fn clean_metadata_value(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("unknown")
        .to_string()
}

fn is_audio(path: &Path) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    AUDIO_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}

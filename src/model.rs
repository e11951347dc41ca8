use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub type TrackId = i64;
pub type AlbumId = i64;

const ALBUM_ART_ROOT: &str = "content://media/external/audio/albumart";

pub fn album_art_locator(album_id: AlbumId) -> String {
    format!("{ALBUM_ART_ROOT}/{album_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    pub album_id: AlbumId,
    pub album_name: String,
    pub duration_ms: u64,
    pub path: PathBuf,
    /// Seconds since the Unix epoch.
    pub date_added: i64,
}

impl Track {
    pub fn art_locator(&self) -> String {
        album_art_locator(self.album_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub id: AlbumId,
    pub title: String,
    pub artist: String,
    pub art: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artist {
    pub name: String,
    pub track_count: usize,
    pub art: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub track_ids: Vec<TrackId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TrackSort {
    #[default]
    Name,
    Artist,
    DateAdded,
}

impl TrackSort {
    pub fn next(self) -> Self {
        match self {
            Self::Name => Self::Artist,
            Self::Artist => Self::DateAdded,
            Self::DateAdded => Self::Name,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::Artist => "Artist",
            Self::DateAdded => "Date Added",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub library_roots: Vec<PathBuf>,
    #[serde(default = "default_playback_speed")]
    pub playback_speed: f32,
    #[serde(default)]
    pub sort: TrackSort,
}

fn default_playback_speed() -> f32 {
    1.0
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            library_roots: Vec::new(),
            playback_speed: default_playback_speed(),
            sort: TrackSort::default(),
        }
    }
}

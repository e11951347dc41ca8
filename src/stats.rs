use crate::config;
use crate::model::{AlbumId, Playlist, Track, TrackId};
use anyhow::{Context, Result};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;
use tracing::warn;

pub const RECENT_CAPACITY: usize = 1000;
const PLAYLIST_ID_LEN: usize = 16;

/// Whole days since 1970-01-01 on the local calendar.
pub type DayIndex = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct StreakState {
    pub current: u32,
    pub last_play_day: Option<DayIndex>,
    pub best: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsStore {
    artist_plays: HashMap<String, u64>,
    track_plays: HashMap<TrackId, u64>,
    recent: VecDeque<TrackId>,
    streak: StreakState,
    total_listen_ms: u64,
    playlists: Vec<Playlist>,
    album_renames: BTreeMap<AlbumId, String>,
    auto_suggest: bool,
}

impl Default for StatsStore {
    fn default() -> Self {
        Self {
            artist_plays: HashMap::new(),
            track_plays: HashMap::new(),
            recent: VecDeque::new(),
            streak: StreakState::default(),
            total_listen_ms: 0,
            playlists: Vec::new(),
            album_renames: BTreeMap::new(),
            auto_suggest: true,
        }
    }
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

pub fn today_index() -> DayIndex {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    day_index_of(now)
}

pub fn day_index_of(moment: OffsetDateTime) -> DayIndex {
    let epoch = OffsetDateTime::UNIX_EPOCH.date().to_julian_day();
    i64::from(moment.date().to_julian_day() - epoch)
}

pub fn load_stats_from_path(path: &Path) -> Result<StatsStore> {
    if !path.exists() {
        return Ok(StatsStore::default());
    }

    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    match serde_json::from_str(&raw) {
        Ok(store) => Ok(store),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "stats file is malformed, starting fresh");
            config::quarantine_file(path);
            Ok(StatsStore::default())
        }
    }
}

pub fn save_stats_to_path(path: &Path, store: &StatsStore) -> Result<()> {
    let json = serde_json::to_string_pretty(store)?;
    config::write_atomically(path, json.as_bytes())
}

impl StatsStore {
    pub fn record_play(&mut self, track: &Track, today: DayIndex) {
        let artist = self.artist_plays.entry(track.artist.clone()).or_default();
        *artist = artist.saturating_add(1);
        let plays = self.track_plays.entry(track.id).or_default();
        *plays = plays.saturating_add(1);

        self.recent.push_front(track.id);
        self.recent.truncate(RECENT_CAPACITY);

        self.advance_streak(today);
        self.update_best_streak();
    }

    fn advance_streak(&mut self, today: DayIndex) {
        match self.streak.last_play_day {
            Some(last) if last == today => {}
            Some(last) if last.checked_add(1) == Some(today) => {
                self.streak.current = self.streak.current.saturating_add(1);
            }
            _ => self.streak.current = 1,
        }
        self.streak.last_play_day = Some(today);
    }

    pub fn add_listening_time(&mut self, delta_ms: u64) {
        self.total_listen_ms = self.total_listen_ms.saturating_add(delta_ms);
    }

    pub fn total_listening_ms(&self) -> u64 {
        self.total_listen_ms
    }

    pub fn current_streak(&self) -> u32 {
        self.streak.current
    }

    pub fn best_streak(&self) -> u32 {
        self.streak.best
    }

    pub fn streak(&self) -> StreakState {
        self.streak
    }

    pub fn update_best_streak(&mut self) {
        self.streak.best = self.streak.best.max(self.streak.current);
    }

    pub fn top_artist(&self) -> Option<(String, u64)> {
        self.artist_stats().into_iter().next()
    }

    /// Artists by play count, most played first.
    pub fn artist_stats(&self) -> Vec<(String, u64)> {
        let mut rows: Vec<(String, u64)> = self
            .artist_plays
            .iter()
            .map(|(name, count)| (name.clone(), *count))
            .collect();
        rows.sort_by(|a, b| compare_counts(a.1, b.1).then_with(|| a.0.cmp(&b.0)));
        rows
    }

    pub fn top_track_ids(&self) -> Vec<(TrackId, u64)> {
        let mut rows: Vec<(TrackId, u64)> = self
            .track_plays
            .iter()
            .map(|(id, count)| (*id, *count))
            .collect();
        rows.sort_by(|a, b| compare_counts(a.1, b.1).then(a.0.cmp(&b.0)));
        rows
    }

    pub fn track_plays(&self, id: TrackId) -> u64 {
        self.track_plays.get(&id).copied().unwrap_or(0)
    }

    pub fn artist_plays(&self, artist: &str) -> u64 {
        self.artist_plays.get(artist).copied().unwrap_or(0)
    }

    pub fn recent_ids(&self) -> Vec<TrackId> {
        self.recent.iter().copied().collect()
    }

    /// Recent plays resolved against `library`; ids no longer present are skipped.
    pub fn history(&self, library: &[Track]) -> Vec<Track> {
        let by_id: HashMap<TrackId, &Track> =
            library.iter().map(|track| (track.id, track)).collect();
        self.recent
            .iter()
            .filter_map(|id| by_id.get(id).map(|track| (*track).clone()))
            .collect()
    }

    pub fn unique_tracks_played(&self) -> usize {
        self.track_plays.len()
    }

    pub fn unique_artists(&self) -> usize {
        self.artist_plays.len()
    }

    pub fn total_plays(&self) -> u64 {
        self.track_plays
            .values()
            .fold(0_u64, |sum, count| sum.saturating_add(*count))
    }

    pub fn clear_history(&mut self) {
        self.artist_plays.clear();
        self.track_plays.clear();
        self.recent.clear();
        self.streak = StreakState::default();
        self.total_listen_ms = 0;
    }

    pub fn create_playlist(&mut self, name: &str) -> String {
        let mut id = generate_playlist_id();
        while self.playlist(&id).is_some() {
            id = generate_playlist_id();
        }
        self.playlists.push(Playlist {
            id: id.clone(),
            name: name.to_string(),
            track_ids: Vec::new(),
        });
        id
    }

    pub fn playlists(&self) -> &[Playlist] {
        &self.playlists
    }

    pub fn playlist(&self, id: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|playlist| playlist.id == id)
    }

    fn playlist_mut(&mut self, id: &str) -> Option<&mut Playlist> {
        self.playlists.iter_mut().find(|playlist| playlist.id == id)
    }

    pub fn rename_playlist(&mut self, id: &str, name: &str) -> bool {
        let Some(playlist) = self.playlist_mut(id) else {
            return false;
        };
        playlist.name = name.to_string();
        true
    }

    pub fn delete_playlist(&mut self, id: &str) -> bool {
        let before = self.playlists.len();
        self.playlists.retain(|playlist| playlist.id != id);
        self.playlists.len() != before
    }

    /// Returns `true` when the track was appended.
    pub fn add_to_playlist(&mut self, id: &str, track_id: TrackId) -> bool {
        let Some(playlist) = self.playlist_mut(id) else {
            return false;
        };
        if playlist.track_ids.contains(&track_id) {
            return false;
        }
        playlist.track_ids.push(track_id);
        true
    }

    pub fn remove_from_playlist(&mut self, id: &str, track_id: TrackId) -> bool {
        let Some(playlist) = self.playlist_mut(id) else {
            return false;
        };
        let before = playlist.track_ids.len();
        playlist.track_ids.retain(|existing| *existing != track_id);
        playlist.track_ids.len() != before
    }

    pub fn playlist_tracks(&self, id: &str, library: &[Track]) -> Vec<Track> {
        self.playlist(id)
            .map(|playlist| crate::catalog::resolve_ids(library, &playlist.track_ids))
            .unwrap_or_default()
    }

    pub fn set_album_rename(&mut self, album_id: AlbumId, name: &str) {
        self.album_renames.insert(album_id, name.to_string());
    }

    pub fn album_rename(&self, album_id: AlbumId) -> Option<&str> {
        self.album_renames.get(&album_id).map(String::as_str)
    }

    pub fn album_renames(&self) -> &BTreeMap<AlbumId, String> {
        &self.album_renames
    }

    pub fn set_auto_suggest(&mut self, enabled: bool) {
        self.auto_suggest = enabled;
    }

    pub fn auto_suggest_enabled(&self) -> bool {
        self.auto_suggest
    }
}

fn compare_counts(a: u64, b: u64) -> Ordering {
    b.cmp(&a)
}

fn generate_playlist_id() -> String {
    const CHARS: &[u8] = b"0123456789abcdef";
    let mut rng = rand::rng();
    let mut out = String::with_capacity(PLAYLIST_ID_LEN);
    for _ in 0..PLAYLIST_ID_LEN {
        let idx = rng.random_range(0..CHARS.len());
        out.push(char::from(CHARS[idx]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;
    use time::macros::datetime;

    fn track(id: TrackId, artist: &str) -> Track {
        Track {
            id,
            title: format!("song {id}"),
            artist: artist.to_string(),
            album_id: 1,
            album_name: String::from("Album"),
            duration_ms: 180_000,
            path: PathBuf::from(format!("/music/{id}.mp3")),
            date_added: 0,
        }
    }

    #[test]
    fn same_day_plays_count_but_keep_streak() {
        let mut store = StatsStore::default();
        let song = track(7, "Neon");
        store.record_play(&song, 100);
        store.record_play(&song, 100);

        assert_eq!(store.track_plays(7), 2);
        assert_eq!(store.artist_plays("Neon"), 2);
        assert_eq!(store.current_streak(), 1);
        assert_eq!(store.total_plays(), 2);
    }

    #[test]
    fn consecutive_days_extend_streak_and_gaps_reset_it() {
        let mut store = StatsStore::default();
        let song = track(1, "Neon");
        store.record_play(&song, 100);
        store.record_play(&song, 101);
        assert_eq!(store.current_streak(), 2);
        store.record_play(&song, 102);
        assert_eq!(store.current_streak(), 3);

        store.record_play(&song, 110);
        assert_eq!(store.current_streak(), 1);
        assert_eq!(store.best_streak(), 3);
        assert_eq!(store.streak().last_play_day, Some(110));
    }

    #[test]
    fn first_play_starts_streak_at_one() {
        let mut store = StatsStore::default();
        store.record_play(&track(1, "A"), 1);
        assert_eq!(store.current_streak(), 1);
    }

    #[test]
    fn recent_history_is_bounded_and_newest_first() {
        let mut store = StatsStore::default();
        for id in 0..(RECENT_CAPACITY as TrackId + 25) {
            store.record_play(&track(id, "A"), 5);
        }

        let recent = store.recent_ids();
        assert_eq!(recent.len(), RECENT_CAPACITY);
        assert_eq!(recent[0], RECENT_CAPACITY as TrackId + 24);
        assert_eq!(*recent.last().expect("oldest"), 25);
    }

    #[test]
    fn repeated_plays_are_not_deduplicated_in_history() {
        let mut store = StatsStore::default();
        store.record_play(&track(1, "A"), 5);
        store.record_play(&track(2, "A"), 5);
        store.record_play(&track(1, "A"), 5);
        assert_eq!(store.recent_ids(), vec![1, 2, 1]);
    }

    #[test]
    fn artist_and_track_rankings_sort_by_count() {
        let mut store = StatsStore::default();
        store.record_play(&track(1, "Blue"), 1);
        store.record_play(&track(2, "Neon"), 1);
        store.record_play(&track(2, "Neon"), 1);
        store.record_play(&track(3, "Neon"), 1);

        assert_eq!(store.top_artist(), Some((String::from("Neon"), 3)));
        assert_eq!(
            store.artist_stats(),
            vec![(String::from("Neon"), 3), (String::from("Blue"), 1)]
        );
        assert_eq!(store.top_track_ids(), vec![(2, 2), (1, 1), (3, 1)]);
        assert_eq!(store.unique_tracks_played(), 3);
        assert_eq!(store.unique_artists(), 2);
    }

    #[test]
    fn empty_store_reads_defaults() {
        let store = StatsStore::default();
        assert_eq!(store.top_artist(), None);
        assert_eq!(store.total_listening_ms(), 0);
        assert_eq!(store.current_streak(), 0);
        assert_eq!(store.best_streak(), 0);
        assert!(store.recent_ids().is_empty());
        assert!(store.auto_suggest_enabled());
        assert_eq!(store.album_rename(3), None);
    }

    #[test]
    fn history_skips_ids_missing_from_library() {
        let mut store = StatsStore::default();
        store.record_play(&track(1, "A"), 1);
        store.record_play(&track(2, "A"), 1);

        let history = store.history(&[track(1, "A")]);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, 1);
    }

    #[test]
    fn playlist_insert_skips_duplicates() {
        let mut store = StatsStore::default();
        let id = store.create_playlist("mix");
        assert!(store.add_to_playlist(&id, 5));
        assert!(!store.add_to_playlist(&id, 5));

        let playlist = store.playlist(&id).expect("playlist");
        assert_eq!(playlist.track_ids, vec![5]);
    }

    #[test]
    fn playlist_crud() {
        let mut store = StatsStore::default();
        let first = store.create_playlist("one");
        let second = store.create_playlist("two");
        assert_ne!(first, second);

        assert!(store.rename_playlist(&first, "uno"));
        assert_eq!(store.playlist(&first).expect("playlist").name, "uno");

        store.add_to_playlist(&first, 1);
        store.add_to_playlist(&first, 2);
        assert!(store.remove_from_playlist(&first, 1));
        assert!(!store.remove_from_playlist(&first, 1));
        assert_eq!(store.playlist(&first).expect("playlist").track_ids, vec![2]);

        assert!(store.delete_playlist(&second));
        assert!(!store.delete_playlist(&second));
        assert_eq!(store.playlists().len(), 1);
        assert!(!store.add_to_playlist("missing", 1));
    }

    #[test]
    fn album_renames_are_stored_by_id() {
        let mut store = StatsStore::default();
        store.set_album_rename(9, "Road Trip");
        store.set_album_rename(9, "Road Trip II");
        store.set_album_rename(3, "Demos");

        assert_eq!(store.album_rename(9), Some("Road Trip II"));
        assert_eq!(store.album_renames().len(), 2);
    }

    #[test]
    fn clear_history_keeps_playlists() {
        let mut store = StatsStore::default();
        let id = store.create_playlist("keep");
        store.record_play(&track(1, "A"), 1);
        store.add_listening_time(5_000);

        store.clear_history();
        assert_eq!(store.total_plays(), 0);
        assert_eq!(store.total_listening_ms(), 0);
        assert!(store.playlist(&id).is_some());
    }

    #[test]
    fn persisted_store_survives_reload() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("stats.json");

        let mut store = StatsStore::default();
        store.record_play(&track(4, "Neon"), 20);
        store.add_listening_time(3_000);
        store.set_auto_suggest(false);
        let playlist = store.create_playlist("mix");
        store.add_to_playlist(&playlist, 4);
        save_stats_to_path(&path, &store).expect("save");

        let loaded = load_stats_from_path(&path).expect("load");
        assert_eq!(loaded.track_plays(4), 1);
        assert_eq!(loaded.total_listening_ms(), 3_000);
        assert!(!loaded.auto_suggest_enabled());
        assert_eq!(loaded.playlist(&playlist).expect("playlist").track_ids, vec![4]);
        assert_eq!(loaded.streak().last_play_day, Some(20));
    }

    #[test]
    fn malformed_stats_file_loads_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("stats.json");
        fs::write(&path, "[1, 2").expect("write");

        let loaded = load_stats_from_path(&path).expect("load");
        assert_eq!(loaded.total_plays(), 0);
        assert!(loaded.auto_suggest_enabled());
    }

    #[test]
    fn malformed_stats_survive_repeated_saves() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("stats.json");
        fs::write(&path, "[1, 2").expect("write");

        let mut store = load_stats_from_path(&path).expect("load");
        save_stats_to_path(&path, &store).expect("first save");
        store.add_listening_time(500);
        save_stats_to_path(&path, &store).expect("second save");

        let kept: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("stats.json.corrupt-"))
            .collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(fs::read_to_string(kept[0].path()).expect("read"), "[1, 2");
        assert_eq!(load_stats_from_path(&path).expect("reload").total_listening_ms(), 500);
    }

    #[test]
    fn day_index_counts_days_since_epoch() {
        assert_eq!(day_index_of(datetime!(1970-01-01 23:59 UTC)), 0);
        assert_eq!(day_index_of(datetime!(1970-01-02 00:00 UTC)), 1);
        assert_eq!(day_index_of(datetime!(2024-03-01 12:00 UTC)), 19_783);
    }
}

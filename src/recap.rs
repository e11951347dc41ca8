use crate::catalog;
use crate::model::Track;
use crate::stats::StatsStore;
use std::collections::HashMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedTrack {
    pub track: Track,
    pub plays: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recap {
    pub listening_hours: u64,
    pub listening_minutes: u64,
    pub current_streak: u32,
    pub best_streak: u32,
    pub unique_songs: usize,
    pub unique_artists: usize,
    pub total_plays: u64,
    pub top_artist: Option<(String, u64)>,
    pub top_artists: Vec<(String, u64)>,
    pub top_tracks: Vec<RankedTrack>,
    pub recent: Vec<Track>,
}

impl Recap {
    /// Aggregates `stats` against `library`. Ids missing from the library are skipped.
    pub fn build(stats: &StatsStore, library: &[Track], limit: usize) -> Self {
        let total_minutes = stats.total_listening_ms() / 60_000;
        let by_id: HashMap<_, _> = library.iter().map(|track| (track.id, track)).collect();

        let top_tracks = stats
            .top_track_ids()
            .into_iter()
            .filter_map(|(id, plays)| {
                by_id.get(&id).map(|track| RankedTrack {
                    track: (*track).clone(),
                    plays,
                })
            })
            .take(limit)
            .collect();

        let mut recent = catalog::resolve_ids(library, &stats.recent_ids());
        recent.truncate(limit);

        let mut top_artists = stats.artist_stats();
        top_artists.truncate(limit);

        Self {
            listening_hours: total_minutes / 60,
            listening_minutes: total_minutes % 60,
            current_streak: stats.current_streak(),
            best_streak: stats.best_streak(),
            unique_songs: stats.unique_tracks_played(),
            unique_artists: stats.unique_artists(),
            total_plays: stats.total_plays(),
            top_artist: stats.top_artist(),
            top_artists,
            top_tracks,
            recent,
        }
    }

    pub fn share_text(&self) -> String {
        let mut out = String::from("My artic recap\n");
        let _ = writeln!(
            out,
            "Listened: {}h {}m",
            self.listening_hours, self.listening_minutes
        );
        let _ = writeln!(
            out,
            "Streak: {} days (best {})",
            self.current_streak, self.best_streak
        );
        let _ = writeln!(
            out,
            "{} plays, {} songs, {} artists",
            self.total_plays, self.unique_songs, self.unique_artists
        );
        if let Some((artist, plays)) = &self.top_artist {
            let _ = writeln!(out, "Top artist: {artist} ({plays} plays)");
        }
        if !self.top_tracks.is_empty() {
            out.push_str("Top tracks:\n");
            for (rank, entry) in self.top_tracks.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "  {}. {} - {} ({})",
                    rank + 1,
                    entry.track.title,
                    entry.track.artist,
                    entry.plays
                );
            }
        }
        out
    }
}

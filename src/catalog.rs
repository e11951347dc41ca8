use crate::model::{Album, AlbumId, Artist, Track, TrackId, TrackSort};
use std::collections::{BTreeMap, HashMap};

/// Groups tracks by album id in first-seen order, applying rename overrides.
pub fn albums(tracks: &[Track], renames: &BTreeMap<AlbumId, String>) -> Vec<Album> {
    let mut order: Vec<AlbumId> = Vec::new();
    let mut first: HashMap<AlbumId, &Track> = HashMap::new();
    for track in tracks {
        first.entry(track.album_id).or_insert_with(|| {
            order.push(track.album_id);
            track
        });
    }

    order
        .into_iter()
        .filter_map(|id| first.get(&id).copied())
        .map(|track| Album {
            id: track.album_id,
            title: renames
                .get(&track.album_id)
                .cloned()
                .unwrap_or_else(|| track.album_name.clone()),
            artist: track.artist.clone(),
            art: track.art_locator(),
        })
        .collect()
}

/// Groups tracks by artist name, largest catalogues first.
pub fn artists(tracks: &[Track]) -> Vec<Artist> {
    let mut order: Vec<&str> = Vec::new();
    let mut grouped: HashMap<&str, (usize, String)> = HashMap::new();
    for track in tracks {
        let entry = grouped.entry(track.artist.as_str()).or_insert_with(|| {
            order.push(track.artist.as_str());
            (0, track.art_locator())
        });
        entry.0 += 1;
    }

    let mut artists: Vec<Artist> = order
        .into_iter()
        .filter_map(|name| {
            grouped.remove(name).map(|(track_count, art)| Artist {
                name: name.to_string(),
                track_count,
                art,
            })
        })
        .collect();
    // Stable sort keeps first-seen order among equal counts.
    artists.sort_by(|a, b| b.track_count.cmp(&a.track_count));
    artists
}

pub fn album_tracks(tracks: &[Track], album_id: AlbumId) -> Vec<Track> {
    tracks
        .iter()
        .filter(|track| track.album_id == album_id)
        .cloned()
        .collect()
}

pub fn artist_tracks(tracks: &[Track], artist: &str) -> Vec<Track> {
    tracks
        .iter()
        .filter(|track| track.artist == artist)
        .cloned()
        .collect()
}

pub fn sort_tracks(tracks: &mut [Track], sort: TrackSort) {
    match sort {
        TrackSort::Name => tracks.sort_by_cached_key(|track| track.title.to_lowercase()),
        TrackSort::Artist => tracks.sort_by_cached_key(|track| track.artist.to_lowercase()),
        TrackSort::DateAdded => tracks.sort_by_key(|track| track.date_added),
    }
}

/// Case-insensitive substring match over title and artist.
pub fn search<'a>(tracks: &'a [Track], query: &str) -> Vec<&'a Track> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return tracks.iter().collect();
    }
    tracks
        .iter()
        .filter(|track| {
            track.title.to_lowercase().contains(&needle)
                || track.artist.to_lowercase().contains(&needle)
        })
        .collect()
}

/// Resolves weak id references in order; unknown ids resolve to nothing.
pub fn resolve_ids(library: &[Track], ids: &[TrackId]) -> Vec<Track> {
    let by_id: HashMap<TrackId, &Track> = library.iter().map(|track| (track.id, track)).collect();
    ids.iter()
        .filter_map(|id| by_id.get(id).map(|track| (*track).clone()))
        .collect()
}

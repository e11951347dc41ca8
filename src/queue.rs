//! Ordered play queue addressed relative to the current track.
//!
//! The queue does not know which track is current; callers pass the current
//! position, which the engine resolves from the current track id.

use crate::model::{Track, TrackId};
use rand::Rng;
use rand::seq::SliceRandom;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayQueue {
    items: Vec<Track>,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tracks(items: Vec<Track>) -> Self {
        Self { items }
    }

    pub fn replace(&mut self, items: Vec<Track>) {
        self.items = items;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.items.get(index)
    }

    pub fn push(&mut self, track: Track) {
        self.items.push(track);
    }

    pub fn position_of(&self, id: TrackId) -> Option<usize> {
        self.items.iter().position(|track| track.id == id)
    }

    /// Resolves `id` to a position, preferring `hint` when it still points at `id`.
    pub fn locate(&self, id: TrackId, hint: Option<usize>) -> Option<usize> {
        hint.filter(|index| self.items.get(*index).is_some_and(|track| track.id == id))
            .or_else(|| self.position_of(id))
    }

    pub fn next_after(&self, position: Option<usize>) -> Option<(usize, &Track)> {
        let next = position?.checked_add(1)?;
        self.items.get(next).map(|track| (next, track))
    }

    pub fn prev_before(&self, position: Option<usize>) -> Option<(usize, &Track)> {
        let prev = position?.checked_sub(1)?;
        self.items.get(prev).map(|track| (prev, track))
    }

    /// Tracks strictly after `position`; empty when `position` is `None` or last.
    pub fn upcoming(&self, position: Option<usize>) -> &[Track] {
        match position {
            Some(index) if index < self.items.len() => &self.items[index + 1..],
            _ => &[],
        }
    }

    /// Permutes the tail after `position`, leaving the prefix untouched.
    pub fn shuffle_upcoming<R: Rng + ?Sized>(&mut self, position: Option<usize>, rng: &mut R) {
        let Some(index) = position.filter(|index| *index < self.items.len()) else {
            return;
        };
        self.items[index + 1..].shuffle(rng);
    }

    /// Removes every entry with `id`, returning how many were removed and
    /// where `position` moved to.
    pub fn remove_all(&mut self, id: TrackId, position: Option<usize>) -> (usize, Option<usize>) {
        let mut removed = 0;
        let mut shifted = position;
        let mut index = 0;
        self.items.retain(|track| {
            let keep = track.id != id;
            if !keep {
                removed += 1;
                if let Some(current) = position
                    && index < current
                {
                    shifted = shifted.map(|value| value - 1);
                }
            }
            index += 1;
            keep
        });
        (removed, shifted)
    }

    /// Remove-then-insert reorder. Returns `false` when either index is out of bounds.
    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        if from >= self.items.len() || to >= self.items.len() {
            return false;
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);
        true
    }
}

/// Where the element at `position` ends up after `move_item(from, to)`.
pub fn moved_position(position: usize, from: usize, to: usize) -> usize {
    if position == from {
        to
    } else if from < position && position <= to {
        position - 1
    } else if to <= position && position < from {
        position + 1
    } else {
        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use std::path::PathBuf;

    fn track(id: TrackId) -> Track {
        Track {
            id,
            title: format!("t{id}"),
            artist: String::from("a"),
            album_id: 0,
            album_name: String::from("al"),
            duration_ms: 1_000,
            path: PathBuf::from(format!("{id}.mp3")),
            date_added: 0,
        }
    }

    fn queue(ids: &[TrackId]) -> PlayQueue {
        PlayQueue::from_tracks(ids.iter().copied().map(track).collect())
    }

    fn ids(queue: &PlayQueue) -> Vec<TrackId> {
        queue.tracks().iter().map(|track| track.id).collect()
    }

    #[test]
    fn move_first_to_last() {
        let mut q = queue(&[1, 2, 3]);
        assert!(q.move_item(0, 2));
        assert_eq!(ids(&q), vec![2, 3, 1]);
    }

    #[test]
    fn move_out_of_bounds_is_noop() {
        let mut q = queue(&[1, 2, 3]);
        assert!(!q.move_item(0, 3));
        assert!(!q.move_item(5, 0));
        assert_eq!(ids(&q), vec![1, 2, 3]);
    }

    #[test]
    fn upcoming_is_strict_tail() {
        let q = queue(&[1, 2, 3]);
        let upcoming: Vec<TrackId> = q.upcoming(Some(0)).iter().map(|t| t.id).collect();
        assert_eq!(upcoming, vec![2, 3]);
        assert!(q.upcoming(Some(2)).is_empty());
        assert!(q.upcoming(None).is_empty());
    }

    #[test]
    fn locate_prefers_valid_hint_over_first_match() {
        let q = queue(&[5, 6, 5]);
        assert_eq!(q.locate(5, Some(2)), Some(2));
        assert_eq!(q.locate(5, Some(1)), Some(0));
        assert_eq!(q.locate(9, Some(0)), None);
    }

    #[test]
    fn remove_all_shifts_position() {
        let mut q = queue(&[7, 1, 7, 2]);
        let (removed, position) = q.remove_all(7, Some(3));
        assert_eq!(removed, 2);
        assert_eq!(position, Some(1));
        assert_eq!(ids(&q), vec![1, 2]);
    }

    #[test]
    fn moved_position_tracks_element() {
        let mut q = queue(&[1, 2, 3, 4]);
        for (from, to) in [(0, 3), (3, 0), (1, 2), (2, 1)] {
            for position in 0..4 {
                let before = q.clone();
                let id = before.tracks()[position].id;
                q.move_item(from, to);
                assert_eq!(q.tracks()[moved_position(position, from, to)].id, id);
                q = before;
            }
        }
    }

    proptest! {
        #[test]
        fn shuffle_keeps_prefix_and_multiset(
            raw in proptest::collection::vec(0i64..6, 1..30),
            pick in 0usize..30,
            seed in any::<u64>(),
        ) {
            let mut q = queue(&raw);
            let position = pick % raw.len();
            let mut rng = SmallRng::seed_from_u64(seed);
            q.shuffle_upcoming(Some(position), &mut rng);

            let after = ids(&q);
            prop_assert_eq!(&after[..=position], &raw[..=position]);
            let mut tail_before = raw[position + 1..].to_vec();
            let mut tail_after = after[position + 1..].to_vec();
            tail_before.sort_unstable();
            tail_after.sort_unstable();
            prop_assert_eq!(tail_before, tail_after);
        }

        #[test]
        fn moved_position_matches_move_item(len in 1usize..20, a in 0usize..20, b in 0usize..20, p in 0usize..20) {
            let raw: Vec<TrackId> = (0..len as TrackId).collect();
            let (from, to, position) = (a % len, b % len, p % len);
            let mut q = queue(&raw);
            prop_assert!(q.move_item(from, to));
            prop_assert_eq!(q.tracks()[moved_position(position, from, to)].id, raw[position]);
        }
    }
}

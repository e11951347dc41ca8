#![no_main]

use artic::model::Track;
use artic::queue::{PlayQueue, moved_position};
use artic::session::SessionCommand;
use libfuzzer_sys::fuzz_target;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::path::PathBuf;

fn track(id: i64) -> Track {
    Track {
        id,
        title: format!("track_{id}"),
        artist: String::from("fuzz"),
        album_id: 0,
        album_name: String::from("fuzz"),
        duration_ms: 0,
        path: PathBuf::from(format!("track_{id}.mp3")),
        date_added: 0,
    }
}

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data)
        && let Ok(command) = text.parse::<SessionCommand>()
    {
        assert_eq!(command.to_string().parse::<SessionCommand>(), Ok(command));
    }

    let len = (data.len() % 32).max(1);
    let mut queue = PlayQueue::from_tracks((0..len).map(|n| track((n % 5) as i64)).collect());
    let mut position = Some(0_usize);
    let mut rng = SmallRng::seed_from_u64(data.len() as u64);

    for pair in data.chunks(2) {
        let op = pair[0];
        let arg = usize::from(pair.get(1).copied().unwrap_or_default());
        let current = position.and_then(|index| queue.get(index)).map(|track| track.id);
        match op % 5 {
            0 => position = queue.next_after(position).map(|(index, _)| index).or(position),
            1 => position = queue.prev_before(position).map(|(index, _)| index).or(position),
            2 => {
                let from = arg % queue.len();
                let to = (arg / 7) % queue.len();
                if queue.move_item(from, to) {
                    position = position.map(|index| moved_position(index, from, to));
                }
            }
            3 => {
                let id = (arg % 5) as i64;
                if Some(id) != current {
                    position = queue.remove_all(id, position).1;
                }
            }
            _ => queue.shuffle_upcoming(position, &mut rng),
        }

        if queue.is_empty() {
            break;
        }
        if let Some(index) = position {
            assert!(index < queue.len());
            if op % 5 >= 2 {
                assert_eq!(queue.get(index).map(|track| track.id), current);
            }
        }
    }
});

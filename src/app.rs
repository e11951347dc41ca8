use crate::audio::{AudioBackend, NullBackend, RodioBackend};
use crate::catalog;
use crate::config;
use crate::core::{PlaybackEngine, SPEED_PRESETS};
use crate::library::{self, FolderIndex};
use crate::model::{Settings, Track};
use crate::recap::Recap;
use crate::session::{LoggingBridge, SessionCommand};
use crate::sleep_timer::SLEEP_TIMER_PRESETS;
use crate::stats;
use anyhow::Result;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const RECAP_LIMIT: usize = 5;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AppOptions {
    pub folders: Vec<PathBuf>,
    pub null_audio: bool,
    pub recap_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub fn run(options: AppOptions) -> Result<()> {
    config::ensure_config_dir()?;
    let mut settings = config::load_settings()?;
    for folder in &options.folders {
        let normalized = config::normalize_path(folder);
        if !settings.library_roots.contains(&normalized) {
            settings.library_roots.push(normalized);
        }
    }

    let stats_path = config::stats_path()?;
    let stats = stats::load_stats_from_path(&stats_path)?;

    if options.recap_only {
        let tracks = library::read_tracks(&FolderIndex::new(settings.library_roots.clone()));
        print!("{}", Recap::build(&stats, &tracks, RECAP_LIMIT).share_text());
        return Ok(());
    }

    let backend: Box<dyn AudioBackend> = if options.null_audio {
        Box::new(NullBackend::new())
    } else {
        match RodioBackend::new() {
            Ok(backend) => Box::new(backend),
            Err(err) => {
                warn!("falling back to silent playback: {err}");
                Box::new(NullBackend::new())
            }
        }
    };

    let mut engine = PlaybackEngine::new(backend, Box::new(LoggingBridge::new()), stats)
        .with_stats_path(stats_path);
    engine.update_playback_speed(settings.playback_speed);
    info!(output = engine.backend_name(), roots = settings.library_roots.len(), "starting");

    let mut scan = Some(library::spawn_scan(FolderIndex::new(
        settings.library_roots.clone(),
    )));
    let commands = spawn_stdin_reader();
    let mut last_tick = Instant::now();

    loop {
        if let Some(receiver) = &scan {
            match receiver.try_recv() {
                Ok(mut tracks) => {
                    catalog::sort_tracks(&mut tracks, settings.sort);
                    println!("Library ready: {} tracks", tracks.len());
                    engine.set_library(tracks);
                    scan = None;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    warn!("library scan ended without a result");
                    scan = None;
                }
            }
        }

        report(engine.pump_events());

        if engine.is_playing() {
            let elapsed = last_tick.elapsed();
            if elapsed >= TICK_INTERVAL {
                last_tick = Instant::now();
                report(engine.tick(elapsed));
            }
        } else {
            last_tick = Instant::now();
        }

        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                if run_command(&mut engine, &mut settings, &line) == Flow::Quit {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("stdin closed");
                break;
            }
        }
    }

    settings.playback_speed = engine.speed();
    config::save_settings(&settings)?;
    info!("settings saved");
    Ok(())
}

fn report(result: Result<(), crate::audio::PlaybackError>) {
    if let Err(err) = result {
        println!("playback error: {err}");
    }
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(String::from("artic-stdin"))
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(err) = spawned {
        warn!("failed to start stdin reader: {err}");
    }
    rx
}

/// 1-based position as typed by the user into a 0-based index below `len`.
fn parse_index(raw: &str, len: usize) -> Option<usize> {
    raw.trim()
        .parse::<usize>()
        .ok()
        .and_then(|value| value.checked_sub(1))
        .filter(|index| *index < len)
}

fn print_tracks<'a>(tracks: impl IntoIterator<Item = (usize, &'a Track)>) {
    for (index, track) in tracks {
        println!("{:>4}. {} - {}", index + 1, track.title, track.artist);
    }
}

fn run_command(engine: &mut PlaybackEngine, settings: &mut Settings, raw: &str) -> Flow {
    let input = raw.trim();
    if input.is_empty() {
        return Flow::Continue;
    }

    let mut command_split = input.splitn(2, char::is_whitespace);
    let command = command_split.next().unwrap_or_default();
    let rest = command_split.next().unwrap_or("").trim();

    if !(command == "play" && !rest.is_empty())
        && let Ok(session_command) = input.parse::<SessionCommand>()
    {
        report(engine.handle_command(session_command));
        return Flow::Continue;
    }

    match command {
        "help" => {
            println!(
                "Commands: PLAY | PAUSE | RESUME | NEXT | PREV | SEEK <ms> | play <n> | list | search <text> | albums | album <play|rename> <n> ... | artists | artist play <name> | sort | queue | remove <n> | move <from> <to> | shuffle | speed <x> | sleep <minutes|off> | suggest <on|off> | playlist <list|new|add|remove|rename|play|delete> ... | history [clear] | recap | quit"
            );
        }
        "play" => {
            let Some(index) = parse_index(rest, engine.library().len()) else {
                println!("Usage: play <library number>");
                return Flow::Continue;
            };
            let queue = engine.library().to_vec();
            let track = queue[index].clone();
            report(engine.play(track, Some(queue)));
        }
        "list" => print_tracks(engine.library().iter().enumerate()),
        "search" => {
            let hits = catalog::search(engine.library(), rest);
            let library = engine.library();
            print_tracks(hits.into_iter().filter_map(|hit| {
                library
                    .iter()
                    .position(|track| std::ptr::eq(track, hit))
                    .map(|index| (index, hit))
            }));
        }
        "albums" => {
            let albums = catalog::albums(engine.library(), engine.stats().album_renames());
            for (index, album) in albums.iter().enumerate() {
                println!("{:>4}. {} - {}", index + 1, album.title, album.artist);
            }
        }
        "album" => run_album_command(engine, rest),
        "artists" => {
            for artist in catalog::artists(engine.library()) {
                println!("{} ({} tracks)", artist.name, artist.track_count);
            }
        }
        "artist" => match rest.strip_prefix("play ").map(str::trim) {
            Some(name) if !name.is_empty() => {
                let tracks = catalog::artist_tracks(engine.library(), name);
                play_first(engine, tracks);
            }
            _ => println!("Usage: artist play <name>"),
        },
        "sort" => {
            settings.sort = settings.sort.next();
            let mut tracks = engine.library().to_vec();
            catalog::sort_tracks(&mut tracks, settings.sort);
            engine.set_library(tracks);
            println!("Sorted by {}", settings.sort.label());
        }
        "queue" => {
            let current = engine.current_index();
            for (index, track) in engine.queue().iter().enumerate() {
                let marker = if Some(index) == current { '>' } else { ' ' };
                println!("{marker}{:>3}. {} - {}", index + 1, track.title, track.artist);
            }
        }
        "remove" => {
            let Some(index) = parse_index(rest, engine.queue().len()) else {
                println!("Usage: remove <queue number>");
                return Flow::Continue;
            };
            let id = engine.queue()[index].id;
            let removed = engine.remove_from_queue(id);
            println!("Removed {removed} entries");
        }
        "move" => {
            let len = engine.queue().len();
            let mut parts = rest.split_whitespace();
            let from = parts.next().and_then(|raw| parse_index(raw, len));
            let to = parts.next().and_then(|raw| parse_index(raw, len));
            match (from, to) {
                (Some(from), Some(to)) if engine.move_in_queue(from, to) => println!("Moved"),
                _ => println!("Usage: move <from> <to>"),
            }
        }
        "shuffle" => {
            engine.shuffle_upcoming();
            println!("Shuffled {} upcoming tracks", engine.upcoming_queue().len());
        }
        "speed" => match rest.parse::<f32>() {
            Ok(speed) => {
                engine.update_playback_speed(speed);
                settings.playback_speed = engine.speed();
                println!("Speed: {}x", engine.speed());
            }
            Err(_) => println!("Usage: speed <x> (presets: {SPEED_PRESETS:?})"),
        },
        "sleep" => {
            if rest == "off" {
                engine.cancel_sleep_timer();
                println!("Sleep timer off");
            } else if let Ok(minutes) = rest.parse::<u32>() {
                engine.set_sleep_timer(minutes);
                match engine.sleep_minutes_left() {
                    Some(left) => println!("Sleeping in {left} min"),
                    None => println!("Sleep timer off"),
                }
            } else {
                println!("Usage: sleep <minutes|off> (presets: {SLEEP_TIMER_PRESETS:?})");
            }
        }
        "suggest" => match rest {
            "on" | "off" => {
                let enabled = rest == "on";
                engine.update_stats(|store| store.set_auto_suggest(enabled));
                println!("Auto-suggest {rest}");
            }
            _ => println!("Usage: suggest <on|off>"),
        },
        "playlist" => run_playlist_command(engine, rest),
        "history" => match rest {
            "" => {
                let history = engine.stats().history(engine.library());
                for (index, track) in history.iter().enumerate() {
                    println!("{:>4}. {} - {}", index + 1, track.title, track.artist);
                }
            }
            "clear" => {
                engine.update_stats(|store| store.clear_history());
                println!("History cleared");
            }
            _ => println!("Usage: history [clear]"),
        },
        "recap" => {
            print!(
                "{}",
                Recap::build(engine.stats(), engine.library(), RECAP_LIMIT).share_text()
            );
        }
        "quit" | "exit" => return Flow::Quit,
        _ => println!("Unknown command. Use help"),
    }
    Flow::Continue
}

/// Starts `tracks` as the new queue from its first entry.
fn play_first(engine: &mut PlaybackEngine, tracks: Vec<Track>) {
    let Some(first) = tracks.first().cloned() else {
        println!("Nothing to play");
        return;
    };
    report(engine.play(first, Some(tracks)));
}

fn run_album_command(engine: &mut PlaybackEngine, rest: &str) {
    let mut album_split = rest.splitn(3, char::is_whitespace);
    let action = album_split.next().unwrap_or_default();
    let number = album_split.next().unwrap_or_default();
    let name = album_split.next().unwrap_or("").trim();

    let albums = catalog::albums(engine.library(), engine.stats().album_renames());
    let Some(album) = parse_index(number, albums.len()).map(|index| &albums[index]) else {
        println!("Usage: album <play|rename> <album number> [name]");
        return;
    };

    match action {
        "play" => {
            let tracks = catalog::album_tracks(engine.library(), album.id);
            play_first(engine, tracks);
        }
        "rename" if !name.is_empty() => {
            let album_id = album.id;
            engine.update_stats(|store| store.set_album_rename(album_id, name));
            println!("Album renamed to {name}");
        }
        _ => println!("Usage: album <play|rename> <album number> [name]"),
    }
}

fn run_playlist_command(engine: &mut PlaybackEngine, rest: &str) {
    let mut playlist_split = rest.splitn(2, char::is_whitespace);
    let action = playlist_split.next().unwrap_or_default();
    let args = playlist_split.next().unwrap_or("").trim();

    match action {
        "list" => {
            for playlist in engine.stats().playlists() {
                println!("{} ({} tracks)", playlist.name, playlist.track_ids.len());
            }
        }
        "new" if !args.is_empty() => {
            engine.update_stats(|store| store.create_playlist(args));
            println!("Playlist created");
        }
        "add" => {
            let Some((name, number)) = args.rsplit_once(char::is_whitespace) else {
                println!("Usage: playlist add <name> <library number>");
                return;
            };
            let Some(id) = playlist_id(engine, name.trim()) else {
                println!("No playlist named {}", name.trim());
                return;
            };
            let Some(index) = parse_index(number, engine.library().len()) else {
                println!("Usage: playlist add <name> <library number>");
                return;
            };
            let track_id = engine.library()[index].id;
            if engine.update_stats(|store| store.add_to_playlist(&id, track_id)) {
                println!("Track added to playlist");
            } else {
                println!("Track already in playlist");
            }
        }
        "remove" => {
            let Some((name, number)) = args.rsplit_once(char::is_whitespace) else {
                println!("Usage: playlist remove <name> <playlist position>");
                return;
            };
            let Some(id) = playlist_id(engine, name.trim()) else {
                println!("No playlist named {}", name.trim());
                return;
            };
            let track_id = engine.stats().playlist(&id).and_then(|playlist| {
                parse_index(number, playlist.track_ids.len()).map(|index| playlist.track_ids[index])
            });
            let Some(track_id) = track_id else {
                println!("Usage: playlist remove <name> <playlist position>");
                return;
            };
            if engine.update_stats(|store| store.remove_from_playlist(&id, track_id)) {
                println!("Track removed from playlist");
            }
        }
        "rename" => {
            let Some((old, new)) = args.split_once(" to ") else {
                println!("Usage: playlist rename <name> to <new name>");
                return;
            };
            let (old, new) = (old.trim(), new.trim());
            let Some(id) = playlist_id(engine, old) else {
                println!("No playlist named {old}");
                return;
            };
            if !new.is_empty() && engine.update_stats(|store| store.rename_playlist(&id, new)) {
                println!("Playlist renamed to {new}");
            } else {
                println!("Usage: playlist rename <name> to <new name>");
            }
        }
        "play" => {
            let Some(id) = playlist_id(engine, args) else {
                println!("No playlist named {args}");
                return;
            };
            let tracks = engine.stats().playlist_tracks(&id, engine.library());
            play_first(engine, tracks);
        }
        "delete" => {
            let Some(id) = playlist_id(engine, args) else {
                println!("No playlist named {args}");
                return;
            };
            engine.update_stats(|store| store.delete_playlist(&id));
            println!("Playlist deleted");
        }
        _ => println!("Usage: playlist <list|new|add|remove|rename|play|delete> ..."),
    }
}

fn playlist_id(engine: &PlaybackEngine, name: &str) -> Option<String> {
    engine
        .stats()
        .playlists()
        .iter()
        .find(|playlist| playlist.name == name)
        .map(|playlist| playlist.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrackId;
    use crate::stats::StatsStore;

    fn track(id: TrackId) -> Track {
        Track {
            id,
            title: format!("song {id}"),
            artist: String::from("artist"),
            album_id: 1,
            album_name: String::from("album"),
            duration_ms: 60_000,
            path: PathBuf::from(format!("missing-{id}.mp3")),
            date_added: 0,
        }
    }

    fn engine() -> PlaybackEngine {
        let mut stats = StatsStore::default();
        stats.set_auto_suggest(false);
        let mut engine = PlaybackEngine::new(
            Box::new(NullBackend::new()),
            Box::new(LoggingBridge::new()),
            stats,
        );
        engine.set_library(vec![track(1), track(2), track(3)]);
        engine
    }

    #[test]
    fn parse_index_is_one_based_and_bounded() {
        assert_eq!(parse_index("1", 3), Some(0));
        assert_eq!(parse_index(" 3 ", 3), Some(2));
        assert_eq!(parse_index("0", 3), None);
        assert_eq!(parse_index("4", 3), None);
        assert_eq!(parse_index("x", 3), None);
    }

    #[test]
    fn play_number_queues_library() {
        let mut engine = engine();
        let mut settings = Settings::default();
        assert_eq!(run_command(&mut engine, &mut settings, "play 2"), Flow::Continue);
        assert_eq!(engine.current_track().map(|t| t.id), Some(2));
        assert_eq!(engine.queue().len(), 3);
        assert_eq!(engine.upcoming_queue().len(), 1);
    }

    #[test]
    fn session_words_are_routed_to_engine() {
        let mut engine = engine();
        let mut settings = Settings::default();
        run_command(&mut engine, &mut settings, "play 1");
        assert!(engine.wait_until_ready(Duration::from_secs(5)).expect("ready"));
        run_command(&mut engine, &mut settings, "PAUSE");
        assert!(!engine.is_playing());
        run_command(&mut engine, &mut settings, "resume");
        assert!(engine.is_playing());
        run_command(&mut engine, &mut settings, "SEEK 2500");
        assert_eq!(engine.position_ms(), 2_500);
    }

    #[test]
    fn queue_editing_commands() {
        let mut engine = engine();
        let mut settings = Settings::default();
        run_command(&mut engine, &mut settings, "play 1");
        run_command(&mut engine, &mut settings, "move 2 3");
        let ids: Vec<TrackId> = engine.queue().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);

        run_command(&mut engine, &mut settings, "remove 3");
        assert_eq!(engine.queue().len(), 2);
        run_command(&mut engine, &mut settings, "remove 1");
        assert_eq!(engine.queue().len(), 2, "current track must stay queued");
    }

    #[test]
    fn settings_commands_update_state() {
        let mut engine = engine();
        let mut settings = Settings::default();
        run_command(&mut engine, &mut settings, "speed 1.5");
        assert_eq!(settings.playback_speed, 1.5);
        run_command(&mut engine, &mut settings, "sleep 30");
        assert_eq!(engine.sleep_minutes_left(), Some(30));
        run_command(&mut engine, &mut settings, "sleep off");
        assert_eq!(engine.sleep_minutes_left(), None);
        run_command(&mut engine, &mut settings, "suggest on");
        assert!(engine.stats().auto_suggest_enabled());
        run_command(&mut engine, &mut settings, "sort");
        assert_eq!(settings.sort, crate::model::TrackSort::Artist);
    }

    #[test]
    fn playlist_commands_round_trip_through_stats() {
        let mut engine = engine();
        let mut settings = Settings::default();
        run_command(&mut engine, &mut settings, "playlist new road trip");
        run_command(&mut engine, &mut settings, "playlist add road trip 3");
        run_command(&mut engine, &mut settings, "playlist add road trip 3");
        let playlist = &engine.stats().playlists()[0];
        assert_eq!(playlist.name, "road trip");
        assert_eq!(playlist.track_ids, vec![3]);

        run_command(&mut engine, &mut settings, "playlist play road trip");
        assert_eq!(engine.current_track().map(|t| t.id), Some(3));
        assert_eq!(engine.queue().len(), 1);
    }

    fn mixed_engine() -> PlaybackEngine {
        let mut engine = engine();
        let mut tracks = vec![track(1), track(2), track(3)];
        tracks[1].album_id = 2;
        tracks[1].album_name = String::from("live");
        tracks[1].artist = String::from("guest");
        engine.set_library(tracks);
        engine
    }

    #[test]
    fn album_commands_play_and_rename() {
        let mut engine = mixed_engine();
        let mut settings = Settings::default();
        run_command(&mut engine, &mut settings, "album play 2");
        assert_eq!(engine.current_track().map(|t| t.id), Some(2));
        assert_eq!(engine.queue().len(), 1);

        run_command(&mut engine, &mut settings, "album play 1");
        let ids: Vec<TrackId> = engine.queue().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 3]);

        run_command(&mut engine, &mut settings, "album rename 2 Live at Home");
        assert_eq!(
            engine.stats().album_renames().get(&2).map(String::as_str),
            Some("Live at Home")
        );
        let albums = catalog::albums(engine.library(), engine.stats().album_renames());
        assert_eq!(albums[1].title, "Live at Home");

        run_command(&mut engine, &mut settings, "album rename 9 nowhere");
        assert_eq!(engine.stats().album_renames().len(), 1);
    }

    #[test]
    fn artist_play_queues_only_that_artist() {
        let mut engine = mixed_engine();
        let mut settings = Settings::default();
        run_command(&mut engine, &mut settings, "artist play artist");
        let ids: Vec<TrackId> = engine.queue().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(engine.current_track().map(|t| t.id), Some(1));

        run_command(&mut engine, &mut settings, "artist play nobody");
        assert_eq!(engine.current_track().map(|t| t.id), Some(1));
    }

    #[test]
    fn playlist_rename_and_remove() {
        let mut engine = engine();
        let mut settings = Settings::default();
        run_command(&mut engine, &mut settings, "playlist new road trip");
        run_command(&mut engine, &mut settings, "playlist add road trip 1");
        run_command(&mut engine, &mut settings, "playlist add road trip 2");

        run_command(&mut engine, &mut settings, "playlist rename road trip to night drive");
        assert_eq!(engine.stats().playlists()[0].name, "night drive");

        run_command(&mut engine, &mut settings, "playlist remove night drive 1");
        assert_eq!(engine.stats().playlists()[0].track_ids, vec![2]);
        run_command(&mut engine, &mut settings, "playlist remove night drive 5");
        assert_eq!(engine.stats().playlists()[0].track_ids, vec![2]);
    }

    #[test]
    fn history_clear_resets_counters() {
        let mut engine = engine();
        let mut settings = Settings::default();
        run_command(&mut engine, &mut settings, "play 2");
        assert_eq!(engine.stats().recent_ids(), vec![2]);

        run_command(&mut engine, &mut settings, "history");
        run_command(&mut engine, &mut settings, "history clear");
        assert!(engine.stats().recent_ids().is_empty());
        assert_eq!(engine.stats().track_plays(2), 0);
    }

    #[test]
    fn quit_and_unknown_commands() {
        let mut engine = engine();
        let mut settings = Settings::default();
        assert_eq!(run_command(&mut engine, &mut settings, "dance"), Flow::Continue);
        assert_eq!(run_command(&mut engine, &mut settings, "   "), Flow::Continue);
        assert_eq!(run_command(&mut engine, &mut settings, "quit"), Flow::Quit);
    }
}

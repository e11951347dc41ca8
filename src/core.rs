use crate::audio::{AudioBackend, PlaybackError, PlayerHandle, PreparedTrack, SeekMode};
use crate::model::{Track, TrackId};
use crate::queue::{PlayQueue, moved_position};
use crate::session::{SessionBridge, SessionCommand, SessionSignal, SessionSnapshot};
use crate::sleep_timer::{SleepStatus, SleepTimer};
use crate::stats::{self, StatsStore};
use rand::rngs::SmallRng;
use rand::{RngExt, SeedableRng};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const MIN_SPEED: f32 = 0.25;
pub const MAX_SPEED: f32 = 3.0;
pub const SPEED_PRESETS: [f32; 6] = [0.5, 0.75, 1.0, 1.25, 1.5, 2.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Idle,
    Preparing,
    Playing,
    Paused,
}

struct Completion {
    token: u64,
    result: Result<PreparedTrack, PlaybackError>,
}

/// Owns the player handle, the queue and everything the session sees.
///
/// All methods run on the thread that owns the engine. Preparation work is
/// pushed to a worker thread and its result comes back through
/// [`PlaybackEngine::pump_events`] or [`PlaybackEngine::wait_until_ready`];
/// a completion whose token no longer matches the latest `play` is dropped.
pub struct PlaybackEngine {
    backend: Box<dyn AudioBackend>,
    bridge: Box<dyn SessionBridge>,
    stats: StatsStore,
    stats_path: Option<PathBuf>,
    handle: Option<Box<dyn PlayerHandle>>,
    queue: PlayQueue,
    position_hint: Option<usize>,
    library: Vec<Track>,
    current: Option<Track>,
    phase: PlaybackPhase,
    /// The loaded handle played to its end; resuming restarts the track.
    ended: bool,
    position_ms: u64,
    duration_ms: u64,
    speed: f32,
    sleep_timer: SleepTimer,
    prepare_token: u64,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
    rng: SmallRng,
}

impl PlaybackEngine {
    pub fn new(
        backend: Box<dyn AudioBackend>,
        bridge: Box<dyn SessionBridge>,
        stats: StatsStore,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::channel();
        Self {
            backend,
            bridge,
            stats,
            stats_path: None,
            handle: None,
            queue: PlayQueue::new(),
            position_hint: None,
            library: Vec::new(),
            current: None,
            phase: PlaybackPhase::Idle,
            ended: false,
            position_ms: 0,
            duration_ms: 0,
            speed: 1.0,
            sleep_timer: SleepTimer::new(),
            prepare_token: 0,
            completions_tx,
            completions_rx,
            rng: rand::make_rng(),
        }
    }

    /// Persists the statistics store to `path` after every mutation.
    pub fn with_stats_path(mut self, path: PathBuf) -> Self {
        self.stats_path = Some(path);
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn set_library(&mut self, tracks: Vec<Track>) {
        info!(tracks = tracks.len(), "library snapshot updated");
        self.library = tracks;
    }

    pub fn library(&self) -> &[Track] {
        &self.library
    }

    pub fn stats(&self) -> &StatsStore {
        &self.stats
    }

    /// Applies `change` to the statistics store and persists the result.
    pub fn update_stats<R>(&mut self, change: impl FnOnce(&mut StatsStore) -> R) -> R {
        let result = change(&mut self.stats);
        self.persist_stats();
        result
    }

    fn persist_stats(&self) {
        let Some(path) = self.stats_path.as_deref() else {
            return;
        };
        if let Err(err) = stats::save_stats_to_path(path, &self.stats) {
            warn!("failed to persist stats: {err:#}");
        }
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn is_playing(&self) -> bool {
        self.phase == PlaybackPhase::Playing
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn queue(&self) -> &[Track] {
        self.queue.tracks()
    }

    /// Index of the current track in the queue, if it is queued.
    pub fn current_index(&self) -> Option<usize> {
        let current = self.current.as_ref()?;
        self.queue.locate(current.id, self.position_hint)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            track: self.current.clone(),
            is_playing: self.is_playing(),
            position_ms: self.position_ms,
            speed: self.speed,
        }
    }

    fn signal(&mut self, signal: SessionSignal) {
        let snapshot = self.snapshot();
        self.bridge.signal(signal, &snapshot);
    }

    pub fn play(&mut self, track: Track, new_queue: Option<Vec<Track>>) -> Result<(), PlaybackError> {
        if let Some(queue) = new_queue {
            self.queue.replace(queue);
            self.position_hint = self.queue.position_of(track.id);
        } else if self.queue.is_empty() {
            self.queue.push(track.clone());
            self.position_hint = Some(0);
        } else {
            self.position_hint = self.queue.locate(track.id, self.position_hint);
        }

        if self.current.as_ref().is_some_and(|current| current.id == track.id) {
            if self.handle.is_some() {
                return self.toggle_play();
            }
            if self.phase == PlaybackPhase::Preparing {
                debug!(track = track.id, "already preparing");
                return Ok(());
            }
        }

        self.start(track)
    }

    fn start_at(&mut self, index: usize, track: Track) -> Result<(), PlaybackError> {
        self.position_hint = Some(index);
        self.start(track)
    }

    fn start(&mut self, track: Track) -> Result<(), PlaybackError> {
        self.handle = None;
        self.ended = false;
        self.prepare_token = self.prepare_token.wrapping_add(1);
        let token = self.prepare_token;

        self.position_ms = 0;
        self.duration_ms = track.duration_ms;
        self.phase = PlaybackPhase::Preparing;
        self.current = Some(track.clone());
        self.update_stats(|store| store.record_play(&track, stats::today_index()));

        let job = self.backend.prepare_job(&track.path);
        let tx = self.completions_tx.clone();
        let spawned = thread::Builder::new()
            .name(String::from("artic-prepare"))
            .spawn(move || {
                let result = job();
                let _ = tx.send(Completion { token, result });
            });

        if let Err(err) = spawned {
            let err = PlaybackError::Worker(err);
            warn!(track = track.id, "failed to start playback: {err}");
            self.phase = PlaybackPhase::Idle;
            return Err(err);
        }

        debug!(track = track.id, token, path = %track.path.display(), "preparing track");
        Ok(())
    }

    /// Drains finished preparations and advances past a completed track.
    pub fn pump_events(&mut self) -> Result<(), PlaybackError> {
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.apply_completion(completion)?;
        }
        self.advance_if_finished()
    }

    /// Blocks until the pending preparation settles. Returns `false` on timeout.
    pub fn wait_until_ready(&mut self, timeout: Duration) -> Result<bool, PlaybackError> {
        let deadline = Instant::now() + timeout;
        while self.phase == PlaybackPhase::Preparing {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.completions_rx.recv_timeout(remaining) {
                Ok(completion) => self.apply_completion(completion)?,
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => {
                    let path = self
                        .current
                        .as_ref()
                        .map(|track| track.path.clone())
                        .unwrap_or_default();
                    self.phase = PlaybackPhase::Idle;
                    return Err(PlaybackError::Abandoned(path));
                }
            }
        }
        Ok(true)
    }

    fn apply_completion(&mut self, completion: Completion) -> Result<(), PlaybackError> {
        if completion.token != self.prepare_token || self.phase != PlaybackPhase::Preparing {
            debug!(token = completion.token, "discarding stale preparation");
            return Ok(());
        }

        let opened = completion
            .result
            .and_then(|prepared| self.backend.open(prepared));
        let mut handle = match opened {
            Ok(handle) => handle,
            Err(err) => {
                warn!("failed to start playback: {err}");
                self.phase = PlaybackPhase::Idle;
                return Err(err);
            }
        };

        if !handle.set_speed(self.speed) {
            debug!("player has no rate control");
        }
        if self.position_ms > 0
            && let Err(err) = handle.seek(Duration::from_millis(self.position_ms), SeekMode::Exact)
        {
            warn!("failed to apply pending seek: {err}");
        }
        handle.start();
        if let Some(duration) = handle.duration() {
            self.duration_ms = duration_to_ms(duration);
        }
        self.handle = Some(handle);
        self.phase = PlaybackPhase::Playing;
        self.signal(SessionSignal::Play);
        Ok(())
    }

    fn advance_if_finished(&mut self) -> Result<(), PlaybackError> {
        let finished = self.phase == PlaybackPhase::Playing
            && self.handle.as_ref().is_some_and(|handle| handle.is_finished());
        if !finished {
            return Ok(());
        }
        debug!("track finished");
        self.ended = true;
        self.play_next()
    }

    /// Pauses or resumes the loaded track. A track that already played to
    /// its end is prepared again from the start.
    pub fn toggle_play(&mut self) -> Result<(), PlaybackError> {
        if self.ended && self.phase != PlaybackPhase::Playing {
            return self.restart_current();
        }
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };

        if self.phase == PlaybackPhase::Playing {
            handle.pause();
            self.position_ms = duration_to_ms(handle.position());
            self.phase = PlaybackPhase::Paused;
            self.signal(SessionSignal::Pause);
            return Ok(());
        }

        handle.start();
        self.phase = PlaybackPhase::Playing;
        self.signal(SessionSignal::Resume);
        Ok(())
    }

    fn restart_current(&mut self) -> Result<(), PlaybackError> {
        let Some(track) = self.current.clone() else {
            return Ok(());
        };
        debug!(track = track.id, "restarting finished track");
        self.position_hint = self.current_index();
        self.start(track)
    }

    pub fn play_next(&mut self) -> Result<(), PlaybackError> {
        if let Some((index, track)) = self.queue.next_after(self.current_index()) {
            let track = track.clone();
            return self.start_at(index, track);
        }

        if self.stats.auto_suggest_enabled() && !self.library.is_empty() {
            let pick = self.rng.random_range(0..self.library.len());
            let track = self.library[pick].clone();
            info!(track = track.id, title = %track.title, "queue ended, suggesting a track");
            self.queue.push(track.clone());
            return self.start_at(self.queue.len() - 1, track);
        }

        self.stop_at_end();
        Ok(())
    }

    fn stop_at_end(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.pause();
            self.position_ms = duration_to_ms(handle.position());
            self.phase = PlaybackPhase::Paused;
        } else {
            self.prepare_token = self.prepare_token.wrapping_add(1);
            self.phase = PlaybackPhase::Idle;
        }
        info!("reached end of queue");
        self.signal(SessionSignal::Pause);
    }

    pub fn play_prev(&mut self) -> Result<(), PlaybackError> {
        let Some((index, track)) = self.queue.prev_before(self.current_index()) else {
            return Ok(());
        };
        let track = track.clone();
        self.start_at(index, track)
    }

    pub fn seek_to(&mut self, position_ms: u64) -> Result<(), PlaybackError> {
        self.position_ms = position_ms;
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        handle
            .seek(Duration::from_millis(position_ms), SeekMode::Closest)
            .inspect_err(|err| warn!("seek to {position_ms}ms failed: {err}"))
    }

    /// Stores `speed` clamped to the supported range and applies it when possible.
    pub fn update_playback_speed(&mut self, speed: f32) {
        if !speed.is_finite() {
            return;
        }
        self.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        if let Some(handle) = self.handle.as_mut()
            && !handle.set_speed(self.speed)
        {
            debug!("player has no rate control");
        }
    }

    /// Removes every queued entry for `track_id` unless it is the current track.
    pub fn remove_from_queue(&mut self, track_id: TrackId) -> usize {
        if self.current.as_ref().is_some_and(|track| track.id == track_id) {
            return 0;
        }
        let (removed, position) = self.queue.remove_all(track_id, self.current_index());
        self.position_hint = position;
        removed
    }

    pub fn move_in_queue(&mut self, from: usize, to: usize) -> bool {
        let position = self.current_index();
        if !self.queue.move_item(from, to) {
            return false;
        }
        self.position_hint = position.map(|index| moved_position(index, from, to));
        true
    }

    pub fn upcoming_queue(&self) -> &[Track] {
        self.queue.upcoming(self.current_index())
    }

    pub fn shuffle_upcoming(&mut self) {
        let position = self.current_index();
        self.queue.shuffle_upcoming(position, &mut self.rng);
    }

    pub fn set_sleep_timer(&mut self, minutes: u32) {
        self.sleep_timer.arm(minutes, epoch_ms());
        if minutes == 0 {
            info!("sleep timer off");
        } else {
            info!(minutes, "sleep timer armed");
        }
    }

    pub fn cancel_sleep_timer(&mut self) {
        self.sleep_timer.cancel();
    }

    pub fn sleep_minutes_left(&self) -> Option<u32> {
        self.sleep_timer
            .is_armed()
            .then(|| self.sleep_timer.minutes_left())
    }

    pub fn check_sleep_timer(&mut self) -> SleepStatus {
        self.check_sleep_timer_at(epoch_ms())
    }

    pub fn check_sleep_timer_at(&mut self, now_ms: u64) -> SleepStatus {
        let status = self.sleep_timer.check(now_ms);
        if status == SleepStatus::Expired {
            info!("sleep timer expired");
            if self.phase == PlaybackPhase::Playing
                && let Some(handle) = self.handle.as_mut()
            {
                handle.pause();
                self.position_ms = duration_to_ms(handle.position());
                self.phase = PlaybackPhase::Paused;
            }
            self.signal(SessionSignal::Pause);
        }
        status
    }

    /// One polling step; does nothing unless a track is playing.
    pub fn tick(&mut self, elapsed: Duration) -> Result<(), PlaybackError> {
        if self.phase != PlaybackPhase::Playing {
            return Ok(());
        }
        if let Some(handle) = self.handle.as_ref() {
            self.position_ms = duration_to_ms(handle.position());
        }
        self.check_sleep_timer();
        if self.phase != PlaybackPhase::Playing {
            return Ok(());
        }
        self.update_stats(|store| store.add_listening_time(duration_to_ms(elapsed)));
        self.advance_if_finished()
    }

    pub fn handle_command(&mut self, command: SessionCommand) -> Result<(), PlaybackError> {
        debug!(%command, "session command");
        match command {
            SessionCommand::Play | SessionCommand::Resume => {
                if self.is_playing() {
                    return Ok(());
                }
                if self.handle.is_some() {
                    self.toggle_play()
                } else if self.phase == PlaybackPhase::Idle {
                    self.restart_current()
                } else {
                    Ok(())
                }
            }
            SessionCommand::Pause if self.is_playing() => self.toggle_play(),
            SessionCommand::Pause => Ok(()),
            SessionCommand::Next => self.play_next(),
            SessionCommand::Prev => self.play_prev(),
            SessionCommand::SeekTo(position_ms) => {
                self.seek_to(position_ms)?;
                let signal = if self.is_playing() {
                    SessionSignal::Play
                } else {
                    SessionSignal::Pause
                };
                self.signal(signal);
                Ok(())
            }
        }
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn epoch_ms() -> u64 {
    u64::try_from(stats::now_epoch_ms()).unwrap_or(0)
}

use rodio::Source;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, DeviceSinkBuilder, MixerDeviceSink, Player};
#[cfg(unix)]
use std::ffi::CString;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },
    #[error("audio output unavailable: {0}")]
    Output(String),
    #[error("seek failed: {0}")]
    Seek(String),
    #[error("failed to start preparation worker: {0}")]
    Worker(#[source] std::io::Error),
    #[error("preparation of {} was abandoned", .0.display())]
    Abandoned(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Land on the closest decodable position.
    Closest,
    /// Land exactly on the requested position, decoding forward if needed.
    Exact,
}

/// Granularity of a [`SeekMode::Closest`] seek on the null clock.
pub const SEEK_GRANULE: Duration = Duration::from_millis(20);

pub type PreparedSource = Box<dyn Source + Send>;

/// Outcome of a successful preparation, ready to be opened on the engine thread.
pub struct PreparedTrack {
    pub path: PathBuf,
    pub duration: Option<Duration>,
    /// Decoder opened on the worker thread, if the backend produces one.
    pub source: Option<PreparedSource>,
}

impl PreparedTrack {
    pub fn new(path: PathBuf, duration: Option<Duration>) -> Self {
        Self {
            path,
            duration,
            source: None,
        }
    }
}

impl fmt::Debug for PreparedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedTrack")
            .field("path", &self.path)
            .field("duration", &self.duration)
            .field("decoded", &self.source.is_some())
            .finish()
    }
}

pub type PrepareJob = Box<dyn FnOnce() -> Result<PreparedTrack, PlaybackError> + Send + 'static>;

/// Source of player handles. `prepare_job` must be safe to run on any thread;
/// `open` runs on the thread that owns the engine.
pub trait AudioBackend {
    fn prepare_job(&self, path: &Path) -> PrepareJob;
    fn open(&mut self, prepared: PreparedTrack) -> Result<Box<dyn PlayerHandle>, PlaybackError>;
    fn name(&self) -> &str;
}

/// One opened track. Dropping the handle releases it.
pub trait PlayerHandle {
    fn start(&mut self);
    fn pause(&mut self);
    fn is_playing(&self) -> bool;
    fn seek(&mut self, position: Duration, mode: SeekMode) -> Result<(), PlaybackError>;
    /// Returns `false` when the handle has no rate control.
    fn set_speed(&mut self, speed: f32) -> bool;
    fn position(&self) -> Duration;
    fn duration(&self) -> Option<Duration>;
    fn is_finished(&self) -> bool;
}

pub struct RodioBackend {
    stream: MixerDeviceSink,
    output_name: String,
}

impl RodioBackend {
    pub fn new() -> Result<Self, PlaybackError> {
        let (stream, output_name) = open_output_stream()?;
        Ok(Self {
            stream,
            output_name,
        })
    }
}

impl AudioBackend for RodioBackend {
    fn prepare_job(&self, path: &Path) -> PrepareJob {
        let path = path.to_path_buf();
        Box::new(move || prepare_decoded(path))
    }

    fn open(&mut self, prepared: PreparedTrack) -> Result<Box<dyn PlayerHandle>, PlaybackError> {
        let source: PreparedSource = match prepared.source {
            Some(source) => source,
            None => Box::new(open_decoder(&prepared.path)?),
        };
        let duration = prepared.duration.or_else(|| source.total_duration());
        let sink = Player::connect_new(self.stream.mixer());
        sink.pause();
        sink.append(source);
        Ok(Box::new(RodioHandle { sink, duration }))
    }

    fn name(&self) -> &str {
        &self.output_name
    }
}

/// Opens and decodes `path`, keeping the decoder so `open` only connects a sink.
fn prepare_decoded(path: PathBuf) -> Result<PreparedTrack, PlaybackError> {
    let source = open_decoder(&path)?;
    let duration = source.total_duration().filter(|duration| !duration.is_zero());
    Ok(PreparedTrack {
        path,
        duration,
        source: Some(Box::new(source)),
    })
}

fn open_decoder(path: &Path) -> Result<impl Source + Send + 'static, PlaybackError> {
    let file = File::open(path).map_err(|source| PlaybackError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Decoder::try_from(file).map_err(|err| PlaybackError::Decode {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn open_output_stream() -> Result<(MixerDeviceSink, String), PlaybackError> {
    let (mut stream, name) = with_silenced_stderr(|| {
        let default_err = match DeviceSinkBuilder::from_default_device()
            .and_then(|builder| builder.with_error_callback(|_| {}).open_sink_or_fallback())
        {
            Ok(stream) => return Ok((stream, String::from("System default output"))),
            Err(err) => err.to_string(),
        };

        let host = rodio::cpal::default_host();
        let mut candidates: Vec<String> = host
            .output_devices()
            .ok()
            .into_iter()
            .flatten()
            .filter_map(|device| device.name().ok())
            .collect();
        candidates.sort_by_cached_key(|name| {
            let lower = name.to_ascii_lowercase();
            let rank = if lower.contains("pulse") {
                0_u8
            } else if lower.contains("pipewire") {
                1_u8
            } else if lower.contains("default") {
                2_u8
            } else {
                3_u8
            };
            (rank, lower)
        });
        candidates.dedup();

        for candidate in candidates {
            let Some(device) = host
                .output_devices()
                .ok()
                .into_iter()
                .flatten()
                .find(|entry| entry.name().ok().as_deref() == Some(candidate.as_str()))
            else {
                continue;
            };
            let opened = DeviceSinkBuilder::from_device(device).and_then(|builder| {
                builder
                    .with_error_callback(|_| {})
                    .open_sink_or_fallback()
            });
            if let Ok(stream) = opened {
                return Ok((stream, candidate));
            }
        }

        Err(PlaybackError::Output(format!(
            "unable to start any audio output stream after default failed: {default_err}"
        )))
    })?;
    stream.log_on_drop(false);
    debug!(output = %name, "opened audio output");
    Ok((stream, name))
}

struct RodioHandle {
    sink: Player,
    duration: Option<Duration>,
}

impl PlayerHandle for RodioHandle {
    fn start(&mut self) {
        self.sink.play();
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn is_playing(&self) -> bool {
        !self.sink.is_paused() && !self.sink.empty()
    }

    // rodio decodes forward to the requested frame in both modes.
    fn seek(&mut self, position: Duration, _mode: SeekMode) -> Result<(), PlaybackError> {
        self.sink
            .try_seek(position)
            .map_err(|err| PlaybackError::Seek(format!("{err:?}")))
    }

    fn set_speed(&mut self, speed: f32) -> bool {
        self.sink.set_speed(speed);
        true
    }

    fn position(&self) -> Duration {
        self.sink.get_pos()
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn is_finished(&self) -> bool {
        !self.sink.is_paused() && self.sink.empty()
    }
}

impl Drop for RodioHandle {
    fn drop(&mut self) {
        self.sink.stop();
    }
}

#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}

/// Backend without audio output. Handles keep a logical clock so position,
/// speed and completion behave like a real player.
#[derive(Debug, Default)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for NullBackend {
    fn prepare_job(&self, path: &Path) -> PrepareJob {
        let path = path.to_path_buf();
        Box::new(move || {
            let duration = estimate_duration(&path);
            Ok(PreparedTrack::new(path, duration))
        })
    }

    fn open(&mut self, prepared: PreparedTrack) -> Result<Box<dyn PlayerHandle>, PlaybackError> {
        Ok(Box::new(NullHandle::new(prepared.duration)))
    }

    fn name(&self) -> &str {
        "Null audio output"
    }
}

fn estimate_duration(path: &Path) -> Option<Duration> {
    let source = open_decoder(path).ok()?;
    source
        .total_duration()
        .filter(|duration| !duration.is_zero())
}

#[derive(Debug)]
pub struct NullHandle {
    playing: bool,
    started_at: Option<Instant>,
    position_offset: Duration,
    duration: Option<Duration>,
    speed: f32,
}

impl NullHandle {
    pub fn new(duration: Option<Duration>) -> Self {
        Self {
            playing: false,
            started_at: None,
            position_offset: Duration::ZERO,
            duration,
            speed: 1.0,
        }
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if self.playing
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed().mul_f32(self.speed));
        }
        if let Some(duration) = self.duration {
            return position.min(duration);
        }
        position
    }
}

impl PlayerHandle for NullHandle {
    fn start(&mut self) {
        if !self.playing {
            self.started_at = Some(Instant::now());
        }
        self.playing = true;
    }

    fn pause(&mut self) {
        self.position_offset = self.current_position();
        self.started_at = None;
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn seek(&mut self, position: Duration, mode: SeekMode) -> Result<(), PlaybackError> {
        let position = match mode {
            SeekMode::Exact => position,
            SeekMode::Closest => snap_to_granule(position),
        };
        self.position_offset = self
            .duration
            .map_or(position, |duration| position.min(duration));
        self.started_at = self.playing.then(Instant::now);
        Ok(())
    }

    fn set_speed(&mut self, speed: f32) -> bool {
        self.position_offset = self.current_position();
        if self.playing {
            self.started_at = Some(Instant::now());
        }
        self.speed = speed;
        true
    }

    fn position(&self) -> Duration {
        self.current_position()
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn is_finished(&self) -> bool {
        let Some(duration) = self.duration else {
            return false;
        };
        self.playing && self.current_position() >= duration
    }
}

fn snap_to_granule(position: Duration) -> Duration {
    let granule = SEEK_GRANULE.as_millis();
    let snapped = (position.as_millis() + granule / 2) / granule * granule;
    Duration::from_millis(u64::try_from(snapped).unwrap_or(u64::MAX))
}

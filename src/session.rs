//! Bridge between the engine and an external media session.
//!
//! The engine emits [`SessionSignal`]s with a [`SessionSnapshot`]; the bridge
//! publishes a [`NotificationState`]. Control strings coming back from the
//! session parse into [`SessionCommand`]s.

use crate::model::Track;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Play,
    Pause,
    Resume,
    Next,
    Prev,
    SeekTo(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseCommandError {
    #[error("unknown session command: {0:?}")]
    Unknown(String),
    #[error("invalid seek position: {0:?}")]
    InvalidSeek(String),
}

impl FromStr for SessionCommand {
    type Err = ParseCommandError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let mut parts = trimmed.split_whitespace();
        let verb = parts.next().unwrap_or_default().to_ascii_uppercase();
        let argument = parts.next();
        if parts.next().is_some() {
            return Err(ParseCommandError::Unknown(trimmed.to_string()));
        }

        match (verb.as_str(), argument) {
            ("PLAY", None) => Ok(Self::Play),
            ("PAUSE", None) => Ok(Self::Pause),
            ("RESUME", None) => Ok(Self::Resume),
            ("NEXT", None) => Ok(Self::Next),
            ("PREV", None) => Ok(Self::Prev),
            ("SEEK", Some(raw)) => raw
                .parse::<u64>()
                .map(Self::SeekTo)
                .map_err(|_| ParseCommandError::InvalidSeek(raw.to_string())),
            ("SEEK", None) => Err(ParseCommandError::InvalidSeek(String::new())),
            _ => Err(ParseCommandError::Unknown(trimmed.to_string())),
        }
    }
}

impl fmt::Display for SessionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Play => f.write_str("PLAY"),
            Self::Pause => f.write_str("PAUSE"),
            Self::Resume => f.write_str("RESUME"),
            Self::Next => f.write_str("NEXT"),
            Self::Prev => f.write_str("PREV"),
            Self::SeekTo(position_ms) => write!(f, "SEEK {position_ms}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    Play,
    Pause,
    Resume,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub track: Option<Track>,
    pub is_playing: bool,
    pub position_ms: u64,
    pub speed: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationAction {
    pub label: &'static str,
    pub command: SessionCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationState {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_ms: u64,
    pub is_playing: bool,
    pub position_ms: u64,
    pub rate: f32,
    pub art: String,
    pub actions: [NotificationAction; 3],
}

impl NotificationState {
    /// `None` when nothing is loaded.
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Option<Self> {
        let track = snapshot.track.as_ref()?;
        let toggle = if snapshot.is_playing {
            NotificationAction {
                label: "Pause",
                command: SessionCommand::Pause,
            }
        } else {
            NotificationAction {
                label: "Play",
                command: SessionCommand::Resume,
            }
        };

        Some(Self {
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album_name.clone(),
            duration_ms: track.duration_ms,
            is_playing: snapshot.is_playing,
            position_ms: snapshot.position_ms,
            rate: if snapshot.is_playing {
                snapshot.speed
            } else {
                0.0
            },
            art: track.art_locator(),
            actions: [
                NotificationAction {
                    label: "Previous",
                    command: SessionCommand::Prev,
                },
                toggle,
                NotificationAction {
                    label: "Next",
                    command: SessionCommand::Next,
                },
            ],
        })
    }
}

pub trait SessionBridge {
    fn signal(&mut self, signal: SessionSignal, snapshot: &SessionSnapshot);
}

/// Publishes notification state to the log.
#[derive(Debug, Default)]
pub struct LoggingBridge {
    last: Option<NotificationState>,
}

impl LoggingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_notification(&self) -> Option<&NotificationState> {
        self.last.as_ref()
    }
}

impl SessionBridge for LoggingBridge {
    fn signal(&mut self, signal: SessionSignal, snapshot: &SessionSnapshot) {
        self.last = NotificationState::from_snapshot(snapshot);
        match &self.last {
            Some(state) => info!(
                ?signal,
                title = %state.title,
                artist = %state.artist,
                position_ms = state.position_ms,
                rate = state.rate,
                "session updated"
            ),
            None => debug!(?signal, "session cleared"),
        }
    }
}

//! Per-stream connection state machine.
//!
//! ```text
//!  Connecting ──open ok──▶ Active ──timeout past threshold / EOF / error──▶ Stale
//!      │                     ▲                                              │
//!   open failed          open ok                                     backoff elapsed
//!      ▼                     │                                              ▼
//!  Reconnecting ◀────────────┴──────────────open failed──────────────── (open)
//!
//!  any state ──close()──▶ Closed
//! ```
//!
//! Transitions are exposed as `mark_*` methods taking an explicit `now` so the
//! timing rules can be exercised without I/O; [`StreamSession::poll`] drives
//! them from a real [`SourceConnector`].

use crate::{
    backoff::Backoff,
    frame::Frame,
    source::{FrameStream, ReadError, SourceConnector, SourceError},
};
use schema::StreamId;
use std::{
    fmt,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Active,
    Stale,
    Reconnecting,
    Closed,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Connecting => "connecting",
            StreamState::Active => "active",
            StreamState::Stale => "stale",
            StreamState::Reconnecting => "reconnecting",
            StreamState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Upper bound on a single `read_frame` call.
    pub frame_timeout: Duration,
    /// An active stream with no frame for longer than this is stale.
    pub stale_threshold: Duration,
    pub backoff: Backoff,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_millis(500),
            stale_threshold: Duration::from_secs(5),
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    NoFrameWithin(Duration),
    Eof,
    ReadFailed(String),
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::NoFrameWithin(threshold) => {
                write!(f, "no frame within {}ms", threshold.as_millis())
            }
            StaleReason::Eof => f.write_str("end of stream"),
            StaleReason::ReadFailed(reason) => write!(f, "read failed: {reason}"),
        }
    }
}

/// What a single [`StreamSession::poll`] did.
#[derive(Debug)]
pub enum SessionOutcome {
    Connected,
    ConnectFailed { attempt: u32, error: SourceError },
    Frame(Frame),
    /// Read timed out, but the stream is not stale yet.
    Missed,
    WentStale { reason: StaleReason },
    /// Reconnection is scheduled but not due.
    Waiting,
    Closed,
}

impl SessionOutcome {
    /// Whether the poll touched I/O. Used by the worker to decide if it may idle.
    pub fn did_work(&self) -> bool {
        !matches!(self, SessionOutcome::Waiting | SessionOutcome::Closed)
    }
}

pub struct StreamSession {
    stream_id: StreamId,
    source_uri: String,
    state: StreamState,
    last_frame_time: Option<Instant>,
    reconnect_attempts: u32,
    next_attempt_at: Instant,
    stream: Option<Box<dyn FrameStream>>,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("stream_id", &self.stream_id)
            .field("source_uri", &self.source_uri)
            .field("state", &self.state)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("connected", &self.stream.is_some())
            .finish()
    }
}

impl StreamSession {
    /// A new session in `Connecting`, due for its first attempt at `now`.
    pub fn new(stream_id: StreamId, source_uri: impl Into<String>, now: Instant) -> Self {
        Self {
            stream_id,
            source_uri: source_uri.into(),
            state: StreamState::Connecting,
            last_frame_time: None,
            reconnect_attempts: 0,
            next_attempt_at: now,
            stream: None,
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn source_uri(&self) -> &str {
        &self.source_uri
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn last_frame_time(&self) -> Option<Instant> {
        self.last_frame_time
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// When the next connection attempt is due, if one is pending.
    pub fn next_attempt_at(&self) -> Option<Instant> {
        match self.state {
            StreamState::Connecting | StreamState::Stale | StreamState::Reconnecting => {
                Some(self.next_attempt_at)
            }
            StreamState::Active | StreamState::Closed => None,
        }
    }

    /// Advance the session by one step.
    ///
    /// `now` decides whether a pending connection attempt is due; timestamps
    /// recorded after I/O use the clock at completion.
    pub fn poll(
        &mut self,
        connector: &dyn SourceConnector,
        policy: &SessionPolicy,
        now: Instant,
    ) -> SessionOutcome {
        match self.state {
            StreamState::Closed => SessionOutcome::Closed,
            StreamState::Connecting | StreamState::Stale | StreamState::Reconnecting => {
                if now < self.next_attempt_at {
                    return SessionOutcome::Waiting;
                }
                match connector.open(&self.source_uri) {
                    Ok(stream) => {
                        self.stream = Some(stream);
                        self.mark_connected(Instant::now());
                        SessionOutcome::Connected
                    }
                    Err(error) => {
                        let attempt = self.mark_connect_failed(Instant::now(), &policy.backoff);
                        SessionOutcome::ConnectFailed { attempt, error }
                    }
                }
            }
            StreamState::Active => self.read(policy),
        }
    }

    fn read(&mut self, policy: &SessionPolicy) -> SessionOutcome {
        let Some(stream) = self.stream.as_mut() else {
            let reason = StaleReason::ReadFailed("no open connection".to_string());
            self.mark_stale(Instant::now(), &policy.backoff);
            return SessionOutcome::WentStale { reason };
        };

        let result = stream.read_frame(policy.frame_timeout);
        let now = Instant::now();

        let reason = match result {
            Ok(frame) => {
                self.mark_frame(now);
                return SessionOutcome::Frame(frame);
            }
            Err(ReadError::Timeout) => {
                if !self.is_stale_at(now, policy.stale_threshold) {
                    return SessionOutcome::Missed;
                }
                StaleReason::NoFrameWithin(policy.stale_threshold)
            }
            Err(ReadError::Eof) => StaleReason::Eof,
            Err(ReadError::Failed(reason)) => StaleReason::ReadFailed(reason),
        };

        self.mark_stale(now, &policy.backoff);
        SessionOutcome::WentStale { reason }
    }

    pub fn mark_connected(&mut self, now: Instant) {
        self.state = StreamState::Active;
        self.reconnect_attempts = 0;
        self.last_frame_time = Some(now);
    }

    /// Record a failed open. Returns the attempt number (1-based).
    pub fn mark_connect_failed(&mut self, now: Instant, backoff: &Backoff) -> u32 {
        self.release_stream();
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.state = StreamState::Reconnecting;
        self.next_attempt_at = now + backoff.delay_for_attempt(self.reconnect_attempts - 1);
        self.reconnect_attempts
    }

    pub fn mark_frame(&mut self, now: Instant) {
        self.last_frame_time = Some(now);
    }

    /// Drop the connection and schedule a reconnect after the backoff delay.
    pub fn mark_stale(&mut self, now: Instant, backoff: &Backoff) {
        self.release_stream();
        self.state = StreamState::Stale;
        self.next_attempt_at = now + backoff.delay_for_attempt(self.reconnect_attempts);
    }

    pub fn is_stale_at(&self, now: Instant, threshold: Duration) -> bool {
        self.state == StreamState::Active
            && self
                .last_frame_time
                .is_some_and(|t| now.saturating_duration_since(t) > threshold)
    }

    /// Release the connection and move to `Closed`. Returns `false` if the
    /// session was already closed.
    pub fn close(&mut self) -> bool {
        if self.state == StreamState::Closed {
            return false;
        }
        self.release_stream();
        self.state = StreamState::Closed;
        true
    }

    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.release_stream();
    }
}

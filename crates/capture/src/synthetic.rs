//! Synthetic frame source for `stub://` URIs.
//!
//! `stub://<name>[?fps=N][&frames=M]` yields blank frames paced to `fps`
//! (default 10, accepted between 0.01 and 1000). With `frames`, the stream
//! reports end-of-stream after `M` frames, which exercises the
//! stale/reconnect path. Every other scheme is refused: no network transport
//! is compiled into this crate.

use crate::{
    frame::Frame,
    source::{FrameStream, ReadError, SourceConnector, SourceError},
};
use std::{
    thread,
    time::{Duration, Instant},
};
use url::Url;

const STUB_SCHEME: &str = "stub";
const DEFAULT_FPS: f64 = 10.0;
const FPS_RANGE: std::ops::RangeInclusive<f64> = 0.01..=1000.0;

#[derive(Debug, Clone, Copy)]
pub struct SyntheticConnector {
    width: u32,
    height: u32,
}

impl Default for SyntheticConnector {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl SyntheticConnector {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl SourceConnector for SyntheticConnector {
    fn open(&self, source_uri: &str) -> Result<Box<dyn FrameStream>, SourceError> {
        let refuse = |reason: String| SourceError::Connect {
            uri: source_uri.to_string(),
            reason,
        };

        let url = Url::parse(source_uri).map_err(|e| refuse(e.to_string()))?;
        if url.scheme() != STUB_SCHEME {
            return Err(refuse(format!(
                "unsupported scheme `{}` (only `{STUB_SCHEME}://` is available)",
                url.scheme()
            )));
        }

        let mut fps = DEFAULT_FPS;
        let mut frame_limit = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "fps" => {
                    fps = value
                        .parse::<f64>()
                        .ok()
                        .filter(|f| FPS_RANGE.contains(f))
                        .ok_or_else(|| {
                            refuse(format!(
                                "invalid fps `{value}` (expected {}..={})",
                                FPS_RANGE.start(),
                                FPS_RANGE.end()
                            ))
                        })?;
                }
                "frames" => {
                    frame_limit = Some(
                        value
                            .parse::<u64>()
                            .map_err(|_| refuse(format!("invalid frames `{value}`")))?,
                    );
                }
                other => tracing::debug!(key = other, "Ignoring unknown stub parameter"),
            }
        }

        let interval = Duration::try_from_secs_f64(1.0 / fps)
            .map_err(|e| refuse(format!("invalid fps `{fps}`: {e}")))?;
        tracing::debug!(uri = source_uri, fps, ?frame_limit, "Opened synthetic stream");

        Ok(Box::new(SyntheticStream {
            width: self.width,
            height: self.height,
            interval,
            next_frame_at: Instant::now(),
            sequence: 0,
            frame_limit,
        }))
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    interval: Duration,
    next_frame_at: Instant,
    sequence: u64,
    frame_limit: Option<u64>,
}

impl FrameStream for SyntheticStream {
    fn read_frame(&mut self, timeout: Duration) -> Result<Frame, ReadError> {
        if self.frame_limit.is_some_and(|limit| self.sequence >= limit) {
            return Err(ReadError::Eof);
        }

        let now = Instant::now();
        let wait = self.next_frame_at.saturating_duration_since(now);
        if wait > timeout {
            thread::sleep(timeout);
            return Err(ReadError::Timeout);
        }
        thread::sleep(wait);

        self.sequence += 1;
        // Do not burst to catch up after a slow consumer.
        self.next_frame_at = self
            .next_frame_at
            .checked_add(self.interval)
            .map_or(now, |next| next.max(now));
        Ok(Frame::blank(self.width, self.height, self.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(uri: &str) -> Result<Box<dyn FrameStream>, SourceError> {
        SyntheticConnector::new(8, 6).open(uri)
    }

    #[test]
    fn refuses_non_stub_schemes() {
        let err = open("rtsp://172.23.23.15:8554/mystream").err().unwrap();
        assert!(err.to_string().contains("unsupported scheme `rtsp`"));
    }

    #[test]
    fn refuses_garbage_uris() {
        assert!(open("not a uri").is_err());
        assert!(open("stub://cam?fps=0").is_err());
        assert!(open("stub://cam?fps=abc").is_err());
        assert!(open("stub://cam?frames=-1").is_err());
    }

    #[test]
    fn refuses_out_of_range_fps() {
        for uri in [
            "stub://cam?fps=1e-300",
            "stub://cam?fps=1e-19",
            "stub://cam?fps=0.001",
            "stub://cam?fps=1e9",
            "stub://cam?fps=-5",
            "stub://cam?fps=NaN",
            "stub://cam?fps=inf",
        ] {
            let err = open(uri).err().unwrap();
            assert!(err.to_string().contains("invalid fps"), "{uri}: {err}");
        }
    }

    #[test]
    fn slowest_accepted_fps_reads_without_overflow() {
        let mut stream = open("stub://cam?fps=0.01").unwrap();
        assert!(stream.read_frame(Duration::from_millis(1)).is_ok());
        assert_eq!(
            stream.read_frame(Duration::from_millis(1)).err(),
            Some(ReadError::Timeout)
        );
    }

    #[test]
    fn produces_sized_sequenced_frames() {
        let mut stream = open("stub://cam1?fps=1000").unwrap();
        let first = stream.read_frame(Duration::from_secs(1)).unwrap();
        let second = stream.read_frame(Duration::from_secs(1)).unwrap();

        assert_eq!((first.width, first.height), (8, 6));
        assert_eq!(first.data.len(), 8 * 6 * 3);
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
    }

    #[test]
    fn slow_stream_times_out_within_bound() {
        let mut stream = open("stub://cam1?fps=0.5").unwrap();
        stream.read_frame(Duration::from_secs(1)).unwrap();

        let begun = Instant::now();
        let result = stream.read_frame(Duration::from_millis(20));
        assert_eq!(result.err(), Some(ReadError::Timeout));
        assert!(begun.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn frame_limit_ends_with_eof() {
        let mut stream = open("stub://cam1?fps=1000&frames=2").unwrap();
        assert!(stream.read_frame(Duration::from_secs(1)).is_ok());
        assert!(stream.read_frame(Duration::from_secs(1)).is_ok());
        assert_eq!(
            stream.read_frame(Duration::from_secs(1)).err(),
            Some(ReadError::Eof)
        );
    }
}

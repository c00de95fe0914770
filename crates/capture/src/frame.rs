use std::time::Instant;

/// A decoded frame as handed to the detector.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB, `width * height * 3` bytes.
    pub data: Vec<u8>,
    /// Per-connection frame counter, starting at 1.
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn blank(width: u32, height: u32, sequence: u64) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; (width as usize) * (height as usize) * 3],
            sequence,
            captured_at: Instant::now(),
        }
    }
}

use schema::Detection;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_MAX_DETECTIONS: usize = 300;

/// Normalizes raw model output before it is published.
///
/// - drops detections below `confidence_threshold` (and NaN confidences)
/// - clamps confidence to `[0, 1]` and boxes to the frame
/// - keeps model order, truncated to `max_detections`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostFilter {
    pub confidence_threshold: f32,
    pub max_detections: usize,
}

impl Default for PostFilter {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
        }
    }
}

impl PostFilter {
    pub fn new(confidence_threshold: f32, max_detections: usize) -> Self {
        Self {
            confidence_threshold,
            max_detections,
        }
    }

    pub fn apply(&self, detections: Vec<Detection>, width: u32, height: u32) -> Vec<Detection> {
        let (w, h) = (width as f32, height as f32);
        detections
            .into_iter()
            .filter(|d| d.confidence >= self.confidence_threshold)
            .take(self.max_detections)
            .map(|d| {
                let [x1, y1, x2, y2] = d.bbox;
                Detection {
                    bbox: [
                        x1.clamp(0.0, w),
                        y1.clamp(0.0, h),
                        x2.clamp(0.0, w),
                        y2.clamp(0.0, h),
                    ],
                    class_id: d.class_id,
                    confidence: d.confidence.clamp(0.0, 1.0),
                }
            })
            .collect()
    }
}

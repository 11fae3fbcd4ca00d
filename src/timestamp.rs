//! Per-stream frame validation and rolling timestamp reconstruction.

use crate::config::DEFAULT_TIMESTAMP_SCALE;
use crate::profile::RequestMapping;

/// Extracts timing information from raw frames of one stream.
///
/// Implementations keep per-stream state and are not meant to be shared
/// between concurrently delivering streams.
pub trait FrameTimestampReader: Send {
    /// Whether the raw buffer carries a usable image.
    fn validate_frame(&self, mode: &RequestMapping, frame: &[u8]) -> bool;

    fn get_frame_timestamp(&mut self, mode: &RequestMapping, frame: &[u8]) -> f64;

    fn get_frame_counter(&mut self, mode: &RequestMapping, frame: &[u8]) -> u64;
}

/// Unwraps the 32-bit rolling tick counter carried in the first four bytes of
/// each frame into a monotonically accumulated total.
#[derive(Debug)]
pub struct RollingTimestampReader {
    started: bool,
    total: i64,
    last_timestamp: u32,
    counter: u64,
    scale: f64,
}

impl Default for RollingTimestampReader {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP_SCALE)
    }
}

impl RollingTimestampReader {
    pub fn new(scale: f64) -> Self {
        Self {
            started: false,
            total: 0,
            last_timestamp: 0,
            counter: 0,
            scale,
        }
    }

    /// Accumulated ticks since the first frame.
    pub fn total_ticks(&self) -> i64 {
        self.total
    }

    /// Fold a raw counter value into the running total and return the new total.
    pub fn accumulate(&mut self, rolling: i32) -> i64 {
        let rolling = rolling as u32;
        if !self.started {
            self.last_timestamp = rolling;
            self.started = true;
        }

        // Unsigned wrapping subtraction reinterpreted as signed yields the
        // shortest signed distance across the 32-bit boundary.
        let delta = rolling.wrapping_sub(self.last_timestamp) as i32;
        self.last_timestamp = rolling;
        self.total += i64::from(delta);
        self.total
    }

    fn read_rolling(frame: &[u8]) -> Option<i32> {
        let bytes: [u8; 4] = frame.get(..4)?.try_into().ok()?;
        Some(i32::from_le_bytes(bytes))
    }
}

impl FrameTimestampReader for RollingTimestampReader {
    fn validate_frame(&self, mode: &RequestMapping, frame: &[u8]) -> bool {
        let size = mode.image_size().min(frame.len());

        // Some sensors emit all-zero frames shortly after stream start
        if frame[..size].iter().any(|&b| b != 0) {
            return true;
        }
        log::trace!("{:?} stream produced an empty frame", mode.stream());
        false
    }

    fn get_frame_timestamp(&mut self, _mode: &RequestMapping, frame: &[u8]) -> f64 {
        let total = match Self::read_rolling(frame) {
            Some(rolling) => self.accumulate(rolling),
            None => self.total,
        };
        total as f64 / self.scale
    }

    fn get_frame_counter(&mut self, _mode: &RequestMapping, _frame: &[u8]) -> u64 {
        self.counter += 1;
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{fourcc, size_16bpp, size_8bpp, DeviceProfile, NativeFormat};
    use crate::types::{Format, StreamKind, StreamProfile, StreamSet};

    fn mapping(width: u32, height: u32) -> RequestMapping {
        RequestMapping {
            request: StreamProfile::any(StreamKind::Depth),
            format: NativeFormat::new(fourcc(b"Z16 "), Format::Z16, StreamSet::DEPTH, size_16bpp),
            profile: DeviceProfile::new(width, height, 30, fourcc(b"Z16 ")),
        }
    }

    fn frame_with_counter(rolling: i32, len: usize) -> Vec<u8> {
        let mut frame = vec![0u8; len];
        frame[..4].copy_from_slice(&rolling.to_le_bytes());
        frame
    }

    #[test]
    fn test_validate_rejects_all_zero() {
        let mode = mapping(4, 2);
        let reader = RollingTimestampReader::default();
        assert!(!reader.validate_frame(&mode, &[0u8; 16]));

        let mut frame = [0u8; 16];
        frame[15] = 1;
        assert!(reader.validate_frame(&mode, &frame));
    }

    #[test]
    fn test_validate_only_scans_image_region() {
        let mode = mapping(4, 2);
        let reader = RollingTimestampReader::default();
        let mut frame = [0u8; 32];
        frame[20] = 0xFF;
        assert!(!reader.validate_frame(&mode, &frame));
    }

    #[test]
    fn test_validate_short_buffer_by_content() {
        let mode = RequestMapping {
            request: StreamProfile::any(StreamKind::Infrared),
            format: NativeFormat::new(fourcc(b"GREY"), Format::Y8, StreamSet::INFRARED, size_8bpp),
            profile: DeviceProfile::new(3, 1, 30, fourcc(b"GREY")),
        };
        let mut reader = RollingTimestampReader::default();
        assert!(reader.validate_frame(&mode, &[1, 2, 3]));
        assert!(!reader.validate_frame(&mode, &[0, 0, 0]));
        assert!(!reader.validate_frame(&mode, &[]));

        // No rolling counter to read: the total stays put
        assert_eq!(reader.get_frame_timestamp(&mode, &[1, 2, 3]), 0.0);
    }

    #[test]
    fn test_first_frame_is_zero() {
        let mode = mapping(4, 2);
        let mut reader = RollingTimestampReader::default();
        let ts = reader.get_frame_timestamp(&mode, &frame_with_counter(123_456, 16));
        assert_eq!(ts, 0.0);
    }

    #[test]
    fn test_wraparound_unwrap() {
        let mode = mapping(4, 2);
        let scale = 100_000.0;
        let mut reader = RollingTimestampReader::new(scale);
        let raw = [1000, 1050, 1080, -2_147_483_600];

        let stamps: Vec<f64> = raw
            .iter()
            .map(|r| reader.get_frame_timestamp(&mode, &frame_with_counter(*r, 16)))
            .collect();

        assert!(stamps.windows(2).all(|w| w[1] >= w[0]));

        for (i, pair) in raw.windows(2).enumerate() {
            let true_delta = (i64::from(pair[1]) - i64::from(pair[0])).rem_euclid(1 << 32);
            let step = stamps[i + 1] - stamps[i];
            assert!((step - true_delta as f64 / scale).abs() < 1e-6);
        }
        assert_eq!(reader.total_ticks(), 80 + 2_147_482_616);
    }

    #[test]
    fn test_counter_wraps_past_u32_max() {
        let mut reader = RollingTimestampReader::new(1.0);
        reader.accumulate(i32::MAX - 10);
        assert_eq!(reader.accumulate(i32::MIN + 9), 20);
        reader.accumulate(-1);
        assert_eq!(reader.accumulate(4), 20 + (-1i64 - i64::from(i32::MIN + 9)) + 5);
    }

    #[test]
    fn test_frame_counter_strictly_increasing() {
        let mode = mapping(4, 2);
        let mut reader = RollingTimestampReader::default();
        let counters: Vec<u64> = (0..5)
            .map(|_| reader.get_frame_counter(&mode, &[]))
            .collect();
        assert_eq!(counters, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_new_reader_has_no_stale_state() {
        let mode = mapping(4, 2);
        let mut reader = RollingTimestampReader::default();
        reader.get_frame_timestamp(&mode, &frame_with_counter(10, 16));
        reader.get_frame_timestamp(&mode, &frame_with_counter(500_010, 16));

        let mut fresh = RollingTimestampReader::default();
        assert_eq!(fresh.get_frame_timestamp(&mode, &frame_with_counter(900, 16)), 0.0);
    }
}

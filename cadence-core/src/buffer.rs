//! Timestamped byte buffers
//!
//! Decoded audio travels from the demux worker to the audio output worker
//! as `TimestampedBuffer`s: 16-bit interleaved PCM plus the presentation
//! timestamp of its first sample.

/// An owned byte buffer tagged with a presentation timestamp (microseconds).
#[derive(Debug, Default)]
pub struct TimestampedBuffer {
    data: Option<Vec<u8>>,
    pts_us: i64,
    size: usize,
}

impl TimestampedBuffer {
    pub fn new(data: Vec<u8>, pts_us: i64) -> Self {
        let size = data.len();
        Self {
            data: Some(data),
            pts_us,
            size,
        }
    }

    /// Presentation timestamp in microseconds
    pub fn pts_us(&self) -> i64 {
        self.pts_us
    }

    /// Number of payload bytes (0 once released)
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn is_released(&self) -> bool {
        self.data.is_none()
    }

    /// Take the payload out, leaving the buffer released.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        self.size = 0;
        self.data.take()
    }

    /// Free the payload. The timestamp is kept for diagnostics.
    pub fn clear(&mut self) {
        self.data = None;
        self.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_releases_payload() {
        let mut buf = TimestampedBuffer::new(vec![1, 2, 3, 4], 40_000);
        assert_eq!(buf.size(), 4);
        assert_eq!(buf.data(), Some(&[1u8, 2, 3, 4][..]));

        buf.clear();
        assert!(buf.is_released());
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.pts_us(), 40_000);
    }

    #[test]
    fn test_take_moves_ownership() {
        let mut buf = TimestampedBuffer::new(vec![9; 16], 0);
        let data = buf.take().unwrap();
        assert_eq!(data.len(), 16);
        assert!(buf.take().is_none());
        assert!(buf.is_released());
    }
}

//! Frame type and pixel helpers: YUYV/Y16 conversion, sampled luma statistics.

/// A captured grayscale camera frame.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    /// Driver sequence number; repeats when the feed is frozen.
    pub sequence: u32,
}

impl Frame {
    /// True when the buffer holds at least `width * height` pixels.
    pub fn is_complete(&self) -> bool {
        self.width > 0
            && self.height > 0
            && (self.width as usize)
                .checked_mul(self.height as usize)
                .is_some_and(|pixels| self.data.len() >= pixels)
    }
}

/// Mean and variance of luma over a downsampled grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LumaStats {
    pub mean: f32,
    pub variance: f32,
    pub samples: usize,
}

/// Compute luma statistics over at most `grid × grid` evenly spaced pixels.
///
/// Returns `None` when the buffer is shorter than `width * height` or empty.
pub fn sample_luma(gray: &[u8], width: u32, height: u32, grid: u32) -> Option<LumaStats> {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || gray.len() < w * h {
        return None;
    }

    let grid = grid.max(1) as usize;
    let step_x = (w / grid).max(1);
    let step_y = (h / grid).max(1);

    let mut sum = 0u64;
    let mut sum_sq = 0u64;
    let mut count = 0usize;
    for y in (step_y / 2..h).step_by(step_y) {
        let row = &gray[y * w..(y + 1) * w];
        for x in (step_x / 2..w).step_by(step_x) {
            let p = row[x] as u64;
            sum += p;
            sum_sq += p * p;
            count += 1;
        }
    }

    if count == 0 {
        return None;
    }
    let mean = sum as f64 / count as f64;
    let variance = (sum_sq as f64 / count as f64 - mean * mean).max(0.0);
    Some(LumaStats { mean: mean as f32, variance: variance as f32, samples: count })
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = two_byte_len(width, height);
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: yuyv.len() });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert 16-bit little-endian grayscale to 8-bit by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = two_byte_len(width, height);
    if y16.len() < expected {
        return Err(FrameError::InvalidLength { expected, actual: y16.len() });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// Byte length of a 2-bytes-per-pixel buffer, saturating instead of wrapping.
fn two_byte_len(width: u32, height: u32) -> usize {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(2))
        .unwrap_or(usize::MAX)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// A block of PCM samples as delivered by the audio track
///
/// Multi-channel audio is interleaved frame by frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    /// Convert signed 16-bit PCM to floats in [-1, 1)
    pub fn from_i16(samples: &[i16], sample_rate: u32, channels: u16) -> Self {
        let samples = samples.iter().map(|&s| f32::from(s) / 32768.0).collect();
        Self::new(samples, sample_rate, channels)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of sample frames (one sample per channel each)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Down-mix to a single channel by averaging each frame
    ///
    /// A trailing partial frame is ignored.
    pub fn to_mono(&self) -> Vec<f32> {
        let channels = usize::from(self.channels.max(1));
        if channels == 1 {
            return self.samples.clone();
        }

        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Linear-interpolation resampler
///
/// The output length is `len * dst_rate / src_rate`, never less than one
/// sample for non-empty input.
pub fn resample_linear(input: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if input.is_empty() || src_rate == dst_rate || dst_rate == 0 {
        return input.to_vec();
    }

    let src_rate = src_rate.max(1);
    let target_len =
        ((input.len() as u64 * u64::from(dst_rate)) / u64::from(src_rate)).max(1) as usize;
    let step = f64::from(src_rate) / f64::from(dst_rate);
    let last = input.len() - 1;

    (0..target_len)
        .map(|i| {
            let position = i as f64 * step;
            let index = (position.floor() as usize).min(last);
            let frac = (position - index as f64).clamp(0.0, 1.0) as f32;
            let a = input[index];
            let b = input[(index + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

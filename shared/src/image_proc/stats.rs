//! Pixel statistics over a frame
//!
//! Min, max and mean come from one pass over the samples; variance takes a
//! second pass around the mean so large 16-bit frames stay numerically stable.

use thiserror::Error;

use super::frame::PixelBuffer;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("No data provided (empty buffer)")]
    NoData,
}

/// Summary statistics of every sample in a buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelStats {
    pub min: u16,
    pub max: u16,
    pub mean: f64,
    /// Population variance
    pub variance: f64,
    pub count: usize,
}

impl PixelStats {
    pub fn from_buffer(buffer: &PixelBuffer) -> Result<Self, StatsError> {
        match buffer {
            PixelBuffer::Mono(a) => Self::from_samples(a.iter().copied()),
            PixelBuffer::Multi(a) => Self::from_samples(a.iter().copied()),
        }
    }

    pub fn from_samples<I>(samples: I) -> Result<Self, StatsError>
    where
        I: Iterator<Item = u16> + Clone,
    {
        let mut min = u16::MAX;
        let mut max = u16::MIN;
        let mut sum = 0.0;
        let mut count = 0usize;

        for v in samples.clone() {
            min = min.min(v);
            max = max.max(v);
            sum += f64::from(v);
            count += 1;
        }

        if count == 0 {
            return Err(StatsError::NoData);
        }

        let mean = sum / count as f64;
        let variance = samples
            .map(|v| {
                let d = f64::from(v) - mean;
                d * d
            })
            .sum::<f64>()
            / count as f64;

        Ok(Self {
            min,
            max,
            mean,
            variance,
            count,
        })
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

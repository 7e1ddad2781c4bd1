//! Best-focus selection over scored frames

use serde::{Deserialize, Serialize};

use super::metric::FocusMetricRecord;
use crate::error::{MicroscopeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FocusStrategy {
    /// Highest score wins (contrast imaging)
    #[default]
    Maximize,
    /// Lowest score wins (modalities where focus suppresses signal)
    Minimize,
}

impl FocusStrategy {
    /// Record with the extremal score; the earliest one on ties
    ///
    /// # Errors
    /// * `NoValidFocus` - `records` is empty
    pub fn select<'a>(&self, records: &'a [FocusMetricRecord]) -> Result<&'a FocusMetricRecord> {
        let mut best: Option<&FocusMetricRecord> = None;
        for record in records {
            let better = match best {
                None => true,
                Some(current) => match self {
                    FocusStrategy::Maximize => record.score > current.score,
                    FocusStrategy::Minimize => record.score < current.score,
                },
            };
            if better {
                best = Some(record);
            }
        }
        best.ok_or(MicroscopeError::NoValidFocus { frames: 0 })
    }

    /// Focus-axis position of the selected record
    pub fn select_position(&self, records: &[FocusMetricRecord]) -> Result<f64> {
        self.select(records).map(|r| r.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn records(scores: &[f64]) -> Vec<FocusMetricRecord> {
        scores
            .iter()
            .enumerate()
            .map(|(i, &score)| FocusMetricRecord {
                position: 1000.0 + i as f64,
                score,
                index: i,
            })
            .collect()
    }

    #[test]
    fn test_bench_sweep_maximum() {
        let r = records(&[2.0, 3.0, 5.0, 9.0, 4.0, 2.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        assert_eq!(FocusStrategy::Maximize.select_position(&r).unwrap(), 1003.0);
    }

    #[test]
    fn test_minimize_finds_minimum() {
        let r = records(&[4.0, 3.0, 0.5, 2.0]);
        let best = FocusStrategy::Minimize.select(&r).unwrap();
        assert_eq!(best.index, 2);
    }

    #[test]
    fn test_ties_resolve_to_earliest() {
        let r = records(&[1.0, 7.0, 3.0, 7.0]);
        assert_eq!(FocusStrategy::Maximize.select(&r).unwrap().index, 1);

        let r = records(&[5.0, 1.0, 1.0, 9.0]);
        assert_eq!(FocusStrategy::Minimize.select(&r).unwrap().index, 1);

        let flat = records(&[1.0, 1.0, 1.0, 1.0, 1.0]);
        assert_eq!(FocusStrategy::Maximize.select(&flat).unwrap().index, 0);
        assert_eq!(FocusStrategy::Minimize.select(&flat).unwrap().index, 0);
    }

    #[test]
    fn test_empty_records_fail() {
        assert_eq!(
            FocusStrategy::Maximize.select(&[]).unwrap_err(),
            MicroscopeError::NoValidFocus { frames: 0 }
        );
        assert!(FocusStrategy::Minimize.select_position(&[]).is_err());
    }

    #[test]
    fn test_unique_extremum_found_anywhere() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..50 {
            let n = rng.random_range(1..30usize);
            let mut scores: Vec<f64> = (0..n).map(|i| i as f64).collect();
            scores.shuffle(&mut rng);
            let r = records(&scores);

            let max_index = scores.iter().position(|&s| s == (n - 1) as f64).unwrap();
            let min_index = scores.iter().position(|&s| s == 0.0).unwrap();
            assert_eq!(FocusStrategy::Maximize.select(&r).unwrap().index, max_index);
            assert_eq!(FocusStrategy::Minimize.select(&r).unwrap().index, min_index);
        }
    }
}

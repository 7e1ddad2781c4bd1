//! Calibration move plans

use serde::{Deserialize, Serialize};

/// Stage deltas commanded from the calibration origin, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementPlan {
    pub moves: Vec<(f64, f64)>,
}

impl MovementPlan {
    pub fn new(moves: Vec<(f64, f64)>) -> Self {
        Self { moves }
    }

    /// For each amplitude, one pure-x move then one pure-y move
    ///
    /// `axis_steps(&[10.0, 20.0])` gives `[(10,0), (0,10), (20,0), (0,20)]`.
    pub fn axis_steps(amplitudes: &[f64]) -> Self {
        let moves = amplitudes
            .iter()
            .flat_map(|&a| [(a, 0.0), (0.0, a)])
            .collect();
        Self { moves }
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

impl From<Vec<(f64, f64)>> for MovementPlan {
    fn from(moves: Vec<(f64, f64)>) -> Self {
        Self::new(moves)
    }
}

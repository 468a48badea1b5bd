//! Constant-velocity Kalman filter over bounding boxes.
//!
//! State is `[x, y, s, r, vx, vy, vs]`: box centre, area, aspect ratio and
//! the velocities of centre and area. The aspect ratio has no velocity term.
//! Measurements observe `[x, y, s, r]` directly.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::detection::BBox;
use crate::internal::kalman::KalmanFilter;

/// State dimension.
pub const DIM_X: usize = 7;
/// Measurement dimension.
pub const DIM_Z: usize = 4;

/// Covariance magnitudes of the box filter.
///
/// Defaults trust position and area measurements more than the unobserved
/// velocities:
/// * `measurement`: R diagonal over `(x, y, s, r)` = \[1, 1, 10, 10\]
/// * `initial_covariance`: P diagonal = \[10, 10, 10, 10, 1e4, 1e4, 1e4\]
/// * `process`: Q diagonal over `(x, y, s, r, vx, vy, vs)` =
///   \[1, 1, 1, 1, 0.01, 0.01, 0.0001\]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxFilterNoise {
    pub measurement: [f64; DIM_Z],
    pub initial_covariance: [f64; DIM_X],
    pub process: [f64; DIM_X],
}

impl Default for BoxFilterNoise {
    fn default() -> Self {
        Self {
            measurement: [1.0, 1.0, 10.0, 10.0],
            initial_covariance: [10.0, 10.0, 10.0, 10.0, 1e4, 1e4, 1e4],
            process: [1.0, 1.0, 1.0, 1.0, 0.01, 0.01, 0.0001],
        }
    }
}

impl BoxFilterNoise {
    /// Every variance must be finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.measurement
            .iter()
            .chain(self.initial_covariance.iter())
            .chain(self.process.iter())
            .all(|v| v.is_finite() && *v > 0.0)
    }
}

/// Kalman filter estimating one box.
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    kf: KalmanFilter,
}

impl KalmanBoxFilter {
    /// Initialize from a box with zero velocity.
    pub fn new(bbox: &BBox, noise: &BoxFilterNoise) -> Self {
        let mut kf = KalmanFilter::new(DIM_X, DIM_Z);

        // Constant velocity for x, y, s; r is held constant
        kf.f = DMatrix::identity(DIM_X, DIM_X);
        for i in 0..3 {
            kf.f[(i, DIM_Z + i)] = 1.0;
        }

        kf.r = DMatrix::from_diagonal(&DVector::from_row_slice(&noise.measurement));
        kf.p = DMatrix::from_diagonal(&DVector::from_row_slice(&noise.initial_covariance));
        kf.q = DMatrix::from_diagonal(&DVector::from_row_slice(&noise.process));

        let z = bbox.to_z();
        for (i, v) in z.iter().enumerate() {
            kf.x[i] = *v;
        }

        Self { kf }
    }

    /// Advance one frame and return the predicted box.
    ///
    /// A scale velocity that would drive the area to zero or below is
    /// discarded before predicting.
    pub fn predict(&mut self) -> BBox {
        if self.kf.x[2] + self.kf.x[6] <= 0.0 {
            self.kf.x[6] = 0.0;
        }
        self.kf.predict();
        self.bbox()
    }

    /// Correct the estimate with a measured box.
    ///
    /// Returns `false` if the correction could not be applied.
    pub fn update(&mut self, bbox: &BBox) -> bool {
        let z = DVector::from_row_slice(&bbox.to_z());
        self.kf.update(&z)
    }

    /// Current estimate as corner coordinates.
    pub fn bbox(&self) -> BBox {
        let x = &self.kf.x;
        BBox::from_z(x[0], x[1], x[2], x[3])
    }

    /// Full state vector `[x, y, s, r, vx, vy, vs]`.
    pub fn state(&self) -> &DVector<f64> {
        &self.kf.x
    }

    /// State covariance.
    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.kf.p
    }

    /// Whether every state component is finite.
    pub fn is_finite(&self) -> bool {
        self.kf.x.iter().all(|v| v.is_finite())
    }

    #[cfg(test)]
    pub(crate) fn set_state_component(&mut self, index: usize, value: f64) {
        self.kf.x[index] = value;
    }
}

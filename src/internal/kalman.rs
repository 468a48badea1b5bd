//! Linear Kalman filter over dynamically sized `nalgebra` matrices.
//!
//! Standard predict/update equations with configurable transition,
//! measurement and noise matrices. The box filter in `crate::filter` builds
//! its constant-velocity model on top of this.

use nalgebra::{DMatrix, DVector};

/// Standard linear Kalman filter.
#[derive(Clone, Debug)]
pub struct KalmanFilter {
    /// State dimension
    pub dim_x: usize,
    /// Measurement dimension
    pub dim_z: usize,
    /// State vector
    pub x: DVector<f64>,
    /// State covariance matrix
    pub p: DMatrix<f64>,
    /// State transition matrix
    pub f: DMatrix<f64>,
    /// Measurement matrix
    pub h: DMatrix<f64>,
    /// Measurement noise covariance
    pub r: DMatrix<f64>,
    /// Process noise covariance
    pub q: DMatrix<f64>,
}

impl KalmanFilter {
    /// Create a new Kalman filter with identity matrices.
    ///
    /// # Arguments
    /// * `dim_x` - State dimension
    /// * `dim_z` - Measurement dimension
    pub fn new(dim_x: usize, dim_z: usize) -> Self {
        // H observes the leading dim_z state components
        let mut h = DMatrix::zeros(dim_z, dim_x);
        for i in 0..dim_z.min(dim_x) {
            h[(i, i)] = 1.0;
        }

        Self {
            dim_x,
            dim_z,
            x: DVector::zeros(dim_x),
            p: DMatrix::identity(dim_x, dim_x),
            f: DMatrix::identity(dim_x, dim_x),
            h,
            r: DMatrix::identity(dim_z, dim_z),
            q: DMatrix::identity(dim_x, dim_x),
        }
    }

    /// Advance the state one step: `x = F x`, `P = F P F^T + Q`.
    pub fn predict(&mut self) {
        self.x = &self.f * &self.x;
        self.p = &self.f * &self.p * self.f.transpose() + &self.q;
    }

    /// Correct the state with a measurement.
    ///
    /// Returns `false` and leaves the state untouched when the innovation
    /// covariance cannot be inverted.
    pub fn update(&mut self, z: &DVector<f64>) -> bool {
        // y = z - H x
        let y = z - &self.h * &self.x;

        // S = H P H^T + R
        let s = &self.h * &self.p * self.h.transpose() + &self.r;
        let Some(si) = s.try_inverse() else {
            return false;
        };

        // K = P H^T S^-1
        let k = &self.p * self.h.transpose() * si;

        self.x += &k * y;

        let i = DMatrix::<f64>::identity(self.dim_x, self.dim_x);
        self.p = (i - &k * &self.h) * &self.p;
        true
    }
}

//! State estimation for tracked boxes.
//!
//! `KalmanBoxFilter` is the per-track constant-velocity estimator;
//! `BoxFilterNoise` holds its covariance magnitudes as configuration.

mod kalman_box;

pub use kalman_box::{BoxFilterNoise, KalmanBoxFilter, DIM_X, DIM_Z};

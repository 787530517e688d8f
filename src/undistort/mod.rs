//! Lens distortion correction.
//!
//! A [`RemapTable`] is built once from the calibration and then applied to
//! every captured frame.

pub mod calibration;
pub mod remap;

pub use calibration::{CalibrationError, CameraModel};
pub use remap::{RemapError, RemapTable};

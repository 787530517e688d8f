//! Pinhole intrinsics and Brown-Conrady distortion.

use crate::CalibrationConfig;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    #[error("camera matrix entry [{row}][{col}] is not finite")]
    NonFiniteMatrix { row: usize, col: usize },
    #[error("camera matrix must have a zero lower-left block and [2][2] == 1, got row {0:?}")]
    NotUpperTriangular([f64; 3]),
    #[error("focal length must be non-zero (fx = {fx}, fy = {fy})")]
    DegenerateFocal { fx: f64, fy: f64 },
    #[error("distortion coefficient {index} is not finite")]
    NonFiniteDistortion { index: usize },
    #[error("resolution {width}x{height} is not usable")]
    Resolution { width: u32, height: u32 },
}

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Convert pixel coordinates to normalized pinhole coordinates.
    pub fn pixel_to_normalized(self, pixel_xy: [f64; 2]) -> [f64; 2] {
        let y = (pixel_xy[1] - self.cy) / self.fy;
        let x = (pixel_xy[0] - self.cx - self.skew * y) / self.fx;
        [x, y]
    }

    /// Convert normalized pinhole coordinates to pixel coordinates.
    pub fn normalized_to_pixel(self, normalized_xy: [f64; 2]) -> [f64; 2] {
        [
            self.fx * normalized_xy[0] + self.skew * normalized_xy[1] + self.cx,
            self.fy * normalized_xy[1] + self.cy,
        ]
    }
}

/// Radial-tangential coefficients in the usual k1, k2, p1, p2, k3 order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RadialTangentialDistortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl RadialTangentialDistortion {
    /// Apply distortion to normalized coordinates.
    pub fn distort_normalized(self, normalized_xy: [f64; 2]) -> [f64; 2] {
        let [x, y] = normalized_xy;
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        [x * radial + x_tan, y * radial + y_tan]
    }
}

/// Validated calibration: intrinsics plus distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub intrinsics: CameraIntrinsics,
    pub distortion: RadialTangentialDistortion,
}

impl CameraModel {
    pub fn from_config(config: &CalibrationConfig) -> Result<Self, CalibrationError> {
        let k = &config.camera_matrix;
        for (row, values) in k.iter().enumerate() {
            for (col, value) in values.iter().enumerate() {
                if !value.is_finite() {
                    return Err(CalibrationError::NonFiniteMatrix { row, col });
                }
            }
        }
        if k[1][0] != 0.0 || k[2] != [0.0, 0.0, 1.0] {
            let offending = if k[1][0] != 0.0 { k[1] } else { k[2] };
            return Err(CalibrationError::NotUpperTriangular(offending));
        }

        let intrinsics = CameraIntrinsics {
            fx: k[0][0],
            fy: k[1][1],
            cx: k[0][2],
            cy: k[1][2],
            skew: k[0][1],
        };
        if intrinsics.fx.abs() < 1e-12 || intrinsics.fy.abs() < 1e-12 {
            return Err(CalibrationError::DegenerateFocal {
                fx: intrinsics.fx,
                fy: intrinsics.fy,
            });
        }

        if let Some(index) = config.dist_coeffs.iter().position(|c| !c.is_finite()) {
            return Err(CalibrationError::NonFiniteDistortion { index });
        }
        let [k1, k2, p1, p2, k3] = config.dist_coeffs;

        Ok(Self {
            intrinsics,
            distortion: RadialTangentialDistortion { k1, k2, p1, p2, k3 },
        })
    }

    /// Where an undistorted output pixel samples the distorted input.
    ///
    /// The output keeps the input's camera matrix, so no rectification or
    /// rescaling is applied.
    pub fn source_pixel(self, undistorted_pixel_xy: [f64; 2]) -> [f64; 2] {
        let xn = self.intrinsics.pixel_to_normalized(undistorted_pixel_xy);
        let xd = self.distortion.distort_normalized(xn);
        self.intrinsics.normalized_to_pixel(xd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn reference() -> CalibrationConfig {
        Config::default().calibration
    }

    #[test]
    fn parses_reference_calibration() {
        let model = CameraModel::from_config(&reference()).unwrap();
        assert_eq!(model.intrinsics.fx, 619.97674);
        assert_eq!(model.intrinsics.cy, 339.90312);
        assert_eq!(model.distortion.k1, -0.291149);
        assert_eq!(model.distortion.k3, 0.0);
    }

    #[test]
    fn principal_point_is_fixed() {
        let model = CameraModel::from_config(&reference()).unwrap();
        let c = [model.intrinsics.cx, model.intrinsics.cy];
        let s = model.source_pixel(c);
        assert!((s[0] - c[0]).abs() < 1e-9);
        assert!((s[1] - c[1]).abs() < 1e-9);
    }

    #[test]
    fn barrel_distortion_pulls_corners_inward() {
        let model = CameraModel::from_config(&reference()).unwrap();
        let s = model.source_pixel([0.0, 0.0]);
        assert!(s[0] > 0.0 && s[1] > 0.0);
    }

    #[test]
    fn rejects_bad_shapes() {
        let mut cfg = reference();
        cfg.camera_matrix[2] = [0.0, 0.5, 1.0];
        assert!(matches!(
            CameraModel::from_config(&cfg),
            Err(CalibrationError::NotUpperTriangular(_))
        ));

        let mut cfg = reference();
        cfg.camera_matrix[0][0] = 0.0;
        assert!(matches!(
            CameraModel::from_config(&cfg),
            Err(CalibrationError::DegenerateFocal { .. })
        ));

        let mut cfg = reference();
        cfg.dist_coeffs[3] = f64::NAN;
        assert_eq!(
            CameraModel::from_config(&cfg),
            Err(CalibrationError::NonFiniteDistortion { index: 3 })
        );

        let mut cfg = reference();
        cfg.camera_matrix[1][2] = f64::INFINITY;
        assert_eq!(
            CameraModel::from_config(&cfg),
            Err(CalibrationError::NonFiniteMatrix { row: 1, col: 2 })
        );
    }
}

use nalgebra::{DMatrix, Matrix3, SVector};
use videocal_core::{null_vector, CameraIntrinsics, SolveError};

/// `v_ij` row of Zhang's constraint system for columns `i`, `j` of `H`.
fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);

    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Smallest acceptable ratio between the second-smallest and the largest
/// singular value of the constraint system.
const MIN_CONDITION: f64 = 1e-7;

/// Rejects constraint systems whose null space is wider than one vector.
fn check_conditioning(v: &DMatrix<f64>) -> Result<(), SolveError> {
    let svd = v.clone().svd(false, false);
    let mut s: Vec<f64> = svd.singular_values.iter().copied().collect();
    s.resize(6, 0.0);
    s.sort_by(|a, b| b.total_cmp(a));
    if s[0] > 0.0 && s[4] > MIN_CONDITION * s[0] {
        Ok(())
    } else {
        Err(SolveError::Degenerate(format!(
            "ill-conditioned conic constraints (singular value ratio {:.1e})",
            s[4] / s[0]
        )))
    }
}

/// Closed-form intrinsics from plane homographies with zero skew imposed.
///
/// Two views suffice with the skew constraint; homographies should be
/// expressed in roughly unit-scale image coordinates.
pub fn intrinsics_from_homographies(hs: &[Matrix3<f64>]) -> Result<CameraIntrinsics, SolveError> {
    if hs.len() < 2 {
        return Err(SolveError::NotEnoughViews {
            required: 2,
            got: hs.len(),
        });
    }

    let m = hs.len();
    let mut v = DMatrix::<f64>::zeros(2 * m + 1, 6);
    for (k, h) in hs.iter().enumerate() {
        let h = h / h.norm();
        let v11 = v_ij(&h, 0, 0);
        let v22 = v_ij(&h, 1, 1);
        let v12 = v_ij(&h, 0, 1);
        v.row_mut(2 * k).copy_from(&v12.transpose());
        v.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }
    // B12 = 0 (zero skew).
    v[(2 * m, 1)] = 1.0;
    check_conditioning(&v)?;

    let b = null_vector(&v).ok_or_else(|| SolveError::Degenerate("svd failed".into()))?;
    let sign = if b[0] < 0.0 { -1.0 } else { 1.0 };
    let (b11, b12, b22, b13, b23, b33) = (
        sign * b[0],
        sign * b[1],
        sign * b[2],
        sign * b[3],
        sign * b[4],
        sign * b[5],
    );

    let denom = b11 * b22 - b12 * b12;
    if b11 <= 0.0 || denom <= 1e-15 * (b11 * b11 + b22 * b22) {
        return Err(SolveError::Degenerate(
            "views do not constrain the image of the absolute conic".into(),
        ));
    }

    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda <= 0.0 {
        return Err(SolveError::Degenerate("negative conic scale".into()));
    }

    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    let k = CameraIntrinsics::new(alpha, beta, u0, v0);
    if [k.fx, k.fy, k.cx, k.cy].iter().all(|x| x.is_finite()) {
        Ok(k)
    } else {
        Err(SolveError::Degenerate("non-finite intrinsics".into()))
    }
}

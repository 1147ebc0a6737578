//! Small dense linear algebra kernels: 3x3 symmetric eigendecomposition
//! and 3x3 singular value decomposition via Jacobi rotations.
//!
//! Both the normal estimator and the registration solver need
//! decompositions of tiny matrices in tight loops, with explicit control
//! over degenerate cases (rank-deficient covariance, reflection
//! correction). The kernels here operate on [`nalgebra::Matrix3`] values
//! and keep every fallback explicit.

use nalgebra::{Matrix3, Vector3};

/// Eigendecomposition of a symmetric 3x3 matrix by cyclic Jacobi rotations.
///
/// Returns `(eigenvalues, eigenvectors)` with eigenvalues sorted ascending
/// and the i-th column of the eigenvector matrix corresponding to the i-th
/// eigenvalue. Iteration stops when the largest off-diagonal magnitude
/// drops below 1e-10, or after 50 rotations.
///
/// Results are not bit-exact across platforms; callers compare
/// eigenvectors up to sign.
pub fn sym_eigen3(a: &Matrix3<f32>) -> (Vector3<f32>, Matrix3<f32>) {
    let mut s = *a;
    let mut v = Matrix3::identity();

    const MAX_ITER: usize = 50;

    for _ in 0..MAX_ITER {
        // Largest off-diagonal element picks the rotation plane.
        let (mut p, mut q) = (0, 1);
        let mut max_val = s[(0, 1)].abs();
        if s[(0, 2)].abs() > max_val {
            p = 0;
            q = 2;
            max_val = s[(0, 2)].abs();
        }
        if s[(1, 2)].abs() > max_val {
            p = 1;
            q = 2;
            max_val = s[(1, 2)].abs();
        }

        if max_val < 1e-10 {
            break;
        }

        let app = s[(p, p)];
        let aqq = s[(q, q)];
        let apq = s[(p, q)];

        let theta = if (app - aqq).abs() < 1e-12 {
            std::f32::consts::FRAC_PI_4
        } else {
            0.5 * (2.0 * apq).atan2(app - aqq)
        };

        let c = theta.cos();
        let sn = theta.sin();

        // S' = G^T S G, touching only the p/q rows and columns.
        let r = 3 - p - q;
        let srp = s[(r, p)];
        let srq = s[(r, q)];

        s[(p, p)] = c * c * app + 2.0 * c * sn * apq + sn * sn * aqq;
        s[(q, q)] = sn * sn * app - 2.0 * c * sn * apq + c * c * aqq;
        s[(p, q)] = 0.0;
        s[(q, p)] = 0.0;
        s[(r, p)] = c * srp + sn * srq;
        s[(p, r)] = s[(r, p)];
        s[(r, q)] = -sn * srp + c * srq;
        s[(q, r)] = s[(r, q)];

        // V' = V G
        for i in 0..3 {
            let vip = v[(i, p)];
            let viq = v[(i, q)];
            v[(i, p)] = c * vip + sn * viq;
            v[(i, q)] = -sn * vip + c * viq;
        }
    }

    let eigenvalues = Vector3::new(s[(0, 0)], s[(1, 1)], s[(2, 2)]);

    // Sort ascending, permuting eigenvector columns alongside.
    let mut order = [0usize, 1, 2];
    if eigenvalues[order[0]] > eigenvalues[order[1]] {
        order.swap(0, 1);
    }
    if eigenvalues[order[1]] > eigenvalues[order[2]] {
        order.swap(1, 2);
    }
    if eigenvalues[order[0]] > eigenvalues[order[1]] {
        order.swap(0, 1);
    }

    let sorted_values = Vector3::new(
        eigenvalues[order[0]],
        eigenvalues[order[1]],
        eigenvalues[order[2]],
    );
    let mut sorted_vectors = Matrix3::zeros();
    for (dst, &src) in order.iter().enumerate() {
        for row in 0..3 {
            sorted_vectors[(row, dst)] = v[(row, src)];
        }
    }

    (sorted_values, sorted_vectors)
}

/// Singular value decomposition of a 3x3 matrix: `H = U * diag(S) * V^T`.
///
/// Runs Jacobi eigendecomposition on `H^T H` (30 sweeps) to obtain `V` and
/// the squared singular values, sorts singular values descending with the
/// matching column permutation of `V`, then forms `U = H V S^-1`. Columns
/// whose singular value falls below 1e-10 are left as zero; callers that
/// need a full-rank `U` (the rotation solve) must tolerate this only when
/// no determinant correction is required.
pub fn svd3(h: &Matrix3<f32>) -> (Matrix3<f32>, Vector3<f32>, Matrix3<f32>) {
    let mut ata = h.transpose() * h;
    let mut v = Matrix3::identity();

    const SWEEPS: usize = 30;

    for _ in 0..SWEEPS {
        for p in 0..3 {
            for q in (p + 1)..3 {
                let app = ata[(p, p)];
                let aqq = ata[(q, q)];
                let apq = ata[(p, q)];

                if apq.abs() < 1e-10 {
                    continue;
                }

                let tau = (aqq - app) / (2.0 * apq);
                let t = if tau >= 0.0 {
                    1.0 / (tau + (1.0 + tau * tau).sqrt())
                } else {
                    -1.0 / (-tau + (1.0 + tau * tau).sqrt())
                };
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = t * c;

                let r = 3 - p - q;
                let arp = ata[(r, p)];
                let arq = ata[(r, q)];

                ata[(p, p)] = c * c * app - 2.0 * s * c * apq + s * s * aqq;
                ata[(q, q)] = s * s * app + 2.0 * s * c * apq + c * c * aqq;
                ata[(p, q)] = 0.0;
                ata[(q, p)] = 0.0;
                ata[(r, p)] = c * arp - s * arq;
                ata[(p, r)] = ata[(r, p)];
                ata[(r, q)] = s * arp + c * arq;
                ata[(q, r)] = ata[(r, q)];

                for i in 0..3 {
                    let vip = v[(i, p)];
                    let viq = v[(i, q)];
                    v[(i, p)] = c * vip - s * viq;
                    v[(i, q)] = s * vip + c * viq;
                }
            }
        }
    }

    let mut sigma = Vector3::new(
        ata[(0, 0)].max(0.0).sqrt(),
        ata[(1, 1)].max(0.0).sqrt(),
        ata[(2, 2)].max(0.0).sqrt(),
    );

    // Sort singular values descending, swapping columns of V in step.
    for i in 0..2 {
        for j in (i + 1)..3 {
            if sigma[j] > sigma[i] {
                sigma.swap_rows(i, j);
                v.swap_columns(i, j);
            }
        }
    }

    let mut u = Matrix3::zeros();
    for j in 0..3 {
        if sigma[j] > 1e-10 {
            let col = h * v.column(j) / sigma[j];
            u.set_column(j, &col);
        }
    }

    (u, sigma, v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn eigen_of_diagonal_matrix() {
        let a = Matrix3::from_diagonal(&Vector3::new(3.0, 1.0, 2.0));
        let (values, vectors) = sym_eigen3(&a);

        assert!(approx_eq(values[0], 1.0, 1e-5));
        assert!(approx_eq(values[1], 2.0, 1e-5));
        assert!(approx_eq(values[2], 3.0, 1e-5));

        // Smallest eigenvalue belongs to the y axis, up to sign.
        let v0 = vectors.column(0);
        assert!(approx_eq(v0[1].abs(), 1.0, 1e-4));
    }

    #[test]
    fn eigen_reconstructs_symmetric_matrix() {
        let a = Matrix3::new(
            4.0, 1.0, 0.5, //
            1.0, 3.0, 0.2, //
            0.5, 0.2, 2.0,
        );
        let (values, vectors) = sym_eigen3(&a);
        let reconstructed = vectors * Matrix3::from_diagonal(&values) * vectors.transpose();

        for i in 0..3 {
            for j in 0..3 {
                assert!(
                    approx_eq(reconstructed[(i, j)], a[(i, j)], 1e-3),
                    "mismatch at ({}, {})",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn eigenvectors_are_orthonormal() {
        let a = Matrix3::new(
            2.0, -1.0, 0.0, //
            -1.0, 2.0, -1.0, //
            0.0, -1.0, 2.0,
        );
        let (_, v) = sym_eigen3(&a);
        let vtv = v.transpose() * v;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(approx_eq(vtv[(i, j)], expected, 1e-4));
            }
        }
    }

    #[test]
    fn svd_reconstructs_input() {
        let h = Matrix3::new(
            1.0, 0.4, -0.2, //
            0.3, 2.0, 0.1, //
            -0.5, 0.2, 1.5,
        );
        let (u, s, v) = svd3(&h);
        let reconstructed = u * Matrix3::from_diagonal(&s) * v.transpose();

        for i in 0..3 {
            for j in 0..3 {
                assert!(
                    approx_eq(reconstructed[(i, j)], h[(i, j)], 1e-3),
                    "mismatch at ({}, {})",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn svd_singular_values_sorted_descending() {
        let h = Matrix3::new(
            0.2, 0.0, 0.0, //
            0.0, 5.0, 0.0, //
            0.0, 0.0, 1.0,
        );
        let (_, s, _) = svd3(&h);
        assert!(s[0] >= s[1] && s[1] >= s[2]);
        assert!(approx_eq(s[0], 5.0, 1e-4));
        assert!(approx_eq(s[2], 0.2, 1e-4));
    }

    #[test]
    fn svd_of_rotation_has_unit_singular_values() {
        let angle = 0.7f32;
        let (sin, cos) = angle.sin_cos();
        let rot = Matrix3::new(
            cos, -sin, 0.0, //
            sin, cos, 0.0, //
            0.0, 0.0, 1.0,
        );
        let (_, s, _) = svd3(&rot);
        for i in 0..3 {
            assert!(approx_eq(s[i], 1.0, 1e-4));
        }
    }
}

//! Covariance-domain framework solver
//!
//! Synthesises a mixing matrix `M` that maps a signal with covariance `Cx`
//! onto a signal approximating a target covariance `Cy`, together with the
//! residual covariance the direct matrix cannot reach. The factorisation
//! uses a Hermitian eigendecomposition on the input side (with regularised
//! inversion) and a Cholesky factor on the target side, falling back to an
//! eigen square root when the target is only semi-definite.

use nalgebra::{Cholesky, DMatrix, DVector, SymmetricEigen};
use num_complex::Complex32;

/// Complex matrix alias used throughout the solver
pub type CMat = DMatrix<Complex32>;

/// Hermitian eigendecomposition: returns (eigenvectors, eigenvalues)
pub fn hermitian_eig(m: &CMat) -> (CMat, DVector<f32>) {
    let se = SymmetricEigen::new(m.clone());
    (se.eigenvectors, se.eigenvalues)
}

/// Factor `K` of a positive semi-definite matrix with `K·Kᴴ = C`,
/// formed as `V·sqrt(max(D, 0))`
pub fn psd_sqrt_factor(c: &CMat) -> CMat {
    let (v, d) = hermitian_eig(c);
    scale_columns(&v, &d.map(|x| x.max(0.0).sqrt()))
}

/// Real part of the trace
pub fn trace_re(c: &CMat) -> f32 {
    c.diagonal().iter().map(|v| v.re).sum()
}

/// Formulate the optimal mixing matrix `M` and residual covariance `Cr`
/// for the covariance matching `M·Cx·Mᴴ ≈ Cy`.
///
/// `prior` expresses the preferred mapping (identity when no preference);
/// `reg` is the forgetting factor limiting the inversion of weak input
/// eigenvalues. `Cr = Cy − M·Cx·Mᴴ` is returned with its Hermitian part
/// and a non-negative diagonal, ready to drive a decorrelated residual
/// path.
pub fn formulate_mixing_matrix(cx: &CMat, cy: &CMat, prior: &CMat, reg: f32) -> (CMat, CMat) {
    let q = cx.nrows();

    // Input side: Kx = Ux * sqrt(Sx), with regularised inverse
    let (ux, sx) = hermitian_eig(cx);
    let sx_sqrt = sx.map(|v| v.max(0.0).sqrt());
    let limit = (sx_sqrt.max() * reg).max(1e-12);
    let sx_inv = sx_sqrt.map(|v| 1.0 / v.max(limit));
    let kx = scale_columns(&ux, &sx_sqrt);

    // Target side: Cholesky where possible, eigen square root otherwise
    let ky = match Cholesky::new(cy.clone()) {
        Some(ch) => ch.l(),
        None => psd_sqrt_factor(cy),
    };

    // Optimal unitary rotation from the SVD of Kxᴴ·priorᴴ·Ky
    let a = kx.adjoint() * prior.adjoint() * &ky;
    let svd = a.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return (CMat::zeros(q, q), cy.clone());
    };
    let p = v_t.adjoint() * u.adjoint();

    // M = Ky * P * inv(sqrt(Sx)) * Uxᴴ
    let m = &ky * p * scale_rows(&ux.adjoint(), &sx_inv);

    let mut cr = cy - &m * cx * m.adjoint();
    hermitianize(&mut cr);
    (m, cr)
}

/// Force the Hermitian part, clamping the diagonal at zero
fn hermitianize(c: &mut CMat) {
    let q = c.nrows();
    for i in 0..q {
        for j in (i + 1)..q {
            let avg = (c[(i, j)] + c[(j, i)].conj()) * 0.5;
            c[(i, j)] = avg;
            c[(j, i)] = avg.conj();
        }
        c[(i, i)] = Complex32::new(c[(i, i)].re.max(0.0), 0.0);
    }
}

fn scale_columns(m: &CMat, s: &DVector<f32>) -> CMat {
    let mut out = m.clone();
    for j in 0..out.ncols() {
        for i in 0..out.nrows() {
            out[(i, j)] *= s[j];
        }
    }
    out
}

fn scale_rows(m: &CMat, s: &DVector<f32>) -> CMat {
    let mut out = m.clone();
    for i in 0..out.nrows() {
        for j in 0..out.ncols() {
            out[(i, j)] *= s[i];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn c(re: f32) -> Complex32 {
        Complex32::new(re, 0.0)
    }

    fn assert_mat_close(a: &CMat, b: &CMat, eps: f32) {
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                assert_abs_diff_eq!(a[(i, j)].re, b[(i, j)].re, epsilon = eps);
                assert_abs_diff_eq!(a[(i, j)].im, b[(i, j)].im, epsilon = eps);
            }
        }
    }

    #[test]
    fn test_achievable_target_has_no_residual() {
        let cx = CMat::identity(2, 2);
        let cy = CMat::from_diagonal(&DVector::from_vec(vec![c(4.0), c(1.0)]));
        let prior = CMat::identity(2, 2);

        let (m, cr) = formulate_mixing_matrix(&cx, &cy, &prior, 0.2);
        let achieved = &m * &cx * m.adjoint();
        assert_mat_close(&achieved, &cy, 1e-4);
        assert!(trace_re(&cr) < 1e-4);
    }

    #[test]
    fn test_residual_covers_rank_deficit() {
        // Rank-deficient input cannot reach an identity target alone
        let cx = CMat::from_diagonal(&DVector::from_vec(vec![c(1.0), c(1e-6)]));
        let cy = CMat::identity(2, 2);
        let prior = CMat::identity(2, 2);

        let (m, cr) = formulate_mixing_matrix(&cx, &cy, &prior, 0.2);
        let total = &m * &cx * m.adjoint() + &cr;
        assert_mat_close(&total, &cy, 1e-3);
        assert!(trace_re(&cr) > 0.0);
    }

    #[test]
    fn test_identical_covariances_pass_through() {
        let mut cx = CMat::identity(2, 2);
        cx[(0, 0)] = c(2.0);
        cx[(0, 1)] = Complex32::new(0.5, 0.25);
        cx[(1, 0)] = cx[(0, 1)].conj();
        let cy = cx.clone();
        let prior = CMat::identity(2, 2);

        let (m, cr) = formulate_mixing_matrix(&cx, &cy, &prior, 0.2);
        let achieved = &m * &cx * m.adjoint();
        assert_mat_close(&achieved, &cy, 1e-3);
        assert!(trace_re(&cr) < 1e-3);
    }

    #[test]
    fn test_psd_sqrt_factor() {
        let mut cov = CMat::identity(2, 2);
        cov[(0, 0)] = c(3.0);
        cov[(0, 1)] = Complex32::new(1.0, -0.5);
        cov[(1, 0)] = cov[(0, 1)].conj();
        cov[(1, 1)] = c(2.0);

        let k = psd_sqrt_factor(&cov);
        let rebuilt = &k * k.adjoint();
        assert_mat_close(&rebuilt, &cov, 1e-4);
    }
}

//! Dense linear algebra for the small normal-equation systems of least squares.

/// Floor on a diagonal entry of `J' J` when it scales the damping term.
pub const MIN_CURVATURE: f64 = 1e-12;

/// Levenberg-Marquardt step for the normal equations `J' J` and `J' r`.
///
/// Solves `(J'J + lambda * D) delta = -J'r` with `D = diag(max(J'J_ii, MIN_CURVATURE))`.
/// The damped matrix is factored in place as a packed lower triangle, so
/// `jtj` is never copied. Returns `None` when the damped matrix is not
/// positive definite or the shapes disagree; the caller raises `lambda`
/// and tries again.
pub fn damped_step(jtj: &[Vec<f64>], jtr: &[f64], lambda: f64) -> Option<Vec<f64>> {
    let n = jtr.len();
    if n == 0 || jtj.len() != n || jtj.iter().any(|row| row.len() != n) || !lambda.is_finite() {
        return None;
    }

    // Row i of the lower triangle starts at i * (i + 1) / 2.
    let at = |i: usize, j: usize| i * (i + 1) / 2 + j;
    let mut l = vec![0.0; n * (n + 1) / 2];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = jtj[i][j];
            if i == j {
                sum += lambda * jtj[i][i].max(MIN_CURVATURE);
            }
            sum -= (0..j).map(|k| l[at(i, k)] * l[at(j, k)]).sum::<f64>();

            if i == j {
                if !(sum > 0.0 && sum.is_finite()) {
                    return None;
                }
                l[at(i, i)] = sum.sqrt();
            } else {
                l[at(i, j)] = sum / l[at(j, j)];
            }
        }
    }

    // Forward then backward substitution, reusing one buffer.
    let mut x: Vec<f64> = jtr.iter().map(|g| -g).collect();
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[at(i, j)] * x[j]).sum();
        x[i] = (x[i] - sum) / l[at(i, i)];
    }
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[at(j, i)] * x[j]).sum();
        x[i] = (x[i] - sum) / l[at(i, i)];
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Compute `J' J` and `J' r` for a Jacobian stored column-major (`jac[param][obs]`).
pub fn normal_equations(jac: &[Vec<f64>], residuals: &[f64]) -> (Vec<Vec<f64>>, Vec<f64>) {
    let k = jac.len();
    let mut jtj = vec![vec![0.0; k]; k];
    let mut jtr = vec![0.0; k];
    for i in 0..k {
        jtr[i] = jac[i].iter().zip(residuals).map(|(j, r)| j * r).sum();
        for j in 0..=i {
            let v: f64 = jac[i].iter().zip(&jac[j]).map(|(a, b)| a * b).sum();
            jtj[i][j] = v;
            jtj[j][i] = v;
        }
    }
    (jtj, jtr)
}

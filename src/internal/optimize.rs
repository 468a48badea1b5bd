//! Linear sum assignment (rectangular minimum-cost bipartite matching).
//!
//! Shortest augmenting path formulation of the Hungarian method with row and
//! column potentials, O(n^2 m) for an n x m matrix with n <= m. Ties between
//! equally cheap columns resolve to the lowest column index, so identical
//! inputs always produce identical assignments.

use nalgebra::DMatrix;

/// Cost substituted for non-finite entries so the solver always terminates.
const UNREACHABLE_COST: f64 = 1e12;

/// Solve the assignment problem minimizing the total cost.
///
/// Returns `(row, col)` pairs sorted by row. Every row is assigned when
/// `rows <= cols`, otherwise every column is.
pub fn linear_sum_assignment(cost: &DMatrix<f64>) -> Vec<(usize, usize)> {
    let (n_rows, n_cols) = cost.shape();
    if n_rows == 0 || n_cols == 0 {
        return Vec::new();
    }

    let transposed = n_rows > n_cols;
    let work = if transposed {
        cost.transpose()
    } else {
        cost.clone()
    };

    let mut pairs: Vec<(usize, usize)> = solve(&work)
        .into_iter()
        .map(|(r, c)| if transposed { (c, r) } else { (r, c) })
        .collect();
    pairs.sort_unstable();
    pairs
}

/// Core solver for `n <= m`. Indices are 1-based internally; slot 0 is the
/// virtual source of each augmenting path.
fn solve(a: &DMatrix<f64>) -> Vec<(usize, usize)> {
    let (n, m) = a.shape();
    let entry = |i: usize, j: usize| {
        let c = a[(i - 1, j - 1)];
        if c.is_finite() {
            c
        } else {
            UNREACHABLE_COST
        }
    };

    let mut u = vec![0.0_f64; n + 1];
    let mut v = vec![0.0_f64; m + 1];
    // col_owner[j] = row currently assigned to column j (0 = free)
    let mut col_owner = vec![0_usize; m + 1];
    let mut way = vec![0_usize; m + 1];

    for i in 1..=n {
        col_owner[0] = i;
        let mut j0 = 0;
        let mut min_v = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = col_owner[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;

            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let reduced = entry(i0, j) - u[i0] - v[j];
                if reduced < min_v[j] {
                    min_v[j] = reduced;
                    way[j] = j0;
                }
                if min_v[j] < delta {
                    delta = min_v[j];
                    j1 = j;
                }
            }

            for j in 0..=m {
                if used[j] {
                    u[col_owner[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_v[j] -= delta;
                }
            }

            j0 = j1;
            if col_owner[j0] == 0 {
                break;
            }
        }

        // Flip the augmenting path back to the source
        loop {
            let j1 = way[j0];
            col_owner[j0] = col_owner[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    (1..=m)
        .filter(|&j| col_owner[j] != 0)
        .map(|j| (col_owner[j] - 1, j - 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(cost: &DMatrix<f64>, pairs: &[(usize, usize)]) -> f64 {
        pairs.iter().map(|&(r, c)| cost[(r, c)]).sum()
    }

    #[test]
    fn test_lsa_basic_square() {
        let cost = DMatrix::from_row_slice(3, 3, &[
            4.0, 1.0, 3.0,
            2.0, 0.0, 5.0,
            3.0, 2.0, 2.0,
        ]);
        let pairs = linear_sum_assignment(&cost);

        assert_eq!(pairs.len(), 3);
        // Optimal: (0,1)=1 + (1,0)=2 + (2,2)=2 = 5
        assert!((total(&cost, &pairs) - 5.0).abs() < 1e-10);
        assert_eq!(pairs, vec![(0, 1), (1, 0), (2, 2)]);
    }

    #[test]
    fn test_lsa_beats_greedy() {
        // Greedy would take (0,0)=1 and then (1,1)=100
        let cost = DMatrix::from_row_slice(2, 2, &[
            1.0, 2.0,
            2.0, 100.0,
        ]);
        let pairs = linear_sum_assignment(&cost);
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
        assert!((total(&cost, &pairs) - 4.0).abs() < 1e-10);
    }

    #[test]
    fn test_lsa_more_rows_than_cols() {
        let cost = DMatrix::from_row_slice(3, 2, &[
            1.0, 2.0,
            3.0, 4.0,
            0.5, 9.0,
        ]);
        let pairs = linear_sum_assignment(&cost);

        assert_eq!(pairs.len(), 2);
        // (2,0)=0.5 + (0,1)=2 = 2.5
        assert_eq!(pairs, vec![(0, 1), (2, 0)]);
    }

    #[test]
    fn test_lsa_more_cols_than_rows() {
        let cost = DMatrix::from_row_slice(2, 3, &[
            5.0, 1.0, 3.0,
            4.0, 6.0, 0.0,
        ]);
        let pairs = linear_sum_assignment(&cost);
        assert_eq!(pairs, vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn test_lsa_empty() {
        assert!(linear_sum_assignment(&DMatrix::zeros(0, 0)).is_empty());
        assert!(linear_sum_assignment(&DMatrix::zeros(3, 0)).is_empty());
        assert!(linear_sum_assignment(&DMatrix::zeros(0, 2)).is_empty());
    }

    #[test]
    fn test_lsa_ties_are_deterministic() {
        let cost = DMatrix::from_element(3, 3, 1.0);
        let first = linear_sum_assignment(&cost);
        let second = linear_sum_assignment(&cost);
        assert_eq!(first, second);
        assert_eq!(first, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_lsa_non_finite_costs() {
        let cost = DMatrix::from_row_slice(2, 2, &[
            f64::INFINITY, 0.2,
            0.3, f64::NAN,
        ]);
        let pairs = linear_sum_assignment(&cost);
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }
}

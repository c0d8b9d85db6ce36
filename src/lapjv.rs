use crate::error::TrackError::{self, LapjvError};

/* -----------------------------------------------------------------------------
 * lapjv.rs - Jonker-Volgenant style shortest augmenting path assignment
 * ----------------------------------------------------------------------------- */

/// Row/column assignment of a square cost matrix.
///
/// `x[row]` is the column assigned to `row`; `y[col]` is the row assigned
/// to `col`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Assignment {
    pub x: Vec<isize>,
    pub y: Vec<isize>,
}

impl Assignment {
    #[cfg(test)]
    pub fn total_cost(&self, cost: &[Vec<f64>]) -> f64 {
        self.x
            .iter()
            .enumerate()
            .filter(|(_, j)| **j >= 0)
            .map(|(i, j)| cost[i][*j as usize])
            .sum()
    }
}

fn validate(cost: &[Vec<f64>]) -> Result<usize, TrackError> {
    let n = cost.len();
    if n == 0 {
        return Err(LapjvError(format!(
            "cost.len() must be greater than 0, but cost.len() = {}",
            n
        )));
    }
    for (i, row) in cost.iter().enumerate() {
        if row.len() != n {
            return Err(LapjvError(format!(
                "cost matrix must be square, but row {} has {} columns (expected {})",
                i,
                row.len(),
                n
            )));
        }
        if let Some(j) = row.iter().position(|c| !c.is_finite()) {
            return Err(LapjvError(format!(
                "cost[{}][{}] is not finite",
                i, j
            )));
        }
    }
    Ok(n)
}

/// Solve the dense linear assignment problem, minimising total cost.
///
/// Rows are inserted one at a time and routed to a free column along a
/// shortest alternating path under reduced costs `c[i][j] - u[i] - v[j]`.
/// Column scans run in ascending index order and only strictly smaller
/// slack values replace the current minimum, so ties resolve towards the
/// lowest column and the result is reproducible.
pub(crate) fn lapjv(cost: &[Vec<f64>]) -> Result<Assignment, TrackError> {
    let n = validate(cost)?;

    // Index 0 is the virtual root; real rows/columns are 1..=n.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    let mut col_owner = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for row in 1..=n {
        col_owner[0] = row;
        let mut j0 = 0usize;
        let mut min_slack = vec![f64::INFINITY; n + 1];
        let mut visited = vec![false; n + 1];

        loop {
            visited[j0] = true;
            let i0 = col_owner[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;

            for j in 1..=n {
                if visited[j] {
                    continue;
                }
                let reduced = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if reduced < min_slack[j] {
                    min_slack[j] = reduced;
                    way[j] = j0;
                }
                if min_slack[j] < delta {
                    delta = min_slack[j];
                    j1 = j;
                }
            }

            if j1 == 0 {
                return Err(LapjvError(format!(
                    "no augmenting path found for row {}",
                    row - 1
                )));
            }

            for j in 0..=n {
                if visited[j] {
                    u[col_owner[j]] += delta;
                    v[j] -= delta;
                } else {
                    min_slack[j] -= delta;
                }
            }

            j0 = j1;
            if col_owner[j0] == 0 {
                break;
            }
        }

        // Flip the alternating path back to the root.
        while j0 != 0 {
            let prev = way[j0];
            col_owner[j0] = col_owner[prev];
            j0 = prev;
        }
    }

    let mut x = vec![-1isize; n];
    let mut y = vec![-1isize; n];
    for j in 1..=n {
        let i = col_owner[j];
        if i > 0 {
            x[i - 1] = (j - 1) as isize;
            y[j - 1] = (i - 1) as isize;
        }
    }

    if x.iter().any(|&j| j < 0) {
        return Err(LapjvError(
            "assignment left at least one row unassigned".to_string(),
        ));
    }

    Ok(Assignment { x, y })
}

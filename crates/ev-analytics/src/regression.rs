//! Ordinary least-squares over (odometer, health) points.

/// Fitted line `y = intercept + slope * x`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    #[must_use]
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }

    /// x where the line reaches `y`; `None` for a flat line
    #[must_use]
    pub fn solve_for(&self, y: f64) -> Option<f64> {
        if self.slope.abs() < f64::EPSILON {
            None
        } else {
            Some((y - self.intercept) / self.slope)
        }
    }
}

/// Least-squares fit. `None` when fewer than two points or all x identical.
#[must_use]
pub fn fit(points: &[(f64, f64)]) -> Option<LinearFit> {
    if points.len() < 2 {
        return None;
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut ss_xx = 0.0;
    let mut ss_xy = 0.0;
    for (x, y) in points {
        ss_xx += (x - mean_x) * (x - mean_x);
        ss_xy += (x - mean_x) * (y - mean_y);
    }

    if ss_xx < f64::EPSILON {
        return None;
    }

    let slope = ss_xy / ss_xx;
    Some(LinearFit {
        slope,
        intercept: mean_y - slope * mean_x,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_exact_line() {
        let points = [(0.0, 100.0), (10_000.0, 99.0), (20_000.0, 98.0)];
        let fit = fit(&points).unwrap();
        assert!((fit.slope - (-1.0 / 10_000.0)).abs() < 1e-12);
        assert!((fit.intercept - 100.0).abs() < 1e-9);
        assert!((fit.predict(100_000.0) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs_return_none() {
        assert!(fit(&[]).is_none());
        assert!(fit(&[(5.0, 1.0)]).is_none());
        assert!(fit(&[(5.0, 1.0), (5.0, 2.0)]).is_none());
    }

    #[test]
    fn solve_for_flat_line_is_none() {
        let flat = LinearFit {
            slope: 0.0,
            intercept: 95.0,
        };
        assert!(flat.solve_for(70.0).is_none());
    }
}

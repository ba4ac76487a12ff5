// Linearization tables.
//
// An expression that is evaluated millions of times per year with a scalar
// argument from a known range (light response, LRI correction, grass
// potential) is sampled once into a table; lookups interpolate linearly
// between samples. Endpoints are exact by construction; halving the step
// width halves the worst-case interpolation error of a smooth function.
//
// Lookups outside the sampled range return `None` and the caller falls
// back to exact evaluation.

/// 1-D sample table over `[low, high]`.
pub struct Table1d {
    low: f64,
    high: f64,
    step_inv: f64,
    values: Vec<f64>,
}

impl Table1d {
    pub fn build(low: f64, high: f64, steps: usize, f: impl Fn(f64) -> f64) -> Self {
        let steps = steps.max(2);
        let step = (high - low) / (steps - 1) as f64;
        let values = (0..steps).map(|i| f(low + i as f64 * step)).collect();
        Self { low, high, step_inv: 1.0 / step, values }
    }

    pub fn lookup(&self, x: f64) -> Option<f64> {
        if x < self.low || x > self.high {
            return None;
        }
        let pos = (x - self.low) * self.step_inv;
        let idx = (pos as usize).min(self.values.len() - 2);
        let frac = pos - idx as f64;
        Some(self.values[idx] * (1.0 - frac) + self.values[idx + 1] * frac)
    }
}

/// 2-D sample table over `[low_x, high_x] x [low_y, high_y]`, bilinear
/// interpolation.
pub struct Table2d {
    low_x: f64,
    high_x: f64,
    low_y: f64,
    high_y: f64,
    step_x_inv: f64,
    step_y_inv: f64,
    steps_x: usize,
    steps_y: usize,
    values: Vec<f64>,
}

impl Table2d {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        low_x: f64,
        high_x: f64,
        low_y: f64,
        high_y: f64,
        steps_x: usize,
        steps_y: usize,
        f: impl Fn(f64, f64) -> f64,
    ) -> Self {
        let steps_x = steps_x.max(2);
        let steps_y = steps_y.max(2);
        let step_x = (high_x - low_x) / (steps_x - 1) as f64;
        let step_y = (high_y - low_y) / (steps_y - 1) as f64;
        let mut values = Vec::with_capacity(steps_x * steps_y);
        for iy in 0..steps_y {
            for ix in 0..steps_x {
                values.push(f(low_x + ix as f64 * step_x, low_y + iy as f64 * step_y));
            }
        }
        Self {
            low_x,
            high_x,
            low_y,
            high_y,
            step_x_inv: 1.0 / step_x,
            step_y_inv: 1.0 / step_y,
            steps_x,
            steps_y,
            values,
        }
    }

    pub fn lookup(&self, x: f64, y: f64) -> Option<f64> {
        if x < self.low_x || x > self.high_x || y < self.low_y || y > self.high_y {
            return None;
        }
        let px = (x - self.low_x) * self.step_x_inv;
        let py = (y - self.low_y) * self.step_y_inv;
        let ix = (px as usize).min(self.steps_x - 2);
        let iy = (py as usize).min(self.steps_y - 2);
        let fx = px - ix as f64;
        let fy = py - iy as f64;
        let at = |ix: usize, iy: usize| self.values[iy * self.steps_x + ix];
        let v0 = at(ix, iy) * (1.0 - fx) + at(ix + 1, iy) * fx;
        let v1 = at(ix, iy + 1) * (1.0 - fx) + at(ix + 1, iy + 1) * fx;
        Some(v0 * (1.0 - fy) + v1 * fy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_exact() {
        let t = Table1d::build(0.0, 1.0, 11, |x| x * x);
        assert_eq!(t.lookup(0.0), Some(0.0));
        assert_eq!(t.lookup(1.0), Some(1.0));
        assert_eq!(t.lookup(1.1), None);
    }

    #[test]
    fn error_shrinks_with_steps() {
        let coarse = Table1d::build(0.0, 1.0, 8, |x| (3.0 * x).sin());
        let fine = Table1d::build(0.0, 1.0, 64, |x| (3.0 * x).sin());
        let exact = (3.0f64 * 0.437).sin();
        let e_coarse = (coarse.lookup(0.437).unwrap() - exact).abs();
        let e_fine = (fine.lookup(0.437).unwrap() - exact).abs();
        assert!(e_fine < e_coarse);
    }

    #[test]
    fn bilinear_reproduces_bilinear_functions() {
        let t = Table2d::build(0.0, 2.0, 0.0, 2.0, 5, 5, |x, y| 2.0 * x + 3.0 * y);
        assert!((t.lookup(0.7, 1.3).unwrap() - (1.4 + 3.9)).abs() < 1e-12);
    }
}

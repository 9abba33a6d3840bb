use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinReg {
    pub intercept: f64,
    pub slope: f64,
}

impl fmt::Display for LinReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "y = {} + {}x", self.intercept, self.slope)
    }
}

impl Default for LinReg {
    fn default() -> Self {
        Self::new()
    }
}

impl LinReg {
    pub fn new() -> Self {
        Self { intercept: 0., slope: 0. }
    }
    pub fn calculate(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
    pub fn from_val(intercept: f64, slope: f64) -> Self {
        Self { intercept, slope }
    }

    /// Ordinary least squares fit. None for mismatched or too short input and for a
    /// constant x.
    pub fn train(x: &[f64], y: &[f64]) -> Option<Self> {
        if x.len() != y.len() || x.len() < 2 {
            return None;
        }

        let avg_x: f64 = x.iter().sum::<f64>() / x.len() as f64;
        let avg_y = y.iter().sum::<f64>() / y.len() as f64;

        let (ss_xx, ss_xy) = x.iter().zip(y).fold((0.0, 0.0), |(xx, xy), (xi, yi)| {
            let dx = xi - avg_x;
            (xx + dx * dx, xy + dx * (yi - avg_y))
        });
        if ss_xx == 0.0 {
            return None;
        }
        let slope = ss_xy / ss_xx;
        let intercept = avg_y - slope * avg_x;

        if !slope.is_finite() || !intercept.is_finite() {
            return None;
        }
        Some(Self { intercept, slope })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fits_exact_line() {
        let x = [0., 1., 2., 3., 4.];
        let y: Vec<f64> = x.iter().map(|v| 2.0 + 0.5 * v).collect();
        let reg = LinReg::train(&x, &y).unwrap();
        assert_relative_eq!(reg.slope, 0.5, epsilon = 1e-12);
        assert_relative_eq!(reg.intercept, 2.0, epsilon = 1e-12);
        assert_relative_eq!(reg.calculate(10.), 7.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_x_is_degenerate() {
        assert_eq!(LinReg::train(&[3., 3., 3.], &[1., 2., 3.]), None);
    }

    #[test]
    fn single_point_is_degenerate() {
        assert_eq!(LinReg::train(&[1.], &[1.]), None);
        assert_eq!(LinReg::train(&[1., 2.], &[1.]), None);
    }
}

//! Summary statistics over samples.

pub trait SliceExt {
    fn sum(&self) -> f64;
    fn mean(&self) -> f64;
    fn variance(&self) -> f64;
}
impl SliceExt for [f64] {
    fn sum(&self) -> f64 {
        self.iter().sum()
    }

    /// Arithmetic mean; zero for an empty slice.
    fn mean(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.sum() / self.len() as f64
        }
    }

    /// Sample variance (Bessel-corrected); zero for fewer than two elements.
    fn variance(&self) -> f64 {
        if self.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        self.iter().map(|&value| (value - mean).powi(2)).sum::<f64>() / (self.len() - 1) as f64
    }
}

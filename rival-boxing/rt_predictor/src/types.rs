use serde::Serialize;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PredictionOut {
    pub race_id: String,
    pub driver: String,
    pub lap: u32,
    pub prob_box_within2: f64,
    // filled once the driver's next lap is known
    pub prob_box_within3: Option<f64>,
    pub alert: bool,
    pub ts_ms: i64,
}

/// Summary of one input vector, for the LOG_PRED debug line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputStats {
    pub nonzero: usize,
    pub mean: f32,
    pub std: f32,
}

impl InputStats {
    pub fn of(v: &[f32]) -> Self {
        let nonzero = v.iter().filter(|x| **x != 0.0).count();
        let mean = if v.is_empty() { 0.0 } else { v.iter().sum::<f32>() / v.len() as f32 };
        let std = if v.len() < 2 {
            0.0
        } else {
            (v.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / v.len() as f32).sqrt()
        };
        Self { nonzero, mean, std }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_of_small_vector() {
        let s = InputStats::of(&[0.0, 2.0, 0.0, 2.0]);
        assert_eq!(s.nonzero, 2);
        assert!((s.mean - 1.0).abs() < 1e-6);
        assert!((s.std - 1.0).abs() < 1e-6);
        assert_eq!(InputStats::of(&[]).nonzero, 0);
    }
}

use ndarray::Array1;

use crate::core::{FGError, FGResult};

/// A message carried by an edge. Depending on the engine configuration it
/// stores probabilities or their logarithms
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub(crate) values: Array1<f64>,
    pub(crate) log_space: bool,
}

impl Message {
    /// Uniform normalized message over `states` states
    pub fn uniform(states: usize, log_space: bool) -> Self {
        let p = 1f64 / states as f64;
        let values = if log_space {
            Array1::from_elem(states, p.ln())
        } else {
            Array1::from_elem(states, p)
        };
        Message { values, log_space }
    }

    /// Builds a message from unnormalized probabilities
    pub fn from_probabilities(mut probs: Array1<f64>, log_space: bool) -> FGResult<Self> {
        normalize(&mut probs, "message")?;
        if log_space {
            probs.mapv_inplace(f64::ln);
        }
        Ok(Message {
            values: probs,
            log_space,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    #[inline]
    pub fn is_log_space(&self) -> bool {
        self.log_space
    }

    /// Value of a state in probability space
    #[inline(always)]
    pub fn probability(&self, state: usize) -> f64 {
        if self.log_space {
            self.values[state].exp()
        } else {
            self.values[state]
        }
    }

    /// Message in probability space
    pub fn to_probabilities(&self) -> Array1<f64> {
        if self.log_space {
            self.values.mapv(f64::exp)
        } else {
            self.values.clone()
        }
    }

    /// Evaluates a distance between messages: the maximal absolute
    /// per-state difference of probabilities
    ///
    /// # Notes
    ///
    /// This method is used in message passing in order to
    /// define a stopping criterion: when discrepancy is smaller
    /// than some threshold, message passing stops
    pub fn discrepancy(&self, other: &Self) -> f64 {
        let mut max_discrepancy = 0f64;
        for state in 0..self.len() {
            let d = (self.probability(state) - other.probability(state)).abs();
            if d > max_discrepancy || d.is_nan() {
                max_discrepancy = d;
            }
        }
        max_discrepancy
    }
}

// ------------------------------------------------------------------------------------------

/// Divides a vector by its sum. An all-zero or NaN vector is a numeric failure
pub(crate) fn normalize(values: &mut Array1<f64>, context: &str) -> FGResult<()> {
    let sum = values.sum();
    if !(sum > 0f64) || !sum.is_finite() {
        return Err(FGError::NumericError(format!(
            "{context}: cannot normalize a vector with sum {sum}"
        )));
    }
    *values /= sum;
    Ok(())
}

/// Converts log values to probabilities in place by subtracting the maximum
/// before exponentiating. Returns the subtracted shift
pub(crate) fn exp_shifted(values: &mut [f64], context: &str) -> FGResult<f64> {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || max.is_nan() {
        return Err(FGError::NumericError(format!(
            "{context}: all log values are -inf or NaN"
        )));
    }
    for v in values.iter_mut() {
        *v = (*v - max).exp();
    }
    Ok(max)
}

/// `sum_x p(x) ln q(x)` with the convention `0 ln 0 = 0`
#[inline]
pub(crate) fn cross_entropy_term(p: &Array1<f64>, q: &Array1<f64>) -> f64 {
    p.iter()
        .zip(q.iter())
        .filter(|(p, _)| **p > 0f64)
        .map(|(p, q)| p * q.ln())
        .sum()
}

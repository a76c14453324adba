/// Temperatures of the deterministic annealing schedule, the exponent of
/// expected counts at round `i` is `1 / temperatures[i]` and 1 afterwards
pub const DEFAULT_ANNEALING_TEMPERATURES: [f64; 4] = [8f64, 4f64, 2f64, 1.5f64];

/// Returns a scheduler of the exponent applied to expected counts of an
/// EM round for deterministic annealing
///
/// # Arguments
///
/// * `temperatures` - Temperatures of the first rounds, after them the exponent is 1
///
/// # Example
///
/// ```
/// use fgcore::learning::schedulers::get_annealing_exponent_scheduler;
///
/// let scheduler = get_annealing_exponent_scheduler(vec![4., 2.]);
/// assert_eq!(scheduler(0), 0.25);
/// assert_eq!(scheduler(1), 0.5);
/// assert_eq!(scheduler(2), 1.);
/// ```
pub fn get_annealing_exponent_scheduler(temperatures: Vec<f64>) -> impl Fn(usize) -> f64 {
    move |iter| temperatures.get(iter).map_or(1f64, |t| 1f64 / t)
}

/// Returns a scheduler of ordinary EM, the exponent is always 1
pub fn get_standard_exponent_scheduler() -> impl Fn(usize) -> f64 {
    move |_| 1f64
}

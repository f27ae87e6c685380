//! Utility module
//!
//! Helpers shared by the connection machinery.

use std::time::Duration;

use rand::Rng;

/// Spreads a duration uniformly by up to `fraction` of its length in either
/// direction, so that periodic work of many connections does not align
pub fn jitter(duration: Duration, fraction: f64) -> Duration {
    if !(fraction > 0.0) || duration.is_zero() {
        return duration;
    }
    let fraction = fraction.min(1.0);
    let factor = 1.0 + rand::thread_rng().gen_range(-fraction..=fraction);
    duration.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_secs(30);
        for _ in 0..1000 {
            let d = jitter(base, 0.1);
            assert!(d >= Duration::from_secs(27) && d <= Duration::from_secs(33), "{:?}", d);
        }
    }

    #[test]
    fn test_no_jitter() {
        let base = Duration::from_secs(30);
        assert_eq!(jitter(base, 0.0), base);
        assert_eq!(jitter(base, f64::NAN), base);
        assert_eq!(jitter(Duration::ZERO, 0.1), Duration::ZERO);
    }
}

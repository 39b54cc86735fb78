//! Small numeric helpers shared by the trackers.

pub(crate) fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// `exp` with a clamped argument, so confidence math never overflows.
pub(crate) fn safe_exp(x: f64) -> f64 {
    if x < -80.0 {
        return 0.0;
    }
    if x > 80.0 {
        return 80.0_f64.exp();
    }
    x.exp()
}

/// Round `v` to the nearest multiple of `q`; identity when `q` is not
/// positive.
pub(crate) fn quantize(v: f64, q: f64) -> f64 {
    if q > 0.0 {
        (v / q).round() * q
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_rounds_to_multiples() {
        assert_eq!(quantize(1.4, 1.0), 1.0);
        assert_eq!(quantize(1.6, 1.0), 2.0);
        assert_eq!(quantize(-0.7, 0.5), -0.5);
        assert_eq!(quantize(3.3, 0.0), 3.3);
        assert_eq!(quantize(3.3, -1.0), 3.3);
    }

    #[test]
    fn safe_exp_saturates() {
        assert_eq!(safe_exp(-1000.0), 0.0);
        assert!(safe_exp(1000.0).is_finite());
    }
}

//! Decode-time smoothing of H-transform coefficients.
//!
//! Before each inverse level the x, y and curvature differences of interior
//! blocks are nudged toward values that interpolate the neighbouring block
//! means, without breaking monotonicity and never by more than half the
//! digitization step. Edge blocks are left alone.

/// Clamped slope target for a block with neighbours `hm` and `hp`, or
/// `None` when monotonicity forces the slope to stay put.
fn monotone_target(hm: i128, h0: i128, hp: i128) -> Option<i128> {
    let dmax = (hp - h0).min(h0 - hm).max(0) << 2;
    let dmin = (hp - h0).max(h0 - hm).min(0) << 2;
    (dmin < dmax).then(|| (hp - hm).clamp(dmin, dmax))
}

/// `s / 2^shift` rounded toward zero, limited to `±smax`.
fn limited_step(s: i128, shift: u32, smax: i128) -> i64 {
    let s = if s >= 0 {
        s >> shift
    } else {
        (s + (1 << shift) - 1) >> shift
    };
    s.clamp(-smax, smax) as i64
}

/// Smooth the `nxtop` x `nytop` corner of an array with row length `ny`.
pub(super) fn hsmooth(a: &mut [i64], nxtop: usize, nytop: usize, ny: usize, scale: i64) {
    let smax = (scale >> 1) as i128;
    if smax <= 0 {
        return;
    }
    let ny2 = ny << 1;
    let at = |a: &[i64], idx: usize| a[idx] as i128;

    // x differences
    for i in (2..nxtop.saturating_sub(2)).step_by(2) {
        let mut s00 = ny * i;
        let mut s10 = s00 + ny;
        for _ in (0..nytop).step_by(2) {
            let (hm, h0, hp) = (at(a, s00 - ny2), at(a, s00), at(a, s00 + ny2));
            if let Some(diff) = monotone_target(hm, h0, hp) {
                a[s10] += limited_step(diff - (at(a, s10) << 3), 3, smax);
            }
            s00 += 2;
            s10 += 2;
        }
    }

    // y differences
    for i in (0..nxtop).step_by(2) {
        let mut s00 = ny * i + 2;
        for _ in (2..nytop.saturating_sub(2)).step_by(2) {
            let (hm, h0, hp) = (at(a, s00 - 2), at(a, s00), at(a, s00 + 2));
            if let Some(diff) = monotone_target(hm, h0, hp) {
                a[s00 + 1] += limited_step(diff - (at(a, s00 + 1) << 3), 3, smax);
            }
            s00 += 2;
        }
    }

    // curvature
    for i in (2..nxtop.saturating_sub(2)).step_by(2) {
        let mut s00 = ny * i + 2;
        let mut s10 = s00 + ny;
        for _ in (2..nytop.saturating_sub(2)).step_by(2) {
            let hmm = at(a, s00 - ny2 - 2);
            let hpm = at(a, s00 + ny2 - 2);
            let hmp = at(a, s00 - ny2 + 2);
            let hpp = at(a, s00 + ny2 + 2);
            let h0 = at(a, s00);
            let diff = hpp + hmm - hmp - hpm;
            let hx2 = at(a, s10) << 1;
            let hy2 = at(a, s00 + 1) << 1;

            let m1 = ((hpp - h0).max(0) - hx2 - hy2).min((h0 - hpm).max(0) + hx2 - hy2);
            let m2 = ((h0 - hmp).max(0) - hx2 + hy2).min((hmm - h0).max(0) + hx2 + hy2);
            let dmax = m1.min(m2) << 4;
            let m1 = ((hpp - h0).min(0) - hx2 - hy2).max((h0 - hpm).min(0) + hx2 - hy2);
            let m2 = ((h0 - hmp).min(0) - hx2 + hy2).max((hmm - h0).min(0) + hx2 + hy2);
            let dmin = m1.max(m2) << 4;

            if dmin < dmax {
                let diff = diff.clamp(dmin, dmax);
                a[s10 + 1] += limited_step(diff - (at(a, s10 + 1) << 6), 6, smax);
            }
            s00 += 2;
            s10 += 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_change_without_scale() {
        let mut a: Vec<i64> = (0..64).map(|v| v * 3 % 17).collect();
        let before = a.clone();
        hsmooth(&mut a, 8, 8, 8, 1);
        assert_eq!(a, before);
    }

    #[test]
    fn test_steps_are_limited() {
        let mut a = vec![0i64; 64];
        // a ramp of block means along x with flat slopes
        for i in (0..8).step_by(2) {
            for j in (0..8).step_by(2) {
                a[i * 8 + j] = (i as i64) * 100;
            }
        }
        let before = a.clone();
        hsmooth(&mut a, 8, 8, 8, 6);
        for (idx, (&x, &y)) in a.iter().zip(&before).enumerate() {
            assert!((x - y).abs() <= 3, "index {idx}: {y} -> {x}");
        }
        // the interior x difference moved toward the ramp slope
        assert!(a[3 * 8] > 0);
    }

    #[test]
    fn test_monotone_target() {
        assert_eq!(monotone_target(0, 5, 10), Some(10));
        // a local peak keeps its slope
        assert_eq!(monotone_target(0, 10, 0), None);
        // steep side limits the target
        assert_eq!(monotone_target(0, 1, 10), Some(4));
    }

    #[test]
    fn test_limited_step_rounds_toward_zero() {
        assert_eq!(limited_step(15, 3, 100), 1);
        assert_eq!(limited_step(-15, 3, 100), -1);
        assert_eq!(limited_step(-800, 3, 5), -5);
    }
}

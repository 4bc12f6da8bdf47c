//! Forward and inverse H-transform of a row-major `nx` x `ny` array.
//!
//! `nx` counts rows (the slow axis) and `ny` the samples in each row.
//! Coefficients are kept in place: after the forward transform the
//! low-pass sums of each level sit in the top-left corner.

use super::smooth::hsmooth;

/// Number of transform levels: `ceil(log2(max(nx, ny)))`.
pub(super) fn levels(nx: usize, ny: usize) -> u32 {
    let nmax = nx.max(ny);
    if nmax <= 1 {
        0
    } else {
        usize::BITS - (nmax - 1).leading_zeros()
    }
}

/// Round a difference coefficient onto `mask`, pushing positive values up.
fn round_diff(h: i64, prnd: i64, mask: i64) -> i64 {
    (if h >= 0 { h + prnd } else { h }) & mask
}

/// Round `h` onto `mask`, half away from zero.
fn round_sum(h: i64, prnd: i64, nrnd: i64, mask: i64) -> i64 {
    (h + if h >= 0 { prnd } else { nrnd }) & mask
}

/// Move the even elements of a strided line to its front and the odd ones
/// behind them.
fn shuffle(a: &mut [i64], start: usize, n: usize, stride: usize, tmp: &mut Vec<i64>) {
    tmp.clear();
    tmp.extend((1..n).step_by(2).map(|i| a[start + i * stride]));
    for (dst, src) in (2..n).step_by(2).enumerate() {
        a[start + (dst + 1) * stride] = a[start + src * stride];
    }
    let nhalf = n.div_ceil(2);
    for (k, &v) in tmp.iter().enumerate() {
        a[start + (nhalf + k) * stride] = v;
    }
}

/// Inverse of [`shuffle`].
fn unshuffle(a: &mut [i64], start: usize, n: usize, stride: usize, tmp: &mut Vec<i64>) {
    let nhalf = n.div_ceil(2);
    tmp.clear();
    tmp.extend((nhalf..n).map(|i| a[start + i * stride]));
    for i in (1..nhalf).rev() {
        a[start + 2 * i * stride] = a[start + i * stride];
    }
    for (k, &v) in tmp.iter().enumerate() {
        a[start + (2 * k + 1) * stride] = v;
    }
}

pub(super) fn htrans(a: &mut [i64], nx: usize, ny: usize) {
    let log2n = levels(nx, ny);
    let mut tmp = Vec::with_capacity(nx.max(ny).div_ceil(2));

    let mut shift = 0u32;
    let mut mask: i64 = -2;
    let mut mask2 = mask << 1;
    let mut prnd: i64 = 1;
    let mut prnd2 = prnd << 1;
    let mut nrnd2 = prnd2 - 1;
    let (mut nxtop, mut nytop) = (nx, ny);

    for _ in 0..log2n {
        let oddx = nxtop % 2;
        let oddy = nytop % 2;

        for i in (0..nxtop - oddx).step_by(2) {
            let mut s00 = i * ny;
            let mut s10 = s00 + ny;
            for _ in (0..nytop - oddy).step_by(2) {
                let (p00, p01, p10, p11) = (a[s00], a[s00 + 1], a[s10], a[s10 + 1]);
                let h0 = (p11 + p10 + p01 + p00) >> shift;
                let hx = (p11 + p10 - p01 - p00) >> shift;
                let hy = (p11 - p10 + p01 - p00) >> shift;
                let hc = (p11 - p10 - p01 + p00) >> shift;
                a[s10 + 1] = hc;
                a[s10] = round_diff(hx, prnd, mask);
                a[s00 + 1] = round_diff(hy, prnd, mask);
                a[s00] = round_sum(h0, prnd2, nrnd2, mask2);
                s00 += 2;
                s10 += 2;
            }
            if oddy == 1 {
                // last column: only two samples in the block
                let h0 = (a[s10] + a[s00]) << (1 - shift);
                let hx = (a[s10] - a[s00]) << (1 - shift);
                a[s10] = round_diff(hx, prnd, mask);
                a[s00] = round_sum(h0, prnd2, nrnd2, mask2);
            }
        }
        if oddx == 1 {
            let mut s00 = (nxtop - 1) * ny;
            for _ in (0..nytop - oddy).step_by(2) {
                let h0 = (a[s00 + 1] + a[s00]) << (1 - shift);
                let hy = (a[s00 + 1] - a[s00]) << (1 - shift);
                a[s00 + 1] = round_diff(hy, prnd, mask);
                a[s00] = round_sum(h0, prnd2, nrnd2, mask2);
                s00 += 2;
            }
            if oddy == 1 {
                let h0 = a[s00] << (2 - shift);
                a[s00] = round_sum(h0, prnd2, nrnd2, mask2);
            }
        }

        for i in 0..nxtop {
            shuffle(a, ny * i, nytop, 1, &mut tmp);
        }
        for j in 0..nytop {
            shuffle(a, j, nxtop, ny, &mut tmp);
        }

        nxtop = nxtop.div_ceil(2);
        nytop = nytop.div_ceil(2);
        shift = 1;
        mask = mask2;
        prnd = prnd2;
        mask2 <<= 1;
        prnd2 <<= 1;
        nrnd2 = prnd2 - 1;
    }
}

pub(super) fn hinv(a: &mut [i64], nx: usize, ny: usize, smooth: bool, scale: i64) {
    let log2n = levels(nx, ny);
    if log2n == 0 {
        return;
    }
    let mut tmp = Vec::with_capacity(nx.max(ny).div_ceil(2));

    let mut shift = 1u32;
    let mut bit0: i64 = 1 << (log2n - 1);
    let mut bit1 = bit0 << 1;
    let mut mask0 = -bit0;
    let mut mask1 = mask0 << 1;
    let mask2 = mask0 << 2;
    let mut prnd0 = bit0 >> 1;
    let mut prnd1 = bit1 >> 1;
    let prnd2 = bit1;
    let mut nrnd0 = prnd0 - 1;
    let mut nrnd1 = prnd1 - 1;
    let nrnd2 = prnd2 - 1;

    a[0] = round_sum(a[0], prnd2, nrnd2, mask2);

    let (mut nxtop, mut nytop) = (1usize, 1usize);
    let (mut nxf, mut nyf) = (nx, ny);
    let mut c = 1usize << log2n;
    for k in (0..log2n).rev() {
        // nxtop for this level is ceil of the next level's extent over two
        c >>= 1;
        nxtop <<= 1;
        nytop <<= 1;
        if nxf <= c {
            nxtop -= 1;
        } else {
            nxf -= c;
        }
        if nyf <= c {
            nytop -= 1;
        } else {
            nyf -= c;
        }
        if k == 0 {
            nrnd0 = 0;
            shift = 2;
        }

        for i in 0..nxtop {
            unshuffle(a, ny * i, nytop, 1, &mut tmp);
        }
        for j in 0..nytop {
            unshuffle(a, j, nxtop, ny, &mut tmp);
        }
        if smooth {
            hsmooth(a, nxtop, nytop, ny, scale);
        }

        let oddx = nxtop % 2;
        let oddy = nytop % 2;
        for i in (0..nxtop - oddx).step_by(2) {
            let mut s00 = ny * i;
            let mut s10 = s00 + ny;
            for _ in (0..nytop - oddy).step_by(2) {
                let mut h0 = a[s00];
                let hx = round_sum(a[s10], prnd1, nrnd1, mask1);
                let hy = round_sum(a[s00 + 1], prnd1, nrnd1, mask1);
                let hc = round_sum(a[s10 + 1], prnd0, nrnd0, mask0);

                // carry the low bits of hc into hx, hy and then h0
                let lowbit0 = hc & bit0;
                let hx = if hx >= 0 { hx - lowbit0 } else { hx + lowbit0 };
                let hy = if hy >= 0 { hy - lowbit0 } else { hy + lowbit0 };
                let lowbit1 = (hc ^ hx ^ hy) & bit1;
                h0 = if h0 >= 0 {
                    h0 + lowbit0 - lowbit1
                } else if lowbit0 == 0 {
                    h0 + lowbit1
                } else {
                    h0 + lowbit0 - lowbit1
                };

                a[s10 + 1] = (h0 + hx + hy + hc) >> shift;
                a[s10] = (h0 + hx - hy - hc) >> shift;
                a[s00 + 1] = (h0 - hx + hy - hc) >> shift;
                a[s00] = (h0 - hx - hy + hc) >> shift;
                s00 += 2;
                s10 += 2;
            }
            if oddy == 1 {
                let hx = round_sum(a[s10], prnd1, nrnd1, mask1);
                let lowbit1 = hx & bit1;
                let h0 = if a[s00] >= 0 {
                    a[s00] - lowbit1
                } else {
                    a[s00] + lowbit1
                };
                a[s10] = (h0 + hx) >> shift;
                a[s00] = (h0 - hx) >> shift;
            }
        }
        if oddx == 1 {
            let mut s00 = ny * (nxtop - 1);
            for _ in (0..nytop - oddy).step_by(2) {
                let hy = round_sum(a[s00 + 1], prnd1, nrnd1, mask1);
                let lowbit1 = hy & bit1;
                let h0 = if a[s00] >= 0 {
                    a[s00] - lowbit1
                } else {
                    a[s00] + lowbit1
                };
                a[s00 + 1] = (h0 + hy) >> shift;
                a[s00] = (h0 - hy) >> shift;
                s00 += 2;
            }
            if oddy == 1 {
                a[s00] >>= shift;
            }
        }

        bit1 = bit0;
        bit0 >>= 1;
        mask1 = mask0;
        mask0 >>= 1;
        prnd1 = prnd0;
        prnd0 >>= 1;
        nrnd1 = nrnd0;
        nrnd0 = prnd0 - 1;
    }
}

/// Divide by `scale`, rounding half away from zero. No-op for `scale <= 1`.
pub(super) fn digitize(a: &mut [i64], scale: i64) {
    if scale <= 1 {
        return;
    }
    let d = (scale + 1) / 2 - 1;
    for v in a {
        *v = if *v > 0 { *v + d } else { *v - d } / scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        let cases = [(1, 1, 0), (1, 2, 1), (3, 1, 2), (4, 4, 2), (5, 2, 3), (64, 17, 6)];
        for (nx, ny, want) in cases {
            assert_eq!(levels(nx, ny), want, "{nx}x{ny}");
        }
    }

    #[test]
    fn test_shuffle_and_unshuffle() {
        let mut tmp = Vec::new();
        let mut a: Vec<i64> = (0..7).collect();
        shuffle(&mut a, 0, 7, 1, &mut tmp);
        assert_eq!(a, vec![0, 2, 4, 6, 1, 3, 5]);
        unshuffle(&mut a, 0, 7, 1, &mut tmp);
        assert_eq!(a, (0..7).collect::<Vec<_>>());

        // a column of a 3 x 2 array
        let mut b: Vec<i64> = vec![0, 10, 1, 11, 2, 12];
        shuffle(&mut b, 0, 3, 2, &mut tmp);
        assert_eq!(b, vec![0, 10, 2, 11, 1, 12]);
    }

    #[test]
    fn test_two_by_two_coefficients() {
        let mut a = vec![1, 2, 3, 4];
        htrans(&mut a, 2, 2);
        // sum, x difference, y difference, curvature
        assert_eq!(a, vec![12, 2, 4, 0]);
        hinv(&mut a, 2, 2, false, 0);
        assert_eq!(a, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_inverse_is_exact_for_odd_shapes() {
        let mut state = 7u64;
        for (nx, ny) in [(3, 5), (5, 3), (1, 9), (9, 1), (7, 7), (6, 11)] {
            let original: Vec<i64> = (0..nx * ny)
                .map(|_| {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(11);
                    (state >> 44) as i64 - (1 << 19)
                })
                .collect();
            let mut a = original.clone();
            htrans(&mut a, nx, ny);
            hinv(&mut a, nx, ny, false, 0);
            assert_eq!(a, original, "{nx}x{ny}");
        }
    }

    #[test]
    fn test_digitize_rounds_half_away_from_zero() {
        let mut a = vec![7, -7, 5, -5, 4, 0];
        digitize(&mut a, 4);
        // d = 1: (7+1)/4, (-7-1)/4, (5+1)/4, (-5-1)/4, (4+1)/4, (0-1)/4
        assert_eq!(a, vec![2, -2, 1, -1, 1, 0]);
    }
}

// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `mdct` module implements the Inverse Modified Discrete Cosine Transform (IMDCT).
//!
//! The IMDCT follows the factorization of Sporer, Brandenburg and Edler ("The Use of Multirate
//! Filter Banks for Coding of High Quality Digital Audio"), with its eight steps arranged in the
//! same order, and with the same single precision twiddle factors, as the widely deployed
//! reference decoders. Every floating point operation is performed in the same sequence, so the
//! output is bit-identical to theirs rather than merely close.

use std::f64::consts::PI;

/// The Inverse Modified Discrete Cosine Transform (IMDCT).
pub struct Imdct {
    /// The number of output samples, N.
    n: usize,
    /// Twiddle factors for steps 0 to 3, N/2 values.
    a: Box<[f32]>,
    /// Twiddle factors for step 8, N/2 values, pre-scaled by 1/2.
    b: Box<[f32]>,
    /// Twiddle factors for step 7, N/4 values.
    c: Box<[f32]>,
    /// Bit-reversed quad offsets, N/8 values.
    bit_rev: Box<[u16]>,
    /// N/2 samples of scratch.
    scratch: Box<[f32]>,
}

impl Imdct {
    /// Instantiate an IMDCT taking `n` spectral samples to `2n` output samples, with no scaling.
    ///
    /// The value of `n` must be a power-of-2 between 32 and 4096.
    pub fn new(n: usize) -> Self {
        assert!(n.is_power_of_two() && (32..=4096).contains(&n), "invalid imdct size");

        let size = n << 1;
        let n4 = size >> 2;
        let n8 = size >> 3;

        let mut a = vec![0.0; n].into_boxed_slice();
        let mut b = vec![0.0; n].into_boxed_slice();
        let mut c = vec![0.0; n4].into_boxed_slice();

        let nf = size as f64;

        for k in 0..n4 {
            let k2 = 2 * k;

            let theta = (4 * k) as f64 * PI / nf;
            a[k2] = theta.cos() as f32;
            a[k2 + 1] = -theta.sin() as f32;

            let theta = (k2 + 1) as f64 * PI / nf / 2.0;
            b[k2] = theta.cos() as f32 * 0.5;
            b[k2 + 1] = theta.sin() as f32 * 0.5;
        }

        for k in 0..n8 {
            let k2 = 2 * k;

            let theta = (2 * (k2 + 1)) as f64 * PI / nf;
            c[k2] = theta.cos() as f32;
            c[k2 + 1] = -theta.sin() as f32;
        }

        let ld = size.trailing_zeros();

        let bit_rev =
            (0..n8 as u32).map(|i| ((i.reverse_bits() >> (32 - ld + 3)) << 2) as u16).collect();

        Imdct { n: size, a, b, c, bit_rev, scratch: vec![0.0; n].into_boxed_slice() }
    }

    /// Performs the Inverse Modified Discrete Cosine Transform.
    ///
    /// The number of input spectral samples provided by the slice `spec` must equal the value of `n`
    /// that the IMDCT was instantiated with. The length of the output slice, `out`, must be `2n`.
    /// Failing to meet these requirements will throw an assertion.
    pub fn imdct(&mut self, spec: &[f32], out: &mut [f32]) {
        let Imdct { n, a, b, c, bit_rev, scratch } = self;

        let n = *n;
        let n2 = n >> 1;
        let n4 = n >> 2;
        let n8 = n >> 3;

        assert_eq!(spec.len(), n2);
        assert_eq!(out.len(), n);

        let u = out;
        let v = &mut scratch[..];

        // Step 0. Reflect the spectrum, and rotate it into v.
        let mut aa = 0;

        for k in 0..n8 {
            let d = n2 - 2 - 2 * k;
            let e = 4 * k;

            v[d + 1] = spec[e] * a[aa] - spec[e + 2] * a[aa + 1];
            v[d] = spec[e] * a[aa + 1] + spec[e + 2] * a[aa];
            aa += 2;
        }

        for k in 0..n8 {
            let d = n4 - 2 - 2 * k;
            let e = n2 - 3 - 4 * k;

            v[d + 1] = (-spec[e + 2]) * a[aa] + spec[e] * a[aa + 1];
            v[d] = (-spec[e + 2]) * a[aa + 1] - spec[e] * a[aa];
            aa += 2;
        }

        // Step 2. v to u.
        for it in 0..n >> 4 {
            let aa = n2 - 8 - 8 * it;
            let e1 = 4 * it;
            let e0 = n4 + e1;

            let v41 = v[e0 + 1] - v[e1 + 1];
            let v40 = v[e0] - v[e1];
            u[e0 + 1] = v[e0 + 1] + v[e1 + 1];
            u[e0] = v[e0] + v[e1];
            u[e1 + 1] = v41 * a[aa + 4] - v40 * a[aa + 5];
            u[e1] = v40 * a[aa + 4] + v41 * a[aa + 5];

            let v41 = v[e0 + 3] - v[e1 + 3];
            let v40 = v[e0 + 2] - v[e1 + 2];
            u[e0 + 3] = v[e0 + 3] + v[e1 + 3];
            u[e0 + 2] = v[e0 + 2] + v[e1 + 2];
            u[e1 + 3] = v41 * a[aa] - v40 * a[aa + 1];
            u[e1 + 2] = v40 * a[aa] + v41 * a[aa + 1];
        }

        // Step 3. In-place butterflies on u. The final three passes are merged into one.
        let ld = n.trailing_zeros() as usize;

        for l in 0..ld.saturating_sub(6) {
            let k0 = n >> (l + 2);
            let k0_2 = k0 >> 1;
            let k1 = 1 << (l + 3);
            let lim = 1 << (l + 1);

            if l < 2 || l < (ld - 3) >> 1 {
                for i in 0..lim {
                    step3_inner_r_loop(u, n >> (l + 4), n2 - 1 - k0 * i, k0_2, a, k1);
                }
            }
            else {
                let mut a0 = 0;
                let mut i_off = n2 - 1;

                for _ in 0..n >> (l + 6) {
                    step3_inner_s_loop(u, lim, i_off, k0_2, &a[a0..], k1, k0);
                    a0 += 4 * k1;
                    i_off -= 8;
                }
            }
        }

        step3_inner_s_loop_ld654(u, n >> 5, n2 - 1, a[n >> 3]);

        // Steps 4, 5, and 6. Bit-reverse u into v.
        for (it, rev) in bit_rev.chunks_exact(2).enumerate() {
            let d0 = n4 - 4 - 4 * it;
            let d1 = n2 - 4 - 4 * it;

            let k4 = usize::from(rev[0]);
            v[d1 + 3] = u[k4];
            v[d1 + 2] = u[k4 + 1];
            v[d0 + 3] = u[k4 + 2];
            v[d0 + 2] = u[k4 + 3];

            let k4 = usize::from(rev[1]);
            v[d1 + 1] = u[k4];
            v[d1] = u[k4 + 1];
            v[d0 + 1] = u[k4 + 2];
            v[d0] = u[k4 + 3];
        }

        // Step 7. In-place on v.
        for (it, c) in c.chunks_exact(4).enumerate() {
            let d = 4 * it;
            let e = n2 - 4 - 4 * it;

            let a02 = v[d] - v[e + 2];
            let a11 = v[d + 1] + v[e + 3];

            let b0 = c[1] * a02 + c[0] * a11;
            let b1 = c[1] * a11 - c[0] * a02;

            let b2 = v[d] + v[e + 2];
            let b3 = v[d + 1] - v[e + 3];

            v[d] = b2 + b0;
            v[d + 1] = b3 + b1;
            v[e + 2] = b2 - b0;
            v[e + 3] = b1 - b3;

            let a02 = v[d + 2] - v[e];
            let a11 = v[d + 3] + v[e + 1];

            let b0 = c[3] * a02 + c[2] * a11;
            let b1 = c[3] * a11 - c[2] * a02;

            let b2 = v[d + 2] + v[e];
            let b3 = v[d + 3] - v[e + 1];

            v[d + 2] = b2 + b0;
            v[d + 3] = b3 + b1;
            v[e] = b2 - b0;
            v[e + 1] = b1 - b3;
        }

        // Step 8. Rotate v, and unfold it into all four quarters of the output.
        for it in 0..n >> 4 {
            let e = n2 - 8 - 8 * it;
            let b = &b[e..e + 8];

            let d0 = 4 * it;
            let d1 = n2 - 4 - 4 * it;
            let d2 = n2 + 4 * it;
            let d3 = n - 4 - 4 * it;

            let p3 = v[e + 6] * b[7] - v[e + 7] * b[6];
            let p2 = (-v[e + 6]) * b[6] - v[e + 7] * b[7];

            u[d0] = p3;
            u[d1 + 3] = -p3;
            u[d2] = p2;
            u[d3 + 3] = p2;

            let p1 = v[e + 4] * b[5] - v[e + 5] * b[4];
            let p0 = (-v[e + 4]) * b[4] - v[e + 5] * b[5];

            u[d0 + 1] = p1;
            u[d1 + 2] = -p1;
            u[d2 + 1] = p0;
            u[d3 + 2] = p0;

            let p3 = v[e + 2] * b[3] - v[e + 3] * b[2];
            let p2 = (-v[e + 2]) * b[2] - v[e + 3] * b[3];

            u[d0 + 2] = p3;
            u[d1 + 1] = -p3;
            u[d2 + 2] = p2;
            u[d3 + 1] = p2;

            let p1 = v[e] * b[1] - v[e + 1] * b[0];
            let p0 = (-v[e]) * b[0] - v[e + 1] * b[1];

            u[d0 + 3] = p1;
            u[d1] = -p1;
            u[d2 + 3] = p0;
            u[d3] = p0;
        }
    }
}

/// The step 3 butterfly on the pairs ending at `i0` and `i2`.
#[inline(always)]
fn butterfly(e: &mut [f32], i0: usize, i2: usize, a0: f32, a1: f32) {
    let k00 = e[i0] - e[i2];
    let k11 = e[i0 - 1] - e[i2 - 1];
    e[i0] += e[i2];
    e[i0 - 1] += e[i2 - 1];
    e[i2] = k00 * a0 - k11 * a1;
    e[i2 - 1] = k11 * a0 + k00 * a1;
}

/// One step 3 pass over a single group, stepping through the twiddles by `k1` per butterfly.
fn step3_inner_r_loop(e: &mut [f32], lim: usize, d0: usize, k_off: usize, a: &[f32], k1: usize) {
    let mut aa = 0;

    for it in 0..lim >> 2 {
        let i0 = d0 - 8 * it;
        let i2 = i0 - k_off;

        for off in [0, 2, 4, 6] {
            butterfly(e, i0 - off, i2 - off, a[aa], a[aa + 1]);
            aa += k1;
        }
    }
}

/// One step 3 pass over `n` groups spaced `k0` apart, sharing four twiddles.
fn step3_inner_s_loop(
    e: &mut [f32],
    n: usize,
    i_off: usize,
    k_off: usize,
    a: &[f32],
    a_off: usize,
    k0: usize,
) {
    let twiddles = [
        (a[0], a[1]),
        (a[a_off], a[a_off + 1]),
        (a[2 * a_off], a[2 * a_off + 1]),
        (a[3 * a_off], a[3 * a_off + 1]),
    ];

    for it in 0..n {
        let i0 = i_off - k0 * it;
        let i2 = i0 - k_off;

        for (j, &(a0, a1)) in twiddles.iter().enumerate() {
            butterfly(e, i0 - 2 * j, i2 - 2 * j, a0, a1);
        }
    }
}

/// The last three step 3 passes over `n` groups of 16, where the twiddles are trivial except for
/// `a2`, which is cos(pi/4).
fn step3_inner_s_loop_ld654(e: &mut [f32], n: usize, i_off: usize, a2: f32) {
    for it in 0..n {
        let z = i_off - 16 * it;

        let k00 = e[z] - e[z - 8];
        let k11 = e[z - 1] - e[z - 9];
        let l00 = e[z - 2] - e[z - 10];
        let l11 = e[z - 3] - e[z - 11];
        e[z] += e[z - 8];
        e[z - 1] += e[z - 9];
        e[z - 2] += e[z - 10];
        e[z - 3] += e[z - 11];
        e[z - 8] = k00;
        e[z - 9] = k11;
        e[z - 10] = (l00 + l11) * a2;
        e[z - 11] = (l11 - l00) * a2;

        let k00 = e[z - 4] - e[z - 12];
        let k11 = e[z - 5] - e[z - 13];
        let l00 = e[z - 6] - e[z - 14];
        let l11 = e[z - 7] - e[z - 15];
        e[z - 4] += e[z - 12];
        e[z - 5] += e[z - 13];
        e[z - 6] += e[z - 14];
        e[z - 7] += e[z - 15];
        e[z - 12] = k11;
        e[z - 13] = -k00;
        e[z - 14] = (l11 - l00) * a2;
        e[z - 15] = (l00 + l11) * -a2;

        iter_54(e, z);
        iter_54(e, z - 8);
    }
}

fn iter_54(e: &mut [f32], z: usize) {
    let k00 = e[z] - e[z - 4];
    let y0 = e[z] + e[z - 4];
    let y2 = e[z - 2] + e[z - 6];
    let k22 = e[z - 2] - e[z - 6];

    e[z] = y0 + y2;
    e[z - 2] = y0 - y2;

    let k33 = e[z - 3] - e[z - 7];

    e[z - 4] = k00 + k33;
    e[z - 6] = k00 - k33;

    let k11 = e[z - 1] - e[z - 5];
    let y1 = e[z - 1] + e[z - 5];
    let y3 = e[z - 3] + e[z - 7];

    e[z - 1] = y1 + y3;
    e[z - 3] = y1 - y3;
    e[z - 5] = k11 - k22;
    e[z - 7] = k11 + k22;
}

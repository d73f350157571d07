// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use quaver_core::errors::{setup_error, unsupported_error, Error, Result};
use quaver_core::io::{BitReaderRtl, ReadBitsRtl};

use log::debug;

use super::codebook::VorbisCodebook;
use super::common::*;

/// As defined in section 10.1 of the Vorbis I specification.
#[allow(clippy::unreadable_literal)]
#[allow(clippy::excessive_precision)]
#[rustfmt::skip]
const FLOOR1_INVERSE_DB_TABLE: [f32; 256] = [
    1.0649863e-07, 1.1341951e-07, 1.2079015e-07, 1.2863978e-07,
    1.3699951e-07, 1.4590251e-07, 1.5538408e-07, 1.6548181e-07,
    1.7623575e-07, 1.8768855e-07, 1.9988561e-07, 2.1287530e-07,
    2.2670913e-07, 2.4144197e-07, 2.5713223e-07, 2.7384213e-07,
    2.9163793e-07, 3.1059021e-07, 3.3077411e-07, 3.5226968e-07,
    3.7516214e-07, 3.9954229e-07, 4.2550680e-07, 4.5315863e-07,
    4.8260743e-07, 5.1396998e-07, 5.4737065e-07, 5.8294187e-07,
    6.2082472e-07, 6.6116941e-07, 7.0413592e-07, 7.4989464e-07,
    7.9862701e-07, 8.5052630e-07, 9.0579828e-07, 9.6466216e-07,
    1.0273513e-06, 1.0941144e-06, 1.1652161e-06, 1.2409384e-06,
    1.3215816e-06, 1.4074654e-06, 1.4989305e-06, 1.5963394e-06,
    1.7000785e-06, 1.8105592e-06, 1.9282195e-06, 2.0535261e-06,
    2.1869758e-06, 2.3290978e-06, 2.4804557e-06, 2.6416497e-06,
    2.8133190e-06, 2.9961443e-06, 3.1908506e-06, 3.3982101e-06,
    3.6190449e-06, 3.8542308e-06, 4.1047004e-06, 4.3714470e-06,
    4.6555282e-06, 4.9580707e-06, 5.2802740e-06, 5.6234160e-06,
    5.9888572e-06, 6.3780469e-06, 6.7925283e-06, 7.2339451e-06,
    7.7040476e-06, 8.2047000e-06, 8.7378876e-06, 9.3057248e-06,
    9.9104632e-06, 1.0554501e-05, 1.1240392e-05, 1.1970856e-05,
    1.2748789e-05, 1.3577278e-05, 1.4459606e-05, 1.5399272e-05,
    1.6400004e-05, 1.7465768e-05, 1.8600792e-05, 1.9809576e-05,
    2.1096914e-05, 2.2467911e-05, 2.3928002e-05, 2.5482978e-05,
    2.7139006e-05, 2.8902651e-05, 3.0780908e-05, 3.2781225e-05,
    3.4911534e-05, 3.7180282e-05, 3.9596466e-05, 4.2169667e-05,
    4.4910090e-05, 4.7828601e-05, 5.0936773e-05, 5.4246931e-05,
    5.7772202e-05, 6.1526565e-05, 6.5524908e-05, 6.9783085e-05,
    7.4317983e-05, 7.9147585e-05, 8.4291040e-05, 8.9768747e-05,
    9.5602426e-05, 0.00010181521, 0.00010843174, 0.00011547824,
    0.00012298267, 0.00013097477, 0.00013948625, 0.00014855085,
    0.00015820453, 0.00016848555, 0.00017943469, 0.00019109536,
    0.00020351382, 0.00021673929, 0.00023082423, 0.00024582449,
    0.00026179955, 0.00027881276, 0.00029693158, 0.00031622787,
    0.00033677814, 0.00035866388, 0.00038197188, 0.00040679456,
    0.00043323036, 0.00046138411, 0.00049136745, 0.00052329927,
    0.00055730621, 0.00059352311, 0.00063209358, 0.00067317058,
    0.00071691700, 0.00076350630, 0.00081312324, 0.00086596457,
    0.00092223983, 0.00098217216, 0.0010459992,  0.0011139742,
    0.0011863665,  0.0012634633,  0.0013455702,  0.0014330129,
    0.0015261382,  0.0016253153,  0.0017309374,  0.0018434235,
    0.0019632195,  0.0020908006,  0.0022266726,  0.0023713743,
    0.0025254795,  0.0026895994,  0.0028643847,  0.0030505286,
    0.0032487691,  0.0034598925,  0.0036847358,  0.0039241906,
    0.0041792066,  0.0044507950,  0.0047400328,  0.0050480668,
    0.0053761186,  0.0057254891,  0.0060975636,  0.0064938176,
    0.0069158225,  0.0073652516,  0.0078438871,  0.0083536271,
    0.0088964928,  0.009474637,   0.010090352,   0.010746080,
    0.011444421,   0.012188144,   0.012980198,   0.013823725,
    0.014722068,   0.015678791,   0.016697687,   0.017782797,
    0.018938423,   0.020169149,   0.021479854,   0.022875735,
    0.024362330,   0.025945531,   0.027631618,   0.029427276,
    0.031339626,   0.033376252,   0.035545228,   0.037855157,
    0.040315199,   0.042935108,   0.045725273,   0.048696758,
    0.051861348,   0.055231591,   0.058820850,   0.062643361,
    0.066714279,   0.071049749,   0.075666962,   0.080584227,
    0.085821044,   0.091398179,   0.097337747,   0.10366330,
    0.11039993,    0.11757434,    0.12521498,    0.13335215,
    0.14201813,    0.15124727,    0.16107617,    0.17154380,
    0.18269168,    0.19456402,    0.20720788,    0.22067342,
    0.23501402,    0.25028656,    0.26655159,    0.28387361,
    0.30232132,    0.32196786,    0.34289114,    0.36517414,
    0.38890521,    0.41417847,    0.44109412,    0.46975890,
    0.50028648,    0.53279791,    0.56742212,    0.60429640,
    0.64356699,    0.68538959,    0.72993007,    0.77736504,
    0.82788260,    0.88168307,    0.9389798,     1.0,
];

/// The maximum number of points in a floor 1 curve, including the two end points.
const FLOOR1_MAX_VALUES: usize = 65;

/// The amplitude range of a floor 1 curve for each multiplier.
const FLOOR1_RANGE: [i32; 4] = [256, 128, 86, 64];

macro_rules! try_or_unused {
    ($expr:expr) => {
        match $expr.map_err(Error::from) {
            Ok(val) => val,
            // Running out of packet while reading a floor is not an error. The channel is simply
            // unused for this packet.
            Err(ref e) if is_end_of_packet(e) => return Ok(false),
            Err(e) => return Err(e),
        }
    };
}

/// Reads a floor configuration from the setup header.
pub fn read_floor(bs: &mut BitReaderRtl<'_>, max_codebook: usize) -> Result<Floor1> {
    let floor_type = bs.read_bits_leq32(16)?;

    match floor_type {
        0 => {
            read_floor0_setup(bs, max_codebook)?;
            unsupported_error("vorbis: floor type 0")
        }
        1 => Floor1::read_setup(bs, max_codebook),
        _ => setup_error("vorbis: invalid floor type"),
    }
}

/// Reads and validates a floor 0 configuration. Floor 0 is obsolete and never produced by modern
/// encoders, so its configuration is only validated before the stream is rejected.
fn read_floor0_setup(bs: &mut BitReaderRtl<'_>, max_codebook: usize) -> Result<()> {
    let order = bs.read_bits_leq32(8)?;
    let rate = bs.read_bits_leq32(16)?;
    let bark_map_size = bs.read_bits_leq32(16)?;
    let amplitude_bits = bs.read_bits_leq32(6)?;
    let amplitude_offset = bs.read_bits_leq32(8)?;
    let number_of_books = bs.read_bits_leq32(4)? + 1;

    for _ in 0..number_of_books {
        let book = bs.read_bits_leq32(8)? as usize;

        if book >= max_codebook {
            return setup_error("vorbis: invalid floor 0 codebook");
        }
    }

    debug!(
        "vorbis: floor 0 with order={}, rate={}, bark_map_size={}, amplitude_bits={}, \
         amplitude_offset={}",
        order, rate, bark_map_size, amplitude_bits, amplitude_offset
    );

    Ok(())
}

#[derive(Debug, Default)]
struct Floor1Class {
    /// The number of points (partition dimensions) coded by the class.
    dimensions: u8,
    /// The number of bits of the class value consumed per point.
    subclass_bits: u8,
    /// The codebook used to read the class value.
    masterbook: u8,
    /// The codebook for each subclass, or `None` if the point is always 0.
    subclass_books: [Option<u8>; 8],
}

/// Floor type 1: a piecewise-linear curve in the dB domain.
#[derive(Debug)]
pub struct Floor1 {
    partition_class_list: Vec<u8>,
    classes: Vec<Floor1Class>,
    multiplier: u8,
    x_list: Vec<u32>,
    /// Point indicies in ascending order of X.
    sorted_order: Vec<u8>,
    /// The low and high neighbours of each point. Unused for the two end points.
    neighbors: Vec<(u8, u8)>,
}

impl Floor1 {
    fn read_setup(bs: &mut BitReaderRtl<'_>, max_codebook: usize) -> Result<Self> {
        let partitions = bs.read_bits_leq32(5)? as usize;

        let mut partition_class_list = Vec::with_capacity(partitions);

        for _ in 0..partitions {
            partition_class_list.push(bs.read_bits_leq32(4)? as u8);
        }

        let num_classes = partition_class_list.iter().map(|&c| usize::from(c) + 1).max().unwrap_or(0);

        let mut classes = Vec::with_capacity(num_classes);

        for _ in 0..num_classes {
            let mut class = Floor1Class {
                dimensions: bs.read_bits_leq32(3)? as u8 + 1,
                subclass_bits: bs.read_bits_leq32(2)? as u8,
                ..Default::default()
            };

            if class.subclass_bits > 0 {
                class.masterbook = bs.read_bits_leq32(8)? as u8;

                if usize::from(class.masterbook) >= max_codebook {
                    return setup_error("vorbis: invalid floor 1 masterbook");
                }
            }

            for book in class.subclass_books.iter_mut().take(1 << class.subclass_bits) {
                // Stored as the book number plus 1, where 0 indicates no book.
                let book_plus_one = bs.read_bits_leq32(8)? as usize;

                if book_plus_one > 0 {
                    if book_plus_one - 1 >= max_codebook {
                        return setup_error("vorbis: invalid floor 1 subclass book");
                    }
                    *book = Some((book_plus_one - 1) as u8);
                }
            }

            classes.push(class);
        }

        let multiplier = bs.read_bits_leq32(2)? as u8 + 1;
        let range_bits = bs.read_bits_leq32(4)?;

        let mut x_list = vec![0, 1 << range_bits];

        for &class_idx in &partition_class_list {
            let class = &classes[usize::from(class_idx)];

            for _ in 0..class.dimensions {
                if x_list.len() >= FLOOR1_MAX_VALUES {
                    return setup_error("vorbis: floor 1 has too many points");
                }
                x_list.push(bs.read_bits_leq32(range_bits)?);
            }
        }

        let mut sorted_order: Vec<u8> = (0..x_list.len() as u8).collect();
        sorted_order.sort_by_key(|&i| x_list[usize::from(i)]);

        let has_duplicates = sorted_order
            .windows(2)
            .any(|w| x_list[usize::from(w[0])] == x_list[usize::from(w[1])]);

        if has_duplicates {
            return setup_error("vorbis: floor 1 has duplicate points");
        }

        let neighbors = (0..x_list.len()).map(|i| find_neighbors(&x_list, i)).collect();

        Ok(Floor1 { partition_class_list, classes, multiplier, x_list, sorted_order, neighbors })
    }

    /// Reads the floor for one channel and recovers the amplitude of every point. The amplitude of
    /// a point that does not contribute to the curve is set to -1.
    ///
    /// Returns `false` if the channel is unused in this packet.
    pub fn read_channel(
        &self,
        bs: &mut BitReaderRtl<'_>,
        codebooks: &[VorbisCodebook],
        floor_y: &mut Vec<i32>,
    ) -> Result<bool> {
        let is_nonzero = try_or_unused!(bs.read_bit());

        if !is_nonzero {
            return Ok(false);
        }

        let range = FLOOR1_RANGE[usize::from(self.multiplier - 1)];
        let range_bits = ilog(range as u32 - 1);

        floor_y.clear();
        floor_y.push(try_or_unused!(bs.read_bits_leq32(range_bits)) as i32);
        floor_y.push(try_or_unused!(bs.read_bits_leq32(range_bits)) as i32);

        for &class_idx in &self.partition_class_list {
            let class = &self.classes[usize::from(class_idx)];

            let cbits = class.subclass_bits;
            let csub = (1 << cbits) - 1;

            let mut cval = if cbits > 0 {
                let book = &codebooks[usize::from(class.masterbook)];
                try_or_unused!(book.read_scalar(bs))
            }
            else {
                0
            };

            for _ in 0..class.dimensions {
                let y = match class.subclass_books[(cval & csub) as usize] {
                    Some(book) => try_or_unused!(codebooks[usize::from(book)].read_scalar(bs)),
                    None => 0,
                };

                cval >>= cbits;

                floor_y.push(y as i32);
            }
        }

        self.synthesis_step1(range, floor_y);

        Ok(true)
    }

    /// Amplitude value synthesis, as defined in section 7.2.4 of the Vorbis I specification.
    fn synthesis_step1(&self, range: i32, floor_y: &mut [i32]) {
        let mut step2_flag = [false; FLOOR1_MAX_VALUES];
        step2_flag[0] = true;
        step2_flag[1] = true;

        for i in 2..floor_y.len() {
            let (lo, hi) = self.neighbors[i];
            let (lo, hi) = (usize::from(lo), usize::from(hi));

            let predicted = render_point(
                self.x_list[lo],
                floor_y[lo],
                self.x_list[hi],
                floor_y[hi],
                self.x_list[i],
            );

            let val = floor_y[i];

            let highroom = range - predicted;
            let lowroom = predicted;

            let room = 2 * highroom.min(lowroom);

            if val != 0 {
                step2_flag[lo] = true;
                step2_flag[hi] = true;
                step2_flag[i] = true;

                floor_y[i] = if val >= room {
                    if highroom > lowroom {
                        val - lowroom + predicted
                    }
                    else {
                        predicted - val + highroom - 1
                    }
                }
                else if val & 1 == 1 {
                    predicted - ((val + 1) >> 1)
                }
                else {
                    predicted + (val >> 1)
                };
            }
            else {
                floor_y[i] = predicted;
            }
        }

        for (y, &flag) in floor_y.iter_mut().zip(&step2_flag) {
            if !flag {
                *y = -1;
            }
        }
    }

    /// Curve synthesis, as defined in section 7.2.4 of the Vorbis I specification. The curve is
    /// multiplied into the spectrum, `out`, in place.
    pub fn synthesis_step2(&self, floor_y: &[i32], out: &mut [f32]) {
        let n = out.len();
        let multiplier = i32::from(self.multiplier);

        let mut lx = 0;
        let mut ly = floor_y[0] * multiplier;

        for &i in &self.sorted_order[1..] {
            let i = usize::from(i);

            if floor_y[i] >= 0 {
                let hx = self.x_list[i] as usize;
                let hy = floor_y[i] * multiplier;

                if lx != hx {
                    render_line(lx, ly, hx, hy, n, out);
                }

                lx = hx;
                ly = hy;
            }
        }

        if lx < n {
            let db = FLOOR1_INVERSE_DB_TABLE[(ly & 0xff) as usize];

            for s in out[lx..].iter_mut() {
                *s *= db;
            }
        }
    }
}

/// Finds the nearest points below and above the X value of point `x`, considering only the points
/// preceding it.
fn find_neighbors(x_list: &[u32], x: usize) -> (u8, u8) {
    let bound = x_list[x];

    let mut low = 0;
    let mut high = 1;

    let mut low_x = 0;
    let mut high_x = u32::MAX;

    for (i, &xi) in x_list[..x].iter().enumerate() {
        if xi >= low_x && xi < bound {
            low = i;
            low_x = xi;
        }
        if xi < high_x && xi > bound {
            high = i;
            high_x = xi;
        }
    }

    (low as u8, high as u8)
}

/// Predicts the amplitude at `x` by integer linear interpolation between two points.
#[inline(always)]
fn render_point(x0: u32, y0: i32, x1: u32, y1: i32, x: u32) -> i32 {
    let dy = y1 - y0;
    let adx = (x1 - x0) as i32;
    let err = dy.abs() * (x - x0) as i32;
    let off = err / adx;

    if dy < 0 {
        y0 - off
    }
    else {
        y0 + off
    }
}

/// Multiplies the samples of `v` in `[x0, min(x1, n))` by the inverse dB value of the integer
/// line from `(x0, y0)` to `(x1, y1)`.
fn render_line(x0: usize, y0: i32, x1: usize, y1: i32, n: usize, v: &mut [f32]) {
    let dy = y1 - y0;
    let adx = (x1 - x0) as i32;
    let base = dy / adx;

    let sy = if dy < 0 { base - 1 } else { base + 1 };
    let ady = dy.abs() - base.abs() * adx;

    let x1 = x1.min(n);

    if x0 >= x1 {
        return;
    }

    let mut y = y0;
    let mut err = 0;

    v[x0] *= FLOOR1_INVERSE_DB_TABLE[(y & 0xff) as usize];

    for s in v[x0 + 1..x1].iter_mut() {
        err += ady;

        if err >= adx {
            err -= adx;
            y += sy;
        }
        else {
            y += base;
        }

        *s *= FLOOR1_INVERSE_DB_TABLE[(y & 0xff) as usize];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A floor with points at X = 0, 128, 64, 32, 96 and multiplier 2.
    fn floor() -> Floor1 {
        let x_list = vec![0, 128, 64, 32, 96];
        let neighbors = (0..x_list.len()).map(|i| find_neighbors(&x_list, i)).collect();

        Floor1 {
            partition_class_list: vec![],
            classes: vec![],
            multiplier: 2,
            x_list,
            sorted_order: vec![0, 3, 2, 4, 1],
            neighbors,
        }
    }

    #[test]
    fn verify_find_neighbors() {
        let floor = floor();
        assert_eq!(floor.neighbors[2], (0, 1));
        assert_eq!(floor.neighbors[3], (0, 2));
        assert_eq!(floor.neighbors[4], (2, 1));
    }

    #[test]
    fn verify_render_point() {
        assert_eq!(render_point(0, 10, 100, 20, 50), 15);
        assert_eq!(render_point(0, 20, 100, 10, 50), 15);
        // Rounds towards the first point.
        assert_eq!(render_point(0, 0, 3, 2, 1), 0);
        assert_eq!(render_point(0, 2, 3, 0, 1), 2);
    }

    #[test]
    fn verify_render_line() {
        let mut v = vec![1.0; 8];
        render_line(0, 100, 4, 104, 8, &mut v);

        for (i, &s) in v[..4].iter().enumerate() {
            assert_eq!(s, FLOOR1_INVERSE_DB_TABLE[100 + i]);
        }
        assert!(v[4..].iter().all(|&s| s == 1.0));

        // The line is clipped to n.
        let mut v = vec![1.0; 4];
        render_line(2, 50, 10, 42, 3, &mut v);
        assert_eq!(v, vec![1.0, 1.0, FLOOR1_INVERSE_DB_TABLE[50], 1.0]);
    }

    #[test]
    fn verify_synthesis_step1() {
        let floor = floor();

        // All deltas 0: every interior point is predicted, and unused.
        let mut y = vec![40, 80, 0, 0, 0];
        floor.synthesis_step1(128, &mut y);
        assert_eq!(y, vec![40, 80, -1, -1, -1]);

        // Point 2 is predicted as 60. An even value moves up, an odd value moves down.
        let mut y = vec![40, 80, 4, 0, 0];
        floor.synthesis_step1(128, &mut y);
        assert_eq!(y, vec![40, 80, 62, -1, -1]);

        let mut y = vec![40, 80, 5, 0, 0];
        floor.synthesis_step1(128, &mut y);
        assert_eq!(y, vec![40, 80, 57, -1, -1]);

        // With a predicted value of 60, the room is 2 * min(128 - 60, 60) = 120. Values past the
        // room extend into the larger side.
        let mut y = vec![40, 80, 121, 0, 0];
        floor.synthesis_step1(128, &mut y);
        assert_eq!(y, vec![40, 80, 121, -1, -1]);

        // Predicted 100, the room is 2 * min(28, 100) = 56, and the value extends downwards.
        let mut y = vec![100, 100, 60, 0, 0];
        floor.synthesis_step1(128, &mut y);
        assert_eq!(y[2], 100 - 60 + 28 - 1);
    }

    #[test]
    fn verify_synthesis_step2_flat() {
        let floor = floor();

        let y = vec![50, 50, -1, -1, -1];
        let mut out = vec![1.0; 256];
        floor.synthesis_step2(&y, &mut out);

        assert!(out.iter().all(|&s| s == FLOOR1_INVERSE_DB_TABLE[100]));
    }

    #[test]
    fn verify_synthesis_step2_short_block() {
        let floor = floor();

        // Only the first 64 lines of a short block are rendered. The curve ramps from 2 * 10 to
        // 2 * 30 over the first 64 lines.
        let y = vec![10, 50, 30, -1, -1];
        let mut out = vec![1.0; 64];
        floor.synthesis_step2(&y, &mut out);

        assert_eq!(out[0], FLOOR1_INVERSE_DB_TABLE[20]);
        assert_eq!(out[32], FLOOR1_INVERSE_DB_TABLE[40]);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }
}

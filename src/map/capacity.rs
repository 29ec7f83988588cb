// MIT License
//
// Copyright (c) 2020 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Bucket count planning.
//!
//! Bucket counts are drawn from a fixed ascending sequence of primes, each
//! roughly double the last and chosen away from powers of two and ten so
//! that modular reduction does not pick up regularities in key hashes.
//!
//! Each prime is stored as one to four big-endian 16-bit parts. Assembling
//! a prime from its parts keeps the table itself free of literals wider
//! than 16 bits, so the sequence can carry entries that exceed the machine
//! word on 32-bit targets; [`Cursor::advance`] simply refuses to move onto
//! an entry that the platform's `usize` cannot represent.

/// The doubling prime sequence, one entry per bucket count.
///
/// Parts are big-endian: the first part holds the most significant bits.
const PRIME_PARTS: &[&[u16]] = &[
    &[53],
    &[97],
    &[193],
    &[389],
    &[769],
    &[1543],
    &[3079],
    &[6151],
    &[12289],
    &[24593],
    &[49157],
    &[0x0001, 0x800D], // 98_317
    &[0x0003, 0x0005], // 196_613
    &[0x0006, 0x0019], // 393_241
    &[0x000C, 0x0001], // 786_433
    &[0x0018, 0x0005], // 1_572_869
    &[0x0030, 0x000B], // 3_145_739
    &[0x0060, 0x000D], // 6_291_469
    &[0x00C0, 0x0005], // 12_582_917
    &[0x0180, 0x0013], // 25_165_843
    &[0x0300, 0x0005], // 50_331_653
    &[0x0600, 0x0017], // 100_663_319
    &[0x0C00, 0x0013], // 201_326_611
    &[0x1800, 0x0005], // 402_653_189
    &[0x3000, 0x0059], // 805_306_457
    &[0x6000, 0x0005], // 1_610_612_741
    &[0xC000, 0x0001], // 3_221_225_473
    &[0xFFFF, 0xFFFB], // 4_294_967_291
    &[0x0001, 0x7FFF, 0xFFFB], // 6_442_450_939
    &[0x0003, 0x0000, 0x0005], // 12_884_901_893
    &[0x0005, 0xFFFF, 0xFFE7], // 25_769_803_751
    &[0x000B, 0xFFFF, 0xFFFF], // 51_539_607_551
    &[0x0018, 0x0000, 0x0007], // 103_079_215_111
    &[0x0030, 0x0000, 0x0001], // 206_158_430_209
    &[0x0060, 0x0000, 0x0019], // 412_316_860_441
    &[0x00BF, 0xFFFF, 0xFFFF], // 824_633_720_831
    &[0x017F, 0xFFFF, 0xFFF3], // 1_649_267_441_651
    &[0x02FF, 0xFFFF, 0xFFED], // 3_298_534_883_309
    &[0x0600, 0x0000, 0x0001], // 6_597_069_766_657
    &[0x0BFF, 0xFFFF, 0xFFF3], // 13_194_139_533_299
    &[0x17FF, 0xFFFF, 0xFFFF], // 26_388_279_066_623
    &[0x3000, 0x0000, 0x0037], // 52_776_558_133_303
    &[0x5FFF, 0xFFFF, 0xFFF9], // 105_553_116_266_489
    &[0xBFFF, 0xFFFF, 0xFFE9], // 211_106_232_532_969
    &[0x0001, 0x8000, 0x0000, 0x0011], // 422_212_465_066_001
    &[0x0002, 0xFFFF, 0xFFFF, 0xFFFB], // 844_424_930_131_963
];

/// A position in the prime sequence.
///
/// Cursors are only ever produced by [`Cursor::smallest`],
/// [`Cursor::for_occupancy`], and [`Cursor::advance`], all of which refuse
/// to land on an entry wider than the platform's `usize`, so
/// [`Cursor::capacity`] can assemble its prime without overflow checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Cursor(usize);

impl Cursor {
    /// The smallest bucket count in the sequence.
    pub(crate) fn smallest() -> Self {
        Cursor(0)
    }

    /// The smallest bucket count whose projected load factor for
    /// `occupancy` entries is within `max_load`.
    ///
    /// Saturates at the largest representable entry if `occupancy` is
    /// beyond what the sequence can accommodate.
    pub(crate) fn for_occupancy(occupancy: usize, max_load: f64) -> Self {
        let mut cursor = Cursor::smallest();

        while occupancy as f64 / cursor.capacity() as f64 > max_load {
            match cursor.advance() {
                Some(next) => cursor = next,
                None => break,
            }
        }

        cursor
    }

    /// Assembles the bucket count at this position.
    pub(crate) fn capacity(self) -> usize {
        assemble(PRIME_PARTS[self.0])
    }

    /// The position of the next, roughly twice as large, bucket count.
    ///
    /// Returns `None` once the sequence is exhausted or the next entry
    /// would not fit in `usize` on this platform, whichever comes first;
    /// the table is then pinned at its current size.
    pub(crate) fn advance(self) -> Option<Cursor> {
        let next = self.0 + 1;
        let parts = PRIME_PARTS.get(next)?;

        if significant_bits(parts) > usize::BITS {
            return None;
        }

        Some(Cursor(next))
    }
}

fn assemble(parts: &[u16]) -> usize {
    debug_assert!(significant_bits(parts) <= usize::BITS);

    parts
        .iter()
        .fold(0, |count, &part| (count << 16) | part as usize)
}

fn significant_bits(parts: &[u16]) -> u32 {
    debug_assert!(!parts.is_empty());
    debug_assert_ne!(parts[0], 0);

    16 * (parts.len() as u32 - 1) + (16 - parts[0].leading_zeros())
}

// Copyright 2023 Kenta Ida
//
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::{ProbeError, Result};

/// Number of bits shifted in one sequencer transaction, `1..=32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitCount(u8);

impl BitCount {
    pub const MAX: BitCount = BitCount(32);

    pub fn new(bits: u32) -> Result<Self> {
        match bits {
            1..=32 => Ok(Self(bits as u8)),
            _ => Err(ProbeError::InvalidBitCount(bits)),
        }
    }

    pub fn get(self) -> u32 {
        self.0 as u32
    }

    /// The sequencer loops `x--` down to zero, so it takes the count minus one.
    pub fn token(self) -> u32 {
        self.get() - 1
    }

    /// Right-align a raw input shift register word.
    ///
    /// The ISR shifts right, so after `n` bits the received data sits in the
    /// top `n` bits of the word with the first bit received at `32 - n`.
    pub fn align(self, raw: u32) -> u32 {
        if self.0 < 32 {
            raw >> (32 - self.get())
        } else {
            raw
        }
    }

    /// Mask selecting the bits that are actually shifted out.
    pub fn mask(self) -> u32 {
        if self.0 < 32 {
            (1 << self.get()) - 1
        } else {
            u32::MAX
        }
    }
}

impl TryFrom<u32> for BitCount {
    type Error = ProbeError;

    fn try_from(bits: u32) -> Result<Self> {
        Self::new(bits)
    }
}

impl From<BitCount> for u32 {
    fn from(bits: BitCount) -> u32 {
        bits.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0)]
    #[test_case(33)]
    #[test_case(u32::MAX)]
    fn out_of_range_counts_are_rejected(bits: u32) {
        assert_eq!(BitCount::new(bits), Err(ProbeError::InvalidBitCount(bits)));
    }

    #[test]
    fn token_is_zero_based() {
        assert_eq!(BitCount::new(1).unwrap().token(), 0);
        assert_eq!(BitCount::new(32).unwrap().token(), 31);
    }

    #[test]
    fn full_word_is_not_shifted() {
        assert_eq!(BitCount::MAX.align(0x8000_0001), 0x8000_0001);
    }

    #[test_case(1, 0x8000_0000, 1)]
    #[test_case(3, 0x2000_0000, 1)]
    #[test_case(8, 0xab00_0000, 0xab)]
    #[test_case(31, 0xffff_fffe, 0x7fff_ffff)]
    fn short_reads_are_right_aligned(bits: u32, raw: u32, expected: u32) {
        assert_eq!(BitCount::new(bits).unwrap().align(raw), expected);
    }

    #[test]
    fn mask_covers_shifted_bits() {
        assert_eq!(BitCount::new(1).unwrap().mask(), 1);
        assert_eq!(BitCount::new(12).unwrap().mask(), 0xfff);
        assert_eq!(BitCount::MAX.mask(), u32::MAX);
    }
}

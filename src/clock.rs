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

use embedded_time::rate::Kilohertz;

use crate::error::{ProbeError, Result};

/// Integer division rounding up.
///
/// Not used for the SWCLK divider, which rounds down. Kept so both roundings
/// sit side by side should the divider ever need to err on the slow side.
pub const fn div_round_up(m: u32, n: u32) -> u32 {
    m / n + (m % n != 0) as u32
}

/// Integer clock divider of the sequencer. The fractional part is always zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockDivider {
    pub int: u16,
    pub frac: u8,
}

impl ClockDivider {
    /// Divider producing `swclk` from `system`.
    ///
    /// The probe program spends two sequencer cycles per SWCLK period, one
    /// for each half cycle, hence the extra halving. Rounds down, so the
    /// resulting SWCLK may be faster than requested.
    pub fn for_frequency(system: Kilohertz, swclk: Kilohertz) -> Result<Self> {
        if swclk.0 == 0 {
            return Err(ProbeError::InvalidFrequency(swclk.0));
        }
        let divider = system.0 / swclk.0 / 2;
        match u16::try_from(divider) {
            Ok(int) if int > 0 => Ok(Self { int, frac: 0 }),
            _ => Err(ProbeError::InvalidFrequency(swclk.0)),
        }
    }

    /// SWCLK actually produced by this divider.
    pub fn swclk(&self, system: Kilohertz) -> Kilohertz {
        Kilohertz(system.0 / (self.int as u32 * 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn default_swclk_on_stock_sysclk() {
        let divider = ClockDivider::for_frequency(Kilohertz(125_000), Kilohertz(1000)).unwrap();
        assert_eq!(divider, ClockDivider { int: 62, frac: 0 });
    }

    #[test_case(125_000, 4000, 15)]
    #[test_case(125_000, 3, 20833)]
    #[test_case(133_000, 1000, 66)]
    fn divider_rounds_down(system: u32, swclk: u32, expected: u16) {
        let divider = ClockDivider::for_frequency(Kilohertz(system), Kilohertz(swclk)).unwrap();
        assert_eq!(divider.int, expected);
        assert_eq!(divider.frac, 0);
    }

    #[test_case(125_000, 0 ; "zero")]
    #[test_case(125_000, 62_501 ; "divider rounds to zero")]
    #[test_case(200_000, 1 ; "divider overflows")]
    fn unusable_frequencies_are_rejected(system: u32, swclk: u32) {
        assert_eq!(
            ClockDivider::for_frequency(Kilohertz(system), Kilohertz(swclk)),
            Err(ProbeError::InvalidFrequency(swclk))
        );
    }

    #[test]
    fn rounding_up_differs_from_divider() {
        assert_eq!(div_round_up(125_000, 1000 * 2), 63);
        let divider = ClockDivider::for_frequency(Kilohertz(125_000), Kilohertz(1000)).unwrap();
        assert_eq!(divider.swclk(Kilohertz(125_000)), Kilohertz(1008_u32));
    }

    #[test_case(u32::MAX, 1 => u32::MAX)]
    #[test_case(u32::MAX, 2 => 1 << 31)]
    #[test_case(u32::MAX - 1, u32::MAX => 1)]
    #[test_case(0, 7 => 0)]
    #[test_case(14, 7 => 2)]
    fn rounding_up_near_the_top_of_the_range(m: u32, n: u32) -> u32 {
        div_round_up(m, n)
    }
}

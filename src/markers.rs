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

use embedded_hal::digital::v2::OutputPin;
use num_enum::IntoPrimitive;

/// Timing events that can be mirrored onto spare GPIOs for a logic analyzer.
///
/// One bit per event, so a pin set can be written as a mask.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Marker {
    /// Around a whole write transaction.
    Write = 1,
    /// While waiting for the completion token of a write.
    WriteWait = 2,
    /// Around a whole read transaction.
    Read = 4,
}

impl Marker {
    pub const ALL: [Marker; 3] = [Marker::Write, Marker::WriteWait, Marker::Read];

    pub fn index(self) -> usize {
        u8::from(self).trailing_zeros() as usize
    }
}

/// Sink for [`Marker`] events.
///
/// Must not touch the sequencer. [`NoMarkers`] compiles to nothing.
pub trait TimingMarkers {
    fn set(&mut self, marker: Marker);
    fn clear(&mut self, marker: Marker);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoMarkers;

impl TimingMarkers for NoMarkers {
    #[inline(always)]
    fn set(&mut self, _marker: Marker) {}
    #[inline(always)]
    fn clear(&mut self, _marker: Marker) {}
}

/// One output pin per marker, in [`Marker::ALL`] order.
pub struct PinMarkers<P> {
    pins: [P; 3],
}

impl<P: OutputPin> PinMarkers<P> {
    pub fn new(pins: [P; 3]) -> Self {
        Self { pins }
    }

    pub fn free(self) -> [P; 3] {
        self.pins
    }
}

impl<P: OutputPin> TimingMarkers for PinMarkers<P> {
    #[inline]
    fn set(&mut self, marker: Marker) {
        if self.pins[marker.index()].set_high().is_err() {
            log::warn!("failed to set marker {:?}", marker);
        }
    }

    #[inline]
    fn clear(&mut self, marker: Marker) {
        if self.pins[marker.index()].set_low().is_err() {
            log::warn!("failed to clear marker {:?}", marker);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_map_to_distinct_pins() {
        let indices: Vec<usize> = Marker::ALL.iter().map(|m| m.index()).collect();
        assert_eq!(indices, [0, 1, 2]);
        assert_eq!(u8::from(Marker::Read), 4);
    }

    /// Output pin remembering its level; a broken one refuses every change.
    #[derive(Default)]
    struct Level {
        high: Option<bool>,
        broken: bool,
    }

    impl Level {
        fn write(&mut self, high: bool) -> Result<(), ()> {
            if self.broken {
                return Err(());
            }
            self.high = Some(high);
            Ok(())
        }
    }

    impl OutputPin for Level {
        type Error = ();

        fn set_low(&mut self) -> Result<(), ()> {
            self.write(false)
        }

        fn set_high(&mut self) -> Result<(), ()> {
            self.write(true)
        }
    }

    fn levels(markers: &PinMarkers<Level>) -> Vec<Option<bool>> {
        markers.pins.iter().map(|pin| pin.high).collect()
    }

    #[test]
    fn pin_markers_drive_their_own_pin() {
        let mut markers = PinMarkers::new(Default::default());
        markers.set(Marker::WriteWait);
        assert_eq!(levels(&markers), [None, Some(true), None]);
        markers.set(Marker::Read);
        markers.clear(Marker::WriteWait);
        assert_eq!(levels(&markers), [None, Some(false), Some(true)]);
    }

    #[test]
    fn broken_marker_pin_leaves_the_others_working() {
        let mut markers: PinMarkers<Level> = PinMarkers::new(Default::default());
        markers.pins[0].broken = true;
        markers.set(Marker::Write);
        markers.set(Marker::Read);
        markers.clear(Marker::Write);
        assert_eq!(levels(&markers), [None, None, Some(true)]);
    }
}

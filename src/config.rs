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

/// SWCLK applied by `init`.
pub const DEFAULT_FREQUENCY: Kilohertz = Kilohertz(1000);

/// Polls of a FIFO or the program counter before giving up.
pub const DEFAULT_POLL_LIMIT: u32 = 1_000_000;

/// GPIO numbers used by the probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinConfig {
    /// Side-set pin, driven by the sequencer.
    pub swclk: u8,
    /// Out and set pin. Also the in pin unless `swdi` is given.
    pub swdio: u8,
    /// Separate input pin for level-shifted probes.
    pub swdi: Option<u8>,
}

impl PinConfig {
    pub const fn new(swclk: u8, swdio: u8) -> Self {
        Self {
            swclk,
            swdio,
            swdi: None,
        }
    }

    pub const fn with_swdi(mut self, swdi: u8) -> Self {
        self.swdi = Some(swdi);
        self
    }

    /// Pin sampled by the read program.
    pub fn input(&self) -> u8 {
        self.swdi.unwrap_or(self.swdio)
    }
}

/// How long to busy-wait on the sequencer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Give up with [`ProbeError::SequencerTimeout`](crate::ProbeError::SequencerTimeout)
    /// after this many polls.
    Polls(u32),
    /// Spin until the sequencer answers. A stalled sequencer hangs the caller.
    Forever,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::Polls(DEFAULT_POLL_LIMIT)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeConfig {
    pub pins: PinConfig,
    pub default_frequency: Kilohertz,
    pub wait: WaitPolicy,
}

impl ProbeConfig {
    pub fn new(pins: PinConfig) -> Self {
        Self {
            pins,
            default_frequency: DEFAULT_FREQUENCY,
            wait: WaitPolicy::default(),
        }
    }

    pub fn with_default_frequency(mut self, frequency: Kilohertz) -> Self {
        self.default_frequency = frequency;
        self
    }

    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ProbeConfig::new(PinConfig::new(2, 3));
        assert_eq!(config.default_frequency, Kilohertz(1000_u32));
        assert_eq!(config.wait, WaitPolicy::Polls(DEFAULT_POLL_LIMIT));
        assert_eq!(config.pins.input(), 3);
    }

    #[test]
    fn separate_input_pin() {
        let pins = PinConfig::new(2, 3).with_swdi(4);
        assert_eq!(pins.input(), 4);
        assert_eq!(pins.swdio, 3);
    }
}

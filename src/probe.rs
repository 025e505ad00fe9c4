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

use core::convert::Infallible;
use core::marker::PhantomData;

use embedded_time::rate::Kilohertz;
use log::{debug, info, trace, warn};

use crate::bits::BitCount;
use crate::clock::ClockDivider;
use crate::config::{ProbeConfig, WaitPolicy};
use crate::error::{ProbeError, Result};
use crate::markers::{Marker, NoMarkers, TimingMarkers};
use crate::mode::{Mode, ReadMode, TransferMode, WriteMode};
use crate::reset::{NoResetLine, ResetLine};
use crate::sequencer::{Sequencer, ShiftConfig};

/// Owner of the probe sequencer.
///
/// Created uninitialized; [`init`](Self::init) installs the program and
/// [`deinit`](Self::deinit), or dropping the handle, removes it again.
pub struct SwdProbe<S: Sequencer, R: ResetLine = NoResetLine, M: TimingMarkers = NoMarkers> {
    // `None` only inside `release`, after the parts have been handed back.
    parts: Option<Parts<S, R, M>>,
    config: ProbeConfig,
    // Where the program was installed. `Some` exactly while initialized.
    origin: Option<u8>,
    mode: Mode,
}

struct Parts<S, R, M> {
    sequencer: S,
    reset: R,
    markers: M,
}

impl<S: Sequencer> SwdProbe<S> {
    pub fn new(sequencer: S, config: ProbeConfig) -> Self {
        Self::with_parts(sequencer, NoResetLine, NoMarkers, config)
    }
}

impl<S: Sequencer, R: ResetLine, M: TimingMarkers> SwdProbe<S, R, M> {
    pub fn with_parts(sequencer: S, reset: R, markers: M, config: ProbeConfig) -> Self {
        Self {
            parts: Some(Parts {
                sequencer,
                reset,
                markers,
            }),
            config,
            origin: None,
            mode: Mode::Uninitialized,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.origin.is_some()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    fn parts(&self) -> &Parts<S, R, M> {
        match &self.parts {
            Some(parts) => parts,
            None => unreachable!("probe parts used after release"),
        }
    }

    fn parts_mut(&mut self) -> &mut Parts<S, R, M> {
        match &mut self.parts {
            Some(parts) => parts,
            None => unreachable!("probe parts used after release"),
        }
    }

    pub fn sequencer(&self) -> &S {
        &self.parts().sequencer
    }

    /// Direct access to the sequencer. Anything done here bypasses the mode
    /// tracking of the probe.
    pub fn sequencer_mut(&mut self) -> &mut S {
        &mut self.parts_mut().sequencer
    }

    pub fn reset_line(&self) -> &R {
        &self.parts().reset
    }

    pub fn markers(&self) -> &M {
        &self.parts().markers
    }

    /// Install and start the probe program, then switch to write mode.
    ///
    /// Installation happens once; calling this again only forces write mode.
    pub fn init(&mut self) -> Result<()> {
        if self.origin.is_none() {
            let pins = self.config.pins;
            let parts = self.parts_mut();
            parts.sequencer.configure_pins(&pins);
            parts.reset.init();

            let origin = parts.sequencer.install()?;
            debug!("probe program installed at {}", origin);
            parts.sequencer.configure(origin, &pins, &ShiftConfig::SWD);
            self.origin = Some(origin);

            if let Err(e) = self.set_clock_frequency(self.config.default_frequency) {
                self.sequencer_mut().uninstall(origin);
                self.origin = None;
                return Err(e);
            }

            self.sequencer_mut().set_enabled(true);
            info!(
                "probe initialized, swclk on {}, swdio on {}",
                pins.swclk, pins.swdio
            );
        }

        self.enter_write_mode()
    }

    /// Park the sequencer in read mode, stop it and remove the program.
    ///
    /// Does nothing if the probe was never initialized. The program is
    /// removed even if the switch to read mode times out; the timeout is
    /// still reported.
    pub fn deinit(&mut self) -> Result<()> {
        let Some(origin) = self.origin else {
            return Ok(());
        };

        let parked = self.enter_read_mode();
        let sequencer = self.sequencer_mut();
        sequencer.set_enabled(false);
        sequencer.uninstall(origin);
        self.origin = None;
        self.mode = Mode::Uninitialized;
        info!("probe deinitialized");
        parked
    }

    /// Deinitialize and hand back the parts.
    pub fn release(mut self) -> (S, R, M) {
        if let Err(e) = self.deinit() {
            warn!("releasing probe: {}", e);
        }
        match self.parts.take() {
            Some(Parts {
                sequencer,
                reset,
                markers,
            }) => (sequencer, reset, markers),
            None => unreachable!("probe released twice"),
        }
    }

    /// Program the sequencer clock for an SWCLK of `frequency`.
    pub fn set_clock_frequency(&mut self, frequency: Kilohertz) -> Result<()> {
        if self.origin.is_none() {
            return Err(ProbeError::NotInitialized);
        }
        let system = self.sequencer().system_clock();
        info!(
            "Set swclk freq {}kHz sysclk {}kHz",
            frequency.0, system.0
        );
        let divider = ClockDivider::for_frequency(system, frequency)?;
        debug!(
            "swclk divider {} gives {}kHz",
            divider.int,
            divider.swclk(system).0
        );
        self.sequencer_mut().set_clock_divider(divider);
        Ok(())
    }

    /// Drive (`true`) or release (`false`) the target reset line.
    pub fn assert_reset(&mut self, state: bool) {
        let reset = &mut self.parts_mut().reset;
        if state {
            reset.assert();
        } else {
            reset.release();
        }
    }

    pub fn enter_read_mode(&mut self) -> Result<()> {
        self.switch_mode::<ReadMode>()
    }

    pub fn enter_write_mode(&mut self) -> Result<()> {
        self.switch_mode::<WriteMode>()
    }

    /// Write mode handle, switching modes only if needed.
    pub fn writer(&mut self) -> Result<Port<'_, S, R, M, WriteMode>> {
        self.port()
    }

    /// Read mode handle, switching modes only if needed.
    pub fn reader(&mut self) -> Result<Port<'_, S, R, M, ReadMode>> {
        self.port()
    }

    fn port<T: TransferMode>(&mut self) -> Result<Port<'_, S, R, M, T>> {
        if self.mode != T::MODE {
            self.switch_mode::<T>()?;
        }
        Ok(Port {
            probe: self,
            _mode: PhantomData,
        })
    }

    fn switch_mode<T: TransferMode>(&mut self) -> Result<()> {
        let origin = self.origin.ok_or(ProbeError::NotInitialized)?;
        let wait = self.config.wait;
        self.mode = Mode::Uninitialized;

        let sequencer = self.sequencer_mut();
        let offsets = sequencer.offsets();
        let entry = offsets.address(origin, T::ENTRY);
        let idle = offsets.address(origin, T::IDLE);

        // Words queued for the old mode must not run in the new one.
        sequencer.clear_fifos();
        sequencer.jump(entry);
        poll(sequencer, wait, |sequencer| {
            if sequencer.program_counter() == idle {
                Ok(())
            } else {
                Err(nb::Error::WouldBlock)
            }
        })
        .map_err(|e| {
            warn!("sequencer did not settle in {} mode", T::MODE);
            e
        })?;
        sequencer.clear_fifos();
        self.mode = T::MODE;
        debug!("entered {} mode", T::MODE);
        Ok(())
    }

    fn require(&self, required: Mode) -> Result<()> {
        if self.origin.is_none() {
            Err(ProbeError::NotInitialized)
        } else if self.mode != required {
            Err(ProbeError::WrongMode {
                required,
                current: self.mode,
            })
        } else {
            Ok(())
        }
    }

    /// Shift out the low `bit_count` bits of `data`, LSB first.
    pub fn write_bits(&mut self, bit_count: u32, data: u32) -> Result<()> {
        let bits = BitCount::new(bit_count)?;
        self.require(Mode::WriteMode)?;

        self.parts_mut().markers.set(Marker::Write);
        let result = self.shift_out(bits, data);
        let markers = &mut self.parts_mut().markers;
        markers.clear(Marker::WriteWait);
        markers.clear(Marker::Write);
        self.lose_mode_on_timeout(result)
    }

    fn shift_out(&mut self, bits: BitCount, data: u32) -> Result<()> {
        let wait = self.config.wait;
        let parts = self.parts_mut();
        poll(&mut parts.sequencer, wait, |s| s.push(bits.token()))?;
        poll(&mut parts.sequencer, wait, |s| s.push(data))?;
        parts.markers.set(Marker::WriteWait);
        trace!("Write {} bits 0x{:x}", bits.get(), data);
        // The token only says the last bit has left the pin.
        poll(&mut parts.sequencer, wait, |s| s.pop())?;
        Ok(())
    }

    /// Shift in `bit_count` bits. The first bit on the wire ends up in bit 0.
    pub fn read_bits(&mut self, bit_count: u32) -> Result<u32> {
        let bits = BitCount::new(bit_count)?;
        self.require(Mode::ReadMode)?;

        self.parts_mut().markers.set(Marker::Read);
        let result = self.shift_in(bits);
        self.parts_mut().markers.clear(Marker::Read);
        self.lose_mode_on_timeout(result)
    }

    fn shift_in(&mut self, bits: BitCount) -> Result<u32> {
        let wait = self.config.wait;
        let sequencer = self.sequencer_mut();
        poll(sequencer, wait, |s| s.push(bits.token()))?;
        let raw = poll(sequencer, wait, |s| s.pop())?;
        let data = bits.align(raw);
        trace!("Read {} bits 0x{:x} (shifted 0x{:x})", bits.get(), raw, data);
        Ok(data)
    }

    /// Write `bit_count` bits from `data`, LSB of `data[0]` first.
    pub fn write_sequence(&mut self, bit_count: usize, data: &[u8]) -> Result<()> {
        check_sequence_len(bit_count, data.len())?;
        for (index, chunk) in data.chunks(4).enumerate() {
            let done = index * 32;
            if done >= bit_count {
                break;
            }
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            let bits = (bit_count - done).min(32) as u32;
            self.write_bits(bits, u32::from_le_bytes(word))?;
        }
        Ok(())
    }

    /// Read `bit_count` bits into `data`, first bit into the LSB of `data[0]`.
    pub fn read_sequence(&mut self, bit_count: usize, data: &mut [u8]) -> Result<()> {
        check_sequence_len(bit_count, data.len())?;
        for (index, chunk) in data.chunks_mut(4).enumerate() {
            let done = index * 32;
            if done >= bit_count {
                break;
            }
            let bits = (bit_count - done).min(32);
            let word = self.read_bits(bits as u32)?.to_le_bytes();
            let bytes = (bits + 7) / 8;
            chunk[..bytes].copy_from_slice(&word[..bytes]);
        }
        Ok(())
    }

    // After a timeout the FIFOs hold an unknown number of tokens, so the next
    // transaction has to go through a mode switch first.
    fn lose_mode_on_timeout<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ProbeError::SequencerTimeout) = result {
            warn!("sequencer stalled in {} mode", self.mode);
            self.mode = Mode::Uninitialized;
        }
        result
    }
}

impl<S: Sequencer, R: ResetLine, M: TimingMarkers> Drop for SwdProbe<S, R, M> {
    fn drop(&mut self) {
        if self.parts.is_none() {
            return;
        }
        if let Err(e) = self.deinit() {
            warn!("dropping probe: {}", e);
        }
    }
}

/// Borrow of a [`SwdProbe`] known to be in mode `T`.
///
/// Only offers the transaction that is legal in `T`.
pub struct Port<'p, S: Sequencer, R: ResetLine, M: TimingMarkers, T: TransferMode> {
    probe: &'p mut SwdProbe<S, R, M>,
    _mode: PhantomData<T>,
}

impl<'p, S: Sequencer, R: ResetLine, M: TimingMarkers, T: TransferMode> Port<'p, S, R, M, T> {
    pub fn probe(&self) -> &SwdProbe<S, R, M> {
        self.probe
    }

    fn switch<U: TransferMode>(self) -> Result<Port<'p, S, R, M, U>> {
        self.probe.switch_mode::<U>()?;
        Ok(Port {
            probe: self.probe,
            _mode: PhantomData,
        })
    }
}

impl<'p, S: Sequencer, R: ResetLine, M: TimingMarkers> Port<'p, S, R, M, WriteMode> {
    pub fn write_bits(&mut self, bit_count: u32, data: u32) -> Result<()> {
        self.probe.write_bits(bit_count, data)
    }

    pub fn write_sequence(&mut self, bit_count: usize, data: &[u8]) -> Result<()> {
        self.probe.write_sequence(bit_count, data)
    }

    pub fn into_reader(self) -> Result<Port<'p, S, R, M, ReadMode>> {
        self.switch()
    }
}

impl<'p, S: Sequencer, R: ResetLine, M: TimingMarkers> Port<'p, S, R, M, ReadMode> {
    pub fn read_bits(&mut self, bit_count: u32) -> Result<u32> {
        self.probe.read_bits(bit_count)
    }

    pub fn read_sequence(&mut self, bit_count: usize, data: &mut [u8]) -> Result<()> {
        self.probe.read_sequence(bit_count, data)
    }

    pub fn into_writer(self) -> Result<Port<'p, S, R, M, WriteMode>> {
        self.switch()
    }
}

fn check_sequence_len(bit_count: usize, len: usize) -> Result<()> {
    if bit_count > len * 8 {
        Err(ProbeError::InvalidBitCount(
            u32::try_from(bit_count).unwrap_or(u32::MAX),
        ))
    } else {
        Ok(())
    }
}

/// Spin on `f` until it stops returning `WouldBlock` or the budget runs out.
fn poll<S, T>(
    sequencer: &mut S,
    wait: WaitPolicy,
    mut f: impl FnMut(&mut S) -> nb::Result<T, Infallible>,
) -> Result<T> {
    let mut remaining = match wait {
        WaitPolicy::Polls(polls) => Some(polls),
        WaitPolicy::Forever => None,
    };
    loop {
        if remaining == Some(0) {
            return Err(ProbeError::SequencerTimeout);
        }
        match f(sequencer) {
            Ok(value) => return Ok(value),
            Err(nb::Error::WouldBlock) => {}
            Err(nb::Error::Other(never)) => match never {},
        }
        if let Some(remaining) = remaining.as_mut() {
            *remaining -= 1;
        }
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_gives_up_after_budget() {
        let mut calls = 0u32;
        let result: Result<()> = poll(&mut calls, WaitPolicy::Polls(5), |calls| {
            *calls += 1;
            Err(nb::Error::WouldBlock)
        });
        assert_eq!(result, Err(ProbeError::SequencerTimeout));
        assert_eq!(calls, 5);
    }

    #[test]
    fn poll_returns_first_ready_value() {
        let mut calls = 0u32;
        let result = poll(&mut calls, WaitPolicy::Forever, |calls| {
            *calls += 1;
            if *calls == 3 {
                Ok(*calls * 10)
            } else {
                Err(nb::Error::WouldBlock)
            }
        });
        assert_eq!(result, Ok(30));
    }

    #[test]
    fn sequence_longer_than_buffer_is_rejected() {
        assert_eq!(check_sequence_len(17, 2), Err(ProbeError::InvalidBitCount(17)));
        assert_eq!(check_sequence_len(16, 2), Ok(()));
    }
}

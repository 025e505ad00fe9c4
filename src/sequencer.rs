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

use embedded_time::rate::Kilohertz;

use crate::clock::ClockDivider;
use crate::config::PinConfig;
use crate::error::Result;

/// Public labels of the probe program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EntryPoint {
    /// Switches SWDIO to input, then falls into `InIdle`.
    InPosedge,
    /// Stalls on the TX FIFO waiting for a read bit count.
    InIdle,
    /// Switches SWDIO to output, then falls into `OutIdle`.
    OutNegedge,
    /// Stalls on the TX FIFO waiting for a write bit count.
    OutIdle,
}

/// Offsets of the entry points relative to the start of the program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgramOffsets {
    pub in_posedge: u8,
    pub in_idle: u8,
    pub out_negedge: u8,
    pub out_idle: u8,
}

impl ProgramOffsets {
    pub fn get(&self, entry: EntryPoint) -> u8 {
        match entry {
            EntryPoint::InPosedge => self.in_posedge,
            EntryPoint::InIdle => self.in_idle,
            EntryPoint::OutNegedge => self.out_negedge,
            EntryPoint::OutIdle => self.out_idle,
        }
    }

    /// Absolute instruction address of `entry` for a program installed at `origin`.
    pub fn address(&self, origin: u8, entry: EntryPoint) -> u8 {
        origin.wrapping_add(self.get(entry))
    }
}

/// Shift register setup of the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShiftConfig {
    pub out_shift_right: bool,
    pub autopull: bool,
    pub in_shift_right: bool,
    pub autopush: bool,
}

impl ShiftConfig {
    /// SWD is LSB first, so both shift registers shift right. The program
    /// does its own `pull` and `push`.
    pub const SWD: ShiftConfig = ShiftConfig {
        out_shift_right: true,
        autopull: false,
        in_shift_right: true,
        autopush: false,
    };
}

/// A sequencer running the probe program.
///
/// The program reads a zero-based bit count from the TX FIFO. In write mode it
/// then reads one data word, shifts it out and pushes one token of no meaning
/// to the RX FIFO once the last bit is on the wire. In read mode it shifts the
/// requested number of bits into the input shift register and pushes it.
///
/// FIFO access is non-blocking; the driver owns the polling.
pub trait Sequencer {
    /// Where the entry points sit inside the program.
    fn offsets(&self) -> ProgramOffsets;

    /// Frequency of the clock feeding the sequencer.
    fn system_clock(&self) -> Kilohertz;

    /// Hand the SWD pins to the sequencer and pull SWDIO up, its idle state.
    fn configure_pins(&mut self, pins: &PinConfig);

    /// Load the program, returning the address it was loaded at.
    fn install(&mut self) -> Result<u8>;

    fn uninstall(&mut self, origin: u8);

    /// Set up pin mapping and shift registers for a program at `origin`.
    ///
    /// SWCLK is the side-set pin, SWDIO the out and set pin and both start
    /// out as outputs.
    fn configure(&mut self, origin: u8, pins: &PinConfig, shift: &ShiftConfig);

    fn set_enabled(&mut self, enabled: bool);

    fn set_clock_divider(&mut self, divider: ClockDivider);

    /// Force an unconditional jump to `address`.
    fn jump(&mut self, address: u8);

    fn program_counter(&mut self) -> u8;

    /// Drop every word queued in the TX and RX FIFOs.
    ///
    /// Words already pulled into the output shift register are not affected;
    /// a following [`jump`](Self::jump) abandons them.
    fn clear_fifos(&mut self);

    fn push(&mut self, value: u32) -> nb::Result<(), Infallible>;

    fn pop(&mut self) -> nb::Result<u32, Infallible>;
}

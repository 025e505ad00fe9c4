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

//! Host-side model of the probe program.
//!
//! [`LoopbackSequencer`] runs the same FIFO protocol as the PIO program with
//! SWDIO looped back: bits shifted out in write mode are queued on a virtual
//! wire and come back in read mode. [`feed`](LoopbackSequencer::feed) puts
//! bits on the wire as if a target drove them.

use core::convert::Infallible;

use embedded_time::rate::Kilohertz;
use heapless::Deque;

use crate::clock::ClockDivider;
use crate::config::PinConfig;
use crate::error::{ProbeError, Result};
use crate::sequencer::{ProgramOffsets, Sequencer, ShiftConfig};

/// Entry points of the probe program, as laid out by the PIO assembler.
pub const PROGRAM_OFFSETS: ProgramOffsets = ProgramOffsets {
    out_negedge: 0,
    out_idle: 1,
    in_posedge: 9,
    in_idle: 10,
};

pub const PROGRAM_LEN: u8 = 16;

// Addresses where the program stalls waiting on a FIFO.
const OUT_DATA: u8 = 3;
const OUT_PUSH: u8 = 7;
const IN_PUSH: u8 = 14;

const FIFO_DEPTH: usize = 4;
const WIRE_BITS: usize = 1024;
const EVENTS: usize = 64;

/// What the host asked the sequencer to do, oldest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    ConfigurePins(PinConfig),
    Install(u8),
    Configure(ShiftConfig),
    ClockDivider(ClockDivider),
    /// Enable state change, with the program counter at that moment.
    Enable { enabled: bool, pc: u8 },
    Jump(u8),
    Uninstall(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Jumped to a mode entry; the pin direction change has not run yet.
    Entry { output: bool, polls: u32 },
    OutIdle,
    OutData { bits: u32 },
    OutPush,
    InIdle,
    InPush,
    /// Jumped somewhere the model does not know.
    Lost,
}

pub struct LoopbackSequencer {
    system_clock: Kilohertz,
    origin: u8,
    settle_polls: u32,
    installed: bool,
    shift: Option<ShiftConfig>,
    pins: Option<PinConfig>,
    enabled: bool,
    stalled: bool,
    divider: Option<ClockDivider>,
    pc: u8,
    state: State,
    swdio_output: bool,
    isr: u32,
    tx: Deque<u32, FIFO_DEPTH>,
    rx: Deque<u32, FIFO_DEPTH>,
    wire: Deque<bool, WIRE_BITS>,
    events: Deque<Event, EVENTS>,
}

impl Default for LoopbackSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackSequencer {
    /// 125 MHz system clock, program loaded at the top of instruction memory.
    pub fn new() -> Self {
        Self {
            system_clock: Kilohertz(125_000),
            origin: 32 - PROGRAM_LEN,
            settle_polls: 1,
            installed: false,
            shift: None,
            pins: None,
            enabled: false,
            stalled: false,
            divider: None,
            pc: 0,
            state: State::Lost,
            swdio_output: false,
            isr: 0,
            tx: Deque::new(),
            rx: Deque::new(),
            wire: Deque::new(),
            events: Deque::new(),
        }
    }

    pub fn with_system_clock(mut self, system_clock: Kilohertz) -> Self {
        self.system_clock = system_clock;
        self
    }

    pub fn with_origin(mut self, origin: u8) -> Self {
        self.origin = origin;
        self
    }

    /// Number of program counter reads before a mode entry instruction runs.
    pub fn with_settle_polls(mut self, polls: u32) -> Self {
        self.settle_polls = polls;
        self
    }

    /// Freeze the state machine, as if its clock had stopped.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn clock_divider(&self) -> Option<ClockDivider> {
        self.divider
    }

    pub fn pins(&self) -> Option<PinConfig> {
        self.pins
    }

    /// `true` while the program drives SWDIO.
    pub fn swdio_output(&self) -> bool {
        self.swdio_output
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> + '_ {
        self.events.iter()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Bits on the wire not yet sampled, first shifted first.
    pub fn wire(&self) -> impl Iterator<Item = bool> + '_ {
        self.wire.iter().copied()
    }

    pub fn clear_wire(&mut self) {
        self.wire.clear();
    }

    /// Queue the low `bits` bits of `value` on the wire, LSB first.
    pub fn feed(&mut self, value: u32, bits: u32) {
        for i in 0..bits.min(32) {
            self.put_bit(value >> i & 1 != 0);
        }
    }

    fn record(&mut self, event: Event) {
        if self.events.is_full() {
            self.events.pop_front();
        }
        let _ = self.events.push_back(event);
    }

    fn put_bit(&mut self, bit: bool) {
        if self.wire.is_full() {
            self.wire.pop_front();
        }
        let _ = self.wire.push_back(bit);
    }

    fn address(&self, offset: u8) -> u8 {
        self.origin.wrapping_add(offset)
    }

    fn enter(&mut self, state: State) {
        let offset = match state {
            State::Entry { output: true, .. } => PROGRAM_OFFSETS.out_negedge,
            State::Entry { output: false, .. } => PROGRAM_OFFSETS.in_posedge,
            State::OutIdle => PROGRAM_OFFSETS.out_idle,
            State::OutData { .. } => OUT_DATA,
            State::OutPush => OUT_PUSH,
            State::InIdle => PROGRAM_OFFSETS.in_idle,
            State::InPush => IN_PUSH,
            State::Lost => return,
        };
        self.pc = self.address(offset);
        self.state = state;
    }

    /// Run until the program blocks on a FIFO.
    fn run(&mut self) {
        let Some(shift) = self.shift else {
            return;
        };
        if !self.enabled || !self.installed || self.stalled {
            return;
        }
        loop {
            match self.state {
                State::Entry { output, polls } => {
                    if polls > 0 {
                        self.state = State::Entry {
                            output,
                            polls: polls - 1,
                        };
                        return;
                    }
                    self.swdio_output = output;
                    self.enter(if output {
                        State::OutIdle
                    } else {
                        State::InIdle
                    });
                }
                State::OutIdle => match self.tx.pop_front() {
                    Some(token) => self.enter(State::OutData { bits: token + 1 }),
                    None => return,
                },
                State::OutData { bits } => match self.tx.pop_front() {
                    Some(data) => {
                        for i in 0..bits.min(32) {
                            let bit = if shift.out_shift_right {
                                data >> i & 1
                            } else {
                                data >> (31 - i) & 1
                            };
                            self.put_bit(bit != 0);
                        }
                        // Idle bus state after the last bit.
                        self.enter(State::OutPush);
                    }
                    None => return,
                },
                State::OutPush | State::InPush => {
                    if self.rx.push_back(self.isr).is_err() {
                        return;
                    }
                    self.isr = 0;
                    self.enter(if self.state == State::OutPush {
                        State::OutIdle
                    } else {
                        State::InIdle
                    });
                }
                State::InIdle => match self.tx.pop_front() {
                    Some(token) => {
                        for _ in 0..(token + 1).min(32) {
                            // Pulled up when nothing drives it.
                            let bit = self.wire.pop_front().unwrap_or(true) as u32;
                            self.isr = if shift.in_shift_right {
                                self.isr >> 1 | bit << 31
                            } else {
                                self.isr << 1 | bit
                            };
                        }
                        self.enter(State::InPush);
                    }
                    None => return,
                },
                State::Lost => return,
            }
        }
    }
}

impl Sequencer for LoopbackSequencer {
    fn offsets(&self) -> ProgramOffsets {
        PROGRAM_OFFSETS
    }

    fn system_clock(&self) -> Kilohertz {
        self.system_clock
    }

    fn configure_pins(&mut self, pins: &PinConfig) {
        self.pins = Some(*pins);
        self.record(Event::ConfigurePins(*pins));
    }

    fn install(&mut self) -> Result<u8> {
        if self.installed {
            return Err(ProbeError::InstallFailed);
        }
        self.installed = true;
        self.record(Event::Install(self.origin));
        Ok(self.origin)
    }

    fn uninstall(&mut self, origin: u8) {
        self.installed = false;
        self.shift = None;
        self.record(Event::Uninstall(origin));
    }

    fn configure(&mut self, origin: u8, _pins: &PinConfig, shift: &ShiftConfig) {
        self.shift = Some(*shift);
        self.swdio_output = true;
        // The state machine starts at the top of the program, the write entry.
        self.pc = origin;
        self.state = State::Entry {
            output: true,
            polls: 0,
        };
        self.tx.clear();
        self.rx.clear();
        self.isr = 0;
        self.record(Event::Configure(*shift));
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.record(Event::Enable {
            enabled,
            pc: self.pc,
        });
    }

    fn set_clock_divider(&mut self, divider: ClockDivider) {
        self.divider = Some(divider);
        self.record(Event::ClockDivider(divider));
    }

    fn jump(&mut self, address: u8) {
        self.record(Event::Jump(address));
        self.pc = address;
        self.state = if address == self.address(PROGRAM_OFFSETS.out_negedge) {
            State::Entry {
                output: true,
                polls: self.settle_polls,
            }
        } else if address == self.address(PROGRAM_OFFSETS.in_posedge) {
            State::Entry {
                output: false,
                polls: self.settle_polls,
            }
        } else {
            State::Lost
        };
    }

    fn clear_fifos(&mut self) {
        self.tx.clear();
        self.rx.clear();
    }

    fn program_counter(&mut self) -> u8 {
        let pc = self.pc;
        self.run();
        pc
    }

    fn push(&mut self, value: u32) -> nb::Result<(), Infallible> {
        if self.tx.is_full() {
            self.run();
        }
        self.tx.push_back(value).map_err(|_| nb::Error::WouldBlock)?;
        self.run();
        Ok(())
    }

    fn pop(&mut self) -> nb::Result<u32, Infallible> {
        self.run();
        self.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> LoopbackSequencer {
        let mut sequencer = LoopbackSequencer::new().with_settle_polls(0);
        let origin = sequencer.install().unwrap();
        sequencer.configure(origin, &PinConfig::new(2, 3), &ShiftConfig::SWD);
        sequencer.set_enabled(true);
        sequencer
    }

    #[test]
    fn entry_settles_into_idle() {
        let mut sequencer = running();
        let origin = 32 - PROGRAM_LEN;
        sequencer.jump(origin + PROGRAM_OFFSETS.in_posedge);
        assert_eq!(sequencer.program_counter(), origin + PROGRAM_OFFSETS.in_posedge);
        assert_eq!(sequencer.program_counter(), origin + PROGRAM_OFFSETS.in_idle);
        assert!(!sequencer.swdio_output());
    }

    #[test]
    fn write_pushes_completion_token() {
        let mut sequencer = running();
        sequencer.jump(32 - PROGRAM_LEN);
        sequencer.push(3).unwrap();
        sequencer.push(0b1010).unwrap();
        assert_eq!(sequencer.pop(), Ok(0));
        assert_eq!(sequencer.wire().collect::<Vec<_>>(), [false, true, false, true]);
    }

    #[test]
    fn read_lands_in_top_bits() {
        let mut sequencer = running();
        sequencer.jump(32 - PROGRAM_LEN + PROGRAM_OFFSETS.in_posedge);
        sequencer.feed(0b011, 3);
        sequencer.push(2).unwrap();
        assert_eq!(sequencer.pop(), Ok(0b011 << 29));
    }

    #[test]
    fn undriven_wire_reads_high() {
        let mut sequencer = running();
        sequencer.jump(32 - PROGRAM_LEN + PROGRAM_OFFSETS.in_posedge);
        sequencer.push(31).unwrap();
        assert_eq!(sequencer.pop(), Ok(u32::MAX));
    }

    #[test]
    fn stalled_sequencer_answers_nothing() {
        let mut sequencer = running();
        sequencer.jump(32 - PROGRAM_LEN);
        sequencer.set_stalled(true);
        sequencer.push(7).unwrap();
        sequencer.push(0xff).unwrap();
        assert_eq!(sequencer.pop(), Err(nb::Error::WouldBlock));
    }

    #[test]
    fn second_install_fails() {
        let mut sequencer = running();
        assert_eq!(sequencer.install(), Err(ProbeError::InstallFailed));
    }
}

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

//! PIO0 implementation of the probe sequencer.
//!
//! ```ignore
//! let pac = pac::Peripherals::take().unwrap();
//! let mut resets = pac.RESETS;
//! let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);
//! let clocks = hal::clocks::init_clocks_and_plls(
//!     rp_pico::XOSC_CRYSTAL_FREQ, pac.XOSC, pac.CLOCKS, pac.PLL_SYS, pac.PLL_USB,
//!     &mut resets, &mut watchdog,
//! ).ok().unwrap();
//! let sio = hal::Sio::new(pac.SIO);
//! let pins = rp_pico::Pins::new(pac.IO_BANK0, pac.PADS_BANK0, sio.gpio_bank0, &mut resets);
//!
//! let sequencer = Rp2040Sequencer::new(
//!     pac.PIO0,
//!     pins.gpio2.into_mode(),
//!     pins.gpio3.into_mode(),
//!     &clocks.system_clock,
//!     &mut resets,
//! );
//! let reset = Rp2040ResetLine::new(ResetInput::new(pins.gpio1.into_pull_up_input()));
//! let config = ProbeConfig::new(PinConfig::new(2, 3));
//! let mut probe = SwdProbe::with_parts(sequencer, reset, NoMarkers, config);
//! probe.init()?;
//! ```

use core::convert::Infallible;

use embedded_hal::digital::v2::{InputPin, IoPin, OutputPin, PinState};
use embedded_time::rate::Kilohertz;
use hal::gpio::{bank0, Pin, PinId, PullUpInput, PushPullOutput};
use hal::pac;
use hal::pio::{
    InstalledProgram, PIOExt, PIOBuilder, Rx, Running, ShiftDirection, StateMachine, Stopped, Tx,
    UninitStateMachine, PIO, PIO0SM0,
};
use hal::Clock;
use pio::{
    InSource, InstructionOperands, JmpCondition, MovDestination, MovOperation, MovSource,
    OutDestination, Program, SetDestination, SideSet, RP2040_MAX_PROGRAM_SIZE,
};
use rp_pico::hal;

use crate::clock::ClockDivider;
use crate::config::PinConfig;
use crate::error::{ProbeError, Result};
use crate::reset::SwitchedReset;
use crate::sequencer::{ProgramOffsets, Sequencer, ShiftConfig};

pub mod pio0 {
    use rp_pico::hal::{self, gpio::FunctionPio0};
    pub type Pin<P> = hal::gpio::Pin<P, FunctionPio0>;
}

/// Assemble the probe program.
///
/// SWCLK is on the optional side-set pin. The write half drives each bit on
/// the falling edge so it is stable for the target's rising edge sample; the
/// read half samples right after raising SWCLK.
pub fn probe_program() -> (Program<{ RP2040_MAX_PROGRAM_SIZE }>, ProgramOffsets) {
    type Assembler = pio::Assembler<{ RP2040_MAX_PROGRAM_SIZE }>;
    let mut a = Assembler::new_with_side_set(SideSet::new(true, 1, false));
    let mut out_idle = a.label();
    let mut out_bitloop = a.label();
    let mut in_idle = a.label();
    let mut in_bitloop = a.label();
    const HI: u8 = 1;
    const LO: u8 = 0;

    let out_negedge = a.instructions.len() as u8;
    // SWDIO to output, SWCLK low.
    a.set_with_side_set(SetDestination::PINDIRS, 1, LO);
    let out_idle_offset = a.instructions.len() as u8;
    a.bind(&mut out_idle);
    // Bit count minus one into X.
    a.pull(false, true);
    a.mov(MovDestination::X, MovOperation::None, MovSource::OSR);
    // Data to shift out.
    a.pull(false, true);
    a.bind(&mut out_bitloop);
    a.out_with_side_set(OutDestination::PINS, 1, LO);
    a.jmp_with_side_set(JmpCondition::XDecNonZero, &mut out_bitloop, HI);
    // Leave SWDIO high, the idle bus state.
    a.set_with_side_set(SetDestination::PINS, 1, LO);
    // Tell the host the last bit is out.
    a.push(false, true);
    a.jmp(JmpCondition::Always, &mut out_idle);

    let in_posedge = a.instructions.len() as u8;
    // SWDIO to input, SWCLK low.
    a.set_with_side_set(SetDestination::PINDIRS, 0, LO);
    let in_idle_offset = a.instructions.len() as u8;
    a.bind(&mut in_idle);
    a.pull(false, true);
    a.mov(MovDestination::X, MovOperation::None, MovSource::OSR);
    a.bind(&mut in_bitloop);
    a.r#in_with_side_set(InSource::PINS, 1, HI);
    a.jmp_with_side_set(JmpCondition::XDecNonZero, &mut in_bitloop, LO);
    a.push(false, true);
    a.jmp(JmpCondition::Always, &mut in_idle);

    let offsets = ProgramOffsets {
        in_posedge,
        in_idle: in_idle_offset,
        out_negedge,
        out_idle: out_idle_offset,
    };
    (a.assemble_program(), offsets)
}

enum Machine {
    Free(UninitStateMachine<PIO0SM0>),
    Installed {
        sm: UninitStateMachine<PIO0SM0>,
        program: InstalledProgram<pac::PIO0>,
    },
    Stopped {
        sm: StateMachine<PIO0SM0, Stopped>,
        rx: Rx<PIO0SM0>,
        tx: Tx<PIO0SM0>,
    },
    Running {
        sm: StateMachine<PIO0SM0, Running>,
        rx: Rx<PIO0SM0>,
        tx: Tx<PIO0SM0>,
    },
    // Only seen while a transition is in progress.
    Taken,
}

/// State machine 0 of PIO0 running the probe program.
pub struct Rp2040Sequencer<C, D>
where
    C: PinId + bank0::BankPinId,
    D: PinId + bank0::BankPinId,
{
    pio: PIO<pac::PIO0>,
    machine: Machine,
    program: Program<{ RP2040_MAX_PROGRAM_SIZE }>,
    offsets: ProgramOffsets,
    system_clock: Kilohertz,
    divider: ClockDivider,
    _pins: (pio0::Pin<C>, pio0::Pin<D>),
}

impl<C, D> Rp2040Sequencer<C, D>
where
    C: PinId + bank0::BankPinId,
    D: PinId + bank0::BankPinId,
{
    /// Take PIO0 with SWCLK on `swclk` and SWDIO on `swdio`.
    ///
    /// The pins must match the [`PinConfig`] handed to the probe.
    pub fn new(
        pio0: pac::PIO0,
        swclk: pio0::Pin<C>,
        swdio: pio0::Pin<D>,
        system_clock: &hal::clocks::SystemClock,
        resets: &mut pac::RESETS,
    ) -> Self {
        let (pio, sm0, _, _, _) = pio0.split(resets);
        let (program, offsets) = probe_program();
        Self {
            pio,
            machine: Machine::Free(sm0),
            program,
            offsets,
            system_clock: Kilohertz(system_clock.freq().to_kHz()),
            divider: ClockDivider { int: 1, frac: 0 },
            _pins: (swclk, swdio),
        }
    }
}

impl<C, D> Sequencer for Rp2040Sequencer<C, D>
where
    C: PinId + bank0::BankPinId,
    D: PinId + bank0::BankPinId,
{
    fn offsets(&self) -> ProgramOffsets {
        self.offsets
    }

    fn system_clock(&self) -> Kilohertz {
        self.system_clock
    }

    fn configure_pins(&mut self, pins: &PinConfig) {
        // Function select is fixed by the pin types, only the pulls are left.
        // SWDIO idles high.
        pull_up(pins.swdio);
        if let Some(swdi) = pins.swdi {
            pull_up(swdi);
        }
    }

    fn install(&mut self) -> Result<u8> {
        match core::mem::replace(&mut self.machine, Machine::Taken) {
            Machine::Free(sm) => match self.pio.install(&self.program) {
                Ok(program) => {
                    let origin = program.offset();
                    self.machine = Machine::Installed { sm, program };
                    Ok(origin)
                }
                Err(_) => {
                    self.machine = Machine::Free(sm);
                    Err(ProbeError::InstallFailed)
                }
            },
            other => {
                self.machine = other;
                Err(ProbeError::InstallFailed)
            }
        }
    }

    fn uninstall(&mut self, _origin: u8) {
        let (sm, program) = match core::mem::replace(&mut self.machine, Machine::Taken) {
            Machine::Installed { sm, program } => (sm, program),
            Machine::Stopped { sm, rx, tx } => sm.uninit(rx, tx),
            Machine::Running { sm, rx, tx } => sm.stop().uninit(rx, tx),
            other => {
                self.machine = other;
                return;
            }
        };
        self.pio.uninstall(program);
        self.machine = Machine::Free(sm);
    }

    fn configure(&mut self, _origin: u8, pins: &PinConfig, shift: &ShiftConfig) {
        let (sm, program) = match core::mem::replace(&mut self.machine, Machine::Taken) {
            Machine::Installed { sm, program } => (sm, program),
            other => {
                log::warn!("configuring a state machine without a fresh program");
                self.machine = other;
                return;
            }
        };
        let direction = |right| {
            if right {
                ShiftDirection::Right
            } else {
                ShiftDirection::Left
            }
        };
        let (mut sm, rx, tx) = PIOBuilder::from_program(program)
            .side_set_pin_base(pins.swclk)
            .out_pins(pins.swdio, 1)
            .set_pins(pins.swdio, 1)
            .in_pin_base(pins.input())
            .out_shift_direction(direction(shift.out_shift_right))
            .autopull(shift.autopull)
            .in_shift_direction(direction(shift.in_shift_right))
            .autopush(shift.autopush)
            .clock_divisor_fixed_point(self.divider.int, self.divider.frac)
            .build(sm);
        sm.set_pindirs([
            (pins.swclk, hal::pio::PinDir::Output),
            (pins.swdio, hal::pio::PinDir::Output),
        ]);
        self.machine = Machine::Stopped { sm, rx, tx };
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.machine = match core::mem::replace(&mut self.machine, Machine::Taken) {
            Machine::Stopped { sm, rx, tx } if enabled => Machine::Running {
                sm: sm.start(),
                rx,
                tx,
            },
            Machine::Running { sm, rx, tx } if !enabled => Machine::Stopped {
                sm: sm.stop(),
                rx,
                tx,
            },
            other => other,
        };
    }

    fn set_clock_divider(&mut self, divider: ClockDivider) {
        self.divider = divider;
        match &mut self.machine {
            Machine::Stopped { sm, .. } => sm.clock_divisor_fixed_point(divider.int, divider.frac),
            Machine::Running { sm, .. } => sm.clock_divisor_fixed_point(divider.int, divider.frac),
            _ => {}
        }
    }

    fn jump(&mut self, address: u8) {
        let instruction = InstructionOperands::JMP {
            condition: JmpCondition::Always,
            address,
        }
        .encode();
        if let Machine::Running { sm, .. } = &mut self.machine {
            sm.exec_instruction(instruction);
        }
    }

    fn clear_fifos(&mut self) {
        match &mut self.machine {
            Machine::Stopped { sm, .. } => sm.clear_fifos(),
            Machine::Running { sm, .. } => sm.clear_fifos(),
            _ => {}
        }
    }

    fn program_counter(&mut self) -> u8 {
        match &self.machine {
            Machine::Stopped { sm, .. } => sm.instruction_address() as u8,
            Machine::Running { sm, .. } => sm.instruction_address() as u8,
            _ => 0,
        }
    }

    fn push(&mut self, value: u32) -> nb::Result<(), Infallible> {
        let tx = match &mut self.machine {
            Machine::Stopped { tx, .. } | Machine::Running { tx, .. } => tx,
            _ => return Err(nb::Error::WouldBlock),
        };
        if tx.write(value) {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    fn pop(&mut self) -> nb::Result<u32, Infallible> {
        match &mut self.machine {
            Machine::Stopped { rx, .. } | Machine::Running { rx, .. } => {
                rx.read().ok_or(nb::Error::WouldBlock)
            }
            _ => Err(nb::Error::WouldBlock),
        }
    }
}

fn pull_up(pin: u8) {
    // SAFETY: PADS_BANK0 is not otherwise owned by the HAL once pins are split,
    // and the read-modify-write runs with interrupts masked.
    cortex_m::interrupt::free(|_| {
        let pads = unsafe { &*pac::PADS_BANK0::ptr() };
        pads.gpio[pin as usize].modify(|_, w| w.pue().set_bit().pde().clear_bit());
    });
}

/// nRESET on a GPIO, emulating an open drain output.
///
/// Released, the pin is an input with its pull-up enabled. Asserting turns
/// it into an output whose latch is set low before the driver comes on.
pub type Rp2040ResetLine<I> = SwitchedReset<ResetInput<I>, ResetOutput<I>>;

/// Released state of an [`Rp2040ResetLine`].
pub struct ResetInput<I: PinId>(Pin<I, PullUpInput>);

/// Asserted state of an [`Rp2040ResetLine`].
pub struct ResetOutput<I: PinId>(Pin<I, PushPullOutput>);

impl<I: PinId> ResetInput<I> {
    pub fn new(pin: Pin<I, PullUpInput>) -> Self {
        Self(pin)
    }

    pub fn free(self) -> Pin<I, PullUpInput> {
        self.0
    }
}

impl<I: PinId> InputPin for ResetInput<I> {
    type Error = Infallible;

    fn is_high(&self) -> core::result::Result<bool, Infallible> {
        self.0.is_high()
    }

    fn is_low(&self) -> core::result::Result<bool, Infallible> {
        self.0.is_low()
    }
}

impl<I: PinId> OutputPin for ResetOutput<I> {
    type Error = Infallible;

    fn set_low(&mut self) -> core::result::Result<(), Infallible> {
        self.0.set_low()
    }

    fn set_high(&mut self) -> core::result::Result<(), Infallible> {
        self.0.set_high()
    }
}

impl<I: PinId> IoPin<ResetInput<I>, ResetOutput<I>> for ResetInput<I> {
    type Error = Infallible;

    fn into_input_pin(self) -> core::result::Result<ResetInput<I>, Infallible> {
        Ok(self)
    }

    fn into_output_pin(
        self,
        state: PinState,
    ) -> core::result::Result<ResetOutput<I>, Infallible> {
        Ok(ResetOutput(self.0.into_push_pull_output_in_state(state)))
    }
}

impl<I: PinId> IoPin<ResetInput<I>, ResetOutput<I>> for ResetOutput<I> {
    type Error = Infallible;

    fn into_input_pin(self) -> core::result::Result<ResetInput<I>, Infallible> {
        Ok(ResetInput(self.0.into_pull_up_input()))
    }

    fn into_output_pin(
        mut self,
        state: PinState,
    ) -> core::result::Result<ResetOutput<I>, Infallible> {
        self.0.set_state(state)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback;

    #[test]
    fn program_layout_matches_loopback_model() {
        let (program, offsets) = probe_program();
        assert_eq!(offsets, loopback::PROGRAM_OFFSETS);
        assert_eq!(program.code.len(), loopback::PROGRAM_LEN as usize);
    }
}

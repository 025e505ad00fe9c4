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

use core::fmt::Debug;

use embedded_hal::digital::v2::{InputPin, IoPin, OutputPin, PinState};

/// Target reset line.
///
/// nRESET is shared with other reset sources on the target, so the probe
/// only ever pulls it low and otherwise leaves it to the pull-up.
pub trait ResetLine {
    /// Release the line and enable its pull-up.
    fn init(&mut self);
    /// Drive the line low.
    fn assert(&mut self);
    /// Stop driving the line.
    fn release(&mut self);
}

/// No reset line wired.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoResetLine;

impl ResetLine for NoResetLine {
    #[inline(always)]
    fn init(&mut self) {}
    #[inline(always)]
    fn assert(&mut self) {}
    #[inline(always)]
    fn release(&mut self) {}
}

/// Reset line on a pin whose output stage is already open drain, so a high
/// level means released.
pub struct OpenDrainReset<P> {
    pin: P,
}

impl<P: OutputPin> OpenDrainReset<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    pub fn free(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> ResetLine for OpenDrainReset<P> {
    fn init(&mut self) {
        self.release();
    }

    fn assert(&mut self) {
        if self.pin.set_low().is_err() {
            log::warn!("failed to assert target reset");
        }
    }

    fn release(&mut self) {
        if self.pin.set_high().is_err() {
            log::warn!("failed to release target reset");
        }
    }
}

/// Reset line emulating an open drain output by switching the pin between
/// an input, left to the pull-up, and an output driven low.
///
/// The pin is handed over as an input, so the line is released from the
/// start. The output is only ever entered in the low state.
pub struct SwitchedReset<I, O> {
    line: Line<I, O>,
}

enum Line<I, O> {
    Released(I),
    Driven(O),
    // The pin was lost in a failed direction change.
    Broken,
}

impl<I, O> SwitchedReset<I, O>
where
    I: InputPin + IoPin<I, O>,
    O: OutputPin + IoPin<I, O>,
    <I as IoPin<I, O>>::Error: Debug,
    <O as IoPin<I, O>>::Error: Debug,
{
    pub fn new(pin: I) -> Self {
        Self {
            line: Line::Released(pin),
        }
    }

    /// `true` while the line is driven low.
    pub fn is_asserted(&self) -> bool {
        matches!(self.line, Line::Driven(_))
    }
}

impl<I, O> ResetLine for SwitchedReset<I, O>
where
    I: InputPin + IoPin<I, O>,
    O: OutputPin + IoPin<I, O>,
    <I as IoPin<I, O>>::Error: Debug,
    <O as IoPin<I, O>>::Error: Debug,
{
    fn init(&mut self) {
        self.release();
    }

    fn assert(&mut self) {
        self.line = match core::mem::replace(&mut self.line, Line::Broken) {
            Line::Released(pin) => match pin.into_output_pin(PinState::Low) {
                Ok(pin) => Line::Driven(pin),
                Err(e) => {
                    log::warn!("failed to assert target reset: {:?}", e);
                    Line::Broken
                }
            },
            other => other,
        };
    }

    fn release(&mut self) {
        self.line = match core::mem::replace(&mut self.line, Line::Broken) {
            Line::Driven(pin) => match pin.into_input_pin() {
                Ok(pin) => Line::Released(pin),
                Err(e) => {
                    log::warn!("failed to release target reset: {:?}", e);
                    Line::Broken
                }
            },
            other => other,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Level(Option<bool>);

    impl OutputPin for Level {
        type Error = Infallible;

        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0 = Some(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0 = Some(true);
            Ok(())
        }
    }

    #[test]
    fn open_drain_reset_drives_low_and_releases_high() {
        let mut reset = OpenDrainReset::new(Level::default());
        reset.init();
        assert_eq!(reset.pin.0, Some(true));
        reset.assert();
        assert_eq!(reset.pin.0, Some(false));
        reset.release();
        assert_eq!(reset.free().0, Some(true));
    }

    /// What the pin was switched to: `None` for input, `Some(level)` for output.
    type History = Rc<RefCell<Vec<Option<PinState>>>>;

    struct Input(History);
    struct Output(History);

    impl InputPin for Input {
        type Error = Infallible;

        fn is_high(&self) -> Result<bool, Infallible> {
            Ok(true)
        }

        fn is_low(&self) -> Result<bool, Infallible> {
            Ok(false)
        }
    }

    impl OutputPin for Output {
        type Error = Infallible;

        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().push(Some(PinState::Low));
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().push(Some(PinState::High));
            Ok(())
        }
    }

    impl IoPin<Input, Output> for Input {
        type Error = Infallible;

        fn into_input_pin(self) -> Result<Input, Infallible> {
            Ok(self)
        }

        fn into_output_pin(self, state: PinState) -> Result<Output, Infallible> {
            self.0.borrow_mut().push(Some(state));
            Ok(Output(self.0))
        }
    }

    impl IoPin<Input, Output> for Output {
        type Error = Infallible;

        fn into_input_pin(self) -> Result<Input, Infallible> {
            self.0.borrow_mut().push(None);
            Ok(Input(self.0))
        }

        fn into_output_pin(self, state: PinState) -> Result<Output, Infallible> {
            self.0.borrow_mut().push(Some(state));
            Ok(self)
        }
    }

    #[test]
    fn switched_reset_starts_released() {
        let history = History::default();
        let mut reset = SwitchedReset::new(Input(history.clone()));
        assert!(!reset.is_asserted());
        reset.init();
        assert!(!reset.is_asserted());
        // Never driven, not even high for a moment.
        assert_eq!(*history.borrow(), vec![]);
    }

    #[test]
    fn switched_reset_only_drives_low() {
        let history = History::default();
        let mut reset = SwitchedReset::new(Input(history.clone()));
        reset.init();
        reset.assert();
        assert!(reset.is_asserted());
        reset.assert();
        reset.release();
        assert!(!reset.is_asserted());
        reset.release();
        assert_eq!(*history.borrow(), vec![Some(PinState::Low), None]);
    }
}

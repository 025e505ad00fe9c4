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

use core::fmt;

use crate::sequencer::EntryPoint;

/// Which instruction stream of the sequencer program is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// No program installed, or the last mode switch did not settle.
    #[default]
    Uninitialized,
    /// SWDIO is sampled on the rising edge of SWCLK.
    ReadMode,
    /// SWDIO is driven on the falling edge of SWCLK.
    WriteMode,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Uninitialized => "uninitialized",
            Mode::ReadMode => "read",
            Mode::WriteMode => "write",
        };
        f.write_str(name)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Type-level counterpart of [`Mode::ReadMode`] and [`Mode::WriteMode`].
pub trait TransferMode: sealed::Sealed {
    const MODE: Mode;
    /// Where the sequencer is sent to start this mode.
    const ENTRY: EntryPoint;
    /// Where the sequencer waits for the next bit-count token in this mode.
    const IDLE: EntryPoint;
}

/// Read mode marker for [`Port`](crate::Port).
#[derive(Debug)]
pub struct ReadMode;

/// Write mode marker for [`Port`](crate::Port).
#[derive(Debug)]
pub struct WriteMode;

impl sealed::Sealed for ReadMode {}
impl sealed::Sealed for WriteMode {}

impl TransferMode for ReadMode {
    const MODE: Mode = Mode::ReadMode;
    const ENTRY: EntryPoint = EntryPoint::InPosedge;
    const IDLE: EntryPoint = EntryPoint::InIdle;
}

impl TransferMode for WriteMode {
    const MODE: Mode = Mode::WriteMode;
    const ENTRY: EntryPoint = EntryPoint::OutNegedge;
    const IDLE: EntryPoint = EntryPoint::OutIdle;
}

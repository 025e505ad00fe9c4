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

//! Bit-level SWD probe driver on top of a PIO-style sequencer.
//!
//! The driver shifts up to 32 bits at a time through a sequencer program that
//! has two instruction streams, one which samples SWDIO on the rising edge of
//! SWCLK and one which drives SWDIO on the falling edge. The [`SwdProbe`]
//! handle owns the sequencer, tracks which stream is active and rejects
//! transactions issued in the wrong one.
//!
//! ```ignore
//! let mut probe = SwdProbe::new(sequencer, ProbeConfig::new(PinConfig::new(2, 3)));
//! probe.init()?;
//! probe.write_bits(8, 0xa5)?;
//! probe.enter_read_mode()?;
//! let ack = probe.read_bits(3)?;
//! ```

#![cfg_attr(not(test), no_std)]

mod bits;
mod clock;
mod config;
mod error;
pub mod loopback;
mod markers;
mod mode;
mod probe;
mod reset;
mod sequencer;

#[cfg(feature = "rp2040")]
pub mod rp2040;

pub use bits::BitCount;
pub use clock::{div_round_up, ClockDivider};
pub use config::{PinConfig, ProbeConfig, WaitPolicy, DEFAULT_FREQUENCY, DEFAULT_POLL_LIMIT};
pub use error::{ProbeError, Result};
pub use markers::{Marker, NoMarkers, PinMarkers, TimingMarkers};
pub use mode::{Mode, ReadMode, TransferMode, WriteMode};
pub use probe::{Port, SwdProbe};
pub use reset::{NoResetLine, OpenDrainReset, ResetLine, SwitchedReset};
pub use sequencer::{EntryPoint, ProgramOffsets, Sequencer, ShiftConfig};

pub use embedded_time::rate::Kilohertz;

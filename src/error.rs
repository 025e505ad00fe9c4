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

use crate::mode::Mode;

/// Errors reported by the probe driver.
///
/// All of these are caller contract violations or an unresponsive sequencer.
/// None of them are retried inside the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProbeError {
    /// Bit count outside `1..=32`.
    #[error("bit count {0} is outside 1..=32")]
    InvalidBitCount(u32),
    /// The requested SWCLK frequency (kHz) yields no usable clock divider.
    #[error("no clock divider for {0} kHz")]
    InvalidFrequency(u32),
    /// A transaction was issued while the sequencer runs the other program.
    #[error("transaction requires {required:?}, sequencer is in {current:?}")]
    WrongMode { required: Mode, current: Mode },
    /// The probe has not been initialized.
    #[error("probe is not initialized")]
    NotInitialized,
    /// The sequencer did not respond within the configured poll budget.
    #[error("sequencer did not respond in time")]
    SequencerTimeout,
    /// The sequencer had no room for the probe program.
    #[error("failed to install the sequencer program")]
    InstallFailed,
}

pub type Result<T> = core::result::Result<T, ProbeError>;

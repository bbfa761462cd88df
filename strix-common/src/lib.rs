// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod error;
pub mod event;
pub mod settings;
pub mod types;

pub use error::{check_native, DeviceError};
pub use event::Event;
pub use settings::Settings;
pub use types::*;

// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::time::Duration;

/// Runtime tunables for the submission engine.
#[derive(Debug, Clone)]
pub struct Settings {
    // Threading
    pub use_submission_thread: bool,
    pub use_interrupt_thread: bool,

    // Submission
    /// Upper bound on command lists per native submission call.
    pub max_execute_batch_size: usize,
    /// Approximate command budget per submission call; 0 disables the limit.
    pub max_commands_per_batch: u32,

    // Diagnostics
    /// Age after which an incomplete payload is reported as a GPU hang.
    pub gpu_timeout: Duration,
    /// Marker-ring capacity of each breadcrumb stack.
    pub breadcrumb_max_markers: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_submission_thread: true,
            use_interrupt_thread: true,
            max_execute_batch_size: usize::MAX,
            max_commands_per_batch: 0,
            gpu_timeout: Duration::from_secs(5),
            breadcrumb_max_markers: 4096,
        }
    }
}

impl Settings {
    /// Settings for cooperative pumping on the calling thread, as used by
    /// the test suite and single-threaded hosts.
    pub fn cooperative() -> Self {
        Self {
            use_submission_thread: false,
            use_interrupt_thread: false,
            ..Self::default()
        }
    }
}

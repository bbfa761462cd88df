// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Native-layer error taxonomy.
//!
//! Every failure the native GPU layer can report is fatal: a failed fence or
//! queue primitive leaves synchronization state undefined, so there is no
//! retry path. Call sites route results through [`check_native`].

use thiserror::Error;

/// A failure reported by the native GPU layer.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("native fence creation failed on node {node}: {reason}")]
    FenceCreation { node: u32, reason: String },

    #[error("native queue creation failed on node {node}: {reason}")]
    QueueCreation { node: u32, reason: String },

    #[error("queue signal failed: {0}")]
    Signal(String),

    #[error("queue wait failed: {0}")]
    Wait(String),

    #[error("completion event registration failed: {0}")]
    EventRegistration(String),

    #[error("command list submission failed: {0}")]
    Submission(String),

    #[error("device removed: {0}")]
    DeviceRemoved(String),
}

/// Unwraps a native-call result, bringing the process down on failure.
///
/// There is no recovery strategy for a failed native synchronization call;
/// any subsequent wait or signal could deadlock or silently desynchronize.
#[track_caller]
pub fn check_native<T>(result: Result<T, DeviceError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            log::error!("fatal native GPU failure: {err}");
            panic!("fatal native GPU failure: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_native_passes_ok() {
        assert_eq!(check_native(Ok(7u64)), 7);
    }

    #[test]
    #[should_panic(expected = "fatal native GPU failure")]
    fn test_check_native_aborts_on_error() {
        check_native::<()>(Err(DeviceError::Signal("lost".into())));
    }

    #[test]
    fn test_error_display() {
        let err = DeviceError::FenceCreation {
            node: 1,
            reason: "out of memory".into(),
        };
        assert_eq!(
            err.to_string(),
            "native fence creation failed on node 1: out of memory"
        );
    }
}

// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Native GPU backend abstraction.
//!
//! The submission core drives the hardware exclusively through these traits:
//! monotone fence counters, command queues, and completion notifications.
//! Only the null backend is implemented here; a real driver backend plugs in
//! at the same seam.

pub mod null_backend;

use std::sync::Arc;

use strix_common::{DeviceError, Event};

use crate::queue::QueueType;

/// Backend type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Null,
}

/// Factory for native fence and queue primitives, scoped to one adapter.
pub trait NativeBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Create a native fence counter starting at `initial_value`.
    fn create_fence(
        &self,
        initial_value: u64,
        node_index: u32,
    ) -> Result<Box<dyn NativeFence>, DeviceError>;

    /// Create (or retrieve) the native submission channel of one
    /// (node, queue type) pair.
    fn create_queue(
        &self,
        node_index: u32,
        queue_type: QueueType,
    ) -> Result<Box<dyn NativeQueue>, DeviceError>;
}

/// A native monotone fence counter.
pub trait NativeFence: Send + Sync {
    /// Stable identity of this fence within its backend.
    fn fence_id(&self) -> u64;

    /// Highest value the GPU has completed so far.
    fn completed_value(&self) -> u64;

    /// Arm `event` to be set once the counter reaches `value`. Fires
    /// immediately if the counter is already there.
    fn set_event_on_completion(&self, value: u64, event: Arc<Event>) -> Result<(), DeviceError>;
}

/// A native hardware submission channel.
pub trait NativeQueue: Send + Sync {
    /// Instruct the queue to signal `fence` with `value` once prior work on
    /// the queue completes. Never blocks the CPU.
    fn signal(&self, fence: &dyn NativeFence, value: u64) -> Result<(), DeviceError>;

    /// Instruct the queue to hold subsequent work until `fence` reaches
    /// `value`. Blocks the GPU timeline, never the CPU.
    fn wait(&self, fence: &dyn NativeFence, value: u64) -> Result<(), DeviceError>;

    /// Submit closed command lists, identified by id, for execution.
    fn execute_command_lists(&self, list_ids: &[u64]) -> Result<(), DeviceError>;
}

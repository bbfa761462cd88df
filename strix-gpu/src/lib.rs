// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU command-queue submission and cross-queue synchronization.
//!
//! Producer threads assemble [`Payload`]s — batches of command lists plus
//! their wait/signal dependencies — and hand them to a [`SubmissionPipe`].
//! The pipe's submission consumer resolves sync-point waits, deduplicates
//! cross-queue fence waits, and issues the work to the native queue; its
//! interrupt consumer observes GPU completion, signals CPU-visible sync
//! points, and recycles command allocators.
//!
//! The hardware is reached only through the [`backend`] traits; the null
//! backend records issued instructions and simulates fence completion.

pub mod backend;
pub mod breadcrumbs;
pub mod command;
pub mod device;
pub mod fence;
pub mod payload;
pub mod pool;
pub mod queue;
pub mod submission;
pub mod sync_point;

pub use backend::null_backend::NullBackend;
pub use device::{Adapter, NodeDevice};
pub use fence::{Fence, FenceCore, ManualFence};
pub use payload::{FenceValuePair, Payload};
pub use queue::{NodeQueue, QueueType, RemoteFenceState};
pub use submission::{ProcessResult, QueueStatus, SubmissionPipe};
pub use sync_point::{ResolvedFence, SyncPoint, SyncPointRef, SyncPointType};

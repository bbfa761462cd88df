// SPDX-FileCopyrightText: 2026 strix contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! The submission pipe: payload pumping and GPU-completion processing.
//!
//! Fence values for sync points are determined by the submission consumer,
//! where each queue carries a monotonically incrementing fence value. Work
//! may arrive waiting on a sync point whose signaling payload has not been
//! submitted yet; such payloads stay at the front of their queue, cursor
//! preserved, until later submissions resolve the sync point.
//!
//! The pipe runs each consumer on a dedicated thread kicked by an event, or
//! cooperatively on the calling thread — access to the queues' consumer
//! state is serialized either way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bitflags::bitflags;
use parking_lot::Mutex;

use strix_common::{check_native, DeviceError, Event, Settings};

use crate::backend::NativeFence;
use crate::device::Adapter;
use crate::payload::Payload;
use crate::queue::NodeQueue;

bitflags! {
    /// Outcome flags of one pump pass.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueueStatus: u32 {
        /// At least one payload made progress.
        const PROCESSED = 1 << 0;
        /// At least one payload is still blocked.
        const PENDING = 1 << 1;
    }
}

/// Result of one submission or interrupt pump pass.
#[derive(Debug, Clone, Copy)]
pub struct ProcessResult {
    pub status: QueueStatus,
    /// Deadline for the pump thread's next forced wake; `None` sleeps until
    /// the next kick.
    pub wait_timeout: Option<Duration>,
}

impl Default for ProcessResult {
    fn default() -> Self {
        Self {
            status: QueueStatus::empty(),
            wait_timeout: None,
        }
    }
}

impl ProcessResult {
    fn clamp_timeout(&mut self, timeout: Duration) {
        self.wait_timeout = Some(self.wait_timeout.map_or(timeout, |t| t.min(timeout)));
    }
}

/// A pump thread: drains its queue function until no progress, then sleeps
/// on the kick event.
struct PipeThread {
    handle: Option<JoinHandle<()>>,
    kick: Arc<Event>,
    exit: Arc<AtomicBool>,
}

impl PipeThread {
    fn spawn(
        name: &str,
        shared: Arc<PipeShared>,
        kick: Arc<Event>,
        func: fn(&PipeShared) -> ProcessResult,
    ) -> Self {
        let exit = Arc::new(AtomicBool::new(false));
        let handle = {
            let exit = exit.clone();
            let kick = kick.clone();
            std::thread::Builder::new()
                .name(name.to_owned())
                .spawn(move || {
                    while !exit.load(Ordering::Acquire) {
                        let mut result;
                        loop {
                            result = func(&shared);
                            if !result.status.contains(QueueStatus::PROCESSED) {
                                break;
                            }
                        }
                        kick.wait_timeout(result.wait_timeout);
                    }
                })
                .expect("failed to spawn pipe thread")
        };

        Self {
            handle: Some(handle),
            kick,
            exit,
        }
    }

    fn kick(&self) {
        self.kick.set();
    }
}

impl Drop for PipeThread {
    fn drop(&mut self) {
        self.exit.store(true, Ordering::Release);
        self.kick.set();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct PipeShared {
    adapter: Arc<Adapter>,
    settings: Settings,
    /// Wake target for the interrupt consumer; native fence notifications
    /// are armed onto this event.
    interrupt_kick: Arc<Event>,
    has_interrupt_thread: bool,
    submission_lock: Mutex<()>,
    interrupt_lock: Mutex<()>,
}

impl PipeShared {
    fn process_submission_queue(&self) -> ProcessResult {
        let _guard = self.submission_lock.lock();
        self.submission_pass()
    }

    fn process_interrupt_queue(&self) -> ProcessResult {
        let _guard = self.interrupt_lock.lock();
        self.interrupt_pass()
    }

    /// One sweep over every queue's pending submissions. Caller holds the
    /// submission lock.
    fn submission_pass(&self) -> ProcessResult {
        let mut result = ProcessResult::default();

        self.adapter.for_each_queue(|queue| {
            loop {
                let Some(mut payload) = queue.pending_submission.pop() else {
                    break;
                };

                // Accumulate fence waits from the sync points, resuming at
                // the saved cursor.
                let mut blocked = false;
                while payload.wait_cursor < payload.sync_points_to_wait.len() {
                    let sync_point = &payload.sync_points_to_wait[payload.wait_cursor];
                    match sync_point.resolved_fence() {
                        Some(resolved) => {
                            queue.enqueue_fence_wait(&resolved.fence, resolved.value);
                            payload.wait_cursor += 1;
                        }
                        None => {
                            // The payload that signals this sync point has
                            // not reached its queue yet. Retry once more
                            // work is submitted.
                            blocked = true;
                            break;
                        }
                    }
                }

                if blocked {
                    queue.pending_submission.requeue_front(payload);
                    result.status |= QueueStatus::PENDING;
                    break;
                }

                payload.sync_points_to_wait.clear();
                payload.wait_cursor = 0;

                queue.begin_payload(payload);
                queue.flush_fence_waits();
                queue.execute_payload();
                result.status |= QueueStatus::PROCESSED;
            }
        });

        if result.status.contains(QueueStatus::PROCESSED) {
            self.interrupt_kick.set();
        }

        result
    }

    /// One sweep over every queue's in-flight payloads. Caller holds the
    /// interrupt lock.
    fn interrupt_pass(&self) -> ProcessResult {
        let mut result = ProcessResult::default();

        self.adapter.for_each_queue(|queue| {
            while let Some(mut payload) = queue.pending_interrupt.pop() {
                let completed = queue.fence().native().completed_value();

                if completed == u64::MAX {
                    // The driver signals every fence to u64::MAX when the
                    // device is lost.
                    self.dump_breadcrumbs(&payload);
                    check_native::<()>(Err(DeviceError::DeviceRemoved(format!(
                        "queue [{}/{}]",
                        queue.node_index(),
                        queue.queue_type().name()
                    ))));
                }

                if completed < payload.completion_fence_value() {
                    // Still running on the GPU. Ask the driver to wake the
                    // interrupt thread when the required value is reached.
                    if self.has_interrupt_thread
                        && !queue.fence().interrupt_awaited().swap(true, Ordering::AcqRel)
                    {
                        check_native(queue.fence().native().set_event_on_completion(
                            payload.completion_fence_value(),
                            self.interrupt_kick.clone(),
                        ));
                    }
                    result.status |= QueueStatus::PENDING;

                    if let Some(submitted) = payload.submission_time {
                        let elapsed = submitted.elapsed();
                        if elapsed >= self.settings.gpu_timeout {
                            self.handle_gpu_timeout(queue, &payload, elapsed);
                            payload.submission_time = None;
                        } else {
                            // Wake again when this payload's timeout lapses.
                            result.clamp_timeout(self.settings.gpu_timeout - elapsed);
                        }
                    }

                    queue.pending_interrupt.requeue_front(payload);
                    break;
                }

                // The payload's command lists completed on the GPU.
                queue.fence().interrupt_awaited().store(false, Ordering::Release);
                result.status |= QueueStatus::PROCESSED;

                for sync_point in &payload.sync_points_to_signal {
                    sync_point.signal_completed();
                }

                // Dropping the payload returns its allocators to the device.
                drop(payload);
            }
        });

        result
    }

    fn handle_gpu_timeout(&self, queue: &NodeQueue, payload: &Payload, elapsed: Duration) {
        log::warn!(
            "GPU timeout: a payload on queue [{}/{}] has not completed after {:.1} s (fence value {})",
            queue.node_index(),
            queue.queue_type().name(),
            elapsed.as_secs_f64(),
            payload.completion_fence_value()
        );
    }

    fn dump_breadcrumbs(&self, payload: &Payload) {
        for stack in &payload.breadcrumb_stacks {
            let stack = stack.lock();
            let scopes = stack.active_scopes();
            if !scopes.is_empty() {
                log::error!(
                    "breadcrumbs (context {}): open scopes {:08x?}",
                    stack.context_id(),
                    scopes
                );
            }
        }
    }
}

/// Per-adapter submission engine.
pub struct SubmissionPipe {
    shared: Arc<PipeShared>,
    // Shut down submission before interrupt, matching field order.
    submission_thread: Option<PipeThread>,
    interrupt_thread: Option<PipeThread>,
}

impl SubmissionPipe {
    pub fn new(adapter: Arc<Adapter>) -> Self {
        let settings = adapter.settings().clone();
        let interrupt_kick = Arc::new(Event::auto_reset());

        let shared = Arc::new(PipeShared {
            adapter,
            interrupt_kick: interrupt_kick.clone(),
            has_interrupt_thread: settings.use_interrupt_thread,
            submission_lock: Mutex::new(()),
            interrupt_lock: Mutex::new(()),
            settings: settings.clone(),
        });

        let interrupt_thread = settings.use_interrupt_thread.then(|| {
            PipeThread::spawn(
                "strix-interrupt",
                shared.clone(),
                interrupt_kick,
                PipeShared::process_interrupt_queue,
            )
        });

        let submission_thread = settings.use_submission_thread.then(|| {
            PipeThread::spawn(
                "strix-submission",
                shared.clone(),
                Arc::new(Event::auto_reset()),
                PipeShared::process_submission_queue,
            )
        });

        Self {
            shared,
            submission_thread,
            interrupt_thread,
        }
    }

    /// Enqueue payloads on their owning queues' pending-submission queues,
    /// in order, and drive the submission consumer.
    pub fn submit_payloads(&self, payloads: Vec<Box<Payload>>) {
        log::debug!("submission pipe: submitting {} payload(s)", payloads.len());
        for payload in payloads {
            let queue = payload.queue();
            queue.pending_submission.enqueue(payload);
        }

        if let Some(thread) = &self.submission_thread {
            thread.kick();
        } else {
            // Multiple producer threads may call submit concurrently; the
            // lock inside makes one of them the consumer.
            while self
                .shared
                .process_submission_queue()
                .status
                .contains(QueueStatus::PROCESSED)
            {}
        }
    }

    /// One cooperative submission pass.
    pub fn process_submission_queue(&self) -> ProcessResult {
        self.shared.process_submission_queue()
    }

    /// One cooperative interrupt pass.
    pub fn process_interrupt_queue(&self) -> ProcessResult {
        self.shared.process_interrupt_queue()
    }

    /// Block until `event` is set. With an interrupt thread, simply waits;
    /// without one, pumps the interrupt queue on the calling thread,
    /// yielding to whichever thread currently holds the interrupt lock.
    pub fn process_interrupt_queue_until(&self, event: &Event) {
        if self.interrupt_thread.is_some() {
            if !event.ready() {
                event.wait();
            }
            return;
        }

        while !event.ready() {
            match self.shared.interrupt_lock.try_lock() {
                Some(_guard) => {
                    while !event.ready() {
                        self.shared.interrupt_pass();
                    }
                }
                None => std::thread::yield_now(),
            }
        }
    }

    pub fn adapter(&self) -> &Arc<Adapter> {
        &self.shared.adapter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null_backend::{NullBackend, QueueOp};
    use crate::queue::QueueType;
    use crate::sync_point::{SyncPoint, SyncPointType};

    fn cooperative_pipe(backend: &NullBackend, nodes: u32) -> SubmissionPipe {
        let adapter = Adapter::new(Box::new(backend.clone()), nodes, Settings::cooperative());
        SubmissionPipe::new(adapter)
    }

    #[test]
    fn test_wait_cursor_resumes_past_resolved_entries() {
        let backend = NullBackend::new();
        let pipe = cooperative_pipe(&backend, 1);
        let device = pipe.adapter().device(0).clone();
        let direct = device.queue(QueueType::Direct);

        // Payload on Direct waiting on two sync points; only the first is
        // resolved by the Copy-queue payload that signals it.
        let resolved_early = SyncPoint::create(SyncPointType::GpuOnly);
        let resolved_late = SyncPoint::create(SyncPointType::GpuOnly);

        let mut signaler_a = Payload::new(&device, QueueType::Copy);
        signaler_a.always_signal = true;
        signaler_a.sync_points_to_signal.push(resolved_early.clone());

        let mut waiter = Payload::new(&device, QueueType::Direct);
        waiter.sync_points_to_wait.push(resolved_early.clone());
        waiter.sync_points_to_wait.push(resolved_late.clone());
        waiter.always_signal = true;

        pipe.submit_payloads(vec![signaler_a, waiter]);

        // The waiter paused at index 1: the first entry resolved, the
        // second did not.
        let parked = direct.pending_submission.pop().expect("waiter parked");
        assert_eq!(parked.wait_cursor, 1);
        assert_eq!(parked.sync_points_to_wait.len(), 2);
        direct.pending_submission.requeue_front(parked);

        // Submitting the second signaler unblocks the waiter; the cursor
        // resumes at the unresolved entry without re-scanning the first.
        let mut signaler_b = Payload::new(&device, QueueType::Copy);
        signaler_b.always_signal = true;
        signaler_b.sync_points_to_signal.push(resolved_late.clone());
        pipe.submit_payloads(vec![signaler_b]);

        assert!(direct.pending_submission.is_empty());

        // Both sync points resolved to the same remote fence, so the merged
        // wait surfaces as a single queue instruction.
        let ops = backend.take_ops(0, QueueType::Direct);
        let wait_count = ops
            .iter()
            .filter(|op| matches!(op, QueueOp::Wait { .. }))
            .count();
        assert_eq!(wait_count, 1);
    }

    #[test]
    fn test_pending_status_when_unresolved() {
        let backend = NullBackend::new();
        let pipe = cooperative_pipe(&backend, 1);
        let device = pipe.adapter().device(0).clone();

        let unresolved = SyncPoint::create(SyncPointType::GpuOnly);
        let mut payload = Payload::new(&device, QueueType::Direct);
        payload.sync_points_to_wait.push(unresolved);
        device
            .queue(QueueType::Direct)
            .pending_submission
            .enqueue(payload);

        let result = pipe.process_submission_queue();
        assert!(result.status.contains(QueueStatus::PENDING));
        assert!(!result.status.contains(QueueStatus::PROCESSED));
    }

    #[test]
    fn test_interrupt_pass_pending_until_gpu_completes() {
        let backend = NullBackend::new();
        let pipe = cooperative_pipe(&backend, 1);
        let device = pipe.adapter().device(0).clone();

        let sync_point = SyncPoint::create(SyncPointType::GpuAndCpu);
        let mut payload = Payload::new(&device, QueueType::Direct);
        payload.always_signal = true;
        payload.sync_points_to_signal.push(sync_point.clone());
        pipe.submit_payloads(vec![payload]);

        let result = pipe.process_interrupt_queue();
        assert!(result.status.contains(QueueStatus::PENDING));
        assert!(!sync_point.is_complete());

        backend.retire_all();
        let result = pipe.process_interrupt_queue();
        assert!(result.status.contains(QueueStatus::PROCESSED));
        assert!(sync_point.is_complete());
    }

    #[test]
    #[should_panic(expected = "device removed")]
    fn test_device_removed_is_fatal() {
        let backend = NullBackend::new();
        let pipe = cooperative_pipe(&backend, 1);
        let device = pipe.adapter().device(0).clone();
        let queue = device.queue(QueueType::Direct);

        let context = device.obtain_context(QueueType::Direct);
        context.breadcrumbs.lock().begin_scope(0xDEAD_BEEF);

        let mut payload = Payload::new(&device, QueueType::Direct);
        payload.always_signal = true;
        payload.breadcrumb_stacks.push(context.breadcrumbs.clone());
        pipe.submit_payloads(vec![payload]);

        // A lost device reports u64::MAX as the completed value.
        backend.complete_fence(queue.fence().native().fence_id(), u64::MAX);
        pipe.process_interrupt_queue();
    }
}

//! Single-slot asynchronous readback of the result buffer.
//!
//! The staging buffer can be mapped by at most one request at a time. The
//! slot makes that structural: a map can only be armed from `Idle`, and the
//! orchestrator only encodes a copy into the staging buffer when the slot is
//! idle.

use tokio::sync::oneshot;

use montepi_core::error::{MontePiError, Result};
use montepi_core::reduction::{Counts, Slot};

type MapResult = std::result::Result<(), wgpu::BufferAsyncError>;

/// Observable slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadbackState {
    /// Staging buffer free.
    Idle,
    /// Map requested, callback not yet fired.
    Pending,
    /// Map callback fired; result not yet consumed.
    Ready,
}

enum SlotState {
    Idle,
    Pending(oneshot::Receiver<MapResult>),
    Ready(MapResult),
}

/// Single-slot future over the staging buffer.
pub struct ReadbackSlot {
    state: SlotState,
    failures: u64,
}

impl Default for ReadbackSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadbackSlot {
    /// Idle slot.
    pub fn new() -> Self {
        Self {
            state: SlotState::Idle,
            failures: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> ReadbackState {
        match self.state {
            SlotState::Idle => ReadbackState::Idle,
            SlotState::Pending(_) => ReadbackState::Pending,
            SlotState::Ready(_) => ReadbackState::Ready,
        }
    }

    /// Whether a new copy may target the staging buffer.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, SlotState::Idle)
    }

    /// Maps that failed since the slot was created.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Request a map of `staging`. Call after submitting the copy.
    pub fn begin(&mut self, staging: &wgpu::Buffer) -> Result<()> {
        if !self.is_idle() {
            return Err(MontePiError::Readback(
                "staging buffer already has a readback in flight".to_string(),
            ));
        }
        let (tx, rx) = oneshot::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.state = SlotState::Pending(rx);
        Ok(())
    }

    /// Move `Pending` to `Ready` if the map callback has fired.
    ///
    /// The device must have been polled for the callback to run.
    pub fn poll(&mut self) -> ReadbackState {
        if let SlotState::Pending(rx) = &mut self.state {
            match rx.try_recv() {
                Ok(result) => self.state = SlotState::Ready(result),
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.state = SlotState::Ready(Err(wgpu::BufferAsyncError));
                }
            }
        }
        self.state()
    }

    /// Consume a `Ready` result and return the slot to `Idle`.
    ///
    /// A failed map is logged and yields `None`. The copied window is lost,
    /// so callers must not substitute an earlier readback for it.
    pub fn take(&mut self, staging: &wgpu::Buffer) -> Option<Counts> {
        match self.take_result()? {
            Ok(()) => {
                let counts = {
                    let mapped = staging.slice(..).get_mapped_range();
                    let slots: &[Slot] = bytemuck::cast_slice(&mapped);
                    Counts::from_slots(slots)
                };
                staging.unmap();
                Some(counts)
            }
            Err(_) => None,
        }
    }

    fn take_result(&mut self) -> Option<MapResult> {
        let result = match std::mem::replace(&mut self.state, SlotState::Idle) {
            SlotState::Ready(result) => result,
            other => {
                self.state = other;
                return None;
            }
        };
        if let Err(e) = &result {
            self.failures += 1;
            tracing::warn!(
                error = %e,
                failures = self.failures,
                "Result readback failed, window dropped"
            );
        }
        Some(result)
    }
}

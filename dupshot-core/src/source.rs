//! Frame acquisition against a duplication service.
//!
//! [`FrameSource`] owns the service and enforces the one-frame-in-flight
//! protocol. Frames with no new desktop content are released and retried up
//! to a bound. Each acquired frame is a [`CapturedFrame`] guard that releases
//! itself on drop if it was not released explicitly.

use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::cursor::{CursorShape, PointerTracker};
use crate::error::CaptureError;
use crate::types::FrameMetadata;

// ── Service contract ─────────────────────────────────────────────

/// A frame as handed out by the service, before classification.
#[derive(Debug, Clone)]
pub struct RawFrame<S> {
    pub surface: S,
    pub metadata: FrameMetadata,
    /// Present only when the pointer shape changed since the last frame.
    pub pointer_shape: Option<CursorShape>,
}

/// Result of one wait on the service.
#[derive(Debug, Clone)]
pub enum Acquired<S> {
    Frame(RawFrame<S>),
    /// The wait elapsed without a frame. Nothing is held.
    Timeout,
}

/// The frame-duplication service.
///
/// After `acquire_next_frame` returns `Acquired::Frame`, the service holds
/// one frame slot until `release_frame` is called. If an implementation
/// fails after the service handed out a frame, it must release that frame
/// before returning the error.
pub trait DuplicationBackend {
    /// GPU surface handle of a duplicated frame.
    type Surface;

    fn acquire_next_frame(&mut self, timeout_ms: u32) -> Result<Acquired<Self::Surface>, CaptureError>;

    fn release_frame(&mut self) -> Result<(), CaptureError>;
}

// ── RetryPolicy ──────────────────────────────────────────────────

/// Bounds for waiting on a frame with new content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Service wait per attempt, in milliseconds.
    pub timeout_ms: u32,
    /// Empty or timed-out attempts allowed after the first one.
    pub max_empty_retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 500,
            max_empty_retries: 8,
            retry_delay: Duration::from_millis(1),
        }
    }
}

// ── FrameSource ──────────────────────────────────────────────────

/// Negotiates frames with the service; at most one is in flight.
pub struct FrameSource<B: DuplicationBackend> {
    backend: B,
    policy: RetryPolicy,
    in_flight: bool,
    pointer: PointerTracker,
}

impl<B: DuplicationBackend> FrameSource<B> {
    pub fn new(backend: B, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            in_flight: false,
            pointer: PointerTracker::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Pointer state folded from every frame seen so far, empty ones included.
    pub fn pointer(&self) -> &PointerTracker {
        &self.pointer
    }

    /// Whether a frame is currently held.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Wait for a frame with new desktop content.
    ///
    /// Empty frames are released before the next attempt. After
    /// `max_empty_retries` further attempts without new content this
    /// returns [`CaptureError::FrameTimeout`].
    ///
    /// Fails with [`CaptureError::ProtocolViolation`] if a frame is already
    /// in flight.
    pub fn acquire_frame(&mut self) -> Result<CapturedFrame<'_, B>, CaptureError> {
        if self.in_flight {
            return Err(CaptureError::ProtocolViolation(
                "acquire_frame called while a frame is still in flight",
            ));
        }

        let mut retries = 0u32;
        loop {
            match self.backend.acquire_next_frame(self.policy.timeout_ms)? {
                Acquired::Timeout => {
                    trace!(attempt = retries + 1, "service wait timed out");
                }
                Acquired::Frame(raw) => {
                    let RawFrame {
                        surface,
                        metadata,
                        pointer_shape,
                    } = raw;
                    self.pointer.observe(&metadata, pointer_shape);

                    if metadata.has_new_content() {
                        debug!(
                            present = metadata.present_timestamp,
                            accumulated = metadata.accumulated_frames,
                            coalesced = metadata.rects_coalesced,
                            retries,
                            "acquired frame"
                        );
                        self.in_flight = true;
                        return Ok(CapturedFrame {
                            source: self,
                            surface,
                            metadata,
                            released: false,
                        });
                    }

                    trace!(attempt = retries + 1, "empty frame, releasing");
                    drop(surface);
                    self.backend.release_frame()?;
                }
            }

            if retries >= self.policy.max_empty_retries {
                return Err(CaptureError::FrameTimeout {
                    attempts: retries + 1,
                    timeout_ms: self.policy.timeout_ms,
                });
            }
            retries += 1;
            if !self.policy.retry_delay.is_zero() {
                thread::sleep(self.policy.retry_delay);
            }
        }
    }

    fn release_in_flight(&mut self) -> Result<(), CaptureError> {
        if !self.in_flight {
            return Err(CaptureError::ProtocolViolation(
                "release called with no frame in flight",
            ));
        }
        self.in_flight = false;
        self.backend.release_frame()
    }
}

// ── CapturedFrame ────────────────────────────────────────────────

/// The single in-flight frame.
///
/// Release it with [`release`](Self::release) to observe the service's
/// answer; dropping it releases it as well and only logs a failure.
pub struct CapturedFrame<'a, B: DuplicationBackend> {
    source: &'a mut FrameSource<B>,
    surface: B::Surface,
    metadata: FrameMetadata,
    released: bool,
}

impl<B: DuplicationBackend> CapturedFrame<'_, B> {
    pub fn surface(&self) -> &B::Surface {
        &self.surface
    }

    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    /// Pointer state including this frame's update.
    pub fn pointer(&self) -> &PointerTracker {
        &self.source.pointer
    }

    /// Hand the frame back to the service.
    pub fn release(mut self) -> Result<(), CaptureError> {
        self.released = true;
        self.source.release_in_flight()
    }
}

impl<B: DuplicationBackend> Drop for CapturedFrame<'_, B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.source.release_in_flight() {
            warn!("releasing dropped frame failed: {e}");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDuplication, SimSurface, empty_frame, new_frame};

    fn policy(max_empty_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout_ms: 5,
            max_empty_retries,
            retry_delay: Duration::ZERO,
        }
    }

    fn surface() -> SimSurface {
        SimSurface::filled(2, 2, [1, 2, 3, 4])
    }

    #[test]
    fn empty_frames_are_released_before_retry() {
        let backend = SimDuplication::new([
            empty_frame(surface()),
            empty_frame(surface()),
            empty_frame(surface()),
            new_frame(surface(), 100),
        ]);
        let mut source = FrameSource::new(backend, policy(3));

        let frame = source.acquire_frame().unwrap();
        assert_eq!(frame.metadata().present_timestamp, 100);
        drop(frame);

        assert_eq!(source.backend().acquire_count(), 4);
        // Three empty releases plus the drop of the valid frame.
        assert_eq!(source.backend().release_count(), 4);
    }

    #[test]
    fn releases_precede_the_returned_frame() {
        let backend = SimDuplication::new([
            empty_frame(surface()),
            empty_frame(surface()),
            empty_frame(surface()),
            new_frame(surface(), 1),
        ]);
        let mut source = FrameSource::new(backend, policy(3));
        let frame = source.acquire_frame().unwrap();
        assert_eq!(frame.source.backend.release_count(), 3);
        frame.release().unwrap();
        assert_eq!(source.backend().release_count(), 4);
        assert!(!source.is_in_flight());
    }

    #[test]
    fn exceeding_retry_bound_times_out() {
        let backend = SimDuplication::new([
            empty_frame(surface()),
            empty_frame(surface()),
            empty_frame(surface()),
            new_frame(surface(), 1),
        ]);
        let mut source = FrameSource::new(backend, policy(2));

        let err = source.acquire_frame().err().unwrap();
        assert!(matches!(
            err,
            CaptureError::FrameTimeout { attempts: 3, timeout_ms: 5 }
        ));
        assert_eq!(source.backend().acquire_count(), 3);
        assert_eq!(source.backend().release_count(), 3);
        assert!(!source.is_in_flight());
    }

    #[test]
    fn service_timeouts_consume_the_budget() {
        let backend = SimDuplication::new([Acquired::Timeout, Acquired::Timeout]);
        let mut source = FrameSource::new(backend, policy(1));
        assert!(matches!(
            source.acquire_frame().err(),
            Some(CaptureError::FrameTimeout { attempts: 2, .. })
        ));
        assert_eq!(source.backend().release_count(), 0);
    }

    #[test]
    fn second_acquire_while_in_flight_fails_fast() {
        let backend = SimDuplication::new([new_frame(surface(), 1), new_frame(surface(), 2)]);
        let mut source = FrameSource::new(backend, policy(0));

        let frame = source.acquire_frame().unwrap();
        std::mem::forget(frame);

        let err = source.acquire_frame().err().unwrap();
        assert!(matches!(err, CaptureError::ProtocolViolation(_)));
        assert_eq!(source.backend().acquire_count(), 1);
    }

    #[test]
    fn dropped_frame_is_released() {
        let backend = SimDuplication::new([new_frame(surface(), 1), new_frame(surface(), 2)]);
        let mut source = FrameSource::new(backend, policy(0));

        drop(source.acquire_frame().unwrap());
        assert_eq!(source.backend().release_count(), 1);

        let frame = source.acquire_frame().unwrap();
        assert_eq!(frame.metadata().present_timestamp, 2);
    }

    #[test]
    fn release_without_frame_is_a_violation() {
        let mut source = FrameSource::new(SimDuplication::new([]), policy(0));
        assert!(matches!(
            source.release_in_flight(),
            Err(CaptureError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn pointer_updates_from_empty_frames_are_kept() {
        use crate::cursor::CursorShape;
        use crate::types::Point;

        let mut empty = empty_frame(surface());
        if let Acquired::Frame(raw) = &mut empty {
            raw.metadata.pointer_update_timestamp = 3;
            raw.metadata.pointer_visible = true;
            raw.metadata.pointer_position = Point::new(4, 5);
            raw.pointer_shape = Some(CursorShape::color(
                1,
                1,
                Point::default(),
                vec![0, 0, 0, 255],
            ));
        }
        let backend = SimDuplication::new([empty, new_frame(surface(), 9)]);
        let mut source = FrameSource::new(backend, policy(1));

        let frame = source.acquire_frame().unwrap();
        let state = frame.pointer().current().unwrap().unwrap();
        assert_eq!(state.position, Point::new(4, 5));
    }
}

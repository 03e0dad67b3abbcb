//! Ordered fallback when creating a rendering device.
//!
//! Candidates are tried in order and the first success wins. A failed
//! attempt owns whatever it created and drops it before the next attempt
//! runs; a successful attempt is returned as-is.

use std::fmt;

use tracing::{debug, warn};

use crate::error::CaptureError;

/// Rendering driver flavours, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    /// The GPU driver.
    Hardware,
    /// The software rasteriser.
    Warp,
    /// The reference rasteriser.
    Reference,
}

impl DriverKind {
    pub const FALLBACK_ORDER: [DriverKind; 3] =
        [DriverKind::Hardware, DriverKind::Warp, DriverKind::Reference];
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DriverKind::Hardware => "hardware",
            DriverKind::Warp => "warp",
            DriverKind::Reference => "reference",
        })
    }
}

/// Run `attempt` for each candidate until one succeeds.
///
/// Returns the winning candidate with its result. If every attempt fails,
/// the error is a [`CaptureError::DeviceInit`] listing each failure.
pub fn first_success<K, T, F>(candidates: &[K], mut attempt: F) -> Result<(K, T), CaptureError>
where
    K: Copy + fmt::Display,
    F: FnMut(K) -> Result<T, CaptureError>,
{
    let mut failures = Vec::with_capacity(candidates.len());
    for &candidate in candidates {
        match attempt(candidate) {
            Ok(value) => {
                debug!(%candidate, "device created");
                return Ok((candidate, value));
            }
            Err(e) => {
                warn!(%candidate, "device creation failed: {e}");
                failures.push(format!("{candidate}: {e}"));
            }
        }
    }
    if failures.is_empty() {
        return Err(CaptureError::DeviceInit("no candidates to try".into()));
    }
    Err(CaptureError::DeviceInit(failures.join("; ")))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Counts live instances so leaks show up.
    struct Tracked<'a>(&'a Cell<i32>);

    impl<'a> Tracked<'a> {
        fn new(live: &'a Cell<i32>) -> Self {
            live.set(live.get() + 1);
            Self(live)
        }
    }

    impl Drop for Tracked<'_> {
        fn drop(&mut self) {
            self.0.set(self.0.get() - 1);
        }
    }

    #[test]
    fn first_success_wins_in_order() {
        let mut tried = Vec::new();
        let (kind, value) = first_success(&DriverKind::FALLBACK_ORDER, |kind| {
            tried.push(kind);
            match kind {
                DriverKind::Hardware => Err(CaptureError::DeviceInit("no gpu".into())),
                _ => Ok(kind.to_string()),
            }
        })
        .unwrap();

        assert_eq!(kind, DriverKind::Warp);
        assert_eq!(value, "warp");
        assert_eq!(tried, vec![DriverKind::Hardware, DriverKind::Warp]);
    }

    #[test]
    fn failed_attempts_drop_partial_resources() {
        let live = Cell::new(0);
        let result = first_success(&DriverKind::FALLBACK_ORDER, |kind| {
            let device = Tracked::new(&live);
            if kind == DriverKind::Reference {
                Ok(device)
            } else {
                let _context = Tracked::new(&live);
                Err(CaptureError::DeviceInit(format!("{kind} unavailable")))
            }
        });

        let (kind, device) = result.unwrap();
        assert_eq!(kind, DriverKind::Reference);
        // Only the winner survives; it was not released on success.
        assert_eq!(live.get(), 1);
        drop(device);
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn all_failures_are_reported() {
        let err = first_success(&DriverKind::FALLBACK_ORDER, |kind| -> Result<(), _> {
            Err(CaptureError::DeviceInit(format!("{kind} broke")))
        })
        .unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, CaptureError::DeviceInit(_)));
        assert!(msg.contains("hardware"));
        assert!(msg.contains("warp"));
        assert!(msg.contains("reference"));
    }

    #[test]
    fn empty_candidate_list() {
        let err = first_success::<DriverKind, (), _>(&[], |_| Ok(())).unwrap_err();
        assert!(matches!(err, CaptureError::DeviceInit(_)));
    }
}

//! Market-structure detectors
//!
//! Every detector implements [`Detector`](crate::Detector) and reads a shared
//! [`AnalysisContext`](crate::AnalysisContext).
//!
//! # Detector Categories
//!
//! - **Structure**: market structure shift, break of structure, change of
//!   character, SMC structure break, ICT liquidity-grab reversal
//! - **Zones**: order blocks, support/resistance, supply/demand, quasimodo
//! - **Imbalance**: fair value gaps and their inversions
//! - **Liquidity**: liquidity zones, sweeps, grabs, smart money divergence
//! - **Confluence**: HTF/LTF structure, QMLR multi-factor, classic indicators

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{trace, warn};

use crate::{AnalysisContext, Detector, Signal};

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod character;
pub mod confluence;
pub mod divergence;
pub mod imbalance;
pub mod liquidity;
pub mod quasimodo;
pub mod structure;
pub mod zones;

// Re-export all detectors for convenience
pub use character::*;
pub use confluence::*;
pub use divergence::*;
pub use helpers::*;
pub use imbalance::*;
pub use liquidity::*;
pub use quasimodo::*;
pub use structure::*;
pub use zones::*;

/// Run one detector behind a failure boundary.
///
/// Short series yield an insufficient-data signal; errors and panics yield a
/// failed signal. Neither aborts the rest of the analysis.
pub fn evaluate<D: Detector + ?Sized>(detector: &D, ctx: &AnalysisContext<'_>) -> Signal {
    let id = detector.id();
    if ctx.len() < detector.min_candles() {
        trace!(detector = %id, need = detector.min_candles(), got = ctx.len(), "insufficient data");
        return Signal::insufficient(id);
    }

    match catch_unwind(AssertUnwindSafe(|| detector.detect(ctx))) {
        Ok(Ok(signal)) => signal,
        Ok(Err(e)) => {
            warn!(detector = %id, error = %e, "detector failed");
            Signal::failed(id, e.to_string())
        },
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "detector panicked".to_string());
            warn!(detector = %id, reason = %reason, "detector panicked");
            Signal::failed(id, reason)
        },
    }
}

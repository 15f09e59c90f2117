//! Cooperative cancellation, checked between stages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::{ForgeError, Result};

/// Shared cancel switch. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled. `next_stage` names what would have run.
    pub fn check(&self, next_stage: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(ForgeError::Cancelled(next_stage.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let flag = CancellationFlag::new();
        let handle = flag.clone();
        assert!(flag.check("avatar").is_ok());

        handle.cancel();
        assert!(flag.is_cancelled());
        let err = flag.check("avatar").unwrap_err();
        assert!(matches!(err, ForgeError::Cancelled(ref s) if s == "avatar"));
    }
}

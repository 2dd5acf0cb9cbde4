//! Stream cancellation
//!
//! One `StreamCancellation` may cover any number of streams. Each stream
//! processed with it watches its own child token, so cancelling the parent
//! stops all of them.

use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, Default)]
pub struct StreamCancellation {
    root: CancellationToken,
}

impl StreamCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop every stream watching this cancellation
    pub fn cancel(&self) {
        self.root.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Per-stream token, cancelled together with the parent
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }
}

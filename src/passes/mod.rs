//! The pass layer: every transformer is a small uniform state machine.
//!
//! A pass enumerates candidate edits as an opaque cursor: `new_state` seeds
//! it, `advance` steps it without materializing a variant, `transform`
//! produces the candidate for one cursor position, and `advance_on_success`
//! re-seeds against the committed file. Concrete passes are either internal
//! (regex/scanning over the byte buffer) or external (helper executables
//! speaking the hint wire protocol or rewriting text wholesale).

pub mod blank;
pub mod comments;
pub mod external;
pub mod hint_based;
pub mod lines;
pub mod registry;
pub mod special;

use crate::types::{Fur, PassResult};
use std::path::Path;

/// How the scheduler treats a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassKind {
    /// Ordinary transformer: candidates may commit.
    Transform,
    /// Read-only probe of the current file; never commits.
    CheckSanity,
    /// Transformer whose candidates come from a hint bundle.
    HintBased,
}

/// Result of materializing one candidate variant.
#[derive(Debug)]
pub enum TransformResult {
    /// The candidate file contents for this state.
    Ok(Vec<u8>),
    /// The state slot had no effect on this file; advance and retry.
    Invalid,
    /// The pass has nothing further to offer.
    Stop,
}

/// The cursor a pass threads through its transform space. Opaque to the
/// manager: it only clones, forwards, and orders these.
#[derive(Clone, Debug)]
pub enum PassState {
    Hint(hint_based::HintState),
    Replacement(special::ReplacementState),
    Counter(external::CounterState),
}

/// Uniform interface over every concrete pass.
pub trait Pass: Send + Sync {
    /// Display name, including the sub-mode argument (`lines::2`).
    fn name(&self) -> String;

    fn kind(&self) -> PassKind {
        PassKind::Transform
    }

    /// Upper bound on commits for one invocation of this pass.
    fn max_transforms(&self) -> Option<usize> {
        None
    }

    /// Checked once at startup; `Err` names the missing tool and drops the
    /// pass from the run.
    fn check_prerequisites(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Seed a cursor for the current file; `None` means the pass has
    /// nothing to offer.
    fn new_state(&self, fur: &Fur) -> PassResult<Option<PassState>>;

    /// Step the cursor; `None` means the enumeration is exhausted.
    fn advance(&self, state: &PassState) -> Option<PassState>;

    /// Produce the candidate for `state`. `data` is the snapshot the state
    /// was derived from; `sandbox_file` is a writable copy of it on disk for
    /// passes that shell out to helpers.
    fn transform(
        &self,
        data: &[u8],
        sandbox_file: &Path,
        state: &PassState,
    ) -> PassResult<TransformResult>;

    /// Re-seed after a commit. The default regenerates from scratch.
    fn advance_on_success(&self, fur: &Fur, state: &PassState) -> PassResult<Option<PassState>> {
        let _ = state;
        self.new_state(fur)
    }
}

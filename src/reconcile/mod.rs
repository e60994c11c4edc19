pub mod change;
pub mod pending;
pub mod reconciler;

pub use change::Undo;
pub use pending::{PendingKind, PendingMutation, SeqCounter};
pub use reconciler::Reconciler;

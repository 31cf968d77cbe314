//! Host hook protocol: input parsing, checkers, routing, and output.

pub mod checker;
pub mod input;
pub mod output;
pub mod router;

pub use checker::{CheckerMode, CheckerResult, CheckerSpec, CheckerTable};
pub use input::HookInput;
pub use output::{CanonicalOutput, Verdict, aggregate_exit_codes};
pub use router::{Dispatch, Router};

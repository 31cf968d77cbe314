//! Gate engine: events, conditions, gates, registry, and session state.

pub mod category;
pub mod condition;
pub mod context;
pub mod definitions;
pub mod event;
pub mod gate;
pub mod registry;
pub mod state;

pub use category::{CategoryLookup, ToolCategories, ToolCategory};
pub use condition::GateCondition;
pub use context::{HookContext, NoSlices, SessionSlices, SliceExtractor};
pub use event::{CanonicalEvent, Client, canonicalize};
pub use gate::{
    CountdownConfig, Gate, GateConfig, GateEnv, GatePolicy, GateState, GateStatus,
    GateTransition, GateTrigger,
};
pub use registry::{ComplianceAgents, GateRegistry};
pub use state::{SessionState, TraceEvent, TraceKind};

mod actor;
mod constraints;
mod event;
mod guard;
mod options;
mod policy;
mod reduction;

pub use actor::ResourceOptimizer;
pub use constraints::{merge_constraints, ConstraintSet};
pub use event::OptimizerEvent;
pub use guard::{BlockGuard, BlockVerdict};
pub use options::OptimizerOptions;
pub use policy::{
    apply_policies, ClusterSnapshot, PolicyInput, PolicyReason, ResourceDecision, WorkerView,
};
pub use reduction::ReductionOption;

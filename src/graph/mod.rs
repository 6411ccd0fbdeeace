//! Request dependency graph: node identity, registry, builder and inspection.

pub mod builder;
pub mod dag;
pub mod identity;
pub mod inspect;
pub mod node;
pub mod registry;

pub use builder::{
    BuildOutcome, BuildRequest, BuildSession, BuildState, BuildWarning, Closure, InProcess,
    StepEvent, DEFAULT_MAX_STEPS,
};
pub use dag::{Dag, DependencyEdge, EdgeRejected, InputVariable, PartRef};
pub use identity::{canonical_identity, is_identity_header};
pub use inspect::{render_dot, render_tree, walk_from_master, BuildProgress, DagSnapshot};
pub use node::{
    ConstantReason, DynamicPart, ExtractedPart, Extraction, Fragment, FragmentLocation, NodeId,
    NodeStatus, RequestCandidate, RequestNode, Resolution,
};
pub use registry::NodeRegistry;

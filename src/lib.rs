pub mod capture;
pub mod codegen;
pub mod config;
pub mod error;
pub mod graph;
pub mod oracle;
pub mod util;

pub use capture::{Capture, CaptureError, CaptureFilter, CaptureIndex, CookieJar, InMemoryCaptureIndex};
pub use codegen::{generate, render_plan, render_python, GeneratedProgram};
pub use config::Config;
pub use error::BuildError;
pub use graph::{BuildOutcome, BuildRequest, BuildSession, Dag, NodeId};
pub use oracle::{Decision, HeuristicOracle, Oracle, OracleError, ScriptedOracle};

//! Pipeline steps: static definitions, the collaborator contract and the
//! executor that runs one step for one iteration.

mod collaborator;
mod executor;
mod spec;

pub use collaborator::{ArtifactScope, Step, StepContext};
pub use executor::{Disposition, ExecutorConfig, StepExecutor, StepOutcome, WriteMode, raw_output_name};
pub use spec::{Dependency, DependencySource, FailurePolicy, StepSpec};

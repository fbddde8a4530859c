mod api_key;
mod project;
mod run;
mod step;

pub use api_key::ApiKey;
pub use project::Project;
pub use run::{NewRun, Run, RunStatus, RunSummary, RunTimeline, RunUpdate};
pub use step::{NewStep, Step, StepType};

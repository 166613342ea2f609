pub mod decision_schema;
pub mod project;

pub use decision_schema::{DecisionChoice, DecisionSchema};
pub use project::{Project, ProjectConfig, VariantNavigationMode, MAX_COMPARE_VARIANTS};

//! Project roles and the action matrix.
//!
//! Whether a viewer may create exports, and whether reviewers see export
//! jobs other than their own, are org policy toggles carried in project
//! config. The matrix consults the policy object; nothing here hardcodes a
//! per-deployment choice.

use serde::{Deserialize, Serialize};

/// Role of a caller within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "project_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Reviewer,
    Viewer,
}

/// Org policy toggles, read from project config.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OrgPolicy {
    /// Viewers may create (and therefore cancel) export jobs.
    #[serde(default)]
    pub viewer_exports: bool,
    /// Reviewers may read export jobs requested by other users.
    #[serde(default)]
    pub shared_export_visibility: bool,
}

/// Actions gated by the role matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read projects, items, config, and own decisions.
    Read,
    /// Submit decision events.
    WriteEvents,
    /// Create an export job.
    CreateExport,
    /// Read export jobs requested by other users.
    ReadOthersExports,
    /// Cancel an own queued/running export job.
    CancelOwnExport,
}

impl Role {
    pub fn allows(self, action: Action, policy: &OrgPolicy) -> bool {
        match (self, action) {
            (_, Action::Read) => true,

            (Role::Admin | Role::Reviewer, Action::WriteEvents) => true,
            (Role::Viewer, Action::WriteEvents) => false,

            (Role::Admin | Role::Reviewer, Action::CreateExport) => true,
            (Role::Viewer, Action::CreateExport) => policy.viewer_exports,

            (Role::Admin, Action::ReadOthersExports) => true,
            (Role::Reviewer, Action::ReadOthersExports) => policy.shared_export_visibility,
            (Role::Viewer, Action::ReadOthersExports) => false,

            // Cancellation tracks creation: whoever can create can cancel
            // their own job.
            (role, Action::CancelOwnExport) => role.allows(Action::CreateExport, policy),
        }
    }
}

//! Authorization primitives: roles, the action matrix, and org policy.

mod role;

pub use role::{Action, OrgPolicy, Role};

use uuid::Uuid;

/// Authenticated caller identity, resolved by the identity adapter.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: Uuid,
    pub email: String,
}

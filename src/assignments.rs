use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    triggers::{ConfirmableAssignment, ExperimentId, Variant},
    Result,
};

/// Mapping from experiment to the variant the user is assigned.
///
/// Two parallel maps exist at runtime: **confirmed** (persisted, acknowledged by the server) and
/// **unconfirmed** (in-memory, pending confirmation). A given experiment appears in at most one
/// of the two at a time.
pub type AssignmentMap = HashMap<ExperimentId, Variant>;

/// Result of a functional assignment update: the new confirmed and unconfirmed maps.
///
/// Assignment logic never mutates maps in place; callers replace their state with the returned
/// snapshot, which is what makes assignment transitions deterministic to test.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssignmentSnapshot {
    #[allow(missing_docs)]
    pub confirmed: AssignmentMap,
    #[allow(missing_docs)]
    pub unconfirmed: AssignmentMap,
}

/// Postback confirming a variant selection to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentPostback {
    #[allow(missing_docs)]
    pub assignments: Vec<ServerAssignment>,
}

impl AssignmentPostback {
    /// Build a postback for a single confirmable assignment.
    pub fn create(assignment: &ConfirmableAssignment) -> AssignmentPostback {
        AssignmentPostback {
            assignments: vec![ServerAssignment {
                experiment_id: assignment.experiment_id.clone(),
                variant_id: assignment.variant.id.clone(),
            }],
        }
    }
}

/// One experiment→variant pairing as the server represents it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAssignment {
    #[allow(missing_docs)]
    pub experiment_id: ExperimentId,
    #[allow(missing_docs)]
    pub variant_id: String,
}

/// Server response listing the assignments it holds for this user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentsResponse {
    #[allow(missing_docs)]
    pub assignments: Vec<ServerAssignment>,
}

/// Persistence for confirmed assignments. Backed by whatever key-value store the host provides.
pub trait AssignmentPersistence: Send + Sync {
    /// Read the persisted confirmed assignments.
    fn get_confirmed_assignments(&self) -> Result<AssignmentMap>;
    /// Replace the persisted confirmed assignments.
    fn save_confirmed_assignments(&self, assignments: AssignmentMap) -> Result<()>;
}

/// An [`AssignmentPersistence`] holding assignments in memory. Useful for tests and hosts without
/// durable storage.
#[derive(Default)]
pub struct InMemoryAssignmentPersistence {
    assignments: std::sync::Mutex<AssignmentMap>,
}

impl AssignmentPersistence for InMemoryAssignmentPersistence {
    fn get_confirmed_assignments(&self) -> Result<AssignmentMap> {
        let assignments = self
            .assignments
            .lock()
            .expect("thread holding assignment lock should not panic");
        Ok(assignments.clone())
    }

    fn save_confirmed_assignments(&self, assignments: AssignmentMap) -> Result<()> {
        let mut slot = self
            .assignments
            .lock()
            .expect("thread holding assignment lock should not panic");
        *slot = assignments;
        Ok(())
    }
}

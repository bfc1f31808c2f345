//! Block-level completion checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::objectives::{BlockId, ObjectiveState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    InProgress,
    Completed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Savepoint {
    pub block_id: BlockId,
    pub status: BlockStatus,
    pub objective_ids: Vec<String>,
    pub completed_objective_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Savepoint {
    fn same_content(&self, other: &Savepoint) -> bool {
        self.block_id == other.block_id
            && self.status == other.status
            && self.objective_ids == other.objective_ids
            && self.completed_objective_ids == other.completed_objective_ids
    }
}

/// Computes one savepoint per block in fixed order.
///
/// A block without active objectives counts as completed. `updated_at` is carried over from
/// `prior` whenever the block's content is unchanged.
pub fn compute_savepoints(
    objectives: &[ObjectiveState],
    prior: &[Savepoint],
    now: DateTime<Utc>,
) -> Vec<Savepoint> {
    BlockId::ALL
        .iter()
        .map(|block| {
            let members: Vec<&ObjectiveState> =
                objectives.iter().filter(|o| o.block == *block).collect();
            let objective_ids: Vec<String> = members.iter().map(|o| o.id.clone()).collect();
            let completed_objective_ids: Vec<String> = members
                .iter()
                .filter(|o| o.status.is_complete())
                .map(|o| o.id.clone())
                .collect();
            let status = if completed_objective_ids.len() == objective_ids.len() {
                BlockStatus::Completed
            } else {
                BlockStatus::InProgress
            };

            let mut savepoint = Savepoint {
                block_id: *block,
                status,
                objective_ids,
                completed_objective_ids,
                updated_at: now,
            };
            if let Some(previous) = prior.iter().find(|p| p.block_id == *block) {
                if previous.same_content(&savepoint) {
                    savepoint.updated_at = previous.updated_at;
                }
            }
            savepoint
        })
        .collect()
}

/// The first block still in progress.
pub fn active_block(savepoints: &[Savepoint]) -> Option<BlockId> {
    savepoints
        .iter()
        .find(|s| s.status == BlockStatus::InProgress)
        .map(|s| s.block_id)
}

pub fn all_completed(savepoints: &[Savepoint]) -> bool {
    savepoints.iter().all(|s| s.status == BlockStatus::Completed)
}

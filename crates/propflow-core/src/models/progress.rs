use serde::Serialize;
use uuid::Uuid;

/// Live progress of a worker batch, reported after every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub current_item: Option<Uuid>,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn is_done(&self) -> bool {
        self.completed + self.failed >= self.total
    }
}

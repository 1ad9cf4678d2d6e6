use std::collections::VecDeque;

use crate::error::NotaryResult;
use crate::source::base::RecordSource;
use crate::types::Record;

/// Source handing out a fixed list of records in order.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: VecDeque<Record>,
}

impl MemorySource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into(),
        }
    }

    /// Number of records not handed out yet.
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

impl RecordSource for MemorySource {
    fn name() -> &'static str {
        "memory"
    }

    async fn next_record(&mut self) -> NotaryResult<Option<Record>> {
        Ok(self.records.pop_front())
    }
}

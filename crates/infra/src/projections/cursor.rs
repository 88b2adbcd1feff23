use std::collections::HashMap;

use thiserror::Error;

use bodega_core::{AggregateId, TenantId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadModelError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("read model lock poisoned")]
    Poisoned,
}

/// Last applied sequence number per stream.
///
/// Duplicates (at-least-once delivery) are skipped; gaps are errors so a
/// read model never silently misses an event.
#[derive(Debug, Default)]
pub struct StreamCursors {
    last: HashMap<(TenantId, AggregateId), u64>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok(true)` when `sequence` is the next event of the stream.
    pub fn should_apply(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        sequence: u64,
    ) -> Result<bool, ReadModelError> {
        let last = self.last(tenant_id, aggregate_id);
        if sequence == 0 {
            return Err(ReadModelError::NonMonotonicSequence { last, found: 0 });
        }
        if sequence <= last {
            return Ok(false);
        }
        if sequence != last + 1 {
            return Err(ReadModelError::NonMonotonicSequence {
                last,
                found: sequence,
            });
        }
        Ok(true)
    }

    pub fn advance(&mut self, tenant_id: TenantId, aggregate_id: AggregateId, sequence: u64) {
        self.last.insert((tenant_id, aggregate_id), sequence);
    }

    pub fn last(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        self.last.get(&(tenant_id, aggregate_id)).copied().unwrap_or(0)
    }

    pub fn clear_tenant(&mut self, tenant_id: TenantId) {
        self.last.retain(|(t, _), _| *t != tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_skip_and_gaps_fail() {
        let mut cursors = StreamCursors::new();
        let t = TenantId::new();
        let a = AggregateId::new();

        assert!(cursors.should_apply(t, a, 1).unwrap());
        cursors.advance(t, a, 1);
        assert!(!cursors.should_apply(t, a, 1).unwrap());
        assert!(cursors.should_apply(t, a, 2).unwrap());
        assert_eq!(
            cursors.should_apply(t, a, 4),
            Err(ReadModelError::NonMonotonicSequence { last: 1, found: 4 })
        );
        assert!(cursors.should_apply(t, a, 0).is_err());

        cursors.clear_tenant(t);
        assert_eq!(cursors.last(t, a), 0);
    }
}

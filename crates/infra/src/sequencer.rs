use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;

use bodega_core::TenantId;
use bodega_movements::{MovementType, ReferenceNumber};

use crate::error::{ServiceError, ServiceResult};

/// Hands out `PREFIX-YYYYMMDD-NNNN` numbers. Sequences restart every day
/// and are independent per tenant and prefix.
#[derive(Debug)]
pub struct ReferenceSequencer {
    width: usize,
    counters: Mutex<HashMap<(TenantId, &'static str, NaiveDate), u32>>,
}

impl ReferenceSequencer {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn next(
        &self,
        tenant_id: TenantId,
        movement_type: MovementType,
        date: NaiveDate,
    ) -> ServiceResult<ReferenceNumber> {
        let prefix = movement_type.prefix();
        let sequence = {
            let mut counters = self
                .counters
                .lock()
                .map_err(|_| ServiceError::Store("reference sequencer lock poisoned".into()))?;
            let counter = counters.entry((tenant_id, prefix, date)).or_insert(0);
            *counter = counter
                .checked_add(1)
                .ok_or_else(|| ServiceError::Invariant(format!("{prefix} sequence exhausted for {date}")))?;
            *counter
        };
        Ok(ReferenceNumber::new(prefix, date, sequence, self.width)?)
    }
}

impl Default for ReferenceSequencer {
    fn default() -> Self {
        Self::new(4)
    }
}

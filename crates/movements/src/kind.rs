use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use bodega_core::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Purchase,
    Donation,
    CustomerReturn,
    TransferIn,
    AdjustmentIn,
    Sale,
    Dispatch,
    TransferOut,
    AdjustmentOut,
    Expiry,
}

impl MovementType {
    pub const ALL: [MovementType; 10] = [
        MovementType::Purchase,
        MovementType::Donation,
        MovementType::CustomerReturn,
        MovementType::TransferIn,
        MovementType::AdjustmentIn,
        MovementType::Sale,
        MovementType::Dispatch,
        MovementType::TransferOut,
        MovementType::AdjustmentOut,
        MovementType::Expiry,
    ];

    pub fn direction(self) -> Direction {
        match self {
            MovementType::Purchase
            | MovementType::Donation
            | MovementType::CustomerReturn
            | MovementType::TransferIn
            | MovementType::AdjustmentIn => Direction::Inbound,
            MovementType::Sale
            | MovementType::Dispatch
            | MovementType::TransferOut
            | MovementType::AdjustmentOut
            | MovementType::Expiry => Direction::Outbound,
        }
    }

    pub fn is_inbound(self) -> bool {
        self.direction() == Direction::Inbound
    }

    pub fn is_transfer(self) -> bool {
        matches!(self, MovementType::TransferIn | MovementType::TransferOut)
    }

    /// Prefix of the reference number stamped on movements of this type.
    pub fn prefix(self) -> &'static str {
        match self {
            MovementType::Purchase => "ENT",
            MovementType::Donation => "DON",
            MovementType::CustomerReturn => "DEV",
            MovementType::Sale => "VTA",
            MovementType::Dispatch => "DES",
            MovementType::TransferIn | MovementType::TransferOut => "TRF",
            MovementType::AdjustmentIn | MovementType::AdjustmentOut => "AJU",
            MovementType::Expiry => "VEN",
        }
    }

    /// Type of the compensating movement that undoes one of this type.
    ///
    /// Transfer legs are never reversed on their own: a new transfer in the
    /// opposite direction is the correction.
    pub fn reversal_type(self) -> Option<MovementType> {
        if self.is_transfer() {
            return None;
        }
        Some(match self.direction() {
            Direction::Inbound => MovementType::AdjustmentOut,
            Direction::Outbound => MovementType::AdjustmentIn,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Purchase => "purchase",
            MovementType::Donation => "donation",
            MovementType::CustomerReturn => "customer_return",
            MovementType::TransferIn => "transfer_in",
            MovementType::AdjustmentIn => "adjustment_in",
            MovementType::Sale => "sale",
            MovementType::Dispatch => "dispatch",
            MovementType::TransferOut => "transfer_out",
            MovementType::AdjustmentOut => "adjustment_out",
            MovementType::Expiry => "expiry",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| DomainError::validation(format!("unknown movement type: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_type_has_a_three_letter_prefix() {
        for t in MovementType::ALL {
            assert_eq!(t.prefix().len(), 3, "{t}");
            assert_eq!(t.to_string().parse::<MovementType>().unwrap(), t);
        }
    }

    #[test]
    fn five_inbound_five_outbound() {
        let inbound = MovementType::ALL.iter().filter(|t| t.is_inbound()).count();
        assert_eq!(inbound, 5);
    }

    #[test]
    fn reversal_flips_direction() {
        assert_eq!(
            MovementType::Purchase.reversal_type(),
            Some(MovementType::AdjustmentOut)
        );
        assert_eq!(MovementType::Sale.reversal_type(), Some(MovementType::AdjustmentIn));
        assert_eq!(MovementType::TransferOut.reversal_type(), None);
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&MovementType::CustomerReturn).unwrap();
        assert_eq!(json, "\"customer_return\"");
    }
}

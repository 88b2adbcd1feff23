//! Per-product closure arithmetic.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use bodega_catalog::ProductId;
use bodega_core::{DomainError, DomainResult};

/// Differences at or below this magnitude are rounding noise, not stock loss.
pub const DEFAULT_DISCREPANCY_EPSILON: Decimal = dec!(0.0001);

const COST_SCALE: u32 = 6;

/// Period totals for one product. Outbound totals are magnitudes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInputs {
    pub opening_quantity: Decimal,
    pub opening_value: Decimal,
    pub quantity_in: Decimal,
    pub value_in: Decimal,
    pub quantity_out: Decimal,
    pub value_out: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureLine {
    pub product_id: ProductId,
    pub opening_quantity: Decimal,
    pub opening_value: Decimal,
    pub quantity_in: Decimal,
    pub value_in: Decimal,
    pub quantity_out: Decimal,
    pub value_out: Decimal,
    pub calculated_closing_quantity: Decimal,
    pub calculated_closing_value: Decimal,
    /// Cost used to value discrepancies and adjusted balances.
    pub average_cost: Decimal,
    pub physical_quantity: Option<Decimal>,
    pub discrepancy_quantity: Decimal,
    pub discrepancy_value: Decimal,
    pub has_discrepancy: bool,
    pub adjusted: bool,
    pub adjusted_closing_quantity: Option<Decimal>,
    pub adjusted_closing_value: Option<Decimal>,
}

impl ClosureLine {
    /// `calculated_closing = opening + in - out`, quantity and value alike.
    pub fn compute(product_id: ProductId, inputs: LineInputs) -> Self {
        let closing_quantity = inputs.opening_quantity + inputs.quantity_in - inputs.quantity_out;
        let closing_value = inputs.opening_value + inputs.value_in - inputs.value_out;

        let average_cost = if closing_quantity > Decimal::ZERO {
            (closing_value / closing_quantity).round_dp(COST_SCALE)
        } else {
            let stocked = inputs.opening_quantity + inputs.quantity_in;
            if stocked > Decimal::ZERO {
                ((inputs.opening_value + inputs.value_in) / stocked).round_dp(COST_SCALE)
            } else {
                Decimal::ZERO
            }
        };

        Self {
            product_id,
            opening_quantity: inputs.opening_quantity,
            opening_value: inputs.opening_value,
            quantity_in: inputs.quantity_in,
            value_in: inputs.value_in,
            quantity_out: inputs.quantity_out,
            value_out: inputs.value_out,
            calculated_closing_quantity: closing_quantity,
            calculated_closing_value: closing_value,
            average_cost,
            physical_quantity: None,
            discrepancy_quantity: Decimal::ZERO,
            discrepancy_value: Decimal::ZERO,
            has_discrepancy: false,
            adjusted: false,
            adjusted_closing_quantity: None,
            adjusted_closing_value: None,
        }
    }

    pub fn inputs(&self) -> LineInputs {
        LineInputs {
            opening_quantity: self.opening_quantity,
            opening_value: self.opening_value,
            quantity_in: self.quantity_in,
            value_in: self.value_in,
            quantity_out: self.quantity_out,
            value_out: self.value_out,
        }
    }

    /// Compare a physical count against the calculated balance.
    ///
    /// With `adjust`, the counted quantity becomes the closing balance
    /// carried into the next period.
    pub fn apply_physical_count(
        &mut self,
        physical: Decimal,
        epsilon: Decimal,
        adjust: bool,
    ) -> DomainResult<()> {
        if physical < Decimal::ZERO {
            return Err(DomainError::validation("physical count cannot be negative"));
        }
        if epsilon < Decimal::ZERO {
            return Err(DomainError::validation("discrepancy epsilon cannot be negative"));
        }

        let difference = physical - self.calculated_closing_quantity;
        self.physical_quantity = Some(physical);
        self.discrepancy_quantity = difference;
        self.discrepancy_value = difference * self.average_cost;
        self.has_discrepancy = difference.abs() > epsilon;
        self.adjusted = adjust;
        if adjust {
            self.adjusted_closing_quantity = Some(physical);
            self.adjusted_closing_value = Some(physical * self.average_cost);
        } else {
            self.adjusted_closing_quantity = None;
            self.adjusted_closing_value = None;
        }
        Ok(())
    }

    pub fn closing_quantity(&self) -> Decimal {
        self.adjusted_closing_quantity
            .unwrap_or(self.calculated_closing_quantity)
    }

    pub fn closing_value(&self) -> Decimal {
        self.adjusted_closing_value
            .unwrap_or(self.calculated_closing_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn line(opening: Decimal, qin: Decimal, qout: Decimal) -> ClosureLine {
        ClosureLine::compute(
            ProductId::generate(),
            LineInputs {
                opening_quantity: opening,
                opening_value: opening * dec!(2),
                quantity_in: qin,
                value_in: qin * dec!(2),
                quantity_out: qout,
                value_out: qout * dec!(2),
            },
        )
    }

    #[test]
    fn forty_plus_ten_minus_two_is_forty_eight() {
        let mut l = line(dec!(40), dec!(10), dec!(2));
        assert_eq!(l.calculated_closing_quantity, dec!(48));
        assert_eq!(l.calculated_closing_value, dec!(96));
        assert_eq!(l.average_cost, dec!(2));

        l.apply_physical_count(dec!(48), DEFAULT_DISCREPANCY_EPSILON, false)
            .unwrap();
        assert!(!l.has_discrepancy);
        assert_eq!(l.discrepancy_quantity, dec!(0));
    }

    #[test]
    fn count_of_forty_five_is_short_three() {
        let mut l = line(dec!(40), dec!(10), dec!(2));
        l.apply_physical_count(dec!(45), DEFAULT_DISCREPANCY_EPSILON, true)
            .unwrap();

        assert!(l.has_discrepancy);
        assert_eq!(l.discrepancy_quantity, dec!(-3));
        assert_eq!(l.discrepancy_value, dec!(-6));
        assert_eq!(l.closing_quantity(), dec!(45));
        assert_eq!(l.closing_value(), dec!(90));
    }

    #[test]
    fn unadjusted_count_keeps_calculated_closing() {
        let mut l = line(dec!(40), dec!(10), dec!(2));
        l.apply_physical_count(dec!(45), DEFAULT_DISCREPANCY_EPSILON, false)
            .unwrap();
        assert!(l.has_discrepancy);
        assert_eq!(l.closing_quantity(), dec!(48));
    }

    #[test]
    fn emptied_product_still_has_a_cost() {
        let l = line(dec!(5), dec!(0), dec!(5));
        assert_eq!(l.calculated_closing_quantity, dec!(0));
        assert_eq!(l.average_cost, dec!(2));
    }

    #[test]
    fn negative_count_is_invalid() {
        let mut l = line(dec!(1), dec!(0), dec!(0));
        assert!(l
            .apply_physical_count(dec!(-1), DEFAULT_DISCREPANCY_EPSILON, false)
            .is_err());
    }

    fn qty() -> impl Strategy<Value = Decimal> {
        (0i64..10_000_000).prop_map(|n| Decimal::new(n, 4))
    }

    proptest! {
        #[test]
        fn recomputing_is_idempotent(o in qty(), i in qty(), out in qty()) {
            let inputs = LineInputs {
                opening_quantity: o,
                opening_value: o,
                quantity_in: i,
                value_in: i,
                quantity_out: out,
                value_out: out,
            };
            let product = ProductId::generate();
            let first = ClosureLine::compute(product, inputs);
            let second = ClosureLine::compute(product, first.inputs());
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.calculated_closing_quantity, o + i - out);
        }

        #[test]
        fn discrepancy_iff_beyond_epsilon(calc in qty(), offset in -20i64..20) {
            let mut l = line(calc, Decimal::ZERO, Decimal::ZERO);
            let physical = calc + Decimal::new(offset, 5);
            prop_assume!(physical >= Decimal::ZERO);

            l.apply_physical_count(physical, DEFAULT_DISCREPANCY_EPSILON, false).unwrap();
            prop_assert_eq!(
                l.has_discrepancy,
                (physical - calc).abs() > dec!(0.0001)
            );
        }
    }
}

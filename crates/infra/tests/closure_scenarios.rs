mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use bodega_catalog::NegativeStockPolicy;
use bodega_closures::ClosureStatus;
use bodega_core::{Period, TenantId, UserId};
use bodega_infra::{MovementRequest, ServiceError};

use common::{at, world, World};

/// Dec 20: buy 40. Jan 10: buy 10. Jan 15: dispatch 2.
fn january_activity() -> World {
    let w = world(NegativeStockPolicy::Clamp);
    let recorder = &w.services.recorder;
    recorder
        .record(w.tenant, w.purchase(w.central, dec!(40), at(2024, 12, 20)))
        .unwrap();
    recorder
        .record(w.tenant, w.purchase(w.central, dec!(10), at(2025, 1, 10)))
        .unwrap();
    recorder
        .record(w.tenant, w.dispatch(w.central, dec!(2), at(2025, 1, 15)))
        .unwrap();
    w
}

#[test]
fn january_closure_carries_december_stock() {
    let w = january_activity();
    let closure = w
        .services
        .closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap();

    assert_eq!(closure.status(), ClosureStatus::InProgress);
    assert_eq!(closure.period(), Some(Period::new(2025, 1).unwrap()));
    let line = closure.line(w.rice).unwrap();
    assert_eq!(line.opening_quantity, dec!(40));
    assert_eq!(line.opening_value, dec!(40.00));
    assert_eq!(line.quantity_in, dec!(10));
    assert_eq!(line.quantity_out, dec!(2));
    assert_eq!(line.calculated_closing_quantity, dec!(48));
    assert_eq!(line.calculated_closing_value, dec!(48.00));
    assert_eq!(line.average_cost, dec!(1.00));
    assert_eq!(line.calculated_closing_quantity, w.on_hand(w.central));

    let summary = closure.summary();
    assert_eq!(summary.products, 1);
    assert_eq!(summary.total_closing_quantity, dec!(48));
    assert_eq!(summary.discrepancies, 0);
}

#[test]
fn matching_count_is_not_a_discrepancy() {
    let w = january_activity();
    let closure = w
        .services
        .closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap();
    let closure = w
        .services
        .closures
        .record_physical_count(w.tenant, closure.id_typed(), w.rice, dec!(48), false, w.user)
        .unwrap();

    let line = closure.line(w.rice).unwrap();
    assert_eq!(line.physical_quantity, Some(dec!(48)));
    assert!(!line.has_discrepancy);
    assert_eq!(line.discrepancy_quantity, dec!(0));
}

#[test]
fn short_count_is_reported_then_period_closes() {
    let w = january_activity();
    let closures = &w.services.closures;
    let closure = closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap();
    let id = closure.id_typed();

    let counted = closures
        .record_physical_count(w.tenant, id, w.rice, dec!(45), false, w.user)
        .unwrap();
    let line = counted.line(w.rice).unwrap();
    assert!(line.has_discrepancy);
    assert_eq!(line.discrepancy_quantity, dec!(-3));
    assert_eq!(line.discrepancy_value, dec!(-3.00));
    assert_eq!(line.closing_quantity(), dec!(48));
    assert_eq!(counted.summary().discrepancies, 1);

    let supervisor = UserId::new();
    let approved = closures.approve(w.tenant, id, supervisor).unwrap();
    assert_eq!(approved.status(), ClosureStatus::Approved);
    assert_eq!(approved.approved_by(), Some(supervisor));

    let closed = closures.finalize(w.tenant, id, supervisor).unwrap();
    assert_eq!(closed.status(), ClosureStatus::Closed);
    assert!(closed.closed_at().is_some());

    let late = w
        .services
        .recorder
        .record(w.tenant, w.purchase(w.central, dec!(1), at(2025, 1, 28)))
        .unwrap_err();
    assert!(matches!(late, ServiceError::PeriodLocked(_)));
    assert_eq!(w.on_hand(w.central), dec!(48));

    let again = closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap_err();
    assert!(matches!(again, ServiceError::StateTransition { .. }));

    // Other warehouses and later months stay open.
    w.services
        .recorder
        .record(w.tenant, w.purchase(w.santa_ana, dec!(1), at(2025, 1, 28)))
        .unwrap();
    w.services
        .recorder
        .record(w.tenant, w.purchase(w.central, dec!(1), at(2025, 2, 1)))
        .unwrap();
}

#[test]
fn closing_locks_are_per_period() {
    let w = january_activity();
    let closures = &w.services.closures;
    let january = closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap();

    // Calculated but not approved: the period still takes movements.
    w.services
        .recorder
        .record(w.tenant, w.purchase(w.central, dec!(5), at(2025, 1, 20)))
        .unwrap();

    let stale = closures
        .approve(w.tenant, january.id_typed(), w.user)
        .unwrap_err();
    assert!(matches!(stale, ServiceError::ConcurrencyConflict(_)));
    assert!(stale.is_retryable());

    let recalculated = closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap();
    assert_eq!(recalculated.id_typed(), january.id_typed());
    assert_eq!(
        recalculated.line(w.rice).unwrap().calculated_closing_quantity,
        dec!(53)
    );
    closures
        .approve(w.tenant, january.id_typed(), w.user)
        .unwrap();
}

#[test]
fn reopen_allows_corrections_and_requires_recalculation() {
    let w = january_activity();
    let closures = &w.services.closures;
    let id = closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap()
        .id_typed();
    closures.approve(w.tenant, id, w.user).unwrap();
    closures.finalize(w.tenant, id, w.user).unwrap();

    assert!(closures.reopen(w.tenant, id, "  ", w.user).is_err());
    let reopened = closures
        .reopen(w.tenant, id, "factura de compra omitida", w.user)
        .unwrap();
    assert_eq!(reopened.status(), ClosureStatus::Reopened);
    assert!(reopened.needs_correction());
    assert_eq!(reopened.reopen_reason(), Some("factura de compra omitida"));

    w.services
        .recorder
        .record(w.tenant, w.purchase(w.central, dec!(5), at(2025, 1, 28)))
        .unwrap();

    let err = closures.approve(w.tenant, id, w.user).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::ConcurrencyConflict(_) | ServiceError::StateTransition { .. }
    ));

    let recalculated = closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap();
    assert_eq!(recalculated.status(), ClosureStatus::InProgress);
    let line = recalculated.line(w.rice).unwrap();
    assert_eq!(line.quantity_in, dec!(15));
    assert_eq!(line.calculated_closing_quantity, w.on_hand(w.central));

    closures.approve(w.tenant, id, w.user).unwrap();
    let closed = closures.finalize(w.tenant, id, w.user).unwrap();
    assert_eq!(closed.status(), ClosureStatus::Closed);
    assert!(w
        .services
        .recorder
        .record(w.tenant, w.purchase(w.central, dec!(1), at(2025, 1, 29)))
        .is_err());
}

#[test]
fn february_opens_with_january_closing() {
    let w = january_activity();
    let closures = &w.services.closures;
    let january = closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap()
        .id_typed();
    closures
        .record_physical_count(w.tenant, january, w.rice, dec!(45), true, w.user)
        .unwrap();
    closures.approve(w.tenant, january, w.user).unwrap();
    closures.finalize(w.tenant, january, w.user).unwrap();

    w.services
        .recorder
        .record(w.tenant, w.dispatch(w.central, dec!(5), at(2025, 2, 10)))
        .unwrap();

    let february = closures
        .close_period(w.tenant, w.central, 2025, 2, w.user)
        .unwrap();
    let line = february.line(w.rice).unwrap();
    assert_eq!(line.opening_quantity, dec!(45));
    assert_eq!(line.opening_value, dec!(45.00));
    assert_eq!(line.quantity_out, dec!(5));
    assert_eq!(line.calculated_closing_quantity, dec!(40));
}

#[test]
fn cancelled_closure_is_replaced_by_a_fresh_one() {
    let w = january_activity();
    let closures = &w.services.closures;
    let first = closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap();
    let cancelled = closures
        .cancel(w.tenant, first.id_typed(), "conteo reprogramado")
        .unwrap();
    assert_eq!(cancelled.status(), ClosureStatus::Cancelled);
    assert!(closures.approve(w.tenant, first.id_typed(), w.user).is_err());

    let second = closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap();
    assert_ne!(second.id_typed(), first.id_typed());
    let latest = closures
        .closure_for(w.tenant, w.central, Period::new(2025, 1).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(latest.id_typed(), second.id_typed());
}

#[test]
fn empty_warehouse_and_bad_periods() {
    let w = january_activity();
    let closures = &w.services.closures;

    let empty = closures
        .close_period(w.tenant, w.santa_ana, 2025, 1, w.user)
        .unwrap();
    assert_eq!(empty.lines().count(), 0);
    assert_eq!(empty.summary().total_closing_quantity, dec!(0));

    assert!(matches!(
        closures.close_period(w.tenant, w.central, 2025, 13, w.user),
        Err(ServiceError::Validation(_))
    ));
    assert!(closures
        .closure_for(w.tenant, w.central, Period::new(2025, 3).unwrap())
        .unwrap()
        .is_none());
}

#[test]
fn closures_are_tenant_scoped() {
    let w = january_activity();
    let closure = w
        .services
        .closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap();

    let stranger = TenantId::new();
    assert!(matches!(
        w.services.closures.closure(stranger, closure.id_typed()),
        Err(ServiceError::NotFound(_))
    ));
    let theirs = w
        .services
        .closures
        .close_period(stranger, w.central, 2025, 1, w.user)
        .unwrap();
    assert_eq!(theirs.lines().count(), 0);
}

#[test]
fn movements_dated_before_a_closed_period_are_refused() {
    let w = world(NegativeStockPolicy::Clamp);
    let closures = &w.services.closures;
    w.services
        .recorder
        .record(w.tenant, w.purchase(w.central, dec!(40), at(2025, 1, 10)))
        .unwrap();
    let january = closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap()
        .id_typed();
    closures.approve(w.tenant, january, w.user).unwrap();
    closures.finalize(w.tenant, january, w.user).unwrap();

    let backdated = w
        .services
        .recorder
        .record(w.tenant, w.purchase(w.central, dec!(100), at(2024, 12, 5)))
        .unwrap_err();
    assert!(matches!(backdated, ServiceError::PeriodLocked(_)));
    assert_eq!(w.on_hand(w.central), dec!(40));

    let february = closures
        .close_period(w.tenant, w.central, 2025, 2, w.user)
        .unwrap();
    assert_eq!(
        february.line(w.rice).unwrap().opening_quantity,
        w.on_hand(w.central)
    );
}

#[test]
fn outbound_cost_entered_by_hand_does_not_skew_closing_value() {
    let w = world(NegativeStockPolicy::Clamp);
    let recorder = &w.services.recorder;
    recorder
        .record(w.tenant, w.purchase(w.central, dec!(10), at(2025, 1, 10)))
        .unwrap();
    let dispatch = recorder
        .record(
            w.tenant,
            MovementRequest {
                unit_cost: Some(dec!(5)),
                ..w.dispatch(w.central, dec!(2), at(2025, 1, 12))
            },
        )
        .unwrap();
    assert_eq!(dispatch.posted_unit_cost(), Some(dec!(1.00)));

    let ledger_value: Decimal = w
        .services
        .ledger
        .warehouse_balances(w.tenant, w.central)
        .unwrap()
        .iter()
        .map(|r| r.total_value)
        .sum();
    assert_eq!(ledger_value, dec!(8.00));

    let closure = w
        .services
        .closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap();
    let line = closure.line(w.rice).unwrap();
    assert_eq!(line.value_out, dec!(2.00));
    assert_eq!(line.calculated_closing_value, ledger_value);
}

#[test]
fn approval_notices_lines_that_no_longer_apply() {
    let w = january_activity();
    let closures = &w.services.closures;
    let january = closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap()
        .id_typed();
    closures.approve(w.tenant, january, w.user).unwrap();
    closures.finalize(w.tenant, january, w.user).unwrap();
    let february = closures
        .close_period(w.tenant, w.central, 2025, 2, w.user)
        .unwrap();
    assert_eq!(february.line(w.rice).unwrap().opening_quantity, dec!(48));

    // January is corrected so nothing carries into February.
    closures
        .reopen(w.tenant, january, "despacho no registrado", w.user)
        .unwrap();
    w.services
        .recorder
        .record(w.tenant, w.dispatch(w.central, dec!(48), at(2025, 1, 28)))
        .unwrap();
    closures
        .close_period(w.tenant, w.central, 2025, 1, w.user)
        .unwrap();
    closures.approve(w.tenant, january, w.user).unwrap();
    closures.finalize(w.tenant, january, w.user).unwrap();

    let stale = closures
        .approve(w.tenant, february.id_typed(), w.user)
        .unwrap_err();
    assert!(matches!(stale, ServiceError::ConcurrencyConflict(_)));

    let recalculated = closures
        .close_period(w.tenant, w.central, 2025, 2, w.user)
        .unwrap();
    assert_eq!(recalculated.lines().count(), 0);
    closures
        .approve(w.tenant, february.id_typed(), w.user)
        .unwrap();
}

#[test]
fn counted_products_without_activity_do_not_block_approval() {
    let w = january_activity();
    let closures = &w.services.closures;
    let empty = closures
        .close_period(w.tenant, w.santa_ana, 2025, 1, w.user)
        .unwrap();
    let counted = closures
        .record_physical_count(w.tenant, empty.id_typed(), w.rice, dec!(0), false, w.user)
        .unwrap();
    assert_eq!(counted.lines().count(), 1);

    let approved = closures
        .approve(w.tenant, empty.id_typed(), w.user)
        .unwrap();
    assert_eq!(approved.status(), ClosureStatus::Approved);
}

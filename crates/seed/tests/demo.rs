use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use bodega_catalog::NegativeStockPolicy;
use bodega_closures::ClosureStatus;
use bodega_core::Period;
use bodega_infra::BodegaConfig;
use bodega_seed::{DemoScenario, RandomRun};

fn on_hand(demo: &DemoScenario, warehouse: bodega_catalog::WarehouseId, product: bodega_catalog::ProductId) -> Decimal {
    demo.services
        .ledger
        .warehouse_balances(demo.tenant_id, warehouse)
        .unwrap()
        .iter()
        .filter(|r| r.key.product_id == product)
        .map(|r| r.quantity)
        .sum()
}

#[test]
fn demo_reproduces_the_january_rice_closure() {
    let demo = DemoScenario::run(BodegaConfig::default()).unwrap();
    let (w, p) = (demo.warehouses, demo.products);

    let january = demo
        .services
        .closures
        .closure_for(demo.tenant_id, w.central, Period::new(2025, 1).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(january.status(), ClosureStatus::Closed);

    let rice = january.line(p.rice).unwrap();
    assert_eq!(rice.opening_quantity, dec!(40));
    assert_eq!(rice.quantity_in, dec!(10));
    assert_eq!(rice.quantity_out, dec!(2));
    assert_eq!(rice.calculated_closing_quantity, dec!(48));
    assert_eq!(rice.physical_quantity, Some(dec!(45)));
    assert_eq!(rice.discrepancy_quantity, dec!(-3));
    assert!(rice.has_discrepancy);
    assert_eq!(rice.discrepancy_value, dec!(-1.65));
    assert_eq!(january.summary().discrepancies, 1);
}

#[test]
fn demo_february_settles_the_shortage() {
    let demo = DemoScenario::run(BodegaConfig::default()).unwrap();
    let (w, p) = (demo.warehouses, demo.products);

    let february = demo
        .services
        .closures
        .closure_for(demo.tenant_id, w.central, Period::new(2025, 2).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(february.status(), ClosureStatus::Closed);
    let rice = february.line(p.rice).unwrap();
    assert_eq!(rice.opening_quantity, dec!(48));
    assert_eq!(rice.quantity_out, dec!(3));
    assert_eq!(rice.calculated_closing_quantity, dec!(45));
    assert!(!rice.has_discrepancy);

    // The duplicated purchase and its reversal cancel out.
    let beans = february.line(p.beans).unwrap();
    assert_eq!(beans.quantity_in, dec!(20));
    assert_eq!(beans.quantity_out, dec!(20));
    assert_eq!(beans.calculated_closing_quantity, dec!(90));

    let milk = february.line(p.milk).unwrap();
    assert_eq!(milk.opening_quantity, dec!(68));
    assert_eq!(milk.calculated_closing_quantity, dec!(50));
    assert!(!milk.has_discrepancy);

    for (product, expected) in [(p.rice, dec!(45)), (p.beans, dec!(90)), (p.milk, dec!(50)), (p.oil, dec!(40))] {
        assert_eq!(on_hand(&demo, w.central, product), expected);
        assert_eq!(february.line(product).unwrap().closing_quantity(), expected);
    }
}

#[test]
fn demo_transfer_and_lots_land_where_expected() {
    let demo = DemoScenario::run(BodegaConfig::default()).unwrap();
    let (w, p) = (demo.warehouses, demo.products);

    assert_eq!(on_hand(&demo, w.santa_ana, p.oil), dec!(6));
    let vitamins: Vec<_> = demo
        .services
        .ledger
        .warehouse_balances(demo.tenant_id, w.san_miguel)
        .unwrap()
        .into_iter()
        .filter(|r| r.key.product_id == p.vitamins && !r.quantity.is_zero())
        .collect();
    assert_eq!(vitamins.len(), 1);
    assert_eq!(vitamins[0].key.lot_number.as_deref(), Some("VIT-B"));
    assert_eq!(vitamins[0].quantity, dec!(35));

    let summary = demo.summary().unwrap();
    assert_eq!(summary.products, 5);
    assert_eq!(summary.warehouses.len(), 3);
    assert_eq!(summary.closures.len(), 6);
    assert!(summary.closures.iter().all(|c| c.status == "closed"));
    let central = summary.warehouses.iter().find(|s| s.code == "BC-01").unwrap();
    assert!(central.alerts >= 1);
    assert!(serde_json::to_string(&summary).unwrap().contains("BF-01"));
}

#[test]
fn random_runs_are_reproducible() {
    let run = RandomRun {
        products: 6,
        movements: 120,
        seed: 99,
    };
    let (_, first) = run.run(BodegaConfig::default()).unwrap();
    let (_, second) = run.run(BodegaConfig::default()).unwrap();

    assert_eq!(first.products, 6);
    assert!(first.movements >= 120);
    let totals = |s: &bodega_seed::SeedSummary| {
        s.warehouses.iter().map(|w| (w.code.clone(), w.quantity, w.value)).collect::<Vec<_>>()
    };
    assert_eq!(totals(&first), totals(&second));
    assert!(first.warehouses.iter().all(|w| w.quantity >= Decimal::ZERO));
}

#[test]
fn random_run_under_reject_policy_never_goes_negative() {
    let mut config = BodegaConfig::default();
    config.ledger.negative_stock = NegativeStockPolicy::Reject;
    let run = RandomRun {
        products: 4,
        movements: 200,
        seed: 7,
    };
    let (services, summary) = run.run(config).unwrap();

    let tenant = summary.tenant_id;
    for warehouse in services.catalog.warehouses(tenant).unwrap() {
        for row in services.ledger.warehouse_balances(tenant, warehouse.id).unwrap() {
            assert!(row.quantity >= Decimal::ZERO);
            assert_eq!(row.total_value, row.quantity * row.unit_cost);
        }
    }
}

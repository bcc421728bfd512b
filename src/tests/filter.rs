use crate::Filter;

#[test]
fn initial_entry_rejects_large_violation() {
    let filter = Filter::new(10.0, 1e-5, 1e-5);
    assert_eq!(filter.entries(), &[(10.0, f64::NEG_INFINITY)]);
    assert!(filter.is_dominated(10.0, -1e30));
    assert!(filter.is_dominated(20.0, 0.0));
    assert!(!filter.is_dominated(5.0, 1e30));
}

#[test]
fn dominance_margins() {
    let mut filter = Filter::new(1e7, 0.1, 0.1);
    filter.augment(1.0, 1.0);

    // must improve the violation to 0.9 or the objective to 0.9
    assert!(filter.is_dominated(0.95, 0.95));
    assert!(!filter.is_dominated(0.85, 5.0));
    assert!(!filter.is_dominated(5.0, 0.85));
    assert!(filter.is_dominated(f64::NAN, 0.0));
    assert!(filter.is_dominated(0.0, f64::NAN));
}

#[test]
fn augment_keeps_pareto_set() {
    let mut filter = Filter::new(1e7, 1e-5, 1e-5);
    filter.augment(2.0, 1.0);
    filter.augment(1.0, 2.0);
    filter.augment(3.0, 0.0);
    assert_eq!(filter.entries().len(), 4);
    assert!(filter.is_pareto());

    // dominates (2, 1) and (1, 2)
    filter.augment(0.5, 0.5);
    assert!(filter.is_pareto());
    assert!(!filter.entries().contains(&(2.0, 1.0)));
    assert!(!filter.entries().contains(&(1.0, 2.0)));
    assert!(filter.entries().contains(&(3.0, 0.0)));

    // dominated by an existing entry
    filter.augment(0.6, 0.6);
    assert!(!filter.entries().contains(&(0.6, 0.6)));
    assert!(filter.is_pareto());

    filter.reset();
    assert_eq!(filter.entries(), &[(1e7, f64::NEG_INFINITY)]);
}

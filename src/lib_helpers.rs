use super::*;

/// Every distinct staging manager, in entity-name order.
pub(crate) fn unique_managers(
    targets: &HashMap<String, Arc<RegisteredTarget>>,
) -> Vec<Arc<StagingTableManager>> {
    let mut entities: Vec<&String> = targets.keys().collect();
    entities.sort();
    let mut out: Vec<Arc<StagingTableManager>> = Vec::new();
    for entity in entities {
        let manager = &targets[entity].staging;
        if !out.iter().any(|existing| Arc::ptr_eq(existing, manager)) {
            out.push(Arc::clone(manager));
        }
    }
    out
}

/// An already registered manager whose relation has exactly this shape.
pub(crate) fn manager_for_table(
    targets: &HashMap<String, Arc<RegisteredTarget>>,
    table: &StagingTable,
) -> Option<Arc<StagingTableManager>> {
    targets
        .values()
        .find(|registered| registered.staging.table() == table && !registered.staging.is_released())
        .map(|registered| Arc::clone(&registered.staging))
}

/// A created, still-live manager that registering `entity` with `table` would
/// either strand (no other entity uses it) or collide with (same name,
/// different shape).
pub(crate) fn conflicting_manager(
    targets: &HashMap<String, Arc<RegisteredTarget>>,
    entity: &str,
    table: &StagingTable,
) -> Option<Arc<StagingTableManager>> {
    let live = |manager: &StagingTableManager| manager.is_created() && !manager.is_released();
    let stranded = targets.get(entity).filter(|previous| {
        let manager = &previous.staging;
        manager.table() != table
            && live(manager)
            && !targets
                .iter()
                .any(|(other, registered)| other != entity && Arc::ptr_eq(&registered.staging, manager))
    });
    if let Some(previous) = stranded {
        return Some(Arc::clone(&previous.staging));
    }
    targets
        .values()
        .map(|registered| &registered.staging)
        .find(|manager| manager.table().name == table.name && manager.table() != table && live(manager))
        .cloned()
}

pub(crate) fn shut_down_error() -> DmlError {
    DmlError::Unavailable {
        message: "bulk dml engine is shutting down".into(),
    }
}

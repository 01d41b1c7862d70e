//! Structural checks on a finished [`Plan`].

use super::operation::OperationType;
use super::plan::Plan;
use super::step::{Step, StepId};
use crate::catalog::Catalog;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Verifies that a plan can populate its ghost tables without violating a
/// constraint at any point during execution.
pub struct PlanValidator;

impl PlanValidator {
    pub fn validate(plan: &Plan, catalog: &Catalog) -> Result<()> {
        Self::add_null_steps_come_first(plan)?;
        Self::null_records_are_dropped(plan)?;
        Self::drop_null_step_is_last(plan)?;
        Self::every_column_copied_once(plan, catalog)?;
        Self::identities_copied_first(plan, catalog)?;
        Self::references_are_satisfied(plan, catalog)
    }

    fn add_null_steps_come_first(plan: &Plan) -> Result<()> {
        for step in steps_of(plan, OperationType::AddNull) {
            if !step.dependencies().is_empty() {
                return Err(Error::plan_invalid(format!(
                    "Step: {} adds placeholder rows but depends on other steps",
                    step
                )));
            }
        }
        Ok(())
    }

    fn null_records_are_dropped(plan: &Plan) -> Result<()> {
        let added = tables_of(plan, OperationType::AddNull);
        let dropped = tables_of(plan, OperationType::DropNull);
        if added != dropped {
            return Err(Error::plan_invalid(format!(
                "Placeholder rows are added for: {:?} but dropped for: {:?}",
                added, dropped
            )));
        }
        Ok(())
    }

    fn drop_null_step_is_last(plan: &Plan) -> Result<()> {
        if steps_of(plan, OperationType::AddNull).next().is_none() {
            return Ok(());
        }
        let last = plan.steps_without_dependents();
        let is_drop_null = |id: &StepId| {
            plan.step(*id)
                .is_some_and(|step| step.operation().op_type() == OperationType::DropNull)
        };
        match last.as_slice() {
            [only] if is_drop_null(only) => Ok(()),
            _ => Err(Error::plan_invalid(
                "Placeholder rows must be dropped by the one step that runs last",
            )),
        }
    }

    fn every_column_copied_once(plan: &Plan, catalog: &Catalog) -> Result<()> {
        let mut copied: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for step in steps_of(plan, OperationType::Copy) {
            let Some(table) = step.operation().table() else {
                continue;
            };
            let columns = copied.entry(table).or_default();
            for column in step.operation().columns() {
                if !columns.insert(column.as_str()) {
                    return Err(Error::plan_invalid(format!(
                        "Column: {}.{} is copied more than once",
                        table, column
                    )));
                }
            }
        }

        for table_id in plan.ghost_tables() {
            let table = catalog.table(table_id)?;
            let expected: BTreeSet<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
            let actual = copied.remove(table_id.as_str()).unwrap_or_default();
            if actual != expected {
                return Err(Error::plan_invalid(format!(
                    "Table: {} is copied with columns: {:?} instead of: {:?}",
                    table_id, actual, expected
                )));
            }
        }
        if let Some(table) = copied.keys().next() {
            return Err(Error::plan_invalid(format!(
                "Table: {} is copied but is not a ghost table",
                table
            )));
        }
        Ok(())
    }

    fn identities_copied_first(plan: &Plan, catalog: &Catalog) -> Result<()> {
        for step in steps_of(plan, OperationType::Copy) {
            let Some(table_id) = step.operation().table() else {
                continue;
            };
            let identities = catalog.table(table_id)?.identity_column_names();
            if copies_all(step, table_id, &identities) {
                continue;
            }

            let satisfied = plan
                .transitive_dependencies(step.id())
                .into_iter()
                .filter_map(|id| plan.step(id))
                .any(|dependency| copies_all(dependency, table_id, &identities));
            if !satisfied {
                return Err(Error::plan_invalid(format!(
                    "Step: {} runs before the identity columns of: {} are copied",
                    step, table_id
                )));
            }
        }
        Ok(())
    }

    fn references_are_satisfied(plan: &Plan, catalog: &Catalog) -> Result<()> {
        for step in steps_of(plan, OperationType::Copy) {
            let Some(table_id) = step.operation().table() else {
                continue;
            };
            let table = catalog.table(table_id)?;
            let dependencies: Vec<&Step> = plan
                .transitive_dependencies(step.id())
                .into_iter()
                .filter_map(|id| plan.step(id))
                .collect();

            for key in table.not_nullable_foreign_keys() {
                let referred = key.referred_table.as_str();
                if !plan.ghost_tables().contains(referred) || key.is_self_referencing() {
                    continue;
                }
                let referred_columns: BTreeSet<String> = key.referred_columns.iter().cloned().collect();
                let satisfied = dependencies.iter().any(|dependency| {
                    let operation = dependency.operation();
                    match operation.op_type() {
                        OperationType::AddNull => operation.covers(referred),
                        OperationType::Copy => copies_all(dependency, referred, &referred_columns),
                        OperationType::DropNull => false,
                    }
                });
                if !satisfied {
                    return Err(Error::plan_invalid(format!(
                        "Step: {} may insert rows referring to: {} before they exist",
                        step, referred
                    )));
                }
            }
        }
        Ok(())
    }
}

fn steps_of(plan: &Plan, op_type: OperationType) -> impl Iterator<Item = &Step> {
    plan.steps()
        .filter(move |step| step.operation().op_type() == op_type)
}

fn tables_of(plan: &Plan, op_type: OperationType) -> BTreeSet<String> {
    steps_of(plan, op_type)
        .flat_map(|step| step.operation().tables().iter().cloned())
        .collect()
}

fn copies_all(step: &Step, table: &str, columns: &BTreeSet<String>) -> bool {
    let operation = step.operation();
    operation.op_type() == OperationType::Copy
        && operation.covers(table)
        && columns.iter().all(|column| operation.columns().contains(column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, ColumnType, ForeignKey, Hint, Table};
    use crate::planner::plan::PlanBuilder;
    use crate::planner::progress::MigrationProgress;

    /// `stores` and `staff` referring to each other through NOT NULL keys.
    fn catalog() -> Catalog {
        let mut catalog = Catalog::new("shop");
        for (name, reference) in [("stores", "manager_id"), ("staff", "store_id")] {
            catalog
                .add_table(
                    Table::new(name)
                        .with_column(Column::new("id", ColumnType::Int4).with_hint(Hint::Identity))
                        .with_column(Column::new(reference, ColumnType::Int4).with_hint(Hint::NotNull)),
                )
                .unwrap();
        }
        catalog
            .add_foreign_key(ForeignKey::new("stores", ["manager_id"], "staff", ["id"]))
            .unwrap();
        catalog
            .add_foreign_key(ForeignKey::new("staff", ["store_id"], "stores", ["id"]))
            .unwrap();
        catalog
    }

    fn tables() -> BTreeSet<String> {
        BTreeSet::from(["staff".to_string(), "stores".to_string()])
    }

    fn builder(catalog: &Catalog) -> PlanBuilder {
        PlanBuilder::new(MigrationProgress::new(catalog, &tables()).unwrap())
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    /// ADD_NULL, stores without its key, staff, rest of stores, DROP_NULL.
    fn valid(catalog: &Catalog) -> PlanBuilder {
        let mut builder = builder(catalog);
        let stores = builder.copy("stores", columns(&["id"])).unwrap();
        let add_null = builder.add_null_record(tables());
        builder.make_dependent_on(stores, add_null).unwrap();
        let staff = builder.copy("staff", columns(&["id", "store_id"])).unwrap();
        builder.make_dependent_on(staff, stores).unwrap();
        let rest = builder.copy("stores", columns(&["manager_id"])).unwrap();
        builder.make_dependent_on(rest, staff).unwrap();
        let drop_null = builder.drop_null_record(tables());
        builder.make_dependent_on(drop_null, rest).unwrap();
        builder
    }

    fn error(builder: PlanBuilder, catalog: &Catalog) -> String {
        let plan = builder.build(tables());
        match PlanValidator::validate(&plan, catalog).unwrap_err() {
            Error::PlanInvalid { message } => message,
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_valid_plan() {
        let catalog = catalog();
        let plan = valid(&catalog).build(tables());
        PlanValidator::validate(&plan, &catalog).unwrap();
    }

    #[test]
    fn test_missing_drop_null() {
        let catalog = catalog();
        let mut builder = builder(&catalog);
        let stores = builder.copy("stores", columns(&["id"])).unwrap();
        let add_null = builder.add_null_record(tables());
        builder.make_dependent_on(stores, add_null).unwrap();
        let staff = builder.copy("staff", columns(&["id", "store_id"])).unwrap();
        builder.make_dependent_on(staff, stores).unwrap();
        let rest = builder.copy("stores", columns(&["manager_id"])).unwrap();
        builder.make_dependent_on(rest, staff).unwrap();

        assert!(error(builder, &catalog).contains("dropped"));
    }

    #[test]
    fn test_add_null_with_dependencies() {
        let catalog = catalog();
        let mut builder = valid(&catalog);
        let add_null = builder.find_add_null("stores").unwrap();
        let first = builder.find_first_copy("staff").unwrap();
        builder.make_dependent_on(add_null, first).unwrap_err();

        // A second ADD_NULL that depends on a copy.
        let other = builder.add_null_record(BTreeSet::from(["staff".to_string()]));
        let drop = builder.drop_null_record(BTreeSet::from(["staff".to_string()]));
        builder.make_dependent_on(other, first).unwrap();
        builder.make_dependent_on(drop, other).unwrap();
        assert!(error(builder, &catalog).contains("depends on other steps"));
    }

    #[test]
    fn test_incomplete_copy() {
        let catalog = catalog();
        let mut builder = builder(&catalog);
        let staff = builder.copy("staff", columns(&["id", "store_id"])).unwrap();
        let stores = builder.copy("stores", columns(&["id"])).unwrap();
        builder.make_dependent_on(staff, stores).unwrap();

        assert!(error(builder, &catalog).contains("is copied with columns"));
    }

    #[test]
    fn test_identity_copied_later() {
        let catalog = catalog();
        let mut builder = builder(&catalog);
        let add_null = builder.add_null_record(tables());
        let keys = builder.copy("stores", columns(&["manager_id"])).unwrap();
        builder.make_dependent_on(keys, add_null).unwrap();
        let ids = builder.copy("stores", columns(&["id"])).unwrap();
        builder.make_dependent_on(ids, add_null).unwrap();
        let staff = builder.copy("staff", columns(&["id", "store_id"])).unwrap();
        builder.make_dependent_on(staff, ids).unwrap();
        let drop_null = builder.drop_null_record(tables());
        builder.make_dependent_on(drop_null, keys).unwrap();
        builder.make_dependent_on(drop_null, staff).unwrap();

        assert!(error(builder, &catalog).contains("identity columns"));
    }

    #[test]
    fn test_unsatisfied_reference() {
        let catalog = catalog();
        let mut builder = builder(&catalog);
        let staff = builder.copy("staff", columns(&["id", "store_id"])).unwrap();
        let stores = builder.copy("stores", columns(&["id", "manager_id"])).unwrap();
        builder.make_dependent_on(stores, staff).unwrap();

        assert!(error(builder, &catalog).contains("before they exist"));
    }
}

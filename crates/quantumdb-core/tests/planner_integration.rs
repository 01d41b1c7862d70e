//! Integration tests for migration planning.
//!
//! Each test adds a column to one table of the video store and checks that
//! the plan copies every ghost table in an order its foreign keys allow.

mod common;

use common::{state, video_store};
use quantumdb_core::catalog::{ColumnType, Hint};
use quantumdb_core::planner::{
    GreedyMigrationPlanner, MigrationPlanner, OperationType, Plan, PlanValidator, Step,
};
use quantumdb_core::schema::{ColumnDefinition, SchemaOperation};
use quantumdb_core::versioning::State;
use std::collections::{BTreeMap, BTreeSet};

fn add_column(table: &str, column: &str, column_type: ColumnType) -> SchemaOperation {
    let definition = ColumnDefinition::new(column, column_type)
        .unwrap()
        .with_hints([Hint::NotNull]);
    SchemaOperation::add_column(table, definition).unwrap()
}

fn plan_for(operation: SchemaOperation) -> (State, Plan) {
    let mut state = state(video_store(), vec![operation]);
    let plan = GreedyMigrationPlanner::new()
        .create_plan(&mut state, "root", "v1")
        .unwrap();
    PlanValidator::validate(&plan, &state.catalog).unwrap();
    (state, plan)
}

fn ghost(state: &State, table: &str) -> String {
    state.table_mapping.get_table_id("v1", table).unwrap().to_string()
}

fn ghosts(state: &State, tables: &[&str]) -> BTreeSet<String> {
    tables.iter().map(|table| ghost(state, table)).collect()
}

fn copies(plan: &Plan) -> Vec<&Step> {
    plan.steps()
        .filter(|step| step.operation().op_type() == OperationType::Copy)
        .collect()
}

fn first_copy<'a>(plan: &'a Plan, table: &str) -> &'a Step {
    copies(plan)
        .into_iter()
        .find(|step| step.operation().table() == Some(table))
        .unwrap()
}

fn runs_before(plan: &Plan, earlier: &Step, later: &Step) -> bool {
    plan.transitive_dependencies(later.id()).contains(&earlier.id())
}

#[test]
fn test_modifying_stores_table() {
    let (state, plan) = plan_for(add_column("stores", "opened", ColumnType::Date));

    let expected = ghosts(
        &state,
        &["stores", "staff", "customers", "inventory", "paychecks", "payments", "rentals"],
    );
    assert_eq!(plan.ghost_tables(), &expected);
    assert_eq!(state.table_mapping.get_table_id("v1", "films").unwrap(), "films");

    // stores and staff refer to each other through NOT NULL keys.
    let steps: Vec<&Step> = plan.steps().collect();
    let first = steps[0].operation();
    assert_eq!(first.op_type(), OperationType::AddNull);
    assert!(first.covers(&ghost(&state, "stores")));
    assert!(first.covers(&ghost(&state, "staff")));
    assert!(steps[0].dependencies().is_empty());

    let last = steps[steps.len() - 1];
    assert_eq!(last.operation().op_type(), OperationType::DropNull);
    assert_eq!(last.operation().tables(), first.tables());
    assert!(steps
        .iter()
        .filter(|step| step.id() != last.id())
        .all(|step| runs_before(&plan, step, last)));

    let rentals = first_copy(&plan, &ghost(&state, "rentals"));
    let payments = first_copy(&plan, &ghost(&state, "payments"));
    let inventory = first_copy(&plan, &ghost(&state, "inventory"));
    assert!(runs_before(&plan, rentals, payments));
    assert!(runs_before(&plan, inventory, rentals));
}

#[test]
fn test_every_column_of_every_ghost_is_copied_once() {
    let (state, plan) = plan_for(add_column("staff", "hired", ColumnType::Date));

    let mut copied: BTreeMap<&str, Vec<&String>> = BTreeMap::new();
    for step in copies(&plan) {
        let table = step.operation().table().unwrap();
        copied.entry(table).or_default().extend(step.operation().columns());
    }

    assert_eq!(copied.len(), plan.ghost_tables().len());
    for (table, mut columns) in copied {
        let definition = state.catalog.table(table).unwrap();
        columns.sort();
        let mut expected: Vec<&String> = definition.columns().iter().map(|c| &c.name).collect();
        expected.sort();
        assert_eq!(columns, expected, "columns of {}", table);
    }
}

#[test]
fn test_modifying_customers_table() {
    let (state, plan) = plan_for(add_column("customers", "registered", ColumnType::Date));

    let customers = ghost(&state, "customers");
    assert_eq!(
        plan.ghost_tables(),
        &ghosts(&state, &["customers", "rentals", "payments"])
    );

    // The self reference is copied in a second pass; nothing needs placeholders.
    let steps: Vec<&Step> = plan.steps().collect();
    assert_eq!(steps.len(), 4);
    assert!(steps
        .iter()
        .all(|step| step.operation().op_type() == OperationType::Copy));

    let referred_by = steps
        .iter()
        .find(|step| step.operation().columns() == ["referred_by"])
        .unwrap();
    assert_eq!(referred_by.operation().table(), Some(customers.as_str()));
    assert!(runs_before(&plan, first_copy(&plan, &customers), referred_by));

    let rentals = first_copy(&plan, &ghost(&state, "rentals"));
    let payments = first_copy(&plan, &ghost(&state, "payments"));
    assert!(runs_before(&plan, first_copy(&plan, &customers), rentals));
    assert!(runs_before(&plan, rentals, payments));
}

#[test]
fn test_modifying_films_table() {
    let (state, plan) = plan_for(add_column("films", "released", ColumnType::Date));

    let order = ["films", "inventory", "rentals", "payments"];
    assert_eq!(plan.ghost_tables(), &ghosts(&state, &order));
    assert_eq!(plan.len(), 4);
    for pair in order.windows(2) {
        let earlier = first_copy(&plan, &ghost(&state, pair[0]));
        let later = first_copy(&plan, &ghost(&state, pair[1]));
        assert!(runs_before(&plan, earlier, later), "{} before {}", pair[0], pair[1]);
    }
}

#[test]
fn test_leaf_tables_are_copied_alone() {
    for table in ["payments", "paychecks"] {
        let (state, plan) = plan_for(add_column(table, "checked", ColumnType::Bool));

        assert_eq!(plan.ghost_tables(), &ghosts(&state, &[table]));
        assert_eq!(plan.len(), 1);
        let step = plan.steps().next().unwrap();
        assert_eq!(step.operation().table(), Some(ghost(&state, table).as_str()));
        assert!(step.dependencies().is_empty());
    }
}

#[test]
fn test_executing_a_plan_in_order() {
    let (_, mut plan) = plan_for(add_column("stores", "opened", ColumnType::Date));

    let mut executed = Vec::new();
    while let Some(step) = plan.next_step() {
        let id = step.id();
        assert!(plan.can_be_executed(id));
        executed.push(id);
        plan.mark_as_executed(id).unwrap();
    }

    assert!(plan.is_executed());
    assert_eq!(executed.len(), plan.len());
    assert!(plan.mark_as_executed(executed[0]).is_err());
}

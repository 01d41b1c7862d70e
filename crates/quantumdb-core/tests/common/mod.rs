//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use quantumdb_core::catalog::{Catalog, Column, ColumnType, ForeignKey, Hint, Table};
use quantumdb_core::schema::SchemaOperation;
use quantumdb_core::versioning::{ChangeSet, Changelog, CurrentVersion, State};

pub fn id() -> Column {
    Column::new("id", ColumnType::Int4).with_hints([Hint::Identity, Hint::AutoIncrement, Hint::NotNull])
}

pub fn not_null(name: &str, column_type: ColumnType) -> Column {
    Column::new(name, column_type).with_hint(Hint::NotNull)
}

pub fn nullable(name: &str, column_type: ColumnType) -> Column {
    Column::new(name, column_type)
}

/// A video store: stores and staff refer to each other, customers refer to
/// themselves, and payments and rentals sit at the bottom of the graph.
pub fn video_store() -> Catalog {
    let text = ColumnType::Varchar(255);
    let date = || Column::new("date", ColumnType::Date).with_hints([Hint::Identity, Hint::NotNull]);

    let tables = [
        Table::new("stores")
            .with_column(id())
            .with_column(not_null("name", text))
            .with_column(not_null("manager_id", ColumnType::Int4)),
        Table::new("staff")
            .with_column(id())
            .with_column(not_null("name", text))
            .with_column(not_null("store_id", ColumnType::Int4)),
        Table::new("customers")
            .with_column(id())
            .with_column(not_null("name", text))
            .with_column(not_null("store_id", ColumnType::Int4))
            .with_column(nullable("referred_by", ColumnType::Int4)),
        Table::new("films")
            .with_column(id())
            .with_column(not_null("name", text)),
        Table::new("inventory")
            .with_column(id())
            .with_column(not_null("store_id", ColumnType::Int4))
            .with_column(not_null("film_id", ColumnType::Int4)),
        Table::new("paychecks")
            .with_column(id())
            .with_column(not_null("staff_id", ColumnType::Int4))
            .with_column(date())
            .with_column(not_null("amount", ColumnType::Float)),
        Table::new("payments")
            .with_column(id())
            .with_column(nullable("staff_id", ColumnType::Int4))
            .with_column(not_null("customer_id", ColumnType::Int4))
            .with_column(not_null("rental_id", ColumnType::Int4))
            .with_column(date())
            .with_column(not_null("amount", ColumnType::Float)),
        Table::new("rentals")
            .with_column(id())
            .with_column(nullable("staff_id", ColumnType::Int4))
            .with_column(not_null("customer_id", ColumnType::Int4))
            .with_column(not_null("inventory_id", ColumnType::Int4))
            .with_column(date()),
    ];

    let mut catalog = Catalog::new("video-store");
    for table in tables {
        catalog.add_table(table).unwrap();
    }

    let keys = [
        ("stores", "manager_id", "staff"),
        ("staff", "store_id", "stores"),
        ("customers", "referred_by", "customers"),
        ("customers", "store_id", "stores"),
        ("inventory", "store_id", "stores"),
        ("inventory", "film_id", "films"),
        ("paychecks", "staff_id", "staff"),
        ("payments", "staff_id", "staff"),
        ("payments", "customer_id", "customers"),
        ("payments", "rental_id", "rentals"),
        ("rentals", "staff_id", "staff"),
        ("rentals", "customer_id", "customers"),
        ("rentals", "inventory_id", "inventory"),
    ];
    for (table, column, referred) in keys {
        catalog
            .add_foreign_key(ForeignKey::new(table, [column], referred, ["id"]))
            .unwrap();
    }
    catalog
}

/// A changelog with one version per operation, named `v1`, `v2`, ...
pub fn changelog(operations: Vec<SchemaOperation>) -> Changelog {
    let mut changelog = Changelog::with_root("root").unwrap();
    let mut current = CurrentVersion::new("root");
    for (index, operation) in operations.into_iter().enumerate() {
        changelog
            .add_version(
                &mut current,
                format!("v{}", index + 1),
                ChangeSet::new("Michael de Jong", None).unwrap(),
                operation,
            )
            .unwrap();
    }
    changelog
}

pub fn state(catalog: Catalog, operations: Vec<SchemaOperation>) -> State {
    State::bootstrap(catalog, changelog(operations)).unwrap()
}

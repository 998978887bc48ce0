//! Mutation faults, update cardinality, and transaction retry behavior.
//!
//! ## Test Categories
//!
//! 1. **Write faults** - duplicate inserts and deletes of missing rows
//! 2. **Update cardinality** - exactly-one enforcement through full and
//!    widened locators
//! 3. **Retry** - conflict-driven retries, the retry budget, and the
//!    retry counter
//! 4. **Row counts** - per-table counts surviving retries and rollbacks
//!
//! ## Usage
//!
//! ```bash
//! cargo test --test mutation_and_retry
//! ```

mod common;

use arbordb::error::fault_of;
use arbordb::{Fault, RowBuilder, StoreConfig};
use common::*;
use eyre::Result;

// ============================================================
// HELPER FUNCTIONS
// ============================================================

fn assert_fault(result: Result<impl std::fmt::Debug>, check: impl Fn(&Fault) -> bool) {
    let report = match result {
        Ok(value) => panic!("expected a fault, got {value:?}"),
        Err(report) => report,
    };
    let fault = fault_of(&report);
    assert!(
        fault.map(&check).unwrap_or(false),
        "unexpected fault: {report:#}"
    );
}

// ============================================================
// WRITE FAULTS
// ============================================================

mod write_fault_tests {
    use super::*;

    #[test]
    fn duplicate_insert_is_rejected() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        let customer = schema.table_named("customer")?.id();
        store.transactionally(&session, |cx| {
            cx.write_row(customer, &customer_row(&schema, 7, "alice"))
        })?;

        let result = store.transactionally(&session, |cx| {
            cx.write_row(customer, &customer_row(&schema, 7, "alice again"))
        });
        assert_fault(result, |f| matches!(f, Fault::DuplicateRow { .. }));

        // The failed transaction rolled back; the original row survives.
        store.transactionally(&session, |cx| {
            let image = cx
                .adapter()
                .get_row(customer, &customer_hkey(7))?
                .ok_or_else(|| eyre::eyre!("row missing"))?;
            let view = arbordb::RowView::new(
                image.as_bytes(),
                schema.table_named("customer")?.layout(),
            )?;
            assert_eq!(view.get_value(1)?, arbordb::Value::Text("alice".into()));
            Ok(())
        })
    }

    #[test]
    fn deleting_a_missing_row_faults() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        let customer = schema.table_named("customer")?.id();
        let result =
            store.transactionally(&session, |cx| cx.delete_row(customer, &customer_hkey(1)));
        assert_fault(result, |f| matches!(f, Fault::NoSuchRow));
        Ok(())
    }

    #[test]
    fn null_key_column_corrupts_the_hkey() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        let def = schema.table_named("customer")?;
        let mut b = RowBuilder::new(def.layout());
        b.put_null(0);
        b.put_str(1, "keyless")?;
        let keyless = b.build()?;

        let result = store
            .transactionally(&session, |cx| cx.write_row(def.id(), &keyless));
        assert_fault(result, |f| matches!(f, Fault::CorruptRow { .. }));
        Ok(())
    }
}

// ============================================================
// UPDATE CARDINALITY
// ============================================================

mod update_cardinality_tests {
    use super::*;

    #[test]
    fn locator_matching_nothing_faults() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        let orders = schema.table_named("orders")?.id();
        store.transactionally(&session, |cx| {
            cx.write_row(schema.table_named("customer")?.id(), &customer_row(&schema, 7, "alice"))
        })?;

        let result = store.transactionally(&session, |cx| {
            cx.update_row(orders, &order_hkey(7, 999), &order_row(&schema, 999, 7, 19_000))
        });
        assert_fault(result, |f| matches!(f, Fault::NoRowsUpdated));
        Ok(())
    }

    #[test]
    fn widened_locator_matching_two_rows_faults() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        let orders = schema.table_named("orders")?.id();
        store.transactionally(&session, |cx| {
            cx.write_row(schema.table_named("customer")?.id(), &customer_row(&schema, 7, "alice"))?;
            cx.write_row(orders, &order_row(&schema, 100, 7, 19_000))?;
            cx.write_row(orders, &order_row(&schema, 101, 7, 19_100))?;
            Ok(())
        })?;

        // A row image with a NULL oid widens the locator to every order
        // of customer 7.
        let result = store.transactionally(&session, |cx| {
            let def = schema.table_named("orders")?;
            let mut b = RowBuilder::new(def.layout());
            b.put_null(0);
            b.put_i64(1, 7)?;
            b.put_date(2, 20_000)?;
            let image = b.build()?;
            let locator = cx.locator_from_row(orders, &image)?;
            cx.update_row(orders, &locator, &image)
        });
        assert_fault(
            result,
            |f| matches!(f, Fault::TooManyRowsUpdated { touched: 2 }),
        );
        Ok(())
    }

    #[test]
    fn widened_locator_with_a_single_match_updates_it() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        let orders = schema.table_named("orders")?.id();
        store.transactionally(&session, |cx| {
            cx.write_row(schema.table_named("customer")?.id(), &customer_row(&schema, 7, "alice"))?;
            cx.write_row(orders, &order_row(&schema, 100, 7, 19_000))?;
            Ok(())
        })?;

        let hkey = store.transactionally(&session, |cx| {
            let def = schema.table_named("orders")?;
            let mut b = RowBuilder::new(def.layout());
            b.put_null(0);
            b.put_i64(1, 7)?;
            b.put_date(2, 20_000)?;
            let image = b.build()?;
            let locator = cx.locator_from_row(orders, &image)?;
            // The replacement carries the full key.
            cx.update_row(orders, &locator, &order_row(&schema, 100, 7, 20_000))
        })?;
        assert_eq!(hkey, order_hkey(7, 100));
        Ok(())
    }
}

// ============================================================
// RETRY
// ============================================================

mod retry_tests {
    use super::*;

    #[test]
    fn induced_conflicts_are_retried_to_success() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        let customer = schema.table_named("customer")?.id();
        store.engine().induce_conflicts(2);

        store.transactionally(&session, |cx| {
            cx.write_row(customer, &customer_row(&schema, 7, "alice"))
        })?;
        assert_eq!(store.stats().retries(), 2);

        // The winning attempt is the only one that committed.
        assert_eq!(store.stats().row_count(customer), 1);
        let entries = index_entries(&store, &session, "name_date_right")?;
        assert_eq!(entries.len(), 1);
        Ok(())
    }

    #[test]
    fn exhausting_the_retry_budget_faults() {
        let schema = two_level_schema();
        let config = StoreConfig::new().with_txn_retries(2);
        let session = arbordb::Session::new(&config);
        let store = arbordb::OperatorStore::new(arbordb::MemoryStore::new(), schema, config);
        let schema = store.schema();
        let customer = schema.table_named("customer").unwrap().id();
        store.engine().induce_conflicts(10);

        let result = store.transactionally(&session, |cx| {
            cx.write_row(customer, &customer_row(&schema, 7, "alice"))
        });
        assert_fault(result, |f| match f {
            Fault::Store { reason } => reason.contains("attempts"),
            _ => false,
        });
        // Nothing from the failed attempts is visible.
        assert_eq!(store.stats().row_count(customer), 0);
    }

    #[test]
    fn non_conflict_faults_are_not_retried() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        let customer = schema.table_named("customer")?.id();
        store.transactionally(&session, |cx| {
            cx.write_row(customer, &customer_row(&schema, 7, "alice"))
        })?;

        let result = store.transactionally(&session, |cx| {
            cx.write_row(customer, &customer_row(&schema, 7, "alice"))
        });
        assert_fault(result, |f| matches!(f, Fault::DuplicateRow { .. }));
        assert_eq!(store.stats().retries(), 0);
        Ok(())
    }
}

// ============================================================
// ROW COUNTS
// ============================================================

mod row_count_tests {
    use super::*;

    #[test]
    fn counts_track_commits_not_attempts() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        let customer = schema.table_named("customer")?.id();
        let orders = schema.table_named("orders")?.id();

        store.transactionally(&session, |cx| {
            cx.write_row(customer, &customer_row(&schema, 1, "alice"))?;
            cx.write_row(orders, &order_row(&schema, 100, 1, 19_000))?;
            cx.write_row(orders, &order_row(&schema, 101, 1, 19_100))?;
            Ok(())
        })?;
        assert_eq!(store.stats().row_count(customer), 1);
        assert_eq!(store.stats().row_count(orders), 2);

        store.transactionally(&session, |cx| {
            cx.delete_row(orders, &order_hkey(1, 100))?;
            Ok(())
        })?;
        assert_eq!(store.stats().row_count(orders), 1);

        // A rolled-back transaction leaves the counts alone.
        let result = store.transactionally(&session, |cx| {
            cx.delete_row(orders, &order_hkey(1, 101))?;
            cx.delete_row(orders, &order_hkey(1, 101))
        });
        assert_fault(result, |f| matches!(f, Fault::NoSuchRow));
        assert_eq!(store.stats().row_count(orders), 1);
        Ok(())
    }
}

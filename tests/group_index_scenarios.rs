//! End-to-end group-index maintenance scenarios.
//!
//! ## Test Categories
//!
//! 1. **Two-level placeholders** - placeholder entries for childless
//!    parents under a parent-preserving join, and their removal and
//!    restoration as child rows come and go
//! 2. **Three-level placeholders** - the placeholder moving down and
//!    back up a customer/orders/items branch
//! 3. **Updates** - entry rewrites for non-key updates and for key
//!    changes that relocate the base row
//! 4. **Bulk equivalence** - incrementally maintained trees matching a
//!    from-scratch rebuild over the same base rows
//! 5. **Index scans** - range and reverse scans over the maintained
//!    entries
//!
//! ## Usage
//!
//! ```bash
//! cargo test --test group_index_scenarios
//! ```

mod common;

use arbordb::operator::{IndexRange, Operator};
use arbordb::{HKey, MemoryStore, OperatorStore, RowData, Session, Value};
use common::*;
use eyre::Result;

// ============================================================
// HELPER FUNCTIONS
// ============================================================

fn write_all(
    store: &OperatorStore<MemoryStore>,
    session: &Session,
    rows: &[(&str, RowData)],
) -> Result<Vec<HKey>> {
    let schema = store.schema();
    store.transactionally(session, |cx| {
        let mut hkeys = Vec::new();
        for (table, data) in rows {
            let table = schema.table_named(table)?.id();
            hkeys.push(cx.write_row(table, data)?);
        }
        Ok(hkeys)
    })
}

fn delete_one(
    store: &OperatorStore<MemoryStore>,
    session: &Session,
    table: &str,
    hkey: &HKey,
) -> Result<RowData> {
    let schema = store.schema();
    store.transactionally(session, |cx| {
        cx.delete_row(schema.table_named(table)?.id(), hkey)
    })
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

// ============================================================
// TWO-LEVEL SCENARIOS
// ============================================================

mod two_level_tests {
    use super::*;

    #[test]
    fn childless_customer_gets_placeholder_under_right_join() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        write_all(&store, &session, &[("customer", customer_row(&schema, 7, "alice"))])?;

        let right = index_entries(&store, &session, "name_date_right")?;
        assert_eq!(
            right,
            vec![entry_key(&[text("alice"), Value::Null], &customer_hkey(7))]
        );

        // A left join over the same columns keeps no childless parents.
        let left = index_entries(&store, &session, "name_date_left")?;
        assert!(left.is_empty());
        Ok(())
    }

    #[test]
    fn first_child_replaces_placeholder() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        write_all(
            &store,
            &session,
            &[
                ("customer", customer_row(&schema, 7, "alice")),
                ("orders", order_row(&schema, 100, 7, 19_000)),
            ],
        )?;

        let entries = index_entries(&store, &session, "name_date_right")?;
        assert_eq!(
            entries,
            vec![entry_key(
                &[text("alice"), Value::Date(19_000)],
                &order_hkey(7, 100)
            )]
        );
        Ok(())
    }

    #[test]
    fn second_child_adds_entry_in_column_order() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        write_all(
            &store,
            &session,
            &[
                ("customer", customer_row(&schema, 7, "alice")),
                ("orders", order_row(&schema, 101, 7, 19_500)),
                ("orders", order_row(&schema, 100, 7, 19_000)),
            ],
        )?;

        // Tree order sorts by odate first, not by insertion or oid.
        let entries = index_entries(&store, &session, "name_date_right")?;
        assert_eq!(
            entries,
            vec![
                entry_key(&[text("alice"), Value::Date(19_000)], &order_hkey(7, 100)),
                entry_key(&[text("alice"), Value::Date(19_500)], &order_hkey(7, 101)),
            ]
        );
        Ok(())
    }

    #[test]
    fn deleting_one_of_two_children_leaves_no_placeholder() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        write_all(
            &store,
            &session,
            &[
                ("customer", customer_row(&schema, 7, "alice")),
                ("orders", order_row(&schema, 100, 7, 19_000)),
                ("orders", order_row(&schema, 101, 7, 19_500)),
            ],
        )?;
        delete_one(&store, &session, "orders", &order_hkey(7, 100))?;

        let entries = index_entries(&store, &session, "name_date_right")?;
        assert_eq!(
            entries,
            vec![entry_key(
                &[text("alice"), Value::Date(19_500)],
                &order_hkey(7, 101)
            )]
        );
        Ok(())
    }

    #[test]
    fn deleting_last_child_restores_placeholder() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        write_all(
            &store,
            &session,
            &[
                ("customer", customer_row(&schema, 7, "alice")),
                ("orders", order_row(&schema, 100, 7, 19_000)),
            ],
        )?;
        delete_one(&store, &session, "orders", &order_hkey(7, 100))?;

        let entries = index_entries(&store, &session, "name_date_right")?;
        assert_eq!(
            entries,
            vec![entry_key(&[text("alice"), Value::Null], &customer_hkey(7))]
        );

        // Removing the customer itself clears the tree.
        delete_one(&store, &session, "customer", &customer_hkey(7))?;
        assert!(index_entries(&store, &session, "name_date_right")?.is_empty());
        Ok(())
    }

    #[test]
    fn null_index_column_encodes_as_null() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        let def = schema.table_named("customer")?;
        let mut b = arbordb::RowBuilder::new(def.layout());
        b.put_i64(0, 9)?;
        b.put_null(1);
        let nameless = b.build()?;
        write_all(&store, &session, &[("customer", nameless)])?;

        let entries = index_entries(&store, &session, "name_date_right")?;
        assert_eq!(
            entries,
            vec![entry_key(&[Value::Null, Value::Null], &customer_hkey(9))]
        );
        Ok(())
    }
}

// ============================================================
// THREE-LEVEL SCENARIOS
// ============================================================

mod three_level_tests {
    use super::*;

    #[test]
    fn placeholder_moves_down_the_branch_on_inserts() -> Result<()> {
        let (store, session) = new_store(three_level_schema());
        let schema = store.schema();

        write_all(&store, &session, &[("customer", customer_row(&schema, 1, "bob"))])?;
        assert_eq!(
            index_entries(&store, &session, "name_date_sku")?,
            vec![entry_key(
                &[text("bob"), Value::Null, Value::Null],
                &customer_hkey(1)
            )]
        );

        write_all(&store, &session, &[("orders", order_row(&schema, 10, 1, 20_000))])?;
        assert_eq!(
            index_entries(&store, &session, "name_date_sku")?,
            vec![entry_key(
                &[text("bob"), Value::Date(20_000), Value::Null],
                &order_hkey(1, 10)
            )]
        );

        write_all(&store, &session, &[("items", item_row(&schema, 500, 1, 10, "widget"))])?;
        assert_eq!(
            index_entries(&store, &session, "name_date_sku")?,
            vec![entry_key(
                &[text("bob"), Value::Date(20_000), text("widget")],
                &item_hkey(1, 10, 500)
            )]
        );
        Ok(())
    }

    #[test]
    fn placeholder_moves_back_up_on_deletes() -> Result<()> {
        let (store, session) = new_store(three_level_schema());
        let schema = store.schema();
        write_all(
            &store,
            &session,
            &[
                ("customer", customer_row(&schema, 1, "bob")),
                ("orders", order_row(&schema, 10, 1, 20_000)),
                ("items", item_row(&schema, 500, 1, 10, "widget")),
            ],
        )?;

        delete_one(&store, &session, "items", &item_hkey(1, 10, 500))?;
        assert_eq!(
            index_entries(&store, &session, "name_date_sku")?,
            vec![entry_key(
                &[text("bob"), Value::Date(20_000), Value::Null],
                &order_hkey(1, 10)
            )]
        );

        delete_one(&store, &session, "orders", &order_hkey(1, 10))?;
        assert_eq!(
            index_entries(&store, &session, "name_date_sku")?,
            vec![entry_key(
                &[text("bob"), Value::Null, Value::Null],
                &customer_hkey(1)
            )]
        );
        Ok(())
    }

    #[test]
    fn sibling_orders_keep_independent_item_placeholders() -> Result<()> {
        let (store, session) = new_store(three_level_schema());
        let schema = store.schema();
        write_all(
            &store,
            &session,
            &[
                ("customer", customer_row(&schema, 1, "bob")),
                ("orders", order_row(&schema, 10, 1, 20_000)),
                ("orders", order_row(&schema, 11, 1, 20_001)),
                ("items", item_row(&schema, 500, 1, 10, "widget")),
            ],
        )?;

        // Order 10 has an item; order 11 is still childless.
        assert_eq!(
            index_entries(&store, &session, "name_date_sku")?,
            vec![
                entry_key(
                    &[text("bob"), Value::Date(20_000), text("widget")],
                    &item_hkey(1, 10, 500)
                ),
                entry_key(
                    &[text("bob"), Value::Date(20_001), Value::Null],
                    &order_hkey(1, 11)
                ),
            ]
        );
        Ok(())
    }
}

// ============================================================
// UPDATE SCENARIOS
// ============================================================

mod update_tests {
    use super::*;

    #[test]
    fn non_key_update_rewrites_the_entry() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        write_all(
            &store,
            &session,
            &[
                ("customer", customer_row(&schema, 7, "alice")),
                ("orders", order_row(&schema, 100, 7, 19_000)),
            ],
        )?;

        let orders = schema.table_named("orders")?.id();
        store.transactionally(&session, |cx| {
            cx.update_row(orders, &order_hkey(7, 100), &order_row(&schema, 100, 7, 19_250))
        })?;

        assert_eq!(
            index_entries(&store, &session, "name_date_right")?,
            vec![entry_key(
                &[text("alice"), Value::Date(19_250)],
                &order_hkey(7, 100)
            )]
        );
        Ok(())
    }

    #[test]
    fn key_update_relocates_row_and_entry() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        write_all(
            &store,
            &session,
            &[
                ("customer", customer_row(&schema, 7, "alice")),
                ("orders", order_row(&schema, 100, 7, 19_000)),
            ],
        )?;

        let orders = schema.table_named("orders")?.id();
        let new_hkey = store.transactionally(&session, |cx| {
            cx.update_row(orders, &order_hkey(7, 100), &order_row(&schema, 200, 7, 19_000))
        })?;
        assert_eq!(new_hkey, order_hkey(7, 200));

        assert_eq!(
            index_entries(&store, &session, "name_date_right")?,
            vec![entry_key(
                &[text("alice"), Value::Date(19_000)],
                &order_hkey(7, 200)
            )]
        );

        // The old base location is gone, the new one readable.
        store.transactionally(&session, |cx| {
            assert!(cx.adapter().get_row(orders, &order_hkey(7, 100))?.is_none());
            assert!(cx.adapter().get_row(orders, &order_hkey(7, 200))?.is_some());
            Ok(())
        })
    }
}

// ============================================================
// BULK EQUIVALENCE
// ============================================================

mod bulk_equivalence_tests {
    use super::*;

    #[test]
    fn two_level_history_matches_rebuild() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        write_all(
            &store,
            &session,
            &[
                ("customer", customer_row(&schema, 1, "alice")),
                ("customer", customer_row(&schema, 2, "bob")),
                ("orders", order_row(&schema, 100, 1, 19_000)),
                ("orders", order_row(&schema, 101, 1, 19_100)),
                ("orders", order_row(&schema, 102, 2, 18_000)),
            ],
        )?;
        delete_one(&store, &session, "orders", &order_hkey(1, 100))?;
        delete_one(&store, &session, "orders", &order_hkey(2, 102))?;

        // Survivors: both customers, order 101 under customer 1.
        let final_rows = vec![
            ("customer", customer_row(&schema, 1, "alice")),
            ("customer", customer_row(&schema, 2, "bob")),
            ("orders", order_row(&schema, 101, 1, 19_100)),
        ];
        for index in ["name_date_right", "name_date_left"] {
            assert_eq!(
                index_entries(&store, &session, index)?,
                rebuilt_entries(two_level_schema(), &final_rows, index)?,
                "index {index} diverged from a bulk rebuild"
            );
        }
        Ok(())
    }

    #[test]
    fn three_level_history_matches_rebuild() -> Result<()> {
        let (store, session) = new_store(three_level_schema());
        let schema = store.schema();
        write_all(
            &store,
            &session,
            &[
                ("customer", customer_row(&schema, 1, "alice")),
                ("orders", order_row(&schema, 10, 1, 20_000)),
                ("orders", order_row(&schema, 11, 1, 20_100)),
                ("items", item_row(&schema, 500, 1, 10, "widget")),
                ("items", item_row(&schema, 501, 1, 10, "gadget")),
                ("items", item_row(&schema, 502, 1, 11, "sprocket")),
            ],
        )?;
        delete_one(&store, &session, "items", &item_hkey(1, 10, 500))?;
        delete_one(&store, &session, "items", &item_hkey(1, 11, 502))?;
        delete_one(&store, &session, "orders", &order_hkey(1, 11))?;

        let final_rows = vec![
            ("customer", customer_row(&schema, 1, "alice")),
            ("orders", order_row(&schema, 10, 1, 20_000)),
            ("items", item_row(&schema, 501, 1, 10, "gadget")),
        ];
        assert_eq!(
            index_entries(&store, &session, "name_date_sku")?,
            rebuilt_entries(three_level_schema(), &final_rows, "name_date_sku")?
        );
        Ok(())
    }

    #[test]
    fn deferred_index_skips_maintenance_until_built() -> Result<()> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        store.build_indexes(&session, &["name_date_right"], true)?;

        write_all(&store, &session, &[("customer", customer_row(&schema, 7, "alice"))])?;
        assert!(index_entries(&store, &session, "name_date_right")?.is_empty());

        store.build_deferred_indexes(&session)?;
        assert_eq!(
            index_entries(&store, &session, "name_date_right")?,
            vec![entry_key(&[text("alice"), Value::Null], &customer_hkey(7))]
        );

        // Maintenance resumes once the deferred build lands.
        write_all(&store, &session, &[("orders", order_row(&schema, 100, 7, 19_000))])?;
        assert_eq!(
            index_entries(&store, &session, "name_date_right")?,
            vec![entry_key(
                &[text("alice"), Value::Date(19_000)],
                &order_hkey(7, 100)
            )]
        );
        Ok(())
    }
}

// ============================================================
// INDEX SCANS
// ============================================================

mod index_scan_tests {
    use super::*;

    fn seeded_store() -> Result<(OperatorStore<MemoryStore>, Session)> {
        let (store, session) = new_store(two_level_schema());
        let schema = store.schema();
        write_all(
            &store,
            &session,
            &[
                ("customer", customer_row(&schema, 1, "alice")),
                ("customer", customer_row(&schema, 2, "bob")),
                ("customer", customer_row(&schema, 3, "carol")),
                ("orders", order_row(&schema, 100, 1, 19_000)),
                ("orders", order_row(&schema, 101, 2, 19_100)),
                ("orders", order_row(&schema, 102, 3, 19_200)),
            ],
        )?;
        Ok((store, session))
    }

    fn scan_names(
        store: &OperatorStore<MemoryStore>,
        session: &Session,
        range: IndexRange,
        reverse: bool,
    ) -> Result<Vec<String>> {
        let schema = store.schema();
        let index = schema.index_named("name_date_right")?.id();
        store.transactionally(session, |cx| {
            let plan = Operator::IndexScan {
                index,
                range: range.clone(),
                reverse,
            };
            let mut cursor = cx.open_cursor(&plan, &[])?;
            let mut names = Vec::new();
            while let Some(row) = cursor.next()? {
                let view = row.view(cx.registry())?;
                match view.get_value(0)? {
                    Value::Text(name) => names.push(name),
                    other => panic!("expected text name, got {other:?}"),
                }
            }
            Ok(names)
        })
    }

    #[test]
    fn half_open_range_scans_in_order() -> Result<()> {
        let (store, session) = seeded_store()?;
        let names = scan_names(
            &store,
            &session,
            IndexRange {
                lo: Some(vec![text("bob")]),
                hi: None,
                lo_inclusive: true,
                hi_inclusive: false,
            },
            false,
        )?;
        assert_eq!(names, vec!["bob", "carol"]);
        Ok(())
    }

    #[test]
    fn exclusive_bounds_trim_both_ends() -> Result<()> {
        let (store, session) = seeded_store()?;
        let names = scan_names(
            &store,
            &session,
            IndexRange {
                lo: Some(vec![text("alice")]),
                hi: Some(vec![text("carol")]),
                lo_inclusive: false,
                hi_inclusive: false,
            },
            false,
        )?;
        assert_eq!(names, vec!["bob"]);
        Ok(())
    }

    #[test]
    fn reverse_scan_walks_backwards() -> Result<()> {
        let (store, session) = seeded_store()?;
        let names = scan_names(
            &store,
            &session,
            IndexRange {
                lo: None,
                hi: Some(vec![text("bob")]),
                lo_inclusive: true,
                hi_inclusive: true,
            },
            true,
        )?;
        assert_eq!(names, vec!["bob", "alice"]);
        Ok(())
    }
}

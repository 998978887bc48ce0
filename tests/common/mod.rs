//! Shared fixtures for the integration suites: the customer/orders and
//! customer/orders/items schemas, store construction, row builders, and
//! raw index-tree inspection.

#![allow(dead_code)]

use arbordb::engine::TreeStore;
use arbordb::schema::{FieldDef, GroupIndexBuilder, JoinType, TableBuilder};
use arbordb::{
    Charset, FieldType, MemoryStore, OperatorStore, RowBuilder, RowData, Schema, Session,
    StoreConfig,
};
use eyre::Result;

pub const NAME_TYPE: FieldType = FieldType::Varchar {
    max_len: 64,
    charset: Charset::Utf8,
};

/// Two-level group: customer(cid, name) with orders(oid, cid, odate),
/// plus a parent-preserving index over (customer.name, orders.odate) and
/// a non-preserving one over the same columns.
pub fn two_level_schema() -> Schema {
    Schema::builder("shop")
        .table(
            TableBuilder::new(
                "customer",
                vec![
                    FieldDef::new("cid", FieldType::Int64).not_null(),
                    FieldDef::new("name", NAME_TYPE),
                ],
            )
            .with_primary_key(vec!["cid"]),
        )
        .table(
            TableBuilder::new(
                "orders",
                vec![
                    FieldDef::new("oid", FieldType::Int64).not_null(),
                    FieldDef::new("cid", FieldType::Int64).not_null(),
                    FieldDef::new("odate", FieldType::Date),
                ],
            )
            .with_primary_key(vec!["oid"])
            .with_parent("customer", vec!["cid"]),
        )
        .group_index(
            GroupIndexBuilder::new("name_date_right", JoinType::Right)
                .with_column("customer", "name")
                .with_column("orders", "odate"),
        )
        .group_index(
            GroupIndexBuilder::new("name_date_left", JoinType::Left)
                .with_column("customer", "name")
                .with_column("orders", "odate"),
        )
        .build()
        .expect("two-level schema builds")
}

/// Three-level group: customer / orders / items, with one
/// parent-preserving index spanning all three tables.
pub fn three_level_schema() -> Schema {
    Schema::builder("shop")
        .table(
            TableBuilder::new(
                "customer",
                vec![
                    FieldDef::new("cid", FieldType::Int64).not_null(),
                    FieldDef::new("name", NAME_TYPE),
                ],
            )
            .with_primary_key(vec!["cid"]),
        )
        .table(
            TableBuilder::new(
                "orders",
                vec![
                    FieldDef::new("oid", FieldType::Int64).not_null(),
                    FieldDef::new("cid", FieldType::Int64).not_null(),
                    FieldDef::new("odate", FieldType::Date),
                ],
            )
            .with_primary_key(vec!["oid"])
            .with_parent("customer", vec!["cid"]),
        )
        .table(
            TableBuilder::new(
                "items",
                vec![
                    FieldDef::new("iid", FieldType::Int64).not_null(),
                    FieldDef::new("cid", FieldType::Int64).not_null(),
                    FieldDef::new("oid", FieldType::Int64).not_null(),
                    FieldDef::new("sku", NAME_TYPE),
                ],
            )
            .with_primary_key(vec!["iid"])
            .with_parent("orders", vec!["cid", "oid"]),
        )
        .group_index(
            GroupIndexBuilder::new("name_date_sku", JoinType::Right)
                .with_column("customer", "name")
                .with_column("orders", "odate")
                .with_column("items", "sku"),
        )
        .build()
        .expect("three-level schema builds")
}

pub fn new_store(schema: Schema) -> (OperatorStore<MemoryStore>, Session) {
    let config = StoreConfig::new();
    let session = Session::new(&config);
    (OperatorStore::new(MemoryStore::new(), schema, config), session)
}

pub fn customer_row(schema: &Schema, cid: i64, name: &str) -> RowData {
    let def = schema.table_named("customer").expect("customer table");
    let mut b = RowBuilder::new(def.layout());
    b.put_i64(0, cid).unwrap();
    b.put_str(1, name).unwrap();
    b.build().expect("customer row")
}

pub fn order_row(schema: &Schema, oid: i64, cid: i64, odate: i32) -> RowData {
    let def = schema.table_named("orders").expect("orders table");
    let mut b = RowBuilder::new(def.layout());
    b.put_i64(0, oid).unwrap();
    b.put_i64(1, cid).unwrap();
    b.put_date(2, odate).unwrap();
    b.build().expect("order row")
}

pub fn item_row(schema: &Schema, iid: i64, cid: i64, oid: i64, sku: &str) -> RowData {
    let def = schema.table_named("items").expect("items table");
    let mut b = RowBuilder::new(def.layout());
    b.put_i64(0, iid).unwrap();
    b.put_i64(1, cid).unwrap();
    b.put_i64(2, oid).unwrap();
    b.put_str(3, sku).unwrap();
    b.build().expect("item row")
}

pub fn customer_hkey(cid: i64) -> arbordb::HKey {
    let mut hkey = arbordb::HKey::new();
    hkey.extend_with_ordinal(1).unwrap();
    hkey.extend_with_value(&arbordb::Value::Int64(cid));
    hkey
}

pub fn order_hkey(cid: i64, oid: i64) -> arbordb::HKey {
    let mut hkey = customer_hkey(cid);
    hkey.extend_with_ordinal(2).unwrap();
    hkey.extend_with_value(&arbordb::Value::Int64(oid));
    hkey
}

pub fn item_hkey(cid: i64, oid: i64, iid: i64) -> arbordb::HKey {
    let mut hkey = order_hkey(cid, oid);
    hkey.extend_with_ordinal(3).unwrap();
    hkey.extend_with_value(&arbordb::Value::Int64(iid));
    hkey
}

/// Entry key an index stores for a row: the encoded column values
/// followed by the source row's hkey bytes.
pub fn entry_key(values: &[arbordb::Value], hkey: &arbordb::HKey) -> Vec<u8> {
    let mut key = Vec::new();
    for value in values {
        arbordb::encoding::key::encode_value(value, &mut key);
    }
    key.extend_from_slice(hkey.as_bytes());
    key
}

/// All entry keys of one group index, in tree order.
pub fn index_entries<S: TreeStore>(
    store: &OperatorStore<S>,
    session: &Session,
    index_name: &str,
) -> Result<Vec<Vec<u8>>> {
    let schema = store.schema();
    let tree = schema.index_named(index_name)?.tree();
    store.transactionally(session, |cx| {
        let mut cursor = cx.adapter().txn().open_cursor(tree, u64::MAX)?;
        let mut keys = Vec::new();
        while let Some(entry) = cursor.next()? {
            keys.push(entry.key);
        }
        Ok(keys)
    })
}

/// Rebuild every index of `schema` from scratch over the given base rows
/// and return one index's entries. Writes go in with index maintenance
/// deferred, then a bulk build populates the trees; comparing against the
/// incrementally maintained store checks the equivalence the maintenance
/// plans promise.
pub fn rebuilt_entries(
    schema: Schema,
    rows: &[(&str, RowData)],
    index_name: &str,
) -> Result<Vec<Vec<u8>>> {
    let index_names: Vec<String> = schema.indexes().iter().map(|i| i.name().to_string()).collect();
    let names: Vec<&str> = index_names.iter().map(String::as_str).collect();
    let (store, session) = new_store(schema);
    store.build_indexes(&session, &names, true)?;
    let schema = store.schema();
    store.transactionally(&session, |cx| {
        for (table, data) in rows {
            let table = schema.table_named(table)?.id();
            cx.write_row(table, data)?;
        }
        Ok(())
    })?;
    store.build_deferred_indexes(&session)?;
    index_entries(&store, &session, index_name)
}

//! Row collection into fixed-capacity scan buffers.
//!
//! ## Test Categories
//!
//! 1. **Buffer filling** - packing rows until the buffer is full and
//!    carrying the overflowing row into the next fill
//! 2. **Faults** - rows exceeding the buffer capacity outright and
//!    mismatched row definitions, at request time and mid-stream
//! 3. **Payload** - decoding the packed images back out of the buffer
//!
//! ## Usage
//!
//! ```bash
//! cargo test --test row_collector
//! ```

mod common;

use arbordb::error::fault_of;
use arbordb::operator::{Operator, ScanBound};
use arbordb::{
    Fault, MemoryStore, OperatorStore, RowCollector, RowView, ScanBuffer, ScanRequest, Session,
    Value,
};
use common::*;
use eyre::Result;

// ============================================================
// HELPER FUNCTIONS
// ============================================================

const CUSTOMERS: &[(i64, &str)] = &[(1, "alice"), (2, "bob"), (3, "carol"), (4, "dave")];

fn seeded_store() -> Result<(OperatorStore<MemoryStore>, Session)> {
    let (store, session) = new_store(two_level_schema());
    let schema = store.schema();
    store.transactionally(&session, |cx| {
        let customer = schema.table_named("customer")?.id();
        for &(cid, name) in CUSTOMERS {
            cx.write_row(customer, &customer_row(&schema, cid, name))?;
        }
        Ok(())
    })?;
    Ok((store, session))
}

fn customer_scan(store: &OperatorStore<MemoryStore>) -> Result<Operator> {
    let schema = store.schema();
    let def = schema.table_named("customer")?;
    Ok(Operator::GroupScan {
        group: def.group(),
        bound: ScanBound::FullGroup,
    })
}

fn customer_request(store: &OperatorStore<MemoryStore>) -> Result<ScanRequest> {
    let schema = store.schema();
    let row_def = schema.table_named("customer")?.layout().row_def_id();
    ScanRequest::new(row_def, row_def)
}

/// Split a filled buffer back into row images by each header's length.
fn images(buffer: &ScanBuffer) -> Vec<Vec<u8>> {
    let bytes = buffer.bytes();
    let mut rows = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        let len = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
        rows.push(bytes[at..at + len].to_vec());
        at += len;
    }
    rows
}

// ============================================================
// BUFFER FILLING
// ============================================================

mod fill_tests {
    use super::*;

    #[test]
    fn fills_span_buffers_with_carry_over() -> Result<()> {
        let (store, session) = seeded_store()?;
        let plan = customer_scan(&store)?;
        let request = customer_request(&store)?;
        store.transactionally(&session, |cx| {
            let cursor = cx.open_cursor(&plan, &[])?;
            let mut collector = RowCollector::new(request, cursor);

            // Room for roughly two customer rows per fill.
            let mut buffer = ScanBuffer::new(72);
            let mut per_fill = Vec::new();
            loop {
                let appended = collector.fill(&mut buffer)?;
                if appended == 0 && collector.finished() {
                    break;
                }
                per_fill.push(appended);
                buffer.reset();
            }

            assert_eq!(per_fill.iter().sum::<usize>(), CUSTOMERS.len());
            assert!(per_fill.len() > 1, "one fill fit everything: {per_fill:?}");
            assert!(per_fill.iter().all(|&n| n > 0));
            Ok(())
        })
    }

    #[test]
    fn finished_flips_only_at_stream_end() -> Result<()> {
        let (store, session) = seeded_store()?;
        let plan = customer_scan(&store)?;
        let request = customer_request(&store)?;
        store.transactionally(&session, |cx| {
            let cursor = cx.open_cursor(&plan, &[])?;
            let mut collector = RowCollector::new(request, cursor);

            let mut buffer = ScanBuffer::new(4096);
            assert!(collector.collect_next_row(&mut buffer)?);
            assert!(!collector.finished());

            while collector.collect_next_row(&mut buffer)? {}
            assert!(collector.finished());
            assert_eq!(buffer.rows(), CUSTOMERS.len());
            Ok(())
        })
    }
}

// ============================================================
// FAULTS
// ============================================================

mod fault_tests {
    use super::*;

    #[test]
    fn row_exceeding_capacity_faults() -> Result<()> {
        let (store, session) = seeded_store()?;
        let plan = customer_scan(&store)?;
        let request = customer_request(&store)?;
        store.transactionally(&session, |cx| {
            let cursor = cx.open_cursor(&plan, &[])?;
            let mut collector = RowCollector::new(request, cursor);

            let mut buffer = ScanBuffer::new(8);
            let report = collector.collect_next_row(&mut buffer).unwrap_err();
            assert!(matches!(
                fault_of(&report),
                Some(Fault::RowTooLargeForBuffer { capacity: 8, .. })
            ));
            Ok(())
        })
    }

    #[test]
    fn mismatched_request_endpoints_fault() {
        let result = ScanRequest::new(5, 6);
        let report = result.unwrap_err();
        assert!(matches!(
            fault_of(&report),
            Some(Fault::MismatchedRowDefinitions { start: 5, end: 6 })
        ));
    }

    #[test]
    fn row_of_the_wrong_definition_faults_mid_stream() -> Result<()> {
        let (store, session) = seeded_store()?;
        let schema = store.schema();
        let plan = customer_scan(&store)?;
        // The request expects orders but the scan yields customers.
        let orders_def = schema.table_named("orders")?.layout().row_def_id();
        let request = ScanRequest::new(orders_def, orders_def)?;
        store.transactionally(&session, |cx| {
            let cursor = cx.open_cursor(&plan, &[])?;
            let mut collector = RowCollector::new(request, cursor);

            let mut buffer = ScanBuffer::new(4096);
            let report = collector.collect_next_row(&mut buffer).unwrap_err();
            assert!(matches!(
                fault_of(&report),
                Some(Fault::MismatchedRowDefinitions { .. })
            ));
            Ok(())
        })
    }
}

// ============================================================
// PAYLOAD
// ============================================================

mod payload_tests {
    use super::*;

    #[test]
    fn packed_images_decode_in_scan_order() -> Result<()> {
        let (store, session) = seeded_store()?;
        let schema = store.schema();
        let plan = customer_scan(&store)?;
        let request = customer_request(&store)?;
        store.transactionally(&session, |cx| {
            let cursor = cx.open_cursor(&plan, &[])?;
            let mut collector = RowCollector::new(request, cursor);

            let mut buffer = ScanBuffer::new(4096);
            collector.fill(&mut buffer)?;
            assert!(collector.finished());

            let layout = schema.table_named("customer")?.layout();
            let mut names = Vec::new();
            for image in images(&buffer) {
                let view = RowView::new(&image, layout)?;
                match view.get_value(1)? {
                    Value::Text(name) => names.push(name),
                    other => panic!("expected text, got {other:?}"),
                }
            }
            let expected: Vec<&str> = CUSTOMERS.iter().map(|&(_, name)| name).collect();
            assert_eq!(names, expected);
            Ok(())
        })
    }
}

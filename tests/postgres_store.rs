use bulkmodel::test_support::{TestDatabase, WIDGETS_DDL, Widget};
use bulkmodel::{
    Assignment, BulkConfig, BulkWriter, CopyOptions, FieldValue, Filter, Model, Persistence,
    PgStore, RecordId, WorkingSet, WriteOptions,
};
use std::collections::HashMap;
use std::sync::Arc;

#[test]
fn postgres_store_round_trips_bulk_operations() {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let test_db = match runtime.block_on(TestDatabase::new()) {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping postgres store test: {err}");
            return;
        }
    };
    runtime
        .block_on(test_db.execute_all(&[WIDGETS_DDL]))
        .expect("create widgets table");

    let pool = test_db.pool().expect("pool").clone();
    let store = Arc::new(PgStore::new(pool, runtime.handle().clone()));
    let writer = BulkWriter::new(store.clone(), BulkConfig::default());
    let opts = WriteOptions::new()
        .batch_size(10)
        .concurrent(true)
        .max_concurrent_workers(5);

    let mut records: Vec<Widget> = (0..100)
        .map(|i| Widget::new(&format!("w{i:03}"), i))
        .collect();
    let created = writer
        .bulk_create(&mut records, None, &opts.clone().return_records(true))
        .expect("bulk create");
    assert_eq!(created.count(), 100);
    let stored_names: HashMap<RecordId, String> = created
        .into_records()
        .expect("returned records")
        .into_iter()
        .map(|w| (w.id.expect("stored id"), w.name))
        .collect();
    for record in &records {
        let id = record.id.expect("created id");
        assert_eq!(stored_names[&id], record.name);
    }

    for record in records.iter_mut() {
        record.quantity += 1000;
        if record.quantity % 2 == 0 {
            record.note = Some(format!("even {}", record.name));
        }
    }
    let set = WorkingSet::new(records);
    let updated = writer
        .update_fields(&set, &["quantity", "note"], &opts)
        .expect("update fields");
    assert_eq!(updated.count(), 100);

    let fetched: HashMap<RecordId, Widget> = writer
        .fetch::<Widget>(&set.identifiers().expect("ids"))
        .expect("fetch")
        .into_iter()
        .map(|w| (w.id.expect("stored id"), w))
        .collect();
    assert_eq!(fetched.len(), 100);
    for before in set.iter() {
        let after = &fetched[&before.id.expect("created id")];
        assert_eq!(after.name, before.name);
        assert_eq!(after.quantity, before.quantity);
        // null source values take the column default
        let expected_note = before.note.clone().unwrap_or_else(|| "n/a".to_string());
        assert_eq!(after.note.as_deref(), Some(expected_note.as_str()));
    }

    let deactivated = writer
        .update(&set, &[Assignment::fixed("active", false)], &opts)
        .expect("update");
    assert_eq!(deactivated.count(), 100);

    let mut loaded: Vec<Widget> = (0..25)
        .map(|i| Widget::new(&format!("copied {i}"), i).with_note("tab\there"))
        .collect();
    let copied = writer
        .copy_from_records(&mut loaded, &CopyOptions::default(), &opts)
        .expect("copy from");
    assert_eq!(copied.count(), 25);

    let tag = loaded[0].bm_create_uuid.expect("tagged");
    let tagged = store
        .select(
            Widget::schema(),
            &Filter::Tags {
                column: "bm_create_uuid".to_string(),
                tags: vec![tag],
            },
        )
        .expect("select by tag");
    assert_eq!(tagged.len(), 25);
    assert!(tagged
        .iter()
        .all(|row| row.get("note") == Some(&FieldValue::from("tab\there"))));

    let unloaded = writer.copy_to_records::<Widget>(&[]).expect("copy to");
    assert_eq!(unloaded.len(), 125);
    assert_eq!(unloaded.iter().filter(|w| !w.active).count(), 100);

    writer.reset_connection().expect("reset");
    writer.ensure_connected().expect("reconnect");

    drop(writer);
    drop(store);
    runtime.block_on(test_db.close()).expect("close test database");
}

#[test]
fn postgres_update_fields_splits_past_bind_limit() {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let test_db = match runtime.block_on(TestDatabase::new()) {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping postgres store test: {err}");
            return;
        }
    };
    runtime
        .block_on(test_db.execute_all(&[WIDGETS_DDL]))
        .expect("create widgets table");

    let pool = test_db.pool().expect("pool").clone();
    let store = Arc::new(PgStore::new(pool, runtime.handle().clone()));
    let writer = BulkWriter::new(store.clone(), BulkConfig::default());
    let quiet = WriteOptions::new().send_signals(false);

    // one conditional column binds two parameters per row: 70 000 > 65 535
    let mut records: Vec<Widget> = (0..35_000)
        .map(|i| Widget::new(&format!("bulk {i}"), 0))
        .collect();
    writer
        .bulk_create(&mut records, None, &quiet)
        .expect("bulk create");

    for (index, record) in records.iter_mut().enumerate() {
        record.quantity = index as i64 + 1;
    }
    let set = WorkingSet::new(records);
    let updated = writer
        .update_fields(&set, &["quantity"], &quiet)
        .expect("update fields past the bind limit");
    assert_eq!(updated.count(), 35_000);

    let fetched = writer
        .fetch::<Widget>(&set.identifiers().expect("ids"))
        .expect("fetch");
    let by_id: HashMap<RecordId, i64> = fetched
        .iter()
        .map(|w| (w.id.expect("stored id"), w.quantity))
        .collect();
    for record in set.iter() {
        assert_eq!(by_id[&record.id.expect("created id")], record.quantity);
    }

    drop(writer);
    drop(store);
    runtime.block_on(test_db.close()).expect("close test database");
}

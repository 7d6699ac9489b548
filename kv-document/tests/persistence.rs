use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kv_document::{
    AttributeValue, Backoff, BackoffStrategy, Config, CustomType, DB, Document, Error, Event,
    FieldType, HookResult, MemoryBackend, ModelSchema, Registry, SaveOptions, SchemaBuilder,
    TypeRegistry, UPDATED_AT, Value, attrs,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn db_with(backend: Arc<MemoryBackend>, config: Config, schemas: Vec<SchemaBuilder>) -> DB {
    init_logger();
    let registry = schemas
        .into_iter()
        .fold(Registry::builder(), |builder, schema| builder.register(schema))
        .build()
        .unwrap();
    DB::new(backend, config.namespace("test"), registry)
}

fn user() -> SchemaBuilder {
    ModelSchema::builder("User")
        .hash_key("id", FieldType::String)
        .field("name", FieldType::String)
        .field("visits", FieldType::Integer)
}

fn person() -> SchemaBuilder {
    ModelSchema::builder("Person")
        .hash_key("id", FieldType::String)
        .range_key("age", FieldType::Integer)
        .field("name", FieldType::String)
        .field("score", FieldType::Integer)
        .lock_version()
}

async fn stored_lock(db: &DB, document: &Document) -> i64 {
    let table = db.table(document.model_name()).unwrap();
    table.find(document.key().unwrap()).await.unwrap().lock_version().unwrap()
}

#[tokio::test]
async fn create_then_find() {
    let db = db_with(Arc::new(MemoryBackend::new()), Config::default(), vec![user()]);
    let users = db.table("User").unwrap();

    let created = users.create(attrs! { "name" => "Alex" }).await.unwrap();
    assert!(created.is_persisted());
    assert!(!created.is_changed());
    assert!(created.hash_value().is_some());

    let found = users.find(created.key().unwrap()).await.unwrap();
    assert_eq!(found.get("name"), Some(&Value::from("Alex")));
    assert!(found.is_persisted());
    assert!(found.get("created_at").is_some());
    assert!(found.get(UPDATED_AT).is_some());
}

#[tokio::test]
async fn missing_table_is_created_on_first_save() {
    let backend = Arc::new(MemoryBackend::new());
    let db = db_with(backend.clone(), Config::default(), vec![user()]);
    let users = db.table("User").unwrap();

    users.create(attrs! { "id" => "u1", "name" => "Alex" }).await.unwrap();
    assert_eq!(backend.calls("create_table"), 1);
    assert_eq!(backend.calls("put_item"), 2);
    assert!(users.exists("u1").await.unwrap());

    let strict = db_with(
        Arc::new(MemoryBackend::new()),
        Config::default().create_table_on_save(false),
        vec![user()],
    );
    let result = strict.table("User").unwrap().create(attrs! { "name" => "Alex" }).await;
    assert!(matches!(result, Err(Error::Backend(e)) if e.is_resource_not_found()));
}

#[tokio::test]
async fn upsert_creates_a_missing_table() {
    let backend = Arc::new(MemoryBackend::new());
    let db = db_with(backend.clone(), Config::default(), vec![user()]);
    let users = db.table("User").unwrap();

    let upserted = users
        .upsert("u1", attrs! { "name" => "Alex" }, attrs! {})
        .await
        .unwrap()
        .unwrap();
    assert_eq!(upserted.get("name"), Some(&Value::from("Alex")));
    assert_eq!(backend.calls("create_table"), 1);
    assert_eq!(backend.calls("update_item"), 2);
    assert!(users.exists("u1").await.unwrap());
}

#[tokio::test]
async fn duplicate_keys_are_not_unique() {
    let db = db_with(Arc::new(MemoryBackend::new()), Config::default(), vec![user()]);
    let users = db.table("User").unwrap();
    users.create(attrs! { "id" => "u1", "name" => "Alex" }).await.unwrap();

    let again = users.create(attrs! { "id" => "u1", "name" => "Bob" }).await;
    assert!(matches!(again, Err(Error::RecordNotUnique(_))));
    let stored = users.find("u1").await.unwrap();
    assert_eq!(stored.get("name"), Some(&Value::from("Alex")));
}

#[tokio::test]
async fn failed_create_leaves_the_document_new() {
    let db = db_with(Arc::new(MemoryBackend::new()), Config::default(), vec![person()]);
    let people = db.table("Person").unwrap();
    people.create(attrs! { "id" => "p1", "age" => 30 }).await.unwrap();

    let mut doc = people.build(attrs! { "id" => "p1", "age" => 30, "name" => "Bo" }).unwrap();
    assert!(matches!(
        people.save(&mut doc).await,
        Err(Error::RecordNotUnique(_))
    ));
    assert!(doc.is_new_record());
    assert_eq!(doc.lock_version(), None);
    assert!(doc.get("created_at").is_none());
    assert!(doc.get(UPDATED_AT).is_none());

    doc.set("id", "p2").unwrap();
    assert!(people.save(&mut doc).await.unwrap());
    assert_eq!(doc.lock_version(), Some(1));
    assert_eq!(stored_lock(&db, &doc).await, 1);
}

#[tokio::test]
async fn saving_unchanged_documents_writes_nothing() {
    let backend = Arc::new(MemoryBackend::new());
    let db = db_with(backend.clone(), Config::default(), vec![user()]);
    let users = db.table("User").unwrap();
    let mut doc = users.create(attrs! { "id" => "u1", "name" => "Alex" }).await.unwrap();
    backend.reset_calls();

    assert!(users.save(&mut doc).await.unwrap());
    assert_eq!(backend.calls("update_item"), 0);
    assert_eq!(backend.calls("put_item"), 0);

    let mut found = users.find("u1").await.unwrap();
    assert!(users.save(&mut found).await.unwrap());
    assert_eq!(backend.calls("update_item") + backend.calls("put_item"), 0);
}

#[tokio::test]
async fn custom_types_come_from_the_registry_builder() {
    init_logger();
    let money = CustomType::new(
        "money",
        |value| match value {
            Value::Integer(cents) => Ok(AttributeValue::S(format!("{}c", cents))),
            other => Err(Error::TypeMismatch {
                attribute: "money".into(),
                expected: "cents".into(),
                value: format!("{:?}", other),
            }),
        },
        |value| match value {
            AttributeValue::S(s) => s
                .trim_end_matches('c')
                .parse()
                .map(Value::Integer)
                .map_err(|_| Error::TypeMismatch {
                    attribute: "money".into(),
                    expected: "cents".into(),
                    value: s.clone(),
                }),
            other => Err(Error::TypeMismatch {
                attribute: "money".into(),
                expected: "cents".into(),
                value: format!("{:?}", other),
            }),
        },
    );
    let account = || {
        ModelSchema::builder("Account")
            .hash_key("id", FieldType::String)
            .field("balance", FieldType::Named("money".into()))
    };
    assert!(matches!(
        Registry::builder().register(account()).build(),
        Err(Error::UnknownType(name)) if name == "money"
    ));

    let registry = Registry::builder()
        .types(TypeRegistry::default().register(money))
        .register(account())
        .build()
        .unwrap();
    let db = DB::new(Arc::new(MemoryBackend::new()), Config::default(), registry);
    let accounts = db.table("Account").unwrap();
    accounts
        .create(attrs! { "id" => "a1", "balance" => 250 })
        .await
        .unwrap();
    let found = accounts.find("a1").await.unwrap();
    assert_eq!(found.get("balance"), Some(&Value::Integer(250)));
}

#[tokio::test]
async fn concurrent_handles_conflict_on_save() {
    let db = db_with(Arc::new(MemoryBackend::new()), Config::default(), vec![person()]);
    let people = db.table("Person").unwrap();
    let alex = people
        .create(attrs! { "name" => "Alex", "age" => 21 })
        .await
        .unwrap();
    assert_eq!(alex.lock_version(), Some(1));
    let key = alex.key().unwrap();

    let mut first = people.find(key.clone()).await.unwrap();
    let mut second = people.find(key.clone()).await.unwrap();
    first.set("name", "Bob").unwrap();
    assert!(people.save(&mut first).await.unwrap());

    second.set("name", "Carl").unwrap();
    let result = people.save(&mut second).await;
    assert!(matches!(result, Err(Error::StaleObjectError(_))));

    let stored = people.find(key).await.unwrap();
    assert_eq!(stored.get("name"), Some(&Value::from("Bob")));
    assert_eq!(stored.lock_version(), Some(2));
}

#[tokio::test]
async fn every_write_bumps_the_lock_by_one() {
    let db = db_with(Arc::new(MemoryBackend::new()), Config::default(), vec![person()]);
    let people = db.table("Person").unwrap();
    let mut doc = people
        .create(attrs! { "id" => "p1", "age" => 30, "score" => 1 })
        .await
        .unwrap();
    assert_eq!(stored_lock(&db, &doc).await, 1);

    doc.set("name", "Dana").unwrap();
    assert!(people.save(&mut doc).await.unwrap());
    assert_eq!(stored_lock(&db, &doc).await, 2);

    assert!(people.update(&mut doc, |u| u.set("name", "Eve").map(|_| ())).await.unwrap());
    assert_eq!(doc.lock_version(), Some(3));
    assert_eq!(stored_lock(&db, &doc).await, 3);

    people.increment(&mut doc, "score", 5).await.unwrap();
    assert_eq!(doc.get("score"), Some(&Value::Integer(6)));
    assert_eq!(stored_lock(&db, &doc).await, 4);

    people.decrement(&mut doc, "score", 2).await.unwrap();
    assert_eq!(doc.lock_version(), Some(5));
    assert_eq!(stored_lock(&db, &doc).await, 5);

    // saving without changes writes nothing
    assert!(people.save(&mut doc).await.unwrap());
    assert_eq!(stored_lock(&db, &doc).await, 5);
}

#[tokio::test]
async fn stale_update_leaves_item_untouched() {
    let db = db_with(Arc::new(MemoryBackend::new()), Config::default(), vec![person()]);
    let people = db.table("Person").unwrap();
    let mut stale = people
        .create(attrs! { "id" => "p1", "age" => 30, "name" => "Ann" })
        .await
        .unwrap();
    let mut fresh = people.find(stale.key().unwrap()).await.unwrap();
    people
        .update_attributes(&mut fresh, attrs! { "name" => "Bea" })
        .await
        .unwrap();

    let updated = people
        .update(&mut stale, |u| u.set("name", "Cid").map(|_| ()))
        .await
        .unwrap();
    assert!(!updated);
    let strict = people
        .update_strict(&mut stale, |u| u.set("name", "Cid").map(|_| ()))
        .await;
    assert!(matches!(strict, Err(Error::StaleObjectError(_))));

    let stored = people.find(stale.key().unwrap()).await.unwrap();
    assert_eq!(stored.get("name"), Some(&Value::from("Bea")));
    assert_eq!(stored.lock_version(), Some(2));
}

#[tokio::test]
async fn deleting_twice_succeeds() {
    let db = db_with(Arc::new(MemoryBackend::new()), Config::default(), vec![user()]);
    db.create_tables().await.unwrap();
    let users = db.table("User").unwrap();

    users.delete_key("ghost").await.unwrap();
    users.delete_key("ghost").await.unwrap();

    let mut doc = users.create(attrs! { "name" => "Alex" }).await.unwrap();
    users.delete(&mut doc).await.unwrap();
    assert!(doc.is_destroyed());
    users.delete(&mut doc).await.unwrap();
    assert!(!users.exists(doc.key().unwrap()).await.unwrap());
}

#[tokio::test]
async fn delete_checks_the_lock_of_existing_items() {
    let db = db_with(Arc::new(MemoryBackend::new()), Config::default(), vec![person()]);
    let people = db.table("Person").unwrap();
    let mut stale = people.create(attrs! { "id" => "p1", "age" => 3 }).await.unwrap();
    let mut fresh = people.find(stale.key().unwrap()).await.unwrap();
    people.update_attribute(&mut fresh, "name", "Zed").await.unwrap();

    assert!(matches!(
        people.delete(&mut stale).await,
        Err(Error::StaleObjectError(_))
    ));
    people.delete(&mut fresh).await.unwrap();
    // the item is gone, so the stale copy deletes cleanly
    people.delete(&mut stale).await.unwrap();
}

#[tokio::test]
async fn import_writes_one_batch_without_validation() {
    let backend = Arc::new(MemoryBackend::new());
    let schema = ModelSchema::builder("Address")
        .hash_key("id", FieldType::String)
        .field("city", FieldType::String)
        .validate(|_| Err("always invalid".to_string()));
    let db = db_with(backend.clone(), Config::default(), vec![schema]);
    db.create_tables().await.unwrap();
    backend.reset_calls();

    let addresses = db.table("Address").unwrap();
    let imported = addresses
        .import(vec![
            attrs! { "city" => "Chicago" },
            attrs! { "city" => "New York" },
        ])
        .await
        .unwrap();

    assert_eq!(backend.calls("batch_write_item"), 1);
    assert_eq!(backend.calls("put_item"), 0);
    assert_eq!(imported.len(), 2);
    for document in &imported {
        assert!(document.is_persisted());
        assert!(!document.is_changed());
    }
    assert_eq!(addresses.all().count().await.unwrap(), 2);
}

#[tokio::test]
async fn validation_failures_skip_the_backend() {
    let backend = Arc::new(MemoryBackend::new());
    let schema = user().validate(|document| match document.get("name") {
        Some(_) => Ok(()),
        None => Err("name is required".to_string()),
    });
    let db = db_with(backend.clone(), Config::default(), vec![schema]);
    let users = db.table("User").unwrap();

    let mut doc = users.build(attrs! {}).unwrap();
    assert!(!users.save(&mut doc).await.unwrap());
    assert!(doc.is_new_record());
    assert!(matches!(
        users.create_strict(attrs! {}).await,
        Err(Error::DocumentNotValid(errors)) if errors == vec!["name is required".to_string()]
    ));
    assert_eq!(backend.calls("put_item"), 0);

    assert!(
        users
            .save_with(&mut doc, SaveOptions::default().skip_validation())
            .await
            .unwrap()
    );
    assert!(doc.is_persisted());
}

#[tokio::test]
async fn hooks_nest_save_around_create_around_validation() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut schema = user();
    for (event, label) in [
        (Event::Save, "save"),
        (Event::Create, "create"),
        (Event::Update, "update"),
        (Event::Validation, "validation"),
    ] {
        let before = log.clone();
        let after = log.clone();
        schema = schema
            .before(event, move |_| {
                before.lock().unwrap().push(format!("before_{}", label));
                HookResult::Continue
            })
            .after(event, move |_| after.lock().unwrap().push(format!("after_{}", label)));
    }
    let db = db_with(Arc::new(MemoryBackend::new()), Config::default(), vec![schema]);
    let users = db.table("User").unwrap();

    let mut doc = users.create(attrs! { "name" => "Alex" }).await.unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "before_save",
            "before_create",
            "before_validation",
            "after_validation",
            "after_create",
            "after_save",
        ]
    );

    log.lock().unwrap().clear();
    doc.set("name", "Bob").unwrap();
    users.save(&mut doc).await.unwrap();
    assert_eq!(log.lock().unwrap()[1], "before_update");

    log.lock().unwrap().clear();
    doc.set("name", "Cy").unwrap();
    users
        .save_with(&mut doc, SaveOptions::default().skip_callbacks())
        .await
        .unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["before_validation", "after_validation"]);
}

#[tokio::test]
async fn aborting_hooks_stop_the_operation() {
    let backend = Arc::new(MemoryBackend::new());
    let schema = user()
        .before(Event::Create, |document| {
            if document.get("name") == Some(&Value::from("blocked")) {
                HookResult::Abort
            } else {
                HookResult::Continue
            }
        })
        .before(Event::Destroy, |_| HookResult::Abort);
    let db = db_with(backend.clone(), Config::default(), vec![schema]);
    let users = db.table("User").unwrap();

    let blocked = users.create(attrs! { "name" => "blocked" }).await.unwrap();
    assert!(blocked.is_new_record());
    assert!(matches!(
        users.create_strict(attrs! { "name" => "blocked" }).await,
        Err(Error::RecordNotSaved(_))
    ));
    assert_eq!(backend.calls("put_item"), 0);

    let mut doc = users.create(attrs! { "name" => "kept" }).await.unwrap();
    assert!(!users.destroy(&mut doc).await.unwrap());
    assert!(matches!(
        users.destroy_strict(&mut doc).await,
        Err(Error::RecordNotDestroyed(_))
    ));
    assert!(doc.is_persisted());
    assert_eq!(backend.calls("delete_item"), 0);
    assert!(users.exists(doc.key().unwrap()).await.unwrap());
}

#[tokio::test]
async fn key_level_writes() {
    let db = db_with(Arc::new(MemoryBackend::new()), Config::default(), vec![user()]);
    db.create_tables().await.unwrap();
    let users = db.table("User").unwrap();

    let missing = users
        .update_fields("u1", attrs! { "name" => "Alex" }, attrs! {})
        .await
        .unwrap();
    assert!(missing.is_none());
    assert!(!users.exists("u1").await.unwrap());

    let created = users
        .upsert("u1", attrs! { "name" => "Alex", "visits" => 1 }, attrs! {})
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.get("name"), Some(&Value::from("Alex")));

    let refused = users
        .update_fields("u1", attrs! { "name" => "Bob" }, attrs! { "visits.gt" => 5 })
        .await
        .unwrap();
    assert!(refused.is_none());

    users.inc("u1", attrs! { "visits" => 2 }).await.unwrap();
    let updated = users
        .update_fields("u1", attrs! { "name" => "Bob" }, attrs! { "visits" => 3 })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.get("name"), Some(&Value::from("Bob")));
    assert_eq!(updated.get("visits"), Some(&Value::Integer(3)));

    assert!(matches!(
        users.inc("ghost", attrs! { "visits" => 1 }).await,
        Err(Error::RecordNotFound { .. })
    ));
}

#[tokio::test]
async fn reload_discards_local_changes() {
    let db = db_with(Arc::new(MemoryBackend::new()), Config::default(), vec![user()]);
    let users = db.table("User").unwrap();
    let mut doc = users.create(attrs! { "name" => "Alex" }).await.unwrap();

    doc.set("name", "Changed").unwrap();
    assert!(doc.is_changed());
    users.reload(&mut doc).await.unwrap();
    assert!(!doc.is_changed());
    assert_eq!(doc.get("name"), Some(&Value::from("Alex")));

    let mut ghost = users.build(attrs! { "id" => "ghost" }).unwrap();
    assert!(matches!(
        users.reload(&mut ghost).await,
        Err(Error::RecordNotFound { .. })
    ));
}

#[tokio::test]
async fn touch_stamps_without_bumping_the_lock() {
    let db = db_with(
        Arc::new(MemoryBackend::new()),
        Config::default(),
        vec![person().field("seen_at", FieldType::DateTime)],
    );
    let people = db.table("Person").unwrap();
    let mut doc = people.create(attrs! { "id" => "p1", "age" => 1 }).await.unwrap();

    people.touch(&mut doc, &["seen_at"]).await.unwrap();
    assert!(doc.get("seen_at").is_some());
    let stored = people.find(doc.key().unwrap()).await.unwrap();
    assert_eq!(stored.get("seen_at"), doc.get("seen_at"));
    assert_eq!(stored.lock_version(), Some(1));
}

struct Counting(Arc<AtomicUsize>);

impl BackoffStrategy for Counting {
    fn start(&self) -> Box<dyn Backoff> {
        Box::new(Counting(self.0.clone()))
    }
}

impl Backoff for Counting {
    fn next_delay(&mut self) -> Duration {
        self.0.fetch_add(1, Ordering::SeqCst);
        Duration::ZERO
    }
}

#[tokio::test]
async fn unprocessed_batch_items_are_retried_with_backoff() {
    let rounds = Arc::new(AtomicUsize::new(0));
    let backend = Arc::new(MemoryBackend::with_batch_capacity(2));
    let config = Config::default()
        .register_backoff("counting", Arc::new(Counting(rounds.clone())))
        .backoff("counting");
    let db = db_with(backend.clone(), config, vec![user()]);
    db.create_tables().await.unwrap();
    let users = db.table("User").unwrap();

    let records = (0..5).map(|i| attrs! { "id" => format!("u{}", i) }).collect();
    users.import(records).await.unwrap();
    assert_eq!(backend.calls("batch_write_item"), 3);
    assert_eq!(rounds.load(Ordering::SeqCst), 2);

    let found = users
        .find_all(["u0", "u1", "u2", "u3", "u4", "missing"])
        .await
        .unwrap();
    assert_eq!(found.len(), 5);
    assert_eq!(backend.calls("batch_get_item"), 3);
    assert_eq!(rounds.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn unknown_backoff_is_an_error() {
    let db = db_with(
        Arc::new(MemoryBackend::new()),
        Config::default().backoff("nope"),
        vec![user()],
    );
    let users = db.table("User").unwrap();
    assert!(matches!(
        users.find_all(["u1"]).await,
        Err(Error::UnknownBackoff(name)) if name == "nope"
    ));
}

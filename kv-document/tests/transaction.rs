use std::sync::{Arc, Mutex};

use kv_document::{
    BackendError, Config, DB, Error, Event, FieldType, MemoryBackend, ModelSchema, Registry,
    Value, attrs,
};

async fn setup() -> (DB, Arc<MemoryBackend>, Arc<Mutex<Vec<String>>>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let events = Arc::new(Mutex::new(Vec::new()));
    let saved = events.clone();
    let destroyed = events.clone();
    let account = ModelSchema::builder("Account")
        .hash_key("id", FieldType::String)
        .field("balance", FieldType::Integer)
        .lock_version()
        .validate(|document| match document.get("balance").and_then(Value::as_i64) {
            Some(balance) if balance < 0 => Err("balance cannot be negative".to_string()),
            _ => Ok(()),
        })
        .after(Event::Save, move |document| {
            saved.lock().unwrap().push(format!("saved {}", document.hash_value().unwrap()));
        })
        .after(Event::Destroy, move |document| {
            destroyed
                .lock()
                .unwrap()
                .push(format!("destroyed {}", document.hash_value().unwrap()));
        });
    let ledger = ModelSchema::builder("Entry")
        .hash_key("account", FieldType::String)
        .range_key("seq", FieldType::Integer)
        .field("amount", FieldType::Integer);

    let backend = Arc::new(MemoryBackend::new());
    let registry = Registry::builder()
        .register(account)
        .register(ledger)
        .build()
        .unwrap();
    let db = DB::new(backend.clone(), Config::default().namespace("test"), registry);
    db.create_tables().await.unwrap();
    (db, backend, events)
}

#[tokio::test]
async fn commit_writes_everything_in_one_call() {
    let (db, backend, events) = setup().await;
    let accounts = db.table("Account").unwrap();
    let entries = db.table("Entry").unwrap();
    let mut alice = accounts
        .create(attrs! { "id" => "alice", "balance" => 100 })
        .await
        .unwrap();
    let closed = accounts
        .create(attrs! { "id" => "closed", "balance" => 0 })
        .await
        .unwrap();
    events.lock().unwrap().clear();
    backend.reset_calls();

    let mut transaction = db.transaction();
    alice.set("balance", 70).unwrap();
    assert!(transaction.save(&accounts, alice).unwrap());
    assert!(
        transaction
            .create(&accounts, attrs! { "id" => "bob", "balance" => 30 })
            .unwrap()
    );
    transaction
        .upsert(&entries, ("alice", 1), attrs! { "amount" => -30 })
        .unwrap();
    assert!(transaction.destroy(&accounts, closed).unwrap());
    assert_eq!(transaction.len(), 4);
    // after hooks wait for the commit
    assert!(events.lock().unwrap().is_empty());

    let documents = transaction.commit().await.unwrap();
    assert_eq!(backend.calls("transact_write_items"), 1);
    assert_eq!(backend.calls("put_item") + backend.calls("update_item"), 0);
    assert_eq!(documents.len(), 3);
    assert!(documents[0].is_persisted() && !documents[0].is_changed());
    assert_eq!(documents[0].lock_version(), Some(2));
    assert!(documents[1].is_persisted());
    assert!(documents[2].is_destroyed());
    assert_eq!(
        *events.lock().unwrap(),
        vec!["saved alice", "saved bob", "destroyed closed"]
    );

    let alice = accounts.find("alice").await.unwrap();
    assert_eq!(alice.get("balance"), Some(&Value::Integer(70)));
    assert_eq!(alice.lock_version(), Some(2));
    assert!(accounts.exists("bob").await.unwrap());
    assert!(!accounts.exists("closed").await.unwrap());
    let entry = entries.find(("alice", 1)).await.unwrap();
    assert_eq!(entry.get("amount"), Some(&Value::Integer(-30)));
}

#[tokio::test]
async fn a_failed_condition_cancels_every_action() {
    let (db, _, events) = setup().await;
    let accounts = db.table("Account").unwrap();
    accounts
        .create(attrs! { "id" => "alice", "balance" => 100 })
        .await
        .unwrap();
    events.lock().unwrap().clear();

    let mut transaction = db.transaction();
    transaction
        .create(&accounts, attrs! { "id" => "carol", "balance" => 5 })
        .unwrap();
    transaction
        .update_fields(&accounts, "ghost", attrs! { "balance" => 1 })
        .unwrap();
    let result = transaction.commit().await;
    assert!(matches!(
        result,
        Err(Error::Backend(BackendError::TransactionCanceled(reasons)))
            if reasons[0].is_none() && reasons[1].is_some()
    ));
    assert!(!accounts.exists("carol").await.unwrap());
    assert!(!accounts.exists("ghost").await.unwrap());
    assert!(events.lock().unwrap().is_empty());

    // a failed commit still closes the transaction
    assert!(matches!(
        transaction.commit().await,
        Err(Error::TransactionCommitted)
    ));
}

#[tokio::test]
async fn stale_documents_cancel_the_commit() {
    let (db, _, _) = setup().await;
    let accounts = db.table("Account").unwrap();
    let mut stale = accounts
        .create(attrs! { "id" => "alice", "balance" => 100 })
        .await
        .unwrap();
    let mut fresh = accounts.find("alice").await.unwrap();
    accounts
        .update_attributes(&mut fresh, attrs! { "balance" => 90 })
        .await
        .unwrap();

    let mut transaction = db.transaction();
    stale.set("balance", 10).unwrap();
    transaction.save(&accounts, stale).unwrap();
    assert!(transaction.commit().await.is_err());
    let stored = accounts.find("alice").await.unwrap();
    assert_eq!(stored.get("balance"), Some(&Value::Integer(90)));
}

#[tokio::test]
async fn invalid_actions_are_rejected_at_registration() {
    let (db, backend, _) = setup().await;
    let accounts = db.table("Account").unwrap();
    backend.reset_calls();

    let mut transaction = db.transaction();
    assert!(
        !transaction
            .create(&accounts, attrs! { "id" => "neg", "balance" => -1 })
            .unwrap()
    );
    assert!(matches!(
        transaction.create_strict(&accounts, attrs! { "id" => "neg", "balance" => -1 }),
        Err(Error::DocumentNotValid(_))
    ));
    assert!(transaction.is_empty());

    assert!(transaction.commit().await.unwrap().is_empty());
    assert_eq!(backend.calls("transact_write_items"), 0);
}

#[tokio::test]
async fn committed_transactions_refuse_more_work() {
    let (db, _, _) = setup().await;
    let accounts = db.table("Account").unwrap();

    let mut transaction = db.transaction();
    transaction.delete_key(&accounts, "nobody").unwrap();
    transaction.commit().await.unwrap();

    assert!(matches!(
        transaction.create(&accounts, attrs! { "balance" => 1 }),
        Err(Error::TransactionCommitted)
    ));
    assert!(matches!(
        transaction.commit().await,
        Err(Error::TransactionCommitted)
    ));
}

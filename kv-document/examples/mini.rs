use chrono::Utc;
use futures::TryStreamExt;
use kv_document::{Config, DB, Error, KvDocument, Model, Registry, attrs};

#[derive(KvDocument, Debug, Clone)]
#[kv(lock_version)]
#[kv(index(global, hash = "kind", range = "created_at", projection = "all"))]
pub struct Order {
    #[kv(hash_key)]
    pub id: String,
    pub kind: String,
    pub total: i64,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();
    let registry = Registry::builder().discover().build()?;
    let db = DB::connect(
        vec!["127.0.0.1:2379".to_string()],
        Config::default().namespace("mini"),
        registry,
    )
    .await?;
    db.create_tables().await?;

    let orders = Order::table(&db)?;
    let since = Utc::now();
    let mut order = orders
        .create_strict(attrs! { "kind" => "retail", "total" => 120 })
        .await?;
    orders.increment(&mut order, "total", 30).await?;

    let mut recent = orders
        .all()
        .where_("kind", "retail")?
        .where_("created_at.gte", since)?
        .stream();
    while let Some(document) = recent.try_next().await? {
        println!("{:?}", document.to_model::<Order>()?);
    }

    orders.destroy(&mut order).await?;
    Ok(())
}

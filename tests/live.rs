//! Round-trips against a real Redis server at 127.0.0.1:6379.
//!
//! Run with `cargo test -- --ignored`.

use bytes::Bytes;
use redpipe::{Message, Pool, Value};

const URL: &str = "redis://127.0.0.1:6379/";

#[tokio::test]
#[ignore]
async fn test_set_get_roundtrip() {
    let pool = Pool::new(URL).unwrap();
    let mut db = pool.db();
    db.set("redpipe:live:k", "value").await.unwrap();
    let value = db.get("redpipe:live:k").strdecode().await.unwrap();
    assert_eq!(value, Value::Str("value".to_string()));
    db.del(["redpipe:live:k"]).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_autodecode_json_document() {
    let pool = Pool::new(URL).unwrap();
    let mut db = pool.db();
    let value = db
        .set("redpipe:live:number", 10i64)
        .set(
            "redpipe:live:json",
            serde_json::json!({"foo": 123, "bar": [1, 2, 3]}),
        )
        .get("redpipe:live:json")
        .autodecode()
        .await
        .unwrap();
    let map = value.as_map().expect("expected a decoded document");
    assert_eq!(map["foo"], Value::Int(123));
    db.del(["redpipe:live:number", "redpipe:live:json"])
        .await
        .unwrap();
}

#[tokio::test]
#[ignore]
async fn test_watched_key_change_discards_transaction() {
    let pool = Pool::new(URL).unwrap();

    let mut a = pool.db();
    a.set("redpipe:live:foo", "bar").await.unwrap();
    let current = a.watch(["redpipe:live:foo"]).get("redpipe:live:foo").await.unwrap();
    assert_eq!(current, Value::Bytes(Bytes::from("bar")));

    // A second connection changes the watched key before EXEC.
    let mut b = pool.db();
    b.set("redpipe:live:foo", "X").await.unwrap();

    let outcome = a
        .multi()
        .set("redpipe:live:foo", "BAR")
        .exec()
        .await
        .unwrap();
    assert_eq!(outcome, Value::Bool(false));

    let mut db = pool.db();
    db.del(["redpipe:live:foo"]).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_pubsub_roundtrip() {
    let pool = Pool::new(URL).unwrap();
    let mut pubsub = pool.pubsub(["redpipe:live:chan1"]);
    pubsub.strdecode().with_channel();

    // Subscribe before publishing.
    let receiver = tokio::spawn(async move { pubsub.next().await });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let mut db = pool.db();
    db.publish("redpipe:live:chan1", "hi").await.unwrap();

    let message = receiver.await.unwrap().unwrap();
    assert_eq!(
        message,
        Message::Channel("redpipe:live:chan1".to_string(), Value::Str("hi".to_string()))
    );
}

#[tokio::test]
#[ignore]
async fn test_hash_roundtrip() {
    let pool = Pool::new(URL).unwrap();
    let mut db = pool.db();
    db.del(["redpipe:live:hash"]).await.unwrap();
    db.hset(
        "redpipe:live:hash",
        [("field1", "text"), ("field2", "more")],
    )
    .await
    .unwrap();

    let value = db.hgetall("redpipe:live:hash").strdecode().await.unwrap();
    let map = value.as_map().unwrap();
    assert_eq!(map["field1"], Value::Str("text".to_string()));
    assert_eq!(map["field2"], Value::Str("more".to_string()));
    db.del(["redpipe:live:hash"]).await.unwrap();
}

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use redpipe::{Error, Pool, Value};
use support::{cmd, expect_request, listen, reply};

#[tokio::test]
async fn broken_connection_is_not_pooled_and_a_fresh_one_is_dialed() {
    let (listener, url) = listen().await;
    let accepts = Arc::new(AtomicUsize::new(0));
    let accepts_counted = Arc::clone(&accepts);

    let server = tokio::spawn(async move {
        // First connection: half a reply, then a hard close mid-batch.
        let (mut server, _) = listener.accept().await.unwrap();
        accepts_counted.fetch_add(1, Ordering::SeqCst);
        expect_request(&mut server, &cmd(&[b"GET", b"k"])).await;
        reply(&mut server, b"$5\r\nhe").await;
        drop(server);

        // The pool dials a replacement for the next run.
        let (mut server, _) = listener.accept().await.unwrap();
        accepts_counted.fetch_add(1, Ordering::SeqCst);
        expect_request(&mut server, &cmd(&[b"GET", b"k"])).await;
        reply(&mut server, b"$1\r\nv\r\n").await;
    });

    let pool = Pool::new(&url).unwrap();
    let mut db = pool.db();
    let err = db.get("k").await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }));

    let mut db = pool.db();
    let value = db.get("k").await.unwrap();
    assert_eq!(value, Value::Bytes(Bytes::from("v")));

    server.await.unwrap();
    assert_eq!(accepts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn clean_connections_are_reused() {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        // One accept only: both facades run over the same socket.
        let (mut server, _) = listener.accept().await.unwrap();
        for _ in 0..2 {
            expect_request(&mut server, &cmd(&[b"PING"])).await;
            reply(&mut server, b"+PONG\r\n").await;
        }
    });

    let pool = Pool::new(&url).unwrap();
    for _ in 0..2 {
        let mut db = pool.db();
        db.ping().await.unwrap();
    }
    server.await.unwrap();
}

#[tokio::test]
async fn pool_size_bounds_concurrent_connections() {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let (mut server, _) = listener.accept().await.unwrap();
        expect_request(&mut server, &cmd(&[b"PING"])).await;
        reply(&mut server, b"+PONG\r\n").await;
        // Held pinned by the first facade; the second facade must wait for
        // the slot, then gets a fresh connection once the first is dropped.
        let (mut server2, _) = listener.accept().await.unwrap();
        expect_request(&mut server2, &cmd(&[b"PING"])).await;
        reply(&mut server2, b"+PONG\r\n").await;
        drop(server);
    });

    let pool = Pool::with_size(&url, 1).unwrap();
    let mut held = pool.db();
    held.ping().prevent_pooling().await.unwrap();

    // The only slot is pinned, so a second run cannot start.
    let pool_for_task = pool.clone();
    let waiter = tokio::spawn(async move {
        let mut db = pool_for_task.db();
        db.ping().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    // Dropping the pinned facade closes its connection and frees the slot.
    drop(held);
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should proceed once the slot frees")
        .unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn closed_pool_rejects_acquire() {
    let (_listener, url) = listen().await;
    let pool = Pool::new(&url).unwrap();
    pool.close();

    let mut db = pool.db();
    let err = db.ping().await.unwrap_err();
    assert!(matches!(err, Error::PoolClosed));
}

#[tokio::test]
async fn prevent_pooling_keeps_connection_out_of_the_pool() {
    let (listener, url) = listen().await;
    let accepts = Arc::new(AtomicUsize::new(0));
    let accepts_counted = Arc::clone(&accepts);

    let server = tokio::spawn(async move {
        let (mut server, _) = listener.accept().await.unwrap();
        accepts_counted.fetch_add(1, Ordering::SeqCst);
        expect_request(&mut server, &cmd(&[b"PING"])).await;
        reply(&mut server, b"+PONG\r\n").await;

        let (mut server2, _) = listener.accept().await.unwrap();
        accepts_counted.fetch_add(1, Ordering::SeqCst);
        expect_request(&mut server2, &cmd(&[b"PING"])).await;
        reply(&mut server2, b"+PONG\r\n").await;
        drop(server);
    });

    let pool = Pool::new(&url).unwrap();
    let mut db = pool.db();
    db.ping().prevent_pooling().await.unwrap();
    drop(db);

    // The opted-out connection was closed, not pooled.
    let mut db = pool.db();
    db.ping().await.unwrap();

    server.await.unwrap();
    assert_eq!(accepts.load(Ordering::SeqCst), 2);
}

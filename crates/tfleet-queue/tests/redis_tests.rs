//! Redis broker integration tests.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;

use tfleet_models::{Job, JobUid, Params, QueueMessage};
use tfleet_queue::{Broker, EventBus, QueueClient, QueueConfig, QueueError, RedisBroker, RedisEventBus};

/// Config on fresh streams so runs don't see each other's messages.
fn config() -> QueueConfig {
    dotenvy::dotenv().ok();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    QueueConfig {
        stream_name: format!("tfleet-test:{}:jobs", suffix),
        consumer_group: format!("tfleet-test:{}:workers", suffix),
        dlq_stream_name: format!("tfleet-test:{}:dlq", suffix),
        block_timeout: Duration::from_millis(100),
        ..QueueConfig::from_env()
    }
}

fn message(uid: &str) -> QueueMessage {
    QueueMessage::new(Job::new(JobUid::from_string(uid), "image", Params::new()), "tfleet")
}

/// Test connection and queue depth.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    let client = QueueClient::new(RedisBroker::new(config()).expect("broker"), config());
    let count = client.count().await;
    assert_eq!(count, Some(0));
}

/// Test push then consume round trip with ack.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_push_consume_round_trip() {
    let config = config();
    let client = QueueClient::new(RedisBroker::new(config.clone()).expect("broker"), config);
    let sent = message("redis-u1");
    client.push(&sent).await.expect("push");
    assert_eq!(client.count().await, Some(1));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut received = Vec::new();
    client
        .consume(
            |message: QueueMessage| {
                received.push(message);
                let _ = shutdown_tx.send(true);
                async { Ok::<(), QueueError>(()) }
            },
            shutdown_rx,
        )
        .await
        .expect("consume");

    assert_eq!(received, vec![sent]);
    assert_eq!(client.count().await, Some(0));
}

/// Test rejection with and without requeue.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_reject_requeues_or_dead_letters() {
    let config = config();
    let mut broker = RedisBroker::new(config.clone()).expect("broker");
    broker.connect().await.expect("connect");

    let payload = message("redis-u2").to_json().expect("json");
    broker.publish(payload.clone()).await.expect("publish");

    let delivery = broker.pop().await.expect("pop").expect("delivery");
    assert_eq!(delivery.payload, payload);
    broker.reject(delivery.tag, true).await.expect("requeue");
    assert_eq!(broker.message_count().await.expect("count"), Some(1));

    let delivery = broker.pop().await.expect("pop").expect("delivery");
    assert_eq!(delivery.payload, payload);
    broker.reject(delivery.tag, false).await.expect("dead letter");
    assert_eq!(broker.message_count().await.expect("count"), Some(0));

    let redis = redis::Client::open(config.redis_url.as_str()).expect("client");
    let mut conn = redis.get_multiplexed_async_connection().await.expect("conn");
    let dead: u64 = redis::cmd("XLEN")
        .arg(&config.dlq_stream_name)
        .query_async(&mut conn)
        .await
        .expect("xlen");
    assert_eq!(dead, 1);
}

/// Test event bus publishing reaches subscribers.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_event_bus_publish() {
    let config = config();
    let channel = format!("tfleet-test.{}", uuid::Uuid::new_v4().simple());

    let redis = redis::Client::open(config.redis_url.as_str()).expect("client");
    let mut pubsub = redis.get_async_pubsub().await.expect("pubsub");
    pubsub.subscribe(&channel).await.expect("subscribe");

    let bus = RedisEventBus::new(&config.redis_url).expect("bus");
    bus.publish(&channel, "{\"uid\":\"u1\"}".to_string())
        .await
        .expect("publish");

    let mut messages = pubsub.on_message();
    let message = tokio::time::timeout(Duration::from_secs(2), messages.next())
        .await
        .expect("timed out")
        .expect("message");
    let payload: String = message.get_payload().expect("payload");
    assert_eq!(payload, "{\"uid\":\"u1\"}");
}

/// Test a delivery left unacked by a dead consumer goes to the next one.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_idle_pending_message_is_claimed() {
    let config = QueueConfig {
        claim_idle: Duration::from_millis(50),
        ..config()
    };
    let payload = message("redis-u3").to_json().expect("json");

    let mut crashed = RedisBroker::new(config.clone()).expect("broker").with_consumer_name("a");
    crashed.connect().await.expect("connect");
    crashed.publish(payload.clone()).await.expect("publish");
    let first = crashed.pop().await.expect("pop").expect("delivery");
    drop(crashed);

    let mut survivor = RedisBroker::new(config).expect("broker").with_consumer_name("b");
    survivor.connect().await.expect("connect");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let claimed = survivor.pop().await.expect("pop").expect("claimed delivery");
    assert_eq!(claimed.tag, first.tag);
    assert_eq!(claimed.payload, payload);

    survivor.ack(claimed.tag).await.expect("ack");
    assert_eq!(survivor.message_count().await.expect("count"), Some(0));
    assert!(survivor.pop().await.expect("pop").is_none());
}

/// Test unacked deliveries are not counted as waiting.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_count_excludes_delivered_messages() {
    let mut broker = RedisBroker::new(config()).expect("broker");
    broker.connect().await.expect("connect");
    broker.publish(message("redis-u4").to_json().expect("json")).await.expect("publish");
    broker.publish(message("redis-u5").to_json().expect("json")).await.expect("publish");

    let delivery = broker.pop().await.expect("pop").expect("delivery");
    assert_eq!(broker.message_count().await.expect("count"), Some(1));

    broker.ack(delivery.tag).await.expect("ack");
    assert_eq!(broker.message_count().await.expect("count"), Some(1));
}

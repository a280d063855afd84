use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use mom_producer::{
    //
    create_memory_transport_with_hub,
    ClientConfig,
    DeliveryError,
    DeliveryFailure,
    Error,
    MemoryHub,
    ProduceFailure,
    Producer,
    ProducerBuilder,
    Result,
    TopicConfig,
    TopicFailure,
};

fn producer_on(hub: &Arc<MemoryHub>, topic: &str) -> Result<Producer> {
    // ---
    let transport = create_memory_transport_with_hub(hub.clone());
    Producer::new(transport, topic, None, None)
}

#[tokio::test]
async fn test_send_then_flush() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    hub.set_manual_acks();
    let producer = producer_on(&hub, "orders")?;

    producer.send("hello", None)?;
    assert_eq!(producer.outstanding(), 1);

    hub.acknowledge_all();
    log::info!("test_send_then_flush: flushing");
    assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);
    assert_eq!(producer.outstanding(), 0);
    assert_eq!(hub.delivered("orders"), vec![Bytes::from_static(b"hello")]);

    Ok(())
}

#[tokio::test]
async fn test_flush_waits_for_latency() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    hub.set_ack_latency(Duration::from_millis(200));
    let producer = producer_on(&hub, "orders")?;

    for i in 0..10 {
        producer.send(format!("order-{i}"), None)?;
    }
    assert_eq!(producer.outstanding(), 10);

    let started = Instant::now();
    let remaining = producer.flush(Duration::from_secs(1)).await;
    let elapsed = started.elapsed();
    log::info!("test_flush_waits_for_latency: flushed in {elapsed:?}");

    assert_eq!(remaining, 0);
    assert!(elapsed < Duration::from_secs(1), "flush took {elapsed:?}");
    assert_eq!(hub.delivered("orders").len(), 10);

    Ok(())
}

#[tokio::test]
async fn test_rejected_send_is_not_outstanding() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    hub.set_manual_acks();
    let producer = producer_on(&hub, "orders")?;

    producer.send("first", None)?;
    hub.fail_next_produce(ProduceFailure::QueueFull);

    let result = producer.send("second", None);
    assert!(matches!(result, Err(Error::Send(ProduceFailure::QueueFull))));
    assert_eq!(producer.outstanding(), 1);

    // The rejected message still consumed its sequence number.
    assert_eq!(producer.last_sequence(), 2);

    Ok(())
}

#[tokio::test]
async fn test_drop_with_unacknowledged_messages() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    hub.set_manual_acks();
    let producer = producer_on(&hub, "orders")?;

    producer.send("a", None)?;
    producer.send("b", None)?;
    drop(producer);

    assert_eq!(hub.client_count(), 0);
    assert_eq!(hub.in_flight(), 0);
    assert_eq!(hub.acknowledge_all(), 0);

    // A fresh producer on the same hub is unaffected.
    let producer = producer_on(&hub, "orders")?;
    producer.send("c", None)?;
    hub.acknowledge_all();
    assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);

    Ok(())
}

#[tokio::test]
async fn test_flush_deadlines() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    hub.set_manual_acks();
    let producer = producer_on(&hub, "orders")?;
    producer.send("held", None)?;

    let started = Instant::now();
    assert_eq!(producer.flush(Duration::ZERO).await, 1);
    assert!(started.elapsed() < Duration::from_millis(50));

    let timeout = Duration::from_millis(250);
    let started = Instant::now();
    assert_eq!(producer.flush(timeout).await, 1);
    let elapsed = started.elapsed();
    assert!(elapsed >= timeout, "returned early after {elapsed:?}");
    assert!(elapsed < timeout + Duration::from_millis(200), "overran: {elapsed:?}");

    Ok(())
}

#[tokio::test]
async fn test_flush_on_empty_producer() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let producer = producer_on(&hub, "orders")?;

    let started = Instant::now();
    assert_eq!(producer.flush(Duration::from_secs(5)).await, 0);
    assert!(started.elapsed() < Duration::from_millis(50));

    Ok(())
}

#[tokio::test]
async fn test_duplicate_reports_are_idempotent() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    hub.set_duplicate_reports(true);

    let failures = Arc::new(Mutex::new(Vec::<DeliveryError>::new()));
    let sink = failures.clone();
    let producer = ProducerBuilder::new(create_memory_transport_with_hub(hub.clone()))
        .topic("orders")
        .on_error(move |err| sink.lock().unwrap().push(err.clone()))
        .build()?;

    hub.fail_next_delivery(DeliveryFailure::AllBrokersDown);
    producer.send("a", None)?;
    producer.send("b", None)?;

    assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);
    assert_eq!(producer.outstanding(), 0);
    assert_eq!(failures.lock().unwrap().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_error_observer_receives_delivery_failures() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    hub.set_ack_latency(Duration::from_millis(30));
    let strict = TopicConfig::new().with("message.timeout.ms", "10")?;
    let transport = create_memory_transport_with_hub(hub.clone());
    let producer = Producer::new(transport, "payments", Some(&strict), None)?;

    let failures = Arc::new(Mutex::new(Vec::<DeliveryError>::new()));
    let sink = failures.clone();
    producer.set_error_observer(move |err| sink.lock().unwrap().push(err.clone()));

    producer.send("too slow", None)?;

    // Send succeeded; the failure only surfaces through the observer.
    assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].topic, "payments");
    assert_eq!(failures[0].sequence, 1);
    assert_eq!(failures[0].failure, DeliveryFailure::MessageTimedOut);
    assert!(hub.delivered("payments").is_empty());

    Ok(())
}

#[tokio::test]
async fn test_unacknowledged_message_expires() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    hub.set_manual_acks();
    let strict = TopicConfig::new().with("message.timeout.ms", "10")?;
    let transport = create_memory_transport_with_hub(hub.clone());
    let producer = Producer::new(transport, "orders", Some(&strict), None)?;

    let failures = Arc::new(Mutex::new(Vec::<DeliveryError>::new()));
    let sink = failures.clone();
    producer.set_error_observer(move |err| sink.lock().unwrap().push(err.clone()));

    producer.send("never acked", None)?;

    let started = Instant::now();
    assert_eq!(producer.flush(Duration::from_millis(500)).await, 0);
    let elapsed = started.elapsed();
    log::info!("test_unacknowledged_message_expires: expired after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(300), "expired late: {elapsed:?}");

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].failure, DeliveryFailure::MessageTimedOut);

    Ok(())
}

#[tokio::test]
async fn test_injected_failure_survives_rejected_send() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let config = ClientConfig::new().with("message.max.bytes", "1000")?;
    let transport = create_memory_transport_with_hub(hub.clone());
    let producer = Producer::new(transport, "orders", None, Some(&config))?;

    let failures = Arc::new(Mutex::new(Vec::<DeliveryError>::new()));
    let sink = failures.clone();
    producer.set_error_observer(move |err| sink.lock().unwrap().push(err.clone()));

    hub.fail_next_delivery(DeliveryFailure::AllBrokersDown);
    let oversized = producer.send(vec![0u8; 2000], None);
    assert!(matches!(
        oversized,
        Err(Error::Send(ProduceFailure::MessageTooLarge { size: 2000, max: 1000 }))
    ));

    producer.send("fits", None)?;
    assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].sequence, 2);
    assert_eq!(failures[0].failure, DeliveryFailure::AllBrokersDown);

    Ok(())
}

#[tokio::test]
async fn test_cleared_observer_is_not_called() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let producer = producer_on(&hub, "orders")?;

    let calls = Arc::new(Mutex::new(0usize));
    let counter = calls.clone();
    producer.set_error_observer(move |_| *counter.lock().unwrap() += 1);
    producer.clear_error_observer();

    hub.fail_next_delivery(DeliveryFailure::Rejected("record too old".into()));
    producer.send("x", None)?;
    assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);
    assert_eq!(*calls.lock().unwrap(), 0);

    Ok(())
}

#[tokio::test]
async fn test_construction_errors() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();

    hub.fail_next_client("no route to broker");
    let err = producer_on(&hub, "orders").unwrap_err();
    assert!(matches!(err, Error::Connection(ref reason) if reason == "no route to broker"));

    hub.fail_next_topic(TopicFailure::ResourceExhausted);
    let err = producer_on(&hub, "orders").unwrap_err();
    assert!(matches!(
        err,
        Error::Topic {
            ref topic,
            reason: TopicFailure::ResourceExhausted,
        } if topic == "orders"
    ));

    // The client created before the topic failure was released.
    assert_eq!(hub.client_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_send_batch_counts_accepted() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    hub.set_partitions(4);
    let producer = producer_on(&hub, "events")?;

    hub.fail_next_produce(ProduceFailure::Os(105));
    let accepted = producer.send_batch(vec![
        ("a", None),
        ("b", Some(Bytes::from_static(b"user-1"))),
        ("c", Some(Bytes::from_static(b"user-2"))),
    ]);

    assert_eq!(accepted, 2);
    assert_eq!(producer.last_sequence(), 3);
    assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);
    assert_eq!(hub.delivered("events").len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_identity_and_brokers() -> Result<()> {
    // ---
    let hub = MemoryHub::new();

    let mut config = ClientConfig::new().with("client.id", "checkout")?;
    let transport = create_memory_transport_with_hub(hub.clone());
    let producer = Producer::new(transport, "orders", None, Some(&config))?;

    // Later changes to the caller's copy are not seen by the producer.
    config.set("client.id", "someone-else")?;

    assert_eq!(producer.name(), "checkout#producer-1");
    assert_eq!(producer.topic(), "orders");
    assert_eq!(producer.connect("k1:9092,k2:9092,not a host"), 2);
    assert_eq!(producer.connect("k1:9092"), 0);

    let debug = format!("{producer:?}");
    assert!(debug.contains("orders"));

    Ok(())
}

#[tokio::test]
async fn test_producers_are_isolated() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    hub.set_manual_acks();
    let orders = producer_on(&hub, "orders")?;
    let audit = producer_on(&hub, "audit")?;

    orders.send("o1", None)?;
    audit.send("a1", None)?;
    audit.send("a2", None)?;

    assert_eq!(hub.acknowledge_all(), 3);

    // Reports are dispatched only to the client being polled.
    assert_eq!(orders.flush(Duration::from_secs(1)).await, 0);
    assert_eq!(audit.outstanding(), 2);

    assert_eq!(audit.flush(Duration::from_secs(1)).await, 0);
    assert_eq!(hub.in_flight(), 0);

    Ok(())
}

#[tokio::test]
async fn test_outstanding_matches_reports_across_interleavings() -> Result<()> {
    // ---
    init_logging();

    for seed in 0..16u64 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let hub = MemoryHub::new();
        hub.set_manual_acks();
        let failures = Arc::new(Mutex::new(0usize));
        let sink = failures.clone();
        let producer = ProducerBuilder::new(create_memory_transport_with_hub(hub.clone()))
            .topic("orders")
            .on_error(move |_| *sink.lock().unwrap() += 1)
            .build()?;

        let mut accepted = 0usize;
        let mut reported = 0usize;
        let mut injected = 0usize;

        for step in 0..120 {
            match rng.random_range(0..5) {
                0 | 1 => {
                    if rng.random_bool(0.2) {
                        hub.fail_next_produce(ProduceFailure::QueueFull);
                        assert!(producer.send("rejected", None).is_err());
                    } else {
                        if rng.random_bool(0.2) {
                            hub.fail_next_delivery(DeliveryFailure::AllBrokersDown);
                            injected += 1;
                        }
                        producer.send(format!("m{step}"), None)?;
                        accepted += 1;
                    }
                }
                2 | 3 => {
                    let released = if rng.random_bool(0.5) {
                        hub.acknowledge(rng.random_range(1..4))
                    } else {
                        hub.acknowledge_all()
                    };
                    if released > 0 {
                        let fired = producer.poll(Duration::from_millis(50)).await;
                        assert_eq!(fired, released, "seed {seed} step {step}");
                        reported += fired;
                    }
                }
                _ => hub.set_duplicate_reports(rng.random_bool(0.5)),
            }

            assert_eq!(
                producer.outstanding(),
                accepted - reported,
                "seed {seed} step {step}"
            );
        }

        hub.acknowledge_all();
        assert_eq!(producer.flush(Duration::from_secs(1)).await, 0);
        assert_eq!(*failures.lock().unwrap(), injected, "seed {seed}");
        log::info!("seed {seed}: {accepted} accepted, {injected} failed");
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_send_and_flush() -> Result<()> {
    // ---
    init_logging();

    let hub = MemoryHub::new();
    hub.set_ack_latency(Duration::from_millis(5));
    hub.set_partitions(3);
    let producer = Arc::new(producer_on(&hub, "orders")?);

    let mut senders = Vec::new();
    for worker in 0..4 {
        let producer = producer.clone();
        senders.push(tokio::spawn(async move {
            for i in 0..50 {
                producer.send(format!("w{worker}-{i}"), None)?;
                if i % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            Ok::<_, Error>(())
        }));
    }

    let poller = {
        let producer = producer.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                producer.poll(Duration::from_millis(5)).await;
            }
        })
    };

    for sender in senders {
        sender.await.expect("sender task panicked")?;
    }
    poller.await.expect("poller task panicked");

    assert_eq!(producer.flush(Duration::from_secs(5)).await, 0);
    assert_eq!(producer.last_sequence(), 200);
    assert_eq!(hub.delivered("orders").len(), 200);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_flush_wakes_when_another_task_drains() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    hub.set_manual_acks();
    let producer = Arc::new(producer_on(&hub, "orders")?);
    producer.send("m", None)?;

    let flusher = {
        let producer = producer.clone();
        tokio::spawn(async move { producer.flush(Duration::from_secs(10)).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = Instant::now();
    hub.acknowledge_all();
    producer.poll(Duration::from_millis(100)).await;

    let remaining = flusher.await.expect("flush task panicked");
    assert_eq!(remaining, 0);
    assert!(started.elapsed() < Duration::from_secs(1));

    Ok(())
}

#[cfg(feature = "logging")]
mod imp {
    use std::sync::Once;

    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });
    }
}

#[cfg(not(feature = "logging"))]
mod imp {
    #[inline]
    pub fn init() {}
}

pub fn init_logging() {
    imp::init();
}

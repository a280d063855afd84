//! Orders producer example
//!
//! Sends a handful of orders through the in-memory transport, simulating a
//! broker that takes 50ms to acknowledge and occasionally loses a message,
//! then flushes before exiting.
//!
//! Run with: RUST_LOG=debug cargo run --example orders

use std::time::Duration;

use bytes::Bytes;
use mom_producer::{
    //
    create_memory_transport_with_hub,
    ClientConfig,
    DeliveryFailure,
    MemoryHub,
    ProducerBuilder,
    Result,
    TopicConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    env_logger::init();

    let hub = MemoryHub::new();
    hub.set_ack_latency(Duration::from_millis(50));
    hub.set_partitions(3);

    let client_config = ClientConfig::from_json(
        r#"{ "client.id": "checkout", "bootstrap.servers": "localhost:9092" }"#,
    )?;
    let topic_config = TopicConfig::new().with("request.required.acks", "1")?;

    let producer = ProducerBuilder::new(create_memory_transport_with_hub(hub.clone()))
        .topic("orders")
        .client_config(client_config)
        .topic_config(topic_config)
        .on_error(|err| eprintln!("lost: {err}"))
        .build()?;

    println!("producer {} ready", producer.name());

    // ---
    // One order will be reported as failed by the broker.
    hub.fail_next_delivery(DeliveryFailure::AllBrokersDown);

    for id in 1..=5 {
        let customer = Bytes::from(format!("customer-{}", id % 2));
        producer.send(format!("order #{id}"), Some(customer))?;
    }
    println!("{} order(s) outstanding", producer.outstanding());

    let remaining = producer.flush(Duration::from_secs(2)).await;
    println!(
        "flush done: {remaining} outstanding, {} delivered",
        hub.delivered("orders").len()
    );

    Ok(())
}

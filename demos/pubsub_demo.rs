//! Minimal tour: callback and queue listeners, retained state, pooled
//! payloads, introspection.
//!
//! Run with: `cargo run --example pubsub_demo`

use topicbus::{BusConfig, EventBus, EventMessage, Listener, TopicId};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), topicbus::BusError> {
    let bus = EventBus::new(BusConfig::default());

    let printer = Listener::callback("printer", |event| {
        println!(
            "[callback] topic={} bytes={}",
            event.topic(),
            event.payload().len()
        );
    });
    bus.attach(&printer).await?;
    bus.subscribe_one(&printer, TopicId::new(0)).await?;

    let (queued, mut rx) = Listener::queue("queued", 8);
    bus.attach(&queued).await?;
    bus.subscribe_many(&queued, &[TopicId::new(0), TopicId::new(1)])
        .await?;

    // Retained: listeners subscribing later replay this value.
    let boot = EventMessage::with_payload(TopicId::new(0), 1, b"boot complete");
    bus.publish(&boot, true).await?;

    // Pooled payload, released by the consumer.
    let sample = bus
        .event_alloc(b"sensor sample", TopicId::new(1), 2)
        .expect("pools are fresh");
    bus.publish(&sample, false).await?;

    while let Ok(event) = rx.try_recv() {
        println!(
            "[queue] topic={} publisher={} at={}ms",
            event.topic(),
            event.publisher(),
            event.publish_time()
        );
        bus.event_release(&event, Some(&queued));
    }

    print!("{}", bus.dump_listeners().await?);
    print!("{}", bus.pool_stats());

    bus.shutdown().await;
    Ok(())
}

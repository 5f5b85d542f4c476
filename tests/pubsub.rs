//! End-to-end delivery semantics: filtering, retention, replay, ordering.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use topicbus::{BusConfig, EventBus, EventMessage, EventRef, Listener, TopicId, TOPIC_COUNT};

fn payload_u32(event: &EventRef) -> u32 {
    let bytes = event.payload();
    if bytes.len() < 4 {
        return 0;
    }
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn value_event(topic: usize, value: u32) -> EventRef {
    EventMessage::with_payload(TopicId::new(topic), 0, &value.to_le_bytes())
}

/// Callback listener recording delivery count and last payload value.
fn counting_listener(name: &str) -> (Arc<Listener>, Arc<AtomicUsize>, Arc<AtomicU32>) {
    let count = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(AtomicU32::new(0));
    let (count_in, last_in) = (Arc::clone(&count), Arc::clone(&last));
    let listener = Listener::callback(name, move |event| {
        count_in.fetch_add(1, Ordering::SeqCst);
        last_in.store(payload_u32(event), Ordering::SeqCst);
    });
    (listener, count, last)
}

#[tokio::test]
async fn basic_pub_sub() {
    let bus = EventBus::new(BusConfig::default());
    let (listener, count, last) = counting_listener("basic");

    bus.attach(&listener).await.unwrap();
    bus.subscribe_one(&listener, TopicId::new(0)).await.unwrap();

    let event = value_event(0, 0xDEAD_BEEF);
    assert!(!event.published());
    bus.publish(&event, false).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(last.load(Ordering::SeqCst), 0xDEAD_BEEF);
    assert!(event.published());

    bus.shutdown().await;
}

#[tokio::test]
async fn retained_event_replays_to_late_subscriber() {
    let bus = EventBus::new(BusConfig::default());

    bus.publish(&value_event(0, 0x1234), true).await.unwrap();

    let (listener, count, last) = counting_listener("late");
    bus.attach(&listener).await.unwrap();
    bus.subscribe_one(&listener, TopicId::new(0)).await.unwrap();

    // Replay happened during the subscribe command, before anything else.
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(last.load(Ordering::SeqCst), 0x1234);

    bus.shutdown().await;
}

#[tokio::test]
async fn invalidate_clears_retained_slot() {
    let bus = EventBus::new(BusConfig::default());

    let retained = value_event(0, 0x1234);
    bus.publish(&retained, true).await.unwrap();
    bus.invalidate(&retained).await.unwrap();
    // Idempotent: a second invalidate changes nothing.
    bus.invalidate(&retained).await.unwrap();

    let (listener, count, _) = counting_listener("after-invalidate");
    bus.attach(&listener).await.unwrap();
    bus.subscribe_one(&listener, TopicId::new(0)).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 0);

    bus.shutdown().await;
}

#[tokio::test]
async fn non_retained_publish_drops_previous_retained() {
    let bus = EventBus::new(BusConfig::default());

    bus.publish(&value_event(0, 1), true).await.unwrap();
    bus.publish(&value_event(0, 2), false).await.unwrap();

    let (listener, count, _) = counting_listener("nothing-retained");
    bus.attach(&listener).await.unwrap();
    bus.subscribe_one(&listener, TopicId::new(0)).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 0);

    bus.shutdown().await;
}

#[tokio::test]
async fn fan_out_respects_topic_filter() {
    let bus = EventBus::new(BusConfig::default());
    let topics = [TopicId::new(0), TopicId::new(3)];

    let mut counters = Vec::new();
    for i in 0..4 {
        let (listener, count, last) = counting_listener(&format!("filter-{i}"));
        bus.attach(&listener).await.unwrap();
        bus.subscribe_many(&listener, &topics).await.unwrap();
        counters.push((count, last));
    }

    bus.publish(&value_event(0, 0xAA), false).await.unwrap();
    for (count, last) in &counters {
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 0xAA);
    }

    // Publications on unsubscribed topics reach nobody.
    bus.publish(&value_event(1, 0xBB), false).await.unwrap();
    bus.publish(&value_event(2, 0xCC), false).await.unwrap();
    for (count, last) in &counters {
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 0xAA);
    }

    bus.shutdown().await;
}

#[tokio::test]
async fn high_topic_ids_route_through_upper_mask_words() {
    assert_eq!(TOPIC_COUNT, 128);

    let bus = EventBus::new(BusConfig::default());
    let (listener, count, last) = counting_listener("high");

    bus.attach(&listener).await.unwrap();
    bus.subscribe_one(&listener, TopicId::new(80)).await.unwrap();
    bus.publish(&value_event(80, 0xBEEF_0BEE), false).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(last.load(Ordering::SeqCst), 0xBEEF_0BEE);

    bus.shutdown().await;
}

#[tokio::test]
async fn fire_and_forget_publish_from_plain_thread() {
    let bus = Arc::new(EventBus::new(BusConfig::default()));
    let (listener, count, last) = counting_listener("isr");

    bus.attach(&listener).await.unwrap();
    bus.subscribe_one(&listener, TopicId::new(0)).await.unwrap();

    let event = value_event(0, 0xBEEF);
    let publisher = {
        let bus = Arc::clone(&bus);
        std::thread::spawn(move || bus.try_publish(&event, false).is_ok())
    };
    assert!(publisher.join().unwrap());

    // The inbox is FIFO: once this acked publish completes, the
    // fire-and-forget one before it has been served too.
    bus.publish(&value_event(1, 0), false).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(last.load(Ordering::SeqCst), 0xBEEF);
}

#[tokio::test]
async fn detach_isolates_listener_from_later_publications() {
    let bus = EventBus::new(BusConfig::default());
    let (listener, count, _) = counting_listener("detached");

    bus.attach(&listener).await.unwrap();
    bus.subscribe_one(&listener, TopicId::new(0)).await.unwrap();
    bus.publish(&value_event(0, 1), false).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    bus.detach(&listener).await.unwrap();
    bus.publish(&value_event(0, 2), false).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    bus.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_clears_one_topic_only() {
    let bus = EventBus::new(BusConfig::default());
    let (listener, count, _) = counting_listener("partial");

    bus.attach(&listener).await.unwrap();
    bus.subscribe_many(&listener, &[TopicId::new(0), TopicId::new(1)])
        .await
        .unwrap();
    bus.unsubscribe_one(&listener, TopicId::new(0)).await.unwrap();

    bus.publish(&value_event(0, 1), false).await.unwrap();
    bus.publish(&value_event(1, 2), false).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);

    bus.shutdown().await;
}

#[tokio::test]
async fn attach_order_is_delivery_order() {
    let bus = EventBus::new(BusConfig::default());
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut listeners = Vec::new();
    for i in 0..3u8 {
        let order = Arc::clone(&order);
        let listener = Listener::callback(format!("order-{i}"), move |_| {
            order.lock().unwrap().push(i);
        });
        bus.attach(&listener).await.unwrap();
        bus.subscribe_one(&listener, TopicId::new(0)).await.unwrap();
        listeners.push(listener);
    }

    bus.publish(&value_event(0, 0), false).await.unwrap();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);

    bus.shutdown().await;
}

#[tokio::test]
async fn queue_sink_preserves_publication_order() {
    let bus = EventBus::new(BusConfig::default());
    let (listener, mut rx) = Listener::queue("fifo", 8);

    bus.attach(&listener).await.unwrap();
    bus.subscribe_one(&listener, TopicId::new(0)).await.unwrap();

    for value in 0..5u32 {
        bus.publish(&value_event(0, value), false).await.unwrap();
    }
    for expected in 0..5u32 {
        let event = rx.recv().await.unwrap();
        assert_eq!(payload_u32(&event), expected);
    }

    bus.shutdown().await;
}

#[tokio::test]
async fn full_queue_drops_delivery_and_sets_sticky_flag() {
    let bus = EventBus::new(BusConfig::default());
    let (listener, mut rx) = Listener::queue("tiny", 1);

    bus.attach(&listener).await.unwrap();
    bus.subscribe_one(&listener, TopicId::new(0)).await.unwrap();

    bus.publish(&value_event(0, 1), false).await.unwrap();
    bus.publish(&value_event(0, 2), false).await.unwrap();

    assert!(listener.overrun());
    assert_eq!(payload_u32(&rx.recv().await.unwrap()), 1);
    assert!(rx.try_recv().is_err());

    listener.clear_overrun();
    assert!(!listener.overrun());

    bus.shutdown().await;
}

#[tokio::test]
async fn subscribe_many_replays_every_retained_topic() {
    let bus = EventBus::new(BusConfig::default());

    bus.publish(&value_event(2, 0x22), true).await.unwrap();
    bus.publish(&value_event(5, 0x55), true).await.unwrap();

    let (listener, count, _) = counting_listener("bulk");
    bus.attach(&listener).await.unwrap();
    bus.subscribe_many(&listener, &[TopicId::new(2), TopicId::new(5), TopicId::new(9)])
        .await
        .unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 2);

    bus.shutdown().await;
}

#[tokio::test]
async fn bus_instances_are_isolated() {
    let left = EventBus::new(BusConfig::default());
    let right = EventBus::new(BusConfig::default());

    let (listener, count, _) = counting_listener("left-only");
    left.attach(&listener).await.unwrap();
    left.subscribe_one(&listener, TopicId::new(0)).await.unwrap();

    right.publish(&value_event(0, 7), false).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);

    left.publish(&value_event(0, 7), false).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    left.shutdown().await;
    right.shutdown().await;
}

#[tokio::test]
async fn introspection_renders_listeners_latency_and_pools() {
    let bus = EventBus::new(BusConfig::default());
    let (listener, _, _) = counting_listener("visible");

    bus.attach(&listener).await.unwrap();
    bus.subscribe_one(&listener, TopicId::new(0)).await.unwrap();
    bus.publish(&value_event(0, 1), false).await.unwrap();

    let table = bus.dump_listeners().await.unwrap();
    assert!(table.contains("visible"));
    assert!(table.contains("sink=callback"));

    let latency = bus.topic_latency().await.unwrap();
    assert!(latency.contains("topic 0"));

    let stats = bus.pool_stats();
    assert!(stats.contains("pool small"));
    assert!(stats.contains("pool large"));

    bus.shutdown().await;
}

#[tokio::test]
async fn double_attach_kills_dispatcher_and_later_calls_see_closed() {
    let bus = EventBus::new(BusConfig::default());
    let (listener, _, _) = counting_listener("twice");

    bus.attach(&listener).await.unwrap();
    // Attaching the same listener again is a contract violation; the
    // dispatcher dies on it and every caller after that observes Closed.
    assert!(matches!(
        bus.attach(&listener).await,
        Err(topicbus::BusError::Closed)
    ));
    assert!(matches!(
        bus.publish(&value_event(0, 1), false).await,
        Err(topicbus::BusError::Closed)
    ));
}

#[tokio::test]
#[should_panic(expected = "retained events must be caller-allocated")]
async fn retaining_a_pooled_event_panics() {
    let bus = EventBus::new(BusConfig::default());
    let event = bus
        .event_alloc(b"payload", TopicId::new(0), 0)
        .expect("pool has space");
    let _ = bus.publish(&event, true).await;
}

#[tokio::test]
async fn publish_stamps_monotonic_time() {
    let bus = EventBus::new(BusConfig::default());

    let first = value_event(0, 1);
    bus.publish(&first, false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = value_event(0, 2);
    bus.publish(&second, false).await.unwrap();

    assert!(second.publish_time() >= first.publish_time());

    bus.shutdown().await;
}

//! One-shot waiting on a topic through wake-sink listeners.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Notify;
use topicbus::{BusConfig, BusError, EventBus, EventMessage, Listener, TopicId};

#[tokio::test]
async fn wait_for_resolves_on_publication() {
    let bus = Arc::new(EventBus::new(BusConfig::default()));

    let publisher = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            bus.publish(&EventMessage::signal(TopicId::new(11)), false)
                .await
                .unwrap();
        })
    };

    bus.wait_for(TopicId::new(11), Duration::from_secs(2))
        .await
        .expect("publication arrives inside the window");
    publisher.await.unwrap();
}

#[tokio::test]
async fn wait_for_times_out_on_silence() {
    let bus = EventBus::new(BusConfig::default());

    let err = bus
        .wait_for(TopicId::new(12), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::WaitTimeout { .. }));
    assert_eq!(err.as_label(), "bus_wait_timeout");

    bus.shutdown().await;
}

#[tokio::test]
async fn wait_for_sees_nothing_from_other_topics() {
    let bus = Arc::new(EventBus::new(BusConfig::default()));

    let publisher = {
        let bus = Arc::clone(&bus);
        tokio::spawn(async move {
            bus.publish(&EventMessage::signal(TopicId::new(3)), false)
                .await
                .unwrap();
        })
    };

    let err = bus
        .wait_for(TopicId::new(4), Duration::from_millis(80))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::WaitTimeout { .. }));
    publisher.await.unwrap();
}

#[tokio::test]
async fn wake_sink_stores_a_permit_for_a_slow_waiter() {
    let bus = EventBus::new(BusConfig::default());
    let notify = Arc::new(Notify::new());
    let listener = Listener::wake("slow-waiter", Arc::clone(&notify));

    bus.attach(&listener).await.unwrap();
    bus.subscribe_one(&listener, TopicId::new(0)).await.unwrap();

    // Delivery lands before anyone waits; the permit must not be lost.
    bus.publish(&EventMessage::signal(TopicId::new(0)), false)
        .await
        .unwrap();
    assert!(notify.notified().now_or_never().is_some());

    // No further publication, no permit.
    assert!(notify.notified().now_or_never().is_none());

    bus.shutdown().await;
}

#[tokio::test]
async fn transient_waiter_leaves_no_listener_behind() {
    let bus = EventBus::new(BusConfig::default());

    let _ = bus
        .wait_for(TopicId::new(5), Duration::from_millis(20))
        .await;

    let table = bus.dump_listeners().await.unwrap();
    assert!(table.starts_with("0 listener(s)"));

    bus.shutdown().await;
}

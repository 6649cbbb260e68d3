use shellcn_event_bus::{EventBus, EventBusError, EventReceiverExt};

#[derive(Clone, Debug, PartialEq)]
struct Joined(String);

#[derive(Clone, Debug, PartialEq)]
struct CaptureChunk(Vec<u8>);

#[tokio::test]
async fn broadcast_fan_out() {
    let bus = EventBus::new();
    let mut rx1 = bus.subscribe::<Joined>().unwrap();
    let mut rx2 = bus.subscribe::<Joined>().unwrap();

    let delivered = bus.publish(Joined("alice".into())).unwrap();
    assert_eq!(delivered, 2);

    assert_eq!(rx1.recv().await.unwrap().0, "alice");
    assert_eq!(rx2.recv().await.unwrap().0, "alice");
}

#[tokio::test]
async fn publish_without_subscribers_is_dropped() {
    let bus = EventBus::new();
    assert_eq!(bus.publish(Joined("nobody".into())).unwrap(), 0);
}

#[tokio::test]
async fn mpsc_queue_is_bounded() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe_mpsc::<CaptureChunk>(2).unwrap();

    bus.publish_mpsc(CaptureChunk(vec![1])).unwrap();
    bus.publish_mpsc(CaptureChunk(vec![2])).unwrap();
    let overflow = bus.publish_mpsc(CaptureChunk(vec![3]));
    assert!(matches!(overflow, Err(EventBusError::ChannelFull { .. })));

    assert_eq!(rx.recv().await.unwrap().0, vec![1]);
    assert_eq!(rx.recv().await.unwrap().0, vec![2]);
}

#[tokio::test]
async fn mpsc_receiver_taken_once() {
    let bus = EventBus::new();
    let _rx = bus.subscribe_mpsc::<CaptureChunk>(4).unwrap();
    let second = bus.subscribe_mpsc::<CaptureChunk>(4);
    assert!(matches!(second, Err(EventBusError::ChannelKindMismatch { .. })));
}

#[tokio::test]
async fn kind_mismatch_is_rejected() {
    let bus = EventBus::new();
    let _rx = bus.subscribe::<Joined>().unwrap();
    let res = bus.publish_mpsc(Joined("x".into()));
    assert!(matches!(res, Err(EventBusError::ChannelKindMismatch { .. })));
}

#[test]
fn shutdown_counts_channels() {
    let bus = EventBus::new();
    let _a = bus.subscribe::<Joined>().unwrap();
    let _b = bus.subscribe_mpsc::<CaptureChunk>(1).unwrap();
    assert_eq!(bus.shutdown(), 2);
}

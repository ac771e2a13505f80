use std::sync::Mutex;
use tokio::sync::mpsc;

use super::types::ScanEvent;

type Subscriber = Box<dyn Fn(&ScanEvent) + Send + Sync>;

/// In-process typed pub/sub for one scan. Subscribers run to completion on
/// the publisher's task, in registration order, before the next event is
/// dispatched; an optional unbounded channel mirrors every event to the
/// transport.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    sink: Mutex<Option<mpsc::UnboundedSender<ScanEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
        }
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&ScanEvent) + Send + Sync + 'static,
    {
        self.subscribers.lock().unwrap().push(Box::new(handler));
    }

    /// Attach the transport mirror. Replaces any previous sink.
    pub fn set_sink(&self, tx: mpsc::UnboundedSender<ScanEvent>) {
        *self.sink.lock().unwrap() = Some(tx);
    }

    pub fn publish(&self, event: ScanEvent) {
        {
            let subscribers = self.subscribers.lock().unwrap();
            for subscriber in subscribers.iter() {
                subscriber(&event);
            }
        }
        if let Some(tx) = self.sink.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn stopped(id: &str) -> ScanEvent {
        ScanEvent::ScanStopped { scan_id: id.to_string() }
    }

    #[test]
    fn test_subscribers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(move |_| order.lock().unwrap().push(tag));
        }
        bus.publish(stopped("s1"));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_sink_receives_published_events() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.set_sink(tx);
        bus.publish(stopped("s1"));
        bus.publish(stopped("s2"));
        assert_eq!(rx.try_recv().unwrap().scan_id(), "s1");
        assert_eq!(rx.try_recv().unwrap().scan_id(), "s2");
    }

    #[test]
    fn test_publish_without_sink_is_fine() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        bus.subscribe(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(stopped("s1"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

//! Fan-out of bus signals to subscribers.
//!
//! Both bus implementations funnel every incoming signal through one
//! [`SignalRouter`], so signals reach the sinks in the order they were
//! delivered to the router, regardless of which subscription matched them.

use super::{BusSignal, SignalFilter};
use std::collections::HashMap;
use tokio::sync::mpsc;

struct Route {
    filter: SignalFilter,
    sink: mpsc::UnboundedSender<BusSignal>,
}

#[derive(Default)]
pub(crate) struct SignalRouter {
    routes: HashMap<u64, Route>,
    next_id: u64,
}

impl SignalRouter {
    /// Add a route and return its id for [`SignalRouter::remove`].
    pub(crate) fn insert(
        &mut self,
        filter: SignalFilter,
        sink: mpsc::UnboundedSender<BusSignal>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.routes.insert(id, Route { filter, sink });
        id
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        self.routes.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn filters(&self) -> impl Iterator<Item = &SignalFilter> {
        self.routes.values().map(|route| &route.filter)
    }

    /// Send `signal` to every route whose filter matches it.
    pub(crate) fn deliver(&mut self, signal: &BusSignal) {
        self.routes.retain(|_, route| {
            if !route.filter.matches(signal) {
                return true;
            }
            // A closed sink means the receiver is gone for good.
            route.sink.send(signal.clone()).is_ok()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InterfaceMap, PropertyMap};

    fn added(path: &str) -> BusSignal {
        BusSignal::InterfacesAdded {
            path: path.to_string(),
            interfaces: InterfaceMap::new(),
        }
    }

    fn removed(path: &str) -> BusSignal {
        BusSignal::InterfacesRemoved {
            path: path.to_string(),
            interfaces: vec![],
        }
    }

    #[test]
    fn test_signals_keep_order_across_routes() {
        let mut router = SignalRouter::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.insert(
            SignalFilter::InterfacesAdded {
                namespace: "/xyz/sensors".to_string(),
            },
            tx.clone(),
        );
        router.insert(
            SignalFilter::InterfacesRemoved {
                namespace: "/xyz/sensors".to_string(),
            },
            tx,
        );

        let path = "/xyz/sensors/temperature/cpu0";
        router.deliver(&removed(path));
        router.deliver(&added(path));
        router.deliver(&removed(path));

        assert_eq!(rx.try_recv().unwrap(), removed(path));
        assert_eq!(rx.try_recv().unwrap(), added(path));
        assert_eq!(rx.try_recv().unwrap(), removed(path));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unmatched_signal_dropped() {
        let mut router = SignalRouter::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.insert(
            SignalFilter::PropertiesChanged {
                path: "/a".to_string(),
                interface: None,
            },
            tx,
        );

        router.deliver(&BusSignal::PropertiesChanged {
            path: "/b".to_string(),
            interface: "x".to_string(),
            changed: PropertyMap::new(),
        });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_sink_removes_route() {
        let mut router = SignalRouter::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = router.insert(
            SignalFilter::InterfacesAdded {
                namespace: "/".to_string(),
            },
            tx,
        );
        drop(rx);

        router.deliver(&added("/x"));
        assert_eq!(router.len(), 0);
        assert!(!router.remove(id));
    }
}

use std::sync::mpsc::Sender;

use crate::types::Event;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SignalId(u64);

struct Slot<K> {
    id: SignalId,
    key: K,
    tx: Sender<Event>,
    event: Event,
}

/// Connection arena for one notification source. Each slot forwards a fixed
/// `Event` to a channel whenever its key is emitted.
pub struct Signal<K> {
    next_id: u64,
    slots: Vec<Slot<K>>,
}

impl<K> Default for Signal<K> {
    fn default() -> Self {
        Self {
            next_id: 1,
            slots: Vec::new(),
        }
    }
}

impl<K: PartialEq> Signal<K> {
    pub fn connect(&mut self, key: K, tx: Sender<Event>, event: Event) -> SignalId {
        let id = SignalId(self.next_id);
        self.next_id += 1;
        self.slots.push(Slot { id, key, tx, event });
        id
    }

    pub fn disconnect(&mut self, id: SignalId) -> bool {
        let before = self.slots.len();
        self.slots.retain(|slot| slot.id != id);
        self.slots.len() != before
    }

    /// Slots whose receiver is gone are dropped.
    pub fn emit(&mut self, key: &K) {
        self.slots.retain(|slot| {
            if slot.key != *key {
                return true;
            }
            slot.tx.send(slot.event.clone()).is_ok()
        });
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use std::sync::mpsc;

    #[test]
    fn emits_only_to_matching_key() {
        let (tx, rx) = mpsc::channel();
        let mut signal = Signal::<&str>::default();
        signal.connect("a", tx.clone(), Event::PanelMoved(Side::Left));
        signal.connect("b", tx, Event::PanelMoved(Side::Right));
        signal.emit(&"a");
        assert_eq!(rx.try_recv(), Ok(Event::PanelMoved(Side::Left)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnect_stops_delivery() {
        let (tx, rx) = mpsc::channel();
        let mut signal = Signal::<&str>::default();
        let id = signal.connect("a", tx, Event::StyleChanged(Side::Left));
        assert!(signal.disconnect(id));
        assert!(!signal.disconnect(id));
        signal.emit(&"a");
        assert!(rx.try_recv().is_err());
        assert_eq!(signal.len(), 0);
    }

    #[test]
    fn dead_receivers_are_pruned() {
        let (tx, rx) = mpsc::channel();
        let mut signal = Signal::<&str>::default();
        signal.connect("a", tx, Event::StyleChanged(Side::Right));
        drop(rx);
        signal.emit(&"a");
        assert_eq!(signal.len(), 0);
    }
}

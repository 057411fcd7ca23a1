//! Subscription registry: instrument → {subscriber → mode}.
//!
//! Owned exclusively by whichever engine wraps it (the serialized control
//! loop, or the shared-lock engine behind its lock); the registry itself does
//! no synchronization.
//!
//! A reverse index (subscriber → instruments) makes removing a disconnected
//! subscriber proportional to its own subscriptions instead of a scan of the
//! whole map. Instruments whose last subscriber leaves are dropped from the
//! map, so memory tracks live subscriptions only.

use std::hash::Hash;

use ahash::{AHashMap, AHashSet};
use tf_core::{InstrumentId, Mode};

pub struct SubscriptionRegistry<K> {
    topics: AHashMap<InstrumentId, AHashMap<K, Mode>>,
    by_subscriber: AHashMap<K, AHashSet<InstrumentId>>,
}

impl<K: Clone + Eq + Hash> SubscriptionRegistry<K> {
    pub fn new() -> Self {
        Self { topics: AHashMap::new(), by_subscriber: AHashMap::new() }
    }

    /// Set `mode` for `subscriber` on every listed instrument.
    ///
    /// [`Mode::None`] removes the subscriber from those instruments instead of
    /// storing it. Instruments it was not subscribed to are left untouched.
    pub fn apply(&mut self, subscriber: &K, mode: Mode, instruments: &[InstrumentId]) {
        for &instrument in instruments {
            if mode.is_subscribed() {
                self.insert(subscriber, instrument, mode);
            } else {
                self.remove(subscriber, instrument);
            }
        }
    }

    fn insert(&mut self, subscriber: &K, instrument: InstrumentId, mode: Mode) {
        self.topics.entry(instrument).or_default().insert(subscriber.clone(), mode);
        self.by_subscriber.entry(subscriber.clone()).or_default().insert(instrument);
    }

    fn remove(&mut self, subscriber: &K, instrument: InstrumentId) -> bool {
        let Some(subs) = self.topics.get_mut(&instrument) else {
            return false;
        };
        let removed = subs.remove(subscriber).is_some();
        if subs.is_empty() {
            self.topics.remove(&instrument);
        }

        if removed {
            if let Some(owned) = self.by_subscriber.get_mut(subscriber) {
                owned.remove(&instrument);
                if owned.is_empty() {
                    self.by_subscriber.remove(subscriber);
                }
            }
        }
        removed
    }

    /// Drop `subscriber` from every instrument. Returns how many entries went.
    pub fn remove_everywhere(&mut self, subscriber: &K) -> usize {
        let Some(owned) = self.by_subscriber.remove(subscriber) else {
            return 0;
        };

        let mut removed = 0;
        for instrument in owned {
            if let Some(subs) = self.topics.get_mut(&instrument) {
                if subs.remove(subscriber).is_some() {
                    removed += 1;
                }
                if subs.is_empty() {
                    self.topics.remove(&instrument);
                }
            }
        }
        removed
    }

    /// Everyone currently subscribed to `instrument`, with their mode.
    pub fn subscribers_of(&self, instrument: InstrumentId) -> impl Iterator<Item = (&K, Mode)> + '_ {
        self.topics.get(&instrument).into_iter().flat_map(|subs| subs.iter().map(|(k, m)| (k, *m)))
    }

    pub fn mode_of(&self, subscriber: &K, instrument: InstrumentId) -> Option<Mode> {
        self.topics.get(&instrument)?.get(subscriber).copied()
    }

    /// Instruments with at least one subscriber.
    pub fn instrument_count(&self) -> usize {
        self.topics.len()
    }

    /// Subscribers holding at least one subscription.
    pub fn subscriber_count(&self) -> usize {
        self.by_subscriber.len()
    }

    /// Total (instrument, subscriber) pairs.
    pub fn subscription_count(&self) -> usize {
        self.topics.values().map(|subs| subs.len()).sum()
    }
}

impl<K: Clone + Eq + Hash> Default for SubscriptionRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

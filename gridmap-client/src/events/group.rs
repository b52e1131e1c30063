//! Coalescing of listeners sharing one subscription target.
//!
//! A group owns every local listener bound to one key or one filter and
//! negotiates exactly one logical subscription with the server. The detail
//! level registered with the server is lite only while every record is lite;
//! any non-lite record forces a full-payload subscription. The group decides
//! what wire work each mutation requires; the events manager performs it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;

use super::listener::{dispatch_map_event, BoxedMapListener, MapEvent};

/// The subscription target a group coalesces for.
#[derive(Debug, Clone)]
pub(crate) enum GroupTarget {
    /// A single key, indexed by its fingerprint.
    Key {
        /// The serialized key.
        key: Bytes,
        /// The client-side index of this group.
        fingerprint: String,
    },
    /// A server-side filter, indexed by its structural identity.
    Filter {
        /// The serialized filter expression.
        filter: Bytes,
        /// The structural identity of the filter expression.
        identity: String,
        /// The client-chosen id the server echoes in events.
        filter_id: i64,
    },
}

/// Wire work an `add` requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddAction {
    /// The wire subscription already matches; nothing to send.
    NoChange,
    /// First record: subscribe with the given detail level.
    Subscribe {
        /// Detail level to register.
        lite: bool,
    },
    /// Detail level changed: unsubscribe, then subscribe with the new level.
    Resubscribe {
        /// Detail level to re-register.
        lite: bool,
    },
}

/// Wire work a `remove` requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoveAction {
    /// Nothing to send; the handler was absent or the group unchanged.
    NoChange,
    /// Last record removed: unsubscribe and drop the group.
    Unsubscribe,
    /// Last non-lite record removed: unsubscribe, then subscribe lite.
    Resubscribe {
        /// Detail level to re-register.
        lite: bool,
    },
}

struct ListenerRecord<K, V> {
    handler: BoxedMapListener<K, V>,
    lite: bool,
}

/// The listeners coalesced under one subscription target.
pub(crate) struct ListenerGroup<K, V> {
    target: GroupTarget,
    records: Vec<ListenerRecord<K, V>>,
    registered_lite: bool,
    non_lite_count: usize,
}

impl<K, V> ListenerGroup<K, V> {
    pub(crate) fn new(target: GroupTarget) -> Self {
        Self {
            target,
            records: Vec::new(),
            registered_lite: false,
            non_lite_count: 0,
        }
    }

    /// The key or filter this group subscribes for.
    pub(crate) fn target(&self) -> &GroupTarget {
        &self.target
    }

    /// `true` iff every record opts out of event payloads.
    pub(crate) fn is_lite(&self) -> bool {
        self.non_lite_count == 0
    }

    /// The detail level currently negotiated with the server.
    pub(crate) fn registered_lite(&self) -> bool {
        self.registered_lite
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn find(&self, handler: &BoxedMapListener<K, V>) -> Option<usize> {
        self.records
            .iter()
            .position(|record| Arc::ptr_eq(&record.handler, handler))
    }

    /// Inserts or updates a record and reports the wire work required.
    pub(crate) fn add(&mut self, handler: BoxedMapListener<K, V>, lite: bool) -> AddAction {
        if let Some(index) = self.find(&handler) {
            if self.records[index].lite == lite {
                return AddAction::NoChange;
            }
            self.records[index].lite = lite;
            if lite {
                self.non_lite_count -= 1;
                if self.non_lite_count == 0 && !self.registered_lite {
                    return AddAction::Resubscribe { lite: true };
                }
            } else {
                self.non_lite_count += 1;
                if self.registered_lite {
                    return AddAction::Resubscribe { lite: false };
                }
            }
            return AddAction::NoChange;
        }

        self.records.push(ListenerRecord { handler, lite });
        if !lite {
            self.non_lite_count += 1;
        }

        if self.records.len() == 1 {
            AddAction::Subscribe {
                lite: self.is_lite(),
            }
        } else if !lite && self.registered_lite {
            AddAction::Resubscribe { lite: false }
        } else {
            AddAction::NoChange
        }
    }

    /// Removes a record and reports the wire work required.
    pub(crate) fn remove(&mut self, handler: &BoxedMapListener<K, V>) -> RemoveAction {
        let Some(index) = self.find(handler) else {
            return RemoveAction::NoChange;
        };
        let record = self.records.remove(index);
        if !record.lite {
            self.non_lite_count -= 1;
        }

        if self.records.is_empty() {
            RemoveAction::Unsubscribe
        } else if self.non_lite_count == 0 && !self.registered_lite {
            RemoveAction::Resubscribe { lite: true }
        } else {
            RemoveAction::NoChange
        }
    }

    /// Undoes a just-added record after its subscription failed.
    pub(crate) fn roll_back(&mut self, handler: &BoxedMapListener<K, V>) {
        if let Some(index) = self.find(handler) {
            let record = self.records.remove(index);
            if !record.lite {
                self.non_lite_count -= 1;
            }
        }
    }

    /// Records the detail level the server acknowledged.
    pub(crate) fn confirm_subscribed(&mut self, lite: bool) {
        self.registered_lite = lite;
    }

    /// Clones the record handlers for dispatch outside the state lock.
    pub(crate) fn snapshot(&self) -> GroupSnapshot<K, V> {
        GroupSnapshot {
            handlers: self
                .records
                .iter()
                .map(|record| Arc::clone(&record.handler))
                .collect(),
        }
    }
}

/// The handlers of a group, captured for lock-free dispatch.
pub(crate) struct GroupSnapshot<K, V> {
    handlers: Vec<BoxedMapListener<K, V>>,
}

impl<K, V> GroupSnapshot<K, V> {
    /// Fans an event out to the captured handlers in insertion order.
    pub(crate) fn notify(&self, event: &Arc<MapEvent<K, V>>) {
        for handler in &self.handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                dispatch_map_event(handler.as_ref(), event);
            }));
            if outcome.is_err() {
                tracing::warn!("map listener panicked during event dispatch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::listener::MapListener;

    struct Quiet;
    impl MapListener<String, i64> for Quiet {}

    fn key_group() -> ListenerGroup<String, i64> {
        ListenerGroup::new(GroupTarget::Key {
            key: Bytes::from_static(b"\"k1\""),
            fingerprint: "abc".to_string(),
        })
    }

    fn handler() -> BoxedMapListener<String, i64> {
        Arc::new(Quiet)
    }

    /// The registered level must be lite exactly while no record demands
    /// payloads.
    fn assert_detail_invariant(group: &ListenerGroup<String, i64>) {
        assert_eq!(group.registered_lite(), group.non_lite_count == 0);
    }

    #[test]
    fn test_first_listener_subscribes_with_its_level() {
        let mut group = key_group();
        assert_eq!(group.add(handler(), true), AddAction::Subscribe { lite: true });
        group.confirm_subscribed(true);
        assert_detail_invariant(&group);

        let mut group = key_group();
        assert_eq!(
            group.add(handler(), false),
            AddAction::Subscribe { lite: false }
        );
        group.confirm_subscribed(false);
        assert_detail_invariant(&group);
    }

    #[test]
    fn test_duplicate_add_same_level_is_noop() {
        let mut group = key_group();
        let h = handler();
        assert_eq!(
            group.add(Arc::clone(&h), true),
            AddAction::Subscribe { lite: true }
        );
        group.confirm_subscribed(true);
        assert_eq!(group.add(Arc::clone(&h), true), AddAction::NoChange);
        assert_eq!(group.records.len(), 1);
    }

    #[test]
    fn test_detail_upgrade_requires_resubscribe() {
        let mut group = key_group();
        group.add(handler(), true);
        group.confirm_subscribed(true);

        assert_eq!(
            group.add(handler(), false),
            AddAction::Resubscribe { lite: false }
        );
        group.confirm_subscribed(false);
        assert_detail_invariant(&group);
        assert_eq!(group.records.len(), 2);
    }

    #[test]
    fn test_second_lite_listener_is_silent() {
        let mut group = key_group();
        group.add(handler(), true);
        group.confirm_subscribed(true);
        assert_eq!(group.add(handler(), true), AddAction::NoChange);
    }

    #[test]
    fn test_removing_last_record_unsubscribes() {
        let mut group = key_group();
        let h = handler();
        group.add(Arc::clone(&h), true);
        group.confirm_subscribed(true);
        assert_eq!(group.remove(&h), RemoveAction::Unsubscribe);
        assert!(group.is_empty());
    }

    #[test]
    fn test_detail_downgrade_on_remove() {
        let mut group = key_group();
        let lite = handler();
        let full = handler();
        group.add(Arc::clone(&lite), true);
        group.confirm_subscribed(true);
        group.add(Arc::clone(&full), false);
        group.confirm_subscribed(false);

        assert_eq!(group.remove(&full), RemoveAction::Resubscribe { lite: true });
        group.confirm_subscribed(true);
        assert_detail_invariant(&group);
    }

    #[test]
    fn test_remove_unknown_handler_is_noop() {
        let mut group = key_group();
        group.add(handler(), true);
        assert_eq!(group.remove(&handler()), RemoveAction::NoChange);
        assert_eq!(group.records.len(), 1);
    }

    #[test]
    fn test_level_update_on_existing_record() {
        let mut group = key_group();
        let h = handler();
        group.add(Arc::clone(&h), false);
        group.confirm_subscribed(false);

        // The only record flips to lite: the group downgrades.
        assert_eq!(
            group.add(Arc::clone(&h), true),
            AddAction::Resubscribe { lite: true }
        );
        group.confirm_subscribed(true);
        assert_detail_invariant(&group);
        assert_eq!(group.records.len(), 1);
    }

    #[test]
    fn test_roll_back_removes_record() {
        let mut group = key_group();
        let h = handler();
        group.add(Arc::clone(&h), false);
        group.roll_back(&h);
        assert!(group.is_empty());
        assert_eq!(group.non_lite_count, 0);
    }
}

//! Per-endpoint, per-command subscriber bookkeeping.
//!
//! Maintains an in-memory index of endpoint → command id → subscriber
//! records so dispatch can look up the current subscriber set for an
//! inbound event in O(1). Structural operations are safe under concurrent
//! readers and writers; each (endpoint, command) record list is mutated
//! under its own entry lock, so unrelated commands never contend.

use dashmap::DashMap;
use std::sync::Arc;

use crate::endpoint::Endpoint;
use crate::listener::CommandListener;

/// One registered subscriber for an (endpoint, command) pair.
///
/// `tag` is caller-chosen and unique within the pair; the record owns a
/// reference to the callback, not to the connection.
#[derive(Clone)]
pub(crate) struct Subscription {
    pub tag: u64,
    pub listener: Arc<dyn CommandListener>,
}

/// endpoint → (command id → subscribers keyed by tag).
///
/// A command entry exists iff at least one subscriber is registered for
/// it; entries emptied by removal are pruned so the table never grows
/// without bound.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    endpoints: DashMap<Endpoint, DashMap<String, Vec<Subscription>>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscriber. A record with the same tag is replaced in
    /// place. Returns `true` when this is the first record for the
    /// (endpoint, command) pair, i.e. the caller must install the dispatch
    /// adapter with the connection.
    pub fn insert(&self, endpoint: &Endpoint, command_id: &str, sub: Subscription) -> bool {
        let commands = self.endpoints.entry(endpoint.clone()).or_default();
        let mut subs = commands.entry(command_id.to_string()).or_default();
        let first = subs.is_empty();
        match subs.iter_mut().find(|s| s.tag == sub.tag) {
            Some(existing) => *existing = sub,
            None => subs.push(sub),
        }
        first
    }

    /// Clone the current subscriber set for one dispatch. The snapshot is
    /// stable and complete; records added after it is taken are reached on
    /// the next dispatch.
    pub fn snapshot(&self, endpoint: &Endpoint, command_id: &str) -> Vec<Subscription> {
        self.endpoints
            .get(endpoint)
            .and_then(|commands| commands.get(command_id).map(|subs| subs.clone()))
            .unwrap_or_default()
    }

    /// Remove the single record matching `tag`; other subscribers for the
    /// same pair are unaffected.
    pub fn remove_tag(&self, endpoint: &Endpoint, command_id: &str, tag: u64) {
        let mut prune_endpoint = false;
        if let Some(commands) = self.endpoints.get(endpoint) {
            if let Some(mut subs) = commands.get_mut(command_id) {
                subs.retain(|s| s.tag != tag);
                let now_empty = subs.is_empty();
                drop(subs);
                if now_empty {
                    commands.remove_if(command_id, |_, subs| subs.is_empty());
                }
            }
            prune_endpoint = commands.is_empty();
        }
        if prune_endpoint {
            self.endpoints
                .remove_if(endpoint, |_, commands| commands.is_empty());
        }
    }

    /// Drop every subscriber registered under the (endpoint, command) pair.
    pub fn clear_command(&self, endpoint: &Endpoint, command_id: &str) {
        let mut prune_endpoint = false;
        if let Some(commands) = self.endpoints.get(endpoint) {
            commands.remove(command_id);
            prune_endpoint = commands.is_empty();
        }
        if prune_endpoint {
            self.endpoints
                .remove_if(endpoint, |_, commands| commands.is_empty());
        }
    }

    /// Drop every subscription entry for an endpoint.
    pub fn remove_endpoint(&self, endpoint: &Endpoint) {
        self.endpoints.remove(endpoint);
    }

    /// Drop everything, regardless of endpoint.
    pub fn clear(&self) {
        self.endpoints.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Number of subscribers currently registered for the pair.
    pub fn subscriber_count(&self, endpoint: &Endpoint, command_id: &str) -> usize {
        self.endpoints
            .get(endpoint)
            .and_then(|commands| commands.get(command_id).map(|subs| subs.len()))
            .unwrap_or(0)
    }
}

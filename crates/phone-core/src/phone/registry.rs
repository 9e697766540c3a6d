//! Active call registry
//!
//! Owns every live [`CallSession`] of a phone, indexed by call id, by locus
//! URL and, for outbound calls, by dialed target.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::call::{CallDirection, CallId, CallSession, CallState};

#[derive(Default)]
pub(crate) struct CallRegistry {
    sessions: DashMap<CallId, Arc<CallSession>>,
    by_locus: DashMap<String, CallId>,
    by_target: DashMap<String, CallId>,
}

impl CallRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, call_id: &CallId) -> Option<Arc<CallSession>> {
        self.sessions.get(call_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn find_by_locus(&self, locus_url: &str) -> Option<Arc<CallSession>> {
        let call_id = *self.by_locus.get(locus_url)?.value();
        self.get(&call_id)
    }

    pub(crate) fn contains_locus(&self, locus_url: &str) -> bool {
        self.by_locus.contains_key(locus_url)
    }

    pub(crate) fn insert(&self, session: Arc<CallSession>) {
        self.sessions.insert(session.id(), session);
    }

    /// Return the live outbound session for `target_key`, or register the
    /// one built by `create`. The flag is true when a new session was made.
    pub(crate) fn claim_outbound<F>(&self, target_key: String, create: F) -> (Arc<CallSession>, bool)
    where
        F: FnOnce() -> Arc<CallSession>,
    {
        match self.by_target.entry(target_key) {
            Entry::Occupied(mut occupied) => {
                if let Some(existing) = self.get(occupied.get()) {
                    if !existing.state().is_terminal() {
                        return (existing, false);
                    }
                }
                let session = create();
                occupied.insert(session.id());
                self.insert(session.clone());
                (session, true)
            }
            Entry::Vacant(vacant) => {
                let session = create();
                vacant.insert(session.id());
                self.insert(session.clone());
                (session, true)
            }
        }
    }

    pub(crate) fn bind_locus(&self, locus_url: &str, call_id: CallId) {
        self.by_locus.insert(locus_url.to_string(), call_id);
    }

    pub(crate) fn remove(&self, call_id: &CallId) -> Option<Arc<CallSession>> {
        self.by_locus.retain(|_, id| id != call_id);
        self.by_target.retain(|_, id| id != call_id);
        self.sessions.remove(call_id).map(|(_, session)| session)
    }

    pub(crate) fn all(&self) -> Vec<Arc<CallSession>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn count(&self, predicate: impl Fn(CallDirection, CallState) -> bool) -> usize {
        self.sessions
            .iter()
            .filter(|entry| predicate(entry.direction(), entry.state()))
            .count()
    }
}

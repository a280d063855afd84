//! Process-wide correlation of client handles to producers.
//!
//! The transport invokes the delivery callback with nothing but a client
//! handle and a report. This registry is how that callback finds the
//! producer that owns the handle.
//!
//! Entries hold a [`Weak`] reference, so the registry never keeps a producer
//! alive. A producer removes its own entry before it releases any transport
//! resource; a report that arrives afterwards finds no entry and is ignored.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, Weak};

use super::ProducerCore;
use crate::sync::{read_ignore_poison, write_ignore_poison};
use crate::{log_debug, log_error, ClientHandle, DeliveryCallback, DeliveryReport};

static GLOBAL_REGISTRY: OnceLock<CorrelationRegistry> = OnceLock::new();

#[derive(Default)]
pub(crate) struct CorrelationRegistry {
    entries: RwLock<HashMap<ClientHandle, Weak<ProducerCore>>>,
}

impl CorrelationRegistry {
    // ---

    pub fn global() -> &'static CorrelationRegistry {
        GLOBAL_REGISTRY.get_or_init(CorrelationRegistry::default)
    }

    /// Record `core` as the owner of `handle`.
    ///
    /// A live entry for the same handle means the transport reused a handle,
    /// which breaks the transport contract; the newer producer wins.
    pub fn register(&self, handle: ClientHandle, core: &Arc<ProducerCore>) {
        // ---
        let mut entries = write_ignore_poison(&self.entries);

        if let Some(previous) = entries.get(&handle) {
            if previous.strong_count() > 0 {
                log_error!("{handle} registered twice; transport reused a live client handle");
            }
        }
        entries.insert(handle, Arc::downgrade(core));
    }

    /// Remove the entry for `handle`. Returns true if one existed.
    pub fn deregister(&self, handle: ClientHandle) -> bool {
        write_ignore_poison(&self.entries).remove(&handle).is_some()
    }

    /// The producer owning `handle`, if it is registered and still alive.
    pub fn lookup(&self, handle: ClientHandle) -> Option<Arc<ProducerCore>> {
        // ---
        read_ignore_poison(&self.entries)
            .get(&handle)
            .and_then(Weak::upgrade)
    }

    /// Route one delivery report to the producer owning `handle`.
    ///
    /// Returns true if a token was retired. The registry lock is released
    /// before the producer is touched.
    pub fn dispatch(&self, handle: ClientHandle, report: DeliveryReport) -> bool {
        // ---
        match self.lookup(handle) {
            Some(core) => core.retire(report),
            None => {
                log_debug!(
                    "{handle}: no producer registered, ignoring report for token {}",
                    report.opaque.0
                );
                false
            }
        }
    }

    #[cfg(test)]
    pub fn contains(&self, handle: ClientHandle) -> bool {
        read_ignore_poison(&self.entries).contains_key(&handle)
    }
}

/// The delivery callback every producer installs on its client config.
pub(crate) fn delivery_callback() -> DeliveryCallback {
    Arc::new(|handle, report| {
        CorrelationRegistry::global().dispatch(handle, report);
    })
}

//! Endpoints multiplexed over a connection
//!
//! Frame          Connection  Endpoint
//! ===================================
//! open               H
//! begin              I          H
//! attach                        H
//! flow                          H
//! transfer                      H
//! disposition                   H
//! detach                        H
//! end                           H
//! close              H
//! -----------------------------------
//! Key:
//!     H: handled
//!     I: intercepted (the connection binds the incoming channel from
//!         `remote-channel` and then delegates to the endpoint)

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use serde_amqp::value::Value;
use slab::Slab;

use crate::states::ConnectionState;

/// Consumer of one channel's frames and of connection state changes
pub trait EndpointHandler {
    /// A performative other than OPEN or CLOSE arrived on the channel bound to this endpoint
    fn on_frame_received(&mut self, channel: u16, performative: Value, payload: Bytes);

    /// The connection moved from `previous_state` to `new_state`
    fn on_connection_state_changed(
        &mut self,
        new_state: ConnectionState,
        previous_state: ConnectionState,
    );
}

impl<T> EndpointHandler for Box<T>
where
    T: EndpointHandler + ?Sized,
{
    fn on_frame_received(&mut self, channel: u16, performative: Value, payload: Bytes) {
        (**self).on_frame_received(channel, performative, payload)
    }

    fn on_connection_state_changed(
        &mut self,
        new_state: ConnectionState,
        previous_state: ConnectionState,
    ) {
        (**self).on_connection_state_changed(new_state, previous_state)
    }
}

/// Handle to an endpoint registered on a [`Connection`](crate::Connection)
///
/// The handle stays valid until it is passed to
/// [`destroy_endpoint`](crate::Connection::destroy_endpoint) or the connection is dropped. A
/// handle is never confused with a later endpoint that reuses the same channel number, nor with
/// an endpoint of another connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    registry: u64,
    key: usize,
    generation: u64,
    outgoing_channel: u16,
}

impl Endpoint {
    /// The outgoing channel number allocated to this endpoint
    pub fn outgoing_channel(&self) -> u16 {
        self.outgoing_channel
    }
}

struct Entry {
    generation: u64,
    outgoing_channel: u16,
    incoming_channel: Option<u16>,
    handler: Box<dyn EndpointHandler>,
}

/// Registry of live endpoints.
///
/// Outgoing channels are unique and always the lowest free number; state change notifications
/// follow registration order.
pub(crate) struct Endpoints {
    id: u64,
    entries: Slab<Entry>,
    registration_order: Vec<usize>,
    by_outgoing_channel: BTreeMap<u16, usize>,
    by_incoming_channel: BTreeMap<u16, usize>,
    next_generation: u64,
}

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(0);

impl Endpoints {
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            entries: Slab::new(),
            registration_order: Vec::new(),
            by_outgoing_channel: BTreeMap::new(),
            by_incoming_channel: BTreeMap::new(),
            next_generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn lowest_free_channel(&self, channel_max: u16) -> Option<u16> {
        let mut candidate: u32 = 0;
        // keys are sorted, so the first gap is the lowest free number
        for &used in self.by_outgoing_channel.keys() {
            if used as u32 != candidate {
                break;
            }
            candidate += 1;
        }

        if candidate <= channel_max as u32 {
            Some(candidate as u16)
        } else {
            None
        }
    }

    /// Returns `None` if every channel in `[0, channel_max]` is taken
    pub fn allocate(
        &mut self,
        channel_max: u16,
        handler: Box<dyn EndpointHandler>,
    ) -> Option<Endpoint> {
        let outgoing_channel = self.lowest_free_channel(channel_max)?;
        let generation = self.next_generation;
        self.next_generation += 1;

        let key = self.entries.insert(Entry {
            generation,
            outgoing_channel,
            incoming_channel: None,
            handler,
        });
        self.registration_order.push(key);
        self.by_outgoing_channel.insert(outgoing_channel, key);

        Some(Endpoint {
            registry: self.id,
            key,
            generation,
            outgoing_channel,
        })
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        endpoint.registry == self.id
            && matches!(
                self.entries.get(endpoint.key),
                Some(entry) if entry.generation == endpoint.generation
            )
    }

    /// Removes the endpoint and releases its channel numbers. Stale handles are ignored.
    pub fn remove(&mut self, endpoint: &Endpoint) -> bool {
        if !self.contains(endpoint) {
            return false;
        }

        let entry = self.entries.remove(endpoint.key);
        self.registration_order.retain(|&key| key != endpoint.key);
        self.by_outgoing_channel.remove(&entry.outgoing_channel);
        if let Some(incoming) = entry.incoming_channel {
            self.by_incoming_channel.remove(&incoming);
        }
        true
    }

    /// Binds `incoming_channel` to the endpoint owning `outgoing_channel`
    pub fn bind_incoming_channel(&mut self, outgoing_channel: u16, incoming_channel: u16) -> bool {
        let key = match self.by_outgoing_channel.get(&outgoing_channel) {
            Some(&key) => key,
            None => return false,
        };

        if let Some(previous) = self.by_incoming_channel.insert(incoming_channel, key) {
            if previous != key {
                if let Some(entry) = self.entries.get_mut(previous) {
                    entry.incoming_channel = None;
                }
            }
        }
        if let Some(entry) = self.entries.get_mut(key) {
            if let Some(stale) = entry.incoming_channel.replace(incoming_channel) {
                if stale != incoming_channel {
                    self.by_incoming_channel.remove(&stale);
                }
            }
        }
        true
    }

    /// Hands a frame to the endpoint bound to `incoming_channel`. Returns `false` if there is none.
    pub fn dispatch_frame(&mut self, incoming_channel: u16, performative: Value, payload: Bytes) -> bool {
        let key = match self.by_incoming_channel.get(&incoming_channel) {
            Some(&key) => key,
            None => return false,
        };
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry
                    .handler
                    .on_frame_received(incoming_channel, performative, payload);
                true
            }
            None => false,
        }
    }

    pub fn notify_state_changed(&mut self, new_state: ConnectionState, previous_state: ConnectionState) {
        for key in &self.registration_order {
            if let Some(entry) = self.entries.get_mut(*key) {
                entry
                    .handler
                    .on_connection_state_changed(new_state, previous_state);
            }
        }
    }
}

//! Single authoritative holder of the observable session state.
//!
//! Listeners get a payload-free "state changed" signal and re-read via
//! [`SessionHub::snapshot`], so concurrent mutations can never deliver a
//! stale copy. All mutation entry points belong to the connection session;
//! the hub itself performs no I/O.

use crate::domain::models::{DeviceDescriptor, ImuSample, RepetitionState, SessionState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Point-in-time copy of everything the UI layer can observe.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Devices seen by the active scan, in discovery order, deduplicated
    /// by identifier. Discovery order is not meaningful.
    pub devices: Vec<DeviceDescriptor>,
    pub last_sample: Option<ImuSample>,
    pub repetition: RepetitionState,
    pub last_error: Option<String>,
}

pub struct SessionHub {
    state: Mutex<SessionSnapshot>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

/// Handle returned by [`SessionHub::subscribe`]; dropping it removes the
/// listener.
pub struct Subscription {
    hub: Weak<SessionHub>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            let mut listeners = hub.listeners.lock().unwrap();
            listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl SessionHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SessionSnapshot::default()),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Register a change listener. The listener receives no payload; call
    /// [`snapshot`](SessionHub::snapshot) to read the current state.
    pub fn subscribe(self: &Arc<Self>, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().unwrap().push((id, Arc::new(listener)));
        Subscription {
            hub: Arc::downgrade(self),
            id,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().unwrap().clone()
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().unwrap().state
    }

    /// Apply a mutation and notify every listener.
    pub(crate) fn update(&self, mutate: impl FnOnce(&mut SessionSnapshot)) {
        {
            let mut state = self.state.lock().unwrap();
            mutate(&mut state);
        }
        self.notify();
    }

    /// Append a discovered device unless its identifier is already listed.
    /// Returns whether the list changed.
    pub(crate) fn add_device(&self, device: DeviceDescriptor) -> bool {
        let added = {
            let mut state = self.state.lock().unwrap();
            if state.devices.iter().any(|d| d.id == device.id) {
                false
            } else {
                state.devices.push(device);
                true
            }
        };
        if added {
            self.notify();
        }
        added
    }

    fn notify(&self) {
        // Invoke outside the state lock so listeners can snapshot() freely.
        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().unwrap();
            guard.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener();
        }
    }
}

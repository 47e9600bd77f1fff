//! Synchronous, ordered event delivery for in-process observers.
//!
//! The tick dispatcher hands every notification to an [`EventSink`]. The
//! sink delivers it to zero or more registered [`Listener`]s in
//! registration order, on the caller's thread, before returning. There is
//! no queue and no event loop: a listener that blocks stalls the caller,
//! which for tick events means it stalls the host program itself.
//!
//! [`EventBus`] is the standard sink. It is single-threaded by
//! construction (`Rc` + `RefCell`), matching the host's single-threaded
//! tick routine.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

/// A destination for events of type `E`.
///
/// Delivery is synchronous. The return value of individual listeners is
/// not observable by the dispatcher.
pub trait EventSink<E> {
    /// Deliver `event` to every registered listener, in order.
    fn dispatch(&self, event: &E);
}

impl<E, S: EventSink<E> + ?Sized> EventSink<E> for Rc<S> {
    fn dispatch(&self, event: &E) {
        (**self).dispatch(event);
    }
}

/// An observer of events of type `E`.
///
/// Any `Fn(&E)` closure is a listener. Listeners that need to accumulate
/// state use interior mutability, since delivery only hands out `&self`.
pub trait Listener<E> {
    /// Called once per dispatched event.
    fn on_event(&self, event: &E);
}

impl<E, F: Fn(&E)> Listener<E> for F {
    fn on_event(&self, event: &E) {
        self(event);
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Return the raw identifier value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Ordered listener registry implementing [`EventSink`].
///
/// Dispatch works on a snapshot of the listener list, so a listener may
/// subscribe or unsubscribe while an event is being delivered. Such changes
/// take effect from the next dispatch.
pub struct EventBus<E> {
    listeners: RefCell<Vec<(ListenerId, Rc<dyn Listener<E>>)>>,
    next_id: Cell<u64>,
}

impl<E> EventBus<E> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    /// Register a listener. Listeners are called in registration order.
    pub fn subscribe<L>(&self, listener: L) -> ListenerId
    where
        L: Listener<E> + 'static,
    {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(self.next_id.get().saturating_add(1));
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        trace!(listener = %id, "Listener subscribed");
        id
    }

    /// Remove a listener. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        let removed = listeners.len() != before;
        if removed {
            trace!(listener = %id, "Listener unsubscribed");
        }
        removed
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.borrow().is_empty()
    }
}

impl<E> EventSink<E> for EventBus<E> {
    fn dispatch(&self, event: &E) {
        // The borrow must be released before listeners run so that they can
        // call back into `subscribe`/`unsubscribe`.
        let snapshot: Vec<Rc<dyn Listener<E>>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();

        for listener in &snapshot {
            listener.on_event(event);
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> core::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .field("next_id", &self.next_id.get())
            .finish()
    }
}

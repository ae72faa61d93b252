//! Typed change notification shared by the registry, token provider, and pinning manager.
//!
//! Listeners registered with [`EventBus::subscribe`] run synchronously inside
//! [`EventBus::emit`], so state they evict is gone before the emitter returns. UI consumers that
//! prefer an async stream use [`EventBus::stream`] instead.

// std
use std::sync::{
	Weak,
	atomic::{AtomicU64, Ordering},
};
// crates.io
use tokio::sync::broadcast;
// self
use crate::_prelude::*;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

const STREAM_CAPACITY: usize = 64;

struct Listeners<E> {
	next_id: AtomicU64,
	entries: RwLock<Vec<(u64, Listener<E>)>>,
}

/// Broadcast primitive with consumer-owned unsubscribe handles.
pub struct EventBus<E> {
	listeners: Arc<Listeners<E>>,
	sender: broadcast::Sender<E>,
}
impl<E> EventBus<E>
where
	E: 'static + Clone + Send + Sync,
{
	/// Creates an empty bus.
	pub fn new() -> Self {
		let (sender, _) = broadcast::channel(STREAM_CAPACITY);

		Self {
			listeners: Arc::new(Listeners { next_id: AtomicU64::new(0), entries: RwLock::default() }),
			sender,
		}
	}

	/// Registers a synchronous listener; dropping the returned [`Subscription`] removes it.
	pub fn subscribe<F>(&self, listener: F) -> Subscription
	where
		F: 'static + Fn(&E) + Send + Sync,
	{
		let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);

		self.listeners.entries.write().push((id, Arc::new(listener)));

		let weak: Weak<Listeners<E>> = Arc::downgrade(&self.listeners);

		Subscription {
			detach: Some(Box::new(move || {
				if let Some(listeners) = weak.upgrade() {
					listeners.entries.write().retain(|(entry, _)| *entry != id);
				}
			})),
		}
	}

	/// Returns a lagging-tolerant receiver of every future event.
	pub fn stream(&self) -> broadcast::Receiver<E> {
		self.sender.subscribe()
	}

	/// Delivers `event` to every listener, then to stream receivers.
	pub fn emit(&self, event: E) {
		let listeners =
			self.listeners.entries.read().iter().map(|(_, l)| l.clone()).collect::<Vec<_>>();

		for listener in listeners {
			listener(&event);
		}

		// No receivers is the common case for headless hosts.
		let _ = self.sender.send(event);
	}

	/// Number of live synchronous listeners.
	pub fn listener_count(&self) -> usize {
		self.listeners.entries.read().len()
	}
}
impl<E> Default for EventBus<E>
where
	E: 'static + Clone + Send + Sync,
{
	fn default() -> Self {
		Self::new()
	}
}
impl<E> Debug for EventBus<E> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("EventBus")
			.field("listeners", &self.listeners.entries.read().len())
			.field("receivers", &self.sender.receiver_count())
			.finish()
	}
}

/// Handle that keeps a listener registered for as long as it lives.
#[must_use = "Dropping a subscription immediately unsubscribes the listener."]
pub struct Subscription {
	detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}
impl Subscription {
	/// Keeps the listener registered for the rest of the bus lifetime.
	pub fn forget(mut self) {
		self.detach = None;
	}
}
impl Debug for Subscription {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("Subscription(..)")
	}
}
impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(detach) = self.detach.take() {
			detach();
		}
	}
}

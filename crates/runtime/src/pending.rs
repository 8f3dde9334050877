//! Pending-request table for request/response over a fire-and-forget channel.
//!
//! The host boundary has no native replies, so a request is an outbound
//! envelope stamped with a correlation id and a response is any later inbound
//! envelope that resolves that id. Each waiter holds a [`PendingResponse`]
//! whose [`CancelGuard`] removes the table entry if the waiter is dropped
//! (timeout, cancellation) before a response arrives.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

type Waiters<T> = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<T>>>>>;

/// Table of outstanding requests keyed by correlation id.
pub struct PendingRequests<T> {
	next_id: AtomicU64,
	waiters: Waiters<T>,
}

impl<T: Send + 'static> Default for PendingRequests<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T: Send + 'static> PendingRequests<T> {
	pub fn new() -> Self {
		Self {
			next_id: AtomicU64::new(1),
			waiters: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// Allocates a correlation id without registering a waiter.
	pub fn allocate_id(&self) -> u64 {
		self.next_id.fetch_add(1, Ordering::SeqCst)
	}

	/// Allocates a correlation id and registers a waiter for it.
	pub fn register(&self) -> PendingResponse<T> {
		let id = self.allocate_id();
		let (tx, rx) = oneshot::channel();
		self.waiters.lock().insert(id, tx);
		PendingResponse {
			id,
			rx,
			guard: CancelGuard {
				id,
				waiters: Arc::downgrade(&self.waiters),
				completed: false,
			},
		}
	}

	/// Resolves one request. Returns false for unknown or already-settled ids.
	pub fn resolve(&self, id: u64, value: T) -> bool {
		match self.waiters.lock().remove(&id) {
			Some(tx) => tx.send(Ok(value)).is_ok(),
			None => false,
		}
	}

	/// Resolves every outstanding request with the same value.
	pub fn resolve_all(&self, value: T) -> usize
	where
		T: Clone,
	{
		let drained: Vec<_> = self.waiters.lock().drain().collect();
		drained
			.into_iter()
			.filter(|(_, tx)| !tx.is_closed())
			.map(|(_, tx)| tx.send(Ok(value.clone())).is_ok())
			.filter(|sent| *sent)
			.count()
	}

	/// Fails every outstanding request, building one error per waiter.
	pub fn fail_all(&self, error: impl Fn() -> Error) -> usize {
		let drained: Vec<_> = self.waiters.lock().drain().collect();
		drained
			.into_iter()
			.map(|(_, tx)| tx.send(Err(error())).is_ok())
			.filter(|sent| *sent)
			.count()
	}

	pub fn contains(&self, id: u64) -> bool {
		self.waiters.lock().contains_key(&id)
	}

	pub fn len(&self) -> usize {
		self.waiters.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// RAII guard removing the table entry when a waiter is abandoned.
struct CancelGuard<T> {
	id: u64,
	waiters: Weak<Mutex<HashMap<u64, oneshot::Sender<Result<T>>>>>,
	completed: bool,
}

impl<T> Drop for CancelGuard<T> {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if let Some(waiters) = self.waiters.upgrade() {
			if waiters.lock().remove(&self.id).is_some() {
				tracing::debug!(request_id = self.id, "Removed abandoned pending request");
			}
		}
	}
}

/// Future resolving to the response for one correlation id.
pub struct PendingResponse<T> {
	id: u64,
	rx: oneshot::Receiver<Result<T>>,
	guard: CancelGuard<T>,
}

impl<T> PendingResponse<T> {
	pub fn id(&self) -> u64 {
		self.id
	}

	/// Waits for the response with a deadline.
	///
	/// # Errors
	///
	/// - [`Error::Timeout`] if nothing resolves the id within `timeout`
	/// - [`Error::ChannelClosed`] if the table is dropped first
	pub async fn wait(self, timeout: Duration) -> Result<T> {
		let id = self.id;
		tokio::time::timeout(timeout, self).await.map_err(|_| {
			Error::Timeout(format!(
				"No response to request {id} within {}ms",
				timeout.as_millis()
			))
		})?
	}
}

impl<T> Future for PendingResponse<T> {
	type Output = Result<T>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.completed = true;
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn resolve_delivers_to_matching_waiter() {
		let table: PendingRequests<String> = PendingRequests::new();
		let first = table.register();
		let second = table.register();
		assert_ne!(first.id(), second.id());

		assert!(table.resolve(second.id(), "two".into()));
		assert_eq!(second.await.unwrap(), "two");
		assert!(table.contains(first.id()));
		assert!(!table.resolve(999, "nobody".into()));
	}

	#[tokio::test]
	async fn resolve_all_settles_every_waiter() {
		let table: PendingRequests<u32> = PendingRequests::new();
		let waiters: Vec<_> = (0..3).map(|_| table.register()).collect();

		assert_eq!(table.resolve_all(7), 3);
		assert!(table.is_empty());
		for waiter in waiters {
			assert_eq!(waiter.await.unwrap(), 7);
		}
	}

	#[tokio::test]
	async fn fail_all_surfaces_errors() {
		let table: PendingRequests<u32> = PendingRequests::new();
		let waiter = table.register();

		assert_eq!(table.fail_all(|| Error::Disposed("ContextStore")), 1);
		assert!(matches!(waiter.await, Err(Error::Disposed("ContextStore"))));
	}

	#[tokio::test(start_paused = true)]
	async fn timeout_removes_entry() {
		let table: PendingRequests<u32> = PendingRequests::new();
		let waiter = table.register();
		let id = waiter.id();

		let result = waiter.wait(Duration::from_millis(50)).await;
		assert!(result.unwrap_err().is_timeout());
		assert!(!table.contains(id));
	}

	#[test]
	fn dropping_waiter_cancels_request() {
		let table: PendingRequests<u32> = PendingRequests::new();
		let waiter = table.register();
		assert_eq!(table.len(), 1);

		drop(waiter);
		assert!(table.is_empty());
	}
}

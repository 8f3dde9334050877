use std::time::Duration;

use ember_runtime::FetchError;
use futures_util::future::{BoxFuture, Shared};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

/// Lifecycle of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
	/// Created but never fetched.
	Idle,
	Fetching,
	Fresh,
	/// Past its ttl or invalidated; the next read refetches.
	Stale,
	/// The last fetch failed after its retry.
	Error(String),
}

/// Point-in-time view of an entry, as seen by observers.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot {
	pub state: EntryState,
	pub data: Option<Value>,
	pub fetched_at: Option<Instant>,
}

impl EntrySnapshot {
	fn idle() -> Self {
		Self {
			state: EntryState::Idle,
			data: None,
			fetched_at: None,
		}
	}
}

pub(crate) struct Entry {
	pub(crate) state: EntryState,
	pub(crate) data: Option<Value>,
	pub(crate) fetched_at: Option<Instant>,
	pub(crate) ttl: Duration,
	/// Bumped by invalidation and mutation; a fetch started under an older
	/// generation lands `Stale`.
	pub(crate) generation: u64,
	pub(crate) in_flight: Option<SharedFetch>,
	pub(crate) last_access: Instant,
	pub(crate) tx: watch::Sender<EntrySnapshot>,
}

impl Entry {
	pub(crate) fn new(ttl: Duration) -> Self {
		let (tx, _) = watch::channel(EntrySnapshot::idle());
		Self {
			state: EntryState::Idle,
			data: None,
			fetched_at: None,
			ttl,
			generation: 0,
			in_flight: None,
			last_access: Instant::now(),
			tx,
		}
	}

	/// Demotes `Fresh` to `Stale` once the ttl has elapsed.
	pub(crate) fn expire(&mut self, now: Instant) {
		if self.state != EntryState::Fresh {
			return;
		}
		if let Some(fetched_at) = self.fetched_at {
			if now.duration_since(fetched_at) >= self.ttl {
				self.state = EntryState::Stale;
				self.publish();
			}
		}
	}

	pub(crate) fn fresh_data(&self) -> Option<&Value> {
		match self.state {
			EntryState::Fresh => self.data.as_ref(),
			_ => None,
		}
	}

	pub(crate) fn snapshot(&self) -> EntrySnapshot {
		EntrySnapshot {
			state: self.state.clone(),
			data: self.data.clone(),
			fetched_at: self.fetched_at,
		}
	}

	/// Rolls back to `snapshot`.
	///
	/// A snapshot taken mid-fetch restores to `Stale` or `Idle` once that
	/// fetch has settled, so the next read fetches again.
	pub(crate) fn restore(&mut self, snapshot: EntrySnapshot) {
		self.state = match snapshot.state {
			EntryState::Fetching if self.in_flight.is_none() => match snapshot.data {
				Some(_) => EntryState::Stale,
				None => EntryState::Idle,
			},
			state => state,
		};
		self.data = snapshot.data;
		self.fetched_at = snapshot.fetched_at;
		self.publish();
	}

	pub(crate) fn publish(&self) {
		self.tx.send_replace(self.snapshot());
	}

	pub(crate) fn is_observed(&self) -> bool {
		self.tx.receiver_count() > 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn fresh_entries_expire_after_ttl() {
		let mut entry = Entry::new(Duration::from_secs(10));
		entry.state = EntryState::Fresh;
		entry.data = Some(Value::from(1));
		entry.fetched_at = Some(Instant::now());
		let rx = entry.tx.subscribe();

		entry.expire(Instant::now() + Duration::from_secs(9));
		assert_eq!(entry.fresh_data(), Some(&Value::from(1)));

		entry.expire(Instant::now() + Duration::from_secs(10));
		assert_eq!(entry.state, EntryState::Stale);
		assert_eq!(entry.fresh_data(), None);
		assert_eq!(rx.borrow().state, EntryState::Stale);
	}

	#[test]
	fn restoring_a_settled_fetch_does_not_report_fetching() {
		let mut entry = Entry::new(Duration::from_secs(10));
		let mid_fetch = EntrySnapshot {
			state: EntryState::Fetching,
			..EntrySnapshot::idle()
		};

		entry.restore(mid_fetch.clone());
		assert_eq!(entry.state, EntryState::Idle);

		entry.restore(EntrySnapshot {
			data: Some(Value::from(1)),
			..mid_fetch
		});
		assert_eq!(entry.state, EntryState::Stale);
		assert_eq!(entry.tx.borrow().state, EntryState::Stale);
	}

	#[test]
	fn observation_follows_receivers() {
		let entry = Entry::new(Duration::from_secs(1));
		assert!(!entry.is_observed());
		let rx = entry.tx.subscribe();
		assert!(entry.is_observed());
		drop(rx);
		assert!(!entry.is_observed());
	}
}

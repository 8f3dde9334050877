//! Session state machine.

use ember_runtime::{Error, Result};

use super::provider::{AccessToken, Account};

/// Current authentication phase.
///
/// Owned by the [`SessionCoordinator`](super::SessionCoordinator); transitions
/// go through [`SessionPhase::check_transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
	Uninitialized,
	ResolvingHandoff,
	NoAccount,
	AcquiringInteractive,
	Authenticated { account: Account, token: AccessToken },
	SilentRefreshing { account: Account },
	/// Terminal. Never left without a new coordinator.
	Failed { reason: String },
}

/// Data-free discriminant of [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
	Uninitialized,
	ResolvingHandoff,
	NoAccount,
	AcquiringInteractive,
	Authenticated,
	SilentRefreshing,
	Failed,
}

impl SessionState {
	pub fn phase(&self) -> SessionPhase {
		match self {
			SessionState::Uninitialized => SessionPhase::Uninitialized,
			SessionState::ResolvingHandoff => SessionPhase::ResolvingHandoff,
			SessionState::NoAccount => SessionPhase::NoAccount,
			SessionState::AcquiringInteractive => SessionPhase::AcquiringInteractive,
			SessionState::Authenticated { .. } => SessionPhase::Authenticated,
			SessionState::SilentRefreshing { .. } => SessionPhase::SilentRefreshing,
			SessionState::Failed { .. } => SessionPhase::Failed,
		}
	}

	pub fn name(&self) -> &'static str {
		self.phase().name()
	}

	pub fn account(&self) -> Option<&Account> {
		match self {
			SessionState::Authenticated { account, .. } | SessionState::SilentRefreshing { account } => Some(account),
			_ => None,
		}
	}

	pub fn is_authenticated(&self) -> bool {
		matches!(
			self,
			SessionState::Authenticated { .. } | SessionState::SilentRefreshing { .. }
		)
	}
}

impl SessionPhase {
	pub fn name(self) -> &'static str {
		match self {
			SessionPhase::Uninitialized => "Uninitialized",
			SessionPhase::ResolvingHandoff => "ResolvingHandoff",
			SessionPhase::NoAccount => "NoAccount",
			SessionPhase::AcquiringInteractive => "AcquiringInteractive",
			SessionPhase::Authenticated => "Authenticated",
			SessionPhase::SilentRefreshing => "SilentRefreshing",
			SessionPhase::Failed => "Failed",
		}
	}

	/// Whether `self -> next` is an edge of the state machine.
	pub fn can_transition(self, next: SessionPhase) -> bool {
		use SessionPhase::*;

		match (self, next) {
			(Failed, _) => false,
			(_, Failed) => true,
			(Uninitialized, ResolvingHandoff) => true,
			(ResolvingHandoff, NoAccount | Authenticated) => true,
			(NoAccount, AcquiringInteractive) => true,
			(AcquiringInteractive, Authenticated) => true,
			(Authenticated, SilentRefreshing | NoAccount) => true,
			(SilentRefreshing, Authenticated | AcquiringInteractive | NoAccount) => true,
			_ => false,
		}
	}

	pub fn check_transition(self, next: SessionPhase) -> Result<()> {
		if self.can_transition(next) {
			Ok(())
		} else {
			Err(Error::InvalidTransition {
				from: self.name(),
				to: next.name(),
			})
		}
	}
}

#[cfg(test)]
mod tests {
	use super::SessionPhase::*;
	use super::*;

	#[test]
	fn happy_path_edges_are_allowed() {
		let path = [
			Uninitialized,
			ResolvingHandoff,
			NoAccount,
			AcquiringInteractive,
			Authenticated,
			SilentRefreshing,
			Authenticated,
		];
		for pair in path.windows(2) {
			assert!(pair[0].can_transition(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
		}
	}

	#[test]
	fn failed_is_terminal_and_reachable_from_anywhere() {
		for phase in [
			Uninitialized,
			ResolvingHandoff,
			NoAccount,
			AcquiringInteractive,
			Authenticated,
			SilentRefreshing,
		] {
			assert!(phase.can_transition(Failed));
			assert!(!Failed.can_transition(phase));
		}
		assert!(!Failed.can_transition(Failed));
	}

	#[test]
	fn skipping_states_is_rejected() {
		let err = Uninitialized.check_transition(Authenticated).unwrap_err();
		assert_eq!(err.to_string(), "Invalid session transition: Uninitialized -> Authenticated");
		assert!(NoAccount.check_transition(Authenticated).is_err());
		assert!(SilentRefreshing.check_transition(ResolvingHandoff).is_err());
	}

	#[test]
	fn sign_out_returns_to_no_account() {
		assert!(Authenticated.can_transition(NoAccount));
	}
}

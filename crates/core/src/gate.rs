//! What the embedded app may render right now.

use crate::context::ContextStore;
use crate::session::SessionState;

/// Rendering gate derived from session and context state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
	/// Session is still resolving.
	Loading,
	LoginRequired,
	/// Authenticated, but the host has not supplied a context yet.
	AwaitingContext,
	Ready,
	/// Session failed terminally.
	Blocked(String),
}

impl Gate {
	pub fn evaluate(session: &SessionState, context: &ContextStore) -> Self {
		match session {
			SessionState::Uninitialized | SessionState::ResolvingHandoff | SessionState::AcquiringInteractive => {
				Gate::Loading
			}
			SessionState::NoAccount => Gate::LoginRequired,
			SessionState::Failed { reason } => Gate::Blocked(reason.clone()),
			SessionState::Authenticated { .. } | SessionState::SilentRefreshing { .. } => {
				if context.is_standalone() || context.current().is_some() {
					Gate::Ready
				} else {
					Gate::AwaitingContext
				}
			}
		}
	}

	pub fn is_ready(&self) -> bool {
		matches!(self, Gate::Ready)
	}
}

impl std::fmt::Display for Gate {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Gate::Loading => f.write_str("loading"),
			Gate::LoginRequired => f.write_str("login required"),
			Gate::AwaitingContext => f.write_str("awaiting context"),
			Gate::Ready => f.write_str("ready"),
			Gate::Blocked(reason) => write!(f, "blocked: {reason}"),
		}
	}
}

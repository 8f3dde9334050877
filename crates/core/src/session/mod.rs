//! Authenticated session management.
//!
//! [`SessionCoordinator`] owns the [`SessionState`] machine and brokers
//! tokens from an [`IdentityProvider`]:
//!
//! ```text
//! Uninitialized -> ResolvingHandoff -> NoAccount | Authenticated
//! NoAccount -> AcquiringInteractive -> Authenticated | Failed
//! Authenticated -> SilentRefreshing -> Authenticated | AcquiringInteractive
//! Authenticated -> NoAccount (sign-out)
//! * -> Failed (terminal)
//! ```

mod coordinator;
mod provider;
mod state;

#[cfg(test)]
mod tests;

pub use coordinator::{SessionCoordinator, SessionOptions};
pub use provider::{
	AccessToken, Account, Authentication, CredentialStore, FileCredentialStore, IdentityProvider, InteractionMode,
	MemoryCredentialStore, ScopeSet, StaticIdentityProvider,
};
pub use state::{SessionPhase, SessionState};

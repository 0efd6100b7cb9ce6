//! Session credential handling
//!
//! - [`ports`]: credential store and remote authority boundaries
//! - [`RefreshMutex`]: FIFO hand-off lock around the authority
//! - [`RefreshLedger`]: per-token attempt ceiling inside a sliding window
//! - [`TokenRefreshCoordinator`]: single-flight refresh built on the above

pub mod coordinator;
pub mod ledger;
pub mod mutex;
pub mod ports;

pub use coordinator::TokenRefreshCoordinator;
pub use ledger::{fingerprint, LedgerDecision, RefreshLedger};
pub use mutex::{RefreshMutex, RefreshPermit};
pub use ports::{CredentialStore, RemoteAuthority};

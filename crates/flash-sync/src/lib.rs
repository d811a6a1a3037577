pub mod coordinator;
pub mod error;
pub mod http;
pub mod remote;

pub use coordinator::{SyncCoordinator, SyncOutcome, run_sync_loop};
pub use error::{RemoteError, SyncError};
pub use http::HttpRemote;
pub use remote::RemoteSource;

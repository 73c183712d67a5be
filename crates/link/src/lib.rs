pub mod dispatch;
pub mod status;
pub mod supervisor;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use dispatch::{BulkReport, BulkResult, BulkStatus, DispatchError, Dispatcher, SendReceipt};
pub use status::{ConnectionStatus, Phase, StatusStore, StatusUpdate};
pub use supervisor::{AuthMethod, Supervisor, SupervisorConfig};

pub mod config;
pub mod error;
pub mod types;

pub use error::{CfoldError, CfoldResult, ErrorClass, RemoteError};
pub use types::{FolderId, LockToken};

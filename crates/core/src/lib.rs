pub mod condition;
pub mod error;
pub mod send;
pub mod types;

pub use condition::{SendCondition, SendFilter, SendMutation};
pub use error::CoreError;
pub use send::{SendKind, SendRecord, SendState};
pub use types::{BlobKey, SendId};

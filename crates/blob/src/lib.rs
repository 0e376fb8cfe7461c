pub mod error;
pub mod fs;
pub mod memory;
pub mod store;
pub mod testing;

pub use error::BlobError;
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use store::BlobStore;

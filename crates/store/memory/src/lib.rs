pub mod repository;

pub use repository::MemorySendRepository;

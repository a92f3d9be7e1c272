pub mod memory;
pub mod sqlite;
pub mod worker;

pub use memory::MemorySink;
pub use sqlite::SqliteSink;
pub use worker::SinkWorker;

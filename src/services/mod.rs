pub mod blob_store;
pub mod executor;
pub mod lookup_table;
pub mod pipeline;
pub mod worker;

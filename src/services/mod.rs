pub mod assembler;
pub mod chunk_store;
pub mod error;
pub mod worker;

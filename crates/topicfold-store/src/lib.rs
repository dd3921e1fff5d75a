//! Storage layer: Parquet files in, annotated Parquet files out.

mod error;
mod parquet_io;

pub use error::StoreError;
pub use parquet_io::{load_dataset, read_parquet, save_dataset, write_parquet};

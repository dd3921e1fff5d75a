//! Parquet read/write for datasets.

use std::fs::File;
use std::path::Path;

use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use topicfold_core::Dataset;
use tracing::info;

use crate::StoreError;

/// Read a Parquet file into Arrow RecordBatches.
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>, StoreError> {
    if !path.exists() {
        return Err(StoreError::ParquetNotFound(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    Ok(batches?)
}

/// Write RecordBatches to a Parquet file, replacing any existing file.
///
/// All batches must share the schema of the first one.
pub fn write_parquet(path: &Path, batches: &[RecordBatch]) -> Result<(), StoreError> {
    let Some(first) = batches.first() else {
        return Ok(());
    };
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, first.schema(), None)?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;
    Ok(())
}

/// Load a Parquet file as a [`Dataset`]; see [`Dataset::from_record_batches`].
pub fn load_dataset(path: &Path, id_column: Option<&str>) -> Result<Dataset, StoreError> {
    let batches = read_parquet(path)?;
    let dataset = Dataset::from_record_batches(&batches, id_column)?;
    info!(path = %path.display(), rows = dataset.len(), "loaded dataset");
    Ok(dataset)
}

/// Save a [`Dataset`] (row ids plus every text column) as Parquet.
pub fn save_dataset(path: &Path, dataset: &Dataset) -> Result<(), StoreError> {
    let batch = dataset.to_record_batch()?;
    write_parquet(path, &[batch])?;
    info!(path = %path.display(), rows = dataset.len(), "saved dataset");
    Ok(())
}

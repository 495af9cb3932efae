use crate::error::ImportExportError;
use serde::Serialize;
use std::path::Path;

/// Write one CSV record per row, header taken from the row's field names
pub fn export_rows<T, P>(rows: &[T], output_path: P) -> Result<(), ImportExportError>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = output_path.as_ref();
    let failed = |reason: String| ImportExportError::ExportFailed {
        path: path.to_path_buf(),
        reason,
    };

    let mut writer = ::csv::Writer::from_path(path).map_err(|e| failed(e.to_string()))?;
    for row in rows {
        writer.serialize(row).map_err(|e| failed(e.to_string()))?;
    }
    writer.flush().map_err(|e| failed(e.to_string()))?;

    Ok(())
}

use crate::error::ImportExportError;
use std::io::Write;
use std::path::Path;

/// Export any serializable data structure to pretty-printed JSON
pub fn export_json<T, P>(data: &T, output_path: P) -> Result<(), ImportExportError>
where
    T: serde::Serialize + ?Sized,
    P: AsRef<Path>,
{
    let path = output_path.as_ref();
    let failed = |reason: String| ImportExportError::ExportFailed {
        path: path.to_path_buf(),
        reason,
    };

    let json_data = serde_json::to_string_pretty(data).map_err(|e| failed(e.to_string()))?;

    let mut file = std::fs::File::create(path).map_err(|e| failed(e.to_string()))?;
    file.write_all(json_data.as_bytes())
        .map_err(|e| failed(e.to_string()))?;

    Ok(())
}

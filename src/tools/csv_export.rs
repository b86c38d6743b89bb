//! CSV generation for query result exports.
//!
//! Output is UTF-8, comma-separated with CRLF line endings and RFC-4180
//! quoting; the header row follows the source result's column order. Files
//! land in the configured export directory under a timestamped name and are
//! removed by the caller once the transport finishes uploading.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::memory::types::Row;
use crate::tools::formatting::format_value;

/// Build the default timestamped export filename.
pub fn default_export_filename() -> String {
    format!(
        "app_portfolio_export_{}.csv",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    )
}

/// Write `data` to a CSV file in `export_dir`.
///
/// Columns come from the first row's key order. Empty data is refused.
pub fn write_csv(
    data: &[Row],
    export_dir: &Path,
    filename: Option<&str>,
) -> Result<PathBuf, String> {
    if data.is_empty() {
        return Err("Cannot generate CSV from empty data".to_string());
    }

    let mut name = filename
        .map(|f| f.to_string())
        .unwrap_or_else(default_export_filename);
    if !name.ends_with(".csv") {
        name.push_str(".csv");
    }

    let columns: Vec<String> = data[0].keys().cloned().collect();
    let mut out = String::new();

    out.push_str(
        &columns
            .iter()
            .map(|c| escape_field(c))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push_str("\r\n");

    for row in data {
        let line = columns
            .iter()
            .map(|c| escape_field(&cell_text(row.get(c))))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push_str("\r\n");
    }

    let path = export_dir.join(name);
    std::fs::write(&path, out.as_bytes())
        .map_err(|e| format!("failed to write {}: {e}", path.display()))?;

    tracing::info!(path = %path.display(), rows = data.len(), "generated csv export");
    Ok(path)
}

/// Delete an export after upload completion. Missing files are ignored.
pub fn cleanup_export(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "cleaned up csv export"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to clean up export"),
    }
}

fn cell_text(value: Option<&Value>) -> String {
    value.map(format_value).unwrap_or_default()
}

/// RFC-4180: quote fields containing commas, quotes, or line breaks;
/// embedded quotes double.
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

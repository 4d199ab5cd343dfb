//! Raw sheet access: workbook grid loading and single-sheet extraction.
//!
//! A [`SheetGrid`] is a named rectangle of trimmed cell strings with no
//! structural interpretation; the transformers do all header/column
//! inference on top of it. Grids come either from a multi-sheet `.xlsx`
//! workbook (via calamine) or from a previously extracted headerless CSV.

use crate::error::{PipelineError, Result};
use calamine::{open_workbook, Data, Reader, Xlsx};
use std::path::Path;
use tracing::{info, warn};

/// One worksheet as raw string cells. Empty cells are empty strings.
#[derive(Debug, Clone)]
pub struct SheetGrid {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl SheetGrid {
    /// Cell at (row, col), empty string when out of range.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Render one spreadsheet cell as the string the transformers consume.
///
/// Whole floats print without the trailing `.0` so numeric roll numbers
/// round-trip as plain digits.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 {
                format!("{f:.0}")
            } else {
                f.to_string()
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERR:{e:?}"),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
    }
}

/// Read every sheet of an `.xlsx` workbook as raw grids.
pub fn read_workbook_grids(path: &Path) -> Result<Vec<SheetGrid>> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(format!(
            "workbook not found: {}",
            path.display()
        )));
    }
    let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e| {
        PipelineError::Spreadsheet(format!("failed to open {}: {e}", path.display()))
    })?;

    let mut grids = Vec::new();
    for name in workbook.sheet_names().to_vec() {
        let range = workbook.worksheet_range(&name).map_err(|e| {
            PipelineError::Spreadsheet(format!("failed to read sheet '{name}': {e}"))
        })?;
        let rows = range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();
        grids.push(SheetGrid { name, rows });
    }
    Ok(grids)
}

/// Read a previously extracted headerless CSV grid. The sheet name is not
/// stored in the file, so the caller supplies it.
pub fn read_csv_grid(path: &Path, name: &str) -> Result<SheetGrid> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(format!(
            "extracted sheet not found: {}",
            path.display()
        )));
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|c| c.trim().to_string()).collect());
    }
    Ok(SheetGrid {
        name: name.to_string(),
        rows,
    })
}

/// Load the grids a transformer should scan. An `.xlsx` path yields all of
/// its sheets; anything else is treated as a single extracted CSV grid named
/// `fallback_name`.
pub fn load_grids(path: &Path, fallback_name: &str) -> Result<Vec<SheetGrid>> {
    let is_xlsx = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xlsx") || e.eq_ignore_ascii_case("xlsm"));
    if is_xlsx {
        read_workbook_grids(path)
    } else {
        Ok(vec![read_csv_grid(path, fallback_name)?])
    }
}

/// List sheet names of a workbook without loading cell data.
pub fn workbook_sheet_names(path: &Path) -> Result<Vec<String>> {
    let workbook: Xlsx<_> = open_workbook(path).map_err(|e| {
        PipelineError::Spreadsheet(format!("failed to open {}: {e}", path.display()))
    })?;
    Ok(workbook.sheet_names().to_vec())
}

/// Extracts one sheet from a shared multi-sheet workbook into a standalone
/// grid file. Pure I/O filter; no structural inference.
pub struct SheetExtractor;

impl SheetExtractor {
    /// Extract `sheet_name` from `source` into `output` as a headerless CSV
    /// grid. Returns `false` when the sheet does not exist in the workbook
    /// (exact, case-sensitive match), `Err` when the source is missing or
    /// unreadable.
    pub fn extract(source: &Path, sheet_name: &str, output: &Path) -> Result<bool> {
        if !source.exists() {
            return Err(PipelineError::MissingInput(format!(
                "source workbook not found: {}",
                source.display()
            )));
        }

        let grids = read_workbook_grids(source)?;
        let Some(grid) = grids.iter().find(|g| g.name == sheet_name) else {
            warn!(
                "sheet '{}' not found in {} (available: {:?})",
                sheet_name,
                source.display(),
                grids.iter().map(|g| g.name.as_str()).collect::<Vec<_>>()
            );
            return Ok(false);
        };

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Pad every record to the grid's widest row so column offsets survive
        // the CSV round trip.
        let width = grid.rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(output)?;
        for row in &grid.rows {
            let mut record: Vec<&str> = row.iter().map(String::as_str).collect();
            record.resize(width, "");
            writer.write_record(&record)?;
        }
        writer.flush()?;

        info!(
            "extracted sheet '{}' from {} to {}",
            sheet_name,
            source.display(),
            output.display()
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_cell_to_string_whole_float() {
        assert_eq!(cell_to_string(&Data::Float(274600.0)), "274600");
        assert_eq!(cell_to_string(&Data::Float(1.5)), "1.5");
        assert_eq!(cell_to_string(&Data::String("  A ".into())), "A");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }

    #[test]
    fn test_read_csv_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "g.csv", "ID,Q1,Q2\n101,A,B\n102,,D\n");
        let grid = read_csv_grid(&path, "10FB").unwrap();
        assert_eq!(grid.name, "10FB");
        assert_eq!(grid.rows.len(), 3);
        assert_eq!(grid.cell(1, 1), "A");
        assert_eq!(grid.cell(2, 1), "");
        // Out of range reads are empty, not panics.
        assert_eq!(grid.cell(9, 9), "");
    }

    #[test]
    fn test_read_csv_grid_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_csv_grid(&dir.path().join("nope.csv"), "x").unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
    }

    #[test]
    fn test_read_workbook_unreadable_names_path() {
        let dir = tempfile::tempdir().unwrap();
        // Right extension, wrong bytes: calamine rejects it and the error
        // must say which file.
        let path = write_csv(dir.path(), "broken.xlsx", "not a zip archive\n");
        let err = read_workbook_grids(&path).unwrap_err();
        match err {
            PipelineError::Spreadsheet(msg) => assert!(msg.contains("broken.xlsx")),
            other => panic!("expected Spreadsheet error, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_missing_source_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SheetExtractor::extract(
            &dir.path().join("absent.xlsx"),
            "10FB",
            &dir.path().join("out.csv"),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
    }

    #[test]
    fn test_load_grids_csv_uses_fallback_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "extracted_offline_sheet.csv", "a,b\nc,d\n");
        let grids = load_grids(&path, "Medical").unwrap();
        assert_eq!(grids.len(), 1);
        assert_eq!(grids[0].name, "Medical");
    }
}

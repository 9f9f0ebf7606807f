use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use parquet::basic::Compression;
use parquet::data_type::{ByteArray, ByteArrayType, DoubleType};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;
use rust_xlsxwriter::{Workbook, Worksheet};
use serde_json::{Map, Value};

use crate::aggregate::{Cell, FeatureTable, NUMERIC_COLUMNS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Parquet,
    Xlsx,
    JsonLines,
}

impl ExportFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "parquet" | "pq" => Some(Self::Parquet),
            "xlsx" | "excel" => Some(Self::Xlsx),
            "jsonl" | "ndjson" | "json" => Some(Self::JsonLines),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::parse)
    }
}

#[derive(Debug, Clone)]
pub struct ExportReport {
    pub rows: usize,
    pub columns: usize,
    pub null_cells: usize,
}

pub fn export_table(table: &FeatureTable, path: &Path, format: ExportFormat) -> Result<ExportReport> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).ok();
    }
    let grid = table.rows.iter().map(|r| r.cells()).collect::<Vec<_>>();
    match format {
        ExportFormat::Parquet => write_parquet(&grid, path)?,
        ExportFormat::Xlsx => write_xlsx(&grid, path)?,
        ExportFormat::JsonLines => {
            let file = File::create(path)
                .with_context(|| format!("create {}", path.display()))?;
            let mut out = BufWriter::new(file);
            write_json_lines(&grid, &mut out)?;
            out.flush().context("flush json lines")?;
        }
    }
    Ok(ExportReport {
        rows: grid.len(),
        columns: FeatureTable::columns().len(),
        null_cells: grid.iter().flatten().filter(|c| c.is_null()).count(),
    })
}

fn is_numeric(column: &str) -> bool {
    NUMERIC_COLUMNS.contains(&column)
}

pub fn write_json_lines(grid: &[Vec<Cell>], out: &mut impl Write) -> Result<()> {
    let columns = FeatureTable::columns();
    for row in grid {
        let mut obj = Map::new();
        for (name, cell) in columns.iter().zip(row) {
            obj.insert((*name).to_string(), cell_to_json(cell));
        }
        serde_json::to_writer(&mut *out, &Value::Object(obj)).context("serialize row")?;
        out.write_all(b"\n").context("write row")?;
    }
    Ok(())
}

fn cell_to_json(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Text(s) => Value::String(s.clone()),
        Cell::Float(v) => serde_json::Number::from_f64(*v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Cell::TextList(items) => Value::Array(
            items
                .iter()
                .map(|i| i.clone().map(Value::String).unwrap_or(Value::Null))
                .collect(),
        ),
        Cell::Timestamp(_) => cell.render().map(Value::String).unwrap_or(Value::Null),
    }
}

fn parquet_message() -> String {
    let mut fields = String::new();
    for name in FeatureTable::columns() {
        if is_numeric(name) {
            fields.push_str(&format!("  OPTIONAL DOUBLE {name};\n"));
        } else {
            fields.push_str(&format!("  OPTIONAL BYTE_ARRAY {name} (UTF8);\n"));
        }
    }
    format!("message features {{\n{fields}}}")
}

fn write_parquet(grid: &[Vec<Cell>], path: &Path) -> Result<()> {
    let schema = Arc::new(parse_message_type(&parquet_message()).context("build parquet schema")?);
    let props = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build(),
    );
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer =
        SerializedFileWriter::new(file, schema, props).context("open parquet writer")?;
    let columns = FeatureTable::columns();

    let mut row_group = writer.next_row_group().context("start parquet row group")?;
    let mut col_idx = 0usize;
    while let Some(mut column) = row_group.next_column().context("next parquet column")? {
        let name = columns
            .get(col_idx)
            .ok_or_else(|| anyhow!("parquet schema has more columns than the table"))?;
        let cells = grid.iter().map(|row| &row[col_idx]).collect::<Vec<_>>();
        let def_levels = cells
            .iter()
            .map(|c| if c.is_null() { 0i16 } else { 1 })
            .collect::<Vec<_>>();
        if is_numeric(name) {
            let values = cells
                .iter()
                .filter_map(|c| match c {
                    Cell::Float(v) => Some(*v),
                    _ => None,
                })
                .collect::<Vec<_>>();
            column
                .typed::<DoubleType>()
                .write_batch(&values, Some(def_levels.as_slice()), None)
                .with_context(|| format!("write parquet column {name}"))?;
        } else {
            let values = cells
                .iter()
                .filter_map(|c| c.render())
                .map(|s| ByteArray::from(s.into_bytes()))
                .collect::<Vec<_>>();
            column
                .typed::<ByteArrayType>()
                .write_batch(&values, Some(def_levels.as_slice()), None)
                .with_context(|| format!("write parquet column {name}"))?;
        }
        column
            .close()
            .with_context(|| format!("close parquet column {name}"))?;
        col_idx += 1;
    }
    row_group.close().context("close parquet row group")?;
    writer.close().context("close parquet file")?;
    Ok(())
}

fn write_xlsx(grid: &[Vec<Cell>], path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("features")?;
        write_rows(sheet, grid)?;
    }
    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;
    Ok(())
}

fn write_rows(worksheet: &mut Worksheet, grid: &[Vec<Cell>]) -> Result<()> {
    for (col_idx, name) in FeatureTable::columns().iter().enumerate() {
        worksheet
            .write_string(0, col_idx as u16, *name)
            .with_context(|| format!("write header {name}"))?;
    }
    for (row_idx, row) in grid.iter().enumerate() {
        let xl_row = (row_idx + 1) as u32;
        for (col_idx, cell) in row.iter().enumerate() {
            match cell {
                Cell::Null => {}
                Cell::Float(v) => {
                    worksheet
                        .write_number(xl_row, col_idx as u16, *v)
                        .with_context(|| format!("write cell ({xl_row},{col_idx})"))?;
                }
                other => {
                    let value = other.render().unwrap_or_default();
                    worksheet
                        .write_string(xl_row, col_idx as u16, &value)
                        .with_context(|| format!("write cell ({xl_row},{col_idx})"))?;
                }
            }
        }
    }
    Ok(())
}

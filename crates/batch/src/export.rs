use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use rust_xlsxwriter::{Format, XlsxError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use zhangdan_core::{format_amount, Field, TransactionRecord};
use zhangdan_ocr::record_issues;

use crate::aggregator::BatchResult;
use crate::stats::CountRow;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("XLSX error: {0}")]
    Xlsx(#[from] XlsxError),
}

pub const TRANSACTIONS_SHEET: &str = "交易记录";
pub const SUMMARY_SHEET: &str = "数据摘要";
pub const QUALITY_SHEET: &str = "数据质量报告";
pub const CATEGORY_SHEET: &str = "交易类型统计";
pub const PAYMENT_SHEET: &str = "支付方式统计";

/// One table of the exported workbook, as plain strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    fn new(name: &str, headers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    fn push<I, S>(&mut self, row: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// Lay out a batch result as the five report sheets.
    pub fn from_result(result: &BatchResult) -> Self {
        Self {
            sheets: vec![
                transactions_sheet(&result.records),
                summary_sheet(result),
                quality_sheet(result),
                count_sheet(CATEGORY_SHEET, "交易类型", &result.statistics.by_category),
                count_sheet(PAYMENT_SHEET, "支付方式", &result.statistics.by_payment_method),
            ],
        }
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

fn transactions_sheet(records: &[TransactionRecord]) -> Sheet {
    let mut headers: Vec<&str> = Field::ALL.iter().map(|f| f.label()).collect();
    headers.push("来源图片");
    headers.push("数据问题");
    let mut sheet = Sheet::new(TRANSACTIONS_SHEET, &headers);

    for r in records {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        sheet.push([
            opt(&r.time),
            r.category.clone(),
            opt(&r.title),
            opt(&r.subtitle),
            r.amount.map(format_amount).unwrap_or_default(),
            r.balance.map(format_amount).unwrap_or_default(),
            opt(&r.payment_method),
            opt(&r.counterparty),
            r.source_image.clone(),
            record_issues(r).iter().map(ToString::to_string).collect::<Vec<_>>().join("; "),
        ]);
    }
    sheet
}

fn summary_sheet(result: &BatchResult) -> Sheet {
    let s = &result.summary;
    let stats = &result.statistics;
    let mut sheet = Sheet::new(SUMMARY_SHEET, &["项目", "数值"]);
    let rows: [(&str, String); 12] = [
        ("总交易笔数", stats.total_records.to_string()),
        ("图片总数", s.images_found.to_string()),
        ("成功处理图片数", s.images_processed.to_string()),
        ("跳过图片数", s.images_skipped.to_string()),
        ("去重前记录数", s.records_extracted.to_string()),
        ("重复记录数", s.duplicates_removed.to_string()),
        ("未解析行数", s.unparsed_lines.to_string()),
        ("未分类记录数", s.uncategorized.to_string()),
        ("不完整记录数", s.incomplete_records.to_string()),
        ("交易完整率", percent(stats.complete_rate)),
        ("成功识别率", percent(stats.recognition_rate)),
        ("整体数据质量", percent(stats.overall_quality)),
    ];
    for (label, value) in rows {
        sheet.push([label.to_string(), value]);
    }
    sheet
}

fn quality_sheet(result: &BatchResult) -> Sheet {
    let stats = &result.statistics;
    let mut sheet = Sheet::new(QUALITY_SHEET, &["字段名称", "完整记录数", "总记录数", "完整率"]);
    for c in &stats.completeness {
        sheet.push([
            c.field.label().to_string(),
            c.filled.to_string(),
            c.total.to_string(),
            percent(c.ratio),
        ]);
    }
    sheet.push([
        "整体数据质量".to_string(),
        String::new(),
        stats.total_records.to_string(),
        percent(stats.overall_quality),
    ]);
    sheet
}

fn count_sheet(name: &str, column: &str, counts: &[CountRow]) -> Sheet {
    let mut sheet = Sheet::new(name, &[column, "笔数"]);
    for row in counts {
        sheet.push([row.name.clone(), row.count.to_string()]);
    }
    sheet
}

fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

fn create(path: &Path) -> Result<BufWriter<File>, ExportError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| ExportError::Io { path: path.to_path_buf(), source })
}

/// Whole workbook as one pretty-printed JSON document.
pub fn write_json(workbook: &Workbook, path: &Path) -> Result<(), ExportError> {
    let mut writer = create(path)?;
    serde_json::to_writer_pretty(&mut writer, workbook)?;
    std::io::Write::flush(&mut writer)
        .map_err(|source| ExportError::Io { path: path.to_path_buf(), source })
}

/// The first sheet at `path`, every other sheet next to it as
/// `<stem>.<sheet>.csv`. Returns the files written.
pub fn write_csv(workbook: &Workbook, path: &Path) -> Result<Vec<PathBuf>, ExportError> {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let mut written = Vec::with_capacity(workbook.sheets.len());

    for (i, sheet) in workbook.sheets.iter().enumerate() {
        let target = if i == 0 {
            path.to_path_buf()
        } else {
            path.with_file_name(format!("{stem}.{}.csv", sheet.name))
        };
        let mut writer = csv::Writer::from_writer(create(&target)?);
        writer.write_record(&sheet.headers)?;
        for row in &sheet.rows {
            writer.write_record(row)?;
        }
        writer
            .flush()
            .map_err(|source| ExportError::Io { path: target.clone(), source })?;
        written.push(target);
    }
    Ok(written)
}

/// Every sheet as a worksheet of one `.xlsx` file, headers in bold.
pub fn write_xlsx(workbook: &Workbook, path: &Path) -> Result<(), ExportError> {
    let mut book = rust_xlsxwriter::Workbook::new();
    let bold = Format::new().set_bold();

    for sheet in &workbook.sheets {
        let ws = book.add_worksheet();
        ws.set_name(&sheet.name)?;
        for (col, header) in sheet.headers.iter().enumerate() {
            ws.write_string_with_format(0, col as u16, header, &bold)?;
        }
        for (row, cells) in sheet.rows.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                ws.write_string(row as u32 + 1, col as u16, cell)?;
            }
        }
        ws.autofit();
    }
    book.save(path)?;
    Ok(())
}

/// Write a batch result, picking the format from the output extension:
/// `.xlsx` gives one workbook file, `.json` one JSON document, anything else
/// CSV files.
pub fn export(result: &BatchResult, path: &Path) -> Result<Vec<PathBuf>, ExportError> {
    let workbook = Workbook::from_result(result);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let written = match extension.as_str() {
        "xlsx" => {
            write_xlsx(&workbook, path)?;
            vec![path.to_path_buf()]
        }
        "json" => {
            write_json(&workbook, path)?;
            vec![path.to_path_buf()]
        }
        _ => write_csv(&workbook, path)?,
    };
    info!(output = %path.display(), files = written.len(), records = result.records.len(), "export written");
    Ok(written)
}

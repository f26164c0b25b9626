use serde::Serialize;
use std::collections::HashMap;
use zhangdan_core::{Field, TransactionRecord};
use zhangdan_ocr::record_issues;

/// A name and how many records carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountRow {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldCompleteness {
    pub field: Field,
    pub filled: usize,
    pub total: usize,
    /// `filled / total`, 0.0 for an empty set.
    pub ratio: f64,
}

/// Aggregate figures over the final, deduplicated record set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_records: usize,
    /// Most frequent first; ties by name.
    pub by_category: Vec<CountRow>,
    /// Records without a payment method are not counted.
    pub by_payment_method: Vec<CountRow>,
    /// One entry per [`Field::ALL`], in that order.
    pub completeness: Vec<FieldCompleteness>,
    /// Share of records with a title.
    pub recognition_rate: f64,
    /// Mean of the completeness ratios.
    pub overall_quality: f64,
    /// Records without any validation issue.
    pub complete_records: usize,
    /// `complete_records / total_records`.
    pub complete_rate: f64,
}

impl Statistics {
    pub fn compute(records: &[TransactionRecord]) -> Self {
        let total = records.len();

        let by_category = count_rows(records.iter().map(|r| r.category.as_str()));
        let by_payment_method =
            count_rows(records.iter().filter_map(|r| r.payment_method.as_deref()));

        let completeness: Vec<FieldCompleteness> = Field::ALL
            .iter()
            .map(|&field| {
                let filled = records.iter().filter(|r| field.is_set(r)).count();
                FieldCompleteness { field, filled, total, ratio: ratio(filled, total) }
            })
            .collect();

        let titled = records.iter().filter(|r| r.title.is_some()).count();
        let complete = records.iter().filter(|r| record_issues(r).is_empty()).count();
        let overall_quality =
            completeness.iter().map(|c| c.ratio).sum::<f64>() / completeness.len() as f64;

        Self {
            total_records: total,
            by_category,
            by_payment_method,
            completeness,
            recognition_rate: ratio(titled, total),
            overall_quality,
            complete_records: complete,
            complete_rate: ratio(complete, total),
        }
    }

    pub fn category_count(&self, category: &str) -> usize {
        find_count(&self.by_category, category)
    }

    pub fn payment_method_count(&self, method: &str) -> usize {
        find_count(&self.by_payment_method, method)
    }

    pub fn completeness_of(&self, field: Field) -> Option<&FieldCompleteness> {
        self.completeness.iter().find(|c| c.field == field)
    }
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn count_rows<'a>(names: impl Iterator<Item = &'a str>) -> Vec<CountRow> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in names {
        *counts.entry(name).or_default() += 1;
    }
    let mut rows: Vec<CountRow> = counts
        .into_iter()
        .map(|(name, count)| CountRow { name: name.to_string(), count })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    rows
}

fn find_count(rows: &[CountRow], name: &str) -> usize {
    rows.iter().find(|r| r.name == name).map_or(0, |r| r.count)
}

use rust_decimal::Decimal;
use serde::Serialize;
use std::ops::Range;
use zhangdan_core::TransactionRecord;

/// A matcher hit: the parsed value and the byte range of the line text it
/// was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Matched<T> {
    pub value: T,
    pub span: Range<usize>,
}

impl<T> Matched<T> {
    pub fn new(value: T, span: Range<usize>) -> Self {
        Self { value, span }
    }
}

/// Everything the field matchers found on one line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineFields {
    pub time: Option<String>,
    pub amount: Option<Decimal>,
    pub balance: Option<Decimal>,
    pub payment_method: Option<String>,
    pub counterparty: Option<String>,
    /// Leftover text tokens once field spans are removed.
    pub texts: Vec<String>,
    /// Leftover tokens when the counterparty span is kept as text; used when
    /// the record has no title yet to attach a counterparty to.
    pub texts_with_counterparty: Vec<String>,
}

impl LineFields {
    /// Nothing recognizable at all on the line.
    pub fn is_blank(&self) -> bool {
        self.time.is_none()
            && self.amount.is_none()
            && self.balance.is_none()
            && self.payment_method.is_none()
            && self.counterparty.is_none()
            && self.texts.is_empty()
            && self.texts_with_counterparty.is_empty()
    }

    /// The line carries a value the open record already holds.
    pub fn conflicts_with(&self, record: &TransactionRecord) -> bool {
        (self.time.is_some() && record.time.is_some())
            || (self.amount.is_some() && record.amount.is_some())
            || (self.balance.is_some() && record.balance.is_some())
    }

    /// Whether this line opens the next transaction block: it repeats a
    /// field the open record holds, or it brings title text after the open
    /// record already has both a title and a time.
    pub fn starts_new_record(&self, record: &TransactionRecord) -> bool {
        let new_title =
            !self.texts.is_empty() && record.title.is_some() && record.time.is_some();
        new_title || self.conflicts_with(record)
    }
}

/// Result of running the extractor over one image's lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionReport {
    pub records: Vec<TransactionRecord>,
    /// Lines that contributed nothing to any record.
    pub unparsed_lines: usize,
    /// Candidate records dropped for lacking time, amount and title.
    pub discarded_records: usize,
}

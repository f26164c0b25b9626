use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use zhangdan_core::TransactionRecord;

use crate::extract::has_clock;

/// Payment-method normalization applied after extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    /// `[term, method]` pairs, tried in order. A record without a payment
    /// method takes `method` when its title or subtitle contains `term`; a
    /// payment method equal to `term` is rewritten to `method`.
    pub payment_hints: Vec<(String, String)>,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        let hints = [
            ("微信支付", "微信支付"),
            ("微信", "微信支付"),
            ("支付宝", "支付宝"),
            ("储蓄卡", "银行卡"),
            ("银行卡", "银行卡"),
        ];
        Self {
            payment_hints: hints.iter().map(|(t, m)| (t.to_string(), m.to_string())).collect(),
        }
    }
}

/// Something a record lacks or carries in an unusable shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", content = "value", rename_all = "snake_case")]
pub enum RecordIssue {
    MissingTitle,
    MissingTime,
    /// A date was read but no clock time.
    TimeWithoutClock(String),
    ZeroAmount,
    NegativeBalance(Decimal),
}

impl fmt::Display for RecordIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordIssue::MissingTitle => write!(f, "缺少交易标题"),
            RecordIssue::MissingTime => write!(f, "缺少交易时间"),
            RecordIssue::TimeWithoutClock(t) => write!(f, "时间缺少时分: {t}"),
            RecordIssue::ZeroAmount => write!(f, "金额为零"),
            RecordIssue::NegativeBalance(b) => write!(f, "余额为负: {b}"),
        }
    }
}

/// Everything wrong with `record`, in field order. Empty for a complete record.
pub fn record_issues(record: &TransactionRecord) -> Vec<RecordIssue> {
    let mut issues = Vec::new();
    if record.title.is_none() {
        issues.push(RecordIssue::MissingTitle);
    }
    match record.time.as_deref() {
        None => issues.push(RecordIssue::MissingTime),
        Some(t) if !has_clock(t) => issues.push(RecordIssue::TimeWithoutClock(t.to_string())),
        Some(_) => {}
    }
    if record.amount.is_some_and(|a| a.is_zero()) {
        issues.push(RecordIssue::ZeroAmount);
    }
    if let Some(b) = record.balance.filter(|b| b.is_sign_negative() && !b.is_zero()) {
        issues.push(RecordIssue::NegativeBalance(b));
    }
    issues
}

pub struct RecordEnricher {
    payment_hints: Vec<(String, String)>,
}

impl RecordEnricher {
    pub fn new(config: EnrichConfig) -> Self {
        Self { payment_hints: config.payment_hints }
    }

    /// Normalize or infer the payment method. Only text already on the
    /// record is consulted. Returns whether the record changed.
    pub fn enrich(&self, record: &mut TransactionRecord) -> bool {
        let resolved = match record.payment_method.as_deref() {
            Some(current) => self
                .payment_hints
                .iter()
                .find(|(term, _)| term == current)
                .map(|(_, method)| method)
                .filter(|method| method.as_str() != current),
            None => {
                let texts = [record.title.as_deref(), record.subtitle.as_deref()];
                self.payment_hints
                    .iter()
                    .find(|(term, _)| texts.iter().flatten().any(|t| t.contains(term.as_str())))
                    .map(|(_, method)| method)
            }
        };
        match resolved {
            Some(method) => {
                record.payment_method = Some(method.clone());
                true
            }
            None => false,
        }
    }
}

impl Default for RecordEnricher {
    fn default() -> Self {
        Self::new(EnrichConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn titled(title: &str) -> TransactionRecord {
        TransactionRecord { title: Some(title.into()), ..TransactionRecord::new("a.png") }
    }

    fn complete() -> TransactionRecord {
        TransactionRecord {
            time: Some("07-30 15:36".into()),
            amount: Some(Decimal::from_str("-30.07").unwrap()),
            balance: Some(Decimal::from_str("1234.56").unwrap()),
            ..titled("还车贷")
        }
    }

    #[test]
    fn payment_method_is_inferred_from_title() {
        let enricher = RecordEnricher::default();
        let cases = [
            ("微信红包", "微信支付"),
            ("支付宝转账", "支付宝"),
            ("储蓄卡取现", "银行卡"),
            ("银行卡还款", "银行卡"),
        ];
        for (title, expected) in cases {
            let mut r = titled(title);
            assert!(enricher.enrich(&mut r), "{title}");
            assert_eq!(r.payment_method.as_deref(), Some(expected), "{title}");
        }
    }

    #[test]
    fn subtitle_is_consulted_when_title_has_no_hint() {
        let mut r = TransactionRecord { subtitle: Some("微信零钱".into()), ..titled("红包") };
        RecordEnricher::default().enrich(&mut r);
        assert_eq!(r.payment_method.as_deref(), Some("微信支付"));
    }

    #[test]
    fn bare_brand_is_normalized() {
        let mut r = TransactionRecord { payment_method: Some("微信".into()), ..titled("微信转账") };
        assert!(RecordEnricher::default().enrich(&mut r));
        assert_eq!(r.payment_method.as_deref(), Some("微信支付"));
    }

    #[test]
    fn specific_payment_method_is_kept() {
        let mut r = TransactionRecord { payment_method: Some("花呗".into()), ..titled("微信转账") };
        assert!(!RecordEnricher::default().enrich(&mut r));
        assert_eq!(r.payment_method.as_deref(), Some("花呗"));
    }

    #[test]
    fn nothing_is_invented_without_a_hint() {
        let mut r = titled("人身保险费");
        assert!(!RecordEnricher::default().enrich(&mut r));
        assert_eq!(r.payment_method, None);
        assert_eq!(r.amount, None);
    }

    #[test]
    fn complete_record_has_no_issues() {
        assert!(record_issues(&complete()).is_empty());
        let relative = TransactionRecord { time: Some("昨天 09:15".into()), ..complete() };
        assert!(record_issues(&relative).is_empty());
    }

    #[test]
    fn missing_title_and_time_are_reported() {
        let r = TransactionRecord {
            amount: Some(Decimal::from_str("8000").unwrap()),
            ..TransactionRecord::new("a.png")
        };
        assert_eq!(record_issues(&r), vec![RecordIssue::MissingTitle, RecordIssue::MissingTime]);
    }

    #[test]
    fn date_without_clock_zero_amount_and_negative_balance() {
        let r = TransactionRecord {
            time: Some("2024-05-01".into()),
            amount: Some(Decimal::ZERO),
            balance: Some(Decimal::from_str("-5.00").unwrap()),
            ..complete()
        };
        assert_eq!(
            record_issues(&r),
            vec![
                RecordIssue::TimeWithoutClock("2024-05-01".into()),
                RecordIssue::ZeroAmount,
                RecordIssue::NegativeBalance(Decimal::from_str("-5.00").unwrap()),
            ]
        );
        assert_eq!(RecordIssue::MissingTitle.to_string(), "缺少交易标题");
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category assigned when no classification rule triggers.
pub const UNCATEGORIZED: &str = "未分类";

/// One transaction reconstructed from a screenshot.
///
/// Every field the screen may or may not show is an `Option`; an absent
/// amount is `None`, never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Timestamp text exactly as recognized (`2024-05-01 12:30`, `07-30 15:36`, ...).
    pub time: Option<String>,
    pub category: String,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    /// Signed amount; negative for outflow when the screen says so.
    pub amount: Option<Decimal>,
    /// Account balance after the transaction.
    pub balance: Option<Decimal>,
    pub payment_method: Option<String>,
    pub counterparty: Option<String>,
    pub source_image: String,
}

impl TransactionRecord {
    pub fn new(source_image: impl Into<String>) -> Self {
        Self {
            time: None,
            category: UNCATEGORIZED.to_string(),
            title: None,
            subtitle: None,
            amount: None,
            balance: None,
            payment_method: None,
            counterparty: None,
            source_image: source_image.into(),
        }
    }

    /// A record with none of time, amount or title cannot be told apart
    /// from stray text on the screen.
    pub fn is_noise(&self) -> bool {
        self.time.is_none() && self.amount.is_none() && self.title.is_none()
    }

    /// Identity used for cross-image deduplication. Only records with time,
    /// amount and title all present have one.
    pub fn dedup_key(&self) -> Option<(&str, Decimal, &str)> {
        Some((self.time.as_deref()?, self.amount?, self.title.as_deref()?))
    }

    /// Title and subtitle joined for classification.
    pub fn classification_text(&self) -> String {
        match (self.title.as_deref(), self.subtitle.as_deref()) {
            (Some(t), Some(s)) => format!("{t} {s}"),
            (Some(t), None) => t.to_string(),
            (None, Some(s)) => s.to_string(),
            (None, None) => String::new(),
        }
    }

    pub fn is_categorized(&self) -> bool {
        self.category != UNCATEGORIZED
    }
}

/// Record fields tracked by the data-quality report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Time,
    Category,
    Title,
    Subtitle,
    Amount,
    Balance,
    PaymentMethod,
    Counterparty,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Time,
        Field::Category,
        Field::Title,
        Field::Subtitle,
        Field::Amount,
        Field::Balance,
        Field::PaymentMethod,
        Field::Counterparty,
    ];

    /// Column heading used in exported sheets.
    pub fn label(self) -> &'static str {
        match self {
            Field::Time => "交易时间",
            Field::Category => "交易类型",
            Field::Title => "主要标题",
            Field::Subtitle => "副标题",
            Field::Amount => "金额",
            Field::Balance => "余额",
            Field::PaymentMethod => "支付方式",
            Field::Counterparty => "关联账户",
        }
    }

    /// Whether `record` carries a value for this field. The category counts
    /// as set only when a rule assigned one.
    pub fn is_set(self, record: &TransactionRecord) -> bool {
        match self {
            Field::Time => record.time.is_some(),
            Field::Category => record.is_categorized(),
            Field::Title => record.title.is_some(),
            Field::Subtitle => record.subtitle.is_some(),
            Field::Amount => record.amount.is_some(),
            Field::Balance => record.balance.is_some(),
            Field::PaymentMethod => record.payment_method.is_some(),
            Field::Counterparty => record.counterparty.is_some(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Time => "time",
            Field::Category => "category",
            Field::Title => "title",
            Field::Subtitle => "subtitle",
            Field::Amount => "amount",
            Field::Balance => "balance",
            Field::PaymentMethod => "payment_method",
            Field::Counterparty => "counterparty",
        };
        write!(f, "{name}")
    }
}

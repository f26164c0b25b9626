use std::ops::Range;
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveTime};
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use zhangdan_core::text::{fold_width, has_letters, trim_token};
use zhangdan_core::{parse_amount, TextLine, TransactionRecord};

use crate::types::{ExtractionReport, LineFields, Matched};

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

// Matchers run on width-folded text, so `：￥－` have already become `:￥-`.
// Numbers: `1,234.56`, `1.234,56`, `35`, `35.00`, `12,50`.

re!(re_time_ymd_hm,
    r"(?:^|\D)(?P<t>(?P<y>\d{4})[-/.年](?P<mo>\d{1,2})[-/.月](?P<d>\d{1,2})日?\s*(?P<h>\d{1,2}):(?P<mi>\d{2})(?::\d{2})?)(?:\D|$)");
re!(re_time_md_cn_hm,
    r"(?:^|\D)(?P<t>(?P<mo>\d{1,2})月(?P<d>\d{1,2})日\s*(?P<h>\d{1,2}):(?P<mi>\d{2}))(?:\D|$)");
re!(re_time_md_hm,
    r"(?:^|\D)(?P<t>(?P<mo>\d{2})[-/.](?P<d>\d{2})\s*(?P<h>\d{2}):(?P<mi>\d{2}))(?:\D|$)");
re!(re_time_md_h_dot_m,
    r"(?:^|\D)(?P<t>(?P<mo>\d{2})-(?P<d>\d{2})\s*(?P<h>\d{2})\.(?P<mi>\d{2}))(?:\D|$)");
re!(re_time_md_hhmm,
    r"(?:^|\D)(?P<t>(?P<mo>\d{2})-(?P<d>\d{2})\s?(?P<h>\d{2})(?P<mi>\d{2}))(?:\D|$)");
re!(re_date_ymd,
    r"(?:^|\D)(?P<t>(?P<y>\d{4})[-/.年](?P<mo>\d{1,2})[-/.月](?P<d>\d{1,2})日?)(?:\D|$)");
re!(re_date_md_cn,
    r"(?:^|\D)(?P<t>(?P<mo>\d{1,2})月(?P<d>\d{1,2})日)");
re!(re_time_relative,
    r"(?P<t>(?:今天|昨天|前天)\s*(?P<h>\d{1,2}):(?P<mi>\d{2}))(?:\D|$)");

re!(re_clock, r"\d[:.]?\d{2}$");

re!(re_balance,
    r"(?:账户余额|当前余额|可用余额|余额)\s*:?\s*(?:人民币|CNY|RMB)?\s*[¥￥]?\s*(?P<num>[+-]?\s*(?:\d{1,3}(?:\.\d{3})+,\d{1,2}|\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:[.,]\d+)?))");

re!(re_amount_keyword,
    r"(?P<kw>金额|支出|扣款|消费|付款|收入|收款|退款|到账)\s*:?\s*(?:人民币|CNY|RMB)?\s*(?P<num>[+-]?\s*[¥￥]?\s*[+-]?\s*(?:\d{1,3}(?:\.\d{3})+,\d{1,2}|\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:[.,]\d+)?))\s*元?");
re!(re_amount_signed,
    r"(?:^|[^\d.,+\-])(?P<num>[+-]\s*[¥￥]?\s*(?:\d{1,3}(?:\.\d{3})+,\d{1,2}|\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:[.,]\d+)?)\s*元?)(?:$|[^\d:])");
re!(re_amount_currency,
    r"(?:^|[^\d.,])(?P<num>[¥￥]\s*[+-]?\s*(?:\d{1,3}(?:\.\d{3})+,\d{1,2}|\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:[.,]\d+)?)|(?:\d{1,3}(?:\.\d{3})+,\d{1,2}|\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:[.,]\d+)?)\s*元)(?:$|[^\d])");

re!(re_counterparty_labeled,
    r"(?:对方账户|收款账户|付款账户|收款方|付款方|对方|账户)\s*:\s*(?P<v>\S+)");
re!(re_counterparty_card,
    r"(?P<kind>储蓄卡|信用卡|借记卡|银行卡)\s*[(（]?\s*(?P<v>\d{4})\s*[)）]?");
re!(re_counterparty_tail,
    r"尾号\s*:?\s*(?P<v>\d{3,4})");
re!(re_counterparty_masked,
    r"(?P<v>(?:\d{4}\s*)?\*{2,}\s*\d{4})");

const TIME_SHAPES: [fn() -> &'static Regex; 8] = [
    re_time_ymd_hm,
    re_time_md_cn_hm,
    re_time_md_hm,
    re_time_md_h_dot_m,
    re_time_md_hhmm,
    re_date_ymd,
    re_date_md_cn,
    re_time_relative,
];

/// Field labels that survive masking but are not titles.
const LABEL_WORDS: &[&str] = &[
    "余额", "账户余额", "当前余额", "可用余额", "金额", "支出", "收入", "交易时间", "支付方式",
];

const OUTFLOW_KEYWORDS: &[&str] = &["支出", "扣款", "消费", "付款"];
const INFLOW_KEYWORDS: &[&str] = &["收入", "收款", "退款", "到账"];

// ── Pure matchers ────────────────────────────────────────────────────────────

/// First plausible timestamp on the line, tried from the most to the least
/// specific shape. Month, day, hour and minute must form a real date/time.
pub fn match_time(text: &str) -> Option<Matched<String>> {
    TIME_SHAPES
        .iter()
        .find_map(|re| re().captures_iter(text).find_map(|c| valid_time(&c)))
}

/// Whether recognized time text ends in a clock reading rather than a bare
/// date.
pub fn has_clock(time: &str) -> bool {
    re_clock().is_match(time.trim())
}

fn valid_time(caps: &Captures<'_>) -> Option<Matched<String>> {
    let whole = caps.name("t")?;
    let num = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u32>().ok());

    if let (Some(month), Some(day)) = (num("mo"), num("d")) {
        let year = num("y").map_or(2000, |y| y as i32);
        NaiveDate::from_ymd_opt(year, month, day)?;
    }
    if let (Some(hour), Some(minute)) = (num("h"), num("mi")) {
        NaiveTime::from_hms_opt(hour, minute, 0)?;
    }
    Some(Matched::new(whole.as_str().trim().to_string(), whole.range()))
}

/// `余额 128.50`, `账户余额：¥1,234.56` and similar.
pub fn match_balance(text: &str) -> Option<Matched<Decimal>> {
    re_balance().captures_iter(text).find_map(|c| {
        let value = parse_amount(c.name("num")?.as_str()).ok()?;
        Some(Matched::new(value, c.get(0)?.range()))
    })
}

/// The transaction amount. A keyword (`支出 30.07`, `收入 100`) wins over an
/// explicitly signed number (`-35.00`), which wins over a currency-marked one
/// (`¥12.50`, `30元`). Bare numbers are never read as amounts.
///
/// Balance and time must already be masked out of `text`.
pub fn match_amount(text: &str) -> Option<Matched<Decimal>> {
    keyword_amount(text)
        .or_else(|| marked_amount(re_amount_signed(), text))
        .or_else(|| marked_amount(re_amount_currency(), text))
}

fn keyword_amount(text: &str) -> Option<Matched<Decimal>> {
    re_amount_keyword().captures_iter(text).find_map(|c| {
        let keyword = c.name("kw")?.as_str();
        let raw = c.name("num")?.as_str();
        let value = parse_amount(raw).ok()?;
        let explicit_sign = raw.trim_start_matches(['¥', '￥', ' ']).starts_with(['+', '-']);
        let value = if explicit_sign {
            value
        } else if OUTFLOW_KEYWORDS.contains(&keyword) {
            -value.abs()
        } else if INFLOW_KEYWORDS.contains(&keyword) {
            value.abs()
        } else {
            value
        };
        Some(Matched::new(value, c.get(0)?.range()))
    })
}

fn marked_amount(re: &Regex, text: &str) -> Option<Matched<Decimal>> {
    re.captures_iter(text).find_map(|c| {
        let m = c.name("num")?;
        let value = parse_amount(m.as_str()).ok()?;
        Some(Matched::new(value, m.range()))
    })
}

/// Account or card reference: `对方账户: 张三`, `储蓄卡(6842)`, `尾号1234`,
/// `**** 1234`.
pub fn match_counterparty(text: &str) -> Option<Matched<String>> {
    if let Some(c) = re_counterparty_labeled().captures(text) {
        let v = c.name("v")?;
        let value = trim_token(v.as_str());
        if !value.is_empty() {
            return Some(Matched::new(value.to_string(), c.get(0)?.range()));
        }
    }
    if let Some(c) = re_counterparty_card().captures(text) {
        let value = format!("{}{}", &c["kind"], &c["v"]);
        return Some(Matched::new(value, c.get(0)?.range()));
    }
    if let Some(c) = re_counterparty_tail().captures(text) {
        return Some(Matched::new(format!("尾号{}", &c["v"]), c.get(0)?.range()));
    }
    re_counterparty_masked().captures(text).and_then(|c| {
        let v = c.name("v")?;
        let value: String = v.as_str().chars().filter(|ch| !ch.is_whitespace()).collect();
        Some(Matched::new(value, v.range()))
    })
}

// ── Extractor ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Payment-method vocabulary. Longer terms are preferred on overlap.
    pub payment_methods: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        let terms = [
            "微信零钱", "零钱通", "微信支付", "支付宝", "余额宝", "花呗", "信用卡", "储蓄卡", "借记卡",
            "银行卡", "云闪付", "现金", "零钱", "微信",
        ];
        Self { payment_methods: terms.iter().map(|s| s.to_string()).collect() }
    }
}

/// A payment term hit. `span` is only set when the term stands on its own,
/// so that `微信转账` keeps its text while `微信支付-美团` loses the term.
struct PaymentHit {
    value: String,
    span: Option<Range<usize>>,
}

/// Turns normalized lines into transaction records.
pub struct FieldExtractor {
    payment_methods: Vec<String>,
}

impl FieldExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        let mut payment_methods: Vec<String> = Vec::new();
        for term in config.payment_methods {
            let term = fold_width(term.trim());
            if !term.is_empty() && !payment_methods.contains(&term) {
                payment_methods.push(term);
            }
        }
        payment_methods.sort_by_key(|t| std::cmp::Reverse(t.chars().count()));
        Self { payment_methods }
    }

    /// Payment method named on the line, longest vocabulary term first.
    pub fn match_payment_method(&self, text: &str) -> Option<String> {
        self.find_payment(&fold_width(text)).map(|hit| hit.value)
    }

    fn find_payment(&self, text: &str) -> Option<PaymentHit> {
        self.payment_methods.iter().find_map(|term| {
            let start = text.find(term.as_str())?;
            let end = start + term.len();
            let standalone = is_separator(text[..start].chars().next_back())
                && is_separator(text[end..].chars().next());
            Some(PaymentHit { value: term.clone(), span: standalone.then_some(start..end) })
        })
    }

    /// Run every matcher over one line. Field spans are blanked out before
    /// the next matcher runs, so a balance is never re-read as the amount and
    /// a date never as a number.
    pub fn analyze_line(&self, line: &str) -> LineFields {
        let mut masked = fold_width(line);

        let time = match_time(&masked).map(|m| take(&mut masked, m));
        let balance = match_balance(&masked).map(|m| take(&mut masked, m));
        let amount = match_amount(&masked).map(|m| take(&mut masked, m));

        let counterparty = match_counterparty(&masked);
        let payment = self.find_payment(&masked);
        if let Some(span) = payment.as_ref().and_then(|p| p.span.clone()) {
            blank(&mut masked, span);
        }

        let texts_with_counterparty = text_tokens(&masked);
        let texts = match &counterparty {
            Some(m) => {
                let mut without = masked.clone();
                blank(&mut without, m.span.clone());
                text_tokens(&without)
            }
            None => texts_with_counterparty.clone(),
        };

        LineFields {
            time,
            amount,
            balance,
            payment_method: payment.map(|p| p.value),
            counterparty: counterparty.map(|m| m.value),
            texts,
            texts_with_counterparty,
        }
    }

    /// Group consecutive lines into records. A line starts a new record when
    /// it carries a time, amount or balance the open record already has, or
    /// title text once the open record has a title and a time.
    pub fn extract(&self, lines: &[TextLine], source_image: &str) -> ExtractionReport {
        let mut report = ExtractionReport::default();
        let mut open: Option<TransactionRecord> = None;

        for line in lines {
            let fields = self.analyze_line(&line.text);
            if fields.is_blank() {
                trace!(line = %line.text, "no fields on line");
                report.unparsed_lines += 1;
                continue;
            }
            if open.as_ref().is_some_and(|r| fields.starts_new_record(r)) {
                if let Some(done) = open.take() {
                    close_record(&mut report, done);
                }
            }
            let record = open.get_or_insert_with(|| TransactionRecord::new(source_image));
            if !absorb(record, fields) {
                trace!(line = %line.text, "line added nothing to the open record");
                report.unparsed_lines += 1;
            }
        }
        if let Some(done) = open.take() {
            close_record(&mut report, done);
        }

        debug!(
            source = source_image,
            lines = lines.len(),
            records = report.records.len(),
            unparsed = report.unparsed_lines,
            discarded = report.discarded_records,
            "lines extracted"
        );
        report
    }

    /// Convenience for plain text with one line per row, as produced by
    /// engines that do not report geometry.
    pub fn extract_text(&self, text: &str, source_image: &str) -> ExtractionReport {
        let lines: Vec<TextLine> = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .map(|(i, l)| TextLine::from_text(l.trim(), i as f32))
            .collect();
        self.extract(&lines, source_image)
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new(ExtractorConfig::default())
    }
}

fn close_record(report: &mut ExtractionReport, record: TransactionRecord) {
    if record.is_noise() {
        debug!(?record, "discarding record without time, amount or title");
        report.discarded_records += 1;
    } else {
        report.records.push(record);
    }
}

/// Fill the record's unset fields from the line. Returns whether anything
/// was taken.
fn absorb(record: &mut TransactionRecord, fields: LineFields) -> bool {
    let mut used = false;
    used |= fill(&mut record.time, fields.time);
    used |= fill(&mut record.amount, fields.amount);
    used |= fill(&mut record.balance, fields.balance);
    used |= fill(&mut record.payment_method, fields.payment_method);

    // A counterparty only means something once there is a transaction to
    // attach it to; before that its text is read as a title.
    let texts = match fields.counterparty {
        Some(cp) if record.title.is_some() || !fields.texts.is_empty() => {
            used |= fill(&mut record.counterparty, Some(cp));
            fields.texts
        }
        _ => fields.texts_with_counterparty,
    };

    for text in texts {
        if record.title.is_none() {
            record.title = Some(text);
        } else if record.subtitle.is_none() {
            record.subtitle = Some(text);
        } else {
            continue;
        }
        used = true;
    }
    used
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) -> bool {
    match (slot.is_none(), value) {
        (true, Some(v)) => {
            *slot = Some(v);
            true
        }
        _ => false,
    }
}

/// Blank out a matched span and hand back its value.
fn take<T>(text: &mut String, m: Matched<T>) -> T {
    blank(text, m.span);
    m.value
}

/// Replace a span with spaces of equal byte length so later spans stay valid.
fn blank(text: &mut String, span: Range<usize>) {
    let spaces = " ".repeat(span.len());
    text.replace_range(span, &spaces);
}

fn is_separator(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => {
            c.is_whitespace()
                || matches!(c, '-' | '·' | '|' | ':' | ',' | '，' | '、' | '/' | '(' | ')' | '（' | '）')
        }
    }
}

fn text_tokens(masked: &str) -> Vec<String> {
    masked
        .split_whitespace()
        .map(trim_token)
        .filter(|t| !t.is_empty() && has_letters(t) && !LABEL_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

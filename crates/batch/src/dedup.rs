use rust_decimal::Decimal;
use std::collections::HashSet;
use zhangdan_core::TransactionRecord;

/// Collapse records that share time, amount and title, keeping the first
/// occurrence. Records missing any of the three are never duplicates.
/// Returns how many records were dropped.
pub fn dedup_records(records: &mut Vec<TransactionRecord>) -> usize {
    let before = records.len();
    let mut seen: HashSet<(String, Decimal, String)> = HashSet::new();
    records.retain(|r| match r.dedup_key() {
        Some((time, amount, title)) => {
            seen.insert((time.to_string(), amount.normalize(), title.to_string()))
        }
        None => true,
    });
    before - records.len()
}

//! Width and case folding for text coming out of OCR engines.
//!
//! Chinese OCR output freely mixes full-width (`１２３，－`) and half-width
//! (`123,-`) forms of the same characters. Everything that compares or parses
//! recognized text goes through [`fold_width`] first.

/// Map full-width ASCII variants and the ideographic space to their
/// half-width forms. Other characters pass through unchanged.
pub fn fold_width(text: &str) -> String {
    text.chars().map(fold_char).collect()
}

/// Width-fold and lowercase, for case-insensitive substring matching.
pub fn fold_for_match(text: &str) -> String {
    fold_width(text).to_lowercase()
}

fn fold_char(c: char) -> char {
    match c {
        '\u{3000}' => ' ',
        // Minus sign, en dash and em dash show up where a hyphen-minus was printed.
        '\u{2212}' | '\u{2013}' | '\u{2014}' => '-',
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
        _ => c,
    }
}

/// Whether a token carries readable text (letters or CJK ideographs) rather
/// than only digits and punctuation.
pub fn has_letters(token: &str) -> bool {
    token.chars().any(char::is_alphabetic)
}

/// Strip separators OCR tends to leave around a token once fields have been
/// cut out of it: `-美团外卖`, `还贷款(` or `还贷款（）` become `美团外卖` /
/// `还贷款`. Balanced brackets inside the token are kept.
pub fn trim_token(token: &str) -> &str {
    let mut t = token;
    loop {
        let next = t
            .trim_start_matches(|c| is_edge_punct(c) || matches!(c, ')' | '）'))
            .trim_end_matches(|c| is_edge_punct(c) || matches!(c, '(' | '（'));
        let next = next
            .strip_suffix("()")
            .or_else(|| next.strip_suffix("（）"))
            .unwrap_or(next);
        if next == t {
            return t;
        }
        t = next;
    }
}

fn is_edge_punct(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '-' | '－' | '—' | '·' | '|' | ':' | '：' | ',' | '，' | '、' | ';' | '；' | '/'
        )
}

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zhangdan_core::text::fold_for_match;
use zhangdan_core::{TransactionRecord, UNCATEGORIZED};

use crate::defaults::default_rules;

/// Keyword hits add this much to a rule's score.
const KEYWORD_WEIGHT: u32 = 1;
/// Each matching pattern adds this much.
const PATTERN_WEIGHT: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationRule {
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

impl ClassificationRule {
    pub fn new(category: &str, keywords: &[&str], patterns: &[&str], priority: i32) -> Self {
        Self {
            category: category.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            priority,
        }
    }
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Rule has an empty category name")]
    EmptyCategory,
    #[error("Rule '{0}' has an empty keyword")]
    EmptyKeyword(String),
    #[error("Invalid pattern '{pattern}' in rule '{category}': {source}")]
    InvalidPattern {
        category: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Failed to parse rules TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Outcome of classifying one piece of text.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: String,
    pub score: u32,
    /// Index of the winning rule in declaration order; `None` on a miss.
    pub rule_index: Option<usize>,
}

impl Classification {
    fn miss() -> Self {
        Self { category: UNCATEGORIZED.to_string(), score: 0, rule_index: None }
    }

    /// No rule triggered.
    pub fn is_miss(&self) -> bool {
        self.rule_index.is_none()
    }
}

/// A rule with its keywords folded and deduplicated and its patterns compiled.
struct CompiledRule {
    rule: ClassificationRule,
    keywords: Vec<String>,
    patterns: Vec<Regex>,
}

impl CompiledRule {
    fn compile(rule: ClassificationRule) -> Result<Self, RuleError> {
        if rule.category.trim().is_empty() {
            return Err(RuleError::EmptyCategory);
        }

        let mut keywords: Vec<String> = Vec::with_capacity(rule.keywords.len());
        for keyword in &rule.keywords {
            let folded = fold_for_match(keyword.trim());
            if folded.is_empty() {
                return Err(RuleError::EmptyKeyword(rule.category.clone()));
            }
            if !keywords.contains(&folded) {
                keywords.push(folded);
            }
        }

        let patterns = rule
            .patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p).case_insensitive(true).build().map_err(|source| {
                    RuleError::InvalidPattern {
                        category: rule.category.clone(),
                        pattern: p.clone(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rule, keywords, patterns })
    }

    /// `text` must already be folded with `fold_for_match`.
    fn score(&self, text: &str) -> u32 {
        let keyword_hits = self.keywords.iter().filter(|k| text.contains(k.as_str())).count();
        let pattern_hits = self.patterns.iter().filter(|re| re.is_match(text)).count();
        keyword_hits as u32 * KEYWORD_WEIGHT + pattern_hits as u32 * PATTERN_WEIGHT
    }
}

/// Ordered rule table. Evaluation picks the triggered rule with the highest
/// priority, then the highest score, then the earliest declaration.
pub struct ClassificationEngine {
    rules: Vec<CompiledRule>,
}

impl ClassificationEngine {
    pub fn new(rules: Vec<ClassificationRule>) -> Result<Self, RuleError> {
        let rules = rules.into_iter().map(CompiledRule::compile).collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }

    /// The built-in Chinese consumer-finance taxonomy.
    pub fn with_default_rules() -> Self {
        Self::new(default_rules()).expect("built-in rules are valid")
    }

    /// Build an engine from a rules file containing `[[rule]]` tables only.
    pub fn from_toml(toml_content: &str) -> Result<Self, RuleError> {
        Self::new(load_rules_toml(toml_content)?)
    }

    /// Append a rule. Existing rules keep their positions, so declaration
    /// order tie-breaks are unaffected.
    pub fn add_rule(&mut self, rule: ClassificationRule) -> Result<(), RuleError> {
        let compiled = CompiledRule::compile(rule)?;
        debug!(category = %compiled.rule.category, priority = compiled.rule.priority, "rule added");
        self.rules.push(compiled);
        Ok(())
    }

    pub fn rules(&self) -> impl Iterator<Item = &ClassificationRule> {
        self.rules.iter().map(|cr| &cr.rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn classify_text(&self, text: &str) -> Classification {
        let folded = fold_for_match(text);
        if folded.trim().is_empty() {
            return Classification::miss();
        }

        let mut best: Option<(usize, u32)> = None;
        for (idx, cr) in self.rules.iter().enumerate() {
            let score = cr.score(&folded);
            if score == 0 {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_idx, best_score)) => {
                    let best_priority = self.rules[best_idx].rule.priority;
                    (cr.rule.priority, score) > (best_priority, best_score)
                }
            };
            if better {
                best = Some((idx, score));
            }
        }

        match best {
            Some((idx, score)) => Classification {
                category: self.rules[idx].rule.category.clone(),
                score,
                rule_index: Some(idx),
            },
            None => Classification::miss(),
        }
    }

    pub fn classify(&self, title: Option<&str>, subtitle: Option<&str>) -> Classification {
        let text = [title, subtitle].into_iter().flatten().collect::<Vec<_>>().join(" ");
        self.classify_text(&text)
    }

    /// Classify a record in place.
    pub fn apply(&self, record: &mut TransactionRecord) -> Classification {
        let result = self.classify_text(&record.classification_text());
        record.category = result.category.clone();
        result
    }

    /// Classify every record; returns how many fell through to uncategorized.
    pub fn apply_all(&self, records: &mut [TransactionRecord]) -> usize {
        records.iter_mut().map(|r| self.apply(r)).filter(Classification::is_miss).count()
    }
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<ClassificationRule>,
}

/// Parse a rules file of `[[rule]]` tables.
pub fn load_rules_toml(toml_content: &str) -> Result<Vec<ClassificationRule>, RuleError> {
    let file: RuleFile = toml::from_str(toml_content)?;
    Ok(file.rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(rules: Vec<ClassificationRule>) -> ClassificationEngine {
        ClassificationEngine::new(rules).unwrap()
    }

    #[test]
    fn default_rules_classify_food_delivery() {
        let engine = ClassificationEngine::with_default_rules();
        let c = engine.classify(Some("外卖订单"), Some("美团"));
        assert_eq!(c.category, "餐饮类");
        assert!(!c.is_miss());
    }

    #[test]
    fn default_rules_cover_repayment_and_income() {
        let engine = ClassificationEngine::with_default_rules();
        assert_eq!(engine.classify_text("还车贷（含智能还贷）").category, "还款类");
        assert_eq!(engine.classify_text("微信零钱提现").category, "其他收入类");
        assert_eq!(engine.classify_text("人身保险费 平安人寿").category, "投资理财类");
        assert_eq!(engine.classify_text("管道煤气费").category, "住房类");
    }

    #[test]
    fn no_match_is_uncategorized() {
        let engine = ClassificationEngine::with_default_rules();
        let c = engine.classify_text("ZXQW 9931");
        assert_eq!(c.category, UNCATEGORIZED);
        assert!(c.is_miss());
        assert_eq!(c.score, 0);
    }

    #[test]
    fn empty_text_is_uncategorized() {
        let engine = ClassificationEngine::with_default_rules();
        assert!(engine.classify(None, None).is_miss());
        assert!(engine.classify_text("   ").is_miss());
    }

    #[test]
    fn higher_priority_wins_regardless_of_declaration_order() {
        let low = ClassificationRule::new("low", &["咖啡", "星巴克"], &["咖啡"], 1);
        let high = ClassificationRule::new("high", &["星巴克"], &[], 5);
        let text = "星巴克 咖啡";

        let a = engine(vec![low.clone(), high.clone()]);
        let b = engine(vec![high, low]);
        assert_eq!(a.classify_text(text).category, "high");
        assert_eq!(b.classify_text(text).category, "high");
    }

    #[test]
    fn equal_priority_falls_back_to_score() {
        let weak = ClassificationRule::new("weak", &["打车"], &[], 3);
        let strong = ClassificationRule::new("strong", &["打车", "滴滴"], &["滴滴"], 3);
        let c = engine(vec![weak, strong]).classify_text("滴滴打车");
        assert_eq!(c.category, "strong");
        assert_eq!(c.score, 4);
    }

    #[test]
    fn full_tie_goes_to_first_declared() {
        let first = ClassificationRule::new("first", &["超市"], &[], 2);
        let second = ClassificationRule::new("second", &["超市"], &[], 2);
        let c = engine(vec![first, second]).classify_text("永辉超市");
        assert_eq!(c.category, "first");
        assert_eq!(c.rule_index, Some(0));
    }

    #[test]
    fn scoring_weights_keywords_and_patterns() {
        let rule = ClassificationRule::new("x", &["奶茶", "奶茶"], &["奶茶", "喜茶"], 1);
        // Duplicate keywords count once; each matching pattern counts two.
        assert_eq!(engine(vec![rule]).classify_text("喜茶 奶茶").score, 1 + 2 + 2);
    }

    #[test]
    fn matching_is_case_and_width_insensitive() {
        let rule = ClassificationRule::new("娱乐", &["KTV"], &["ktv"], 1);
        let c = engine(vec![rule]).classify_text("ｋｔｖ包厢");
        assert_eq!(c.category, "娱乐");
        assert_eq!(c.score, 3);
    }

    #[test]
    fn classification_is_deterministic() {
        let engine = ClassificationEngine::with_default_rules();
        for text in ["外卖订单 美团", "转账给张三", "滴滴出行 打车", "无法识别"] {
            assert_eq!(engine.classify_text(text), engine.classify_text(text));
        }
    }

    #[test]
    fn add_rule_appends_without_reordering() {
        let mut e = engine(vec![ClassificationRule::new("a", &["宠物"], &[], 1)]);
        e.add_rule(ClassificationRule::new("b", &["宠物"], &[], 1)).unwrap();
        assert_eq!(e.len(), 2);
        assert_eq!(e.rules().last().unwrap().category, "b");
        // Same priority and score: the earlier rule still wins.
        assert_eq!(e.classify_text("宠物医院").category, "a");

        e.add_rule(ClassificationRule::new("c", &["宠物"], &[], 9)).unwrap();
        assert_eq!(e.classify_text("宠物医院").category, "c");
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let mut e = ClassificationEngine::with_default_rules();
        let before = e.len();
        let err = e.add_rule(ClassificationRule::new("bad", &[], &["(unclosed"], 1)).unwrap_err();
        assert!(matches!(err, RuleError::InvalidPattern { .. }));
        assert_eq!(e.len(), before);
    }

    #[test]
    fn empty_category_and_keyword_are_rejected() {
        assert!(matches!(
            ClassificationEngine::new(vec![ClassificationRule::new(" ", &["x"], &[], 1)]),
            Err(RuleError::EmptyCategory)
        ));
        assert!(matches!(
            ClassificationEngine::new(vec![ClassificationRule::new("x", &[""], &[], 1)]),
            Err(RuleError::EmptyKeyword(_))
        ));
    }

    #[test]
    fn apply_sets_record_category() {
        let engine = ClassificationEngine::with_default_rules();
        let mut records = vec![
            TransactionRecord { title: Some("滴滴快车".into()), ..TransactionRecord::new("a.png") },
            TransactionRecord { title: Some("未知商户".into()), ..TransactionRecord::new("a.png") },
        ];
        let misses = engine.apply_all(&mut records);
        assert_eq!(records[0].category, "交通类");
        assert_eq!(records[1].category, UNCATEGORIZED);
        assert_eq!(misses, 1);
    }

    #[test]
    fn rules_load_from_toml() {
        let toml = r#"
            [[rule]]
            category = "宠物类"
            keywords = ["宠物", "猫粮"]
            patterns = ["宠物.*医院"]
            priority = 200

            [[rule]]
            category = "捐赠类"
            keywords = ["捐款"]
        "#;
        let rules = load_rules_toml(toml).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].priority, 0);
        assert!(rules[1].patterns.is_empty());

        let e = ClassificationEngine::from_toml(toml).unwrap();
        assert_eq!(e.classify_text("宠物医院").category, "宠物类");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(matches!(load_rules_toml("[[rule]]\ncategory = 3"), Err(RuleError::Toml(_))));
    }
}

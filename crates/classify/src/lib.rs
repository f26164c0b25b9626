pub mod defaults;
pub mod rules;

pub use defaults::default_rules;
pub use rules::{
    load_rules_toml, Classification, ClassificationEngine, ClassificationRule, RuleError,
};

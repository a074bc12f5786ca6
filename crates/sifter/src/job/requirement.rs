//! Filter outcomes and the requirements that gate components on them.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sifter_core::ComponentKey;

/// A category a filter can put a row into.
///
/// Every filter declares its closed set of categories in its descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(Cow<'static, str>);

impl Category {
    pub const VALID: Category = Category(Cow::Borrowed("VALID"));
    pub const INVALID: Category = Category(Cow::Borrowed("INVALID"));

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Categories of the reference validation filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCategory {
    Valid,
    Invalid,
}

impl ValidationCategory {
    pub fn of(valid: bool) -> Self {
        if valid { Self::Valid } else { Self::Invalid }
    }

    pub fn all() -> Vec<Category> {
        vec![Category::VALID, Category::INVALID]
    }
}

impl From<ValidationCategory> for Category {
    fn from(category: ValidationCategory) -> Self {
        match category {
            ValidationCategory::Valid => Category::VALID,
            ValidationCategory::Invalid => Category::INVALID,
        }
    }
}

/// The decision of one filter for one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Outcome {
    pub filter: ComponentKey,
    pub category: Category,
}

impl Outcome {
    pub fn new(filter: impl Into<ComponentKey>, category: impl Into<Category>) -> Self {
        Self {
            filter: filter.into(),
            category: category.into(),
        }
    }
}

impl From<&str> for Category {
    fn from(name: &str) -> Self {
        Category::new(name)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.filter, self.category)
    }
}

/// Outcomes produced for one row so far.
///
/// Derived rows start from a copy of their parent's outcomes.
#[derive(Debug, Clone, Default)]
pub struct OutcomeSet {
    outcomes: HashSet<Outcome>,
}

impl OutcomeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, outcome: Outcome) {
        self.outcomes.insert(outcome);
    }

    pub fn contains(&self, outcome: &Outcome) -> bool {
        self.outcomes.contains(outcome)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// A precondition on a row's outcomes.
///
/// A component without a requirement runs unconditionally.
///
/// Serializes adjacently tagged:
/// ```yaml
/// requirement:
///   kind: any_of
///   value:
///     - { filter: a, category: VALID }
///     - { filter: b, category: INVALID }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Requirement {
    /// The single outcome must hold.
    Outcome(Outcome),
    /// Every listed outcome must hold.
    AllOf(Vec<Outcome>),
    /// At least one listed outcome must hold.
    AnyOf(Vec<Outcome>),
}

impl Requirement {
    pub fn outcome(filter: impl Into<ComponentKey>, category: impl Into<Category>) -> Self {
        Self::Outcome(Outcome::new(filter, category))
    }

    pub fn is_satisfied(&self, outcomes: &OutcomeSet) -> bool {
        match self {
            Requirement::Outcome(o) => outcomes.contains(o),
            Requirement::AllOf(all) => all.iter().all(|o| outcomes.contains(o)),
            Requirement::AnyOf(any) => any.iter().any(|o| outcomes.contains(o)),
        }
    }

    /// Every outcome the requirement mentions.
    pub fn outcomes(&self) -> &[Outcome] {
        match self {
            Requirement::Outcome(o) => std::slice::from_ref(o),
            Requirement::AllOf(list) | Requirement::AnyOf(list) => list,
        }
    }

    /// Filters the requirement depends on, without duplicates.
    pub fn filters(&self) -> Vec<&ComponentKey> {
        let mut filters: Vec<&ComponentKey> = Vec::new();
        for outcome in self.outcomes() {
            if !filters.contains(&&outcome.filter) {
                filters.push(&outcome.filter);
            }
        }
        filters
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |list: &[Outcome], sep: &str| {
            list.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(sep)
        };
        match self {
            Requirement::Outcome(o) => write!(f, "{o}"),
            Requirement::AllOf(list) => write!(f, "{}", join(list, " AND ")),
            Requirement::AnyOf(list) => write!(f, "{}", join(list, " OR ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes(list: &[(&str, Category)]) -> OutcomeSet {
        let mut set = OutcomeSet::new();
        for (filter, category) in list {
            set.insert(Outcome::new(*filter, category.clone()));
        }
        set
    }

    #[test]
    fn test_single_outcome() {
        let req = Requirement::outcome("email-valid", Category::VALID);
        assert!(req.is_satisfied(&outcomes(&[("email-valid", Category::VALID)])));
        assert!(!req.is_satisfied(&outcomes(&[("email-valid", Category::INVALID)])));
        assert!(!req.is_satisfied(&OutcomeSet::new()));
    }

    #[test]
    fn test_all_of_and_any_of() {
        let a = Outcome::new("a", Category::VALID);
        let b = Outcome::new("b", Category::VALID);
        let row = outcomes(&[("a", Category::VALID), ("b", Category::INVALID)]);

        assert!(!Requirement::AllOf(vec![a.clone(), b.clone()]).is_satisfied(&row));
        assert!(Requirement::AnyOf(vec![a.clone(), b.clone()]).is_satisfied(&row));
        assert!(Requirement::AllOf(vec![a]).is_satisfied(&row));
        assert!(!Requirement::AnyOf(vec![b]).is_satisfied(&row));
    }

    #[test]
    fn test_filters_deduplicated() {
        let req = Requirement::AnyOf(vec![
            Outcome::new("a", Category::VALID),
            Outcome::new("a", Category::INVALID),
            Outcome::new("b", Category::VALID),
        ]);
        let filters: Vec<&str> = req.filters().into_iter().map(|k| k.id()).collect();
        assert_eq!(filters, vec!["a", "b"]);
    }

    #[test]
    fn test_yaml_form() {
        let yaml = r#"
kind: any_of
value:
  - { filter: a, category: VALID }
  - { filter: b, category: INVALID }
"#;
        let req: Requirement = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(req.to_string(), "a=VALID OR b=INVALID");

        let single: Requirement =
            serde_yaml::from_str("kind: outcome\nvalue: { filter: a, category: VALID }\n").unwrap();
        assert_eq!(single, Requirement::outcome("a", Category::VALID));

        let written = serde_yaml::to_string(&single).unwrap();
        assert_eq!(serde_yaml::from_str::<Requirement>(&written).unwrap(), single);
    }

    #[test]
    fn test_validation_category() {
        assert_eq!(Category::from(ValidationCategory::of(true)), Category::VALID);
        assert_eq!(Category::from(ValidationCategory::of(false)), Category::INVALID);
    }
}

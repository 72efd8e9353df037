use std::fmt;

use super::Value;
use crate::meta::{KEY_ANY, KEY_DECLARE};

/// One `(key, value)` constraint of a rule.
///
/// A `Null` value requires the key to be absent, the string `"*"` accepts any
/// non-null non-false value, and a list accepts any of its elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub(crate) key: String,
    pub(crate) value: Value,
    pub(crate) is_decl: bool,
}

impl Selector {
    pub fn new(key: &str, value: impl Into<Value>) -> Self {
        Self {
            key: key.to_owned(),
            value: value.into(),
            is_decl: false,
        }
    }

    /// A declaration selector: the rule both declares `value` as a member of
    /// `key`'s enumerable set and supplies its properties.
    pub fn declaration(key: &str, value: impl Into<Value>) -> Self {
        Self {
            is_decl: true,
            ..Self::new(key, value)
        }
    }

    #[must_use]
    pub fn absent(key: &str) -> Self {
        Self::new(key, Value::Null)
    }

    #[must_use]
    pub fn any(key: &str) -> Self {
        Self::new(key, KEY_ANY)
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.is_decl
    }

    #[must_use]
    pub fn is_anti(&self) -> bool {
        self.value.is_null()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anti() {
            return write!(f, "!{}", self.key);
        }
        if self.is_decl {
            write!(f, "@")?;
        }
        match &self.value {
            Value::String(s) => write!(f, "{}={s}", self.key),
            other => write!(f, "{}={other}", self.key),
        }
    }
}

/// A declarative rule: when every selector holds, its properties apply.
///
/// Rules without an explicit rank take the next rank in program order when
/// added to a [`Meta`](crate::Meta); lower ranks merge first.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub(crate) selectors: Vec<Selector>,
    pub(crate) properties: Vec<(String, Value)>,
    pub(crate) rank: Option<i32>,
    pub(crate) line: u32,
}

impl Rule {
    #[must_use]
    pub fn new(selectors: Vec<Selector>, properties: Vec<(String, Value)>, rank: Option<i32>) -> Self {
        Self {
            selectors,
            properties,
            rank,
            line: 0,
        }
    }

    #[must_use]
    pub fn builder() -> RuleBuilder {
        RuleBuilder::default()
    }

    #[must_use]
    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    #[must_use]
    pub fn properties(&self) -> &[(String, Value)] {
        &self.properties
    }

    #[must_use]
    pub fn rank(&self) -> Option<i32> {
        self.rank
    }

    /// Source line the rule was parsed from, `0` for rules built in code.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    pub(crate) fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    /// The companion rule registering a trailing declaration selector:
    /// `a=1 @field=x { .. }` yields `a=1 declare=field { field: x }`.
    pub(crate) fn declaration(&self) -> Option<Rule> {
        let (last, prefix) = self.selectors.split_last()?;
        if !last.is_decl {
            return None;
        }
        let mut selectors: Vec<Selector> = prefix
            .iter()
            .map(|s| Selector {
                is_decl: false,
                ..s.clone()
            })
            .collect();
        selectors.push(Selector::new(KEY_DECLARE, last.key.as_str()));
        Some(Rule {
            selectors,
            properties: vec![(last.key.clone(), last.value.clone())],
            rank: self.rank,
            line: self.line,
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(rank) = self.rank {
            write!(f, "(rank {rank}) ")?;
        }
        for selector in &self.selectors {
            write!(f, "{selector} ")?;
        }
        write!(f, "{{")?;
        for (name, value) in &self.properties {
            write!(f, " {name}: {value};")?;
        }
        write!(f, " }}")
    }
}

/// Builder for a single [`Rule`].
#[derive(Debug, Clone, Default)]
pub struct RuleBuilder {
    selectors: Vec<Selector>,
    properties: Vec<(String, Value)>,
    rank: Option<i32>,
}

impl RuleBuilder {
    #[must_use]
    pub fn select(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.selectors.push(Selector::new(key, value));
        self
    }

    #[must_use]
    pub fn declare(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.selectors.push(Selector::declaration(key, value));
        self
    }

    #[must_use]
    pub fn absent(mut self, key: &str) -> Self {
        self.selectors.push(Selector::absent(key));
        self
    }

    #[must_use]
    pub fn any(mut self, key: &str) -> Self {
        self.selectors.push(Selector::any(key));
        self
    }

    #[must_use]
    pub fn property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.push((name.to_owned(), value.into()));
        self
    }

    #[must_use]
    pub fn rank(mut self, rank: i32) -> Self {
        self.rank = Some(rank);
        self
    }

    #[must_use]
    pub fn build(self) -> Rule {
        Rule::new(self.selectors, self.properties, self.rank)
    }
}

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::PropertyMap;

/// One rule that contributed to a property map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRule {
    pub id: u32,
    pub rank: i32,
    /// Source of the rule set the rule was loaded with, if any.
    pub source: Option<String>,
    pub line: u32,
    /// The rule in notation form.
    pub text: String,
}

impl fmt::Display for MatchedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} (rank {})", self.id, self.rank)?;
        if let Some(source) = &self.source {
            write!(f, " {source}:{}", self.line)?;
        }
        write!(f, " {}", self.text)
    }
}

/// Explanation of a context's current properties, returned by
/// [`Context::explain()`](crate::Context::explain).
///
/// Lists the matching rules in merge order, the resulting map and the
/// wall-clock time spent producing it.
#[derive(Debug, Clone)]
#[must_use]
pub struct MatchReport {
    rules: Vec<MatchedRule>,
    properties: Arc<PropertyMap>,
    duration: Duration,
}

impl MatchReport {
    pub(crate) fn new(rules: Vec<MatchedRule>, properties: Arc<PropertyMap>, duration: Duration) -> Self {
        Self {
            rules,
            properties,
            duration,
        }
    }

    /// Matching rules, lowest rank first.
    #[must_use]
    pub fn rules(&self) -> &[MatchedRule] {
        &self.rules
    }

    #[must_use]
    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for MatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} rule(s) matched in {:?}", self.rules.len(), self.duration)?;
        for rule in &self.rules {
            writeln!(f, "  {rule}")?;
        }
        write!(f, "properties: {{")?;
        for (i, (name, value)) in self.properties.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {name}: {value}")?;
        }
        write!(f, " }}")
    }
}

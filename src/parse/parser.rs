use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;

use super::error::ParseError;
use super::grammar;
use crate::types::Rule;

/// Parse rules one at a time so each carries its source line and errors
/// point at the rule that failed.
pub(super) fn rules(source: &str) -> Result<Vec<Rule>, ParseError> {
    let mut input = source;
    let mut rules = Vec::new();
    loop {
        grammar::ws
            .parse_next(&mut input)
            .map_err(|e| ParseError::at(line_of(source, input), describe(e)))?;
        if input.is_empty() {
            return Ok(rules);
        }
        let line = line_of(source, input);
        match grammar::rule_def.parse_next(&mut input) {
            Ok(rule) => rules.push(rule.with_line(line)),
            Err(e) => return Err(ParseError::at(line_of(source, input), describe(e))),
        }
    }
}

fn line_of(source: &str, rest: &str) -> u32 {
    let consumed = &source[..source.len() - rest.len()];
    u32::try_from(consumed.matches('\n').count() + 1).unwrap_or(u32::MAX)
}

fn describe(err: ErrMode<ContextError>) -> String {
    match err {
        ErrMode::Backtrack(e) | ErrMode::Cut(e) => {
            let message = e.to_string();
            if message.is_empty() {
                "invalid syntax".to_owned()
            } else {
                message
            }
        }
        ErrMode::Incomplete(_) => "incomplete input".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_recorded() {
        let parsed = rules("# header\nclass=A { x: 1; }\n\n  field=b {\n y: 2;\n}\n").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].line(), 2);
        assert_eq!(parsed[1].line(), 4);
    }

    #[test]
    fn error_points_at_failing_line() {
        let err = rules("a=1 { x: 1; }\nb=2 { y: ; }\n").unwrap_err();
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn empty_source() {
        assert!(rules("   # nothing\n").unwrap().is_empty());
    }
}

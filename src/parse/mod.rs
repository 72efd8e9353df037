//! Rule notation and expression parsing.

mod error;
mod grammar;
mod parser;

pub use error::ParseError;

use crate::types::{Expr, Rule};

/// Parse rule notation into rules, in source order.
///
/// # Errors
///
/// Returns [`ParseError`] with the line of the first rule that fails.
pub fn parse_rules(source: &str) -> Result<Vec<Rule>, ParseError> {
    parser::rules(source)
}

/// Parse a dynamic value expression.
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not a complete expression.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    use winnow::combinator::{preceded, terminated};
    use winnow::Parser;
    preceded(grammar::ws, terminated(grammar::expr, grammar::ws))
        .parse(source)
        .map_err(|e| ParseError::new(e.to_string()))
}

use winnow::ascii::{digit1, multispace1, till_line_ending};
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, repeat, separated, terminated};
use winnow::error::{ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, take_while};

use crate::dynamic::DynamicValue;
use crate::types::{ArithOp, CompareOp, Expr, Rule, Selector, Value};

// -- Layout -----------------------------------------------------------------

/// Skips blanks and `#` line comments.
pub(super) fn ws(input: &mut &str) -> ModalResult<()> {
    repeat(0.., alt((multispace1.void(), ('#', till_line_ending).void()))).parse_next(input)
}

// -- Identifiers ------------------------------------------------------------

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1.., |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| {
            c.is_ascii_alphanumeric() || c == '_' || c == '.'
        }),
    )
        .take()
        .parse_next(input)
}

/// A whole word equal to `kw`; `android` does not start with keyword `and`.
fn keyword<'i>(kw: &'static str) -> impl FnMut(&mut &'i str) -> ModalResult<&'i str> {
    move |input: &mut &'i str| {
        let checkpoint = input.checkpoint();
        let word = ident.parse_next(input)?;
        if word == kw {
            Ok(word)
        } else {
            input.reset(&checkpoint);
            Err(ErrMode::from_input(input))
        }
    }
}

// -- Scalars ----------------------------------------------------------------

fn escape(input: &mut &str) -> ModalResult<String> {
    preceded('\\', any)
        .map(|c| match c {
            'n' => "\n".to_owned(),
            't' => "\t".to_owned(),
            '"' | '\\' => c.to_string(),
            other => format!("\\{other}"),
        })
        .parse_next(input)
}

/// Double-quoted text with `\"`, `\\`, `\n` and `\t` escapes; other escapes are kept.
fn string_literal(input: &mut &str) -> ModalResult<String> {
    let chunk = alt((
        take_while(1.., |c: char| c != '"' && c != '\\').map(str::to_owned),
        escape,
    ));
    delimited(
        '"',
        repeat(0.., chunk).fold(String::new, |mut text, part: String| {
            text.push_str(&part);
            text
        }),
        cut_err('"'),
    )
    .parse_next(input)
}

/// Unsigned number; a leading `-` is handled by the callers.
fn number(input: &mut &str) -> ModalResult<Value> {
    let (whole, fraction) = (digit1, opt(preceded('.', digit1))).parse_next(input)?;
    let parsed = match fraction {
        Some(fraction) => format!("{whole}.{fraction}").parse().map(Value::Float).ok(),
        None => whole.parse().map(Value::Int).ok(),
    };
    parsed.ok_or_else(|| ErrMode::from_input(input).cut())
}

fn signed_number(input: &mut &str) -> ModalResult<Value> {
    let negative = opt('-').parse_next(input)?.is_some();
    let value = number.parse_next(input)?;
    Ok(match value {
        Value::Int(i) if negative => Value::Int(-i),
        Value::Float(f) if negative => Value::Float(-f),
        other => other,
    })
}

/// Bare words are strings, except the literals `true`, `false` and `null`.
fn word(input: &mut &str) -> ModalResult<Value> {
    let word = ident.parse_next(input)?;
    Ok(match word {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        other => Value::String(other.to_owned()),
    })
}

fn scalar(input: &mut &str) -> ModalResult<Value> {
    ws.parse_next(input)?;
    alt((string_literal.map(Value::String), signed_number, word))
        .context(StrContext::Expected(StrContextValue::Description("value")))
        .parse_next(input)
}

// -- Expressions ------------------------------------------------------------
//
// Precedence, loosest first: ternary, or, and, not, comparison, additive,
// multiplicative, unary minus, indexing, primary.

pub(super) fn expr(input: &mut &str) -> ModalResult<Expr> {
    let condition = or_expr.parse_next(input)?;
    let checkpoint = input.checkpoint();
    ws.parse_next(input)?;
    if opt('?').parse_next(input)?.is_none() {
        input.reset(&checkpoint);
        return Ok(condition);
    }
    let then = cut_err(expr).parse_next(input)?;
    ws.parse_next(input)?;
    cut_err(':').parse_next(input)?;
    let otherwise = cut_err(expr).parse_next(input)?;
    Ok(Expr::Conditional {
        condition: Box::new(condition),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    })
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = and_expr(input)?;
    let rest: Vec<Expr> = repeat(
        0..,
        preceded((ws, alt(("||", keyword("or")))), cut_err(and_expr)),
    )
    .parse_next(input)?;
    Ok(rest.into_iter().fold(first, Expr::or))
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = not_expr(input)?;
    let rest: Vec<Expr> = repeat(
        0..,
        preceded((ws, alt(("&&", keyword("and")))), cut_err(not_expr)),
    )
    .parse_next(input)?;
    Ok(rest.into_iter().fold(first, Expr::and))
}

fn not_expr(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    if opt(alt(("!", keyword("not")))).parse_next(input)?.is_some() {
        let inner = cut_err(not_expr).parse_next(input)?;
        return Ok(!inner);
    }
    comparison(input)
}

fn compare_op(input: &mut &str) -> ModalResult<CompareOp> {
    ws.parse_next(input)?;
    alt((
        ">=".value(CompareOp::Gte),
        ">".value(CompareOp::Gt),
        "<=".value(CompareOp::Lte),
        "<".value(CompareOp::Lt),
        "==".value(CompareOp::Eq),
        "!=".value(CompareOp::Neq),
    ))
    .parse_next(input)
}

fn comparison(input: &mut &str) -> ModalResult<Expr> {
    let lhs = additive(input)?;
    let checkpoint = input.checkpoint();
    match compare_op.parse_next(input) {
        Ok(op) => {
            let rhs = cut_err(additive).parse_next(input)?;
            Ok(lhs.compare(op, rhs))
        }
        Err(ErrMode::Backtrack(_)) => {
            input.reset(&checkpoint);
            Ok(lhs)
        }
        Err(e) => Err(e),
    }
}

fn additive(input: &mut &str) -> ModalResult<Expr> {
    let first = multiplicative(input)?;
    let rest: Vec<(ArithOp, Expr)> = repeat(
        0..,
        (
            preceded(ws, alt(('+'.value(ArithOp::Add), '-'.value(ArithOp::Sub)))),
            cut_err(multiplicative),
        ),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, (op, rhs)| acc.arith(op, rhs)))
}

fn multiplicative(input: &mut &str) -> ModalResult<Expr> {
    let first = unary(input)?;
    let rest: Vec<(ArithOp, Expr)> = repeat(
        0..,
        (
            preceded(
                ws,
                alt((
                    '*'.value(ArithOp::Mul),
                    '/'.value(ArithOp::Div),
                    '%'.value(ArithOp::Rem),
                )),
            ),
            cut_err(unary),
        ),
    )
    .parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, (op, rhs)| acc.arith(op, rhs)))
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    if opt('-').parse_next(input)?.is_some() {
        let inner = cut_err(unary).parse_next(input)?;
        return Ok(Expr::Neg(Box::new(inner)));
    }
    postfix(input)
}

fn postfix(input: &mut &str) -> ModalResult<Expr> {
    let target = primary(input)?;
    let indices: Vec<Expr> = repeat(
        0..,
        delimited((ws, '['), cut_err(expr), (ws, cut_err(']'))),
    )
    .parse_next(input)?;
    Ok(indices.into_iter().fold(target, |acc, index| Expr::Index {
        target: Box::new(acc),
        index: Box::new(index),
    }))
}

fn path_or_literal(input: &mut &str) -> ModalResult<Expr> {
    let name = ident.parse_next(input)?;
    Ok(match name {
        "true" => Expr::Literal(Value::Bool(true)),
        "false" => Expr::Literal(Value::Bool(false)),
        "null" => Expr::Literal(Value::Null),
        dotted => Expr::Path(dotted.split('.').map(str::to_owned).collect()),
    })
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    alt((
        delimited('(', expr, (ws, ')')),
        string_literal.map(|s| Expr::Literal(Value::String(s))),
        number.map(Expr::Literal),
        path_or_literal,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "expression",
    )))
    .parse_next(input)
}

// -- Property values --------------------------------------------------------

fn dynamic_expression(input: &mut &str) -> ModalResult<Value> {
    let statically = alt(("$${".value(true), "${".value(false))).parse_next(input)?;
    let parsed = cut_err(expr).parse_next(input)?;
    ws.parse_next(input)?;
    cut_err('}').parse_next(input)?;
    let dynamic = DynamicValue::from_expr(parsed);
    Ok(Value::Dynamic(if statically {
        DynamicValue::statically_resolved(Value::Dynamic(dynamic))
    } else {
        dynamic
    }))
}

fn field_path(input: &mut &str) -> ModalResult<Value> {
    let path = preceded('$', ident).parse_next(input)?;
    Ok(Value::Dynamic(DynamicValue::field_path(path)))
}

fn list(input: &mut &str) -> ModalResult<Value> {
    let items: Vec<Value> = delimited(
        '[',
        separated(0.., property_value, (ws, ',')),
        (ws, cut_err(']')),
    )
    .parse_next(input)?;
    Ok(Value::List(items))
}

fn property_value(input: &mut &str) -> ModalResult<Value> {
    ws.parse_next(input)?;
    alt((dynamic_expression, field_path, list, scalar))
        .context(StrContext::Expected(StrContextValue::Description(
            "property value",
        )))
        .parse_next(input)
}

/// `name: value` with an optional trailing `!` marking an override.
fn property(input: &mut &str) -> ModalResult<(String, Value)> {
    ws.parse_next(input)?;
    let name = ident.parse_next(input)?;
    ws.parse_next(input)?;
    cut_err(':').parse_next(input)?;
    let value = cut_err(property_value).parse_next(input)?;
    ws.parse_next(input)?;
    let value = match opt('!').parse_next(input)? {
        Some(_) => Value::Override(Box::new(value)),
        None => value,
    };
    Ok((name.to_owned(), value))
}

fn property_block(input: &mut &str) -> ModalResult<Vec<(String, Value)>> {
    ws.parse_next(input)?;
    '{'.parse_next(input)?;
    let properties: Vec<(String, Value)> =
        repeat(0.., terminated(property, opt((ws, ';')))).parse_next(input)?;
    ws.parse_next(input)?;
    cut_err('}')
        .context(StrContext::Expected(StrContextValue::Description("'}'")))
        .parse_next(input)?;
    Ok(properties)
}

// -- Selectors & rules ------------------------------------------------------

fn alternatives(input: &mut &str) -> ModalResult<Value> {
    let items: Vec<Value> = delimited(
        '(',
        separated(1.., scalar, (ws, ',')),
        (ws, cut_err(')')),
    )
    .parse_next(input)?;
    Ok(Value::List(items))
}

fn selector_value(input: &mut &str) -> ModalResult<Value> {
    ws.parse_next(input)?;
    alt((
        '*'.value(Value::String(crate::meta::KEY_ANY.to_owned())),
        alternatives,
        scalar,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "selector value",
    )))
    .parse_next(input)
}

fn selector(input: &mut &str) -> ModalResult<Selector> {
    ws.parse_next(input)?;
    if opt('!').parse_next(input)?.is_some() {
        let key = cut_err(ident).parse_next(input)?;
        return Ok(Selector::absent(key));
    }
    let declaration = opt('@').parse_next(input)?.is_some();
    let key = ident.parse_next(input)?;
    ws.parse_next(input)?;
    cut_err('=').parse_next(input)?;
    let value = cut_err(selector_value).parse_next(input)?;
    Ok(if declaration {
        Selector::declaration(key, value)
    } else {
        Selector::new(key, value)
    })
}

fn rank_annotation(input: &mut &str) -> ModalResult<i32> {
    let n = delimited(
        ('(', ws, keyword("rank"), ws),
        cut_err(signed_number),
        (ws, cut_err(')')),
    )
    .parse_next(input)?;
    match n {
        Value::Int(i) => i32::try_from(i).map_err(|_| ErrMode::from_input(input).cut()),
        _ => Err(ErrMode::from_input(input).cut()),
    }
}

/// One rule. A declaration selector may be written anywhere; it is moved last.
pub(super) fn rule_def(input: &mut &str) -> ModalResult<Rule> {
    ws.parse_next(input)?;
    let rank = opt(rank_annotation).parse_next(input)?;
    let mut selectors: Vec<Selector> = repeat(0.., selector).parse_next(input)?;
    let properties = cut_err(property_block)
        .context(StrContext::Expected(StrContextValue::Description(
            "property block",
        )))
        .parse_next(input)?;
    if selectors.iter().filter(|s| s.is_declaration()).count() == 1 {
        if let Some(pos) = selectors.iter().position(Selector::is_declaration) {
            let decl = selectors.remove(pos);
            selectors.push(decl);
        }
    }
    Ok(Rule::new(selectors, properties, rank))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_expr(src: &str) -> Expr {
        terminated(expr, ws).parse(src).unwrap()
    }

    fn parse_rule(src: &str) -> Rule {
        terminated(rule_def, ws).parse(src).unwrap()
    }

    #[test]
    fn precedence_mul_before_add() {
        match parse_expr("a + b * 2") {
            Expr::Arith { op: ArithOp::Add, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Arith { op: ArithOp::Mul, .. }));
            }
            other => panic!("expected Add, got {other:?}"),
        }
    }

    #[test]
    fn precedence_and_before_or() {
        match parse_expr("a || b && c") {
            Expr::Or(left, right) => {
                assert!(matches!(*left, Expr::Path(_)));
                assert!(matches!(*right, Expr::And(_, _)));
            }
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn word_operators() {
        assert!(matches!(parse_expr("a and not b"), Expr::And(_, _)));
        assert!(matches!(parse_expr("a or b"), Expr::Or(_, _)));
        assert!(matches!(parse_expr("android"), Expr::Path(p) if p == ["android"]));
    }

    #[test]
    fn all_comparison_ops() {
        let ops = [
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Neq),
            (">", CompareOp::Gt),
            (">=", CompareOp::Gte),
            ("<", CompareOp::Lt),
            ("<=", CompareOp::Lte),
        ];
        for (sym, expected) in ops {
            match parse_expr(&format!("x {sym} 1")) {
                Expr::Compare { op, .. } => assert_eq!(op, expected, "failed for {sym}"),
                other => panic!("expected Compare for {sym}, got {other:?}"),
            }
        }
    }

    #[test]
    fn ternary_and_index() {
        assert!(matches!(
            parse_expr("a > 1 ? items[0] : \"none\""),
            Expr::Conditional { .. }
        ));
        assert!(matches!(parse_expr("object[\"name\"]"), Expr::Index { .. }));
    }

    #[test]
    fn literals() {
        assert_eq!(parse_expr("3.5"), Expr::Literal(Value::Float(3.5)));
        assert_eq!(parse_expr("null"), Expr::Literal(Value::Null));
        assert_eq!(parse_expr("-4"), Expr::Neg(Box::new(Expr::Literal(Value::Int(4)))));
    }

    #[test]
    fn rule_with_selectors_and_properties() {
        let rule = parse_rule("class=Invoice field=amount { visible: true; label: \"Amount\"; }");
        assert_eq!(
            rule.selectors(),
            &[Selector::new("class", "Invoice"), Selector::new("field", "amount")]
        );
        assert_eq!(rule.properties()[1], ("label".to_owned(), Value::from("Amount")));
        assert_eq!(rule.rank(), None);
    }

    #[test]
    fn rank_alternatives_absent_and_override() {
        let rule = parse_rule("(rank 50) field=(amount, total) !readonly { editable: false! ; }");
        assert_eq!(rule.rank(), Some(50));
        assert_eq!(
            rule.selectors()[0].value(),
            &Value::List(vec!["amount".into(), "total".into()])
        );
        assert!(rule.selectors()[1].is_anti());
        assert_eq!(
            rule.properties()[0].1,
            Value::Override(Box::new(Value::Bool(false)))
        );
    }

    #[test]
    fn declaration_moves_last() {
        let rule = parse_rule("@field=notes class=Invoice { visible: true }");
        assert_eq!(rule.selectors()[0], Selector::new("class", "Invoice"));
        assert!(rule.selectors()[1].is_declaration());
    }

    #[test]
    fn dynamic_property_values() {
        let rule = parse_rule(
            "type=* { component: $${\"Text\" + \"Field\"}; value: $object.amount; shown: ${a && b}; }",
        );
        assert_eq!(rule.selectors()[0].value(), &Value::from("*"));
        let props = rule.properties();
        let Value::Dynamic(component) = &props[0].1 else {
            panic!("expected a dynamic value");
        };
        assert!(component.is_statically_resolvable());
        let Value::Dynamic(value) = &props[1].1 else {
            panic!("expected a field path");
        };
        assert!(value.is_settable());
        assert_eq!(props[2].1.to_string(), "${(a && b)}");
    }

    #[test]
    fn lists_and_numbers() {
        let rule = parse_rule("k=-3 { tags: [a, \"b c\", 2.5]; }");
        assert_eq!(rule.selectors()[0].value(), &Value::Int(-3));
        assert_eq!(
            rule.properties()[0].1,
            Value::List(vec!["a".into(), "b c".into(), Value::Float(2.5)])
        );
    }

    #[test]
    fn string_escapes() {
        let text = string_literal.parse(r#""say \"hi\"\n\tnow \q""#).unwrap();
        assert_eq!(text, "say \"hi\"\n\tnow \\q");
        assert!(string_literal.parse(r#""open"#).is_err());
    }

    #[test]
    fn numbers_keep_their_kind() {
        assert_eq!(signed_number.parse("-12").unwrap(), Value::Int(-12));
        assert_eq!(signed_number.parse("3.75").unwrap(), Value::Float(3.75));
        assert!(number.parse("99999999999999999999").is_err());
    }
}

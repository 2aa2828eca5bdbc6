//! Condition language used for filtering, grouping and recommendation.
//!
//! Textual form: `field[:operator[:values]]`, several conditions joined with
//! `;`. `in`/`not_in` take a `,`-separated list, `range` takes `min:max` with
//! either side optional. A value wrapped in `( … )` is taken literally as text,
//! so it may contain `:`, `,` or `;` (ISO timestamps need this).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::field::Scalar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Grouping key only; never evaluated as a predicate.
    Slice,
    In,
    NotIn,
    Range,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Slice => "slice",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Range => "range",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "slice" => Ok(Operator::Slice),
            "in" => Ok(Operator::In),
            "not_in" => Ok(Operator::NotIn),
            "range" => Ok(Operator::Range),
            other => Err(EngineError::UnknownOperator(other.to_string())),
        }
    }
}

/// Operands of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValues {
    /// Membership list for `in` / `not_in`.
    List(Vec<Scalar>),
    /// Inclusive `(min, max)` bounds for `range`; either side optional.
    Bounds(Option<Scalar>, Option<Scalar>),
}

/// A typed predicate (or grouping marker) over one field.
///
/// Construction validates the operator/values combination, so every
/// `Condition` in circulation is well-formed.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    field_name: String,
    operator: Operator,
    values: Option<ConditionValues>,
}

impl Condition {
    pub fn new(
        field_name: impl Into<String>,
        operator: Operator,
        values: Option<ConditionValues>,
    ) -> Result<Self> {
        let field_name = field_name.into();
        if field_name.trim().is_empty() {
            return Err(EngineError::invalid_condition(
                field_name,
                "field name is empty",
            ));
        }
        let values = match (operator, values) {
            (Operator::Slice, None) => None,
            (Operator::Slice, Some(_)) => {
                return Err(EngineError::invalid_condition(
                    field_name,
                    "slice takes no values",
                ))
            }
            (Operator::In | Operator::NotIn, Some(ConditionValues::List(list)))
                if !list.is_empty() =>
            {
                let list = list
                    .into_iter()
                    .map(list_operand)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|reason| EngineError::invalid_condition(&field_name, reason))?;
                Some(ConditionValues::List(list))
            }
            (Operator::In | Operator::NotIn, _) => {
                return Err(EngineError::invalid_condition(
                    field_name,
                    format!("{operator} requires a non-empty value list"),
                ))
            }
            (Operator::Range, None | Some(ConditionValues::Bounds(None, None))) => None,
            (Operator::Range, Some(ConditionValues::Bounds(min, max))) => {
                for bound in [&min, &max].into_iter().flatten() {
                    check_bound(bound)
                        .map_err(|reason| EngineError::invalid_condition(&field_name, reason))?;
                }
                Some(ConditionValues::Bounds(min, max))
            }
            (Operator::Range, Some(ConditionValues::List(_))) => {
                return Err(EngineError::invalid_condition(
                    field_name,
                    "range takes (min, max) bounds",
                ))
            }
        };
        Ok(Self {
            field_name,
            operator,
            values,
        })
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn values(&self) -> Option<&ConditionValues> {
        self.values.as_ref()
    }

    pub fn is_slice(&self) -> bool {
        self.operator == Operator::Slice
    }

    /// Evaluate against a fetched field value (`None` = field absent).
    ///
    /// A `Slice` is a grouping marker and checking it is a caller error.
    /// Values that cannot be compared with a range bound fail the check.
    pub fn check(&self, value: Option<&Scalar>) -> Result<bool> {
        match (self.operator, &self.values) {
            (Operator::Slice, _) => Err(EngineError::SliceNotCheckable(self.field_name.clone())),
            (Operator::In, Some(ConditionValues::List(list))) => {
                Ok(value.is_some_and(|v| is_member(list, v)))
            }
            (Operator::NotIn, Some(ConditionValues::List(list))) => {
                Ok(!value.is_some_and(|v| is_member(list, v)))
            }
            (Operator::Range, None) => Ok(true),
            (Operator::Range, Some(ConditionValues::Bounds(min, max))) => {
                let Some(value) = value else {
                    return Ok(false);
                };
                Ok(within(value, min.as_ref(), max.as_ref()))
            }
            _ => Ok(false),
        }
    }
}

// ── Constructors ────────────────────────────────────────────────────

pub fn slice_condition(field_name: &str) -> Result<Condition> {
    Condition::new(field_name, Operator::Slice, None)
}

pub fn in_condition(field_name: &str, values: Vec<Scalar>) -> Result<Condition> {
    Condition::new(field_name, Operator::In, Some(ConditionValues::List(values)))
}

pub fn not_in_condition(field_name: &str, values: Vec<Scalar>) -> Result<Condition> {
    Condition::new(
        field_name,
        Operator::NotIn,
        Some(ConditionValues::List(values)),
    )
}

pub fn range_condition(
    field_name: &str,
    min: Option<Scalar>,
    max: Option<Scalar>,
) -> Result<Condition> {
    Condition::new(
        field_name,
        Operator::Range,
        Some(ConditionValues::Bounds(min, max)),
    )
}

// ── Evaluation helpers ──────────────────────────────────────────────

/// Membership operands are kept as text: `1.1` and `1.10` are distinct
/// versions. Numbers and booleans are stored in their textual spelling.
fn list_operand(value: Scalar) -> std::result::Result<Scalar, String> {
    match value {
        Scalar::Number(n) if !n.is_finite() => Err(format!("non-finite operand {n}")),
        Scalar::Text(text) => Ok(Scalar::Text(text)),
        other => Ok(Scalar::Text(other.to_string())),
    }
}

fn check_bound(bound: &Scalar) -> std::result::Result<(), String> {
    match bound {
        Scalar::Number(n) if !n.is_finite() => Err(format!("non-finite bound {n}")),
        Scalar::Bool(b) => Err(format!("boolean bound {b} has no order")),
        _ => Ok(()),
    }
}

fn is_member(list: &[Scalar], value: &Scalar) -> bool {
    list.iter().any(|operand| operand_matches(operand, value))
}

/// Text compares exactly; the operand is read as a number only when the
/// field value itself is one.
fn operand_matches(operand: &Scalar, value: &Scalar) -> bool {
    match (operand, value) {
        (Scalar::Text(t), Scalar::Text(v)) => t == v,
        (Scalar::Text(t), Scalar::Number(n)) => {
            t.trim().parse::<f64>().is_ok_and(|parsed| parsed == *n)
        }
        (Scalar::Text(t), Scalar::Bool(b)) => {
            t.eq_ignore_ascii_case(if *b { "true" } else { "false" })
        }
        _ => operand == value,
    }
}

fn within(value: &Scalar, min: Option<&Scalar>, max: Option<&Scalar>) -> bool {
    use std::cmp::Ordering::{Greater, Less};

    if let Some(min) = min {
        match value.compare(min) {
            Some(Less) | None => return false,
            _ => {}
        }
    }
    if let Some(max) = max {
        match value.compare(max) {
            Some(Greater) | None => return false,
            _ => {}
        }
    }
    true
}

// ── Formatting ──────────────────────────────────────────────────────

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.operator, &self.values) {
            (Operator::Slice, _) => write!(f, "{}", self.field_name),
            (op, Some(ConditionValues::List(list))) => {
                let joined: Vec<String> = list.iter().map(format_list_operand).collect();
                write!(f, "{}:{}:{}", self.field_name, op, joined.join(","))
            }
            (op, Some(ConditionValues::Bounds(min, max))) => {
                let min = min.as_ref().map(format_operand).unwrap_or_default();
                let max = max.as_ref().map(format_operand).unwrap_or_default();
                write!(f, "{}:{}:{}:{}", self.field_name, op, min, max)
            }
            (op, None) => write!(f, "{}:{}:", self.field_name, op),
        }
    }
}

/// Render a range bound so that parsing it back yields the same scalar.
fn format_operand(value: &Scalar) -> String {
    match value {
        Scalar::Text(text) if needs_wrapping(text) || Scalar::parse_loose(text).is_number() => {
            format!("({text})")
        }
        other => other.to_string(),
    }
}

/// List operands always parse back as text, so only separators need guarding.
fn format_list_operand(value: &Scalar) -> String {
    match value {
        Scalar::Text(text) if needs_wrapping(text) => format!("({text})"),
        other => other.to_string(),
    }
}

fn needs_wrapping(text: &str) -> bool {
    text.is_empty() || text.trim() != text || text.contains([':', ',', ';', '(', ')'])
}

// ── Parsing ─────────────────────────────────────────────────────────

impl FromStr for Condition {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();
        let parts = split_top_level(input, ':', Some(3))
            .map_err(|reason| EngineError::invalid_condition(input, reason))?;

        let field_name = parts[0].trim();
        if parts.len() == 1 {
            return slice_condition(field_name);
        }

        let operator: Operator = parts[1].trim().parse()?;
        let values_str = parts.get(2).map(|v| v.trim()).unwrap_or("");

        match operator {
            Operator::Slice if values_str.is_empty() => slice_condition(field_name),
            Operator::Slice => Err(EngineError::invalid_condition(
                input,
                "slice takes no values",
            )),
            Operator::In | Operator::NotIn => {
                let items = split_top_level(values_str, ',', None)
                    .map_err(|reason| EngineError::invalid_condition(input, reason))?;
                let values: Vec<Scalar> = items
                    .into_iter()
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(parse_list_operand)
                    .collect();
                if values.is_empty() {
                    return Err(EngineError::invalid_condition(
                        input,
                        format!("{operator} requires values"),
                    ));
                }
                Condition::new(field_name, operator, Some(ConditionValues::List(values)))
            }
            Operator::Range => {
                if values_str.is_empty() {
                    return Condition::new(field_name, operator, None);
                }
                let bounds = split_top_level(values_str, ':', None)
                    .map_err(|reason| EngineError::invalid_condition(input, reason))?;
                if bounds.len() > 2 {
                    return Err(EngineError::invalid_condition(
                        input,
                        "range takes at most min:max",
                    ));
                }
                let bound = |i: usize| {
                    bounds
                        .get(i)
                        .map(|b| b.trim())
                        .filter(|b| !b.is_empty())
                        .map(parse_operand)
                };
                range_condition(field_name, bound(0), bound(1))
            }
        }
    }
}

/// A parenthesised operand is literal text; anything else is a number when it reads as one.
fn parse_operand(raw: &str) -> Scalar {
    match unwrap_parens(raw) {
        Some(inner) => Scalar::Text(inner.to_string()),
        None => Scalar::parse_loose(raw),
    }
}

fn parse_list_operand(raw: &str) -> Scalar {
    Scalar::Text(unwrap_parens(raw).unwrap_or(raw).to_string())
}

/// Inner text when `raw` is exactly one balanced `( … )` group.
fn unwrap_parens(raw: &str) -> Option<&str> {
    let inner = raw.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

/// Split on `sep` outside parentheses, producing at most `limit` parts.
fn split_top_level(
    input: &str,
    sep: char,
    limit: Option<usize>,
) -> std::result::Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(format!("unbalanced ')' at position {i}"));
                }
            }
            _ if c == sep && depth == 0 => {
                if limit.is_some_and(|l| parts.len() + 1 >= l) {
                    continue;
                }
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    parts.push(&input[start..]);
    Ok(parts)
}

/// Parse a `;`-separated condition string.
///
/// Best effort: malformed items are logged and skipped, the rest are kept.
pub fn parse_conditions(input: &str) -> Vec<Condition> {
    let items = match split_top_level(input, ';', None) {
        Ok(items) => items,
        Err(reason) => {
            warn!(input, %reason, "Skipping unparsable condition string");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| match item.parse::<Condition>() {
            Ok(condition) => Some(condition),
            Err(e) => {
                warn!(condition = item, error = %e, "Skipping invalid condition");
                None
            }
        })
        .collect()
}

/// Parse several condition strings and concatenate the results.
pub fn parse_condition_list<S: AsRef<str>>(inputs: &[S]) -> Vec<Condition> {
    inputs
        .iter()
        .flat_map(|input| parse_conditions(input.as_ref()))
        .collect()
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Scalar {
        Scalar::Text(s.to_string())
    }

    #[test]
    fn parse_each_operator() {
        let slice: Condition = "agent_name".parse().unwrap();
        assert!(slice.is_slice());
        assert_eq!(slice.field_name(), "agent_name");

        let within: Condition = "agent_name:in:a1, a2".parse().unwrap();
        assert_eq!(within.operator(), Operator::In);
        assert_eq!(
            within.values(),
            Some(&ConditionValues::List(vec![text("a1"), text("a2")]))
        );

        let outside: Condition = "model:not_in:gpt-3.5".parse().unwrap();
        assert_eq!(outside.operator(), Operator::NotIn);

        let range: Condition = "value:range:10:100".parse().unwrap();
        assert_eq!(
            range.values(),
            Some(&ConditionValues::Bounds(
                Some(Scalar::Number(10.0)),
                Some(Scalar::Number(100.0))
            ))
        );

        let max_only: Condition = "value:range::100".parse().unwrap();
        assert_eq!(
            max_only.values(),
            Some(&ConditionValues::Bounds(None, Some(Scalar::Number(100.0))))
        );
    }

    #[test]
    fn timestamp_range_round_trips() {
        let input = "time:range:(2025-01-01T00:00:00):";
        let c: Condition = input.parse().unwrap();
        assert_eq!(c.field_name(), "time");
        assert_eq!(
            c.values(),
            Some(&ConditionValues::Bounds(Some(text("2025-01-01T00:00:00")), None))
        );
        assert_eq!(c.to_string(), input);
    }

    #[test]
    fn format_then_parse_is_identity() {
        let conditions = vec![
            slice_condition("agent").unwrap(),
            in_condition("tag", vec![text("a,b"), text("plain"), text("x:y")]).unwrap(),
            not_in_condition("version", vec![Scalar::Number(2.0), text("2.0")]).unwrap(),
            range_condition("t", Some(text("2025-01-01T00:00:00")), Some(text("z"))).unwrap(),
            range_condition("n", None, Some(Scalar::Number(0.5))).unwrap(),
            range_condition("open", None, None).unwrap(),
            in_condition("odd", vec![text(""), text(" padded "), text("(x)")]).unwrap(),
            in_condition("flag", vec![Scalar::Bool(true), text("false")]).unwrap(),
            not_in_condition("build", vec![Scalar::Bool(false), Scalar::Number(-0.25)]).unwrap(),
            range_condition("v", Some(text("10")), Some(text("true"))).unwrap(),
        ];
        for c in conditions {
            let reparsed: Condition = c.to_string().parse().unwrap();
            assert_eq!(reparsed, c, "round trip of {c}");
        }
    }

    #[test]
    fn list_operands_are_stored_as_text() {
        let c = in_condition("flag", vec![Scalar::Bool(true), Scalar::Number(2.0)]).unwrap();
        assert_eq!(
            c.values(),
            Some(&ConditionValues::List(vec![text("true"), text("2")]))
        );
        assert!(c.check(Some(&Scalar::Bool(true))).unwrap());
        assert!(c.check(Some(&Scalar::Number(2.0))).unwrap());
        assert!(!c.check(Some(&Scalar::Bool(false))).unwrap());
    }

    #[test]
    fn non_finite_and_boolean_bounds_are_rejected() {
        assert!(in_condition("a", vec![Scalar::Number(f64::NAN)]).is_err());
        assert!(range_condition("a", Some(Scalar::Number(f64::INFINITY)), None).is_err());
        assert!(range_condition("a", None, Some(Scalar::Bool(true))).is_err());
    }

    #[test]
    fn version_strings_are_distinct_members() {
        let within: Condition = "agent_version:in:1.10".parse().unwrap();
        assert_eq!(
            within.values(),
            Some(&ConditionValues::List(vec![text("1.10")]))
        );
        assert!(within.check(Some(&text("1.10"))).unwrap());
        assert!(!within.check(Some(&text("1.1"))).unwrap());
        // A numeric field value still matches its spelling.
        assert!(within.check(Some(&Scalar::Number(1.1))).unwrap());

        let outside: Condition = "agent_version:not_in:1.10".parse().unwrap();
        assert!(outside.check(Some(&text("1.1"))).unwrap());
        assert!(!outside.check(Some(&text("1.10"))).unwrap());

        let old: Condition = "agent_version:in:1.1".parse().unwrap();
        assert!(old.check(Some(&text("1.1"))).unwrap());
        assert!(!old.check(Some(&text("1.10"))).unwrap());
    }

    #[test]
    fn construction_validates_operator_values() {
        assert!(Condition::new("a", Operator::Slice, Some(ConditionValues::List(vec![text("x")]))).is_err());
        assert!(Condition::new("a", Operator::In, None).is_err());
        assert!(in_condition("a", vec![]).is_err());
        assert!(Condition::new("a", Operator::Range, Some(ConditionValues::List(vec![]))).is_err());
        assert!(range_condition("a", None, None).is_ok());
        assert!(slice_condition("").is_err());
    }

    #[test]
    fn malformed_strings_are_errors() {
        assert!(matches!(
            "a:between:1".parse::<Condition>(),
            Err(EngineError::UnknownOperator(_))
        ));
        assert!("a:in:".parse::<Condition>().is_err());
        assert!("a:in:(x".parse::<Condition>().is_err());
        assert!("a:range:1:2:3".parse::<Condition>().is_err());
    }

    #[test]
    fn parse_conditions_skips_bad_items() {
        let parsed = parse_conditions("agent;model:bogus:x; ;time:range:(2025-01-01T00:00:00;x):");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].field_name(), "agent");
        assert_eq!(
            parsed[1].values(),
            Some(&ConditionValues::Bounds(Some(text("2025-01-01T00:00:00;x")), None))
        );

        let list = parse_condition_list(&["a", "b:in:1,2"]);
        assert_eq!(list.len(), 2);
        assert!(parse_conditions("   ").is_empty());
    }

    #[test]
    fn check_membership_and_ranges() {
        let c: Condition = "v:in:1,b".parse().unwrap();
        assert!(c.check(Some(&Scalar::Number(1.0))).unwrap());
        assert!(c.check(Some(&text("b"))).unwrap());
        assert!(!c.check(Some(&text("c"))).unwrap());
        assert!(!c.check(None).unwrap());

        let n: Condition = "v:not_in:b".parse().unwrap();
        assert!(n.check(None).unwrap());
        assert!(!n.check(Some(&text("b"))).unwrap());

        let r: Condition = "v:range:10:20".parse().unwrap();
        assert!(r.check(Some(&Scalar::Number(10.0))).unwrap());
        assert!(r.check(Some(&Scalar::Number(20.0))).unwrap());
        assert!(!r.check(Some(&Scalar::Number(21.0))).unwrap());
        assert!(!r.check(Some(&text("15"))).unwrap());
        assert!(!r.check(None).unwrap());

        let lexical: Condition = "t:range:(2025-01-01):".parse().unwrap();
        assert!(lexical.check(Some(&text("2025-03-01T00:00:00"))).unwrap());
        assert!(!lexical.check(Some(&text("2024-12-31"))).unwrap());

        let open: Condition = "v:range:".parse().unwrap();
        assert!(open.check(None).unwrap());
    }

    #[test]
    fn checking_a_slice_fails() {
        let c = slice_condition("agent").unwrap();
        assert!(matches!(
            c.check(Some(&text("a"))),
            Err(EngineError::SliceNotCheckable(_))
        ));
    }

    #[test]
    fn serde_uses_string_form() {
        let c: Condition = "v:in:a,b".parse().unwrap();
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"v:in:a,b\"");
        let back: Condition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Subfield names addressable with `<field>/<subfield>`.
pub const SUBFIELD_VALUE: &str = "value";
pub const SUBFIELD_MIN: &str = "min_value";
pub const SUBFIELD_MAX: &str = "max_value";
pub const SUBFIELD_SAMPLES: &str = "n_samples";
pub const SUBFIELD_CATEGORY: &str = "category";
pub const SUBFIELD_DESCRIPTION: &str = "description";
pub const SUBFIELD_PRUNE: &str = "prune";

/// A bare field value as it arrives from a record source.
///
/// Numbers are stored as `f64`; `5` and `5.0` are the same value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Scalar::Number(_))
    }

    /// Falsy values are `0`, `""` and `false`. Aggregation of metadata
    /// summaries excludes them from the sample count.
    pub fn is_truthy(&self) -> bool {
        match self {
            Scalar::Bool(b) => *b,
            Scalar::Number(n) => *n != 0.0,
            Scalar::Text(s) => !s.is_empty(),
        }
    }

    /// Comparison between values of the same kind. Mixed kinds are incomparable.
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Number(a), Scalar::Number(b)) => a.partial_cmp(b),
            (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting: numbers, then text, then booleans.
    pub fn total_cmp(&self, other: &Scalar) -> Ordering {
        match (self, other) {
            (Scalar::Number(a), Scalar::Number(b)) => a.total_cmp(b),
            (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
            (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Scalar::Number(_) => 0,
            Scalar::Text(_) => 1,
            Scalar::Bool(_) => 2,
        }
    }

    /// Parse a condition operand: finite numbers become `Number`, anything else stays text.
    pub fn parse_loose(s: &str) -> Self {
        match s.parse::<f64>() {
            Ok(n) if n.is_finite() => Scalar::Number(n),
            _ => Scalar::Text(s.to_string()),
        }
    }

    fn canonical_bits(n: f64) -> u64 {
        if n == 0.0 {
            0.0f64.to_bits()
        } else {
            n.to_bits()
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Number(a), Scalar::Number(b)) => {
                Self::canonical_bits(*a) == Self::canonical_bits(*b)
            }
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Scalar::Number(n) => Self::canonical_bits(*n).hash(state),
            Scalar::Text(s) => s.hash(state),
            Scalar::Bool(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Number(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Number(v as f64)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

/// Distribution class of a metadata field across a record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// One value, present in every entry.
    Same,
    /// Repeated values usable as a grouping key.
    Group,
    /// Every value distinct.
    Unique,
    /// Every value distinct and timestamp-like.
    Timestamp,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Same => write!(f, "same"),
            Category::Group => write!(f, "group"),
            Category::Unique => write!(f, "unique"),
            Category::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// A field value carrying side channels next to the value itself.
///
/// `value` is only absent on aggregated metadata summaries whose members
/// disagreed; those carry `min_value`/`max_value`/`n_samples` instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Annotated {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_samples: Option<usize>,
}

impl Annotated {
    pub fn new(value: impl Into<Scalar>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn is_pruned(&self) -> bool {
        self.prune.unwrap_or(false)
    }

    /// Read a named side channel. `value` is included.
    pub fn subfield(&self, name: &str) -> Option<Scalar> {
        match name {
            SUBFIELD_VALUE => self.value.clone(),
            SUBFIELD_MIN => self.min_value.clone(),
            SUBFIELD_MAX => self.max_value.clone(),
            SUBFIELD_SAMPLES => self.n_samples.map(|n| Scalar::Number(n as f64)),
            SUBFIELD_CATEGORY => self.category.map(|c| Scalar::Text(c.to_string())),
            SUBFIELD_DESCRIPTION => self.description.clone().map(Scalar::Text),
            SUBFIELD_PRUNE => self.prune.map(Scalar::Bool),
            _ => None,
        }
    }

    /// Names of the populated aggregation side channels.
    pub fn aggregate_subfields(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.max_value.is_some() {
            names.push(SUBFIELD_MAX);
        }
        if self.min_value.is_some() {
            names.push(SUBFIELD_MIN);
        }
        if self.n_samples.is_some() {
            names.push(SUBFIELD_SAMPLES);
        }
        names
    }
}

/// A metadata or metrics field: a bare scalar or an annotated value.
///
/// Anything else a record source hands over (file lists, nulls) is kept as
/// `Raw` and is invisible to every computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(Scalar),
    Annotated(Annotated),
    Raw(serde_json::Value),
}

impl FieldValue {
    /// The field's value, whichever form it is stored in.
    pub fn value(&self) -> Option<&Scalar> {
        match self {
            FieldValue::Scalar(s) => Some(s),
            FieldValue::Annotated(a) => a.value.as_ref(),
            FieldValue::Raw(_) => None,
        }
    }

    pub fn as_annotated(&self) -> Option<&Annotated> {
        match self {
            FieldValue::Annotated(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_annotated_mut(&mut self) -> Option<&mut Annotated> {
        match self {
            FieldValue::Annotated(a) => Some(a),
            _ => None,
        }
    }

    pub fn category(&self) -> Option<Category> {
        self.as_annotated().and_then(|a| a.category)
    }

    pub fn is_pruned(&self) -> bool {
        self.as_annotated().is_some_and(Annotated::is_pruned)
    }

    /// Promote to the annotated form in place and return it.
    pub fn promote(&mut self) -> &mut Annotated {
        if !matches!(self, FieldValue::Annotated(_)) {
            *self = FieldValue::Annotated(self.to_annotated());
        }
        match self {
            FieldValue::Annotated(a) => a,
            _ => unreachable!("promoted above"),
        }
    }

    /// Owned annotated copy of this value.
    pub fn to_annotated(&self) -> Annotated {
        match self {
            FieldValue::Scalar(s) => Annotated {
                value: Some(s.clone()),
                ..Default::default()
            },
            FieldValue::Annotated(a) => a.clone(),
            FieldValue::Raw(_) => Annotated::default(),
        }
    }

    /// Demote an annotated value with nothing but `value` back to a bare scalar.
    pub fn flatten(self) -> Self {
        match self {
            FieldValue::Annotated(Annotated {
                value: Some(v),
                category: None,
                description: None,
                prune: None,
                min_value: None,
                max_value: None,
                n_samples: None,
            }) => FieldValue::Scalar(v),
            other => other,
        }
    }

    /// Clear the `prune` and `category` channels.
    pub fn strip_annotations(&mut self) {
        if let FieldValue::Annotated(a) = self {
            a.prune = None;
            a.category = None;
        }
    }
}

impl From<Scalar> for FieldValue {
    fn from(v: Scalar) -> Self {
        FieldValue::Scalar(v)
    }
}

impl From<Annotated> for FieldValue {
    fn from(v: Annotated) -> Self {
        FieldValue::Annotated(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Scalar(Scalar::Number(v))
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Scalar(Scalar::Text(v.to_string()))
    }
}

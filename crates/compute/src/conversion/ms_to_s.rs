use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use canon_core::{Entry, FieldValue, Fields, Result, Scalar};

use super::Conversion;

/// Converts millisecond metrics to seconds.
///
/// A metric qualifies when the last segment of its name contains an `ms`
/// token delimited by `_`, `/` or the string edges (`latency_ms`, `ms_total`).
/// The token is renamed to `s`, numeric values are divided by 1000 and unit
/// words in the description are rewritten.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsToSConversion;

impl Conversion for MsToSConversion {
    fn name(&self) -> &str {
        "ms_to_s"
    }

    fn convert(&self, mut entries: Vec<Entry>) -> Result<Vec<Entry>> {
        for entry in &mut entries {
            let metrics = std::mem::take(&mut entry.metrics);
            entry.metrics = convert_metrics(metrics);
        }
        Ok(entries)
    }
}

fn convert_metrics(metrics: Fields) -> Fields {
    let mut out = Fields::with_capacity(metrics.len());
    for (key, mut field) in metrics {
        let renamed = rename_key(&key);
        if renamed != key && to_seconds(&mut field) {
            debug!(from = %key, to = %renamed, "converted ms metric");
            out.insert(renamed, field);
        } else {
            out.insert(key, field);
        }
    }
    out
}

fn rename_key(key: &str) -> String {
    match key.rsplit_once('/') {
        Some((parent, last)) => format!("{parent}/{}", substitute_token(last, "ms", "s")),
        None => substitute_token(key, "ms", "s"),
    }
}

/// Scale a numeric field to seconds. Non-numeric fields are left untouched.
fn to_seconds(field: &mut FieldValue) -> bool {
    match field {
        FieldValue::Scalar(Scalar::Number(n)) => {
            *n /= 1000.0;
            true
        }
        FieldValue::Annotated(a) if a.value.as_ref().is_some_and(Scalar::is_number) => {
            for slot in [&mut a.value, &mut a.min_value, &mut a.max_value] {
                if let Some(Scalar::Number(n)) = slot {
                    *n /= 1000.0;
                }
            }
            if let Some(description) = a.description.as_mut() {
                *description = rewrite_description(description);
            }
            true
        }
        _ => false,
    }
}

/// Replace `old` where it forms a whole token between `_`/`/` delimiters.
pub fn substitute_token(text: &str, old: &str, new: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut token_start = 0;
    for (i, c) in text.char_indices() {
        if c == '_' || c == '/' {
            push_token(&mut out, &text[token_start..i], old, new);
            out.push(c);
            token_start = i + c.len_utf8();
        }
    }
    push_token(&mut out, &text[token_start..], old, new);
    out
}

fn push_token(out: &mut String, token: &str, old: &str, new: &str) {
    out.push_str(if token == old { new } else { token });
}

fn unit_words() -> &'static [(Regex, &'static str)] {
    static WORDS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    WORDS.get_or_init(|| {
        [
            (r"\bms\b", "s"),
            (r"\bmilliseconds\b", "seconds"),
            (r"\bMilliseconds\b", "Seconds"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

fn rewrite_description(description: &str) -> String {
    let mut text = description.to_string();
    for (re, replacement) in unit_words() {
        text = re.replace_all(&text, *replacement).into_owned();
    }
    substitute_token(&text, "ms", "s")
}

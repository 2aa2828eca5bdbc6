use canon_core::{Entry, FieldValue, Result, Scalar};

use super::Conversion;

/// Rounds numeric metric values (and their min/max) to a fixed precision.
#[derive(Debug, Clone, Copy)]
pub struct RoundConversion {
    precision: u32,
}

impl RoundConversion {
    pub fn new(precision: u32) -> Self {
        Self { precision }
    }
}

impl Conversion for RoundConversion {
    fn name(&self) -> &str {
        "round"
    }

    fn convert(&self, mut entries: Vec<Entry>) -> Result<Vec<Entry>> {
        for entry in &mut entries {
            for field in entry.metrics.values_mut() {
                match field {
                    FieldValue::Scalar(Scalar::Number(n)) => *n = round_to(*n, self.precision),
                    FieldValue::Annotated(a) => {
                        for slot in [&mut a.value, &mut a.min_value, &mut a.max_value] {
                            if let Some(Scalar::Number(n)) = slot {
                                *n = round_to(*n, self.precision);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(entries)
    }
}

/// Round half away from zero to `precision` decimal places.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    let rounded = (value * factor).round() / factor;
    if rounded.is_finite() {
        rounded
    } else {
        value
    }
}

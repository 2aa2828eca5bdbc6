pub mod condition;
pub mod config;
pub mod entry;
pub mod error;
pub mod field;

pub use condition::{parse_condition_list, parse_conditions, Condition, ConditionValues, Operator};
pub use config::EngineConfig;
pub use entry::{Entry, Fields, FILES_FIELD};
pub use error::*;
pub use field::{Annotated, Category, FieldValue, Scalar};

//! Status flag diffing between the previous and current property state.

use log::warn;
use serde_json::Value;

use super::ChangeCategory;
use crate::entity::StatusFlag;

/// Reads a persisted value as a boolean flag. Absent and null read as `false`;
/// strings read as `true` only when they spell `true`. SQLite hands booleans
/// back as integers, so `1` reads as `true`.
pub(crate) fn flag_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(_) => false,
    }
}

/// Returns the category `flag`'s transition routes into, if the flag changed.
///
/// Only the first property named `property` is considered. A missing state
/// array reads as all-false. An index past the end of a present array is
/// malformed input and yields no transition.
pub(crate) fn flag_transition(
    flag: StatusFlag,
    property: &str,
    property_names: &[&str],
    current: Option<&[Value]>,
    previous: Option<&[Value]>,
) -> Option<ChangeCategory> {
    let index = property_names.iter().position(|name| *name == property)?;

    let previous_value = read_flag(previous, index, property)?;
    let current_value = read_flag(current, index, property)?;
    if previous_value == current_value {
        return None;
    }

    let category = match (flag, previous_value) {
        (StatusFlag::Retired, false) => ChangeCategory::Retired,
        (StatusFlag::Retired, true) => ChangeCategory::Unretired,
        (StatusFlag::Voided, false) => ChangeCategory::Voided,
        (StatusFlag::Voided, true) => ChangeCategory::Unvoided,
    };
    Some(category)
}

fn read_flag(state: Option<&[Value]>, index: usize, property: &str) -> Option<bool> {
    match state {
        None => Some(false),
        Some(values) => match values.get(index) {
            Some(value) => Some(flag_value(Some(value))),
            None => {
                warn!(
                    "State array has {} value(s) but '{}' is at index {}; ignoring flag",
                    values.len(),
                    property,
                    index
                );
                None
            }
        },
    }
}

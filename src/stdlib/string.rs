use std::cmp::Ordering;

use super::{number, text};
use crate::value::{NativeError, NativeFn, Value, ValueType};
use crate::vm::Vm;

const STR: ValueType = ValueType::Str;

/// Positions and lengths count characters, not bytes.
pub(super) fn register(vm: &mut Vm) -> Result<(), NativeError> {
    vm.register_native(
        "compare",
        &[STR, STR],
        NativeFn::binary(|a, b| {
            let ordering = match text(a)?.cmp(text(b)?) {
                Ordering::Less => -1.0,
                Ordering::Equal => 0.0,
                Ordering::Greater => 1.0,
            };
            Ok(Value::Number(ordering))
        }),
    )?;
    vm.register_native(
        "contains",
        &[STR, STR],
        NativeFn::binary(|a, b| Ok(Value::Bool(text(a)?.contains(text(b)?)))),
    )?;
    vm.register_native(
        "endsWith",
        &[STR, STR],
        NativeFn::binary(|a, b| Ok(Value::Bool(text(a)?.ends_with(text(b)?)))),
    )?;
    vm.register_native(
        "startsWith",
        &[STR, STR],
        NativeFn::binary(|a, b| Ok(Value::Bool(text(a)?.starts_with(text(b)?)))),
    )?;
    vm.register_native(
        "indexOf",
        &[STR, STR],
        NativeFn::binary(|a, b| {
            let haystack = text(a)?;
            let index = haystack
                .find(text(b)?)
                .map_or(-1.0, |byte| haystack[..byte].chars().count() as f64);
            Ok(Value::Number(index))
        }),
    )?;
    vm.register_native(
        "length",
        &[STR],
        NativeFn::unary(|s| Ok(Value::Number(text(s)?.chars().count() as f64))),
    )?;
    vm.register_native(
        "replace",
        &[STR, STR, STR],
        NativeFn::ternary(|s, from, to| {
            let from = text(from)?;
            if from.is_empty() {
                return Err(NativeError::failed("String to replace cannot be empty."));
            }
            Ok(Value::str(&text(s)?.replace(from, text(to)?)))
        }),
    )?;
    vm.register_native(
        "substring",
        &[STR, ValueType::Num, ValueType::Num],
        NativeFn::ternary(|s, start, length| {
            substring(text(s)?, number(start)?, number(length)?).map(|sub| Value::str(&sub))
        }),
    )?;
    vm.register_native("toLower", &[STR], NativeFn::unary(|s| Ok(Value::str(&text(s)?.to_lowercase()))))?;
    vm.register_native("toUpper", &[STR], NativeFn::unary(|s| Ok(Value::str(&text(s)?.to_uppercase()))))?;
    vm.register_native("trim", &[STR], NativeFn::unary(|s| Ok(Value::str(text(s)?.trim()))))?;
    Ok(())
}

fn substring(s: &str, start: f64, length: f64) -> Result<String, NativeError> {
    let total = s.chars().count();
    let in_range = start >= 0.0 && length >= 0.0 && start + length <= total as f64;
    if !in_range {
        return Err(NativeError::failed(format!(
            "Substring of length {length} at {start} is outside a string of length {total}."
        )));
    }
    Ok(s.chars().skip(start as usize).take(length as usize).collect())
}

use std::io::{self, BufRead};

use super::{number, text};
use crate::value::{NativeError, NativeFn, Value, ValueType};
use crate::vm::Vm;

const NOT_NUMERIC: &str = "Value does not represent a numeric value.";

pub(super) fn register(vm: &mut Vm) -> Result<(), NativeError> {
    let started = vm.started();
    vm.register_native(
        "clock",
        &[],
        NativeFn::nullary(move || Ok(Value::Number(started.elapsed().as_secs_f64()))),
    )?;

    vm.register_native("input", &[], NativeFn::nullary(read_line))?;

    vm.register_native(
        "number",
        &[ValueType::Str],
        NativeFn::unary(|v| {
            let parsed = text(v)?.trim().parse::<f64>().map_err(|_| NativeError::failed(NOT_NUMERIC))?;
            Ok(Value::Number(parsed))
        }),
    )?;
    vm.register_native("number", &[ValueType::Num], NativeFn::unary(|v| Ok(Value::Number(number(v)?))))?;
    vm.register_native(
        "number",
        &[ValueType::Bool],
        NativeFn::unary(|v| Ok(Value::Number(if v.is_falsey() { 0.0 } else { 1.0 }))),
    )?;

    let out = vm.output();
    vm.register_native(
        "printf",
        &[ValueType::Str, ValueType::Num],
        NativeFn::binary(move |format, arg| {
            let rendered = text(format)?.replace("{0}", &arg.to_string());
            write!(out.borrow_mut(), "{rendered}").map_err(io_failure)?;
            Ok(Value::Nil)
        }),
    )?;

    let out = vm.output();
    vm.register_native(
        "println",
        &[],
        NativeFn::nullary(move || {
            writeln!(out.borrow_mut()).map_err(io_failure)?;
            Ok(Value::Nil)
        }),
    )?;
    for ty in [ValueType::Bool, ValueType::Num, ValueType::Str] {
        let out = vm.output();
        vm.register_native(
            "println",
            &[ty],
            NativeFn::unary(move |v| {
                writeln!(out.borrow_mut(), "{v}").map_err(io_failure)?;
                Ok(Value::Nil)
            }),
        )?;
    }
    Ok(())
}

/// One line from stdin without its terminator. End of input reads as "".
fn read_line() -> Result<Value, NativeError> {
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).map_err(io_failure)?;
    let trimmed = line.trim_end_matches(['\n', '\r']);
    Ok(Value::str(trimmed))
}

fn io_failure(e: io::Error) -> NativeError {
    NativeError::failed(e.to_string())
}

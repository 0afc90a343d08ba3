use super::number;
use crate::value::{NativeError, NativeFn, Value, ValueType};
use crate::vm::Vm;

const NUM: ValueType = ValueType::Num;

fn unary(vm: &mut Vm, name: &str, f: fn(f64) -> f64) -> Result<(), NativeError> {
    vm.register_native(name, &[NUM], NativeFn::unary(move |x| Ok(Value::Number(f(number(x)?)))))
}

fn binary(vm: &mut Vm, name: &str, f: fn(f64, f64) -> f64) -> Result<(), NativeError> {
    vm.register_native(
        name,
        &[NUM, NUM],
        NativeFn::binary(move |a, b| Ok(Value::Number(f(number(a)?, number(b)?)))),
    )
}

// Trigonometry works in degrees.
fn sin(x: f64) -> f64 {
    x.to_radians().sin()
}

fn cos(x: f64) -> f64 {
    x.to_radians().cos()
}

fn tan(x: f64) -> f64 {
    x.to_radians().tan()
}

pub(super) fn register(vm: &mut Vm) -> Result<(), NativeError> {
    unary(vm, "floor", f64::floor)?;
    unary(vm, "ceil", f64::ceil)?;
    // Midpoints go to the even neighbour: round(2.5) == 2.
    unary(vm, "round", f64::round_ties_even)?;
    unary(vm, "trunc", f64::trunc)?;
    unary(vm, "abs", f64::abs)?;
    unary(vm, "sqrt", f64::sqrt)?;
    unary(vm, "cbrt", f64::cbrt)?;
    unary(vm, "exp", f64::exp)?;
    binary(vm, "pow", f64::powf)?;
    binary(vm, "min", f64::min)?;
    binary(vm, "max", f64::max)?;
    vm.register_native(
        "min",
        &[NUM, NUM, NUM],
        NativeFn::ternary(|a, b, c| Ok(Value::Number(number(a)?.min(number(b)?).min(number(c)?)))),
    )?;

    unary(vm, "sin", sin)?;
    unary(vm, "cos", cos)?;
    unary(vm, "tan", tan)?;
    unary(vm, "cosec", |x| 1.0 / sin(x))?;
    unary(vm, "sec", |x| 1.0 / cos(x))?;
    unary(vm, "cot", |x| 1.0 / tan(x))?;
    unary(vm, "arcsin", |x| x.asin().to_degrees())?;
    unary(vm, "arccos", |x| x.acos().to_degrees())?;
    unary(vm, "arctan", |x| x.atan().to_degrees())?;
    unary(vm, "arccosec", |x| (1.0 / x).asin().to_degrees())?;
    unary(vm, "arcsec", |x| (1.0 / x).acos().to_degrees())?;
    unary(vm, "arccot", |x| (1.0 / x).atan().to_degrees())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::Library;
    use super::super::testing::{num, vm_with};
    use crate::value::Value;

    fn n(x: f64) -> Value {
        Value::Number(x)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn rounding_family() {
        let (vm, _) = vm_with(Library::Math);
        assert_eq!(num(&vm, "floor", &[n(2.7)]), 2.0);
        assert_eq!(num(&vm, "ceil", &[n(2.1)]), 3.0);
        assert_eq!(num(&vm, "round", &[n(2.5)]), 2.0);
        assert_eq!(num(&vm, "round", &[n(3.5)]), 4.0);
        assert_eq!(num(&vm, "trunc", &[n(-2.7)]), -2.0);
        assert_eq!(num(&vm, "abs", &[n(-4.0)]), 4.0);
    }

    #[test]
    fn powers_and_extremes() {
        let (vm, _) = vm_with(Library::Math);
        assert_eq!(num(&vm, "pow", &[n(2.0), n(10.0)]), 1024.0);
        assert_eq!(num(&vm, "sqrt", &[n(81.0)]), 9.0);
        assert!(close(num(&vm, "cbrt", &[n(27.0)]), 3.0));
        assert_eq!(num(&vm, "min", &[n(3.0), n(1.0)]), 1.0);
        assert_eq!(num(&vm, "min", &[n(3.0), n(5.0), n(-1.0)]), -1.0);
        assert_eq!(num(&vm, "max", &[n(3.0), n(5.0)]), 5.0);
    }

    #[test]
    fn trigonometry_in_degrees() {
        let (vm, _) = vm_with(Library::Math);
        assert!(close(num(&vm, "sin", &[n(90.0)]), 1.0));
        assert!(close(num(&vm, "cos", &[n(180.0)]), -1.0));
        assert!(close(num(&vm, "tan", &[n(45.0)]), 1.0));
        assert!(close(num(&vm, "cosec", &[n(30.0)]), 2.0));
        assert!(close(num(&vm, "arcsin", &[n(1.0)]), 90.0));
        assert!(close(num(&vm, "arccot", &[n(1.0)]), 45.0));
    }
}

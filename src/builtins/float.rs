//! `float`: IEEE-754 double precision, delegating comparison semantics
//! (including `NaN != NaN`) directly to Rust's `f64` ordering.

use crate::cell::Cell;
use crate::error::{CoreResult, RaisedExc};
use crate::intern::MagicName;
use crate::vm::Vm;

fn this(args: &[Cell]) -> f64 {
    args[0].as_float_like().unwrap_or(0.0)
}

fn other(args: &[Cell]) -> Option<f64> {
    args.get(1).and_then(|c| c.as_float_like())
}

fn float_add(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    other(args).map_or(Ok(vm.registers().not_implemented), |b| Ok(vm.new_float(this(args) + b)))
}

fn float_sub(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    other(args).map_or(Ok(vm.registers().not_implemented), |b| Ok(vm.new_float(this(args) - b)))
}

fn float_rsub(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    other(args).map_or(Ok(vm.registers().not_implemented), |b| Ok(vm.new_float(b - this(args))))
}

fn float_mul(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    other(args).map_or(Ok(vm.registers().not_implemented), |b| Ok(vm.new_float(this(args) * b)))
}

fn float_truediv(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(b) = other(args) else {
        return Ok(vm.registers().not_implemented);
    };
    if b == 0.0 {
        return Err(RaisedExc::zero_division("float division by zero").into());
    }
    Ok(vm.new_float(this(args) / b))
}

fn float_rtruediv(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(b) = other(args) else {
        return Ok(vm.registers().not_implemented);
    };
    let a = this(args);
    if a == 0.0 {
        return Err(RaisedExc::zero_division("float division by zero").into());
    }
    Ok(vm.new_float(b / a))
}

fn float_floordiv(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(b) = other(args) else {
        return Ok(vm.registers().not_implemented);
    };
    if b == 0.0 {
        return Err(RaisedExc::zero_division("float floor division by zero").into());
    }
    Ok(vm.new_float((this(args) / b).floor()))
}

fn float_mod(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(b) = other(args) else {
        return Ok(vm.registers().not_implemented);
    };
    if b == 0.0 {
        return Err(RaisedExc::zero_division("float modulo").into());
    }
    let a = this(args);
    let r = a % b;
    let r = if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r };
    Ok(vm.new_float(r))
}

fn float_pow(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    other(args).map_or(Ok(vm.registers().not_implemented), |b| Ok(vm.new_float(this(args).powf(b))))
}

fn float_rpow(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    other(args).map_or(Ok(vm.registers().not_implemented), |b| Ok(vm.new_float(b.powf(this(args)))))
}

fn float_neg(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_float(-this(args)))
}

fn float_pos(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_float(this(args)))
}

fn float_eq(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    other(args).map_or(Ok(vm.registers().not_implemented), |b| Ok(vm.new_bool(this(args) == b)))
}

fn float_lt(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    other(args).map_or(Ok(vm.registers().not_implemented), |b| Ok(vm.new_bool(this(args) < b)))
}

fn float_le(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    other(args).map_or(Ok(vm.registers().not_implemented), |b| Ok(vm.new_bool(this(args) <= b)))
}

/// Hashes a float so that integer-valued floats collide with the equal
/// `int` (spec §4.7, §8): an integral float in `i64` range hashes as that
/// integer, matching `int_hash`. Non-integral (or out-of-range) floats fall
/// back to hashing the bit pattern, with NaN and the two zeros normalized
/// first so that `hash(0.0) == hash(-0.0)` and every NaN hashes identically.
fn float_hash(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let f = this(args);
    #[allow(clippy::cast_precision_loss)]
    if f.is_finite() && f == f.trunc() && f >= i64::MIN as f64 && f < 9_223_372_036_854_775_808.0_f64 {
        #[allow(clippy::cast_possible_truncation)]
        return Ok(vm.new_int(f as i64));
    }
    let normalized = if f.is_nan() { f64::NAN } else if f == 0.0 { 0.0 } else { f };
    Ok(vm.new_int(i64::from_ne_bytes(normalized.to_ne_bytes())))
}

fn float_bool(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_bool(this(args) != 0.0))
}

fn float_repr(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let f = this(args);
    let text = if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f == f.trunc() && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    };
    super::strtype::new_str(vm, text)
}

/// Installs `float`'s magic methods into the type registry.
///
/// # Errors
/// Infallible in practice; returns `CoreResult` for symmetry with other
/// installers.
pub fn install(vm: &mut Vm) -> CoreResult<()> {
    let ty = vm.types.builtins.float;
    let nativefunc_ty = vm.types.builtins.nativefunc;
    let mut set = |m: MagicName, f: crate::cell::NativeFn| {
        vm.types.get_mut(ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
    };
    set(MagicName::__add__, float_add);
    set(MagicName::__radd__, float_add);
    set(MagicName::__sub__, float_sub);
    set(MagicName::__rsub__, float_rsub);
    set(MagicName::__mul__, float_mul);
    set(MagicName::__rmul__, float_mul);
    set(MagicName::__truediv__, float_truediv);
    set(MagicName::__rtruediv__, float_rtruediv);
    set(MagicName::__floordiv__, float_floordiv);
    set(MagicName::__mod__, float_mod);
    set(MagicName::__pow__, float_pow);
    set(MagicName::__rpow__, float_rpow);
    set(MagicName::__neg__, float_neg);
    set(MagicName::__pos__, float_pos);
    set(MagicName::__eq__, float_eq);
    set(MagicName::__lt__, float_lt);
    set(MagicName::__le__, float_le);
    set(MagicName::__hash__, float_hash);
    set(MagicName::__bool__, float_bool);
    set(MagicName::__repr__, float_repr);
    set(MagicName::__str__, float_repr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch;
    use crate::vm::Vm;

    fn setup() -> Vm {
        let mut vm = Vm::new(Config::default()).unwrap();
        crate::builtins::install(&mut vm).unwrap();
        vm
    }

    #[test]
    fn nan_is_never_equal_to_itself() {
        let mut vm = setup();
        let nan = vm.new_float(f64::NAN);
        assert!(!dispatch::equal(&mut vm, nan, nan).unwrap());
    }

    #[test]
    fn division_by_zero_raises() {
        let mut vm = setup();
        let a = vm.new_float(1.0);
        let zero = vm.new_float(0.0);
        let err = dispatch::binaryop(&mut vm, MagicName::__truediv__, a, zero).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn mixed_float_int_comparison_coerces() {
        let mut vm = setup();
        let a = vm.new_float(2.0);
        let b = vm.new_int(2);
        assert!(dispatch::equal(&mut vm, a, b).unwrap());
    }

    #[test]
    fn integral_float_hashes_the_same_as_the_equal_int() {
        let mut vm = setup();
        let f = vm.new_float(3.0);
        let i = vm.new_int(3);
        assert!(dispatch::equal(&mut vm, f, i).unwrap());
        assert_eq!(dispatch::hash(&mut vm, f).unwrap(), dispatch::hash(&mut vm, i).unwrap());
    }

    #[test]
    fn non_integral_float_hash_is_not_its_truncation() {
        let mut vm = setup();
        let f = vm.new_float(3.5);
        let i = vm.new_int(3);
        assert_ne!(dispatch::hash(&mut vm, f).unwrap(), dispatch::hash(&mut vm, i).unwrap());
    }
}

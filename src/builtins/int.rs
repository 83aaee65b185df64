//! `int`: 64-bit wrapping signed integers (Open Question resolution:
//! fixed-width wrapping rather than arbitrary precision — see `DESIGN.md`).
//! Mixed `int`/`float` operations coerce to `float` and return
//! `NotImplemented` only when the other operand is neither.

use num_integer::Integer;

use crate::cell::Cell;
use crate::error::{CoreResult, RaisedExc};
use crate::intern::MagicName;
use crate::vm::Vm;

fn this(args: &[Cell]) -> i64 {
    args[0].as_int_like().unwrap_or(0)
}

fn other_int(args: &[Cell]) -> Option<i64> {
    args.get(1).and_then(|c| c.as_int_like())
}

fn other_float(args: &[Cell]) -> Option<f64> {
    args.get(1).and_then(|c| c.as_float_like())
}

fn int_add(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let a = this(args);
    if let Some(b) = other_int(args) {
        return Ok(vm.new_int(a.wrapping_add(b)));
    }
    if let Some(f) = other_float(args) {
        #[allow(clippy::cast_precision_loss)]
        return Ok(vm.new_float(a as f64 + f));
    }
    Ok(vm.registers().not_implemented)
}

fn int_sub(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let a = this(args);
    if let Some(b) = other_int(args) {
        return Ok(vm.new_int(a.wrapping_sub(b)));
    }
    if let Some(f) = other_float(args) {
        #[allow(clippy::cast_precision_loss)]
        return Ok(vm.new_float(a as f64 - f));
    }
    Ok(vm.registers().not_implemented)
}

fn int_rsub(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let a = this(args);
    if let Some(b) = other_int(args) {
        return Ok(vm.new_int(b.wrapping_sub(a)));
    }
    if let Some(f) = other_float(args) {
        #[allow(clippy::cast_precision_loss)]
        return Ok(vm.new_float(f - a as f64));
    }
    Ok(vm.registers().not_implemented)
}

fn int_mul(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let a = this(args);
    if let Some(b) = other_int(args) {
        return Ok(vm.new_int(a.wrapping_mul(b)));
    }
    if let Some(f) = other_float(args) {
        #[allow(clippy::cast_precision_loss)]
        return Ok(vm.new_float(a as f64 * f));
    }
    Ok(vm.registers().not_implemented)
}

fn int_truediv(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let a = this(args);
    let Some(b) = other_float(args) else {
        return Ok(vm.registers().not_implemented);
    };
    if b == 0.0 {
        return Err(RaisedExc::zero_division("division by zero").into());
    }
    #[allow(clippy::cast_precision_loss)]
    Ok(vm.new_float(a as f64 / b))
}

fn int_rtruediv(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let a = this(args);
    let Some(b) = other_float(args) else {
        return Ok(vm.registers().not_implemented);
    };
    #[allow(clippy::cast_precision_loss)]
    let a = a as f64;
    if a == 0.0 {
        return Err(RaisedExc::zero_division("division by zero").into());
    }
    Ok(vm.new_float(b / a))
}

fn int_floordiv(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let a = this(args);
    let Some(b) = other_int(args) else {
        return Ok(vm.registers().not_implemented);
    };
    if b == 0 {
        return Err(RaisedExc::zero_division("integer division or modulo by zero").into());
    }
    Ok(vm.new_int(a.div_floor(&b)))
}

fn int_rfloordiv(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let a = this(args);
    let Some(b) = other_int(args) else {
        return Ok(vm.registers().not_implemented);
    };
    if a == 0 {
        return Err(RaisedExc::zero_division("integer division or modulo by zero").into());
    }
    Ok(vm.new_int(b.div_floor(&a)))
}

fn int_mod(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let a = this(args);
    let Some(b) = other_int(args) else {
        return Ok(vm.registers().not_implemented);
    };
    if b == 0 {
        return Err(RaisedExc::zero_division("integer division or modulo by zero").into());
    }
    Ok(vm.new_int(a.mod_floor(&b)))
}

fn int_rmod(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let a = this(args);
    let Some(b) = other_int(args) else {
        return Ok(vm.registers().not_implemented);
    };
    if a == 0 {
        return Err(RaisedExc::zero_division("integer division or modulo by zero").into());
    }
    Ok(vm.new_int(b.mod_floor(&a)))
}

fn pow_i64(base: i64, exp: i64) -> Option<i64> {
    let exp = u32::try_from(exp).ok()?;
    Some(base.wrapping_pow(exp))
}

fn int_pow(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let a = this(args);
    let Some(b) = other_int(args) else {
        return Ok(vm.registers().not_implemented);
    };
    if let Some(result) = pow_i64(a, b) {
        return Ok(vm.new_int(result));
    }
    #[allow(clippy::cast_precision_loss)]
    let base = a as f64;
    #[allow(clippy::cast_precision_loss)]
    Ok(vm.new_float(base.powf(b as f64)))
}

fn int_rpow(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let a = this(args);
    let Some(b) = other_int(args) else {
        return Ok(vm.registers().not_implemented);
    };
    if let Some(result) = pow_i64(b, a) {
        return Ok(vm.new_int(result));
    }
    #[allow(clippy::cast_precision_loss)]
    let base = b as f64;
    #[allow(clippy::cast_precision_loss)]
    Ok(vm.new_float(base.powf(a as f64)))
}

fn int_neg(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_int(this(args).wrapping_neg()))
}

fn int_pos(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_int(this(args)))
}

fn int_invert(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_int(!this(args)))
}

fn int_and(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(b) = other_int(args) else {
        return Ok(vm.registers().not_implemented);
    };
    Ok(vm.new_int(this(args) & b))
}

fn int_or(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(b) = other_int(args) else {
        return Ok(vm.registers().not_implemented);
    };
    Ok(vm.new_int(this(args) | b))
}

fn int_xor(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(b) = other_int(args) else {
        return Ok(vm.registers().not_implemented);
    };
    Ok(vm.new_int(this(args) ^ b))
}

fn int_lshift(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(b) = other_int(args) else {
        return Ok(vm.registers().not_implemented);
    };
    if b < 0 {
        return Err(RaisedExc::value_error("negative shift count").into());
    }
    Ok(vm.new_int(this(args).wrapping_shl(u32::try_from(b).unwrap_or(u32::MAX))))
}

fn int_rshift(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let Some(b) = other_int(args) else {
        return Ok(vm.registers().not_implemented);
    };
    if b < 0 {
        return Err(RaisedExc::value_error("negative shift count").into());
    }
    Ok(vm.new_int(this(args).wrapping_shr(u32::try_from(b).unwrap_or(u32::MAX))))
}

fn int_eq(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let result = match other_int(args) {
        Some(b) => this(args) == b,
        None => match other_float(args) {
            #[allow(clippy::cast_precision_loss)]
            Some(f) => (this(args) as f64) == f,
            None => return Ok(vm.registers().not_implemented),
        },
    };
    Ok(vm.new_bool(result))
}

fn int_lt(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let result = match other_int(args) {
        Some(b) => this(args) < b,
        None => match other_float(args) {
            #[allow(clippy::cast_precision_loss)]
            Some(f) => (this(args) as f64) < f,
            None => return Ok(vm.registers().not_implemented),
        },
    };
    Ok(vm.new_bool(result))
}

fn int_le(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    let result = match other_int(args) {
        Some(b) => this(args) <= b,
        None => match other_float(args) {
            #[allow(clippy::cast_precision_loss)]
            Some(f) => (this(args) as f64) <= f,
            None => return Ok(vm.registers().not_implemented),
        },
    };
    Ok(vm.new_bool(result))
}

fn int_hash(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_int(this(args)))
}

fn int_bool(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    Ok(vm.new_bool(this(args) != 0))
}

fn int_repr(vm: &mut Vm, args: &[Cell]) -> CoreResult<Cell> {
    super::strtype::new_str(vm, this(args).to_string())
}

/// Installs `int`'s magic methods into the type registry.
///
/// # Errors
/// Infallible in practice; returns `CoreResult` for symmetry with other
/// installers.
pub fn install(vm: &mut Vm) -> CoreResult<()> {
    let ty = vm.types.builtins.int;
    let nativefunc_ty = vm.types.builtins.nativefunc;
    let mut set = |m: MagicName, f: crate::cell::NativeFn| {
        vm.types.get_mut(ty).set_magic(m, Cell::native_fn(nativefunc_ty, f));
    };
    set(MagicName::__add__, int_add);
    set(MagicName::__radd__, int_add);
    set(MagicName::__sub__, int_sub);
    set(MagicName::__rsub__, int_rsub);
    set(MagicName::__mul__, int_mul);
    set(MagicName::__rmul__, int_mul);
    set(MagicName::__truediv__, int_truediv);
    set(MagicName::__rtruediv__, int_rtruediv);
    set(MagicName::__floordiv__, int_floordiv);
    set(MagicName::__rfloordiv__, int_rfloordiv);
    set(MagicName::__mod__, int_mod);
    set(MagicName::__rmod__, int_rmod);
    set(MagicName::__pow__, int_pow);
    set(MagicName::__rpow__, int_rpow);
    set(MagicName::__neg__, int_neg);
    set(MagicName::__pos__, int_pos);
    set(MagicName::__invert__, int_invert);
    set(MagicName::__and__, int_and);
    set(MagicName::__rand__, int_and);
    set(MagicName::__or__, int_or);
    set(MagicName::__ror__, int_or);
    set(MagicName::__xor__, int_xor);
    set(MagicName::__rxor__, int_xor);
    set(MagicName::__lshift__, int_lshift);
    set(MagicName::__rshift__, int_rshift);
    set(MagicName::__eq__, int_eq);
    set(MagicName::__lt__, int_lt);
    set(MagicName::__le__, int_le);
    set(MagicName::__hash__, int_hash);
    set(MagicName::__bool__, int_bool);
    set(MagicName::__repr__, int_repr);
    set(MagicName::__str__, int_repr);
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
    fn add_wraps_on_overflow() {
        let mut vm = setup();
        let a = vm.new_int(i64::MAX);
        let b = vm.new_int(1);
        let result = dispatch::binaryop(&mut vm, MagicName::__add__, a, b).unwrap();
        assert_eq!(result.as_int(), Some(i64::MIN));
    }

    #[test]
    fn true_plus_one_is_two() {
        let mut vm = setup();
        let truthy = vm.registers().true_;
        let one = vm.new_int(1);
        let result = dispatch::binaryop(&mut vm, MagicName::__add__, truthy, one).unwrap();
        assert_eq!(result.as_int(), Some(2));
    }

    #[test]
    fn floordiv_and_mod_follow_python_sign_rules() {
        let mut vm = setup();
        let a = vm.new_int(-7);
        let b = vm.new_int(2);
        let q = dispatch::binaryop(&mut vm, MagicName::__floordiv__, a, b).unwrap();
        let r = dispatch::binaryop(&mut vm, MagicName::__mod__, a, b).unwrap();
        assert_eq!(q.as_int(), Some(-4));
        assert_eq!(r.as_int(), Some(1));
    }

    #[test]
    fn floordiv_and_mod_with_negative_divisor() {
        let mut vm = setup();
        let a = vm.new_int(7);
        let b = vm.new_int(-2);
        let q = dispatch::binaryop(&mut vm, MagicName::__floordiv__, a, b).unwrap();
        let r = dispatch::binaryop(&mut vm, MagicName::__mod__, a, b).unwrap();
        assert_eq!(q.as_int(), Some(-4));
        assert_eq!(r.as_int(), Some(-1));
    }

    #[test]
    fn division_by_zero_raises() {
        let mut vm = setup();
        let a = vm.new_int(1);
        let zero = vm.new_int(0);
        let err = dispatch::binaryop(&mut vm, MagicName::__floordiv__, a, zero).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn mixed_int_float_add_produces_float() {
        let mut vm = setup();
        let a = vm.new_int(1);
        let b = vm.new_float(0.5);
        let result = dispatch::binaryop(&mut vm, MagicName::__add__, a, b).unwrap();
        assert_eq!(result.as_float(), Some(1.5));
    }
}

//! Numeric operations for the virtual machine.
//!
//! Every result is checked against the 256-bit integer width before it is
//! pushed. Division truncates toward zero and the remainder takes the sign
//! of the dividend.

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;
use crate::stack_item::StackItem;
use num_bigint::{BigInt, Sign};
use num_traits::{One, Signed, ToPrimitive, Zero};

/// Registers the numeric operation handlers.
pub fn register_handlers(jump_table: &mut JumpTable) {
    jump_table.register(OpCode::SIGN, sign);
    jump_table.register(OpCode::ABS, abs);
    jump_table.register(OpCode::NEGATE, negate);
    jump_table.register(OpCode::INC, inc);
    jump_table.register(OpCode::DEC, dec);
    jump_table.register(OpCode::ADD, add);
    jump_table.register(OpCode::SUB, sub);
    jump_table.register(OpCode::MUL, mul);
    jump_table.register(OpCode::DIV, div);
    jump_table.register(OpCode::MOD, modulo);
    jump_table.register(OpCode::POW, pow);
    jump_table.register(OpCode::SQRT, sqrt);
    jump_table.register(OpCode::MODMUL, modmul);
    jump_table.register(OpCode::MODPOW, modpow);
    jump_table.register(OpCode::SHL, shl);
    jump_table.register(OpCode::SHR, shr);

    // Logical operations
    jump_table.register(OpCode::NOT, not);
    jump_table.register(OpCode::BOOLAND, booland);
    jump_table.register(OpCode::BOOLOR, boolor);
    jump_table.register(OpCode::NZ, nz);

    // Comparison operations
    jump_table.register(OpCode::NUMEQUAL, numequal);
    jump_table.register(OpCode::NUMNOTEQUAL, numnotequal);
    jump_table.register(OpCode::LT, lt);
    jump_table.register(OpCode::LE, le);
    jump_table.register(OpCode::GT, gt);
    jump_table.register(OpCode::GE, ge);
    jump_table.register(OpCode::MIN, min);
    jump_table.register(OpCode::MAX, max);
    jump_table.register(OpCode::WITHIN, within);
}

fn unary(engine: &mut ExecutionEngine, op: fn(BigInt) -> BigInt) -> VmResult<()> {
    let x = engine.pop_integer()?;
    engine.push_integer(op(x))
}

fn binary(engine: &mut ExecutionEngine, op: fn(BigInt, BigInt) -> BigInt) -> VmResult<()> {
    let x2 = engine.pop_integer()?;
    let x1 = engine.pop_integer()?;
    engine.push_integer(op(x1, x2))
}

fn compare(engine: &mut ExecutionEngine, op: fn(&BigInt, &BigInt) -> bool) -> VmResult<()> {
    let x2 = engine.pop_integer()?;
    let x1 = engine.pop_integer()?;
    engine.push(StackItem::from_bool(op(&x1, &x2)));
    Ok(())
}

/// Ordering comparisons push false when either operand is null.
fn compare_nullable(engine: &mut ExecutionEngine, op: fn(&BigInt, &BigInt) -> bool) -> VmResult<()> {
    let x2 = engine.pop()?;
    let x1 = engine.pop()?;
    let result = if x1.is_null() || x2.is_null() {
        false
    } else {
        op(&x1.get_integer()?, &x2.get_integer()?)
    };
    engine.push(StackItem::from_bool(result));
    Ok(())
}

fn pop_shift(engine: &mut ExecutionEngine) -> VmResult<u32> {
    let shift = engine.pop_integer()?.to_i64().unwrap_or(i64::MAX);
    engine.limits.assert_shift(shift)?;
    Ok(shift as u32)
}

/// Implements the SIGN operation.
fn sign(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    unary(engine, |x| x.signum())
}

/// Implements the ABS operation.
fn abs(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    unary(engine, |x| x.abs())
}

/// Implements the NEGATE operation.
fn negate(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    unary(engine, |x| -x)
}

/// Implements the INC operation.
fn inc(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    unary(engine, |x| x + 1)
}

/// Implements the DEC operation.
fn dec(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    unary(engine, |x| x - 1)
}

/// Implements the ADD operation.
fn add(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    binary(engine, |x1, x2| x1 + x2)
}

/// Implements the SUB operation.
fn sub(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    binary(engine, |x1, x2| x1 - x2)
}

/// Implements the MUL operation.
fn mul(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    binary(engine, |x1, x2| x1 * x2)
}

/// Implements the DIV operation.
fn div(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_integer()?;
    let x1 = engine.pop_integer()?;
    if x2.is_zero() {
        return Err(VmError::DivisionByZero);
    }
    engine.push_integer(x1 / x2)
}

/// Implements the MOD operation.
fn modulo(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_integer()?;
    let x1 = engine.pop_integer()?;
    if x2.is_zero() {
        return Err(VmError::DivisionByZero);
    }
    engine.push_integer(x1 % x2)
}

/// Implements the POW operation.
fn pow(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let exponent = pop_shift(engine)?;
    let value = engine.pop_integer()?;
    engine.push_integer(value.pow(exponent))
}

/// Implements the SQRT operation.
fn sqrt(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_integer()?;
    if x.is_negative() {
        return Err(VmError::arithmetic("value can not be negative"));
    }
    engine.push_integer(x.sqrt())
}

/// Implements the MODMUL operation.
fn modmul(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let modulus = engine.pop_integer()?;
    let x2 = engine.pop_integer()?;
    let x1 = engine.pop_integer()?;
    if modulus.is_zero() {
        return Err(VmError::DivisionByZero);
    }
    engine.push_integer(x1 * x2 % modulus)
}

/// Implements the MODPOW operation. An exponent of -1 computes the modular
/// inverse.
fn modpow(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let modulus = engine.pop_integer()?;
    let exponent = engine.pop_integer()?;
    let value = engine.pop_integer()?;
    let result = if exponent == -BigInt::one() {
        mod_inverse(&value, &modulus)?
    } else {
        mod_pow(&value, &exponent, &modulus)?
    };
    engine.push_integer(result)
}

/// Modular exponentiation whose result takes the sign of the base.
fn mod_pow(value: &BigInt, exponent: &BigInt, modulus: &BigInt) -> VmResult<BigInt> {
    if exponent.is_negative() {
        return Err(VmError::arithmetic("The exponent can not be negative"));
    }
    if modulus.is_zero() {
        return Err(VmError::DivisionByZero);
    }
    let magnitude = value.magnitude().modpow(exponent.magnitude(), modulus.magnitude());
    let negative = value.is_negative() && exponent.magnitude().bit(0);
    let sign = if negative { Sign::Minus } else { Sign::Plus };
    Ok(BigInt::from_biguint(sign, magnitude))
}

/// The inverse of `value` modulo `modulus`, in `[0, modulus)`.
fn mod_inverse(value: &BigInt, modulus: &BigInt) -> VmResult<BigInt> {
    if !value.is_positive() {
        return Err(VmError::arithmetic("The value must be positive"));
    }
    if modulus < &BigInt::from(2) {
        return Err(VmError::arithmetic("The modulus must be at least 2"));
    }
    let (mut r, mut new_r) = (modulus.clone(), value % modulus);
    let (mut t, mut new_t) = (BigInt::zero(), BigInt::one());
    while !new_r.is_zero() {
        let quotient = &r / &new_r;
        let next_r = &r - &quotient * &new_r;
        r = std::mem::replace(&mut new_r, next_r);
        let next_t = &t - &quotient * &new_t;
        t = std::mem::replace(&mut new_t, next_t);
    }
    if !r.is_one() {
        return Err(VmError::arithmetic("No modular inverse exists"));
    }
    Ok(((t % modulus) + modulus) % modulus)
}

/// Implements the SHL operation. A zero shift leaves the value untouched.
fn shl(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let shift = pop_shift(engine)?;
    if shift == 0 {
        return Ok(());
    }
    let x = engine.pop_integer()?;
    engine.push_integer(x << shift as usize)
}

/// Implements the SHR operation. A zero shift leaves the value untouched.
fn shr(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let shift = pop_shift(engine)?;
    if shift == 0 {
        return Ok(());
    }
    let x = engine.pop_integer()?;
    engine.push_integer(x >> shift as usize)
}

/// Implements the NOT operation.
fn not(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_bool()?;
    engine.push(StackItem::from_bool(!x));
    Ok(())
}

/// Implements the BOOLAND operation.
fn booland(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_bool()?;
    let x1 = engine.pop_bool()?;
    engine.push(StackItem::from_bool(x1 && x2));
    Ok(())
}

/// Implements the BOOLOR operation.
fn boolor(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_bool()?;
    let x1 = engine.pop_bool()?;
    engine.push(StackItem::from_bool(x1 || x2));
    Ok(())
}

/// Implements the NZ operation.
fn nz(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_integer()?;
    engine.push(StackItem::from_bool(!x.is_zero()));
    Ok(())
}

/// Implements the NUMEQUAL operation.
fn numequal(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    compare(engine, |x1, x2| x1 == x2)
}

/// Implements the NUMNOTEQUAL operation.
fn numnotequal(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    compare(engine, |x1, x2| x1 != x2)
}

/// Implements the LT operation.
fn lt(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    compare_nullable(engine, |x1, x2| x1 < x2)
}

/// Implements the LE operation.
fn le(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    compare_nullable(engine, |x1, x2| x1 <= x2)
}

/// Implements the GT operation.
fn gt(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    compare_nullable(engine, |x1, x2| x1 > x2)
}

/// Implements the GE operation.
fn ge(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    compare_nullable(engine, |x1, x2| x1 >= x2)
}

/// Implements the MIN operation.
fn min(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    binary(engine, |x1, x2| x1.min(x2))
}

/// Implements the MAX operation.
fn max(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    binary(engine, |x1, x2| x1.max(x2))
}

/// Implements the WITHIN operation: `a <= x < b`.
fn within(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let b = engine.pop_integer()?;
    let a = engine.pop_integer()?;
    let x = engine.pop_integer()?;
    engine.push(StackItem::from_bool(a <= x && x < b));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;
    use crate::script_builder::ScriptBuilder;
    use crate::vm_state::VMState;

    fn run(builder: ScriptBuilder) -> ExecutionEngine {
        let mut engine = ExecutionEngine::new();
        engine
            .load_script(Script::from(builder.to_bytes()), -1, 0)
            .unwrap();
        engine.execute();
        engine
    }

    fn eval(values: &[i64], opcode: OpCode) -> VmResult<BigInt> {
        let mut builder = ScriptBuilder::new();
        for value in values {
            builder.emit_push_int(*value);
        }
        builder.emit(opcode);
        let engine = run(builder);
        match engine.fault_exception() {
            Some(error) => Err(error.clone()),
            None => engine.result_stack().peek(0)?.get_integer(),
        }
    }

    #[test]
    fn test_division_truncates() {
        assert_eq!(eval(&[-7, 2], OpCode::DIV).unwrap(), BigInt::from(-3));
        assert_eq!(eval(&[-7, 2], OpCode::MOD).unwrap(), BigInt::from(-1));
        assert_eq!(eval(&[7, -2], OpCode::MOD).unwrap(), BigInt::from(1));
        assert_eq!(eval(&[1, 0], OpCode::DIV), Err(VmError::DivisionByZero));
    }

    #[test]
    fn test_shift() {
        assert_eq!(eval(&[1, 8], OpCode::SHL).unwrap(), BigInt::from(256));
        assert_eq!(eval(&[-9, 1], OpCode::SHR).unwrap(), BigInt::from(-5));
        assert_eq!(eval(&[5, 0], OpCode::SHL).unwrap(), BigInt::from(5));
        assert!(eval(&[1, 257], OpCode::SHL).is_err());
        assert!(eval(&[1, -1], OpCode::SHR).is_err());
    }

    #[test]
    fn test_overflow_faults() {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(1).emit_push_int(255).emit(OpCode::SHL);
        let engine = run(builder);
        assert_eq!(engine.state(), VMState::FAULT);
        assert!(matches!(engine.fault_exception(), Some(VmError::Arithmetic(_))));
    }

    #[test]
    fn test_pow_sqrt() {
        assert_eq!(eval(&[-2, 3], OpCode::POW).unwrap(), BigInt::from(-8));
        assert_eq!(eval(&[17], OpCode::SQRT).unwrap(), BigInt::from(4));
        assert!(eval(&[-1], OpCode::SQRT).is_err());
    }

    #[test]
    fn test_modular_arithmetic() {
        assert_eq!(eval(&[3, 4, 5], OpCode::MODMUL).unwrap(), BigInt::from(2));
        assert_eq!(eval(&[-2, 3, 5], OpCode::MODPOW).unwrap(), BigInt::from(-3));
        assert_eq!(eval(&[19, -1, 141], OpCode::MODPOW).unwrap(), BigInt::from(52));
        assert!(eval(&[2, -1, 4], OpCode::MODPOW).is_err());
        assert!(eval(&[2, -2, 5], OpCode::MODPOW).is_err());
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval(&[4, 3, 5], OpCode::WITHIN).unwrap(), BigInt::from(1));
        assert_eq!(eval(&[5, 3, 5], OpCode::WITHIN).unwrap(), BigInt::from(0));
        let mut builder = ScriptBuilder::new();
        builder.emit(OpCode::PUSHNULL).emit_push_int(1).emit(OpCode::LT);
        let engine = run(builder);
        assert_eq!(
            engine.result_stack().peek(0).unwrap(),
            &StackItem::from_bool(false)
        );
        assert_eq!(eval(&[4, 9], OpCode::MIN).unwrap(), BigInt::from(4));
        assert_eq!(eval(&[4, 9], OpCode::MAX).unwrap(), BigInt::from(9));
    }
}

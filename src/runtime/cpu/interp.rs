//! Plan interpreter for the host backend
//!
//! Executes launch arguments against host memory, fibre by fibre, with the
//! exact semantics of the generated device kernels: identity-seeded folds
//! for arithmetic/bitwise/logical operators, first-element seeding for the
//! max/min family, NaN propagation on float compares, zero substitution for
//! `prodnz`, and the lowest flat index on ties. Folding runs in ascending
//! flat-index order, so tie-breaking falls out of the strict comparison.

use crate::codegen::KernelSpec;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::ops::ReduceOp;
use crate::runtime::{FreeSlot, KernelArgs, ReduxSlot};

macro_rules! dispatch_dtype {
    ($dtype:expr, $T:ident => $body:block, $error_op:expr) => {
        match $dtype {
            DType::F64 => {
                type $T = f64;
                $body
            }
            DType::F32 => {
                type $T = f32;
                $body
            }
            DType::F16 => {
                #[cfg(feature = "f16")]
                {
                    type $T = half::f16;
                    $body
                }
                #[cfg(not(feature = "f16"))]
                {
                    Err(Error::bad_type($dtype, $error_op))
                }
            }
            DType::BF16 => {
                #[cfg(feature = "f16")]
                {
                    type $T = half::bf16;
                    $body
                }
                #[cfg(not(feature = "f16"))]
                {
                    Err(Error::bad_type($dtype, $error_op))
                }
            }
            DType::I64 => {
                type $T = i64;
                $body
            }
            DType::I32 => {
                type $T = i32;
                $body
            }
            DType::I16 => {
                type $T = i16;
                $body
            }
            DType::I8 => {
                type $T = i8;
                $body
            }
            DType::U64 => {
                type $T = u64;
                $body
            }
            DType::U32 => {
                type $T = u32;
                $body
            }
            DType::U16 => {
                type $T = u16;
                $body
            }
            DType::U8 | DType::Bool => {
                type $T = u8;
                $body
            }
        }
    };
}

/// Run one launch worth of work
pub(super) fn execute(spec: &KernelSpec, args: &KernelArgs) -> Result<()> {
    dispatch_dtype!(spec.src_dtype, T => { run::<T>(spec, args) }, spec.op.name())
}

fn run<T: Element>(spec: &KernelSpec, args: &KernelArgs) -> Result<()> {
    match spec.op {
        ReduceOp::Max
        | ReduceOp::Min
        | ReduceOp::Argmax
        | ReduceOp::Argmin
        | ReduceOp::MaxAndArgmax
        | ReduceOp::MinAndArgmin => run_compare::<T>(spec, args),
        ReduceOp::Sum | ReduceOp::Prod | ReduceOp::ProdNz => {
            if spec.acc_dtype == T::DTYPE {
                run_arith::<T>(spec, args);
                Ok(())
            } else {
                // 16-bit floats accumulate in f32, matching the device code.
                run_arith_widened::<T>(spec, args);
                Ok(())
            }
        }
        ReduceOp::And | ReduceOp::Or | ReduceOp::Xor => {
            run_bitwise::<T>(spec, args);
            Ok(())
        }
        ReduceOp::Any | ReduceOp::All => {
            run_logical::<T>(spec, args);
            Ok(())
        }
    }
}

#[inline]
unsafe fn read_elem<T: Element>(base: u64, off: i64) -> T {
    unsafe { std::ptr::read_unaligned(base.wrapping_add(off as u64) as *const T) }
}

#[inline]
unsafe fn write_elem<T: Element>(base: u64, off: i64, val: T) {
    unsafe { std::ptr::write_unaligned(base.wrapping_add(off as u64) as *mut T, val) }
}

/// Stream offsets for one fibre; slot 0 is the fastest digit
#[inline]
fn free_offsets(free: &[FreeSlot], fib: u64) -> (i64, i64, i64) {
    let mut rem = fib;
    let (mut soff, mut doff, mut ioff) = (0i64, 0i64, 0i64);
    for slot in free {
        let c = (rem % slot.len) as i64;
        rem /= slot.len;
        soff += c * slot.src_stride;
        doff += c * slot.dst_stride;
        ioff += c * slot.idx_stride;
    }
    (soff, doff, ioff)
}

/// Source offset of flat reduced index `r`, decomposed row-major (last slot
/// fastest) so `r` itself is the argument index of the element
#[inline]
fn redux_offset(redux: &[ReduxSlot], r: u64) -> i64 {
    let mut rem = r;
    let mut off = 0i64;
    for slot in redux.iter().rev() {
        let c = (rem % slot.len) as i64;
        rem /= slot.len;
        off += c * slot.src_stride;
    }
    off
}

fn run_compare<T: Element>(spec: &KernelSpec, args: &KernelArgs) -> Result<()> {
    let greater = spec.op.compare_greater();
    for fib in 0..args.m {
        let (soff, doff, ioff) = free_offsets(&args.free, fib);

        let mut best: T = unsafe { read_elem(args.src, soff + redux_offset(&args.redux, 0)) };
        let mut besti: u64 = 0;
        for r in 1..args.n {
            let v: T = unsafe { read_elem(args.src, soff + redux_offset(&args.redux, r)) };
            let wins = (v.is_nan() && !best.is_nan())
                || if greater { v > best } else { v < best };
            if wins {
                best = v;
                besti = r;
            }
        }

        if spec.op.writes_value() {
            unsafe { write_elem(args.dst, doff, best) };
        }
        if let Some(idx_dtype) = spec.idx_dtype {
            write_index(args.idx, ioff, besti, idx_dtype)?;
        }
    }
    Ok(())
}

fn run_arith<T: Element>(spec: &KernelSpec, args: &KernelArgs) {
    for fib in 0..args.m {
        let (soff, doff, _) = free_offsets(&args.free, fib);

        let mut acc: T = match spec.op {
            ReduceOp::Sum => T::zero(),
            _ => T::one(),
        };
        for r in 0..args.n {
            let mut v: T = unsafe { read_elem(args.src, soff + redux_offset(&args.redux, r)) };
            acc = match spec.op {
                ReduceOp::Sum => acc.add(v),
                ReduceOp::Prod => acc.mul(v),
                _ => {
                    if v.is_zero() {
                        v = T::one();
                    }
                    acc.mul(v)
                }
            };
        }
        unsafe { write_elem(args.dst, doff, acc) };
    }
}

fn run_arith_widened<T: Element>(spec: &KernelSpec, args: &KernelArgs) {
    for fib in 0..args.m {
        let (soff, doff, _) = free_offsets(&args.free, fib);

        let mut acc: f32 = match spec.op {
            ReduceOp::Sum => 0.0,
            _ => 1.0,
        };
        for r in 0..args.n {
            let mut v = unsafe { read_elem::<T>(args.src, soff + redux_offset(&args.redux, r)) }
                .to_f64() as f32;
            acc = match spec.op {
                ReduceOp::Sum => acc + v,
                ReduceOp::Prod => acc * v,
                _ => {
                    if v == 0.0 {
                        v = 1.0;
                    }
                    acc * v
                }
            };
        }
        unsafe { write_elem(args.dst, doff, T::from_f64(acc as f64)) };
    }
}

fn run_bitwise<T: Element>(spec: &KernelSpec, args: &KernelArgs) {
    for fib in 0..args.m {
        let (soff, doff, _) = free_offsets(&args.free, fib);

        let mut acc: u64 = match spec.op {
            ReduceOp::And => !0u64,
            _ => 0,
        };
        for r in 0..args.n {
            let bits = unsafe { read_elem::<T>(args.src, soff + redux_offset(&args.redux, r)) }
                .to_bits();
            acc = match spec.op {
                ReduceOp::And => acc & bits,
                ReduceOp::Or => acc | bits,
                _ => acc ^ bits,
            };
        }
        unsafe { write_elem(args.dst, doff, T::from_bits(acc)) };
    }
}

fn run_logical<T: Element>(spec: &KernelSpec, args: &KernelArgs) {
    let all = matches!(spec.op, ReduceOp::All);
    for fib in 0..args.m {
        let (soff, doff, _) = free_offsets(&args.free, fib);

        let mut acc = all;
        for r in 0..args.n {
            let nonzero =
                !unsafe { read_elem::<T>(args.src, soff + redux_offset(&args.redux, r)) }
                    .is_zero();
            acc = if all { acc && nonzero } else { acc || nonzero };
        }
        let out = if acc { T::one() } else { T::zero() };
        unsafe { write_elem(args.dst, doff, out) };
    }
}

fn write_index(base: u64, off: i64, val: u64, dtype: DType) -> Result<()> {
    match dtype {
        DType::U64 => unsafe { write_elem(base, off, val) },
        DType::U32 => unsafe { write_elem(base, off, val as u32) },
        DType::I64 => unsafe { write_elem(base, off, val as i64) },
        DType::I32 => unsafe { write_elem(base, off, val as i32) },
        other => {
            return Err(Error::Internal(format!(
                "'{}' cannot hold an argument index",
                other
            )));
        }
    }
    Ok(())
}

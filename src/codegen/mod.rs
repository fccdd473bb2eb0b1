//! CUDA C source generation for reduction kernels
//!
//! One kernel is generated per *static signature*: operator, element types,
//! and slot-count bounds. Shapes, strides, and the thread split arrive as
//! launch arguments, so a single compiled binary serves every call shape
//! within its bounds: padded slots of `len=1, stride=0` collapse to nothing
//! in the iteration.
//!
//! Per fibre, the kernel runs three stages:
//! 1. each thread folds a disjoint stride of the flat reduced index range
//!    into a private accumulator,
//! 2. cooperating threads tree-reduce with warp shuffles,
//! 3. when several warps share a fibre, warp leaders stage through shared
//!    memory and the first warp repeats the shuffle tree.
//!
//! The max/min family seeds each thread's accumulator from its first
//! assigned element rather than from an identity, so destination pre-fill
//! patterns can never leak into results. On equal values the lower flat
//! index wins, which keeps argument outputs deterministic across launch
//! shapes.

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::ops::{Identity, ReduceOp};
use crate::plan::ReducePlan;
use std::fmt::Write;

/// Slot-count tiers a kernel signature can be generated for
const RANK_TIERS: [usize; 3] = [4, 8, 16];

/// Static kernel signature: everything baked into the binary
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KernelSpec {
    /// Operator
    pub op: ReduceOp,
    /// Source element type
    pub src_dtype: DType,
    /// Accumulator type (drives the cache key; the emitted accumulator is
    /// additionally widened to 64 bits for integer arithmetic)
    pub acc_dtype: DType,
    /// Index-stream type, for argument operators
    pub idx_dtype: Option<DType>,
    /// Free-slot bound
    pub max_free: usize,
    /// Reduced-slot bound
    pub max_redux: usize,
}

fn rank_bound(rank: usize) -> usize {
    // The planner rejects plans beyond the largest tier.
    RANK_TIERS
        .into_iter()
        .find(|&tier| rank <= tier)
        .unwrap_or(RANK_TIERS[RANK_TIERS.len() - 1])
}

impl KernelSpec {
    /// Derive the signature that covers a plan
    pub fn for_plan(plan: &ReducePlan) -> Self {
        Self {
            op: plan.op,
            src_dtype: plan.src_dtype,
            acc_dtype: plan.acc_dtype,
            idx_dtype: plan.idx_dtype,
            max_free: rank_bound(plan.free.len()),
            max_redux: rank_bound(plan.redux.len()),
        }
    }

    /// Entry-point name of the generated kernel
    pub fn kernel_name(&self) -> String {
        match self.idx_dtype {
            Some(idx) => format!(
                "reduce_{}_{}_{}_f{}r{}",
                self.op.name(),
                self.src_dtype.short_name(),
                idx.short_name(),
                self.max_free,
                self.max_redux
            ),
            None => format!(
                "reduce_{}_{}_f{}r{}",
                self.op.name(),
                self.src_dtype.short_name(),
                self.max_free,
                self.max_redux
            ),
        }
    }

    /// Stable cache-key string, qualified by the device architecture
    pub fn cache_key(&self, arch_tag: &str) -> String {
        format!(
            "{}|acc={}|{}",
            self.kernel_name(),
            self.acc_dtype.short_name(),
            arch_tag
        )
    }
}

/// Accumulator C type: floats stay floating, integer arithmetic is carried
/// in 64 bits (truncation at the store commutes with wrapping add/mul and
/// with the bitwise operators)
fn acc_c_type(spec: &KernelSpec) -> &'static str {
    match spec.op {
        ReduceOp::Any | ReduceOp::All => "int",
        ReduceOp::And | ReduceOp::Or | ReduceOp::Xor => "unsigned long long",
        _ => match spec.acc_dtype {
            // 16-bit floats are loaded through a float conversion, so the
            // register copy is always float.
            DType::F16 | DType::BF16 => "float",
            acc if acc.is_float() => acc.c_name(),
            acc if acc.is_signed_int() => "long long",
            _ => "unsigned long long",
        },
    }
}

/// Expression loading one source element at `src + soff + roff`, already
/// converted to the accumulator domain
fn load_expr(spec: &KernelSpec) -> String {
    let raw = format!(
        "*(const {} *)(src + soff + roff)",
        spec.src_dtype.c_name()
    );
    let val = match spec.src_dtype {
        DType::F16 => format!("__half2float({})", raw),
        DType::BF16 => format!("__bfloat162float({})", raw),
        _ => raw,
    };
    match spec.op {
        ReduceOp::Any | ReduceOp::All => format!("({} != 0)", val),
        ReduceOp::And | ReduceOp::Or | ReduceOp::Xor => {
            // Zero-extend through the unsigned same-width type so sign
            // bits do not smear across the 64-bit accumulator.
            let uns = match spec.src_dtype {
                DType::I64 => "unsigned long long",
                DType::I32 => "unsigned int",
                DType::I16 => "unsigned short",
                DType::I8 => "unsigned char",
                other => other.c_name(),
            };
            format!("(unsigned long long)({})({})", uns, val)
        }
        _ if spec.src_dtype.is_float() => val,
        _ => format!("({})({})", acc_c_type(spec), val),
    }
}

/// Identity literal in the accumulator domain
fn identity_literal(spec: &KernelSpec) -> String {
    let acc = acc_c_type(spec);
    match spec.op.identity() {
        Identity::Zero => format!("({})0", acc),
        Identity::One => format!("({})1", acc),
        Identity::AllOnes => "~0ULL".to_string(),
        Identity::FirstElement => unreachable!("compare family seeds from the first element"),
    }
}

/// Fold statement merging `v` into `acc`
fn fold_stmt(spec: &KernelSpec) -> String {
    match spec.op {
        ReduceOp::Sum => "acc = acc + v;".into(),
        ReduceOp::Prod => "acc = acc * v;".into(),
        ReduceOp::ProdNz => {
            let acc = acc_c_type(spec);
            format!("acc = acc * (v == ({})0 ? ({})1 : v);", acc, acc)
        }
        ReduceOp::And => "acc = acc & v;".into(),
        ReduceOp::Or => "acc = acc | v;".into(),
        ReduceOp::Xor => "acc = acc ^ v;".into(),
        ReduceOp::Any => "acc = acc || v;".into(),
        ReduceOp::All => "acc = acc && v;".into(),
        _ => unreachable!("compare family folds inline"),
    }
}

/// Combine statement merging a shuffled partner `ov` into `acc`
fn combine_stmt(spec: &KernelSpec) -> String {
    match spec.op {
        ReduceOp::Sum => "acc = acc + ov;".into(),
        ReduceOp::Prod | ReduceOp::ProdNz => "acc = acc * ov;".into(),
        ReduceOp::And => "acc = acc & ov;".into(),
        ReduceOp::Or => "acc = acc | ov;".into(),
        ReduceOp::Xor => "acc = acc ^ ov;".into(),
        ReduceOp::Any => "acc = acc || ov;".into(),
        ReduceOp::All => "acc = acc && ov;".into(),
        _ => unreachable!("compare family combines inline"),
    }
}

/// Comparison adopting a candidate over the incumbent, with NaN propagation
/// for floats (a NaN candidate wins unless the incumbent is already NaN)
fn wins_expr(spec: &KernelSpec, cand: &str, inc: &str) -> String {
    let cmp = if spec.op.compare_greater() { ">" } else { "<" };
    if spec.acc_dtype.is_float() || spec.src_dtype.is_float() {
        format!(
            "(({c} != {c} && {i} == {i}) || {c} {op} {i})",
            c = cand,
            i = inc,
            op = cmp
        )
    } else {
        format!("({} {} {})", cand, cmp, inc)
    }
}

/// Store statement for the value stream
fn store_value_stmt(spec: &KernelSpec, acc_var: &str) -> String {
    let dst_t = spec.src_dtype.c_name();
    let val = match spec.op {
        ReduceOp::Any | ReduceOp::All => format!("({} ? 1 : 0)", acc_var),
        _ => acc_var.to_string(),
    };
    match spec.src_dtype {
        DType::F16 => format!("*(__half *)(dst + doff) = __float2half({});", val),
        DType::BF16 => format!("*(__nv_bfloat16 *)(dst + doff) = __float2bfloat16({});", val),
        _ => format!("*({} *)(dst + doff) = ({})({});", dst_t, dst_t, val),
    }
}

/// Emit the per-slot decomposition of a flat index into stream offsets.
/// `slot 0` is the fastest digit for free slots; reduced slots decompose
/// row-major (last slot fastest) so the flat reduced index doubles as the
/// argument index.
fn emit_free_decompose(out: &mut String, spec: &KernelSpec) {
    let w = spec.op.writes_value();
    let t = spec.idx_dtype.is_some();
    for i in 0..spec.max_free {
        writeln!(out, "        c = rem % f_len{i}; rem /= f_len{i};").unwrap();
        writeln!(out, "        soff += (long long)c * f_ss{i};").unwrap();
        if w {
            writeln!(out, "        doff += (long long)c * f_ds{i};").unwrap();
        }
        if t {
            writeln!(out, "        ioff += (long long)c * f_is{i};").unwrap();
        }
    }
}

fn emit_redux_decompose(out: &mut String, spec: &KernelSpec) {
    for i in (0..spec.max_redux).rev() {
        writeln!(out, "        c = rem % r_len{i}; rem /= r_len{i};").unwrap();
        writeln!(out, "        roff += (long long)c * r_ss{i};").unwrap();
    }
}

/// Generate the complete kernel source for a signature
pub fn generate_source(spec: &KernelSpec) -> Result<String> {
    if spec.op.tracks_index() && spec.idx_dtype.is_none() {
        return Err(Error::Internal(format!(
            "kernel signature for '{}' lacks an index type",
            spec.op.name()
        )));
    }

    let name = spec.kernel_name();
    let acc = acc_c_type(spec);
    let writes_value = spec.op.writes_value();
    let tracks_index = spec.idx_dtype.is_some();
    let compare = spec.op.is_compare();

    let mut src = String::with_capacity(8 * 1024);

    writeln!(src, "// {}: runtime-shaped strided reduction", name).unwrap();
    match spec.src_dtype {
        DType::F16 => writeln!(src, "#include <cuda_fp16.h>").unwrap(),
        DType::BF16 => writeln!(src, "#include <cuda_bf16.h>").unwrap(),
        _ => {}
    }
    writeln!(src).unwrap();

    // Parameter list. The launcher pushes arguments in exactly this order.
    writeln!(src, "extern \"C\" __global__ void {}(", name).unwrap();
    write!(src, "    const char *src").unwrap();
    if writes_value {
        write!(src, ",\n    char *dst").unwrap();
    }
    if tracks_index {
        write!(src, ",\n    char *dsti").unwrap();
    }
    write!(
        src,
        ",\n    unsigned long long m,\n    unsigned long long n,\n    unsigned int tpr"
    )
    .unwrap();
    for i in 0..spec.max_free {
        write!(src, ",\n    unsigned long long f_len{i}, long long f_ss{i}").unwrap();
        if writes_value {
            write!(src, ", long long f_ds{i}").unwrap();
        }
        if tracks_index {
            write!(src, ", long long f_is{i}").unwrap();
        }
    }
    for i in 0..spec.max_redux {
        write!(src, ",\n    unsigned long long r_len{i}, long long r_ss{i}").unwrap();
    }
    writeln!(src, ")\n{{").unwrap();

    // Inter-warp scratch: one slot per warp, statically sized for blocks of
    // up to 1024 threads.
    writeln!(src, "    __shared__ {} s_val[32];", acc).unwrap();
    if tracks_index {
        writeln!(src, "    __shared__ unsigned long long s_idx[32];").unwrap();
    }
    writeln!(src).unwrap();

    writeln!(
        src,
        "    unsigned int lane = threadIdx.x % tpr;\n\
         \x20   unsigned long long fib = (unsigned long long)blockIdx.x * (blockDim.x / tpr)\n\
         \x20                          + threadIdx.x / tpr;\n\
         \x20   if (fib >= m) return;\n"
    )
    .unwrap();

    // Fixed per-fibre offsets from the free slots.
    writeln!(src, "    long long soff = 0;").unwrap();
    if writes_value {
        writeln!(src, "    long long doff = 0;").unwrap();
    }
    if tracks_index {
        writeln!(src, "    long long ioff = 0;").unwrap();
    }
    writeln!(src, "    {{").unwrap();
    writeln!(src, "        unsigned long long rem = fib;").unwrap();
    writeln!(src, "        unsigned long long c;").unwrap();
    emit_free_decompose(&mut src, spec);
    writeln!(src, "    }}").unwrap();
    writeln!(src).unwrap();

    let load = load_expr(spec);

    if compare {
        // Sequential stage, first assigned element seeding the accumulator.
        writeln!(src, "    {} best;", acc).unwrap();
        writeln!(src, "    unsigned long long besti;").unwrap();
        writeln!(src, "    unsigned long long r = lane;").unwrap();
        writeln!(src, "    {{").unwrap();
        writeln!(src, "        long long roff = 0;").unwrap();
        writeln!(src, "        unsigned long long rem = r;").unwrap();
        writeln!(src, "        unsigned long long c;").unwrap();
        emit_redux_decompose(&mut src, spec);
        writeln!(src, "        best = {};", load).unwrap();
        writeln!(src, "        besti = r;").unwrap();
        writeln!(src, "    }}").unwrap();
        writeln!(src, "    for (r += tpr; r < n; r += tpr) {{").unwrap();
        writeln!(src, "        long long roff = 0;").unwrap();
        writeln!(src, "        unsigned long long rem = r;").unwrap();
        writeln!(src, "        unsigned long long c;").unwrap();
        emit_redux_decompose(&mut src, spec);
        writeln!(src, "        {} v = {};", acc, load).unwrap();
        writeln!(
            src,
            "        if ({}) {{ best = v; besti = r; }}",
            wins_expr(spec, "v", "best")
        )
        .unwrap();
        writeln!(src, "    }}").unwrap();
    } else {
        writeln!(src, "    {} acc = {};", acc, identity_literal(spec)).unwrap();
        writeln!(src, "    for (unsigned long long r = lane; r < n; r += tpr) {{").unwrap();
        writeln!(src, "        long long roff = 0;").unwrap();
        writeln!(src, "        unsigned long long rem = r;").unwrap();
        writeln!(src, "        unsigned long long c;").unwrap();
        emit_redux_decompose(&mut src, spec);
        writeln!(src, "        {} v = {};", acc, load).unwrap();
        writeln!(src, "        {}", fold_stmt(spec)).unwrap();
        writeln!(src, "    }}").unwrap();
    }
    writeln!(src).unwrap();

    // Intra-warp tree. Ties go to the lower flat index so the result is
    // independent of the launch shape.
    let shuffle_pair = |out: &mut String, indent: &str, width: &str| {
        if compare {
            writeln!(
                out,
                "{ind}{acc} ov = __shfl_down_sync(0xffffffffu, best, off, {w});",
                ind = indent,
                acc = acc,
                w = width
            )
            .unwrap();
            if tracks_index {
                writeln!(
                    out,
                    "{ind}unsigned long long oi = __shfl_down_sync(0xffffffffu, besti, off, {w});",
                    ind = indent,
                    w = width
                )
                .unwrap();
                writeln!(
                    out,
                    "{ind}if ({wins} || (ov == best && oi < besti)) {{ best = ov; besti = oi; }}",
                    ind = indent,
                    wins = wins_expr(spec, "ov", "best")
                )
                .unwrap();
            } else {
                writeln!(
                    out,
                    "{ind}if ({wins}) {{ best = ov; }}",
                    ind = indent,
                    wins = wins_expr(spec, "ov", "best")
                )
                .unwrap();
            }
        } else {
            writeln!(
                out,
                "{ind}{acc} ov = __shfl_down_sync(0xffffffffu, acc, off, {w});",
                ind = indent,
                acc = acc,
                w = width
            )
            .unwrap();
            writeln!(out, "{ind}{}", combine_stmt(spec), ind = indent).unwrap();
        }
    };

    writeln!(src, "    unsigned int width = tpr < 32u ? tpr : 32u;").unwrap();
    writeln!(
        src,
        "    for (unsigned int off = width / 2u; off > 0u; off /= 2u) {{"
    )
    .unwrap();
    shuffle_pair(&mut src, "        ", "width");
    writeln!(src, "    }}").unwrap();
    writeln!(src).unwrap();

    // Inter-warp stage. Only reached when the whole block cooperates on one
    // fibre, so the barrier is uniform.
    let (acc_var, idx_var) = if compare {
        ("best", "besti")
    } else {
        ("acc", "besti")
    };
    writeln!(src, "    if (tpr > 32u) {{").unwrap();
    writeln!(src, "        unsigned int wid = threadIdx.x / 32u;").unwrap();
    write!(
        src,
        "        if ((threadIdx.x & 31u) == 0u) {{ s_val[wid] = {}; ",
        acc_var
    )
    .unwrap();
    if tracks_index {
        write!(src, "s_idx[wid] = {}; ", idx_var).unwrap();
    }
    writeln!(src, "}}").unwrap();
    writeln!(src, "        __syncthreads();").unwrap();
    writeln!(src, "        if (wid == 0u) {{").unwrap();
    writeln!(src, "            unsigned int nwarps = blockDim.x / 32u;").unwrap();
    if compare {
        // No identity exists for max/min; surplus lanes duplicate the first
        // warp's candidate, which the tie-break renders harmless.
        write!(
            src,
            "            if (threadIdx.x < nwarps) {{ best = s_val[threadIdx.x]; "
        )
        .unwrap();
        if tracks_index {
            write!(src, "besti = s_idx[threadIdx.x]; ").unwrap();
        }
        writeln!(src, "}}").unwrap();
        write!(src, "            else {{ best = s_val[0]; ").unwrap();
        if tracks_index {
            write!(src, "besti = s_idx[0]; ").unwrap();
        }
        writeln!(src, "}}").unwrap();
    } else {
        writeln!(
            src,
            "            acc = threadIdx.x < nwarps ? s_val[threadIdx.x] : {};",
            identity_literal(spec)
        )
        .unwrap();
    }
    writeln!(
        src,
        "            for (unsigned int off = 16u; off > 0u; off /= 2u) {{"
    )
    .unwrap();
    shuffle_pair(&mut src, "                ", "32");
    writeln!(src, "            }}").unwrap();
    writeln!(src, "        }}").unwrap();
    writeln!(src, "    }}").unwrap();
    writeln!(src).unwrap();

    // Group leader writes the results.
    writeln!(src, "    if (lane == 0u) {{").unwrap();
    if writes_value {
        writeln!(
            src,
            "        {}",
            store_value_stmt(spec, if compare { "best" } else { "acc" })
        )
        .unwrap();
    }
    if let Some(idx) = spec.idx_dtype {
        writeln!(
            src,
            "        *({} *)(dsti + ioff) = ({})besti;",
            idx.c_name(),
            idx.c_name()
        )
        .unwrap();
    }
    writeln!(src, "    }}").unwrap();
    writeln!(src, "}}").unwrap();

    Ok(src)
}

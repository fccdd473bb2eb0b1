//! Scenario tests for every reduction operator on the host backend
//!
//! Each scenario uploads PCG-generated data (seed 1), pre-fills the
//! destinations with the 0xFF sentinel, runs the engine, and checks every
//! output cell against a naive fold. Shapes follow three patterns:
//! a 3-D `[32, 50, 79]` tensor reduced over `{0, 2}`, an 8-D
//! `[1171, 373, 2, 1, 2, 1, 2, 1]` tensor reduced over `{2, 4, 7, 5}`, and
//! full reductions to a rank-0 destination.

mod common;

use common::*;
use ndreduce::dtype::DType;
use ndreduce::tensor::TensorRef;

const DIMS3: [usize; 3] = [32, 50, 79];
const DIMS8: [usize; 8] = [1171, 373, 2, 1, 2, 1, 2, 1];

fn numel(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// Linear index into the contiguous 3-D source
fn at3(i: usize, j: usize, k: usize) -> usize {
    (i * DIMS3[1] + j) * DIMS3[2] + k
}

/// Linear index into the contiguous 8-D source
#[allow(clippy::too_many_arguments)]
fn at8(i: usize, j: usize, k: usize, l: usize, m: usize, n: usize, o: usize, p: usize) -> usize {
    (((((((i * DIMS8[1] + j) * DIMS8[2] + k) * DIMS8[3] + l) * DIMS8[4] + m) * DIMS8[5] + n)
        * DIMS8[6]
        + o)
        * DIMS8[7])
        + p
}

// ===========================================================================
// max-and-argmax
// ===========================================================================

#[test]
fn test_maxandargmax_reduction() {
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);
    let max = TensorRef::contiguous(f.alloc_sentinel::<f32>(DIMS3[1]), DType::F32, &[DIMS3[1]]);
    let arg = TensorRef::contiguous(f.alloc_sentinel::<u64>(DIMS3[1]), DType::U64, &[DIMS3[1]]);

    f.engine.max_and_argmax(&max, &arg, &src, &[0, 2]).unwrap();

    let max_out: Vec<f32> = f.download(max.base, DIMS3[1]);
    let arg_out: Vec<u64> = f.download(arg.base, DIMS3[1]);

    for j in 0..DIMS3[1] {
        let mut gt_max = src_data[at3(0, j, 0)];
        let mut gt_arg = 0u64;
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                let v = src_data[at3(i, j, k)];
                if v > gt_max {
                    gt_max = v;
                    gt_arg = (i * DIMS3[2] + k) as u64;
                }
            }
        }
        assert_eq!(gt_max, max_out[j], "max mismatch at j={j}");
        assert_eq!(gt_arg, arg_out[j], "argmax mismatch at j={j}");
    }
}

#[test]
fn test_maxandargmax_idxtranspose() {
    // Same reduction with the axis list reversed: {2, 0} instead of {0, 2}.
    // The values are unchanged, but the argument digits swap: the flat
    // index weights follow the caller's axis order.
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);
    let max = TensorRef::contiguous(f.alloc_sentinel::<f32>(DIMS3[1]), DType::F32, &[DIMS3[1]]);
    let arg = TensorRef::contiguous(f.alloc_sentinel::<u64>(DIMS3[1]), DType::U64, &[DIMS3[1]]);

    f.engine.max_and_argmax(&max, &arg, &src, &[2, 0]).unwrap();

    let max_out: Vec<f32> = f.download(max.base, DIMS3[1]);
    let arg_out: Vec<u64> = f.download(arg.base, DIMS3[1]);

    for j in 0..DIMS3[1] {
        let mut gt_max = src_data[at3(0, j, 0)];
        let mut gt_arg = 0u64;
        for k in 0..DIMS3[2] {
            for i in 0..DIMS3[0] {
                let v = src_data[at3(i, j, k)];
                if v > gt_max {
                    gt_max = v;
                    gt_arg = (k * DIMS3[0] + i) as u64;
                }
            }
        }
        assert_eq!(gt_max, max_out[j], "max mismatch at j={j}");
        assert_eq!(gt_arg, arg_out[j], "argmax mismatch at j={j}");
    }
}

#[test]
fn test_maxandargmax_veryhighrank() {
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS8));
    let rdx_dims = [DIMS8[0], DIMS8[1], DIMS8[3], DIMS8[6]];
    let out_n = numel(&rdx_dims);

    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS8);
    let max = TensorRef::contiguous(f.alloc_sentinel::<f32>(out_n), DType::F32, &rdx_dims);
    let arg = TensorRef::contiguous(f.alloc_sentinel::<u64>(out_n), DType::U64, &rdx_dims);

    f.engine
        .max_and_argmax(&max, &arg, &src, &[2, 4, 7, 5])
        .unwrap();

    let max_out: Vec<f32> = f.download(max.base, out_n);
    let arg_out: Vec<u64> = f.download(arg.base, out_n);

    for i in 0..DIMS8[0] {
        for j in 0..DIMS8[1] {
            for l in 0..DIMS8[3] {
                for o in 0..DIMS8[6] {
                    let mut gt_max = src_data[at8(i, j, 0, l, 0, 0, o, 0)];
                    let mut gt_arg = 0u64;
                    for k in 0..DIMS8[2] {
                        for m in 0..DIMS8[4] {
                            for p in 0..DIMS8[7] {
                                for n in 0..DIMS8[5] {
                                    let v = src_data[at8(i, j, k, l, m, n, o, p)];
                                    if v > gt_max {
                                        gt_max = v;
                                        gt_arg = (((k * DIMS8[4] + m) * DIMS8[7] + p)
                                            * DIMS8[5]
                                            + n)
                                            as u64;
                                    }
                                }
                            }
                        }
                    }
                    let dst_idx = ((i * DIMS8[1] + j) * DIMS8[3] + l) * DIMS8[6] + o;
                    assert_eq!(gt_max, max_out[dst_idx]);
                    assert_eq!(gt_arg, arg_out[dst_idx]);
                }
            }
        }
    }
}

#[test]
fn test_maxandargmax_alldimsreduced() {
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);
    let max = TensorRef::scalar(f.alloc_sentinel::<f32>(1), DType::F32);
    let arg = TensorRef::scalar(f.alloc_sentinel::<u64>(1), DType::U64);

    f.engine.max_and_argmax(&max, &arg, &src, &[0, 1, 2]).unwrap();

    let mut gt_max = src_data[0];
    let mut gt_arg = 0u64;
    for (pos, &v) in src_data.iter().enumerate() {
        if v > gt_max {
            gt_max = v;
            gt_arg = pos as u64;
        }
    }
    assert_eq!(gt_max, f.download::<f32>(max.base, 1)[0]);
    assert_eq!(gt_arg, f.download::<u64>(arg.base, 1)[0]);
}

// ===========================================================================
// min-and-argmin
// ===========================================================================

#[test]
fn test_minandargmin_reduction() {
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);
    let min = TensorRef::contiguous(f.alloc_sentinel::<f32>(DIMS3[1]), DType::F32, &[DIMS3[1]]);
    let arg = TensorRef::contiguous(f.alloc_sentinel::<u64>(DIMS3[1]), DType::U64, &[DIMS3[1]]);

    f.engine.min_and_argmin(&min, &arg, &src, &[0, 2]).unwrap();

    let min_out: Vec<f32> = f.download(min.base, DIMS3[1]);
    let arg_out: Vec<u64> = f.download(arg.base, DIMS3[1]);

    for j in 0..DIMS3[1] {
        let mut gt_min = src_data[at3(0, j, 0)];
        let mut gt_arg = 0u64;
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                let v = src_data[at3(i, j, k)];
                if v < gt_min {
                    gt_min = v;
                    gt_arg = (i * DIMS3[2] + k) as u64;
                }
            }
        }
        assert_eq!(gt_min, min_out[j]);
        assert_eq!(gt_arg, arg_out[j]);
    }
}

#[test]
fn test_minandargmin_veryhighrank() {
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS8));
    let rdx_dims = [DIMS8[0], DIMS8[1], DIMS8[3], DIMS8[6]];
    let out_n = numel(&rdx_dims);

    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS8);
    let min = TensorRef::contiguous(f.alloc_sentinel::<f32>(out_n), DType::F32, &rdx_dims);
    let arg = TensorRef::contiguous(f.alloc_sentinel::<u64>(out_n), DType::U64, &rdx_dims);

    f.engine
        .min_and_argmin(&min, &arg, &src, &[2, 4, 7, 5])
        .unwrap();

    let min_out: Vec<f32> = f.download(min.base, out_n);
    let arg_out: Vec<u64> = f.download(arg.base, out_n);

    for i in 0..DIMS8[0] {
        for j in 0..DIMS8[1] {
            for l in 0..DIMS8[3] {
                for o in 0..DIMS8[6] {
                    let mut gt_min = src_data[at8(i, j, 0, l, 0, 0, o, 0)];
                    let mut gt_arg = 0u64;
                    for k in 0..DIMS8[2] {
                        for m in 0..DIMS8[4] {
                            for p in 0..DIMS8[7] {
                                for n in 0..DIMS8[5] {
                                    let v = src_data[at8(i, j, k, l, m, n, o, p)];
                                    if v < gt_min {
                                        gt_min = v;
                                        gt_arg = (((k * DIMS8[4] + m) * DIMS8[7] + p)
                                            * DIMS8[5]
                                            + n)
                                            as u64;
                                    }
                                }
                            }
                        }
                    }
                    let dst_idx = ((i * DIMS8[1] + j) * DIMS8[3] + l) * DIMS8[6] + o;
                    assert_eq!(gt_min, min_out[dst_idx]);
                    assert_eq!(gt_arg, arg_out[dst_idx]);
                }
            }
        }
    }
}

// ===========================================================================
// argmax / argmin (index stream only)
// ===========================================================================

#[test]
fn test_argmax_reduction() {
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);
    let arg = TensorRef::contiguous(f.alloc_sentinel::<u64>(DIMS3[1]), DType::U64, &[DIMS3[1]]);

    f.engine.argmax(&arg, &src, &[0, 2]).unwrap();

    let arg_out: Vec<u64> = f.download(arg.base, DIMS3[1]);
    for j in 0..DIMS3[1] {
        let mut gt_max = src_data[at3(0, j, 0)];
        let mut gt_arg = 0u64;
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                let v = src_data[at3(i, j, k)];
                if v > gt_max {
                    gt_max = v;
                    gt_arg = (i * DIMS3[2] + k) as u64;
                }
            }
        }
        assert_eq!(gt_arg, arg_out[j]);
    }
}

#[test]
fn test_argmin_alldimsreduced() {
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);
    let arg = TensorRef::scalar(f.alloc_sentinel::<u64>(1), DType::U64);

    f.engine.argmin(&arg, &src, &[0, 1, 2]).unwrap();

    let mut gt_min = src_data[0];
    let mut gt_arg = 0u64;
    for (pos, &v) in src_data.iter().enumerate() {
        if v < gt_min {
            gt_min = v;
            gt_arg = pos as u64;
        }
    }
    assert_eq!(gt_arg, f.download::<u64>(arg.base, 1)[0]);
}

#[test]
fn test_argmax_u32_index_stream() {
    // Same contract with a narrower index type.
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);
    let arg = TensorRef::contiguous(f.alloc_sentinel::<u32>(DIMS3[1]), DType::U32, &[DIMS3[1]]);

    f.engine.argmax(&arg, &src, &[0, 2]).unwrap();

    let arg_out: Vec<u32> = f.download(arg.base, DIMS3[1]);
    for j in 0..DIMS3[1] {
        let mut gt_max = src_data[at3(0, j, 0)];
        let mut gt_arg = 0u32;
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                let v = src_data[at3(i, j, k)];
                if v > gt_max {
                    gt_max = v;
                    gt_arg = (i * DIMS3[2] + k) as u32;
                }
            }
        }
        assert_eq!(gt_arg, arg_out[j]);
    }
}

// ===========================================================================
// max / min
// ===========================================================================

#[test]
fn test_max_reduction() {
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<f32>(DIMS3[1]), DType::F32, &[DIMS3[1]]);

    f.engine.max(&dst, &src, &[0, 2]).unwrap();

    let out: Vec<f32> = f.download(dst.base, DIMS3[1]);
    for j in 0..DIMS3[1] {
        let mut gt = src_data[at3(0, j, 0)];
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                gt = gt.max(src_data[at3(i, j, k)]);
            }
        }
        assert_eq!(gt, out[j]);
    }
}

#[test]
fn test_min_reduction_i32() {
    // Integer ordering, including negatives.
    let f = Fixture::new();
    let mut pcg = Pcg::new(1);
    let src_data: Vec<i32> = (0..numel(&DIMS3))
        .map(|_| pcg.next_u32() as i32)
        .collect();
    let src = TensorRef::contiguous(f.upload(&src_data), DType::I32, &DIMS3);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<i32>(DIMS3[1]), DType::I32, &[DIMS3[1]]);

    f.engine.min(&dst, &src, &[0, 2]).unwrap();

    let out: Vec<i32> = f.download(dst.base, DIMS3[1]);
    for j in 0..DIMS3[1] {
        let mut gt = src_data[at3(0, j, 0)];
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                gt = gt.min(src_data[at3(i, j, k)]);
            }
        }
        assert_eq!(gt, out[j]);
    }
}

#[test]
fn test_max_veryhighrank() {
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS8));
    let rdx_dims = [DIMS8[0], DIMS8[1], DIMS8[3], DIMS8[6]];
    let out_n = numel(&rdx_dims);
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS8);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<f32>(out_n), DType::F32, &rdx_dims);

    f.engine.max(&dst, &src, &[2, 4, 7, 5]).unwrap();

    let out: Vec<f32> = f.download(dst.base, out_n);
    for i in 0..DIMS8[0] {
        for j in 0..DIMS8[1] {
            for l in 0..DIMS8[3] {
                for o in 0..DIMS8[6] {
                    let mut gt = src_data[at8(i, j, 0, l, 0, 0, o, 0)];
                    for k in 0..DIMS8[2] {
                        for m in 0..DIMS8[4] {
                            for p in 0..DIMS8[7] {
                                for n in 0..DIMS8[5] {
                                    gt = gt.max(src_data[at8(i, j, k, l, m, n, o, p)]);
                                }
                            }
                        }
                    }
                    let dst_idx = ((i * DIMS8[1] + j) * DIMS8[3] + l) * DIMS8[6] + o;
                    assert_eq!(gt, out[dst_idx]);
                }
            }
        }
    }
}

// ===========================================================================
// sum / prod / prodnz
// ===========================================================================

#[test]
fn test_sum_reduction() {
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<f32>(DIMS3[1]), DType::F32, &[DIMS3[1]]);

    f.engine.sum(&dst, &src, &[0, 2]).unwrap();

    let out: Vec<f32> = f.download(dst.base, DIMS3[1]);
    for j in 0..DIMS3[1] {
        let mut gt = 0.0f32;
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                gt += src_data[at3(i, j, k)];
            }
        }
        assert!((gt - out[j]).abs() < 1e-5, "j={j}: {gt} vs {}", out[j]);
    }
}

#[test]
fn test_sum_alldimsreduced() {
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);
    let dst = TensorRef::scalar(f.alloc_sentinel::<f32>(1), DType::F32);

    f.engine.sum(&dst, &src, &[0, 1, 2]).unwrap();

    let gt: f32 = src_data.iter().sum();
    let out = f.download::<f32>(dst.base, 1)[0];
    assert!((gt - out).abs() < 1e-5 * gt.abs().max(1.0), "{gt} vs {out}");
}

#[test]
fn test_sum_veryhighrank() {
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS8));
    let rdx_dims = [DIMS8[0], DIMS8[1], DIMS8[3], DIMS8[6]];
    let out_n = numel(&rdx_dims);
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS8);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<f32>(out_n), DType::F32, &rdx_dims);

    f.engine.sum(&dst, &src, &[2, 4, 7, 5]).unwrap();

    let out: Vec<f32> = f.download(dst.base, out_n);
    for i in 0..DIMS8[0] {
        for j in 0..DIMS8[1] {
            for l in 0..DIMS8[3] {
                for o in 0..DIMS8[6] {
                    let mut gt = 0.0f32;
                    for k in 0..DIMS8[2] {
                        for m in 0..DIMS8[4] {
                            for p in 0..DIMS8[7] {
                                for n in 0..DIMS8[5] {
                                    gt += src_data[at8(i, j, k, l, m, n, o, p)];
                                }
                            }
                        }
                    }
                    let dst_idx = ((i * DIMS8[1] + j) * DIMS8[3] + l) * DIMS8[6] + o;
                    assert!((gt - out[dst_idx]).abs() < 1e-5);
                }
            }
        }
    }
}

#[test]
fn test_prod_reduction() {
    let f = Fixture::new();
    // Values near 1 keep the products in a comfortable range.
    let src_data: Vec<f32> = {
        let mut pcg = Pcg::new(1);
        (0..numel(&DIMS3))
            .map(|_| ((pcg.rand01() - 0.5) * 0.1 + 1.0) as f32)
            .collect()
    };
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<f32>(DIMS3[1]), DType::F32, &[DIMS3[1]]);

    f.engine.prod(&dst, &src, &[0, 2]).unwrap();

    let out: Vec<f32> = f.download(dst.base, DIMS3[1]);
    for j in 0..DIMS3[1] {
        let mut gt = 1.0f32;
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                gt *= src_data[at3(i, j, k)];
            }
        }
        assert!((gt - out[j]).abs() < 1e-5 * gt.abs().max(1.0));
    }
}

#[test]
fn test_prodnz_reduction() {
    let f = Fixture::new();
    let src_data = prodnz_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<f32>(DIMS3[1]), DType::F32, &[DIMS3[1]]);

    f.engine.prodnz(&dst, &src, &[0, 2]).unwrap();

    let out: Vec<f32> = f.download(dst.base, DIMS3[1]);
    for j in 0..DIMS3[1] {
        let mut gt = 1.0f32;
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                let v = src_data[at3(i, j, k)];
                gt *= if v == 0.0 { 1.0 } else { v };
            }
        }
        assert!((gt - out[j]).abs() < 1e-5 * gt.abs().max(1.0));
    }
}

#[test]
fn test_prodnz_alldimsreduced() {
    let f = Fixture::new();
    let src_data = prodnz_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);
    let dst = TensorRef::scalar(f.alloc_sentinel::<f32>(1), DType::F32);

    f.engine.prodnz(&dst, &src, &[0, 1, 2]).unwrap();

    let mut gt = 1.0f32;
    for &v in &src_data {
        gt *= if v == 0.0 { 1.0 } else { v };
    }
    let out = f.download::<f32>(dst.base, 1)[0];
    assert!((gt - out).abs() < 1e-5 * gt.abs().max(1.0), "{gt} vs {out}");
}

// ===========================================================================
// bitwise and / or / xor
// ===========================================================================

#[test]
fn test_and_reduction() {
    let f = Fixture::new();
    let src_data = and_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::U32, &DIMS3);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<u32>(DIMS3[1]), DType::U32, &[DIMS3[1]]);

    f.engine.bitand(&dst, &src, &[0, 2]).unwrap();

    let out: Vec<u32> = f.download(dst.base, DIMS3[1]);
    for j in 0..DIMS3[1] {
        let mut gt = u32::MAX;
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                gt &= src_data[at3(i, j, k)];
            }
        }
        assert_eq!(gt, out[j]);
    }
}

#[test]
fn test_or_reduction() {
    let f = Fixture::new();
    let src_data = or_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::U32, &DIMS3);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<u32>(DIMS3[1]), DType::U32, &[DIMS3[1]]);

    f.engine.bitor(&dst, &src, &[0, 2]).unwrap();

    let out: Vec<u32> = f.download(dst.base, DIMS3[1]);
    for j in 0..DIMS3[1] {
        let mut gt = 0u32;
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                gt |= src_data[at3(i, j, k)];
            }
        }
        assert_eq!(gt, out[j]);
    }
}

#[test]
fn test_and_veryhighrank() {
    let f = Fixture::new();
    let src_data = and_vec(numel(&DIMS8));
    let rdx_dims = [DIMS8[0], DIMS8[1], DIMS8[3], DIMS8[6]];
    let out_n = numel(&rdx_dims);
    let src = TensorRef::contiguous(f.upload(&src_data), DType::U32, &DIMS8);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<u32>(out_n), DType::U32, &rdx_dims);

    f.engine.bitand(&dst, &src, &[2, 4, 7, 5]).unwrap();

    let out: Vec<u32> = f.download(dst.base, out_n);
    for i in 0..DIMS8[0] {
        for j in 0..DIMS8[1] {
            for l in 0..DIMS8[3] {
                for o in 0..DIMS8[6] {
                    let mut gt = u32::MAX;
                    for k in 0..DIMS8[2] {
                        for m in 0..DIMS8[4] {
                            for p in 0..DIMS8[7] {
                                for n in 0..DIMS8[5] {
                                    gt &= src_data[at8(i, j, k, l, m, n, o, p)];
                                }
                            }
                        }
                    }
                    let dst_idx = ((i * DIMS8[1] + j) * DIMS8[3] + l) * DIMS8[6] + o;
                    assert_eq!(gt, out[dst_idx]);
                }
            }
        }
    }
}

#[test]
fn test_or_alldimsreduced() {
    let f = Fixture::new();
    let src_data = or_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::U32, &DIMS3);
    let dst = TensorRef::scalar(f.alloc_sentinel::<u32>(1), DType::U32);

    f.engine.bitor(&dst, &src, &[0, 1, 2]).unwrap();

    let mut gt = 0u32;
    for &v in &src_data {
        gt |= v;
    }
    assert_eq!(gt, f.download::<u32>(dst.base, 1)[0]);
}

#[test]
fn test_xor_reduction() {
    let f = Fixture::new();
    let src_data = xor_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::U32, &DIMS3);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<u32>(DIMS3[1]), DType::U32, &[DIMS3[1]]);

    f.engine.bitxor(&dst, &src, &[0, 2]).unwrap();

    let out: Vec<u32> = f.download(dst.base, DIMS3[1]);
    for j in 0..DIMS3[1] {
        let mut gt = 0u32;
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                gt ^= src_data[at3(i, j, k)];
            }
        }
        assert_eq!(gt, out[j]);
    }
}

// ===========================================================================
// any / all
// ===========================================================================

#[test]
fn test_any_reduction() {
    let f = Fixture::new();
    let src_data = any_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::U32, &DIMS3);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<u32>(DIMS3[1]), DType::U32, &[DIMS3[1]]);

    f.engine.any(&dst, &src, &[0, 2]).unwrap();

    let out: Vec<u32> = f.download(dst.base, DIMS3[1]);
    for j in 0..DIMS3[1] {
        let mut gt = 0u32;
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                gt = u32::from(gt != 0 || src_data[at3(i, j, k)] != 0);
            }
        }
        assert_eq!(gt, out[j]);
    }
}

#[test]
fn test_all_reduction() {
    let f = Fixture::new();
    let src_data = all_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::U32, &DIMS3);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<u32>(DIMS3[1]), DType::U32, &[DIMS3[1]]);

    f.engine.all(&dst, &src, &[0, 2]).unwrap();

    let out: Vec<u32> = f.download(dst.base, DIMS3[1]);
    for j in 0..DIMS3[1] {
        let mut gt = 1u32;
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                gt = u32::from(gt != 0 && src_data[at3(i, j, k)] != 0);
            }
        }
        assert_eq!(gt, out[j]);
    }
}

#[test]
fn test_any_veryhighrank() {
    let f = Fixture::new();
    let src_data = any_vec(numel(&DIMS8));
    let rdx_dims = [DIMS8[0], DIMS8[1], DIMS8[3], DIMS8[6]];
    let out_n = numel(&rdx_dims);
    let src = TensorRef::contiguous(f.upload(&src_data), DType::U32, &DIMS8);
    let dst = TensorRef::contiguous(f.alloc_sentinel::<u32>(out_n), DType::U32, &rdx_dims);

    f.engine.any(&dst, &src, &[2, 4, 7, 5]).unwrap();

    let out: Vec<u32> = f.download(dst.base, out_n);
    for i in 0..DIMS8[0] {
        for j in 0..DIMS8[1] {
            for l in 0..DIMS8[3] {
                for o in 0..DIMS8[6] {
                    let mut gt = 0u32;
                    for k in 0..DIMS8[2] {
                        for m in 0..DIMS8[4] {
                            for p in 0..DIMS8[7] {
                                for n in 0..DIMS8[5] {
                                    let v = src_data[at8(i, j, k, l, m, n, o, p)];
                                    gt = u32::from(gt != 0 || v != 0);
                                }
                            }
                        }
                    }
                    let dst_idx = ((i * DIMS8[1] + j) * DIMS8[3] + l) * DIMS8[6] + o;
                    assert_eq!(gt, out[dst_idx]);
                }
            }
        }
    }
}

#[test]
fn test_all_alldimsreduced() {
    let f = Fixture::new();
    let src_data = all_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::U32, &DIMS3);
    let dst = TensorRef::scalar(f.alloc_sentinel::<u32>(1), DType::U32);

    f.engine.all(&dst, &src, &[0, 1, 2]).unwrap();

    let gt = u32::from(src_data.iter().all(|&v| v != 0));
    assert_eq!(gt, f.download::<u32>(dst.base, 1)[0]);
}

// ===========================================================================
// Strided and reversed views
// ===========================================================================

#[test]
fn test_sum_over_transposed_view() {
    // The same buffer viewed with swapped axes must fold the same fibres;
    // the planner's internal permutation must not change any value.
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS3));
    let buf = f.upload(&src_data);

    // View as [79, 50, 32] by permuting strides of the [32, 50, 79] layout.
    let elem = 4isize;
    let s = [
        DIMS3[1] as isize * DIMS3[2] as isize * elem,
        DIMS3[2] as isize * elem,
        elem,
    ];
    let view = TensorRef::strided(
        buf,
        DType::F32,
        &[DIMS3[2], DIMS3[1], DIMS3[0]],
        &[s[2], s[1], s[0]],
    );
    let dst = TensorRef::contiguous(f.alloc_sentinel::<f32>(DIMS3[1]), DType::F32, &[DIMS3[1]]);

    f.engine.sum(&dst, &view, &[0, 2]).unwrap();

    let out: Vec<f32> = f.download(dst.base, DIMS3[1]);
    for j in 0..DIMS3[1] {
        let mut gt = 0.0f32;
        for i in 0..DIMS3[0] {
            for k in 0..DIMS3[2] {
                gt += src_data[at3(i, j, k)];
            }
        }
        assert!((gt - out[j]).abs() < 1e-4, "j={j}: {gt} vs {}", out[j]);
    }
}

#[test]
fn test_maxandargmax_reversed_view() {
    // A negative-stride view reverses the flat indexing of the fibre.
    let f = Fixture::new();
    let data = rand01_vec(64);
    let buf = f.upload(&data);

    let last = buf + 63 * 4;
    let view = TensorRef::strided(last, DType::F32, &[64], &[-4]);
    let max = TensorRef::scalar(f.alloc_sentinel::<f32>(1), DType::F32);
    let arg = TensorRef::scalar(f.alloc_sentinel::<u64>(1), DType::U64);

    f.engine.max_and_argmax(&max, &arg, &view, &[0]).unwrap();

    let mut gt_max = data[63];
    let mut gt_arg = 0u64;
    for r in 0..64u64 {
        let v = data[63 - r as usize];
        if v > gt_max {
            gt_max = v;
            gt_arg = r;
        }
    }
    assert_eq!(gt_max, f.download::<f32>(max.base, 1)[0]);
    assert_eq!(gt_arg, f.download::<u64>(arg.base, 1)[0]);
}

// ===========================================================================
// Determinism
// ===========================================================================

#[test]
fn test_argmax_deterministic_across_runs() {
    let f = Fixture::new();
    let src_data = rand01_vec(numel(&DIMS3));
    let src = TensorRef::contiguous(f.upload(&src_data), DType::F32, &DIMS3);

    let run = || {
        let max = TensorRef::contiguous(f.alloc_sentinel::<f32>(DIMS3[1]), DType::F32, &[DIMS3[1]]);
        let arg = TensorRef::contiguous(f.alloc_sentinel::<u64>(DIMS3[1]), DType::U64, &[DIMS3[1]]);
        f.engine.max_and_argmax(&max, &arg, &src, &[0, 2]).unwrap();
        (
            f.download::<f32>(max.base, DIMS3[1]),
            f.download::<u64>(arg.base, DIMS3[1]),
        )
    };

    let (max_a, arg_a) = run();
    let (max_b, arg_b) = run();
    assert_eq!(max_a, max_b);
    assert_eq!(arg_a, arg_b);
}

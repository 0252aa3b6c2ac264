//! Common test utilities
#![allow(dead_code)]

use conv1x1_jit::prelude::*;

/// Channel block of every blocked layout
pub const BLOCK: usize = 16;

// ============================================================================
// Problems
// ============================================================================

/// Weight layout expected by `direction` for f32 kernels
pub fn f32_weights_format(direction: Direction) -> MemoryFormat {
    match direction {
        Direction::BackwardData => MemoryFormat::IOhw16o16i,
        _ => MemoryFormat::OIhw16i16o,
    }
}

/// Ungrouped 1x1 problem over `[mb, ic, h, w] -> [mb, oc, h, w]` with f32 operands
pub fn f32_problem(
    direction: Direction,
    mb: usize,
    ic: usize,
    oc: usize,
    h: usize,
    w: usize,
) -> ConvProblem {
    ConvProblem::new(
        direction,
        TensorDesc::new(&[mb, ic, h, w], DataType::F32, MemoryFormat::NChw16c),
        TensorDesc::new(&[oc, ic, 1, 1], DataType::F32, f32_weights_format(direction)),
        TensorDesc::new(&[mb, oc, h, w], DataType::F32, MemoryFormat::NChw16c),
    )
}

/// Generate a kernel, panicking with the planner's message on rejection
pub fn generate<C: CpuCapabilities>(caps: C, request: &PlanRequest) -> EmittedKernel {
    match conv1x1_jit::generate(caps, request) {
        Ok(kernel) => kernel,
        Err(err) => panic!("generation failed: {err}"),
    }
}

// ============================================================================
// Data
// ============================================================================

/// Deterministic values in [-0.5, 0.5)
pub fn sample_f32(len: usize, seed: usize) -> Vec<f32> {
    (0..len)
        .map(|i| ((i * 7919 + seed * 104_729) % 1009) as f32 / 1009.0 - 0.5)
        .collect()
}

/// Deterministic small integers in [-6, 6]
pub fn sample_i16(len: usize, seed: usize) -> Vec<i16> {
    (0..len)
        .map(|i| ((i * 31 + seed * 17) % 13) as i16 - 6)
        .collect()
}

// ============================================================================
// Layouts
// ============================================================================

/// Plain `[n][c][s]` to `nChw16c`, rows padded from `s` to `s_pad` with `fill`
pub fn to_nchw16c_padded<T: Copy>(
    plain: &[T],
    mb: usize,
    c: usize,
    s: usize,
    s_pad: usize,
    fill: T,
) -> Vec<T> {
    assert_eq!(plain.len(), mb * c * s);
    let nb_c = c / BLOCK;
    let mut out = vec![fill; mb * c * s_pad];
    for n in 0..mb {
        for ch in 0..c {
            let (cb, c16) = (ch / BLOCK, ch % BLOCK);
            for sp in 0..s {
                out[((n * nb_c + cb) * s_pad + sp) * BLOCK + c16] = plain[(n * c + ch) * s + sp];
            }
        }
    }
    out
}

/// Plain `[n][c][s]` to `nChw16c`
pub fn to_nchw16c<T: Copy + Default>(plain: &[T], mb: usize, c: usize, s: usize) -> Vec<T> {
    to_nchw16c_padded(plain, mb, c, s, s, T::default())
}

/// `nChw16c` back to plain `[n][c][s]`
pub fn from_nchw16c<T: Copy + Default>(blocked: &[T], mb: usize, c: usize, s: usize) -> Vec<T> {
    assert_eq!(blocked.len(), mb * c * s);
    let nb_c = c / BLOCK;
    let mut out = vec![T::default(); mb * c * s];
    for n in 0..mb {
        for ch in 0..c {
            let (cb, c16) = (ch / BLOCK, ch % BLOCK);
            for sp in 0..s {
                out[(n * c + ch) * s + sp] = blocked[((n * nb_c + cb) * s + sp) * BLOCK + c16];
            }
        }
    }
    out
}

/// Plain `[n][c][s]` to the quad-transposed source `[n][cb][s_pad / 4][16][4]`,
/// zero beyond `s`
pub fn to_transposed_src(plain: &[f32], mb: usize, c: usize, s: usize) -> Vec<f32> {
    assert_eq!(plain.len(), mb * c * s);
    let nb_c = c / BLOCK;
    let s_pad = s.div_ceil(4) * 4;
    let mut out = vec![0.0; mb * c * s_pad];
    for n in 0..mb {
        for ch in 0..c {
            let (cb, c16) = (ch / BLOCK, ch % BLOCK);
            for sp in 0..s {
                let at = (((n * nb_c + cb) * (s_pad / 4) + sp / 4) * BLOCK + c16) * 4 + sp % 4;
                out[at] = plain[(n * c + ch) * s + sp];
            }
        }
    }
    out
}

/// Plain `[o][i]` weights to `OIhw16i16o`
pub fn to_oihw16i16o<T: Copy + Default>(plain: &[T], oc: usize, ic: usize) -> Vec<T> {
    assert_eq!(plain.len(), oc * ic);
    let nb_ic = ic / BLOCK;
    let mut out = vec![T::default(); oc * ic];
    for o in 0..oc {
        for i in 0..ic {
            let at = (((o / BLOCK) * nb_ic + i / BLOCK) * BLOCK + i % BLOCK) * BLOCK + o % BLOCK;
            out[at] = plain[o * ic + i];
        }
    }
    out
}

/// `OIhw16i16o` back to plain `[o][i]`
pub fn from_oihw16i16o<T: Copy + Default>(blocked: &[T], oc: usize, ic: usize) -> Vec<T> {
    assert_eq!(blocked.len(), oc * ic);
    let nb_ic = ic / BLOCK;
    let mut out = vec![T::default(); oc * ic];
    for o in 0..oc {
        for i in 0..ic {
            let at = (((o / BLOCK) * nb_ic + i / BLOCK) * BLOCK + i % BLOCK) * BLOCK + o % BLOCK;
            out[o * ic + i] = blocked[at];
        }
    }
    out
}

/// Plain `[o][i]` weights to `IOhw16o16i`
pub fn to_iohw16o16i<T: Copy + Default>(plain: &[T], oc: usize, ic: usize) -> Vec<T> {
    assert_eq!(plain.len(), oc * ic);
    let nb_oc = oc / BLOCK;
    let mut out = vec![T::default(); oc * ic];
    for o in 0..oc {
        for i in 0..ic {
            let at = (((i / BLOCK) * nb_oc + o / BLOCK) * BLOCK + o % BLOCK) * BLOCK + i % BLOCK;
            out[at] = plain[o * ic + i];
        }
    }
    out
}

/// Plain `[o][i]` weights to `OIhw8i16o2i`
pub fn to_oihw8i16o2i<T: Copy + Default>(plain: &[T], oc: usize, ic: usize) -> Vec<T> {
    assert_eq!(plain.len(), oc * ic);
    let nb_ic = ic / BLOCK;
    let mut out = vec![T::default(); oc * ic];
    for o in 0..oc {
        for i in 0..ic {
            let i16 = i % BLOCK;
            let at = (((o / BLOCK) * nb_ic + i / BLOCK) * 8 + i16 / 2) * 32
                + (o % BLOCK) * 2
                + i16 % 2;
            out[at] = plain[o * ic + i];
        }
    }
    out
}

/// Plain `[o][i]` weights to `OIhw8o16i2o`
pub fn to_oihw8o16i2o<T: Copy + Default>(plain: &[T], oc: usize, ic: usize) -> Vec<T> {
    assert_eq!(plain.len(), oc * ic);
    let nb_ic = ic / BLOCK;
    let mut out = vec![T::default(); oc * ic];
    for o in 0..oc {
        for i in 0..ic {
            let o16 = o % BLOCK;
            let at = (((o / BLOCK) * nb_ic + i / BLOCK) * 8 + o16 / 2) * 32
                + (i % BLOCK) * 2
                + o16 % 2;
            out[at] = plain[o * ic + i];
        }
    }
    out
}

// ============================================================================
// Reference convolutions (plain layouts)
// ============================================================================

/// `dst[n][o][s] = act(bias[o] + sum_i w[o][i] * src[n][i][s])`
#[allow(clippy::too_many_arguments)]
pub fn reference_forward(
    src: &[f32],
    weights: &[f32],
    bias: Option<&[f32]>,
    negative_slope: Option<f32>,
    mb: usize,
    ic: usize,
    oc: usize,
    s: usize,
) -> Vec<f32> {
    let mut dst = vec![0.0; mb * oc * s];
    for n in 0..mb {
        for o in 0..oc {
            for sp in 0..s {
                let mut acc = bias.map_or(0.0, |b| f64::from(b[o]));
                for i in 0..ic {
                    acc += f64::from(weights[o * ic + i]) * f64::from(src[(n * ic + i) * s + sp]);
                }
                let value = acc as f32;
                dst[(n * oc + o) * s + sp] = match negative_slope {
                    Some(slope) if value < 0.0 => value * slope,
                    _ => value,
                };
            }
        }
    }
    dst
}

/// Integer forward: `dst[n][o][s] = sum_i w[o][i] * src[n][i][s]`
pub fn reference_forward_i32(
    src: &[i16],
    weights: &[i16],
    mb: usize,
    ic: usize,
    oc: usize,
    s: usize,
) -> Vec<i32> {
    let mut dst = vec![0; mb * oc * s];
    for n in 0..mb {
        for o in 0..oc {
            for sp in 0..s {
                dst[(n * oc + o) * s + sp] = (0..ic)
                    .map(|i| i32::from(weights[o * ic + i]) * i32::from(src[(n * ic + i) * s + sp]))
                    .sum();
            }
        }
    }
    dst
}

/// `diff_src[n][i][s] = sum_o w[o][i] * diff_dst[n][o][s]`
pub fn reference_backward_data(
    diff_dst: &[f32],
    weights: &[f32],
    mb: usize,
    ic: usize,
    oc: usize,
    s: usize,
) -> Vec<f32> {
    let mut diff_src = vec![0.0; mb * ic * s];
    for n in 0..mb {
        for i in 0..ic {
            for sp in 0..s {
                let acc: f64 = (0..oc)
                    .map(|o| f64::from(weights[o * ic + i]) * f64::from(diff_dst[(n * oc + o) * s + sp]))
                    .sum();
                diff_src[(n * ic + i) * s + sp] = acc as f32;
            }
        }
    }
    diff_src
}

/// Integer backward data
pub fn reference_backward_data_i32(
    diff_dst: &[i16],
    weights: &[i16],
    mb: usize,
    ic: usize,
    oc: usize,
    s: usize,
) -> Vec<i32> {
    let mut diff_src = vec![0; mb * ic * s];
    for n in 0..mb {
        for i in 0..ic {
            for sp in 0..s {
                diff_src[(n * ic + i) * s + sp] = (0..oc)
                    .map(|o| i32::from(weights[o * ic + i]) * i32::from(diff_dst[(n * oc + o) * s + sp]))
                    .sum();
            }
        }
    }
    diff_src
}

/// `diff_w[o][i] = sum_{n,s} diff_dst[n][o][s] * src[n][i][s]`
pub fn reference_backward_weights(
    src: &[f32],
    diff_dst: &[f32],
    mb: usize,
    ic: usize,
    oc: usize,
    s: usize,
) -> Vec<f32> {
    let mut diff_w = vec![0.0; oc * ic];
    for o in 0..oc {
        for i in 0..ic {
            let mut acc = 0.0f64;
            for n in 0..mb {
                for sp in 0..s {
                    acc += f64::from(diff_dst[(n * oc + o) * s + sp])
                        * f64::from(src[(n * ic + i) * s + sp]);
                }
            }
            diff_w[o * ic + i] = acc as f32;
        }
    }
    diff_w
}

// ============================================================================
// Driving the kernel
// ============================================================================

/// One kernel call, with operand positions as byte offsets
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Call {
    pub bcast: usize,
    pub load: usize,
    pub output: usize,
    pub bias: usize,
    pub load_dim: usize,
    pub bcast_dim: usize,
    pub reduce_dim: usize,
    pub flags: usize,
    pub output_stride: usize,
}

/// Calls grouped by the output region they write; calls within a job are ordered
pub fn schedule(c: &KernelConfig) -> Vec<Vec<Call>> {
    if c.direction == Direction::BackwardWeights {
        weights_schedule(c)
    } else {
        activations_schedule(c)
    }
}

fn activations_schedule(c: &KernelConfig) -> Vec<Vec<Call>> {
    let (ts_in, ts_out) = (c.typesize_in(), c.typesize_out());
    let mut jobs = Vec::new();
    for n in 0..c.mb {
        for lb in (0..c.nb_load).step_by(c.nb_load_blocking) {
            let load_step = c.nb_load_blocking.min(c.nb_load - lb);
            for bb in (0..c.nb_bcast).step_by(c.nb_bcast_blocking) {
                let bcast_start = bb * c.bcast_block;
                let bcast_work = (c.nb_bcast_blocking * c.bcast_block).min(c.bcast_dim - bcast_start);
                let mut job = Vec::new();
                for rb in (0..c.nb_reduce).step_by(c.nb_reduce_blocking) {
                    let reduce_step = c.nb_reduce_blocking.min(c.nb_reduce - rb);
                    let mut flags = 0;
                    if rb == 0 {
                        flags |= FLAG_REDUCE_FIRST;
                    }
                    if rb + reduce_step == c.nb_reduce {
                        flags |= FLAG_REDUCE_LAST;
                    }
                    job.push(Call {
                        bcast: ((n * c.nb_reduce + rb) * c.bcast_dim + bcast_start)
                            * c.reduce_block
                            * ts_in,
                        load: lb * c.load_loop_load_step + rb * c.reduce_loop_load_step,
                        output: ((n * c.nb_load + lb) * c.bcast_dim + bcast_start)
                            * c.load_block
                            * ts_out,
                        bias: lb * c.load_block * ts_out,
                        load_dim: load_step * c.load_block,
                        bcast_dim: bcast_work,
                        reduce_dim: reduce_step * c.reduce_block,
                        flags,
                        output_stride: 0,
                    });
                }
                jobs.push(job);
            }
        }
    }
    jobs
}

fn weights_schedule(c: &KernelConfig) -> Vec<Vec<Call>> {
    let (ts_in, ts_out) = (c.typesize_in(), c.typesize_out());
    let mut jobs = Vec::new();
    for lb in (0..c.nb_load).step_by(c.nb_load_blocking) {
        let load_step = c.nb_load_blocking.min(c.nb_load - lb);
        for bb in (0..c.nb_bcast).step_by(c.nb_bcast_blocking) {
            let bcast_step = c.nb_bcast_blocking.min(c.nb_bcast - bb);
            let mut job = Vec::new();
            for n in 0..c.mb {
                for rb in (0..c.nb_reduce).step_by(c.nb_reduce_blocking) {
                    let reduce_step = c.nb_reduce_blocking.min(c.nb_reduce - rb);
                    let last_reduce = rb + reduce_step == c.nb_reduce;
                    let mut flags = 0;
                    if n == 0 && rb == 0 {
                        flags |= FLAG_REDUCE_FIRST;
                    }
                    if n == c.mb - 1 && last_reduce {
                        flags |= FLAG_REDUCE_LAST;
                    }
                    if last_reduce {
                        flags |= FLAG_SP_LAST;
                    }
                    job.push(Call {
                        bcast: ((n * c.nb_bcast + bb) * c.reduce_dim + rb * c.reduce_block)
                            * c.ic_block
                            * ts_in,
                        load: ((n * c.nb_load + lb) * c.reduce_dim + rb * c.reduce_block)
                            * c.oc_block
                            * ts_in,
                        output: (lb * c.ic + bb * c.ic_block) * c.oc_block * ts_out,
                        bias: 0,
                        load_dim: load_step * c.load_block,
                        bcast_dim: bcast_step * c.bcast_block,
                        reduce_dim: reduce_step * c.reduce_block,
                        flags,
                        output_stride: c.ic * c.oc_block * ts_out,
                    });
                }
            }
            jobs.push(job);
        }
    }
    jobs
}

/// Base addresses of the operands of one run
#[derive(Copy, Clone, Debug)]
pub struct Operands {
    bcast: usize,
    load: usize,
    output: usize,
    bias: usize,
}

impl Operands {
    /// Capture the operands, checking they cover the tensors `c` describes
    pub fn new<B, L, O>(
        c: &KernelConfig,
        bcast: &[B],
        load: &[L],
        output: &mut [O],
        bias: Option<&[O]>,
    ) -> Self {
        let (ts_in, ts_out) = (c.typesize_in(), c.typesize_out());
        let (bcast_bytes, load_bytes, output_bytes) = if c.direction == Direction::BackwardWeights {
            (
                c.mb * c.ic * c.reduce_dim * ts_in,
                c.mb * c.oc * c.reduce_dim * ts_in,
                c.oc * c.ic * ts_out,
            )
        } else {
            (
                c.mb * c.reduce_dim * c.bcast_dim * ts_in,
                c.reduce_dim * c.load_dim * ts_in,
                c.mb * c.load_dim * c.bcast_dim * ts_out,
            )
        };
        assert!(size_of_val(bcast) >= bcast_bytes, "broadcast operand too small");
        assert!(size_of_val(load) >= load_bytes, "load operand too small");
        assert!(size_of_val(output) >= output_bytes, "output too small");
        if c.with_bias {
            let bias = bias.expect("configuration has a bias");
            assert!(size_of_val(bias) >= c.load_dim * ts_out, "bias too small");
        }
        Self {
            bcast: bcast.as_ptr() as usize,
            load: load.as_ptr() as usize,
            output: output.as_mut_ptr() as usize,
            bias: bias.map_or(0, |b| b.as_ptr() as usize),
        }
    }
}

/// Run the calls of one job in order
///
/// # Safety
///
/// `ops` must come from live buffers sized for `kernel`'s configuration, and no other
/// thread may write the job's output region concurrently.
pub unsafe fn run_job(kernel: &EmittedKernel, ops: Operands, job: &[Call]) {
    for call in job {
        let desc = CallDescriptor {
            bcast_data: (ops.bcast + call.bcast) as *const u8,
            load_data: (ops.load + call.load) as *const u8,
            output_data: (ops.output + call.output) as *mut u8,
            bias_data: (ops.bias + call.bias) as *const u8,
            load_dim: call.load_dim,
            bcast_dim: call.bcast_dim,
            reduce_dim: call.reduce_dim,
            flags: call.flags,
            output_stride: call.output_stride,
        };
        // SAFETY: forwarded to the caller
        unsafe { kernel.execute(&desc) };
    }
}

/// Run the whole convolution on the calling thread
pub fn run<B, L, O>(
    kernel: &EmittedKernel,
    bcast: &[B],
    load: &[L],
    output: &mut [O],
    bias: Option<&[O]>,
) {
    let ops = Operands::new(kernel.config(), bcast, load, output, bias);
    for job in schedule(kernel.config()) {
        // SAFETY: Operands::new checked the buffer sizes; jobs run one at a time
        unsafe { run_job(kernel, ops, &job) };
    }
}

// ============================================================================
// Assertions
// ============================================================================

/// Assert two f32 slices are close: `|a - b| <= atol + rtol * |b|`
pub fn assert_allclose_f32(a: &[f32], b: &[f32], rtol: f32, atol: f32, msg: &str) {
    assert_eq!(a.len(), b.len(), "{msg}: length mismatch");
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        assert!(
            diff <= tol,
            "{}: element {} differs: {} vs {} (diff={}, tol={})",
            msg,
            i,
            x,
            y,
            diff,
            tol
        );
    }
}

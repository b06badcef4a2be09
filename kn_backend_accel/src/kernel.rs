//! Kernel source generation.
//!
//! A [`KernelSpec`] names every parameter that changes the generated code,
//! so it doubles as the kernel cache key.

use kn_tensor::BinaryOp;

use crate::device::{Dialect, WorkShape};

/// Entry point name of every generated program.
pub const ENTRY_POINT: &str = "knum_kernel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelSpec {
    /// `o[id] = l[id] op r[scalar_rhs ? 0 : id]`, one work item per element.
    Binary { op: BinaryOp, scalar_rhs: bool },
    /// Valid 3x3 convolution, one work item per output row.
    Conv2d { in_width: usize, out_width: usize },
}

/// Generated source plus the `KernelSpec` it was generated from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelProgram {
    pub spec: KernelSpec,
    pub dialect: Dialect,
    pub source: String,
    pub entry_point: &'static str,
}

fn binary_expr(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "l + r",
        BinaryOp::Sub => "l - r",
        BinaryOp::Mul => "l * r",
        BinaryOp::Div => "l / r",
        BinaryOp::Min => "fmin(l, r)",
        BinaryOp::Max => "fmax(l, r)",
    }
}

fn binary_source(dialect: Dialect, op: BinaryOp, scalar_rhs: bool) -> String {
    let r_index = if scalar_rhs { "0" } else { "id" };
    let expr = binary_expr(op);
    let header = match dialect {
        Dialect::Msl => format!(
            r#"#include <metal_stdlib>
using namespace metal;

kernel void {ENTRY_POINT}(device const float* larray [[buffer(0)]],
                        device const float* rarray [[buffer(1)]],
                        device float* o [[buffer(2)]],
                        uint id [[thread_position_in_grid]]) {{"#
        ),
        Dialect::OpenCl => format!(
            r#"__kernel void {ENTRY_POINT}(__global const float *larray,
                          __global const float *rarray,
                          __global float *o) {{
    uint id = get_global_id(0);"#
        ),
    };
    format!(
        r#"{header}
    float l = larray[id];
    float r = rarray[{r_index}];
    o[id] = {expr};
}}
"#
    )
}

fn conv2d_source(dialect: Dialect, in_width: usize, out_width: usize) -> String {
    let header = match dialect {
        Dialect::Msl => format!(
            r#"#include <metal_stdlib>
using namespace metal;

kernel void {ENTRY_POINT}(device const float* inp [[buffer(0)]],
                        device const float* krn [[buffer(1)]],
                        device float* otp [[buffer(2)]],
                        uint y [[thread_position_in_grid]]) {{"#
        ),
        Dialect::OpenCl => format!(
            r#"__kernel void {ENTRY_POINT}(__global const float *inp,
                          __global const float *krn,
                          __global float *otp) {{
    uint y = get_global_id(0);"#
        ),
    };
    format!(
        r#"#define IWIDTH {in_width}
#define OWIDTH {out_width}
#define RRI(x, y) inp[((y) * IWIDTH) + (x)]

{header}
    uint out_index = y * OWIDTH;

    float ma = krn[0], mb = krn[1], mc = krn[2];
    float md = krn[3], me = krn[4], mf = krn[5];
    float mg = krn[6], mh = krn[7], mi = krn[8];

    float a = RRI(0, y + 0);
    float b = RRI(1, y + 0);
    float d = RRI(0, y + 1);
    float e = RRI(1, y + 1);
    float g = RRI(0, y + 2);
    float h = RRI(1, y + 2);

    for (uint x = 0; x < OWIDTH; x++) {{
        float c = RRI(x + 2, y + 0);
        float f = RRI(x + 2, y + 1);
        float i = RRI(x + 2, y + 2);

        otp[out_index + x] =
            (a * ma) + (b * mb) + (c * mc) +
            (d * md) + (e * me) + (f * mf) +
            (g * mg) + (h * mh) + (i * mi);

        a = b; d = e; g = h;
        b = c; e = f; h = i;
    }}
}}
"#
    )
}

impl KernelSpec {
    /// Generate source for `dialect`.
    pub fn generate(&self, dialect: Dialect) -> KernelProgram {
        let source = match *self {
            KernelSpec::Binary { op, scalar_rhs } => binary_source(dialect, op, scalar_rhs),
            KernelSpec::Conv2d {
                in_width,
                out_width,
            } => conv2d_source(dialect, in_width, out_width),
        };
        KernelProgram {
            spec: *self,
            dialect,
            source,
            entry_point: ENTRY_POINT,
        }
    }

    /// Work range for an output of `out_extents`.
    ///
    /// Binary kernels run one item per element, conv2d one per output row.
    pub fn work_shape(&self, out_extents: &[usize]) -> WorkShape {
        match self {
            KernelSpec::Binary { .. } => WorkShape::linear(out_extents.iter().product()),
            KernelSpec::Conv2d { .. } => WorkShape::linear(out_extents.get(1).copied().unwrap_or(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_source_indexes_scalar_rhs() {
        let spec = KernelSpec::Binary {
            op: BinaryOp::Mul,
            scalar_rhs: true,
        };
        let program = spec.generate(Dialect::OpenCl);
        assert_eq!(program.entry_point, ENTRY_POINT);
        assert!(program.source.contains("__kernel void knum_kernel"));
        assert!(program.source.contains("rarray[0]"));
        assert!(program.source.contains("o[id] = l * r;"));

        let full = KernelSpec::Binary {
            op: BinaryOp::Mul,
            scalar_rhs: false,
        }
        .generate(Dialect::OpenCl);
        assert!(full.source.contains("rarray[id]"));
        assert_ne!(program.source, full.source);
    }

    #[test]
    fn test_msl_dialect() {
        let program = KernelSpec::Binary {
            op: BinaryOp::Max,
            scalar_rhs: false,
        }
        .generate(Dialect::Msl);
        assert!(program.source.starts_with("#include <metal_stdlib>"));
        assert!(program.source.contains("kernel void knum_kernel"));
        assert!(program.source.contains("[[thread_position_in_grid]]"));
        assert!(program.source.contains("fmax(l, r)"));
    }

    #[test]
    fn test_conv2d_widths_baked_in() {
        let a = KernelSpec::Conv2d {
            in_width: 6,
            out_width: 4,
        }
        .generate(Dialect::OpenCl);
        let b = KernelSpec::Conv2d {
            in_width: 9,
            out_width: 7,
        }
        .generate(Dialect::OpenCl);
        assert!(a.source.contains("#define IWIDTH 6"));
        assert!(a.source.contains("#define OWIDTH 4"));
        assert!(b.source.contains("#define IWIDTH 9"));
        assert_ne!(a.source, b.source);
    }

    #[test]
    fn test_work_shapes() {
        let binary = KernelSpec::Binary {
            op: BinaryOp::Add,
            scalar_rhs: false,
        };
        assert_eq!(binary.work_shape(&[4, 3]).items, 12);
        let conv = KernelSpec::Conv2d {
            in_width: 6,
            out_width: 4,
        };
        assert_eq!(conv.work_shape(&[4, 3]).items, 3);
    }
}

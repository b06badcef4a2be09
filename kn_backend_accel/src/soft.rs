//! Software device: runs generated kernels by interpreting their `KernelSpec` on the host.
//!
//! Every buffer bumps shared counters on creation and drop, so tests can
//! check that an evaluation released everything on every exit path.

use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kn_backend_cpu::reference;
use kn_tensor::{BinaryOp, ElementKind, HostBuffer};
use tracing::trace;

use crate::device::{AccelDevice, DeviceBuffer, DeviceError, DeviceResult, Dialect, WorkShape};
use crate::kernel::{KernelProgram, KernelSpec};

#[derive(Debug, Default)]
struct Counters {
    live_buffers: AtomicUsize,
    allocations: AtomicUsize,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    programs_compiled: AtomicUsize,
    dispatches: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SoftStats {
        SoftStats {
            live_buffers: self.live_buffers.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            programs_compiled: self.programs_compiled.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time resource counters of a [`SoftDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftStats {
    /// Buffers created and not yet dropped.
    pub live_buffers: usize,
    pub allocations: usize,
    pub uploads: usize,
    pub downloads: usize,
    pub programs_compiled: usize,
    /// Completed dispatches.
    pub dispatches: usize,
}

/// Reads a device's counters after the device itself has been moved or dropped.
#[derive(Debug, Clone)]
pub struct SoftMonitor {
    counters: Arc<Counters>,
}

impl SoftMonitor {
    pub fn stats(&self) -> SoftStats {
        self.counters.snapshot()
    }
}

#[derive(Debug)]
enum SoftData {
    Float(Vec<f32>),
    Int(Vec<i32>),
}

impl SoftData {
    fn len(&self) -> usize {
        match self {
            SoftData::Float(v) => v.len(),
            SoftData::Int(v) => v.len(),
        }
    }
}

#[derive(Debug)]
pub struct SoftBuffer {
    data: RefCell<SoftData>,
    kind: ElementKind,
    len: usize,
    counters: Arc<Counters>,
}

impl SoftBuffer {
    fn new(data: SoftData, counters: &Arc<Counters>) -> Self {
        Counters::bump(&counters.allocations);
        Counters::bump(&counters.live_buffers);
        let kind = match data {
            SoftData::Float(_) => ElementKind::Float,
            SoftData::Int(_) => ElementKind::Int,
        };
        SoftBuffer {
            len: data.len(),
            kind,
            data: RefCell::new(data),
            counters: Arc::clone(counters),
        }
    }

    fn floats(&self) -> DeviceResult<Vec<f32>> {
        let data = self
            .data
            .try_borrow()
            .map_err(|_| DeviceError::Dispatch("buffer is being written".into()))?;
        match &*data {
            SoftData::Float(v) => Ok(v.clone()),
            SoftData::Int(_) => Err(DeviceError::Dispatch("kernel expects float buffers".into())),
        }
    }

    fn write_floats(&self, f: impl FnOnce(&mut [f32]) -> DeviceResult<()>) -> DeviceResult<()> {
        let mut data = self
            .data
            .try_borrow_mut()
            .map_err(|_| DeviceError::Dispatch("output buffer aliases an input".into()))?;
        match &mut *data {
            SoftData::Float(v) => f(v),
            SoftData::Int(_) => Err(DeviceError::Dispatch("kernel expects float buffers".into())),
        }
    }
}

impl DeviceBuffer for SoftBuffer {
    fn kind(&self) -> ElementKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.len
    }

    fn read(&self) -> DeviceResult<HostBuffer> {
        let data = self
            .data
            .try_borrow()
            .map_err(|_| DeviceError::Transfer("buffer is being written".into()))?;
        Ok(match &*data {
            SoftData::Float(v) => HostBuffer::from(v.as_slice()),
            SoftData::Int(v) => HostBuffer::from(v.as_slice()),
        })
    }
}

impl Drop for SoftBuffer {
    fn drop(&mut self) {
        self.counters.live_buffers.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct SoftProgram {
    spec: KernelSpec,
    entry_point: &'static str,
}

#[derive(Debug)]
pub struct SoftKernel {
    spec: KernelSpec,
}

/// Host-memory [`AccelDevice`].
#[derive(Debug)]
pub struct SoftDevice {
    dialect: Dialect,
    counters: Arc<Counters>,
    dispatch_attempts: usize,
    fail_dispatch_after: Option<usize>,
    fail_compile: bool,
}

impl SoftDevice {
    pub fn new() -> Self {
        Self::with_dialect(Dialect::OpenCl)
    }

    pub fn with_dialect(dialect: Dialect) -> Self {
        SoftDevice {
            dialect,
            counters: Arc::default(),
            dispatch_attempts: 0,
            fail_dispatch_after: None,
            fail_compile: false,
        }
    }

    pub fn stats(&self) -> SoftStats {
        self.counters.snapshot()
    }

    pub fn monitor(&self) -> SoftMonitor {
        SoftMonitor {
            counters: Arc::clone(&self.counters),
        }
    }

    /// Let `n` dispatches succeed, then fail every later one.
    pub fn fail_dispatch_after(&mut self, n: usize) {
        self.fail_dispatch_after = Some(n);
        self.dispatch_attempts = 0;
    }

    /// Make every compilation fail while set.
    pub fn fail_compile(&mut self, fail: bool) {
        self.fail_compile = fail;
    }
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn out_of_bounds(what: &str) -> DeviceError {
    DeviceError::Dispatch(format!("{what} index out of bounds"))
}

fn run_binary(
    op: BinaryOp,
    scalar_rhs: bool,
    args: &[&SoftBuffer],
    work: WorkShape,
) -> DeviceResult<()> {
    let &[l, r, o] = args else {
        return Err(DeviceError::Dispatch(format!(
            "binary kernel takes 3 buffers, got {}",
            args.len()
        )));
    };
    let (l, r) = (l.floats()?, r.floats()?);
    let f = reference::float_op(op);
    o.write_floats(|o| {
        for id in 0..work.items {
            let ri = if scalar_rhs { 0 } else { id };
            let (Some(&x), Some(&y)) = (l.get(id), r.get(ri)) else {
                return Err(out_of_bounds("input"));
            };
            *o.get_mut(id).ok_or_else(|| out_of_bounds("output"))? = f(x, y);
        }
        Ok(())
    })
}

fn run_conv2d(
    in_width: usize,
    out_width: usize,
    args: &[&SoftBuffer],
    work: WorkShape,
) -> DeviceResult<()> {
    let &[inp, krn, otp] = args else {
        return Err(DeviceError::Dispatch(format!(
            "conv2d kernel takes 3 buffers, got {}",
            args.len()
        )));
    };
    let (inp, krn) = (inp.floats()?, krn.floats()?);
    let &[ma, mb, mc, md, me, mf, mg, mh, mi] = krn.as_slice() else {
        return Err(DeviceError::Dispatch("conv2d kernel needs 9 weights".into()));
    };
    if out_width + 2 > in_width || (work.items + 2) * in_width > inp.len() {
        return Err(out_of_bounds("input"));
    }

    let rri = |x: usize, y: usize| inp[y * in_width + x];
    otp.write_floats(|otp| {
        if work.items * out_width > otp.len() {
            return Err(out_of_bounds("output"));
        }
        for y in 0..work.items {
            let out_index = y * out_width;
            let (mut a, mut b) = (rri(0, y), rri(1, y));
            let (mut d, mut e) = (rri(0, y + 1), rri(1, y + 1));
            let (mut g, mut h) = (rri(0, y + 2), rri(1, y + 2));

            for x in 0..out_width {
                let c = rri(x + 2, y);
                let f = rri(x + 2, y + 1);
                let i = rri(x + 2, y + 2);

                otp[out_index + x] =
                    a * ma + b * mb + c * mc + d * md + e * me + f * mf + g * mg + h * mh + i * mi;

                (a, d, g) = (b, e, h);
                (b, e, h) = (c, f, i);
            }
        }
        Ok(())
    })
}

impl AccelDevice for SoftDevice {
    type Buffer = SoftBuffer;
    type Program = SoftProgram;
    type Kernel = SoftKernel;

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn upload(&mut self, data: &HostBuffer) -> DeviceResult<SoftBuffer> {
        Counters::bump(&self.counters.uploads);
        let data = match data {
            HostBuffer::Float(v) => SoftData::Float(v.to_vec()),
            HostBuffer::Int(v) => SoftData::Int(v.to_vec()),
        };
        Ok(SoftBuffer::new(data, &self.counters))
    }

    fn allocate(&mut self, kind: ElementKind, len: usize) -> DeviceResult<SoftBuffer> {
        let data = match kind {
            ElementKind::Float => SoftData::Float(vec![0.0; len]),
            ElementKind::Int => SoftData::Int(vec![0; len]),
        };
        Ok(SoftBuffer::new(data, &self.counters))
    }

    fn compile_program(&mut self, program: &KernelProgram) -> DeviceResult<SoftProgram> {
        if self.fail_compile {
            return Err(DeviceError::Compile("compilation disabled".into()));
        }
        if program.dialect != self.dialect {
            return Err(DeviceError::Compile(format!(
                "device compiles {:?}, program is {:?}",
                self.dialect, program.dialect
            )));
        }
        if program.source.trim().is_empty() || !program.source.contains(program.entry_point) {
            return Err(DeviceError::Compile(format!(
                "source does not define `{}`",
                program.entry_point
            )));
        }
        Counters::bump(&self.counters.programs_compiled);
        trace!(spec = ?program.spec, bytes = program.source.len(), "soft program compiled");
        Ok(SoftProgram {
            spec: program.spec,
            entry_point: program.entry_point,
        })
    }

    fn entry_point(&mut self, program: &SoftProgram, name: &str) -> DeviceResult<SoftKernel> {
        if name != program.entry_point {
            return Err(DeviceError::MissingEntryPoint(name.to_string()));
        }
        Ok(SoftKernel { spec: program.spec })
    }

    fn dispatch(
        &mut self,
        kernel: &SoftKernel,
        args: &[&SoftBuffer],
        work: WorkShape,
    ) -> DeviceResult<()> {
        self.dispatch_attempts += 1;
        if let Some(limit) = self.fail_dispatch_after {
            if self.dispatch_attempts > limit {
                return Err(DeviceError::Dispatch(format!(
                    "injected failure after {limit} dispatches"
                )));
            }
        }
        match kernel.spec {
            KernelSpec::Binary { op, scalar_rhs } => run_binary(op, scalar_rhs, args, work)?,
            KernelSpec::Conv2d {
                in_width,
                out_width,
            } => run_conv2d(in_width, out_width, args, work)?,
        }
        Counters::bump(&self.counters.dispatches);
        Ok(())
    }

    fn download(&mut self, buffer: &SoftBuffer) -> DeviceResult<HostBuffer> {
        Counters::bump(&self.counters.downloads);
        buffer.read()
    }
}

//! Metal binding (macOS, feature `metal`).

use std::fmt;

use kn_tensor::{ElementKind, HostBuffer};
use metal::{
    Buffer, CommandQueue, CompileOptions, ComputePipelineState, Device, Library,
    MTLCommandBufferStatus, MTLResourceOptions, MTLSize,
};

use crate::device::{AccelDevice, DeviceBuffer, DeviceError, DeviceResult, Dialect, WorkShape};
use crate::kernel::KernelProgram;

/// Shared-storage Metal buffer.
pub struct MetalBuffer {
    buffer: Buffer,
    kind: ElementKind,
    len: usize,
}

impl fmt::Debug for MetalBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetalBuffer")
            .field("kind", &self.kind)
            .field("len", &self.len)
            .finish()
    }
}

impl DeviceBuffer for MetalBuffer {
    fn kind(&self) -> ElementKind {
        self.kind
    }

    fn len(&self) -> usize {
        self.len
    }

    fn read(&self) -> DeviceResult<HostBuffer> {
        let ptr = self.buffer.contents();
        if ptr.is_null() {
            return Err(DeviceError::Transfer("buffer has no host mapping".into()));
        }
        // Shared storage: contents() maps `len` elements of `kind`, and every
        // dispatch has completed before control returns to the host.
        Ok(match self.kind {
            ElementKind::Float => {
                let slice = unsafe { std::slice::from_raw_parts(ptr as *const f32, self.len) };
                HostBuffer::from(slice)
            }
            ElementKind::Int => {
                let slice = unsafe { std::slice::from_raw_parts(ptr as *const i32, self.len) };
                HostBuffer::from(slice)
            }
        })
    }
}

/// System-default Metal GPU with one command queue.
pub struct MetalDevice {
    device: Device,
    queue: CommandQueue,
}

impl MetalDevice {
    pub fn new() -> DeviceResult<Self> {
        let device = Device::system_default()
            .ok_or_else(|| DeviceError::Allocation("no Metal device available".into()))?;
        Ok(Self::with_device(device))
    }

    pub fn with_device(device: Device) -> Self {
        let queue = device.new_command_queue();
        MetalDevice { device, queue }
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }
}

impl fmt::Debug for MetalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetalDevice")
            .field("name", &self.device.name())
            .finish()
    }
}

impl AccelDevice for MetalDevice {
    type Buffer = MetalBuffer;
    type Program = Library;
    type Kernel = ComputePipelineState;

    fn dialect(&self) -> Dialect {
        Dialect::Msl
    }

    fn upload(&mut self, data: &HostBuffer) -> DeviceResult<MetalBuffer> {
        let (ptr, len) = match data {
            HostBuffer::Float(v) => (v.as_ptr() as *const std::ffi::c_void, v.len()),
            HostBuffer::Int(v) => (v.as_ptr() as *const std::ffi::c_void, v.len()),
        };
        let kind = data.kind();
        let size_bytes = (len * kind.size_bytes()) as u64;
        let buffer =
            self.device
                .new_buffer_with_data(ptr, size_bytes, MTLResourceOptions::StorageModeShared);
        Ok(MetalBuffer { buffer, kind, len })
    }

    fn allocate(&mut self, kind: ElementKind, len: usize) -> DeviceResult<MetalBuffer> {
        let size_bytes = (len * kind.size_bytes()) as u64;
        let buffer = self
            .device
            .new_buffer(size_bytes, MTLResourceOptions::StorageModeShared);
        Ok(MetalBuffer { buffer, kind, len })
    }

    fn compile_program(&mut self, program: &KernelProgram) -> DeviceResult<Library> {
        if program.dialect != Dialect::Msl {
            return Err(DeviceError::Compile(format!(
                "Metal compiles MSL, program is {:?}",
                program.dialect
            )));
        }
        let options = CompileOptions::new();
        self.device
            .new_library_with_source(&program.source, &options)
            .map_err(DeviceError::Compile)
    }

    fn entry_point(&mut self, program: &Library, name: &str) -> DeviceResult<ComputePipelineState> {
        let function = program
            .get_function(name, None)
            .map_err(|_| DeviceError::MissingEntryPoint(name.to_string()))?;
        self.device
            .new_compute_pipeline_state_with_function(&function)
            .map_err(DeviceError::Compile)
    }

    fn dispatch(
        &mut self,
        kernel: &ComputePipelineState,
        args: &[&MetalBuffer],
        work: WorkShape,
    ) -> DeviceResult<()> {
        let command_buffer = self.queue.new_command_buffer();
        let encoder = command_buffer.new_compute_command_encoder();

        encoder.set_compute_pipeline_state(kernel);
        for (index, arg) in args.iter().enumerate() {
            encoder.set_buffer(index as u64, Some(&arg.buffer), 0);
        }

        let width = kernel.max_total_threads_per_threadgroup().min(work.items as u64).max(1);
        let grid_size = MTLSize::new(work.items as u64, 1, 1);
        encoder.dispatch_threads(grid_size, MTLSize::new(width, 1, 1));
        encoder.end_encoding();

        command_buffer.commit();
        command_buffer.wait_until_completed();

        if command_buffer.status() == MTLCommandBufferStatus::Error {
            return Err(DeviceError::Dispatch("command buffer completed with an error".into()));
        }
        Ok(())
    }
}

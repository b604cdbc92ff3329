//! GPU realization of the parallel substrate using WGPU.
//!
//! The fused forward and backward kernels are compiled once from WGSL (see
//! `shaders/`) and cached behind `lazy_static`. Each launch uploads its
//! inputs in logical row-major order, dispatches one invocation per
//! `(batch_index, column)` position in workgroups of [`WORKGROUP_SIZE`]
//! columns, and reads the output planes back through a staging buffer.
//!
//! Only `f32` tensors are supported. Every entry point returns `None` when
//! the GPU cannot serve the launch, and the caller falls back to the rayon
//! grid. GPU transcendentals are not bit-identical to the host's, so results
//! agree with the CPU kernels to within float tolerance only.

use std::sync::mpsc;

use briny::prelude::*;
use bytemuck::{Pod, Zeroable};
use tracing::{debug, warn};
use wgpu::util::DeviceExt;

use crate::scalar::ScalarType;
use crate::tensor::Tensor;

use super::dense::cat_columns;
use super::{BackwardInputs, FusedBackward, FusedForward};

const LLTM_FORWARD: &str = include_str!("shaders/lltm_forward.wgsl");
const LLTM_BACKWARD: &str = include_str!("shaders/lltm_backward.wgsl");

/// Columns per workgroup, matching `@workgroup_size` in the shaders.
pub const WORKGROUP_SIZE: u32 = 256;

/// Basic wrapper for common GPU errors.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// An error in requesting the adapter.
    #[error("adapter error: {0}")]
    Adapter(wgpu::RequestAdapterError),
    /// An error in requesting the device.
    #[error("device error: {0}")]
    Device(wgpu::RequestDeviceError),
}

/// Why a GPU launch could not complete.
#[derive(Debug, thiserror::Error)]
pub enum GpuFailure {
    #[error("GPU failure: {0}")]
    Gpu(#[from] GpuError),
    /// A shader did not pass source validation.
    #[error("shader `{0}` failed validation")]
    Validation(&'static str),
    #[error("GPU failure: {0}")]
    Message(String),
}

/// Holds the WGPU device and queue used for executing compute pipelines.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Selects the default adapter and creates a device and queue.
    ///
    /// Uses `pollster::block_on` to wait for the async WGPU calls.
    ///
    /// # Errors
    /// [`GpuError`] if no adapter or device can be acquired.
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(GpuError::Adapter)?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("lltm"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(GpuError::Device)?;

        Ok(Self { device, queue })
    }
}

/// WGSL source awaiting validation.
pub struct WgslSource<'a>(pub &'a str);

impl Validate for WgslSource<'_> {
    fn validate(&self) -> Result<(), ValidationError> {
        let src = self.0;

        if src.len() > 65536 {
            return Err(ValidationError);
        }
        if !src.contains("fn main") {
            return Err(ValidationError);
        }
        // no source inclusion
        if src.contains("import") || src.contains("#include") {
            return Err(ValidationError);
        }
        let forbidden = ["asm", "unsafe", "ptr", "std::"];
        if forbidden.iter().any(|bad| src.contains(bad)) {
            return Err(ValidationError);
        }

        Ok(())
    }
}

/// Validates a WGSL source and compiles it into a labeled shader module.
///
/// # Errors
/// [`GpuFailure::Validation`] if the source is rejected.
pub fn load_shader(
    device: &wgpu::Device,
    label: &'static str,
    source: &str,
) -> Result<wgpu::ShaderModule, GpuFailure> {
    WgslSource(source)
        .validate()
        .map_err(|_| GpuFailure::Validation(label))?;

    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    }))
}

/// Uniform block shared by both shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Dims {
    batch: u32,
    state_size: u32,
    _pad: [u32; 2],
}

/// A compiled compute pipeline with its bind group layout.
///
/// Binding 0 is the [`Dims`] uniform, bindings `1..=inputs` are read-only
/// storage and binding `inputs + 1` is the read-write output.
struct Kernel {
    label: &'static str,
    inputs: u32,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl Kernel {
    fn new(
        device: &wgpu::Device,
        label: &'static str,
        source: &str,
        inputs: u32,
    ) -> Result<Self, GpuFailure> {
        let module = load_shader(device, label, source)?;

        let buffer_entry = |binding, ty| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let entries: Vec<_> = core::iter::once(buffer_entry(0, wgpu::BufferBindingType::Uniform))
            .chain((1..=inputs).map(|b| {
                buffer_entry(b, wgpu::BufferBindingType::Storage { read_only: true })
            }))
            .chain(core::iter::once(buffer_entry(
                inputs + 1,
                wgpu::BufferBindingType::Storage { read_only: false },
            )))
            .collect();

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        Ok(Self {
            label,
            inputs,
            layout,
            pipeline,
        })
    }

    /// Runs one launch over a `batch × state_size` grid and returns the
    /// `planes` output planes, concatenated.
    fn run(
        &self,
        ctx: &GpuContext,
        batch: u32,
        state_size: u32,
        inputs: &[Vec<f32>],
        planes: usize,
    ) -> Result<Vec<f32>, GpuFailure> {
        if inputs.len() != self.inputs as usize {
            return Err(GpuFailure::Message(format!(
                "{}: expected {} inputs, got {}",
                self.label,
                self.inputs,
                inputs.len()
            )));
        }
        let device = &ctx.device;
        let plane_len = batch as usize * state_size as usize;
        let out_len = plane_len * planes;
        let widest_input = inputs.iter().map(Vec::len).max().unwrap_or(0);
        check_binding_sizes(&device.limits(), self.label, widest_input.max(out_len))?;
        let out_bytes = (out_len * size_of::<f32>()) as u64;

        let dims = Dims {
            batch,
            state_size,
            _pad: [0; 2],
        };
        let dims_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("dims"),
            contents: bytemuck::bytes_of(&dims),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let input_buffers: Vec<_> = inputs
            .iter()
            .map(|data| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(self.label),
                    contents: bytemuck::cast_slice(data.as_slice()),
                    usage: wgpu::BufferUsages::STORAGE,
                })
            })
            .collect();
        let out_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("planes"),
            size: out_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let entries: Vec<_> = core::iter::once(&dims_buffer)
            .chain(&input_buffers)
            .chain(core::iter::once(&out_buffer))
            .zip(0u32..)
            .map(|(buffer, binding)| wgpu::BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.label),
            layout: &self.layout,
            entries: &entries,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(self.label),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(self.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(state_size.div_ceil(WORKGROUP_SIZE), batch, 1);
        }

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size: out_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(&out_buffer, 0, &staging, 0, out_bytes);
        ctx.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| GpuFailure::Message(e.to_string()))?;
        rx.recv()
            .map_err(|e| GpuFailure::Message(e.to_string()))?
            .map_err(|e| GpuFailure::Message(e.to_string()))?;

        let data = slice.get_mapped_range();
        let out = bytemuck::cast_slice::<u8, f32>(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(out)
    }
}

/// Context plus both compiled kernels.
struct LltmKernels {
    ctx: GpuContext,
    forward: Kernel,
    backward: Kernel,
}

impl LltmKernels {
    fn new() -> Result<Self, GpuFailure> {
        let ctx = GpuContext::new()?;
        let forward = Kernel::new(&ctx.device, "lltm_forward", LLTM_FORWARD, 2)?;
        let backward = Kernel::new(&ctx.device, "lltm_backward", LLTM_BACKWARD, 7)?;
        Ok(Self {
            ctx,
            forward,
            backward,
        })
    }
}

lazy_static::lazy_static! {
    static ref LLTM_KERNELS: Result<LltmKernels, GpuFailure> = {
        let kernels = LltmKernels::new();
        if let Err(e) = &kernels {
            warn!("wgpu kernels unavailable: {e}");
        }
        kernels
    };
}

/// Fails if a storage binding of `elements` floats exceeds the device limits.
fn check_binding_sizes(limits: &wgpu::Limits, label: &str, elements: usize) -> Result<(), GpuFailure> {
    let bytes = u64::try_from(elements)
        .ok()
        .and_then(|n| n.checked_mul(size_of::<f32>() as u64));
    let binding_limit = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
    match bytes {
        Some(bytes) if bytes <= binding_limit => Ok(()),
        _ => Err(GpuFailure::Message(format!(
            "{label}: binding of {elements} f32 exceeds the device limit of {binding_limit} bytes"
        ))),
    }
}

/// Grid extents if every tensor is `f32` and the grid fits one dispatch.
fn grid_dims(tensors: &[&Tensor], batch: usize, state_size: usize) -> Option<(u32, u32)> {
    if tensors.iter().any(|t| t.scalar_type() != ScalarType::F32) {
        return None;
    }
    let limit = wgpu::Limits::default().max_compute_workgroups_per_dimension;
    let batch = u32::try_from(batch).ok()?;
    let state_size = u32::try_from(state_size).ok()?;
    // empty bindings are invalid; the host grid handles empty launches
    if batch == 0 || state_size == 0 || batch > limit || state_size.div_ceil(WORKGROUP_SIZE) > limit {
        return None;
    }
    Some((batch, state_size))
}

/// Splits concatenated output planes into `(batch, state_size)` tensors.
fn split_planes<const K: usize>(out: &[f32], like: &Tensor) -> [Tensor; K] {
    let shape = [like.shape()[0], like.shape()[2]];
    let len = shape[0] * shape[1];
    core::array::from_fn(|k| {
        Tensor::new(shape.to_vec(), out[k * len..(k + 1) * len].to_vec()).to_device(like.device())
    })
}

/// Runs the fused forward kernel on the GPU.
///
/// Returns `None` if the tensors are not `f32` or the GPU is unavailable.
pub(crate) fn wgpu_lltm_forward(gates: &Tensor, old_cell: &Tensor) -> Option<FusedForward> {
    let (batch, state_size) = grid_dims(&[gates, old_cell], gates.shape()[0], gates.shape()[2])?;
    let kernels = LLTM_KERNELS.as_ref().ok()?;

    let inputs = vec![gates.to_vec::<f32>().ok()?, old_cell.to_vec::<f32>().ok()?];
    let out = kernels
        .forward
        .run(&kernels.ctx, batch, state_size, &inputs, 5)
        .map_err(|e| debug!("wgpu lltm_forward failed: {e}"))
        .ok()?;

    let [new_h, new_cell, input_gate, output_gate, candidate_cell] = split_planes(&out, gates);
    Some(FusedForward {
        new_h,
        new_cell,
        input_gate,
        output_gate,
        candidate_cell,
    })
}

/// Runs the fused backward kernel on the GPU.
///
/// Returns `None` if the tensors are not `f32` or the GPU is unavailable.
pub(crate) fn wgpu_lltm_backward(inputs: &BackwardInputs<'_>) -> Option<FusedBackward> {
    let tensors = [
        inputs.grad_h,
        inputs.grad_cell,
        inputs.new_cell,
        inputs.input_gate,
        inputs.output_gate,
        inputs.candidate_cell,
        inputs.gates,
    ];
    let gates = inputs.gates;
    let (batch, state_size) = grid_dims(&tensors, gates.shape()[0], gates.shape()[2])?;
    let kernels = LLTM_KERNELS.as_ref().ok()?;

    let data = tensors
        .iter()
        .map(|t| t.to_vec::<f32>().ok())
        .collect::<Option<Vec<_>>>()?;
    let out = kernels
        .backward
        .run(&kernels.ctx, batch, state_size, &data, 4)
        .map_err(|e| debug!("wgpu lltm_backward failed: {e}"))
        .ok()?;

    let [d_input_gate, d_output_gate, d_candidate, d_old_cell] = split_planes(&out, gates);
    let d_gates = cat_columns::<f32>(&[&d_input_gate, &d_output_gate, &d_candidate]).ok()?;
    Some(FusedBackward {
        d_gates,
        d_old_cell,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversize_bindings_are_refused() {
        let limits = wgpu::Limits::default();
        assert!(check_binding_sizes(&limits, "lltm_forward", 5 * 4 * 1024).is_ok());
        // 5 planes of 64 x 131072 floats overflow the default 128 MiB binding
        assert!(matches!(
            check_binding_sizes(&limits, "lltm_forward", 5 * 64 * 131_072),
            Err(GpuFailure::Message(_))
        ));
        assert!(check_binding_sizes(&limits, "lltm_backward", usize::MAX).is_err());
    }

    #[test]
    fn grid_dims_reject_empty_and_non_f32_launches() {
        let gates = Tensor::zeros::<f32>(vec![2, 3, 4]);
        assert_eq!(grid_dims(&[&gates], 2, 4), Some((2, 4)));
        assert_eq!(grid_dims(&[&gates], 0, 4), None);
        let wide = Tensor::zeros::<f64>(vec![2, 3, 4]);
        assert_eq!(grid_dims(&[&wide], 2, 4), None);
    }
}

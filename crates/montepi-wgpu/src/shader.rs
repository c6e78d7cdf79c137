//! The two WGSL kernel variants and their compute pipeline.
//!
//! Both variants share bindings, generator and per-lane sampling
//! (`shaders/common.wgsl`) and differ only in the group reduction. The
//! variant is picked once at initialization from the device capabilities.

use montepi_core::reduction::ReductionStrategy;

use crate::memory::SamplerBuffers;

/// Kernel with the shared-memory tree reduction.
pub const WORKGROUP_KERNEL_WGSL: &str = concat!(
    include_str!("shaders/common.wgsl"),
    include_str!("shaders/workgroup_reduce.wgsl"),
);

/// Kernel with the subgroup reduction. Needs `Features::SUBGROUP`.
pub const SUBGROUP_KERNEL_WGSL: &str = concat!(
    include_str!("shaders/common.wgsl"),
    include_str!("shaders/subgroup_reduce.wgsl"),
);

/// WGSL source of a variant.
pub fn kernel_source(strategy: ReductionStrategy) -> &'static str {
    match strategy {
        ReductionStrategy::Workgroup => WORKGROUP_KERNEL_WGSL,
        ReductionStrategy::Subgroup => SUBGROUP_KERNEL_WGSL,
    }
}

/// Compiled sampling pipeline.
pub struct SamplerPipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    strategy: ReductionStrategy,
}

impl SamplerPipeline {
    /// Compile the variant for `strategy`.
    pub fn new(device: &wgpu::Device, strategy: ReductionStrategy) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("MontePi Sampler Shader"),
            source: wgpu::ShaderSource::Wgsl(kernel_source(strategy).into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("MontePi Bind Group Layout"),
            entries: &[
                // Parameter block
                layout_entry(0, wgpu::BufferBindingType::Uniform),
                // Generator state
                layout_entry(1, wgpu::BufferBindingType::Storage { read_only: false }),
                // Result shards
                layout_entry(2, wgpu::BufferBindingType::Storage { read_only: false }),
                // Visualization x / y
                layout_entry(3, wgpu::BufferBindingType::Storage { read_only: false }),
                layout_entry(4, wgpu::BufferBindingType::Storage { read_only: false }),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("MontePi Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("MontePi Sampler Pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        tracing::debug!(strategy = %strategy, "Compiled sampler pipeline");

        Self {
            pipeline,
            bind_group_layout,
            strategy,
        }
    }

    /// Get the pipeline.
    pub fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    /// Reduction variant this pipeline was built from.
    pub fn strategy(&self) -> ReductionStrategy {
        self.strategy
    }

    /// Bind the session's buffers. Created once per session.
    pub fn bind_group(&self, device: &wgpu::Device, buffers: &SamplerBuffers) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("MontePi Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffers.params().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.rng().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffers.results().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: buffers.viz_x().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: buffers.viz_y().as_entire_binding(),
                },
            ],
        })
    }
}

fn layout_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

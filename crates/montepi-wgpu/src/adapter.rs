//! WebGPU adapter negotiation and capability detection.

use std::sync::Arc;

use montepi_core::error::{MontePiError, Result};
use montepi_core::params::{DispatchGeometry, WORKGROUP_SIZE};
use montepi_core::reduction::{ReductionPreference, ReductionStrategy};

/// Narrowest subgroup the subgroup kernel has shared slots for.
const MIN_SUBGROUP_WIDTH: u32 = 4;

/// Adapter requests tried in order until one succeeds.
const ADAPTER_SEQUENCE: [(&str, wgpu::PowerPreference, bool); 3] = [
    ("high-performance", wgpu::PowerPreference::HighPerformance, false),
    ("default", wgpu::PowerPreference::None, false),
    ("software", wgpu::PowerPreference::None, true),
];

/// What the selected adapter can do.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Adapter name.
    pub name: String,
    /// Backend (Vulkan, Metal, DX12, ...).
    pub backend: wgpu::Backend,
    /// Device type (discrete, integrated, CPU, ...).
    pub device_type: wgpu::DeviceType,
    /// Driver description.
    pub driver: String,
    /// Half-precision shader support (required).
    pub shader_f16: bool,
    /// Subgroup operation support in compute shaders.
    pub subgroups: bool,
    /// Smallest subgroup size the device may use.
    pub subgroup_min_size: u32,
    /// Largest subgroup size the device may use.
    pub subgroup_max_size: u32,
    /// Per-dimension workgroup dispatch limit.
    pub max_workgroups_per_dimension: u32,
    /// Largest storage binding in bytes.
    pub max_storage_binding_size: u32,
}

impl Capabilities {
    fn detect(adapter: &wgpu::Adapter) -> Self {
        let info = adapter.get_info();
        let features = adapter.features();
        let limits = adapter.limits();
        Self {
            name: info.name,
            backend: info.backend,
            device_type: info.device_type,
            driver: info.driver,
            shader_f16: features.contains(wgpu::Features::SHADER_F16),
            subgroups: features.contains(wgpu::Features::SUBGROUP),
            subgroup_min_size: limits.min_subgroup_size,
            subgroup_max_size: limits.max_subgroup_size,
            max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
            max_storage_binding_size: limits.max_storage_buffer_binding_size,
        }
    }

    /// Whether the subgroup kernel can run on this device.
    pub fn subgroup_reduction_usable(&self) -> bool {
        self.subgroups
            && self.subgroup_min_size >= MIN_SUBGROUP_WIDTH
            && self.subgroup_max_size <= WORKGROUP_SIZE
    }

    /// Check `geometry` against the dispatch and storage limits.
    ///
    /// Call before allocating the generator state for it.
    pub fn check_geometry(&self, geometry: DispatchGeometry) -> Result<()> {
        geometry.validate()?;
        if geometry.groups_x > self.max_workgroups_per_dimension
            || geometry.groups_y > self.max_workgroups_per_dimension
        {
            return Err(MontePiError::InvalidParameter(format!(
                "geometry {}x{} exceeds the device limit of {} groups per dimension",
                geometry.groups_x, geometry.groups_y, self.max_workgroups_per_dimension
            )));
        }
        if geometry.rng_state_bytes() > self.max_storage_binding_size as u64 {
            return Err(MontePiError::InvalidParameter(format!(
                "RNG state of {} bytes exceeds the device storage binding limit of {}",
                geometry.rng_state_bytes(),
                self.max_storage_binding_size
            )));
        }
        Ok(())
    }

    /// Resolve a preference into the kernel variant to build.
    pub fn select_strategy(&self, preference: ReductionPreference) -> Result<ReductionStrategy> {
        match preference {
            ReductionPreference::Workgroup => Ok(ReductionStrategy::Workgroup),
            ReductionPreference::Auto if self.subgroup_reduction_usable() => {
                Ok(ReductionStrategy::Subgroup)
            }
            ReductionPreference::Auto => Ok(ReductionStrategy::Workgroup),
            ReductionPreference::Subgroup if self.subgroup_reduction_usable() => {
                Ok(ReductionStrategy::Subgroup)
            }
            ReductionPreference::Subgroup => Err(MontePiError::MissingFeature(format!(
                "SUBGROUP with sizes {}..={} (adapter reports supported={}, sizes {}..={})",
                MIN_SUBGROUP_WIDTH,
                WORKGROUP_SIZE,
                self.subgroups,
                self.subgroup_min_size,
                self.subgroup_max_size
            ))),
        }
    }
}

/// Instance, adapter, device and queue of one session.
pub struct GpuContext {
    /// The wgpu instance the adapter was enumerated from.
    instance: wgpu::Instance,
    /// The selected adapter.
    adapter: wgpu::Adapter,
    /// The device.
    device: Arc<wgpu::Device>,
    /// The command queue.
    queue: Arc<wgpu::Queue>,
    /// Detected capabilities.
    capabilities: Capabilities,
}

impl GpuContext {
    /// Acquire the strongest available adapter and create a device.
    ///
    /// Fails with [`MontePiError::NoAdapter`] when every request in the
    /// fallback sequence fails, and with [`MontePiError::MissingFeature`] when
    /// the adapter cannot do half-precision storage.
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = acquire_adapter(&instance).await?;
        let capabilities = Capabilities::detect(&adapter);

        if !capabilities.shader_f16 {
            return Err(MontePiError::MissingFeature(format!(
                "SHADER_F16 (adapter '{}' on {:?})",
                capabilities.name, capabilities.backend
            )));
        }

        let mut required_features = wgpu::Features::SHADER_F16;
        if capabilities.subgroups {
            required_features |= wgpu::Features::SUBGROUP;
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("MontePi Device"),
                required_features,
                required_limits: adapter.limits(),
                ..Default::default()
            })
            .await
            .map_err(|e| MontePiError::DeviceRequest(e.to_string()))?;

        tracing::info!(
            adapter = %capabilities.name,
            backend = ?capabilities.backend,
            device_type = ?capabilities.device_type,
            subgroups = capabilities.subgroups,
            subgroup_min = capabilities.subgroup_min_size,
            subgroup_max = capabilities.subgroup_max_size,
            "Created WebGPU device"
        );

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            capabilities,
        })
    }

    /// Detected capabilities.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Get the wgpu instance.
    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    /// Get the selected adapter.
    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    /// Get the wgpu device.
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// Get the command queue.
    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Block until all submitted work has retired.
    pub fn wait_idle(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| MontePiError::Device(e.to_string()))
    }

    /// Drive callbacks without blocking.
    pub fn poll(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Poll)
            .map(|_| ())
            .map_err(|e| MontePiError::Device(e.to_string()))
    }
}

async fn acquire_adapter(instance: &wgpu::Instance) -> Result<wgpu::Adapter> {
    for (attempt, power_preference, force_fallback_adapter) in ADAPTER_SEQUENCE {
        match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter,
            })
            .await
        {
            Ok(adapter) => {
                tracing::info!(attempt, adapter = %adapter.get_info().name, "Acquired adapter");
                return Ok(adapter);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Adapter request failed");
            }
        }
    }
    Err(MontePiError::NoAdapter {
        attempts: ADAPTER_SEQUENCE.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(subgroups: bool, min: u32, max: u32) -> Capabilities {
        Capabilities {
            name: "test".to_string(),
            backend: wgpu::Backend::Vulkan,
            device_type: wgpu::DeviceType::DiscreteGpu,
            driver: String::new(),
            shader_f16: true,
            subgroups,
            subgroup_min_size: min,
            subgroup_max_size: max,
            max_workgroups_per_dimension: 65535,
            max_storage_binding_size: 1 << 27,
        }
    }

    #[test]
    fn test_strategy_selection() {
        let with = caps(true, 32, 32);
        let without = caps(false, 0, 0);

        assert_eq!(
            with.select_strategy(ReductionPreference::Auto).unwrap(),
            ReductionStrategy::Subgroup
        );
        assert_eq!(
            without.select_strategy(ReductionPreference::Auto).unwrap(),
            ReductionStrategy::Workgroup
        );
        assert_eq!(
            with.select_strategy(ReductionPreference::Workgroup).unwrap(),
            ReductionStrategy::Workgroup
        );
        assert!(matches!(
            without.select_strategy(ReductionPreference::Subgroup),
            Err(MontePiError::MissingFeature(_))
        ));
    }

    #[test]
    fn test_narrow_subgroups_fall_back() {
        let narrow = caps(true, 1, 64);
        assert!(!narrow.subgroup_reduction_usable());
        assert_eq!(
            narrow.select_strategy(ReductionPreference::Auto).unwrap(),
            ReductionStrategy::Workgroup
        );
    }

    #[test]
    fn test_geometry_limits() {
        let caps = caps(false, 0, 0);
        assert!(caps.check_geometry(DispatchGeometry::default()).is_ok());

        // 1 << 27 bytes of storage holds 2^21 lanes of 64 bytes.
        let at_limit = DispatchGeometry::new(8192, 1).unwrap();
        assert!(caps.check_geometry(at_limit).is_ok());
        let too_big = DispatchGeometry::new(8193, 1).unwrap();
        assert!(matches!(
            caps.check_geometry(too_big),
            Err(MontePiError::InvalidParameter(_))
        ));

        let overflowing = DispatchGeometry {
            groups_x: 65535,
            groups_y: 300,
        };
        assert!(caps.check_geometry(overflowing).is_err());
    }

    #[tokio::test]
    #[ignore] // May not have GPU in CI
    async fn test_context_creation() {
        let context = GpuContext::new().await.unwrap();
        assert!(context.capabilities().shader_f16);
        assert_eq!(context.adapter().get_info().name, context.capabilities().name);
        assert!(context
            .adapter()
            .features()
            .contains(wgpu::Features::SHADER_F16));
        context.wait_idle().unwrap();
    }
}

use raster_protocol::{Bitmap, IntSize, RasterBackendKind, ResourceFormat};

use crate::backend::{BackendError, BackingStore, RasterBackend, swap_red_blue};

/// One texture per resource; uploads go through `Queue::write_texture`.
#[derive(Debug)]
pub struct GpuRasterBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuRasterBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }

    /// Picks the default adapter and opens a device on it.
    pub fn request_default() -> Result<Self, BackendError> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .map_err(|error| BackendError::Driver(format!("request adapter: {error}")))?;
            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("resource_provider.raster"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    experimental_features: wgpu::ExperimentalFeatures::disabled(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    trace: wgpu::Trace::Off,
                })
                .await
                .map_err(|error| BackendError::Driver(format!("request device: {error}")))?;
            Ok(Self::new(device, queue))
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn texture_format(format: ResourceFormat) -> wgpu::TextureFormat {
        match format {
            ResourceFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            ResourceFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
        }
    }

    fn extent(size: IntSize) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: size.width as u32,
            height: size.height as u32,
            depth_or_array_layers: 1,
        }
    }
}

impl RasterBackend for GpuRasterBackend {
    fn kind(&self) -> RasterBackendKind {
        RasterBackendKind::Gpu
    }

    fn allocate(
        &mut self,
        size: IntSize,
        format: ResourceFormat,
    ) -> Result<BackingStore, BackendError> {
        let limit = self.device.limits().max_texture_dimension_2d;
        if size.is_empty() || size.width as u32 > limit || size.height as u32 > limit {
            return Err(BackendError::AllocationFailed {
                width: size.width,
                height: size.height,
                format,
            });
        }
        let error_scope = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("resource_provider.tile"),
            size: Self::extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::texture_format(format),
            usage: wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(error_scope.pop()) {
            return Err(BackendError::Driver(error.to_string()));
        }
        Ok(BackingStore::Gpu { texture })
    }

    fn upload(
        &mut self,
        store: &mut BackingStore,
        size: IntSize,
        format: ResourceFormat,
        bitmap: &Bitmap,
    ) -> Result<(), BackendError> {
        let BackingStore::Gpu { texture } = store else {
            return Err(BackendError::ForeignStore);
        };
        let mut bytes = bitmap.pixels().to_vec();
        if format == ResourceFormat::Bgra8 {
            swap_red_blue(&mut bytes);
        }

        let error_scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(size.width as u32 * 4),
                rows_per_image: Some(size.height as u32),
            },
            Self::extent(size),
        );
        match pollster::block_on(error_scope.pop()) {
            Some(error) => Err(BackendError::Driver(error.to_string())),
            None => Ok(()),
        }
    }
}

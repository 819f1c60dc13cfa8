use raster_protocol::{Bitmap, IntSize, RasterBackendKind, ResourceFormat};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend cannot allocate {width}x{height} {format:?}")]
    AllocationFailed {
        width: i32,
        height: i32,
        format: ResourceFormat,
    },
    #[error("driver error: {0}")]
    Driver(String),
    #[error("backing store belongs to a different backend")]
    ForeignStore,
}

/// Backend-owned pixel storage behind a resource handle.
#[derive(Debug)]
pub enum BackingStore {
    Software { pixels: Vec<u8> },
    #[cfg(feature = "gpu")]
    Gpu { texture: wgpu::Texture },
}

/// Allocate/upload contract shared by the software and GPU paths. The
/// scheduler only ever talks to this trait.
pub trait RasterBackend: Send {
    fn kind(&self) -> RasterBackendKind;

    fn allocate(
        &mut self,
        size: IntSize,
        format: ResourceFormat,
    ) -> Result<BackingStore, BackendError>;

    fn upload(
        &mut self,
        store: &mut BackingStore,
        size: IntSize,
        format: ResourceFormat,
        bitmap: &Bitmap,
    ) -> Result<(), BackendError>;
}

#[derive(Debug, Default)]
pub struct SoftwareBackend;

impl RasterBackend for SoftwareBackend {
    fn kind(&self) -> RasterBackendKind {
        RasterBackendKind::Software
    }

    fn allocate(
        &mut self,
        size: IntSize,
        format: ResourceFormat,
    ) -> Result<BackingStore, BackendError> {
        let bytes = usize::try_from(format.bytes_for(size)).map_err(|_| {
            BackendError::AllocationFailed {
                width: size.width,
                height: size.height,
                format,
            }
        })?;
        Ok(BackingStore::Software {
            pixels: vec![0; bytes],
        })
    }

    fn upload(
        &mut self,
        store: &mut BackingStore,
        _size: IntSize,
        format: ResourceFormat,
        bitmap: &Bitmap,
    ) -> Result<(), BackendError> {
        match store {
            BackingStore::Software { pixels } => {
                pixels.copy_from_slice(bitmap.pixels());
                if format == ResourceFormat::Bgra8 {
                    swap_red_blue(pixels);
                }
                Ok(())
            }
            #[cfg(feature = "gpu")]
            BackingStore::Gpu { .. } => Err(BackendError::ForeignStore),
        }
    }
}

/// RGBA8 <-> BGRA8, in place.
pub fn swap_red_blue(pixels: &mut [u8]) {
    for texel in pixels.chunks_exact_mut(4) {
        texel.swap(0, 2);
    }
}

impl BackingStore {
    /// Pixels as RGBA8 when the store lives in CPU memory.
    pub fn read_rgba8(&self, format: ResourceFormat) -> Option<Vec<u8>> {
        match self {
            BackingStore::Software { pixels } => {
                let mut rgba = pixels.clone();
                if format == ResourceFormat::Bgra8 {
                    swap_red_blue(&mut rgba);
                }
                Some(rgba)
            }
            #[cfg(feature = "gpu")]
            BackingStore::Gpu { .. } => None,
        }
    }
}

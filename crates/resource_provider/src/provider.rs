use raster_protocol::{Bitmap, IntSize, RasterBackendKind, ResourceFormat, ResourceId};
use slotmap::SlotMap;

use crate::backend::{BackingStore, RasterBackend, SoftwareBackend};
use crate::budget::MemoryBudget;
use crate::ResourceError;

/// Who is holding a resource alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    ActiveTree,
    PendingTree,
    InFlightRaster,
}

/// Which backend should serve an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendChoice {
    Preferred,
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct RefCounts {
    active: u32,
    pending: u32,
    in_flight: u32,
}

impl RefCounts {
    fn slot(&mut self, kind: ResourceRef) -> &mut u32 {
        match kind {
            ResourceRef::ActiveTree => &mut self.active,
            ResourceRef::PendingTree => &mut self.pending,
            ResourceRef::InFlightRaster => &mut self.in_flight,
        }
    }

    fn is_zero(&self) -> bool {
        self.active == 0 && self.pending == 0 && self.in_flight == 0
    }
}

#[derive(Debug)]
struct Resource {
    size: IntSize,
    format: ResourceFormat,
    bytes: u64,
    backend: RasterBackendKind,
    store: BackingStore,
    refs: RefCounts,
    lock_count: u32,
    free_requested: bool,
    uploaded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceInfo {
    pub size: IntSize,
    pub format: ResourceFormat,
    pub bytes: u64,
    pub backend: RasterBackendKind,
    pub locked: bool,
    pub uploaded: bool,
}

/// Sole owner of tile pixel storage. Tiles refer to entries by
/// [`ResourceId`]; entries go away when every reference is released and
/// no reader holds a lock.
pub struct ResourceProvider {
    resources: SlotMap<ResourceId, Resource>,
    preferred: Box<dyn RasterBackend>,
    software: SoftwareBackend,
    format: ResourceFormat,
}

impl std::fmt::Debug for ResourceProvider {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ResourceProvider")
            .field("resources", &self.resources.len())
            .field("preferred", &self.preferred.kind())
            .field("format", &self.format)
            .finish()
    }
}

impl ResourceProvider {
    pub fn new(preferred: Box<dyn RasterBackend>, format: ResourceFormat) -> Self {
        Self {
            resources: SlotMap::with_key(),
            preferred,
            software: SoftwareBackend,
            format,
        }
    }

    pub fn software(format: ResourceFormat) -> Self {
        Self::new(Box::new(SoftwareBackend), format)
    }

    pub fn format(&self) -> ResourceFormat {
        self.format
    }

    pub fn preferred_backend(&self) -> RasterBackendKind {
        self.preferred.kind()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn info(&self, id: ResourceId) -> Option<ResourceInfo> {
        self.resources.get(id).map(|resource| ResourceInfo {
            size: resource.size,
            format: resource.format,
            bytes: resource.bytes,
            backend: resource.backend,
            locked: resource.lock_count > 0,
            uploaded: resource.uploaded,
        })
    }

    /// Reserves budget and backing storage for a new raster target. The
    /// result starts with one in-flight reference.
    pub fn allocate(
        &mut self,
        budget: &mut MemoryBudget,
        size: IntSize,
        choice: BackendChoice,
    ) -> Result<ResourceId, ResourceError> {
        let format = self.format;
        let bytes = format.bytes_for(size);
        budget.reserve(bytes)?;

        let backend: &mut dyn RasterBackend = match choice {
            BackendChoice::Preferred => self.preferred.as_mut(),
            BackendChoice::Software => &mut self.software,
        };
        let kind = backend.kind();
        let store = match backend.allocate(size, format) {
            Ok(store) => store,
            Err(error) => {
                budget.release(bytes);
                return Err(ResourceError::DriverFailure(error.to_string()));
            }
        };

        let id = self.resources.insert(Resource {
            size,
            format,
            bytes,
            backend: kind,
            store,
            refs: RefCounts {
                in_flight: 1,
                ..RefCounts::default()
            },
            lock_count: 0,
            free_requested: false,
            uploaded: false,
        });
        tracing::trace!(?id, bytes, backend = ?kind, "resource allocated");
        Ok(id)
    }

    /// Copies finished raster output into the resource.
    pub fn upload(&mut self, id: ResourceId, bitmap: &Bitmap) -> Result<(), ResourceError> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or(ResourceError::UnknownResource)?;
        if bitmap.size() != resource.size {
            return Err(ResourceError::SizeMismatch {
                expected: resource.size,
                actual: bitmap.size(),
            });
        }
        assert!(
            resource.lock_count == 0,
            "upload into locked resource {id:?}; raster must target a fresh resource"
        );
        let backend: &mut dyn RasterBackend = match resource.backend {
            RasterBackendKind::Software => &mut self.software,
            _ => self.preferred.as_mut(),
        };
        backend
            .upload(&mut resource.store, resource.size, resource.format, bitmap)
            .map_err(|error| ResourceError::DriverFailure(error.to_string()))?;
        resource.uploaded = true;
        Ok(())
    }

    pub fn add_ref(&mut self, id: ResourceId, kind: ResourceRef) -> Result<(), ResourceError> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or(ResourceError::UnknownResource)?;
        *resource.refs.slot(kind) += 1;
        Ok(())
    }

    /// Drops one reference of `kind`. The resource is freed once nothing
    /// references it, or when the last lock goes away.
    pub fn release_ref(
        &mut self,
        budget: &mut MemoryBudget,
        id: ResourceId,
        kind: ResourceRef,
    ) -> Result<(), ResourceError> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or(ResourceError::UnknownResource)?;
        let count = resource.refs.slot(kind);
        assert!(*count > 0, "release of unheld {kind:?} reference on {id:?}");
        *count -= 1;
        if resource.refs.is_zero() {
            self.free(budget, id)?;
        }
        Ok(())
    }

    /// Frees now, or as soon as the last reader unlocks.
    pub fn free(&mut self, budget: &mut MemoryBudget, id: ResourceId) -> Result<(), ResourceError> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or(ResourceError::UnknownResource)?;
        if resource.lock_count > 0 {
            resource.free_requested = true;
            tracing::trace!(?id, "resource free deferred while locked");
            return Ok(());
        }
        self.remove(budget, id);
        Ok(())
    }

    /// Pins the resource for reading. Locks nest.
    pub fn lock(&mut self, id: ResourceId) -> Result<&BackingStore, ResourceError> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or(ResourceError::UnknownResource)?;
        resource.lock_count += 1;
        Ok(&resource.store)
    }

    pub fn unlock(
        &mut self,
        budget: &mut MemoryBudget,
        id: ResourceId,
    ) -> Result<(), ResourceError> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or(ResourceError::UnknownResource)?;
        assert!(resource.lock_count > 0, "unlock of unlocked resource {id:?}");
        resource.lock_count -= 1;
        if resource.lock_count == 0 && resource.free_requested {
            self.remove(budget, id);
        }
        Ok(())
    }

    /// Storage of a live resource. Readers that outlive the current frame
    /// should [`Self::lock`] it first.
    pub fn store(&self, id: ResourceId) -> Option<&BackingStore> {
        self.resources.get(id).map(|resource| &resource.store)
    }

    pub fn is_locked(&self, id: ResourceId) -> bool {
        self.resources
            .get(id)
            .is_some_and(|resource| resource.lock_count > 0)
    }

    /// Pixels of a CPU-resident resource as RGBA8.
    pub fn read_rgba8(&self, id: ResourceId) -> Option<Vec<u8>> {
        let resource = self.resources.get(id)?;
        resource.store.read_rgba8(resource.format)
    }

    fn remove(&mut self, budget: &mut MemoryBudget, id: ResourceId) {
        if let Some(resource) = self.resources.remove(id) {
            budget.release(resource.bytes);
            tracing::trace!(?id, bytes = resource.bytes, "resource freed");
        }
    }
}

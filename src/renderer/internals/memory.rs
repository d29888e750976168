use std::ptr::NonNull;
use ash::vk;
use color_eyre::Result;
use serde::{Deserialize, Serialize};

/// Classification of the pools device memory is sub-allocated from.
///
/// The first three variants form the static range: allocations made from them
/// live as long as the resource and may be kept when the resource is
/// re-created with compatible requirements.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum MemoryPoolType {
    StaticImages,
    StaticBuffers,
    StaticStagingBuffers,
    ResolutionDependentImages,
    ResolutionDependentBuffers,
    VolatileStagingBuffers,
}

impl MemoryPoolType {
    pub const ALL: &'static [Self] = &[
        Self::StaticImages,
        Self::StaticBuffers,
        Self::StaticStagingBuffers,
        Self::ResolutionDependentImages,
        Self::ResolutionDependentBuffers,
        Self::VolatileStagingBuffers,
    ];

    pub fn is_static(self) -> bool {
        matches!(
            self,
            Self::StaticImages | Self::StaticBuffers | Self::StaticStagingBuffers
        )
    }

    pub fn is_host_visible(self) -> bool {
        matches!(self, Self::StaticStagingBuffers | Self::VolatileStagingBuffers)
    }
}

/// A byte range handed out by a [`GpuMemoryManager`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpuMemoryAllocation {
    pub memory: vk::DeviceMemory,
    pub offset: vk::DeviceSize,
    pub size_in_bytes: vk::DeviceSize,
    pub alignment_in_bytes: vk::DeviceSize,
    pub memory_pool_type: MemoryPoolType,
    pub memory_type_bits: u32,
    /// Buffers and linear-tiled images. Never shares a block with optimal images.
    pub linear: bool,
    pub mapped_memory: Option<NonNull<u8>>,
}

pub trait GpuMemoryManager {
    fn allocate_offset(
        &mut self,
        pool: MemoryPoolType,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
        memory_type_bits: u32,
        linear: bool,
    ) -> Result<GpuMemoryAllocation>;

    /// Bulk-frees every allocation made from `pool`.
    fn reset_pool(&mut self, pool: MemoryPoolType);
}

/// Returns true when `existing` can back a resource with `requirements`
/// without asking the pool allocator for fresh memory.
pub fn can_reuse_allocation(
    existing: &GpuMemoryAllocation,
    pool: MemoryPoolType,
    requirements: &vk::MemoryRequirements,
    linear: bool,
) -> bool {
    pool.is_static()
        && existing.memory_pool_type == pool
        && existing.size_in_bytes >= requirements.size
        && existing.alignment_in_bytes == requirements.alignment
        && existing.memory_type_bits == requirements.memory_type_bits
        && existing.linear == linear
}

/// Static allocations whose resources were forgotten. The pool allocator only
/// reclaims memory in bulk, so these are handed to the next compatible
/// resource instead.
#[derive(Default)]
pub struct RetiredAllocations {
    allocations: Vec<GpuMemoryAllocation>,
}

impl RetiredAllocations {
    pub fn retire(&mut self, allocation: GpuMemoryAllocation) {
        if allocation.memory_pool_type.is_static() {
            self.allocations.push(allocation);
        }
    }

    /// Takes the smallest retired allocation that fits `requirements`.
    pub fn take(
        &mut self,
        pool: MemoryPoolType,
        requirements: &vk::MemoryRequirements,
        linear: bool,
    ) -> Option<GpuMemoryAllocation> {
        let index = self.allocations
            .iter()
            .enumerate()
            .filter(|(_, a)| can_reuse_allocation(a, pool, requirements, linear))
            .min_by_key(|(_, a)| a.size_in_bytes)
            .map(|(index, _)| index)?;
        Some(self.allocations.swap_remove(index))
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}

/// Keeps `allocation` if it is reusable for `requirements`, otherwise replaces
/// it with a fresh allocation from `pool`.
pub fn allocate_memory(
    allocation: &mut Option<GpuMemoryAllocation>,
    pool: MemoryPoolType,
    requirements: &vk::MemoryRequirements,
    linear: bool,
    memory: &mut dyn GpuMemoryManager,
) -> Result<GpuMemoryAllocation> {
    if let Some(existing) = allocation.as_ref() {
        if can_reuse_allocation(existing, pool, requirements, linear) {
            log::trace!(
                "Reusing {} byte allocation from {:?}",
                existing.size_in_bytes,
                pool
            );
            return Ok(*existing);
        }
    }

    let fresh = memory.allocate_offset(
        pool,
        requirements.size,
        requirements.alignment,
        requirements.memory_type_bits,
        linear,
    )?;
    *allocation = Some(fresh);
    Ok(fresh)
}

pub fn align_up(value: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

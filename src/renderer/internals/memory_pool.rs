use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{bail, eyre};
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use crate::renderer::config::MemoryPoolSizes;
use crate::renderer::internals::memory::{
    align_up, GpuMemoryAllocation, GpuMemoryManager, MemoryPoolType,
};

/// Pool, memory-type mask and whether the block holds linear resources.
type BlockKey = (MemoryPoolType, u32, bool);

struct PoolBlock {
    allocation: Allocation,
    cursor: vk::DeviceSize,
}

/// Linear sub-allocator on top of `gpu-allocator`.
///
/// Each pool owns one block per distinct memory-type mask it was asked for,
/// with linear and optimal resources kept in separate blocks so they never
/// share a `bufferImageGranularity` page.
/// Offsets are bumped forward and only handed back in bulk through
/// [`GpuMemoryManager::reset_pool`].
pub struct PooledMemoryManager {
    blocks: HashMap<BlockKey, PoolBlock>,
    pool_sizes: MemoryPoolSizes,
    memory_allocator: Arc<Mutex<Allocator>>,
}

impl PooledMemoryManager {
    pub fn new(
        pool_sizes: MemoryPoolSizes,
        memory_allocator: Arc<Mutex<Allocator>>,
    ) -> Self {
        Self {
            blocks: HashMap::new(),
            pool_sizes,
            memory_allocator,
        }
    }

    fn create_block(
        &self,
        pool: MemoryPoolType,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
        memory_type_bits: u32,
        linear: bool,
    ) -> Result<PoolBlock> {
        let block_size = self.pool_sizes.size_of(pool).max(size);
        let location = if pool.is_host_visible() {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };
        let name = format!("{:?} pool block", pool);

        let allocation = self.memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name: &name,
                requirements: vk::MemoryRequirements {
                    size: block_size,
                    alignment,
                    memory_type_bits,
                },
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?;

        log::info!(
            "Allocated {} MiB {} block for {:?} (type bits {:#b})",
            block_size / (1024 * 1024),
            if linear { "linear" } else { "optimal" },
            pool,
            memory_type_bits
        );

        Ok(PoolBlock {
            allocation,
            cursor: 0,
        })
    }

    /// Frees every block back to `gpu-allocator`. Must run before the device
    /// is destroyed.
    pub fn destroy(&mut self) -> Result<()> {
        let mut allocator = self.memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?;
        for (_, block) in self.blocks.drain() {
            allocator.free(block.allocation)?;
        }
        Ok(())
    }
}

impl GpuMemoryManager for PooledMemoryManager {
    fn allocate_offset(
        &mut self,
        pool: MemoryPoolType,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
        memory_type_bits: u32,
        linear: bool,
    ) -> Result<GpuMemoryAllocation> {
        let key = (pool, memory_type_bits, linear);
        if !self.blocks.contains_key(&key) {
            let block = self.create_block(pool, size, alignment, memory_type_bits, linear)?;
            self.blocks.insert(key, block);
        }
        let block = self.blocks
            .get_mut(&key)
            .ok_or_else(|| eyre!("Missing memory block for {:?}", pool))?;

        // Keep the absolute device offset aligned, not just the block-relative one
        let base = block.allocation.offset();
        let offset = align_up(base + block.cursor, alignment) - base;
        if offset + size > block.allocation.size() {
            bail!(
                "{:?} pool exhausted: requested {} bytes at offset {}, capacity {}",
                pool,
                size,
                offset,
                block.allocation.size()
            );
        }
        block.cursor = offset + size;

        let mapped_memory = block.allocation
            .mapped_ptr()
            .map(|ptr| unsafe {
                NonNull::new_unchecked(ptr.cast::<u8>().as_ptr().add(offset as usize))
            });

        Ok(GpuMemoryAllocation {
            memory: unsafe { block.allocation.memory() },
            offset: base + offset,
            size_in_bytes: size,
            alignment_in_bytes: alignment,
            memory_pool_type: pool,
            memory_type_bits,
            linear,
            mapped_memory,
        })
    }

    fn reset_pool(&mut self, pool: MemoryPoolType) {
        for ((block_pool, _, _), block) in self.blocks.iter_mut() {
            if *block_pool == pool {
                block.cursor = 0;
            }
        }
    }
}

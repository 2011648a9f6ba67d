//! GPU buffers with dedicated memory
//!
//! Every buffer gets its own allocation; there is no sub-allocation.

use ash::{vk, Device};
use bytemuck::Pod;

use crate::render::backends::vulkan::{DeviceContext, VulkanError, VulkanResult};

/// First memory type, in ascending index order, allowed by `type_bits` with all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    let count = (memory_properties.memory_type_count as usize).min(memory_properties.memory_types.len());

    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(index, _)| index as u32)
        .ok_or(VulkanError::NoSuitableMemoryType { type_bits, properties })
}

/// Allocate and bind dedicated memory for `requirements`
pub(crate) fn allocate_memory(
    context: &DeviceContext,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<vk::DeviceMemory> {
    let memory_type_index = context.find_memory_type(requirements.memory_type_bits, properties)?;
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe { context.device().allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
}

/// Buffer handle plus its dedicated memory
pub struct GpuBuffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    properties: vk::MemoryPropertyFlags,
}

impl GpuBuffer {
    /// Create a buffer of `size` bytes backed by memory with `properties`
    pub fn new(
        context: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot create a zero-sized buffer".to_string(),
            });
        }

        let device = context.device().clone();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None).map_err(VulkanError::Api)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = match allocate_memory(context, requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let gpu_buffer = Self {
            device,
            buffer,
            memory,
            size,
            properties,
        };

        unsafe {
            gpu_buffer
                .device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        Ok(gpu_buffer)
    }

    /// Create a host-visible, host-coherent buffer
    pub fn host_visible(context: &DeviceContext, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        Self::new(
            context,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Copy `bytes` to the start of the buffer through a temporary mapping
    pub fn write_bytes(&self, bytes: &[u8]) -> VulkanResult<()> {
        self.check_host_access(bytes.len())?;

        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Copy a slice of plain data to the start of the buffer
    pub fn write_slice<T: Pod>(&self, data: &[T]) -> VulkanResult<()> {
        self.write_bytes(bytemuck::cast_slice(data))
    }

    /// Copy the whole buffer back to host memory
    pub fn read_bytes(&self) -> VulkanResult<Vec<u8>> {
        let len = self.size as usize;
        self.check_host_access(len)?;

        let mut bytes = vec![0_u8; len];
        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), bytes.as_mut_ptr(), len);
            self.device.unmap_memory(self.memory);
        }
        Ok(bytes)
    }

    fn check_host_access(&self, len: usize) -> VulkanResult<()> {
        if !self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(VulkanError::InvalidOperation {
                reason: "Buffer memory is not host visible".to_string(),
            });
        }
        if len as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{len} bytes do not fit in a {}-byte buffer", self.size),
            });
        }
        Ok(())
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes as requested at creation
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in properties.memory_types.iter_mut().zip(flags) {
            *slot = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        properties
    }

    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    #[test]
    fn test_picks_first_matching_type_in_ascending_order() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, HOST, HOST]);
        assert_eq!(find_memory_type(&props, 0b111, HOST).unwrap(), 1);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn test_respects_type_bits() {
        let props = memory_properties(&[HOST, HOST, HOST]);
        assert_eq!(find_memory_type(&props, 0b100, HOST).unwrap(), 2);
    }

    #[test]
    fn test_requires_superset_of_properties() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            HOST | vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(find_memory_type(&props, 0b11, HOST).unwrap(), 1);
    }

    #[test]
    fn test_no_match_is_an_error() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b1, HOST).unwrap_err();
        assert!(matches!(err, VulkanError::NoSuitableMemoryType { type_bits: 0b1, .. }));

        // Bits beyond the reported type count are ignored.
        assert!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::empty()).is_err());
    }
}

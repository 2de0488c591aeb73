//! Per-session device memory.

use std::collections::BTreeMap;
use xrt_core::HostValue;
use xrt_rpc::BufferHandle;

fn value_bytes(value: &HostValue) -> usize {
    match value {
        HostValue::Tensor(lit) => lit.data().len(),
        HostValue::Tuple(elements) => elements.iter().map(value_bytes).sum(),
    }
}

/// Buffers owned by one session, keyed by handle. Handles are never reused.
#[derive(Debug, Default)]
pub struct DeviceMemory {
    buffers: BTreeMap<BufferHandle, HostValue>,
    next_handle: u64,
    bytes_in_use: usize,
}

impl DeviceMemory {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            ..Self::default()
        }
    }

    pub fn allocate(&mut self, value: HostValue) -> BufferHandle {
        let handle = BufferHandle(self.next_handle.max(1));
        self.next_handle = handle.0 + 1;
        self.bytes_in_use += value_bytes(&value);
        self.buffers.insert(handle, value);
        handle
    }

    pub fn get(&self, handle: BufferHandle) -> Option<&HostValue> {
        self.buffers.get(&handle)
    }

    /// Returns false if the handle was not live.
    pub fn release(&mut self, handle: BufferHandle) -> bool {
        match self.buffers.remove(&handle) {
            Some(value) => {
                self.bytes_in_use -= value_bytes(&value);
                true
            },
            None => false,
        }
    }

    /// Release everything, returning how many buffers were live.
    pub fn clear(&mut self) -> usize {
        let count = self.buffers.len();
        self.buffers.clear();
        self.bytes_in_use = 0;
        count
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn bytes_in_use(&self) -> usize {
        self.bytes_in_use
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrt_core::Literal;

    #[test]
    fn test_allocate_and_release() {
        let mut memory = DeviceMemory::new();
        let a = memory.allocate(Literal::vec1(&[1f32, 2.0]).into());
        let b = memory.allocate(HostValue::tuple(vec![Literal::scalar(1i64).into()]));
        assert_ne!(a, b);
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.bytes_in_use(), 16);

        assert!(memory.release(a));
        assert!(!memory.release(a));
        assert_eq!(memory.bytes_in_use(), 8);
        assert!(memory.get(a).is_none());
        assert!(memory.get(b).is_some());
    }

    #[test]
    fn test_handles_are_not_reused() {
        let mut memory = DeviceMemory::new();
        let a = memory.allocate(Literal::scalar(0f32).into());
        memory.release(a);
        let b = memory.allocate(Literal::scalar(0f32).into());
        assert!(b.0 > a.0);
        assert_eq!(memory.clear(), 1);
        assert!(memory.is_empty());
    }
}

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

/// One accelerator group and the port its server instance listens on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slot {
    /// Zero-based slot index on the node.
    pub index: u32,
    /// Accelerator indices owned exclusively by this slot, ascending and contiguous.
    pub accelerators: Vec<u32>,
    pub port: u16,
}

impl Slot {
    /// Value for `CUDA_VISIBLE_DEVICES`, e.g. `"2,3"`.
    pub fn visible_devices(&self) -> String {
        let devs: Vec<String> = self.accelerators.iter().map(|i| i.to_string()).collect();
        devs.join(",")
    }

    pub fn tensor_parallel_size(&self) -> u32 {
        self.accelerators.len() as u32
    }
}

/// The slots that fit on a single node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeAllocation {
    pub accelerators_per_node: u32,
    pub accelerators_per_instance: u32,
    pub start_port: u16,
    pub slots: Vec<Slot>,
}

impl NodeAllocation {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ports(&self) -> Vec<u16> {
        self.slots.iter().map(|s| s.port).collect()
    }

    /// Accelerators left over when the per-instance count does not divide the node's count.
    pub fn unused_accelerators(&self) -> Vec<u32> {
        let used = self.slots.len() as u32 * self.accelerators_per_instance;
        (used..self.accelerators_per_node).collect()
    }
}

/// Partition `accelerators_per_node` into `floor(A / P)` equal contiguous groups and give
/// each one a port, counting up from `start_port`.
///
/// Trailing accelerators that do not fill a whole group are never assigned. A zero
/// `accelerators_per_instance` is treated as 1; rejecting it is the caller's job.
pub fn allocate(
    accelerators_per_node: u32,
    accelerators_per_instance: u32,
    start_port: u16,
) -> Result<NodeAllocation> {
    let per_instance = accelerators_per_instance.max(1);
    let count = accelerators_per_node / per_instance;

    if count > 0 && u32::from(start_port) + (count - 1) > u32::from(u16::MAX) {
        return Err(FleetError::PortOverflow {
            start: start_port,
            count,
        });
    }

    let slots = (0..count)
        .map(|i| Slot {
            index: i,
            accelerators: (i * per_instance..(i + 1) * per_instance).collect(),
            port: start_port + i as u16,
        })
        .collect();

    Ok(NodeAllocation {
        accelerators_per_node,
        accelerators_per_instance: per_instance,
        start_port,
        slots,
    })
}

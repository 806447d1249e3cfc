// Physical devices and queue planning
//
// Responsibilities:
// - Snapshot of what a physical device offers (queues, extensions, layers)
// - Primary device selection (first discrete GPU)
// - Mapping requested queue operations onto queue families

use ash::vk;
use std::collections::BTreeSet;

use crate::error::DeviceCreationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamily {
    pub index: u32,
    pub flags: vk::QueueFlags,
    pub count: u32,
}

/// Everything the engine needs to know about a GPU, queried once.
#[derive(Clone, Debug)]
pub struct PhysicalDevice {
    pub raw: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub queue_families: Vec<QueueFamily>,
    pub extensions: BTreeSet<String>,
    pub layers: BTreeSet<String>,
}

impl PhysicalDevice {
    pub fn is_discrete(&self) -> bool {
        self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }
}

/// Get first discrete GPU we find.
pub fn select_primary_device(
    devices: &[PhysicalDevice],
) -> Result<&PhysicalDevice, DeviceCreationError> {
    devices
        .iter()
        .find(|device| device.is_discrete())
        .ok_or(DeviceCreationError::NoDiscreteGpu)
}

/// Queue serving one requested operation combination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueAssignment {
    pub operation: vk::QueueFlags,
    pub family: u32,
    pub index: u32,
}

/// Validated recipe for a logical device.
#[derive(Clone, Debug)]
pub struct DevicePlan {
    pub queues: Vec<QueueAssignment>,
    pub layers: BTreeSet<String>,
    pub extensions: BTreeSet<String>,
}

impl DevicePlan {
    /// Checks every request against `device`. Each operation combination is
    /// served by the first queue family whose flags contain all of it.
    pub fn new(
        device: &PhysicalDevice,
        operations: &[vk::QueueFlags],
        layers: &BTreeSet<String>,
        extensions: &BTreeSet<String>,
    ) -> Result<Self, DeviceCreationError> {
        if let Some(missing) = extensions.iter().find(|ext| !device.extensions.contains(*ext)) {
            return Err(DeviceCreationError::MissingExtension(missing.clone()));
        }
        if let Some(missing) = layers.iter().find(|layer| !device.layers.contains(*layer)) {
            return Err(DeviceCreationError::MissingLayer(missing.clone()));
        }

        let queues = operations
            .iter()
            .map(|&operation| {
                device
                    .queue_families
                    .iter()
                    .find(|family| family.count > 0 && family.flags.contains(operation))
                    .map(|family| QueueAssignment {
                        operation,
                        family: family.index,
                        index: 0,
                    })
                    .ok_or_else(|| DeviceCreationError::UnsupportedOperation {
                        device: device.name.clone(),
                        operation,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            queues,
            layers: layers.clone(),
            extensions: extensions.clone(),
        })
    }

    /// Distinct queue families the logical device must create a queue in.
    pub fn families(&self) -> Vec<u32> {
        let unique: BTreeSet<u32> = self.queues.iter().map(|q| q.family).collect();
        unique.into_iter().collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn fake_device(name: &str, device_type: vk::PhysicalDeviceType) -> PhysicalDevice {
        PhysicalDevice {
            raw: vk::PhysicalDevice::null(),
            name: name.to_string(),
            device_type,
            api_version: vk::make_api_version(0, 1, 2, 0),
            queue_families: vec![
                QueueFamily {
                    index: 0,
                    flags: vk::QueueFlags::GRAPHICS
                        | vk::QueueFlags::COMPUTE
                        | vk::QueueFlags::TRANSFER,
                    count: 1,
                },
                QueueFamily {
                    index: 1,
                    flags: vk::QueueFlags::TRANSFER,
                    count: 2,
                },
            ],
            extensions: ["VK_KHR_swapchain".to_string()].into(),
            layers: BTreeSet::new(),
        }
    }

    #[test]
    fn picks_first_discrete_gpu() {
        let devices = vec![
            fake_device("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU),
            fake_device("dgpu-a", vk::PhysicalDeviceType::DISCRETE_GPU),
            fake_device("dgpu-b", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        assert_eq!(select_primary_device(&devices).unwrap().name, "dgpu-a");
    }

    #[test]
    fn no_discrete_gpu_is_an_error() {
        let devices = vec![fake_device("cpu", vk::PhysicalDeviceType::CPU)];
        assert!(matches!(
            select_primary_device(&devices),
            Err(DeviceCreationError::NoDiscreteGpu)
        ));
    }

    #[test]
    fn maps_operations_to_first_capable_family() {
        let device = fake_device("gpu", vk::PhysicalDeviceType::DISCRETE_GPU);
        let plan = DevicePlan::new(
            &device,
            &[
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                vk::QueueFlags::TRANSFER,
            ],
            &BTreeSet::new(),
            &["VK_KHR_swapchain".to_string()].into(),
        )
        .unwrap();

        assert_eq!(plan.queues[0].family, 0);
        // family 0 also advertises TRANSFER and comes first
        assert_eq!(plan.queues[1].family, 0);
        assert_eq!(plan.families(), vec![0]);
    }

    #[test]
    fn rejects_unsupported_operation() {
        let device = fake_device("gpu", vk::PhysicalDeviceType::DISCRETE_GPU);
        let err = DevicePlan::new(
            &device,
            &[vk::QueueFlags::SPARSE_BINDING],
            &BTreeSet::new(),
            &BTreeSet::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DeviceCreationError::UnsupportedOperation { operation, .. }
                if operation == vk::QueueFlags::SPARSE_BINDING
        ));
    }

    #[test]
    fn rejects_missing_extension_and_layer() {
        let device = fake_device("gpu", vk::PhysicalDeviceType::DISCRETE_GPU);
        let err = DevicePlan::new(
            &device,
            &[vk::QueueFlags::GRAPHICS],
            &BTreeSet::new(),
            &["VK_KHR_ray_tracing_pipeline".to_string()].into(),
        )
        .unwrap_err();
        assert!(matches!(err, DeviceCreationError::MissingExtension(ext) if ext == "VK_KHR_ray_tracing_pipeline"));

        let err = DevicePlan::new(
            &device,
            &[vk::QueueFlags::GRAPHICS],
            &["VK_LAYER_KHRONOS_validation".to_string()].into(),
            &BTreeSet::new(),
        )
        .unwrap_err();
        assert!(matches!(err, DeviceCreationError::MissingLayer(_)));
    }
}

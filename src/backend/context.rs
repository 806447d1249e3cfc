// Device Context - logical device, cached queues, resource factory
//
// Every resource created through the context is registered here and
// destroyed here, in reverse creation order, before the logical device.
// Callers only ever hold raw handles and `ResourceKey`s.

use ash::vk;
use std::collections::BTreeSet;

use super::command::{CommandBatch, CommandPool};
use super::device::{DevicePlan, PhysicalDevice};
use super::driver::{Driver, RawPipeline};
use crate::error::{DeviceCreationError, GpuError, Result};

/// Identifies one registered resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Resource {
    Semaphore(vk::Semaphore),
    Fence(vk::Fence),
    Buffer(vk::Buffer),
    CommandPool(vk::CommandPool),
    Pipeline(RawPipeline),
    Framebuffer(vk::Framebuffer),
    ImageView(vk::ImageView),
    Swapchain(vk::SwapchainKHR),
}

#[derive(Debug)]
struct Entry {
    key: ResourceKey,
    owner: Option<ResourceKey>,
    resource: Resource,
}

/// Queue handle serving one operation combination, fetched at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueBinding {
    pub operation: vk::QueueFlags,
    pub family: u32,
    pub queue: vk::Queue,
}

pub struct DeviceContext {
    driver: Box<dyn Driver>,
    device_name: String,
    queues: Vec<QueueBinding>,
    layers: BTreeSet<String>,
    extensions: BTreeSet<String>,
    registry: Vec<Entry>,
    next_key: u64,
    next_pool_id: u32,
    submit_fence: vk::Fence,
    destroyed: bool,
}

impl DeviceContext {
    /// Validate the request against `device` and bind `driver` to it.
    pub fn new(
        driver: Box<dyn Driver>,
        device: &PhysicalDevice,
        operations: &[vk::QueueFlags],
        layers: &BTreeSet<String>,
        extensions: &BTreeSet<String>,
    ) -> Result<Self> {
        let plan = DevicePlan::new(device, operations, layers, extensions)?;
        Self::from_plan(driver, device, &plan)
    }

    pub(crate) fn from_plan(
        driver: Box<dyn Driver>,
        device: &PhysicalDevice,
        plan: &DevicePlan,
    ) -> Result<Self> {
        let queues = plan
            .queues
            .iter()
            .map(|assignment| QueueBinding {
                operation: assignment.operation,
                family: assignment.family,
                queue: driver.queue(assignment.family, assignment.index),
            })
            .collect();

        let mut context = Self {
            driver,
            device_name: device.name.clone(),
            queues,
            layers: plan.layers.clone(),
            extensions: plan.extensions.clone(),
            registry: Vec::new(),
            next_key: 0,
            next_pool_id: 0,
            submit_fence: vk::Fence::null(),
            destroyed: false,
        };
        context.submit_fence = context.create_fence(false)?;

        log::info!(
            "Created device context on {} ({} backend, {} queue bindings)",
            context.device_name,
            context.driver.name(),
            context.queues.len()
        );
        Ok(context)
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn layers(&self) -> &BTreeSet<String> {
        &self.layers
    }

    pub fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    pub fn queues(&self) -> &[QueueBinding] {
        &self.queues
    }

    /// First queue binding whose operation flags contain `operation`.
    pub fn queue(&self, operation: vk::QueueFlags) -> Result<QueueBinding> {
        self.queues
            .iter()
            .copied()
            .find(|binding| binding.operation.contains(operation))
            .ok_or_else(|| {
                GpuError::DeviceCreation(DeviceCreationError::UnsupportedOperation {
                    device: self.device_name.clone(),
                    operation,
                })
            })
    }

    // =========================================================================
    // REGISTRY
    // =========================================================================

    pub(crate) fn register(&mut self, owner: Option<ResourceKey>, resource: Resource) -> ResourceKey {
        let key = ResourceKey(self.next_key);
        self.next_key += 1;
        self.registry.push(Entry {
            key,
            owner,
            resource,
        });
        key
    }

    /// Number of live resources, the internal submit fence included.
    pub fn resource_count(&self) -> usize {
        self.registry.len()
    }

    /// Destroy `key` and every resource it owns, children first.
    pub fn retire(&mut self, key: ResourceKey) {
        let mut index = self.registry.len();
        while index > 0 {
            index -= 1;
            let entry = &self.registry[index];
            if entry.key == key || entry.owner == Some(key) {
                let entry = self.registry.remove(index);
                self.destroy_resource(entry.resource);
            }
        }
    }

    /// Destroy one resource identified by its handle.
    pub(crate) fn release(&mut self, resource: Resource) {
        if let Some(index) = self.registry.iter().position(|entry| entry.resource == resource) {
            let entry = self.registry.remove(index);
            self.destroy_resource(entry.resource);
        }
    }

    fn destroy_resource(&self, resource: Resource) {
        let driver = self.driver.as_ref();
        match resource {
            Resource::Semaphore(semaphore) => driver.destroy_semaphore(semaphore),
            Resource::Fence(fence) => driver.destroy_fence(fence),
            Resource::Buffer(buffer) => driver.destroy_buffer(buffer),
            Resource::CommandPool(pool) => driver.destroy_command_pool(pool),
            Resource::Pipeline(pipeline) => driver.destroy_pipeline(pipeline),
            Resource::Framebuffer(framebuffer) => driver.destroy_framebuffer(framebuffer),
            Resource::ImageView(view) => driver.destroy_image_view(view),
            Resource::Swapchain(swapchain) => driver.destroy_swapchain(swapchain),
        }
    }

    // =========================================================================
    // SYNCHRONIZATION PRIMITIVES
    // =========================================================================

    pub fn create_semaphore(&mut self) -> Result<vk::Semaphore> {
        self.create_owned_semaphore(None)
    }

    pub(crate) fn create_owned_semaphore(&mut self, owner: Option<ResourceKey>) -> Result<vk::Semaphore> {
        let semaphore = self
            .driver
            .create_semaphore()
            .map_err(GpuError::creation("semaphore"))?;
        self.register(owner, Resource::Semaphore(semaphore));
        Ok(semaphore)
    }

    pub fn create_fence(&mut self, signaled: bool) -> Result<vk::Fence> {
        let fence = self
            .driver
            .create_fence(signaled)
            .map_err(GpuError::creation("fence"))?;
        self.register(None, Resource::Fence(fence));
        Ok(fence)
    }

    pub fn destroy_fence(&mut self, fence: vk::Fence) {
        self.release(Resource::Fence(fence));
    }

    pub fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> Result<()> {
        self.driver.wait_for_fence(fence, timeout)?;
        Ok(())
    }

    pub fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        self.driver.reset_fence(fence)?;
        Ok(())
    }

    // =========================================================================
    // SUBMISSION
    // =========================================================================

    /// Submit `batches` to the queue serving `operation` and return at once.
    ///
    /// Every batch is validated before anything reaches the queue: a
    /// wait-list/stage-list length mismatch or a command buffer that is not
    /// executable fails the whole call with nothing submitted, as does a
    /// pool from another queue family than the one serving `operation`.
    pub fn execute(
        &self,
        operation: vk::QueueFlags,
        pool: &CommandPool,
        batches: &[CommandBatch],
        fence: vk::Fence,
    ) -> Result<()> {
        let binding = self.queue(operation)?;
        if pool.family() != binding.family {
            return Err(GpuError::QueueFamilyMismatch {
                pool: pool.family(),
                queue: binding.family,
            });
        }

        let submits = batches
            .iter()
            .map(|batch| batch.resolve(pool))
            .collect::<Result<Vec<_>>>()?;

        self.driver.queue_submit(binding.queue, &submits, fence)?;
        Ok(())
    }

    /// Submit and block until the GPU has finished the work.
    pub fn execute_and_wait(
        &self,
        operation: vk::QueueFlags,
        pool: &CommandPool,
        batches: &[CommandBatch],
    ) -> Result<()> {
        self.execute(operation, pool, batches, self.submit_fence)?;
        self.driver.wait_for_fence(self.submit_fence, u64::MAX)?;
        self.driver.reset_fence(self.submit_fence)?;
        Ok(())
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        self.driver.wait_idle()?;
        Ok(())
    }

    pub(crate) fn next_pool_id(&mut self) -> u32 {
        self.next_pool_id += 1;
        self.next_pool_id
    }

    // =========================================================================
    // TEARDOWN
    // =========================================================================

    /// Destroy every resource in reverse creation order, then the device.
    pub fn destroy(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        log::info!("Destroying device context on {}...", self.device_name);
        if let Err(e) = self.driver.wait_idle() {
            log::warn!("wait_idle failed during teardown: {}", e);
        }

        while let Some(entry) = self.registry.pop() {
            self.destroy_resource(entry.resource);
        }
        self.driver.destroy_device();
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

// Vulkan driver - ash implementation of the driver seam
//
// Owns the logical device, the swapchain/surface loaders and the memory
// allocator. Buffer memory goes through gpu-allocator; everything else is a
// direct ash call.

use ash::prelude::VkResult;
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocationError, MemoryLocation};
use parking_lot::Mutex;
use std::collections::HashMap;

use super::driver::{
    BufferDesc, DrawDesc, Driver, PipelineDesc, RawPipeline, RawSwapchain, SubmitDesc,
    SurfaceSupport, SwapchainDesc,
};

pub struct VulkanDriver {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    // Taken on destroy_device: the allocator must go before the device
    allocator: Mutex<Option<Allocator>>,
    allocations: Mutex<HashMap<vk::Buffer, Allocation>>,
}

fn allocation_code(error: AllocationError) -> vk::Result {
    log::error!("Allocation failed: {}", error);
    match error {
        AllocationError::OutOfMemory => vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        AllocationError::NoCompatibleMemoryTypeFound => vk::Result::ERROR_FEATURE_NOT_PRESENT,
        _ => vk::Result::ERROR_UNKNOWN,
    }
}

impl VulkanDriver {
    /// Wrap a freshly created logical device. The driver destroys `device`
    /// in `destroy_device`.
    pub fn new(
        instance: &ash::Instance,
        surface_loader: ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
    ) -> VkResult<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(allocation_code)?;

        let swapchain_loader = ash::khr::swapchain::Device::new(instance, &device);

        Ok(Self {
            device,
            physical_device,
            surface_loader,
            swapchain_loader,
            allocator: Mutex::new(Some(allocator)),
            allocations: Mutex::new(HashMap::new()),
        })
    }

    fn create_render_pass(&self, color_formats: &[vk::Format]) -> VkResult<vk::RenderPass> {
        // Targets arrive in SHADER_READ_ONLY and are left there; the subpass
        // itself renders in COLOR_ATTACHMENT_OPTIMAL
        let attachments: Vec<vk::AttachmentDescription> = color_formats
            .iter()
            .map(|&format| {
                vk::AttachmentDescription::default()
                    .format(format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            })
            .collect();

        let color_refs: Vec<vk::AttachmentReference> = (0..attachments.len() as u32)
            .map(|attachment| vk::AttachmentReference {
                attachment,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();

        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);

        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        let subpasses = [subpass];
        let dependencies = [dependency];
        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        unsafe { self.device.create_render_pass(&render_pass_info, None) }
    }

    fn build_pipeline(
        &self,
        desc: &PipelineDesc<'_>,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
        modules: &[vk::ShaderModule],
    ) -> VkResult<vk::Pipeline> {
        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = desc
            .stages
            .iter()
            .zip(modules)
            .map(|(stage, &module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage.kind.stage_flags())
                    .module(module)
                    .name(&stage.entry_point)
            })
            .collect();

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&desc.bindings)
            .vertex_attribute_descriptions(&desc.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.topology)
            .primitive_restart_enable(false);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: desc.extent.width as f32,
            height: desc.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: desc.extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(desc.polygon_mode)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // Opaque, one blend state per color attachment
        let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
            .color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
                    .blend_enable(false)
            })
            .collect();
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| e)?
        };
        pipelines.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }
}

impl Driver for VulkanDriver {
    fn name(&self) -> &str {
        "vulkan"
    }

    fn queue(&self, family: u32, index: u32) -> vk::Queue {
        unsafe { self.device.get_device_queue(family, index) }
    }

    fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }

    fn destroy_device(&self) {
        let leaked = self.allocations.lock().len();
        if leaked > 0 {
            log::warn!("{} buffer allocations still alive at device destruction", leaked);
        }
        // Dropping the allocator frees its memory blocks
        drop(self.allocator.lock().take());
        unsafe { self.device.destroy_device(None) };
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn create_buffer(&self, desc: &BufferDesc, data: &[u8]) -> VkResult<vk::Buffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let location = if desc.memory.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };

        let allocated = {
            let mut allocator = self.allocator.lock();
            let Some(allocator) = allocator.as_mut() else {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(vk::Result::ERROR_DEVICE_LOST);
            };
            allocator.allocate(&AllocationCreateDesc {
                name: "buffer",
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
        };
        let mut allocation = match allocated {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(allocation_code(e));
            }
        };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        let uploaded = bound.and_then(|_| {
            if data.is_empty() {
                return Ok(());
            }
            let mapped = allocation
                .mapped_slice_mut()
                .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?;
            mapped[..data.len()].copy_from_slice(data);
            Ok(())
        });

        if let Err(e) = uploaded {
            if let Some(allocator) = self.allocator.lock().as_mut() {
                let _ = allocator.free(allocation);
            }
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(e);
        }

        self.allocations.lock().insert(buffer, allocation);
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) };
        if let Some(allocation) = self.allocations.lock().remove(&buffer) {
            if let Some(allocator) = self.allocator.lock().as_mut() {
                if let Err(e) = allocator.free(allocation) {
                    log::warn!("Failed to free buffer memory: {}", e);
                }
            }
        }
    }

    fn create_command_pool(&self, queue_family: u32) -> VkResult<vk::CommandPool> {
        let pool_info = vk::CommandPoolCreateInfo::default().queue_family_index(queue_family);
        unsafe { self.device.create_command_pool(&pool_info, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info)? };
        buffers.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
        }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    fn cmd_transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) {
        // Leaving PRESENT the previous contents are discarded (the render
        // pass clears), which also covers a freshly acquired image
        let (old, src_stage, src_access, dst_stage, dst_access) =
            if old == vk::ImageLayout::PRESENT_SRC_KHR {
                (
                    vk::ImageLayout::UNDEFINED,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    vk::AccessFlags::empty(),
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                )
            } else {
                (
                    old,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::AccessFlags::empty(),
                )
            };

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old)
            .new_layout(new)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, draw: &DrawDesc<'_>) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: draw.clear_color,
            },
        }];
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(draw.pipeline.render_pass)
            .framebuffer(draw.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: draw.extent,
            })
            .clear_values(&clear_values);
        let offsets = vec![0; draw.vertex_buffers.len()];

        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            self.device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                draw.pipeline.pipeline,
            );
            if !draw.vertex_buffers.is_empty() {
                self.device
                    .cmd_bind_vertex_buffers(cmd, 0, draw.vertex_buffers, &offsets);
            }
            self.device.cmd_draw(cmd, draw.vertex_count, 1, 0, 0);
            self.device.cmd_end_render_pass(cmd);
        }
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> VkResult<RawPipeline> {
        let render_pass = self.create_render_pass(&desc.color_formats)?;

        let layout = match unsafe {
            self.device
                .create_pipeline_layout(&vk::PipelineLayoutCreateInfo::default(), None)
        } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { self.device.destroy_render_pass(render_pass, None) };
                return Err(e);
            }
        };

        let mut modules = Vec::with_capacity(desc.stages.len());
        let mut result = Ok(());
        for stage in desc.stages {
            let module_info = vk::ShaderModuleCreateInfo::default().code(&stage.code);
            match unsafe { self.device.create_shader_module(&module_info, None) } {
                Ok(module) => modules.push(module),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        let pipeline = result.and_then(|_| self.build_pipeline(desc, render_pass, layout, &modules));

        // Modules are only needed while the pipeline is built
        for module in modules {
            unsafe { self.device.destroy_shader_module(module, None) };
        }

        match pipeline {
            Ok(pipeline) => Ok(RawPipeline {
                pipeline,
                layout,
                render_pass,
            }),
            Err(e) => {
                unsafe {
                    self.device.destroy_pipeline_layout(layout, None);
                    self.device.destroy_render_pass(render_pass, None);
                }
                Err(e)
            }
        }
    }

    fn destroy_pipeline(&self, pipeline: RawPipeline) {
        unsafe {
            self.device.destroy_pipeline(pipeline.pipeline, None);
            self.device.destroy_pipeline_layout(pipeline.layout, None);
            self.device.destroy_render_pass(pipeline.render_pass, None);
        }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let attachments = [view];
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        unsafe { self.device.create_framebuffer(&framebuffer_info, None) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn surface_support(&self, surface: vk::SurfaceKHR) -> VkResult<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .surface_loader
                    .get_physical_device_surface_capabilities(self.physical_device, surface)?,
                formats: self
                    .surface_loader
                    .get_physical_device_surface_formats(self.physical_device, surface)?,
                present_modes: self
                    .surface_loader
                    .get_physical_device_surface_present_modes(self.physical_device, surface)?,
            })
        }
    }

    fn supports_present(&self, family: u32, surface: vk::SurfaceKHR) -> VkResult<bool> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(self.physical_device, family, surface)
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<RawSwapchain> {
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(desc.surface)
            .min_image_count(desc.min_image_count)
            .image_format(desc.format)
            .image_color_space(desc.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(desc.usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(desc.pre_transform)
            .composite_alpha(desc.composite_alpha)
            .present_mode(desc.present_mode)
            .clipped(desc.clipped)
            .old_swapchain(desc.old_swapchain);

        let handle = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };
        match unsafe { self.swapchain_loader.get_swapchain_images(handle) } {
            Ok(images) => Ok(RawSwapchain { handle, images }),
            Err(e) => {
                unsafe { self.swapchain_loader.destroy_swapchain(handle, None) };
                Err(e)
            }
        }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { self.device.create_image_view(&create_info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout: u64,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout, semaphore, vk::Fence::null())
        }
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[SubmitDesc],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let submit_infos: Vec<vk::SubmitInfo> = submits
            .iter()
            .map(|submit| {
                vk::SubmitInfo::default()
                    .wait_semaphores(&submit.wait_semaphores)
                    .wait_dst_stage_mask(&submit.wait_stages)
                    .command_buffers(&submit.command_buffers)
                    .signal_semaphores(&submit.signal_semaphores)
            })
            .collect();
        unsafe { self.device.queue_submit(queue, &submit_infos, fence) }
    }
}

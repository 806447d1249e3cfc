// Demo scene: one colored triangle drawn into every swapchain slot

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use std::path::Path;

use crate::backend::{
    Buffer, BufferCreateInfo, CommandPool, DeviceContext, Pipeline, Rasterizer, ShaderKind,
    ShaderStage, Swapchain,
};
use crate::error::Result;
use crate::frame_loop::{record_slot_commands, SlotCommands, SlotRecorder};

/// Interleaved vertex layout: position then color.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl Vertex {
    pub fn new(position: Vec3, color: Vec4) -> Self {
        Self {
            position: position.to_array(),
            color: color.to_array(),
        }
    }
}

pub fn triangle_vertices() -> [Vertex; 3] {
    [
        Vertex::new(Vec3::new(0.0, -0.5, 0.0), Vec4::new(1.0, 0.0, 0.0, 1.0)),
        Vertex::new(Vec3::new(0.5, 0.5, 0.0), Vec4::new(0.0, 1.0, 0.0, 1.0)),
        Vertex::new(Vec3::new(-0.5, 0.5, 0.0), Vec4::new(0.0, 0.0, 1.0, 1.0)),
    ]
}

/// Attach the reflected interface of `shaders/triangle.{vert,frag}` to the
/// compiled words.
pub fn triangle_stages(vertex: Vec<u32>, fragment: Vec<u32>) -> Vec<ShaderStage> {
    vec![
        ShaderStage::new(ShaderKind::Vertex, vertex)
            .input(0, vk::Format::R32G32B32_SFLOAT, "VertexPosition")
            .input(1, vk::Format::R32G32B32A32_SFLOAT, "VertexColor")
            .output(0, vk::Format::R32G32B32A32_SFLOAT, "FragmentColor"),
        ShaderStage::new(ShaderKind::Fragment, fragment)
            .input(0, vk::Format::R32G32B32A32_SFLOAT, "FragmentColor")
            .output(0, vk::Format::R32G32B32A32_SFLOAT, "PixelColor"),
    ]
}

/// Load the SPIR-V that build.rs compiled into `dir`.
pub fn load_triangle_stages<P: AsRef<Path>>(dir: P) -> std::io::Result<Vec<ShaderStage>> {
    let dir = dir.as_ref();
    let vertex = ShaderStage::from_spirv_file(ShaderKind::Vertex, dir.join("triangle.vert.spv"))?;
    let fragment =
        ShaderStage::from_spirv_file(ShaderKind::Fragment, dir.join("triangle.frag.spv"))?;
    Ok(triangle_stages(vertex.code, fragment.code))
}

pub struct TriangleScene {
    stages: Vec<ShaderStage>,
    vertex_buffer: Buffer,
    clear_color: [f32; 4],
    pipeline: Option<Pipeline>,
}

impl TriangleScene {
    pub fn new(
        context: &mut DeviceContext,
        stages: Vec<ShaderStage>,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let vertex_buffer =
            context.create_buffer(&BufferCreateInfo::default(), &triangle_vertices())?;
        Ok(Self {
            stages,
            vertex_buffer,
            clear_color,
            pipeline: None,
        })
    }

    pub fn vertex_buffer(&self) -> &Buffer {
        &self.vertex_buffer
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.as_ref()
    }

    fn rasterizer(&self, swapchain: &Swapchain) -> Rasterizer {
        let stride = std::mem::size_of::<Vertex>() as u32;
        let mut rasterizer = Rasterizer::new(self.stages.clone());
        rasterizer
            .bind(
                0,
                stride,
                0,
                std::mem::offset_of!(Vertex, position) as u32,
                vk::VertexInputRate::VERTEX,
            )
            .bind(
                0,
                stride,
                1,
                std::mem::offset_of!(Vertex, color) as u32,
                vk::VertexInputRate::VERTEX,
            );
        if let Some(image) = swapchain.images().first() {
            rasterizer.attach(0, image);
        }
        rasterizer.topology = vk::PrimitiveTopology::TRIANGLE_LIST;
        rasterizer.polygon_mode = vk::PolygonMode::FILL;
        rasterizer.clear_color = self.clear_color;
        rasterizer
    }
}

impl SlotRecorder for TriangleScene {
    fn record(
        &mut self,
        context: &mut DeviceContext,
        swapchain: &mut Swapchain,
        pool: &mut CommandPool,
    ) -> Result<Vec<SlotCommands>> {
        let pipeline = context.create_pipeline(&self.rasterizer(swapchain))?;
        let buffer = self.vertex_buffer;
        match record_slot_commands(context, swapchain, pool, &pipeline, &[&buffer]) {
            Ok(slots) => {
                self.pipeline = Some(pipeline);
                Ok(slots)
            }
            Err(e) => {
                pipeline.release(context);
                Err(e)
            }
        }
    }

    fn release(&mut self, context: &mut DeviceContext) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.release(context);
        }
    }
}

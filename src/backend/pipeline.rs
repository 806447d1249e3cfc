// Rasterization pipeline description and creation
//
// A `Rasterizer` collects reflected shader stages, the vertex layout and the
// render targets. `DeviceContext::create_pipeline` validates it and freezes
// a copy of its state; later changes to the rasterizer don't reach pipelines
// already created from it.

use ash::vk;
use std::collections::BTreeMap;

use super::context::{DeviceContext, Resource, ResourceKey};
use super::driver::{PipelineDesc, RawPipeline};
use super::shader::{ShaderKind, ShaderStage};
use super::swapchain::SwapchainImage;
use crate::error::{GpuError, Result};

/// Maps one vertex input location into a binding slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexInput {
    pub binding: u32,
    pub stride: u32,
    pub location: u32,
    pub offset: u32,
    pub input_rate: vk::VertexInputRate,
}

/// Render target bound to a fragment output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentTarget {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

pub struct Rasterizer {
    stages: Vec<ShaderStage>,
    inputs: Vec<VertexInput>,
    attachments: BTreeMap<u32, AttachmentTarget>,
    pub resolution: vk::Extent2D,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub clear_color: [f32; 4],
}

impl Rasterizer {
    pub fn new(stages: Vec<ShaderStage>) -> Self {
        Self {
            stages,
            inputs: Vec::new(),
            attachments: BTreeMap::new(),
            resolution: vk::Extent2D::default(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn stages(&self) -> &[ShaderStage] {
        &self.stages
    }

    /// Read vertex input `location` from `binding` at byte `offset`.
    pub fn bind(
        &mut self,
        binding: u32,
        stride: u32,
        location: u32,
        offset: u32,
        input_rate: vk::VertexInputRate,
    ) -> &mut Self {
        self.inputs.push(VertexInput {
            binding,
            stride,
            location,
            offset,
            input_rate,
        });
        self
    }

    /// Render fragment output `location` into `image`. Also adopts the
    /// image's extent as the pipeline resolution.
    pub fn attach(&mut self, location: u32, image: &SwapchainImage) -> &mut Self {
        self.attachments.insert(
            location,
            AttachmentTarget {
                format: image.format,
                extent: image.extent,
            },
        );
        self.resolution = image.extent;
        self
    }

    fn stage(&self, kind: ShaderKind) -> Option<&ShaderStage> {
        self.stages.iter().find(|stage| stage.kind == kind)
    }

    /// Validate and snapshot everything a pipeline is built from.
    pub fn freeze(&self) -> Result<PipelineState> {
        let mut color_formats = Vec::new();
        if let Some(fragment) = self.stage(ShaderKind::Fragment) {
            let mut outputs: Vec<u32> = fragment.outputs.iter().map(|o| o.location).collect();
            outputs.sort_unstable();
            for location in outputs {
                let target = self
                    .attachments
                    .get(&location)
                    .ok_or(GpuError::IncompleteAttachment { location })?;
                color_formats.push(target.format);
            }
        }

        let vertex = self.stage(ShaderKind::Vertex);
        let mut bindings: BTreeMap<u32, vk::VertexInputBindingDescription> = BTreeMap::new();
        let mut attributes: Vec<vk::VertexInputAttributeDescription> = Vec::new();

        for input in &self.inputs {
            let declared = vertex
                .and_then(|stage| stage.find_input(input.location))
                .ok_or(GpuError::InvalidVertexInput {
                    location: input.location,
                    reason: "location is not declared by the vertex stage",
                })?;

            if attributes.iter().any(|a| a.location == input.location) {
                return Err(GpuError::InvalidVertexInput {
                    location: input.location,
                    reason: "location is bound more than once",
                });
            }

            let binding = bindings.entry(input.binding).or_insert(
                vk::VertexInputBindingDescription {
                    binding: input.binding,
                    stride: input.stride,
                    input_rate: input.input_rate,
                },
            );
            if binding.stride != input.stride || binding.input_rate != input.input_rate {
                return Err(GpuError::InvalidVertexInput {
                    location: input.location,
                    reason: "stride or rate disagrees with an earlier input of the binding",
                });
            }

            attributes.push(vk::VertexInputAttributeDescription {
                location: input.location,
                binding: input.binding,
                format: declared.format,
                offset: input.offset,
            });
        }

        if let Some(vertex) = vertex {
            if let Some(unbound) = vertex
                .inputs
                .iter()
                .find(|declared| !attributes.iter().any(|a| a.location == declared.location))
            {
                return Err(GpuError::InvalidVertexInput {
                    location: unbound.location,
                    reason: "location is not bound to any vertex buffer",
                });
            }
        }

        Ok(PipelineState {
            bindings: bindings.into_values().collect(),
            attributes,
            color_formats,
            extent: self.resolution,
            topology: self.topology,
            polygon_mode: self.polygon_mode,
            clear_color: self.clear_color,
        })
    }
}

/// Immutable snapshot a pipeline was created from.
#[derive(Clone, Debug)]
pub struct PipelineState {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    pub color_formats: Vec<vk::Format>,
    pub extent: vk::Extent2D,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub clear_color: [f32; 4],
}

pub struct Pipeline {
    key: ResourceKey,
    raw: RawPipeline,
    state: PipelineState,
}

impl Pipeline {
    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn raw(&self) -> RawPipeline {
        self.raw
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Destroy the pipeline together with every framebuffer made for it.
    pub fn release(self, context: &mut DeviceContext) {
        context.retire(self.key);
    }
}

impl DeviceContext {
    pub fn create_pipeline(&mut self, rasterizer: &Rasterizer) -> Result<Pipeline> {
        let state = rasterizer.freeze()?;

        let raw = self
            .driver()
            .create_pipeline(&PipelineDesc {
                stages: rasterizer.stages(),
                bindings: state.bindings.clone(),
                attributes: state.attributes.clone(),
                color_formats: state.color_formats.clone(),
                extent: state.extent,
                topology: state.topology,
                polygon_mode: state.polygon_mode,
            })
            .map_err(GpuError::creation("pipeline"))?;
        let key = self.register(None, Resource::Pipeline(raw));

        log::info!(
            "Created pipeline: {} stages, {} vertex inputs, {}x{}",
            rasterizer.stages().len(),
            state.attributes.len(),
            state.extent.width,
            state.extent.height
        );
        Ok(Pipeline { key, raw, state })
    }

    /// Framebuffer rendering `pipeline` into `target`, owned by the pipeline.
    pub fn create_framebuffer(
        &mut self,
        pipeline: &Pipeline,
        target: &SwapchainImage,
    ) -> Result<vk::Framebuffer> {
        let framebuffer = self
            .driver()
            .create_framebuffer(pipeline.raw.render_pass, target.view, pipeline.state.extent)
            .map_err(GpuError::creation("framebuffer"))?;
        self.register(Some(pipeline.key), Resource::Framebuffer(framebuffer));
        Ok(framebuffer)
    }
}

// Shader stages as consumed by the rasterizer
//
// Vulkan uses SPIR-V bytecode for shaders. Compilation and reflection happen
// outside this crate; a `ShaderStage` carries the words plus the interface
// (input/output locations and formats) that reflection produced.

use ash::vk;
use std::ffi::CString;
use std::io::Cursor;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl ShaderKind {
    pub fn stage_flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderKind::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderKind::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// One `layout(location = N)` variable of a stage interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceVariable {
    pub location: u32,
    pub format: vk::Format,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct ShaderStage {
    pub kind: ShaderKind,
    pub code: Vec<u32>,
    pub entry_point: CString,
    pub inputs: Vec<InterfaceVariable>,
    pub outputs: Vec<InterfaceVariable>,
}

impl ShaderStage {
    pub fn new(kind: ShaderKind, code: Vec<u32>) -> Self {
        Self {
            kind,
            code,
            entry_point: c"main".to_owned(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Load SPIR-V from bytes. Fails if the length is not a multiple of four
    /// or the magic number is wrong.
    pub fn from_spirv_bytes(kind: ShaderKind, bytes: &[u8]) -> std::io::Result<Self> {
        // read_spv copies into u32 words, so the byte slice needs no alignment
        let code = ash::util::read_spv(&mut Cursor::new(bytes))?;
        Ok(Self::new(kind, code))
    }

    pub fn from_spirv_file<P: AsRef<Path>>(kind: ShaderKind, path: P) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_spirv_bytes(kind, &bytes)
    }

    pub fn input(mut self, location: u32, format: vk::Format, name: &str) -> Self {
        self.inputs.push(InterfaceVariable {
            location,
            format,
            name: name.to_string(),
        });
        self
    }

    pub fn output(mut self, location: u32, format: vk::Format, name: &str) -> Self {
        self.outputs.push(InterfaceVariable {
            location,
            format,
            name: name.to_string(),
        });
        self
    }

    pub fn find_input(&self, location: u32) -> Option<&InterfaceVariable> {
        self.inputs.iter().find(|var| var.location == location)
    }
}

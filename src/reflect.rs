//! Reflection over compiled SPIR-V.
//!
//! The vertex layout a pipeline is built with is always derived from what the
//! vertex shader declares, so a shader edit that adds, removes or retypes an
//! input can never drift out of sync with a hand-written layout.

use crate::error::{ReloadError, Result};
use crate::spirv::{SpirvModule, Type, dim, execution_model, storage_class};

/// Element format of one vertex attribute: 32-bit scalars, one to four
/// components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float,
    Float2,
    Float3,
    Float4,
    Int,
    Int2,
    Int3,
    Int4,
    Uint,
    Uint2,
    Uint3,
    Uint4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarKind {
    Float,
    Int,
    Uint,
}

impl VertexFormat {
    fn new(kind: ScalarKind, components: u32) -> Option<Self> {
        use VertexFormat::*;
        Some(match (kind, components) {
            (ScalarKind::Float, 1) => Float,
            (ScalarKind::Float, 2) => Float2,
            (ScalarKind::Float, 3) => Float3,
            (ScalarKind::Float, 4) => Float4,
            (ScalarKind::Int, 1) => Int,
            (ScalarKind::Int, 2) => Int2,
            (ScalarKind::Int, 3) => Int3,
            (ScalarKind::Int, 4) => Int4,
            (ScalarKind::Uint, 1) => Uint,
            (ScalarKind::Uint, 2) => Uint2,
            (ScalarKind::Uint, 3) => Uint3,
            (ScalarKind::Uint, 4) => Uint4,
            _ => return None,
        })
    }

    pub fn components(self) -> u32 {
        use VertexFormat::*;
        match self {
            Float | Int | Uint => 1,
            Float2 | Int2 | Uint2 => 2,
            Float3 | Int3 | Uint3 => 3,
            Float4 | Int4 | Uint4 => 4,
        }
    }

    /// Size in bytes.
    pub fn size(self) -> u32 {
        self.components() * 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

/// Tightly packed layout of a single interleaved vertex buffer.
///
/// Attributes are sorted by location; `stride` is always the sum of the
/// attribute sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReflectedVertexInput {
    pub attributes: Vec<VertexAttribute>,
    pub stride: u32,
}

impl ReflectedVertexInput {
    /// Sorts by location and assigns offsets with no padding.
    pub fn pack(mut inputs: Vec<(u32, VertexFormat)>) -> Self {
        inputs.sort_by_key(|(location, _)| *location);
        let mut offset = 0;
        let attributes = inputs
            .into_iter()
            .map(|(location, format)| {
                let attribute = VertexAttribute {
                    location,
                    format,
                    offset,
                };
                offset += format.size();
                attribute
            })
            .collect();
        Self {
            attributes,
            stride: offset,
        }
    }
}

/// Bound-resource counts of one shader stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReflectedResources {
    /// Samplers, sampled images and combined image-samplers.
    pub samplers: u32,
    pub storage_images: u32,
    pub storage_buffers: u32,
    pub uniform_buffers: u32,
    /// Size of the largest push-constant block, in bytes.
    pub push_constant_size: u32,
}

/// Derives the vertex layout from the module's vertex entry point.
///
/// Built-in inputs such as `gl_VertexIndex` are skipped.
///
/// # Errors
///
/// `UnsupportedFormat` if an input is not a 32-bit float/int/uint scalar or
/// vector, `ReflectionUnsupported` if the module has no vertex entry point or
/// an input lacks a location.
pub fn reflect_vertex_input(words: &[u32]) -> Result<ReflectedVertexInput> {
    let module = SpirvModule::parse(words)?;
    let entry = module
        .entry_points
        .iter()
        .find(|entry| entry.execution_model == execution_model::VERTEX)
        .ok_or_else(|| {
            ReloadError::ReflectionUnsupported("module has no vertex entry point".to_owned())
        })?;

    let mut inputs: Vec<(u32, VertexFormat)> = Vec::new();
    for id in &entry.interface {
        let Some(variable) = module.variable(*id) else {
            continue;
        };
        if variable.storage_class != storage_class::INPUT {
            continue;
        }
        let pointee = module.pointee(variable)?;
        if module.decorations(variable.id).builtin || is_builtin_block(&module, pointee)? {
            continue;
        }

        let location = module.decorations(variable.id).location.ok_or_else(|| {
            ReloadError::ReflectionUnsupported(format!(
                "vertex input %{} has no location",
                variable.id
            ))
        })?;
        if inputs.iter().any(|(existing, _)| *existing == location) {
            return Err(ReloadError::ReflectionUnsupported(format!(
                "vertex input location {location} is declared twice"
            )));
        }

        let format = vertex_format(&module, pointee)
            .map_err(|reason| ReloadError::UnsupportedFormat { location, reason })?;
        inputs.push((location, format));
    }

    Ok(ReflectedVertexInput::pack(inputs))
}

fn is_builtin_block(module: &SpirvModule, type_id: u32) -> Result<bool> {
    let (element, _) = module.unwrap_arrays(type_id)?;
    Ok(match module.ty(element)? {
        Type::Struct { members } => {
            (0..members.len() as u32).any(|m| module.member_decorations(element, m).builtin)
        }
        _ => false,
    })
}

fn vertex_format(module: &SpirvModule, type_id: u32) -> Result<VertexFormat, String> {
    let describe = |ty: &Type| format!("{ty:?}");
    let ty = module.ty(type_id).map_err(|e| e.to_string())?;
    let (component, count) = match ty {
        Type::Vector { component, count } => (*component, *count),
        Type::Int { .. } | Type::Float { .. } => (type_id, 1),
        other => return Err(format!("{} is not a scalar or vector", describe(other))),
    };
    let kind = match module.ty(component).map_err(|e| e.to_string())? {
        Type::Float { width: 32 } => ScalarKind::Float,
        Type::Int {
            width: 32,
            signed: true,
        } => ScalarKind::Int,
        Type::Int {
            width: 32,
            signed: false,
        } => ScalarKind::Uint,
        other => return Err(format!("{} is not a 32-bit scalar", describe(other))),
    };
    VertexFormat::new(kind, count).ok_or_else(|| format!("{count} components"))
}

/// Counts descriptor bindings by category and measures the largest
/// push-constant block.
///
/// Binding kinds outside the four counted categories (texel buffers, input
/// attachments, acceleration structures) are ignored.
pub fn reflect_resources(words: &[u32]) -> Result<ReflectedResources> {
    let module = SpirvModule::parse(words)?;
    let mut resources = ReflectedResources::default();

    for variable in &module.variables {
        let pointee = module.pointee(variable)?;

        if variable.storage_class == storage_class::PUSH_CONSTANT {
            let size = module.size_of(pointee)?;
            resources.push_constant_size = resources.push_constant_size.max(size);
            continue;
        }

        let decorations = module.decorations(variable.id);
        if decorations.binding.is_none() {
            continue;
        }
        let (element, count) = module.unwrap_arrays(pointee)?;
        let element_type = module.ty(element)?;

        let slot = match (variable.storage_class, element_type) {
            (storage_class::UNIFORM_CONSTANT, Type::Sampler | Type::SampledImage) => {
                Some(&mut resources.samplers)
            }
            (storage_class::UNIFORM_CONSTANT, Type::Image { dim: kind, sampled })
                if *kind != dim::BUFFER && *kind != dim::SUBPASS_DATA =>
            {
                match sampled {
                    2 => Some(&mut resources.storage_images),
                    _ => Some(&mut resources.samplers),
                }
            }
            (storage_class::UNIFORM, Type::Struct { .. }) => {
                let layout = module.decorations(element);
                if layout.buffer_block {
                    Some(&mut resources.storage_buffers)
                } else if layout.block {
                    Some(&mut resources.uniform_buffers)
                } else {
                    None
                }
            }
            (storage_class::STORAGE_BUFFER, _) => Some(&mut resources.storage_buffers),
            _ => None,
        };

        match slot {
            Some(slot) => *slot += count,
            None => tracing::trace!(
                set = ?decorations.set,
                binding = ?decorations.binding,
                "ignoring uncounted binding kind {element_type:?}"
            ),
        }
    }

    Ok(resources)
}

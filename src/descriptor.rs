//! Declarative fixed-function pipeline state.
//!
//! A program is described by a small JSON document naming its shader sources
//! and the rasterizer, depth, blend and multisample state to build them with.
//! Every field except the two shader file names is optional:
//!
//! ```json
//! {
//!     "vertex_shader": "triangle.vert",
//!     "fragment_shader": "triangle.frag",
//!     "primitive": "triangle_list",
//!     "cull": "back",
//!     "depth": { "enable": true, "write": true, "compare": "less" },
//!     "msaa": { "sample_count": 4 },
//!     "blend": [{ "enable": true, "src_color": "src_alpha", "dst_color": "one_minus_src_alpha" }],
//!     "optimization": { "default": "performance", "fragment": "zero" }
//! }
//! ```
//!
//! Unknown keys are ignored. Unknown enumeration values are parse errors.

use crate::compile::OptimizationLevel;
use crate::error::{ReloadError, Result};
use crate::source::ShaderStage;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum FrontFace {
    #[default]
    #[serde(rename = "ccw", alias = "counter_clockwise")]
    CounterClockwise,
    #[serde(rename = "cw", alias = "clockwise")]
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    #[serde(alias = "less_or_equal")]
    LessEqual,
    Greater,
    NotEqual,
    #[serde(alias = "greater_or_equal")]
    GreaterEqual,
    #[default]
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthFormat {
    D16Unorm,
    #[default]
    D32Sfloat,
    D24UnormS8Uint,
    D32SfloatS8Uint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    SrcAlphaSaturate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Color channels a target writes, parsed from a string such as `"rgb"`.
///
/// Letters other than `rgba` are ignored; a string naming no channel at all
/// means every channel.
#[derive(Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct ColorWriteMask(u8);

impl ColorWriteMask {
    pub const R: Self = Self(0b0001);
    pub const G: Self = Self(0b0010);
    pub const B: Self = Self(0b0100);
    pub const A: Self = Self(0b1000);
    pub const ALL: Self = Self(0b1111);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl Default for ColorWriteMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl From<String> for ColorWriteMask {
    fn from(value: String) -> Self {
        let bits = value.chars().fold(0, |bits, c| match c.to_ascii_lowercase() {
            'r' => bits | Self::R.0,
            'g' => bits | Self::G.0,
            'b' => bits | Self::B.0,
            'a' => bits | Self::A.0,
            _ => bits,
        });
        if bits == 0 { Self::ALL } else { Self(bits) }
    }
}

impl std::fmt::Debug for ColorWriteMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = String::new();
        for (flag, c) in [(Self::R, 'r'), (Self::G, 'g'), (Self::B, 'b'), (Self::A, 'a')] {
            if self.contains(flag) {
                s.push(c);
            }
        }
        write!(f, "ColorWriteMask({s})")
    }
}

/// Blend state of one color target. The default is opaque: blending off,
/// every channel written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BlendState {
    pub enable: bool,
    pub write_mask: ColorWriteMask,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    #[serde(alias = "color_blend_op")]
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    #[serde(alias = "alpha_blend_op")]
    pub alpha_op: BlendOp,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enable: false,
            write_mask: ColorWriteMask::ALL,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct DepthState {
    pub enable: bool,
    pub write: bool,
    pub compare: CompareOp,
    pub format: Option<DepthFormat>,
}

impl DepthState {
    /// Format of the depth attachment the pipeline renders into, if any.
    pub fn attachment_format(&self) -> Option<DepthFormat> {
        match self.format {
            Some(format) => Some(format),
            None if self.enable => Some(DepthFormat::default()),
            None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EntryPoints {
    pub vs: String,
    pub fs: String,
}

impl Default for EntryPoints {
    fn default() -> Self {
        Self {
            vs: "main".to_owned(),
            fs: "main".to_owned(),
        }
    }
}

impl EntryPoints {
    pub fn for_stage(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vs,
            ShaderStage::Fragment => &self.fs,
        }
    }
}

/// Per-program optimization hints. A stage-specific hint beats the program
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct OptimizationHints {
    #[serde(alias = "optimization")]
    pub default: Option<OptimizationLevel>,
    pub vertex: Option<OptimizationLevel>,
    pub fragment: Option<OptimizationLevel>,
}

impl OptimizationHints {
    pub fn for_stage(&self, stage: ShaderStage) -> Option<OptimizationLevel> {
        let stage_hint = match stage {
            ShaderStage::Vertex => self.vertex,
            ShaderStage::Fragment => self.fragment,
        };
        stage_hint.or(self.default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
struct MsaaSection {
    sample_count: u32,
}

impl Default for MsaaSection {
    fn default() -> Self {
        Self { sample_count: 1 }
    }
}

#[derive(Debug, Deserialize)]
struct DescriptorDocument {
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    #[serde(default)]
    entry_points: EntryPoints,
    #[serde(default)]
    primitive: PrimitiveTopology,
    #[serde(default)]
    cull: CullMode,
    #[serde(default)]
    front_face: FrontFace,
    #[serde(default)]
    depth: DepthState,
    #[serde(default)]
    msaa: MsaaSection,
    #[serde(default)]
    blend: Vec<BlendState>,
    #[serde(default, alias = "shaderc")]
    optimization: OptimizationHints,
}

/// Fully defaulted pipeline description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescriptor {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub entry_points: EntryPoints,
    pub primitive: PrimitiveTopology,
    pub cull: CullMode,
    pub front_face: FrontFace,
    pub depth: DepthState,
    /// Requested, not negotiated.
    pub sample_count: u32,
    /// Exactly one entry per color target.
    pub blends: Vec<BlendState>,
    pub optimization: OptimizationHints,
}

impl PipelineDescriptor {
    /// Loads and parses the descriptor at `path`.
    ///
    /// `color_target_count` fixes the length of [`blends`](Self::blends):
    /// surplus entries in the document are dropped and missing ones take the
    /// opaque default.
    ///
    /// # Errors
    ///
    /// `ConfigNotFound` if the file is absent, `ConfigParse` if the document
    /// is malformed. No descriptor is returned in either case.
    pub fn load(path: impl AsRef<Path>, color_target_count: usize) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ReloadError::ConfigNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ReloadError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::from_slice(&bytes, path, color_target_count)
    }

    /// Parses a descriptor already read from `path`.
    pub fn from_slice(bytes: &[u8], path: &Path, color_target_count: usize) -> Result<Self> {
        let parse_error = |message: String| ReloadError::ConfigParse {
            path: path.to_path_buf(),
            message,
        };

        let document: DescriptorDocument =
            serde_json::from_slice(bytes).map_err(|e| parse_error(e.to_string()))?;

        if document.vertex_shader.as_os_str().is_empty() {
            return Err(parse_error("`vertex_shader` must name a file".to_owned()));
        }
        if document.fragment_shader.as_os_str().is_empty() {
            return Err(parse_error("`fragment_shader` must name a file".to_owned()));
        }

        let targets = color_target_count.max(1);
        let mut blends = document.blend;
        if blends.len() > targets {
            tracing::debug!(
                path = %path.display(),
                declared = blends.len(),
                targets,
                "ignoring blend entries beyond the color target count"
            );
        }
        blends.resize(targets, BlendState::default());

        Ok(Self {
            vertex_shader: document.vertex_shader,
            fragment_shader: document.fragment_shader,
            entry_points: document.entry_points,
            primitive: document.primitive,
            cull: document.cull,
            front_face: document.front_face,
            depth: document.depth,
            sample_count: document.msaa.sample_count.max(1),
            blends,
            optimization: document.optimization,
        })
    }

    pub fn shader_path(&self, stage: ShaderStage) -> &Path {
        match stage {
            ShaderStage::Vertex => &self.vertex_shader,
            ShaderStage::Fragment => &self.fragment_shader,
        }
    }
}

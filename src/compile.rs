use crate::error::{ReloadError, Result};
use crate::source::{ShaderFile, ShaderStage};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Environment variable consulted for the environment-level optimization
/// override.
pub const OPTIMIZATION_ENV_VAR: &str = "SHADER_OPTIMIZATION";

/// How the SPIR-V writer should trade debuggability against output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    /// Unoptimized, with debug information.
    #[serde(alias = "none", alias = "debug")]
    Zero,
    Size,
    #[default]
    #[serde(alias = "perf", alias = "speed")]
    Performance,
}

impl FromStr for OptimizationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" | "none" | "debug" => Ok(Self::Zero),
            "size" => Ok(Self::Size),
            "performance" | "perf" | "speed" => Ok(Self::Performance),
            other => Err(format!("unknown optimization level `{other}`")),
        }
    }
}

/// Reads [`OPTIMIZATION_ENV_VAR`]. Unparseable values are logged and ignored.
pub fn optimization_from_env() -> Option<OptimizationLevel> {
    let value = std::env::var(OPTIMIZATION_ENV_VAR).ok()?;
    match value.parse() {
        Ok(level) => Some(level),
        Err(e) => {
            tracing::warn!("ignoring {OPTIMIZATION_ENV_VAR}: {e}");
            None
        }
    }
}

/// Picks the optimization level for one compile.
///
/// Priority: the per-stage override, then the program default, then the
/// environment, then [`OptimizationLevel::Performance`].
pub fn resolve_optimization(
    stage_override: Option<OptimizationLevel>,
    program_default: Option<OptimizationLevel>,
    environment: Option<OptimizationLevel>,
) -> OptimizationLevel {
    stage_override
        .or(program_default)
        .or(environment)
        .unwrap_or_default()
}

/// Shading language of a source file, inferred from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLanguage {
    Glsl,
    Wgsl,
}

impl SourceLanguage {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("wgsl") => Self::Wgsl,
            _ => Self::Glsl,
        }
    }
}

fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    }
}

/// Compiles a loaded shader file. See [`compile`].
pub fn compile_file(
    file: &ShaderFile,
    entry_point: &str,
    level: OptimizationLevel,
) -> Result<Vec<u32>> {
    compile(&file.source, &file.path, file.stage, entry_point, level)
}

/// Cross-compiles shading-language source into SPIR-V words.
///
/// `path` only selects the front end and labels diagnostics; the source is
/// never re-read. GLSL entry points are renamed to `entry_point` so the
/// emitted module exposes the name the pipeline will ask for.
///
/// # Errors
///
/// `Compile` with the full diagnostic on any parse or validation error,
/// `EmptyOutput` if the writer produced no words.
pub fn compile(
    source: &str,
    path: &Path,
    stage: ShaderStage,
    entry_point: &str,
    level: OptimizationLevel,
) -> Result<Vec<u32>> {
    let compile_error = |diagnostic: String| ReloadError::Compile { stage, diagnostic };
    let shader_stage = naga_stage(stage);

    let language = SourceLanguage::from_path(path);
    let module = match language {
        SourceLanguage::Glsl => {
            let mut frontend = naga::front::glsl::Frontend::default();
            let options = naga::front::glsl::Options::from(shader_stage);
            let mut module = frontend
                .parse(&options, source)
                .map_err(|errors| compile_error(glsl_diagnostic(path, source, &errors.errors)))?;
            for entry in module.entry_points.iter_mut() {
                if entry.stage == shader_stage {
                    entry.name = entry_point.to_owned();
                }
            }
            module
        }
        SourceLanguage::Wgsl => naga::front::wgsl::parse_str(source).map_err(|e| {
            compile_error(format!("{}:\n{}", path.display(), e.emit_to_string(source)))
        })?,
    };

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| compile_error(format!("{}:\n{}", path.display(), e.emit_to_string(source))))?;

    let mut options = naga::back::spv::Options::default();
    // GLSL is written against Vulkan clip space already; only WGSL's y-up
    // position needs flipping.
    if language == SourceLanguage::Glsl {
        options
            .flags
            .remove(naga::back::spv::WriterFlags::ADJUST_COORDINATE_SPACE);
    }
    match level {
        OptimizationLevel::Zero => options.flags |= naga::back::spv::WriterFlags::DEBUG,
        OptimizationLevel::Size => options.flags.remove(naga::back::spv::WriterFlags::LABEL_VARYINGS),
        OptimizationLevel::Performance => {}
    }
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage,
        entry_point: entry_point.to_owned(),
    };

    let words = naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| compile_error(format!("{}: {e}", path.display())))?;

    if words.is_empty() {
        return Err(ReloadError::EmptyOutput {
            path: path.to_path_buf(),
        });
    }

    tracing::debug!(
        path = %path.display(),
        %stage,
        ?level,
        words = words.len(),
        "compiled shader"
    );
    Ok(words)
}

fn glsl_diagnostic(path: &Path, source: &str, errors: &[naga::front::glsl::Error]) -> String {
    errors
        .iter()
        .map(|error| {
            let location = error.meta.location(source);
            format!(
                "{}:{}:{}: {}",
                path.display(),
                location.line_number,
                location.line_position,
                error.kind
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TRIANGLE_VERT: &str = r#"#version 450
layout(location = 2) in vec3 a_color;
layout(location = 0) in vec2 a_position;
layout(location = 1) in float a_scale;
layout(location = 0) out vec3 v_color;

void main() {
    v_color = a_color;
    gl_Position = vec4(a_position * a_scale, float(gl_VertexIndex) * 0.0, 1.0);
}
"#;

    pub(crate) const TRIANGLE_FRAG: &str = r#"#version 450
layout(location = 0) in vec3 v_color;
layout(location = 0) out vec4 o_color;

layout(set = 0, binding = 0) uniform Globals {
    vec4 tint;
};

void main() {
    o_color = vec4(v_color, 1.0) * tint;
}
"#;

    const SPIRV_MAGIC: u32 = 0x0723_0203;
    const OP_FNEGATE: u32 = 127;

    fn count_opcode(words: &[u32], opcode: u32) -> usize {
        let mut count = 0;
        let mut at = 5;
        while at < words.len() {
            let word_count = (words[at] >> 16) as usize;
            if words[at] & 0xffff == opcode {
                count += 1;
            }
            at += word_count.max(1);
        }
        count
    }

    #[test]
    fn optimization_priority() {
        use OptimizationLevel::*;
        assert_eq!(resolve_optimization(None, None, None), Performance);
        assert_eq!(resolve_optimization(None, None, Some(Size)), Size);
        assert_eq!(resolve_optimization(None, Some(Performance), Some(Size)), Performance);
        assert_eq!(resolve_optimization(Some(Zero), Some(Performance), Some(Size)), Zero);
    }

    #[test]
    fn optimization_level_parses_aliases() {
        assert_eq!("debug".parse::<OptimizationLevel>(), Ok(OptimizationLevel::Zero));
        assert_eq!(" Size ".parse::<OptimizationLevel>(), Ok(OptimizationLevel::Size));
        assert_eq!("perf".parse::<OptimizationLevel>(), Ok(OptimizationLevel::Performance));
        assert!("fast".parse::<OptimizationLevel>().is_err());
    }

    #[test]
    fn language_follows_extension() {
        assert_eq!(SourceLanguage::from_path(Path::new("a.wgsl")), SourceLanguage::Wgsl);
        assert_eq!(SourceLanguage::from_path(Path::new("a.vert")), SourceLanguage::Glsl);
        assert_eq!(SourceLanguage::from_path(Path::new("a.glsl")), SourceLanguage::Glsl);
    }

    #[test]
    fn glsl_compiles_to_spirv() {
        for level in [
            OptimizationLevel::Zero,
            OptimizationLevel::Size,
            OptimizationLevel::Performance,
        ] {
            let words = compile(
                TRIANGLE_VERT,
                Path::new("triangle.vert"),
                ShaderStage::Vertex,
                "main",
                level,
            )
            .unwrap();
            assert_eq!(words[0], SPIRV_MAGIC);
        }

        let words = compile(
            TRIANGLE_FRAG,
            Path::new("triangle.frag"),
            ShaderStage::Fragment,
            "main",
            OptimizationLevel::Performance,
        )
        .unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn glsl_errors_carry_file_and_line() {
        let err = compile(
            "#version 450\nvoid main() {\n    this is not glsl;\n}\n",
            Path::new("broken.frag"),
            ShaderStage::Fragment,
            "main",
            OptimizationLevel::Performance,
        )
        .unwrap_err();
        match err {
            ReloadError::Compile { stage, diagnostic } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(diagnostic.contains("broken.frag:"), "{diagnostic}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn wgsl_selects_named_entry_point() {
        let source = r#"
@vertex
fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}
"#;
        let words = compile(
            source,
            Path::new("quad.wgsl"),
            ShaderStage::Vertex,
            "vs_main",
            OptimizationLevel::Performance,
        )
        .unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);

        let err = compile(
            source,
            Path::new("quad.wgsl"),
            ShaderStage::Vertex,
            "missing",
            OptimizationLevel::Performance,
        )
        .unwrap_err();
        assert!(matches!(err, ReloadError::Compile { .. }));
    }

    #[test]
    fn glsl_position_is_not_flipped() {
        let source = r#"#version 450
layout(location = 0) in vec2 a_position;

void main() {
    gl_Position = vec4(a_position, 0.0, 1.0);
}
"#;
        for level in [OptimizationLevel::Zero, OptimizationLevel::Performance] {
            let words = compile(
                source,
                Path::new("flat.vert"),
                ShaderStage::Vertex,
                "main",
                level,
            )
            .unwrap();
            assert_eq!(count_opcode(&words, OP_FNEGATE), 0);
        }
    }

    #[test]
    fn wgsl_position_is_converted_to_vulkan_clip_space() {
        let source = r#"
@vertex
fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}
"#;
        let words = compile(
            source,
            Path::new("flat.wgsl"),
            ShaderStage::Vertex,
            "vs_main",
            OptimizationLevel::Performance,
        )
        .unwrap();
        assert_ne!(count_opcode(&words, OP_FNEGATE), 0);
    }
}

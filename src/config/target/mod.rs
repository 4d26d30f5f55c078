use std::path::Path;

use crate::diagnostic::Diagnostic;
use crate::span::Span;
use crate::strategy::ElementType;

/// Shape of one acceleration-unit (mma) instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MmaShape {
    pub m: i64,
    pub n: i64,
    pub k: i64,
}

impl MmaShape {
    pub const fn new(m: i64, n: i64, k: i64) -> Self {
        Self { m, n, k }
    }
}

/// GPU target description — every hardware constant the strategy relies on.
#[derive(Clone, Debug, PartialEq)]
pub struct GpuTarget {
    /// Short identifier used in CLI and file paths (e.g. "sm_80").
    pub name: String,
    /// Human-readable name (e.g. "NVIDIA Ampere").
    pub display_name: String,
    /// Number of execution lanes in one warp.
    pub warp_size: i64,
    /// Whether global→shared copies can be issued asynchronously (cp.async).
    pub async_copy: bool,
    /// Whether the synchronized mma instruction form is available.
    pub mma_sync: bool,
    /// Hardware limit on threads per block.
    pub max_threads_per_block: i64,
}

const BUILTIN_TARGETS: &[&str] = &["sm_70", "sm_75", "sm_80", "sm_86", "sm_90"];

impl GpuTarget {
    /// Built-in Ampere configuration, the default target.
    pub fn sm80() -> Self {
        Self {
            name: "sm_80".to_string(),
            display_name: "NVIDIA Ampere".to_string(),
            warp_size: 32,
            async_copy: true,
            mma_sync: true,
            max_threads_per_block: 1024,
        }
    }

    fn builtin(name: &str) -> Option<Self> {
        let (display_name, async_copy, mma_sync) = match name {
            "sm_70" => ("NVIDIA Volta", false, false),
            "sm_75" => ("NVIDIA Turing", false, true),
            "sm_80" => return Some(Self::sm80()),
            "sm_86" => ("NVIDIA Ampere (GA10x)", true, true),
            "sm_90" => ("NVIDIA Hopper", true, true),
            _ => return None,
        };
        Some(Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            warp_size: 32,
            async_copy,
            mma_sync,
            max_threads_per_block: 1024,
        })
    }

    /// Shape of the mma instruction selected for `element` operands.
    ///
    /// The synchronized form is m16n8kK; the fragment (wmma) form is m16n16kK.
    pub fn mma_shape(&self, use_mma_sync: bool, element: ElementType) -> MmaShape {
        let k = match element.bit_width() {
            32 => 8,
            8 => 32,
            _ => 16,
        };
        if use_mma_sync {
            MmaShape::new(16, 8, k)
        } else {
            MmaShape::new(16, 16, k)
        }
    }

    /// Resolve a target by name: built-ins first, then `targets/{name}.toml`
    /// relative to the working directory.
    pub fn resolve(name: &str) -> Result<Self, Diagnostic> {
        // Reject path traversal
        if name.contains('/') || name.contains('\\') || name.contains("..") || name.starts_with('.')
        {
            return Err(Diagnostic::error(
                format!("invalid target name '{}'", name),
                Span::dummy(),
            ));
        }

        if let Some(target) = Self::builtin(name) {
            return Ok(target);
        }

        let path = std::path::PathBuf::from(format!("targets/{}.toml", name));
        if path.exists() {
            return Self::load(&path);
        }

        Err(Diagnostic::error(
            format!("unknown target '{}' (looked for '{}')", name, path.display()),
            Span::dummy(),
        )
        .with_help(format!("available targets: {}", BUILTIN_TARGETS.join(", "))))
    }

    /// Load a target description from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                format!("cannot read target config '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })?;
        Self::parse_toml(&content, path)
    }

    fn parse_toml(content: &str, path: &Path) -> Result<Self, Diagnostic> {
        let err =
            |msg: String| Diagnostic::error(format!("{}: {}", path.display(), msg), Span::dummy());

        // Unspecified keys inherit from the Ampere baseline.
        let mut target = Self::sm80();
        target.name = String::new();
        let mut section = String::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                section = trimmed[1..trimmed.len() - 1].trim().to_string();
                continue;
            }
            if section != "target" {
                continue;
            }
            if let Some((key, value)) = trimmed.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                let unquoted = value.trim_matches('"');

                match key {
                    "name" => target.name = unquoted.to_string(),
                    "display_name" => target.display_name = unquoted.to_string(),
                    "warp_size" => {
                        target.warp_size = value
                            .parse()
                            .map_err(|_| err(format!("invalid target.warp_size: {}", value)))?;
                    }
                    "max_threads_per_block" => {
                        target.max_threads_per_block = value.parse().map_err(|_| {
                            err(format!("invalid target.max_threads_per_block: {}", value))
                        })?;
                    }
                    "async_copy" => {
                        target.async_copy = value
                            .parse()
                            .map_err(|_| err(format!("invalid target.async_copy: {}", value)))?;
                    }
                    "mma_sync" => {
                        target.mma_sync = value
                            .parse()
                            .map_err(|_| err(format!("invalid target.mma_sync: {}", value)))?;
                    }
                    _ => {}
                }
            }
        }

        if target.name.is_empty() {
            return Err(err("missing target.name".to_string()));
        }
        if target.warp_size <= 0 {
            return Err(err(format!(
                "target.warp_size must be positive, got {}",
                target.warp_size
            )));
        }
        Ok(target)
    }
}

impl Default for GpuTarget {
    fn default() -> Self {
        Self::sm80()
    }
}

#[cfg(test)]
mod tests;

//! Strategy files.
//!
//! A strategy file overrides any subset of the tunables, the problem facts
//! and the target:
//!
//! ```toml
//! [strategy]
//! block_tile_sizes = [128, 64, 1]
//! pipeline_depth = 4
//!
//! [problem]
//! m = 4096
//! lhs_element = "f16"
//!
//! [target]
//! name = "sm_86"
//! ```
//!
//! Every value keeps its byte span so validation errors can point back at
//! the line that caused them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned};
use crate::strategy::{ElementType, ProblemOverrides, StrategyOverrides, ValidationError};

const STRATEGY_KEYS: &[&str] = &[
    "block_tile_sizes",
    "reduction_tile_size",
    "num_threads",
    "num_warps",
    "use_async_copies",
    "use_mma_sync",
    "pipeline_depth",
];
const PROBLEM_KEYS: &[&str] = &["m", "n", "k", "lhs_element", "rhs_element", "res_element"];
const TARGET_KEYS: &[&str] = &["name"];

/// A parsed strategy file.
#[derive(Clone, Debug)]
pub struct StrategyFile {
    pub path: PathBuf,
    pub source: String,
    pub overrides: StrategyOverrides,
    pub problem: ProblemOverrides,
    /// Target name from `[target]`, resolved by the caller.
    pub target: Option<String>,
    /// Key → span of its value.
    spans: HashMap<String, Span>,
}

impl StrategyFile {
    pub fn load(path: &Path) -> Result<Self, Diagnostic> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                format!("cannot read strategy file '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })?;
        Self::parse(source, path)
    }

    pub fn parse(source: String, path: &Path) -> Result<Self, Diagnostic> {
        let mut file = Self {
            path: path.to_path_buf(),
            source: String::new(),
            overrides: StrategyOverrides::default(),
            problem: ProblemOverrides::default(),
            target: None,
            spans: HashMap::new(),
        };

        let mut section: Option<Spanned<String>> = None;
        let mut offset = 0usize;

        for raw in source.split_inclusive('\n') {
            let line_start = offset;
            offset += raw.len();

            let line = strip_comment(raw.trim_end_matches(['\n', '\r']));
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let lead = line.len() - line.trim_start().len();
            let line_span = span_at(line_start + lead, trimmed.len());

            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                let name = trimmed[1..trimmed.len() - 1].trim().to_string();
                if !matches!(name.as_str(), "strategy" | "problem" | "target") {
                    return Err(Diagnostic::error(
                        format!("unknown section [{}]", name),
                        line_span,
                    )
                    .with_help("expected [strategy], [problem] or [target]".to_string()));
                }
                section = Some(Spanned::new(name, line_span));
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(Diagnostic::error(
                    format!("expected `key = value`, found '{}'", trimmed),
                    line_span,
                ));
            };
            let key = key.trim();
            let value_lead = value.len() - value.trim_start().len();
            let value_start = line_start + key_end(line) + 1 + value_lead;
            let value = Spanned::new(value.trim(), span_at(value_start, value.trim().len()));

            let Some(section) = &section else {
                return Err(Diagnostic::error(
                    format!("key `{}` outside of any section", key),
                    line_span,
                ));
            };
            match section.node.as_str() {
                "strategy" => file.set_strategy(key, &value, line_span)?,
                "problem" => file.set_problem(key, &value, line_span)?,
                _ => file.set_target(key, &value, line_span)?,
            }
            file.spans.insert(key.to_string(), value.span);
        }

        file.source = source;
        Ok(file)
    }

    fn set_strategy(
        &mut self,
        key: &str,
        value: &Spanned<&str>,
        line_span: Span,
    ) -> Result<(), Diagnostic> {
        let o = &mut self.overrides;
        match key {
            "block_tile_sizes" => o.block_tile_sizes = Some(parse_int_array(key, value)?),
            "num_threads" => o.num_threads = Some(parse_int_array(key, value)?),
            "num_warps" => o.num_warps = Some(parse_int_array(key, value)?),
            "reduction_tile_size" => o.reduction_tile_size = Some(parse_int(key, value)?),
            "pipeline_depth" => o.pipeline_depth = Some(parse_int(key, value)?),
            "use_async_copies" => o.use_async_copies = Some(parse_bool(key, value)?),
            "use_mma_sync" => o.use_mma_sync = Some(parse_bool(key, value)?),
            _ => return Err(unknown_key("strategy", key, STRATEGY_KEYS, line_span)),
        }
        Ok(())
    }

    fn set_problem(
        &mut self,
        key: &str,
        value: &Spanned<&str>,
        line_span: Span,
    ) -> Result<(), Diagnostic> {
        let p = &mut self.problem;
        match key {
            "m" => p.m = Some(parse_int(key, value)?),
            "n" => p.n = Some(parse_int(key, value)?),
            "k" => p.k = Some(parse_int(key, value)?),
            "lhs_element" => p.lhs_element = Some(parse_element(key, value)?),
            "rhs_element" => p.rhs_element = Some(parse_element(key, value)?),
            "res_element" => p.res_element = Some(parse_element(key, value)?),
            _ => return Err(unknown_key("problem", key, PROBLEM_KEYS, line_span)),
        }
        Ok(())
    }

    fn set_target(
        &mut self,
        key: &str,
        value: &Spanned<&str>,
        line_span: Span,
    ) -> Result<(), Diagnostic> {
        match key {
            "name" => self.target = Some(parse_string(key, value)?),
            _ => return Err(unknown_key("target", key, TARGET_KEYS, line_span)),
        }
        Ok(())
    }

    /// Span of the value written for `key`, or a dummy span if the file
    /// does not set it.
    pub fn span_of(&self, key: &str) -> Span {
        self.spans.get(key).copied().unwrap_or_else(Span::dummy)
    }

    pub fn filename(&self) -> String {
        self.path.display().to_string()
    }

    /// Turn validation errors into diagnostics anchored in this file.
    pub fn diagnostics(&self, errors: &[ValidationError]) -> Vec<Diagnostic> {
        errors
            .iter()
            .map(|e| e.to_diagnostic(self.span_of(e.key)))
            .collect()
    }
}

fn span_at(start: usize, len: usize) -> Span {
    Span::new(start as u32, (start + len) as u32)
}

fn key_end(line: &str) -> usize {
    line.find('=').unwrap_or(line.len())
}

/// Drop a trailing `# comment` unless the `#` sits inside a string.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

fn invalid(key: &str, value: &Spanned<&str>, expected: &str) -> Diagnostic {
    Diagnostic::error(
        format!("invalid value for `{}`: {}", key, value.node),
        value.span,
    )
    .with_help(format!("expected {}", expected))
}

fn unknown_key(section: &str, key: &str, known: &[&str], span: Span) -> Diagnostic {
    Diagnostic::error(format!("unknown key `{}` in [{}]", key, section), span)
        .with_help(format!("expected one of: {}", known.join(", ")))
}

fn parse_int(key: &str, value: &Spanned<&str>) -> Result<i64, Diagnostic> {
    value
        .node
        .parse()
        .map_err(|_| invalid(key, value, "an integer"))
}

fn parse_bool(key: &str, value: &Spanned<&str>) -> Result<bool, Diagnostic> {
    value
        .node
        .parse()
        .map_err(|_| invalid(key, value, "`true` or `false`"))
}

fn parse_string(key: &str, value: &Spanned<&str>) -> Result<String, Diagnostic> {
    let v = value.node;
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        Ok(v[1..v.len() - 1].to_string())
    } else {
        Err(invalid(key, value, "a quoted string"))
    }
}

fn parse_element(key: &str, value: &Spanned<&str>) -> Result<ElementType, Diagnostic> {
    let name = parse_string(key, value)?;
    ElementType::parse(&name).ok_or_else(|| invalid(key, value, "one of f16, bf16, f32, i8, i32"))
}

/// Parse a TOML integer array: `[128, 128, 1]`.
fn parse_int_array(key: &str, value: &Spanned<&str>) -> Result<Vec<i64>, Diagnostic> {
    let v = value.node;
    if !v.starts_with('[') || !v.ends_with(']') {
        return Err(invalid(key, value, "an integer array like [128, 128, 1]"));
    }
    let inner = v[1..v.len() - 1].trim();
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse()
                .map_err(|_| invalid(key, value, "an integer array like [128, 128, 1]"))
        })
        .collect()
}

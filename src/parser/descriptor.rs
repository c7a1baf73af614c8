//! Function descriptors produced by the parser.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::{FfiType, IntWidth};

/// File and 1-based line of a declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: Arc<Path>,
    pub line: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        let file: PathBuf = file.into();
        SourceLocation {
            file: Arc::from(file.as_path()),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// Where a binding executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncPolicy {
    /// On the calling thread
    #[default]
    Sync,
    /// On the worker pool, returning a pending handle
    Async,
}

/// Declared per-call expense, used for benchmark defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CostHint {
    Low,
    High,
    #[default]
    Unspecified,
}

impl fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPolicy::Sync => write!(f, "sync"),
            SyncPolicy::Async => write!(f, "async"),
        }
    }
}

impl fmt::Display for CostHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostHint::Low => write!(f, "low"),
            CostHint::High => write!(f, "high"),
            CostHint::Unspecified => write!(f, "unspecified"),
        }
    }
}

/// Typed directive set read once from the comment block above a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Annotations {
    pub policy: SyncPolicy,
    pub cost: CostHint,
}

/// One parsed top-level function. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    name: String,
    return_type: FfiType,
    params: Vec<FfiType>,
    param_names: Vec<Option<String>>,
    return_width: Option<IntWidth>,
    param_widths: Vec<Option<IntWidth>>,
    annotations: Annotations,
    location: SourceLocation,
}

impl FunctionDescriptor {
    pub fn new(
        name: impl Into<String>,
        return_type: FfiType,
        params: Vec<(FfiType, Option<String>)>,
        annotations: Annotations,
        location: SourceLocation,
    ) -> Self {
        let (params, param_names): (Vec<_>, _) = params.into_iter().unzip();
        FunctionDescriptor {
            name: name.into(),
            return_type,
            param_widths: vec![None; params.len()],
            params,
            param_names,
            return_width: None,
            annotations,
            location,
        }
    }

    /// Record the declared widths of narrow integer return and parameters.
    /// `params` must have one entry per parameter.
    pub fn with_widths(
        mut self,
        return_width: Option<IntWidth>,
        params: Vec<Option<IntWidth>>,
    ) -> Self {
        debug_assert_eq!(params.len(), self.params.len());
        self.return_width = return_width;
        self.param_widths = params;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_type(&self) -> &FfiType {
        &self.return_type
    }

    pub fn params(&self) -> &[FfiType] {
        &self.params
    }

    /// Declared parameter names (`None` for unnamed parameters)
    pub fn param_names(&self) -> &[Option<String>] {
        &self.param_names
    }

    /// Declared width of the return value when it is a narrow integer
    pub fn return_width(&self) -> Option<IntWidth> {
        self.return_width
    }

    /// Declared widths of narrow integer parameters, `None` elsewhere
    pub fn param_widths(&self) -> &[Option<IntWidth>] {
        &self.param_widths
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn annotations(&self) -> Annotations {
        self.annotations
    }

    pub fn policy(&self) -> SyncPolicy {
        self.annotations.policy
    }

    pub fn cost(&self) -> CostHint {
        self.annotations.cost
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }
}

impl fmt::Display for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.return_width {
            Some(width) => write!(f, "{} {}(", width, self.name)?,
            None => write!(f, "{} {}(", self.return_type, self.name)?,
        }
        for (i, (param, width)) in self.params.iter().zip(&self.param_widths).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match width {
                Some(width) => write!(f, "{}", width)?,
                None => write!(f, "{}", param)?,
            }
        }
        write!(f, ") [{}, cost {}]", self.annotations.policy, self.annotations.cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_signature() {
        let desc = FunctionDescriptor::new(
            "twice",
            FfiType::Int32,
            vec![(FfiType::Int32, Some("x".to_string()))],
            Annotations::default(),
            SourceLocation::new("echo.c", 40),
        );
        assert_eq!(desc.to_string(), "i32 twice(i32) [sync, cost unspecified]");
        assert_eq!(desc.location().to_string(), "echo.c:40");
        assert_eq!(desc.param_names(), &[Some("x".to_string())]);
        assert_eq!(desc.param_widths(), &[None]);
    }

    #[test]
    fn test_display_narrow_widths() {
        let desc = FunctionDescriptor::new(
            "crc32_update",
            FfiType::Int32,
            vec![(FfiType::Int32, None), (FfiType::Int32, None)],
            Annotations::default(),
            SourceLocation::new("crc32.c", 7),
        )
        .with_widths(None, vec![None, Some(IntWidth::U8)]);
        assert_eq!(
            desc.to_string(),
            "i32 crc32_update(i32, u8) [sync, cost unspecified]"
        );
    }
}

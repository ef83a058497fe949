//! Configuration threaded through every inference call.

use std::fmt;
use std::str::FromStr;

use crate::env::{env_flag, env_usize};

/// Device family the graph is being compiled for.
///
/// Some operator configurations are only valid on particular platforms, eg.
/// the `NHWC` layout for pooling is only supported on GPUs.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum TargetPlatform {
    #[default]
    Cpu,
    Gpu,
    Ascend,
}

impl TargetPlatform {
    pub fn name(self) -> &'static str {
        match self {
            TargetPlatform::Cpu => "CPU",
            TargetPlatform::Gpu => "GPU",
            TargetPlatform::Ascend => "Ascend",
        }
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for TargetPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CPU" => Ok(TargetPlatform::Cpu),
            "GPU" => Ok(TargetPlatform::Gpu),
            "ASCEND" => Ok(TargetPlatform::Ascend),
            _ => Err(format!("unknown device target \"{}\"", s)),
        }
    }
}

/// Default maximum number of elements in a folded constant.
pub const DEFAULT_FOLD_LIMIT: usize = 1 << 16;

/// Compiler-supplied context for shape and dtype inference.
///
/// Inference functions are pure functions of their inputs and this context.
#[derive(Clone, Debug, PartialEq)]
pub struct InferContext {
    /// Platform the graph is compiled for.
    pub target: TargetPlatform,

    /// Whether outputs whose inputs are all constants get a folded value.
    pub fold_constants: bool,

    /// Outputs with more elements than this are not folded.
    pub fold_limit: usize,
}

impl Default for InferContext {
    fn default() -> Self {
        InferContext {
            target: TargetPlatform::default(),
            fold_constants: true,
            fold_limit: DEFAULT_FOLD_LIMIT,
        }
    }
}

impl InferContext {
    /// Create a context for a given target with default folding settings.
    pub fn for_target(target: TargetPlatform) -> Self {
        InferContext {
            target,
            ..Default::default()
        }
    }

    /// Create a context from environment variables.
    ///
    /// - `OPSHAPE_DEVICE_TARGET`: `CPU`, `GPU` or `Ascend`
    /// - `OPSHAPE_FOLD_CONSTANTS`: boolean flag, enabled by default
    /// - `OPSHAPE_FOLD_LIMIT`: maximum element count of folded values
    pub fn from_env() -> Self {
        let target = match std::env::var("OPSHAPE_DEVICE_TARGET") {
            Ok(value) => value.parse().unwrap_or_else(|err: String| {
                tracing::warn!("{}, using {}", err, TargetPlatform::default());
                TargetPlatform::default()
            }),
            Err(_) => TargetPlatform::default(),
        };
        InferContext {
            target,
            fold_constants: env_flag("OPSHAPE_FOLD_CONSTANTS", true),
            fold_limit: env_usize("OPSHAPE_FOLD_LIMIT", DEFAULT_FOLD_LIMIT),
        }
    }

    /// Return true if an output with `len` elements may be folded.
    pub fn can_fold(&self, len: usize) -> bool {
        self.fold_constants && len <= self.fold_limit
    }
}

#[cfg(test)]
mod tests {
    use super::{InferContext, TargetPlatform};

    #[test]
    fn test_parse_target() {
        assert_eq!("gpu".parse::<TargetPlatform>(), Ok(TargetPlatform::Gpu));
        assert_eq!("Ascend".parse::<TargetPlatform>(), Ok(TargetPlatform::Ascend));
        assert!("tpu".parse::<TargetPlatform>().is_err());
    }

    #[test]
    fn test_can_fold() {
        let ctx = InferContext {
            fold_limit: 4,
            ..Default::default()
        };
        assert!(ctx.can_fold(4));
        assert!(!ctx.can_fold(5));

        let ctx = InferContext {
            fold_constants: false,
            ..Default::default()
        };
        assert!(!ctx.can_fold(1));
    }
}

use std::fmt;

use bon::bon;

/// Backend knobs that change the produced binary, and therefore the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompileOptions {
    /// Warps per program instance.
    pub num_warps: u32,
    /// Run constant folding, CSE and DCE before emission.
    pub optimize: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { num_warps: 4, optimize: true }
    }
}

#[bon]
impl CompileOptions {
    #[builder]
    pub fn new(#[builder(default = 4)] num_warps: u32, #[builder(default = true)] optimize: bool) -> Self {
        Self { num_warps: num_warps.clamp(1, 32).next_power_of_two(), optimize }
    }

    /// Read options from the environment.
    ///
    /// * `KILN_NUM_WARPS` - warps per program (default: 4)
    /// * `KILN_NOOPT` - disable optimizations if set
    pub fn from_env() -> Self {
        let num_warps = std::env::var("KILN_NUM_WARPS").ok().and_then(|s| s.parse().ok()).unwrap_or(4);
        let optimize = std::env::var("KILN_NOOPT").is_err();
        Self::builder().num_warps(num_warps).optimize(optimize).build()
    }
}

impl fmt::Display for CompileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "num_warps={},optimize={}", self.num_warps, self.optimize)
    }
}

use std::path::PathBuf;

use bon::bon;
use kiln_ir::CompileOptions;

/// Configuration of a [`Compiler`](crate::Compiler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Root of the on-disk artifact mirror and of written hsaco files.
    pub cache_dir: PathBuf,
    /// Mirror compiled artifacts to `cache_dir`.
    pub disk_cache: bool,
    /// Maximum number of resident artifacts; `None` is unbounded.
    pub cache_capacity: Option<usize>,
    pub options: CompileOptions,
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("kiln")
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[bon]
impl RuntimeConfig {
    #[builder]
    pub fn new(
        #[builder(into, default = default_cache_dir())] cache_dir: PathBuf,
        #[builder(default)] disk_cache: bool,
        cache_capacity: Option<usize>,
        #[builder(default)] options: CompileOptions,
    ) -> Self {
        Self { cache_dir, disk_cache, cache_capacity: cache_capacity.filter(|c| *c > 0), options }
    }

    /// Read configuration from the environment.
    ///
    /// * `KILN_CACHE_DIR` - cache root (default: the user cache dir + `kiln`)
    /// * `KILN_DISK_CACHE` - `1`, `true` or `on` enables the disk mirror
    /// * `KILN_CACHE_CAPACITY` - resident artifact limit (default: unbounded)
    /// * `KILN_NUM_WARPS`, `KILN_NOOPT` - see [`CompileOptions::from_env`]
    pub fn from_env() -> Self {
        let cache_dir = std::env::var_os("KILN_CACHE_DIR").map(PathBuf::from).unwrap_or_else(default_cache_dir);
        let disk_cache = std::env::var("KILN_DISK_CACHE")
            .is_ok_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes"));
        let cache_capacity = std::env::var("KILN_CACHE_CAPACITY").ok().and_then(|s| s.parse().ok());
        Self::builder()
            .cache_dir(cache_dir)
            .disk_cache(disk_cache)
            .maybe_cache_capacity(cache_capacity)
            .options(CompileOptions::from_env())
            .build()
    }
}

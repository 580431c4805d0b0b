//! Simulated accelerator context.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bon::bon;
use kiln_codegen::BinaryFormat;
use kiln_codegen::kir::Imm;
use kiln_dtype::{Target, TargetFamily};
use parking_lot::Mutex;
use snafu::ensure;
use tracing::{debug, error, instrument};

use crate::error::{
    DeviceLostSnafu, FaultSnafu, InvalidDeviceSnafu, InvalidModuleSnafu, LaunchSnafu, Result,
};
use crate::exec::{self, Geometry};
use crate::memory::Memory;
use crate::module::Module;
use crate::stream::Stream;

/// Default device memory: 256 MiB.
pub const DEFAULT_MEMORY: usize = 256 << 20;

const DEFAULT_DEVICE: &str = "cuda:sm_80";

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(0);

/// Hardware limits checked before a launch is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_grid: [u64; 3],
    pub max_threads_per_block: u32,
    pub max_shared_mem: u32,
    pub registers_per_block: u32,
}

impl DeviceLimits {
    pub fn of(target: &Target) -> Self {
        match target.family() {
            TargetFamily::Cuda => Self {
                max_grid: [(1 << 31) - 1, 65535, 65535],
                max_threads_per_block: 1024,
                max_shared_mem: 48 << 10,
                registers_per_block: 65536,
            },
            TargetFamily::Rocm => Self {
                max_grid: [u32::MAX as u64, 65535, 65535],
                max_threads_per_block: 1024,
                max_shared_mem: 64 << 10,
                registers_per_block: 65536,
            },
        }
    }
}

struct DeviceInner {
    id: u64,
    name: String,
    target: Target,
    limits: DeviceLimits,
    memory: Memory,
    default_stream: Stream,
    /// Reason the device was lost, once it is.
    lost: Mutex<Option<String>>,
}

/// Handle to an accelerator context. Clones refer to the same device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").field("name", &self.inner.name).field("target", &self.inner.target).finish()
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Device {}

#[bon]
impl Device {
    #[builder]
    pub fn new(target: Target, #[builder(default = DEFAULT_MEMORY)] memory: usize) -> Self {
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}:{id}", target.family());
        // Disjoint 1 TiB address window per device; never zero so null stays unmapped.
        let base = (id + 1) << 40;
        let limits = DeviceLimits::of(&target);
        let default_stream = Stream::spawn(&name);
        debug!(device = %name, %target, memory, "device created");
        Self {
            inner: Arc::new(DeviceInner {
                id,
                name,
                target,
                limits,
                memory: Memory::new(base, memory.min(1 << 40)),
                default_stream,
                lost: Mutex::new(None),
            }),
        }
    }

    /// Create a device from `KILN_DEVICE` (default: `cuda:sm_80`).
    pub fn from_env() -> Result<Self> {
        let spec = std::env::var("KILN_DEVICE").unwrap_or_else(|_| DEFAULT_DEVICE.to_string());
        let target = Target::from_str(&spec)
            .map_err(|err| InvalidDeviceSnafu { spec: spec.clone(), reason: err.to_string() }.build())?;
        Ok(Self::builder().target(target).build())
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.inner.limits
    }

    pub(crate) fn memory(&self) -> &Memory {
        &self.inner.memory
    }

    pub fn memory_used(&self) -> usize {
        self.inner.memory.used()
    }

    pub fn is_lost(&self) -> bool {
        self.inner.lost.lock().is_some()
    }

    /// Mark the device unusable. The first reason wins.
    pub fn mark_lost(&self, reason: impl Into<String>) {
        let mut lost = self.inner.lost.lock();
        if lost.is_none() {
            let reason = reason.into();
            error!(device = %self.inner.name, %reason, "device lost");
            *lost = Some(reason);
        }
    }

    pub fn check_alive(&self) -> Result<()> {
        match &*self.inner.lost.lock() {
            Some(reason) => DeviceLostSnafu { device: self.inner.name.clone(), reason: reason.clone() }.fail(),
            None => Ok(()),
        }
    }

    /// Whether `address` points into memory allocated on this device.
    pub fn owns(&self, address: u64) -> bool {
        self.inner.memory.owns(address)
    }

    pub fn default_stream(&self) -> &Stream {
        &self.inner.default_stream
    }

    pub fn create_stream(&self) -> Result<Stream> {
        self.check_alive()?;
        Ok(Stream::spawn(&self.inner.name))
    }

    /// Block until the default stream is idle.
    pub fn synchronize(&self) -> Result<()> {
        self.inner.default_stream.synchronize(None)
    }

    /// Load a kernel binary.
    ///
    /// The binary must be in this device's format and built for its architecture.
    pub fn load_module(&self, bytes: &[u8]) -> Result<Module> {
        self.check_alive()?;
        let module = Module::decode(bytes, self.inner.id).map_err(|reason| InvalidModuleSnafu { reason }.build())?;
        let expected = BinaryFormat::of(&self.inner.target);
        ensure!(
            module.format() == expected,
            InvalidModuleSnafu { reason: format!("{} binary on a {expected} device", module.format()) }
        );
        let arch = self.inner.target.arch_name();
        ensure!(
            module.arch() == arch,
            InvalidModuleSnafu { reason: format!("built for {}, device is {arch}", module.arch()) }
        );
        Ok(module)
    }

    fn check_launch(&self, module: &Module, grid: [u64; 3], args: &[Imm]) -> Result<()> {
        let limits = &self.inner.limits;
        ensure!(
            module.device_id() == self.inner.id,
            LaunchSnafu { reason: format!("module `{}` was loaded on another device", module.entry()) }
        );
        for (axis, (dim, max)) in grid.iter().zip(limits.max_grid).enumerate() {
            ensure!(*dim <= max, LaunchSnafu { reason: format!("grid dimension {axis} is {dim}, limit is {max}") });
        }
        let threads = module.num_warps() * self.inner.target.warp_size();
        ensure!(
            threads <= limits.max_threads_per_block,
            LaunchSnafu { reason: format!("{threads} threads per block, limit is {}", limits.max_threads_per_block) }
        );
        ensure!(
            module.shared_mem() <= limits.max_shared_mem,
            LaunchSnafu {
                reason: format!("{} bytes of shared memory, limit is {}", module.shared_mem(), limits.max_shared_mem)
            }
        );
        let registers = module.registers() as u64 * threads as u64;
        ensure!(
            registers <= limits.registers_per_block as u64,
            LaunchSnafu { reason: format!("{registers} registers per block, limit is {}", limits.registers_per_block) }
        );
        let params = module.kernel().params.len();
        ensure!(
            args.len() == params,
            LaunchSnafu { reason: format!("kernel takes {params} arguments, got {}", args.len()) }
        );
        Ok(())
    }

    /// Enqueue `module` over `grid` on `stream`.
    ///
    /// Returns once the launch is queued. Pointer arguments are device addresses.
    #[instrument(skip_all, fields(kernel = module.entry(), ?grid, stream = stream.id()))]
    pub fn launch(&self, module: &Module, grid: [u64; 3], args: Vec<Imm>, stream: &Stream) -> Result<Completion> {
        self.check_alive()?;
        self.check_launch(module, grid, &args)?;
        // `check_launch` bounds every dimension by a `u32`-sized limit.
        let geometry = Geometry { grid: grid.map(|d| d as u32) };

        let device = self.clone();
        let image = Arc::clone(module.image());
        let value = stream.submit(move || {
            device.check_alive()?;
            let kernel = &image.kernel;
            let memory = device.memory();
            let writes = {
                let view = memory.view();
                exec::run_grid(kernel, &args, geometry, &view)
            };
            let outcome = writes.and_then(|writes| memory.commit(&writes));
            outcome.map_err(|reason| {
                device.mark_lost(format!("kernel `{}` faulted: {reason}", kernel.name));
                FaultSnafu { kernel: kernel.name.clone(), reason }.build()
            })
        });
        Ok(Completion { stream: stream.clone(), value })
    }
}

/// Completion of one enqueued launch.
#[derive(Debug, Clone)]
pub struct Completion {
    stream: Stream,
    value: u64,
}

impl Completion {
    pub fn is_complete(&self) -> bool {
        self.stream.signal().is_reached(self.value)
    }

    /// Outcome, if the launch has run.
    pub fn poll(&self) -> Option<Result<()>> {
        self.stream.signal().poll(self.value)
    }

    pub fn wait(&self) -> Result<()> {
        self.stream.signal().wait(self.value, None)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        self.stream.signal().wait(self.value, Some(timeout))
    }

    pub fn stream_id(&self) -> u64 {
        self.stream.id()
    }
}

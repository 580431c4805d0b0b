//! Binding arguments and launching compiled kernels.

use std::fmt;
use std::time::Duration;

use bytemuck::Pod;
use kiln_codegen::kir::Imm;
use kiln_device::{Completion, Device, DeviceBuffer, Stream};
use kiln_dtype::{DType, HasDType, ScalarDType};
use kiln_ir::{ConstexprValue, ParamKind};
use snafu::ensure;
use tracing::{debug, instrument, trace};

use crate::compiler::CompiledKernel;
use crate::error::{ArgumentMismatchSnafu, LaunchSnafu, Result};
use crate::grid::{Grid, Meta, MetaValue};

/// A launch argument: a device buffer or a scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Buffer { address: u64, device: u64, element: ScalarDType },
    Int(i64),
    /// Integers above `i64::MAX`.
    UInt(u64),
    Float(f64),
    Bool(bool),
    /// Enumeration member, only meaningful for constexpr parameters.
    Enum(String),
}

impl Arg {
    pub fn buffer<T: Pod + HasDType>(buffer: &DeviceBuffer<T>) -> Self {
        Self::Buffer { address: buffer.address(), device: buffer.device().id(), element: T::DTYPE }
    }

    /// Value as a constexpr binding, if it can be one.
    pub fn to_constexpr(&self) -> Option<ConstexprValue> {
        match self {
            Self::Int(v) => Some(ConstexprValue::Int(*v)),
            Self::UInt(v) => i64::try_from(*v).ok().map(ConstexprValue::Int),
            Self::Bool(v) => Some(ConstexprValue::Bool(*v)),
            Self::Enum(s) => Some(ConstexprValue::Enum(s.clone())),
            Self::Buffer { .. } | Self::Float(_) => None,
        }
    }

    /// Signature type inferred from the value: `*<element>` for buffers,
    /// `i32`/`i64` for integers by range, `fp32` for floats, `i1` for booleans.
    pub fn infer_dtype(&self) -> Option<DType> {
        Some(match self {
            Self::Buffer { element, .. } => DType::ptr(*element),
            Self::Int(v) if i32::try_from(*v).is_ok() => DType::Scalar(ScalarDType::Int32),
            Self::Int(_) => DType::Scalar(ScalarDType::Int64),
            Self::UInt(_) => DType::Scalar(ScalarDType::UInt64),
            Self::Float(_) => DType::Scalar(ScalarDType::Float32),
            Self::Bool(_) => DType::Scalar(ScalarDType::Bool),
            Self::Enum(_) => return None,
        })
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Buffer { .. } => "buffer",
            Self::Int(_) | Self::UInt(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Enum(_) => "enum",
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer { address, element, .. } => write!(f, "*{}@{address:#x}", element.token()),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Enum(s) => write!(f, "'{s}'"),
        }
    }
}

impl<T: Pod + HasDType> From<&DeviceBuffer<T>> for Arg {
    fn from(buffer: &DeviceBuffer<T>) -> Self {
        Self::buffer(buffer)
    }
}

macro_rules! impl_arg_from {
    ($($ty:ty => $variant:ident as $as:ty),* $(,)?) => {
        $(impl From<$ty> for Arg {
            fn from(v: $ty) -> Self {
                Self::$variant(v as $as)
            }
        })*
    };
}

impl_arg_from! {
    i8 => Int as i64, i16 => Int as i64, i32 => Int as i64, i64 => Int as i64,
    u8 => Int as i64, u16 => Int as i64, u32 => Int as i64,
    f32 => Float as f64, f64 => Float as f64,
}

impl From<u64> for Arg {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(Self::UInt(v), Self::Int)
    }
}

impl From<usize> for Arg {
    fn from(v: usize) -> Self {
        Self::from(v as u64)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Self::Enum(v.to_string())
    }
}

/// Positional and named launch arguments.
///
/// ```ignore
/// let args = Args::new().arg(&x).arg(&out).named("n", 1024);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub positional: Vec<Arg>,
    pub named: Vec<(String, Arg)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Arg>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>, value: impl Into<Arg>) -> Self {
        self.named.push((name.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

impl<A: Into<Arg>> FromIterator<A> for Args {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        Self { positional: iter.into_iter().map(Into::into).collect(), named: Vec::new() }
    }
}

/// Runtime arguments resolved against a kernel's calling convention.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundArgs {
    pub values: Vec<Imm>,
    pub meta: Meta,
}

fn mismatch(reason: String) -> crate::Error {
    ArgumentMismatchSnafu { reason }.build()
}

/// Convert `arg` to the immediate passed for a parameter of type `dtype`.
fn convert(name: &str, dtype: DType, arg: &Arg, device: &Device) -> Result<Imm> {
    match (dtype, arg) {
        (DType::Ptr { base, .. }, Arg::Buffer { address, device: owner, element }) => {
            ensure!(
                *element == base,
                ArgumentMismatchSnafu { reason: format!("`{name}` expects {dtype}, got a *{} buffer", element.token()) }
            );
            ensure!(
                *owner == device.id() && device.owns(*address),
                ArgumentMismatchSnafu { reason: format!("buffer for `{name}` lives on another device") }
            );
            Ok(Imm::Int(*address as i64))
        }
        (DType::Ptr { .. }, other) => {
            Err(mismatch(format!("`{name}` expects a {dtype} buffer, got {} {other}", other.kind())))
        }
        (DType::Scalar(scalar), arg) if scalar.is_float() => match arg {
            Arg::Float(v) => Ok(Imm::Float(*v)),
            Arg::Int(v) => Ok(Imm::Float(*v as f64)),
            Arg::UInt(v) => Ok(Imm::Float(*v as f64)),
            other => Err(mismatch(format!("`{name}` expects {dtype}, got {} {other}", other.kind()))),
        },
        (DType::Scalar(scalar), arg) => {
            let value: i128 = match arg {
                Arg::Int(v) => *v as i128,
                Arg::UInt(v) => *v as i128,
                Arg::Bool(v) => *v as i128,
                other => return Err(mismatch(format!("`{name}` expects {dtype}, got {} {other}", other.kind()))),
            };
            let (lo, hi) = scalar.int_range().unwrap_or((0, 1));
            ensure!(
                (lo..=hi).contains(&value),
                ArgumentMismatchSnafu { reason: format!("{value} does not fit `{name}` of type {dtype}") }
            );
            Ok(Imm::Int(value as i64))
        }
    }
}

/// Bind `args` positionally, then by name, to the runtime parameters of `kernel`.
///
/// Named constexpr arguments are accepted when they equal the compiled binding.
pub fn bind(kernel: &CompiledKernel, args: &Args, device: &Device) -> Result<BoundArgs> {
    let params = &kernel.metadata().params;
    ensure!(
        args.positional.len() <= params.len(),
        ArgumentMismatchSnafu {
            reason: format!("`{}` takes {} runtime arguments, got {}", kernel.name(), params.len(), args.positional.len())
        }
    );

    let mut slots: Vec<Option<&Arg>> = vec![None; params.len()];
    for (slot, arg) in slots.iter_mut().zip(&args.positional) {
        *slot = Some(arg);
    }

    for (name, arg) in &args.named {
        if let Some(index) = params.iter().position(|p| &p.name == name) {
            ensure!(slots[index].is_none(), ArgumentMismatchSnafu { reason: format!("`{name}` bound twice") });
            slots[index] = Some(arg);
            continue;
        }
        let constexpr = kernel.params().iter().any(|p| &p.name == name && p.kind == ParamKind::Constexpr);
        ensure!(constexpr, ArgumentMismatchSnafu { reason: format!("`{}` has no parameter `{name}`", kernel.name()) });
        let compiled = kernel.constants().get(name);
        ensure!(
            arg.to_constexpr().as_ref() == compiled,
            ArgumentMismatchSnafu { reason: format!("constexpr `{name}` = {arg} differs from the compiled binding") }
        );
    }

    let mut meta = Meta::from_constants(kernel.constants());
    let mut values = Vec::with_capacity(params.len());
    for (param, slot) in params.iter().zip(slots) {
        let arg = slot.ok_or_else(|| mismatch(format!("missing argument `{}`", param.name)))?;
        let value = convert(&param.name, param.dtype, arg, device)?;
        if let DType::Scalar(scalar) = param.dtype {
            let meta_value = match value {
                _ if scalar.is_bool() => MetaValue::Bool(value.as_i64() != 0),
                Imm::Int(v) => MetaValue::Int(v),
                Imm::Float(v) => MetaValue::Float(v),
            };
            meta.insert(param.name.clone(), meta_value);
        }
        values.push(value);
    }
    Ok(BoundArgs { values, meta })
}

/// Handle to an enqueued launch. Dropping it does not cancel the work.
#[derive(Debug, Clone)]
pub struct LaunchHandle {
    kernel: String,
    grid: Grid,
    completion: Option<Completion>,
}

impl LaunchHandle {
    fn completed(kernel: String, grid: Grid) -> Self {
        Self { kernel, grid, completion: None }
    }

    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    /// Whether no device work was issued (empty grid).
    pub fn is_noop(&self) -> bool {
        self.completion.is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.completion.as_ref().is_none_or(Completion::is_complete)
    }

    /// Block until the launch has run and report its outcome.
    pub fn wait(&self) -> Result<()> {
        match &self.completion {
            Some(completion) => Ok(completion.wait()?),
            None => Ok(()),
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        match &self.completion {
            Some(completion) => Ok(completion.wait_timeout(timeout)?),
            None => Ok(()),
        }
    }
}

/// Launch `kernel` on the default stream of `device` with a grid computed from META.
pub fn launch<F, G>(kernel: &CompiledKernel, grid: F, args: Args, device: &Device) -> Result<LaunchHandle>
where
    F: FnOnce(&Meta) -> G,
    G: Into<Grid>,
{
    launch_on(kernel, grid, args, device, device.default_stream())
}

/// Launch `kernel` over a fixed grid.
pub fn launch_grid(kernel: &CompiledKernel, grid: impl Into<Grid>, args: Args, device: &Device) -> Result<LaunchHandle> {
    let grid = grid.into();
    launch(kernel, |_| grid, args, device)
}

/// Launch `kernel` on `stream`.
///
/// Returns once the launch is enqueued; in-stream order is submission order.
#[instrument(skip_all, fields(kernel = kernel.name(), device = device.name()))]
pub fn launch_on<F, G>(kernel: &CompiledKernel, grid: F, args: Args, device: &Device, stream: &Stream) -> Result<LaunchHandle>
where
    F: FnOnce(&Meta) -> G,
    G: Into<Grid>,
{
    device.check_alive()?;
    ensure!(
        kernel.target() == device.target(),
        LaunchSnafu { reason: format!("`{}` was built for {}, device is {}", kernel.name(), kernel.target(), device.target()) }
    );

    let bound = bind(kernel, &args, device)?;
    let grid: Grid = grid(&bound.meta).into();
    if grid.is_empty() {
        trace!(%grid, "empty grid, nothing to launch");
        return Ok(LaunchHandle::completed(kernel.name().to_string(), grid));
    }

    let module = kernel.module(device)?;
    let completion = device.launch(&module, grid.dims(), bound.values, stream)?;
    debug!(%grid, stream = stream.id(), "enqueued");
    Ok(LaunchHandle { kernel: kernel.name().to_string(), grid, completion: Some(completion) })
}

use kiln_device::{Device, DeviceBuffer};
use kiln_ir::test::fixtures::{add_kernel, fill_kernel};
use kiln_ir::{Constants, KernelDescriptor, Param, Target};
use test_case::test_case;

use crate::test::compiler;
use crate::{Arg, Args, CompiledKernel, Compiler, Error, Grid, Meta, bind, cdiv, launch, launch_grid, launch_on};

fn fill(compiler: &Compiler, device: &Device) -> CompiledKernel {
    let constants = Constants::new().with("BLOCK", 256).unwrap();
    compiler.compile(&fill_kernel(), "*fp32,i32,i32", &constants, device).unwrap()
}

fn fill_grid(meta: &Meta) -> Grid {
    Grid::x(cdiv(meta["M"], meta["BLOCK"]) * cdiv(meta["N"], meta["BLOCK"]))
}

#[test]
fn compile_launch_read_back() {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::cuda(8, 0)).build();
    let kernel = fill(&compiler, &device);
    let x = DeviceBuffer::<f32>::zeros(&device, 1024).unwrap();

    let args = Args::new().arg(&x).arg(1024).arg(1024);
    let handle = launch(&kernel, fill_grid, args, &device).unwrap();
    assert_eq!(handle.grid(), Grid::x(16));
    assert_eq!(handle.kernel(), "fill_kernel");
    handle.wait().unwrap();
    assert!(handle.is_complete());

    let expected: Vec<f32> = (0..1024).map(|i| 2.0 * i as f32).collect();
    assert_eq!(x.to_vec().unwrap(), expected);
}

#[test_case(Target::cuda(8, 0) ; "cuda")]
#[test_case(Target::rocm("gfx90a") ; "rocm")]
fn constexpr_typed_in_signature(target: Target) {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(target).build();
    let desc = KernelDescriptor::builder()
        .name("empty_kernel")
        .params(vec![Param::ptr("X"), Param::scalar("stride_xm"), Param::constexpr("BLOCK")])
        .body("pass")
        .build()
        .unwrap();
    let constants = Constants::new().with("BLOCK", 256).unwrap();

    // Three tokens for three parameters: the last one types BLOCK.
    let kernel = compiler.compile(&desc, "*fp32,i32,i32", &constants, &device).unwrap();
    assert_eq!(kernel.signature().to_string(), "*fp32,i32");
    assert_eq!(kernel.metadata().params.len(), 2);

    let a = DeviceBuffer::<f32>::zeros(&device, 16).unwrap();
    let args = Args::new().named("X", &a).named("stride_xm", 256).named("BLOCK", 256);
    let handle = launch_grid(&kernel, (16u64,), args, &device).unwrap();
    assert_eq!(handle.grid(), Grid::x(16));
    handle.wait().unwrap();
    assert_eq!(a.to_vec().unwrap(), vec![0.0; 16]);
}

#[test]
fn partial_tile_is_masked() {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::rocm("gfx90a")).build();
    let kernel = fill(&compiler, &device);
    let x = DeviceBuffer::from_slice(&device, &[-1.0f32; 1100]).unwrap();

    let args = Args::new().arg(&x).named("M", 1000).named("N", 1000);
    launch(&kernel, fill_grid, args, &device).unwrap().wait().unwrap();

    let out = x.to_vec().unwrap();
    assert!(out[..1000].iter().enumerate().all(|(i, v)| *v == 2.0 * i as f32));
    assert!(out[1000..].iter().all(|v| *v == -1.0));
}

#[test]
fn empty_grid_issues_no_work() {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::cuda(8, 0)).build();
    let kernel = fill(&compiler, &device);
    let x = DeviceBuffer::<f32>::zeros(&device, 16).unwrap();
    let before = device.default_stream().signal().value();

    let handle = launch(&kernel, |_| (0u64, 4u64), Args::new().arg(&x).arg(0).arg(16), &device).unwrap();
    assert!(handle.is_noop());
    assert!(handle.is_complete());
    handle.wait().unwrap();
    assert_eq!(device.default_stream().signal().value(), before);
    assert_eq!(x.to_vec().unwrap(), vec![0.0; 16]);
}

#[test]
fn streams_order_their_own_launches() {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::cuda(9, 0)).build();
    let constants = Constants::new().with("BLOCK", 128).unwrap();
    let add = compiler.compile(&add_kernel(), "*fp32,*fp32,*fp32,i32", &constants, &device).unwrap();
    let stream = device.create_stream().unwrap();

    let n = 300;
    let x = DeviceBuffer::from_slice(&device, &vec![1.0f32; n]).unwrap();
    let acc = DeviceBuffer::<f32>::zeros(&device, n).unwrap();
    let grid = |meta: &Meta| cdiv(meta["n"], meta["BLOCK"]);
    let handles: Vec<_> = (0..3)
        .map(|_| launch_on(&add, grid, Args::new().arg(&x).arg(&acc).arg(&acc).arg(n), &device, &stream).unwrap())
        .collect();
    handles.last().unwrap().wait().unwrap();

    assert!(handles.iter().all(|h| h.is_complete()));
    assert_eq!(acc.to_vec().unwrap(), vec![3.0; n]);
}

#[test]
fn binding_fills_meta() {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::cuda(8, 0)).build();
    let kernel = fill(&compiler, &device);
    let x = DeviceBuffer::<f32>::zeros(&device, 4).unwrap();

    let bound = bind(&kernel, &Args::new().arg(&x).arg(3).named("N", 4).named("BLOCK", 256), &device).unwrap();
    assert_eq!(bound.values.len(), 3);
    assert_eq!(bound.values[1].as_i64(), 3);
    assert_eq!((bound.meta["M"], bound.meta["N"], bound.meta["BLOCK"]), (3, 4, 256));
}

#[test_case(|_, _| Args::new().arg(1).arg(1).arg(1) ; "scalar for pointer")]
#[test_case(|_, other| Args::new().arg(other).arg(1).arg(1) ; "wrong element type")]
#[test_case(|x, _| Args::new().arg(x).arg(1) ; "too few")]
#[test_case(|x, _| Args::new().arg(x).arg(1).arg(1).arg(1) ; "too many")]
#[test_case(|x, _| Args::new().arg(x).arg(1i64 << 40).arg(1) ; "out of range")]
#[test_case(|x, _| Args::new().arg(x).arg(1.5).arg(1) ; "float for int")]
#[test_case(|x, _| Args::new().arg(x).arg(1).named("M", 1) ; "bound twice")]
#[test_case(|x, _| Args::new().arg(x).arg(1).arg(1).named("K", 1) ; "unknown name")]
#[test_case(|x, _| Args::new().arg(x).arg(1).arg(1).named("BLOCK", 128) ; "constexpr differs")]
fn argument_mismatch(make: fn(&DeviceBuffer<f32>, &DeviceBuffer<i32>) -> Args) {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::cuda(8, 0)).build();
    let kernel = fill(&compiler, &device);
    let x = DeviceBuffer::<f32>::zeros(&device, 4).unwrap();
    let other = DeviceBuffer::<i32>::zeros(&device, 4).unwrap();

    let outcome = launch_grid(&kernel, 1u64, make(&x, &other), &device);
    assert!(matches!(outcome, Err(Error::ArgumentMismatch { .. })), "{outcome:?}");
    assert_eq!(x.to_vec().unwrap(), vec![0.0; 4]);
}

#[test]
fn buffer_from_another_device() {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::cuda(8, 0)).build();
    let foreign = Device::builder().target(Target::cuda(8, 0)).build();
    let kernel = fill(&compiler, &device);
    let x = DeviceBuffer::<f32>::zeros(&foreign, 4).unwrap();

    let outcome = launch_grid(&kernel, 1u64, Args::new().arg(&x).arg(4).arg(4), &device);
    match outcome {
        Err(Error::ArgumentMismatch { reason }) => assert!(reason.contains("another device"), "{reason}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn wrong_architecture_is_a_launch_error() {
    let (_dir, compiler) = compiler(false);
    let sm80 = Device::builder().target(Target::cuda(8, 0)).build();
    let gfx = Device::builder().target(Target::rocm("gfx90a")).build();
    let kernel = fill(&compiler, &sm80);
    let x = DeviceBuffer::<f32>::zeros(&gfx, 4).unwrap();

    let outcome = launch_grid(&kernel, 1u64, Args::new().arg(&x).arg(4).arg(4), &gfx);
    assert!(matches!(outcome, Err(Error::Launch { .. })), "{outcome:?}");
}

#[test]
fn lost_device_is_reported() {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::cuda(8, 0)).build();
    let kernel = fill(&compiler, &device);
    let x = DeviceBuffer::<f32>::zeros(&device, 4).unwrap();
    device.mark_lost("ecc error");

    let outcome = launch_grid(&kernel, 1u64, Args::new().arg(&x).arg(4).arg(4), &device);
    assert!(matches!(outcome, Err(Error::Device { .. })), "{outcome:?}");
}

#[test_case(Arg::from(7) => Some("i32".to_string()))]
#[test_case(Arg::from(1i64 << 40) => Some("i64".to_string()))]
#[test_case(Arg::from(u64::MAX) => Some("u64".to_string()))]
#[test_case(Arg::from(5usize) => Some("i32".to_string()) ; "usize that fits")]
#[test_case(Arg::from(0.5) => Some("fp32".to_string()))]
#[test_case(Arg::from(true) => Some("i1".to_string()))]
#[test_case(Arg::from("relu") => None)]
fn inferred_types(arg: Arg) -> Option<String> {
    arg.infer_dtype().map(|dtype| dtype.to_string())
}

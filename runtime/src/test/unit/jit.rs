use kiln_device::{Device, DeviceBuffer};
use kiln_ir::Target;
use kiln_ir::test::fixtures::add_kernel;

use crate::test::compiler;
use crate::{Args, Error, JitKernel, Meta, cdiv};

fn add_grid(meta: &Meta) -> u64 {
    cdiv(meta["n"], meta["BLOCK"])
}

#[test]
fn call_style_add() {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::rocm("gfx1100")).build();
    let kernel = JitKernel::with_compiler(add_kernel(), compiler.clone());

    let n = 1000usize;
    let x: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let bx = DeviceBuffer::from_slice(&device, &x).unwrap();
    let by = DeviceBuffer::from_slice(&device, &x).unwrap();
    let out = DeviceBuffer::<f32>::zeros(&device, n).unwrap();

    for _ in 0..2 {
        let args = Args::new().arg(&bx).arg(&by).arg(&out).arg(n).named("BLOCK", 256);
        kernel.run(add_grid, args, &device).unwrap().wait().unwrap();
    }

    let expected: Vec<f32> = x.iter().map(|v| 2.0 * v).collect();
    assert_eq!(out.to_vec().unwrap(), expected);
    assert_eq!(compiler.cache().stats().compiles, 1);
    assert_eq!(compiler.cache().stats().hits, 1);
}

#[test]
fn signature_is_inferred_from_values() {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::cuda(8, 0)).build();
    let kernel = JitKernel::with_compiler(add_kernel(), compiler);
    let x = DeviceBuffer::<f32>::zeros(&device, 4).unwrap();

    let small = Args::new().arg(&x).arg(&x).arg(&x).arg(4).arg(64);
    let (compiled, runtime) = kernel.warmup(&small, &device).unwrap();
    assert_eq!(compiled.signature().to_string(), "*fp32,*fp32,*fp32,i32");
    assert_eq!(compiled.constants().to_string(), "{BLOCK: 64}");
    assert_eq!(runtime.named.len(), 4);

    let large = Args::new().arg(&x).arg(&x).arg(&x).arg(1i64 << 40).arg(64);
    let (compiled, _) = kernel.warmup(&large, &device).unwrap();
    assert_eq!(compiled.signature().to_string(), "*fp32,*fp32,*fp32,i64");
}

#[test]
fn missing_arguments() {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::cuda(8, 0)).build();
    let kernel = JitKernel::with_compiler(add_kernel(), compiler.clone());
    let x = DeviceBuffer::<f32>::zeros(&device, 4).unwrap();

    let no_block = Args::new().arg(&x).arg(&x).arg(&x).arg(4);
    assert_eq!(kernel.warmup(&no_block, &device).unwrap_err(), Error::MissingConstant { name: "BLOCK".into() });

    let no_n = Args::new().arg(&x).arg(&x).arg(&x).named("BLOCK", 64);
    assert!(matches!(kernel.warmup(&no_n, &device), Err(Error::ArgumentMismatch { .. })));

    let float_block = Args::new().arg(&x).arg(&x).arg(&x).arg(4).arg(64.0);
    assert!(matches!(kernel.warmup(&float_block, &device), Err(Error::ArgumentMismatch { .. })));

    let scalar_for_buffer = Args::new().arg(1).arg(&x).arg(&x).arg(4).arg(64);
    assert!(matches!(kernel.warmup(&scalar_for_buffer, &device), Err(Error::ArgumentMismatch { .. })));

    assert_eq!(compiler.cache().stats().compiles, 0);
}

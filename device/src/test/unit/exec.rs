use half::f16;
use kiln_codegen::kir::Imm;
use kiln_dtype::ScalarDType;
use kiln_ir::Target;
use kiln_ir::test::fixtures::{add_kernel, fill_kernel, row_sum_kernel};
use proptest::prelude::*;
use test_case::test_case;

use crate::exec::{decode, encode};
use crate::test::build;
use crate::{Device, DeviceBuffer, Error};

fn ptr<T>(buffer: &DeviceBuffer<T>) -> Imm {
    Imm::Int(buffer.address() as i64)
}

#[test_case(Target::cuda(8, 0) ; "cuda")]
#[test_case(Target::rocm("gfx90a") ; "cdna")]
#[test_case(Target::rocm("gfx1100") ; "rdna")]
fn vector_add(target: Target) {
    let device = Device::builder().target(target.clone()).build();
    let n = 1000usize;
    let x: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let y: Vec<f32> = (0..n).map(|i| 0.5 * i as f32).collect();
    let bx = DeviceBuffer::from_slice(&device, &x).unwrap();
    let by = DeviceBuffer::from_slice(&device, &y).unwrap();
    let out = DeviceBuffer::<f32>::zeros(&device, n).unwrap();

    let artifact = build(&add_kernel(), "*fp32,*fp32,*fp32,i32", 256, &target);
    let module = device.load_module(&artifact.binary).unwrap();
    let args = vec![ptr(&bx), ptr(&by), ptr(&out), Imm::Int(n as i64)];
    device.launch(&module, [4, 1, 1], args, device.default_stream()).unwrap().wait().unwrap();

    let expected: Vec<f32> = x.iter().zip(&y).map(|(a, b)| a + b).collect();
    assert_eq!(out.to_vec().unwrap(), expected);
}

#[test]
fn masked_programs_leave_memory_untouched() {
    let target = Target::cuda(8, 0);
    let device = Device::builder().target(target.clone()).build();
    let (m, n, block) = (256i64, 256i64, 64i64);
    let x = DeviceBuffer::<f32>::zeros(&device, n as usize).unwrap();

    let artifact = build(&fill_kernel(), "*fp32,i32,i32", block, &target);
    let module = device.load_module(&artifact.binary).unwrap();
    let programs = ((m + block - 1) / block) * ((n + block - 1) / block);
    assert_eq!(programs, 16);
    let args = vec![ptr(&x), Imm::Int(m), Imm::Int(n)];
    device.launch(&module, [programs as u64, 1, 1], args, device.default_stream()).unwrap().wait().unwrap();

    let expected: Vec<f32> = (0..n).map(|i| 2.0 * i as f32).collect();
    assert_eq!(x.to_vec().unwrap(), expected);
}

#[test]
fn row_reduction() {
    let target = Target::cuda(8, 0);
    let device = Device::builder().target(target.clone()).build();
    let (rows, cols) = (4usize, 100usize);
    let data: Vec<f32> = (0..rows * cols).map(|i| (i % 7) as f32).collect();
    let x = DeviceBuffer::from_slice(&device, &data).unwrap();
    let out = DeviceBuffer::<f32>::zeros(&device, rows).unwrap();

    let artifact = build(&row_sum_kernel(), "*fp32,*fp32,i32", 128, &target);
    let module = device.load_module(&artifact.binary).unwrap();
    let args = vec![ptr(&x), ptr(&out), Imm::Int(cols as i64)];
    device.launch(&module, [rows as u64, 1, 1], args, device.default_stream()).unwrap().wait().unwrap();

    let expected: Vec<f32> = data.chunks(cols).map(|row| row.iter().sum()).collect();
    assert_eq!(out.to_vec().unwrap(), expected);
}

#[test]
fn fault_marks_device_lost() {
    let target = Target::cuda(8, 0);
    let device = Device::builder().target(target.clone()).build();
    let x = DeviceBuffer::<f32>::zeros(&device, 8).unwrap();
    let y = DeviceBuffer::<f32>::zeros(&device, 8).unwrap();
    let out = DeviceBuffer::<f32>::zeros(&device, 8).unwrap();

    let artifact = build(&add_kernel(), "*fp32,*fp32,*fp32,i32", 256, &target);
    let module = device.load_module(&artifact.binary).unwrap();
    // `n` claims more elements than the buffers hold.
    let args = vec![ptr(&x), ptr(&y), ptr(&out), Imm::Int(64)];
    let completion = device.launch(&module, [1, 1, 1], args.clone(), device.default_stream()).unwrap();

    assert!(matches!(completion.wait(), Err(Error::Fault { kernel, .. }) if kernel == "add_kernel"));
    assert!(completion.is_complete());
    assert!(device.is_lost());
    assert!(matches!(
        device.launch(&module, [1, 1, 1], args, device.default_stream()),
        Err(Error::DeviceLost { .. })
    ));
    assert!(matches!(out.to_vec(), Err(Error::DeviceLost { .. })));
}

#[test]
fn rejected_configurations() {
    let target = Target::cuda(8, 0);
    let device = Device::builder().target(target.clone()).build();
    let x = DeviceBuffer::<f32>::zeros(&device, 8).unwrap();
    let artifact = build(&add_kernel(), "*fp32,*fp32,*fp32,i32", 256, &target);
    let module = device.load_module(&artifact.binary).unwrap();
    let args = vec![ptr(&x), ptr(&x), ptr(&x), Imm::Int(8)];
    let stream = device.default_stream();

    let too_wide = device.launch(&module, [1, 70_000, 1], args.clone(), stream);
    assert!(matches!(too_wide, Err(Error::Launch { .. })));

    let missing = device.launch(&module, [1, 1, 1], args[..3].to_vec(), stream);
    assert!(matches!(missing, Err(Error::Launch { .. })));

    let other = Device::builder().target(target).build();
    assert!(matches!(other.launch(&module, [1, 1, 1], args, other.default_stream()), Err(Error::Launch { .. })));
    assert!(!device.is_lost());
}

#[test]
fn launches_on_separate_streams() {
    let target = Target::rocm("gfx90a");
    let device = Device::builder().target(target.clone()).build();
    let artifact = build(&fill_kernel(), "*fp32,i32,i32", 32, &target);
    let module = device.load_module(&artifact.binary).unwrap();

    let buffers: Vec<_> = (0..4).map(|_| DeviceBuffer::<f32>::zeros(&device, 64).unwrap()).collect();
    let completions: Vec<_> = buffers
        .iter()
        .map(|buffer| {
            let stream = device.create_stream().unwrap();
            let args = vec![ptr(buffer), Imm::Int(64), Imm::Int(64)];
            device.launch(&module, [4, 1, 1], args, &stream).unwrap()
        })
        .collect();

    for completion in &completions {
        completion.wait().unwrap();
    }
    for buffer in &buffers {
        assert_eq!(buffer.to_vec().unwrap()[63], 126.0);
    }
}

#[test_case(ScalarDType::Int8, Imm::Int(-3), &[0xfd] ; "i8")]
#[test_case(ScalarDType::UInt16, Imm::Int(65535), &[0xff, 0xff] ; "u16")]
#[test_case(ScalarDType::Int32, Imm::Int(-1), &[0xff; 4] ; "i32")]
#[test_case(ScalarDType::Float32, Imm::Float(1.0), &1.0f32.to_le_bytes() ; "fp32")]
#[test_case(ScalarDType::Float16, Imm::Float(0.5), &f16::from_f32(0.5).to_le_bytes() ; "fp16")]
#[test_case(ScalarDType::Bool, Imm::Int(1), &[1] ; "bool")]
fn scalar_layout(dtype: ScalarDType, value: Imm, bytes: &[u8]) {
    let (raw, len) = encode(dtype, value);
    assert_eq!(&raw[..len as usize], bytes);
    assert_eq!(decode(dtype, bytes), value);
}

proptest! {
    #[test]
    fn int32_survives_memory(value: i32) {
        let (raw, len) = encode(ScalarDType::Int32, Imm::Int(value as i64));
        prop_assert_eq!(decode(ScalarDType::Int32, &raw[..len as usize]), Imm::Int(value as i64));
    }

    #[test]
    fn float32_survives_memory(value in any::<f32>().prop_filter("not nan", |v| !v.is_nan())) {
        let (raw, len) = encode(ScalarDType::Float32, Imm::Float(value as f64));
        prop_assert_eq!(decode(ScalarDType::Float32, &raw[..len as usize]), Imm::Float(value as f64));
    }
}

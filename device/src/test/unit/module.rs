use kiln_codegen::BinaryFormat;
use kiln_ir::Target;
use kiln_ir::test::fixtures::add_kernel;
use test_case::test_case;

use crate::test::build;
use crate::{Device, Error};

const ADD_SIG: &str = "*fp32,*fp32,*fp32,i32";

#[test_case(Target::cuda(8, 0), BinaryFormat::Cubin ; "cuda")]
#[test_case(Target::rocm("gfx90a"), BinaryFormat::Hsaco ; "rocm")]
fn loads_matching_binary(target: Target, format: BinaryFormat) {
    let device = Device::builder().target(target.clone()).build();
    let artifact = build(&add_kernel(), ADD_SIG, 256, &target);
    let module = device.load_module(&artifact.binary).unwrap();

    assert_eq!(module.entry(), "add_kernel");
    assert_eq!(module.format(), format);
    assert_eq!(module.arch(), target.arch_name());
    assert_eq!(module.device_id(), device.id());
    assert_eq!(module.kernel().params.len(), 4);
}

#[test_case(Target::rocm("gfx90a"), Target::cuda(8, 0) ; "hsaco on cuda")]
#[test_case(Target::cuda(8, 0), Target::rocm("gfx90a") ; "cubin on rocm")]
#[test_case(Target::cuda(9, 0), Target::cuda(8, 0) ; "sm_90 on sm_80")]
#[test_case(Target::rocm("gfx942"), Target::rocm("gfx90a") ; "gfx942 on gfx90a")]
fn rejects_foreign_binary(built_for: Target, device: Target) {
    let device = Device::builder().target(device).build();
    let artifact = build(&add_kernel(), ADD_SIG, 256, &built_for);
    assert!(matches!(device.load_module(&artifact.binary), Err(Error::InvalidModule { .. })));
}

#[test]
fn rejects_garbage() {
    let device = Device::builder().target(Target::cuda(8, 0)).build();
    assert!(matches!(device.load_module(b"not a kernel"), Err(Error::InvalidModule { .. })));
    assert!(matches!(device.load_module(&[]), Err(Error::InvalidModule { .. })));
}

#[test]
fn lost_device_refuses_everything() {
    let target = Target::cuda(8, 0);
    let device = Device::builder().target(target.clone()).build();
    let artifact = build(&add_kernel(), ADD_SIG, 256, &target);
    device.mark_lost("test");
    device.mark_lost("second reason is ignored");

    let lost = Error::DeviceLost { device: device.name().to_string(), reason: "test".into() };
    assert_eq!(device.load_module(&artifact.binary).unwrap_err(), lost);
    assert_eq!(device.create_stream().unwrap_err(), lost);
    assert_eq!(crate::DeviceBuffer::<f32>::zeros(&device, 4).unwrap_err(), lost);
}

#[test]
fn device_from_env_default() {
    // Only asserts the default when the variable is not set by the environment.
    if std::env::var("KILN_DEVICE").is_err() {
        let device = Device::from_env().unwrap();
        assert_eq!(device.target(), &Target::cuda(8, 0));
    }
}

#[test]
fn devices_have_disjoint_address_ranges() {
    let a = Device::builder().target(Target::cuda(8, 0)).build();
    let b = Device::builder().target(Target::cuda(8, 0)).build();
    let x = crate::DeviceBuffer::<u32>::zeros(&a, 16).unwrap();
    let y = crate::DeviceBuffer::<u32>::zeros(&b, 16).unwrap();

    assert_ne!(a, b);
    assert!(a.owns(x.address()) && !a.owns(y.address()));
    assert!(b.owns(y.address()) && !b.owns(x.address()));
}

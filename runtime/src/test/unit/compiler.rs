use std::sync::Barrier;
use std::thread;

use kiln_device::Device;
use kiln_ir::test::fixtures::{add_kernel, fill_kernel};
use kiln_ir::{Constants, Target};
use test_case::test_case;

use crate::test::compiler;
use crate::{AsmArtifact, Error};

fn block(n: i64) -> Constants {
    Constants::new().with("BLOCK", n).unwrap()
}

#[test]
fn cuda_outputs_ptx_and_cubin() {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::cuda(8, 0)).build();
    let kernel = compiler.compile(&fill_kernel(), "*fp32,i32,i32", &block(256), &device).unwrap();

    let asm = kernel.asm();
    assert_eq!(asm.keys().map(String::as_str).collect::<Vec<_>>(), ["cubin", "ptx"]);
    assert!(asm["ptx"].as_text().unwrap().contains(".target sm_80"));
    assert_eq!(asm["cubin"].as_bytes().unwrap(), kernel.artifact().binary.as_slice());
    assert_eq!(&asm["cubin"].as_bytes().unwrap()[..4], b"KCBN");
    assert_eq!(kernel.metadata().arch, "sm_80");
    assert_eq!(kernel.name(), "fill_kernel");
}

#[test]
fn rocm_outputs_amdgcn_and_hsaco_path() {
    let (dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::rocm("gfx90a")).build();
    let kernel = compiler.compile(&fill_kernel(), "*fp32,i32,i32", &block(256), &device).unwrap();

    let asm = kernel.asm();
    assert_eq!(asm.keys().map(String::as_str).collect::<Vec<_>>(), ["amdgcn", "hsaco_path"]);
    assert!(asm["amdgcn"].as_text().unwrap().contains("amdgcn-amd-amdhsa--gfx90a"));
    let path = asm["hsaco_path"].as_path().unwrap();
    assert!(path.starts_with(dir.path()));
    assert_eq!(std::fs::read(path).unwrap(), kernel.artifact().binary);
}

#[test]
fn concurrent_rocm_compiles_all_get_hsaco_path() {
    const THREADS: usize = 16;
    for _ in 0..25 {
        let (_dir, compiler) = compiler(false);
        let barrier = Barrier::new(THREADS);
        let kernels: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        compiler
                            .compile_for_target(&fill_kernel(), "*fp32,i32,i32", &block(256), &Target::rocm("gfx90a"))
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(compiler.cache().stats().compiles, 1);
        for kernel in &kernels {
            let path = kernel.asm().get("hsaco_path").and_then(AsmArtifact::as_path).expect("hsaco_path output");
            assert_eq!(std::fs::read(path).unwrap(), kernel.artifact().binary);
        }
        let hsaco_dir = compiler.config().cache_dir.join("hsaco");
        assert_eq!(std::fs::read_dir(hsaco_dir).unwrap().count(), 1, "scratch files left behind");
    }
}

#[test]
fn recompiling_hits_the_cache() {
    let (_dir, compiler) = compiler(false);
    let target = Target::cuda(8, 0);
    let first = compiler.compile_for_target(&add_kernel(), "*fp32,*fp32,*fp32,i32", &block(256), &target).unwrap();
    let second = compiler.compile_for_target(&add_kernel(), "*fp32,*fp32,*fp32,i32", &block(256), &target).unwrap();

    assert!(std::sync::Arc::ptr_eq(first.artifact(), second.artifact()));
    assert_eq!(compiler.cache().stats().compiles, 1);
    assert_eq!(compiler.cache().stats().hits, 1);
}

#[test]
fn targets_yield_distinct_artifacts() {
    let (_dir, compiler) = compiler(false);
    let desc = add_kernel();
    let sig = "*fp32,*fp32,*fp32,i32";
    let cuda = compiler.compile_for_target(&desc, sig, &block(256), &Target::cuda(8, 0)).unwrap();
    let rocm = compiler.compile_for_target(&desc, sig, &block(256), &Target::rocm("gfx90a")).unwrap();

    assert_ne!(cuda.key(), rocm.key());
    assert_ne!(cuda.artifact().binary, rocm.artifact().binary);
    assert_ne!(cuda.metadata().target, rocm.metadata().target);
    assert_ne!(cuda.format(), rocm.format());
    assert_eq!(compiler.cache().stats().compiles, 2);
}

#[test_case("*fp32,*fp32,*fp32,i32", Constants::new(), Error::MissingConstant { name: "BLOCK".into() } ; "missing constant")]
#[test_case("*fp32,*fp32,*fp32,i32", block(4).with("WARPS", 2).unwrap(), Error::UnknownConstant { name: "WARPS".into() } ; "unknown constant")]
fn binding_errors_never_reach_the_backend(sig: &str, constants: Constants, expected: Error) {
    let (_dir, compiler) = compiler(false);
    let outcome = compiler.compile_for_target(&add_kernel(), sig, &constants, &Target::cuda(8, 0));
    assert_eq!(outcome.unwrap_err(), expected);
    assert_eq!(compiler.cache().stats().compiles, 0);
}

#[test_case("*fp32,*fp32,i32" ; "too short")]
#[test_case("*fp32,*fp32,*fp32,*fp32" ; "scalar given a pointer")]
#[test_case("*fp32,*fp32,*fp32,float" ; "unknown token")]
fn signature_mismatch(sig: &str) {
    let (_dir, compiler) = compiler(false);
    let outcome = compiler.compile_for_target(&add_kernel(), sig, &block(64), &Target::cuda(8, 0));
    assert!(matches!(outcome, Err(Error::SignatureMismatch { .. })), "{outcome:?}");
    assert_eq!(compiler.cache().stats().compiles, 0);
}

#[test]
fn compile_errors_carry_position_and_do_not_poison() {
    let (_dir, compiler) = compiler(false);
    let desc = kiln_ir::KernelDescriptor::builder()
        .name("bad")
        .params(vec![kiln_ir::Param::ptr("X")])
        .body("%v = frobnicate X\n")
        .build()
        .unwrap();
    let target = Target::cuda(8, 0);

    for _ in 0..2 {
        match compiler.compile_for_target(&desc, "*fp32", &Constants::new(), &target) {
            Err(Error::Compilation { source: kiln_codegen::Error::Compilation { construct, line, .. } }) => {
                assert!(construct.contains("frobnicate"), "{construct}");
                assert_eq!(line, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(compiler.cache().stats().compiles, 2);
    assert!(compiler.cache().is_empty());
}

#[test]
fn lost_device_fails_fast() {
    let (_dir, compiler) = compiler(false);
    let device = Device::builder().target(Target::cuda(8, 0)).build();
    device.mark_lost("unplugged");

    let outcome = compiler.compile(&fill_kernel(), "*fp32,i32,i32", &block(256), &device);
    assert!(matches!(outcome, Err(Error::Device { .. })));
    assert_eq!(compiler.cache().stats().compiles, 0);
}

#[test]
fn asm_artifact_accessors() {
    assert_eq!(AsmArtifact::Text("x".into()).as_bytes(), None);
    assert_eq!(AsmArtifact::Binary(vec![1]).as_text(), None);
    assert!(AsmArtifact::Path("a.hsaco".into()).as_path().is_some());
}

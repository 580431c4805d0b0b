use kiln_ir::test::fixtures::{add_kernel, row_sum_kernel};
use kiln_ir::{CompileOptions, Target};
use test_case::test_case;

use crate::artifact::{BinaryFormat, compile};
use crate::test::concrete;

fn options(num_warps: u32) -> CompileOptions {
    CompileOptions::builder().num_warps(num_warps).build()
}

#[test]
fn ptx_for_add_kernel() {
    let target = Target::cuda(8, 0);
    let body = concrete(&add_kernel(), "*fp32,*fp32,*fp32,i32", Some(1024), &target);
    let artifact = compile(&body, &target, &options(4)).unwrap();
    let ptx = &artifact.asm["ptx"];

    assert_eq!(artifact.format(), BinaryFormat::Cubin);
    assert_eq!(artifact.metadata.arch, "sm_80");
    assert_eq!(artifact.metadata.entry, "add_kernel");
    assert_eq!(artifact.metadata.shared_mem, 0);
    assert!(ptx.contains(".target sm_80"), "{ptx}");
    assert!(ptx.contains(".address_size 64"), "{ptx}");
    assert!(ptx.contains(".visible .entry add_kernel("), "{ptx}");
    assert!(ptx.contains(".maxntid 128, 1, 1"), "{ptx}");
    assert!(ptx.contains("ld.global.f32"), "{ptx}");
    assert!(ptx.contains("st.global.f32"), "{ptx}");
    // 1024 lanes over 128 threads.
    assert!(ptx.contains("// x8"), "{ptx}");
}

#[test]
fn ptx_reduction_uses_shuffles_and_shared_memory() {
    let target = Target::cuda(9, 0);
    let body = concrete(&row_sum_kernel(), "*fp32,*fp32,i32", Some(1024), &target);
    let artifact = compile(&body, &target, &options(4)).unwrap();
    let ptx = &artifact.asm["ptx"];

    assert!(ptx.contains("shfl.sync.bfly.b32 %f"), "{ptx}");
    for offset in [16, 8, 4, 2, 1] {
        assert!(ptx.contains(&format!(", {offset}, 0x1f, 0xffffffff;")), "{ptx}");
    }
    assert!(ptx.contains("bar.sync 0;"), "{ptx}");
    assert_eq!(artifact.metadata.shared_mem, 16);
    assert!(ptx.contains(".shared .align 16 .b8 __smem[16];"), "{ptx}");
}

#[test]
fn single_warp_reduction_needs_no_shared_memory() {
    let target = Target::cuda(8, 6);
    let body = concrete(&row_sum_kernel(), "*fp32,*fp32,i32", Some(32), &target);
    let artifact = compile(&body, &target, &options(1)).unwrap();
    assert_eq!(artifact.metadata.shared_mem, 0);
    assert!(!artifact.asm["ptx"].contains("bar.sync"));
}

#[test_case("gfx90a", 0, true; "cdna wave64")]
#[test_case("gfx1100", 1, false; "rdna wave32")]
fn amdgcn_reduction(arch: &str, wave32: u8, permutes: bool) {
    let target = Target::rocm(arch);
    let body = concrete(&row_sum_kernel(), "*fp32,*fp32,i32", Some(1024), &target);
    let artifact = compile(&body, &target, &options(4)).unwrap();
    let asm = &artifact.asm["amdgcn"];

    assert_eq!(artifact.format(), BinaryFormat::Hsaco);
    assert!(asm.contains(&format!(".amdgcn_target \"amdgcn-amd-amdhsa--{arch}\"")), "{asm}");
    assert!(asm.contains(&format!(".amdhsa_wavefront_size32 {wave32}")), "{asm}");
    assert!(asm.contains(".amdhsa_group_segment_fixed_size 16"), "{asm}");
    assert!(asm.contains("ds_swizzle_b32 v"), "{asm}");
    for pattern in ["0x401F", "0x201F", "0x101F", "0x081F", "0x041F"] {
        assert!(asm.contains(&format!("offset:{pattern}")), "{asm}");
    }
    assert_eq!(asm.contains("ds_permute_b32"), permutes, "{asm}");
}

#[test]
fn mfma_generation_in_header() {
    let target = Target::rocm("gfx942");
    let body = concrete(&add_kernel(), "*fp16,*fp16,*fp16,i32", Some(256), &target);
    let artifact = compile(&body, &target, &CompileOptions::default()).unwrap();
    assert!(artifact.asm["amdgcn"].contains("; mfma version 3"));
}

#[test]
fn compilation_is_deterministic() {
    let target = Target::cuda(8, 0);
    let body = concrete(&add_kernel(), "*fp32,*fp32,*fp32,i32", Some(256), &target);
    let first = compile(&body, &target, &CompileOptions::default()).unwrap();
    let second = compile(&body, &target, &CompileOptions::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn targets_produce_distinct_artifacts() {
    let cuda = Target::cuda(8, 0);
    let rocm = Target::rocm("gfx90a");
    let sig = "*fp32,*fp32,*fp32,i32";
    let a = compile(&concrete(&add_kernel(), sig, Some(256), &cuda), &cuda, &CompileOptions::default()).unwrap();
    let b = compile(&concrete(&add_kernel(), sig, Some(256), &rocm), &rocm, &CompileOptions::default()).unwrap();

    assert_ne!(a.binary, b.binary);
    assert_ne!(a.metadata.format, b.metadata.format);
    assert!(a.asm.contains_key("ptx") && !a.asm.contains_key("amdgcn"));
    assert!(b.asm.contains_key("amdgcn") && !b.asm.contains_key("ptx"));
}

#[test]
fn unoptimized_build_keeps_dead_code() {
    let target = Target::cuda(8, 0);
    let body = concrete(&add_kernel(), "*fp32,*fp32,*fp32,i32", Some(256), &target);
    let optimized = compile(&body, &target, &CompileOptions::default()).unwrap();
    let plain = compile(&body, &target, &CompileOptions::builder().optimize(false).build()).unwrap();
    assert!(plain.binary.len() >= optimized.binary.len());
}

use kiln_ir::test::fixtures::row_sum_kernel;
use kiln_ir::{CompileOptions, Target};

use crate::binary::{CUBIN_MAGIC, decode};
use crate::{Error, compile, lower};
use crate::test::concrete;

fn artifact() -> crate::CompiledArtifact {
    let target = Target::cuda(8, 0);
    let body = concrete(&row_sum_kernel(), "*fp32,*fp32,i32", Some(128), &target);
    compile(&body, &target, &CompileOptions::default()).unwrap()
}

#[test]
fn image_carries_kernel_and_metadata() {
    let artifact = artifact();
    let image = decode(&artifact.binary).unwrap();

    assert_eq!(image.magic, CUBIN_MAGIC);
    assert_eq!(image.arch, "sm_80");
    assert_eq!(image.entry(), "row_sum");
    assert_eq!(image.num_warps, 4);
    assert_eq!(image.registers, artifact.metadata.registers);
    assert_eq!(image.kernel.params, artifact.metadata.params);
    assert_eq!(image.asm, artifact.asm["ptx"]);
}

#[test]
fn image_kernel_matches_optimized_lowering() {
    let target = Target::cuda(8, 0);
    let body = concrete(&row_sum_kernel(), "*fp32,*fp32,i32", Some(128), &target);
    let mut expected = lower::lower(&body).unwrap();
    crate::opt::optimize(&mut expected);

    let image = decode(&compile(&body, &target, &CompileOptions::default()).unwrap().binary).unwrap();
    assert_eq!(image.kernel, expected);
}

#[test]
fn rejects_truncated_images() {
    let binary = artifact().binary;
    for len in [0, 3, 6, binary.len() / 2, binary.len() - 1] {
        assert!(matches!(decode(&binary[..len]), Err(Error::Decode { .. })), "len {len}");
    }
}

#[test]
fn rejects_bad_magic_and_trailing_bytes() {
    let mut binary = artifact().binary;
    binary.push(0);
    assert!(matches!(decode(&binary), Err(Error::Decode { .. })));

    binary.pop();
    binary[0] = b'X';
    assert!(matches!(decode(&binary), Err(Error::Decode { .. })));
}

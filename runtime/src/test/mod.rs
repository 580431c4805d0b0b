use kiln_codegen::CompiledArtifact;
use kiln_ir::test::fixtures::add_kernel;
use kiln_ir::{CompileOptions, Constants, SpecializationKey, Target, specialize};
use tempfile::TempDir;

use crate::{Compiler, RuntimeConfig};

mod unit;

/// Compiler with a private cache directory.
pub fn compiler(disk_cache: bool) -> (TempDir, Compiler) {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = RuntimeConfig::builder().cache_dir(dir.path()).disk_cache(disk_cache).build();
    (dir, Compiler::new(config))
}

/// Key and artifact of the add kernel specialized with `BLOCK = block`.
pub fn add_artifact(block: i64) -> (SpecializationKey, CompiledArtifact) {
    let target = Target::cuda(8, 0);
    let options = CompileOptions::default();
    let constants = Constants::new().with("BLOCK", block).expect("fresh constants");
    let signature = "*fp32,*fp32,*fp32,i32".parse().expect("signature parses");
    let (key, body) = specialize(&add_kernel(), &signature, &constants, &target, &options).expect("specializes");
    let artifact = kiln_codegen::compile(&body, &target, &options).expect("compiles");
    (key, artifact)
}

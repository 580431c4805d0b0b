use kiln_codegen::{CompiledArtifact, compile};
use kiln_ir::{CompileOptions, Constants, KernelDescriptor, Signature, Target, specialize};

mod unit;

/// Compile `desc` for `target` with `BLOCK` bound to `block`.
pub fn build(desc: &KernelDescriptor, sig: &str, block: i64, target: &Target) -> CompiledArtifact {
    let sig: Signature = sig.parse().expect("signature parses");
    let constants = Constants::new().with("BLOCK", block).expect("fresh constants");
    let options = CompileOptions::default();
    let (_, body) = specialize(desc, &sig, &constants, target, &options).expect("specializes");
    compile(&body, target, &options).expect("compiles")
}

use kiln_ir::{CompileOptions, ConcreteBody, Constants, KernelDescriptor, Param, Signature, Target, specialize};

mod unit;

/// Specialize `desc` for `sig` with `BLOCK` bound to `block`.
pub fn concrete(desc: &KernelDescriptor, sig: &str, block: Option<i64>, target: &Target) -> ConcreteBody {
    let sig: Signature = sig.parse().expect("signature parses");
    let constants = match block {
        Some(n) => Constants::new().with("BLOCK", n).expect("fresh constants"),
        None => Constants::new(),
    };
    let (_, body) = specialize(desc, &sig, &constants, target, &CompileOptions::default()).expect("specializes");
    body
}

/// Single-pointer kernel with an arbitrary body.
pub fn pointer_kernel(body: &str) -> KernelDescriptor {
    KernelDescriptor::builder().name("probe").params(vec![Param::ptr("X")]).body(body).build().expect("well formed")
}

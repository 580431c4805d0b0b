use std::collections::BTreeMap;

use test_case::test_case;

use crate::test::fixtures::add_kernel;
use crate::{Error, KernelDescriptor, Param, ParamKind};

fn build(params: Vec<Param>, body: &str) -> crate::Result<KernelDescriptor> {
    KernelDescriptor::builder().name("k").params(params).body(body).build()
}

#[test_case("X: ptr", ParamKind::Pointer)]
#[test_case("X:pointer", ParamKind::Pointer)]
#[test_case(" n : scalar ", ParamKind::Scalar)]
#[test_case("BLOCK: constexpr", ParamKind::Constexpr)]
fn parse_param(text: &str, kind: ParamKind) {
    let param: Param = text.parse().unwrap();
    assert_eq!(param.kind, kind);
    assert!(!param.name.contains(' '));
}

#[test_case("X: tensor"; "unknown kind")]
#[test_case("X"; "missing kind")]
fn reject_param(text: &str) {
    assert!(matches!(text.parse::<Param>(), Err(Error::MalformedKernel { .. })));
}

#[test_case(vec![Param::ptr("X"), Param::constexpr("X")], "pass"; "runtime and constexpr collide")]
#[test_case(vec![Param::ptr("X"), Param::ptr("X")], "pass"; "duplicate pointer")]
#[test_case(vec![Param::ptr("to")], "pass"; "reserved name")]
#[test_case(vec![Param::ptr("1X")], "pass"; "not an identifier")]
#[test_case(vec![Param::ptr("X")], "store X, %v"; "use before definition")]
#[test_case(vec![Param::ptr("X")], "%v = splat 1, 4\n%v = splat 2, 4"; "redefinition")]
#[test_case(vec![Param::ptr("X")], "store Y, 1"; "unknown parameter")]
#[test_case(vec![Param::ptr("X")], "store X,, 1"; "syntax error")]
fn malformed_kernels(params: Vec<Param>, body: &str) {
    assert!(matches!(build(params, body), Err(Error::MalformedKernel { .. })));
}

#[test]
fn hints_must_target_runtime_params_with_power_of_two() {
    let params = || vec![Param::ptr("X"), Param::constexpr("B")];
    let with_hint = |name: &str, divisor: u32| {
        KernelDescriptor::builder()
            .name("k")
            .params(params())
            .body("pass")
            .hints(BTreeMap::from([(name.to_string(), divisor)]))
            .build()
    };

    assert!(with_hint("X", 16).is_ok());
    assert!(matches!(with_hint("X", 12), Err(Error::MalformedKernel { .. })));
    assert!(matches!(with_hint("B", 16), Err(Error::MalformedKernel { .. })));
}

#[test]
fn fingerprint_tracks_content() {
    let a = add_kernel();
    let b = add_kernel();
    assert_eq!(a.fingerprint(), b.fingerprint());

    let other = build(vec![Param::ptr("X")], "pass").unwrap();
    assert_ne!(a.fingerprint(), other.fingerprint());

    // Comments and spacing do not change identity.
    let spaced = build(vec![Param::ptr("X")], "  # nothing to do\n\n   pass   \n").unwrap();
    assert_eq!(other.fingerprint(), spaced.fingerprint());
}

#[test]
fn runtime_and_constexpr_views() {
    let desc = add_kernel();
    let runtime: Vec<_> = desc.runtime_params().map(|p| p.name.as_str()).collect();
    let constexpr: Vec<_> = desc.constexpr_params().map(|p| p.name.as_str()).collect();
    assert_eq!(runtime, ["X", "Y", "OUT", "n"]);
    assert_eq!(constexpr, ["BLOCK"]);
}

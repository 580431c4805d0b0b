use kiln_dtype::{DType, ScalarDType};
use kiln_ir::Target;
use kiln_ir::test::fixtures::{add_kernel, row_sum_kernel};
use test_case::test_case;

use crate::Error;
use crate::kir::{Inst, ReduceOp, Shape, Ty};
use crate::lower::lower;
use crate::test::{concrete, pointer_kernel};

#[test]
fn lowers_add_kernel() {
    let body = concrete(&add_kernel(), "*fp32,*fp32,*fp32,i32", Some(128), &Target::cuda(8, 0));
    let kernel = lower(&body).unwrap();

    assert_eq!(kernel.name, "add_kernel");
    assert_eq!(kernel.params.len(), 4);
    assert_eq!(kernel.store_count(), 1);

    let loads: Vec<_> = kernel.nodes.iter().filter(|n| matches!(n.inst, Inst::Load { mask: Some(_), .. })).collect();
    assert_eq!(loads.len(), 2);
    for load in loads {
        assert_eq!(load.ty, Some(Ty::block(DType::Float32, 128)));
    }

    // Every elementwise node sees operands of its own shape.
    for node in &kernel.nodes {
        if let Inst::Binary(_, a, b) = node.inst {
            assert_eq!(kernel.ty(a).unwrap().shape, kernel.ty(b).unwrap().shape, "{kernel}");
        }
    }
}

#[test]
fn scalars_broadcast_through_explicit_splats() {
    let body = concrete(&add_kernel(), "*fp32,*fp32,*fp32,i32", Some(64), &Target::cuda(8, 0));
    let kernel = lower(&body).unwrap();
    let splats = kernel.nodes.iter().filter(|n| matches!(n.inst, Inst::Splat(_))).count();
    assert!(splats >= 2, "{kernel}");
}

#[test]
fn reduction_yields_scalar() {
    let body = concrete(&row_sum_kernel(), "*fp16,*fp32,i32", Some(256), &Target::rocm("gfx90a"));
    let kernel = lower(&body).unwrap();
    let reduce = kernel.nodes.iter().find(|n| matches!(n.inst, Inst::Reduce(ReduceOp::Sum, _))).unwrap();
    assert_eq!(reduce.ty, Some(Ty::scalar(DType::Float16)));

    // Stored through a fp32 pointer, so the sum is widened first.
    let store = kernel.nodes.iter().find(|n| matches!(n.inst, Inst::Store { .. })).unwrap();
    let Inst::Store { value, .. } = store.inst else { unreachable!() };
    assert_eq!(kernel.ty(value).unwrap().dtype, DType::Scalar(ScalarDType::Float32));
}

#[test]
fn weak_literals_follow_typed_operand() {
    let kernel = lower(&concrete(
        &pointer_kernel("%i = arange 0, 16\n%w = cast %i to i8\n%v = add %w, 3\n%p = add X, %i\nstore %p, %v\n"),
        "*i8",
        None,
        &Target::cuda(8, 0),
    ))
    .unwrap();
    let add = kernel.nodes.iter().find(|n| matches!(n.inst, Inst::Binary(..))).unwrap();
    assert_eq!(add.ty, Some(Ty { dtype: DType::Int8, shape: Shape::Block(16) }));
}

#[test_case("%bad = add X, 1.5", 1, 15; "float pointer offset")]
#[test_case("%a = arange 0, 100", 1, 16; "non power of two block")]
#[test_case("%a = frobnicate X", 1, 1; "unknown operation")]
#[test_case("%v = load X, cache='bogus'", 1, 20; "unknown cache modifier")]
#[test_case("%s = reduce_sum X", 1, 1; "reduction over pointer")]
#[test_case("pass\n%m = mul X, 2", 2, 1; "pointer multiply")]
#[test_case("%i = arange 0, 8\n%j = arange 0, 16\n%k = add %i, %j", 3, 1; "shape mismatch")]
fn compilation_errors_carry_position(text: &str, line: u32, col: u32) {
    let body = concrete(&pointer_kernel(text), "*fp32", None, &Target::cuda(8, 0));
    match lower(&body) {
        Err(Error::Compilation { line: l, col: c, construct, .. }) => {
            assert_eq!((l, c), (line, col), "{text}");
            assert!(!construct.is_empty());
        }
        other => panic!("expected compilation error for {text:?}, got {other:?}"),
    }
}

#[test]
fn error_names_the_construct() {
    let body = concrete(&pointer_kernel("%a = frobnicate X"), "*fp32", None, &Target::cuda(8, 0));
    let err = lower(&body).unwrap_err();
    assert!(err.to_string().contains("frobnicate"), "{err}");
}

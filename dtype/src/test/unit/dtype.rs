use test_case::test_case;

use crate::{DType, Error, ScalarDType};

#[test_case("fp32", DType::Float32; "float32")]
#[test_case("i32", DType::Int32; "int32")]
#[test_case("u64", DType::UInt64; "uint64")]
#[test_case("i1", DType::Bool; "predicate")]
#[test_case("*fp32", DType::ptr(ScalarDType::Float32); "pointer to float32")]
#[test_case(" *bf16 ", DType::ptr(ScalarDType::BFloat16); "whitespace around pointer")]
fn parse_signature_token(token: &str, expected: DType) {
    assert_eq!(token.parse::<DType>().unwrap(), expected);
}

#[test_case("f32"; "numpy style float")]
#[test_case("**fp32"; "double pointer")]
#[test_case(""; "empty")]
#[test_case("int"; "c style")]
fn reject_unknown_token(token: &str) {
    assert!(matches!(token.parse::<DType>(), Err(Error::UnknownTypeToken { .. })));
}

#[test]
fn pointer_display_uses_star_prefix() {
    assert_eq!(DType::ptr(ScalarDType::Float16).to_string(), "*fp16");
    assert_eq!(DType::ptr(ScalarDType::Int8).bytes(), 8);
}

#[test_case(ScalarDType::Int32, ScalarDType::Int64, true)]
#[test_case(ScalarDType::Int64, ScalarDType::Int32, false)]
#[test_case(ScalarDType::UInt32, ScalarDType::Int32, false)]
#[test_case(ScalarDType::UInt16, ScalarDType::Int32, true)]
#[test_case(ScalarDType::Int32, ScalarDType::Float32, true)]
#[test_case(ScalarDType::Float32, ScalarDType::Float16, false)]
#[test_case(ScalarDType::Bool, ScalarDType::BFloat16, true)]
fn widens_into(from: ScalarDType, to: ScalarDType, expected: bool) {
    assert_eq!(from.widens_into(to), expected);
}

#[test_case(&[ScalarDType::Int8, ScalarDType::UInt8], ScalarDType::Int16; "mixed sign bytes")]
#[test_case(&[ScalarDType::Int32, ScalarDType::Float32], ScalarDType::Float32; "int and float")]
#[test_case(&[ScalarDType::Float16, ScalarDType::BFloat16], ScalarDType::Float32; "half formats")]
#[test_case(&[ScalarDType::Bool, ScalarDType::Int32], ScalarDType::Int32; "predicate widens")]
fn least_upper(dtypes: &[ScalarDType], expected: ScalarDType) {
    assert_eq!(ScalarDType::least_upper(dtypes), Some(expected));
}

#[test]
fn nothing_to_promote() {
    assert_eq!(ScalarDType::least_upper(&[]), None);
    assert_eq!(ScalarDType::least_upper(&[ScalarDType::UInt8]), Some(ScalarDType::UInt8));
}

#[test]
fn int_ranges() {
    assert_eq!(ScalarDType::Int32.int_range(), Some((i32::MIN as i128, i32::MAX as i128)));
    assert_eq!(ScalarDType::UInt64.int_range(), Some((0, u64::MAX as i128)));
    assert_eq!(ScalarDType::Float32.int_range(), None);
}

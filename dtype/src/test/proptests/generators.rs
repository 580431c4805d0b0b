use proptest::prelude::*;
use strum::VariantArray;

use crate::{DType, ScalarDType};

pub fn scalar_dtype() -> impl Strategy<Value = ScalarDType> {
    prop::sample::select(ScalarDType::VARIANTS)
}

pub fn int_dtype() -> impl Strategy<Value = ScalarDType> {
    scalar_dtype().prop_filter("integer", ScalarDType::is_int)
}

/// A signature type: a scalar or a global pointer to one.
pub fn signature_dtype() -> impl Strategy<Value = DType> {
    (scalar_dtype(), any::<bool>()).prop_map(|(scalar, ptr)| if ptr { DType::ptr(scalar) } else { DType::Scalar(scalar) })
}

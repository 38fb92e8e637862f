//! Rust-side value marshaling
//!
//! Conversion traits between Rust types and GRT values - the native
//! language's half of the cross-language marshaling layer. Simple types
//! convert by value; containers convert to/from the shared `ListRef`/
//! `DictRef` wrappers, which keep reference semantics (no eager copying).
//! All conversions are fallible with typed errors, never silent coercion.

use grt_sdk::{GrtError, GrtResult};

use crate::object::ObjectId;
use crate::runtime::Runtime;
use crate::value::{DictRef, ListRef, Value};

/// Convert a GRT value into a Rust type.
///
/// Implement this to receive a type as a module function argument.
pub trait FromGrt: Sized {
    /// Convert, failing with a type error when the tag does not match
    fn from_grt(rt: &Runtime, value: &Value) -> GrtResult<Self>;
}

/// Convert a Rust type into a GRT value.
///
/// Implement this to return a type from a module function.
pub trait ToGrt {
    /// Convert into a value
    fn to_grt(self, rt: &Runtime) -> GrtResult<Value>;
}

impl FromGrt for i64 {
    fn from_grt(_rt: &Runtime, value: &Value) -> GrtResult<i64> {
        value.as_int()
    }
}

impl ToGrt for i64 {
    fn to_grt(self, _rt: &Runtime) -> GrtResult<Value> {
        Ok(Value::Integer(self))
    }
}

impl FromGrt for f64 {
    fn from_grt(_rt: &Runtime, value: &Value) -> GrtResult<f64> {
        value.as_double()
    }
}

impl ToGrt for f64 {
    fn to_grt(self, _rt: &Runtime) -> GrtResult<Value> {
        Ok(Value::Double(self))
    }
}

impl FromGrt for String {
    fn from_grt(_rt: &Runtime, value: &Value) -> GrtResult<String> {
        Ok(value.as_string()?.to_string())
    }
}

impl ToGrt for String {
    fn to_grt(self, _rt: &Runtime) -> GrtResult<Value> {
        Ok(Value::from(self))
    }
}

impl ToGrt for &str {
    fn to_grt(self, _rt: &Runtime) -> GrtResult<Value> {
        Ok(Value::from(self))
    }
}

impl FromGrt for bool {
    fn from_grt(_rt: &Runtime, value: &Value) -> GrtResult<bool> {
        // booleans travel as integers
        Ok(value.as_int()? != 0)
    }
}

impl ToGrt for bool {
    fn to_grt(self, _rt: &Runtime) -> GrtResult<Value> {
        Ok(Value::Integer(self as i64))
    }
}

impl FromGrt for ListRef {
    fn from_grt(_rt: &Runtime, value: &Value) -> GrtResult<ListRef> {
        value.as_list()
    }
}

impl ToGrt for ListRef {
    fn to_grt(self, _rt: &Runtime) -> GrtResult<Value> {
        Ok(Value::List(self))
    }
}

impl FromGrt for DictRef {
    fn from_grt(_rt: &Runtime, value: &Value) -> GrtResult<DictRef> {
        value.as_dict()
    }
}

impl ToGrt for DictRef {
    fn to_grt(self, _rt: &Runtime) -> GrtResult<Value> {
        Ok(Value::Dict(self))
    }
}

impl FromGrt for ObjectId {
    fn from_grt(rt: &Runtime, value: &Value) -> GrtResult<ObjectId> {
        let id = value.as_object()?;
        if !rt.object_is_valid(id) {
            return Err(GrtError::BadItem(format!("invalid object {id}")));
        }
        Ok(id)
    }
}

impl ToGrt for ObjectId {
    fn to_grt(self, rt: &Runtime) -> GrtResult<Value> {
        if !rt.object_is_valid(self) {
            return Err(GrtError::BadItem(format!("invalid object {self}")));
        }
        Ok(Value::Object(self))
    }
}

impl<T: FromGrt> FromGrt for Option<T> {
    fn from_grt(rt: &Runtime, value: &Value) -> GrtResult<Option<T>> {
        if value.is_null() {
            Ok(None)
        } else {
            Ok(Some(T::from_grt(rt, value)?))
        }
    }
}

impl<T: ToGrt> ToGrt for Option<T> {
    fn to_grt(self, rt: &Runtime) -> GrtResult<Value> {
        match self {
            Some(inner) => inner.to_grt(rt),
            None => Ok(Value::Null),
        }
    }
}

impl<T: FromGrt> FromGrt for Vec<T> {
    fn from_grt(rt: &Runtime, value: &Value) -> GrtResult<Vec<T>> {
        let list = value.as_list()?;
        let mut out = Vec::with_capacity(list.count());
        for item in list.items() {
            out.push(T::from_grt(rt, &item)?);
        }
        Ok(out)
    }
}

impl<T: ToGrt> ToGrt for Vec<T> {
    fn to_grt(self, rt: &Runtime) -> GrtResult<Value> {
        let list = ListRef::new();
        for item in self {
            let value = item.to_grt(rt)?;
            list.insert(rt, value)?;
        }
        Ok(Value::List(list))
    }
}

impl ToGrt for () {
    fn to_grt(self, _rt: &Runtime) -> GrtResult<Value> {
        Ok(Value::Null)
    }
}

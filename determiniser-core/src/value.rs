use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::host::Routine;
use crate::TileCode;

/// Shared, string-keyed object storage. The host exposes pools, racks and
/// tiles as plain objects whose field names are only known at runtime, so
/// the engine works with this shape instead of fixed structs.
pub type ObjRef = Rc<RefCell<HashMap<String, Value>>>;

pub type ArrRef = Rc<RefCell<Vec<Value>>>;

/// Non-owning handle a side table keeps so it can notice a dead object.
pub type WeakObj = Weak<RefCell<HashMap<String, Value>>>;

/// A host runtime value. Objects, arrays and routines have reference
/// semantics: cloning the value clones the handle, not the contents.
#[derive(Clone)]
pub enum Value {
    Null,
    Num(f64),
    Str(String),
    Arr(ArrRef),
    Obj(ObjRef),
    Fn(Rc<Routine>),
}

impl Value {
    pub fn object() -> Value {
        Value::Obj(Rc::new(RefCell::new(HashMap::new())))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Arr(Rc::new(RefCell::new(items)))
    }

    pub fn str(s: &str) -> Value {
        Value::Str(s.to_string())
    }

    pub fn num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value truncated to an integer, the coercion the host applies
    /// to its own count fields.
    pub fn int(&self) -> Option<i64> {
        self.num().map(|n| n as i64)
    }

    pub fn code(&self) -> Option<TileCode> {
        match self.num() {
            Some(n) if n >= 0.0 && n <= f64::from(u16::MAX) => Some(n as TileCode),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn routine(&self) -> Option<Rc<Routine>> {
        match self {
            Value::Fn(r) => Some(Rc::clone(r)),
            _ => None,
        }
    }

    /// Truthiness as the host evaluates it: null, zero, NaN and the empty
    /// string are false, everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Arr(_) | Value::Obj(_) | Value::Fn(_) => true,
        }
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        match self {
            Value::Obj(o) => o.borrow().get(field).cloned(),
            _ => None,
        }
    }

    /// Sets a field on an object value. Returns false, and writes nothing,
    /// when the value is not an object.
    pub fn set(&self, field: &str, v: Value) -> bool {
        match self {
            Value::Obj(o) => {
                o.borrow_mut().insert(field.to_string(), v);
                true
            }
            _ => false,
        }
    }

    /// Adds `delta` to a numeric field in place. Returns false when the
    /// field is missing or not a number.
    pub fn add_num(&self, field: &str, delta: f64) -> bool {
        let obj = match self {
            Value::Obj(o) => o,
            _ => return false,
        };
        let mut map = obj.borrow_mut();
        match map.get_mut(field) {
            Some(Value::Num(n)) => {
                *n += delta;
                true
            }
            _ => false,
        }
    }

    pub fn arr_len(&self) -> Option<usize> {
        match self {
            Value::Arr(a) => Some(a.borrow().len()),
            _ => None,
        }
    }

    pub fn arr_get(&self, index: usize) -> Option<Value> {
        match self {
            Value::Arr(a) => a.borrow().get(index).cloned(),
            _ => None,
        }
    }

    /// Writes an element in place, only if the index is already in bounds.
    pub fn arr_set(&self, index: usize, v: Value) -> bool {
        let arr = match self {
            Value::Arr(a) => a,
            _ => return false,
        };
        let mut items = arr.borrow_mut();
        match items.get_mut(index) {
            Some(slot) => {
                *slot = v;
                true
            }
            None => false,
        }
    }

    /// Identity key for an object value, stable for the object's lifetime.
    /// The per-pool side table keys on this.
    pub fn obj_key(&self) -> Option<usize> {
        match self {
            Value::Obj(o) => Some(Rc::as_ptr(o) as usize),
            _ => None,
        }
    }

    pub fn obj_weak(&self) -> Option<WeakObj> {
        match self {
            Value::Obj(o) => Some(Rc::downgrade(o)),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Num(n)
    }
}

impl From<TileCode> for Value {
    fn from(code: TileCode) -> Value {
        Value::Num(f64::from(code))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Arr(a), Value::Arr(b)) => Rc::ptr_eq(a, b),
            (Value::Obj(a), Value::Obj(b)) => Rc::ptr_eq(a, b),
            (Value::Fn(a), Value::Fn(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Num(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Arr(a) => write!(f, "[array of {}]", a.borrow().len()),
            Value::Obj(o) => {
                let map = o.borrow();
                let mut names: Vec<&String> = map.keys().collect();
                names.sort();
                write!(f, "[object")?;
                for name in names {
                    write!(f, " {name}")?;
                }
                write!(f, "]")
            }
            Value::Fn(r) => write!(f, "[routine {}]", r.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_fields_share_storage_across_clones() {
        let a = Value::object();
        let b = a.clone();
        a.set("v", Value::Num(3.0));
        assert_eq!(b.get("v"), Some(Value::Num(3.0)));
        b.add_num("v", -1.0);
        assert_eq!(a.get("v"), Some(Value::Num(2.0)));
    }

    #[test]
    fn identity_key_is_per_allocation() {
        let a = Value::object();
        let b = Value::object();
        let c = a.clone();
        assert_ne!(a.obj_key(), b.obj_key());
        assert_eq!(a.obj_key(), c.obj_key());
        assert_eq!(Value::Null.obj_key(), None);
    }

    #[test]
    fn truthiness_follows_host_rules() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Num(0.0).is_truthy());
        assert!(!Value::Num(f64::NAN).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Num(-1.0).is_truthy());
        assert!(Value::str("x").is_truthy());
        assert!(Value::object().is_truthy());
        assert!(Value::array(vec![]).is_truthy());
    }

    #[test]
    fn arr_set_refuses_out_of_bounds() {
        let arr = Value::array(vec![Value::Num(1.0), Value::Num(2.0)]);
        assert!(arr.arr_set(1, Value::Num(9.0)));
        assert!(!arr.arr_set(2, Value::Num(9.0)));
        assert_eq!(arr.arr_len(), Some(2));
        assert_eq!(arr.arr_get(1), Some(Value::Num(9.0)));
    }

    #[test]
    fn add_num_rejects_missing_or_non_numeric_fields() {
        let obj = Value::object();
        assert!(!obj.add_num("v", -1.0));
        obj.set("v", Value::str("three"));
        assert!(!obj.add_num("v", -1.0));
        obj.set("v", Value::Num(3.0));
        assert!(obj.add_num("v", -1.0));
        assert_eq!(obj.get("v").and_then(|v| v.int()), Some(2));
    }

    #[test]
    fn code_rejects_out_of_range_numbers() {
        assert_eq!(Value::Num(65.0).code(), Some(65));
        assert_eq!(Value::Num(-1.0).code(), None);
        assert_eq!(Value::Num(70000.0).code(), None);
        assert_eq!(Value::str("A").code(), None);
    }
}

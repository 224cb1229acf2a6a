use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use super::threads::FutureCell;

/// A tagged runtime value.
///
/// Structs with zero fields are represented as `Int32(0)` and structs with a
/// single field as that field; only structs of two or more fields allocate.
/// Unions are two-field structs `{Int32 tag, payload}`.
#[derive(Clone)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    StringRef(Arc<str>),
    StructRef(Arc<Struct>),
    InstrPointer(u32),
    Closure(Arc<Closure>),
    FutureRef(Arc<FutureCell>),
}

impl Value {
    /// The unit value (also the 0-field struct).
    pub const UNIT: Value = Value::Int32(0);

    pub fn bool(b: bool) -> Value {
        Value::Int32(b as i32)
    }

    pub fn string(s: &str) -> Value {
        Value::StringRef(Arc::from(s))
    }

    /// Build a struct, collapsing 0- and 1-field shapes.
    pub fn make_struct(mut fields: Vec<Value>) -> Value {
        match fields.len() {
            0 => Value::UNIT,
            1 => fields.pop().unwrap_or(Value::UNIT),
            _ => Value::StructRef(Arc::new(Struct::new(fields))),
        }
    }

    pub fn make_union(tag: u32, payload: Value) -> Value {
        Value::StructRef(Arc::new(Struct::new(vec![Value::Int32(tag as i32), payload])))
    }

    pub fn closure(ip: u32, bound: Vec<Value>) -> Value {
        Value::Closure(Arc::new(Closure { ip, bound }))
    }

    /// Read field `index` of a struct statically known to have `count` fields.
    pub fn field(&self, count: u32, index: u32) -> Result<Value, String> {
        if index >= count {
            return Err(format!("field {} out of range for {}-field struct", index, count));
        }
        match (count, self) {
            (0, _) => Err("0-field struct has no fields".to_string()),
            (1, v) => Ok(v.clone()),
            (_, Value::StructRef(s)) => {
                if s.len() != count as usize {
                    return Err(format!(
                        "expected {}-field struct, found {} fields",
                        count,
                        s.len()
                    ));
                }
                s.get(index as usize)
                    .ok_or_else(|| format!("field {} out of range", index))
            }
            (_, other) => Err(format!("expected struct, found {}", other.type_name())),
        }
    }

    /// Overwrite field `index` of a struct statically known to have `count` fields.
    ///
    /// A 1-field struct is its field and has no shared storage to update.
    pub fn store_field(&self, count: u32, index: u32, value: Value) -> Result<(), String> {
        if index >= count {
            return Err(format!("field {} out of range for {}-field struct", index, count));
        }
        match (count, self) {
            (0, _) => Err("0-field struct has no fields".to_string()),
            (1, _) => Err("1-field struct cannot be updated in place".to_string()),
            (_, Value::StructRef(s)) => {
                if s.len() != count as usize {
                    return Err(format!(
                        "expected {}-field struct, found {} fields",
                        count,
                        s.len()
                    ));
                }
                if s.set(index as usize, value) {
                    Ok(())
                } else {
                    Err(format!("field {} out of range", index))
                }
            }
            (_, other) => Err(format!("expected struct, found {}", other.type_name())),
        }
    }

    /// Equality as seen by the atomic primitives: scalars and strings by
    /// value, shared cells by identity. Never takes a struct lock.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float32(a), Value::Float32(b)) => a == b,
            (Value::StringRef(a), Value::StringRef(b)) => a == b,
            (Value::StructRef(a), Value::StructRef(b)) => Arc::ptr_eq(a, b),
            (Value::InstrPointer(a), Value::InstrPointer(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::FutureRef(a), Value::FutureRef(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float32(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::StringRef(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Arc<Struct>> {
        match self {
            Value::StructRef(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int32(_) => "int",
            Value::Int64(_) => "long",
            Value::Float32(_) => "float",
            Value::StringRef(_) => "string",
            Value::StructRef(_) => "struct",
            Value::InstrPointer(_) => "ip",
            Value::Closure(_) => "closure",
            Value::FutureRef(_) => "future",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        structurally_equal(self, other)
    }
}

/// Structural equality driven by a worklist so deep or self-referential
/// structs neither recurse nor hold two struct locks at once. A pair of
/// structs met a second time is taken as equal.
fn structurally_equal(a: &Value, b: &Value) -> bool {
    let mut pending = vec![(a.clone(), b.clone())];
    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    while let Some((a, b)) = pending.pop() {
        match (&a, &b) {
            (Value::StructRef(x), Value::StructRef(y)) => {
                let pair = (Arc::as_ptr(x) as usize, Arc::as_ptr(y) as usize);
                if Arc::ptr_eq(x, y) || !seen.insert(pair) {
                    continue;
                }
                let (xs, ys) = (x.snapshot(), y.snapshot());
                if xs.len() != ys.len() {
                    return false;
                }
                pending.extend(xs.into_iter().zip(ys));
            }
            (Value::Closure(x), Value::Closure(y)) => {
                if Arc::ptr_eq(x, y) {
                    continue;
                }
                if x.ip != y.ip || x.bound.len() != y.bound.len() {
                    return false;
                }
                pending.extend(x.bound.iter().cloned().zip(y.bound.iter().cloned()));
            }
            _ => {
                if !a.identical(&b) {
                    return false;
                }
            }
        }
    }
    true
}

/// Nesting depth past which struct and closure contents print as `..`.
const PRINT_DEPTH: usize = 16;

fn write_list(
    f: &mut fmt::Formatter<'_>,
    items: &[Value],
    mut each: impl FnMut(&mut fmt::Formatter<'_>, &Value) -> fmt::Result,
) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        each(f, item)?;
    }
    Ok(())
}

fn write_debug(value: &Value, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    match value {
        Value::Int32(n) => write!(f, "Int32({})", n),
        Value::Int64(n) => write!(f, "Int64({})", n),
        Value::Float32(n) => write!(f, "Float32({})", n),
        Value::StringRef(s) => write!(f, "StringRef({:?})", s),
        Value::StructRef(_) if depth >= PRINT_DEPTH => f.write_str("StructRef(..)"),
        Value::StructRef(s) => {
            f.write_str("StructRef([")?;
            write_list(f, &s.snapshot(), |f, v| write_debug(v, f, depth + 1))?;
            f.write_str("])")
        }
        Value::InstrPointer(ip) => write!(f, "InstrPointer({})", ip),
        Value::Closure(c) if depth >= PRINT_DEPTH => write!(f, "Closure(@{}, ..)", c.ip),
        Value::Closure(c) => {
            write!(f, "Closure(@{}, [", c.ip)?;
            write_list(f, &c.bound, |f, v| write_debug(v, f, depth + 1))?;
            f.write_str("])")
        }
        Value::FutureRef(fut) => write!(f, "FutureRef({})", fut.id()),
    }
}

fn write_display(value: &Value, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    match value {
        Value::Int32(n) => write!(f, "{}", n),
        Value::Int64(n) => write!(f, "{}", n),
        Value::Float32(n) => {
            if n.fract() == 0.0 && n.is_finite() {
                write!(f, "{}.0", n)
            } else {
                write!(f, "{}", n)
            }
        }
        Value::StringRef(s) => f.write_str(s),
        Value::StructRef(_) if depth >= PRINT_DEPTH => f.write_str("{..}"),
        Value::StructRef(s) => {
            f.write_str("{")?;
            write_list(f, &s.snapshot(), |f, v| write_display(v, f, depth + 1))?;
            f.write_str("}")
        }
        Value::InstrPointer(ip) => write!(f, "@{}", ip),
        Value::Closure(c) => write!(f, "<closure @{}>", c.ip),
        Value::FutureRef(fut) => write!(f, "<future {}>", fut.id()),
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_debug(self, f, 0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_display(self, f, 0)
    }
}

/// A struct of two or more fields.
///
/// Fields sit behind one lock so that compare-and-swap and park operations on
/// a field are atomic with respect to every other executor sharing the struct.
pub struct Struct {
    fields: Mutex<Vec<Value>>,
    changed: Condvar,
}

impl Struct {
    fn new(fields: Vec<Value>) -> Self {
        Self {
            fields: Mutex::new(fields),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Value>> {
        self.fields.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.lock().get(index).cloned()
    }

    /// Copy of all fields, taken under the lock.
    pub fn snapshot(&self) -> Vec<Value> {
        self.lock().clone()
    }

    /// Overwrite a field and wake parked readers. Returns false when out of range.
    pub fn set(&self, index: usize, value: Value) -> bool {
        let mut fields = self.lock();
        match fields.get_mut(index) {
            Some(slot) => {
                *slot = value;
                drop(fields);
                self.changed.notify_all();
                true
            }
            None => false,
        }
    }

    /// Replace field `index` with `new` if it is currently identical to `expected`.
    ///
    /// `None` when the index is out of range, otherwise whether the swap happened.
    pub fn compare_exchange(&self, index: usize, expected: &Value, new: Value) -> Option<bool> {
        let mut fields = self.lock();
        let slot = fields.get_mut(index)?;
        if !slot.identical(expected) {
            return Some(false);
        }
        *slot = new;
        drop(fields);
        self.changed.notify_all();
        Some(true)
    }

    /// Park until field `index` is identical to `target`. Returns false when out of range.
    pub fn wait_until(&self, index: usize, target: &Value) -> bool {
        let mut fields = self.lock();
        loop {
            match fields.get(index) {
                None => return false,
                Some(v) if v.identical(target) => return true,
                Some(_) => {
                    fields = self
                        .changed
                        .wait(fields)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}

/// A callable: entry ip plus arguments bound ahead of the explicit ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub ip: u32,
    pub bound: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_zero_field_struct_is_unit() {
        assert_eq!(Value::make_struct(vec![]), Value::Int32(0));
    }

    #[test]
    fn test_one_field_struct_is_its_field() {
        let v = Value::make_struct(vec![Value::string("only")]);
        assert_eq!(v, Value::string("only"));
        assert_eq!(v.field(1, 0).unwrap(), Value::string("only"));
    }

    #[test]
    fn test_multi_field_struct_access() {
        let v = Value::make_struct(vec![Value::Int32(1), Value::Int64(2), Value::Float32(3.0)]);
        assert_eq!(v.field(3, 1).unwrap(), Value::Int64(2));
        assert!(v.field(2, 1).is_err());
        assert!(v.field(3, 3).is_err());
    }

    #[test]
    fn test_structural_equality() {
        let a = Value::make_struct(vec![Value::Int32(1), Value::string("x")]);
        let b = Value::make_struct(vec![Value::Int32(1), Value::string("x")]);
        let c = Value::make_struct(vec![Value::Int32(2), Value::string("x")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(Value::Int32(1), Value::Int64(1));
    }

    #[test]
    fn test_union_layout() {
        let u = Value::make_union(3, Value::UNIT);
        let s = u.as_struct().unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(0), Some(Value::Int32(3)));
        assert_eq!(s.get(1), Some(Value::Int32(0)));
    }

    #[test]
    fn test_compare_exchange() {
        let v = Value::make_struct(vec![Value::Int32(0), Value::UNIT]);
        let s = v.as_struct().unwrap();
        assert_eq!(s.compare_exchange(0, &Value::Int32(0), Value::Int32(1)), Some(true));
        assert_eq!(s.compare_exchange(0, &Value::Int32(0), Value::Int32(1)), Some(false));
        assert_eq!(s.compare_exchange(5, &Value::Int32(0), Value::Int32(1)), None);
        assert_eq!(s.get(0), Some(Value::Int32(1)));
    }

    #[test]
    fn test_wait_until_wakes_on_set() {
        let v = Value::make_struct(vec![Value::Int32(0), Value::UNIT]);
        let shared = Arc::clone(v.as_struct().unwrap());
        let waiter = thread::spawn(move || shared.wait_until(0, &Value::Int32(2)));
        thread::sleep(std::time::Duration::from_millis(10));
        v.as_struct().unwrap().set(0, Value::Int32(2));
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float32(2.0).to_string(), "2.0");
        assert_eq!(Value::Float32(2.5).to_string(), "2.5");
        let s = Value::make_struct(vec![Value::Int32(1), Value::string("a")]);
        assert_eq!(s.to_string(), "{1, a}");
        assert_eq!(Value::InstrPointer(16).to_string(), "@16");
    }

    fn self_referential(tag: i32) -> Value {
        let v = Value::make_struct(vec![Value::UNIT, Value::Int32(tag)]);
        v.as_struct().unwrap().set(0, v.clone());
        v
    }

    #[test]
    fn test_compare_exchange_expecting_the_struct_itself() {
        let v = Value::make_struct(vec![Value::UNIT, Value::UNIT]);
        let s = v.as_struct().unwrap();
        s.set(0, Value::make_struct(vec![Value::Int32(1), Value::Int32(2)]));
        assert_eq!(s.compare_exchange(0, &v, Value::Int32(7)), Some(false));

        s.set(0, v.clone());
        assert_eq!(s.compare_exchange(0, &v, Value::Int32(7)), Some(true));
        assert_eq!(s.get(0), Some(Value::Int32(7)));
    }

    #[test]
    fn test_compare_exchange_compares_structs_by_identity() {
        let inner = Value::make_struct(vec![Value::Int32(1), Value::Int32(2)]);
        let twin = Value::make_struct(vec![Value::Int32(1), Value::Int32(2)]);
        let v = Value::make_struct(vec![inner.clone(), Value::UNIT]);
        let s = v.as_struct().unwrap();
        assert_eq!(s.compare_exchange(0, &twin, Value::UNIT), Some(false));
        assert_eq!(s.compare_exchange(0, &inner, Value::UNIT), Some(true));
    }

    #[test]
    fn test_wait_until_target_is_the_struct_itself() {
        let v = self_referential(0);
        assert!(v.as_struct().unwrap().wait_until(0, &v));
    }

    #[test]
    fn test_cyclic_structs_compare_without_overflow() {
        let a = self_referential(1);
        let b = self_referential(1);
        let c = self_referential(2);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_deep_structs_compare_without_overflow() {
        let build = || {
            let mut v = Value::UNIT;
            for _ in 0..200_000 {
                v = Value::make_struct(vec![v, Value::Int32(1)]);
            }
            v
        };
        let (a, b) = (build(), build());
        assert_eq!(a, b);
        // both chains are leaked to keep drop from recursing
        std::mem::forget(a);
        std::mem::forget(b);
    }

    #[test]
    fn test_cyclic_struct_formatting_is_bounded() {
        let v = self_referential(3);
        let shown = v.to_string();
        assert!(shown.starts_with("{{{"));
        assert!(shown.contains("{..}"));
        assert!(shown.ends_with(", 3}"));
        let debugged = format!("{:?}", v);
        assert!(debugged.starts_with("StructRef([StructRef(["));
        assert!(debugged.contains("StructRef(..)"));
    }

    #[test]
    fn test_store_field_checks_shape() {
        let v = Value::make_struct(vec![Value::Int32(1), Value::Int32(2)]);
        v.store_field(2, 1, Value::Int32(9)).unwrap();
        assert_eq!(v.field(2, 1).unwrap(), Value::Int32(9));
        assert!(v.store_field(3, 1, Value::UNIT).is_err());
        assert!(v.store_field(2, 2, Value::UNIT).is_err());
        assert!(v.store_field(0, 0, Value::UNIT).is_err());

        // an elided 1-field struct whose field is a struct stays untouched
        assert!(v.store_field(1, 0, Value::Int32(5)).is_err());
        assert_eq!(v.field(2, 0).unwrap(), Value::Int32(1));
        assert!(Value::Int32(4).store_field(2, 0, Value::UNIT).is_err());
    }
}

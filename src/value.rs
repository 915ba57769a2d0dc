//! The runtime's universal datum, and the handle type that binds to it.
//!
//! A `Value` is a tagged union of {none, int, float, string, table,
//! function, native-function, custom}. All operations on it are
//! in-place; nothing here produces a value via an operator overload —
//! arithmetic lives in `eval`, not here.

use std::cell::{Cell, RefCell};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::ExecNode;
use crate::context::ContextRef;
use crate::errors::{ControlFlow, ErrorState};
use crate::vm::Vm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueKind {
    None,
    Int,
    Float,
    String,
    Table,
    Function,
    Native,
    Custom,
}

/// A handle to a `Value`, shared by every `Context` slot and every piece
/// of host code that holds the value. Rust's own `Rc` strong count
/// already is the "external reference count" this type's invariants are
/// phrased in terms of: the VM's allocation list holds one clone per
/// live value, so a count of 1 means only the VM itself is keeping the
/// value alive and it is a GC candidate.
pub type Ref = Rc<RefCell<Value>>;

/// Parameters passed to a native callback, mirroring the host API's
/// call record: VM, call context, parameters, opaque user data, error
/// state, and current stack depth.
pub struct NativeCallData<'a> {
    pub vm: &'a mut Vm,
    pub context: ContextRef,
    pub params: Vec<Ref>,
    pub user_data: Option<Rc<dyn std::any::Any>>,
    pub errors: &'a mut ErrorState,
    pub stack_depth: usize,
}

/// A host-supplied native callable. Returning `None` signals failure;
/// the host must have called `errors.add_error(..)` first.
pub type NativeFn = Rc<dyn Fn(&mut NativeCallData) -> Option<Ref>>;

/// A host-owned opaque object. The VM notifies it when the last
/// reference to it (held by any `Value`) goes away, via `CustomHandle`'s
/// `Drop` impl, and the object decides whether to free itself.
pub trait CustomData: fmt::Debug {
    fn on_last_reference_gone(&self) {}
}

/// Wraps a `Rc<dyn CustomData>` so that dropping the next-to-last clone
/// fires the host notification, reproducing "notify on last reference
/// gone" without a VM-side raw-pointer tally.
pub struct CustomHandle(Rc<dyn CustomData>);

impl CustomHandle {
    pub fn new(data: Rc<dyn CustomData>) -> Self {
        Self(data)
    }

    pub fn inner(&self) -> &Rc<dyn CustomData> {
        &self.0
    }

    /// Number of `Value`s currently sharing this custom object.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

impl Clone for CustomHandle {
    fn clone(&self) -> Self {
        CustomHandle(self.0.clone())
    }
}

impl Drop for CustomHandle {
    fn drop(&mut self) {
        if Rc::strong_count(&self.0) == 1 {
            self.0.on_last_reference_gone();
        }
    }
}

impl fmt::Debug for CustomHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Custom({:?})", self.0)
    }
}

/// A parsed function body plus its declared parameter names. The tree
/// is never mutated after parsing, so cloning a function value clones
/// the `Rc` (cheap) rather than deep-copying the node graph — the two
/// are observationally identical for read-only trees.
#[derive(Clone)]
pub struct FunctionData {
    pub body: Rc<ExecNode>,
    pub params: Vec<String>,
    /// Incremented across `evalFunction`; `assign` refuses to mutate a
    /// function Value while this is non-zero.
    pub call_counter: Rc<Cell<u32>>,
}

pub enum Payload {
    None,
    Int(i64),
    Float(f64),
    String(String),
    Table(IndexMap<TableKey, Ref>),
    Function(FunctionData),
    Native(NativeFn),
    Custom(CustomHandle),
}

/// A table key. Equality/hashing is by content for int/float/string and
/// by identity (the bound `Value`'s own address) for custom — there is
/// no meaningful content comparison for an opaque host object, and
/// identity is exactly what spec requires here.
#[derive(Clone)]
pub struct TableKey(pub Ref);

impl TableKey {
    /// Identity of the underlying custom object, not of this particular
    /// `Value` wrapper — so a key that was `copy()`ed into the table
    /// (sharing the same `CustomHandle`) still compares equal to a
    /// fresh lookup built around a different `Value` pointing at the
    /// same host object.
    fn identity_addr(&self) -> usize {
        let v = self.0.borrow();
        match v.get_custom() {
            Some(handle) => Rc::as_ptr(handle.inner()) as *const () as usize,
            None => Rc::as_ptr(&self.0) as *const () as usize,
        }
    }
}

impl PartialEq for TableKey {
    fn eq(&self, other: &Self) -> bool {
        let a = self.0.borrow();
        let b = other.0.borrow();
        match (&a.payload, &b.payload) {
            (Payload::Int(x), Payload::Int(y)) => x == y,
            (Payload::Float(x), Payload::Float(y)) => x == y,
            (Payload::String(x), Payload::String(y)) => x == y,
            (Payload::Custom(_), Payload::Custom(_)) => self.identity_addr() == other.identity_addr(),
            _ => false,
        }
    }
}

impl Eq for TableKey {}

impl Hash for TableKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let v = self.0.borrow();
        match &v.payload {
            Payload::Int(x) => {
                0u8.hash(state);
                x.hash(state);
            }
            Payload::Float(x) => {
                1u8.hash(state);
                x.to_bits().hash(state);
            }
            Payload::String(x) => {
                2u8.hash(state);
                x.hash(state);
            }
            Payload::Custom(_) => {
                3u8.hash(state);
                self.identity_addr().hash(state);
            }
            _ => {
                4u8.hash(state);
            }
        }
    }
}

/// Computes a stable hash for `debugString`-style deterministic dumps;
/// not used for the table storage itself.
pub fn quick_hash(key: &TableKey) -> u64 {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    h.finish()
}

pub struct Value {
    pub kind: ValueKind,
    payload: Payload,
    pub is_const: bool,
    pub copyable: bool,
    gc_mark: Cell<u64>,
}

impl Value {
    pub fn new() -> Self {
        Self {
            kind: ValueKind::None,
            payload: Payload::None,
            is_const: false,
            copyable: true,
            gc_mark: Cell::new(0),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ValueKind::None => "none",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Table => "table",
            ValueKind::Function => "function",
            ValueKind::Native => "native-function",
            ValueKind::Custom => "custom",
        }
    }

    pub fn is_valid_key_type(kind: ValueKind) -> bool {
        matches!(
            kind,
            ValueKind::Int | ValueKind::Float | ValueKind::String | ValueKind::Custom
        )
    }

    // -- setters: each clears prior payload, then installs the new kind --

    pub fn set_int(&mut self, v: i64) {
        self.payload = Payload::Int(v);
        self.kind = ValueKind::Int;
    }

    pub fn set_float(&mut self, v: f64) {
        self.payload = Payload::Float(v);
        self.kind = ValueKind::Float;
    }

    pub fn set_string(&mut self, v: impl Into<String>) {
        self.payload = Payload::String(v.into());
        self.kind = ValueKind::String;
    }

    pub fn set_table(&mut self) {
        self.payload = Payload::Table(IndexMap::new());
        self.kind = ValueKind::Table;
    }

    pub fn set_function(&mut self, body: Rc<ExecNode>, params: Vec<String>) {
        self.payload = Payload::Function(FunctionData {
            body,
            params,
            call_counter: Rc::new(Cell::new(0)),
        });
        self.kind = ValueKind::Function;
    }

    pub fn set_native(&mut self, f: NativeFn) {
        self.payload = Payload::Native(f);
        self.kind = ValueKind::Native;
    }

    pub fn set_custom(&mut self, data: Rc<dyn CustomData>) {
        self.payload = Payload::Custom(CustomHandle::new(data));
        self.kind = ValueKind::Custom;
    }

    pub fn set_none(&mut self) {
        self.payload = Payload::None;
        self.kind = ValueKind::None;
    }

    // -- getters --

    pub fn get_int(&self) -> Option<i64> {
        match &self.payload {
            Payload::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float(&self) -> Option<f64> {
        match &self.payload {
            Payload::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&self) -> Option<&str> {
        match &self.payload {
            Payload::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_table(&self) -> Option<&IndexMap<TableKey, Ref>> {
        match &self.payload {
            Payload::Table(m) => Some(m),
            _ => None,
        }
    }

    pub fn get_table_mut(&mut self) -> Option<&mut IndexMap<TableKey, Ref>> {
        match &mut self.payload {
            Payload::Table(m) => Some(m),
            _ => None,
        }
    }

    pub fn get_function(&self) -> Option<&FunctionData> {
        match &self.payload {
            Payload::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn get_native(&self) -> Option<&NativeFn> {
        match &self.payload {
            Payload::Native(f) => Some(f),
            _ => None,
        }
    }

    pub fn get_custom(&self) -> Option<&CustomHandle> {
        match &self.payload {
            Payload::Custom(c) => Some(c),
            _ => None,
        }
    }

    /// Table lookup by content/identity-equal key.
    pub fn get_in_table(&self, key: &Ref) -> Option<Ref> {
        let table = self.get_table()?;
        table.get(&TableKey(key.clone())).cloned()
    }

    pub fn clear_in_table(&mut self, key: &Ref) {
        if let Some(table) = self.get_table_mut() {
            table.shift_remove(&TableKey(key.clone()));
        }
    }

    /// Value-copy assignment (`this.set(other)`): fails if `this` is
    /// `const` or `other` is not `copyable`.
    pub fn set(&mut self, other: &Value) -> Result<(), &'static str> {
        if self.is_const {
            return Err("tried to modify a const value");
        }
        if !other.copyable {
            return Err("tried to copy from a non-copyable value");
        }
        match &other.payload {
            Payload::None => self.set_none(),
            Payload::Int(v) => self.set_int(*v),
            Payload::Float(v) => self.set_float(*v),
            Payload::String(v) => self.set_string(v.clone()),
            Payload::Table(m) => {
                self.payload = Payload::Table(m.clone());
                self.kind = ValueKind::Table;
            }
            Payload::Function(f) => {
                self.payload = Payload::Function(FunctionData {
                    body: f.body.clone(),
                    params: f.params.clone(),
                    call_counter: Rc::new(Cell::new(0)),
                });
                self.kind = ValueKind::Function;
            }
            Payload::Native(f) => {
                self.payload = Payload::Native(f.clone());
                self.kind = ValueKind::Native;
            }
            Payload::Custom(c) => {
                self.payload = Payload::Custom(c.clone());
                self.kind = ValueKind::Custom;
            }
        }
        Ok(())
    }

    /// Returns a fresh `Value` equivalent to `set(this)` on a new value.
    pub fn copy(&self) -> Value {
        let mut fresh = Value::new();
        // A fresh value is never const, and `self` must be copyable for
        // this to succeed; callers that need the failure path should
        // call `set` directly.
        let _ = fresh.set(self);
        fresh
    }

    pub(crate) fn gc_mark(&self) -> u64 {
        self.gc_mark.get()
    }

    pub(crate) fn set_gc_mark(&self, epoch: u64) {
        self.gc_mark.set(epoch);
    }

    pub(crate) fn payload(&self) -> &Payload {
        &self.payload
    }

    pub(crate) fn clear_data(&mut self) {
        self.payload = Payload::None;
        self.kind = ValueKind::None;
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::None => write!(f, "none"),
            Payload::Int(v) => write!(f, "{v}"),
            Payload::Float(v) => write!(f, "{v}"),
            Payload::String(v) => write!(f, "{v:?}"),
            Payload::Table(m) => write!(f, "table({} entries)", m.len()),
            Payload::Function(fd) => write!(f, "function/{}", fd.params.len()),
            Payload::Native(_) => write!(f, "native-function"),
            Payload::Custom(c) => write!(f, "{:?}", c),
        }
    }
}

/// `normal`/etc control-flow convenience for building the `(Ref, ControlFlow)`
/// evaluator return without repeating boilerplate at every call site.
pub fn normal(v: Ref) -> (Ref, ControlFlow) {
    (v, ControlFlow::Normal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Ref {
        let mut val = Value::new();
        val.set_int(v);
        Rc::new(RefCell::new(val))
    }

    #[test]
    fn const_rejects_set() {
        let mut a = Value::new();
        a.set_int(1);
        a.is_const = true;
        let mut b = Value::new();
        b.set_int(2);
        assert!(a.set(&b).is_err());
    }

    #[test]
    fn non_copyable_rejects_set() {
        let mut a = Value::new();
        a.set_int(1);
        let mut b = Value::new();
        b.set_int(2);
        b.copyable = false;
        assert!(a.set(&b).is_err());
    }

    #[test]
    fn table_key_equality_by_content() {
        let a = TableKey(int(5));
        let b = TableKey(int(5));
        assert!(a == b);
    }

    #[test]
    fn table_auto_vivify_via_entries() {
        let mut t = Value::new();
        t.set_table();
        let k = int(1);
        assert!(t.get_in_table(&k).is_none());
        t.get_table_mut().unwrap().insert(TableKey(k.clone()), int(42));
        assert_eq!(t.get_in_table(&k).unwrap().borrow().get_int(), Some(42));
    }
}

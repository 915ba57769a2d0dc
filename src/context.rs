//! Lexical scoping.
//!
//! A `Context` is a name-to-handle mapping plus a parent link. Lookup
//! walks the parent chain; declaration (`var`) always binds locally.
//! `protected` marks a slot as rebinding-proof, independent of whatever
//! `const`-ness the bound `Value` itself carries.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Ref;

struct Slot {
    value: Ref,
    protected: bool,
}

pub struct Context {
    slots: HashMap<String, Slot>,
    parent: Option<ContextRef>,
}

/// Contexts are reference-counted so child scopes can outlive a single
/// call to `eval` while still being torn down once nothing references
/// them — a block's context disappears the moment its evaluation frame
/// returns and nothing else kept a handle into it.
pub type ContextRef = Rc<RefCell<Context>>;

impl Context {
    pub fn new(parent: Option<ContextRef>) -> Self {
        Self {
            slots: HashMap::new(),
            parent,
        }
    }

    pub fn new_ref(parent: Option<ContextRef>) -> ContextRef {
        Rc::new(RefCell::new(Self::new(parent)))
    }

    pub fn parent(&self) -> Option<ContextRef> {
        self.parent.clone()
    }

    /// Insert or overwrite the local slot for `name`.
    pub fn set_variable(&mut self, name: &str, value: Ref) {
        match self.slots.get_mut(name) {
            Some(slot) => slot.value = value,
            None => {
                self.slots.insert(
                    name.to_string(),
                    Slot {
                        value,
                        protected: false,
                    },
                );
            }
        }
    }

    /// Remove the local slot for `name`. The `protected` flag is
    /// unaffected by removal (it's gone along with the slot, but
    /// re-declaring the name starts unprotected again).
    pub fn unset_variable(&mut self, name: &str) {
        self.slots.remove(name);
    }

    /// True if `name` is declared in *this* context (not a parent).
    pub fn has_local(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn set_variable_protected(&mut self, name: &str, protected: bool) {
        if let Some(slot) = self.slots.get_mut(name) {
            slot.protected = protected;
        }
    }

    pub fn get_variable_protected(&self, name: &str) -> bool {
        self.slots.get(name).map(|s| s.protected).unwrap_or(false)
    }

    pub fn clear_all_variables(&mut self) {
        self.slots.clear();
    }
}

/// Local lookup with parent delegation; `None` when not found anywhere.
pub fn get_variable(ctx: &ContextRef, name: &str) -> Option<Ref> {
    let borrowed = ctx.borrow();
    if let Some(slot) = borrowed.slots.get(name) {
        return Some(slot.value.clone());
    }
    let parent = borrowed.parent.clone();
    drop(borrowed);
    match parent {
        Some(p) => get_variable(&p, name),
        None => None,
    }
}

/// Locates the slot itself (without recursing into parents unless
/// `no_recurse` is false) so the evaluator can rebind it in place for
/// `:=`. Returns `(owning_context, protected)` so the caller can perform
/// the rebind and check protection atomically.
pub fn find_slot_context(ctx: &ContextRef, name: &str, no_recurse: bool) -> Option<ContextRef> {
    if ctx.borrow().slots.contains_key(name) {
        return Some(ctx.clone());
    }
    if no_recurse {
        return None;
    }
    let parent = ctx.borrow().parent.clone();
    match parent {
        Some(p) => find_slot_context(&p, name),
        None => None,
    }
}

/// Rebinds an existing slot to a new `Value`, wherever in the parent
/// chain it lives. Fails if the slot is protected or doesn't exist.
pub fn rebind_variable(ctx: &ContextRef, name: &str, value: Ref) -> Result<(), &'static str> {
    match find_slot_context(ctx, name, false) {
        Some(owner) => {
            let mut owner = owner.borrow_mut();
            let slot = owner.slots.get_mut(name).expect("located by find_slot_context");
            if slot.protected {
                return Err("tried to rebind a protected variable");
            }
            slot.value = value;
            Ok(())
        }
        None => Err("variable not declared"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::cell::RefCell as Cell;

    fn make_ref(i: i64) -> Ref {
        let mut v = Value::new();
        v.set_int(i);
        Rc::new(Cell::new(v))
    }

    #[test]
    fn parent_delegation() {
        let root = Context::new_ref(None);
        root.borrow_mut().set_variable("x", make_ref(1));
        let child = Context::new_ref(Some(root.clone()));
        assert!(get_variable(&child, "x").is_some());
        assert!(!child.borrow().has_local("x"));
    }

    #[test]
    fn protected_slot_rejects_rebind() {
        let root = Context::new_ref(None);
        root.borrow_mut().set_variable("x", make_ref(1));
        root.borrow_mut().set_variable_protected("x", true);
        assert!(rebind_variable(&root, "x", make_ref(2)).is_err());
    }
}

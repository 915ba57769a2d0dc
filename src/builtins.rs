//! Built-in natives registered into every VM's internal context.
//!
//! `int`, `float`, `string`, `table_isSet`, and `table_unSet` mirror the
//! original's own registration list. `table` is extended here to accept
//! initial values (`table(1, 2, 3)`) instead of only the no-argument
//! form, and `table_size`/`table_keys` are new — the original has no
//! equivalent, so a host script has no way to learn how many entries a
//! table holds or enumerate them, which ends up being a dead end for any
//! real program.

use std::rc::Rc;

use crate::value::{NativeCallData, Ref, TableKey, ValueKind};
use crate::vm::Vm;

pub fn register(vm: &mut Vm) {
    vm.register_native("int", Rc::new(native_int));
    vm.register_native("float", Rc::new(native_float));
    vm.register_native("string", Rc::new(native_string));
    vm.register_native("table", Rc::new(native_table));
    vm.register_native("table_isSet", Rc::new(native_table_is_set));
    vm.register_native("table_unSet", Rc::new(native_table_un_set));
    vm.register_native("table_size", Rc::new(native_table_size));
    vm.register_native("table_keys", Rc::new(native_table_keys));
}

fn arg(data: &NativeCallData, index: usize) -> Option<Ref> {
    data.params.get(index).cloned()
}

/// Converts `value` to an int the way the original's coercion does:
/// int passes through, float truncates toward zero, a string parses (or
/// errors), anything else is an error.
fn to_int(data: &mut NativeCallData, value: &Ref) -> Option<i64> {
    let b = value.borrow();
    match b.kind {
        ValueKind::Int => b.get_int(),
        ValueKind::Float => Some(b.get_float().unwrap() as i64),
        ValueKind::String => {
            let s = b.get_string().unwrap();
            match s.trim().parse::<i64>() {
                Ok(i) => Some(i),
                Err(_) => {
                    drop(b);
                    data.errors.add_error(format!("cannot convert string to int: {s:?}"));
                    None
                }
            }
        }
        other => {
            let name = b.kind_name();
            drop(b);
            data.errors.add_error(format!("cannot convert {other:?} ({name}) to int"));
            None
        }
    }
}

fn to_float(data: &mut NativeCallData, value: &Ref) -> Option<f64> {
    let b = value.borrow();
    match b.kind {
        ValueKind::Int => Some(b.get_int().unwrap() as f64),
        ValueKind::Float => b.get_float(),
        ValueKind::String => {
            let s = b.get_string().unwrap();
            match s.trim().parse::<f64>() {
                Ok(f) => Some(f),
                Err(_) => {
                    drop(b);
                    data.errors.add_error(format!("cannot convert string to float: {s:?}"));
                    None
                }
            }
        }
        _ => {
            let name = b.kind_name();
            drop(b);
            data.errors.add_error(format!("cannot convert {name} to float"));
            None
        }
    }
}

fn to_display_string(value: &Ref) -> String {
    let b = value.borrow();
    match b.kind {
        ValueKind::None => "none".to_string(),
        ValueKind::Int => b.get_int().unwrap().to_string(),
        ValueKind::Float => b.get_float().unwrap().to_string(),
        ValueKind::String => b.get_string().unwrap().to_string(),
        _ => format!("{b:?}"),
    }
}

fn native_int(data: &mut NativeCallData) -> Option<Ref> {
    let value = match arg(data, 0) {
        Some(v) => v,
        None => {
            data.errors.add_error("int() requires one argument");
            return None;
        }
    };
    let i = to_int(data, &value)?;
    Some(data.vm.make_int(i))
}

fn native_float(data: &mut NativeCallData) -> Option<Ref> {
    let value = match arg(data, 0) {
        Some(v) => v,
        None => {
            data.errors.add_error("float() requires one argument");
            return None;
        }
    };
    let f = to_float(data, &value)?;
    Some(data.vm.make_float(f))
}

fn native_string(data: &mut NativeCallData) -> Option<Ref> {
    let value = match arg(data, 0) {
        Some(v) => v,
        None => {
            data.errors.add_error("string() requires one argument");
            return None;
        }
    };
    let s = to_display_string(&value);
    Some(data.vm.make_string(s))
}

/// `table()` makes an empty table; `table(a, b, c)` makes one populated
/// with `0 -> a, 1 -> b, 2 -> c`, the way an array literal would look if
/// this language had one.
fn native_table(data: &mut NativeCallData) -> Option<Ref> {
    let params = data.params.clone();
    let table = data.vm.make_table();
    for (i, value) in params.into_iter().enumerate() {
        let key = data.vm.make_int(i as i64);
        let copied = value.borrow().copy();
        let stored = data.vm.make_value();
        *stored.borrow_mut() = copied;
        table
            .borrow_mut()
            .get_table_mut()
            .expect("just created as a table")
            .insert(TableKey(key), stored);
    }
    Some(table)
}

fn require_table(data: &mut NativeCallData, value: &Ref) -> Option<()> {
    if value.borrow().kind != ValueKind::Table {
        data.errors.add_error("argument is not a table");
        return None;
    }
    Some(())
}

fn native_table_is_set(data: &mut NativeCallData) -> Option<Ref> {
    let table = arg(data, 0)?;
    let key = arg(data, 1)?;
    require_table(data, &table)?;
    let is_set = table.borrow().get_in_table(&key).is_some();
    Some(data.vm.make_int(is_set as i64))
}

fn native_table_un_set(data: &mut NativeCallData) -> Option<Ref> {
    let table = arg(data, 0)?;
    let key = arg(data, 1)?;
    require_table(data, &table)?;
    if table.borrow().is_const {
        data.errors.add_error("tried to modify a const table");
        return None;
    }
    table.borrow_mut().clear_in_table(&key);
    Some(data.vm.make_int(0))
}

fn native_table_size(data: &mut NativeCallData) -> Option<Ref> {
    let table = arg(data, 0)?;
    require_table(data, &table)?;
    let size = table.borrow().get_table().map(|t| t.len()).unwrap_or(0);
    Some(data.vm.make_int(size as i64))
}

/// Returns a fresh table `0 -> key0, 1 -> key1, ...` in the source
/// table's own iteration order (insertion order, since tables are
/// `IndexMap`-backed).
fn native_table_keys(data: &mut NativeCallData) -> Option<Ref> {
    let table = arg(data, 0)?;
    require_table(data, &table)?;
    let keys: Vec<Ref> = table
        .borrow()
        .get_table()
        .expect("checked above")
        .keys()
        .map(|k| k.0.clone())
        .collect();
    let result = data.vm.make_table();
    for (i, key) in keys.into_iter().enumerate() {
        let idx = data.vm.make_int(i as i64);
        let copied = key.borrow().copy();
        let stored = data.vm.make_value();
        *stored.borrow_mut() = copied;
        result
            .borrow_mut()
            .get_table_mut()
            .expect("just created as a table")
            .insert(TableKey(idx), stored);
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::errors::ErrorState;

    fn call(vm: &mut Vm, name: &str, params: Vec<Ref>) -> Option<Ref> {
        let func = crate::context::get_variable(&vm.internal_context(), name).unwrap();
        let mut errors = ErrorState::new();
        let ctx = Context::new_ref(Some(vm.root_context()));
        let (v, flow) = vm.eval_function(&func, Some(&ctx), params, None, &mut errors, true, 0);
        if flow == crate::errors::ControlFlow::Error {
            None
        } else {
            Some(v)
        }
    }

    #[test]
    fn int_parses_string() {
        let mut vm = Vm::new();
        let s = vm.make_string("42");
        let result = call(&mut vm, "int", vec![s]).unwrap();
        assert_eq!(result.borrow().get_int(), Some(42));
    }

    #[test]
    fn table_literal_populates_indices() {
        let mut vm = Vm::new();
        let a = vm.make_int(10);
        let b = vm.make_int(20);
        let t = call(&mut vm, "table", vec![a, b]).unwrap();
        assert_eq!(call(&mut vm, "table_size", vec![t.clone()]).unwrap().borrow().get_int(), Some(2));
        let k0 = vm.make_int(0);
        assert_eq!(
            call(&mut vm, "table_isSet", vec![t, k0]).unwrap().borrow().get_int(),
            Some(1)
        );
    }
}

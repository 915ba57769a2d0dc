//! The recursive tree walker.
//!
//! `eval` returns a `Value` handle; `eval_ptr` additionally resolves a
//! node to an L-value location when the node is a valid assignment
//! target (`var-lookup`, `variable-dec`, a table `index` against a
//! mutable table). Splitting these into two functions (rather than a
//! runtime "is this an lvalue" flag) is the same choice the original
//! evaluator makes.

use std::rc::Rc;

use crate::ast::{ExecNode, Literal, Op};
use crate::context::{self, ContextRef};
use crate::errors::{ControlFlow, ErrorState};
use crate::value::{normal, Ref, TableKey, Value, ValueKind};
use crate::vm::Vm;

/// Where an assignment target lives, so `ref-assign` can rebind it.
pub enum LValue {
    Variable(ContextRef, String),
    TableEntry(Ref, Ref),
}

impl LValue {
    fn rebind(&self, new_value: Ref) -> Result<(), String> {
        match self {
            LValue::Variable(ctx, name) => {
                context::rebind_variable(ctx, name, new_value).map_err(|e| e.to_string())
            }
            LValue::TableEntry(table, key) => {
                if table.borrow().is_const {
                    return Err("tried to modify a const table".into());
                }
                let mut t = table.borrow_mut();
                let map = t.get_table_mut().expect("table kind checked by eval_index");
                map.insert(TableKey(key.clone()), new_value);
                Ok(())
            }
        }
    }
}

fn fail(vm: &mut Vm, errors: &mut ErrorState, message: impl Into<String>) -> (Ref, ControlFlow) {
    errors.add_error(message);
    (vm.make_value(), ControlFlow::Error)
}

/// Evaluates `node` in `ctx`, checking the stack-depth budget, the
/// execution-node budget, and the GC threshold before doing any work,
/// exactly as the original's prelude does on every node visited.
pub fn eval(vm: &mut Vm, node: &ExecNode, ctx: &ContextRef, errors: &mut ErrorState, depth: usize) -> (Ref, ControlFlow) {
    errors.set_location(node.file.clone(), node.line);
    vm.maybe_gc();
    if !vm.check_object_count() {
        return fail(vm, errors, "live object count exceeds configured maximum");
    }
    if depth > vm.options().max_stack_frames {
        return fail(vm, errors, "stack depth exceeds configured maximum");
    }
    if !vm.consume_execution_node() {
        return fail(vm, errors, "execution-node budget exhausted");
    }

    match node.op {
        Op::Literal => eval_literal(vm, node),
        Op::VarLookup => eval_var_lookup(vm, node, ctx, errors),
        Op::VariableDec => eval_variable_dec(vm, node, ctx, errors),
        Op::Assign => eval_assign(vm, node, ctx, errors, depth),
        Op::RefAssign => eval_ref_assign(vm, node, ctx, errors, depth),
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::And | Op::Or | Op::Gt | Op::Lt | Op::Ge | Op::Le
        | Op::Eq | Op::Neq => eval_binary_math(vm, node, ctx, errors, depth),
        Op::Not => eval_not(vm, node, ctx, errors, depth),
        Op::Increment | Op::Decrement => eval_unary_math(vm, node, ctx, errors, depth),
        Op::Block => eval_block(vm, node, ctx, errors, depth, true),
        Op::FreeBlock => eval_block(vm, node, ctx, errors, depth, false),
        Op::IfElse => eval_if_else(vm, node, ctx, errors, depth),
        Op::Loop => eval_loop(vm, node, ctx, errors, depth),
        Op::FunctionCall => eval_function_call(vm, node, ctx, errors, depth),
        Op::Return => {
            let (v, flow) = eval(vm, &node.children[0], ctx, errors, depth);
            if flow == ControlFlow::Error {
                (v, flow)
            } else {
                (v, ControlFlow::FunctionReturn)
            }
        }
        Op::Break => (vm.make_int(0), ControlFlow::Break),
        Op::Continue => (vm.make_int(0), ControlFlow::Continue),
        Op::DebugPrint => {
            let (v, flow) = eval(vm, &node.children[0], ctx, errors, depth);
            if flow != ControlFlow::Error {
                println!("{:?}", v.borrow());
            }
            (v, flow)
        }
        Op::Index => match eval_index(vm, node, ctx, errors, depth) {
            Ok(v) => normal(v),
            Err((v, flow)) => (v, flow),
        },
        Op::Error => fail(vm, errors, "unimplemented operator"),
    }
}

/// Resolves `node` as an assignment target. `None` means "not a valid
/// L-value" — the caller is responsible for turning that into an error.
pub fn eval_ptr(
    vm: &mut Vm,
    node: &ExecNode,
    ctx: &ContextRef,
    errors: &mut ErrorState,
    depth: usize,
) -> Option<LValue> {
    match node.op {
        Op::VarLookup => match &node.literal {
            Some(Literal::Ident(name)) => Some(LValue::Variable(ctx.clone(), name.clone())),
            _ => None,
        },
        Op::VariableDec => {
            // Declaring still needs to happen (eval_variable_dec does
            // the declaration); this just hands back where it landed.
            let (_, flow) = eval(vm, node, ctx, errors, depth);
            if flow == ControlFlow::Error {
                return None;
            }
            match &node.literal {
                Some(Literal::Ident(name)) => Some(LValue::Variable(ctx.clone(), name.clone())),
                _ => None,
            }
        }
        Op::Index => {
            let (table, key, _) = match eval_index_parts(vm, node, ctx, errors, depth) {
                Ok(parts) => parts,
                Err(_) => return None,
            };
            if table.borrow().is_const {
                errors.add_error("tried to modify a const table");
                return None;
            }
            Some(LValue::TableEntry(table, key))
        }
        _ => None,
    }
}

fn eval_literal(vm: &mut Vm, node: &ExecNode) -> (Ref, ControlFlow) {
    let v = match &node.literal {
        Some(Literal::Int(i)) => vm.make_int(*i),
        Some(Literal::Float(f)) => vm.make_float(*f),
        Some(Literal::String(s)) => vm.make_string(s.clone()),
        Some(Literal::Function(body, params)) => vm.make_function(body.clone(), params.clone()),
        Some(Literal::Ident(_)) | None => vm.make_value(),
    };
    normal(v)
}

fn eval_var_lookup(vm: &mut Vm, node: &ExecNode, ctx: &ContextRef, errors: &mut ErrorState) -> (Ref, ControlFlow) {
    let name = match &node.literal {
        Some(Literal::Ident(n)) => n,
        _ => return fail(vm, errors, "malformed variable lookup node"),
    };
    match context::get_variable(ctx, name) {
        Some(v) => normal(v),
        None => fail(vm, errors, format!("unknown variable: {name}")),
    }
}

fn eval_variable_dec(vm: &mut Vm, node: &ExecNode, ctx: &ContextRef, errors: &mut ErrorState) -> (Ref, ControlFlow) {
    let name = match &node.literal {
        Some(Literal::Ident(n)) => n,
        _ => return fail(vm, errors, "malformed variable declaration node"),
    };
    if ctx.borrow().has_local(name) {
        return fail(vm, errors, format!("duplicate local declaration: {name}"));
    }
    let v = vm.make_value();
    ctx.borrow_mut().set_variable(name, v.clone());
    normal(v)
}

fn eval_assign(
    vm: &mut Vm,
    node: &ExecNode,
    ctx: &ContextRef,
    errors: &mut ErrorState,
    depth: usize,
) -> (Ref, ControlFlow) {
    let (lhs, flow) = eval(vm, &node.children[0], ctx, errors, depth);
    if flow != ControlFlow::Normal {
        return (lhs, flow);
    }
    if lhs
        .borrow()
        .get_function()
        .map(|f| f.call_counter.get() > 0)
        .unwrap_or(false)
    {
        return fail(vm, errors, "tried to modify a function that is currently executing");
    }
    let (rhs, flow) = eval(vm, &node.children[1], ctx, errors, depth);
    if flow != ControlFlow::Normal {
        return (rhs, flow);
    }
    let result = lhs.borrow_mut().set(&rhs.borrow());
    match result {
        Ok(()) => normal(lhs),
        Err(msg) => fail(vm, errors, msg),
    }
}

fn eval_ref_assign(
    vm: &mut Vm,
    node: &ExecNode,
    ctx: &ContextRef,
    errors: &mut ErrorState,
    depth: usize,
) -> (Ref, ControlFlow) {
    let (rhs, flow) = eval(vm, &node.children[1], ctx, errors, depth);
    if flow != ControlFlow::Normal {
        return (rhs, flow);
    }
    let lvalue = match eval_ptr(vm, &node.children[0], ctx, errors, depth) {
        Some(l) => l,
        None => return fail(vm, errors, "invalid reference-assignment target"),
    };
    match lvalue.rebind(rhs.clone()) {
        Ok(()) => normal(rhs),
        Err(msg) => fail(vm, errors, msg),
    }
}

fn kind_pair(a: &Value, b: &Value) -> (ValueKind, ValueKind) {
    (a.kind, b.kind)
}

fn eval_binary_math(
    vm: &mut Vm,
    node: &ExecNode,
    ctx: &ContextRef,
    errors: &mut ErrorState,
    depth: usize,
) -> (Ref, ControlFlow) {
    let (lhs, flow) = eval(vm, &node.children[0], ctx, errors, depth);
    if flow != ControlFlow::Normal {
        return (lhs, flow);
    }
    let (rhs, flow) = eval(vm, &node.children[1], ctx, errors, depth);
    if flow != ControlFlow::Normal {
        return (rhs, flow);
    }
    let lb = lhs.borrow();
    let rb = rhs.borrow();
    let (lk, rk) = kind_pair(&lb, &rb);
    if lk != rk {
        let msg = format!("type mismatch in operator: {} vs {}", lb.kind_name(), rb.kind_name());
        drop(lb);
        drop(rb);
        return fail(vm, errors, msg);
    }

    macro_rules! numeric {
        ($int_op:expr, $float_op:expr) => {
            match lk {
                ValueKind::Int => {
                    let (a, b) = (lb.get_int().unwrap(), rb.get_int().unwrap());
                    drop(lb);
                    drop(rb);
                    $int_op(vm, errors, a, b)
                }
                ValueKind::Float => {
                    let (a, b) = (lb.get_float().unwrap(), rb.get_float().unwrap());
                    drop(lb);
                    drop(rb);
                    $float_op(vm, a, b)
                }
                _ => {
                    let msg = format!("operator not supported for type: {}", lb.kind_name());
                    drop(lb);
                    drop(rb);
                    fail(vm, errors, msg)
                }
            }
        };
    }

    match node.op {
        Op::Add => match lk {
            ValueKind::String => {
                let s = format!("{}{}", lb.get_string().unwrap(), rb.get_string().unwrap());
                drop(lb);
                drop(rb);
                normal(vm.make_string(s))
            }
            ValueKind::Int | ValueKind::Float => numeric!(
                |vm: &mut Vm, _e: &mut ErrorState, a: i64, b: i64| normal(vm.make_int(a.wrapping_add(b))),
                |vm: &mut Vm, a: f64, b: f64| normal(vm.make_float(a + b))
            ),
            _ => {
                let msg = format!("operator '+' not supported for type: {}", lb.kind_name());
                drop(lb);
                drop(rb);
                fail(vm, errors, msg)
            }
        },
        Op::Sub => numeric!(
            |vm: &mut Vm, _e: &mut ErrorState, a: i64, b: i64| normal(vm.make_int(a.wrapping_sub(b))),
            |vm: &mut Vm, a: f64, b: f64| normal(vm.make_float(a - b))
        ),
        Op::Mul => numeric!(
            |vm: &mut Vm, _e: &mut ErrorState, a: i64, b: i64| normal(vm.make_int(a.wrapping_mul(b))),
            |vm: &mut Vm, a: f64, b: f64| normal(vm.make_float(a * b))
        ),
        Op::Div => numeric!(
            |vm: &mut Vm, e: &mut ErrorState, a: i64, b: i64| {
                if b == 0 {
                    fail(vm, e, "division by zero")
                } else {
                    normal(vm.make_int(a.wrapping_div(b)))
                }
            },
            |vm: &mut Vm, a: f64, b: f64| normal(vm.make_float(a / b))
        ),
        Op::And => numeric!(
            |vm: &mut Vm, _e: &mut ErrorState, a: i64, b: i64| normal(vm.make_int(((a != 0) && (b != 0)) as i64)),
            |vm: &mut Vm, a: f64, b: f64| normal(vm.make_int(((a != 0.0) && (b != 0.0)) as i64))
        ),
        Op::Or => numeric!(
            |vm: &mut Vm, _e: &mut ErrorState, a: i64, b: i64| normal(vm.make_int(((a != 0) || (b != 0)) as i64)),
            |vm: &mut Vm, a: f64, b: f64| normal(vm.make_int(((a != 0.0) || (b != 0.0)) as i64))
        ),
        Op::Gt => numeric!(
            |vm: &mut Vm, _e: &mut ErrorState, a: i64, b: i64| normal(vm.make_int((a > b) as i64)),
            |vm: &mut Vm, a: f64, b: f64| normal(vm.make_int((a > b) as i64))
        ),
        Op::Lt => numeric!(
            |vm: &mut Vm, _e: &mut ErrorState, a: i64, b: i64| normal(vm.make_int((a < b) as i64)),
            |vm: &mut Vm, a: f64, b: f64| normal(vm.make_int((a < b) as i64))
        ),
        Op::Ge => numeric!(
            |vm: &mut Vm, _e: &mut ErrorState, a: i64, b: i64| normal(vm.make_int((a >= b) as i64)),
            |vm: &mut Vm, a: f64, b: f64| normal(vm.make_int((a >= b) as i64))
        ),
        Op::Le => numeric!(
            |vm: &mut Vm, _e: &mut ErrorState, a: i64, b: i64| normal(vm.make_int((a <= b) as i64)),
            |vm: &mut Vm, a: f64, b: f64| normal(vm.make_int((a <= b) as i64))
        ),
        Op::Eq => numeric!(
            |vm: &mut Vm, _e: &mut ErrorState, a: i64, b: i64| normal(vm.make_int((a == b) as i64)),
            |vm: &mut Vm, a: f64, b: f64| normal(vm.make_int((a == b) as i64))
        ),
        Op::Neq => numeric!(
            |vm: &mut Vm, _e: &mut ErrorState, a: i64, b: i64| normal(vm.make_int((a != b) as i64)),
            |vm: &mut Vm, a: f64, b: f64| normal(vm.make_int((a != b) as i64))
        ),
        _ => unreachable!("eval_binary_math dispatched for non-math op"),
    }
}

fn eval_not(vm: &mut Vm, node: &ExecNode, ctx: &ContextRef, errors: &mut ErrorState, depth: usize) -> (Ref, ControlFlow) {
    let (operand, flow) = eval(vm, &node.children[0], ctx, errors, depth);
    if flow != ControlFlow::Normal {
        return (operand, flow);
    }
    let b = operand.borrow();
    let result = match b.kind {
        ValueKind::Int => Some((b.get_int().unwrap() == 0) as i64),
        ValueKind::Float => Some((b.get_float().unwrap() == 0.0) as i64),
        _ => None,
    };
    match result {
        Some(r) => {
            drop(b);
            normal(vm.make_int(r))
        }
        None => {
            let msg = format!("operator '!' not supported for type: {}", b.kind_name());
            drop(b);
            fail(vm, errors, msg)
        }
    }
}

fn eval_unary_math(
    vm: &mut Vm,
    node: &ExecNode,
    ctx: &ContextRef,
    errors: &mut ErrorState,
    depth: usize,
) -> (Ref, ControlFlow) {
    // Only the r-value path: `eval` on a `var-lookup`/`index` node already
    // returns the same live handle the context/table holds, so mutating
    // it in place is visible through both. No `eval_ptr` here — its
    // `Index` arm gates on the table's own const-ness, which is a
    // stricter check than `++`/`--` is supposed to apply; this gates
    // solely on the operand Value's own `is_const`.
    let (operand, flow) = eval(vm, &node.children[0], ctx, errors, depth);
    if flow != ControlFlow::Normal {
        return (operand, flow);
    }
    if operand.borrow().is_const {
        return fail(vm, errors, "tried to modify a const value");
    }
    let mut b = operand.borrow_mut();
    let delta = if node.op == Op::Increment { 1 } else { -1 };
    match b.kind {
        ValueKind::Int => {
            let v = b.get_int().unwrap();
            b.set_int(v + delta);
        }
        ValueKind::Float => {
            let v = b.get_float().unwrap();
            b.set_float(v + delta as f64);
        }
        _ => {
            let msg = format!("operator not supported for type: {}", b.kind_name());
            drop(b);
            return fail(vm, errors, msg);
        }
    }
    drop(b);
    normal(operand)
}

fn eval_block(
    vm: &mut Vm,
    node: &ExecNode,
    ctx: &ContextRef,
    errors: &mut ErrorState,
    depth: usize,
    push_scope: bool,
) -> (Ref, ControlFlow) {
    let block_ctx = if push_scope {
        crate::context::Context::new_ref(Some(ctx.clone()))
    } else {
        ctx.clone()
    };
    let mut last = vm.make_value();
    for child in &node.children {
        let (v, flow) = eval(vm, child, &block_ctx, errors, depth);
        if flow != ControlFlow::Normal {
            return (v, flow);
        }
        last = v;
    }
    normal(last)
}

fn eval_if_else(
    vm: &mut Vm,
    node: &ExecNode,
    ctx: &ContextRef,
    errors: &mut ErrorState,
    depth: usize,
) -> (Ref, ControlFlow) {
    let (cond, flow) = eval(vm, &node.children[0], ctx, errors, depth);
    if flow != ControlFlow::Normal {
        return (cond, flow);
    }
    let truthy = match cond.borrow().get_int() {
        Some(i) => i != 0,
        None => {
            return fail(vm, errors, "if condition must be an int");
        }
    };
    if truthy {
        eval(vm, &node.children[1], ctx, errors, depth)
    } else if node.children.len() > 2 {
        eval(vm, &node.children[2], ctx, errors, depth)
    } else {
        normal(vm.make_value())
    }
}

/// Uniform five-slot loop node: `[action, pre_condition, post_condition,
/// init, iterate]`. Any slot may be a `FreeBlock` placeholder, which
/// evaluates to nothing of consequence and is skipped via the
/// `is_placeholder` check instead.
fn eval_loop(vm: &mut Vm, node: &ExecNode, ctx: &ContextRef, errors: &mut ErrorState, depth: usize) -> (Ref, ControlFlow) {
    let loop_ctx = crate::context::Context::new_ref(Some(ctx.clone()));
    let action = &node.children[0];
    let pre = &node.children[1];
    let post = &node.children[2];
    let init = &node.children[3];
    let iterate = &node.children[4];

    if !is_placeholder(init) {
        let (_, flow) = eval(vm, init, &loop_ctx, errors, depth);
        if flow != ControlFlow::Normal {
            return (vm.make_value(), flow);
        }
    }

    let mut last = vm.make_int(0);
    loop {
        if !is_placeholder(pre) {
            let (cond, flow) = eval(vm, pre, &loop_ctx, errors, depth);
            if flow != ControlFlow::Normal {
                return (cond, flow);
            }
            if cond.borrow().get_int() != Some(0) && cond.borrow().kind != ValueKind::Int {
                return fail(vm, errors, "loop condition must be an int");
            }
            if cond.borrow().get_int() == Some(0) {
                return normal(vm.make_int(0));
            }
        }

        let (v, flow) = eval(vm, action, &loop_ctx, errors, depth);
        match flow {
            ControlFlow::Break => return normal(v),
            ControlFlow::Continue => {}
            ControlFlow::Normal => last = v,
            ControlFlow::FunctionReturn | ControlFlow::Error => return (v, flow),
        }

        if !is_placeholder(iterate) {
            let (_, flow) = eval(vm, iterate, &loop_ctx, errors, depth);
            if flow != ControlFlow::Normal {
                return (vm.make_value(), flow);
            }
        }

        if !is_placeholder(post) {
            let (cond, flow) = eval(vm, post, &loop_ctx, errors, depth);
            if flow != ControlFlow::Normal {
                return (cond, flow);
            }
            if cond.borrow().get_int() == Some(0) {
                return normal(vm.make_int(0));
            }
        }
    }
    #[allow(unreachable_code)]
    {
        normal(last)
    }
}

fn is_placeholder(node: &ExecNode) -> bool {
    matches!(node.op, Op::FreeBlock) && node.children.is_empty()
}

fn eval_function_call(
    vm: &mut Vm,
    node: &ExecNode,
    ctx: &ContextRef,
    errors: &mut ErrorState,
    depth: usize,
) -> (Ref, ControlFlow) {
    let (callee, flow) = eval(vm, &node.children[0], ctx, errors, depth);
    if flow != ControlFlow::Normal {
        return (callee, flow);
    }
    if !matches!(callee.borrow().kind, ValueKind::Function | ValueKind::Native) {
        return fail(vm, errors, "call target is not a function");
    }
    let mut params = Vec::with_capacity(node.children.len() - 1);
    for arg in &node.children[1..] {
        let (v, flow) = eval(vm, arg, ctx, errors, depth);
        if flow != ControlFlow::Normal {
            return (v, flow);
        }
        params.push(v);
    }
    vm.eval_function(&callee, None, params, None, errors, false, depth + 1)
}

type IndexParts = (Ref, Ref, Ref);

fn eval_index_parts(
    vm: &mut Vm,
    node: &ExecNode,
    ctx: &ContextRef,
    errors: &mut ErrorState,
    depth: usize,
) -> Result<IndexParts, (Ref, ControlFlow)> {
    let (table, flow) = eval(vm, &node.children[0], ctx, errors, depth);
    if flow != ControlFlow::Normal {
        return Err((table, flow));
    }
    if table.borrow().kind != ValueKind::Table {
        return Err(fail(vm, errors, "indexed value is not a table"));
    }
    let (key, flow) = eval(vm, &node.children[1], ctx, errors, depth);
    if flow != ControlFlow::Normal {
        return Err((key, flow));
    }
    if !Value::is_valid_key_type(key.borrow().kind) {
        return Err(fail(vm, errors, "invalid key type"));
    }
    if !key.borrow().copyable {
        return Err(fail(vm, errors, "key is not copyable"));
    }

    if let Some(existing) = table.borrow().get_in_table(&key) {
        return Ok((table, key, existing));
    }
    if table.borrow().is_const {
        return Err(fail(vm, errors, "key not present in const table"));
    }
    let fresh = vm.make_value();
    let key_copy = Rc::new(std::cell::RefCell::new(key.borrow().copy()));
    table
        .borrow_mut()
        .get_table_mut()
        .expect("kind checked above")
        .insert(TableKey(key_copy.clone()), fresh.clone());
    Ok((table, key_copy, fresh))
}

fn eval_index(
    vm: &mut Vm,
    node: &ExecNode,
    ctx: &ContextRef,
    errors: &mut ErrorState,
    depth: usize,
) -> Result<Ref, (Ref, ControlFlow)> {
    eval_index_parts(vm, node, ctx, errors, depth).map(|(_, _, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_incr(var: &str, key: i64, op: Op, file: crate::pool::PoolRef) -> ExecNode {
        let var_node = ExecNode::new(Op::VarLookup, file.clone(), 1).with_literal(Literal::Ident(var.into()));
        let key_node = ExecNode::new(Op::Literal, file.clone(), 1).with_literal(Literal::Int(key));
        let index_node = ExecNode::new(Op::Index, file.clone(), 1).with_children(vec![var_node, key_node]);
        ExecNode::new(op, file, 1).with_children(vec![index_node])
    }

    #[test]
    fn increment_on_const_table_mutable_entry_succeeds() {
        let mut vm = Vm::new();
        let mut errors = ErrorState::new();
        let ctx = vm.root_context();
        let file = vm.intern("test.derp");

        let table = vm.make_table();
        let key = vm.make_int(0);
        let entry = vm.make_int(5);
        table
            .borrow_mut()
            .get_table_mut()
            .unwrap()
            .insert(TableKey(key), entry.clone());
        table.borrow_mut().is_const = true;
        ctx.borrow_mut().set_variable("t", table);

        let node = index_incr("t", 0, Op::Increment, file);
        let (result, flow) = eval(&mut vm, &node, &ctx, &mut errors, 0);

        assert_eq!(flow, ControlFlow::Normal);
        assert!(!errors.has_errors(), "{}", errors.all_error_text());
        assert_eq!(result.borrow().get_int(), Some(6));
        assert_eq!(entry.borrow().get_int(), Some(6));
    }

    #[test]
    fn decrement_on_const_entry_is_rejected() {
        let mut vm = Vm::new();
        let mut errors = ErrorState::new();
        let ctx = vm.root_context();
        let file = vm.intern("test.derp");

        let table = vm.make_table();
        let key = vm.make_int(0);
        let entry = vm.make_int(5);
        entry.borrow_mut().is_const = true;
        table
            .borrow_mut()
            .get_table_mut()
            .unwrap()
            .insert(TableKey(key), entry.clone());
        ctx.borrow_mut().set_variable("t", table);

        let node = index_incr("t", 0, Op::Decrement, file);
        let (_, flow) = eval(&mut vm, &node, &ctx, &mut errors, 0);

        assert_eq!(flow, ControlFlow::Error);
        assert!(errors.has_errors());
        assert_eq!(entry.borrow().get_int(), Some(5));
    }

    #[test]
    fn execution_node_budget_aborts_eval() {
        let mut options = crate::config::VmOptions::default();
        options.max_execution_nodes = 3;
        let mut vm = Vm::with_options(options);
        let mut errors = ErrorState::new();
        let result = vm.eval_string("1 + 2 + 3 + 4 + 5;", &mut errors, "test.derp");
        assert!(result.is_none());
        assert!(errors.has_errors());
        assert!(errors.all_error_text().contains("execution-node budget"));
    }
}

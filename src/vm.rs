//! The VM: allocation list, root/internal contexts, garbage collector,
//! and the entry points hosts call to compile and run source text.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::ExecNode;
use crate::config::VmOptions;
use crate::context::{Context, ContextRef};
use crate::errors::{ControlFlow, ErrorState};
use crate::eval;
use crate::parser;
use crate::pool::{PoolRef, StringPool};
use crate::value::{NativeCallData, NativeFn, Ref, Value, ValueKind};

pub struct Vm {
    objects: Vec<Ref>,
    /// Holds the built-in natives, each `const` + `protected`.
    internal_context: ContextRef,
    /// The context hosts install globals into. Its parent is
    /// `internal_context`, so scripts see builtins unless they shadow
    /// them, but can never rebind a builtin's own slot.
    root_context: ContextRef,
    pool: StringPool,
    gc_epoch: u64,
    gc_threshold: usize,
    /// Execution-node budget: decremented once per `eval` step, never
    /// replenished. Reaching zero is the soft-cancellation abort.
    node_budget: usize,
    options: VmOptions,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        let internal_context = Context::new_ref(None);
        let root_context = Context::new_ref(Some(internal_context.clone()));
        let gc_threshold = options.gc_min_threshold;
        let node_budget = options.max_execution_nodes;
        let mut vm = Self {
            objects: Vec::new(),
            internal_context,
            root_context,
            pool: StringPool::new(),
            gc_epoch: 0,
            gc_threshold,
            node_budget,
            options,
        };
        crate::builtins::register(&mut vm);
        vm
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    pub fn root_context(&self) -> ContextRef {
        self.root_context.clone()
    }

    pub fn internal_context(&self) -> ContextRef {
        self.internal_context.clone()
    }

    pub fn intern(&self, name: &str) -> PoolRef {
        self.pool.get_or_add(name)
    }

    pub fn get_num_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn get_num_custom_data_refs(&self, handle: &Ref) -> usize {
        handle.borrow().get_custom().map(|c| c.ref_count()).unwrap_or(0)
    }

    pub fn check_object_count(&self) -> bool {
        self.objects.len() <= self.options.max_object_count
    }

    /// Decrements the execution-node budget by one step. Returns `false`
    /// once the budget is exhausted, at which point the caller must
    /// abort evaluation with an error rather than keep stepping.
    pub fn consume_execution_node(&mut self) -> bool {
        if self.node_budget == 0 {
            return false;
        }
        self.node_budget -= 1;
        true
    }

    // -- allocation --

    pub fn make_value(&mut self) -> Ref {
        let v = Rc::new(RefCell::new(Value::new()));
        self.objects.push(v.clone());
        v
    }

    pub fn make_int(&mut self, i: i64) -> Ref {
        let v = self.make_value();
        v.borrow_mut().set_int(i);
        v
    }

    pub fn make_float(&mut self, f: f64) -> Ref {
        let v = self.make_value();
        v.borrow_mut().set_float(f);
        v
    }

    pub fn make_string(&mut self, s: impl Into<String>) -> Ref {
        let v = self.make_value();
        v.borrow_mut().set_string(s);
        v
    }

    pub fn make_table(&mut self) -> Ref {
        let v = self.make_value();
        v.borrow_mut().set_table();
        v
    }

    pub fn make_function(&mut self, body: Rc<ExecNode>, params: Vec<String>) -> Ref {
        let v = self.make_value();
        v.borrow_mut().set_function(body, params);
        v
    }

    /// Registers a native callable as a `const`, `protected` binding in
    /// the internal context, matching how the original registers its
    /// built-ins: host code can never shadow or rebind them away.
    pub fn register_native(&mut self, name: &str, f: NativeFn) {
        let v = self.make_value();
        {
            let mut b = v.borrow_mut();
            b.set_native(f);
            b.is_const = true;
        }
        self.internal_context.borrow_mut().set_variable(name, v);
        self.internal_context.borrow_mut().set_variable_protected(name, true);
    }

    // -- compiling and running --

    pub fn compile_string(&mut self, src: &str, errors: &mut ErrorState, file_name: &str) -> Option<Ref> {
        let root_node = match parser::parse(src, &self.pool, file_name) {
            Ok(n) => n,
            Err(e) => {
                errors.set_location(self.pool.get_or_add(file_name), e.line);
                errors.add_error(e.message);
                return None;
            }
        };
        Some(self.make_function(Rc::new(root_node), Vec::new()))
    }

    /// Compiles and runs `src` as a top-level program: no parameters,
    /// and its body is evaluated directly in the root context (not a
    /// fresh child of it), the same way `include`-like one-shot
    /// evaluation works in the original.
    pub fn eval_string(&mut self, src: &str, errors: &mut ErrorState, file_name: &str) -> Option<Ref> {
        let func = self.compile_string(src, errors, file_name)?;
        let root_ctx = self.root_context.clone();
        let (result, flow) = self.eval_function(&func, Some(&root_ctx), Vec::new(), None, errors, true, 0);
        if flow == ControlFlow::Error {
            None
        } else {
            Some(result)
        }
    }

    /// Calls a `Function` or `Native` value.
    ///
    /// `ctx` only matters when `dont_push_context` is true (top-level
    /// and `include`-style evaluation): the body runs directly in that
    /// context (or the root context, if none given) instead of a fresh
    /// child. Ordinary calls always create a fresh child of the VM's
    /// root context — deliberately not the caller's context, since
    /// script functions do not close over their call site.
    pub fn eval_function(
        &mut self,
        func: &Ref,
        ctx: Option<&ContextRef>,
        params: Vec<Ref>,
        user_data: Option<Rc<dyn Any>>,
        errors: &mut ErrorState,
        dont_push_context: bool,
        depth: usize,
    ) -> (Ref, ControlFlow) {
        if depth > self.options.max_stack_frames {
            errors.add_error("stack depth exceeds configured maximum");
            return (self.make_value(), ControlFlow::Error);
        }

        let kind = func.borrow().kind;
        match kind {
            ValueKind::Native => {
                let native = func.borrow().get_native().cloned();
                let native = match native {
                    Some(f) => f,
                    None => unreachable!("kind checked above"),
                };
                let call_ctx = ctx.cloned().unwrap_or_else(|| self.root_context.clone());
                let mut data = NativeCallData {
                    vm: self,
                    context: call_ctx,
                    params,
                    user_data,
                    errors,
                    stack_depth: depth,
                };
                match native(&mut data) {
                    Some(v) => (v, ControlFlow::Normal),
                    None => (self.make_value(), ControlFlow::Error),
                }
            }
            ValueKind::Function => {
                let (body, param_names, call_counter) = {
                    let b = func.borrow();
                    let f = b.get_function().expect("kind checked above");
                    (f.body.clone(), f.params.clone(), f.call_counter.clone())
                };
                if param_names.len() != params.len() {
                    errors.add_error(format!(
                        "function expects {} parameter(s), got {}",
                        param_names.len(),
                        params.len()
                    ));
                    return (self.make_value(), ControlFlow::Error);
                }

                let call_ctx = if dont_push_context {
                    ctx.cloned().unwrap_or_else(|| self.root_context.clone())
                } else {
                    Context::new_ref(Some(self.root_context.clone()))
                };
                for (name, value) in param_names.iter().zip(params.into_iter()) {
                    call_ctx.borrow_mut().set_variable(name, value);
                }

                call_counter.set(call_counter.get() + 1);
                let (result, flow) = eval::eval(self, &body, &call_ctx, errors, depth);
                call_counter.set(call_counter.get() - 1);

                match flow {
                    ControlFlow::FunctionReturn => (result, ControlFlow::Normal),
                    other => (result, other),
                }
            }
            _ => {
                errors.add_error("value is not callable");
                (self.make_value(), ControlFlow::Error)
            }
        }
    }

    // -- garbage collection --

    /// Runs a mark-sweep collection once the allocation list has grown
    /// past the current threshold, then raises the threshold so the
    /// next collection isn't triggered by the surviving population
    /// alone.
    pub fn maybe_gc(&mut self) {
        if self.objects.len() > self.gc_threshold {
            self.garbage_collect();
            self.gc_threshold = (self.objects.len() * 2).max(self.options.gc_min_threshold);
        }
    }

    /// Mark-sweep collection. A `Value` is a root if it has an
    /// "external" reference beyond the allocation list's own clone and
    /// whatever other tables hold it internally — table-held references
    /// don't themselves count as roots, or every member of a garbage
    /// cycle reachable only through a table would look alive forever,
    /// the same failure mode the original's refcount-neutralization
    /// pass exists to avoid. A currently-executing function is also a
    /// root regardless of its reference count.
    pub fn garbage_collect(&mut self) {
        self.gc_epoch += 1;
        let epoch = self.gc_epoch;

        let mut table_internal: HashMap<usize, usize> = HashMap::new();
        for v in &self.objects {
            if let Some(table) = v.borrow().get_table() {
                for (k, val) in table.iter() {
                    *table_internal.entry(Rc::as_ptr(&k.0) as *const () as usize).or_insert(0) += 1;
                    *table_internal.entry(Rc::as_ptr(val) as *const () as usize).or_insert(0) += 1;
                }
            }
        }

        for v in &self.objects {
            let addr = Rc::as_ptr(v) as *const () as usize;
            let internal = table_internal.get(&addr).copied().unwrap_or(0);
            let external = Rc::strong_count(v).saturating_sub(internal);
            let is_executing = v
                .borrow()
                .get_function()
                .map(|f| f.call_counter.get() > 0)
                .unwrap_or(false);
            if external > 1 || is_executing {
                mark(v, epoch);
            }
        }

        let mut doomed = Vec::new();
        self.objects.retain(|v| {
            if v.borrow().gc_mark() == epoch {
                true
            } else {
                doomed.push(v.clone());
                false
            }
        });
        for v in &doomed {
            v.borrow_mut().clear_data();
        }
    }
}

fn mark(v: &Ref, epoch: u64) {
    {
        let b = v.borrow();
        if b.gc_mark() == epoch {
            return;
        }
        b.set_gc_mark(epoch);
    }
    let entries: Option<Vec<(Ref, Ref)>> = v
        .borrow()
        .get_table()
        .map(|t| t.iter().map(|(k, val)| (k.0.clone(), val.clone())).collect());
    if let Some(entries) = entries {
        for (k, val) in entries {
            mark(&k, epoch);
            mark(&val, epoch);
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_unreachable_cycle() {
        let mut vm = Vm::new();
        let before = vm.get_num_objects();
        {
            let a = vm.make_table();
            let b = vm.make_table();
            let k1 = vm.make_int(1);
            let k2 = vm.make_int(2);
            a.borrow_mut().get_table_mut().unwrap().insert(crate::value::TableKey(k1), b.clone());
            b.borrow_mut().get_table_mut().unwrap().insert(crate::value::TableKey(k2), a.clone());
        }
        vm.garbage_collect();
        assert_eq!(vm.get_num_objects(), before);
    }

    #[test]
    fn keeps_root_reachable_value() {
        let mut vm = Vm::new();
        let v = vm.make_int(7);
        vm.root_context().borrow_mut().set_variable("kept", v.clone());
        vm.garbage_collect();
        assert_eq!(v.borrow().get_int(), Some(7));
    }

    #[test]
    fn evaluates_simple_program() {
        let mut vm = Vm::new();
        let mut errors = ErrorState::new();
        let result = vm.eval_string("1 + 2;", &mut errors, "test.derp");
        assert!(!errors.has_errors(), "{}", errors.all_error_text());
        assert_eq!(result.unwrap().borrow().get_int(), Some(3));
    }
}

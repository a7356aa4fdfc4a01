use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::runtime::host::Class;
use crate::runtime::rt;
use crate::value::Symbol;

use super::objexpr::munge;
use super::path::{common_path, PathNode, PathType};

/// A lexical local. `idx` is its slot in the owning method; `this` is slot 0 and type fields
/// use -1 because they only live in the object.
#[derive(Debug)]
pub struct LocalBinding {
    pub id: u64,
    pub idx: i32,
    pub sym: Symbol,
    pub name: String,
    pub tag: Option<Symbol>,
    pub java_class: Option<Rc<Class>>,
    pub prim: Option<Rc<Class>>,
    pub is_arg: bool,
    pub clear_path_root: Option<Rc<PathNode>>,
    pub can_be_cleared: Cell<bool>,
    pub recur_mismatch: Cell<bool>,
    pub mutable: bool,
}

impl LocalBinding {
    pub fn is_field(&self) -> bool {
        self.idx < 0
    }
}

#[derive(Clone, Default)]
pub struct LocalTypes {
    pub java_class: Option<Rc<Class>>,
    pub prim: Option<Rc<Class>>,
}

pub struct ClearSite {
    pub path: Rc<PathNode>,
    pub should_clear: Rc<Cell<bool>>,
}

pub struct MethodFrame {
    pub obj: usize,
    pub parent: Option<usize>,
    pub locals: im::HashMap<u64, Rc<LocalBinding>>,
    pub max_local: i32,
    pub catch_finally_locals: HashSet<i32>,
    clear_sites: HashMap<u64, Vec<ClearSite>>,
}

pub struct ObjFrame {
    pub name: String,
    pub this_name: Option<Symbol>,
    pub closes: IndexMap<u64, Rc<LocalBinding>>,
    pub once_only: bool,
    pub is_deftype: bool,
}

impl ObjFrame {
    pub fn new(name: String) -> ObjFrame {
        ObjFrame { name, this_name: None, closes: IndexMap::new(), once_only: false, is_deftype: false }
    }
}

#[derive(Clone)]
pub struct ScopeState {
    env: im::HashMap<Symbol, Rc<LocalBinding>>,
    next_local: i32,
    method: Option<usize>,
}

pub struct ScopeManager {
    env: im::HashMap<Symbol, Rc<LocalBinding>>,
    next_local: i32,
    method: Option<usize>,
    methods: Vec<MethodFrame>,
    objs: Vec<ObjFrame>,
}

impl Default for ScopeManager {
    fn default() -> Self {
        ScopeManager::new()
    }
}

impl ScopeManager {
    pub fn new() -> ScopeManager {
        ScopeManager { env: im::HashMap::new(), next_local: 0, method: None, methods: Vec::new(), objs: Vec::new() }
    }

    pub fn save(&self) -> ScopeState {
        ScopeState { env: self.env.clone(), next_local: self.next_local, method: self.method }
    }

    pub fn restore(&mut self, state: ScopeState) {
        self.env = state.env;
        self.next_local = state.next_local;
        self.method = state.method;
    }

    pub fn in_method(&self) -> bool {
        self.method.is_some()
    }

    pub fn current_method(&self) -> Option<usize> {
        self.method
    }

    pub fn method(&self, idx: usize) -> &MethodFrame {
        &self.methods[idx]
    }

    pub fn obj(&self, idx: usize) -> &ObjFrame {
        &self.objs[idx]
    }

    pub fn obj_mut(&mut self, idx: usize) -> &mut ObjFrame {
        &mut self.objs[idx]
    }

    pub fn current_obj(&self) -> Option<&ObjFrame> {
        self.method.map(|m| &self.objs[self.methods[m].obj])
    }

    pub fn push_obj(&mut self, frame: ObjFrame) -> usize {
        self.objs.push(frame);
        self.objs.len() - 1
    }

    pub fn pop_obj(&mut self) -> Option<ObjFrame> {
        self.objs.pop()
    }

    pub fn push_method(&mut self, obj: usize, parent: Option<usize>) -> usize {
        self.methods.push(MethodFrame {
            obj,
            parent,
            locals: im::HashMap::new(),
            max_local: 0,
            catch_finally_locals: HashSet::new(),
            clear_sites: HashMap::new(),
        });
        let idx = self.methods.len() - 1;
        self.method = Some(idx);
        self.next_local = 0;
        idx
    }

    pub fn pop_method(&mut self) -> Option<MethodFrame> {
        self.methods.pop()
    }

    pub fn set_env(&mut self, env: im::HashMap<Symbol, Rc<LocalBinding>>) {
        self.env = env;
    }

    pub fn method_locals(&self) -> Option<im::HashMap<u64, Rc<LocalBinding>>> {
        self.method.map(|m| self.methods[m].locals.clone())
    }

    pub fn set_method_locals(&mut self, locals: Option<im::HashMap<u64, Rc<LocalBinding>>>) {
        if let (Some(m), Some(locals)) = (self.method, locals) {
            self.methods[m].locals = locals;
        }
    }

    pub fn next_local_num(&mut self) -> i32 {
        let num = self.next_local;
        if let Some(m) = self.method {
            let frame = &mut self.methods[m];
            if num > frame.max_local {
                frame.max_local = num;
            }
        }
        self.next_local += 1;
        num
    }

    pub fn register_local(
        &mut self,
        sym: &Symbol,
        tag: Option<Symbol>,
        types: LocalTypes,
        is_arg: bool,
        clear_path_root: Option<Rc<PathNode>>,
    ) -> Rc<LocalBinding> {
        let idx = self.next_local_num();
        let binding = Rc::new(LocalBinding {
            id: rt::next_id(),
            idx,
            sym: sym.with_meta(None),
            name: munge(&sym.name),
            tag,
            java_class: types.java_class,
            prim: types.prim,
            is_arg,
            clear_path_root,
            can_be_cleared: Cell::new(true),
            recur_mismatch: Cell::new(false),
            mutable: false,
        });
        self.bind(binding.clone());
        binding
    }

    pub fn bind(&mut self, binding: Rc<LocalBinding>) {
        self.env.insert(binding.sym.clone(), binding.clone());
        if let Some(m) = self.method {
            self.methods[m].locals.insert(binding.id, binding);
        }
    }

    pub fn local_symbols(&self) -> Vec<Symbol> {
        self.env.keys().cloned().collect()
    }

    pub fn find_local(&self, sym: &Symbol) -> Option<Rc<LocalBinding>> {
        if sym.ns.is_some() {
            return None;
        }
        self.env.get(sym).cloned()
    }

    /// Looks a local up and captures it into every object between its owner and the current
    /// method.
    pub fn reference_local(&mut self, sym: &Symbol, in_catch_finally: bool) -> Option<Rc<LocalBinding>> {
        let binding = self.find_local(sym)?;
        self.close_over(&binding, self.method, in_catch_finally);
        Some(binding)
    }

    fn close_over(&mut self, binding: &Rc<LocalBinding>, method: Option<usize>, in_catch_finally: bool) {
        let mut method = method;
        while let Some(m) = method {
            let frame = &mut self.methods[m];
            if frame.locals.contains_key(&binding.id) {
                if in_catch_finally {
                    frame.catch_finally_locals.insert(binding.idx);
                }
                return;
            }
            let obj = frame.obj;
            method = frame.parent;
            self.objs[obj].closes.entry(binding.id).or_insert_with(|| binding.clone());
        }
    }

    /// Records a reference site of `binding` on `path`. Earlier sites on the same straight-line
    /// path stop being last uses. Only sites under the local's own root may clear it.
    pub fn record_clear_site(
        &mut self,
        binding: &LocalBinding,
        path: Option<&Rc<PathNode>>,
        root: Option<&Rc<PathNode>>,
        should_clear: &Rc<Cell<bool>>,
    ) {
        let (Some(m), Some(path)) = (self.method, path) else { return };
        if binding.idx <= 0 {
            return;
        }
        let sites = self.methods[m].clear_sites.entry(binding.id).or_default();
        for site in sites.iter() {
            if let Some(common) = common_path(path, &site.path) {
                if common.kind == PathType::Path {
                    site.should_clear.set(false);
                }
            }
        }
        let same_root = match (root, &binding.clear_path_root) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        };
        if same_root {
            should_clear.set(true);
            sites.push(ClearSite { path: path.clone(), should_clear: should_clear.clone() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(scopes: &mut ScopeManager, name: &str, root: &Rc<PathNode>) -> Rc<LocalBinding> {
        scopes.register_local(&Symbol::simple(name), None, LocalTypes::default(), false, Some(root.clone()))
    }

    #[test]
    fn slots_are_numbered_per_method() {
        let mut scopes = ScopeManager::new();
        let obj = scopes.push_obj(ObjFrame::new("user$f".into()));
        let root = PathNode::path(None);
        scopes.push_method(obj, None);
        scopes.next_local_num();
        let a = local(&mut scopes, "a", &root);
        let b = local(&mut scopes, "b", &root);
        assert_eq!((a.idx, b.idx), (1, 2));
        let frame = scopes.pop_method().unwrap();
        assert_eq!(frame.max_local, 2);
    }

    #[test]
    fn nested_methods_capture_outer_locals() {
        let mut scopes = ScopeManager::new();
        let root = PathNode::path(None);
        let outer = scopes.push_obj(ObjFrame::new("user$outer".into()));
        let outer_method = scopes.push_method(outer, None);
        scopes.next_local_num();
        let x = local(&mut scopes, "x", &root);
        let saved = scopes.save();

        let inner = scopes.push_obj(ObjFrame::new("user$outer$fn__1".into()));
        scopes.push_method(inner, Some(outer_method));
        let found = scopes.reference_local(&Symbol::simple("x"), false).unwrap();
        assert_eq!(found.id, x.id);
        assert!(scopes.obj(inner).closes.contains_key(&x.id));
        assert!(!scopes.obj(outer).closes.contains_key(&x.id));
        scopes.pop_method();
        scopes.restore(saved);
        assert_eq!(scopes.current_method(), Some(outer_method));
    }

    #[test]
    fn later_use_on_the_same_path_takes_over_clearing() {
        let mut scopes = ScopeManager::new();
        let root = PathNode::path(None);
        let obj = scopes.push_obj(ObjFrame::new("user$f".into()));
        scopes.push_method(obj, None);
        scopes.next_local_num();
        let x = local(&mut scopes, "x", &root);
        let first = Rc::new(Cell::new(false));
        let second = Rc::new(Cell::new(false));
        scopes.record_clear_site(&x, Some(&root), Some(&root), &first);
        assert!(first.get());
        scopes.record_clear_site(&x, Some(&root), Some(&root), &second);
        assert!(!first.get());
        assert!(second.get());
    }

    #[test]
    fn uses_in_sibling_branches_both_clear() {
        let mut scopes = ScopeManager::new();
        let root = PathNode::path(None);
        let obj = scopes.push_obj(ObjFrame::new("user$f".into()));
        scopes.push_method(obj, None);
        scopes.next_local_num();
        let x = local(&mut scopes, "x", &root);
        let branch = PathNode::branch(Some(root.clone()));
        let then = PathNode::path(Some(branch.clone()));
        let otherwise = PathNode::path(Some(branch));
        let a = Rc::new(Cell::new(false));
        let b = Rc::new(Cell::new(false));
        scopes.record_clear_site(&x, Some(&then), Some(&root), &a);
        scopes.record_clear_site(&x, Some(&otherwise), Some(&root), &b);
        assert!(a.get() && b.get());
    }

    #[test]
    fn use_before_a_branch_leaves_clearing_to_the_arm() {
        let mut scopes = ScopeManager::new();
        let root = PathNode::path(None);
        let obj = scopes.push_obj(ObjFrame::new("user$f".into()));
        scopes.push_method(obj, None);
        scopes.next_local_num();
        let x = local(&mut scopes, "x", &root);
        let branch = PathNode::branch(Some(root.clone()));
        let then = PathNode::path(Some(branch));
        let in_test = Rc::new(Cell::new(false));
        let in_arm = Rc::new(Cell::new(false));
        scopes.record_clear_site(&x, Some(&root), Some(&root), &in_test);
        scopes.record_clear_site(&x, Some(&then), Some(&root), &in_arm);
        assert!(!in_test.get());
        assert!(in_arm.get());
    }
}

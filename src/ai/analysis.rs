use std::collections::{BTreeMap, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::cfg::{Func, FuncId, Id, NodeId, SiteId};

use super::domains::{AbsRet, AbsState, AbsValue};

/// Loop-sensitive context token. `loops` records the loop heads currently
/// entered, innermost last, each with a bounded iteration counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct View {
    pub loops: Vec<LoopCtxt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoopCtxt {
    pub branch: NodeId,
    pub iter: usize,
}

impl View {
    /// The view a function activation is keyed on: loop contexts are
    /// intraprocedural and do not survive a return.
    pub fn to_entry(&self) -> Self {
        Self { loops: vec![] }
    }
}

/// Allocation site: syntactic origin plus the allocating view.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Loc {
    pub site: SiteId,
    pub view: View,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodePoint {
    pub func: FuncId,
    pub node: NodeId,
    pub view: View,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReturnPoint {
    pub func: FuncId,
    pub view: View,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlPoint {
    Node(NodePoint),
    Return(ReturnPoint),
}

#[derive(Debug, Default)]
pub struct WorkList(VecDeque<ControlPoint>);

impl WorkList {
    pub fn pop(&mut self) -> Option<ControlPoint> {
        self.0.pop_front()
    }

    pub fn push(&mut self, cp: ControlPoint) {
        self.0.push_back(cp)
    }
}

/// The shared store of the fixed-point iteration: abstract states per node
/// point, abstract returns per return point, and the call/return edges.
/// Every write joins with the previous entry and re-enqueues on change.
#[derive(Debug, Default)]
pub struct AbsSemantics {
    pub np_map: FxHashMap<NodePoint, AbsState>,
    pub rp_map: FxHashMap<ReturnPoint, AbsRet>,
    pub call_info: FxHashMap<NodePoint, AbsState>,
    pub ret_edges: FxHashMap<ReturnPoint, FxHashSet<NodePoint>>,
    pub worklist: WorkList,
    pub loop_iter: usize,
    pub loop_depth: usize,
}

impl AbsSemantics {
    pub fn new() -> Self {
        Self {
            loop_iter: 100,
            loop_depth: 20,
            ..Self::default()
        }
    }

    pub fn state_of(&self, np: &NodePoint) -> AbsState {
        self.np_map.get(np).cloned().unwrap_or_else(AbsState::bot)
    }

    pub fn ret_of(&self, rp: &ReturnPoint) -> AbsRet {
        self.rp_map.get(rp).cloned().unwrap_or_else(AbsRet::bot)
    }

    pub fn add_np(&mut self, np: NodePoint, st: AbsState) {
        if st.is_bottom() {
            return;
        }
        let old = self.np_map.get(&np);
        let joined = match old {
            Some(old) => st.join(old),
            None => st,
        };
        if old.is_none_or(|old| !joined.ord(old)) {
            trace!(?np, "state updated");
            self.np_map.insert(np.clone(), joined);
            self.worklist.push(ControlPoint::Node(np));
        }
    }

    pub fn do_return(&mut self, rp: ReturnPoint, ret: AbsRet) {
        if ret.is_bottom() {
            return;
        }
        let old = self.rp_map.get(&rp);
        let joined = match old {
            Some(old) => ret.join(old),
            None => ret,
        };
        if old.is_none_or(|old| !joined.ord(old)) {
            trace!(?rp, "return updated");
            self.rp_map.insert(rp.clone(), joined);
            self.worklist.push(ControlPoint::Return(rp));
        }
    }

    /// Registers a call edge and seeds the callee's entry state. Loop
    /// sensitivity is intraprocedural, so the callee starts under a fresh
    /// view.
    pub fn do_call(
        &mut self,
        caller_np: &NodePoint,
        caller_st: &AbsState,
        callee: FuncId,
        callee_func: &Func,
        args: Vec<AbsValue>,
        captured: BTreeMap<Id, AbsValue>,
    ) {
        trace!(caller = ?caller_np, callee = %callee_func.name, "call edge");
        self.call_info
            .entry(caller_np.clone())
            .and_modify(|st| *st = st.join(caller_st))
            .or_insert_with(|| caller_st.clone());
        let mut locals = get_locals(callee_func, args, false);
        locals.extend(captured);
        let view = View::default();
        let rp = ReturnPoint {
            func: callee,
            view: view.clone(),
        };
        self.ret_edges
            .entry(rp)
            .or_default()
            .insert(caller_np.clone());
        let entry_np = NodePoint {
            func: callee,
            node: callee_func.entry,
            view,
        };
        self.add_np(entry_np, caller_st.copied(locals));
    }

    pub fn add_ret_edge(&mut self, rp: ReturnPoint, np: NodePoint) {
        self.ret_edges.entry(rp).or_default().insert(np);
    }

    // View algebra.

    pub fn loop_enter(&self, view: &View, branch: NodeId) -> View {
        let mut loops = view.loops.clone();
        loops.push(LoopCtxt { branch, iter: 0 });
        if loops.len() > self.loop_depth {
            loops.remove(0);
        }
        View { loops }
    }

    pub fn loop_next(&self, view: &View) -> View {
        let mut loops = view.loops.clone();
        if let Some(ctxt) = loops.last_mut() {
            ctxt.iter = (ctxt.iter + 1).min(self.loop_iter);
        }
        View { loops }
    }

    pub fn loop_exit(&self, view: &View) -> View {
        let mut loops = view.loops.clone();
        loops.pop();
        View { loops }
    }
}

/// Builds a callee's initial local environment. Parameters are bound in
/// order; a missing optional parameter reads as absent, a missing required
/// one is infeasible; surplus arguments are dropped.
pub fn get_locals(func: &Func, args: Vec<AbsValue>, is_cont: bool) -> BTreeMap<Id, AbsValue> {
    let mut locals = BTreeMap::new();
    let mut args = args.into_iter();
    for param in &func.params {
        let v = match args.next() {
            Some(v) => v,
            // a resumption may supply fewer values than the target declares
            None if is_cont || param.optional => AbsValue::absent(),
            None => AbsValue::bot(),
        };
        locals.insert(Id::Name(param.name.clone()), v);
    }
    locals
}

use std::{cell::RefCell, collections::BTreeMap};

use etrace::some_or;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::{
    cfg::{
        Ast, AstId, BOp, BranchKind, COp, CallInst, Cfg, Expr, FuncId, Id, Inst, NodeId, NodeKind,
        Ref, SiteId, UOp, VOp,
    },
    interp,
};

use super::{
    analysis::{get_locals, AbsSemantics, ControlPoint, Loc, NodePoint, ReturnPoint, View},
    domains::*,
    AResult, AnalysisError,
};

/// Operations that fall back to a grammar-wide default implementation when
/// no production-specific one exists.
const DEFAULT_CASES: [&str; 3] = ["Contains", "AllPrivateIdentifiersValid", "ContainsArguments"];

/// The abstract transfer function. Driven by the worklist in `sem`; each
/// `apply` reads the state at one control point and pushes successor states
/// back into the store.
pub struct AbsTransfer<'a> {
    pub cfg: &'a Cfg,
    pub sem: AbsSemantics,
    sdo_cache: RefCell<FxHashMap<(AstId, String), Option<(AstId, FuncId)>>>,
    sub_idx_cache: RefCell<FxHashMap<AstId, usize>>,
}

impl<'a> AbsTransfer<'a> {
    pub fn new(cfg: &'a Cfg) -> Self {
        Self {
            cfg,
            sem: AbsSemantics::new(),
            sdo_cache: RefCell::new(FxHashMap::default()),
            sub_idx_cache: RefCell::new(FxHashMap::default()),
        }
    }

    /// Seeds the analysis with a call to `fname` and returns its return
    /// point.
    pub fn init(&mut self, fname: &str, args: Vec<AbsValue>) -> AResult<ReturnPoint> {
        let fid = *self
            .cfg
            .fname_map
            .get(fname)
            .ok_or_else(|| AnalysisError::InvalidIr(format!("unknown function {fname}")))?;
        let func = self.cfg.func(fid);
        let locals = get_locals(func, args, false);
        let np = NodePoint {
            func: fid,
            node: func.entry,
            view: View::default(),
        };
        self.sem.add_np(np, AbsState::empty().copied(locals));
        Ok(ReturnPoint {
            func: fid,
            view: View::default(),
        })
    }

    /// Runs the worklist to a fixed point.
    pub fn analyze(&mut self) -> AResult<()> {
        let mut iters = 0usize;
        while let Some(cp) = self.sem.worklist.pop() {
            iters += 1;
            if let Err(e) = self.apply(&cp) {
                warn!(error = %e, "analysis aborted");
                return Err(e);
            }
        }
        debug!(iters, "fixpoint reached");
        Ok(())
    }

    pub fn apply(&mut self, cp: &ControlPoint) -> AResult<()> {
        match cp {
            ControlPoint::Node(np) => self.transfer_node_point(np),
            ControlPoint::Return(rp) => self.transfer_return_point(rp),
        }
    }

    fn transfer_node_point(&mut self, np: &NodePoint) -> AResult<()> {
        let cfg = self.cfg;
        let st = self.sem.state_of(np);
        if st.is_bottom() {
            return Ok(());
        }
        let node = cfg.func(np.func).node(np.node);
        match &node.kind {
            NodeKind::Block { insts, next } => {
                let mut st = st;
                for inst in insts {
                    if st.is_bottom() {
                        break;
                    }
                    self.transfer_inst(&mut st, np, inst)?;
                }
                if let Some(next) = next {
                    let next_np = self.get_next_np(np, *next, false);
                    self.sem.add_np(next_np, st);
                }
            }
            NodeKind::Call { inst, next } => {
                let mut st = st;
                let v = self.transfer_call_inst(&mut st, np, inst)?;
                if v.is_bottom() {
                    // no feasible return yet; return edges will revisit
                    st = AbsState::bot();
                } else {
                    st.define_local(inst.lhs().clone(), v);
                }
                if let Some(next) = next {
                    let next_np = self.get_next_np(np, *next, false);
                    self.sem.add_np(next_np, st);
                }
            }
            NodeKind::Branch {
                kind,
                cond,
                then_,
                else_,
            } => {
                let mut st = st;
                let v = self.transfer_expr(&mut st, np, cond)?;
                let b = v.pure.boolv;
                if b.may_true() {
                    if let Some(to) = then_ {
                        let pruned = self.prune(&st, np, cond, true)?;
                        let next_np = self.get_next_np(np, *to, false);
                        self.sem.add_np(next_np, pruned);
                    }
                }
                if b.may_false() {
                    if let Some(to) = else_ {
                        let pruned = self.prune(&st, np, cond, false)?;
                        let loop_out = *kind == BranchKind::Loop;
                        let next_np = self.get_next_np(np, *to, loop_out);
                        self.sem.add_np(next_np, pruned);
                    }
                }
            }
        }
        Ok(())
    }

    /// Successor view policy: entering a loop head transforms the view by
    /// `loop_enter` (forward edge) or `loop_next` (back edge); leaving a
    /// loop through its exit edge applies `loop_exit`.
    fn get_next_np(&self, np: &NodePoint, to: NodeId, loop_out: bool) -> NodePoint {
        let func = self.cfg.func(np.func);
        let view = if func.node(to).is_loop() {
            if func.node(np.node).loop_pred {
                self.sem.loop_enter(&np.view, to)
            } else {
                self.sem.loop_next(&np.view)
            }
        } else if loop_out {
            self.sem.loop_exit(&np.view)
        } else {
            np.view.clone()
        };
        NodePoint {
            func: np.func,
            node: to,
            view,
        }
    }

    fn transfer_return_point(&mut self, rp: &ReturnPoint) -> AResult<()> {
        let cfg = self.cfg;
        let mut ret = self.sem.ret_of(rp);
        if ret.value.is_bottom() {
            return Ok(());
        }
        let callee = cfg.func(rp.func);
        if let Some(ty) = interp::set_type(&callee.name) {
            let locv = ret.value.pure.locv.clone();
            if !locv.is_bot() {
                ret.state.set_type(&locv, ty);
            }
        }
        let final_value = if callee.ret_comp {
            ret.value.wrap_completion()
        } else {
            ret.value.clone()
        };
        let edges: Vec<NodePoint> = self
            .sem
            .ret_edges
            .get(rp)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        for caller_np in edges {
            let caller_func = cfg.func(caller_np.func);
            let call_node = caller_func.node(caller_np.node);
            let NodeKind::Call { inst, next } = &call_node.kind else {
                continue;
            };
            let next_node = some_or!(*next, continue);
            let next_view = if caller_func.node(next_node).is_loop() {
                self.sem.loop_enter(&caller_np.view, next_node)
            } else {
                caller_np.view.clone()
            };
            let caller_st = some_or!(self.sem.call_info.get(&caller_np), continue).clone();
            let new_st = ret.state.do_return(&caller_st, inst.lhs(), final_value.clone());
            self.sem.add_np(
                NodePoint {
                    func: caller_np.func,
                    node: next_node,
                    view: next_view,
                },
                new_st,
            );
        }
        Ok(())
    }

    fn transfer_inst(&mut self, st: &mut AbsState, np: &NodePoint, inst: &Inst) -> AResult<()> {
        match inst {
            Inst::IExpr(e) | Inst::IAssert(e) => {
                self.transfer_expr(st, np, e)?;
            }
            Inst::ILet(x, e) => {
                let v = self.transfer_expr(st, np, e)?;
                st.define_local(x.clone(), v);
            }
            Inst::IAssign(r, e) => {
                let rv = self.transfer_ref(st, np, r)?;
                let v = self.transfer_expr(st, np, e)?;
                st.update(&rv, v);
            }
            Inst::IDelete(r) => {
                let rv = self.transfer_ref(st, np, r)?;
                st.delete(&rv);
            }
            Inst::IPush { from, to, front } => {
                let v = self.transfer_expr(st, np, from)?;
                let l = self.transfer_expr(st, np, to)?;
                if *front {
                    st.prepend(&l.pure.locv, &v);
                } else {
                    st.append(&l.pure.locv, &v);
                }
            }
            Inst::IRemoveElem { list, elem } => {
                let l = self.transfer_expr(st, np, list)?;
                let e = self.transfer_expr(st, np, elem)?;
                st.remove_elem(&l, &e);
            }
            Inst::IReturn(e) => {
                let v = self.transfer_expr(st, np, e)?;
                self.do_return_value(np, st, v);
                *st = AbsState::bot();
            }
            Inst::IPrint(_) | Inst::INop => {}
        }
        Ok(())
    }

    /// Submits a return value at the enclosing return point; locals are
    /// gone after a return, the heap survives.
    fn do_return_value(&mut self, np: &NodePoint, st: &AbsState, v: AbsValue) {
        let rp = ReturnPoint {
            func: np.func,
            view: np.view.to_entry(),
        };
        let ret = AbsRet {
            value: v,
            state: st.copied(BTreeMap::new()),
        };
        self.sem.do_return(rp, ret);
    }

    fn transfer_ref(&mut self, st: &mut AbsState, np: &NodePoint, r: &Ref) -> AResult<AbsRefValue> {
        match r {
            Ref::Id(x) => Ok(AbsRefValue::Id(x.clone())),
            Ref::Prop(base, key) => {
                let base_rv = self.transfer_ref(st, np, base)?;
                let base_v = st.get(self.cfg, &base_rv);
                let key_v = self.transfer_expr(st, np, key)?;
                Ok(AbsRefValue::Prop(base_v, key_v))
            }
        }
    }

    fn transfer_exprs(
        &mut self,
        st: &mut AbsState,
        np: &NodePoint,
        es: &[Expr],
    ) -> AResult<Vec<AbsValue>> {
        let mut vs = Vec::with_capacity(es.len());
        for e in es {
            vs.push(self.transfer_expr(st, np, e)?);
        }
        Ok(vs)
    }

    fn transfer_expr(&mut self, st: &mut AbsState, np: &NodePoint, expr: &Expr) -> AResult<AbsValue> {
        let cfg = self.cfg;
        match expr {
            Expr::EComp(ty, val, tgt) => {
                let tyv = self.transfer_expr(st, np, ty)?;
                let valv = self.transfer_expr(st, np, val)?;
                let tgtv = self.transfer_expr(st, np, tgt)?;
                let comp = match tyv.pure.constv.gamma() {
                    None => AbsComp::Top,
                    Some(kinds) => {
                        let mut comp = AbsComp::bot();
                        for kind in kinds {
                            comp = comp.join(&AbsComp::of(
                                kind,
                                CompElem {
                                    value: valv.pure.clone(),
                                    target: tgtv.pure.clone(),
                                },
                            ));
                        }
                        comp
                    }
                };
                Ok(AbsValue {
                    comp,
                    pure: AbsPure::bot(),
                })
            }
            Expr::EIsCompletion(e) => {
                let v = self.transfer_expr(st, np, e)?;
                Ok(AbsValue::boolv(v.is_completion()))
            }
            Expr::EReturnIfAbrupt(e, check) => match &**e {
                // `[? ref]`: the unwrapped value is written back
                Expr::ERef(r) => {
                    let rv = self.transfer_ref(st, np, r)?;
                    let v = st.get(cfg, &rv);
                    let newv = self.return_if_abrupt(st, np, &v, *check);
                    st.update(&rv, newv.clone());
                    Ok(newv)
                }
                _ => {
                    let v = self.transfer_expr(st, np, e)?;
                    Ok(self.return_if_abrupt(st, np, &v, *check))
                }
            },
            Expr::EPop(list, front) => {
                let lv = self.transfer_expr(st, np, list)?;
                Ok(st.pop(&lv.pure.locv, *front))
            }
            Expr::EParse(code, rule) => {
                let cv = self.transfer_expr(st, np, code)?;
                let rv = self.transfer_expr(st, np, rule)?;
                if cv.is_bottom() || rv.is_bottom() {
                    *st = AbsState::bot();
                    return Ok(AbsValue::bot());
                }
                match (cv.get_single(), rv.get_single()) {
                    (Flat::One(AValue::Str(s)), Flat::One(AValue::Grammar(g))) => {
                        Ok(match cfg.parse(&s, &g.name) {
                            Some(ast) => AbsValue::ast(ast),
                            None => AbsValue::ast_top(),
                        })
                    }
                    _ => Ok(AbsValue::ast_top()),
                }
            }
            Expr::EGrammar(name, params) => Ok(AbsValue::grammar(name, params.clone())),
            Expr::ESourceText(e) => {
                let v = self.transfer_expr(st, np, e)?;
                match v.pure.astv.gamma() {
                    None => Ok(AbsValue::of_pure(AbsPure {
                        strv: AbsSet::top(),
                        ..AbsPure::bot()
                    })),
                    Some(asts) => Ok(asts.iter().fold(AbsValue::bot(), |acc, ast| {
                        acc.join(&AbsValue::str(&cfg.source_text(*ast)))
                    })),
                }
            }
            Expr::EGetChildren(kind_opt, ast_e, site) => {
                let kv = match kind_opt {
                    Some(k) => Some(self.transfer_expr(st, np, k)?),
                    None => None,
                };
                let av = self.transfer_expr(st, np, ast_e)?;
                if av.is_bottom() || kv.as_ref().is_some_and(AbsValue::is_bottom) {
                    *st = AbsState::bot();
                    return Ok(AbsValue::bot());
                }
                let loc = self.site_loc(np, *site);
                match (&kv, av.get_single()) {
                    (Some(k), Flat::One(AValue::Ast(ast))) => match k.get_single() {
                        Flat::One(AValue::Grammar(g)) => {
                            let elems = cfg
                                .children_named(ast, &g.name)
                                .into_iter()
                                .map(|child| match child {
                                    Some(c) => AbsValue::ast(c),
                                    None => AbsValue::absent(),
                                })
                                .collect();
                            Ok(st.alloc_list(loc, elems))
                        }
                        _ => Err(AnalysisError::Exploded("EGetChildren")),
                    },
                    (None, Flat::One(AValue::Ast(ast))) if cfg.ast(ast).is_syntactic() => {
                        let elems = cfg
                            .flattened_children(ast)
                            .into_iter()
                            .map(AbsValue::ast)
                            .collect();
                        Ok(st.alloc_list(loc, elems))
                    }
                    _ => Err(AnalysisError::Exploded("EGetChildren")),
                }
            }
            Expr::EContains(list, elem, field) => {
                let lv = self.transfer_expr(st, np, list)?;
                let ev = self.transfer_expr(st, np, elem)?;
                Ok(st.contains(cfg, &lv, &ev, field.as_deref()))
            }
            Expr::EDuplicated(list) => {
                let lv = self.transfer_expr(st, np, list)?;
                Ok(st.duplicated(&lv))
            }
            Expr::ESubstring(e, from, to) => {
                let v = self.transfer_expr(st, np, e)?;
                let f = self.transfer_expr(st, np, from)?;
                let t = self.transfer_expr(st, np, to)?;
                if v.is_bottom() || f.is_bottom() || t.is_bottom() {
                    *st = AbsState::bot();
                    return Ok(AbsValue::bot());
                }
                match (v.get_single(), f.get_single(), t.get_single()) {
                    (
                        Flat::One(AValue::Str(s)),
                        Flat::One(AValue::Math(a)),
                        Flat::One(AValue::Math(b)),
                    ) => {
                        let units: Vec<u16> = s.encode_utf16().collect();
                        let a = usize::try_from(a.max(0)).unwrap_or(0).min(units.len());
                        let b = usize::try_from(b.max(0)).unwrap_or(0).min(units.len());
                        let sub = String::from_utf16_lossy(&units[a.min(b)..b]);
                        Ok(AbsValue::str(&sub))
                    }
                    _ => Err(AnalysisError::Exploded("ESubstring")),
                }
            }
            Expr::EIsArrayIndex(e) => {
                let v = self.transfer_expr(st, np, e)?;
                match v.get_single() {
                    Flat::Bot => Ok(AbsValue::bot()),
                    Flat::One(AValue::Str(s)) => Ok(AbsValue::bool(interp::is_array_index(&s))),
                    Flat::One(_) => Ok(AbsValue::bool(false)),
                    Flat::Many => Ok(AbsValue::boolv(AbsBool::Top)),
                }
            }
            Expr::ERef(r) => {
                let rv = self.transfer_ref(st, np, r)?;
                Ok(st.get(cfg, &rv))
            }
            Expr::EUnary(op, e) => {
                let v = self.transfer_expr(st, np, e)?;
                Ok(self.transfer_uop(*op, &v))
            }
            Expr::EBinary(BOp::And, l, r) => {
                let lv = self.transfer_expr(st, np, l)?;
                match lv.get_single() {
                    // left decides: the right side is not evaluated
                    Flat::One(AValue::Bool(false)) => Ok(AbsValue::bool(false)),
                    _ => {
                        let rv = self.transfer_expr(st, np, r)?;
                        self.transfer_bop(st, BOp::And, &lv, &rv)
                    }
                }
            }
            Expr::EBinary(BOp::Or, l, r) => {
                let lv = self.transfer_expr(st, np, l)?;
                match lv.get_single() {
                    Flat::One(AValue::Bool(true)) => Ok(AbsValue::bool(true)),
                    _ => {
                        let rv = self.transfer_expr(st, np, r)?;
                        self.transfer_bop(st, BOp::Or, &lv, &rv)
                    }
                }
            }
            Expr::EBinary(BOp::Eq, l, r)
                if matches!(&**r, Expr::EAbsent) && matches!(&**l, Expr::ERef(_)) =>
            {
                // a field equals absent iff the reference does not exist
                let Expr::ERef(rf) = &**l else { unreachable!() };
                let rv = self.transfer_ref(st, np, rf)?;
                Ok(AbsValue::boolv(st.exists(cfg, &rv).not()))
            }
            Expr::EBinary(op, l, r) => {
                let lv = self.transfer_expr(st, np, l)?;
                let rv = self.transfer_expr(st, np, r)?;
                self.transfer_bop(st, *op, &lv, &rv)
            }
            Expr::EVariadic(op, es) => {
                let vs = self.transfer_exprs(st, np, es)?;
                self.transfer_vop(*op, &vs)
            }
            Expr::EConvert(cop, e, radix) => {
                let v = self.transfer_expr(st, np, e)?;
                let radixv = match radix {
                    Some(r) => Some(self.transfer_expr(st, np, r)?),
                    None => None,
                };
                match v.get_single() {
                    Flat::Bot => Ok(AbsValue::bot()),
                    Flat::One(cv) => {
                        let rx = radixv.and_then(|rv| match rv.get_single() {
                            Flat::One(AValue::Math(n)) => Some(n),
                            _ => None,
                        });
                        match interp::convert(*cop, &cv, rx) {
                            Some(r) => Ok(AbsValue::single(r)),
                            None => Ok(convert_lattice(*cop)),
                        }
                    }
                    Flat::Many => Ok(convert_lattice(*cop)),
                }
            }
            Expr::ETypeOf(e) => {
                let v = self.transfer_expr(st, np, e)?;
                Ok(v.type_of(st))
            }
            Expr::ETypeCheck(e, ty) => {
                let v = self.transfer_expr(st, np, e)?;
                let tv = self.transfer_expr(st, np, ty)?;
                let name = match tv.get_single() {
                    Flat::One(AValue::Str(s)) => s,
                    Flat::One(AValue::Grammar(g)) => g.name,
                    Flat::Bot => return Ok(AbsValue::bot()),
                    _ => return Err(AnalysisError::Exploded("ETypeCheck")),
                };
                Ok(AbsValue::boolv(self.type_check(st, &v, &name)))
            }
            Expr::EClo(fname, caps) => {
                let func = *cfg
                    .fname_map
                    .get(fname)
                    .ok_or_else(|| AnalysisError::InvalidIr(format!("unknown function {fname}")))?;
                let captured = caps
                    .iter()
                    .map(|x| (Id::name(x), st.lookup(&Id::name(x))))
                    .collect();
                Ok(AbsValue::clo(AClo { func, captured }))
            }
            Expr::ECont(fname) => {
                let func = *cfg
                    .fname_map
                    .get(fname)
                    .ok_or_else(|| AnalysisError::InvalidIr(format!("unknown function {fname}")))?;
                let target = NodePoint {
                    func,
                    node: cfg.func(func).entry,
                    view: np.view.clone(),
                };
                let captured: BTreeMap<Id, AbsValue> = st
                    .locals
                    .iter()
                    .filter(|(x, _)| matches!(x, Id::Name(_)))
                    .map(|(x, v)| (x.clone(), v.clone()))
                    .collect();
                // a resumed return must fan out to this function's callers
                let cur_rp = ReturnPoint {
                    func: np.func,
                    view: np.view.to_entry(),
                };
                let cont_rp = ReturnPoint {
                    func,
                    view: np.view.to_entry(),
                };
                if let Some(edges) = self.sem.ret_edges.get(&cur_rp).cloned() {
                    for e in edges {
                        self.sem.add_ret_edge(cont_rp.clone(), e);
                    }
                }
                Ok(AbsValue::cont(ACont { target, captured }))
            }
            Expr::EMap { ty, props, site } => {
                let mut concrete = vec![];
                let mut weak = vec![];
                for (k, v) in props {
                    let kv = self.transfer_expr(st, np, k)?;
                    let vv = self.transfer_expr(st, np, v)?;
                    match kv.get_single() {
                        Flat::One(key) => concrete.push((key, vv)),
                        Flat::Bot => {
                            *st = AbsState::bot();
                            return Ok(AbsValue::bot());
                        }
                        Flat::Many => weak.push((kv, vv)),
                    }
                }
                let loc = self.site_loc(np, *site);
                let lv = st.alloc_map(loc, ty, concrete);
                for (kv, vv) in weak {
                    st.update(&AbsRefValue::Prop(lv.clone(), kv), vv);
                }
                Ok(lv)
            }
            Expr::EList(es, site) => {
                let vs = self.transfer_exprs(st, np, es)?;
                let loc = self.site_loc(np, *site);
                Ok(st.alloc_list(loc, vs))
            }
            Expr::EListConcat(es, site) => {
                let vs = self.transfer_exprs(st, np, es)?;
                let loc = self.site_loc(np, *site);
                let mut elems: Vec<AbsValue> = vec![];
                let mut precise = true;
                let mut merged = AbsValue::bot();
                for v in &vs {
                    let mut fixed: Option<Vec<AbsValue>> = None;
                    if let Some(locs) = v.pure.locv.gamma() {
                        if locs.len() == 1 {
                            if let Some(AbsObj::List(AbsListObj::Fixed(es))) =
                                st.heap.get(locs.iter().next().unwrap())
                            {
                                fixed = Some(es.clone());
                            }
                        }
                    }
                    match fixed {
                        Some(es) => elems.extend(es),
                        None => {
                            precise = false;
                            merged = merged.join(&list_elems_value(st, v));
                        }
                    }
                }
                if precise {
                    Ok(st.alloc_list(loc, elems))
                } else {
                    let all = elems.iter().fold(merged, |acc, v| acc.join(v));
                    Ok(st.alloc_merged_list(loc, all))
                }
            }
            Expr::ESymbol(desc, site) => {
                let dv = self.transfer_expr(st, np, desc)?;
                let loc = self.site_loc(np, *site);
                Ok(st.alloc_symbol(loc, dv))
            }
            Expr::ECopy(obj, site) => {
                let v = self.transfer_expr(st, np, obj)?;
                let loc = self.site_loc(np, *site);
                Ok(st.copy_obj(loc, &v))
            }
            Expr::EKeys {
                map,
                int_sorted,
                site,
            } => {
                let v = self.transfer_expr(st, np, map)?;
                let loc = self.site_loc(np, *site);
                Ok(st.keys(loc, &v, *int_sorted))
            }
            Expr::EMath(n) => Ok(AbsValue::math(*n)),
            Expr::ENumber(n) => Ok(AbsValue::number(*n)),
            Expr::EBigInt(n) => Ok(AbsValue::bigint(*n)),
            Expr::EStr(s) => Ok(AbsValue::str(s)),
            Expr::EBool(b) => Ok(AbsValue::bool(*b)),
            Expr::ECodeUnit(c) => Ok(AbsValue::code_unit(*c)),
            Expr::EConst(c) => Ok(AbsValue::cons(c)),
            Expr::EUndef => Ok(AbsValue::undef()),
            Expr::ENull => Ok(AbsValue::null()),
            Expr::EAbsent => Ok(AbsValue::absent()),
        }
    }

    /// `[? v]` / `[! v]`: the abrupt part short-circuits the function, the
    /// normal part flows on.
    fn return_if_abrupt(
        &mut self,
        st: &mut AbsState,
        np: &NodePoint,
        v: &AbsValue,
        check: bool,
    ) -> AbsValue {
        if check {
            let abrupt = v.abrupt_completion();
            if !abrupt.is_bottom() {
                self.do_return_value(np, st, abrupt);
            }
        }
        let pure = v.unwrap_completion();
        if pure.is_bottom() {
            *st = AbsState::bot();
        }
        pure
    }

    fn transfer_uop(&self, op: UOp, v: &AbsValue) -> AbsValue {
        match v.get_single() {
            Flat::Bot => AbsValue::bot(),
            Flat::One(cv) => match interp::interp_uop(op, &cv) {
                Some(r) => AbsValue::single(r),
                None => uop_lattice(op, v),
            },
            Flat::Many => uop_lattice(op, v),
        }
    }

    fn transfer_bop(&self, st: &AbsState, op: BOp, l: &AbsValue, r: &AbsValue) -> AResult<AbsValue> {
        if l.is_bottom() || r.is_bottom() {
            return Ok(AbsValue::bot());
        }
        if op == BOp::Eq {
            return Ok(st.abs_eq(l, r));
        }
        match (l.get_single(), r.get_single()) {
            (Flat::One(a), Flat::One(b)) => match interp::interp_bop(op, &a, &b) {
                Some(v) => Ok(AbsValue::single(v)),
                None => Ok(bop_lattice(op, l, r)),
            },
            _ => Ok(bop_lattice(op, l, r)),
        }
    }

    fn transfer_vop(&self, op: VOp, vs: &[AbsValue]) -> AResult<AbsValue> {
        if vs.iter().any(AbsValue::is_bottom) {
            return Ok(AbsValue::bot());
        }
        match op {
            VOp::Concat => {
                let mut singles = Vec::with_capacity(vs.len());
                for v in vs {
                    match v.get_single() {
                        Flat::One(cv) => singles.push(cv),
                        _ => {
                            return Ok(AbsValue::of_pure(AbsPure {
                                strv: AbsSet::top(),
                                ..AbsPure::bot()
                            }))
                        }
                    }
                }
                match interp::interp_vop(op, &singles) {
                    Some(r) => Ok(AbsValue::single(r)),
                    None => Ok(AbsValue::of_pure(AbsPure {
                        strv: AbsSet::top(),
                        ..AbsPure::bot()
                    })),
                }
            }
            VOp::Min | VOp::Max => {
                let mut singles = Vec::with_capacity(vs.len());
                for v in vs {
                    match v.get_single() {
                        Flat::One(cv) => singles.push(cv),
                        Flat::Bot => return Ok(AbsValue::bot()),
                        Flat::Many => return Err(AnalysisError::Exploded("vop transfer")),
                    }
                }
                let inf = if op == VOp::Min {
                    f64::NEG_INFINITY
                } else {
                    f64::INFINITY
                };
                let (infs, finite): (Vec<AValue>, Vec<AValue>) = singles
                    .into_iter()
                    .partition(|v| matches!(v, AValue::Num(n) if n.0 == inf));
                let mut r = AbsValue::bot();
                if !infs.is_empty() {
                    r = r.join(&AbsValue::number(inf));
                }
                if !finite.is_empty() {
                    let folded = interp::interp_vop(op, &finite)
                        .ok_or(AnalysisError::Exploded("vop transfer"))?;
                    r = r.join(&AbsValue::single(folded));
                }
                Ok(r)
            }
        }
    }

    fn type_check(&self, st: &AbsState, v: &AbsValue, name: &str) -> AbsBool {
        let cfg = self.cfg;
        if cfg.grammar.name_map.contains_key(name) {
            // an AST nonterminal name: check against the chain
            let mut b = match v.pure.astv.gamma() {
                None => AbsBool::Top,
                Some(asts) => asts.iter().fold(AbsBool::Bot, |acc, ast| {
                    let hit = cfg
                        .chains(*ast)
                        .into_iter()
                        .any(|anc| cfg.ast(anc).name() == name);
                    acc.join(&AbsBool::alpha(hit))
                }),
            };
            let mut non_ast = v.pure.clone();
            non_ast.astv = AbsSet::bot();
            if !non_ast.is_bot() || !v.comp.is_bot() {
                b = b.join(&AbsBool::False);
            }
            return b;
        }
        let tys = v.type_of(st);
        match tys.pure.strv.gamma() {
            None => AbsBool::Top,
            Some(names) => {
                let may = names.contains(name);
                let must = may && names.iter().all(|n| n == name);
                if must {
                    AbsBool::True
                } else if may {
                    AbsBool::Top
                } else {
                    AbsBool::False
                }
            }
        }
    }

    /// Refines the state along one side of a branch.
    fn prune(
        &mut self,
        st: &AbsState,
        np: &NodePoint,
        cond: &Expr,
        positive: bool,
    ) -> AResult<AbsState> {
        match cond {
            Expr::EUnary(UOp::Not, e) => self.prune(st, np, e, !positive),
            Expr::EBinary(BOp::Eq, l, r) => {
                if let Expr::ETypeOf(inner) = &**l {
                    if let Expr::ERef(rf) = &**inner {
                        let mut tmp = st.clone();
                        let rv = self.transfer_ref(&mut tmp, np, rf)?;
                        let tv = self.transfer_expr(&mut tmp, np, r)?;
                        let old = tmp.get(self.cfg, &rv);
                        let mut pruned = st.clone();
                        pruned.update(&rv, old.prune_type(&tv, positive));
                        return Ok(pruned);
                    }
                }
                Ok(st.clone())
            }
            Expr::EBinary(BOp::Or, l, r) => {
                let ls = self.prune(st, np, l, positive)?;
                let rs = self.prune(st, np, r, positive)?;
                Ok(if positive { ls.join(&rs) } else { ls.meet(&rs) })
            }
            Expr::EBinary(BOp::And, l, r) => {
                let ls = self.prune(st, np, l, positive)?;
                let rs = self.prune(st, np, r, positive)?;
                Ok(if positive { ls.meet(&rs) } else { ls.join(&rs) })
            }
            _ => Ok(st.clone()),
        }
    }

    fn transfer_call_inst(
        &mut self,
        st: &mut AbsState,
        np: &NodePoint,
        inst: &CallInst,
    ) -> AResult<AbsValue> {
        let cfg = self.cfg;
        match inst {
            CallInst::ICall { fexpr, args, .. } => {
                let f = self.transfer_expr(st, np, fexpr)?;
                let avs = self.transfer_exprs(st, np, args)?;
                self.call_closures_and_conts(st, np, &f, avs)?;
                Ok(AbsValue::bot())
            }
            CallInst::IMethodCall {
                base, method, args, ..
            } => {
                let rv = self.transfer_ref(st, np, base)?;
                let bv = st.get(cfg, &rv);
                let fv = st.get_value(cfg, &bv, &AbsValue::str(method));
                let mut avs = vec![bv];
                avs.extend(self.transfer_exprs(st, np, args)?);
                self.call_closures_and_conts(st, np, &fv, avs)?;
                Ok(AbsValue::bot())
            }
            CallInst::ISdoCall {
                base, method, args, ..
            } => {
                let bv = self.transfer_expr(st, np, base)?;
                let avs = self.transfer_exprs(st, np, args)?;
                let mut value = AbsValue::bot();
                match bv.pure.astv.gamma() {
                    Some(asts) => {
                        let asts: Vec<AstId> = asts.iter().copied().collect();
                        for ast_id in asts {
                            let ast = cfg.ast(ast_id);
                            if ast.is_syntactic() {
                                let (sdo_ast, fid) = self
                                    .get_sdo(ast_id, method)
                                    .ok_or(AnalysisError::InvalidSdo)?;
                                let callee = cfg.func(fid);
                                let mut call_args = vec![AbsValue::ast(sdo_ast)];
                                call_args.extend(avs.iter().cloned());
                                self.sem
                                    .do_call(np, st, fid, callee, call_args, BTreeMap::new());
                            } else {
                                let v = interp::interp_lexical(ast, method)
                                    .ok_or(AnalysisError::InvalidSdo)?;
                                value = value.join(&AbsValue::single(v));
                            }
                        }
                    }
                    None => {
                        // unknown AST: every operation with this name applies
                        let suffix = format!("].{method}");
                        let default_name = format!("<DEFAULT>.{method}");
                        for (fname, fid) in &cfg.fname_map {
                            if fname.ends_with(&suffix) || *fname == default_name {
                                let callee = cfg.func(*fid);
                                let mut call_args = vec![AbsValue::ast_top()];
                                call_args.extend(avs.iter().cloned());
                                self.sem
                                    .do_call(np, st, *fid, callee, call_args, BTreeMap::new());
                            }
                        }
                        value = value.join(&AbsValue::top());
                    }
                }
                Ok(value)
            }
        }
    }

    fn call_closures_and_conts(
        &mut self,
        st: &AbsState,
        np: &NodePoint,
        f: &AbsValue,
        args: Vec<AbsValue>,
    ) -> AResult<()> {
        let cfg = self.cfg;
        let clos = f.get_clos().ok_or(AnalysisError::Exploded("getClo"))?;
        for clo in clos {
            let callee = cfg.func(clo.func);
            self.sem
                .do_call(np, st, clo.func, callee, args.clone(), clo.captured);
        }
        let conts = f.get_conts().ok_or(AnalysisError::Exploded("getCont"))?;
        let caller_ret_comp = cfg.func(np.func).ret_comp;
        for cont in conts {
            // resumption wraps by the caller's completion convention
            let wrapped: Vec<AbsValue> = args
                .iter()
                .map(|v| {
                    if caller_ret_comp {
                        v.wrap_completion()
                    } else {
                        v.clone()
                    }
                })
                .collect();
            let target_func = cfg.func(cont.target.func);
            let mut locals = get_locals(target_func, wrapped, true);
            locals.extend(cont.captured.clone());
            self.sem.add_np(cont.target.clone(), st.copied(locals));
        }
        Ok(())
    }

    fn site_loc(&self, np: &NodePoint, site: SiteId) -> Loc {
        Loc {
            site,
            view: np.view.clone(),
        }
    }

    /// Resolves the syntax-directed operation for `(ast, method)` by walking
    /// the chain innermost-out; memoized.
    fn get_sdo(&self, ast: AstId, method: &str) -> Option<(AstId, FuncId)> {
        let key = (ast, method.to_string());
        if let Some(r) = self.sdo_cache.borrow().get(&key) {
            return r.clone();
        }
        let cfg = self.cfg;
        let mut result = None;
        for anc in cfg.chains(ast) {
            let node = cfg.ast(anc);
            let (prod_idx, sub) = match node {
                Ast::Syntactic { rhs_idx, .. } => (*rhs_idx, self.sub_idx(anc)),
                Ast::Lexical { .. } => (0, 0),
            };
            let fname = format!("{}[{},{}].{}", node.name(), prod_idx, sub, method);
            if let Some(f) = cfg.fname_map.get(&fname) {
                result = Some((anc, *f));
                break;
            }
        }
        if result.is_none() && DEFAULT_CASES.contains(&method) {
            let fname = format!("<DEFAULT>.{method}");
            if let Some(f) = cfg.fname_map.get(&fname) {
                result = Some((ast, *f));
            }
        }
        self.sdo_cache.borrow_mut().insert(key, result.clone());
        result
    }

    /// Bitmap over optional child presence; memoized.
    fn sub_idx(&self, ast: AstId) -> usize {
        if let Some(r) = self.sub_idx_cache.borrow().get(&ast) {
            return *r;
        }
        let cfg = self.cfg;
        let r = match cfg.ast(ast) {
            Ast::Lexical { .. } => 0,
            Ast::Syntactic {
                name,
                rhs_idx,
                children,
                ..
            } => match cfg.grammar.name_map.get(name) {
                None => 0,
                Some(prod) => {
                    let rhs = &prod.rhs_vec[*rhs_idx];
                    let mut idx = 0;
                    let mut bit = 0;
                    for (sym, child) in rhs.nts.iter().zip(children.iter()) {
                        if sym.optional {
                            if child.is_some() {
                                idx += 1 << bit;
                            }
                            bit += 1;
                        }
                    }
                    idx
                }
            },
        };
        self.sub_idx_cache.borrow_mut().insert(ast, r);
        r
    }
}

fn uop_lattice(op: UOp, v: &AbsValue) -> AbsValue {
    match op {
        UOp::Neg => v.neg(),
        UOp::Not => v.not(),
        UOp::BNot => v.bnot(),
        UOp::Abs => v.abs(),
        UOp::Floor => v.floor(),
    }
}

fn bop_lattice(op: BOp, l: &AbsValue, r: &AbsValue) -> AbsValue {
    match op {
        BOp::Add => l.add(r),
        BOp::Sub => l.sub(r),
        BOp::Mul => l.mul(r),
        BOp::Pow => l.pow(r),
        BOp::Div => l.div(r),
        BOp::UMod => l.umod(r),
        BOp::Mod => l.modulo(r),
        BOp::Lt => l.lt(r),
        BOp::Equal => {
            let b = l
                .pure
                .mathv
                .binary_bool(&r.pure.mathv, |a, c| a == c)
                .join(&l.pure.numv.binary_bool(&r.pure.numv, |a, c| a == c))
                .join(&l.pure.bigintv.binary_bool(&r.pure.bigintv, |a, c| a == c));
            AbsValue::boolv(b)
        }
        BOp::And => l.and(r),
        BOp::Or => l.or(r),
        BOp::Xor => l.xor(r),
        BOp::BAnd => l.band(r),
        BOp::BOr => l.bor(r),
        BOp::BXOr => l.bxor(r),
        BOp::LShift => l.lshift(r),
        BOp::SRShift => l.srshift(r),
        BOp::URShift => l.urshift(r),
        BOp::Eq => unreachable!("Eq is handled by the state"),
    }
}

fn convert_lattice(cop: COp) -> AbsValue {
    let mut pure = AbsPure::bot();
    match cop {
        COp::ToMath => pure.mathv = AbsSet::top(),
        COp::ToNumber => pure.numv = AbsSet::top(),
        COp::ToBigInt => pure.bigintv = AbsSet::top(),
        COp::ToStr => pure.strv = AbsSet::top(),
    }
    AbsValue::of_pure(pure)
}

fn list_elems_value(st: &AbsState, v: &AbsValue) -> AbsValue {
    match v.pure.locv.gamma() {
        None => AbsValue::top(),
        Some(locs) => locs.iter().fold(AbsValue::bot(), |acc, loc| {
            match st.heap.get(loc) {
                Some(AbsObj::List(list)) => acc.join(&list.merged_value()),
                Some(_) => acc.join(&AbsValue::top()),
                None => acc,
            }
        }),
    }
}

use super::analysis::{Loc, LoopCtxt, NodePoint, ReturnPoint, View};
use super::domains::*;
use super::semantics::AbsTransfer;
use crate::cfg::*;

mod branches;
mod calls;
mod comps;
mod insts;
mod lattice;
mod loops;
mod sdo;

fn run<'a>(cfg: &'a Cfg, fname: &str, args: Vec<AbsValue>) -> (AbsTransfer<'a>, ReturnPoint) {
    let mut t = AbsTransfer::new(cfg);
    let rp = t.init(fname, args).unwrap();
    t.analyze().unwrap();
    (t, rp)
}

fn ret_of(t: &AbsTransfer<'_>, rp: &ReturnPoint) -> AbsValue {
    t.sem.ret_of(rp).value
}

fn np(func: FuncId, node: NodeId) -> NodePoint {
    NodePoint {
        func,
        node,
        view: View::default(),
    }
}

fn as_math(v: &AbsValue) -> Vec<i128> {
    assert!(v.comp.is_bot());
    assert!(v.pure.strv.is_bot());
    assert!(v.pure.numv.is_bot());
    assert!(v.pure.boolv.is_bot());
    assert!(v.pure.locv.is_bot());
    assert!(v.pure.simplev.is_bot());
    v.pure.mathv.gamma().unwrap().iter().copied().collect()
}

fn as_bool(v: &AbsValue) -> AbsBool {
    assert!(v.comp.is_bot());
    assert!(v.pure.mathv.is_bot());
    assert!(v.pure.strv.is_bot());
    v.pure.boolv
}

// expression shorthands; the full constructors are unreadable in tests

fn m(n: i128) -> Expr {
    Expr::EMath(n)
}

fn s(x: &str) -> Expr {
    Expr::EStr(x.to_string())
}

fn r(x: &str) -> Expr {
    Expr::ERef(Ref::Id(Id::name(x)))
}

fn prop(x: &str, key: Expr) -> Ref {
    Ref::Prop(Box::new(Ref::Id(Id::name(x))), Box::new(key))
}

fn bin(op: BOp, l: Expr, rhs: Expr) -> Expr {
    Expr::EBinary(op, Box::new(l), Box::new(rhs))
}

fn lete(x: &str, e: Expr) -> Inst {
    Inst::ILet(Id::name(x), e)
}

fn rete(e: Expr) -> Inst {
    Inst::IReturn(e)
}

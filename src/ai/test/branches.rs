use super::*;

#[test]
fn test_short_circuit_and() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    // the right side would allocate; a concretely false left must keep it
    // from running
    let cond = bin(
        BOp::And,
        Expr::EBool(false),
        bin(BOp::Eq, Expr::EList(vec![], 9), Expr::EList(vec![], 10)),
    );
    f.add_node(Node::branch(BranchKind::If, cond, Some(1), Some(2)));
    f.add_node(Node::block(vec![lete("a", m(1))], None));
    f.add_node(Node::block(vec![], None));
    let fid = cfg.add_func(f);
    let mut t = AbsTransfer::new(&cfg);
    t.init("f", vec![]).unwrap();
    t.analyze().unwrap();
    assert!(t.sem.state_of(&np(fid, 1)).is_bottom());
    let else_st = t.sem.state_of(&np(fid, 2));
    assert!(!else_st.is_bottom());
    assert!(else_st.heap.map.is_empty());
}

#[test]
fn test_typeof_prune() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![Param::new("x")], false);
    let cond = bin(
        BOp::Eq,
        Expr::ETypeOf(Box::new(r("x"))),
        s("String"),
    );
    f.add_node(Node::branch(BranchKind::If, cond, Some(1), Some(2)));
    f.add_node(Node::block(vec![], None));
    f.add_node(Node::block(vec![], None));
    let fid = cfg.add_func(f);
    let x = AbsValue::of_pure(AbsPure {
        strv: AbsSet::top(),
        numv: AbsSet::top(),
        ..AbsPure::bot()
    });
    let mut t = AbsTransfer::new(&cfg);
    t.init("f", vec![x]).unwrap();
    t.analyze().unwrap();
    let then_x = t.sem.state_of(&np(fid, 1)).lookup(&Id::name("x"));
    assert!(then_x.pure.strv.is_top());
    assert!(then_x.pure.numv.is_bot());
    let else_x = t.sem.state_of(&np(fid, 2)).lookup(&Id::name("x"));
    assert!(else_x.pure.strv.is_bot());
    assert!(else_x.pure.numv.is_top());
}

#[test]
fn test_not_flips_pruning() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![Param::new("x")], false);
    let cond = Expr::EUnary(
        UOp::Not,
        Box::new(bin(
            BOp::Eq,
            Expr::ETypeOf(Box::new(r("x"))),
            s("String"),
        )),
    );
    f.add_node(Node::branch(BranchKind::If, cond, Some(1), Some(2)));
    f.add_node(Node::block(vec![], None));
    f.add_node(Node::block(vec![], None));
    let fid = cfg.add_func(f);
    let x = AbsValue::of_pure(AbsPure {
        strv: AbsSet::top(),
        numv: AbsSet::top(),
        ..AbsPure::bot()
    });
    let mut t = AbsTransfer::new(&cfg);
    t.init("f", vec![x]).unwrap();
    t.analyze().unwrap();
    let then_x = t.sem.state_of(&np(fid, 1)).lookup(&Id::name("x"));
    assert!(then_x.pure.strv.is_bot());
    assert!(then_x.pure.numv.is_top());
    let else_x = t.sem.state_of(&np(fid, 2)).lookup(&Id::name("x"));
    assert!(else_x.pure.strv.is_top());
    assert!(else_x.pure.numv.is_bot());
}

#[test]
fn test_concrete_branch_kills_one_side() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::branch(BranchKind::If, Expr::EBool(true), Some(1), Some(2)));
    f.add_node(Node::block(vec![rete(m(1))], None));
    f.add_node(Node::block(vec![rete(m(2))], None));
    let fid = cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    assert!(t.sem.state_of(&np(fid, 2)).is_bottom());
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![1]);
}

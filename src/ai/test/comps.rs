use super::*;

fn comp(kind: &str, v: Expr) -> Expr {
    Expr::EComp(
        Box::new(Expr::EConst(kind.to_string())),
        Box::new(v),
        Box::new(Expr::EConst("empty".to_string())),
    )
}

#[test]
fn test_mk_completion_and_projection() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(
        vec![
            lete("c", comp("normal", m(3))),
            rete(Expr::ERef(prop("c", s("Value")))),
        ],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![3]);
}

#[test]
fn test_is_completion() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(
        vec![
            lete("c", comp("normal", m(3))),
            rete(Expr::EIsCompletion(Box::new(r("c")))),
        ],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    assert_eq!(as_bool(&ret_of(&t, &rp)), AbsBool::True);
}

#[test]
fn test_return_if_abrupt_splits() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![Param::new("b")], false);
    f.add_node(Node::branch(BranchKind::If, r("b"), Some(1), Some(2)));
    f.add_node(Node::block(vec![lete("t", comp("throw", m(1)))], Some(3)));
    f.add_node(Node::block(vec![lete("t", comp("normal", m(3)))], Some(3)));
    f.add_node(Node::block(
        vec![
            lete("y", Expr::EReturnIfAbrupt(Box::new(r("t")), true)),
            rete(r("y")),
        ],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![AbsValue::boolv(AbsBool::Top)]);
    let v = ret_of(&t, &rp);
    // the abrupt part short-circuits to the return point
    let AbsComp::Map(comps) = &v.comp else {
        panic!("expected a completion map");
    };
    assert!(comps.contains_key("throw"));
    assert!(!comps.contains_key("normal"));
    // the continuation keeps the unwrapped payload
    assert_eq!(
        v.pure.mathv.gamma().unwrap().iter().copied().collect::<Vec<_>>(),
        vec![3]
    );
}

#[test]
fn test_return_if_abrupt_no_check_unwraps() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(
        vec![
            lete("t", comp("normal", m(3))),
            lete("y", Expr::EReturnIfAbrupt(Box::new(r("t")), false)),
            rete(r("y")),
        ],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![3]);
}

#[test]
fn test_return_if_abrupt_writes_back() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(
        vec![
            lete("t", comp("normal", m(3))),
            Inst::IExpr(Expr::EReturnIfAbrupt(Box::new(r("t")), true)),
            rete(r("t")),
        ],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    // the reference now holds the unwrapped value
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![3]);
}

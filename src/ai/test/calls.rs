use super::*;

fn const_fn(cfg: &mut Cfg, name: &str, n: i128, ret_comp: bool) -> FuncId {
    let mut f = Func::new(name, vec![], ret_comp);
    f.add_node(Node::block(vec![rete(m(n))], None));
    cfg.add_func(f)
}

fn caller(cfg: &mut Cfg, name: &str, callee: &str) -> FuncId {
    let mut f = Func::new(name, vec![], false);
    f.add_node(Node::call(
        CallInst::ICall {
            lhs: Id::name("r"),
            fexpr: Expr::EClo(callee.to_string(), vec![]),
            args: vec![],
        },
        Some(1),
    ));
    f.add_node(Node::block(vec![rete(r("r"))], None));
    cfg.add_func(f)
}

#[test]
fn test_call_return_value() {
    let mut cfg = Cfg::new();
    const_fn(&mut cfg, "g", 3, false);
    caller(&mut cfg, "f", "g");
    let (t, rp) = run(&cfg, "f", vec![]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![3]);
}

#[test]
fn test_completion_wrapping_at_return() {
    let mut cfg = Cfg::new();
    const_fn(&mut cfg, "g", 3, true);
    caller(&mut cfg, "f", "g");
    let (t, rp) = run(&cfg, "f", vec![]);
    let v = ret_of(&t, &rp);
    // the callee declares a completion return: the caller sees the wrap
    assert!(v.pure.is_bot());
    let elem = v.comp.normal().unwrap();
    assert_eq!(
        elem.value.mathv.gamma().unwrap().iter().copied().collect::<Vec<_>>(),
        vec![3]
    );
}

#[test]
fn test_no_double_wrapping() {
    let mut cfg = Cfg::new();
    const_fn(&mut cfg, "g", 3, false);
    caller(&mut cfg, "f", "g");
    let (t, rp) = run(&cfg, "f", vec![]);
    // non-completion callee: the value passes through unchanged
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![3]);
}

#[test]
fn test_return_edge_fan_out() {
    let mut cfg = Cfg::new();
    const_fn(&mut cfg, "g", 5, false);
    caller(&mut cfg, "f1", "g");
    caller(&mut cfg, "f2", "g");
    let mut t = AbsTransfer::new(&cfg);
    let rp1 = t.init("f1", vec![]).unwrap();
    let rp2 = t.init("f2", vec![]).unwrap();
    t.analyze().unwrap();
    assert_eq!(as_math(&ret_of(&t, &rp1)), vec![5]);
    assert_eq!(as_math(&ret_of(&t, &rp2)), vec![5]);
}

#[test]
fn test_closure_captures_bindings() {
    let mut cfg = Cfg::new();
    let mut g = Func::new("g", vec![], false);
    g.add_node(Node::block(vec![rete(r("a"))], None));
    cfg.add_func(g);
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(vec![lete("a", m(7))], Some(1)));
    f.add_node(Node::call(
        CallInst::ICall {
            lhs: Id::name("r"),
            fexpr: Expr::EClo("g".to_string(), vec!["a".to_string()]),
            args: vec![],
        },
        Some(2),
    ));
    f.add_node(Node::block(vec![rete(r("r"))], None));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![7]);
}

#[test]
fn test_method_call() {
    let mut cfg = Cfg::new();
    let mut g = Func::new("g", vec![Param::new("this"), Param::new("n")], false);
    g.add_node(Node::block(vec![rete(r("n"))], None));
    cfg.add_func(g);
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(
        vec![lete(
            "o",
            Expr::EMap {
                ty: "Record".to_string(),
                props: vec![(s("run"), Expr::EClo("g".to_string(), vec![]))],
                site: 0,
            },
        )],
        Some(1),
    ));
    f.add_node(Node::call(
        CallInst::IMethodCall {
            lhs: Id::name("r"),
            base: Ref::Id(Id::name("o")),
            method: "run".to_string(),
            args: vec![m(9)],
        },
        Some(2),
    ));
    f.add_node(Node::block(vec![rete(r("r"))], None));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![9]);
}

#[test]
fn test_continuation_resumes_to_original_caller() {
    let mut cfg = Cfg::new();
    let mut k = Func::new("k", vec![Param::new("x")], false);
    k.add_node(Node::block(vec![rete(r("x"))], None));
    cfg.add_func(k);
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(vec![lete("c", Expr::ECont("k".to_string()))], Some(1)));
    f.add_node(Node::call(
        CallInst::ICall {
            lhs: Id::name("d"),
            fexpr: r("c"),
            args: vec![m(4)],
        },
        Some(2),
    ));
    f.add_node(Node::block(vec![], None));
    cfg.add_func(f);
    caller(&mut cfg, "main", "f");
    let (t, rp) = run(&cfg, "main", vec![]);
    // the resumed return fans out to f's caller, not to the resumption site
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![4]);
}

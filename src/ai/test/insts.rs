use super::*;

#[test]
fn test_let_binary() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(
        vec![
            lete("x", bin(BOp::Add, m(1), m(2))),
            lete("y", r("x")),
            rete(r("y")),
        ],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![3]);
}

#[test]
fn test_assign_prop() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(
        vec![
            lete(
                "o",
                Expr::EMap {
                    ty: "Record".to_string(),
                    props: vec![(s("a"), m(1))],
                    site: 0,
                },
            ),
            Inst::IAssign(prop("o", s("a")), m(2)),
            rete(Expr::ERef(prop("o", s("a")))),
        ],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![2]);
}

#[test]
fn test_list_push_pop() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(
        vec![
            lete("l", Expr::EList(vec![m(1)], 0)),
            Inst::IPush {
                from: m(2),
                to: r("l"),
                front: false,
            },
            rete(Expr::EPop(Box::new(r("l")), false)),
        ],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![2]);
}

#[test]
fn test_delete_then_absent() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(
        vec![
            lete(
                "o",
                Expr::EMap {
                    ty: "Record".to_string(),
                    props: vec![(s("a"), m(1))],
                    site: 0,
                },
            ),
            Inst::IDelete(prop("o", s("a"))),
            rete(bin(BOp::Eq, Expr::ERef(prop("o", s("a"))), Expr::EAbsent)),
        ],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    assert_eq!(as_bool(&ret_of(&t, &rp)), AbsBool::True);
}

#[test]
fn test_contains() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(
        vec![
            lete("l", Expr::EList(vec![m(1), m(2)], 0)),
            rete(Expr::EContains(Box::new(r("l")), Box::new(m(2)), None)),
        ],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    assert_eq!(as_bool(&ret_of(&t, &rp)), AbsBool::True);
}

#[test]
fn test_bottom_absorbs_rest_of_block() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(vec![rete(m(1)), lete("x", m(9))], Some(1)));
    f.add_node(Node::block(vec![lete("y", m(5))], None));
    let fid = cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![1]);
    // nothing flows past the return
    assert!(t.sem.state_of(&np(fid, 1)).is_bottom());
}

#[test]
fn test_substring() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(
        vec![rete(Expr::ESubstring(
            Box::new(s("abcdef")),
            Box::new(m(1)),
            Box::new(m(4)),
        ))],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    let v = ret_of(&t, &rp);
    assert_eq!(
        v.pure.strv.gamma().unwrap().iter().cloned().collect::<Vec<_>>(),
        vec!["bcd".to_string()]
    );
}

#[test]
fn test_is_array_index() {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    f.add_node(Node::block(
        vec![
            lete("a", Expr::EIsArrayIndex(Box::new(s("42")))),
            lete("b", Expr::EIsArrayIndex(Box::new(s("042")))),
            lete("c", Expr::EIsArrayIndex(Box::new(s("4294967295")))),
            rete(Expr::EList(vec![r("a"), r("b"), r("c")], 0)),
        ],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![]);
    let v = ret_of(&t, &rp);
    let st = t.sem.ret_of(&rp).state;
    let loc = v.pure.locv.gamma().unwrap().iter().next().unwrap().clone();
    let Some(AbsObj::List(AbsListObj::Fixed(vs))) = st.heap.get(&loc) else {
        panic!("expected a fixed list");
    };
    assert_eq!(vs[0].pure.boolv, AbsBool::True);
    assert_eq!(vs[1].pure.boolv, AbsBool::False);
    // 2^32 - 1 is out of range
    assert_eq!(vs[2].pure.boolv, AbsBool::False);
}

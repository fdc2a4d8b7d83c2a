use super::*;

fn sdo_fn(cfg: &mut Cfg, name: &str, n: i128) -> FuncId {
    let mut f = Func::new(name, vec![Param::new("this")], false);
    f.add_node(Node::block(vec![rete(m(n))], None));
    cfg.add_func(f)
}

fn sdo_caller(cfg: &mut Cfg, method: &str) -> FuncId {
    let mut f = Func::new("f", vec![Param::new("a")], false);
    f.add_node(Node::call(
        CallInst::ISdoCall {
            lhs: Id::name("r"),
            base: r("a"),
            method: method.to_string(),
            args: vec![],
        },
        Some(1),
    ));
    f.add_node(Node::block(vec![rete(r("r"))], None));
    cfg.add_func(f)
}

#[test]
fn test_dispatch_through_chain() {
    let mut cfg = Cfg::new();
    cfg.grammar.add_production("N", vec![Rhs::new(vec![("L", false)])]);
    cfg.grammar.add_production("P", vec![Rhs::new(vec![("N", false)])]);
    let lex = cfg.add_lexical("L", "tok");
    let n = cfg.add_syntactic("N", 0, vec![Some(lex)]);
    let _p = cfg.add_syntactic("P", 0, vec![Some(n)]);
    // only the transparent ancestor implements the operation
    sdo_fn(&mut cfg, "P[0,0].Evaluation", 42);
    sdo_caller(&mut cfg, "Evaluation");
    let (t, rp) = run(&cfg, "f", vec![AbsValue::ast(n)]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![42]);
}

#[test]
fn test_dispatch_innermost_wins() {
    let mut cfg = Cfg::new();
    cfg.grammar.add_production("N", vec![Rhs::new(vec![("L", false)])]);
    cfg.grammar.add_production("P", vec![Rhs::new(vec![("N", false)])]);
    let lex = cfg.add_lexical("L", "tok");
    let n = cfg.add_syntactic("N", 0, vec![Some(lex)]);
    let _p = cfg.add_syntactic("P", 0, vec![Some(n)]);
    sdo_fn(&mut cfg, "N[0,0].Evaluation", 1);
    sdo_fn(&mut cfg, "P[0,0].Evaluation", 2);
    sdo_caller(&mut cfg, "Evaluation");
    let (t, rp) = run(&cfg, "f", vec![AbsValue::ast(n)]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![1]);
}

#[test]
fn test_sub_idx_optional_children() {
    let mut cfg = Cfg::new();
    cfg.grammar.add_production(
        "Q",
        vec![Rhs::new(vec![("A", false), ("B", true), ("C", true)])],
    );
    let a = cfg.add_lexical("A", "a");
    let c = cfg.add_lexical("C", "c");
    // B absent, C present: bit 0 clear, bit 1 set
    let q = cfg.add_syntactic("Q", 0, vec![Some(a), None, Some(c)]);
    sdo_fn(&mut cfg, "Q[0,2].Op", 7);
    sdo_caller(&mut cfg, "Op");
    let (t, rp) = run(&cfg, "f", vec![AbsValue::ast(q)]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![7]);
}

#[test]
fn test_lexical_sdo_is_evaluated_directly() {
    let mut cfg = Cfg::new();
    let lex = cfg.add_lexical("NumericLiteral", "42");
    sdo_caller(&mut cfg, "MV");
    let (t, rp) = run(&cfg, "f", vec![AbsValue::ast(lex)]);
    // no call edge: the value comes straight from the interpreter
    assert!(t.sem.call_info.is_empty());
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![42]);
}

#[test]
fn test_default_case_fallback() {
    let mut cfg = Cfg::new();
    let lex = cfg.add_lexical("L", "tok");
    let n = cfg.add_syntactic("M", 0, vec![Some(lex)]);
    let mut d = Func::new("<DEFAULT>.Contains", vec![Param::new("this")], false);
    d.add_node(Node::block(vec![rete(Expr::EBool(false))], None));
    cfg.add_func(d);
    sdo_caller(&mut cfg, "Contains");
    let (t, rp) = run(&cfg, "f", vec![AbsValue::ast(n)]);
    assert_eq!(as_bool(&ret_of(&t, &rp)), AbsBool::False);
}

#[test]
fn test_source_text() {
    let mut cfg = Cfg::new();
    cfg.grammar.add_production("N", vec![Rhs::new(vec![("L", false), ("L", false)])]);
    let l1 = cfg.add_lexical("L", "foo");
    let l2 = cfg.add_lexical("L", "bar");
    let n = cfg.add_syntactic("N", 0, vec![Some(l1), Some(l2)]);
    let mut f = Func::new("f", vec![Param::new("a")], false);
    f.add_node(Node::block(
        vec![rete(Expr::ESourceText(Box::new(r("a"))))],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![AbsValue::ast(n)]);
    let v = ret_of(&t, &rp);
    assert_eq!(
        v.pure.strv.gamma().unwrap().iter().cloned().collect::<Vec<_>>(),
        vec!["foo bar".to_string()]
    );
}

#[test]
fn test_get_children_by_nonterminal() {
    let mut cfg = Cfg::new();
    cfg.grammar.add_production(
        "N",
        vec![Rhs::new(vec![("A", false), ("B", false), ("A", false)])],
    );
    let a1 = cfg.add_lexical("A", "x");
    let b = cfg.add_lexical("B", "y");
    let a2 = cfg.add_lexical("A", "z");
    let n = cfg.add_syntactic("N", 0, vec![Some(a1), Some(b), Some(a2)]);
    let mut f = Func::new("f", vec![Param::new("a")], false);
    f.add_node(Node::block(
        vec![
            lete(
                "l",
                Expr::EGetChildren(
                    Some(Box::new(Expr::EGrammar("A".to_string(), vec![]))),
                    Box::new(r("a")),
                    0,
                ),
            ),
            rete(Expr::ERef(prop("l", s("length")))),
        ],
        None,
    ));
    cfg.add_func(f);
    let (t, rp) = run(&cfg, "f", vec![AbsValue::ast(n)]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![2]);
}

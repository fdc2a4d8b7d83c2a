use super::*;

fn counting_loop() -> (Cfg, FuncId) {
    let mut cfg = Cfg::new();
    let mut f = Func::new("f", vec![], false);
    // 0: x := 0            (loop predecessor)
    // 1: loop while x < 2
    // 2:   x := x + 1      (back edge to 1)
    // 3: return x
    f.add_node(Node::block(vec![lete("x", m(0))], Some(1)).loop_pred());
    f.add_node(Node::branch(
        BranchKind::Loop,
        bin(BOp::Lt, r("x"), m(2)),
        Some(2),
        Some(3),
    ));
    f.add_node(Node::block(
        vec![Inst::IAssign(Ref::Id(Id::name("x")), bin(BOp::Add, r("x"), m(1)))],
        Some(1),
    ));
    f.add_node(Node::block(vec![rete(r("x"))], None));
    let fid = cfg.add_func(f);
    (cfg, fid)
}

fn loop_view(iter: usize) -> View {
    View {
        loops: vec![LoopCtxt { branch: 1, iter }],
    }
}

#[test]
fn test_loop_iterations_are_distinguished() {
    let (cfg, fid) = counting_loop();
    let (t, _) = run(&cfg, "f", vec![]);
    for iter in 0..3 {
        let head = NodePoint {
            func: fid,
            node: 1,
            view: loop_view(iter),
        };
        let x = t.sem.state_of(&head).lookup(&Id::name("x"));
        assert_eq!(as_math(&x), vec![iter as i128]);
    }
}

#[test]
fn test_loop_exit_restores_view() {
    let (cfg, fid) = counting_loop();
    let (t, rp) = run(&cfg, "f", vec![]);
    // the exit edge pops the loop context
    let exit = t.sem.state_of(&np(fid, 3));
    assert_eq!(as_math(&exit.lookup(&Id::name("x"))), vec![2]);
    assert_eq!(as_math(&ret_of(&t, &rp)), vec![2]);
}

#[test]
fn test_loop_body_views() {
    let (cfg, fid) = counting_loop();
    let (t, _) = run(&cfg, "f", vec![]);
    // the body runs under the loop view of its iteration
    for iter in 0..2 {
        let body = NodePoint {
            func: fid,
            node: 2,
            view: loop_view(iter),
        };
        let x = t.sem.state_of(&body).lookup(&Id::name("x"));
        assert_eq!(as_math(&x), vec![iter as i128]);
    }
    // the guard is false on the third entry, so no third body
    let body3 = NodePoint {
        func: fid,
        node: 2,
        view: loop_view(2),
    };
    assert!(t.sem.state_of(&body3).is_bottom());
}

use super::*;

#[test]
fn test_join_is_upper_bound() {
    let a = AbsValue::math(1);
    let b = AbsValue::str("x");
    let j = a.join(&b);
    assert!(a.ord(&j));
    assert!(b.ord(&j));
    assert!(!j.ord(&a));
}

#[test]
fn test_meet_is_lower_bound() {
    let a = AbsValue::math(1).join(&AbsValue::math(2));
    let b = AbsValue::math(2).join(&AbsValue::math(3));
    let g = a.meet(&b);
    assert!(g.ord(&a));
    assert!(g.ord(&b));
    assert_eq!(as_math(&g), vec![2]);
}

#[test]
fn test_bottom_is_identity() {
    let a = AbsValue::math(1);
    assert_eq!(a.join(&AbsValue::bot()), a);
    assert!(AbsValue::bot().ord(&a));
    assert!(AbsValue::bot().is_bottom());
}

#[test]
fn test_operator_transfer_is_monotone() {
    let small = AbsValue::math(1);
    let big = small.join(&AbsValue::math(5));
    let two = AbsValue::math(2);
    assert!(small.add(&two).ord(&big.add(&two)));
    assert!(small.lt(&two).ord(&big.lt(&two)));
}

#[test]
fn test_allocation_site_determinism() {
    let l1 = Loc {
        site: 1,
        view: View::default(),
    };
    let l2 = Loc {
        site: 1,
        view: View::default(),
    };
    assert_eq!(l1, l2);
    let other_view = Loc {
        site: 1,
        view: View {
            loops: vec![LoopCtxt { branch: 0, iter: 1 }],
        },
    };
    assert_ne!(l1, other_view);
}

#[test]
fn test_reallocation_merges_site() {
    let mut st = AbsState::empty();
    let loc = Loc {
        site: 1,
        view: View::default(),
    };
    st.alloc_list(loc.clone(), vec![AbsValue::math(1)]);
    assert!(st.is_single(&loc));
    st.alloc_list(loc.clone(), vec![AbsValue::math(2)]);
    assert!(!st.is_single(&loc));
}

#[test]
fn test_location_equality_needs_singleness() {
    let mut st = AbsState::empty();
    let l1 = Loc {
        site: 1,
        view: View::default(),
    };
    let l2 = Loc {
        site: 2,
        view: View::default(),
    };
    st.alloc_list(l1.clone(), vec![]);
    st.alloc_list(l2.clone(), vec![]);
    let v1 = AbsValue::loc(l1.clone());
    let v2 = AbsValue::loc(l2);
    assert_eq!(st.abs_eq(&v1, &v1).pure.boolv, AbsBool::True);
    assert_eq!(st.abs_eq(&v1, &v2).pure.boolv, AbsBool::False);
    st.alloc_list(l1.clone(), vec![]);
    assert_eq!(st.abs_eq(&v1, &v1).pure.boolv, AbsBool::Top);
}

#[test]
fn test_prune_type_is_sound() {
    let x = AbsValue::of_pure(AbsPure {
        strv: AbsSet::top(),
        numv: AbsSet::top(),
        ..AbsPure::bot()
    });
    let ty = AbsValue::str("String");
    let pos = x.prune_type(&ty, true);
    let neg = x.prune_type(&ty, false);
    assert!(pos.ord(&x));
    assert!(neg.ord(&x));
    // nothing is lost across the two sides
    assert!(x.ord(&pos.join(&neg)));
    assert!(pos.pure.numv.is_bot());
    assert!(neg.pure.strv.is_bot());
}

#[test]
fn test_wrap_unwrap_completion() {
    let v = AbsValue::math(3);
    let w = v.wrap_completion();
    assert_eq!(w.is_completion(), AbsBool::True);
    assert_eq!(w.unwrap_completion(), v);
    assert!(w.abrupt_completion().is_bottom());
}

#[test]
fn test_abrupt_completion_drops_normal() {
    let normal = AbsValue::math(3).wrap_completion();
    let throw = AbsValue {
        comp: AbsComp::of(
            "throw",
            CompElem {
                value: AbsPure::single(AValue::Math(1)),
                target: AbsPure::single(AValue::Const("empty".to_string())),
            },
        ),
        pure: AbsPure::bot(),
    };
    let both = normal.join(&throw);
    let abrupt = both.abrupt_completion();
    assert!(abrupt.comp.normal().is_none());
    assert_eq!(abrupt.unwrap_completion(), AbsValue::bot());
    assert_eq!(both.unwrap_completion(), AbsValue::math(3));
}

#[test]
fn test_state_join_keeps_both_bindings() {
    let mut s1 = AbsState::empty();
    s1.define_local(Id::name("x"), AbsValue::math(1));
    let mut s2 = AbsState::empty();
    s2.define_local(Id::name("x"), AbsValue::math(2));
    s2.define_local(Id::name("y"), AbsValue::math(9));
    let j = s1.join(&s2);
    assert_eq!(as_math(&j.lookup(&Id::name("x"))), vec![1, 2]);
    assert!(s1.ord(&j));
    assert!(s2.ord(&j));
    // a one-sided binding joins with absent
    let y = j.lookup(&Id::name("y"));
    assert!(y.pure.simplev.contains(&SimpleValue::Absent));
}

#[test]
fn test_set_bounding_degrades_to_top() {
    let mut v = AbsValue::bot();
    for n in 0..20 {
        v = v.join(&AbsValue::math(n));
    }
    assert!(v.pure.mathv.is_top());
}

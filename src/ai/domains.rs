use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
};

use crate::cfg::{Ast, AstId, Cfg, FuncId, Id};

use super::analysis::{Loc, NodePoint};

const MAX_SIZE: usize = 10;

pub const CONST_NORMAL: &str = "normal";
pub const CONST_EMPTY: &str = "empty";

/// f64 with a total order so every domain can live in a `BTreeSet`.
#[derive(Debug, Clone, Copy)]
pub struct N64(pub f64);

impl PartialEq for N64 {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for N64 {}

impl PartialOrd for N64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for N64 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A concrete value: an element of the flat lattice.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum AValue {
    Bool(bool),
    Str(String),
    Num(N64),
    Math(i128),
    BigInt(i128),
    CodeUnit(u16),
    Const(String),
    Undef,
    Null,
    Absent,
    Ast(AstId),
    Grammar(AGrammar),
    Loc(Loc),
    Clo(AClo),
    Cont(ACont),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AGrammar {
    pub name: String,
    pub params: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AClo {
    pub func: FuncId,
    pub captured: BTreeMap<Id, AbsValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ACont {
    pub target: NodePoint,
    pub captured: BTreeMap<Id, AbsValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimpleValue {
    Undef,
    Null,
    Absent,
}

/// Flat projection of an abstract value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flat<T> {
    Bot,
    One(T),
    Many,
}

/// Bounded set lattice: the workhorse of every sub-domain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum AbsSet<T> {
    Top,
    Set(BTreeSet<T>),
}

impl<T: Ord + Clone> AbsSet<T> {
    pub fn top() -> Self {
        Self::Top
    }

    pub fn bot() -> Self {
        Self::Set(BTreeSet::new())
    }

    pub fn alpha(v: T) -> Self {
        Self::alphas([v].into_iter().collect())
    }

    pub fn alphas(set: BTreeSet<T>) -> Self {
        if set.len() > MAX_SIZE {
            Self::Top
        } else {
            Self::Set(set)
        }
    }

    pub fn is_bot(&self) -> bool {
        matches!(self, Self::Set(s) if s.is_empty())
    }

    pub fn is_top(&self) -> bool {
        matches!(self, Self::Top)
    }

    pub fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Top, _) | (_, Self::Top) => Self::Top,
            (Self::Set(s1), Self::Set(s2)) => Self::alphas(s1.union(s2).cloned().collect()),
        }
    }

    pub fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Top, v) | (v, Self::Top) => v.clone(),
            (Self::Set(s1), Self::Set(s2)) => Self::Set(s1.intersection(s2).cloned().collect()),
        }
    }

    pub fn ord(&self, other: &Self) -> bool {
        match (self, other) {
            (_, Self::Top) => true,
            (Self::Top, _) => false,
            (Self::Set(s1), Self::Set(s2)) => s1.is_subset(s2),
        }
    }

    pub fn gamma(&self) -> Option<&BTreeSet<T>> {
        match self {
            Self::Top => None,
            Self::Set(s) => Some(s),
        }
    }

    pub fn get_single(&self) -> Flat<T> {
        match self {
            Self::Top => Flat::Many,
            Self::Set(s) => match s.len() {
                0 => Flat::Bot,
                1 => Flat::One(s.iter().next().unwrap().clone()),
                _ => Flat::Many,
            },
        }
    }

    pub fn contains(&self, v: &T) -> bool {
        match self {
            Self::Top => true,
            Self::Set(s) => s.contains(v),
        }
    }

    pub fn map<U: Ord + Clone, F: Fn(&T) -> Option<U>>(&self, f: F) -> AbsSet<U> {
        match self {
            Self::Top => AbsSet::Top,
            Self::Set(s) => AbsSet::alphas(s.iter().filter_map(|v| f(v)).collect()),
        }
    }

    pub fn binary<U: Ord + Clone, F: Fn(&T, &T) -> Option<U>>(
        &self,
        other: &Self,
        f: F,
    ) -> AbsSet<U> {
        match (self, other) {
            (Self::Set(s), _) if s.is_empty() => AbsSet::bot(),
            (_, Self::Set(s)) if s.is_empty() => AbsSet::bot(),
            (Self::Top, _) | (_, Self::Top) => AbsSet::Top,
            (Self::Set(s1), Self::Set(s2)) => {
                let mut set = BTreeSet::new();
                for v1 in s1 {
                    for v2 in s2 {
                        if let Some(v) = f(v1, v2) {
                            set.insert(v);
                        }
                    }
                }
                AbsSet::alphas(set)
            }
        }
    }

    pub fn binary_bool<F: Fn(&T, &T) -> bool>(&self, other: &Self, f: F) -> AbsBool {
        match (self, other) {
            (Self::Set(s), _) if s.is_empty() => AbsBool::Bot,
            (_, Self::Set(s)) if s.is_empty() => AbsBool::Bot,
            (Self::Top, _) | (_, Self::Top) => AbsBool::Top,
            (Self::Set(s1), Self::Set(s2)) => {
                let mut set = BTreeSet::new();
                for v1 in s1 {
                    for v2 in s2 {
                        set.insert(f(v1, v2));
                    }
                }
                AbsBool::alphas(set)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AbsBool {
    Top,
    True,
    False,
    Bot,
}

impl AbsBool {
    pub fn top() -> Self {
        Self::Top
    }

    pub fn bot() -> Self {
        Self::Bot
    }

    pub fn alpha(b: bool) -> Self {
        if b {
            Self::True
        } else {
            Self::False
        }
    }

    pub fn alphas(set: BTreeSet<bool>) -> Self {
        if set.len() == 2 {
            Self::Top
        } else if set.contains(&true) {
            Self::True
        } else if set.contains(&false) {
            Self::False
        } else {
            Self::Bot
        }
    }

    pub fn is_bot(&self) -> bool {
        matches!(self, Self::Bot)
    }

    pub fn may_true(&self) -> bool {
        matches!(self, Self::Top | Self::True)
    }

    pub fn may_false(&self) -> bool {
        matches!(self, Self::Top | Self::False)
    }

    pub fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::True, Self::True) => Self::True,
            (Self::False, Self::False) => Self::False,
            (Self::Bot, v) | (v, Self::Bot) => *v,
            _ => Self::Top,
        }
    }

    pub fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Top, v) | (v, Self::Top) => *v,
            (Self::True, Self::True) => Self::True,
            (Self::False, Self::False) => Self::False,
            _ => Self::Bot,
        }
    }

    pub fn ord(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (_, Self::Top) | (Self::Bot, _) | (Self::True, Self::True) | (Self::False, Self::False)
        )
    }

    pub fn not(&self) -> Self {
        match self {
            Self::Top => Self::Top,
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Bot => Self::Bot,
        }
    }

    pub fn and(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Bot, _) | (_, Self::Bot) => Self::Bot,
            (Self::False, _) | (_, Self::False) => Self::False,
            (Self::True, Self::True) => Self::True,
            _ => Self::Top,
        }
    }

    pub fn or(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Bot, _) | (_, Self::Bot) => Self::Bot,
            (Self::True, _) | (_, Self::True) => Self::True,
            (Self::False, Self::False) => Self::False,
            _ => Self::Top,
        }
    }

    pub fn xor(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Bot, _) | (_, Self::Bot) => Self::Bot,
            (Self::Top, _) | (_, Self::Top) => Self::Top,
            (a, b) => Self::alpha((*a == Self::True) != (*b == Self::True)),
        }
    }

    pub fn eq(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Bot, _) | (_, Self::Bot) => Self::Bot,
            (Self::True, Self::True) | (Self::False, Self::False) => Self::True,
            (Self::True, Self::False) | (Self::False, Self::True) => Self::False,
            _ => Self::Top,
        }
    }
}

/// Non-completion part of an abstract value: one sub-lattice per value kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AbsPure {
    pub clov: AbsSet<AClo>,
    pub contv: AbsSet<ACont>,
    pub locv: AbsSet<Loc>,
    pub astv: AbsSet<AstId>,
    pub grammarv: AbsSet<AGrammar>,
    pub mathv: AbsSet<i128>,
    pub numv: AbsSet<N64>,
    pub bigintv: AbsSet<i128>,
    pub strv: AbsSet<String>,
    pub boolv: AbsBool,
    pub cuv: AbsSet<u16>,
    pub constv: AbsSet<String>,
    pub simplev: AbsSet<SimpleValue>,
}

impl AbsPure {
    pub fn bot() -> Self {
        Self {
            clov: AbsSet::bot(),
            contv: AbsSet::bot(),
            locv: AbsSet::bot(),
            astv: AbsSet::bot(),
            grammarv: AbsSet::bot(),
            mathv: AbsSet::bot(),
            numv: AbsSet::bot(),
            bigintv: AbsSet::bot(),
            strv: AbsSet::bot(),
            boolv: AbsBool::Bot,
            cuv: AbsSet::bot(),
            constv: AbsSet::bot(),
            simplev: AbsSet::bot(),
        }
    }

    pub fn top() -> Self {
        Self {
            clov: AbsSet::top(),
            contv: AbsSet::top(),
            locv: AbsSet::top(),
            astv: AbsSet::top(),
            grammarv: AbsSet::top(),
            mathv: AbsSet::top(),
            numv: AbsSet::top(),
            bigintv: AbsSet::top(),
            strv: AbsSet::top(),
            boolv: AbsBool::Top,
            cuv: AbsSet::top(),
            constv: AbsSet::top(),
            simplev: AbsSet::top(),
        }
    }

    pub fn single(v: AValue) -> Self {
        let mut pure = Self::bot();
        match v {
            AValue::Bool(b) => pure.boolv = AbsBool::alpha(b),
            AValue::Str(s) => pure.strv = AbsSet::alpha(s),
            AValue::Num(n) => pure.numv = AbsSet::alpha(n),
            AValue::Math(n) => pure.mathv = AbsSet::alpha(n),
            AValue::BigInt(n) => pure.bigintv = AbsSet::alpha(n),
            AValue::CodeUnit(c) => pure.cuv = AbsSet::alpha(c),
            AValue::Const(c) => pure.constv = AbsSet::alpha(c),
            AValue::Undef => pure.simplev = AbsSet::alpha(SimpleValue::Undef),
            AValue::Null => pure.simplev = AbsSet::alpha(SimpleValue::Null),
            AValue::Absent => pure.simplev = AbsSet::alpha(SimpleValue::Absent),
            AValue::Ast(a) => pure.astv = AbsSet::alpha(a),
            AValue::Grammar(g) => pure.grammarv = AbsSet::alpha(g),
            AValue::Loc(l) => pure.locv = AbsSet::alpha(l),
            AValue::Clo(c) => pure.clov = AbsSet::alpha(c),
            AValue::Cont(c) => pure.contv = AbsSet::alpha(c),
        }
        pure
    }

    pub fn is_bot(&self) -> bool {
        self.clov.is_bot()
            && self.contv.is_bot()
            && self.locv.is_bot()
            && self.astv.is_bot()
            && self.grammarv.is_bot()
            && self.mathv.is_bot()
            && self.numv.is_bot()
            && self.bigintv.is_bot()
            && self.strv.is_bot()
            && self.boolv.is_bot()
            && self.cuv.is_bot()
            && self.constv.is_bot()
            && self.simplev.is_bot()
    }

    pub fn join(&self, other: &Self) -> Self {
        Self {
            clov: self.clov.join(&other.clov),
            contv: self.contv.join(&other.contv),
            locv: self.locv.join(&other.locv),
            astv: self.astv.join(&other.astv),
            grammarv: self.grammarv.join(&other.grammarv),
            mathv: self.mathv.join(&other.mathv),
            numv: self.numv.join(&other.numv),
            bigintv: self.bigintv.join(&other.bigintv),
            strv: self.strv.join(&other.strv),
            boolv: self.boolv.join(&other.boolv),
            cuv: self.cuv.join(&other.cuv),
            constv: self.constv.join(&other.constv),
            simplev: self.simplev.join(&other.simplev),
        }
    }

    pub fn meet(&self, other: &Self) -> Self {
        Self {
            clov: self.clov.meet(&other.clov),
            contv: self.contv.meet(&other.contv),
            locv: self.locv.meet(&other.locv),
            astv: self.astv.meet(&other.astv),
            grammarv: self.grammarv.meet(&other.grammarv),
            mathv: self.mathv.meet(&other.mathv),
            numv: self.numv.meet(&other.numv),
            bigintv: self.bigintv.meet(&other.bigintv),
            strv: self.strv.meet(&other.strv),
            boolv: self.boolv.meet(&other.boolv),
            cuv: self.cuv.meet(&other.cuv),
            constv: self.constv.meet(&other.constv),
            simplev: self.simplev.meet(&other.simplev),
        }
    }

    pub fn ord(&self, other: &Self) -> bool {
        self.clov.ord(&other.clov)
            && self.contv.ord(&other.contv)
            && self.locv.ord(&other.locv)
            && self.astv.ord(&other.astv)
            && self.grammarv.ord(&other.grammarv)
            && self.mathv.ord(&other.mathv)
            && self.numv.ord(&other.numv)
            && self.bigintv.ord(&other.bigintv)
            && self.strv.ord(&other.strv)
            && self.boolv.ord(&other.boolv)
            && self.cuv.ord(&other.cuv)
            && self.constv.ord(&other.constv)
            && self.simplev.ord(&other.simplev)
    }

    fn simple_to_avalue(v: SimpleValue) -> AValue {
        match v {
            SimpleValue::Undef => AValue::Undef,
            SimpleValue::Null => AValue::Null,
            SimpleValue::Absent => AValue::Absent,
        }
    }

    pub fn get_single(&self) -> Flat<AValue> {
        let mut singles: Vec<AValue> = vec![];
        macro_rules! collect {
            ($field:expr, $ctor:expr) => {
                match $field.get_single() {
                    Flat::Many => return Flat::Many,
                    Flat::One(v) => singles.push($ctor(v)),
                    Flat::Bot => {}
                }
            };
        }
        collect!(self.clov, AValue::Clo);
        collect!(self.contv, AValue::Cont);
        collect!(self.locv, AValue::Loc);
        collect!(self.astv, AValue::Ast);
        collect!(self.grammarv, AValue::Grammar);
        collect!(self.mathv, AValue::Math);
        collect!(self.numv, AValue::Num);
        collect!(self.bigintv, AValue::BigInt);
        collect!(self.strv, AValue::Str);
        collect!(self.cuv, AValue::CodeUnit);
        collect!(self.constv, AValue::Const);
        match self.simplev.get_single() {
            Flat::Many => return Flat::Many,
            Flat::One(v) => singles.push(Self::simple_to_avalue(v)),
            Flat::Bot => {}
        }
        match self.boolv {
            AbsBool::Top => return Flat::Many,
            AbsBool::True => singles.push(AValue::Bool(true)),
            AbsBool::False => singles.push(AValue::Bool(false)),
            AbsBool::Bot => {}
        }
        match singles.len() {
            0 => Flat::Bot,
            1 => Flat::One(singles.pop().unwrap()),
            _ => Flat::Many,
        }
    }

    /// Bitmask of non-bottom value kinds; values of distinct kinds are never
    /// equal.
    fn kind_mask(&self) -> u32 {
        let mut mask = 0;
        let parts = [
            !self.clov.is_bot(),
            !self.contv.is_bot(),
            !self.locv.is_bot(),
            !self.astv.is_bot(),
            !self.grammarv.is_bot(),
            !self.mathv.is_bot(),
            !self.numv.is_bot(),
            !self.bigintv.is_bot(),
            !self.strv.is_bot(),
            !self.boolv.is_bot(),
            !self.cuv.is_bot(),
            !self.constv.is_bot(),
        ];
        for (i, p) in parts.into_iter().enumerate() {
            if p {
                mask |= 1 << i;
            }
        }
        match self.simplev.gamma() {
            Some(s) => {
                for v in s {
                    mask |= 1 << (12 + *v as u32);
                }
            }
            None => mask |= 0b111 << 12,
        }
        mask
    }
}

/// Completion part: completion kind const to payload and target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum AbsComp {
    Top,
    Map(BTreeMap<String, CompElem>),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CompElem {
    pub value: AbsPure,
    pub target: AbsPure,
}

impl CompElem {
    pub fn join(&self, other: &Self) -> Self {
        Self {
            value: self.value.join(&other.value),
            target: self.target.join(&other.target),
        }
    }

    pub fn meet(&self, other: &Self) -> Self {
        Self {
            value: self.value.meet(&other.value),
            target: self.target.meet(&other.target),
        }
    }

    pub fn ord(&self, other: &Self) -> bool {
        self.value.ord(&other.value) && self.target.ord(&other.target)
    }
}

impl AbsComp {
    pub fn bot() -> Self {
        Self::Map(BTreeMap::new())
    }

    pub fn is_bot(&self) -> bool {
        matches!(self, Self::Map(m) if m.is_empty())
    }

    pub fn of(kind: &str, elem: CompElem) -> Self {
        Self::Map([(kind.to_string(), elem)].into_iter().collect())
    }

    pub fn normal_of(pure: AbsPure) -> Self {
        Self::of(
            CONST_NORMAL,
            CompElem {
                value: pure,
                target: AbsPure::single(AValue::Const(CONST_EMPTY.to_string())),
            },
        )
    }

    pub fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Top, _) | (_, Self::Top) => Self::Top,
            (Self::Map(m1), Self::Map(m2)) => {
                let mut map = m1.clone();
                for (k, v) in m2 {
                    map.entry(k.clone())
                        .and_modify(|e| *e = e.join(v))
                        .or_insert_with(|| v.clone());
                }
                Self::Map(map)
            }
        }
    }

    pub fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Top, v) | (v, Self::Top) => v.clone(),
            (Self::Map(m1), Self::Map(m2)) => Self::Map(
                m1.iter()
                    .filter_map(|(k, v)| m2.get(k).map(|w| (k.clone(), v.meet(w))))
                    .collect(),
            ),
        }
    }

    pub fn ord(&self, other: &Self) -> bool {
        match (self, other) {
            (_, Self::Top) => true,
            (Self::Top, _) => false,
            (Self::Map(m1), Self::Map(m2)) => {
                m1.iter().all(|(k, v)| m2.get(k).is_some_and(|w| v.ord(w)))
            }
        }
    }

    pub fn normal(&self) -> Option<&CompElem> {
        match self {
            Self::Top => None,
            Self::Map(m) => m.get(CONST_NORMAL),
        }
    }

    pub fn without_normal(&self) -> Self {
        match self {
            Self::Top => Self::Top,
            Self::Map(m) => Self::Map(
                m.iter()
                    .filter(|(k, _)| k.as_str() != CONST_NORMAL)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AbsValue {
    pub comp: AbsComp,
    pub pure: AbsPure,
}

impl AbsValue {
    pub fn bot() -> Self {
        Self {
            comp: AbsComp::bot(),
            pure: AbsPure::bot(),
        }
    }

    pub fn top() -> Self {
        Self {
            comp: AbsComp::Top,
            pure: AbsPure::top(),
        }
    }

    pub fn single(v: AValue) -> Self {
        Self {
            comp: AbsComp::bot(),
            pure: AbsPure::single(v),
        }
    }

    pub fn of_pure(pure: AbsPure) -> Self {
        Self {
            comp: AbsComp::bot(),
            pure,
        }
    }

    pub fn math(n: i128) -> Self {
        Self::single(AValue::Math(n))
    }

    pub fn number(n: f64) -> Self {
        Self::single(AValue::Num(N64(n)))
    }

    pub fn bigint(n: i128) -> Self {
        Self::single(AValue::BigInt(n))
    }

    pub fn str(s: &str) -> Self {
        Self::single(AValue::Str(s.to_string()))
    }

    pub fn bool(b: bool) -> Self {
        Self::single(AValue::Bool(b))
    }

    pub fn boolv(b: AbsBool) -> Self {
        Self::of_pure(AbsPure {
            boolv: b,
            ..AbsPure::bot()
        })
    }

    pub fn code_unit(c: u16) -> Self {
        Self::single(AValue::CodeUnit(c))
    }

    pub fn cons(name: &str) -> Self {
        Self::single(AValue::Const(name.to_string()))
    }

    pub fn undef() -> Self {
        Self::single(AValue::Undef)
    }

    pub fn null() -> Self {
        Self::single(AValue::Null)
    }

    pub fn absent() -> Self {
        Self::single(AValue::Absent)
    }

    pub fn ast(id: AstId) -> Self {
        Self::single(AValue::Ast(id))
    }

    pub fn ast_top() -> Self {
        Self::of_pure(AbsPure {
            astv: AbsSet::top(),
            ..AbsPure::bot()
        })
    }

    pub fn grammar(name: &str, params: Vec<bool>) -> Self {
        Self::single(AValue::Grammar(AGrammar {
            name: name.to_string(),
            params,
        }))
    }

    pub fn loc(loc: Loc) -> Self {
        Self::single(AValue::Loc(loc))
    }

    pub fn clo(clo: AClo) -> Self {
        Self::single(AValue::Clo(clo))
    }

    pub fn cont(cont: ACont) -> Self {
        Self::single(AValue::Cont(cont))
    }

    pub fn str_set(set: BTreeSet<String>) -> Self {
        Self::of_pure(AbsPure {
            strv: AbsSet::alphas(set),
            ..AbsPure::bot()
        })
    }

    pub fn is_bottom(&self) -> bool {
        self.comp.is_bot() && self.pure.is_bot()
    }

    pub fn join(&self, other: &Self) -> Self {
        Self {
            comp: self.comp.join(&other.comp),
            pure: self.pure.join(&other.pure),
        }
    }

    pub fn meet(&self, other: &Self) -> Self {
        Self {
            comp: self.comp.meet(&other.comp),
            pure: self.pure.meet(&other.pure),
        }
    }

    pub fn ord(&self, other: &Self) -> bool {
        self.comp.ord(&other.comp) && self.pure.ord(&other.pure)
    }

    pub fn get_single(&self) -> Flat<AValue> {
        if !self.comp.is_bot() {
            return Flat::Many;
        }
        self.pure.get_single()
    }

    pub fn get_clos(&self) -> Option<Vec<AClo>> {
        self.pure.clov.gamma().map(|s| s.iter().cloned().collect())
    }

    pub fn get_conts(&self) -> Option<Vec<ACont>> {
        self.pure.contv.gamma().map(|s| s.iter().cloned().collect())
    }

    // Completion operations.

    pub fn is_completion(&self) -> AbsBool {
        let mut b = AbsBool::Bot;
        if !self.comp.is_bot() {
            b = b.join(&AbsBool::True);
        }
        if !self.pure.is_bot() {
            b = b.join(&AbsBool::False);
        }
        b
    }

    pub fn wrap_completion(&self) -> Self {
        let mut comp = self.comp.clone();
        if !self.pure.is_bot() {
            comp = comp.join(&AbsComp::normal_of(self.pure.clone()));
        }
        Self {
            comp,
            pure: AbsPure::bot(),
        }
    }

    pub fn unwrap_completion(&self) -> Self {
        let mut pure = self.pure.clone();
        match &self.comp {
            AbsComp::Top => pure = AbsPure::top(),
            AbsComp::Map(_) => {
                if let Some(elem) = self.comp.normal() {
                    pure = pure.join(&elem.value);
                }
            }
        }
        Self {
            comp: AbsComp::bot(),
            pure,
        }
    }

    pub fn abrupt_completion(&self) -> Self {
        Self {
            comp: self.comp.without_normal(),
            pure: AbsPure::bot(),
        }
    }

    // Lattice-level operator transfer. Constant folding through the concrete
    // interpreter is done by the caller; these cover the imprecise cases.

    pub fn neg(&self) -> Self {
        Self::of_pure(AbsPure {
            mathv: self.pure.mathv.map(|n| n.checked_neg()),
            numv: self.pure.numv.map(|n| Some(N64(-n.0))),
            bigintv: self.pure.bigintv.map(|n| n.checked_neg()),
            ..AbsPure::bot()
        })
    }

    pub fn not(&self) -> Self {
        Self::boolv(self.pure.boolv.not())
    }

    pub fn bnot(&self) -> Self {
        Self::of_pure(AbsPure {
            mathv: self.pure.mathv.map(|n| Some(!n)),
            bigintv: self.pure.bigintv.map(|n| Some(!n)),
            ..AbsPure::bot()
        })
    }

    pub fn abs(&self) -> Self {
        Self::of_pure(AbsPure {
            mathv: self.pure.mathv.map(|n| n.checked_abs()),
            numv: self.pure.numv.map(|n| Some(N64(n.0.abs()))),
            ..AbsPure::bot()
        })
    }

    pub fn floor(&self) -> Self {
        Self::of_pure(AbsPure {
            mathv: self.pure.mathv.map(|n| Some(*n)),
            numv: self.pure.numv.map(|n| Some(N64(n.0.floor()))),
            ..AbsPure::bot()
        })
    }

    fn arith<FM, FN, FB>(&self, other: &Self, fm: FM, fn_: FN, fb: FB) -> Self
    where
        FM: Fn(i128, i128) -> Option<i128>,
        FN: Fn(f64, f64) -> f64,
        FB: Fn(i128, i128) -> Option<i128>,
    {
        Self::of_pure(AbsPure {
            mathv: self.pure.mathv.binary(&other.pure.mathv, |a, b| fm(*a, *b)),
            numv: self
                .pure
                .numv
                .binary(&other.pure.numv, |a, b| Some(N64(fn_(a.0, b.0)))),
            bigintv: self
                .pure
                .bigintv
                .binary(&other.pure.bigintv, |a, b| fb(*a, *b)),
            ..AbsPure::bot()
        })
    }

    pub fn add(&self, other: &Self) -> Self {
        self.arith(other, i128::checked_add, |a, b| a + b, i128::checked_add)
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.arith(other, i128::checked_sub, |a, b| a - b, i128::checked_sub)
    }

    pub fn mul(&self, other: &Self) -> Self {
        self.arith(other, i128::checked_mul, |a, b| a * b, i128::checked_mul)
    }

    pub fn div(&self, other: &Self) -> Self {
        self.arith(
            other,
            |a, b| if b == 0 { None } else { a.checked_div(b) },
            |a, b| a / b,
            |a, b| if b == 0 { None } else { a.checked_div(b) },
        )
    }

    pub fn modulo(&self, other: &Self) -> Self {
        self.arith(
            other,
            |a, b| if b == 0 { None } else { a.checked_rem(b) },
            |a, b| a % b,
            |a, b| if b == 0 { None } else { a.checked_rem(b) },
        )
    }

    pub fn umod(&self, other: &Self) -> Self {
        self.arith(
            other,
            |a, b| if b == 0 { None } else { a.checked_rem_euclid(b) },
            f64::rem_euclid,
            |a, b| if b == 0 { None } else { a.checked_rem_euclid(b) },
        )
    }

    pub fn pow(&self, other: &Self) -> Self {
        self.arith(
            other,
            |a, b| u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
            f64::powf,
            |a, b| u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
        )
    }

    pub fn lt(&self, other: &Self) -> Self {
        let b = self
            .pure
            .mathv
            .binary_bool(&other.pure.mathv, |a, c| a < c)
            .join(
                &self
                    .pure
                    .numv
                    .binary_bool(&other.pure.numv, |a, c| a.0 < c.0),
            )
            .join(
                &self
                    .pure
                    .bigintv
                    .binary_bool(&other.pure.bigintv, |a, c| a < c),
            );
        Self::boolv(b)
    }

    pub fn and(&self, other: &Self) -> Self {
        Self::boolv(self.pure.boolv.and(&other.pure.boolv))
    }

    pub fn or(&self, other: &Self) -> Self {
        Self::boolv(self.pure.boolv.or(&other.pure.boolv))
    }

    pub fn xor(&self, other: &Self) -> Self {
        Self::boolv(self.pure.boolv.xor(&other.pure.boolv))
    }

    fn bitwise<F: Fn(i128, i128) -> Option<i128> + Copy>(&self, other: &Self, f: F) -> Self {
        Self::of_pure(AbsPure {
            mathv: self.pure.mathv.binary(&other.pure.mathv, |a, b| f(*a, *b)),
            bigintv: self
                .pure
                .bigintv
                .binary(&other.pure.bigintv, |a, b| f(*a, *b)),
            ..AbsPure::bot()
        })
    }

    pub fn band(&self, other: &Self) -> Self {
        self.bitwise(other, |a, b| Some(a & b))
    }

    pub fn bor(&self, other: &Self) -> Self {
        self.bitwise(other, |a, b| Some(a | b))
    }

    pub fn bxor(&self, other: &Self) -> Self {
        self.bitwise(other, |a, b| Some(a ^ b))
    }

    pub fn lshift(&self, other: &Self) -> Self {
        self.bitwise(other, |a, b| {
            u32::try_from(b).ok().and_then(|s| a.checked_shl(s))
        })
    }

    pub fn srshift(&self, other: &Self) -> Self {
        self.bitwise(other, |a, b| {
            u32::try_from(b).ok().and_then(|s| a.checked_shr(s))
        })
    }

    pub fn urshift(&self, other: &Self) -> Self {
        self.bitwise(other, |a, b| {
            let s = u32::try_from(b).ok()?;
            let u = u64::try_from(a & 0xffff_ffff).ok()?;
            Some(i128::from(u >> (s % 32)))
        })
    }

    /// Equality over everything except locations; location equality needs
    /// the heap and lives on the state.
    pub fn eq_lattice(&self, other: &Self) -> AbsBool {
        let mut b = AbsBool::Bot;
        b = b.join(&self.pure.mathv.binary_bool(&other.pure.mathv, |a, c| a == c));
        b = b.join(&self.pure.numv.binary_bool(&other.pure.numv, |a, c| a == c));
        b = b.join(
            &self
                .pure
                .bigintv
                .binary_bool(&other.pure.bigintv, |a, c| a == c),
        );
        b = b.join(&self.pure.strv.binary_bool(&other.pure.strv, |a, c| a == c));
        b = b.join(&self.pure.boolv.eq(&other.pure.boolv));
        b = b.join(&self.pure.cuv.binary_bool(&other.pure.cuv, |a, c| a == c));
        b = b.join(
            &self
                .pure
                .constv
                .binary_bool(&other.pure.constv, |a, c| a == c),
        );
        b = b.join(
            &self
                .pure
                .simplev
                .binary_bool(&other.pure.simplev, |a, c| a == c),
        );
        b = b.join(&self.pure.astv.binary_bool(&other.pure.astv, |a, c| a == c));
        b = b.join(
            &self
                .pure
                .grammarv
                .binary_bool(&other.pure.grammarv, |a, c| a == c),
        );
        b = b.join(&self.pure.clov.binary_bool(&other.pure.clov, |a, c| a == c));
        b = b.join(&self.pure.contv.binary_bool(&other.pure.contv, |a, c| a == c));
        let ms = self.pure.kind_mask();
        let mo = other.pure.kind_mask();
        if ms != 0 && mo != 0 && (ms.count_ones() > 1 || mo.count_ones() > 1 || ms != mo) {
            b = b.join(&AbsBool::False);
        }
        if !self.comp.is_bot() || !other.comp.is_bot() {
            b = b.join(&AbsBool::Top);
        }
        b
    }

    /// ECMAScript-style type names of this value, resolving locations
    /// through the heap.
    pub fn type_of(&self, st: &AbsState) -> Self {
        let mut names: BTreeSet<String> = BTreeSet::new();
        let mut add = |names: &mut BTreeSet<String>, name: &str| {
            names.insert(name.to_string());
        };
        if !self.pure.mathv.is_bot() {
            add(&mut names, "Math");
        }
        if !self.pure.numv.is_bot() {
            add(&mut names, "Number");
        }
        if !self.pure.bigintv.is_bot() {
            add(&mut names, "BigInt");
        }
        if !self.pure.strv.is_bot() {
            add(&mut names, "String");
        }
        if !self.pure.boolv.is_bot() {
            add(&mut names, "Boolean");
        }
        if !self.pure.cuv.is_bot() {
            add(&mut names, "CodeUnit");
        }
        if !self.pure.constv.is_bot() {
            add(&mut names, "Const");
        }
        if !self.pure.astv.is_bot() {
            add(&mut names, "Ast");
        }
        if !self.pure.grammarv.is_bot() {
            add(&mut names, "Grammar");
        }
        if !self.pure.clov.is_bot() {
            add(&mut names, "Clo");
        }
        if !self.pure.contv.is_bot() {
            add(&mut names, "Cont");
        }
        match self.pure.simplev.gamma() {
            Some(s) => {
                for v in s {
                    match v {
                        SimpleValue::Undef => add(&mut names, "Undefined"),
                        SimpleValue::Null => add(&mut names, "Null"),
                        SimpleValue::Absent => add(&mut names, "Absent"),
                    }
                }
            }
            None => {
                add(&mut names, "Undefined");
                add(&mut names, "Null");
                add(&mut names, "Absent");
            }
        }
        match self.pure.locv.gamma() {
            None => {
                add(&mut names, "Symbol");
                add(&mut names, "Object");
            }
            Some(locs) => {
                for loc in locs {
                    match st.heap.get(loc) {
                        Some(AbsObj::Symbol(_)) => add(&mut names, "Symbol"),
                        Some(_) => add(&mut names, "Object"),
                        None => {
                            add(&mut names, "Symbol");
                            add(&mut names, "Object");
                        }
                    }
                }
            }
        }
        Self::str_set(names)
    }

    /// Narrows this value by a type name along a branch.
    pub fn prune_type(&self, tyv: &Self, positive: bool) -> Self {
        let Flat::One(AValue::Str(name)) = tyv.get_single() else {
            return self.clone();
        };
        let mut pure = self.pure.clone();
        let keep = |part_name: &str| {
            if positive {
                part_name == name
            } else {
                part_name != name
            }
        };
        if !keep("Math") {
            pure.mathv = AbsSet::bot();
        }
        if !keep("Number") {
            pure.numv = AbsSet::bot();
        }
        if !keep("BigInt") {
            pure.bigintv = AbsSet::bot();
        }
        if !keep("String") {
            pure.strv = AbsSet::bot();
        }
        if !keep("Boolean") {
            pure.boolv = AbsBool::Bot;
        }
        if !keep("CodeUnit") {
            pure.cuv = AbsSet::bot();
        }
        if !keep("Const") {
            pure.constv = AbsSet::bot();
        }
        if !keep("Ast") {
            pure.astv = AbsSet::bot();
        }
        if !keep("Grammar") {
            pure.grammarv = AbsSet::bot();
        }
        if !keep("Clo") {
            pure.clov = AbsSet::bot();
        }
        if !keep("Cont") {
            pure.contv = AbsSet::bot();
        }
        pure.simplev = pure.simplev.map(|v| {
            let part_name = match v {
                SimpleValue::Undef => "Undefined",
                SimpleValue::Null => "Null",
                SimpleValue::Absent => "Absent",
            };
            if keep(part_name) {
                Some(*v)
            } else {
                None
            }
        });
        // A location is a Symbol or an Object; without the heap the split is
        // undecidable, so locations survive unless the name rules both out.
        let loc_possible = name == "Symbol" || name == "Object";
        if positive && !loc_possible {
            pure.locv = AbsSet::bot();
        }
        Self {
            comp: self.comp.clone(),
            pure,
        }
    }
}

/// A resolved reference: an identifier or a property of a base value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsRefValue {
    Id(Id),
    Prop(AbsValue, AbsValue),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsListObj {
    Fixed(Vec<AbsValue>),
    Merged(Box<AbsValue>),
}

impl AbsListObj {
    pub fn merged_value(&self) -> AbsValue {
        match self {
            Self::Fixed(vs) => vs.iter().fold(AbsValue::bot(), |acc, v| acc.join(v)),
            Self::Merged(v) => (**v).clone(),
        }
    }

    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Fixed(l1), Self::Fixed(l2)) if l1.len() == l2.len() => Self::Fixed(
                l1.iter()
                    .zip(l2.iter())
                    .map(|(v1, v2)| v1.join(v2))
                    .collect(),
            ),
            _ => Self::Merged(Box::new(self.merged_value().join(&other.merged_value()))),
        }
    }

    fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Fixed(l1), Self::Fixed(l2)) if l1.len() == l2.len() => Self::Fixed(
                l1.iter()
                    .zip(l2.iter())
                    .map(|(v1, v2)| v1.meet(v2))
                    .collect(),
            ),
            (Self::Fixed(l), Self::Merged(v)) | (Self::Merged(v), Self::Fixed(l)) => {
                Self::Fixed(l.iter().map(|e| e.meet(v)).collect())
            }
            (Self::Merged(v1), Self::Merged(v2)) => Self::Merged(Box::new(v1.meet(v2))),
        }
    }

    fn ord(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Fixed(l1), Self::Fixed(l2)) if l1.len() == l2.len() => {
                l1.iter().zip(l2.iter()).all(|(v1, v2)| v1.ord(v2))
            }
            (_, Self::Merged(v)) => self.merged_value().ord(v),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsObj {
    Symbol(AbsValue),
    Map {
        ty: String,
        map: BTreeMap<AValue, AbsValue>,
    },
    List(AbsListObj),
    /// Shape information lost; reads answer top.
    Merged,
}

impl AbsObj {
    pub fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Symbol(d1), Self::Symbol(d2)) => Self::Symbol(d1.join(d2)),
            (Self::Map { ty: t1, map: m1 }, Self::Map { ty: t2, map: m2 }) if t1 == t2 => {
                let mut map = BTreeMap::new();
                for k in m1.keys().chain(m2.keys()) {
                    if map.contains_key(k) {
                        continue;
                    }
                    let v1 = m1.get(k).cloned().unwrap_or_else(AbsValue::absent);
                    let v2 = m2.get(k).cloned().unwrap_or_else(AbsValue::absent);
                    map.insert(k.clone(), v1.join(&v2));
                }
                Self::Map {
                    ty: t1.clone(),
                    map,
                }
            }
            (Self::List(l1), Self::List(l2)) => Self::List(l1.join(l2)),
            _ => Self::Merged,
        }
    }

    pub fn meet(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Merged, o) | (o, Self::Merged) => Some(o.clone()),
            (Self::Symbol(d1), Self::Symbol(d2)) => Some(Self::Symbol(d1.meet(d2))),
            (Self::Map { ty: t1, map: m1 }, Self::Map { ty: t2, map: m2 }) if t1 == t2 => {
                let mut map = BTreeMap::new();
                for k in m1.keys().chain(m2.keys()) {
                    if map.contains_key(k) {
                        continue;
                    }
                    let v1 = m1.get(k).cloned().unwrap_or_else(AbsValue::absent);
                    let v2 = m2.get(k).cloned().unwrap_or_else(AbsValue::absent);
                    map.insert(k.clone(), v1.meet(&v2));
                }
                Some(Self::Map {
                    ty: t1.clone(),
                    map,
                })
            }
            (Self::List(l1), Self::List(l2)) => Some(Self::List(l1.meet(l2))),
            _ => None,
        }
    }

    pub fn ord(&self, other: &Self) -> bool {
        match (self, other) {
            (_, Self::Merged) => true,
            (Self::Symbol(d1), Self::Symbol(d2)) => d1.ord(d2),
            (Self::Map { ty: t1, map: m1 }, Self::Map { ty: t2, map: m2 }) if t1 == t2 => {
                m1.keys().chain(m2.keys()).all(|k| {
                    let v1 = m1.get(k).cloned().unwrap_or_else(AbsValue::absent);
                    let v2 = m2.get(k).cloned().unwrap_or_else(AbsValue::absent);
                    v1.ord(&v2)
                })
            }
            (Self::List(l1), Self::List(l2)) => l1.ord(l2),
            _ => false,
        }
    }

    pub fn get(&self, key: &AbsValue) -> AbsValue {
        match self {
            Self::Merged => AbsValue::top(),
            Self::Symbol(desc) => match key.get_single() {
                Flat::Bot => AbsValue::bot(),
                Flat::One(AValue::Str(s)) if s == "Description" => desc.clone(),
                Flat::One(_) => AbsValue::absent(),
                Flat::Many => desc.join(&AbsValue::absent()),
            },
            Self::Map { map, .. } => match key.get_single() {
                Flat::Bot => AbsValue::bot(),
                Flat::One(k) => map.get(&k).cloned().unwrap_or_else(AbsValue::absent),
                Flat::Many => map.values().fold(AbsValue::absent(), |acc, v| acc.join(v)),
            },
            Self::List(list) => match key.get_single() {
                Flat::Bot => AbsValue::bot(),
                Flat::One(AValue::Str(s)) if s == "length" => match list {
                    AbsListObj::Fixed(vs) => AbsValue::math(vs.len() as i128),
                    AbsListObj::Merged(_) => AbsValue::of_pure(AbsPure {
                        mathv: AbsSet::top(),
                        ..AbsPure::bot()
                    }),
                },
                Flat::One(AValue::Math(i)) => match list {
                    AbsListObj::Fixed(vs) => usize::try_from(i)
                        .ok()
                        .and_then(|i| vs.get(i).cloned())
                        .unwrap_or_else(AbsValue::absent),
                    AbsListObj::Merged(v) => (**v).clone().join(&AbsValue::absent()),
                },
                Flat::One(_) => AbsValue::absent(),
                Flat::Many => list.merged_value().join(&AbsValue::absent()),
            },
        }
    }

    pub fn update(&mut self, key: &AbsValue, v: &AbsValue, strong: bool) {
        match self {
            Self::Merged => {}
            Self::Symbol(desc) => {
                if let Flat::One(AValue::Str(s)) = key.get_single() {
                    if s == "Description" {
                        *desc = if strong { v.clone() } else { desc.join(v) };
                        return;
                    }
                }
                *self = Self::Merged;
            }
            Self::Map { map, .. } => match key.get_single() {
                Flat::Bot => {}
                Flat::One(k) => {
                    let entry = map.entry(k).or_insert_with(AbsValue::absent);
                    *entry = if strong { v.clone() } else { entry.join(v) };
                }
                Flat::Many => *self = Self::Merged,
            },
            Self::List(list) => match key.get_single() {
                Flat::Bot => {}
                Flat::One(AValue::Math(i)) => match list {
                    AbsListObj::Fixed(vs) => {
                        if let Some(slot) = usize::try_from(i).ok().and_then(|i| vs.get_mut(i)) {
                            *slot = if strong { v.clone() } else { slot.join(v) };
                        }
                    }
                    AbsListObj::Merged(inner) => **inner = inner.join(v),
                },
                _ => {
                    *list = AbsListObj::Merged(Box::new(list.merged_value().join(v)));
                }
            },
        }
    }

    pub fn delete(&mut self, key: &AbsValue, strong: bool) {
        // weak deletion keeps the entry: it may or may not survive
        if let Self::Map { map, .. } = self {
            if let Flat::One(k) = key.get_single() {
                if strong {
                    map.remove(&k);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AbsHeap {
    pub map: BTreeMap<Loc, AbsObj>,
    pub merged: BTreeSet<Loc>,
}

impl AbsHeap {
    pub fn bot() -> Self {
        Self::default()
    }

    pub fn get(&self, loc: &Loc) -> Option<&AbsObj> {
        self.map.get(loc)
    }

    /// Re-allocation at a live site makes the location non-singleton.
    pub fn alloc(&mut self, loc: Loc, obj: AbsObj) {
        match self.map.get_mut(&loc) {
            Some(old) => {
                *old = old.join(&obj);
                self.merged.insert(loc);
            }
            None => {
                self.map.insert(loc, obj);
            }
        }
    }

    pub fn join(&self, other: &Self) -> Self {
        let mut map = self.map.clone();
        for (loc, obj) in &other.map {
            map.entry(loc.clone())
                .and_modify(|o| *o = o.join(obj))
                .or_insert_with(|| obj.clone());
        }
        Self {
            map,
            merged: self.merged.union(&other.merged).cloned().collect(),
        }
    }

    pub fn meet(&self, other: &Self) -> Self {
        let map = self
            .map
            .iter()
            .filter_map(|(loc, obj)| {
                let other_obj = other.map.get(loc)?;
                obj.meet(other_obj).map(|o| (loc.clone(), o))
            })
            .collect();
        Self {
            map,
            merged: self.merged.union(&other.merged).cloned().collect(),
        }
    }

    pub fn ord(&self, other: &Self) -> bool {
        self.map
            .iter()
            .all(|(loc, obj)| other.map.get(loc).is_some_and(|o| obj.ord(o)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsState {
    pub reachable: bool,
    pub locals: BTreeMap<Id, AbsValue>,
    pub heap: AbsHeap,
}

fn locals_get(locals: &BTreeMap<Id, AbsValue>, x: &Id) -> AbsValue {
    locals.get(x).cloned().unwrap_or_else(AbsValue::absent)
}

impl AbsState {
    pub fn bot() -> Self {
        Self {
            reachable: false,
            locals: BTreeMap::new(),
            heap: AbsHeap::bot(),
        }
    }

    pub fn empty() -> Self {
        Self {
            reachable: true,
            locals: BTreeMap::new(),
            heap: AbsHeap::bot(),
        }
    }

    pub fn is_bottom(&self) -> bool {
        !self.reachable
    }

    pub fn join(&self, other: &Self) -> Self {
        match (self.reachable, other.reachable) {
            (false, _) => other.clone(),
            (_, false) => self.clone(),
            (true, true) => {
                let mut locals = BTreeMap::new();
                for x in self.locals.keys().chain(other.locals.keys()) {
                    if locals.contains_key(x) {
                        continue;
                    }
                    locals.insert(
                        x.clone(),
                        locals_get(&self.locals, x).join(&locals_get(&other.locals, x)),
                    );
                }
                Self {
                    reachable: true,
                    locals,
                    heap: self.heap.join(&other.heap),
                }
            }
        }
    }

    pub fn meet(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Self::bot();
        }
        let mut locals = BTreeMap::new();
        for x in self.locals.keys().chain(other.locals.keys()) {
            if locals.contains_key(x) {
                continue;
            }
            locals.insert(
                x.clone(),
                locals_get(&self.locals, x).meet(&locals_get(&other.locals, x)),
            );
        }
        Self {
            reachable: true,
            locals,
            heap: self.heap.meet(&other.heap),
        }
    }

    pub fn ord(&self, other: &Self) -> bool {
        if self.is_bottom() {
            return true;
        }
        if other.is_bottom() {
            return false;
        }
        self.locals
            .keys()
            .chain(other.locals.keys())
            .all(|x| locals_get(&self.locals, x).ord(&locals_get(&other.locals, x)))
            && self.heap.ord(&other.heap)
    }

    pub fn copied(&self, locals: BTreeMap<Id, AbsValue>) -> Self {
        Self {
            reachable: true,
            locals,
            heap: self.heap.clone(),
        }
    }

    pub fn define_local(&mut self, x: Id, v: AbsValue) {
        self.locals.insert(x, v);
    }

    pub fn lookup(&self, x: &Id) -> AbsValue {
        locals_get(&self.locals, x)
    }

    pub fn is_single(&self, loc: &Loc) -> bool {
        !self.heap.merged.contains(loc)
    }

    pub fn get(&self, cfg: &Cfg, rv: &AbsRefValue) -> AbsValue {
        match rv {
            AbsRefValue::Id(x) => self.lookup(x),
            AbsRefValue::Prop(base, key) => self.get_value(cfg, base, key),
        }
    }

    /// Property read on an arbitrary base value: heap objects, completion
    /// records, ASTs, and strings all expose fields.
    pub fn get_value(&self, cfg: &Cfg, base: &AbsValue, key: &AbsValue) -> AbsValue {
        let mut r = AbsValue::bot();
        match &base.comp {
            AbsComp::Top => r = r.join(&AbsValue::top()),
            AbsComp::Map(m) if !m.is_empty() => {
                if let Flat::One(AValue::Str(field)) = key.get_single() {
                    for (kind, elem) in m {
                        match field.as_str() {
                            "Type" => r = r.join(&AbsValue::cons(kind)),
                            "Value" => r = r.join(&AbsValue::of_pure(elem.value.clone())),
                            "Target" => r = r.join(&AbsValue::of_pure(elem.target.clone())),
                            _ => r = r.join(&AbsValue::absent()),
                        }
                    }
                }
            }
            AbsComp::Map(_) => {}
        }
        match base.pure.locv.gamma() {
            None => r = r.join(&AbsValue::top()),
            Some(locs) => {
                for loc in locs {
                    match self.heap.get(loc) {
                        Some(obj) => r = r.join(&obj.get(key)),
                        None => r = r.join(&AbsValue::absent()),
                    }
                }
            }
        }
        match base.pure.astv.gamma() {
            None => r = r.join(&AbsValue::top()),
            Some(asts) => {
                for ast in asts {
                    r = r.join(&ast_field(cfg, *ast, key));
                }
            }
        }
        match base.pure.strv.gamma() {
            None => r = r.join(&AbsValue::top()),
            Some(strs) => {
                for s in strs {
                    match key.get_single() {
                        Flat::One(AValue::Str(f)) if f == "length" => {
                            r = r.join(&AbsValue::math(s.encode_utf16().count() as i128));
                        }
                        Flat::One(AValue::Math(i)) => {
                            let unit =
                                usize::try_from(i).ok().and_then(|i| s.encode_utf16().nth(i));
                            r = r.join(&match unit {
                                Some(c) => AbsValue::code_unit(c),
                                None => AbsValue::absent(),
                            });
                        }
                        _ => {}
                    }
                }
            }
        }
        r
    }

    pub fn update(&mut self, rv: &AbsRefValue, v: AbsValue) {
        match rv {
            AbsRefValue::Id(x) => self.define_local(x.clone(), v),
            AbsRefValue::Prop(base, key) => match base.pure.locv.gamma() {
                None => {
                    // unknown target: weaken every object
                    let locs: Vec<Loc> = self.heap.map.keys().cloned().collect();
                    for loc in locs {
                        self.heap.merged.insert(loc.clone());
                        if let Some(obj) = self.heap.map.get_mut(&loc) {
                            obj.update(key, &v, false);
                        }
                    }
                }
                Some(locs) => {
                    let locs: Vec<Loc> = locs.iter().cloned().collect();
                    let strong = locs.len() == 1 && self.is_single(&locs[0]);
                    for loc in locs {
                        if let Some(obj) = self.heap.map.get_mut(&loc) {
                            obj.update(key, &v, strong);
                        }
                    }
                }
            },
        }
    }

    pub fn delete(&mut self, rv: &AbsRefValue) {
        match rv {
            AbsRefValue::Id(x) => {
                self.locals.remove(x);
            }
            AbsRefValue::Prop(base, key) => {
                if let Some(locs) = base.pure.locv.gamma() {
                    let locs: Vec<Loc> = locs.iter().cloned().collect();
                    let strong = locs.len() == 1 && self.is_single(&locs[0]);
                    for loc in locs {
                        if let Some(obj) = self.heap.map.get_mut(&loc) {
                            obj.delete(key, strong);
                        }
                    }
                }
            }
        }
    }

    /// A reference exists iff reading it yields something other than absent.
    pub fn exists(&self, cfg: &Cfg, rv: &AbsRefValue) -> AbsBool {
        let v = self.get(cfg, rv);
        if v.is_bottom() {
            return AbsBool::Bot;
        }
        let may_absent = v.pure.simplev.contains(&SimpleValue::Absent);
        let non_absent = AbsValue {
            comp: v.comp.clone(),
            pure: AbsPure {
                simplev: v.pure.simplev.map(|s| {
                    if *s == SimpleValue::Absent {
                        None
                    } else {
                        Some(*s)
                    }
                }),
                ..v.pure.clone()
            },
        };
        match (!non_absent.is_bottom(), may_absent) {
            (true, true) => AbsBool::Top,
            (true, false) => AbsBool::True,
            (false, true) => AbsBool::False,
            (false, false) => AbsBool::Bot,
        }
    }

    /// Abstract value equality, including the location rule: a location is
    /// equal to itself only when it denotes a single object.
    pub fn abs_eq(&self, l: &AbsValue, r: &AbsValue) -> AbsValue {
        if l.is_bottom() || r.is_bottom() {
            return AbsValue::bot();
        }
        let mut b = l.eq_lattice(r);
        match (&l.pure.locv, &r.pure.locv) {
            (AbsSet::Set(s1), AbsSet::Set(s2)) => {
                for l1 in s1 {
                    for l2 in s2 {
                        if l1 == l2 {
                            b = b.join(&if self.is_single(l1) {
                                AbsBool::True
                            } else {
                                AbsBool::Top
                            });
                        } else {
                            b = b.join(&AbsBool::False);
                        }
                    }
                }
            }
            (AbsSet::Top, o) | (o, AbsSet::Top) => {
                if o.is_top() || !o.is_bot() {
                    b = b.join(&AbsBool::Top);
                }
            }
        }
        AbsValue::boolv(b)
    }

    pub fn contains(
        &self,
        cfg: &Cfg,
        list: &AbsValue,
        elem: &AbsValue,
        field: Option<&str>,
    ) -> AbsValue {
        let project = |v: &AbsValue| match field {
            Some(f) => self.get_value(cfg, v, &AbsValue::str(f)),
            None => v.clone(),
        };
        let mut b = AbsBool::Bot;
        match list.pure.locv.gamma() {
            None => return AbsValue::boolv(AbsBool::Top),
            Some(locs) => {
                for loc in locs {
                    match self.heap.get(loc) {
                        Some(AbsObj::List(AbsListObj::Fixed(vs))) => {
                            let mut acc = AbsBool::False;
                            for v in vs {
                                acc = acc.or(&self.abs_eq(&project(v), elem).pure.boolv);
                            }
                            b = b.join(&acc);
                        }
                        Some(AbsObj::List(AbsListObj::Merged(v))) => {
                            let eq = self.abs_eq(&project(v), elem).pure.boolv;
                            b = b.join(&if eq.may_true() {
                                AbsBool::Top
                            } else {
                                AbsBool::False
                            });
                        }
                        _ => b = b.join(&AbsBool::Top),
                    }
                }
            }
        }
        AbsValue::boolv(b)
    }

    pub fn duplicated(&self, list: &AbsValue) -> AbsValue {
        let mut b = AbsBool::Bot;
        match list.pure.locv.gamma() {
            None => return AbsValue::boolv(AbsBool::Top),
            Some(locs) => {
                for loc in locs {
                    match self.heap.get(loc) {
                        Some(AbsObj::List(AbsListObj::Fixed(vs))) => {
                            let mut acc = AbsBool::False;
                            for (i, v1) in vs.iter().enumerate() {
                                for v2 in &vs[i + 1..] {
                                    acc = acc.or(&self.abs_eq(v1, v2).pure.boolv);
                                }
                            }
                            b = b.join(&acc);
                        }
                        _ => b = b.join(&AbsBool::Top),
                    }
                }
            }
        }
        AbsValue::boolv(b)
    }

    fn list_locs(&self, locv: &AbsSet<Loc>) -> (Vec<Loc>, bool) {
        let locs: Vec<Loc> = match locv.gamma() {
            None => self.heap.map.keys().cloned().collect(),
            Some(locs) => locs.iter().cloned().collect(),
        };
        let strong = !locv.is_top() && locs.len() == 1 && self.is_single(&locs[0]);
        (locs, strong)
    }

    pub fn append(&mut self, locv: &AbsSet<Loc>, v: &AbsValue) {
        let (locs, strong) = self.list_locs(locv);
        for loc in locs {
            if let Some(AbsObj::List(list)) = self.heap.map.get_mut(&loc) {
                match list {
                    AbsListObj::Fixed(vs) if strong => vs.push(v.clone()),
                    _ => *list = AbsListObj::Merged(Box::new(list.merged_value().join(v))),
                }
            }
        }
    }

    pub fn prepend(&mut self, locv: &AbsSet<Loc>, v: &AbsValue) {
        let (locs, strong) = self.list_locs(locv);
        for loc in locs {
            if let Some(AbsObj::List(list)) = self.heap.map.get_mut(&loc) {
                match list {
                    AbsListObj::Fixed(vs) if strong => vs.insert(0, v.clone()),
                    _ => *list = AbsListObj::Merged(Box::new(list.merged_value().join(v))),
                }
            }
        }
    }

    pub fn remove_elem(&mut self, list: &AbsValue, elem: &AbsValue) {
        let (locs, strong) = self.list_locs(&list.pure.locv);
        for loc in locs {
            let Some(AbsObj::List(l)) = self.heap.get(&loc) else {
                continue;
            };
            let new = match l {
                AbsListObj::Fixed(vs) if strong => AbsListObj::Fixed(
                    vs.iter()
                        .filter(|v| self.abs_eq(v, elem).pure.boolv != AbsBool::True)
                        .cloned()
                        .collect(),
                ),
                // weak removal cannot drop elements
                other => other.clone(),
            };
            if let Some(AbsObj::List(l)) = self.heap.map.get_mut(&loc) {
                *l = new;
            }
        }
    }

    pub fn pop(&mut self, locv: &AbsSet<Loc>, front: bool) -> AbsValue {
        if locv.is_top() {
            return AbsValue::top();
        }
        let (locs, strong) = self.list_locs(locv);
        let mut r = AbsValue::bot();
        for loc in locs {
            if let Some(AbsObj::List(list)) = self.heap.map.get_mut(&loc) {
                match list {
                    AbsListObj::Fixed(vs) if strong => {
                        let v = if front {
                            if vs.is_empty() {
                                None
                            } else {
                                Some(vs.remove(0))
                            }
                        } else {
                            vs.pop()
                        };
                        r = r.join(&v.unwrap_or_else(AbsValue::absent));
                    }
                    _ => {
                        let inner = list.merged_value();
                        *list = AbsListObj::Merged(Box::new(inner.clone()));
                        r = r.join(&inner);
                    }
                }
            }
        }
        r
    }

    pub fn alloc_map(&mut self, loc: Loc, ty: &str, props: Vec<(AValue, AbsValue)>) -> AbsValue {
        let obj = AbsObj::Map {
            ty: ty.to_string(),
            map: props.into_iter().collect(),
        };
        self.heap.alloc(loc.clone(), obj);
        AbsValue::loc(loc)
    }

    pub fn alloc_list(&mut self, loc: Loc, elems: Vec<AbsValue>) -> AbsValue {
        self.heap
            .alloc(loc.clone(), AbsObj::List(AbsListObj::Fixed(elems)));
        AbsValue::loc(loc)
    }

    pub fn alloc_merged_list(&mut self, loc: Loc, elem: AbsValue) -> AbsValue {
        self.heap
            .alloc(loc.clone(), AbsObj::List(AbsListObj::Merged(Box::new(elem))));
        AbsValue::loc(loc)
    }

    pub fn alloc_symbol(&mut self, loc: Loc, desc: AbsValue) -> AbsValue {
        self.heap.alloc(loc.clone(), AbsObj::Symbol(desc));
        AbsValue::loc(loc)
    }

    pub fn copy_obj(&mut self, loc: Loc, from: &AbsValue) -> AbsValue {
        let mut obj: Option<AbsObj> = None;
        match from.pure.locv.gamma() {
            None => obj = Some(AbsObj::Merged),
            Some(locs) => {
                for src in locs {
                    if let Some(o) = self.heap.get(src) {
                        obj = Some(match obj {
                            Some(acc) => acc.join(o),
                            None => o.clone(),
                        });
                    }
                }
            }
        }
        self.heap.alloc(loc.clone(), obj.unwrap_or(AbsObj::Merged));
        AbsValue::loc(loc)
    }

    pub fn keys(&mut self, loc: Loc, map: &AbsValue, int_sorted: bool) -> AbsValue {
        let mut keys: Option<Vec<AValue>> = None;
        if let Some(locs) = map.pure.locv.gamma() {
            if locs.len() == 1 {
                if let Some(AbsObj::Map { map, .. }) = self.heap.get(locs.iter().next().unwrap()) {
                    let mut ks: Vec<AValue> = map.keys().cloned().collect();
                    if int_sorted {
                        ks.sort_by_key(|k| match k {
                            AValue::Str(s) => s.parse::<i128>().unwrap_or(i128::MAX),
                            AValue::Math(n) => *n,
                            _ => i128::MAX,
                        });
                    }
                    keys = Some(ks);
                }
            }
        }
        match keys {
            Some(ks) => {
                let elems = ks.into_iter().map(AbsValue::single).collect();
                self.alloc_list(loc, elems)
            }
            None => self.alloc_merged_list(loc, AbsValue::top()),
        }
    }

    pub fn set_type(&mut self, locv: &AbsSet<Loc>, new_ty: &str) {
        if let Some(locs) = locv.gamma() {
            let locs: Vec<Loc> = locs.iter().cloned().collect();
            for loc in locs {
                if let Some(AbsObj::Map { ty, .. }) = self.heap.map.get_mut(&loc) {
                    *ty = new_ty.to_string();
                }
            }
        }
    }

    /// Merges the callee's exit effects into the caller continuation.
    pub fn do_return(&self, caller: &Self, lhs: &Id, value: AbsValue) -> Self {
        let mut st = Self {
            reachable: true,
            locals: caller.locals.clone(),
            heap: self.heap.join(&caller.heap),
        };
        st.define_local(lhs.clone(), value);
        st
    }
}

// Read an AST field: a child by nonterminal name or by index.
fn ast_field(cfg: &Cfg, ast: AstId, key: &AbsValue) -> AbsValue {
    match key.get_single() {
        Flat::Bot => AbsValue::bot(),
        Flat::One(AValue::Str(name)) => cfg
            .children_named(ast, &name)
            .into_iter()
            .fold(AbsValue::bot(), |acc, child| match child {
                Some(c) => acc.join(&AbsValue::ast(c)),
                None => acc.join(&AbsValue::absent()),
            }),
        Flat::One(AValue::Math(i)) => match cfg.ast(ast) {
            Ast::Syntactic { children, .. } => usize::try_from(i)
                .ok()
                .and_then(|i| children.get(i).copied())
                .map_or_else(AbsValue::absent, |child| match child {
                    Some(c) => AbsValue::ast(c),
                    None => AbsValue::absent(),
                }),
            Ast::Lexical { .. } => AbsValue::absent(),
        },
        Flat::One(_) => AbsValue::absent(),
        Flat::Many => AbsValue::top(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsRet {
    pub value: AbsValue,
    pub state: AbsState,
}

impl AbsRet {
    pub fn bot() -> Self {
        Self {
            value: AbsValue::bot(),
            state: AbsState::bot(),
        }
    }

    pub fn is_bottom(&self) -> bool {
        self.value.is_bottom() && self.state.is_bottom()
    }

    pub fn join(&self, other: &Self) -> Self {
        Self {
            value: self.value.join(&other.value),
            state: self.state.join(&other.state),
        }
    }

    pub fn ord(&self, other: &Self) -> bool {
        self.value.ord(&other.value) && self.state.ord(&other.state)
    }
}

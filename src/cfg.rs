use rustc_hash::FxHashMap;

pub type FuncId = usize;
pub type NodeId = usize;
pub type AstId = usize;
pub type SiteId = u32;

#[derive(Debug, Default)]
pub struct Cfg {
    pub funcs: Vec<Func>,
    pub fname_map: FxHashMap<String, FuncId>,
    pub asts: Vec<Ast>,
    pub grammar: Grammar,
    parses: FxHashMap<(String, String), AstId>,
}

impl Cfg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_func(&mut self, func: Func) -> FuncId {
        let id = self.funcs.len();
        self.fname_map.insert(func.name.clone(), id);
        self.funcs.push(func);
        id
    }

    pub fn func(&self, id: FuncId) -> &Func {
        &self.funcs[id]
    }

    pub fn ast(&self, id: AstId) -> &Ast {
        &self.asts[id]
    }

    pub fn add_lexical(&mut self, name: &str, text: &str) -> AstId {
        let id = self.asts.len();
        self.asts.push(Ast::Lexical {
            name: name.to_string(),
            text: text.to_string(),
            parent: None,
        });
        id
    }

    pub fn add_syntactic(
        &mut self,
        name: &str,
        rhs_idx: usize,
        children: Vec<Option<AstId>>,
    ) -> AstId {
        let id = self.asts.len();
        for child in children.iter().flatten() {
            match &mut self.asts[*child] {
                Ast::Syntactic { parent, .. } | Ast::Lexical { parent, .. } => {
                    *parent = Some(id);
                }
            }
        }
        self.asts.push(Ast::Syntactic {
            name: name.to_string(),
            rhs_idx,
            children,
            parent: None,
        });
        id
    }

    /// Registers the result of parsing `code` with grammar rule `rule`. The
    /// oracle stands in for a full parser front end.
    pub fn register_parse(&mut self, code: &str, rule: &str, ast: AstId) {
        self.parses.insert((code.to_string(), rule.to_string()), ast);
    }

    pub fn parse(&self, code: &str, rule: &str) -> Option<AstId> {
        self.parses
            .get(&(code.to_string(), rule.to_string()))
            .copied()
    }

    /// The AST together with its transparent ancestors, innermost first. An
    /// ancestor is transparent when the child is its only present child.
    pub fn chains(&self, ast: AstId) -> Vec<AstId> {
        let mut chain = vec![ast];
        let mut curr = ast;
        while let Some(parent) = self.ast(curr).parent() {
            let n = match self.ast(parent) {
                Ast::Syntactic { children, .. } => children.iter().flatten().count(),
                Ast::Lexical { .. } => 0,
            };
            if n != 1 {
                break;
            }
            chain.push(parent);
            curr = parent;
        }
        chain
    }

    /// Children of a syntactic AST whose nonterminal matches `nt`.
    pub fn children_named(&self, ast: AstId, nt: &str) -> Vec<Option<AstId>> {
        let Ast::Syntactic {
            name,
            rhs_idx,
            children,
            ..
        } = self.ast(ast)
        else {
            return vec![];
        };
        let Some(prod) = self.grammar.name_map.get(name) else {
            return vec![];
        };
        let rhs = &prod.rhs_vec[*rhs_idx];
        rhs.nts
            .iter()
            .zip(children.iter())
            .filter(|(sym, _)| sym.name == nt)
            .map(|(_, child)| *child)
            .collect()
    }

    /// All present children of a syntactic AST, optional holes flattened out.
    pub fn flattened_children(&self, ast: AstId) -> Vec<AstId> {
        match self.ast(ast) {
            Ast::Syntactic { children, .. } => children.iter().flatten().copied().collect(),
            Ast::Lexical { .. } => vec![],
        }
    }

    pub fn source_text(&self, ast: AstId) -> String {
        match self.ast(ast) {
            Ast::Lexical { text, .. } => text.clone(),
            Ast::Syntactic { children, .. } => children
                .iter()
                .flatten()
                .map(|child| self.source_text(*child))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

#[derive(Debug)]
pub struct Func {
    pub name: String,
    pub params: Vec<Param>,
    pub entry: NodeId,
    pub ret_comp: bool,
    pub nodes: Vec<Node>,
}

impl Func {
    pub fn new(name: &str, params: Vec<Param>, ret_comp: bool) -> Self {
        Self {
            name: name.to_string(),
            params,
            entry: 0,
            ret_comp,
            nodes: vec![],
        }
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub optional: bool,
}

impl Param {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            optional: false,
        }
    }

    pub fn optional(name: &str) -> Self {
        Self {
            name: name.to_string(),
            optional: true,
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    /// A forward edge from this node into a loop head enters the loop; a
    /// non-predecessor edge is the back edge.
    pub loop_pred: bool,
}

impl Node {
    pub fn block(insts: Vec<Inst>, next: Option<NodeId>) -> Self {
        Self {
            kind: NodeKind::Block { insts, next },
            loop_pred: false,
        }
    }

    pub fn call(inst: CallInst, next: Option<NodeId>) -> Self {
        Self {
            kind: NodeKind::Call { inst, next },
            loop_pred: false,
        }
    }

    pub fn branch(kind: BranchKind, cond: Expr, then_: Option<NodeId>, else_: Option<NodeId>) -> Self {
        Self {
            kind: NodeKind::Branch {
                kind,
                cond,
                then_,
                else_,
            },
            loop_pred: false,
        }
    }

    pub fn loop_pred(mut self) -> Self {
        self.loop_pred = true;
        self
    }

    pub fn is_loop(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Branch {
                kind: BranchKind::Loop,
                ..
            }
        )
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Block {
        insts: Vec<Inst>,
        next: Option<NodeId>,
    },
    Call {
        inst: CallInst,
        next: Option<NodeId>,
    },
    Branch {
        kind: BranchKind,
        cond: Expr,
        then_: Option<NodeId>,
        else_: Option<NodeId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    If,
    Loop,
}

#[derive(Debug)]
pub enum Inst {
    IExpr(Expr),
    ILet(Id, Expr),
    IAssign(Ref, Expr),
    IDelete(Ref),
    IPush {
        from: Expr,
        to: Expr,
        front: bool,
    },
    IRemoveElem {
        list: Expr,
        elem: Expr,
    },
    IReturn(Expr),
    IAssert(Expr),
    IPrint(Expr),
    INop,
}

#[derive(Debug)]
pub enum CallInst {
    ICall {
        lhs: Id,
        fexpr: Expr,
        args: Vec<Expr>,
    },
    IMethodCall {
        lhs: Id,
        base: Ref,
        method: String,
        args: Vec<Expr>,
    },
    ISdoCall {
        lhs: Id,
        base: Expr,
        method: String,
        args: Vec<Expr>,
    },
}

impl CallInst {
    pub fn lhs(&self) -> &Id {
        match self {
            Self::ICall { lhs, .. }
            | Self::IMethodCall { lhs, .. }
            | Self::ISdoCall { lhs, .. } => lhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Id {
    Name(String),
    Temp(u32),
}

impl Id {
    pub fn name(s: &str) -> Self {
        Self::Name(s.to_string())
    }
}

#[derive(Debug)]
pub enum Ref {
    Id(Id),
    Prop(Box<Ref>, Box<Expr>),
}

#[derive(Debug)]
pub enum Expr {
    EComp(Box<Expr>, Box<Expr>, Box<Expr>),
    EIsCompletion(Box<Expr>),
    EReturnIfAbrupt(Box<Expr>, bool),
    EPop(Box<Expr>, bool),
    EParse(Box<Expr>, Box<Expr>),
    EGrammar(String, Vec<bool>),
    ESourceText(Box<Expr>),
    EGetChildren(Option<Box<Expr>>, Box<Expr>, SiteId),
    EContains(Box<Expr>, Box<Expr>, Option<String>),
    EDuplicated(Box<Expr>),
    ESubstring(Box<Expr>, Box<Expr>, Box<Expr>),
    EIsArrayIndex(Box<Expr>),
    ERef(Ref),
    EUnary(UOp, Box<Expr>),
    EBinary(BOp, Box<Expr>, Box<Expr>),
    EVariadic(VOp, Vec<Expr>),
    EConvert(COp, Box<Expr>, Option<Box<Expr>>),
    ETypeOf(Box<Expr>),
    ETypeCheck(Box<Expr>, Box<Expr>),
    EClo(String, Vec<String>),
    ECont(String),
    EMap {
        ty: String,
        props: Vec<(Expr, Expr)>,
        site: SiteId,
    },
    EList(Vec<Expr>, SiteId),
    EListConcat(Vec<Expr>, SiteId),
    ESymbol(Box<Expr>, SiteId),
    ECopy(Box<Expr>, SiteId),
    EKeys {
        map: Box<Expr>,
        int_sorted: bool,
        site: SiteId,
    },
    EMath(i128),
    ENumber(f64),
    EBigInt(i128),
    EStr(String),
    EBool(bool),
    ECodeUnit(u16),
    EConst(String),
    EUndef,
    ENull,
    EAbsent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UOp {
    Abs,
    Floor,
    Neg,
    Not,
    BNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BOp {
    Add,
    Sub,
    Mul,
    Pow,
    Div,
    UMod,
    Mod,
    Lt,
    Eq,
    Equal,
    And,
    Or,
    Xor,
    BAnd,
    BOr,
    BXOr,
    LShift,
    SRShift,
    URShift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VOp {
    Min,
    Max,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum COp {
    ToMath,
    ToNumber,
    ToBigInt,
    ToStr,
}

#[derive(Debug)]
pub enum Ast {
    Syntactic {
        name: String,
        rhs_idx: usize,
        children: Vec<Option<AstId>>,
        parent: Option<AstId>,
    },
    Lexical {
        name: String,
        text: String,
        parent: Option<AstId>,
    },
}

impl Ast {
    pub fn name(&self) -> &str {
        match self {
            Self::Syntactic { name, .. } | Self::Lexical { name, .. } => name,
        }
    }

    pub fn parent(&self) -> Option<AstId> {
        match self {
            Self::Syntactic { parent, .. } | Self::Lexical { parent, .. } => *parent,
        }
    }

    pub fn is_syntactic(&self) -> bool {
        matches!(self, Self::Syntactic { .. })
    }
}

#[derive(Debug, Default)]
pub struct Grammar {
    pub name_map: FxHashMap<String, Production>,
}

impl Grammar {
    pub fn add_production(&mut self, name: &str, rhs_vec: Vec<Rhs>) {
        self.name_map.insert(
            name.to_string(),
            Production {
                name: name.to_string(),
                rhs_vec,
            },
        );
    }
}

#[derive(Debug)]
pub struct Production {
    pub name: String,
    pub rhs_vec: Vec<Rhs>,
}

#[derive(Debug)]
pub struct Rhs {
    /// Nonterminal slots of this alternative, aligned with AST children.
    pub nts: Vec<RhsSymbol>,
}

impl Rhs {
    pub fn new(nts: Vec<(&str, bool)>) -> Self {
        Self {
            nts: nts
                .into_iter()
                .map(|(name, optional)| RhsSymbol {
                    name: name.to_string(),
                    optional,
                })
                .collect(),
        }
    }
}

#[derive(Debug)]
pub struct RhsSymbol {
    pub name: String,
    pub optional: bool,
}

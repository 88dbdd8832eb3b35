//! The abstract syntax tree of an Aurion source file.
//!
//! Every node owns its children and records the characters it was parsed from.
//! There are no back-references, so the tree can be freely cloned and shared
//! between threads.

use aurion_errors::location::Span;
use serde::Serialize;

/// An identifier together with where it was written.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    #[must_use]
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        let name = name.into();
        Self { name, span }
    }
}

/// The root of the tree: every contract in a file, in source order.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Ast {
    pub contracts: Vec<Contract>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Contract {
    pub annotations: Vec<Ident>,
    pub name:        Ident,
    pub fields:      Vec<FieldDecl>,
    pub events:      Vec<EventDecl>,

    /// All `init` handlers in the contract. More than one is a semantic error,
    /// so they are all kept for lowering to report.
    pub inits:     Vec<InitHandler>,
    pub functions: Vec<Function>,
    pub span:      Span,
}

/// A storage field declaration such as `owner: address`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FieldDecl {
    pub name: Ident,
    pub ty:   TypeExpr,
    pub span: Span,
}

/// An event declaration such as `event Claimed(to: address, amount: u64)`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EventDecl {
    pub name:   Ident,
    pub params: Vec<Param>,
    pub span:   Span,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct InitHandler {
    pub annotations: Vec<Ident>,
    pub params:      Vec<Param>,
    pub body:        Block,
    pub span:        Span,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Function {
    pub annotations: Vec<Ident>,
    pub visibility:  Visibility,
    pub name:        Ident,
    pub params:      Vec<Param>,
    pub returns:     Option<TypeExpr>,
    pub body:        Block,
    pub span:        Span,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Param {
    pub name: Ident,
    pub ty:   TypeExpr,
}

/// A type as written in source.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: Span,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum TypeExprKind {
    /// An unsigned integer of the given width in bits.
    Uint(u32),
    Bool,
    Address,
    Map(Box<TypeExpr>, Box<TypeExpr>),
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub span:       Span,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum StatementKind {
    Let {
        name:  Ident,
        ty:    Option<TypeExpr>,
        value: Expression,
    },
    Assign {
        target: Place,
        op:     AssignOp,
        value:  Expression,
    },
    Require {
        condition: Expression,
        message:   Option<String>,
    },
    Assert {
        condition: Expression,
    },
    Revert {
        message: Option<String>,
    },

    /// A conditional. An `else if` chain is represented as an else block
    /// holding a single nested `If`.
    If {
        condition:  Expression,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        condition: Expression,
        body:      Block,
    },
    Return(Option<Expression>),
    Emit {
        event: Ident,
        args:  Vec<Expression>,
    },
    Expression(Expression),
}

/// Something that can be assigned to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Place {
    Local(Ident),
    Field(Ident),
    MapEntry { field: Ident, key: Box<Expression> },
}

impl Place {
    /// The span covering the whole place.
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Place::Local(ident) | Place::Field(ident) => ident.span.clone(),
            Place::MapEntry { field, key } => field.span.start..key.span.end,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

impl AssignOp {
    /// The arithmetic operator a compound assignment applies, if any.
    #[must_use]
    pub fn binary_op(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Set => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub span: Span,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum ExpressionKind {
    /// An integer literal, kept as written so that lowering can check that it
    /// fits the type it is used at.
    Int { digits: String, radix: u32 },
    Bool(bool),
    Str(String),
    Var(Ident),
    Field(Ident),
    MapIndex {
        field: Ident,
        key:   Box<Expression>,
    },
    SelfCall {
        function: Ident,
        args:     Vec<Expression>,
    },
    Env(EnvVar),
    ExternalCall {
        kind:   ExternalKind,
        target: Box<Expression>,
        amount: Box<Expression>,
    },
    Binary {
        op:  BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Unary {
        op:      UnaryOp,
        operand: Box<Expression>,
    },
}

/// The values the execution environment provides.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum EnvVar {
    /// `msg.sender`
    Sender,
    /// `msg.value`
    Value,
    /// `block.timestamp`
    Timestamp,
    /// `block.number`
    BlockNumber,
    /// `tx.origin`
    Origin,
}

impl EnvVar {
    /// Looks up the environment variable written `object.member`.
    #[must_use]
    pub fn from_parts(object: &str, member: &str) -> Option<Self> {
        let var = match (object, member) {
            ("msg", "sender") => Self::Sender,
            ("msg", "value") => Self::Value,
            ("block", "timestamp") => Self::Timestamp,
            ("block", "number") => Self::BlockNumber,
            ("tx", "origin") => Self::Origin,
            _ => return None,
        };
        Some(var)
    }

    /// The environment variable as it is written in source.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sender => "msg.sender",
            Self::Value => "msg.value",
            Self::Timestamp => "block.timestamp",
            Self::BlockNumber => "block.number",
            Self::Origin => "tx.origin",
        }
    }

    /// All environment variables.
    pub const ALL: [EnvVar; 5] = [
        Self::Sender,
        Self::Value,
        Self::Timestamp,
        Self::BlockNumber,
        Self::Origin,
    ];
}

/// The two builtin ways of calling out of a contract.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum ExternalKind {
    /// `transfer(to, amount)` reverts the whole transaction if it fails.
    Transfer,

    /// `call(target, amount)` returns whether it succeeded.
    Call,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Checks if the operator is arithmetic on integers.
    #[must_use]
    pub fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod)
    }

    /// Checks if the operator compares two values, producing a `bool`.
    #[must_use]
    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    /// Checks if the operator combines two `bool`s.
    #[must_use]
    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    /// The operator as it is written in source.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum UnaryOp {
    Not,
}

/// A borrowed view of any node in the tree, for code that wants to treat
/// nodes uniformly.
#[derive(Clone, Copy, Debug)]
pub enum AstNode<'a> {
    Contract(&'a Contract),
    FieldDecl(&'a FieldDecl),
    InitHandler(&'a InitHandler),
    Function(&'a Function),
    Statement(&'a Statement),
    Expression(&'a Expression),
}

impl<'a> AstNode<'a> {
    /// The span of the node.
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            AstNode::Contract(n) => n.span.clone(),
            AstNode::FieldDecl(n) => n.span.clone(),
            AstNode::InitHandler(n) => n.span.clone(),
            AstNode::Function(n) => n.span.clone(),
            AstNode::Statement(n) => n.span.clone(),
            AstNode::Expression(n) => n.span.clone(),
        }
    }

    /// The direct children of the node, in source order.
    #[must_use]
    pub fn children(&self) -> Vec<AstNode<'a>> {
        match *self {
            AstNode::Contract(contract) => {
                let mut children = Vec::new();
                children.extend(contract.fields.iter().map(AstNode::FieldDecl));
                children.extend(contract.inits.iter().map(AstNode::InitHandler));
                children.extend(contract.functions.iter().map(AstNode::Function));
                children.sort_by_key(|child| child.span().start);
                children
            }
            AstNode::FieldDecl(_) => Vec::new(),
            AstNode::InitHandler(init) => block_children(&init.body),
            AstNode::Function(function) => block_children(&function.body),
            AstNode::Statement(statement) => statement_children(statement),
            AstNode::Expression(expression) => expression_children(expression),
        }
    }
}

fn block_children(block: &Block) -> Vec<AstNode<'_>> {
    block.statements.iter().map(AstNode::Statement).collect()
}

fn statement_children(statement: &Statement) -> Vec<AstNode<'_>> {
    match &statement.kind {
        StatementKind::Let { value, .. } => vec![AstNode::Expression(value)],
        StatementKind::Assign { target, value, .. } => {
            let mut children = Vec::new();
            if let Place::MapEntry { key, .. } = target {
                children.push(AstNode::Expression(key.as_ref()));
            }
            children.push(AstNode::Expression(value));
            children
        }
        StatementKind::Require { condition, .. } | StatementKind::Assert { condition } => {
            vec![AstNode::Expression(condition)]
        }
        StatementKind::Revert { .. } | StatementKind::Return(None) => Vec::new(),
        StatementKind::If {
            condition,
            then_block,
            else_block,
        } => {
            let mut children = vec![AstNode::Expression(condition)];
            children.extend(block_children(then_block));
            if let Some(else_block) = else_block {
                children.extend(block_children(else_block));
            }
            children
        }
        StatementKind::While { condition, body } => {
            let mut children = vec![AstNode::Expression(condition)];
            children.extend(block_children(body));
            children
        }
        StatementKind::Return(Some(value)) | StatementKind::Expression(value) => {
            vec![AstNode::Expression(value)]
        }
        StatementKind::Emit { args, .. } => args.iter().map(AstNode::Expression).collect(),
    }
}

fn expression_children(expression: &Expression) -> Vec<AstNode<'_>> {
    match &expression.kind {
        ExpressionKind::Int { .. }
        | ExpressionKind::Bool(_)
        | ExpressionKind::Str(_)
        | ExpressionKind::Var(_)
        | ExpressionKind::Field(_)
        | ExpressionKind::Env(_) => Vec::new(),
        ExpressionKind::MapIndex { key, .. } => vec![AstNode::Expression(key)],
        ExpressionKind::SelfCall { args, .. } => args.iter().map(AstNode::Expression).collect(),
        ExpressionKind::ExternalCall { target, amount, .. } => {
            vec![AstNode::Expression(target), AstNode::Expression(amount)]
        }
        ExpressionKind::Binary { lhs, rhs, .. } => {
            vec![AstNode::Expression(lhs), AstNode::Expression(rhs)]
        }
        ExpressionKind::Unary { operand, .. } => vec![AstNode::Expression(operand)],
    }
}

impl Ast {
    /// Visits every node in the tree in pre-order.
    #[must_use]
    pub fn nodes(&self) -> Vec<AstNode<'_>> {
        let mut out = Vec::new();
        let mut stack = self.contracts.iter().rev().map(AstNode::Contract).collect::<Vec<_>>();
        while let Some(node) = stack.pop() {
            stack.extend(node.children().into_iter().rev());
            out.push(node);
        }
        out
    }

    /// Finds the contract with the given name.
    #[must_use]
    pub fn contract(&self, name: &str) -> Option<&Contract> {
        self.contracts.iter().find(|c| c.name.name == name)
    }
}

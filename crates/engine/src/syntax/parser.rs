//! A recursive descent parser from tokens to the [`Ast`].
//!
//! The parser never gives up on a file. A malformed member of a contract is
//! skipped up to the next line that starts a new member, and a malformed
//! top-level declaration is skipped up to the next `contract` keyword, so a
//! single typo does not hide the diagnostics for the rest of the file.

use aurion_errors::{
    location::{LineIndex, Span},
    syntax::SyntaxDiagnostic,
};

use crate::{
    constant::MAX_NESTING_DEPTH,
    syntax::{
        ast::{
            AssignOp,
            Ast,
            BinaryOp,
            Block,
            Contract,
            EnvVar,
            EventDecl,
            Expression,
            ExpressionKind,
            ExternalKind,
            FieldDecl,
            Function,
            Ident,
            InitHandler,
            Param,
            Place,
            Statement,
            StatementKind,
            TypeExpr,
            TypeExprKind,
            UnaryOp,
            Visibility,
        },
        token::{Keyword, Punct, Spanned, Token},
    },
};

type PResult<T> = Result<T, SyntaxDiagnostic>;

/// The binary operators, grouped by precedence from loosest to tightest.
const PRECEDENCE: [&[(Punct, BinaryOp)]; 6] = [
    &[(Punct::OrOr, BinaryOp::Or)],
    &[(Punct::AndAnd, BinaryOp::And)],
    &[(Punct::EqEq, BinaryOp::Eq), (Punct::NotEq, BinaryOp::Ne)],
    &[
        (Punct::Lt, BinaryOp::Lt),
        (Punct::Le, BinaryOp::Le),
        (Punct::Gt, BinaryOp::Gt),
        (Punct::Ge, BinaryOp::Ge),
    ],
    &[(Punct::Plus, BinaryOp::Add), (Punct::Minus, BinaryOp::Sub)],
    &[
        (Punct::Star, BinaryOp::Mul),
        (Punct::Slash, BinaryOp::Div),
        (Punct::Percent, BinaryOp::Mod),
    ],
];

const TYPE_HINT: &str = "expected one of u8, u16, u32, u64, u128, bool, address or map<K, V>";

/// The parser state for a single file.
pub struct Parser<'a> {
    tokens:      &'a [Spanned<Token>],
    index:       &'a LineIndex,
    pos:         usize,
    diagnostics: Vec<SyntaxDiagnostic>,

    /// The number of `{` consumed without a matching `}`.
    brace_depth: usize,

    /// The current depth of nested blocks and expressions.
    nesting: usize,
}

impl<'a> Parser<'a> {
    /// Creates a parser over `tokens`, using `index` to compute locations.
    #[must_use]
    pub fn new(tokens: &'a [Spanned<Token>], index: &'a LineIndex) -> Self {
        Self {
            tokens,
            index,
            pos: 0,
            diagnostics: Vec::new(),
            brace_depth: 0,
            nesting: 0,
        }
    }

    /// Parses the whole token stream, returning the (possibly partial) tree
    /// and every diagnostic encountered.
    #[must_use]
    pub fn parse_program(mut self) -> (Ast, Vec<SyntaxDiagnostic>) {
        let mut contracts = Vec::new();
        while self.peek().is_some() {
            let start = self.pos;
            match self.contract() {
                Ok(contract) => contracts.push(contract),
                Err(diagnostic) => {
                    self.diagnostics.push(diagnostic);
                    self.recover_to_contract(start);
                }
            }
        }

        (Ast { contracts }, self.diagnostics)
    }

    // Token handling

    fn peek(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(token, _)| token)
    }

    fn at_punct(&self, punct: Punct) -> bool {
        self.peek() == Some(&Token::Punct(punct))
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        self.peek() == Some(&Token::Keyword(keyword))
    }

    /// The span of the current token, or an empty span at the end of the last
    /// token if the stream is exhausted.
    fn span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, span)) => span.clone(),
            None => {
                let end = self.prev_end();
                end..end
            }
        }
    }

    /// The end of the most recently consumed token.
    fn prev_end(&self) -> usize {
        match self.pos.checked_sub(1).and_then(|p| self.tokens.get(p)) {
            Some((_, span)) => span.end,
            None => 0,
        }
    }

    fn bump(&mut self) -> Option<Spanned<Token>> {
        let (token, span) = self.tokens.get(self.pos)?.clone();
        self.pos += 1;
        match token {
            Token::Punct(Punct::LBrace) => self.brace_depth += 1,
            Token::Punct(Punct::RBrace) => self.brace_depth = self.brace_depth.saturating_sub(1),
            _ => {}
        }
        Some((token, span))
    }

    /// Checks if the current token is the first token on its line.
    fn at_line_start(&self) -> bool {
        let Some((_, current)) = self.tokens.get(self.pos) else {
            return false;
        };
        match self.pos.checked_sub(1).and_then(|p| self.tokens.get(p)) {
            Some((_, previous)) => self.index.line(previous.start) < self.index.line(current.start),
            None => true,
        }
    }

    fn error(&self, message: impl Into<String>, span: Span) -> SyntaxDiagnostic {
        SyntaxDiagnostic::new(message, self.index.location(span.start), span)
    }

    fn expected(&self, what: &str) -> SyntaxDiagnostic {
        let found = match self.peek() {
            Some(token) => format!("`{token}`"),
            None => "end of input".to_string(),
        };
        self.error(format!("Expected {what}, found {found}"), self.span())
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.at_punct(punct) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct) -> PResult<Span> {
        if self.at_punct(punct) {
            let span = self.span();
            self.bump();
            Ok(span)
        } else {
            Err(self.expected(&format!("`{}`", punct.as_str())))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> PResult<Span> {
        if self.at_keyword(keyword) {
            let span = self.span();
            self.bump();
            Ok(span)
        } else {
            Err(self.expected(&format!("`{}`", keyword.as_str())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> PResult<Ident> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let ident = Ident::new(name.clone(), self.span());
                self.bump();
                Ok(ident)
            }
            _ => Err(self.expected(what)),
        }
    }

    fn expect_string(&mut self) -> PResult<String> {
        match self.peek() {
            Some(Token::Str(text)) => {
                let text = text.clone();
                self.bump();
                Ok(text)
            }
            _ => Err(self.expected("a string literal")),
        }
    }

    /// Enters one level of nesting, failing if the input nests too deeply.
    fn enter(&mut self) -> PResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING_DEPTH {
            return Err(self.error(
                format!("Nesting exceeds the maximum depth of {MAX_NESTING_DEPTH}"),
                self.span(),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    // Recovery

    /// Skips to the next `contract` keyword, always making progress.
    fn recover_to_contract(&mut self, start: usize) {
        if self.pos == start {
            self.bump();
        }
        while self.peek().is_some() && !self.at_keyword(Keyword::Contract) {
            self.bump();
        }
        self.brace_depth = 0;
        self.nesting = 0;
    }

    /// Skips to the start of the next member of the contract whose body is at
    /// `body_depth`, or to its closing brace.
    fn recover_member(&mut self, start: usize, body_depth: usize) {
        if self.pos == start && !self.at_punct(Punct::RBrace) {
            self.bump();
        }
        self.nesting = 0;

        while let Some(token) = self.peek() {
            let at_body = self.brace_depth == body_depth;
            let starts_member = matches!(
                token,
                Token::Ident(_)
                    | Token::Keyword(Keyword::Init | Keyword::Event | Keyword::Private)
                    | Token::Punct(Punct::At)
            );
            match token {
                Token::Keyword(Keyword::Contract) => {
                    self.brace_depth = body_depth;
                    return;
                }
                Token::Punct(Punct::RBrace) if at_body => return,
                _ if at_body && starts_member && self.at_line_start() => return,
                _ => {
                    self.bump();
                }
            }
        }
    }

    // Declarations

    fn annotations(&mut self) -> PResult<Vec<Ident>> {
        let mut annotations = Vec::new();
        while self.eat_punct(Punct::At) {
            annotations.push(self.expect_ident("an annotation name")?);
        }
        Ok(annotations)
    }

    fn contract(&mut self) -> PResult<Contract> {
        let start = self.span().start;
        let annotations = self.annotations()?;
        self.expect_keyword(Keyword::Contract)?;
        let name = self.expect_ident("a contract name")?;
        self.expect_punct(Punct::LBrace)?;
        let body_depth = self.brace_depth;

        let mut contract = Contract {
            annotations,
            name,
            fields: Vec::new(),
            events: Vec::new(),
            inits: Vec::new(),
            functions: Vec::new(),
            span: start..start,
        };

        loop {
            match self.peek() {
                None => {
                    let diagnostic = self
                        .error(
                            format!("Contract `{}` is never closed", contract.name.name),
                            contract.name.span.clone(),
                        )
                        .with_hint("add a `}` at the end of the contract");
                    self.diagnostics.push(diagnostic);
                    break;
                }
                Some(Token::Punct(Punct::RBrace)) => {
                    self.bump();
                    break;
                }
                Some(Token::Keyword(Keyword::Contract)) => {
                    let diagnostic = self.expected(&format!(
                        "`}}` to close contract `{}`",
                        contract.name.name
                    ));
                    self.diagnostics.push(diagnostic);
                    break;
                }
                Some(_) => {
                    let member_start = self.pos;
                    if let Err(diagnostic) = self.member(&mut contract) {
                        self.diagnostics.push(diagnostic);
                        self.recover_member(member_start, body_depth);
                    }
                }
            }
        }

        self.brace_depth = 0;
        contract.span = start..self.prev_end();
        Ok(contract)
    }

    fn member(&mut self, contract: &mut Contract) -> PResult<()> {
        let start = self.span().start;
        let annotations = self.annotations()?;

        match self.peek() {
            Some(Token::Keyword(Keyword::Init)) => {
                self.bump();
                let params = self.params()?;
                let body = self.block()?;
                contract.inits.push(InitHandler {
                    annotations,
                    params,
                    body,
                    span: start..self.prev_end(),
                });
            }
            Some(Token::Keyword(Keyword::Event)) => {
                self.bump();
                let name = self.expect_ident("an event name")?;
                let params = self.params()?;
                contract.events.push(EventDecl {
                    name,
                    params,
                    span: start..self.prev_end(),
                });
            }
            Some(Token::Keyword(Keyword::Private)) => {
                self.bump();
                let function = self.function(annotations, Visibility::Private, start)?;
                contract.functions.push(function);
            }
            Some(Token::Ident(_)) => match self.peek_at(1) {
                Some(Token::Punct(Punct::Colon)) => {
                    let name = self.expect_ident("a field name")?;
                    self.expect_punct(Punct::Colon)?;
                    let ty = self.type_expr()?;
                    contract.fields.push(FieldDecl {
                        name,
                        ty,
                        span: start..self.prev_end(),
                    });
                }
                Some(Token::Punct(Punct::LParen)) => {
                    let function = self.function(annotations, Visibility::Public, start)?;
                    contract.functions.push(function);
                }
                _ => {
                    self.bump();
                    return Err(self.expected("`:` after a field name or `(` after a function name"));
                }
            },
            _ => return Err(self.expected("a field, event, `init` or function declaration")),
        }

        Ok(())
    }

    fn function(
        &mut self,
        annotations: Vec<Ident>,
        visibility: Visibility,
        start: usize,
    ) -> PResult<Function> {
        let name = self.expect_ident("a function name")?;
        let params = self.params()?;
        let returns = if self.eat_punct(Punct::Arrow) {
            Some(self.type_expr()?)
        } else {
            None
        };
        let body = self.block()?;

        Ok(Function {
            annotations,
            visibility,
            name,
            params,
            returns,
            body,
            span: start..self.prev_end(),
        })
    }

    fn params(&mut self) -> PResult<Vec<Param>> {
        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        while !self.eat_punct(Punct::RParen) {
            let name = self.expect_ident("a parameter name")?;
            self.expect_punct(Punct::Colon)?;
            let ty = self.type_expr()?;
            params.push(Param { name, ty });
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen)?;
                break;
            }
        }
        Ok(params)
    }

    fn type_expr(&mut self) -> PResult<TypeExpr> {
        let name = match self.expect_ident("a type") {
            Ok(name) => name,
            Err(diagnostic) => return Err(diagnostic.with_hint(TYPE_HINT)),
        };

        let kind = match name.name.as_str() {
            "u8" => TypeExprKind::Uint(8),
            "u16" => TypeExprKind::Uint(16),
            "u32" => TypeExprKind::Uint(32),
            "u64" => TypeExprKind::Uint(64),
            "u128" => TypeExprKind::Uint(128),
            "bool" => TypeExprKind::Bool,
            "address" => TypeExprKind::Address,
            "map" => {
                self.enter()?;
                self.expect_punct(Punct::Lt)?;
                let key = self.type_expr()?;
                self.expect_punct(Punct::Comma)?;
                let value = self.type_expr()?;
                self.expect_punct(Punct::Gt)?;
                self.leave();
                TypeExprKind::Map(Box::new(key), Box::new(value))
            }
            other => {
                return Err(self
                    .error(format!("Unknown type `{other}`"), name.span)
                    .with_hint(TYPE_HINT))
            }
        };

        Ok(TypeExpr {
            kind,
            span: name.span.start..self.prev_end(),
        })
    }

    // Statements

    fn block(&mut self) -> PResult<Block> {
        self.enter()?;
        let open = self.expect_punct(Punct::LBrace)?;
        let mut statements = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(self
                        .error("Block is never closed", open)
                        .with_hint("add a matching `}`"))
                }
                Some(Token::Punct(Punct::RBrace)) => {
                    self.bump();
                    break;
                }
                Some(_) => statements.push(self.statement()?),
            }
        }
        self.leave();

        Ok(Block {
            statements,
            span: open.start..self.prev_end(),
        })
    }

    fn statement(&mut self) -> PResult<Statement> {
        let start = self.span().start;
        let kind = match self.peek() {
            Some(Token::Keyword(Keyword::Let)) => {
                self.bump();
                let name = self.expect_ident("a variable name")?;
                let ty = if self.eat_punct(Punct::Colon) {
                    Some(self.type_expr()?)
                } else {
                    None
                };
                self.expect_punct(Punct::Assign)?;
                let value = self.expression()?;
                StatementKind::Let { name, ty, value }
            }
            Some(Token::Keyword(Keyword::Require)) => {
                self.bump();
                self.expect_punct(Punct::LParen)?;
                let condition = self.expression()?;
                let message = if self.eat_punct(Punct::Comma) {
                    Some(self.expect_string()?)
                } else {
                    None
                };
                self.expect_punct(Punct::RParen)?;
                StatementKind::Require { condition, message }
            }
            Some(Token::Keyword(Keyword::Assert)) => {
                self.bump();
                self.expect_punct(Punct::LParen)?;
                let condition = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                StatementKind::Assert { condition }
            }
            Some(Token::Keyword(Keyword::Revert)) => {
                self.bump();
                self.expect_punct(Punct::LParen)?;
                let message = if matches!(self.peek(), Some(Token::Str(_))) {
                    Some(self.expect_string()?)
                } else {
                    None
                };
                self.expect_punct(Punct::RParen)?;
                StatementKind::Revert { message }
            }
            Some(Token::Keyword(Keyword::If)) => self.if_statement()?,
            Some(Token::Keyword(Keyword::While)) => {
                self.bump();
                let condition = self.expression()?;
                let body = self.block()?;
                StatementKind::While { condition, body }
            }
            Some(Token::Keyword(Keyword::Return)) => {
                let keyword = self.span();
                self.bump();

                // A return value must start on the same line as the `return`, which is
                // what allows the statement to be told apart from the next one.
                let has_value = !self.at_punct(Punct::RBrace)
                    && self.tokens.get(self.pos).is_some_and(|(_, span)| {
                        self.index.line(span.start) == self.index.line(keyword.start)
                    });
                let value = if has_value {
                    Some(self.expression()?)
                } else {
                    None
                };
                StatementKind::Return(value)
            }
            Some(Token::Keyword(Keyword::Emit)) => {
                self.bump();
                let event = self.expect_ident("an event name")?;
                let args = self.call_args()?;
                StatementKind::Emit { event, args }
            }
            _ => {
                let expression = self.expression()?;
                match self.assign_op() {
                    Some(op) => {
                        self.bump();
                        let target = Self::place(expression).map_err(|span| {
                            self.error("Invalid assignment target", span)
                                .with_hint("only locals, `self.field` and `self.map[key]` can be assigned")
                        })?;
                        let value = self.expression()?;
                        StatementKind::Assign { target, op, value }
                    }
                    None => StatementKind::Expression(expression),
                }
            }
        };

        Ok(Statement {
            kind,
            span: start..self.prev_end(),
        })
    }

    fn if_statement(&mut self) -> PResult<StatementKind> {
        self.expect_keyword(Keyword::If)?;
        let condition = self.expression()?;
        let then_block = self.block()?;
        let else_block = if self.at_keyword(Keyword::Else) {
            self.bump();
            if self.at_keyword(Keyword::If) {
                let nested = self.statement()?;
                let span = nested.span.clone();
                Some(Block {
                    statements: vec![nested],
                    span,
                })
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };

        Ok(StatementKind::If {
            condition,
            then_block,
            else_block,
        })
    }

    fn assign_op(&self) -> Option<AssignOp> {
        match self.peek()? {
            Token::Punct(Punct::Assign) => Some(AssignOp::Set),
            Token::Punct(Punct::PlusAssign) => Some(AssignOp::Add),
            Token::Punct(Punct::MinusAssign) => Some(AssignOp::Sub),
            Token::Punct(Punct::StarAssign) => Some(AssignOp::Mul),
            Token::Punct(Punct::SlashAssign) => Some(AssignOp::Div),
            _ => None,
        }
    }

    /// Converts an expression on the left of an assignment into a place,
    /// returning the expression's span if it cannot be assigned to.
    fn place(expression: Expression) -> Result<Place, Span> {
        match expression.kind {
            ExpressionKind::Var(ident) => Ok(Place::Local(ident)),
            ExpressionKind::Field(ident) => Ok(Place::Field(ident)),
            ExpressionKind::MapIndex { field, key } => Ok(Place::MapEntry { field, key }),
            _ => Err(expression.span),
        }
    }

    // Expressions

    fn expression(&mut self) -> PResult<Expression> {
        self.enter()?;
        let expression = self.binary(0)?;
        self.leave();
        Ok(expression)
    }

    fn binary(&mut self, level: usize) -> PResult<Expression> {
        let Some(operators) = PRECEDENCE.get(level) else {
            return self.unary();
        };

        let mut lhs = self.binary(level + 1)?;
        loop {
            let op = operators
                .iter()
                .find(|(punct, _)| self.at_punct(*punct))
                .map(|(_, op)| *op);
            let Some(op) = op else { break };
            self.bump();

            let rhs = self.binary(level + 1)?;
            lhs = Expression {
                span: lhs.span.start..rhs.span.end,
                kind: ExpressionKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expression> {
        if self.at_punct(Punct::Bang) {
            let start = self.span().start;
            self.bump();
            self.enter()?;
            let operand = self.unary()?;
            self.leave();
            return Ok(Expression {
                span: start..operand.span.end,
                kind: ExpressionKind::Unary {
                    op:      UnaryOp::Not,
                    operand: Box::new(operand),
                },
            });
        }
        self.primary()
    }

    fn call_args(&mut self) -> PResult<Vec<Expression>> {
        self.expect_punct(Punct::LParen)?;
        let mut args = Vec::new();
        while !self.eat_punct(Punct::RParen) {
            args.push(self.expression()?);
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen)?;
                break;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> PResult<Expression> {
        let start = self.span().start;
        let Some(token) = self.peek().cloned() else {
            return Err(self.expected("an expression"));
        };

        let kind = match token {
            Token::Int(digits) => {
                self.bump();
                ExpressionKind::Int { digits, radix: 10 }
            }
            Token::Hex(digits) => {
                self.bump();
                ExpressionKind::Int { digits, radix: 16 }
            }
            Token::Str(text) => {
                self.bump();
                ExpressionKind::Str(text)
            }
            Token::Keyword(Keyword::True) => {
                self.bump();
                ExpressionKind::Bool(true)
            }
            Token::Keyword(Keyword::False) => {
                self.bump();
                ExpressionKind::Bool(false)
            }
            Token::Keyword(Keyword::SelfValue) => {
                self.bump();
                self.expect_punct(Punct::Dot)?;
                let member = self.expect_ident("a field or function name after `self.`")?;
                if self.at_punct(Punct::LParen) {
                    let args = self.call_args()?;
                    ExpressionKind::SelfCall {
                        function: member,
                        args,
                    }
                } else if self.eat_punct(Punct::LBracket) {
                    let key = self.expression()?;
                    self.expect_punct(Punct::RBracket)?;
                    ExpressionKind::MapIndex {
                        field: member,
                        key:   Box::new(key),
                    }
                } else {
                    ExpressionKind::Field(member)
                }
            }
            Token::Ident(name) => self.identifier_expression(name)?,
            Token::Punct(Punct::LParen) => {
                self.bump();
                let inner = self.expression()?;
                self.expect_punct(Punct::RParen)?;
                return Ok(Expression {
                    kind: inner.kind,
                    span: start..self.prev_end(),
                });
            }
            _ => return Err(self.expected("an expression")),
        };

        Ok(Expression {
            kind,
            span: start..self.prev_end(),
        })
    }

    /// Parses an expression starting with the identifier `name`, which may be a
    /// local variable, an environment value or a builtin call.
    fn identifier_expression(&mut self, name: String) -> PResult<ExpressionKind> {
        let span = self.span();
        let is_env_object = matches!(name.as_str(), "msg" | "block" | "tx");
        let next = self.peek_at(1).cloned();

        match next {
            Some(Token::Punct(Punct::Dot)) if is_env_object => {
                self.bump();
                self.bump();
                let member = self.expect_ident(&format!("a member of `{name}`"))?;
                EnvVar::from_parts(&name, &member.name)
                    .map(ExpressionKind::Env)
                    .ok_or_else(|| {
                        self.error(
                            format!("Unknown environment value `{name}.{}`", member.name),
                            span.start..member.span.end,
                        )
                        .with_hint("expected msg.sender, msg.value, block.timestamp, block.number or tx.origin")
                    })
            }
            Some(Token::Punct(Punct::LParen)) => {
                let kind = match name.as_str() {
                    "transfer" => ExternalKind::Transfer,
                    "call" => ExternalKind::Call,
                    _ => {
                        return Err(self
                            .error(format!("Unknown function `{name}`"), span)
                            .with_hint(format!("internal functions are called as `self.{name}(...)`")))
                    }
                };
                self.bump();
                let mut args = self.call_args()?;
                if args.len() != 2 {
                    return Err(self
                        .error(
                            format!("`{name}` expects 2 arguments but was given {}", args.len()),
                            span.start..self.prev_end(),
                        )
                        .with_hint(format!("use `{name}(target, amount)`")));
                }
                let amount = args.pop().map(Box::new);
                let target = args.pop().map(Box::new);
                match (target, amount) {
                    (Some(target), Some(amount)) => Ok(ExpressionKind::ExternalCall {
                        kind,
                        target,
                        amount,
                    }),
                    _ => Err(self.error("Malformed call", span)),
                }
            }
            _ => {
                self.bump();
                Ok(ExpressionKind::Var(Ident::new(name, span)))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::syntax::{
        ast::{BinaryOp, EnvVar, ExpressionKind, StatementKind, TypeExprKind, Visibility},
        parse,
        parse_recovering,
    };

    #[test]
    fn can_parse_fields_and_functions() -> anyhow::Result<()> {
        let source = r"
            @nonReentrant
            contract Bank {
                owner: address
                balances: map<address, u64>

                event Deposited(who: address, amount: u64)

                init() {
                    self.owner = msg.sender
                }

                private helper(x: u64) -> u64 {
                    return x * 2
                }

                deposit() {
                    self.balances[msg.sender] += msg.value
                    emit Deposited(msg.sender, msg.value)
                }
            }
        ";
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        let contract = &ast.contracts[0];

        assert_eq!(contract.name.name, "Bank");
        assert_eq!(contract.annotations[0].name, "nonReentrant");
        assert_eq!(contract.fields.len(), 2);
        assert!(matches!(contract.fields[1].ty.kind, TypeExprKind::Map(_, _)));
        assert_eq!(contract.events[0].params.len(), 2);
        assert_eq!(contract.inits.len(), 1);
        assert_eq!(contract.functions.len(), 2);
        assert_eq!(contract.functions[0].visibility, Visibility::Private);
        assert_eq!(contract.functions[1].visibility, Visibility::Public);

        Ok(())
    }

    #[test]
    fn respects_operator_precedence() -> anyhow::Result<()> {
        let source = "contract A { f() -> u64 { return 1 + 2 * 3 } }";
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        let StatementKind::Return(Some(value)) = &ast.contracts[0].functions[0].body.statements[0].kind
        else {
            panic!("expected a return statement");
        };
        let ExpressionKind::Binary { op, rhs, .. } = &value.kind else {
            panic!("expected a binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(rhs.kind, ExpressionKind::Binary { op: BinaryOp::Mul, .. }));

        Ok(())
    }

    #[test]
    fn return_without_value_ends_at_the_line() -> anyhow::Result<()> {
        let source = "contract A {\n x: u64\n f() {\n  if self.x > 0 {\n   return\n  }\n  self.x = 1\n }\n}";
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        let body = &ast.contracts[0].functions[0].body.statements;
        assert_eq!(body.len(), 2);
        assert!(matches!(body[1].kind, StatementKind::Assign { .. }));

        Ok(())
    }

    #[test]
    fn parses_environment_values() -> anyhow::Result<()> {
        let source = "contract A { f() { require(tx.origin == msg.sender, \"eoa\") } }";
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        let StatementKind::Require { condition, message } =
            &ast.contracts[0].functions[0].body.statements[0].kind
        else {
            panic!("expected a require");
        };
        assert_eq!(message.as_deref(), Some("eoa"));
        let ExpressionKind::Binary { lhs, .. } = &condition.kind else {
            panic!("expected a comparison");
        };
        assert_eq!(lhs.kind, ExpressionKind::Env(EnvVar::Origin));

        Ok(())
    }

    #[test]
    fn recovers_at_the_next_member() {
        let source = "contract A {\n  x: u65\n  y: u64\n  f( {\n  }\n  g() { }\n}\n";
        let outcome = parse_recovering(source);

        assert_eq!(outcome.diagnostics.len(), 2);
        assert_eq!(outcome.diagnostics[0].location.line, 2);
        assert_eq!(outcome.diagnostics[1].location.line, 4);

        let contract = &outcome.ast.contracts[0];
        assert_eq!(contract.fields.len(), 1);
        assert_eq!(contract.functions.len(), 1);
        assert_eq!(contract.functions[0].name.name, "g");
    }

    #[test]
    fn recovers_at_the_next_contract() {
        let source = "contrct A { }\ncontract B { x: u64 }\nfoo\ncontract C { }";
        let outcome = parse_recovering(source);

        assert_eq!(outcome.diagnostics.len(), 2);
        assert_eq!(outcome.diagnostics[0].location.line, 1);
        assert_eq!(outcome.diagnostics[1].location.line, 3);
        let names = outcome
            .ast
            .contracts
            .iter()
            .map(|c| c.name.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["B", "C"]);
    }

    #[test]
    fn reports_unclosed_contracts() {
        let outcome = parse_recovering("contract A {\n  x: u64\n");
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].location.line, 1);
        assert_eq!(outcome.ast.contracts[0].fields.len(), 1);
    }

    #[test]
    fn rejects_pathological_nesting() {
        let source = format!("contract A {{ f() -> bool {{ return {}true{} }} }}", "(".repeat(500), ")".repeat(500));
        let outcome = parse_recovering(&source);
        assert!(!outcome.diagnostics.is_empty());
        assert!(outcome.diagnostics[0].message.contains("maximum depth"));
    }

    #[test]
    fn rejects_unknown_free_functions() {
        let outcome = parse_recovering("contract A { f() { frob(1) } }");
        assert_eq!(outcome.diagnostics.len(), 1);
        assert!(outcome.diagnostics[0].message.contains("Unknown function `frob`"));
    }
}

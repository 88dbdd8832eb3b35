//! Lowering from the syntax tree to the IR.
//!
//! Lowering resolves every name, infers and checks types, and linearises the
//! structured control flow of each function into basic blocks. A semantic
//! error is fatal only to the function (or declaration) that contains it, so
//! [`lower_partial`] always produces a module holding every function that
//! could be lowered.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
};

use aurion_errors::{
    location::{LineIndex, Location, Span},
    semantic::{SemanticError, SemanticErrorKind},
};
use bimap::BiMap;

use crate::{
    ir::{
        types::Type,
        BasicBlock,
        BlockId,
        FunctionKind,
        GuardKind,
        IrContract,
        IrEvent,
        IrField,
        IrFunction,
        IrModule,
        Local,
        LocalId,
        Located,
        Instruction,
        Terminator,
        ValueId,
    },
    syntax::ast::{
        Ast,
        BinaryOp,
        Block,
        Contract,
        Expression,
        ExpressionKind,
        ExternalKind,
        Ident,
        Param,
        Place,
        Statement,
        StatementKind,
        TypeExpr,
        TypeExprKind,
        Visibility,
    },
};

type LResult<T> = Result<T, SemanticError>;

/// Lowers `ast` to the IR, using `index` to locate the source of every node.
///
/// # Errors
///
/// - Every [`SemanticError`] found, if there is at least one.
pub fn lower(ast: &Ast, index: &LineIndex) -> Result<IrModule, Vec<SemanticError>> {
    let (module, errors) = lower_partial(ast, index);
    if errors.is_empty() {
        Ok(module)
    } else {
        Err(errors)
    }
}

/// Lowers as much of `ast` as possible, returning the module containing every
/// function that lowered successfully alongside the errors for the rest.
#[must_use]
pub fn lower_partial(ast: &Ast, index: &LineIndex) -> (IrModule, Vec<SemanticError>) {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut contracts = Vec::new();

    for contract in &ast.contracts {
        if !seen.insert(contract.name.name.as_str()) {
            errors.push(SemanticError {
                kind:     SemanticErrorKind::DuplicateContract(contract.name.name.clone()),
                contract: contract.name.name.clone(),
                function: None,
                location: index.location(contract.name.span.start),
                span:     contract.name.span.clone(),
            });
            continue;
        }
        contracts.push(lower_contract(contract, index, &mut errors));
    }

    (IrModule { contracts }, errors)
}

/// Resolves a syntactic type. The parser has already rejected unknown names.
fn resolve_type(ty: &TypeExpr) -> Type {
    match &ty.kind {
        TypeExprKind::Uint(width) => Type::Uint(*width),
        TypeExprKind::Bool => Type::Bool,
        TypeExprKind::Address => Type::Address,
        TypeExprKind::Map(key, value) => {
            Type::Map(Box::new(resolve_type(key)), Box::new(resolve_type(value)))
        }
    }
}

/// The signature of a function as seen by its callers.
#[derive(Clone, Debug)]
struct Signature {
    params:  Vec<Type>,
    returns: Option<Type>,
}

/// Everything about a contract that lowering a function body needs to know.
struct ContractScope<'a> {
    name:       &'a str,
    index:      &'a LineIndex,
    fields:     HashMap<String, Type>,
    events:     RefCell<HashMap<String, Vec<Type>>>,
    signatures: HashMap<String, Signature>,

    /// Events that were never declared, in the order of their first `emit`.
    implicit_events: RefCell<Vec<IrEvent>>,
}

impl ContractScope<'_> {
    fn error(&self, kind: SemanticErrorKind, function: Option<&str>, span: Span) -> SemanticError {
        SemanticError {
            kind,
            contract: self.name.to_string(),
            function: function.map(ToString::to_string),
            location: self.index.location(span.start),
            span,
        }
    }

    fn declare_event(&self, name: &str, types: Vec<Type>) {
        let params = types
            .iter()
            .enumerate()
            .map(|(index, ty)| (format!("arg{index}"), ty.clone()))
            .collect();
        self.events.borrow_mut().insert(name.to_string(), types);
        self.implicit_events.borrow_mut().push(IrEvent {
            name: name.to_string(),
            params,
        });
    }
}

fn lower_contract(
    contract: &Contract,
    index: &LineIndex,
    errors: &mut Vec<SemanticError>,
) -> IrContract {
    let mut scope = ContractScope {
        name: &contract.name.name,
        index,
        fields: HashMap::new(),
        events: RefCell::new(HashMap::new()),
        signatures: HashMap::new(),
        implicit_events: RefCell::new(Vec::new()),
    };

    let mut fields = Vec::new();
    let mut layout = BiMap::new();
    for decl in &contract.fields {
        let name = &decl.name.name;
        if scope.fields.contains_key(name) {
            errors.push(scope.error(
                SemanticErrorKind::DuplicateField(name.clone()),
                None,
                decl.name.span.clone(),
            ));
            continue;
        }
        let ty = resolve_type(&decl.ty);
        let slot = u32::try_from(fields.len()).unwrap_or(u32::MAX);
        layout.insert(name.clone(), slot);
        scope.fields.insert(name.clone(), ty.clone());
        fields.push(IrField {
            name: name.clone(),
            ty,
            slot,
            location: index.location(decl.span.start),
        });
    }

    let mut events = Vec::new();
    for decl in &contract.events {
        let name = &decl.name.name;
        if scope.events.borrow().contains_key(name) {
            errors.push(scope.error(
                SemanticErrorKind::DuplicateEvent(name.clone()),
                None,
                decl.name.span.clone(),
            ));
            continue;
        }
        if let Some(param) = decl.params.iter().find(|p| resolve_type(&p.ty).is_map()) {
            errors.push(scope.error(SemanticErrorKind::MapOutsideStorage, None, param.ty.span.clone()));
            continue;
        }
        let params = decl
            .params
            .iter()
            .map(|p| (p.name.name.clone(), resolve_type(&p.ty)))
            .collect::<Vec<_>>();
        scope
            .events
            .borrow_mut()
            .insert(name.clone(), params.iter().map(|(_, ty)| ty.clone()).collect());
        events.push(IrEvent {
            name: name.clone(),
            params,
        });
    }

    // Signatures are collected up front so that functions can call functions
    // declared after them.
    let mut unique_functions = Vec::new();
    for function in &contract.functions {
        let name = &function.name.name;
        if scope.signatures.contains_key(name) {
            errors.push(scope.error(
                SemanticErrorKind::DuplicateFunction(name.clone()),
                None,
                function.name.span.clone(),
            ));
            continue;
        }
        scope.signatures.insert(name.clone(), Signature {
            params:  function.params.iter().map(|p| resolve_type(&p.ty)).collect(),
            returns: function.returns.as_ref().map(resolve_type),
        });
        unique_functions.push(function);
    }

    for extra in contract.inits.iter().skip(1) {
        errors.push(scope.error(SemanticErrorKind::DuplicateInit, None, extra.span.clone()));
    }

    let mut functions = Vec::new();
    if let Some(init) = contract.inits.first() {
        let header = FunctionHeader {
            name:        "init",
            name_span:   init.span.clone(),
            kind:        FunctionKind::Init,
            params:      &init.params,
            returns:     None,
            annotations: &init.annotations,
        };
        match FunctionBuilder::lower(&scope, &header, &init.body) {
            Ok(function) => functions.push(function),
            Err(error) => errors.push(error),
        }
    }

    for function in unique_functions {
        let kind = match function.visibility {
            Visibility::Public => FunctionKind::Public,
            Visibility::Private => FunctionKind::Private,
        };
        let header = FunctionHeader {
            name: &function.name.name,
            name_span: function.name.span.clone(),
            kind,
            params: &function.params,
            returns: function.returns.as_ref(),
            annotations: &function.annotations,
        };
        match FunctionBuilder::lower(&scope, &header, &function.body) {
            Ok(function) => functions.push(function),
            Err(error) => errors.push(error),
        }
    }

    events.extend(scope.implicit_events.into_inner());

    IrContract {
        name: contract.name.name.clone(),
        fields,
        layout,
        events,
        functions,
        location: index.location(contract.name.span.start),
    }
}

/// The parts of a function or init handler declaration that lowering needs.
struct FunctionHeader<'a> {
    name:        &'a str,
    name_span:   Span,
    kind:        FunctionKind,
    params:      &'a [Param],
    returns:     Option<&'a TypeExpr>,
    annotations: &'a [Ident],
}

/// A place that an assignment reads and writes.
enum Slot {
    Local(LocalId),
    Field { field: String, key: Option<ValueId> },
}

impl Slot {
    fn load(&self, dest: ValueId) -> Instruction {
        match self {
            Slot::Local(local) => Instruction::LoadLocal { dest, local: *local },
            Slot::Field { field, key } => Instruction::LoadField {
                dest,
                field: field.clone(),
                key: *key,
            },
        }
    }

    fn store(&self, value: ValueId) -> Instruction {
        match self {
            Slot::Local(local) => Instruction::StoreLocal { local: *local, value },
            Slot::Field { field, key } => Instruction::StoreField {
                field: field.clone(),
                key: *key,
                value,
            },
        }
    }
}

/// A block whose terminator may not have been decided yet.
#[derive(Default)]
struct PendingBlock {
    instructions: Vec<Located<Instruction>>,
    terminator:   Option<Located<Terminator>>,
}

/// Lowers the body of a single function.
struct FunctionBuilder<'s, 'a> {
    scope:      &'s ContractScope<'a>,
    name:       String,
    returns:    Option<Type>,
    locals:     Vec<Local>,
    scopes:     Vec<HashMap<String, LocalId>>,
    blocks:     Vec<PendingBlock>,
    current:    BlockId,
    next_value: ValueId,
}

impl<'s, 'a> FunctionBuilder<'s, 'a> {
    fn lower(
        scope: &'s ContractScope<'a>,
        header: &FunctionHeader<'_>,
        body: &Block,
    ) -> LResult<IrFunction> {
        let mut builder = Self {
            scope,
            name: header.name.to_string(),
            returns: header.returns.map(resolve_type),
            locals: Vec::new(),
            scopes: vec![HashMap::new()],
            blocks: vec![PendingBlock::default()],
            current: 0,
            next_value: 0,
        };

        if let Some(returns) = header.returns {
            if builder.returns.as_ref().is_some_and(Type::is_map) {
                return Err(builder.error(SemanticErrorKind::MapOutsideStorage, returns.span.clone()));
            }
        }

        let mut params = Vec::new();
        for param in header.params {
            let ty = resolve_type(&param.ty);
            if ty.is_map() {
                return Err(builder.error(SemanticErrorKind::MapOutsideStorage, param.ty.span.clone()));
            }
            if builder.lookup(&param.name.name).is_some() {
                return Err(builder.error(
                    SemanticErrorKind::DuplicateParameter(param.name.name.clone()),
                    param.name.span.clone(),
                ));
            }
            builder.declare(&param.name, ty.clone())?;
            params.push((param.name.name.clone(), ty));
        }

        builder.lower_block(body)?;

        let end = body.span.end.saturating_sub(1)..body.span.end;
        let fallthrough = (!builder.is_terminated()).then_some(builder.current);
        builder.terminate(Terminator::Return(None), end);

        let blocks = builder
            .blocks
            .into_iter()
            .enumerate()
            .map(|(id, block)| BasicBlock {
                id,
                instructions: block.instructions,
                terminator: block.terminator.unwrap_or_else(|| {
                    Located::new(Terminator::Return(None), scope.index.location(body.span.end))
                }),
            })
            .collect::<Vec<_>>();

        if builder.returns.is_some() && fallthrough.is_some_and(|f| reachable(&blocks, 0).contains(&f)) {
            return Err(scope.error(
                SemanticErrorKind::MissingReturn(header.name.to_string()),
                Some(header.name),
                header.name_span.clone(),
            ));
        }

        Ok(IrFunction {
            name: header.name.to_string(),
            kind: header.kind,
            params,
            returns: builder.returns,
            decorators: header.annotations.iter().map(|a| a.name.clone()).collect(),
            locals: builder.locals,
            entry: 0,
            blocks,
            location: scope.index.location(header.name_span.start),
        })
    }

    // Bookkeeping

    fn error(&self, kind: SemanticErrorKind, span: Span) -> SemanticError {
        self.scope.error(kind, Some(&self.name), span)
    }

    fn location(&self, span: &Span) -> Location {
        self.scope.index.location(span.start)
    }

    fn new_block(&mut self) -> BlockId {
        self.blocks.push(PendingBlock::default());
        self.blocks.len() - 1
    }

    fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    fn is_terminated(&self) -> bool {
        self.blocks
            .get(self.current)
            .is_some_and(|b| b.terminator.is_some())
    }

    fn fresh(&mut self) -> ValueId {
        let value = self.next_value;
        self.next_value += 1;
        value
    }

    fn emit(&mut self, instruction: Instruction, span: &Span) {
        let location = self.location(span);
        if let Some(block) = self.blocks.get_mut(self.current) {
            block.instructions.push(Located::new(instruction, location));
        }
    }

    /// Ends the current block with `terminator`, unless it is already ended.
    fn terminate(&mut self, terminator: Terminator, span: Span) {
        let location = self.location(&span);
        if let Some(block) = self.blocks.get_mut(self.current) {
            if block.terminator.is_none() {
                block.terminator = Some(Located::new(terminator, location));
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<LocalId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn local_type(&self, local: LocalId) -> Type {
        self.locals
            .get(local as usize)
            .map_or(Type::DEFAULT_INTEGER, |l| l.ty.clone())
    }

    fn declare(&mut self, name: &Ident, ty: Type) -> LResult<LocalId> {
        if self.lookup(&name.name).is_some() {
            return Err(self.error(
                SemanticErrorKind::DuplicateVariable(name.name.clone()),
                name.span.clone(),
            ));
        }
        let id = LocalId::try_from(self.locals.len()).unwrap_or(LocalId::MAX);
        self.locals.push(Local {
            name: name.name.clone(),
            ty,
        });
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.name.clone(), id);
        }
        Ok(id)
    }

    fn field_type(&self, field: &Ident) -> LResult<Type> {
        self.scope
            .fields
            .get(&field.name)
            .cloned()
            .ok_or_else(|| {
                self.error(SemanticErrorKind::UnknownField(field.name.clone()), field.span.clone())
            })
    }

    fn scalar_field_type(&self, field: &Ident) -> LResult<Type> {
        let ty = self.field_type(field)?;
        if ty.is_map() {
            return Err(self.error(
                SemanticErrorKind::MapNotIndexed(field.name.clone()),
                field.span.clone(),
            ));
        }
        Ok(ty)
    }

    fn map_field_types(&self, field: &Ident) -> LResult<(Type, Type)> {
        match self.field_type(field)? {
            Type::Map(key, value) => Ok((*key, *value)),
            _ => Err(self.error(SemanticErrorKind::NotAMap(field.name.clone()), field.span.clone())),
        }
    }

    // Statements

    fn lower_block(&mut self, block: &Block) -> LResult<()> {
        self.scopes.push(HashMap::new());
        for statement in &block.statements {
            // Statements after a `return` or `revert` are unreachable, but are
            // still lowered so that their errors are reported.
            if self.is_terminated() {
                let dead = self.new_block();
                self.switch_to(dead);
            }
            self.lower_statement(statement)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn lower_statement(&mut self, statement: &Statement) -> LResult<()> {
        let span = &statement.span;
        match &statement.kind {
            StatementKind::Let { name, ty, value } => {
                let declared = ty.as_ref().map(|t| (resolve_type(t), t.span.clone()));
                let (value, ty) = match declared {
                    Some((ty, ty_span)) => {
                        if ty.is_map() {
                            return Err(self.error(SemanticErrorKind::MapOutsideStorage, ty_span));
                        }
                        (self.lower_typed(value, &ty)?, ty)
                    }
                    None => self.lower_expression(value, None)?,
                };
                let local = self.declare(name, ty)?;
                self.emit(Instruction::StoreLocal { local, value }, span);
            }
            StatementKind::Assign { target, op, value } => {
                self.lower_assignment(target, op.binary_op(), value, span)?;
            }
            StatementKind::Require { condition, message } => {
                self.lower_guard(condition, GuardKind::Require, message.clone(), span)?;
            }
            StatementKind::Assert { condition } => {
                self.lower_guard(condition, GuardKind::Assert, None, span)?;
            }
            StatementKind::Revert { message } => {
                self.terminate(Terminator::Revert(message.clone()), span.clone());
            }
            StatementKind::If {
                condition,
                then_block,
                else_block,
            } => {
                let cond = self.lower_typed(condition, &Type::Bool)?;
                let then_id = self.new_block();
                let join = self.new_block();
                let else_id = if else_block.is_some() {
                    self.new_block()
                } else {
                    join
                };
                self.terminate(
                    Terminator::Branch {
                        cond,
                        then_block: then_id,
                        else_block: else_id,
                    },
                    condition.span.clone(),
                );

                self.switch_to(then_id);
                self.lower_block(then_block)?;
                self.terminate(Terminator::Jump(join), then_block.span.clone());

                if let Some(else_block) = else_block {
                    self.switch_to(else_id);
                    self.lower_block(else_block)?;
                    self.terminate(Terminator::Jump(join), else_block.span.clone());
                }
                self.switch_to(join);
            }
            StatementKind::While { condition, body } => {
                let header = self.new_block();
                self.terminate(Terminator::Jump(header), span.clone());
                self.switch_to(header);

                let cond = self.lower_typed(condition, &Type::Bool)?;
                let body_id = self.new_block();
                let exit = self.new_block();
                self.terminate(
                    Terminator::Branch {
                        cond,
                        then_block: body_id,
                        else_block: exit,
                    },
                    condition.span.clone(),
                );

                self.switch_to(body_id);
                self.lower_block(body)?;
                self.terminate(Terminator::Jump(header), body.span.clone());
                self.switch_to(exit);
            }
            StatementKind::Return(value) => {
                let returns = self.returns.clone();
                let terminator = match (value, returns) {
                    (Some(value), Some(ty)) => Terminator::Return(Some(self.lower_typed(value, &ty)?)),
                    (Some(value), None) => {
                        return Err(self.error(
                            SemanticErrorKind::NoReturnValue(self.name.clone()),
                            value.span.clone(),
                        ))
                    }
                    (None, Some(_)) => {
                        return Err(self.error(
                            SemanticErrorKind::MissingReturn(self.name.clone()),
                            span.clone(),
                        ))
                    }
                    (None, None) => Terminator::Return(None),
                };
                self.terminate(terminator, span.clone());
            }
            StatementKind::Emit { event, args } => {
                let declared = self.scope.events.borrow().get(&event.name).cloned();
                let args = match declared {
                    Some(params) => {
                        if params.len() != args.len() {
                            return Err(self.error(
                                SemanticErrorKind::ArityMismatch {
                                    name:     event.name.clone(),
                                    expected: params.len(),
                                    found:    args.len(),
                                },
                                span.clone(),
                            ));
                        }
                        args.iter()
                            .zip(&params)
                            .map(|(arg, ty)| self.lower_typed(arg, ty))
                            .collect::<LResult<Vec<_>>>()?
                    }
                    None => {
                        // The first emit of an undeclared event declares it with
                        // the types of its arguments.
                        let (values, types): (Vec<_>, Vec<_>) = args
                            .iter()
                            .map(|arg| self.lower_expression(arg, None))
                            .collect::<LResult<Vec<_>>>()?
                            .into_iter()
                            .unzip();
                        self.scope.declare_event(&event.name, types);
                        values
                    }
                };
                self.emit(
                    Instruction::Emit {
                        event: event.name.clone(),
                        args,
                    },
                    span,
                );
            }
            StatementKind::Expression(expression) => match &expression.kind {
                ExpressionKind::SelfCall { function, args } => {
                    self.lower_call(function, args, &expression.span)?;
                }
                ExpressionKind::ExternalCall {
                    kind,
                    target,
                    amount,
                } => {
                    self.lower_external(*kind, target, amount, &expression.span)?;
                }
                _ => {
                    return Err(self.error(SemanticErrorKind::UnusedExpression, expression.span.clone()))
                }
            },
        }
        Ok(())
    }

    fn lower_guard(
        &mut self,
        condition: &Expression,
        kind: GuardKind,
        message: Option<String>,
        span: &Span,
    ) -> LResult<()> {
        let cond = self.lower_typed(condition, &Type::Bool)?;
        let next = self.new_block();
        self.terminate(
            Terminator::Guard {
                cond,
                kind,
                message,
                next,
            },
            span.clone(),
        );
        self.switch_to(next);
        Ok(())
    }

    fn lower_assignment(
        &mut self,
        target: &Place,
        op: Option<BinaryOp>,
        value: &Expression,
        span: &Span,
    ) -> LResult<()> {
        // Resolve the place first, evaluating a map key exactly once.
        let (ty, slot) = match target {
            Place::Local(name) => {
                let local = self.lookup(&name.name).ok_or_else(|| {
                    self.error(SemanticErrorKind::UnknownVariable(name.name.clone()), name.span.clone())
                })?;
                (self.local_type(local), Slot::Local(local))
            }
            Place::Field(field) => {
                let ty = self.scalar_field_type(field)?;
                (ty, Slot::Field {
                    field: field.name.clone(),
                    key:   None,
                })
            }
            Place::MapEntry { field, key } => {
                let (key_ty, value_ty) = self.map_field_types(field)?;
                let key = self.lower_typed(key, &key_ty)?;
                (value_ty, Slot::Field {
                    field: field.name.clone(),
                    key:   Some(key),
                })
            }
        };

        let new_value = match op {
            None => self.lower_typed(value, &ty)?,
            Some(op) => {
                if !ty.is_integer() {
                    return Err(self.error(
                        SemanticErrorKind::InvalidOperand {
                            operator: format!("{}=", op.as_str()),
                            ty:       ty.to_string(),
                        },
                        target.span(),
                    ));
                }
                let current = self.fresh();
                self.emit(slot.load(current), span);
                let rhs = self.lower_typed(value, &ty)?;
                let dest = self.fresh();
                self.emit(
                    Instruction::Binary {
                        dest,
                        op,
                        ty,
                        lhs: current,
                        rhs,
                    },
                    span,
                );
                dest
            }
        };

        self.emit(slot.store(new_value), span);
        Ok(())
    }

    // Expressions

    /// Lowers `expression`, requiring it to have type `expected`.
    fn lower_typed(&mut self, expression: &Expression, expected: &Type) -> LResult<ValueId> {
        let (value, ty) = self.lower_expression(expression, Some(expected))?;
        if &ty != expected {
            return Err(self.error(
                SemanticErrorKind::TypeError {
                    expected: expected.to_string(),
                    found:    ty.to_string(),
                },
                expression.span.clone(),
            ));
        }
        Ok(value)
    }

    /// Determines the type an expression would have without lowering it, if
    /// the expression itself fixes one. Integer literals do not.
    fn type_hint(&self, expression: &Expression) -> Option<Type> {
        match &expression.kind {
            ExpressionKind::Int { .. } | ExpressionKind::Str(_) => None,
            ExpressionKind::Bool(_) | ExpressionKind::Unary { .. } => Some(Type::Bool),
            ExpressionKind::Var(name) => self.lookup(&name.name).map(|l| self.local_type(l)),
            ExpressionKind::Field(field) => self.scope.fields.get(&field.name).cloned(),
            ExpressionKind::MapIndex { field, .. } => match self.scope.fields.get(&field.name) {
                Some(Type::Map(_, value)) => Some((**value).clone()),
                _ => None,
            },
            ExpressionKind::SelfCall { function, .. } => self
                .scope
                .signatures
                .get(&function.name)
                .and_then(|s| s.returns.clone()),
            ExpressionKind::Env(var) => Some(Type::of_env(*var)),
            ExpressionKind::ExternalCall { kind, .. } => match kind {
                ExternalKind::Call => Some(Type::Bool),
                ExternalKind::Transfer => None,
            },
            ExpressionKind::Binary { op, lhs, rhs } => {
                if op.is_arithmetic() {
                    self.type_hint(lhs).or_else(|| self.type_hint(rhs))
                } else {
                    Some(Type::Bool)
                }
            }
        }
    }

    fn lower_expression(
        &mut self,
        expression: &Expression,
        expected: Option<&Type>,
    ) -> LResult<(ValueId, Type)> {
        let span = &expression.span;
        match &expression.kind {
            ExpressionKind::Int { digits, radix } => {
                let ty = match expected {
                    Some(ty) if ty.is_integer() => ty.clone(),
                    Some(Type::Address) if *radix == 16 => Type::Address,
                    _ => Type::DEFAULT_INTEGER,
                };
                let value = u128::from_str_radix(digits, *radix)
                    .ok()
                    .filter(|v| *v <= ty.max_value())
                    .ok_or_else(|| {
                        let literal = if *radix == 16 {
                            format!("0x{digits}")
                        } else {
                            digits.clone()
                        };
                        self.error(
                            SemanticErrorKind::LiteralOutOfRange {
                                literal,
                                ty: ty.to_string(),
                            },
                            span.clone(),
                        )
                    })?;
                let dest = self.fresh();
                self.emit(
                    Instruction::Const {
                        dest,
                        value,
                        ty: ty.clone(),
                    },
                    span,
                );
                Ok((dest, ty))
            }
            ExpressionKind::Bool(value) => {
                let dest = self.fresh();
                self.emit(
                    Instruction::Const {
                        dest,
                        value: u128::from(*value),
                        ty: Type::Bool,
                    },
                    span,
                );
                Ok((dest, Type::Bool))
            }
            ExpressionKind::Str(_) => Err(self.error(
                SemanticErrorKind::TypeError {
                    expected: expected.map_or_else(|| "a value".to_string(), ToString::to_string),
                    found:    "string".to_string(),
                },
                span.clone(),
            )),
            ExpressionKind::Var(name) => {
                let local = self.lookup(&name.name).ok_or_else(|| {
                    self.error(SemanticErrorKind::UnknownVariable(name.name.clone()), name.span.clone())
                })?;
                let dest = self.fresh();
                self.emit(Instruction::LoadLocal { dest, local }, span);
                Ok((dest, self.local_type(local)))
            }
            ExpressionKind::Field(field) => {
                let ty = self.scalar_field_type(field)?;
                let dest = self.fresh();
                self.emit(
                    Instruction::LoadField {
                        dest,
                        field: field.name.clone(),
                        key: None,
                    },
                    span,
                );
                Ok((dest, ty))
            }
            ExpressionKind::MapIndex { field, key } => {
                let (key_ty, value_ty) = self.map_field_types(field)?;
                let key = self.lower_typed(key, &key_ty)?;
                let dest = self.fresh();
                self.emit(
                    Instruction::LoadField {
                        dest,
                        field: field.name.clone(),
                        key: Some(key),
                    },
                    span,
                );
                Ok((dest, value_ty))
            }
            ExpressionKind::SelfCall { function, args } => match self.lower_call(function, args, span)? {
                Some(result) => Ok(result),
                None => Err(self.error(
                    SemanticErrorKind::NoReturnValue(function.name.clone()),
                    span.clone(),
                )),
            },
            ExpressionKind::Env(var) => {
                let dest = self.fresh();
                self.emit(Instruction::Env { dest, var: *var }, span);
                Ok((dest, Type::of_env(*var)))
            }
            ExpressionKind::ExternalCall {
                kind,
                target,
                amount,
            } => match kind {
                ExternalKind::Call => {
                    let dest = self.lower_external(*kind, target, amount, span)?;
                    Ok((dest, Type::Bool))
                }
                ExternalKind::Transfer => Err(self.error(
                    SemanticErrorKind::NoReturnValue("transfer".to_string()),
                    span.clone(),
                )),
            },
            ExpressionKind::Binary { op, lhs, rhs } => self.lower_binary(*op, lhs, rhs, expected, span),
            ExpressionKind::Unary { op, operand } => {
                let (operand, ty) = self.lower_expression(operand, Some(&Type::Bool))?;
                if ty != Type::Bool {
                    return Err(self.error(
                        SemanticErrorKind::InvalidOperand {
                            operator: "!".to_string(),
                            ty:       ty.to_string(),
                        },
                        span.clone(),
                    ));
                }
                let dest = self.fresh();
                self.emit(
                    Instruction::Unary {
                        dest,
                        op: *op,
                        operand,
                    },
                    span,
                );
                Ok((dest, Type::Bool))
            }
        }
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expression,
        rhs: &Expression,
        expected: Option<&Type>,
        span: &Span,
    ) -> LResult<(ValueId, Type)> {
        let invalid = |this: &Self, ty: &Type| {
            this.error(
                SemanticErrorKind::InvalidOperand {
                    operator: op.as_str().to_string(),
                    ty:       ty.to_string(),
                },
                span.clone(),
            )
        };

        if op.is_logical() {
            let (l, lt) = self.lower_expression(lhs, Some(&Type::Bool))?;
            if lt != Type::Bool {
                return Err(invalid(self, &lt));
            }
            let (r, rt) = self.lower_expression(rhs, Some(&Type::Bool))?;
            if rt != Type::Bool {
                return Err(invalid(self, &rt));
            }
            let dest = self.fresh();
            self.emit(
                Instruction::Binary {
                    dest,
                    op,
                    ty: Type::Bool,
                    lhs: l,
                    rhs: r,
                },
                span,
            );
            return Ok((dest, Type::Bool));
        }

        // Literals take their type from the other operand where possible, and
        // from the context for arithmetic.
        let hint = self
            .type_hint(lhs)
            .or_else(|| self.type_hint(rhs))
            .or_else(|| expected.filter(|_| op.is_arithmetic()).cloned());
        let (l, lt) = self.lower_expression(lhs, hint.as_ref())?;
        let (r, rt) = self.lower_expression(rhs, Some(&lt))?;
        if lt != rt {
            return Err(self.error(
                SemanticErrorKind::TypeError {
                    expected: lt.to_string(),
                    found:    rt.to_string(),
                },
                rhs.span.clone(),
            ));
        }

        let needs_integer = op.is_arithmetic() || (op.is_comparison() && !matches!(op, BinaryOp::Eq | BinaryOp::Ne));
        if needs_integer && !lt.is_integer() {
            return Err(invalid(self, &lt));
        }

        let result = if op.is_arithmetic() { lt.clone() } else { Type::Bool };
        let dest = self.fresh();
        self.emit(
            Instruction::Binary {
                dest,
                op,
                ty: lt,
                lhs: l,
                rhs: r,
            },
            span,
        );
        Ok((dest, result))
    }

    /// Lowers a call to another function of the contract, returning its result
    /// and type if it returns a value.
    fn lower_call(
        &mut self,
        function: &Ident,
        args: &[Expression],
        span: &Span,
    ) -> LResult<Option<(ValueId, Type)>> {
        let signature = self.scope.signatures.get(&function.name).cloned().ok_or_else(|| {
            self.error(
                SemanticErrorKind::UnknownFunction(function.name.clone()),
                function.span.clone(),
            )
        })?;
        if signature.params.len() != args.len() {
            return Err(self.error(
                SemanticErrorKind::ArityMismatch {
                    name:     function.name.clone(),
                    expected: signature.params.len(),
                    found:    args.len(),
                },
                span.clone(),
            ));
        }

        let args = args
            .iter()
            .zip(&signature.params)
            .map(|(arg, ty)| self.lower_typed(arg, ty))
            .collect::<LResult<Vec<_>>>()?;
        let dest = signature.returns.as_ref().map(|_| self.fresh());
        self.emit(
            Instruction::Call {
                dest,
                function: function.name.clone(),
                args,
            },
            span,
        );

        Ok(dest.zip(signature.returns))
    }

    fn lower_external(
        &mut self,
        kind: ExternalKind,
        target: &Expression,
        amount: &Expression,
        span: &Span,
    ) -> LResult<ValueId> {
        let target = self.lower_typed(target, &Type::Address)?;
        let amount = self.lower_typed(amount, &Type::DEFAULT_INTEGER)?;
        let dest = self.fresh();
        self.emit(
            Instruction::ExternalCall {
                dest,
                kind,
                target,
                amount,
            },
            span,
        );
        Ok(dest)
    }
}

/// The set of blocks reachable from `entry`.
fn reachable(blocks: &[BasicBlock], entry: BlockId) -> HashSet<BlockId> {
    let mut seen = HashSet::new();
    let mut stack = vec![entry];
    while let Some(block) = stack.pop() {
        if !seen.insert(block) {
            continue;
        }
        if let Some(block) = blocks.get(block) {
            stack.extend(block.terminator.node.successors());
        }
    }
    seen
}

#[cfg(test)]
mod test {
    use aurion_errors::{location::LineIndex, semantic::SemanticErrorKind};

    use crate::{
        ir::{
            lower::{lower, lower_partial},
            types::Type,
            FunctionKind,
            Instruction,
            Terminator,
        },
        syntax::parse,
    };

    fn lower_source(source: &str) -> anyhow::Result<crate::ir::IrModule> {
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        lower(&ast, &LineIndex::new(source)).map_err(|e| anyhow::anyhow!("{e:?}"))
    }

    #[test]
    fn assigns_dense_storage_slots() -> anyhow::Result<()> {
        let module = lower_source("contract A { a: u64\n b: map<address, u8>\n c: bool }")?;
        let contract = &module.contracts[0];
        assert_eq!(contract.layout.get_by_left("a"), Some(&0));
        assert_eq!(contract.layout.get_by_left("b"), Some(&1));
        assert_eq!(contract.layout.get_by_right(&2).map(String::as_str), Some("c"));

        Ok(())
    }

    #[test]
    fn require_lowers_to_a_guard() -> anyhow::Result<()> {
        let module = lower_source(
            "contract A { owner: address\n f() { require(msg.sender == self.owner, \"no\")\n self.owner = msg.sender } }",
        )?;
        let function = &module.contracts[0].functions[0];
        assert_eq!(function.kind, FunctionKind::Public);
        assert!(matches!(
            function.blocks[0].terminator.node,
            Terminator::Guard { next: 1, .. }
        ));
        assert!(function.blocks[1]
            .instructions
            .iter()
            .any(|i| matches!(i.node, Instruction::StoreField { .. })));

        Ok(())
    }

    #[test]
    fn literals_take_the_type_of_the_other_operand() -> anyhow::Result<()> {
        let module = lower_source("contract A { x: u8\n f() { self.x = self.x + 200 } }")?;
        let function = &module.contracts[0].functions[0];
        let constant = function.blocks[0].instructions.iter().find_map(|i| match &i.node {
            Instruction::Const { ty, .. } => Some(ty.clone()),
            _ => None,
        });
        assert_eq!(constant, Some(Type::Uint(8)));

        Ok(())
    }

    #[test]
    fn errors_are_fatal_only_to_their_function() -> anyhow::Result<()> {
        let source = "contract A {\n x: u64\n f() { self.x = true }\n g() { self.x = 1 }\n}";
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        let (module, errors) = lower_partial(&ast, &LineIndex::new(source));

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].function.as_deref(), Some("f"));
        assert_eq!(errors[0].location.line, 3);
        assert!(matches!(errors[0].kind, SemanticErrorKind::TypeError { .. }));
        let names = module.contracts[0]
            .functions
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["g"]);

        Ok(())
    }

    #[test]
    fn reports_duplicate_declarations() -> anyhow::Result<()> {
        let source = "contract A { x: u64\n x: u8\n f() { }\n f() { }\n init() { }\n init() { } }";
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        let (_, errors) = lower_partial(&ast, &LineIndex::new(source));
        let kinds = errors.into_iter().map(|e| e.kind).collect::<Vec<_>>();

        assert!(kinds.contains(&SemanticErrorKind::DuplicateField("x".to_string())));
        assert!(kinds.contains(&SemanticErrorKind::DuplicateFunction("f".to_string())));
        assert!(kinds.contains(&SemanticErrorKind::DuplicateInit));

        Ok(())
    }

    #[test]
    fn requires_a_return_on_every_path() -> anyhow::Result<()> {
        let source = "contract A { f(x: u64) -> u64 { if x > 1 { return x } } }";
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        let result = lower(&ast, &LineIndex::new(source));
        assert!(matches!(
            result,
            Err(errors) if errors[0].kind == SemanticErrorKind::MissingReturn("f".to_string())
        ));

        let ok = "contract A { f(x: u64) -> u64 { if x > 1 { return x } else { return 1 } } }";
        lower_source(ok)?;

        Ok(())
    }

    #[test]
    fn a_trailing_return_ends_the_function() -> anyhow::Result<()> {
        let module = lower_source("contract V { t: u64\n v() -> u64 { return self.t } }")?;
        let function = &module.contracts[0].functions[0];
        assert_eq!(function.returns, Some(Type::Uint(64)));
        assert!(matches!(
            function.blocks[0].terminator.node,
            Terminator::Return(Some(_))
        ));

        lower_source("contract V { t: u64\n v(x: u64) -> u64 {\n  let y = x + 1\n  return y\n }\n}")?;

        Ok(())
    }

    #[test]
    fn rejects_out_of_range_literals() -> anyhow::Result<()> {
        let source = "contract A { x: u8\n f() { self.x = 256 } }";
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        let errors = lower(&ast, &LineIndex::new(source)).err().unwrap_or_default();
        assert_eq!(errors[0].kind, SemanticErrorKind::LiteralOutOfRange {
            literal: "256".to_string(),
            ty:      "u8".to_string(),
        });

        Ok(())
    }

    #[test]
    fn while_loops_have_a_back_edge() -> anyhow::Result<()> {
        let module =
            lower_source("contract A { f(n: u64) { let i = 0\n while i < n { i += 1 } } }")?;
        let function = &module.contracts[0].functions[0];
        let header = function
            .blocks
            .iter()
            .find(|b| matches!(b.terminator.node, Terminator::Branch { .. }))
            .map(|b| b.id);
        let jumps_back = function
            .blocks
            .iter()
            .any(|b| matches!(b.terminator.node, Terminator::Jump(t) if Some(t) == header && t < b.id));
        assert!(jumps_back);

        Ok(())
    }

    #[test]
    fn lowers_the_vesting_contract() -> anyhow::Result<()> {
        let module = lower_source(include_str!("../../tests/data/vesting.aur"))?;
        let contract = module
            .contract("SimpleVesting")
            .ok_or_else(|| anyhow::anyhow!("no contract"))?;

        assert_eq!(contract.fields.len(), 7);
        assert_eq!(contract.layout.get_by_left("claimed"), Some(&6));
        assert_eq!(contract.init().map(|f| f.params.len()), Some(4));

        let claimed = contract
            .event("TokensClaimed")
            .ok_or_else(|| anyhow::anyhow!("no implicit event"))?;
        assert_eq!(claimed.params.len(), 3);

        let vested = contract
            .function("calculate_vested")
            .ok_or_else(|| anyhow::anyhow!("no calculate_vested"))?;
        assert_eq!(vested.returns, Some(Type::Uint(64)));
        assert!(vested
            .instructions()
            .any(|(_, i)| matches!(i.node, Instruction::LoadField { .. })));

        Ok(())
    }
}

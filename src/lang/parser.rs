//! Recursive-descent parser for the contract language.
//!
//! Grammar notes:
//! - Contract types start with an uppercase letter; `Token(expr)` is a
//!   contract-handle conversion while `transfer(expr)` is a function call.
//! - Statements need no terminator; stray semicolons are skipped.
//! - `loop` bounds are numeric literals, unrolled later by the compiler.

use crate::lang::ast::*;
use crate::lang::lexer::{tokenize, SpannedToken, Token};
use crate::lang::CompileError;
use crate::types::bytes::Bytes;
use crate::types::numeric::U256;
use crate::vm::value::Val;

/// Parses a source file into a [`SourceUnit`].
pub fn parse(source: &str) -> Result<SourceUnit, CompileError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        next_id: 0,
    };
    parser.parse_unit()
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    next_id: ExprId,
}

impl Parser {
    fn parse_unit(&mut self) -> Result<SourceUnit, CompileError> {
        let mut definitions = Vec::new();
        while self.pos < self.tokens.len() {
            let spanned = self.advance()?;
            let definition = match spanned.token {
                Token::AssetScript => Definition::AssetScript(self.parse_script()?),
                Token::TxScript => Definition::TxScript(self.parse_script()?),
                Token::TxContract => Definition::Contract(self.parse_contract()?),
                other => {
                    return Err(CompileError::at(
                        spanned.line,
                        format!(
                            "expected AssetScript, TxScript or TxContract, got {}",
                            other.describe()
                        ),
                    ))
                }
            };
            definitions.push(definition);
        }
        Ok(SourceUnit {
            definitions,
            next_expr_id: self.next_id,
        })
    }

    fn parse_script(&mut self) -> Result<ScriptDef, CompileError> {
        let name = self.expect_ident()?;
        self.expect(Token::LBrace)?;
        let mut funcs = Vec::new();
        while !self.eat(Token::RBrace) {
            if self.peek() == Some(&Token::Event) {
                let line = self.line();
                return Err(CompileError::at(line, "events are only legal in contracts"));
            }
            funcs.push(self.parse_func()?);
        }
        Ok(ScriptDef { name, funcs })
    }

    fn parse_contract(&mut self) -> Result<ContractDef, CompileError> {
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;
        let mut fields = Vec::new();
        while !self.eat(Token::RParen) {
            if !fields.is_empty() {
                self.expect(Token::Comma)?;
            }
            let is_mut = self.eat(Token::Mut);
            let field_name = self.expect_ident()?;
            self.expect(Token::Colon)?;
            let ty = self.parse_type()?;
            fields.push(FieldDef {
                is_mut,
                name: field_name,
                ty,
            });
        }

        self.expect(Token::LBrace)?;
        let mut events = Vec::new();
        let mut funcs = Vec::new();
        while !self.eat(Token::RBrace) {
            if self.eat(Token::Event) {
                events.push(self.parse_event()?);
            } else {
                funcs.push(self.parse_func()?);
            }
        }
        Ok(ContractDef {
            name,
            fields,
            events,
            funcs,
        })
    }

    fn parse_event(&mut self) -> Result<EventDef, CompileError> {
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;
        let fields = self.parse_arguments()?;
        Ok(EventDef { name, fields })
    }

    fn parse_func(&mut self) -> Result<FuncDef, CompileError> {
        let is_public = self.eat(Token::Pub);
        let is_payable = self.eat(Token::Payable);
        self.expect(Token::Fn)?;
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;
        let args = self.parse_arguments()?;

        let mut returns = Vec::new();
        if self.eat(Token::Arrow) {
            self.expect(Token::LParen)?;
            while !self.eat(Token::RParen) {
                if !returns.is_empty() {
                    self.expect(Token::Comma)?;
                }
                returns.push(self.parse_type()?);
            }
        }

        let body = self.parse_block()?;
        Ok(FuncDef {
            is_public,
            is_payable,
            name,
            args,
            returns,
            body,
        })
    }

    /// `name: Type, ...` up to and including the closing paren.
    fn parse_arguments(&mut self) -> Result<Vec<Argument>, CompileError> {
        let mut args = Vec::new();
        while !self.eat(Token::RParen) {
            if !args.is_empty() {
                self.expect(Token::Comma)?;
            }
            let name = self.expect_ident()?;
            self.expect(Token::Colon)?;
            let ty = self.parse_type()?;
            args.push(Argument { name, ty });
        }
        Ok(args)
    }

    fn parse_type(&mut self) -> Result<Type, CompileError> {
        if self.eat(Token::LBracket) {
            let elem = self.parse_type()?;
            self.expect(Token::Semicolon)?;
            let len = self.expect_number()?;
            if len.is_zero() || len > U256::from(u16::MAX) {
                return Err(CompileError::at(
                    self.line(),
                    "array length must be between 1 and 65535",
                ));
            }
            self.expect(Token::RBracket)?;
            return Ok(Type::FixedSizeArray(Box::new(elem), len.as_usize()));
        }

        let name = self.expect_ident()?;
        Ok(match name.as_str() {
            "Bool" => Type::Bool,
            "U256" => Type::U256,
            "I256" => Type::I256,
            "ByteVec" => Type::ByteVec,
            "Address" => Type::Address,
            _ => Type::Contract(name),
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, CompileError> {
        self.expect(Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.eat(Token::RBrace) {
            if self.eat(Token::Semicolon) {
                continue;
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, CompileError> {
        match self.peek() {
            Some(Token::Let) => self.parse_let(),
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => {
                self.advance()?;
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(Stmt::While { cond, body })
            }
            Some(Token::Return) => {
                self.advance()?;
                let mut values = Vec::new();
                if !self.check_statement_end() {
                    values.push(self.parse_expr()?);
                    while self.eat(Token::Comma) {
                        values.push(self.parse_expr()?);
                    }
                }
                Ok(Stmt::Return { values })
            }
            Some(Token::Emit) => {
                self.advance()?;
                let name = self.expect_ident()?;
                self.expect(Token::LParen)?;
                let args = self.parse_expr_list(Token::RParen)?;
                Ok(Stmt::EmitEvent { name, args })
            }
            Some(Token::Loop) => self.parse_loop(),
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_let(&mut self) -> Result<Stmt, CompileError> {
        self.advance()?; // let
        let mut bindings = Vec::new();
        loop {
            let is_mut = self.eat(Token::Mut);
            let name = self.expect_ident()?;
            bindings.push((is_mut, name));
            if !self.eat(Token::Comma) {
                break;
            }
        }
        self.expect(Token::Assign)?;
        let value = self.parse_expr()?;
        Ok(Stmt::VarDef { bindings, value })
    }

    fn parse_if(&mut self) -> Result<Stmt, CompileError> {
        self.advance()?; // if
        let cond = self.parse_expr()?;
        let then_body = self.parse_block()?;
        let else_body = if self.eat(Token::Else) {
            if self.peek() == Some(&Token::If) {
                vec![self.parse_if()?]
            } else {
                self.parse_block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::IfElse {
            cond,
            then_body,
            else_body,
        })
    }

    fn parse_loop(&mut self) -> Result<Stmt, CompileError> {
        self.advance()?; // loop
        self.expect(Token::LParen)?;
        let start = self.expect_number()?;
        self.expect(Token::Comma)?;
        let end = self.expect_number()?;
        self.expect(Token::Comma)?;
        let step = self.expect_number()?;
        self.expect(Token::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::Loop {
            start,
            end,
            step,
            body,
        })
    }

    /// Assignment, function-call or contract-call statement.
    fn parse_expr_stmt(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        let expr = self.parse_expr()?;

        if self.eat(Token::Assign) {
            let target = Self::expr_to_target(expr)
                .ok_or_else(|| CompileError::at(line, "invalid assignment target"))?;
            let value = self.parse_expr()?;
            return Ok(Stmt::Assign { target, value });
        }

        match expr {
            Expr::Call { name, args, .. } => Ok(Stmt::FuncCall { name, args }),
            Expr::ContractCall {
                object,
                method,
                args,
                ..
            } => Ok(Stmt::ContractCallStmt {
                object: *object,
                method,
                args,
            }),
            _ => Err(CompileError::at(
                line,
                "expected a statement (assignment or call)",
            )),
        }
    }

    /// Converts an lvalue expression into an assignment target.
    fn expr_to_target(expr: Expr) -> Option<AssignTarget> {
        match expr {
            Expr::Variable { name, .. } => Some(AssignTarget::Var(name)),
            Expr::ArrayElement { array, index, .. } => {
                let mut indices = vec![*index];
                let mut current = *array;
                loop {
                    match current {
                        Expr::Variable { name, .. } => {
                            indices.reverse();
                            return Some(AssignTarget::ArrayElem { name, indices });
                        }
                        Expr::ArrayElement { array, index, .. } => {
                            indices.push(*index);
                            current = *array;
                        }
                        _ => return None,
                    }
                }
            }
            _ => None,
        }
    }

    // ----- expressions -----

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_and()?;
        while self.eat(Token::OrOr) {
            let rhs = self.parse_and()?;
            lhs = self.binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_cmp()?;
        while self.eat(Token::AndAnd) {
            let rhs = self.parse_cmp()?;
            lhs = self.binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr, CompileError> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Some(Token::EqEq) => Some(BinaryOp::Eq),
            Some(Token::NotEq) => Some(BinaryOp::Ne),
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Le) => Some(BinaryOp::Le),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Ge) => Some(BinaryOp::Ge),
            _ => None,
        };
        match op {
            None => Ok(lhs),
            Some(op) => {
                self.advance()?;
                let rhs = self.parse_add()?;
                Ok(self.binary(op, lhs, rhs))
            }
        }
    }

    fn parse_add(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance()?;
            let rhs = self.parse_mul()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.advance()?;
            let rhs = self.parse_unary()?;
            lhs = self.binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if self.eat(Token::Bang) {
            let expr = self.parse_unary()?;
            let id = self.fresh_id();
            return Ok(Expr::Unary {
                id,
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(Token::LBracket) {
                let index = self.parse_expr()?;
                self.expect(Token::RBracket)?;
                let id = self.fresh_id();
                expr = Expr::ArrayElement {
                    id,
                    array: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat(Token::Dot) {
                let method = self.expect_ident()?;
                self.expect(Token::LParen)?;
                let args = self.parse_expr_list(Token::RParen)?;
                let id = self.fresh_id();
                expr = Expr::ContractCall {
                    id,
                    object: Box::new(expr),
                    method,
                    args,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let spanned = self.advance()?;
        let line = spanned.line;
        match spanned.token {
            Token::Number(value) => Ok(self.constant(Val::U256(value))),
            Token::HexBytes(bytes) => Ok(self.constant(Val::ByteVec(Bytes::from_vec(bytes)))),
            Token::True => Ok(self.constant(Val::Bool(true))),
            Token::False => Ok(self.constant(Val::Bool(false))),
            Token::Question => {
                let id = self.fresh_id();
                Ok(Expr::Placeholder { id })
            }
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                let id = self.fresh_id();
                Ok(Expr::Paren {
                    id,
                    inner: Box::new(inner),
                })
            }
            Token::LBracket => {
                let elements = self.parse_expr_list(Token::RBracket)?;
                let id = self.fresh_id();
                Ok(Expr::CreateArray { id, elements })
            }
            Token::Ident(name) => {
                if self.eat(Token::LParen) {
                    let args = self.parse_expr_list(Token::RParen)?;
                    let id = self.fresh_id();
                    // Uppercase names are contract types: `Token(x)` converts
                    // a ByteVec id into a handle.
                    if name.chars().next().is_some_and(|c| c.is_uppercase()) {
                        if args.len() != 1 {
                            return Err(CompileError::at(
                                line,
                                format!("contract conversion {} takes exactly one argument", name),
                            ));
                        }
                        let address = args.into_iter().next().expect("one argument");
                        return Ok(Expr::ContractConv {
                            id,
                            contract: name,
                            address: Box::new(address),
                        });
                    }
                    return Ok(Expr::Call { id, name, args });
                }
                let id = self.fresh_id();
                Ok(Expr::Variable { id, name })
            }
            other => Err(CompileError::at(
                line,
                format!("expected an expression, got {}", other.describe()),
            )),
        }
    }

    fn parse_expr_list(&mut self, terminator: Token) -> Result<Vec<Expr>, CompileError> {
        let mut exprs = Vec::new();
        while !self.eat(terminator.clone()) {
            if !exprs.is_empty() {
                self.expect(Token::Comma)?;
            }
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    // ----- plumbing -----

    fn constant(&mut self, val: Val) -> Expr {
        let id = self.fresh_id();
        Expr::Const { id, val }
    }

    fn binary(&mut self, op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        let id = self.fresh_id();
        Expr::Binary {
            id,
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn fresh_id(&mut self) -> ExprId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn check_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(Token::RBrace)
                | Some(Token::Semicolon)
                | Some(Token::Let)
                | Some(Token::If)
                | Some(Token::While)
                | Some(Token::Emit)
                | Some(Token::Loop)
                | Some(Token::Return)
        )
    }

    fn advance(&mut self) -> Result<SpannedToken, CompileError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| CompileError::at(self.line(), "unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, token: Token) -> bool {
        if self.peek() == Some(&token) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, token: Token) -> Result<(), CompileError> {
        let line = self.line();
        let found = self.advance()?;
        if found.token != token {
            return Err(CompileError::at(
                line,
                format!(
                    "expected {}, got {}",
                    token.describe(),
                    found.token.describe()
                ),
            ));
        }
        Ok(())
    }

    fn expect_ident(&mut self) -> Result<String, CompileError> {
        let line = self.line();
        match self.advance()?.token {
            Token::Ident(name) => Ok(name),
            other => Err(CompileError::at(
                line,
                format!("expected an identifier, got {}", other.describe()),
            )),
        }
    }

    fn expect_number(&mut self) -> Result<U256, CompileError> {
        let line = self.line();
        match self.advance()?.token {
            Token::Number(value) => Ok(value),
            other => Err(CompileError::at(
                line,
                format!("expected a number, got {}", other.describe()),
            )),
        }
    }
}

//! The single-pass statement/expression compiler: consumes a stored
//! program and emits a flat `CompiledProgram`. Line-number operands
//! for `GOTO`/`GOSUB`/jump tables are emitted as raw line numbers and
//! patched to program counters in a finalization pass; internal
//! structured jumps (`IF`, `WHILE`, `DO`, `FOR`) are patched directly
//! during emission since their target is locally known.

use std::collections::HashMap;

use crate::bytecode::{CompiledProgram, Opcode, NEXT_INNERMOST};
use crate::error::{CompileError, CompileErrorKind, Span};
use crate::functions::FnId;
use crate::lexer::token::{Token, TokenKind};
use crate::lexer::tokenize;
use crate::program::StoredProgram;
use crate::symtab::SymbolTable;

const GRAPHICS_STMT_NAMES: &[&str] = &[
    "SCREEN", "CLS", "COLOR", "PSET", "LINE", "CIRCLE", "BOX", "PAINT", "FLUSH", "SAVEIMAGE",
    "COLORHSV", "SLEEP", "LOCATE", "GLOCATE", "GPRINT", "RANDOMIZE",
];

struct UserFn {
    params: Vec<String>,
    slots: Vec<u32>,
    body: String,
}

struct ForCtx {
    slot: u32,
    check_pc: usize,
}

struct Compiler {
    code: Vec<Opcode>,
    pc_to_line: Vec<u32>,
    line_to_pc: std::collections::BTreeMap<u32, usize>,
    jump_tables: Vec<Vec<usize>>,
    symtab: SymbolTable,
    user_fns: HashMap<String, UserFn>,
}

impl Compiler {
    fn emit(&mut self, op: Opcode, line: u32) -> usize {
        self.code.push(op);
        self.pc_to_line.push(line);
        self.code.len() - 1
    }

    fn patch(&mut self, pc: usize, op: Opcode) {
        self.code[pc] = op;
    }
}

pub fn compile(program: &StoredProgram) -> Result<CompiledProgram, CompileError> {
    let mut c = Compiler {
        code: Vec::new(),
        pc_to_line: Vec::new(),
        line_to_pc: std::collections::BTreeMap::new(),
        jump_tables: Vec::new(),
        symtab: SymbolTable::new(),
        user_fns: HashMap::new(),
    };

    let mut last_line = 0u32;
    for (line_no, src) in program.iter() {
        last_line = line_no;
        c.line_to_pc.insert(line_no, c.code.len());
        let lex = tokenize(line_no, src);
        if let Some(e) = lex.errors.into_iter().next() {
            return Err(e);
        }
        let mut parser = Parser::new(lex.tokens, line_no, src.to_string());
        loop {
            parser.parse_statement(&mut c)?;
            if parser.check(&TokenKind::Colon) {
                parser.advance();
                continue;
            }
            break;
        }
    }

    c.emit(Opcode::Halt, last_line);
    finalize(&mut c)?;

    tracing::debug!(opcodes = c.code.len(), lines = program.iter().count(), "compiler finalized program");

    Ok(CompiledProgram {
        code: c.code,
        pc_to_line: c.pc_to_line,
        line_to_pc: c.line_to_pc,
        jump_tables: c.jump_tables,
        symbols: c.symtab.counts(),
    })
}

/// Resolves line-number operands to PCs. A small integer that is a key in
/// `line_to_pc` is a line number; otherwise it is already a resolved PC.
fn finalize(c: &mut Compiler) -> Result<(), CompileError> {
    for i in 0..c.code.len() {
        let line = c.pc_to_line[i];
        match &c.code[i] {
            Opcode::Jmp(target) => {
                let resolved = resolve_target(c, *target, line)?;
                c.code[i] = Opcode::Jmp(resolved);
            }
            Opcode::Gosub(target) => {
                let resolved = resolve_target(c, *target, line)?;
                c.code[i] = Opcode::Gosub(resolved);
            }
            _ => {}
        }
    }

    for table in &mut c.jump_tables {
        for entry in table.iter_mut() {
            let line_num = *entry as u32;
            match c.line_to_pc.get(&line_num) {
                Some(&pc) => *entry = pc,
                None => {
                    return Err(CompileError::new(
                        CompileErrorKind::UndefinedStatement,
                        format!("undefined line {} in ON...GOTO/GOSUB table", line_num),
                        Span::new(0, 0),
                    ))
                }
            }
        }
    }

    Ok(())
}

fn resolve_target(c: &Compiler, target: usize, line: u32) -> Result<usize, CompileError> {
    if let Some(&pc) = c.line_to_pc.get(&(target as u32)) {
        return Ok(pc);
    }
    if target < c.code.len() {
        return Ok(target);
    }
    Err(CompileError::new(
        CompileErrorKind::UndefinedStatement,
        format!("undefined line {}", target),
        Span::new(line, 0),
    ))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    line: u32,
    line_src: String,
    for_stack: Vec<ForCtx>,
    while_stack: Vec<(usize, usize)>,
    do_stack: Vec<usize>,
}

impl Parser {
    fn new(tokens: Vec<Token>, line: u32, line_src: String) -> Parser {
        Parser { tokens, pos: 0, line, line_src, for_stack: Vec::new(), while_stack: Vec::new(), do_stack: Vec::new() }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn check_ident(&self, name: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(n) if n == name)
    }

    fn at_end_of_statement(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eol | TokenKind::Eof | TokenKind::Colon)
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn err(&self, kind: CompileErrorKind, message: impl Into<String>) -> CompileError {
        CompileError::new(kind, message, self.span())
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, CompileError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.err(CompileErrorKind::SyntaxError, format!("expected {}", what)))
        }
    }

    fn expect_ident(&mut self, name: &str) -> Result<(), CompileError> {
        if self.check_ident(name) {
            self.advance();
            Ok(())
        } else {
            Err(self.err(CompileErrorKind::SyntaxError, format!("expected '{}'", name)))
        }
    }

    fn advance_ident(&mut self) -> Result<String, CompileError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.err(CompileErrorKind::SyntaxError, "expected identifier")),
        }
    }

    fn expect_number(&mut self) -> Result<f64, CompileError> {
        match self.peek().kind.clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(n)
            }
            _ => Err(self.err(CompileErrorKind::SyntaxError, "expected a line number")),
        }
    }

    // ---- statements ----

    fn parse_statement(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        if self.at_end_of_statement() {
            return Ok(());
        }
        let name = match &self.peek().kind {
            TokenKind::Ident(name) => name.clone(),
            _ => return Err(self.err(CompileErrorKind::SyntaxError, "expected a statement")),
        };

        match name.as_str() {
            "REM" => {
                self.advance();
                while !matches!(self.peek().kind, TokenKind::Eol | TokenKind::Eof) {
                    self.advance();
                }
            }
            "LET" => {
                self.advance();
                self.parse_assignment(c)?;
            }
            "PRINT" => {
                self.advance();
                self.parse_print(c)?;
            }
            "INPUT" => {
                self.advance();
                self.parse_input(c)?;
            }
            "IF" => {
                self.advance();
                self.parse_if(c)?;
            }
            "GOTO" => {
                self.advance();
                let target = self.expect_number()? as usize;
                c.emit(Opcode::Jmp(target), self.line);
            }
            "GOSUB" => {
                self.advance();
                let target = self.expect_number()? as usize;
                c.emit(Opcode::Gosub(target), self.line);
            }
            "RETURN" => {
                self.advance();
                c.emit(Opcode::RetSub, self.line);
            }
            "ON" => {
                self.advance();
                self.parse_on(c)?;
            }
            "FOR" => {
                self.advance();
                self.parse_for(c)?;
            }
            "NEXT" => {
                self.advance();
                self.parse_next(c)?;
            }
            "WHILE" => {
                self.advance();
                self.parse_while(c)?;
            }
            "WEND" => {
                self.advance();
                self.parse_wend(c)?;
            }
            "DO" => {
                self.advance();
                self.parse_do(c)?;
            }
            "LOOP" => {
                self.advance();
                self.parse_loop(c)?;
            }
            "DIM" => {
                self.advance();
                self.parse_dim(c)?;
            }
            "DEF" => {
                self.advance();
                self.parse_def_fn(c)?;
            }
            "END" | "STOP" => {
                self.advance();
                c.emit(Opcode::Halt, self.line);
            }
            "RUN" | "LIST" | "NEW" => {
                self.advance();
                while !matches!(self.peek().kind, TokenKind::Eol | TokenKind::Eof | TokenKind::Colon) {
                    self.advance();
                }
            }
            _ if GRAPHICS_STMT_NAMES.contains(&name.as_str()) && FnId::by_name(&name).is_some() => {
                self.advance();
                let fn_id = FnId::by_name(&name).unwrap();
                self.parse_graphics_stmt(c, fn_id, &name)?;
            }
            _ => self.parse_assignment(c)?,
        }
        Ok(())
    }

    fn parse_stmt_list_until(&mut self, c: &mut Compiler, stop: &str) -> Result<(), CompileError> {
        loop {
            if matches!(self.peek().kind, TokenKind::Eol | TokenKind::Eof) || self.check_ident(stop) {
                break;
            }
            self.parse_statement(c)?;
            if self.check(&TokenKind::Colon) {
                self.advance();
                continue;
            }
            break;
        }
        Ok(())
    }

    fn parse_assignment(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        let name = self.advance_ident()?;
        if self.check(&TokenKind::LParen) {
            self.advance();
            self.parse_expr(c)?;
            let mut dim = 1u8;
            if self.check(&TokenKind::Comma) {
                self.advance();
                self.parse_expr(c)?;
                dim = 2;
            }
            self.expect(TokenKind::RParen, "')'")?;
            self.expect(TokenKind::Equal, "'='")?;
            self.parse_expr(c)?;
            let slot = c.symtab.array_slot(&name);
            c.emit(Opcode::StoreArr { slot, dim }, self.line);
        } else {
            self.expect(TokenKind::Equal, "'='")?;
            self.parse_expr(c)?;
            let slot = c.symtab.scalar_slot(&name);
            c.emit(Opcode::Store(slot), self.line);
        }
        Ok(())
    }

    fn parse_print(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        let mut trailing_sep = false;
        loop {
            if self.at_end_of_statement() {
                break;
            }
            self.parse_expr(c)?;
            c.emit(Opcode::Print, self.line);
            trailing_sep = false;
            if self.check(&TokenKind::Comma) {
                self.advance();
                c.emit(Opcode::PrintZone, self.line);
                trailing_sep = true;
            } else if self.check(&TokenKind::Semicolon) {
                self.advance();
                trailing_sep = true;
            } else {
                break;
            }
        }
        if trailing_sep {
            c.emit(Opcode::SuppressNewline, self.line);
        } else {
            c.emit(Opcode::PrintNewline, self.line);
        }
        Ok(())
    }

    fn parse_input(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        if let TokenKind::Str(s) = self.peek().kind.clone() {
            self.advance();
            self.expect(TokenKind::Semicolon, "';'")?;
            c.emit(Opcode::PushStr(std::rc::Rc::new(s)), self.line);
            c.emit(Opcode::Print, self.line);
        }
        c.emit(Opcode::SuppressNewline, self.line);
        let name = self.advance_ident()?;
        let slot = c.symtab.scalar_slot(&name);
        c.emit(Opcode::CallFn { fn_id: FnId::Input, argc: slot }, self.line);
        Ok(())
    }

    fn parse_if(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        self.parse_expr(c)?;
        self.expect_ident("THEN")?;
        let jz_pc = c.emit(Opcode::Jz(0), self.line);

        if let TokenKind::Number(n) = self.peek().kind.clone() {
            self.advance();
            c.emit(Opcode::Jmp(n as usize), self.line);
        } else {
            self.parse_stmt_list_until(c, "ELSE")?;
        }

        if self.check_ident("ELSE") {
            self.advance();
            let jmp_over = c.emit(Opcode::Jmp(0), self.line);
            let else_pc = c.code.len();
            c.patch(jz_pc, Opcode::Jz(else_pc));

            if let TokenKind::Number(n) = self.peek().kind.clone() {
                self.advance();
                c.emit(Opcode::Jmp(n as usize), self.line);
            } else {
                self.parse_stmt_list_until(c, "")?;
            }
            let end_pc = c.code.len();
            c.patch(jmp_over, Opcode::Jmp(end_pc));
        } else {
            let end_pc = c.code.len();
            c.patch(jz_pc, Opcode::Jz(end_pc));
        }
        Ok(())
    }

    fn parse_on(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        self.parse_expr(c)?;
        let is_gosub = if self.check_ident("GOSUB") {
            self.advance();
            true
        } else {
            self.expect_ident("GOTO")?;
            false
        };
        let mut targets = Vec::new();
        loop {
            targets.push(self.expect_number()? as usize);
            if self.check(&TokenKind::Comma) {
                self.advance();
                continue;
            }
            break;
        }
        let idx = c.jump_tables.len();
        c.jump_tables.push(targets);
        if is_gosub {
            c.emit(Opcode::OnGosub(idx), self.line);
        } else {
            c.emit(Opcode::OnGoto(idx), self.line);
        }
        Ok(())
    }

    fn parse_for(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        let name = self.advance_ident()?;
        self.expect(TokenKind::Equal, "'='")?;
        self.parse_expr(c)?;
        let slot = c.symtab.scalar_slot(&name);
        c.emit(Opcode::Store(slot), self.line);
        self.expect_ident("TO")?;
        self.parse_expr(c)?;
        if self.check_ident("STEP") {
            self.advance();
            self.parse_expr(c)?;
        } else {
            c.emit(Opcode::PushNum(1.0), self.line);
        }
        c.emit(Opcode::ForInit(slot), self.line);
        let check_pc = c.emit(Opcode::ForCheck { slot, exit_pc: 0 }, self.line);
        self.for_stack.push(ForCtx { slot, check_pc });
        Ok(())
    }

    fn parse_next(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        let slot = if let TokenKind::Ident(name) = self.peek().kind.clone() {
            self.advance();
            c.symtab.scalar_slot(&name)
        } else {
            NEXT_INNERMOST
        };
        let mut closed = Vec::new();
        if slot == NEXT_INNERMOST {
            if let Some(f) = self.for_stack.pop() {
                closed.push(f);
            }
        } else if let Some(pos) = self.for_stack.iter().rposition(|f| f.slot == slot) {
            closed = self.for_stack.split_off(pos);
        }
        c.emit(Opcode::ForIncr(slot), self.line);
        let exit_pc = c.code.len();
        for ctx in &closed {
            c.patch(ctx.check_pc, Opcode::ForCheck { slot: ctx.slot, exit_pc });
        }
        Ok(())
    }

    fn parse_while(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        let start_pc = c.code.len();
        self.parse_expr(c)?;
        let jz_pc = c.emit(Opcode::Jz(0), self.line);
        self.while_stack.push((start_pc, jz_pc));
        Ok(())
    }

    fn parse_wend(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        let (start_pc, jz_pc) = self
            .while_stack
            .pop()
            .ok_or_else(|| self.err(CompileErrorKind::SyntaxError, "WEND without WHILE"))?;
        c.emit(Opcode::Jmp(start_pc), self.line);
        let end_pc = c.code.len();
        c.patch(jz_pc, Opcode::Jz(end_pc));
        Ok(())
    }

    fn parse_do(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        self.do_stack.push(c.code.len());
        Ok(())
    }

    fn parse_loop(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        let start_pc = self
            .do_stack
            .pop()
            .ok_or_else(|| self.err(CompileErrorKind::SyntaxError, "LOOP without DO"))?;
        if self.check_ident("UNTIL") {
            self.advance();
            self.parse_expr(c)?;
            let jz_pc = c.emit(Opcode::Jz(0), self.line);
            c.emit(Opcode::Jmp(start_pc), self.line);
            let end_pc = c.code.len();
            c.patch(jz_pc, Opcode::Jz(end_pc));
        } else {
            c.emit(Opcode::Jmp(start_pc), self.line);
        }
        Ok(())
    }

    fn parse_dim(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        loop {
            let name = self.advance_ident()?;
            self.expect(TokenKind::LParen, "'('")?;
            self.parse_expr(c)?;
            let mut dim = 1u8;
            if self.check(&TokenKind::Comma) {
                self.advance();
                self.parse_expr(c)?;
                dim = 2;
            }
            self.expect(TokenKind::RParen, "')'")?;
            let slot = c.symtab.array_slot(&name);
            c.emit(Opcode::DimArr { slot, dim }, self.line);
            if self.check(&TokenKind::Comma) {
                self.advance();
                continue;
            }
            break;
        }
        Ok(())
    }

    fn parse_def_fn(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        self.expect_ident("FN")?;
        let name = self.advance_ident()?;
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        loop {
            params.push(self.advance_ident()?);
            if self.check(&TokenKind::Comma) {
                self.advance();
                continue;
            }
            break;
        }
        self.expect(TokenKind::RParen, "')'")?;
        self.expect(TokenKind::Equal, "'='")?;

        let body_col = self.peek().span.col as usize;
        while !matches!(self.peek().kind, TokenKind::Eol | TokenKind::Eof | TokenKind::Colon) {
            self.advance();
        }
        let end_col = self.peek().span.col as usize;
        let body = self
            .line_src
            .get(body_col.saturating_sub(1)..end_col.saturating_sub(1))
            .unwrap_or("")
            .trim()
            .to_string();

        let slots: Vec<u32> = params
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let hidden = if p.ends_with('$') {
                    format!("FN{}{}$", name, i)
                } else {
                    format!("FN{}{}", name, i)
                };
                c.symtab.scalar_slot(&hidden)
            })
            .collect();

        c.user_fns.insert(name, UserFn { params, slots, body });
        Ok(())
    }

    fn parse_graphics_stmt(&mut self, c: &mut Compiler, fn_id: FnId, name: &str) -> Result<(), CompileError> {
        if name == "LINE" {
            return self.parse_line_stmt(c);
        }

        let parenthesized = self.check(&TokenKind::LParen);
        if parenthesized {
            self.advance();
        }
        let mut argc = 0u32;
        loop {
            let done = if parenthesized {
                self.check(&TokenKind::RParen)
            } else {
                self.at_end_of_statement() || self.check_ident("ELSE")
            };
            if done {
                break;
            }
            self.parse_expr(c)?;
            argc += 1;
            if self.check(&TokenKind::Comma) {
                self.advance();
                continue;
            }
            break;
        }
        if parenthesized {
            self.expect(TokenKind::RParen, "')'")?;
        }
        c.emit(Opcode::CallFn { fn_id, argc }, self.line);
        Ok(())
    }

    fn parse_line_stmt(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        let mut argc;
        let mut shorthand = false;

        if self.check(&TokenKind::Minus) {
            self.advance();
            self.expect(TokenKind::LParen, "'('")?;
            self.parse_expr(c)?;
            self.expect(TokenKind::Comma, "','")?;
            self.parse_expr(c)?;
            self.expect(TokenKind::RParen, "')'")?;
            argc = 2;
            shorthand = true;
        } else if self.check(&TokenKind::LParen) {
            self.advance();
            self.parse_expr(c)?;
            self.expect(TokenKind::Comma, "','")?;
            self.parse_expr(c)?;
            self.expect(TokenKind::RParen, "')'")?;
            self.expect(TokenKind::Minus, "'-'")?;
            self.expect(TokenKind::LParen, "'('")?;
            self.parse_expr(c)?;
            self.expect(TokenKind::Comma, "','")?;
            self.parse_expr(c)?;
            self.expect(TokenKind::RParen, "')'")?;
            argc = 4;
        } else {
            self.parse_expr(c)?;
            self.expect(TokenKind::Comma, "','")?;
            self.parse_expr(c)?;
            self.expect(TokenKind::Comma, "','")?;
            self.parse_expr(c)?;
            self.expect(TokenKind::Comma, "','")?;
            self.parse_expr(c)?;
            argc = 4;
        }
        if self.check(&TokenKind::Comma) {
            self.advance();
            self.parse_expr(c)?;
            argc += 1;
        }
        let encoded = if shorthand { argc | (1 << 30) } else { argc };
        c.emit(Opcode::CallFn { fn_id: FnId::Line, argc: encoded }, self.line);
        Ok(())
    }

    // ---- expressions: Pratt-style precedence climb ----
    // OR < AND < comparison < + - < * / MOD < ^ < unary + - NOT < primary

    fn parse_expr(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        self.parse_or(c)
    }

    fn parse_or(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        self.parse_and(c)?;
        while self.check(&TokenKind::Or) {
            self.advance();
            self.parse_and(c)?;
            c.emit(Opcode::Or, self.line);
        }
        Ok(())
    }

    fn parse_and(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        self.parse_comparison(c)?;
        while self.check(&TokenKind::And) {
            self.advance();
            self.parse_comparison(c)?;
            c.emit(Opcode::And, self.line);
        }
        Ok(())
    }

    fn parse_comparison(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        self.parse_additive(c)?;
        let op = match &self.peek().kind {
            TokenKind::Equal => Some(Opcode::Ceq),
            TokenKind::NotEqual => Some(Opcode::Cne),
            TokenKind::Less => Some(Opcode::Clt),
            TokenKind::LessEqual => Some(Opcode::Cle),
            TokenKind::Greater => Some(Opcode::Cgt),
            TokenKind::GreaterEqual => Some(Opcode::Cge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            self.parse_additive(c)?;
            c.emit(op, self.line);
        }
        Ok(())
    }

    fn parse_additive(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        self.parse_multiplicative(c)?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Plus => Opcode::Add,
                TokenKind::Minus => Opcode::Sub,
                _ => break,
            };
            self.advance();
            self.parse_multiplicative(c)?;
            c.emit(op, self.line);
        }
        Ok(())
    }

    fn parse_multiplicative(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        self.parse_power(c)?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Star => Opcode::Mul,
                TokenKind::Slash => Opcode::Div,
                TokenKind::Mod => Opcode::Mod,
                _ => break,
            };
            self.advance();
            self.parse_power(c)?;
            c.emit(op, self.line);
        }
        Ok(())
    }

    fn parse_power(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        self.parse_unary(c)?;
        if self.check(&TokenKind::Caret) {
            self.advance();
            self.parse_power(c)?; // right-associative
            c.emit(Opcode::Pow, self.line);
        }
        Ok(())
    }

    fn parse_unary(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        if self.check(&TokenKind::Plus) {
            self.advance();
            self.parse_unary(c)
        } else if self.check(&TokenKind::Minus) {
            self.advance();
            self.parse_unary(c)?;
            c.emit(Opcode::Neg, self.line);
            Ok(())
        } else if self.check(&TokenKind::Not) {
            self.advance();
            self.parse_unary(c)?;
            c.emit(Opcode::Not, self.line);
            Ok(())
        } else {
            self.parse_primary(c)
        }
    }

    fn parse_primary(&mut self, c: &mut Compiler) -> Result<(), CompileError> {
        match self.peek().kind.clone() {
            TokenKind::Number(n) => {
                self.advance();
                c.emit(Opcode::PushNum(n), self.line);
                Ok(())
            }
            TokenKind::Str(s) => {
                self.advance();
                c.emit(Opcode::PushStr(std::rc::Rc::new(s)), self.line);
                Ok(())
            }
            TokenKind::LParen => {
                self.advance();
                self.parse_expr(c)?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(())
            }
            TokenKind::Ident(mut name) => {
                self.advance();
                if name == "FN" {
                    if let TokenKind::Ident(inner) = self.peek().kind.clone() {
                        self.advance();
                        name = inner;
                    }
                }
                self.parse_name_primary(c, name)
            }
            _ => Err(self.err(CompileErrorKind::SyntaxError, "expected an expression")),
        }
    }

    fn parse_name_primary(&mut self, c: &mut Compiler, name: String) -> Result<(), CompileError> {
        if c.user_fns.contains_key(&name) {
            return self.parse_user_fn_call(c, name);
        }
        if let Some(fn_id) = FnId::by_name(&name) {
            return self.parse_builtin_call(c, fn_id);
        }
        // plain variable: scalar or array access
        if self.check(&TokenKind::LParen) {
            self.advance();
            self.parse_expr(c)?;
            let mut dim = 1u8;
            if self.check(&TokenKind::Comma) {
                self.advance();
                self.parse_expr(c)?;
                dim = 2;
            }
            self.expect(TokenKind::RParen, "')'")?;
            let slot = c.symtab.array_slot(&name);
            c.emit(Opcode::LoadArr { slot, dim }, self.line);
        } else {
            let slot = c.symtab.scalar_slot(&name);
            c.emit(Opcode::Load(slot), self.line);
        }
        Ok(())
    }

    fn parse_builtin_call(&mut self, c: &mut Compiler, fn_id: FnId) -> Result<(), CompileError> {
        let mut argc = 0u32;
        if self.check(&TokenKind::LParen) {
            self.advance();
            if !self.check(&TokenKind::RParen) {
                loop {
                    self.parse_expr(c)?;
                    argc += 1;
                    if self.check(&TokenKind::Comma) {
                        self.advance();
                        continue;
                    }
                    break;
                }
            }
            self.expect(TokenKind::RParen, "')'")?;
        } else if !fn_id.allows_bare_call() {
            return Err(self.err(CompileErrorKind::SyntaxError, "function requires arguments"));
        }
        c.emit(Opcode::CallFn { fn_id, argc }, self.line);
        Ok(())
    }

    fn parse_user_fn_call(&mut self, c: &mut Compiler, name: String) -> Result<(), CompileError> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut argc = 0usize;
        if !self.check(&TokenKind::RParen) {
            loop {
                self.parse_expr(c)?;
                argc += 1;
                if self.check(&TokenKind::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen, "')'")?;

        let (slots, body, expected) = {
            let f = &c.user_fns[&name];
            (f.slots.clone(), f.body.clone(), f.params.len())
        };
        if argc != expected {
            return Err(self.err(
                CompileErrorKind::ArgumentCountMismatch,
                format!("function {} expects {} argument(s), got {}", name, expected, argc),
            ));
        }
        for &slot in slots.iter().rev() {
            c.emit(Opcode::Store(slot), self.line);
        }

        let body_lex = tokenize(self.line, &body);
        let mut sub = Parser::new(body_lex.tokens, self.line, body);
        sub.parse_expr(c)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_src(lines: &[(u32, &str)]) -> CompiledProgram {
        let mut p = StoredProgram::new();
        for (n, s) in lines {
            p.set_line(*n, s);
        }
        compile(&p).expect("compiles")
    }

    #[test]
    fn test_assignment_and_print() {
        let prog = compile_src(&[(10, "A = 3 : B = 4"), (20, "PRINT A + B")]);
        assert!(matches!(prog.code.last(), Some(Opcode::Halt)));
    }

    #[test]
    fn test_goto_resolves_forward_reference() {
        let prog = compile_src(&[(10, "GOTO 30"), (20, "PRINT 1"), (30, "PRINT 2")]);
        let target_pc = prog.line_to_pc[&30];
        assert_eq!(prog.code[0], Opcode::Jmp(target_pc));
    }

    #[test]
    fn test_undefined_goto_target_errors() {
        let mut p = StoredProgram::new();
        p.set_line(10, "GOTO 999");
        assert!(compile(&p).is_err());
    }

    #[test]
    fn test_on_goto_table_resolved() {
        let prog = compile_src(&[(10, "ON 1 GOTO 20,30"), (20, "PRINT 1"), (30, "PRINT 2")]);
        assert_eq!(prog.jump_tables[0], vec![prog.line_to_pc[&20], prog.line_to_pc[&30]]);
    }

    #[test]
    fn test_for_next_emits_init_check_incr() {
        let prog = compile_src(&[(10, "FOR I=1 TO 5"), (20, "NEXT I")]);
        assert!(prog.code.iter().any(|op| matches!(op, Opcode::ForInit(_))));
        assert!(prog.code.iter().any(|op| matches!(op, Opcode::ForIncr(_))));
    }

    #[test]
    fn test_def_fn_inlines_body_at_call_site() {
        let prog = compile_src(&[(10, "DEF FN SQR2(X) = X*X"), (20, "PRINT FN SQR2(6)")]);
        assert!(prog.code.iter().any(|op| matches!(op, Opcode::Mul)));
    }

    #[test]
    fn test_def_fn_arity_mismatch_errors() {
        let mut p = StoredProgram::new();
        p.set_line(10, "DEF FN ADD(X,Y) = X+Y");
        p.set_line(20, "PRINT FN ADD(1)");
        assert!(compile(&p).is_err());
    }
}

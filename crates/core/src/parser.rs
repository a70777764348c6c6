//! Recursive-descent parser producing a [`Module`] from murk source text.

use crate::ast::{BinOp, BoolOp, CmpOp, Definition, Expr, Module, Stmt, StmtKind, UnaryOp};
use crate::lexer::{Token, TokenKind, tokenize};
use murk_utils::errors::ParseError;

/// Parses a complete source unit.
pub fn parse(source: &str) -> Result<Module, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut body = Vec::new();
    while !parser.at(&TokenKind::Eof) {
        body.push(parser.statement()?);
    }
    tracing::debug!("parsed {} top-level statements", body.len());
    Ok(Module { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn at_punct(&self, punct: &str) -> bool {
        matches!(self.peek().kind, TokenKind::Punct(p) if p == punct)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek().kind, TokenKind::Keyword(k) if k == keyword)
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        ParseError::UnexpectedToken {
            line: token.line,
            column: token.column,
            found: token.kind.to_string(),
            expected: expected.to_string(),
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), ParseError> {
        if self.at_punct(punct) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{punct}'")))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.at_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{keyword}'")))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Name(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn expect_newline(&mut self) -> Result<(), ParseError> {
        if self.at(&TokenKind::Newline) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected("end of line"))
        }
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.peek().line;
        let kind = match self.peek().kind {
            TokenKind::Keyword("def") => self.definition()?,
            TokenKind::Keyword("if") => {
                self.advance();
                self.if_chain()?
            }
            TokenKind::Keyword("while") => {
                self.advance();
                let test = self.expression()?;
                let body = self.block()?;
                StmtKind::While { test, body }
            }
            TokenKind::Keyword("for") => {
                self.advance();
                let target = self.expect_name()?;
                self.expect_keyword("in")?;
                let iter = self.expression()?;
                let body = self.block()?;
                StmtKind::For { target, iter, body }
            }
            _ => {
                let kind = self.simple_statement()?;
                self.expect_newline()?;
                kind
            }
        };
        Ok(Stmt::new(line, kind))
    }

    fn definition(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("def")?;
        let name = self.expect_name()?;
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.at_punct(")") {
            params.push(self.expect_name()?);
            if !self.at_punct(")") {
                self.expect_punct(",")?;
            }
        }
        self.expect_punct(")")?;
        let body = self.block()?;
        Ok(StmtKind::Def(Definition { name, params, body }))
    }

    /// Parses the remainder of an `if` after its keyword; `elif` nests into `orelse`.
    fn if_chain(&mut self) -> Result<StmtKind, ParseError> {
        let test = self.expression()?;
        let body = self.block()?;
        let orelse = if self.at_keyword("elif") {
            let line = self.advance().line;
            vec![Stmt::new(line, self.if_chain()?)]
        } else if self.at_keyword("else") {
            self.advance();
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    /// Parses `':' NEWLINE INDENT stmt+ DEDENT`, or a single simple statement on the same line.
    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_punct(":")?;
        if !self.at(&TokenKind::Newline) {
            let line = self.peek().line;
            let kind = self.simple_statement()?;
            self.expect_newline()?;
            return Ok(vec![Stmt::new(line, kind)]);
        }
        let line = self.advance().line;
        if !self.at(&TokenKind::Indent) {
            return Err(ParseError::ExpectedIndent { line });
        }
        self.advance();
        let mut body = Vec::new();
        while !self.at(&TokenKind::Dedent) && !self.at(&TokenKind::Eof) {
            body.push(self.statement()?);
        }
        if self.at(&TokenKind::Dedent) {
            self.advance();
        }
        Ok(body)
    }

    fn simple_statement(&mut self) -> Result<StmtKind, ParseError> {
        match self.peek().kind {
            TokenKind::Keyword("pass") => {
                self.advance();
                return Ok(StmtKind::Pass);
            }
            TokenKind::Keyword("break") => {
                self.advance();
                return Ok(StmtKind::Break);
            }
            TokenKind::Keyword("continue") => {
                self.advance();
                return Ok(StmtKind::Continue);
            }
            TokenKind::Keyword("return") => {
                self.advance();
                if self.at(&TokenKind::Newline) {
                    return Ok(StmtKind::Return(None));
                }
                return Ok(StmtKind::Return(Some(self.expression()?)));
            }
            _ => {}
        }

        let start = self.pos;
        let expr = self.expression()?;
        let aug = match self.peek().kind {
            TokenKind::Punct("=") => None,
            TokenKind::Punct("+=") => Some(BinOp::Add),
            TokenKind::Punct("-=") => Some(BinOp::Sub),
            TokenKind::Punct("*=") => Some(BinOp::Mul),
            TokenKind::Punct("//=") => Some(BinOp::FloorDiv),
            TokenKind::Punct("%=") => Some(BinOp::Mod),
            _ => return Ok(StmtKind::Expr(expr)),
        };
        let Expr::Name(target) = expr else {
            self.pos = start;
            return Err(self.unexpected("assignment target name"));
        };
        self.advance();
        let value = self.expression()?;
        Ok(match aug {
            None => StmtKind::Assign { target, value },
            Some(op) => StmtKind::AugAssign { target, op, value },
        })
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.at_keyword("or") {
            self.advance();
            let right = self.and_expr()?;
            left = Expr::BoolOp {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_expr()?;
        while self.at_keyword("and") {
            self.advance();
            let right = self.not_expr()?;
            left = Expr::BoolOp {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.at_keyword("not") {
            self.advance();
            let operand = self.not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.arith()?;
        let op = match self.peek().kind {
            TokenKind::Punct("==") => CmpOp::Eq,
            TokenKind::Punct("!=") => CmpOp::NotEq,
            TokenKind::Punct("<") => CmpOp::Lt,
            TokenKind::Punct("<=") => CmpOp::LtE,
            TokenKind::Punct(">") => CmpOp::Gt,
            TokenKind::Punct(">=") => CmpOp::GtE,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.arith()?;
        Ok(Expr::compare(op, left, right))
    }

    fn arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Punct("+") => BinOp::Add,
                TokenKind::Punct("-") => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Punct("*") => BinOp::Mul,
                TokenKind::Punct("//") => BinOp::FloorDiv,
                TokenKind::Punct("%") => BinOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        if self.at_punct("-") {
            self.advance();
            let operand = self.factor()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.atom()?;
        loop {
            if self.at_punct("(") {
                self.advance();
                let args = self.sequence(")")?;
                expr = Expr::call(expr, args);
            } else if self.at_punct("[") {
                self.advance();
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions up to `close`, trailing comma allowed.
    fn sequence(&mut self, close: &str) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        while !self.at_punct(close) {
            items.push(self.expression()?);
            if !self.at_punct(close) {
                self.expect_punct(",")?;
            }
        }
        self.expect_punct(close)?;
        Ok(items)
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let expr = match &self.peek().kind {
            TokenKind::Int(value) => Expr::Int(*value),
            TokenKind::Str(value) => Expr::Str(value.clone()),
            TokenKind::Name(name) => Expr::Name(name.clone()),
            TokenKind::Keyword("True") => Expr::Bool(true),
            TokenKind::Keyword("False") => Expr::Bool(false),
            TokenKind::Keyword("None") => Expr::None,
            TokenKind::Punct("(") => {
                self.advance();
                let inner = self.expression()?;
                self.expect_punct(")")?;
                return Ok(inner);
            }
            TokenKind::Punct("[") => {
                self.advance();
                return Ok(Expr::List(self.sequence("]")?));
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.advance();
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_definition_with_body() {
        let module = parse("def add(a, b):\n    c = a + b\n    return c\n").unwrap();
        assert_eq!(module.body.len(), 1);
        let StmtKind::Def(def) = &module.body[0].kind else {
            panic!("expected a definition");
        };
        assert_eq!(def.name, "add");
        assert_eq!(def.params, vec!["a", "b"]);
        assert_eq!(def.body.len(), 2);
        assert_eq!(def.body[1].line, 3);
        assert!(def.body[1].is_return());
    }

    #[test]
    fn elif_nests_into_orelse() {
        let module = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n").unwrap();
        let StmtKind::If { orelse, .. } = &module.body[0].kind else {
            panic!("expected if");
        };
        assert_eq!(orelse.len(), 1);
        let StmtKind::If { orelse: inner, .. } = &orelse[0].kind else {
            panic!("expected nested if");
        };
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let module = parse("x = 1 + 2 * 3\n").unwrap();
        let StmtKind::Assign { value, .. } = &module.body[0].kind else {
            panic!("expected assignment");
        };
        let Expr::Binary { op, right, .. } = value else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(**right, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn augmented_assignment() {
        let module = parse("total += i\n").unwrap();
        assert_eq!(
            module.body[0].kind,
            StmtKind::AugAssign {
                target: "total".into(),
                op: BinOp::Add,
                value: Expr::name("i"),
            }
        );
    }

    #[test]
    fn single_line_block() {
        let module = parse("while x: x -= 1\n").unwrap();
        let StmtKind::While { body, .. } = &module.body[0].kind else {
            panic!("expected while");
        };
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn rejects_non_name_assignment_target() {
        let err = parse("f(x) = 1\n").unwrap_err();
        assert!(matches!(
            err,
            ParseError::UnexpectedToken { line: 1, column: 1, .. }
        ));
    }

    #[test]
    fn missing_indent_is_reported() {
        let err = parse("def f():\nreturn 1\n").unwrap_err();
        assert_eq!(err, ParseError::ExpectedIndent { line: 1 });
    }

    #[test]
    fn keyword_cannot_be_a_parameter() {
        assert!(parse("def f(return):\n    pass\n").is_err());
    }
}

use anyhow::{anyhow, bail, Result};

use crate::{
    ast::{Expression, Program, Statement},
    lexer::Lexer,
    token::Token,
};

#[derive(Debug, Clone, PartialOrd, PartialEq, Eq, Ord)]
enum Precedence {
    Lowest,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

impl Precedence {
    fn from_token(token: &Token) -> Self {
        match token {
            Token::Eq | Token::NotEq => Precedence::Equals,
            Token::Lt | Token::Gt => Precedence::LessGreater,
            Token::Plus | Token::Minus => Precedence::Sum,
            Token::Asterisk | Token::Slash => Precedence::Product,
            Token::Lparen => Precedence::Call,
            Token::Lbracket => Precedence::Index,
            _ => Precedence::Lowest,
        }
    }
}

/// Pratt parser over a two-token window. Parsing is best-effort: a statement
/// that fails to parse records its message and parsing resumes at the next
/// token, so one bad statement surfaces every diagnostic it causes.
pub struct Parser {
    lexer: Lexer,
    cur_token: Option<Token>,
    peek_token: Option<Token>,
    errors: Vec<String>,
}

impl Parser {
    pub fn new(mut lexer: Lexer) -> Self {
        Self {
            cur_token: lexer.next_token(),
            peek_token: lexer.next_token(),
            lexer,
            errors: Vec::new(),
        }
    }

    /// Parses until EOF. Returns the program only if no statement failed;
    /// otherwise the error carries every recorded message, one per line.
    pub fn parse_program(&mut self) -> Result<Program> {
        let mut statements: Vec<Statement> = Vec::new();
        while self.cur_token().is_some() {
            match self.parse_statement() {
                Ok(statement) => statements.push(statement),
                Err(error) => self.errors.push(error.to_string()),
            }
            self.next_token();
        }

        if self.errors.is_empty() {
            Ok(Program { statements })
        } else {
            Err(anyhow!(self.errors.join("\n")))
        }
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    fn cur_token(&self) -> Option<Token> {
        self.cur_token.clone()
    }

    fn peek_token(&self) -> Option<Token> {
        self.peek_token.clone()
    }

    fn next_token(&mut self) -> &mut Self {
        self.cur_token = self.peek_token.take();
        self.peek_token = self.lexer.next_token();
        self
    }

    fn peek_precedence(&self) -> Precedence {
        match &self.peek_token {
            Some(token) => Precedence::from_token(token),
            None => Precedence::Lowest,
        }
    }

    fn cur_precedence(&self) -> Result<Precedence> {
        Ok(Precedence::from_token(
            self.cur_token.as_ref().ok_or(anyhow!("no token found"))?,
        ))
    }

    fn peek_token_is(&self, token: &Token) -> bool {
        self.peek_token
            .as_ref()
            .is_some_and(|peek| peek.variant_eq(token))
    }

    fn expect_peek(&mut self, expected: Token) -> Result<()> {
        match &self.peek_token {
            Some(peek) if peek.variant_eq(&expected) => {
                self.next_token();
                Ok(())
            }
            Some(peek) => bail!("expected next token to be {expected}, got {peek} instead"),
            None => bail!("expected next token to be {expected}, got EOF instead"),
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.cur_token().ok_or(anyhow!("no token found"))? {
            Token::Let => self.parse_let_statement(),
            Token::Return => self.parse_return_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let_statement(&mut self) -> Result<Statement> {
        let name = match &self.peek_token {
            Some(Token::Ident(value)) => Expression::Identifier(value.clone()),
            Some(token) => bail!("expected next token to be IDENT, got {token} instead"),
            None => bail!("expected next token to be IDENT, got EOF instead"),
        };
        self.next_token();

        self.expect_peek(Token::Assign)?;

        self.next_token();

        let value = self.parse_expression(Precedence::Lowest)?;

        if self.peek_token_is(&Token::Semicolon) {
            self.next_token();
        }

        Ok(Statement::Let { name, value })
    }

    fn parse_return_statement(&mut self) -> Result<Statement> {
        self.next_token();

        let value = self.parse_expression(Precedence::Lowest)?;

        if self.peek_token_is(&Token::Semicolon) {
            self.next_token();
        }

        Ok(Statement::Return(value))
    }

    fn parse_expression_statement(&mut self) -> Result<Statement> {
        let expression = self.parse_expression(Precedence::Lowest)?;

        if self.peek_token_is(&Token::Semicolon) {
            self.next_token();
        }

        Ok(Statement::Expression(expression))
    }

    fn parse_expression(&mut self, precedence: Precedence) -> Result<Expression> {
        let cur_token = self.cur_token().ok_or(anyhow!("no token found"))?;

        let mut left = match cur_token {
            Token::Ident(value) => Expression::Identifier(value),
            Token::Int(value) => self.parse_integer_literal(value)?,
            Token::String(value) => Expression::StringLiteral(value),
            Token::True => Expression::BooleanLiteral(true),
            Token::False => Expression::BooleanLiteral(false),
            token @ (Token::Bang | Token::Minus) => self.parse_prefix_expression(token)?,
            Token::Lparen => self.parse_grouped_expression()?,
            Token::Lbracket => self.parse_array_literal()?,
            Token::Lbrace => self.parse_hash_literal()?,
            Token::If => self.parse_if_expression()?,
            Token::Function => self.parse_function_literal()?,
            token => bail!("no prefix parse function for {token} found"),
        };

        while !self.peek_token_is(&Token::Semicolon) && precedence < self.peek_precedence() {
            left = match self.peek_token {
                Some(
                    Token::Plus
                    | Token::Minus
                    | Token::Asterisk
                    | Token::Slash
                    | Token::Eq
                    | Token::NotEq
                    | Token::Lt
                    | Token::Gt,
                ) => {
                    self.next_token();
                    self.parse_infix_expression(left)?
                }
                Some(Token::Lparen) => {
                    self.next_token();
                    self.parse_call_expression(left)?
                }
                Some(Token::Lbracket) => {
                    self.next_token();
                    self.parse_index_expression(left)?
                }
                _ => return Ok(left),
            };
        }

        Ok(left)
    }

    fn parse_integer_literal(&mut self, literal: String) -> Result<Expression> {
        let value = literal
            .parse::<i64>()
            .map_err(|_| anyhow!("could not parse {literal} as integer"))?;
        Ok(Expression::IntegerLiteral(value))
    }

    fn parse_prefix_expression(&mut self, operator: Token) -> Result<Expression> {
        self.next_token();
        let right = self.parse_expression(Precedence::Prefix)?;
        Ok(Expression::Prefix {
            operator,
            right: Box::new(right),
        })
    }

    fn parse_infix_expression(&mut self, left: Expression) -> Result<Expression> {
        let operator = self.cur_token().ok_or(anyhow!("no token found"))?;
        let precedence = self.cur_precedence()?;
        self.next_token();
        let right = self.parse_expression(precedence)?;
        Ok(Expression::Infix {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        })
    }

    fn parse_grouped_expression(&mut self) -> Result<Expression> {
        self.next_token();
        let expression = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(Token::Rparen)?;
        Ok(expression)
    }

    fn parse_if_expression(&mut self) -> Result<Expression> {
        self.expect_peek(Token::Lparen)?;

        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;

        self.expect_peek(Token::Rparen)?;
        self.expect_peek(Token::Lbrace)?;

        let consequence = self.parse_block_statement()?;

        let alternative = if self.peek_token_is(&Token::Else) {
            self.next_token();
            self.expect_peek(Token::Lbrace)?;
            Some(Box::new(self.parse_block_statement()?))
        } else {
            None
        };

        Ok(Expression::If {
            condition: Box::new(condition),
            consequence: Box::new(consequence),
            alternative,
        })
    }

    fn parse_block_statement(&mut self) -> Result<Statement> {
        self.next_token();

        let mut statements: Vec<Statement> = Vec::new();

        while self
            .cur_token
            .as_ref()
            .is_some_and(|token| !token.variant_eq(&Token::Rbrace))
        {
            statements.push(self.parse_statement()?);
            self.next_token();
        }

        Ok(Statement::Block(statements))
    }

    fn parse_function_literal(&mut self) -> Result<Expression> {
        self.expect_peek(Token::Lparen)?;

        let parameters = self.parse_function_parameters()?;

        self.expect_peek(Token::Lbrace)?;

        let body = self.parse_block_statement()?;

        Ok(Expression::FunctionLiteral {
            parameters,
            body: Box::new(body),
        })
    }

    fn parse_function_parameters(&mut self) -> Result<Vec<Expression>> {
        let mut parameters: Vec<Expression> = Vec::new();

        if self.peek_token_is(&Token::Rparen) {
            self.next_token();
            return Ok(parameters);
        }

        loop {
            parameters.push(match self.next_token().cur_token() {
                Some(Token::Ident(value)) => Expression::Identifier(value),
                Some(token) => bail!("expected next token to be IDENT, got {token} instead"),
                None => bail!("expected next token to be IDENT, got EOF instead"),
            });

            if !self.peek_token_is(&Token::Comma) {
                break;
            }
            self.next_token();
        }

        self.expect_peek(Token::Rparen)?;

        Ok(parameters)
    }

    fn parse_array_literal(&mut self) -> Result<Expression> {
        let elements = self.parse_expression_list(Token::Rbracket)?;
        Ok(Expression::ArrayLiteral(elements))
    }

    fn parse_hash_literal(&mut self) -> Result<Expression> {
        let mut pairs: Vec<(Expression, Expression)> = Vec::new();

        while !self.peek_token_is(&Token::Rbrace) {
            self.next_token();
            let key = self.parse_expression(Precedence::Lowest)?;
            self.expect_peek(Token::Colon)?;
            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));
            if !self.peek_token_is(&Token::Rbrace) {
                self.expect_peek(Token::Comma)?;
            }
        }

        self.expect_peek(Token::Rbrace)?;

        Ok(Expression::HashLiteral(pairs))
    }

    fn parse_call_expression(&mut self, function: Expression) -> Result<Expression> {
        let arguments = self.parse_expression_list(Token::Rparen)?;
        Ok(Expression::Call {
            function: Box::new(function),
            arguments,
        })
    }

    fn parse_expression_list(&mut self, end_token: Token) -> Result<Vec<Expression>> {
        let mut expressions: Vec<Expression> = Vec::new();

        if self.peek_token_is(&end_token) {
            self.next_token();
            return Ok(expressions);
        }

        self.next_token();
        expressions.push(self.parse_expression(Precedence::Lowest)?);

        while self.peek_token_is(&Token::Comma) {
            self.next_token();
            self.next_token();
            expressions.push(self.parse_expression(Precedence::Lowest)?);
        }

        self.expect_peek(end_token)?;

        Ok(expressions)
    }

    fn parse_index_expression(&mut self, left: Expression) -> Result<Expression> {
        self.next_token();
        let index = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(Token::Rbracket)?;
        Ok(Expression::Index {
            left: Box::new(left),
            index: Box::new(index),
        })
    }
}

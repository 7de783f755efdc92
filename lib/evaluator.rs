use std::{cell::RefCell, collections::HashMap, rc::Rc};

use anyhow::{anyhow, bail, Result};

use crate::{
    ast::{Expression, Program, Statement},
    builtins::Builtins,
    environment::Environment,
    object::Object,
    token::Token,
};

const TRUE: Object = Object::Boolean(true);
const FALSE: Object = Object::Boolean(false);
const NULL: Object = Object::Null;

/// Tree-walking backend. Holds the root environment, which persists across
/// `eval` calls so a REPL accumulates bindings.
pub struct Evaluator {
    env: Rc<RefCell<Environment>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }

    pub fn eval(&mut self, program: Program) -> Result<Object> {
        let mut result = NULL;
        for statement in program.statements {
            result = match self.eval_statement(statement)? {
                // A top-level return yields its inner value.
                Object::ReturnValue(value) => return Ok(*value),
                object => object,
            };
        }
        Ok(result)
    }

    fn eval_statement(&mut self, statement: Statement) -> Result<Object> {
        match statement {
            Statement::Expression(expression) => self.eval_expression(expression),
            Statement::Block(statements) => self.eval_block_statement(statements),
            Statement::Return(expression) => {
                let value = self.eval_expression(expression)?;
                Ok(Object::ReturnValue(Box::new(value)))
            }
            Statement::Let { name, value } => self.eval_let_statement(name, value),
        }
    }

    fn eval_block_statement(&mut self, statements: Vec<Statement>) -> Result<Object> {
        let mut result = NULL;
        for statement in statements {
            result = self.eval_statement(statement)?;
            // Keep the wrapper intact so enclosing blocks and the function
            // call site can see the in-flight return.
            if let Object::ReturnValue(_) = result {
                return Ok(result);
            }
        }
        Ok(result)
    }

    fn eval_let_statement(&mut self, name: Expression, value: Expression) -> Result<Object> {
        let value = self.eval_expression(value)?;
        let name = match name {
            Expression::Identifier(name) => name,
            expression => bail!("expected identifier in let binding, found {expression}"),
        };
        self.env.borrow_mut().set(&name, value);
        Ok(NULL)
    }

    fn eval_expression(&mut self, expression: Expression) -> Result<Object> {
        match expression {
            Expression::IntegerLiteral(value) => Ok(Object::Integer(value)),
            Expression::StringLiteral(value) => Ok(Object::String(value)),
            Expression::BooleanLiteral(value) => Ok(bool_object(value)),
            Expression::Identifier(name) => self.eval_identifier(name),
            Expression::Prefix { operator, right } => {
                let right = self.eval_expression(*right)?;
                self.eval_prefix_expression(operator, right)
            }
            Expression::Infix {
                left,
                operator,
                right,
            } => {
                let left = self.eval_expression(*left)?;
                let right = self.eval_expression(*right)?;
                self.eval_infix_expression(left, operator, right)
            }
            Expression::If {
                condition,
                consequence,
                alternative,
            } => self.eval_if_expression(*condition, *consequence, alternative),
            Expression::FunctionLiteral { parameters, body } => {
                self.eval_function_literal(parameters, body)
            }
            Expression::Call {
                function,
                arguments,
            } => self.eval_call_expression(*function, arguments),
            Expression::ArrayLiteral(elements) => self.eval_array_literal(elements),
            Expression::HashLiteral(pairs) => self.eval_hash_literal(pairs),
            Expression::Index { left, index } => self.eval_index_expression(*left, *index),
        }
    }

    fn eval_identifier(&mut self, name: String) -> Result<Object> {
        if let Some(value) = self.env.borrow().get(&name) {
            return Ok(value);
        }
        Builtins::lookup(&name).ok_or_else(|| anyhow!("identifier not found: {name}"))
    }

    fn eval_prefix_expression(&mut self, operator: Token, right: Object) -> Result<Object> {
        match operator {
            Token::Bang => Ok(match right {
                Object::Boolean(value) => bool_object(!value),
                Object::Null => TRUE,
                _ => FALSE,
            }),
            Token::Minus => match right {
                Object::Integer(value) => Ok(Object::Integer(-value)),
                right => bail!("unknown operator: -{}", right.type_name()),
            },
            operator => bail!("unknown operator: {}{}", operator, right.type_name()),
        }
    }

    fn eval_infix_expression(
        &mut self,
        left: Object,
        operator: Token,
        right: Object,
    ) -> Result<Object> {
        match (left, right) {
            (Object::Integer(left), Object::Integer(right)) => {
                self.eval_integer_infix_expression(left, operator, right)
            }
            (Object::String(left), Object::String(right)) => {
                self.eval_string_infix_expression(left, operator, right)
            }
            (left, right) => match operator {
                Token::Eq => Ok(bool_object(left == right)),
                Token::NotEq => Ok(bool_object(left != right)),
                operator if left.type_name() != right.type_name() => bail!(
                    "type mismatch: {} {} {}",
                    left.type_name(),
                    operator,
                    right.type_name()
                ),
                operator => bail!(
                    "unknown operator: {} {} {}",
                    left.type_name(),
                    operator,
                    right.type_name()
                ),
            },
        }
    }

    fn eval_integer_infix_expression(
        &mut self,
        left: i64,
        operator: Token,
        right: i64,
    ) -> Result<Object> {
        match operator {
            Token::Plus => Ok(Object::Integer(left + right)),
            Token::Minus => Ok(Object::Integer(left - right)),
            Token::Asterisk => Ok(Object::Integer(left * right)),
            Token::Slash => {
                if right == 0 {
                    bail!("division by zero");
                }
                Ok(Object::Integer(left / right))
            }
            Token::Lt => Ok(bool_object(left < right)),
            Token::Gt => Ok(bool_object(left > right)),
            Token::Eq => Ok(bool_object(left == right)),
            Token::NotEq => Ok(bool_object(left != right)),
            operator => bail!("unknown operator: INTEGER {} INTEGER", operator),
        }
    }

    fn eval_string_infix_expression(
        &mut self,
        left: String,
        operator: Token,
        right: String,
    ) -> Result<Object> {
        match operator {
            Token::Plus => Ok(Object::String(format!("{}{}", left, right))),
            operator => bail!("unknown operator: STRING {} STRING", operator),
        }
    }

    fn eval_if_expression(
        &mut self,
        condition: Expression,
        consequence: Statement,
        alternative: Option<Box<Statement>>,
    ) -> Result<Object> {
        let condition = self.eval_expression(condition)?;
        if condition.is_truthy() {
            self.eval_statement(consequence)
        } else if let Some(alternative) = alternative {
            self.eval_statement(*alternative)
        } else {
            Ok(NULL)
        }
    }

    fn eval_function_literal(
        &mut self,
        parameters: Vec<Expression>,
        body: Box<Statement>,
    ) -> Result<Object> {
        let parameters = parameters
            .into_iter()
            .map(|parameter| match parameter {
                Expression::Identifier(name) => Ok(name),
                expression => Err(anyhow!("expected identifier parameter, found {expression}")),
            })
            .collect::<Result<Vec<String>>>()?;
        Ok(Object::Function {
            parameters,
            body,
            env: self.env.clone(),
        })
    }

    fn eval_call_expression(
        &mut self,
        function: Expression,
        arguments: Vec<Expression>,
    ) -> Result<Object> {
        let function = self.eval_expression(function)?;
        let args = arguments
            .into_iter()
            .map(|argument| self.eval_expression(argument))
            .collect::<Result<Vec<Object>>>()?;

        match function {
            Object::Function {
                parameters,
                body,
                env,
            } => {
                if parameters.len() != args.len() {
                    bail!(
                        "wrong number of arguments: want={}, got={}",
                        parameters.len(),
                        args.len()
                    );
                }
                // The call environment encloses the function's captured
                // environment, not the caller's.
                let call_env = Environment::new_enclosed(env);
                parameters.into_iter().zip(args).for_each(|(name, value)| {
                    call_env.borrow_mut().set(&name, value);
                });
                let caller_env = std::mem::replace(&mut self.env, call_env);
                let result = self.eval_statement(*body);
                self.env = caller_env;
                match result? {
                    Object::ReturnValue(value) => Ok(*value),
                    object => Ok(object),
                }
            }
            Object::Builtin(function) => function(args),
            function => bail!("not a function: {}", function.type_name()),
        }
    }

    fn eval_array_literal(&mut self, elements: Vec<Expression>) -> Result<Object> {
        let elements = elements
            .into_iter()
            .map(|element| self.eval_expression(element))
            .collect::<Result<Vec<Object>>>()?;
        Ok(Object::Array(elements))
    }

    fn eval_hash_literal(&mut self, pairs: Vec<(Expression, Expression)>) -> Result<Object> {
        let mut hash = HashMap::new();
        for (key, value) in pairs {
            let key = self.eval_expression(key)?;
            let hash_key = key.hash_key()?;
            let value = self.eval_expression(value)?;
            hash.insert(hash_key, (key, value));
        }
        Ok(Object::Hash(hash))
    }

    fn eval_index_expression(&mut self, left: Expression, index: Expression) -> Result<Object> {
        let left = self.eval_expression(left)?;
        let index = self.eval_expression(index)?;
        match (left, index) {
            (Object::Array(elements), Object::Integer(index)) => {
                if index < 0 || index as usize >= elements.len() {
                    Ok(NULL)
                } else {
                    Ok(elements[index as usize].clone())
                }
            }
            (Object::Hash(pairs), index) => {
                let key = index.hash_key()?;
                Ok(pairs
                    .get(&key)
                    .map(|(_, value)| value.clone())
                    .unwrap_or(NULL))
            }
            (left, _) => bail!("index operator not supported: {}", left.type_name()),
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn bool_object(value: bool) -> Object {
    if value {
        TRUE
    } else {
        FALSE
    }
}

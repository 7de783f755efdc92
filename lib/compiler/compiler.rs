use anyhow::{anyhow, bail, Result};

use crate::{
    ast::{Expression, Program, Statement},
    builtins::Builtins,
    object::Object,
    token::Token,
};

use super::{
    code::{Instructions, Opcode},
    symbol_table::{Symbol, SymbolScope, SymbolTable},
};

/// Jump operand emitted before the target is known; patched in place.
const PLACEHOLDER: usize = 0xFFFF;

#[derive(Debug, Clone)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

#[derive(Debug)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

impl CompilationScope {
    fn new() -> Self {
        Self {
            instructions: Instructions::new(),
            last_instruction: None,
            previous_instruction: None,
        }
    }
}

/// Lowers an AST into bytecode. The constants pool and symbol table survive
/// across `compile` calls, so a REPL can keep feeding the same compiler and
/// earlier globals stay addressable.
pub struct Compiler {
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
}

#[derive(Debug)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbol_table = SymbolTable::new();
        for (index, name) in Builtins::names().enumerate() {
            symbol_table.define_builtin(index, name);
        }
        Self {
            constants: vec![],
            symbol_table,
            scopes: vec![CompilationScope::new()],
        }
    }

    pub fn compile(&mut self, program: Program) -> Result<Bytecode> {
        self.scopes = vec![CompilationScope::new()];
        // A failed compile can abort inside a function; make sure stale
        // scopes never leak into this one.
        self.symbol_table = std::mem::take(&mut self.symbol_table).into_root();

        for statement in program.statements {
            self.compile_statement(statement)?;
        }

        let main_scope = self.scopes.pop().ok_or(anyhow!("no compilation scope"))?;
        Ok(Bytecode {
            instructions: main_scope.instructions,
            constants: self.constants.clone(),
        })
    }

    fn compile_statement(&mut self, statement: Statement) -> Result<()> {
        match statement {
            Statement::Expression(expression) => {
                self.compile_expression(expression)?;
                self.emit(Opcode::Pop, vec![])?;
            }
            Statement::Block(statements) => {
                for statement in statements {
                    self.compile_statement(statement)?;
                }
            }
            Statement::Let { name, value } => {
                self.compile_expression(value)?;
                let name = match name {
                    Expression::Identifier(name) => name,
                    expression => bail!("expected identifier in let binding, found {expression}"),
                };
                let symbol = self.symbol_table.define(&name);
                match symbol.scope {
                    SymbolScope::Global => self.emit(Opcode::SetGlobal, vec![symbol.index])?,
                    _ => self.emit(Opcode::SetLocal, vec![symbol.index])?,
                };
            }
            Statement::Return(value) => {
                self.compile_expression(value)?;
                self.emit(Opcode::ReturnValue, vec![])?;
            }
        }
        Ok(())
    }

    fn compile_expression(&mut self, expression: Expression) -> Result<()> {
        match expression {
            Expression::IntegerLiteral(value) => {
                let index = self.add_constant(Object::Integer(value));
                self.emit(Opcode::Constant, vec![index])?;
            }
            Expression::StringLiteral(value) => {
                let index = self.add_constant(Object::String(value));
                self.emit(Opcode::Constant, vec![index])?;
            }
            Expression::BooleanLiteral(value) => {
                if value {
                    self.emit(Opcode::True, vec![])?;
                } else {
                    self.emit(Opcode::False, vec![])?;
                }
            }
            Expression::Identifier(name) => {
                let symbol = self
                    .symbol_table
                    .resolve(&name)
                    .ok_or_else(|| anyhow!("undefined variable {name}"))?;
                self.load_symbol(symbol)?;
            }
            Expression::Prefix { operator, right } => {
                self.compile_expression(*right)?;
                match operator {
                    Token::Bang => self.emit(Opcode::Bang, vec![])?,
                    Token::Minus => self.emit(Opcode::Minus, vec![])?,
                    operator => bail!("unknown operator: {operator}"),
                };
            }
            Expression::Infix {
                left,
                operator,
                right,
            } => {
                // `<` has no opcode: emit operands reversed and compare with
                // OpGreaterThan.
                if operator == Token::Lt {
                    self.compile_expression(*right)?;
                    self.compile_expression(*left)?;
                    self.emit(Opcode::GreaterThan, vec![])?;
                    return Ok(());
                }

                self.compile_expression(*left)?;
                self.compile_expression(*right)?;
                match operator {
                    Token::Plus => self.emit(Opcode::Add, vec![])?,
                    Token::Minus => self.emit(Opcode::Sub, vec![])?,
                    Token::Asterisk => self.emit(Opcode::Mul, vec![])?,
                    Token::Slash => self.emit(Opcode::Div, vec![])?,
                    Token::Gt => self.emit(Opcode::GreaterThan, vec![])?,
                    Token::Eq => self.emit(Opcode::Equal, vec![])?,
                    Token::NotEq => self.emit(Opcode::NotEqual, vec![])?,
                    operator => bail!("unknown operator: {operator}"),
                };
            }
            Expression::If {
                condition,
                consequence,
                alternative,
            } => self.compile_if_expression(*condition, *consequence, alternative)?,
            Expression::ArrayLiteral(elements) => {
                let length = elements.len();
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::Array, vec![length])?;
            }
            Expression::HashLiteral(mut pairs) => {
                // Source order is not deterministic input for the constant
                // pool; sort keys by their printed form.
                pairs.sort_by_key(|(key, _)| key.to_string());
                let length = pairs.len() * 2;
                for (key, value) in pairs {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Opcode::Hash, vec![length])?;
            }
            Expression::Index { left, index } => {
                self.compile_expression(*left)?;
                self.compile_expression(*index)?;
                self.emit(Opcode::Index, vec![])?;
            }
            Expression::FunctionLiteral { parameters, body } => {
                self.compile_function_literal(parameters, *body)?;
            }
            Expression::Call {
                function,
                arguments,
            } => {
                self.compile_expression(*function)?;
                let argument_count = arguments.len();
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(Opcode::Call, vec![argument_count])?;
            }
        }
        Ok(())
    }

    fn compile_if_expression(
        &mut self,
        condition: Expression,
        consequence: Statement,
        alternative: Option<Box<Statement>>,
    ) -> Result<()> {
        self.compile_expression(condition)?;
        let jump_not_truthy = self.emit(Opcode::JumpNotTruthy, vec![PLACEHOLDER])?;

        self.compile_statement(consequence)?;
        // The branch is an expression: keep its value on the stack.
        if self.last_instruction_is(Opcode::Pop) {
            self.remove_last_instruction()?;
        }

        let jump = self.emit(Opcode::Jump, vec![PLACEHOLDER])?;
        let after_consequence = self.current_position()?;
        self.change_operand(jump_not_truthy, after_consequence)?;

        match alternative {
            Some(alternative) => {
                self.compile_statement(*alternative)?;
                if self.last_instruction_is(Opcode::Pop) {
                    self.remove_last_instruction()?;
                }
            }
            None => {
                self.emit(Opcode::Null, vec![])?;
            }
        }

        let after_alternative = self.current_position()?;
        self.change_operand(jump, after_alternative)?;

        Ok(())
    }

    fn compile_function_literal(
        &mut self,
        parameters: Vec<Expression>,
        body: Statement,
    ) -> Result<()> {
        self.enter_scope();

        let num_parameters = parameters.len();
        for parameter in parameters {
            match parameter {
                Expression::Identifier(name) => {
                    self.symbol_table.define(&name);
                }
                expression => bail!("expected identifier parameter, found {expression}"),
            }
        }

        self.compile_statement(body)?;

        // An expression in tail position becomes the return value; a body
        // that emits nothing returns null.
        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_with_return_value()?;
        }
        if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, vec![])?;
        }

        let num_locals = self.symbol_table.num_definitions();
        let instructions = self.leave_scope()?;

        let index = self.add_constant(Object::CompiledFunction {
            instructions,
            num_locals,
            num_parameters,
        });
        self.emit(Opcode::Constant, vec![index])?;

        Ok(())
    }

    fn load_symbol(&mut self, symbol: Symbol) -> Result<()> {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, vec![symbol.index])?,
            SymbolScope::Local => self.emit(Opcode::GetLocal, vec![symbol.index])?,
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, vec![symbol.index])?,
        };
        Ok(())
    }

    fn add_constant(&mut self, object: Object) -> usize {
        self.constants.push(object);
        self.constants.len() - 1
    }

    fn emit(&mut self, opcode: Opcode, operands: Vec<usize>) -> Result<usize> {
        let instruction = Instructions::make(opcode.clone(), operands)?;
        let scope = self.current_scope_mut()?;
        let position = scope.instructions.extend(instruction);
        scope.previous_instruction = scope.last_instruction.take();
        scope.last_instruction = Some(EmittedInstruction { opcode, position });
        Ok(position)
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::new());
        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer);
    }

    fn leave_scope(&mut self) -> Result<Instructions> {
        let scope = self.scopes.pop().ok_or(anyhow!("no compilation scope"))?;
        self.symbol_table = std::mem::take(&mut self.symbol_table)
            .into_outer()
            .ok_or(anyhow!("no enclosing symbol table"))?;
        Ok(scope.instructions)
    }

    fn current_scope_mut(&mut self) -> Result<&mut CompilationScope> {
        self.scopes.last_mut().ok_or(anyhow!("no compilation scope"))
    }

    fn current_position(&mut self) -> Result<usize> {
        Ok(self.current_scope_mut()?.instructions.inner().len())
    }

    fn last_instruction_is(&self, opcode: Opcode) -> bool {
        self.scopes
            .last()
            .and_then(|scope| scope.last_instruction.as_ref())
            .is_some_and(|last| last.opcode == opcode)
    }

    fn remove_last_instruction(&mut self) -> Result<()> {
        let scope = self.current_scope_mut()?;
        if let Some(last) = scope.last_instruction.take() {
            scope.instructions.drain_at(last.position);
            scope.last_instruction = scope.previous_instruction.take();
        }
        Ok(())
    }

    fn replace_last_with_return_value(&mut self) -> Result<()> {
        let instruction = Instructions::make(Opcode::ReturnValue, vec![])?;
        let scope = self.current_scope_mut()?;
        let last = scope
            .last_instruction
            .as_mut()
            .ok_or(anyhow!("no instruction to replace"))?;
        scope.instructions.drain_at(last.position);
        scope.instructions.extend(instruction);
        last.opcode = Opcode::ReturnValue;
        Ok(())
    }

    fn change_operand(&mut self, position: usize, operand: usize) -> Result<()> {
        self.current_scope_mut()?
            .instructions
            .change_u16_operand(position, operand)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

use std::{collections::HashMap, io::Cursor};

use anyhow::{anyhow, bail, Result};
use byteorder::{BigEndian, ReadBytesExt};

use crate::{builtins::Builtins, object::Object};

use super::{
    code::{Instructions, Opcode},
    compiler::Bytecode,
};

const STACK_SIZE: usize = 2048;
const GLOBALS_SIZE: usize = 65536;
const FRAMES_SIZE: usize = 1024;

const NULL: Object = Object::Null;
const TRUE: Object = Object::Boolean(true);
const FALSE: Object = Object::Boolean(false);

/// One in-progress call: the function's instruction stream (the cursor
/// position is the instruction pointer) and the stack offset where its
/// locals begin.
#[derive(Debug)]
struct Frame {
    instructions: Cursor<Vec<u8>>,
    base_pointer: usize,
}

impl Frame {
    fn new(instructions: Instructions, base_pointer: usize) -> Self {
        Self {
            instructions: Cursor::new(instructions.into_inner()),
            base_pointer,
        }
    }

    fn has_more(&self) -> bool {
        (self.instructions.position() as usize) < self.instructions.get_ref().len()
    }

    fn jump_to(&mut self, position: usize) {
        self.instructions.set_position(position as u64);
    }
}

/// Stack machine over compiled bytecode. Globals persist across `run` calls
/// so a REPL can keep feeding the same machine.
pub struct VirtualMachine {
    constants: Vec<Object>,
    globals: Vec<Object>,

    stack: Vec<Object>,
    frames: Vec<Frame>,
    last_popped: Option<Object>,
}

impl VirtualMachine {
    pub fn new() -> Self {
        Self {
            constants: vec![],
            globals: vec![NULL; GLOBALS_SIZE],
            stack: Vec::with_capacity(STACK_SIZE),
            frames: Vec::with_capacity(FRAMES_SIZE),
            last_popped: None,
        }
    }

    /// Executes the bytecode and returns the last value popped off the
    /// stack, which for a well-formed program is the value of its final
    /// expression statement.
    pub fn run(&mut self, bytecode: Bytecode) -> Result<Object> {
        self.constants = bytecode.constants;
        self.stack.clear();
        self.frames.clear();
        self.frames.push(Frame::new(bytecode.instructions, 0));
        self.last_popped = None;

        while self.current_frame()?.has_more() {
            let opcode = Opcode::try_from(self.current_frame()?.instructions.read_u8()?)?;
            match opcode {
                Opcode::Constant => {
                    let index = self.read_u16()?;
                    let constant = self
                        .constants
                        .get(index)
                        .cloned()
                        .ok_or(anyhow!("no constant at index {index}"))?;
                    self.push(constant)?;
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Equal
                | Opcode::NotEqual
                | Opcode::GreaterThan => {
                    self.execute_binary_operation(opcode)?;
                }
                Opcode::True => {
                    self.push(TRUE)?;
                }
                Opcode::False => {
                    self.push(FALSE)?;
                }
                Opcode::Null => {
                    self.push(NULL)?;
                }
                Opcode::Minus => {
                    let operand = self.pop()?;
                    match operand {
                        Object::Integer(value) => self.push(Object::Integer(-value))?,
                        operand => {
                            bail!("unsupported type for negation: {}", operand.type_name())
                        }
                    }
                }
                Opcode::Bang => {
                    let operand = self.pop()?;
                    let negated = match operand {
                        Object::Boolean(value) => bool_object(!value),
                        Object::Null => TRUE,
                        _ => FALSE,
                    };
                    self.push(negated)?;
                }
                Opcode::Jump => {
                    let position = self.read_u16()?;
                    self.current_frame()?.jump_to(position);
                }
                Opcode::JumpNotTruthy => {
                    let position = self.read_u16()?;
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.current_frame()?.jump_to(position);
                    }
                }
                Opcode::SetGlobal => {
                    let index = self.read_u16()?;
                    self.globals[index] = self.pop()?;
                }
                Opcode::GetGlobal => {
                    let index = self.read_u16()?;
                    let global = self.globals[index].clone();
                    self.push(global)?;
                }
                Opcode::Array => {
                    let length = self.read_u16()?;
                    let elements = self.take_from_stack(length)?;
                    self.push(Object::Array(elements))?;
                }
                Opcode::Hash => {
                    let length = self.read_u16()?;
                    let mut hash = HashMap::with_capacity(length / 2);
                    let mut entries = self.take_from_stack(length)?.into_iter();
                    while let (Some(key), Some(value)) = (entries.next(), entries.next()) {
                        let hash_key = key.hash_key()?;
                        hash.insert(hash_key, (key, value));
                    }
                    self.push(Object::Hash(hash))?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    self.execute_index_expression(left, index)?;
                }
                Opcode::Call => {
                    let argument_count = self.read_u8()?;
                    self.execute_call(argument_count)?;
                }
                Opcode::ReturnValue => {
                    let return_value = self.pop()?;
                    if self.frames.len() == 1 {
                        // A return in the main program ends execution with
                        // its value.
                        let frame = self.current_frame()?;
                        let end = frame.instructions.get_ref().len();
                        frame.jump_to(end);
                        self.push(return_value)?;
                    } else {
                        let frame = self.pop_frame()?;
                        self.stack.truncate(frame.base_pointer - 1);
                        self.push(return_value)?;
                    }
                }
                Opcode::Return => {
                    let frame = self.pop_frame()?;
                    self.stack.truncate(frame.base_pointer - 1);
                    self.push(NULL)?;
                }
                Opcode::SetLocal => {
                    let index = self.read_u8()?;
                    let slot = self.current_frame()?.base_pointer + index;
                    let value = self.pop()?;
                    self.stack[slot] = value;
                }
                Opcode::GetLocal => {
                    let index = self.read_u8()?;
                    let slot = self.current_frame()?.base_pointer + index;
                    let value = self.stack[slot].clone();
                    self.push(value)?;
                }
                Opcode::GetBuiltin => {
                    let index = self.read_u8()?;
                    let builtin =
                        Builtins::get(index).ok_or(anyhow!("no builtin at index {index}"))?;
                    self.push(builtin)?;
                }
            }
        }

        Ok(self.last_popped.clone().unwrap_or(NULL))
    }

    fn current_frame(&mut self) -> Result<&mut Frame> {
        self.frames.last_mut().ok_or(anyhow!("no frame found"))
    }

    fn pop_frame(&mut self) -> Result<Frame> {
        self.frames.pop().ok_or(anyhow!("no frame found"))
    }

    fn read_u16(&mut self) -> Result<usize> {
        Ok(self.current_frame()?.instructions.read_u16::<BigEndian>()? as usize)
    }

    fn read_u8(&mut self) -> Result<usize> {
        Ok(self.current_frame()?.instructions.read_u8()? as usize)
    }

    fn push(&mut self, object: Object) -> Result<()> {
        if self.stack.len() >= STACK_SIZE {
            bail!("stack overflow");
        }
        self.stack.push(object);
        Ok(())
    }

    fn pop(&mut self) -> Result<Object> {
        match self.stack.pop() {
            Some(object) => {
                self.last_popped = Some(object.clone());
                Ok(object)
            }
            None => bail!("stack is empty"),
        }
    }

    /// Removes the top `count` values, preserving their stack order.
    fn take_from_stack(&mut self, count: usize) -> Result<Vec<Object>> {
        if self.stack.len() < count {
            bail!("stack is empty");
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn execute_call(&mut self, argument_count: usize) -> Result<()> {
        let callee_index = self
            .stack
            .len()
            .checked_sub(argument_count + 1)
            .ok_or(anyhow!("stack is empty"))?;

        match self.stack[callee_index].clone() {
            Object::CompiledFunction {
                instructions,
                num_locals,
                num_parameters,
            } => {
                if argument_count != num_parameters {
                    bail!(
                        "wrong number of arguments: want={}, got={}",
                        num_parameters,
                        argument_count
                    );
                }
                // Arguments already sit where the frame's first locals go;
                // reserve slots for the rest.
                let base_pointer = self.stack.len() - argument_count;
                if self.frames.len() >= FRAMES_SIZE {
                    bail!("frame overflow");
                }
                self.frames.push(Frame::new(instructions, base_pointer));
                for _ in 0..(num_locals - num_parameters) {
                    self.push(NULL)?;
                }
            }
            Object::Builtin(function) => {
                let args = self.take_from_stack(argument_count)?;
                let result = function(args)?;
                self.stack.truncate(callee_index);
                self.push(result)?;
            }
            object => bail!(
                "calling non-function and non-built-in: {}",
                object.type_name()
            ),
        }
        Ok(())
    }

    fn execute_binary_operation(&mut self, opcode: Opcode) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match (left, right) {
            (Object::Integer(left), Object::Integer(right)) => match opcode {
                Opcode::Add => Object::Integer(left + right),
                Opcode::Sub => Object::Integer(left - right),
                Opcode::Mul => Object::Integer(left * right),
                Opcode::Div => {
                    if right == 0 {
                        bail!("division by zero");
                    }
                    Object::Integer(left / right)
                }
                Opcode::Equal => bool_object(left == right),
                Opcode::NotEqual => bool_object(left != right),
                Opcode::GreaterThan => bool_object(left > right),
                opcode => bail!("unknown integer operator: {}", opcode.name()),
            },
            (Object::String(left), Object::String(right)) => match opcode {
                Opcode::Add => Object::String(format!("{}{}", left, right)),
                Opcode::Equal => bool_object(left == right),
                Opcode::NotEqual => bool_object(left != right),
                opcode => bail!("unknown string operator: {}", opcode.name()),
            },
            (left, right) => match opcode {
                Opcode::Equal => bool_object(left == right),
                Opcode::NotEqual => bool_object(left != right),
                opcode => bail!(
                    "unsupported types for {}: {} {}",
                    opcode.name(),
                    left.type_name(),
                    right.type_name()
                ),
            },
        };
        self.push(result)
    }

    fn execute_index_expression(&mut self, left: Object, index: Object) -> Result<()> {
        match (left, index) {
            (Object::Array(elements), Object::Integer(index)) => {
                if index < 0 || index as usize >= elements.len() {
                    self.push(NULL)
                } else {
                    self.push(elements[index as usize].clone())
                }
            }
            (Object::Hash(pairs), index) => {
                let key = index.hash_key()?;
                let value = pairs
                    .get(&key)
                    .map(|(_, value)| value.clone())
                    .unwrap_or(NULL);
                self.push(value)
            }
            (left, _) => bail!("index operator not supported: {}", left.type_name()),
        }
    }
}

impl Default for VirtualMachine {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compiler::Compiler, lexer::Lexer, parser::Parser};

    fn run(input: &str) -> Result<Object> {
        let program = Parser::new(Lexer::new(input))
            .parse_program()
            .expect("input should parse");
        let bytecode = Compiler::new().compile(program)?;
        VirtualMachine::new().run(bytecode)
    }

    fn run_vm_tests(cases: Vec<(&str, Object)>) {
        for (input, expected) in cases {
            assert_eq!(run(input).unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn integer_arithmetic() {
        run_vm_tests(vec![
            ("1", Object::Integer(1)),
            ("2", Object::Integer(2)),
            ("1 + 2", Object::Integer(3)),
            ("1 - 2", Object::Integer(-1)),
            ("1 * 2", Object::Integer(2)),
            ("4 / 2", Object::Integer(2)),
            ("50 / 2 * 2 + 10 - 5", Object::Integer(55)),
            ("5 + 5 + 5 + 5 - 10", Object::Integer(10)),
            ("2 * 2 * 2 * 2 * 2", Object::Integer(32)),
            ("5 * 2 + 10", Object::Integer(20)),
            ("5 + 2 * 10", Object::Integer(25)),
            ("5 * (2 + 10)", Object::Integer(60)),
            ("-5", Object::Integer(-5)),
            ("-10", Object::Integer(-10)),
            ("-50 + 100 + -50", Object::Integer(0)),
            ("(5 + 10 * 2 + 15 / 3) * 2 + -10", Object::Integer(50)),
        ]);
    }

    #[test]
    fn boolean_expressions() {
        run_vm_tests(vec![
            ("true", TRUE),
            ("false", FALSE),
            ("1 < 2", TRUE),
            ("1 > 2", FALSE),
            ("1 < 1", FALSE),
            ("1 > 1", FALSE),
            ("1 == 1", TRUE),
            ("1 != 1", FALSE),
            ("1 == 2", FALSE),
            ("1 != 2", TRUE),
            ("true == true", TRUE),
            ("false == false", TRUE),
            ("true == false", FALSE),
            ("true != false", TRUE),
            ("false != true", TRUE),
            ("(1 < 2) == true", TRUE),
            ("(1 < 2) == false", FALSE),
            ("(1 > 2) == true", FALSE),
            ("(1 > 2) == false", TRUE),
            ("!true", FALSE),
            ("!false", TRUE),
            ("!5", FALSE),
            ("!!true", TRUE),
            ("!!false", FALSE),
            ("!!5", TRUE),
            ("!(if (false) { 5; })", TRUE),
        ]);
    }

    #[test]
    fn conditionals() {
        run_vm_tests(vec![
            ("if (true) { 10 }", Object::Integer(10)),
            ("if (true) { 10 } else { 20 }", Object::Integer(10)),
            ("if (false) { 10 } else { 20 }", Object::Integer(20)),
            ("if (1) { 10 }", Object::Integer(10)),
            ("if (1 < 2) { 10 }", Object::Integer(10)),
            ("if (1 < 2) { 10 } else { 20 }", Object::Integer(10)),
            ("if (1 > 2) { 10 } else { 20 }", Object::Integer(20)),
            ("if (1 > 2) { 10 }", Object::Null),
            ("if (false) { 10 }", Object::Null),
            (
                "if ((if (false) { 10 })) { 10 } else { 20 }",
                Object::Integer(20),
            ),
        ]);
    }

    #[test]
    fn global_let_statements() {
        run_vm_tests(vec![
            ("let one = 1; one", Object::Integer(1)),
            ("let one = 1; let two = 2; one + two", Object::Integer(3)),
            (
                "let one = 1; let two = one + one; one + two",
                Object::Integer(3),
            ),
        ]);
    }

    #[test]
    fn string_expressions() {
        run_vm_tests(vec![
            (r#""monkey""#, Object::String("monkey".to_string())),
            (r#""mon" + "key""#, Object::String("monkey".to_string())),
            (
                r#""mon" + "key" + "banana""#,
                Object::String("monkeybanana".to_string()),
            ),
            (
                r#""Hello" + " " + "World!""#,
                Object::String("Hello World!".to_string()),
            ),
        ]);
    }

    #[test]
    fn array_literals() {
        run_vm_tests(vec![
            ("[]", Object::Array(vec![])),
            (
                "[1, 2, 3]",
                Object::Array(vec![
                    Object::Integer(1),
                    Object::Integer(2),
                    Object::Integer(3),
                ]),
            ),
            (
                "[1 + 2, 3 * 4, 5 + 6]",
                Object::Array(vec![
                    Object::Integer(3),
                    Object::Integer(12),
                    Object::Integer(11),
                ]),
            ),
        ]);
    }

    #[test]
    fn hash_literals() {
        let expected: HashMap<_, _> = vec![
            (Object::Integer(2), Object::Integer(4)),
            (Object::Integer(6), Object::Integer(16)),
        ]
        .into_iter()
        .map(|(key, value)| (key.hash_key().unwrap(), (key, value)))
        .collect();

        run_vm_tests(vec![
            ("{}", Object::Hash(HashMap::new())),
            ("{1 + 1: 2 * 2, 3 + 3: 4 * 4}", Object::Hash(expected)),
        ]);
    }

    #[test]
    fn index_expressions() {
        run_vm_tests(vec![
            ("[1, 2, 3][1]", Object::Integer(2)),
            ("[1, 2, 3][0 + 2]", Object::Integer(3)),
            ("[[1, 1, 1]][0][0]", Object::Integer(1)),
            ("[][0]", Object::Null),
            ("[1, 2, 3][99]", Object::Null),
            ("[1][-1]", Object::Null),
            ("{1: 1, 2: 2}[1]", Object::Integer(1)),
            ("{1: 1, 2: 2}[2]", Object::Integer(2)),
            ("{1: 1}[0]", Object::Null),
            ("{}[0]", Object::Null),
        ]);
    }

    #[test]
    fn calling_functions_without_arguments() {
        run_vm_tests(vec![
            (
                "let fivePlusTen = fn() { 5 + 10; }; fivePlusTen();",
                Object::Integer(15),
            ),
            (
                "let one = fn() { 1; }; let two = fn() { 2; }; one() + two()",
                Object::Integer(3),
            ),
            (
                "let a = fn() { 1 }; let b = fn() { a() + 1 }; let c = fn() { b() + 1 }; c()",
                Object::Integer(3),
            ),
        ]);
    }

    #[test]
    fn functions_with_return_statements() {
        run_vm_tests(vec![
            (
                "let earlyExit = fn() { return 99; 100; }; earlyExit();",
                Object::Integer(99),
            ),
            (
                "let earlyExit = fn() { return 99; return 100; }; earlyExit();",
                Object::Integer(99),
            ),
        ]);
    }

    #[test]
    fn functions_without_return_value() {
        run_vm_tests(vec![
            ("let noReturn = fn() { }; noReturn();", Object::Null),
            (
                "let noReturn = fn() { }; let noReturnTwo = fn() { noReturn(); }; noReturn(); noReturnTwo();",
                Object::Null,
            ),
        ]);
    }

    #[test]
    fn top_level_returns() {
        run_vm_tests(vec![
            ("return 10;", Object::Integer(10)),
            ("return 10; 9;", Object::Integer(10)),
            ("9; return 2 * 5; 9;", Object::Integer(10)),
            (
                "if (10 > 1) { if (10 > 1) { return 10; } return 1; }",
                Object::Integer(10),
            ),
        ]);
    }

    #[test]
    fn first_class_functions() {
        run_vm_tests(vec![
            (
                "let returnsOne = fn() { 1; }; let returnsOneReturner = fn() { returnsOne; }; returnsOneReturner()();",
                Object::Integer(1),
            ),
            (
                "let returnsOneReturner = fn() { let returnsOne = fn() { 1; }; returnsOne; }; returnsOneReturner()();",
                Object::Integer(1),
            ),
        ]);
    }

    #[test]
    fn calling_functions_with_bindings() {
        run_vm_tests(vec![
            (
                "let one = fn() { let one = 1; one }; one();",
                Object::Integer(1),
            ),
            (
                "let oneAndTwo = fn() { let one = 1; let two = 2; one + two; }; oneAndTwo();",
                Object::Integer(3),
            ),
            (
                "let oneAndTwo = fn() { let one = 1; let two = 2; one + two; }; let threeAndFour = fn() { let three = 3; let four = 4; three + four; }; oneAndTwo() + threeAndFour();",
                Object::Integer(10),
            ),
            (
                "let firstFoobar = fn() { let foobar = 50; foobar; }; let secondFoobar = fn() { let foobar = 100; foobar; }; firstFoobar() + secondFoobar();",
                Object::Integer(150),
            ),
            (
                "let globalSeed = 50; let minusOne = fn() { let num = 1; globalSeed - num; }; let minusTwo = fn() { let num = 2; globalSeed - num; }; minusOne() + minusTwo();",
                Object::Integer(97),
            ),
        ]);
    }

    #[test]
    fn calling_functions_with_arguments_and_bindings() {
        run_vm_tests(vec![
            ("let identity = fn(a) { a; }; identity(4);", Object::Integer(4)),
            (
                "let sum = fn(a, b) { a + b; }; sum(1, 2);",
                Object::Integer(3),
            ),
            (
                "let sum = fn(a, b) { let c = a + b; c; }; sum(1, 2);",
                Object::Integer(3),
            ),
            (
                "let sum = fn(a, b) { let c = a + b; c; }; sum(1, 2) + sum(3, 4);",
                Object::Integer(10),
            ),
            (
                "let sum = fn(a, b) { let c = a + b; c; }; let outer = fn() { sum(1, 2) + sum(3, 4); }; outer();",
                Object::Integer(10),
            ),
            (
                r#"
                let globalNum = 10;
                let sum = fn(a, b) {
                    let c = a + b;
                    c + globalNum;
                };
                let outer = fn() {
                    sum(1, 2) + sum(3, 4) + globalNum;
                };
                outer() + globalNum;
                "#,
                Object::Integer(50),
            ),
        ]);
    }

    #[test]
    fn calling_functions_with_wrong_argument_count() {
        let cases = vec![
            ("fn() { 1; }(1);", "wrong number of arguments: want=0, got=1"),
            ("fn(a) { a; }();", "wrong number of arguments: want=1, got=0"),
            (
                "fn(a, b) { a + b; }(1);",
                "wrong number of arguments: want=2, got=1",
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(run(input).unwrap_err().to_string(), expected, "{input}");
        }
    }

    #[test]
    fn builtin_functions() {
        run_vm_tests(vec![
            (r#"len("")"#, Object::Integer(0)),
            (r#"len("four")"#, Object::Integer(4)),
            (r#"len("hello world")"#, Object::Integer(11)),
            ("len([1, 2, 3])", Object::Integer(3)),
            ("len([])", Object::Integer(0)),
            ("first([1, 2, 3])", Object::Integer(1)),
            ("first([])", Object::Null),
            ("last([1, 2, 3])", Object::Integer(3)),
            ("last([])", Object::Null),
            (
                "rest([1, 2, 3])",
                Object::Array(vec![Object::Integer(2), Object::Integer(3)]),
            ),
            ("rest([])", Object::Null),
            ("push([], 1)", Object::Array(vec![Object::Integer(1)])),
            ("first(rest(push([1, 2], 3)))", Object::Integer(2)),
            (r#"puts("hello", "world!")"#, Object::Null),
        ]);
    }

    #[test]
    fn builtin_function_errors() {
        let cases = vec![
            ("len(1)", "argument to `len` not supported, got INTEGER"),
            (
                r#"len("one", "two")"#,
                "wrong number of arguments. got=2, want=1",
            ),
            ("first(1)", "argument to `first` must be ARRAY, got INTEGER"),
            ("push(1, 1)", "argument to `push` must be ARRAY, got INTEGER"),
        ];
        for (input, expected) in cases {
            assert_eq!(run(input).unwrap_err().to_string(), expected, "{input}");
        }
    }

    #[test]
    fn runtime_errors() {
        let cases = vec![
            (
                "5 + true",
                "unsupported types for OpAdd: INTEGER BOOLEAN",
            ),
            (
                "true + false",
                "unsupported types for OpAdd: BOOLEAN BOOLEAN",
            ),
            ("-true", "unsupported type for negation: BOOLEAN"),
            ("5 / 0", "division by zero"),
            (
                "5(3)",
                "calling non-function and non-built-in: INTEGER",
            ),
            (
                "{fn() { 1 }: 2}",
                "unusable as hash key: COMPILED_FUNCTION_OBJ",
            ),
            (
                r#"{"name": "Monkey"}[fn() { 1 }]"#,
                "unusable as hash key: COMPILED_FUNCTION_OBJ",
            ),
            ("1[0]", "index operator not supported: INTEGER"),
        ];
        for (input, expected) in cases {
            assert_eq!(run(input).unwrap_err().to_string(), expected, "{input}");
        }
    }

    #[test]
    fn stack_overflow_is_reported() {
        let input = format!("[{}]", vec!["1"; STACK_SIZE + 1].join(", "));
        assert_eq!(run(&input).unwrap_err().to_string(), "stack overflow");
    }

    #[test]
    fn globals_persist_across_runs() {
        let mut compiler = Compiler::new();
        let mut vm = VirtualMachine::new();

        let first = Parser::new(Lexer::new("let a = 40;"))
            .parse_program()
            .unwrap();
        vm.run(compiler.compile(first).unwrap()).unwrap();

        let second = Parser::new(Lexer::new("a + 2")).parse_program().unwrap();
        let result = vm.run(compiler.compile(second).unwrap()).unwrap();
        assert_eq!(result, Object::Integer(42));
    }
}

use anyhow::Result;

use crate::{
    compiler::{Compiler, VirtualMachine},
    evaluator::Evaluator,
    lexer::Lexer,
    parser::Parser,
};

/// A complete execution backend: source text in, display form of the final
/// value out. Engines keep their state between calls, so one engine can
/// back a whole REPL session.
pub trait Engine {
    fn run(&mut self, input: &str) -> Result<String>;
}

/// Tree-walking backend: lex, parse, evaluate.
pub fn new_interpreter() -> Box<dyn Engine> {
    Box::new(InterpreterEngine {
        evaluator: Evaluator::new(),
    })
}

/// Bytecode backend: lex, parse, compile, run on the VM. The symbol table,
/// constants pool, and globals carry over between calls.
pub fn new_compiler() -> Box<dyn Engine> {
    Box::new(CompilerEngine {
        compiler: Compiler::new(),
        vm: VirtualMachine::new(),
    })
}

struct InterpreterEngine {
    evaluator: Evaluator,
}

impl Engine for InterpreterEngine {
    fn run(&mut self, input: &str) -> Result<String> {
        let mut parser = Parser::new(Lexer::new(input));
        let program = parser.parse_program()?;
        let result = self.evaluator.eval(program)?;
        Ok(result.to_string())
    }
}

struct CompilerEngine {
    compiler: Compiler,
    vm: VirtualMachine,
}

impl Engine for CompilerEngine {
    fn run(&mut self, input: &str) -> Result<String> {
        let mut parser = Parser::new(Lexer::new(input));
        let program = parser.parse_program()?;
        let bytecode = self.compiler.compile(program)?;
        let result = self.vm.run(bytecode)?;
        Ok(result.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engines() -> Vec<(&'static str, Box<dyn Engine>)> {
        vec![
            ("interpreter", new_interpreter()),
            ("compiler", new_compiler()),
        ]
    }

    // Programs on which the two backends must agree, checked through their
    // display forms.
    #[test]
    fn backends_agree() {
        let cases = vec![
            ("(5 + 10 * 2 + 15 / 3) * 2 + -10", "50"),
            (r#""Hello" + " " + "World!""#, "Hello World!"),
            (
                "let add = fn(x, y) { x + y; }; add(5 + 5, add(5, 5));",
                "20",
            ),
            ("[1, 2, 3][1 + 1]", "3"),
            (r#"{"one": 1, "two": 2}["two"]"#, "2"),
            (r#"len("hello world")"#, "11"),
            ("first(rest(push([1, 2], 3)))", "2"),
            ("if (10 > 1) { if (10 > 1) { return 10; } return 1; }", "10"),
            ("if (false) { 10 }", "null"),
            ("[1, 2, 3][-1]", "null"),
            ("[1, 2, 3][3]", "null"),
            (r#"{1: 1}[2]"#, "null"),
            ("!5", "false"),
            ("5 < 10", "true"),
            (
                "let double = fn(x) { x * 2 }; [double(1), double(2), double(3)]",
                "[2, 4, 6]",
            ),
        ];

        for (name, mut engine) in engines() {
            for (input, expected) in &cases {
                let output = engine
                    .run(input)
                    .unwrap_or_else(|error| panic!("{name} failed on {input}: {error}"));
                assert_eq!(&output, expected, "{name}: {input}");
            }
        }
    }

    #[test]
    fn backends_agree_on_errors() {
        let cases = vec![
            (r#""Hello" - "World""#, vec!["unknown operator: STRING - STRING"]),
            ("5 / 0", vec!["division by zero"]),
            (
                "len(1)",
                vec!["argument to `len` not supported, got INTEGER"],
            ),
            (
                r#"len("one", "two")"#,
                vec!["wrong number of arguments. got=2, want=1"],
            ),
            (
                // The type tag differs per backend; both reject the key.
                r#"{"name": "Monkey"}[fn(x) { x }]"#,
                vec![
                    "unusable as hash key: FUNCTION",
                    "unusable as hash key: COMPILED_FUNCTION_OBJ",
                ],
            ),
        ];

        for (name, mut engine) in engines() {
            for (input, accepted) in &cases {
                let error = engine
                    .run(input)
                    .expect_err(&format!("{name} should fail on {input}"))
                    .to_string();
                assert!(
                    accepted.contains(&error.as_str()),
                    "{name}: {input} produced {error}"
                );
            }
        }
    }

    #[test]
    fn parse_errors_are_listed() {
        for (name, mut engine) in engines() {
            let error = engine
                .run("let x 5; let = 10;")
                .expect_err(&format!("{name} should fail"))
                .to_string();
            assert!(
                error.contains("expected next token to be =, got 5 instead"),
                "{name}: {error}"
            );
            assert!(
                error.contains("expected next token to be IDENT, got = instead"),
                "{name}: {error}"
            );
        }
    }

    #[test]
    fn state_persists_across_runs() {
        for (name, mut engine) in engines() {
            engine.run("let a = 40;").unwrap();
            engine.run("let b = 2;").unwrap();
            assert_eq!(engine.run("a + b").unwrap(), "42", "{name}");
        }
    }

    #[test]
    fn closures_on_the_interpreter() {
        let mut engine = new_interpreter();
        let output = engine
            .run("let newAdder = fn(x) { fn(y) { x + y }; }; let addTwo = newAdder(2); addTwo(3);")
            .unwrap();
        assert_eq!(output, "5");
    }
}

use anyhow::{bail, Result};

use crate::object::{BuiltinFunction, Object};

/// The host-provided functions. The table order is part of the bytecode
/// contract: `OpGetBuiltin` operands index into it.
pub struct Builtins;

impl Builtins {
    const TABLE: [(&'static str, BuiltinFunction); 6] = [
        ("len", Self::len),
        ("first", Self::first),
        ("last", Self::last),
        ("rest", Self::rest),
        ("push", Self::push),
        ("puts", Self::puts),
    ];

    /// Resolves a builtin by name, for the evaluator's identifier fallback
    /// and for compile-time symbol definitions.
    pub fn lookup(name: &str) -> Option<Object> {
        Self::TABLE
            .iter()
            .find(|(builtin_name, _)| *builtin_name == name)
            .map(|(_, function)| Object::Builtin(*function))
    }

    /// Resolves a builtin by its table index, for `OpGetBuiltin`.
    pub fn get(index: usize) -> Option<Object> {
        Self::TABLE
            .get(index)
            .map(|(_, function)| Object::Builtin(*function))
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::TABLE.iter().map(|(name, _)| *name)
    }

    fn len(args: Vec<Object>) -> Result<Object> {
        check_args(&args, 1)?;
        match &args[0] {
            Object::String(value) => Ok(Object::Integer(value.len() as i64)),
            Object::Array(elements) => Ok(Object::Integer(elements.len() as i64)),
            other => bail!("argument to `len` not supported, got {}", other.type_name()),
        }
    }

    fn first(args: Vec<Object>) -> Result<Object> {
        check_args(&args, 1)?;
        match &args[0] {
            Object::Array(elements) => Ok(elements.first().cloned().unwrap_or(Object::Null)),
            other => bail!("argument to `first` must be ARRAY, got {}", other.type_name()),
        }
    }

    fn last(args: Vec<Object>) -> Result<Object> {
        check_args(&args, 1)?;
        match &args[0] {
            Object::Array(elements) => Ok(elements.last().cloned().unwrap_or(Object::Null)),
            other => bail!("argument to `last` must be ARRAY, got {}", other.type_name()),
        }
    }

    fn rest(args: Vec<Object>) -> Result<Object> {
        check_args(&args, 1)?;
        match &args[0] {
            Object::Array(elements) => {
                if elements.is_empty() {
                    Ok(Object::Null)
                } else {
                    Ok(Object::Array(elements[1..].to_vec()))
                }
            }
            other => bail!("argument to `rest` must be ARRAY, got {}", other.type_name()),
        }
    }

    fn push(args: Vec<Object>) -> Result<Object> {
        check_args(&args, 2)?;
        match &args[0] {
            Object::Array(elements) => {
                let mut elements = elements.clone();
                elements.push(args[1].clone());
                Ok(Object::Array(elements))
            }
            other => bail!("argument to `push` must be ARRAY, got {}", other.type_name()),
        }
    }

    // Variadic, so no argument-count check.
    fn puts(args: Vec<Object>) -> Result<Object> {
        for arg in args {
            println!("{}", arg);
        }
        Ok(Object::Null)
    }
}

fn check_args(args: &[Object], want: usize) -> Result<()> {
    if args.len() != want {
        bail!("wrong number of arguments. got={}, want={}", args.len(), want);
    }
    Ok(())
}

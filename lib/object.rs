use core::fmt;
use std::{cell::RefCell, collections::HashMap, rc::Rc};

use anyhow::{bail, Result};

use crate::{ast::Statement, compiler::code::Instructions, environment::Environment};

pub type BuiltinFunction = fn(Vec<Object>) -> Result<Object>;

/// A runtime value. `Display` is the inspect form shown by the REPL and
/// printed by `puts`.
#[derive(Debug, PartialEq, Clone)]
pub enum Object {
    Integer(i64),
    String(String),
    Boolean(bool),
    Null,
    Array(Vec<Object>),
    Hash(HashMap<HashKey, (Object, Object)>),
    ReturnValue(Box<Object>),
    Function {
        parameters: Vec<String>,
        body: Box<Statement>,
        env: Rc<RefCell<Environment>>,
    },
    CompiledFunction {
        instructions: Instructions,
        num_locals: usize,
        num_parameters: usize,
    },
    Builtin(BuiltinFunction),
}

impl Object {
    /// The type tag used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Integer(_) => "INTEGER",
            Object::String(_) => "STRING",
            Object::Boolean(_) => "BOOLEAN",
            Object::Null => "NULL",
            Object::Array(_) => "ARRAY",
            Object::Hash(_) => "HASH",
            Object::ReturnValue(_) => "RETURN_VALUE",
            Object::Function { .. } => "FUNCTION",
            Object::CompiledFunction { .. } => "COMPILED_FUNCTION_OBJ",
            Object::Builtin(_) => "BUILTIN",
        }
    }

    /// Everything except `false` and `null` is truthy, including `0`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Object::Boolean(value) => *value,
            Object::Null => false,
            _ => true,
        }
    }

    pub fn hash_key(&self) -> Result<HashKey> {
        let key = match self {
            Object::Integer(value) => HashKey {
                kind: self.type_name(),
                value: *value as u64,
            },
            Object::Boolean(value) => HashKey {
                kind: self.type_name(),
                value: u64::from(*value),
            },
            Object::String(value) => HashKey {
                kind: self.type_name(),
                value: fnv1a(value.as_bytes()),
            },
            other => bail!("unusable as hash key: {}", other.type_name()),
        };
        Ok(key)
    }
}

/// Key of a hash entry: the value's type tag plus a 64-bit digest. The
/// original key object is retained alongside each entry for display and
/// retrieval, so the digest never needs inverting.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct HashKey {
    kind: &'static str,
    value: u64,
}

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Object::Integer(value) => write!(f, "{}", value),
            Object::String(value) => write!(f, "{}", value),
            Object::Boolean(value) => write!(f, "{}", value),
            Object::Null => write!(f, "null"),
            Object::Array(elements) => {
                let elements: Vec<String> = elements.iter().map(|e| e.to_string()).collect();
                write!(f, "[{}]", elements.join(", "))
            }
            Object::Hash(pairs) => {
                let pairs: Vec<String> = pairs
                    .values()
                    .map(|(key, value)| format!("{}: {}", key, value))
                    .collect();
                write!(f, "{{{}}}", pairs.join(", "))
            }
            Object::ReturnValue(value) => write!(f, "{}", value),
            Object::Function {
                parameters, body, ..
            } => {
                write!(f, "fn({}) {{\n{}\n}}", parameters.join(", "), body)
            }
            Object::CompiledFunction { .. } => write!(f, "CompiledFunction[{:p}]", self),
            Object::Builtin(_) => write!(f, "builtin function"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_hash_keys() {
        let hello1 = Object::String("Hello World".to_string());
        let hello2 = Object::String("Hello World".to_string());
        let diff = Object::String("My name is johnny".to_string());

        assert_eq!(hello1.hash_key().unwrap(), hello2.hash_key().unwrap());
        assert_ne!(hello1.hash_key().unwrap(), diff.hash_key().unwrap());
    }

    #[test]
    fn scalar_hash_keys() {
        assert_eq!(
            Object::Integer(7).hash_key().unwrap(),
            Object::Integer(7).hash_key().unwrap()
        );
        assert_eq!(
            Object::Boolean(true).hash_key().unwrap(),
            Object::Boolean(true).hash_key().unwrap()
        );
        assert_ne!(
            Object::Boolean(true).hash_key().unwrap(),
            Object::Boolean(false).hash_key().unwrap()
        );
        // Same digest value, different type tag.
        assert_ne!(
            Object::Integer(1).hash_key().unwrap(),
            Object::Boolean(true).hash_key().unwrap()
        );
    }

    #[test]
    fn unhashable_types_are_rejected() {
        let error = Object::Array(vec![]).hash_key().unwrap_err();
        assert_eq!(error.to_string(), "unusable as hash key: ARRAY");
    }

    #[test]
    fn truthiness() {
        assert!(Object::Integer(0).is_truthy());
        assert!(Object::String(String::new()).is_truthy());
        assert!(Object::Boolean(true).is_truthy());
        assert!(!Object::Boolean(false).is_truthy());
        assert!(!Object::Null.is_truthy());
    }
}

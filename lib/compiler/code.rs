use std::{fmt, io::Cursor};

use anyhow::{bail, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// A flat buffer of encoded instructions: opcode bytes followed by their
/// big-endian operands.
#[derive(Debug, Clone, PartialEq)]
pub struct Instructions(Vec<u8>);

impl Instructions {
    pub fn new() -> Self {
        Self(vec![])
    }

    #[cfg(test)]
    pub fn from(instructions: Vec<Vec<u8>>) -> Self {
        Self(instructions.into_iter().flatten().collect::<Vec<u8>>())
    }

    pub fn inner(&self) -> &Vec<u8> {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    /// Appends an encoded instruction, returning its start position.
    pub fn extend(&mut self, instruction: Vec<u8>) -> usize {
        let position = self.0.len();
        self.0.extend(instruction);
        position
    }

    /// Truncates the buffer at `position`, dropping the instruction that
    /// starts there and everything after it.
    pub fn drain_at(&mut self, position: usize) {
        self.0.drain(position..);
    }

    /// Rewrites the u16 operand of the instruction at `position` in place.
    /// Used to back-patch jump targets emitted as placeholders.
    pub fn change_u16_operand(&mut self, position: usize, operand: usize) -> Result<()> {
        let mut cursor = Cursor::new(&mut self.0);
        cursor.set_position((position + 1) as u64);
        cursor.write_u16::<BigEndian>(operand.try_into()?)?;
        Ok(())
    }

    /// Encodes an opcode and its operands into instruction bytes.
    pub fn make(opcode: Opcode, operands: Vec<usize>) -> Result<Vec<u8>> {
        let widths = opcode.operand_widths();

        let mut instruction = vec![opcode.clone().into()];
        for (i, operand) in operands.into_iter().enumerate() {
            match widths.get(i) {
                Some(2) => {
                    instruction.write_u16::<BigEndian>(operand.try_into()?)?;
                }
                Some(1) => {
                    instruction.write_u8(operand.try_into()?)?;
                }
                Some(width) => bail!("unknown operand width: {}", width),
                None => bail!("no operand width for opcode: {}", opcode.name()),
            }
        }
        Ok(instruction)
    }
}

impl fmt::Display for Instructions {
    /// Disassembles into `0000 OpConstant 1` lines.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut cursor = Cursor::new(&self.0);
        while (cursor.position() as usize) < self.0.len() {
            write!(f, "{:04} ", cursor.position())?;
            let byte = cursor.read_u8().map_err(|_| fmt::Error)?;
            let opcode = Opcode::try_from(byte).map_err(|_| fmt::Error)?;
            write!(f, "{}", opcode.name())?;

            for width in opcode.operand_widths() {
                let operand = match width {
                    2 => cursor.read_u16::<BigEndian>().map_err(|_| fmt::Error)? as usize,
                    _ => cursor.read_u8().map_err(|_| fmt::Error)? as usize,
                };
                write!(f, " {}", operand)?;
            }

            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    Constant,
    Add,
    Pop,
    Sub,
    Mul,
    Div,

    True,
    False,

    Equal,
    NotEqual,
    GreaterThan,

    Minus,
    Bang,

    JumpNotTruthy,
    Jump,

    Null,

    GetGlobal,
    SetGlobal,

    Array,
    Hash,
    Index,

    Call,
    ReturnValue,
    Return,

    GetLocal,
    SetLocal,
    GetBuiltin,
}

impl Opcode {
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Constant => "OpConstant",
            Opcode::Add => "OpAdd",
            Opcode::Pop => "OpPop",
            Opcode::Sub => "OpSub",
            Opcode::Mul => "OpMul",
            Opcode::Div => "OpDiv",
            Opcode::True => "OpTrue",
            Opcode::False => "OpFalse",
            Opcode::Equal => "OpEqual",
            Opcode::NotEqual => "OpNotEqual",
            Opcode::GreaterThan => "OpGreaterThan",
            Opcode::Minus => "OpMinus",
            Opcode::Bang => "OpBang",
            Opcode::JumpNotTruthy => "OpJumpNotTruthy",
            Opcode::Jump => "OpJump",
            Opcode::Null => "OpNull",
            Opcode::GetGlobal => "OpGetGlobal",
            Opcode::SetGlobal => "OpSetGlobal",
            Opcode::Array => "OpArray",
            Opcode::Hash => "OpHash",
            Opcode::Index => "OpIndex",
            Opcode::Call => "OpCall",
            Opcode::ReturnValue => "OpReturnValue",
            Opcode::Return => "OpReturn",
            Opcode::GetLocal => "OpGetLocal",
            Opcode::SetLocal => "OpSetLocal",
            Opcode::GetBuiltin => "OpGetBuiltin",
        }
    }

    /// Byte width of each operand. Constant-pool and global indices plus
    /// jump targets and collection sizes are u16; argument counts, local
    /// slots, and builtin indices fit in a u8.
    pub fn operand_widths(&self) -> Vec<usize> {
        match self {
            Opcode::Constant => vec![2],
            Opcode::JumpNotTruthy => vec![2],
            Opcode::Jump => vec![2],
            Opcode::GetGlobal => vec![2],
            Opcode::SetGlobal => vec![2],
            Opcode::Array => vec![2],
            Opcode::Hash => vec![2],
            Opcode::Call => vec![1],
            Opcode::GetLocal => vec![1],
            Opcode::SetLocal => vec![1],
            Opcode::GetBuiltin => vec![1],
            _ => vec![],
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        let opcode = match value {
            0 => Opcode::Constant,
            1 => Opcode::Add,
            2 => Opcode::Pop,
            3 => Opcode::Sub,
            4 => Opcode::Mul,
            5 => Opcode::Div,
            6 => Opcode::True,
            7 => Opcode::False,
            8 => Opcode::Equal,
            9 => Opcode::NotEqual,
            10 => Opcode::GreaterThan,
            11 => Opcode::Minus,
            12 => Opcode::Bang,
            13 => Opcode::JumpNotTruthy,
            14 => Opcode::Jump,
            15 => Opcode::Null,
            16 => Opcode::GetGlobal,
            17 => Opcode::SetGlobal,
            18 => Opcode::Array,
            19 => Opcode::Hash,
            20 => Opcode::Index,
            21 => Opcode::Call,
            22 => Opcode::ReturnValue,
            23 => Opcode::Return,
            24 => Opcode::GetLocal,
            25 => Opcode::SetLocal,
            26 => Opcode::GetBuiltin,
            _ => bail!("unknown opcode: {}", value),
        };
        Ok(opcode)
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Constant => 0,
            Opcode::Add => 1,
            Opcode::Pop => 2,
            Opcode::Sub => 3,
            Opcode::Mul => 4,
            Opcode::Div => 5,
            Opcode::True => 6,
            Opcode::False => 7,
            Opcode::Equal => 8,
            Opcode::NotEqual => 9,
            Opcode::GreaterThan => 10,
            Opcode::Minus => 11,
            Opcode::Bang => 12,
            Opcode::JumpNotTruthy => 13,
            Opcode::Jump => 14,
            Opcode::Null => 15,
            Opcode::GetGlobal => 16,
            Opcode::SetGlobal => 17,
            Opcode::Array => 18,
            Opcode::Hash => 19,
            Opcode::Index => 20,
            Opcode::Call => 21,
            Opcode::ReturnValue => 22,
            Opcode::Return => 23,
            Opcode::GetLocal => 24,
            Opcode::SetLocal => 25,
            Opcode::GetBuiltin => 26,
        }
    }
}

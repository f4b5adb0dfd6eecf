// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Instructions and registers.

/// Index into a procedure's flat register file.
pub type Reg = u32;

/// Register-bytecode opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Nop,
    /// Load a literal into a register.
    Const,
    /// Register-to-register copy.
    Move,
    Add,
    /// Integer division. Throws on a zero divisor.
    DivInt,
    /// Allocate an object. Throws on allocation failure.
    NewInstance,
    FieldGet,
    FieldPut,
    /// Procedure call. Sources are the argument registers.
    Invoke,
    /// Consume the result of the immediately preceding `Invoke`.
    MoveResult,
    /// Receive one parameter at procedure entry, in declaration order.
    LoadParam,
    /// Return a value.
    Return,
    ReturnVoid,
    /// Raise the exception object held in the source register.
    Throw,
    /// Two-way branch on zero.
    IfZero,
    /// Multi-way branch, one edge per case plus a default.
    Switch,
}

impl Opcode {
    /// Whether this opcode can raise an exception.
    pub fn can_throw(self) -> bool {
        matches!(
            self,
            Opcode::DivInt
                | Opcode::NewInstance
                | Opcode::FieldGet
                | Opcode::FieldPut
                | Opcode::Invoke
                | Opcode::Throw
        )
    }

    pub fn is_return(self) -> bool {
        matches!(self, Opcode::Return | Opcode::ReturnVoid)
    }

    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::IfZero | Opcode::Switch)
    }

    /// The move opcode that replaces a return once its procedure is inlined.
    /// `None` for `ReturnVoid`: a value-less return is a no-op after inlining.
    pub fn return_to_move(self) -> Option<Opcode> {
        match self {
            Opcode::Return => Some(Opcode::Move),
            Opcode::ReturnVoid => None,
            _ => panic!("expected a return opcode, got {:?}", self),
        }
    }

    /// The move opcode that replaces a parameter load once its procedure is
    /// inlined.
    pub fn load_param_to_move(self) -> Opcode {
        match self {
            Opcode::LoadParam => Opcode::Move,
            _ => panic!("expected a load-param opcode, got {:?}", self),
        }
    }
}

/// A single bytecode instruction: opcode plus register operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub srcs: Vec<Reg>,
    pub dest: Option<Reg>,
    pub literal: Option<i64>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Instruction { opcode, srcs: Vec::new(), dest: None, literal: None }
    }

    pub fn nop() -> Self {
        Instruction::new(Opcode::Nop)
    }

    pub fn const_(dest: Reg, literal: i64) -> Self {
        Instruction { opcode: Opcode::Const, srcs: vec![], dest: Some(dest), literal: Some(literal) }
    }

    pub fn move_(dest: Reg, src: Reg) -> Self {
        Instruction { opcode: Opcode::Move, srcs: vec![src], dest: Some(dest), literal: None }
    }

    pub fn add(dest: Reg, a: Reg, b: Reg) -> Self {
        Instruction { opcode: Opcode::Add, srcs: vec![a, b], dest: Some(dest), literal: None }
    }

    pub fn div_int(dest: Reg, a: Reg, b: Reg) -> Self {
        Instruction { opcode: Opcode::DivInt, srcs: vec![a, b], dest: Some(dest), literal: None }
    }

    pub fn new_instance(dest: Reg) -> Self {
        Instruction { opcode: Opcode::NewInstance, srcs: vec![], dest: Some(dest), literal: None }
    }

    pub fn field_get(dest: Reg, object: Reg) -> Self {
        Instruction { opcode: Opcode::FieldGet, srcs: vec![object], dest: Some(dest), literal: None }
    }

    pub fn field_put(object: Reg, value: Reg) -> Self {
        Instruction { opcode: Opcode::FieldPut, srcs: vec![object, value], dest: None, literal: None }
    }

    pub fn invoke(args: Vec<Reg>) -> Self {
        Instruction { opcode: Opcode::Invoke, srcs: args, dest: None, literal: None }
    }

    pub fn move_result(dest: Reg) -> Self {
        Instruction { opcode: Opcode::MoveResult, srcs: vec![], dest: Some(dest), literal: None }
    }

    pub fn load_param(dest: Reg) -> Self {
        Instruction { opcode: Opcode::LoadParam, srcs: vec![], dest: Some(dest), literal: None }
    }

    pub fn ret(src: Reg) -> Self {
        Instruction { opcode: Opcode::Return, srcs: vec![src], dest: None, literal: None }
    }

    pub fn ret_void() -> Self {
        Instruction::new(Opcode::ReturnVoid)
    }

    pub fn throw(src: Reg) -> Self {
        Instruction { opcode: Opcode::Throw, srcs: vec![src], dest: None, literal: None }
    }

    pub fn if_zero(src: Reg) -> Self {
        Instruction { opcode: Opcode::IfZero, srcs: vec![src], dest: None, literal: None }
    }

    pub fn switch(src: Reg) -> Self {
        Instruction { opcode: Opcode::Switch, srcs: vec![src], dest: None, literal: None }
    }

    pub fn can_throw(&self) -> bool {
        self.opcode.can_throw()
    }

    pub fn is_return(&self) -> bool {
        self.opcode.is_return()
    }

    pub fn is_branch(&self) -> bool {
        self.opcode.is_branch()
    }

    /// Whether a `MoveResult` may follow this instruction.
    pub fn expects_result(&self) -> bool {
        self.opcode == Opcode::Invoke
    }
}

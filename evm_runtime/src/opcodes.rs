//! Opcode definitions and the declarative dispatch table: minimum stack
//! depth, static gas and the first fork an opcode exists in, all in one
//! place so the step loop can gate everything uniformly.

use std::fmt;

use crate::runtime::Fork;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    Stop,
    Add,
    Mul,
    Sub,
    Div,
    SDiv,
    Mod,
    SMod,
    AddMod,
    MulMod,
    Exp,
    SignExtend,
    Lt,
    Gt,
    SLt,
    SGt,
    Eq,
    IsZero,
    And,
    Or,
    Xor,
    Not,
    Byte,
    Shl,
    Shr,
    Sar,
    Keccak256,
    Address,
    Balance,
    Origin,
    Caller,
    CallValue,
    CallDataLoad,
    CallDataSize,
    CallDataCopy,
    CodeSize,
    CodeCopy,
    GasPrice,
    ExtCodeSize,
    ExtCodeCopy,
    ReturnDataSize,
    ReturnDataCopy,
    ExtCodeHash,
    BlockHash,
    Coinbase,
    Timestamp,
    Number,
    Difficulty,
    GasLimit,
    ChainId,
    SelfBalance,
    Pop,
    MLoad,
    MStore,
    MStore8,
    SLoad,
    SStore,
    Jump,
    JumpI,
    Pc,
    MSize,
    Gas,
    JumpDest,
    /// PUSH1..PUSH32; the payload is the immediate length.
    Push(u8),
    /// DUP1..DUP16.
    Dup(u8),
    /// SWAP1..SWAP16.
    Swap(u8),
    /// LOG0..LOG4; the payload is the topic count.
    Log(u8),
    Create,
    Call,
    CallCode,
    Return,
    DelegateCall,
    Create2,
    StaticCall,
    Revert,
    SelfDestruct,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        use OpCode::*;
        Some(match byte {
            0x00 => Stop,
            0x01 => Add,
            0x02 => Mul,
            0x03 => Sub,
            0x04 => Div,
            0x05 => SDiv,
            0x06 => Mod,
            0x07 => SMod,
            0x08 => AddMod,
            0x09 => MulMod,
            0x0a => Exp,
            0x0b => SignExtend,
            0x10 => Lt,
            0x11 => Gt,
            0x12 => SLt,
            0x13 => SGt,
            0x14 => Eq,
            0x15 => IsZero,
            0x16 => And,
            0x17 => Or,
            0x18 => Xor,
            0x19 => Not,
            0x1a => Byte,
            0x1b => Shl,
            0x1c => Shr,
            0x1d => Sar,
            0x20 => Keccak256,
            0x30 => Address,
            0x31 => Balance,
            0x32 => Origin,
            0x33 => Caller,
            0x34 => CallValue,
            0x35 => CallDataLoad,
            0x36 => CallDataSize,
            0x37 => CallDataCopy,
            0x38 => CodeSize,
            0x39 => CodeCopy,
            0x3a => GasPrice,
            0x3b => ExtCodeSize,
            0x3c => ExtCodeCopy,
            0x3d => ReturnDataSize,
            0x3e => ReturnDataCopy,
            0x3f => ExtCodeHash,
            0x40 => BlockHash,
            0x41 => Coinbase,
            0x42 => Timestamp,
            0x43 => Number,
            0x44 => Difficulty,
            0x45 => GasLimit,
            0x46 => ChainId,
            0x47 => SelfBalance,
            0x50 => Pop,
            0x51 => MLoad,
            0x52 => MStore,
            0x53 => MStore8,
            0x54 => SLoad,
            0x55 => SStore,
            0x56 => Jump,
            0x57 => JumpI,
            0x58 => Pc,
            0x59 => MSize,
            0x5a => Gas,
            0x5b => JumpDest,
            0x60..=0x7f => Push(byte - 0x60 + 1),
            0x80..=0x8f => Dup(byte - 0x80 + 1),
            0x90..=0x9f => Swap(byte - 0x90 + 1),
            0xa0..=0xa4 => Log(byte - 0xa0),
            0xf0 => Create,
            0xf1 => Call,
            0xf2 => CallCode,
            0xf3 => Return,
            0xf4 => DelegateCall,
            0xf5 => Create2,
            0xfa => StaticCall,
            0xfd => Revert,
            0xff => SelfDestruct,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        use OpCode::*;
        match self {
            Stop => 0x00,
            Add => 0x01,
            Mul => 0x02,
            Sub => 0x03,
            Div => 0x04,
            SDiv => 0x05,
            Mod => 0x06,
            SMod => 0x07,
            AddMod => 0x08,
            MulMod => 0x09,
            Exp => 0x0a,
            SignExtend => 0x0b,
            Lt => 0x10,
            Gt => 0x11,
            SLt => 0x12,
            SGt => 0x13,
            Eq => 0x14,
            IsZero => 0x15,
            And => 0x16,
            Or => 0x17,
            Xor => 0x18,
            Not => 0x19,
            Byte => 0x1a,
            Shl => 0x1b,
            Shr => 0x1c,
            Sar => 0x1d,
            Keccak256 => 0x20,
            Address => 0x30,
            Balance => 0x31,
            Origin => 0x32,
            Caller => 0x33,
            CallValue => 0x34,
            CallDataLoad => 0x35,
            CallDataSize => 0x36,
            CallDataCopy => 0x37,
            CodeSize => 0x38,
            CodeCopy => 0x39,
            GasPrice => 0x3a,
            ExtCodeSize => 0x3b,
            ExtCodeCopy => 0x3c,
            ReturnDataSize => 0x3d,
            ReturnDataCopy => 0x3e,
            ExtCodeHash => 0x3f,
            BlockHash => 0x40,
            Coinbase => 0x41,
            Timestamp => 0x42,
            Number => 0x43,
            Difficulty => 0x44,
            GasLimit => 0x45,
            ChainId => 0x46,
            SelfBalance => 0x47,
            Pop => 0x50,
            MLoad => 0x51,
            MStore => 0x52,
            MStore8 => 0x53,
            SLoad => 0x54,
            SStore => 0x55,
            Jump => 0x56,
            JumpI => 0x57,
            Pc => 0x58,
            MSize => 0x59,
            Gas => 0x5a,
            JumpDest => 0x5b,
            Push(n) => 0x60 + n - 1,
            Dup(n) => 0x80 + n - 1,
            Swap(n) => 0x90 + n - 1,
            Log(n) => 0xa0 + n,
            Create => 0xf0,
            Call => 0xf1,
            CallCode => 0xf2,
            Return => 0xf3,
            DelegateCall => 0xf4,
            Create2 => 0xf5,
            StaticCall => 0xfa,
            Revert => 0xfd,
            SelfDestruct => 0xff,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use OpCode::*;
        match self {
            Push(n) => write!(f, "PUSH{n}"),
            Dup(n) => write!(f, "DUP{n}"),
            Swap(n) => write!(f, "SWAP{n}"),
            Log(n) => write!(f, "LOG{n}"),
            other => {
                let name = match other {
                    Stop => "STOP",
                    Add => "ADD",
                    Mul => "MUL",
                    Sub => "SUB",
                    Div => "DIV",
                    SDiv => "SDIV",
                    Mod => "MOD",
                    SMod => "SMOD",
                    AddMod => "ADDMOD",
                    MulMod => "MULMOD",
                    Exp => "EXP",
                    SignExtend => "SIGNEXTEND",
                    Lt => "LT",
                    Gt => "GT",
                    SLt => "SLT",
                    SGt => "SGT",
                    Eq => "EQ",
                    IsZero => "ISZERO",
                    And => "AND",
                    Or => "OR",
                    Xor => "XOR",
                    Not => "NOT",
                    Byte => "BYTE",
                    Shl => "SHL",
                    Shr => "SHR",
                    Sar => "SAR",
                    Keccak256 => "KECCAK256",
                    Address => "ADDRESS",
                    Balance => "BALANCE",
                    Origin => "ORIGIN",
                    Caller => "CALLER",
                    CallValue => "CALLVALUE",
                    CallDataLoad => "CALLDATALOAD",
                    CallDataSize => "CALLDATASIZE",
                    CallDataCopy => "CALLDATACOPY",
                    CodeSize => "CODESIZE",
                    CodeCopy => "CODECOPY",
                    GasPrice => "GASPRICE",
                    ExtCodeSize => "EXTCODESIZE",
                    ExtCodeCopy => "EXTCODECOPY",
                    ReturnDataSize => "RETURNDATASIZE",
                    ReturnDataCopy => "RETURNDATACOPY",
                    ExtCodeHash => "EXTCODEHASH",
                    BlockHash => "BLOCKHASH",
                    Coinbase => "COINBASE",
                    Timestamp => "TIMESTAMP",
                    Number => "NUMBER",
                    Difficulty => "DIFFICULTY",
                    GasLimit => "GASLIMIT",
                    ChainId => "CHAINID",
                    SelfBalance => "SELFBALANCE",
                    Pop => "POP",
                    MLoad => "MLOAD",
                    MStore => "MSTORE",
                    MStore8 => "MSTORE8",
                    SLoad => "SLOAD",
                    SStore => "SSTORE",
                    Jump => "JUMP",
                    JumpI => "JUMPI",
                    Pc => "PC",
                    MSize => "MSIZE",
                    Gas => "GAS",
                    JumpDest => "JUMPDEST",
                    Create => "CREATE",
                    Call => "CALL",
                    CallCode => "CALLCODE",
                    Return => "RETURN",
                    DelegateCall => "DELEGATECALL",
                    Create2 => "CREATE2",
                    StaticCall => "STATICCALL",
                    Revert => "REVERT",
                    SelfDestruct => "SELFDESTRUCT",
                    Push(_) | Dup(_) | Swap(_) | Log(_) => unreachable!(),
                };
                f.write_str(name)
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct InstInfo {
    pub min_stack: usize,
    pub base_gas: u64,
    pub min_fork: Option<Fork>,
}

const fn info(min_stack: usize, base_gas: u64) -> InstInfo {
    InstInfo {
        min_stack,
        base_gas,
        min_fork: None,
    }
}

const fn forked(min_stack: usize, base_gas: u64, fork: Fork) -> InstInfo {
    InstInfo {
        min_stack,
        base_gas,
        min_fork: Some(fork),
    }
}

/// Static dispatch metadata. Opcodes with fork-dependent or dynamic gas
/// carry zero here and charge inside their handler.
pub fn inst_info(op: OpCode) -> InstInfo {
    use OpCode::*;
    match op {
        Stop => info(0, 0),
        Add | Sub => info(2, 3),
        Mul | Div | SDiv | Mod | SMod | SignExtend => info(2, 5),
        AddMod | MulMod => info(3, 8),
        Exp => info(2, 10),
        Lt | Gt | SLt | SGt | Eq | And | Or | Xor | Byte => info(2, 3),
        Shl | Shr | Sar => forked(2, 3, Fork::Constantinople),
        IsZero | Not => info(1, 3),
        Keccak256 => info(2, 30),
        Address | Origin | Caller | CallValue | CallDataSize | CodeSize | GasPrice | Coinbase
        | Timestamp | Number | Difficulty | GasLimit | Pc | MSize | Gas => info(0, 2),
        ChainId => forked(0, 2, Fork::Istanbul),
        SelfBalance => forked(0, 5, Fork::Istanbul),
        ReturnDataSize => forked(0, 2, Fork::Byzantium),
        ReturnDataCopy => forked(3, 3, Fork::Byzantium),
        Balance => info(1, 0),
        ExtCodeSize => info(1, 0),
        ExtCodeCopy => info(4, 0),
        ExtCodeHash => forked(1, 0, Fork::Constantinople),
        CallDataLoad => info(1, 3),
        CallDataCopy | CodeCopy => info(3, 3),
        BlockHash => info(1, 20),
        Pop => info(1, 2),
        MLoad => info(1, 3),
        MStore => info(2, 3),
        MStore8 => info(2, 3),
        SLoad => info(1, 0),
        SStore => info(2, 0),
        Jump => info(1, 8),
        JumpI => info(2, 10),
        JumpDest => info(0, 1),
        Push(_) => info(0, 3),
        Dup(n) => info(n as usize, 3),
        Swap(n) => info(n as usize + 1, 3),
        Log(n) => info(n as usize + 2, 375),
        Create => info(3, 32000),
        Create2 => forked(4, 32000, Fork::Constantinople),
        Call | CallCode => info(7, 0),
        DelegateCall => forked(6, 0, Fork::Homestead),
        StaticCall => forked(6, 0, Fork::Byzantium),
        Return => info(2, 0),
        Revert => forked(2, 0, Fork::Byzantium),
        SelfDestruct => info(1, 0),
    }
}

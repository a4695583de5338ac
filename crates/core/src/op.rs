//! Opcode definitions.
//!
//! The instruction set of the Jv stack machine. Every op carries at most one
//! operand whose form (none / id / primitive / string) selects the exact
//! variant executed; see the execution engine in `jv-vm` for the semantics
//! of each form.

macro_rules! define_ops {
    ($($variant:ident = $code:expr, $mnemonic:expr;)*) => {
        /// An operation of the Jv stack machine.
        #[allow(non_camel_case_types)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Op {
            $(
                #[doc = $mnemonic]
                $variant = $code,
            )*
        }

        impl Op {
            /// Returns the assembly mnemonic.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Op::$variant => $mnemonic,)*
                }
            }

            /// Parses an assembly mnemonic.
            pub fn from_mnemonic(text: &str) -> Option<Op> {
                match text {
                    $($mnemonic => Some(Op::$variant),)*
                    _ => None,
                }
            }

            /// Decodes the wire byte of an op.
            pub fn from_byte(byte: u8) -> Option<Op> {
                match byte {
                    $($code => Some(Op::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

define_ops! {
    // Misc
    NOP = 0x00, "nop";
    EXIT = 0x01, "exit";
    // Data movement between stack, locals, resval and literals
    RES = 0x02, "res";
    TGET = 0x03, "tget";
    TLEN = 0x04, "tlen";
    SET = 0x05, "set";
    LET = 0x06, "let";
    PUSH = 0x07, "push";
    PEEK = 0x08, "peek";
    PSRS = 0x09, "psrs";
    // Boolean-producing ops
    NOT = 0x0A, "not";
    NOTC = 0x0B, "notc";
    GT = 0x0C, "gt";
    LT = 0x0D, "lt";
    EQ = 0x0E, "eq";
    NEQ = 0x0F, "neq";
    GTE = 0x10, "gte";
    LTE = 0x11, "lte";
    AND = 0x12, "and";
    OR = 0x13, "or";
    XOR = 0x14, "xor";
    // Control
    IF = 0x15, "if";
    IFN = 0x16, "ifn";
    JMP = 0x17, "jmp";
    NBLK = 0x18, "nblk";
    BBLK = 0x19, "bblk";
    RET = 0x1A, "ret";
    // Arithmetic
    ADD = 0x1B, "add";
    SUB = 0x1C, "sub";
    MULT = 0x1D, "mult";
    DIV = 0x1E, "div";
    MOD = 0x1F, "mod";
    INC = 0x20, "inc";
    DEC = 0x21, "dec";
    FINC = 0x22, "finc";
    FDEC = 0x23, "fdec";
    SINC = 0x24, "sinc";
    // Calls
    CALL = 0x25, "call";
    CLLN = 0x26, "clln";
    // Tuples
    TUPL = 0x27, "tupl";
    TGTE = 0x28, "tgte";
    TLTE = 0x29, "tlte";
    TEQ = 0x2A, "teq";
    DUP = 0x2B, "dup";
    GOTO = 0x2C, "goto";
    PRNT = 0x2D, "prnt";
    // Modules and classes
    LMDL = 0x2E, "lmdl";
    GET = 0x2F, "get";
    GTSH = 0x30, "gtsh";
    RNIL = 0x31, "rnil";
    PNIL = 0x32, "pnil";
    FLD = 0x33, "fld";
    IS = 0x34, "is";
    ADR = 0x35, "adr";
    // Errors
    RAIS = 0x36, "rais";
    CTCH = 0x37, "ctch";
    // Arrays
    ANEW = 0x38, "anew";
    AIDX = 0x39, "aidx";
    ASET = 0x3A, "aset";
    // Constants
    CNST = 0x3B, "cnst";
    SETC = 0x3C, "setc";
    LETC = 0x3D, "letc";
    SGET = 0x3E, "sget";
}

impl Op {
    /// True for ops whose primitive operand is a signed offset relative to
    /// the following instruction.
    pub fn is_relative_jump(self) -> bool {
        matches!(self, Op::JMP | Op::IF | Op::IFN | Op::CTCH)
    }

    /// True for the binary ops the `SimpleMath` peephole folds.
    pub fn is_math(self) -> bool {
        matches!(
            self,
            Op::ADD
                | Op::SUB
                | Op::DIV
                | Op::MULT
                | Op::MOD
                | Op::LT
                | Op::LTE
                | Op::GTE
                | Op::GT
                | Op::EQ
        )
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // pad() keeps the mnemonic column-aligned in instruction listings.
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonic_roundtrip() {
        for byte in 0u8..=0x3E {
            let op = Op::from_byte(byte).expect("contiguous op space");
            assert_eq!(Op::from_mnemonic(op.as_str()), Some(op));
            assert_eq!(op as u8, byte);
        }
    }

    #[test]
    fn unknown_inputs_are_rejected() {
        assert_eq!(Op::from_mnemonic("frobnicate"), None);
        assert_eq!(Op::from_byte(0xFF), None);
    }

    #[test]
    fn jump_classification() {
        assert!(Op::JMP.is_relative_jump());
        assert!(Op::CTCH.is_relative_jump());
        assert!(!Op::GOTO.is_relative_jump());
        assert!(!Op::RET.is_relative_jump());
    }
}

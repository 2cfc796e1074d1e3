//! JVM opcodes used by the assembler.
//!
//! Only the instructions the compiler and proxy generator can emit are listed.
//! The disassembler rejects anything else.

use strum::FromRepr;

/// Operand layout following the opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    /// No operands.
    Simple,
    /// One unsigned byte: local slot (`iload`, `astore`, `ret`).
    Local,
    /// Signed byte immediate (`bipush`).
    Byte,
    /// Signed short immediate (`sipush`).
    Short,
    /// One-byte pool index (`ldc`).
    Pool8,
    /// Two-byte pool index (fields, calls, `new`, `checkcast`).
    Pool16,
    /// Two-byte signed branch offset.
    Branch,
    /// Local slot and signed byte increment.
    Iinc,
    /// Pool index, argument slot count and a zero byte.
    Interface,
    /// Padding and a jump table.
    TableSwitch,
    /// Prefix widening the next instruction's operands.
    Wide,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
pub enum Opcode {
    Nop = 0,
    AconstNull = 1,
    IconstM1 = 2,
    Iconst0 = 3,
    Iconst1 = 4,
    Iconst2 = 5,
    Iconst3 = 6,
    Iconst4 = 7,
    Iconst5 = 8,
    Lconst0 = 9,
    Fconst0 = 11,
    Dconst0 = 14,
    Bipush = 16,
    Sipush = 17,
    Ldc = 18,
    LdcW = 19,
    Ldc2W = 20,
    Iload = 21,
    Lload = 22,
    Fload = 23,
    Dload = 24,
    Aload = 25,
    Iload0 = 26,
    Iload1 = 27,
    Iload2 = 28,
    Iload3 = 29,
    Lload0 = 30,
    Lload1 = 31,
    Lload2 = 32,
    Lload3 = 33,
    Fload0 = 34,
    Fload1 = 35,
    Fload2 = 36,
    Fload3 = 37,
    Dload0 = 38,
    Dload1 = 39,
    Dload2 = 40,
    Dload3 = 41,
    Aload0 = 42,
    Aload1 = 43,
    Aload2 = 44,
    Aload3 = 45,
    Aaload = 50,
    Istore = 54,
    Astore = 58,
    Istore0 = 59,
    Istore1 = 60,
    Istore2 = 61,
    Istore3 = 62,
    Astore0 = 75,
    Astore1 = 76,
    Astore2 = 77,
    Astore3 = 78,
    Aastore = 83,
    Pop = 87,
    Dup = 89,
    DupX1 = 90,
    DupX2 = 91,
    Swap = 95,
    Iinc = 132,
    Ifeq = 153,
    Ifne = 154,
    IfIcmpne = 160,
    Goto = 167,
    Jsr = 168,
    Ret = 169,
    Tableswitch = 170,
    Ireturn = 172,
    Lreturn = 173,
    Freturn = 174,
    Dreturn = 175,
    Areturn = 176,
    Return = 177,
    Getstatic = 178,
    Putstatic = 179,
    Getfield = 180,
    Putfield = 181,
    Invokevirtual = 182,
    Invokespecial = 183,
    Invokestatic = 184,
    Invokeinterface = 185,
    New = 187,
    Anewarray = 189,
    Arraylength = 190,
    Athrow = 191,
    Checkcast = 192,
    Wide = 196,
    Ifnull = 198,
    Ifnonnull = 199,
}

impl Opcode {
    #[must_use]
    pub fn form(self) -> Form {
        match self {
            Self::Iload | Self::Lload | Self::Fload | Self::Dload | Self::Aload | Self::Istore | Self::Astore | Self::Ret => {
                Form::Local
            }
            Self::Bipush => Form::Byte,
            Self::Sipush => Form::Short,
            Self::Ldc => Form::Pool8,
            Self::LdcW
            | Self::Ldc2W
            | Self::Getstatic
            | Self::Putstatic
            | Self::Getfield
            | Self::Putfield
            | Self::Invokevirtual
            | Self::Invokespecial
            | Self::Invokestatic
            | Self::New
            | Self::Anewarray
            | Self::Checkcast => Form::Pool16,
            Self::Ifeq | Self::Ifne | Self::IfIcmpne | Self::Goto | Self::Jsr | Self::Ifnull | Self::Ifnonnull => {
                Form::Branch
            }
            Self::Iinc => Form::Iinc,
            Self::Invokeinterface => Form::Interface,
            Self::Tableswitch => Form::TableSwitch,
            Self::Wide => Form::Wide,
            _ => Form::Simple,
        }
    }

    /// Stack delta for instructions whose effect does not depend on a pool entry.
    ///
    /// `None` for field and method instructions and for `ldc*`; for `jsr` this
    /// is the effect on the fall-through path (the subroutine returns).
    #[must_use]
    pub fn stack_delta(self) -> Option<i32> {
        Some(match self {
            Self::Nop
            | Self::Iinc
            | Self::Goto
            | Self::Jsr
            | Self::Ret
            | Self::Return
            | Self::Anewarray
            | Self::Checkcast
            | Self::Swap
            | Self::Arraylength
            | Self::Wide => 0,
            Self::AconstNull
            | Self::IconstM1
            | Self::Iconst0
            | Self::Iconst1
            | Self::Iconst2
            | Self::Iconst3
            | Self::Iconst4
            | Self::Iconst5
            | Self::Fconst0
            | Self::Bipush
            | Self::Sipush
            | Self::Iload
            | Self::Fload
            | Self::Aload
            | Self::Iload0
            | Self::Iload1
            | Self::Iload2
            | Self::Iload3
            | Self::Fload0
            | Self::Fload1
            | Self::Fload2
            | Self::Fload3
            | Self::Aload0
            | Self::Aload1
            | Self::Aload2
            | Self::Aload3
            | Self::Dup
            | Self::DupX1
            | Self::DupX2
            | Self::New => 1,
            Self::Lconst0
            | Self::Dconst0
            | Self::Lload
            | Self::Dload
            | Self::Lload0
            | Self::Lload1
            | Self::Lload2
            | Self::Lload3
            | Self::Dload0
            | Self::Dload1
            | Self::Dload2
            | Self::Dload3 => 2,
            Self::Aaload
            | Self::Istore
            | Self::Astore
            | Self::Istore0
            | Self::Istore1
            | Self::Istore2
            | Self::Istore3
            | Self::Astore0
            | Self::Astore1
            | Self::Astore2
            | Self::Astore3
            | Self::Pop
            | Self::Ifeq
            | Self::Ifne
            | Self::Ifnull
            | Self::Ifnonnull
            | Self::Tableswitch
            | Self::Ireturn
            | Self::Freturn
            | Self::Areturn
            | Self::Athrow => -1,
            Self::IfIcmpne | Self::Lreturn | Self::Dreturn => -2,
            Self::Aastore => -3,
            Self::Ldc
            | Self::LdcW
            | Self::Ldc2W
            | Self::Getstatic
            | Self::Putstatic
            | Self::Getfield
            | Self::Putfield
            | Self::Invokevirtual
            | Self::Invokespecial
            | Self::Invokestatic
            | Self::Invokeinterface => return None,
        })
    }

    /// Whether control never falls through to the next instruction.
    #[must_use]
    pub fn ends_flow(self) -> bool {
        matches!(
            self,
            Self::Goto
                | Self::Ret
                | Self::Tableswitch
                | Self::Athrow
                | Self::Ireturn
                | Self::Lreturn
                | Self::Freturn
                | Self::Dreturn
                | Self::Areturn
                | Self::Return
        )
    }

    /// The JVM mnemonic (`invokevirtual`, `aload_0`, `iconst_m1`).
    #[must_use]
    pub fn mnemonic(self) -> String {
        let camel = format!("{self:?}");
        let chars: Vec<char> = camel.chars().collect();
        let mut out = String::with_capacity(camel.len() + 2);
        for (i, &c) in chars.iter().enumerate() {
            let trailing_digit = i + 1 == chars.len() && c.is_ascii_digit() && chars[i - 1].is_ascii_lowercase();
            if i > 0 && (c.is_ascii_uppercase() || trailing_digit) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        }
        out
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics() {
        assert_eq!(Opcode::Aload0.mnemonic(), "aload_0");
        assert_eq!(Opcode::Invokevirtual.mnemonic(), "invokevirtual");
        assert_eq!(Opcode::IconstM1.mnemonic(), "iconst_m1");
        assert_eq!(Opcode::Ldc2W.mnemonic(), "ldc2_w");
        assert_eq!(Opcode::AconstNull.mnemonic(), "aconst_null");
    }

    #[test]
    fn from_repr_round_trips_byte_values() {
        assert_eq!(Opcode::from_repr(182), Some(Opcode::Invokevirtual));
        assert_eq!(Opcode::from_repr(10), None);
        assert_eq!(Opcode::Tableswitch.form(), Form::TableSwitch);
    }
}

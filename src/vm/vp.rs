use std::io::{Cursor, Read};

use enum_display::EnumDisplay;

macro_rules! instructions {
    ($($(#[$doc:meta])* $name:ident,)*) => {
        #[repr(u8)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, EnumDisplay)]
        pub enum Instr {
            $($(#[$doc])* $name,)*
        }

        impl Instr {
            const ALL: &'static [Instr] = &[$(Instr::$name,)*];
        }
    };
}

instructions! {
    // constants and stack shuffling
    Nil,
    True,
    False,
    Long,
    Double,
    Const,
    Pop,
    Dup,
    // locals and closed-over fields; slot 0 holds `this`
    LoadLocal,
    StoreLocal,
    ClearLocal,
    LoadClosed,
    SetClosed,
    ClearClosed,
    // vars, addressed through the constant pool
    VarGet,
    VarSet,
    BindRoot,
    SetVarMeta,
    SetDynamic,
    ResolveVar,
    // control flow
    Jump,
    JumpIfFalse,
    TableSwitch,
    LookupSwitch,
    HashKey,
    ShiftMask,
    IntKey,
    Equiv,
    Identical,
    // calls and host interop
    Invoke,
    CallStatic,
    CallVirtual,
    CallReflective,
    GetStatic,
    GetField,
    SetField,
    GetFieldReflective,
    SetFieldReflective,
    New,
    NewReflective,
    KeywordInvoke,
    // collections and metadata
    MakeList,
    MakeVector,
    MakeMap,
    MakeSet,
    WithMeta,
    // exceptions and monitors
    Throw,
    MonitorEnter,
    MonitorExit,
    Return,
    InstanceOf,
    Import,
    Unbox,
    // primitive lanes
    AddL,
    SubL,
    MulL,
    IncL,
    DecL,
    AddD,
    SubD,
    MulD,
    DivD,
    LtL,
    GtL,
    LteL,
    GteL,
    EqL,
    LtD,
    GtD,
    LteD,
    GteD,
    EqD,
}

impl TryFrom<u8> for Instr {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Instr::ALL.get(value as usize).copied().ok_or(())
    }
}

pub struct CodeReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> CodeReader<'a> {
    pub fn new(code: &'a [u8]) -> CodeReader<'a> {
        CodeReader { cursor: Cursor::new(code) }
    }

    pub fn position(&self) -> u32 {
        self.cursor.position() as u32
    }

    pub fn jump_to(&mut self, target: u32) {
        self.cursor.set_position(target as u64);
    }

    fn read_bytes<const N: usize>(&mut self) -> Option<[u8; N]> {
        let mut buf = [0u8; N];
        self.cursor.read_exact(&mut buf).ok()?;
        Some(buf)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_bytes::<1>().map(|b| b[0])
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.read_bytes().map(u16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_bytes().map(u32::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> Option<i32> {
        self.read_bytes().map(i32::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> Option<i64> {
        self.read_bytes().map(i64::from_le_bytes)
    }

    pub fn read_f64(&mut self) -> Option<f64> {
        self.read_bytes().map(f64::from_le_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_round_trip_through_bytes() {
        assert_eq!(Instr::try_from(Instr::Return as u8), Ok(Instr::Return));
        assert_eq!(Instr::try_from(Instr::EqD as u8), Ok(Instr::EqD));
        assert!(Instr::try_from(250).is_err());
        assert_eq!(Instr::KeywordInvoke.to_string(), "KeywordInvoke");
    }

    #[test]
    fn reader_stops_at_truncated_operands() {
        let code = [Instr::Const as u8, 7, 0, 1];
        let mut r = CodeReader::new(&code);
        assert_eq!(r.read_u8(), Some(Instr::Const as u8));
        assert_eq!(r.read_u16(), Some(7));
        assert_eq!(r.read_u16(), None);
    }
}

//! MySQL wire-protocol command bytes relevant to passive capture.
//!
//! Only the command byte matters here; the capture pipeline never negotiates
//! capabilities, resultsets or column metadata, so this is a small subset of
//! the full command set a MySQL client/server driver would need.

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandByte {
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    FieldList = 0x04,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtClose = 0x19,
    ResetConnection = 0x1f,
}

impl CommandByte {
    /// Classifies a raw command byte, distinguishing the bytes the reassembler
    /// acts on from the ones it silently ignores.
    pub fn from_u8(value: u8) -> Dispatch {
        match value {
            0x01 => Dispatch::Known(Self::Quit),
            0x03 => Dispatch::Known(Self::Query),
            0x02 | 0x04 | 0x16 | 0x17 | 0x19 | 0x1f => Dispatch::Ignored,
            _ => Dispatch::Unknown(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Known(CommandByte),
    /// Expected binary-protocol / metadata commands that carry no text SQL.
    Ignored,
    Unknown(u8),
}

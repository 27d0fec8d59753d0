//! Tagged binary codec for the persistence layer.
//!
//! Every primitive write emits a one-byte tag followed by a little-endian
//! payload. Aggregate types carry their own tag from the `0x80` space and
//! write their fields in declaration order. A `Writer` followed by a `Reader`
//! over the produced bytes yields the original value; neither keeps any
//! state beyond its cursor.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

pub const TAG_U8: u8 = 0x01;
pub const TAG_U16: u8 = 0x02;
pub const TAG_U32: u8 = 0x03;
pub const TAG_U64: u8 = 0x04;
pub const TAG_S8: u8 = 0x05;
pub const TAG_S16: u8 = 0x06;
pub const TAG_S32: u8 = 0x07;
pub const TAG_S64: u8 = 0x08;
pub const TAG_STRING: u8 = 0x09;
pub const TAG_MAP: u8 = 0x0A;
pub const TAG_HASHMAP: u8 = 0x0B;
pub const TAG_VECTOR: u8 = 0x0C;
pub const TAG_BOOL: u8 = 0x0D;
pub const TAG_F64: u8 = 0x0E;
pub const TAG_REL_STR: u8 = 0x0F;

// aggregate type tags; stable across versions, extend only.
pub const TAG_TWITCH_DB: u8 = 0x81;
pub const TAG_TWITCH_CHANNEL: u8 = 0x82;
pub const TAG_TWITCH_USER: u8 = 0x83;
pub const TAG_TWITCH_LOG: u8 = 0x84;
pub const TAG_TWITCH_LOG_MSG: u8 = 0x85;
pub const TAG_INTERP_STATE: u8 = 0x86;
pub const TAG_MACRO: u8 = 0x87;
pub const TAG_FUNCTION: u8 = 0x88;
pub const TAG_PERMISSION_SET: u8 = 0x89;
pub const TAG_INTERP_VALUE: u8 = 0x8A;
pub const TAG_SHARED_DB: u8 = 0x8B;
pub const TAG_GROUP: u8 = 0x8C;
pub const TAG_GENERIC_USER: u8 = 0x8D;
pub const TAG_MARKOV_DB: u8 = 0x8E;
pub const TAG_MARKOV_WORD_LIST: u8 = 0x8F;
pub const TAG_MARKOV_WORD: u8 = 0x90;
pub const TAG_MARKOV_STORED_WORD: u8 = 0x91;
pub const TAG_DISCORD_DB: u8 = 0x92;
pub const TAG_DISCORD_GUILD: u8 = 0x93;
pub const TAG_DISCORD_CHANNEL: u8 = 0x94;
pub const TAG_DISCORD_USER: u8 = 0x95;
pub const TAG_DISCORD_ROLE: u8 = 0x96;
pub const TAG_DISCORD_LOG: u8 = 0x97;
pub const TAG_DISCORD_LOG_MSG: u8 = 0x98;
pub const TAG_DISCORD_EMOTE: u8 = 0x99;
pub const TAG_IRC_DB: u8 = 0x9A;
pub const TAG_IRC_SERVER: u8 = 0x9B;
pub const TAG_IRC_USER: u8 = 0x9C;
pub const TAG_IRC_LOG: u8 = 0x9D;
pub const TAG_IRC_LOG_MSG: u8 = 0x9E;
pub const TAG_MESSAGE_DB: u8 = 0x9F;

pub const TAG_AST_LIT_CHAR: u8 = 0xA0;
pub const TAG_AST_LIT_STRING: u8 = 0xA1;
pub const TAG_AST_LIT_LIST: u8 = 0xA2;
pub const TAG_AST_LIT_INTEGER: u8 = 0xA3;
pub const TAG_AST_LIT_DOUBLE: u8 = 0xA4;
pub const TAG_AST_LIT_BOOLEAN: u8 = 0xA5;
pub const TAG_AST_VAR_REF: u8 = 0xA6;
pub const TAG_AST_OP_SUBSCRIPT: u8 = 0xA7;
pub const TAG_AST_OP_SLICE: u8 = 0xA8;
pub const TAG_AST_OP_SPLAT: u8 = 0xA9;
pub const TAG_AST_OP_UNARY: u8 = 0xAA;
pub const TAG_AST_OP_BINARY: u8 = 0xAB;
pub const TAG_AST_OP_TERNARY: u8 = 0xAC;
pub const TAG_AST_OP_COMPARISON: u8 = 0xAD;
pub const TAG_AST_OP_ASSIGN: u8 = 0xAE;
pub const TAG_AST_OP_DOT: u8 = 0xAF;
pub const TAG_AST_FUNCTION_CALL: u8 = 0xB0;
pub const TAG_AST_BLOCK: u8 = 0xB1;
pub const TAG_AST_FUNCTION_DEFN: u8 = 0xB2;

/// Codec failures. A reader that sees the wrong tag reports a mismatch
/// instead of panicking; the caller decides whether that aborts a load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of input")]
    Truncated,

    #[error("type tag mismatch (found {found:#04x}, expected {expected:#04x})")]
    TagMismatch { found: u8, expected: u8 },

    #[error("invalid tag {0:#04x}")]
    InvalidTag(u8),

    #[error("string was not valid utf-8")]
    InvalidUtf8,
}

pub type CodecResult<T> = Result<T, CodecError>;

pub trait Serialise {
    fn serialise(&self, wr: &mut Writer);
}

pub trait Deserialise: Sized {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self>;
}

/// Appends tagged values to a byte buffer.
pub struct Writer<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Writer { buf }
    }

    pub fn tag(&mut self, t: u8) {
        self.buf.push(t);
    }

    pub fn raw_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, x: u8) {
        self.tag(TAG_U8);
        self.buf.push(x);
    }

    pub fn write_u16(&mut self, x: u16) {
        self.tag(TAG_U16);
        self.buf.extend_from_slice(&x.to_le_bytes());
    }

    pub fn write_u32(&mut self, x: u32) {
        self.tag(TAG_U32);
        self.buf.extend_from_slice(&x.to_le_bytes());
    }

    /// Unsigned 64-bit values compact to the smallest unsigned encoding
    /// that holds them; readers widen transparently.
    pub fn write_u64(&mut self, x: u64) {
        if x <= u8::MAX as u64 {
            self.write_u8(x as u8);
        } else if x <= u16::MAX as u64 {
            self.write_u16(x as u16);
        } else if x <= u32::MAX as u64 {
            self.write_u32(x as u32);
        } else {
            self.tag(TAG_U64);
            self.buf.extend_from_slice(&x.to_le_bytes());
        }
    }

    pub fn write_i64(&mut self, x: i64) {
        self.tag(TAG_S64);
        self.buf.extend_from_slice(&x.to_le_bytes());
    }

    pub fn write_bool(&mut self, x: bool) {
        self.tag(TAG_BOOL);
        self.buf.push(x as u8);
    }

    pub fn write_f64(&mut self, x: f64) {
        self.tag(TAG_F64);
        self.buf.extend_from_slice(&x.to_le_bytes());
    }

    pub fn write_str(&mut self, s: &str) {
        self.tag(TAG_STRING);
        self.buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn write<T: Serialise + ?Sized>(&mut self, x: &T) {
        x.serialise(self);
    }
}

/// Cursor over a byte slice produced by a `Writer`.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(CodecError::Truncated);
        }

        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    pub fn peek_tag(&self) -> CodecResult<u8> {
        self.buf.first().copied().ok_or(CodecError::Truncated)
    }

    pub fn tag(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn expect_tag(&mut self, expected: u8) -> CodecResult<()> {
        let found = self.tag()?;
        if found != expected {
            return Err(CodecError::TagMismatch { found, expected });
        }

        Ok(())
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        self.expect_tag(TAG_U8)?;
        Ok(self.take(1)?[0])
    }

    /// Reads any unsigned encoding and widens it to u64.
    pub fn read_u64(&mut self) -> CodecResult<u64> {
        let tag = self.tag()?;
        match tag {
            TAG_U8 => Ok(self.take(1)?[0] as u64),
            TAG_U16 => Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()) as u64),
            TAG_U32 => Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()) as u64),
            TAG_U64 => Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap())),
            found => Err(CodecError::TagMismatch {
                found,
                expected: TAG_U64,
            }),
        }
    }

    pub fn read_u32(&mut self) -> CodecResult<u32> {
        let x = self.read_u64()?;
        u32::try_from(x).map_err(|_| CodecError::InvalidTag(TAG_U32))
    }

    pub fn read_i64(&mut self) -> CodecResult<i64> {
        self.expect_tag(TAG_S64)?;
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_bool(&mut self) -> CodecResult<bool> {
        self.expect_tag(TAG_BOOL)?;
        Ok(self.take(1)?[0] != 0)
    }

    pub fn read_f64(&mut self) -> CodecResult<f64> {
        self.expect_tag(TAG_F64)?;
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_str(&mut self) -> CodecResult<String> {
        self.expect_tag(TAG_STRING)?;
        let len = u64::from_le_bytes(self.take(8)?.try_into().unwrap()) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn read<T: Deserialise>(&mut self) -> CodecResult<T> {
        T::deserialise(self)
    }
}

impl Serialise for u8 {
    fn serialise(&self, wr: &mut Writer) {
        wr.write_u8(*self);
    }
}

impl Deserialise for u8 {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.read_u8()
    }
}

impl Serialise for u64 {
    fn serialise(&self, wr: &mut Writer) {
        wr.write_u64(*self);
    }
}

impl Deserialise for u64 {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.read_u64()
    }
}

impl Serialise for i64 {
    fn serialise(&self, wr: &mut Writer) {
        wr.write_i64(*self);
    }
}

impl Deserialise for i64 {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.read_i64()
    }
}

impl Serialise for bool {
    fn serialise(&self, wr: &mut Writer) {
        wr.write_bool(*self);
    }
}

impl Deserialise for bool {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.read_bool()
    }
}

impl Serialise for f64 {
    fn serialise(&self, wr: &mut Writer) {
        wr.write_f64(*self);
    }
}

impl Deserialise for f64 {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.read_f64()
    }
}

impl Serialise for str {
    fn serialise(&self, wr: &mut Writer) {
        wr.write_str(self);
    }
}

impl Serialise for String {
    fn serialise(&self, wr: &mut Writer) {
        wr.write_str(self);
    }
}

impl Deserialise for String {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.read_str()
    }
}

impl<T: Serialise> Serialise for Vec<T> {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(TAG_VECTOR);
        wr.raw_bytes(&(self.len() as u64).to_le_bytes());
        for x in self {
            x.serialise(wr);
        }
    }
}

impl<T: Deserialise> Deserialise for Vec<T> {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(TAG_VECTOR)?;
        let len = u64::from_le_bytes(rd.take(8)?.try_into().unwrap()) as usize;

        let mut ret = Vec::new();
        for _ in 0..len {
            ret.push(T::deserialise(rd)?);
        }

        Ok(ret)
    }
}

impl<K: Serialise, V: Serialise> Serialise for HashMap<K, V> {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(TAG_HASHMAP);
        wr.raw_bytes(&(self.len() as u64).to_le_bytes());
        for (k, v) in self {
            k.serialise(wr);
            v.serialise(wr);
        }
    }
}

impl<K: Deserialise + Eq + Hash, V: Deserialise> Deserialise for HashMap<K, V> {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(TAG_HASHMAP)?;
        let len = u64::from_le_bytes(rd.take(8)?.try_into().unwrap()) as usize;

        let mut ret = HashMap::new();
        for _ in 0..len {
            let k = K::deserialise(rd)?;
            let v = V::deserialise(rd)?;
            ret.insert(k, v);
        }

        Ok(ret)
    }
}

impl<K: Serialise, V: Serialise> Serialise for BTreeMap<K, V> {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(TAG_MAP);
        wr.raw_bytes(&(self.len() as u64).to_le_bytes());
        for (k, v) in self {
            k.serialise(wr);
            v.serialise(wr);
        }
    }
}

impl<K: Deserialise + Ord, V: Deserialise> Deserialise for BTreeMap<K, V> {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(TAG_MAP)?;
        let len = u64::from_le_bytes(rd.take(8)?.try_into().unwrap()) as usize;

        let mut ret = BTreeMap::new();
        for _ in 0..len {
            let k = K::deserialise(rd)?;
            let v = V::deserialise(rd)?;
            ret.insert(k, v);
        }

        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: Serialise + Deserialise + PartialEq + std::fmt::Debug>(value: T) {
        let mut buf = Vec::new();
        value.serialise(&mut Writer::new(&mut buf));

        let mut rd = Reader::new(&buf);
        let back: T = rd.read().expect("deserialise failed");
        assert_eq!(back, value);
        assert_eq!(rd.remaining(), 0, "trailing bytes after read");
    }

    #[test]
    fn test_scalar_roundtrips() {
        roundtrip(0u64);
        roundtrip(255u64);
        roundtrip(256u64);
        roundtrip(u64::MAX);
        roundtrip(-40i64);
        roundtrip(true);
        roundtrip(false);
        roundtrip(3.25f64);
        roundtrip(String::from("hello, world"));
        roundtrip(String::new());
    }

    #[test]
    fn test_u64_compaction_widens_on_read() {
        // a small u64 is written with the one-byte encoding but still reads
        // back through read_u64.
        let mut buf = Vec::new();
        Writer::new(&mut buf).write_u64(7);
        assert_eq!(buf[0], TAG_U8);

        let mut rd = Reader::new(&buf);
        assert_eq!(rd.read_u64().unwrap(), 7);
    }

    #[test]
    fn test_container_roundtrips() {
        roundtrip(vec![1u64, 2, 3, 500, 70000]);
        roundtrip(Vec::<String>::new());

        let mut map = HashMap::new();
        map.insert(String::from("a"), 1u64);
        map.insert(String::from("b"), 2u64);
        roundtrip(map);

        let mut ordered = BTreeMap::new();
        ordered.insert(String::from("x"), vec![String::from("y")]);
        roundtrip(ordered);
    }

    #[test]
    fn test_tag_mismatch_is_an_error() {
        let mut buf = Vec::new();
        Writer::new(&mut buf).write_str("not a number");

        let mut rd = Reader::new(&buf);
        assert!(matches!(
            rd.read_i64(),
            Err(CodecError::TagMismatch { found: TAG_STRING, .. })
        ));
    }

    #[test]
    fn test_truncated_input() {
        let mut buf = Vec::new();
        Writer::new(&mut buf).write_str("truncate me");
        buf.truncate(buf.len() - 4);

        let mut rd = Reader::new(&buf);
        assert_eq!(rd.read_str(), Err(CodecError::Truncated));
    }
}

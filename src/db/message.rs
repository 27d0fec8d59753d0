//! The interned message arena: every logged message body is appended to one
//! byte arena, and log entries reference (offset, length) slices into it.

use crate::serialise::{self, CodecResult, Deserialise, Reader, Serialise, Writer};

/// A slice into the message arena. Stored slices stay valid for the life of
/// the process because the arena only ever grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelativeStr {
    pub start: u64,
    pub len: u64,
}

impl RelativeStr {
    pub fn new(start: usize, len: usize) -> Self {
        RelativeStr {
            start: start as u64,
            len: len as u64,
        }
    }

    pub fn get<'a>(&self, arena: &'a str) -> &'a str {
        let start = self.start as usize;
        let end = start + self.len as usize;
        arena.get(start..end).unwrap_or("")
    }

    pub fn end_excl(&self) -> u64 {
        self.start + self.len
    }
}

impl Serialise for RelativeStr {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_REL_STR);
        wr.write_u64(self.start);
        wr.write_u64(self.len);
    }
}

impl Deserialise for RelativeStr {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_REL_STR)?;
        Ok(RelativeStr {
            start: rd.read_u64()?,
            len: rd.read_u64()?,
        })
    }
}

/// Append-only arena of all logged message bodies.
#[derive(Debug, Clone, Default)]
pub struct MessageDb {
    raw: String,
}

impl MessageDb {
    /// Appends `contents` to the arena and returns its slice.
    pub fn intern(&mut self, contents: &str) -> RelativeStr {
        let at = self.raw.len();
        self.raw.push_str(contents);
        RelativeStr::new(at, contents.len())
    }

    pub fn arena(&self) -> &str {
        &self.raw
    }
}

impl Serialise for MessageDb {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_MESSAGE_DB);
        wr.write_str(&self.raw);
    }
}

impl Deserialise for MessageDb {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_MESSAGE_DB)?;
        Ok(MessageDb {
            raw: rd.read_str()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_appends_and_resolves() {
        let mut db = MessageDb::default();
        let a = db.intern("hello");
        let b = db.intern("world");

        assert_eq!(a.get(db.arena()), "hello");
        assert_eq!(b.get(db.arena()), "world");
        assert_eq!(b.start, 5);
    }

    #[test]
    fn test_out_of_range_slice_is_empty() {
        let db = MessageDb::default();
        let bogus = RelativeStr::new(10, 5);
        assert_eq!(bogus.get(db.arena()), "");
    }
}

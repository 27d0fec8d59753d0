//! Cross-backend shared state: user groups.

use crate::serialise::{self, CodecResult, Deserialise, Reader, Serialise, Writer};
use crate::Backend;
use std::collections::HashMap;

/// A (backend, user-id) pair identifying a user on some backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericUser {
    pub id: String,
    pub backend: Backend,
}

/// A named, cross-backend set of users with a stable numeric id. A user's
/// effective permissions are the union of their direct flags and the flags
/// granted through groups; membership is kept bidirectionally consistent
/// with each user record's `groups` list.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub id: u64,
    pub name: String,
    pub members: Vec<GenericUser>,
}

impl Group {
    pub fn add_member(&mut self, id: &str, backend: Backend) {
        if !self.members.iter().any(|m| m.id == id && m.backend == backend) {
            self.members.push(GenericUser {
                id: id.to_string(),
                backend,
            });
        }
    }

    pub fn remove_member(&mut self, id: &str, backend: Backend) {
        self.members.retain(|m| !(m.id == id && m.backend == backend));
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharedDb {
    pub groups: HashMap<String, Group>,
}

impl SharedDb {
    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub fn get_group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.get_mut(name)
    }

    pub fn get_group_by_id(&self, id: u64) -> Option<&Group> {
        self.groups.values().find(|g| g.id == id)
    }

    pub fn get_group_by_id_mut(&mut self, id: u64) -> Option<&mut Group> {
        self.groups.values_mut().find(|g| g.id == id)
    }

    /// Creates a group with the next free id; fails if the name is taken.
    pub fn add_group(&mut self, name: &str) -> Option<&mut Group> {
        if self.groups.contains_key(name) {
            return None;
        }

        let id = self.groups.values().map(|g| g.id + 1).max().unwrap_or(0);
        Some(self.groups.entry(name.to_string()).or_insert(Group {
            id,
            name: name.to_string(),
            members: Vec::new(),
        }))
    }
}

impl Serialise for GenericUser {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_GENERIC_USER);
        wr.write_str(&self.id);
        wr.write(&self.backend);
    }
}

impl Deserialise for GenericUser {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_GENERIC_USER)?;
        Ok(GenericUser {
            id: rd.read_str()?,
            backend: rd.read()?,
        })
    }
}

impl Serialise for Group {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_GROUP);
        wr.write_u64(self.id);
        wr.write_str(&self.name);
        wr.write(&self.members);
    }
}

impl Deserialise for Group {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_GROUP)?;
        Ok(Group {
            id: rd.read_u64()?,
            name: rd.read_str()?,
            members: rd.read()?,
        })
    }
}

impl Serialise for SharedDb {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_SHARED_DB);
        wr.write(&self.groups);
    }
}

impl Deserialise for SharedDb {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_SHARED_DB)?;
        Ok(SharedDb {
            groups: rd.read()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_membership_dedupes() {
        let mut group = Group::default();
        group.add_member("42", Backend::Twitch);
        group.add_member("42", Backend::Twitch);
        group.add_member("42", Backend::Discord);
        assert_eq!(group.members.len(), 2);

        group.remove_member("42", Backend::Twitch);
        assert_eq!(group.members.len(), 1);
        assert_eq!(group.members[0].backend, Backend::Discord);
    }

    #[test]
    fn test_add_group_assigns_fresh_ids() {
        let mut shared = SharedDb::default();
        shared.add_group("first").unwrap();
        shared.add_group("second").unwrap();
        assert!(shared.add_group("first").is_none());

        let a = shared.get_group("first").unwrap().id;
        let b = shared.get_group("second").unwrap().id;
        assert_ne!(a, b);
        assert!(shared.get_group_by_id(a).is_some());
    }
}

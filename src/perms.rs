//! Permission model: flag masks, group white/blacklists, and (for discord)
//! role white/blacklists, plus the wire grammar for editing them.

use crate::db::Snowflake;
use crate::serialise::{self, CodecResult, Deserialise, Reader, Serialise, Writer};

/// Permission flag bits. OWNER always passes the check.
pub mod flags {
    pub const EVERYONE: u64 = 0x001;
    pub const FOLLOWER: u64 = 0x002;
    pub const TRUSTED: u64 = 0x004;
    pub const VIP: u64 = 0x008;
    pub const SUBSCRIBER: u64 = 0x010;
    pub const MODERATOR: u64 = 0x040;
    pub const BROADCASTER: u64 = 0x080;
    pub const OWNER: u64 = 0x100;
}

/// What a command requires before it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    pub flags: u64,
    pub whitelist: Vec<u64>,
    pub blacklist: Vec<u64>,
    pub role_whitelist: Vec<Snowflake>,
    pub role_blacklist: Vec<Snowflake>,
}

/// Resolves group and role names while parsing a permission spec. The
/// dispatcher implements this over the database and the current channel.
pub trait NameResolver {
    fn group_id(&self, name: &str) -> Option<u64>;
    fn role_id(&self, name: &str) -> Option<Snowflake>;
}

impl PermissionSet {
    pub fn from_flags(flags: u64) -> Self {
        PermissionSet {
            flags,
            ..Default::default()
        }
    }

    /// Decides whether a user with the given flag mask, group memberships
    /// and discord roles may pass.
    ///
    /// A required flag mask of zero means owner-only. Whitelists rescue a
    /// user who fails the flag check; blacklists override everything except
    /// nothing — even owners can be blacklisted off a command.
    pub fn check(&self, given: u64, groups: &[u64], roles: &[Snowflake]) -> bool {
        let blacklisted = self.blacklist.iter().any(|g| groups.contains(g))
            || self.role_blacklist.iter().any(|r| roles.contains(r));

        let flag_ok = if given & flags::OWNER != 0 {
            true
        } else if self.flags == 0 {
            false
        } else {
            self.flags & given != 0
        };

        if flag_ok {
            !blacklisted
        } else {
            self.whitelist.iter().any(|g| groups.contains(g))
                || self.role_whitelist.iter().any(|r| roles.contains(r))
        }
    }
}

fn add_to_list<T: PartialEq>(list: &mut Vec<T>, elem: T) {
    if !list.contains(&elem) {
        list.push(elem);
    }
}

fn remove_from_list<T: PartialEq>(list: &mut Vec<T>, elem: &T) {
    list.retain(|x| x != elem);
}

/// Parses just the group part of a permission spec: `+group1-group2*group3`,
/// with `%` scoping a name to discord roles and `\` escaping characters in
/// names. `+` whitelists, `-` blacklists, `*` removes from both lists.
pub fn parse_groups(
    mut sv: &str,
    mut perms: PermissionSet,
    resolver: &dyn NameResolver,
) -> Result<PermissionSet, String> {
    while let Some(mode) = sv.chars().next().filter(|c| matches!(*c, '+' | '-' | '*')) {
        sv = &sv[1..];
        if sv.is_empty() {
            return Err(String::from("unexpected end of input"));
        }

        let is_role = sv.starts_with('%');
        if is_role {
            sv = &sv[1..];
        }

        let mut name = String::new();
        let mut chars = sv.char_indices().peekable();
        let mut consumed = sv.len();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        name.push(escaped);
                    }
                }
                '+' | '-' | '*' => {
                    consumed = i;
                    break;
                }
                other => name.push(other),
            }
        }
        sv = &sv[consumed..];

        if is_role {
            let Some(role) = resolver.role_id(&name) else {
                return Err(format!("nonexistent role '{name}'"));
            };

            apply_mode(mode, &mut perms.role_whitelist, &mut perms.role_blacklist, role);
        } else {
            let Some(group) = resolver.group_id(&name) else {
                return Err(format!("nonexistent group '{name}'"));
            };

            apply_mode(mode, &mut perms.whitelist, &mut perms.blacklist, group);
        }
    }

    if !sv.is_empty() {
        return Err(format!("junk at end of permissions ({sv})"));
    }

    Ok(perms)
}

fn apply_mode<T: PartialEq + Clone>(mode: char, whitelist: &mut Vec<T>, blacklist: &mut Vec<T>, elem: T) {
    match mode {
        '+' => {
            remove_from_list(blacklist, &elem);
            add_to_list(whitelist, elem);
        }
        '-' => {
            remove_from_list(whitelist, &elem);
            add_to_list(blacklist, elem);
        }
        _ => {
            remove_from_list(whitelist, &elem);
            remove_from_list(blacklist, &elem);
        }
    }
}

/// Parses a full permission spec: optional leading `+` (merge the flag bits
/// into the existing mask instead of replacing it), hex flag digits, then
/// group specs.
pub fn parse(
    mut sv: &str,
    orig: PermissionSet,
    resolver: &dyn NameResolver,
) -> Result<PermissionSet, String> {
    let merge = sv.starts_with('+');
    if merge {
        sv = &sv[1..];
    }

    let mut flag: u64 = 0;
    while let Some(c) = sv.chars().next() {
        if let Some(d) = c.to_digit(16) {
            flag = flag * 16 + d as u64;
            sv = &sv[1..];
        } else {
            break;
        }
    }

    let mut perms = orig.clone();
    perms.flags = flag | if merge { orig.flags } else { 0 };

    if sv.is_empty() {
        return Ok(perms);
    }

    parse_groups(sv, perms, resolver)
}

impl Serialise for PermissionSet {
    fn serialise(&self, wr: &mut Writer) {
        wr.tag(serialise::TAG_PERMISSION_SET);
        wr.write_u64(self.flags);
        wr.write(&self.whitelist);
        wr.write(&self.blacklist);
        wr.write(&self.role_whitelist);
        wr.write(&self.role_blacklist);
    }
}

impl Deserialise for PermissionSet {
    fn deserialise(rd: &mut Reader) -> CodecResult<Self> {
        rd.expect_tag(serialise::TAG_PERMISSION_SET)?;
        Ok(PermissionSet {
            flags: rd.read_u64()?,
            whitelist: rd.read()?,
            blacklist: rd.read()?,
            role_whitelist: rd.read()?,
            role_blacklist: rd.read()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestResolver;

    impl NameResolver for TestResolver {
        fn group_id(&self, name: &str) -> Option<u64> {
            match name {
                "trusted" => Some(1),
                "banned" => Some(2),
                "regulars" => Some(3),
                _ => None,
            }
        }

        fn role_id(&self, name: &str) -> Option<Snowflake> {
            match name {
                "admin" => Some(Snowflake(100)),
                _ => None,
            }
        }
    }

    #[test]
    fn test_check_flag_match() {
        let perms = PermissionSet::from_flags(flags::MODERATOR);
        assert!(perms.check(flags::MODERATOR, &[], &[]));
        assert!(perms.check(flags::MODERATOR | flags::EVERYONE, &[], &[]));
        assert!(!perms.check(flags::EVERYONE, &[], &[]));
    }

    #[test]
    fn test_check_zero_flags_is_owner_only() {
        let perms = PermissionSet::from_flags(0);
        assert!(perms.check(flags::OWNER, &[], &[]));
        assert!(!perms.check(flags::MODERATOR | flags::BROADCASTER, &[], &[]));
    }

    #[test]
    fn test_check_whitelist_rescues() {
        let perms = PermissionSet {
            flags: flags::MODERATOR,
            whitelist: vec![3],
            ..Default::default()
        };
        assert!(!perms.check(flags::EVERYONE, &[1], &[]));
        assert!(perms.check(flags::EVERYONE, &[3], &[]));
    }

    #[test]
    fn test_check_blacklist_beats_owner() {
        let perms = PermissionSet {
            flags: flags::EVERYONE,
            blacklist: vec![2],
            ..Default::default()
        };
        assert!(!perms.check(flags::OWNER, &[2], &[]));
        assert!(perms.check(flags::OWNER, &[1], &[]));
    }

    #[test]
    fn test_check_role_lists() {
        let perms = PermissionSet {
            flags: flags::MODERATOR,
            role_whitelist: vec![Snowflake(100)],
            role_blacklist: vec![Snowflake(200)],
            ..Default::default()
        };
        assert!(perms.check(flags::EVERYONE, &[], &[Snowflake(100)]));
        assert!(!perms.check(flags::MODERATOR, &[], &[Snowflake(200)]));
    }

    #[test]
    fn test_parse_replaces_flags() {
        let orig = PermissionSet::from_flags(0x3f);
        let parsed = parse("40", orig, &TestResolver).unwrap();
        assert_eq!(parsed.flags, 0x40);
    }

    #[test]
    fn test_parse_merges_flags() {
        let orig = PermissionSet::from_flags(0x3f);
        let parsed = parse("+40", orig, &TestResolver).unwrap();
        assert_eq!(parsed.flags, 0x7f);
    }

    #[test]
    fn test_parse_groups_grammar() {
        let parsed =
            parse_groups("+trusted-banned", PermissionSet::default(), &TestResolver).unwrap();
        assert_eq!(parsed.whitelist, vec![1]);
        assert_eq!(parsed.blacklist, vec![2]);

        // '*' removes from both lists
        let cleared = parse_groups("*trusted*banned", parsed, &TestResolver).unwrap();
        assert!(cleared.whitelist.is_empty());
        assert!(cleared.blacklist.is_empty());
    }

    #[test]
    fn test_parse_whitelist_moves_from_blacklist() {
        let orig = PermissionSet {
            blacklist: vec![1],
            ..Default::default()
        };
        let parsed = parse_groups("+trusted", orig, &TestResolver).unwrap();
        assert_eq!(parsed.whitelist, vec![1]);
        assert!(parsed.blacklist.is_empty());
    }

    #[test]
    fn test_parse_flags_then_groups() {
        let parsed = parse("3a+regulars", PermissionSet::default(), &TestResolver).unwrap();
        assert_eq!(parsed.flags, 0x3a);
        assert_eq!(parsed.whitelist, vec![3]);
    }

    #[test]
    fn test_parse_role_scoping() {
        let parsed = parse("10+%admin", PermissionSet::default(), &TestResolver).unwrap();
        assert_eq!(parsed.flags, 0x10);
        assert_eq!(parsed.role_whitelist, vec![Snowflake(100)]);
    }

    #[test]
    fn test_parse_unknown_group_fails() {
        let err = parse_groups("+nope", PermissionSet::default(), &TestResolver).unwrap_err();
        assert_eq!(err, "nonexistent group 'nope'");
    }

    #[test]
    fn test_serialise_roundtrip() {
        let perms = PermissionSet {
            flags: 0x41,
            whitelist: vec![1, 2],
            blacklist: vec![3],
            role_whitelist: vec![Snowflake(9)],
            role_blacklist: vec![],
        };

        let mut buf = Vec::new();
        perms.serialise(&mut Writer::new(&mut buf));
        let back = PermissionSet::deserialise(&mut Reader::new(&buf)).unwrap();
        assert_eq!(back, perms);
    }
}

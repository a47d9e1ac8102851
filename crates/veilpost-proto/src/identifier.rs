//! Typed identifiers with canonical text forms.
//!
//! Identifiers are stored and exchanged as text (`person:<network>/<user>`,
//! `group:<network>/<owner>/<group>`, `post_iv:<network>/<iv>`). Parsing is
//! the only way back from text to a typed value, and it fails closed: any
//! input that does not round-trip exactly is rejected.

use std::{fmt, str::FromStr};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

const PERSON_PREFIX: &str = "person:";
const GROUP_PREFIX: &str = "group:";
const POST_IV_PREFIX: &str = "post_iv:";

fn invalid(input: &str, reason: &'static str) -> ProtocolError {
    ProtocolError::InvalidIdentifier { input: input.to_string(), reason }
}

fn check_segment(input: &str, segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(invalid(input, "empty segment"));
    }
    if segment.contains('/') {
        return Err(invalid(input, "segment contains '/'"));
    }
    Ok(())
}

/// A person on a social network.
///
/// Globally unique per network. Used as the key into the local store and the
/// exchange channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PersonIdentifier {
    network: String,
    user_id: String,
}

impl PersonIdentifier {
    /// Build an identifier, validating both segments.
    pub fn new(network: impl Into<String>, user_id: impl Into<String>) -> Result<Self> {
        let network = network.into();
        let user_id = user_id.into();
        let text = format!("{PERSON_PREFIX}{network}/{user_id}");
        check_segment(&text, &network)?;
        if user_id.is_empty() {
            return Err(invalid(&text, "empty user id"));
        }
        Ok(Self { network, user_id })
    }

    /// Network this person belongs to (e.g. `facebook.com`).
    pub fn network(&self) -> &str {
        &self.network
    }

    /// User id on that network.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl fmt::Display for PersonIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PERSON_PREFIX}{}/{}", self.network, self.user_id)
    }
}

impl FromStr for PersonIdentifier {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let rest =
            s.strip_prefix(PERSON_PREFIX).ok_or_else(|| invalid(s, "missing person prefix"))?;
        let (network, user_id) = rest.split_once('/').ok_or_else(|| invalid(s, "missing '/'"))?;
        Self::new(network, user_id)
    }
}

impl TryFrom<String> for PersonIdentifier {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PersonIdentifier> for String {
    fn from(value: PersonIdentifier) -> Self {
        value.to_string()
    }
}

/// A user-defined group of people, owned by one person.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupIdentifier {
    network: String,
    owner: String,
    group_id: String,
}

impl GroupIdentifier {
    /// Build a group identifier, validating every segment.
    pub fn new(
        network: impl Into<String>,
        owner: impl Into<String>,
        group_id: impl Into<String>,
    ) -> Result<Self> {
        let network = network.into();
        let owner = owner.into();
        let group_id = group_id.into();
        let text = format!("{GROUP_PREFIX}{network}/{owner}/{group_id}");
        check_segment(&text, &network)?;
        check_segment(&text, &owner)?;
        check_segment(&text, &group_id)?;
        Ok(Self { network, owner, group_id })
    }

    /// Network the group lives on.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// The person who owns the group.
    pub fn owner(&self) -> Result<PersonIdentifier> {
        PersonIdentifier::new(self.network.clone(), self.owner.clone())
    }

    /// Group id, unique per owner.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }
}

impl fmt::Display for GroupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{GROUP_PREFIX}{}/{}/{}", self.network, self.owner, self.group_id)
    }
}

impl FromStr for GroupIdentifier {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s.strip_prefix(GROUP_PREFIX).ok_or_else(|| invalid(s, "missing group prefix"))?;
        let mut parts = rest.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(network), Some(owner), Some(group_id), None) => {
                Self::new(network, owner, group_id)
            },
            _ => Err(invalid(s, "expected network/owner/group")),
        }
    }
}

impl TryFrom<String> for GroupIdentifier {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<GroupIdentifier> for String {
    fn from(value: GroupIdentifier) -> Self {
        value.to_string()
    }
}

/// A post, identified by its network and initialization vector.
///
/// The iv is random per post, so (network, iv) is unique in practice and is
/// what the post cache and the exchange channel key on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PostIvIdentifier {
    network: String,
    iv: Vec<u8>,
}

impl PostIvIdentifier {
    /// Build a post identifier.
    pub fn new(network: impl Into<String>, iv: impl Into<Vec<u8>>) -> Result<Self> {
        let network = network.into();
        let iv = iv.into();
        check_segment(&format!("{POST_IV_PREFIX}{network}/"), &network)?;
        if iv.is_empty() {
            return Err(invalid(&network, "empty iv"));
        }
        Ok(Self { network, iv })
    }

    /// Network the post was published on.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Raw iv bytes.
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

impl fmt::Display for PostIvIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // '/' is a separator here, base64 may contain it
        let iv = BASE64.encode(&self.iv).replace('/', "|");
        write!(f, "{POST_IV_PREFIX}{}/{iv}", self.network)
    }
}

impl FromStr for PostIvIdentifier {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let rest =
            s.strip_prefix(POST_IV_PREFIX).ok_or_else(|| invalid(s, "missing post_iv prefix"))?;
        let (network, iv) = rest.split_once('/').ok_or_else(|| invalid(s, "missing '/'"))?;
        let iv = BASE64.decode(iv.replace('|', "/")).map_err(|_| invalid(s, "iv is not base64"))?;
        Self::new(network, iv)
    }
}

impl TryFrom<String> for PostIvIdentifier {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PostIvIdentifier> for String {
    fn from(value: PostIvIdentifier) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_text_roundtrip() {
        let id = PersonIdentifier::new("facebook.com", "alice.42").unwrap();
        assert_eq!(id.to_string(), "person:facebook.com/alice.42");
        assert_eq!(id.to_string().parse::<PersonIdentifier>().unwrap(), id);
    }

    #[test]
    fn person_rejects_malformed_text() {
        for input in ["", "person:", "person:facebook.com", "person:/alice", "user:a/b"] {
            assert!(input.parse::<PersonIdentifier>().is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn person_user_id_may_contain_slash() {
        // Only the first '/' separates network from user id
        let id: PersonIdentifier = "person:twitter.com/a/b".parse().unwrap();
        assert_eq!(id.network(), "twitter.com");
        assert_eq!(id.user_id(), "a/b");
    }

    #[test]
    fn group_text_roundtrip() {
        let group = GroupIdentifier::new("facebook.com", "alice", "friends").unwrap();
        let parsed: GroupIdentifier = group.to_string().parse().unwrap();
        assert_eq!(parsed, group);
        assert_eq!(parsed.owner().unwrap().user_id(), "alice");
    }

    #[test]
    fn group_rejects_wrong_arity() {
        assert!("group:facebook.com/alice".parse::<GroupIdentifier>().is_err());
        assert!("group:facebook.com/alice/a/b".parse::<GroupIdentifier>().is_err());
    }

    #[test]
    fn post_iv_escapes_slash() {
        // 0xff 0xff 0xff encodes to "////"
        let post = PostIvIdentifier::new("facebook.com", vec![0xff, 0xff, 0xff]).unwrap();
        let text = post.to_string();
        assert_eq!(text, "post_iv:facebook.com/||||");
        assert_eq!(text.parse::<PostIvIdentifier>().unwrap(), post);
    }

    #[test]
    fn post_iv_rejects_bad_base64() {
        assert!("post_iv:facebook.com/not base64!".parse::<PostIvIdentifier>().is_err());
        assert!("post_iv:facebook.com/".parse::<PostIvIdentifier>().is_err());
    }

    #[test]
    fn serde_goes_through_text_form() {
        let id = PersonIdentifier::new("facebook.com", "bob").unwrap();
        let value: String = id.clone().into();
        assert_eq!(PersonIdentifier::try_from(value).unwrap(), id);
        assert!(PersonIdentifier::try_from("bob".to_string()).is_err());
    }
}

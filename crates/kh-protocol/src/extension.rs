//! Named protocol extensions
//!
//! The set is closed: an `SSH2_AGENTC_EXTENSION` request carries a name that
//! is matched byte-for-byte against this table, and the `query` extension
//! returns the table verbatim.

/// A recognised extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    /// List the supported extension names
    Query,
    /// Add a PuTTY (.ppk) private key file, possibly encrypted
    AddKeyFile,
    /// Forget the decrypted copy of one key
    Reencrypt,
    /// Forget the decrypted copy of every key that can be re-decrypted
    ReencryptAll,
    /// Key list annotated with decryption state
    ListExtended,
}

impl Extension {
    /// Every extension, in the order `query` reports them
    pub const ALL: [Extension; 5] = [
        Extension::Query,
        Extension::AddKeyFile,
        Extension::Reencrypt,
        Extension::ReencryptAll,
        Extension::ListExtended,
    ];

    /// Wire name
    pub fn name(&self) -> &'static str {
        match self {
            Extension::Query => "query",
            Extension::AddKeyFile => "add-ppk@putty.projects.tartarus.org",
            Extension::Reencrypt => "reencrypt@putty.projects.tartarus.org",
            Extension::ReencryptAll => "reencrypt-all@putty.projects.tartarus.org",
            Extension::ListExtended => "list-extended@putty.projects.tartarus.org",
        }
    }

    /// Look up an extension by its exact wire name
    pub fn from_name(name: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ext| ext.name().as_bytes() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_exact() {
        assert_eq!(Extension::from_name(b"query"), Some(Extension::Query));
        assert_eq!(Extension::from_name(b"QUERY"), None);
        assert_eq!(Extension::from_name(b"query\0"), None);
        assert_eq!(
            Extension::from_name(b"list-extended@putty.projects.tartarus.org"),
            Some(Extension::ListExtended)
        );
    }

    #[test]
    fn test_names_are_distinct() {
        for (i, a) in Extension::ALL.iter().enumerate() {
            for b in &Extension::ALL[i + 1..] {
                assert_ne!(a.name(), b.name());
            }
        }
    }
}

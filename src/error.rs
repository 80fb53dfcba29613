/// Errors surfaced by store mutations and iterator construction.
///
/// Lookup-style calls report absence through `Option` instead; iterator
/// invalidation is latched into the iterator itself and read back through
/// [`crate::IterStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TrieError {
    /// Keys must be NUL-free so the C surface can hand them out as
    /// `const char *` without re-encoding.
    #[error("key contains an interior NUL byte")]
    EmbeddedNul,

    #[error("key is not present in the trie")]
    KeyNotFound,

    /// Pair enumeration over zero-length keys would only ever compare the
    /// empty key with itself.
    #[error("pair enumeration requires a key length of at least 1")]
    EmptyPairKey,

    /// A Hamming bound of zero cannot match anything but the query itself,
    /// which is always excluded.
    #[error("maximum Hamming distance must be at least 1")]
    ZeroMaxDist,
}

pub(crate) type Result<T> = std::result::Result<T, TrieError>;

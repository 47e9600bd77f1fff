//! Byte-pattern signatures and the address resolver built on them.
//!
//! The host binary ships without symbols, so routines are located by
//! scanning its code for a known byte sequence. Patterns are written as
//! space-separated hex bytes with `??` (or `?`) for bytes that vary between
//! builds, for example `55 8B EC A1 ?? ?? ?? ??`.
//!
//! The core only depends on the [`AddressResolver`] trait.
//! [`SignatureResolver`] is the implementation backed by a [`CodeImage`]
//! and the signature table from configuration.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::str::FromStr;

use tickhook_types::Address;
use tracing::debug;

use crate::config::SignatureSetConfig;
use crate::image::CodeImage;

/// Errors produced while parsing a byte pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// The pattern contains no tokens.
    #[error("pattern is empty")]
    Empty,

    /// A token is neither a two-digit hex byte nor a wildcard.
    #[error("invalid pattern token {token:?}")]
    InvalidToken {
        /// The offending token.
        token: String,
    },

    /// Every byte is a wildcard, so the pattern would match anywhere.
    #[error("pattern has no concrete bytes")]
    AllWildcards,
}

/// Errors produced while building a [`SignatureResolver`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// A configured pattern failed to parse.
    #[error("signature {name:?}: {source}")]
    Pattern {
        /// The signature name.
        name: String,
        /// The underlying pattern error.
        source: PatternError,
    },
}

/// Maps a symbolic name to a code address in the host process.
pub trait AddressResolver {
    /// Resolve `name`, or `None` if it cannot be located.
    fn resolve(&self, name: &str) -> Option<Address>;

    /// Follow a relative jump planted at `address`, if any.
    ///
    /// Resolvers without access to the code return `address` unchanged.
    fn follow_jump(&self, address: Address) -> Address {
        address
    }
}

/// A parsed byte pattern. `None` entries are wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<Option<u8>>,
}

impl Pattern {
    /// Parse a pattern string.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] if the string is empty, contains a token
    /// that is not a hex byte or wildcard, or has no concrete bytes.
    pub fn parse(text: &str) -> Result<Self, PatternError> {
        let bytes = text
            .split_whitespace()
            .map(parse_token)
            .collect::<Result<Vec<_>, _>>()?;

        if bytes.is_empty() {
            return Err(PatternError::Empty);
        }
        if bytes.iter().all(Option::is_none) {
            return Err(PatternError::AllWildcards);
        }
        Ok(Self { bytes })
    }

    /// Number of bytes (including wildcards) the pattern spans.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the pattern spans no bytes. Never true for a parsed pattern.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether `window` matches the pattern byte for byte.
    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() == self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(window)
                .all(|(expected, actual)| expected.is_none_or(|byte| byte == *actual))
    }
}

impl FromStr for Pattern {
    type Err = PatternError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

fn parse_token(token: &str) -> Result<Option<u8>, PatternError> {
    if token == "??" || token == "?" {
        return Ok(None);
    }
    if token.len() != 2 || !token.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Err(PatternError::InvalidToken {
            token: token.to_owned(),
        });
    }
    u8::from_str_radix(token, 16)
        .map(Some)
        .map_err(|_err| PatternError::InvalidToken {
            token: token.to_owned(),
        })
}

/// A named pattern plus the displacement from its match to the address it
/// stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Bytes to search for.
    pub pattern: Pattern,
    /// Signed displacement added to the match address.
    pub offset: i64,
}

/// [`AddressResolver`] that scans a [`CodeImage`] for named signatures.
///
/// Scan results, including misses, are memoised: the image does not change
/// while the resolver is alive.
#[derive(Debug)]
pub struct SignatureResolver {
    image: CodeImage,
    host_version: String,
    signatures: BTreeMap<String, Signature>,
    cache: RefCell<BTreeMap<String, Option<Address>>>,
}

impl SignatureResolver {
    /// Create a resolver with an empty signature table.
    pub fn new(image: CodeImage, host_version: impl Into<String>) -> Self {
        Self {
            image,
            host_version: host_version.into(),
            signatures: BTreeMap::new(),
            cache: RefCell::new(BTreeMap::new()),
        }
    }

    /// Create a resolver from the configured signature table.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Pattern`] naming the first entry whose
    /// pattern does not parse.
    pub fn from_config(image: CodeImage, config: &SignatureSetConfig) -> Result<Self, SignatureError> {
        let mut resolver = Self::new(image, config.host_version.clone());
        for (name, entry) in &config.entries {
            let pattern = Pattern::parse(&entry.pattern).map_err(|source| {
                SignatureError::Pattern {
                    name: name.clone(),
                    source,
                }
            })?;
            resolver.insert(
                name.clone(),
                Signature {
                    pattern,
                    offset: entry.offset,
                },
            );
        }
        debug!(
            host_version = %resolver.host_version,
            signatures = resolver.signatures.len(),
            "Signature table loaded"
        );
        Ok(resolver)
    }

    /// Add or replace a signature. Clears any memoised result for `name`.
    pub fn insert(&mut self, name: impl Into<String>, signature: Signature) {
        let name = name.into();
        self.cache.get_mut().remove(&name);
        self.signatures.insert(name, signature);
    }

    /// Host build the signature table targets.
    pub fn host_version(&self) -> &str {
        &self.host_version
    }

    /// The image being scanned.
    pub const fn image(&self) -> &CodeImage {
        &self.image
    }

    /// Number of known signatures.
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Whether no signature is known.
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    fn scan(&self, name: &str) -> Option<Address> {
        let signature = self.signatures.get(name)?;
        let matched = self.image.find(&signature.pattern)?;
        matched.checked_offset(signature.offset)
    }
}

impl AddressResolver for SignatureResolver {
    fn resolve(&self, name: &str) -> Option<Address> {
        if let Some(cached) = self.cache.borrow().get(name) {
            return *cached;
        }
        let resolved = self.scan(name);
        match resolved {
            Some(address) => debug!(name, address = %address, "Signature resolved"),
            None => debug!(name, host_version = %self.host_version, "Signature not found"),
        }
        self.cache.borrow_mut().insert(name.to_owned(), resolved);
        resolved
    }

    fn follow_jump(&self, address: Address) -> Address {
        self.image.follow_jump(address)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::SignatureConfig;
    use crate::image::JMP_REL32;

    const BASE: Address = Address::new(0x40_0000);

    fn set(entries: &[(&str, &str, i64)]) -> SignatureSetConfig {
        SignatureSetConfig {
            host_version: "test-1".to_owned(),
            entries: entries
                .iter()
                .map(|(name, pattern, offset)| {
                    (
                        (*name).to_owned(),
                        SignatureConfig {
                            pattern: (*pattern).to_owned(),
                            offset: *offset,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn parses_hex_and_wildcards() {
        let pattern = Pattern::parse("55 8b EC ?? ?").unwrap();
        assert_eq!(pattern.len(), 5);
        assert!(pattern.matches(&[0x55, 0x8B, 0xEC, 0x00, 0xFF]));
        assert!(!pattern.matches(&[0x55, 0x8B, 0xED, 0x00, 0xFF]));
        assert!(!pattern.matches(&[0x55, 0x8B, 0xEC]));
    }

    #[test]
    fn rejects_bad_patterns() {
        assert_eq!(Pattern::parse("   "), Err(PatternError::Empty));
        assert_eq!(Pattern::parse("?? ??"), Err(PatternError::AllWildcards));
        assert_eq!(
            Pattern::parse("55 8BEC"),
            Err(PatternError::InvalidToken {
                token: "8BEC".to_owned()
            })
        );
        assert!(matches!(
            Pattern::parse("55 ZZ"),
            Err(PatternError::InvalidToken { .. })
        ));
        assert!(matches!(
            Pattern::parse("+1"),
            Err(PatternError::InvalidToken { .. })
        ));
    }

    #[test]
    fn resolves_configured_signature_with_offset() {
        let image = CodeImage::new(BASE, vec![0xCC, 0xCC, 0x55, 0x8B, 0xEC, 0xC3]);
        let resolver =
            SignatureResolver::from_config(image, &set(&[("on_tick", "55 8B EC", 0), ("ret", "8B EC C3", 2)]))
                .unwrap();

        assert_eq!(resolver.len(), 2);
        assert_eq!(resolver.host_version(), "test-1");
        assert_eq!(resolver.resolve("on_tick"), Some(Address::new(0x40_0002)));
        assert_eq!(resolver.resolve("ret"), Some(Address::new(0x40_0005)));
    }

    #[test]
    fn unknown_or_unmatched_names_resolve_to_none() {
        let image = CodeImage::new(BASE, vec![0x90; 16]);
        let resolver = SignatureResolver::from_config(image, &set(&[("on_tick", "55 8B EC", 0)])).unwrap();
        assert_eq!(resolver.resolve("on_tick"), None);
        assert_eq!(resolver.resolve("on_frame"), None);
        // Memoised miss is stable.
        assert_eq!(resolver.resolve("on_tick"), None);
    }

    #[test]
    fn insert_invalidates_memoised_miss() {
        let image = CodeImage::new(BASE, vec![0x90, 0x55, 0x8B, 0xEC]);
        let mut resolver = SignatureResolver::new(image, "test-1");
        assert!(resolver.is_empty());
        assert_eq!(resolver.resolve("on_tick"), None);

        resolver.insert(
            "on_tick",
            Signature {
                pattern: "55 8B EC".parse().unwrap(),
                offset: 0,
            },
        );
        assert_eq!(resolver.resolve("on_tick"), Some(Address::new(0x40_0001)));
    }

    #[test]
    fn bad_config_pattern_names_the_entry() {
        let image = CodeImage::new(BASE, Vec::new());
        let err = SignatureResolver::from_config(image, &set(&[("on_tick", "55 XY", 0)])).unwrap_err();
        assert!(matches!(err, SignatureError::Pattern { ref name, .. } if name == "on_tick"));
        assert!(err.to_string().contains("on_tick"));
    }

    #[test]
    fn resolver_follows_jumps_in_its_image() {
        let image = CodeImage::new(BASE, vec![JMP_REL32, 0x03, 0x00, 0x00, 0x00, 0x90, 0x90, 0x90, 0x55]);
        let resolver = SignatureResolver::new(image, "test-1");
        assert_eq!(resolver.follow_jump(BASE), Address::new(0x40_0008));
    }

    #[test]
    fn default_follow_jump_is_identity() {
        struct Fixed;
        impl AddressResolver for Fixed {
            fn resolve(&self, _name: &str) -> Option<Address> {
                Some(BASE)
            }
        }
        assert_eq!(Fixed.follow_jump(BASE), BASE);
    }
}

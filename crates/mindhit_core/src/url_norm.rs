//! crates/mindhit_core/src/url_norm.rs
//!
//! Canonicalisation and hashing of web addresses. Two addresses that normalise to
//! the same string are the same `Url` row.

use sha2::{Digest, Sha256};

/// Produces the canonical form of `raw`.
///
/// The scheme and host are lowercased, the fragment is dropped, an empty path
/// becomes `/`, and one trailing slash is removed from any other path. Path case
/// and the query string are preserved. Input that does not parse as an absolute
/// URL is returned unchanged.
pub fn normalize(raw: &str) -> String {
    let mut parsed = match url::Url::parse(raw) {
        Ok(u) => u,
        Err(_) => return raw.to_string(),
    };

    parsed.set_fragment(None);

    if let Some(host) = parsed.host_str() {
        let lowered = host.to_lowercase();
        if lowered != host && parsed.set_host(Some(&lowered)).is_err() {
            return raw.to_string();
        }
    }

    if !parsed.cannot_be_a_base() {
        if parsed.path().is_empty() {
            parsed.set_path("/");
        } else if parsed.path() != "/" {
            if let Some(trimmed) = parsed.path().strip_suffix('/').map(str::to_string) {
                parsed.set_path(&trimmed);
            }
        }
    }

    parsed.to_string()
}

/// Lowercase hex SHA-256 of the normalised form.
pub fn hash(raw: &str) -> String {
    hash_normalized(&normalize(raw))
}

/// Hashes a string that is already in normal form.
pub fn hash_normalized(normalized: &str) -> String {
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lowercases_scheme_and_host_only() {
        assert_eq!(
            normalize("HTTPS://Example.COM/Foo/Bar"),
            "https://example.com/Foo/Bar"
        );
    }

    #[test]
    fn drops_fragment_and_trailing_slash() {
        assert_eq!(normalize("https://example.com/foo/#frag"), "https://example.com/foo");
        assert_eq!(normalize("https://example.com/foo"), "https://example.com/foo");
    }

    #[test]
    fn strips_only_one_trailing_slash() {
        assert_eq!(normalize("https://example.com/foo//"), "https://example.com/foo/");
        assert_ne!(hash("https://example.com/foo//"), hash("https://example.com/foo/"));
        assert_eq!(normalize("https://example.com//"), "https://example.com/");
    }

    #[test]
    fn empty_path_becomes_root() {
        assert_eq!(normalize("https://example.com"), "https://example.com/");
        assert_eq!(normalize("https://example.com/"), "https://example.com/");
        assert_eq!(normalize("https://example.com/#top"), "https://example.com/");
    }

    #[test]
    fn keeps_query_string() {
        assert_eq!(
            normalize("https://example.com/search/?q=Rust#r"),
            "https://example.com/search?q=Rust"
        );
    }

    #[test]
    fn unparseable_input_is_returned_verbatim() {
        assert_eq!(normalize("not a url"), "not a url");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn hash_is_hex_sha256_of_normal_form() {
        let h = hash("https://Example.com/foo/#frag");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(h, hash("https://example.com/foo"));
        assert_ne!(h, hash("https://example.com/Foo"));
    }

    fn url_strategy() -> impl Strategy<Value = String> {
        (
            prop::sample::select(vec!["http", "https", "HTTP", "Https"]),
            "[a-zA-Z]{1,10}",
            prop::sample::select(vec!["com", "org", "IO"]),
            prop::collection::vec("[a-zA-Z0-9_-]{1,6}", 0..4),
            prop::option::of("[a-z]{1,3}=[a-z0-9]{0,4}"),
            "/?",
            prop::option::of("[a-z]{0,6}"),
        )
            .prop_map(|(scheme, host, tld, segments, query, slashes, fragment)| {
                let mut s = format!("{}://{}.{}", scheme, host, tld);
                if !segments.is_empty() {
                    s.push('/');
                    s.push_str(&segments.join("/"));
                }
                s.push_str(&slashes);
                if let Some(q) = query {
                    s.push('?');
                    s.push_str(&q);
                }
                if let Some(f) = fragment {
                    s.push('#');
                    s.push_str(&f);
                }
                s
            })
    }

    proptest! {
        #[test]
        fn normalisation_is_idempotent(raw in url_strategy()) {
            let once = normalize(&raw);
            prop_assert_eq!(normalize(&once), once.clone());
            prop_assert_eq!(hash(&raw), hash(&once));
        }

        #[test]
        fn each_pass_drops_one_extra_slash(raw in url_strategy(), extra in 1usize..4) {
            let base = normalize(&raw);
            prop_assume!(!base.contains('?'));
            let padded = format!("{}{}", base, "/".repeat(extra));
            let once = normalize(&padded);
            prop_assert_eq!(once.len(), padded.len() - 1);
        }

        #[test]
        fn fragments_never_change_identity(raw in url_strategy(), frag in "[a-z0-9]{1,8}") {
            let base = normalize(&raw);
            let with_fragment = format!("{}#{}", base, frag);
            prop_assert_eq!(hash(&with_fragment), hash(&base));
        }
    }
}

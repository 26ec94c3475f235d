//! Image identifier parsing and filesystem canonicalization (§3).

/// A parsed `[registry/]name[:tag][@digest]` image reference, plus the two
/// derived fields ([`CanonicalImage::engine`], [`CanonicalImage::tag`]) that
/// StateFS uses to build its on-disk layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImage {
    /// The last `/`-segment of the name, sanitized to `[A-Za-z0-9._-]`.
    pub engine: String,
    /// The digest if present, else the tag, sanitized the same way.
    pub tag: String,
}

impl CanonicalImage {
    /// Parses a free-form image string per §3's canonicalization rule.
    pub fn parse(image_id: &str) -> Self {
        let (name_and_tag, digest) = match image_id.split_once('@') {
            Some((left, digest)) => (left, Some(digest)),
            None => (image_id, None),
        };

        // A ':' after the last '/' separates the tag; a ':' that is part of
        // a registry host:port (before the last '/') is not a tag separator.
        let last_slash = name_and_tag.rfind('/');
        let tag_split = match last_slash {
            Some(slash_pos) => name_and_tag[slash_pos..]
                .find(':')
                .map(|rel| slash_pos + rel),
            None => name_and_tag.find(':'),
        };

        let (name, tag) = match tag_split {
            Some(pos) => (&name_and_tag[..pos], Some(&name_and_tag[pos + 1..])),
            None => (name_and_tag, None),
        };

        let engine = name.rsplit('/').next().unwrap_or("");
        let version = digest.or(tag).unwrap_or("");

        CanonicalImage {
            engine: sanitize(engine, "unknown"),
            tag: sanitize(version, "latest"),
        }
    }
}

fn sanitize(raw: &str, default_if_empty: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        default_if_empty.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_name_and_tag() {
        let c = CanonicalImage::parse("postgres:15");
        assert_eq!(c.engine, "postgres");
        assert_eq!(c.tag, "15");
    }

    #[test]
    fn registry_with_port_and_tag() {
        let c = CanonicalImage::parse("registry.local:5000/team/postgres:15.2");
        assert_eq!(c.engine, "postgres");
        assert_eq!(c.tag, "15.2");
    }

    #[test]
    fn digest_wins_over_tag() {
        let c = CanonicalImage::parse("postgres:15@sha256:abcd1234");
        assert_eq!(c.engine, "postgres");
        assert_eq!(c.tag, "sha256_abcd1234");
    }

    #[test]
    fn missing_tag_defaults_to_latest() {
        let c = CanonicalImage::parse("postgres");
        assert_eq!(c.engine, "postgres");
        assert_eq!(c.tag, "latest");
    }

    #[test]
    fn empty_name_defaults_to_unknown() {
        let c = CanonicalImage::parse(":15");
        assert_eq!(c.engine, "unknown");
        assert_eq!(c.tag, "15");
    }

    #[test]
    fn disallowed_characters_become_underscores() {
        let c = CanonicalImage::parse("my image!:v1 beta");
        assert_eq!(c.engine, "my_image_");
        assert_eq!(c.tag, "v1_beta");
    }
}

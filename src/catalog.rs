//! Source catalog: config entries resolved into per-source descriptors.
//!
//! A [`SourceDescriptor`] is pure data, immutable for the duration of one
//! run: a stable id, the fetch settings, the output filename, and the
//! fully merged transform parameters. Resolution happens once per pass so
//! workers never consult the raw config.
//!
//! ## Stable Ids
//!
//! The id keys the hash ledger and the archive layout, so it must survive
//! restarts and config reordering. It is either the explicit `id` field or
//! a slug of the URL's file basename (`https://x.com/img/Hero%20Shot.png`
//! → `hero-20shot`); when the basename yields nothing usable, a short
//! digest of the URL steps in.

use crate::config::{ConfigError, SyncConfig};
use crate::transform::TransformParams;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// One resolved source, owned by the catalog for the duration of a run.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub id: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Remote and output filename, extension included.
    pub output_name: String,
    pub params: TransformParams,
}

/// Resolve every configured source into a descriptor, rejecting duplicate
/// ids (two workers for the same id in one pass would race on the ledger).
pub fn resolve(config: &SyncConfig) -> Result<Vec<SourceDescriptor>, ConfigError> {
    let mut seen = BTreeMap::new();
    let mut catalog = Vec::with_capacity(config.sources.len());

    for source in &config.sources {
        let url = source.url.trim().to_string();
        let id = match &source.id {
            Some(explicit) => slugify(explicit),
            None => derive_id(&url),
        };
        if let Some(other) = seen.insert(id.clone(), url.clone()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source id '{}' (from {} and {})",
                id, other, url
            )));
        }

        let params = source.transform.merge_onto(&config.transform);
        let output_name = match &source.name {
            Some(name) => name.clone(),
            None => format!("{}.{}", url_basename_stem(&url), params.format.extension()),
        };

        catalog.push(SourceDescriptor {
            id,
            url,
            headers: source.headers.clone(),
            timeout: Duration::from_secs(
                source.timeout_secs.unwrap_or(config.fetch.timeout_secs),
            ),
            output_name,
            params,
        });
    }

    Ok(catalog)
}

/// Derive a stable id from a URL: slug of the path basename's stem, with a
/// URL-digest fallback for pathless URLs.
pub fn derive_id(url: &str) -> String {
    let slug = slugify(url_basename_stem(url));
    if slug.is_empty() {
        let digest = Sha256::digest(url.as_bytes());
        format!("src-{:x}", digest)[..16].to_string()
    } else {
        slug
    }
}

/// File basename of a URL's path, without query, fragment, or extension.
fn url_basename_stem(url: &str) -> &str {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(without_scheme);
    let basename = path.rsplit('/').next().unwrap_or(path);
    basename.rsplit_once('.').map_or(basename, |(stem, _)| stem)
}

/// Lowercase, map runs of non-alphanumerics to single dashes, trim dashes.
fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = true;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::transform::OutputFormat;

    fn config_with_urls(urls: &[&str]) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.sources = urls
            .iter()
            .map(|url| SourceConfig {
                url: url.to_string(),
                ..SourceConfig::default()
            })
            .collect();
        config
    }

    #[test]
    fn derive_id_from_basename() {
        assert_eq!(derive_id("https://example.com/img/banner.png"), "banner");
        assert_eq!(
            derive_id("https://example.com/Hero_Shot 2.jpeg?v=3"),
            "hero-shot-2"
        );
    }

    #[test]
    fn derive_id_ignores_query_and_fragment() {
        assert_eq!(
            derive_id("https://cdn.example.com/a/b/photo.jpg?token=x#frag"),
            "photo"
        );
    }

    #[test]
    fn derive_id_falls_back_to_digest() {
        let id = derive_id("https://example.com/");
        assert!(id.starts_with("src-"));
        assert_eq!(id.len(), 16);
        // stable across calls
        assert_eq!(id, derive_id("https://example.com/"));
    }

    #[test]
    fn resolve_merges_transform_overrides() {
        let mut config = config_with_urls(&["https://example.com/a.png"]);
        config.transform.quality = 70;
        config.sources[0].transform.quality = Some(95);
        config.sources[0].transform.format = Some(OutputFormat::Jpeg);

        let catalog = resolve(&config).unwrap();
        assert_eq!(catalog[0].params.quality, 95);
        assert_eq!(catalog[0].params.format, OutputFormat::Jpeg);
        // default output name follows merged format
        assert_eq!(catalog[0].output_name, "a.jpg");
    }

    #[test]
    fn resolve_uses_explicit_name_and_id() {
        let mut config = config_with_urls(&["https://example.com/a.png"]);
        config.sources[0].id = Some("Front Page Hero".to_string());
        config.sources[0].name = Some("hero.webp".to_string());

        let catalog = resolve(&config).unwrap();
        assert_eq!(catalog[0].id, "front-page-hero");
        assert_eq!(catalog[0].output_name, "hero.webp");
    }

    #[test]
    fn resolve_rejects_duplicate_ids() {
        let config = config_with_urls(&[
            "https://a.example.com/banner.png",
            "https://b.example.com/banner.jpg",
        ]);
        let result = resolve(&config);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn resolve_applies_timeout_override() {
        let mut config = config_with_urls(&["https://example.com/a.png"]);
        config.fetch.timeout_secs = 30;
        config.sources[0].timeout_secs = Some(5);

        let catalog = resolve(&config).unwrap();
        assert_eq!(catalog[0].timeout, Duration::from_secs(5));
    }
}

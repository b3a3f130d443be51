//! URI template resolution.
//!
//! A template has exactly one `{param}` placeholder, so its shape is a fixed
//! prefix and suffix around one variable segment. The resolver refuses, at
//! registration time, any entry that could make a concrete URI match twice.

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use tracing::debug;

use crate::error::{Error, Result};

/// Canonical form of a template parameter.
///
/// Percent-decodes, lower-cases, trims, collapses every run of
/// non-alphanumeric characters into one `_` and strips `_` from both ends.
/// Idempotent.
pub fn normalize_identifier(raw: &str) -> String {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    let lowered = decoded.trim().to_lowercase();

    let mut out = String::with_capacity(lowered.len());
    let mut pending_separator = false;
    for c in lowered.chars() {
        if c.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(c);
        } else {
            pending_separator = true;
        }
    }
    out
}

/// A parsed single-placeholder URI template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    raw: String,
    prefix: String,
    param: String,
    suffix: String,
}

impl UriTemplate {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |why: &str| Error::InvalidTemplate(format!("{}: {}", raw, why));

        let open = raw.find('{').ok_or_else(|| invalid("no placeholder"))?;
        let close = raw[open..]
            .find('}')
            .map(|i| open + i)
            .ok_or_else(|| invalid("unterminated placeholder"))?;

        let prefix = &raw[..open];
        let param = &raw[open + 1..close];
        let suffix = &raw[close + 1..];

        if prefix.is_empty() {
            return Err(invalid("placeholder must follow a fixed prefix"));
        }
        if param.is_empty() || !param.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("placeholder name must be a non-empty identifier"));
        }
        if prefix.contains(['{', '}']) || suffix.contains(['{', '}']) {
            return Err(invalid("exactly one placeholder is allowed"));
        }

        Ok(Self {
            raw: raw.to_string(),
            prefix: prefix.to_string(),
            param: param.to_string(),
            suffix: suffix.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn param_name(&self) -> &str {
        &self.param
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Extract the raw placeholder value if `uri` has this template's shape.
    pub fn match_uri<'a>(&self, uri: &'a str) -> Option<&'a str> {
        if uri.len() <= self.prefix.len() + self.suffix.len() {
            return None;
        }
        if !uri.starts_with(&self.prefix) || !uri.ends_with(&self.suffix) {
            return None;
        }
        Some(&uri[self.prefix.len()..uri.len() - self.suffix.len()])
    }

    /// Whether some concrete URI could match both templates.
    pub fn overlaps(&self, other: &UriTemplate) -> bool {
        let prefixes = self.prefix.starts_with(&other.prefix) || other.prefix.starts_with(&self.prefix);
        let suffixes = self.suffix.ends_with(&other.suffix) || other.suffix.ends_with(&self.suffix);
        prefixes && suffixes
    }
}

impl std::fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Explicit exceptions to the generic identifier-to-key mapping, keyed by normalized form.
#[derive(Debug, Clone, Default)]
pub struct NamingOverrides {
    entries: BTreeMap<String, String>,
}

impl NamingOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map identifiers normalizing to `identifier` onto `storage_id` instead.
    pub fn with(mut self, identifier: &str, storage_id: impl Into<String>) -> Self {
        self.entries
            .insert(normalize_identifier(identifier), storage_id.into());
        self
    }

    pub fn get(&self, normalized: &str) -> Option<&str> {
        self.entries.get(normalized).map(String::as_str)
    }

    /// Storage id for a normalized identifier.
    pub fn apply<'a>(&'a self, normalized: &'a str) -> &'a str {
        self.get(normalized).unwrap_or(normalized)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a storage id becomes a backend key: `<prefix><id><suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFormat {
    pub prefix: String,
    pub suffix: String,
}

impl KeyFormat {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn key_for(&self, id: &str) -> String {
        format!("{}{}{}", self.prefix, id, self.suffix)
    }
}

/// A template together with its backing-key mapping.
#[derive(Debug, Clone)]
pub struct TemplateRoute {
    pub template: UriTemplate,
    pub key_format: KeyFormat,
    pub overrides: NamingOverrides,
}

impl TemplateRoute {
    pub fn new(template: &str, key_format: KeyFormat) -> Result<Self> {
        Ok(Self {
            template: UriTemplate::parse(template)?,
            key_format,
            overrides: NamingOverrides::new(),
        })
    }

    pub fn with_overrides(mut self, overrides: NamingOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Where a concrete URI points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Static {
        uri: String,
        key: String,
    },
    Template {
        template: String,
        identifier: String,
        key: String,
    },
}

impl Resolution {
    /// Backend key of the resolved entity.
    pub fn key(&self) -> &str {
        match self {
            Self::Static { key, .. } | Self::Template { key, .. } => key,
        }
    }
}

/// Resolves concrete URIs against static URIs and templates.
#[derive(Debug, Clone, Default)]
pub struct UriResolver {
    statics: BTreeMap<String, String>,
    templates: Vec<TemplateRoute>,
}

impl UriResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a static URI backed by `key`.
    pub fn add_static(&mut self, uri: &str, key: impl Into<String>) -> Result<()> {
        if self.statics.contains_key(uri) {
            return Err(Error::AmbiguousTemplate(format!(
                "static resource {} registered twice",
                uri
            )));
        }
        if let Some(route) = self.templates.iter().find(|r| r.template.match_uri(uri).is_some()) {
            return Err(Error::AmbiguousTemplate(format!(
                "static resource {} is also matched by template {}",
                uri, route.template
            )));
        }
        self.statics.insert(uri.to_string(), key.into());
        Ok(())
    }

    /// Register a template. Rejected if any URI could match it and an existing entry.
    pub fn add_template(&mut self, route: TemplateRoute) -> Result<()> {
        if let Some(existing) = self
            .templates
            .iter()
            .find(|r| r.template.overlaps(&route.template))
        {
            return Err(Error::AmbiguousTemplate(format!(
                "template {} overlaps template {}",
                route.template, existing.template
            )));
        }
        if let Some(uri) = self
            .statics
            .keys()
            .find(|uri| *uri == route.template.as_str() || route.template.match_uri(uri).is_some())
        {
            return Err(Error::AmbiguousTemplate(format!(
                "template {} matches static resource {}",
                route.template, uri
            )));
        }
        self.templates.push(route);
        Ok(())
    }

    pub fn templates(&self) -> impl Iterator<Item = &TemplateRoute> {
        self.templates.iter()
    }

    pub fn static_key(&self, uri: &str) -> Option<&str> {
        self.statics.get(uri).map(String::as_str)
    }

    /// Resolve a concrete URI. `None` covers both "no shape matched" and
    /// "parameter normalized to nothing".
    pub fn resolve(&self, uri: &str) -> Option<Resolution> {
        if let Some(key) = self.statics.get(uri) {
            return Some(Resolution::Static {
                uri: uri.to_string(),
                key: key.clone(),
            });
        }

        let (route, raw) = self
            .templates
            .iter()
            .find_map(|r| r.template.match_uri(uri).map(|raw| (r, raw)))?;

        let identifier = normalize_identifier(raw);
        if identifier.is_empty() {
            debug!("Parameter {:?} of {} normalizes to nothing", raw, uri);
            return None;
        }

        let storage_id = route.overrides.apply(&identifier);
        if storage_id != identifier {
            debug!("Naming override {} -> {}", identifier, storage_id);
        }
        let key = route.key_format.key_for(storage_id);

        debug!("Resolved {} via {} to {}", uri, route.template, key);
        Some(Resolution::Template {
            template: route.template.as_str().to_string(),
            identifier,
            key,
        })
    }
}

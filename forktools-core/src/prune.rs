//! Drop third-party repository declarations that no active extension needs.

use crate::config::DepsConfig;
use crate::error::{Error, Result};
use crate::manifest::{self, Value};
use std::collections::HashSet;
use tracing::{debug, info};

/// Extension names compiled into this build.
#[derive(Debug, Clone, Default)]
pub struct Whitelists {
    build: HashSet<String>,
    contrib: HashSet<String>,
}

impl Whitelists {
    pub fn new<B, C>(build: B, contrib: C) -> Self
    where
        B: IntoIterator,
        B::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            build: build.into_iter().map(Into::into).collect(),
            contrib: contrib.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_active(&self, extension: &str) -> bool {
        self.build.contains(extension) || self.contrib.contains(extension)
    }
}

fn build_or_test_only(record: &Value) -> bool {
    match record.get("use_category") {
        Some(Value::List(items)) => {
            items.iter().any(|c| c.as_str() == Some("test_only"))
                || (items.len() == 1 && items[0].as_str() == Some("build"))
        }
        Some(Value::Str(category)) => category.contains("test_only"),
        _ => false,
    }
}

pub fn is_retained(record: &Value, whitelists: &Whitelists) -> bool {
    if build_or_test_only(record) {
        return false;
    }

    match record.get("extensions") {
        None => true,
        Some(extensions) => {
            let names = extensions.names();
            names.is_empty() || names.iter().any(|ext| whitelists.is_active(ext))
        }
    }
}

pub fn prune(spec: &Value, whitelists: &Whitelists) -> Result<Vec<(String, Value)>> {
    let entries = spec
        .as_dict()
        .ok_or_else(|| Error::UnsupportedValue("repository locations spec".to_string()))?;

    Ok(entries
        .iter()
        .filter(|(name, record)| {
            let keep = is_retained(record, whitelists);
            if !keep {
                debug!("Dropping {}", name);
            }
            keep
        })
        .cloned()
        .collect())
}

fn format_version(template: &str, version: &str) -> String {
    template
        .replace("{version}", version)
        .replace("{dash_version}", &version.replace('.', "-"))
        .replace("{underscore_version}", &version.replace('.', "_"))
}

/// Substitute each record's `version` into its `urls` and `strip_prefix`.
pub fn apply_version_templates(spec: &mut Value) {
    let Value::Dict(entries) = spec else {
        return;
    };

    for (_, record) in entries.iter_mut() {
        let Some(version) = record.get("version").and_then(Value::as_str).map(str::to_string)
        else {
            continue;
        };

        if let Some(Value::Str(prefix)) = record.get_mut("strip_prefix") {
            *prefix = format_version(prefix, &version);
        }
        if let Some(Value::List(urls)) = record.get_mut("urls") {
            for url in urls.iter_mut() {
                if let Value::Str(u) = url {
                    *u = format_version(u, &version);
                }
            }
        }
    }
}

fn quote(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\t', "\\t");
    format!("\"{}\"", escaped)
}

fn render_value(value: &Value, at: &str) -> Result<String> {
    match value {
        Value::Str(s) => Ok(quote(s)),
        Value::Raw(raw) => Ok(raw.clone()),
        Value::List(items) => {
            let rendered = items
                .iter()
                .map(|item| match item {
                    Value::List(_) | Value::Dict(_) => Err(Error::UnsupportedValue(at.to_string())),
                    scalar => render_value(scalar, at),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("[{}]", rendered.join(",")))
        }
        Value::Dict(_) => Err(Error::UnsupportedValue(at.to_string())),
    }
}

pub fn render(
    constants: &[(String, String)],
    spec_variable: &str,
    retained: &[(String, Value)],
) -> Result<String> {
    let mut out = String::new();

    for (name, value) in constants {
        out.push_str(&format!("{} = {}\n", name, quote(value)));
    }
    if !constants.is_empty() {
        out.push('\n');
    }

    out.push_str(&format!("{} = dict(\n", spec_variable));
    for (name, record) in retained {
        out.push_str(&format!("    {} = dict(\n", name));
        let fields = record
            .as_dict()
            .ok_or_else(|| Error::UnsupportedValue(name.clone()))?;
        for (key, value) in fields {
            let at = format!("{}.{}", name, key);
            out.push_str(&format!("        {} = {},\n", key, render_value(value, &at)?));
        }
        out.push_str("    ),\n");
    }
    out.push_str(")\n");

    Ok(out)
}

#[derive(Debug, Clone)]
pub struct PruneOutcome {
    pub original: usize,
    pub retained: usize,
    pub content: String,
}

/// Prune the repository locations in `locations` against the extension
/// configs and render the trimmed manifest.
pub fn prune_manifest(
    locations: &str,
    build_config: &str,
    contrib_config: &str,
    config: &DepsConfig,
) -> Result<PruneOutcome> {
    let locations = manifest::parse(locations)?;
    let build = manifest::parse(build_config)?;
    let contrib = manifest::parse(contrib_config)?;

    let whitelists = Whitelists::new(
        build.require(&config.build_extensions_variable)?.names(),
        contrib.require(&config.contrib_extensions_variable)?.names(),
    );

    let mut spec = locations.require(&config.spec_variable)?.clone();
    apply_version_templates(&mut spec);

    let original = spec.as_dict().map(<[_]>::len).unwrap_or(0);
    info!("Original Size: {}", original);

    let retained = prune(&spec, &whitelists)?;
    info!("End Size: {}", retained.len());

    let constants = config
        .preserved_constants
        .iter()
        .map(|name| {
            let value = locations
                .require(name)?
                .as_str()
                .ok_or_else(|| Error::UnsupportedValue(name.clone()))?;
            Ok((name.clone(), value.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PruneOutcome {
        original,
        retained: retained.len(),
        content: render(&constants, &config.spec_variable, &retained)?,
    })
}

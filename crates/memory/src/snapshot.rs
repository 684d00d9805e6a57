//! Multi-document YAML state files.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value as Json;

use kspec_core::Resource;

use crate::MemoryBackend;

fn max_yaml_bytes() -> usize {
    std::env::var("KSPEC_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(8_000_000)
}

fn max_yaml_nodes() -> usize {
    std::env::var("KSPEC_MAX_YAML_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000)
}

fn node_count_exceeds(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur > max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => map.values().for_each(|vv| walk(vv, cur, max)),
            Json::Array(arr) => arr.iter().for_each(|vv| walk(vv, cur, max)),
            _ => {}
        }
    }
    let mut n = 0usize;
    walk(v, &mut n, max);
    n > max
}

/// Parse every non-empty document of `yaml` into a resource.
pub fn parse_documents(yaml: &str) -> Result<Vec<Resource>> {
    if yaml.len() > max_yaml_bytes() {
        return Err(anyhow!("YAML payload too large (>{} bytes)", max_yaml_bytes()));
    }
    let mut out = Vec::new();
    for (idx, doc) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let val = serde_yaml::Value::deserialize(doc).with_context(|| format!("parsing YAML document #{}", idx + 1))?;
        if val.is_null() { continue; }
        let json = serde_json::to_value(val).with_context(|| format!("converting YAML document #{} to JSON", idx + 1))?;
        if node_count_exceeds(&json, max_yaml_nodes()) {
            return Err(anyhow!("YAML document #{} too complex (>{} nodes)", idx + 1, max_yaml_nodes()));
        }
        for field in ["apiVersion", "kind"] {
            if json.get(field).and_then(|v| v.as_str()).is_none() {
                return Err(anyhow!("YAML document #{} missing {}", idx + 1, field));
            }
        }
        let resource: Resource = serde_json::from_value(json).with_context(|| format!("decoding YAML document #{}", idx + 1))?;
        out.push(resource);
    }
    Ok(out)
}

pub fn render_documents(resources: &[Resource]) -> Result<String> {
    let mut out = String::new();
    for r in resources.iter() {
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(r).context("rendering YAML")?);
    }
    Ok(out)
}

pub fn load_file(path: &Path) -> Result<Vec<Resource>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_documents(&raw).with_context(|| format!("loading {}", path.display()))
}

impl MemoryBackend {
    /// Backend seeded from a state file. A missing file is an empty backend.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() { return Ok(Self::new()); }
        Ok(Self::with_resources(load_file(path)?))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let body = render_documents(&self.current().all())?;
        std::fs::write(path, body).with_context(|| format!("writing {}", path.display()))
    }
}

//! Best-effort `$ref` dereferencing.
//!
//! Only document-internal JSON pointers (`#/...`) are inlined. A reference
//! that points back into its own expansion stays a `$ref` object. Any other
//! reference fails the whole pass so the caller can keep the original.

use std::collections::HashMap;

use serde_json::{Map, Value};

use webmark_shared::{Result, WebmarkError};

/// Inlining stops (leaving `$ref`) below this many nested expansions.
const MAX_DEPTH: usize = 32;

/// Largest number of JSON nodes the inlined document may hold.
pub const MAX_NODES: usize = 200_000;

/// Return a copy of `spec` with internal references inlined.
///
/// Each pointer is resolved once and reused. Fails when the inlined copy
/// would grow past [`MAX_NODES`].
pub fn dereference(spec: &Value) -> Result<Value> {
    Resolver {
        root: spec,
        cache: HashMap::new(),
        stack: Vec::new(),
        emitted: 0,
    }
    .resolve(spec)
}

struct Resolver<'a> {
    root: &'a Value,
    /// Resolved pointer targets and their node counts.
    cache: HashMap<String, (Value, usize)>,
    stack: Vec<String>,
    emitted: usize,
}

impl Resolver<'_> {
    fn resolve(&mut self, node: &Value) -> Result<Value> {
        self.charge(1)?;
        match node {
            Value::Object(map) => {
                if let Some(Value::String(pointer)) = map.get("$ref") {
                    return self.resolve_ref(node, pointer);
                }
                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.resolve(value)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn resolve_ref(&mut self, node: &Value, pointer: &str) -> Result<Value> {
        let Some(path) = pointer.strip_prefix('#') else {
            return Err(WebmarkError::parse(format!(
                "external reference not supported: {pointer}"
            )));
        };

        if let Some(size) = self.cache.get(pointer).map(|(_, size)| *size) {
            // The `$ref` object itself was already charged.
            self.charge(size.saturating_sub(1))?;
            if let Some((value, _)) = self.cache.get(pointer) {
                return Ok(value.clone());
            }
        }

        if self.stack.iter().any(|p| p == pointer) || self.stack.len() >= MAX_DEPTH {
            return Ok(node.clone());
        }

        let root = self.root;
        let target = root
            .pointer(path)
            .ok_or_else(|| WebmarkError::parse(format!("unresolved reference: {pointer}")))?;

        let before = self.emitted;
        self.stack.push(pointer.to_string());
        let resolved = self.resolve(target);
        self.stack.pop();
        let resolved = resolved?;

        // One node for the replaced `$ref` object plus the expansion.
        let size = self.emitted - before + 1;
        self.cache
            .insert(pointer.to_string(), (resolved.clone(), size));
        Ok(resolved)
    }

    fn charge(&mut self, nodes: usize) -> Result<()> {
        self.emitted += nodes;
        if self.emitted > MAX_NODES {
            return Err(WebmarkError::parse(format!(
                "reference expansion exceeds {MAX_NODES} nodes"
            )));
        }
        Ok(())
    }
}

use serde_json::{Map, Value};

use dagcore::NodeError;

use crate::store::OutputStore;

/// One step of a reference path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
    Wildcard,
}

/// Parsed `$id(.ident|[n]|[*])*` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub root: String,
    pub segments: Vec<Segment>,
}

impl Reference {
    /// Parse a reference. Returns `None` unless the *entire* string
    /// matches the grammar starting at position 0; anything else is a
    /// literal, including strings that merely contain `$`.
    pub fn parse(raw: &str) -> Option<Reference> {
        let rest = raw.strip_prefix('$')?;
        let bytes = rest.as_bytes();
        let mut pos = ident_len(bytes)?;
        let root = rest[..pos].to_string();
        let mut segments = Vec::new();

        while pos < bytes.len() {
            match bytes[pos] {
                b'.' => {
                    pos += 1;
                    let len = ident_len(&bytes[pos..])?;
                    segments.push(Segment::Field(rest[pos..pos + len].to_string()));
                    pos += len;
                }
                b'[' => {
                    pos += 1;
                    if bytes.get(pos) == Some(&b'*') {
                        segments.push(Segment::Wildcard);
                        pos += 1;
                    } else {
                        let start = pos;
                        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                            pos += 1;
                        }
                        if pos == start {
                            return None;
                        }
                        let index: usize = rest[start..pos].parse().ok()?;
                        segments.push(Segment::Index(index));
                    }
                    if bytes.get(pos) != Some(&b']') {
                        return None;
                    }
                    pos += 1;
                }
                _ => return None,
            }
        }

        Some(Reference { root, segments })
    }
}

fn ident_len(bytes: &[u8]) -> Option<usize> {
    let first = *bytes.first()?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let mut len = 1;
    while len < bytes.len() && (bytes[len].is_ascii_alphanumeric() || bytes[len] == b'_') {
        len += 1;
    }
    Some(len)
}

/// Whether a parameter value is a reference expression.
pub fn is_reference(value: &str) -> bool {
    Reference::parse(value).is_some()
}

/// Collect every reference appearing in a parameter value, recursing into
/// nested mappings and sequences. Used by the validator for soundness
/// checks and implicit edge inference.
pub fn collect_references(value: &Value, out: &mut Vec<Reference>) {
    match value {
        Value::String(s) => {
            if let Some(reference) = Reference::parse(s) {
                out.push(reference);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_references(item, out);
            }
        }
        _ => {}
    }
}

/// Evaluates reference expressions against an output store. Resolution is
/// eager and pure: values are deep-copied into the parameter frame.
pub struct Resolver<'a> {
    store: &'a OutputStore,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a OutputStore) -> Self {
        Self { store }
    }

    /// Resolve a whole parameter mapping. Literals pass through unchanged;
    /// references nested inside mappings and sequences are resolved
    /// recursively.
    pub fn resolve_params(&self, params: &Map<String, Value>) -> Result<Map<String, Value>, NodeError> {
        let mut resolved = Map::with_capacity(params.len());
        for (name, value) in params {
            resolved.insert(name.clone(), self.resolve_value(value)?);
        }
        Ok(resolved)
    }

    /// Spec-aware variant: params declared `raw` (nested workflow
    /// documents) are deep-copied without resolution, their references
    /// belong to the child run.
    pub fn resolve_node_params(
        &self,
        spec: &dagcore::NodeSpec,
        params: &Map<String, Value>,
    ) -> Result<Map<String, Value>, NodeError> {
        let mut resolved = Map::with_capacity(params.len());
        for (name, value) in params {
            let keep_raw = spec.params.get(name).map_or(false, |p| p.raw);
            let value = if keep_raw {
                value.clone()
            } else {
                self.resolve_value(value)?
            };
            resolved.insert(name.clone(), value);
        }
        Ok(resolved)
    }

    pub fn resolve_value(&self, value: &Value) -> Result<Value, NodeError> {
        match value {
            Value::String(s) => match Reference::parse(s) {
                Some(reference) => self.resolve_reference(&reference),
                None => Ok(value.clone()),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (key, item) in map {
                    resolved.insert(key.clone(), self.resolve_value(item)?);
                }
                Ok(Value::Object(resolved))
            }
            _ => Ok(value.clone()),
        }
    }

    pub fn resolve_reference(&self, reference: &Reference) -> Result<Value, NodeError> {
        let root = self.store.get(&reference.root).ok_or_else(|| {
            NodeError::Resolution(format!("reference to unknown node '{}'", reference.root))
        })?;
        walk(&root, &reference.segments).map_err(|detail| {
            NodeError::Resolution(format!("${}: {detail}", reference.root))
        })
    }
}

fn walk(value: &Value, segments: &[Segment]) -> Result<Value, String> {
    let Some((segment, rest)) = segments.split_first() else {
        return Ok(value.clone());
    };
    match segment {
        Segment::Field(field) => match value {
            Value::Object(map) => {
                let inner = map
                    .get(field)
                    .ok_or_else(|| format!("missing field '{field}'"))?;
                walk(inner, rest)
            }
            other => Err(format!(
                "field access '.{field}' on non-mapping value ({})",
                type_name(other)
            )),
        },
        Segment::Index(index) => match value {
            Value::Array(items) => {
                let inner = items.get(*index).ok_or_else(|| {
                    format!("index {index} out of range (len {})", items.len())
                })?;
                walk(inner, rest)
            }
            other => Err(format!(
                "index [{index}] on non-sequence value ({})",
                type_name(other)
            )),
        },
        // One-level flat-map: project the remaining path over each
        // element, then flatten a single sequence level.
        Segment::Wildcard => match value {
            Value::Array(items) => {
                let mut out = Vec::new();
                for item in items {
                    match walk(item, rest)? {
                        Value::Array(inner) => out.extend(inner),
                        other => out.push(other),
                    }
                }
                Ok(Value::Array(out))
            }
            other => Err(format!(
                "[*] applied to non-sequence value ({})",
                type_name(other)
            )),
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> OutputStore {
        OutputStore::seeded([
            ("a", json!({"result": 30.0, "items": [10, 20, 30]})),
            (
                "search",
                json!({"results": [{"link": "u1", "tags": ["x", "y"]}, {"link": "u2", "tags": ["z"]}]}),
            ),
        ])
    }

    #[test]
    fn parses_full_grammar() {
        let reference = Reference::parse("$search.results[0].tags[*]").unwrap();
        assert_eq!(reference.root, "search");
        assert_eq!(
            reference.segments,
            vec![
                Segment::Field("results".into()),
                Segment::Index(0),
                Segment::Field("tags".into()),
                Segment::Wildcard,
            ]
        );
    }

    #[test]
    fn partial_matches_are_literals() {
        assert!(is_reference("$a"));
        assert!(is_reference("$a.b"));
        assert!(!is_reference("a.b"));
        assert!(!is_reference("$"));
        assert!(!is_reference("$a b"));
        assert!(!is_reference("$a..b"));
        assert!(!is_reference("$a.b extra"));
        assert!(!is_reference("$a["));
        assert!(!is_reference("costs $5.50"));
    }

    #[test]
    fn resolves_whole_output_and_fields() {
        let store = store();
        let resolver = Resolver::new(&store);
        assert_eq!(
            resolver.resolve_value(&json!("$a")).unwrap(),
            json!({"result": 30.0, "items": [10, 20, 30]})
        );
        assert_eq!(resolver.resolve_value(&json!("$a.result")).unwrap(), json!(30.0));
        assert_eq!(resolver.resolve_value(&json!("$a.items[1]")).unwrap(), json!(20));
    }

    #[test]
    fn wildcard_projects_over_sequence() {
        let store = store();
        let resolver = Resolver::new(&store);
        assert_eq!(
            resolver.resolve_value(&json!("$search.results[*].link")).unwrap(),
            json!(["u1", "u2"])
        );
        // Chained wildcards flatten one level per occurrence.
        assert_eq!(
            resolver.resolve_value(&json!("$search.results[*].tags[*]")).unwrap(),
            json!(["x", "y", "z"])
        );
    }

    #[test]
    fn literals_and_nested_values_pass_through() {
        let store = store();
        let resolver = Resolver::new(&store);
        let params = json!({
            "plain": "hello",
            "nested": {"value": "$a.result"},
            "list": ["$a.items[0]", 7]
        });
        let resolved = resolver.resolve_value(&params).unwrap();
        assert_eq!(
            resolved,
            json!({"plain": "hello", "nested": {"value": 30.0}, "list": [10, 7]})
        );
    }

    #[test]
    fn failure_modes_are_resolution_errors() {
        let store = store();
        let resolver = Resolver::new(&store);
        for (expr, needle) in [
            ("$ghost", "unknown node"),
            ("$a.missing", "missing field"),
            ("$a.items[9]", "out of range"),
            ("$a.result[*]", "non-sequence"),
            ("$a.result.deep", "non-mapping"),
        ] {
            let err = resolver.resolve_value(&json!(expr)).unwrap_err();
            match err {
                NodeError::Resolution(msg) => {
                    assert!(msg.contains(needle), "{expr}: {msg}")
                }
                other => panic!("{expr}: unexpected error {other:?}"),
            }
        }
    }

    #[test]
    fn raw_params_pass_through_unresolved() {
        use dagcore::{NodeSpec, ParamKind, ParamSpec};

        let store = store();
        let resolver = Resolver::new(&store);
        let spec = NodeSpec::new("loop_node", "Loop")
            .param("array", ParamSpec::required(ParamKind::Any))
            .param("workflow_json", ParamSpec::required(ParamKind::Mapping).raw());

        let params = json!({
            "array": "$a.items",
            "workflow_json": {"nodes": [{"id": "say", "type": "echo",
                                         "params": {"value": "$loop.item"}}]}
        })
        .as_object()
        .cloned()
        .unwrap();

        let resolved = resolver.resolve_node_params(&spec, &params).unwrap();
        assert_eq!(resolved["array"], json!([10, 20, 30]));
        // The nested document still carries its own references.
        assert_eq!(
            resolved["workflow_json"]["nodes"][0]["params"]["value"],
            json!("$loop.item")
        );
    }

    #[test]
    fn resolution_is_pure() {
        let store = store();
        let resolver = Resolver::new(&store);
        let first = resolver.resolve_value(&json!("$search.results[*].link")).unwrap();
        let second = resolver.resolve_value(&json!("$search.results[*].link")).unwrap();
        assert_eq!(first, second);
    }
}

//! Data synthesizer: given a schema node, produces a structurally valid,
//! pseudo-realistic value. Recursion is bounded so cyclic or adversarial
//! schemas fail with `SchemaTooDeep` instead of blowing the stack.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Number, Value};

use crate::catalog::{Endpoint, SchemaCatalog};
use crate::error::EngineError;
use crate::schema::{NumericBounds, SchemaKind, SchemaNode, StringFormat};
use crate::types::{EndpointId, GeneratedRequest};

/// Synthesis recursion ceiling.
pub const MAX_DEPTH: usize = 32;

const WORDS: &[&str] = &[
    "atlas", "beacon", "cedar", "delta", "ember", "falcon", "harbor", "indigo",
    "juniper", "krypton", "lumen", "meridian", "nimbus", "onyx", "pylon",
    "quartz", "rondo", "summit", "tundra", "vertex",
];

const USERS: &[&str] = &["alice", "bob", "carol", "dave", "erin", "frank", "grace"];

const DOMAINS: &[&str] = &["example.com", "mail.test", "inbox.dev"];

const TLDS: &[&str] = &["com", "net", "io", "dev"];

const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub struct Synthesizer {
    rng: StdRng,
}

impl Synthesizer {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Seeded synthesizer, for deterministic output.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Total over all well-formed schema nodes. Fails with
    /// `UnsupportedSchema` only for a node with no recognized type and no
    /// enum, and with `SchemaTooDeep` past the recursion ceiling.
    pub fn synthesize(&mut self, node: &SchemaNode) -> Result<Value, EngineError> {
        self.synthesize_at(node, 0)
    }

    fn synthesize_at(&mut self, node: &SchemaNode, depth: usize) -> Result<Value, EngineError> {
        if depth >= MAX_DEPTH {
            return Err(EngineError::SchemaTooDeep(MAX_DEPTH));
        }
        match &node.kind {
            SchemaKind::Enum(values) => {
                let pick = self.rng.gen_range(0..values.len());
                Ok(values[pick].clone())
            }
            SchemaKind::String { format, pattern } => {
                Ok(Value::String(self.string_value(*format, pattern.as_deref())))
            }
            SchemaKind::Integer(bounds) => {
                Ok(Value::Number(Number::from(self.integer_in(bounds))))
            }
            SchemaKind::Number(bounds) => {
                let value = self.float_in(bounds);
                Ok(Number::from_f64(value)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::Number(Number::from(0))))
            }
            SchemaKind::Boolean => Ok(Value::Bool(self.rng.gen())),
            SchemaKind::Array {
                items,
                min_items,
                max_items,
            } => {
                let lo = min_items.unwrap_or(1);
                let hi = max_items.unwrap_or(5).max(lo);
                let count = self.rng.gen_range(lo..=hi);
                let mut out = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    out.push(self.synthesize_at(items, depth + 1)?);
                }
                Ok(Value::Array(out))
            }
            SchemaKind::Object { properties, .. } => {
                // every declared property is filled, required or not: optional
                // fields in the payload make the generated load more realistic
                let mut map = Map::new();
                for (name, prop) in properties {
                    map.insert(name.clone(), self.synthesize_at(prop, depth + 1)?);
                }
                Ok(Value::Object(map))
            }
            SchemaKind::Unknown(ty) => Err(EngineError::UnsupportedSchema(
                ty.clone().unwrap_or_else(|| "missing type".into()),
            )),
        }
    }

    fn effective_range(bounds: &NumericBounds) -> (f64, f64) {
        let mut min = bounds.minimum.unwrap_or(-1000.0).max(-1000.0);
        let mut max = bounds.maximum.unwrap_or(1000.0).min(1000.0);
        if bounds.exclusive_minimum {
            min += 1.0;
        }
        if bounds.exclusive_maximum {
            max -= 1.0;
        }
        if max < min {
            max = min;
        }
        (min, max)
    }

    fn integer_in(&mut self, bounds: &NumericBounds) -> i64 {
        let (min, max) = Self::effective_range(bounds);
        self.rng.gen_range(min..=max).trunc() as i64
    }

    fn float_in(&mut self, bounds: &NumericBounds) -> f64 {
        let (min, max) = Self::effective_range(bounds);
        let drawn = self.rng.gen_range(min..=max);
        ((drawn * 100.0).round() / 100.0).clamp(min, max)
    }

    fn string_value(&mut self, format: Option<StringFormat>, pattern: Option<&str>) -> String {
        match format {
            Some(StringFormat::Email) => format!(
                "{}{}@{}",
                self.pick(USERS),
                self.rng.gen_range(1..100),
                self.pick(DOMAINS)
            ),
            Some(StringFormat::Date) => self.date(),
            Some(StringFormat::DateTime) => format!(
                "{}T{:02}:{:02}:{:02}Z",
                self.date(),
                self.rng.gen_range(0..24),
                self.rng.gen_range(0..60),
                self.rng.gen_range(0..60),
            ),
            Some(StringFormat::Uuid) => {
                uuid::Builder::from_random_bytes(self.rng.gen()).into_uuid().to_string()
            }
            Some(StringFormat::Uri) => {
                format!("https://{}/{}", self.hostname(), self.pick(WORDS))
            }
            Some(StringFormat::Hostname) => self.hostname(),
            Some(StringFormat::Ipv4) => {
                std::net::Ipv4Addr::from(self.rng.gen::<[u8; 4]>()).to_string()
            }
            Some(StringFormat::Ipv6) => {
                std::net::Ipv6Addr::from(self.rng.gen::<[u8; 16]>()).to_string()
            }
            None if pattern.is_some() => {
                // no regex-directed generation: fixed-length alphanumeric
                // placeholder for patterned strings
                (0..10)
                    .map(|_| ALPHANUMERIC[self.rng.gen_range(0..ALPHANUMERIC.len())] as char)
                    .collect()
            }
            None => self.sentence(),
        }
    }

    fn date(&mut self) -> String {
        format!(
            "{:04}-{:02}-{:02}",
            self.rng.gen_range(2020..2030),
            self.rng.gen_range(1..=12),
            self.rng.gen_range(1..=28),
        )
    }

    fn hostname(&mut self) -> String {
        format!("{}-{}.{}", self.pick(WORDS), self.pick(WORDS), self.pick(TLDS))
    }

    fn sentence(&mut self) -> String {
        let count = self.rng.gen_range(3..=7);
        let mut words: Vec<&str> = (0..count).map(|_| self.pick(WORDS)).collect();
        let mut out = String::new();
        let first = words.remove(0);
        out.push(first.as_bytes()[0].to_ascii_uppercase() as char);
        out.push_str(&first[1..]);
        for word in words {
            out.push(' ');
            out.push_str(word);
        }
        out.push('.');
        out
    }

    fn pick<'a>(&mut self, list: &[&'a str]) -> &'a str {
        list[self.rng.gen_range(0..list.len())]
    }
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-endpoint request cache. One template is synthesized per
/// `(method, path)` and reused for the life of the session, so repeated
/// generation passes over an unchanged catalog are structurally identical.
///
/// The cached template fixes the request *shape*; `instantiate` re-runs the
/// synthesizer over any subtree marked dynamic, giving the scheduler fresh
/// leaf values per issued request where the schema asks for them.
pub struct RequestTemplates {
    synth: Synthesizer,
    cache: HashMap<EndpointId, GeneratedRequest>,
}

impl RequestTemplates {
    pub fn new() -> Self {
        Self {
            synth: Synthesizer::new(),
            cache: HashMap::new(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            synth: Synthesizer::with_seed(seed),
            cache: HashMap::new(),
        }
    }

    /// Cached template for one endpoint, synthesizing it on first use.
    pub fn generate(&mut self, endpoint: &Endpoint) -> Result<GeneratedRequest, EngineError> {
        let id = endpoint.id();
        if let Some(hit) = self.cache.get(&id) {
            return Ok(hit.clone());
        }

        let mut parameter_values = BTreeMap::new();
        for param in &endpoint.parameters {
            parameter_values.insert(param.name.clone(), self.synth.synthesize(&param.schema)?);
        }
        let body = endpoint
            .request_body
            .as_ref()
            .map(|schema| self.synth.synthesize(schema))
            .transpose()?;

        let request = GeneratedRequest {
            endpoint: id.clone(),
            parameter_values,
            body,
        };
        self.cache.insert(id, request.clone());
        Ok(request)
    }

    /// One `GeneratedRequest` per catalog endpoint, in catalog order.
    pub fn generate_all(
        &mut self,
        catalog: &SchemaCatalog,
    ) -> Result<Vec<GeneratedRequest>, EngineError> {
        catalog
            .endpoints()
            .iter()
            .map(|endpoint| self.generate(endpoint))
            .collect()
    }

    /// Cached shape with every dynamic subtree re-synthesized.
    pub fn instantiate(&mut self, endpoint: &Endpoint) -> Result<GeneratedRequest, EngineError> {
        let mut request = self.generate(endpoint)?;
        for param in &endpoint.parameters {
            if let Some(value) = request.parameter_values.get_mut(&param.name) {
                self.refresh(&param.schema, value)?;
            }
        }
        if let (Some(schema), Some(body)) = (&endpoint.request_body, request.body.as_mut()) {
            self.refresh(schema, body)?;
        }
        Ok(request)
    }

    fn refresh(&mut self, schema: &SchemaNode, value: &mut Value) -> Result<(), EngineError> {
        if schema.dynamic {
            *value = self.synth.synthesize(schema)?;
            return Ok(());
        }
        match (&schema.kind, value) {
            (SchemaKind::Object { properties, .. }, Value::Object(map)) => {
                for (name, prop) in properties {
                    if let Some(nested) = map.get_mut(name) {
                        self.refresh(prop, nested)?;
                    }
                }
            }
            (SchemaKind::Array { items, .. }, Value::Array(elements)) => {
                for element in elements {
                    self.refresh(items, element)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Default for RequestTemplates {
    fn default() -> Self {
        Self::new()
    }
}

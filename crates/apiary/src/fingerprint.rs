//! Structural task fingerprints
//!
//! Coalescing identifies duplicate in-flight work by a compact fingerprint of
//! the job name plus a structural rendering of its arguments: object keys are
//! sorted so two argument maps built in different insertion orders produce the
//! same fingerprint. The rendering is hashed with a fixed-seed [`ahash`]
//! hasher so fingerprints are stable across runs, then encoded in base36.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;

/// Maximum recursion depth before a subtree is hashed instead of walked.
const MAX_KEY_DEPTH: usize = 10;

/// Substrings that mark a job name as non-deterministic. Tasks whose names
/// contain one of these are never coalesced: two identical calls are expected
/// to produce different results.
const NON_DETERMINISTIC_MARKERS: &[&str] = &[
    "random", "rand", "uuid", "nanoid", "cuid", "now", "clock", "hrtime",
];

// Fixed seeds keep fingerprints identical across processes, which matters if
// they ever land in logs or persisted diagnostics.
fn stable_hasher() -> ahash::RandomState {
    ahash::RandomState::with_seeds(
        0x9e37_79b9_7f4a_7c15,
        0xf39c_c060_5ced_c834,
        0x1082_276b_f3a2_7251,
        0xb492_b66f_be98_f273,
    )
}

/// Render a JSON value into its canonical structural key.
///
/// Objects render as `{k:v&k:v}` with keys sorted lexicographically, arrays
/// as `[a,b]`. Entries whose value is `null` are skipped so an explicit null
/// and an absent key fingerprint identically. Past [`MAX_KEY_DEPTH`] levels
/// of nesting the remaining subtree is hashed rather than walked, so deep
/// values stay cheap to render without distinct values ever sharing a key.
pub fn structural_key(value: &Value) -> String {
    render(value, 0)
}

fn render(value: &Value, depth: usize) -> String {
    if depth > MAX_KEY_DEPTH {
        return to_base36(stable_hasher().hash_one(value.to_string()));
    }
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(|v| render(v, depth + 1)).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            let parts: Vec<String> = keys
                .into_iter()
                .filter_map(|k| {
                    let rendered = render(&map[k], depth + 1);
                    if rendered.is_empty() {
                        None
                    } else {
                        Some(format!("{k}:{rendered}"))
                    }
                })
                .collect();
            format!("{{{}}}", parts.join("&"))
        }
    }
}

/// Compute the coalescing fingerprint for a job invocation. Covers the job
/// name, each positional argument, and the context map, so two invocations
/// share a fingerprint only when a worker could not tell them apart.
pub fn task_fingerprint(
    job: &str,
    args: &[Value],
    context: &serde_json::Map<String, Value>,
) -> String {
    let mut rendered = String::with_capacity(job.len() + 32);
    rendered.push_str(job);
    for arg in args {
        rendered.push('|');
        rendered.push_str(&render(arg, 0));
    }
    if !context.is_empty() {
        rendered.push(':');
        rendered.push_str(&render(&Value::Object(context.clone()), 0));
    }
    to_base36(stable_hasher().hash_one(rendered.as_str()))
}

/// Process-stable affinity key derived from a closure's type.
///
/// Bulk engines use this so repeated runs of the same closure land on workers
/// that already executed it.
pub(crate) fn type_fingerprint<F: 'static>() -> String {
    to_base36(stable_hasher().hash_one(std::any::TypeId::of::<F>()))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = [0u8; 13];
    let mut i = buf.len();
    while n > 0 {
        i -= 1;
        buf[i] = DIGITS[(n % 36) as usize];
        n /= 36;
    }
    String::from_utf8_lossy(&buf[i..]).into_owned()
}

/// Memoized non-determinism detector over job names.
///
/// Lookups are substring scans against [`NON_DETERMINISTIC_MARKERS`]; results
/// are cached per name. When the cache reaches capacity the older half is
/// evicted wholesale, which is cheaper than LRU bookkeeping on every hit and
/// good enough for a name population this small.
pub(crate) struct DetectorCache {
    results: HashMap<String, bool>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DetectorCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            results: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub(crate) fn is_non_deterministic(&mut self, name: &str) -> bool {
        if let Some(&cached) = self.results.get(name) {
            return cached;
        }

        let lowered = name.to_ascii_lowercase();
        let hit = NON_DETERMINISTIC_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker));

        if self.results.len() >= self.capacity {
            let drop = self.order.len() / 2;
            for _ in 0..drop {
                if let Some(old) = self.order.pop_front() {
                    self.results.remove(&old);
                }
            }
        }
        self.results.insert(name.to_string(), hit);
        self.order.push_back(name.to_string());
        hit
    }
}

use crate::domain::ParserDefinition;
use crate::script::{create_sandbox_engine, ScriptError, ScriptResult, SandboxLimits};
use chrono::{DateTime, Utc};
use lru::LruCache;
use rhai::{Engine, AST};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Name of the entry point every wrapped script defines
pub const TRANSFORM_FN: &str = "transform";

/// A parser revision: any edit bumps `updated_at` and so changes the key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptKey {
    pub parser_id: String,
    pub updated_at: DateTime<Utc>,
}

impl ScriptKey {
    pub fn of(parser: &ParserDefinition) -> Self {
        Self {
            parser_id: parser.id.clone(),
            updated_at: parser.updated_at,
        }
    }
}

/// Compiled, immutable form of a parser's script. Safe to share across threads.
#[derive(Debug)]
pub struct CompiledScript {
    pub key: ScriptKey,
    pub ast: AST,
}

/// Wraps a script body so it runs with exactly two named inputs and
/// its final expression (or `return`) is the result
pub fn wrap_script_body(body: &str) -> String {
    format!(
        "fn {TRANSFORM_FN}(payload, lastParsedPayload) {{\n{body}\n}}\n\
         {TRANSFORM_FN}(payload, lastParsedPayload)"
    )
}

/// Bounded LRU of compiled scripts keyed by parser revision.
///
/// Compilation runs outside the lock. Two concurrent misses on the same key
/// both compile and the later insert wins; both results are equivalent.
/// Failed compilations are never cached.
pub struct ScriptCache {
    engine: Engine,
    entries: Mutex<LruCache<ScriptKey, Arc<CompiledScript>>>,
}

impl ScriptCache {
    /// A capacity of 0 is treated as 1
    pub fn new(capacity: usize, limits: SandboxLimits) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            engine: create_sandbox_engine(&limits),
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the compiled form of `parser.function`, compiling at most once per revision
    pub fn get_compiled(&self, parser: &ParserDefinition) -> ScriptResult<Arc<CompiledScript>> {
        let key = ScriptKey::of(parser);

        if let Some(hit) = self.lock().get(&key) {
            return Ok(Arc::clone(hit));
        }

        debug!(
            parser_id = %parser.id,
            updated_at = %parser.updated_at,
            "Compiling parser script"
        );

        let ast = self
            .engine
            .compile(wrap_script_body(&parser.function))
            .map_err(|e| ScriptError::Compilation(e.to_string()))?;

        let compiled = Arc::new(CompiledScript {
            key: key.clone(),
            ast,
        });
        self.lock().put(key, Arc::clone(&compiled));

        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock cannot leave the LRU half-updated.
    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<ScriptKey, Arc<CompiledScript>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{RhaiSandbox, ScriptSandbox};
    use chrono::Duration;
    use serde_json::json;

    fn parser(function: &str) -> ParserDefinition {
        let now = Utc::now();
        ParserDefinition {
            id: "p-1".to_string(),
            user_id: "u-1".to_string(),
            name: "counter".to_string(),
            description: String::new(),
            function: function.to_string(),
            hidden: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_hit_returns_same_compiled_script() {
        let cache = ScriptCache::new(8, SandboxLimits::default());
        let parser = parser("payload.len()");

        let first = cache.get_compiled(&parser).unwrap();
        let second = cache.get_compiled(&parser).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_new_revision_recompiles() {
        let cache = ScriptCache::new(8, SandboxLimits::default());
        let mut parser = parser("payload.len()");

        let before = cache.get_compiled(&parser).unwrap();
        parser.function = "payload".to_string();
        parser.updated_at = parser.updated_at + Duration::milliseconds(1);
        let after = cache.get_compiled(&parser).unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.key.updated_at, parser.updated_at);
    }

    #[test]
    fn test_compilation_error_is_not_cached() {
        let cache = ScriptCache::new(8, SandboxLimits::default());

        let result = cache.get_compiled(&parser("let x = ;"));

        assert!(matches!(result, Err(ScriptError::Compilation(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eval_is_rejected_at_compile_time() {
        let cache = ScriptCache::new(8, SandboxLimits::default());
        let result = cache.get_compiled(&parser(r#"eval("40 + 2")"#));
        assert!(matches!(result, Err(ScriptError::Compilation(_))));
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = ScriptCache::new(1, SandboxLimits::default());
        let mut first = parser("1");
        let mut second = parser("2");
        first.id = "p-a".to_string();
        second.id = "p-b".to_string();

        let a = cache.get_compiled(&first).unwrap();
        cache.get_compiled(&second).unwrap();
        let a_again = cache.get_compiled(&first).unwrap();

        assert_eq!(cache.len(), 1);
        assert!(!Arc::ptr_eq(&a, &a_again));
    }

    #[tokio::test]
    async fn test_concurrent_misses_agree() {
        // Arrange
        let cache = Arc::new(ScriptCache::new(8, SandboxLimits::default()));
        let parser = parser(
            r#"
            let total = payload.len();
            if lastParsedPayload.len() > 0 {
                total += lastParsedPayload[0].value;
            }
            [#{ key: "total", value: total }]
            "#,
        );
        let start = Arc::new(std::sync::Barrier::new(8));

        // Act
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let parser = parser.clone();
                let start = Arc::clone(&start);
                std::thread::spawn(move || {
                    start.wait();
                    cache.get_compiled(&parser).unwrap()
                })
            })
            .collect();
        let compiled: Vec<Arc<CompiledScript>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Assert
        let sandbox = RhaiSandbox::default();
        let previous = json!([{"key": "total", "value": 4}]);
        for script in compiled {
            assert_eq!(script.key, ScriptKey::of(&parser));
            let output = sandbox
                .evaluate(script, "AABBCC", &previous, std::time::Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(output, json!([{"key": "total", "value": 10}]));
        }
        assert_eq!(cache.len(), 1);
    }
}

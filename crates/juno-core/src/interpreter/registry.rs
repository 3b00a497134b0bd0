//! Scoped variable registry.
//!
//! Holds named live values for one interpreter group. A variable is either
//! global (`scope == None`) or bound to a scope id, usually a note id. Scopes
//! are dropped wholesale when their note is removed, and the whole registry
//! is cleared when the interpreter restarts.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named value in a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub scope: Option<String>,
    pub value: Value,
}

/// Observer for registry changes, e.g. a push channel to clients.
pub trait RegistryListener: Send + Sync {
    fn on_add(&self, _group_id: &str, _variable: &Variable) {}

    fn on_update(&self, _group_id: &str, _variable: &Variable) {}

    fn on_remove(&self, _group_id: &str, _name: &str, _scope: Option<&str>) {}
}

type Scopes = FxHashMap<Option<String>, FxHashMap<String, Variable>>;

/// Scoped variable store for one interpreter group.
pub struct VariableRegistry {
    group_id: String,
    scopes: Mutex<Scopes>,
    listener: RwLock<Option<Arc<dyn RegistryListener>>>,
}

impl VariableRegistry {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            scopes: Mutex::new(FxHashMap::default()),
            listener: RwLock::new(None),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn set_listener(&self, listener: Arc<dyn RegistryListener>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn listener(&self) -> Option<Arc<dyn RegistryListener>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, Scopes> {
        self.scopes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a variable.
    pub fn add(&self, name: &str, value: Value, scope: Option<&str>) -> Variable {
        let variable = Variable {
            name: name.to_string(),
            scope: scope.map(str::to_string),
            value,
        };
        let replaced = self
            .lock()
            .entry(variable.scope.clone())
            .or_default()
            .insert(name.to_string(), variable.clone())
            .is_some();

        if let Some(listener) = self.listener() {
            if replaced {
                listener.on_update(&self.group_id, &variable);
            } else {
                listener.on_add(&self.group_id, &variable);
            }
        }
        variable
    }

    pub fn get(&self, name: &str, scope: Option<&str>) -> Option<Variable> {
        self.lock()
            .get(&scope.map(str::to_string))
            .and_then(|vars| vars.get(name))
            .cloned()
    }

    pub fn remove(&self, name: &str, scope: Option<&str>) -> Option<Variable> {
        let key = scope.map(str::to_string);
        let removed = {
            let mut scopes = self.lock();
            let removed = scopes.get_mut(&key).and_then(|vars| vars.remove(name));
            if scopes.get(&key).is_some_and(|vars| vars.is_empty()) {
                scopes.remove(&key);
            }
            removed
        };

        if removed.is_some() {
            if let Some(listener) = self.listener() {
                listener.on_remove(&self.group_id, name, scope);
            }
        }
        removed
    }

    /// All variables in a scope, sorted by name.
    pub fn get_all(&self, scope: Option<&str>) -> Vec<Variable> {
        let mut vars: Vec<Variable> = self
            .lock()
            .get(&scope.map(str::to_string))
            .map(|vars| vars.values().cloned().collect())
            .unwrap_or_default();
        vars.sort_by(|a, b| a.name.cmp(&b.name));
        vars
    }

    /// Drop every variable bound to `scope`. Returns how many were removed.
    pub fn remove_scope(&self, scope: &str) -> usize {
        let removed = self.lock().remove(&Some(scope.to_string()));
        let Some(removed) = removed else {
            return 0;
        };

        if let Some(listener) = self.listener() {
            for name in removed.keys() {
                listener.on_remove(&self.group_id, name, Some(scope));
            }
        }
        removed.len()
    }

    /// Drop everything. Returns how many variables were removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<Variable> = self
            .lock()
            .drain()
            .flat_map(|(_, vars)| vars.into_values())
            .collect();

        if let Some(listener) = self.listener() {
            for var in &drained {
                listener.on_remove(&self.group_id, &var.name, var.scope.as_deref());
            }
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.lock().values().map(|vars| vars.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for VariableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableRegistry")
            .field("group_id", &self.group_id)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl RegistryListener for Recorder {
        fn on_add(&self, _group_id: &str, variable: &Variable) {
            self.events
                .lock()
                .unwrap()
                .push(format!("add {}", variable.name));
        }

        fn on_update(&self, _group_id: &str, variable: &Variable) {
            self.events
                .lock()
                .unwrap()
                .push(format!("update {}", variable.name));
        }

        fn on_remove(&self, _group_id: &str, name: &str, _scope: Option<&str>) {
            self.events.lock().unwrap().push(format!("remove {}", name));
        }
    }

    #[test]
    fn test_scopes_are_isolated() {
        let registry = VariableRegistry::new("g");
        registry.add("x", json!(1), Some("note1"));
        registry.add("x", json!(2), Some("note2"));
        registry.add("x", json!(3), None);

        assert_eq!(registry.get("x", Some("note1")).unwrap().value, json!(1));
        assert_eq!(registry.get("x", Some("note2")).unwrap().value, json!(2));
        assert_eq!(registry.get("x", None).unwrap().value, json!(3));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_remove_scope_keeps_others() {
        let registry = VariableRegistry::new("g");
        registry.add("o1", json!("object1"), Some("note1"));
        registry.add("o2", json!("object2"), Some("note1"));
        registry.add("o3", json!("object3"), None);

        assert_eq!(registry.remove_scope("note1"), 2);
        assert!(registry.get("o1", Some("note1")).is_none());
        assert!(registry.get("o3", None).is_some());
        assert_eq!(registry.remove_scope("note1"), 0);
    }

    #[test]
    fn test_clear() {
        let registry = VariableRegistry::new("g");
        registry.add("a", json!(1), Some("n"));
        registry.add("b", json!(2), None);

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert!(registry.get_all(None).is_empty());
    }

    #[test]
    fn test_get_all_sorted() {
        let registry = VariableRegistry::new("g");
        registry.add("b", json!(2), None);
        registry.add("a", json!(1), None);

        let names: Vec<_> = registry
            .get_all(None)
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_listener_events() {
        let registry = VariableRegistry::new("g");
        let recorder = Arc::new(Recorder::default());
        registry.set_listener(recorder.clone());

        registry.add("x", json!(1), None);
        registry.add("x", json!(2), None);
        registry.remove("x", None);
        registry.remove("x", None);

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["add x", "update x", "remove x"]
        );
    }
}

//! Per-note interpreter binding.

use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::scheduler::Scheduler;

use super::{Interpreter, InterpreterFactory, InterpreterSetting};

/// An interpreter together with the setting it belongs to.
#[derive(Clone)]
pub struct ResolvedInterpreter {
    pub setting: Arc<InterpreterSetting>,
    pub interpreter: Arc<dyn Interpreter>,
}

/// The ordered list of interpreter settings bound to one note.
///
/// The first bound setting's first interpreter is the note's default.
pub struct NoteInterpreterLoader {
    factory: Arc<InterpreterFactory>,
    setting_ids: RwLock<Vec<String>>,
}

impl NoteInterpreterLoader {
    pub fn new(factory: Arc<InterpreterFactory>) -> Self {
        Self {
            factory,
            setting_ids: RwLock::new(Vec::new()),
        }
    }

    pub fn factory(&self) -> &Arc<InterpreterFactory> {
        &self.factory
    }

    /// Bind settings by id, replacing the current binding.
    pub fn set_interpreters(&self, setting_ids: Vec<String>) -> Result<()> {
        if let Some(missing) = setting_ids
            .iter()
            .find(|id| self.factory.setting(id).is_none())
        {
            return Err(Error::NotFound(format!("interpreter setting {}", missing)));
        }
        *self
            .setting_ids
            .write()
            .unwrap_or_else(PoisonError::into_inner) = setting_ids;
        Ok(())
    }

    pub fn setting_ids(&self) -> Vec<String> {
        self.setting_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Bound settings that still exist, in binding order.
    pub fn interpreter_settings(&self) -> Vec<Arc<InterpreterSetting>> {
        self.setting_ids()
            .iter()
            .filter_map(|id| self.factory.setting(id))
            .collect()
    }

    /// Resolve an interpreter by name, or the default one for `None`.
    ///
    /// A name matches an interpreter name first, then a setting name (which
    /// selects that setting's first interpreter).
    pub fn resolve(&self, name: Option<&str>) -> Result<ResolvedInterpreter> {
        let settings = self.interpreter_settings();

        let Some(name) = name else {
            return settings
                .into_iter()
                .find_map(|setting| {
                    let interpreter = setting.group().default_interpreter()?;
                    Some(ResolvedInterpreter {
                        setting,
                        interpreter,
                    })
                })
                .ok_or_else(|| Error::NotFound("No interpreter bound to note".to_string()));
        };

        for setting in &settings {
            if let Some(interpreter) = setting.group().interpreter(name) {
                return Ok(ResolvedInterpreter {
                    setting: setting.clone(),
                    interpreter,
                });
            }
        }
        for setting in settings {
            if setting.name() == name {
                if let Some(interpreter) = setting.group().default_interpreter() {
                    return Ok(ResolvedInterpreter {
                        setting,
                        interpreter,
                    });
                }
            }
        }
        Err(Error::NotFound(format!("interpreter '{}'", name)))
    }

    /// Scheduler of the setting an interpreter resolved to.
    pub fn scheduler_for(&self, resolved: &ResolvedInterpreter) -> Result<Arc<Scheduler>> {
        self.factory.scheduler_for(&resolved.setting)
    }
}

impl std::fmt::Debug for NoteInterpreterLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteInterpreterLoader")
            .field("setting_ids", &self.setting_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{InterpreterKind, InterpreterSpec};
    use crate::scheduler::SchedulerFactory;

    fn echo(name: &str, prefix: &str) -> InterpreterSpec {
        InterpreterSpec::new(
            name,
            InterpreterKind::Echo {
                prefix: prefix.to_string(),
                delay_ms: 0,
            },
        )
    }

    fn loader() -> NoteInterpreterLoader {
        let factory = Arc::new(InterpreterFactory::new(Arc::new(SchedulerFactory::new())));
        factory.add_setting("mock1", vec![echo("mock1", "repl1")]).unwrap();
        factory
            .add_setting("group2", vec![echo("mock2", "repl2"), echo("mock3", "repl3")])
            .unwrap();
        let loader = NoteInterpreterLoader::new(factory.clone());
        loader.set_interpreters(factory.default_settings()).unwrap();
        loader
    }

    #[test]
    fn test_default_is_first_setting() {
        let resolved = loader().resolve(None).unwrap();
        assert_eq!(resolved.interpreter.name(), "mock1");
        assert_eq!(resolved.setting.name(), "mock1");
    }

    #[test]
    fn test_resolve_by_interpreter_name() {
        let resolved = loader().resolve(Some("mock3")).unwrap();
        assert_eq!(resolved.interpreter.name(), "mock3");
        assert_eq!(resolved.setting.name(), "group2");
    }

    #[test]
    fn test_resolve_by_setting_name() {
        let resolved = loader().resolve(Some("group2")).unwrap();
        assert_eq!(resolved.interpreter.name(), "mock2");
    }

    #[test]
    fn test_unknown_name() {
        assert!(matches!(
            loader().resolve(Some("python")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_unbound_note_has_no_default() {
        let factory = Arc::new(InterpreterFactory::new(Arc::new(SchedulerFactory::new())));
        let loader = NoteInterpreterLoader::new(factory);
        assert!(loader.resolve(None).is_err());
        assert!(loader.set_interpreters(vec!["missing".to_string()]).is_err());
    }
}

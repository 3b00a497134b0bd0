//! Interpreter settings, groups and restart.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scheduler::{Scheduler, SchedulerFactory, SchedulerPolicy};

use super::{Interpreter, InterpreterKind, VariableRegistry};

/// Declaration of one interpreter inside a setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: InterpreterKind,
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
}

fn default_concurrency() -> usize {
    1
}

impl InterpreterSpec {
    pub fn new(name: impl Into<String>, kind: InterpreterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            max_concurrency: 1,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    fn policy(&self) -> SchedulerPolicy {
        if self.max_concurrency > 1 {
            SchedulerPolicy::Parallel(self.max_concurrency)
        } else {
            SchedulerPolicy::Fifo
        }
    }

    fn build(&self) -> Arc<dyn Interpreter> {
        self.kind.build(&self.name, self.policy())
    }
}

/// One execution context: live interpreters, their shared variable
/// registry, and the name of the scheduler their paragraphs run on.
pub struct InterpreterGroup {
    id: String,
    specs: Vec<InterpreterSpec>,
    interpreters: RwLock<Vec<Arc<dyn Interpreter>>>,
    registry: Arc<VariableRegistry>,
}

impl InterpreterGroup {
    fn new(id: String, specs: Vec<InterpreterSpec>) -> Self {
        let interpreters = specs.iter().map(InterpreterSpec::build).collect();
        Self {
            registry: Arc::new(VariableRegistry::new(id.clone())),
            id,
            specs,
            interpreters: RwLock::new(interpreters),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn registry(&self) -> &Arc<VariableRegistry> {
        &self.registry
    }

    pub fn specs(&self) -> &[InterpreterSpec] {
        &self.specs
    }

    /// Name of the scheduler shared by this group's paragraphs.
    pub fn scheduler_name(&self) -> String {
        format!("interpreter_{}", self.id)
    }

    /// Policy requested by the group's first interpreter.
    pub fn scheduler_policy(&self) -> SchedulerPolicy {
        self.interpreters()
            .first()
            .map(|i| i.scheduler_policy())
            .unwrap_or(SchedulerPolicy::Fifo)
    }

    pub fn interpreters(&self) -> Vec<Arc<dyn Interpreter>> {
        self.interpreters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn interpreter(&self, name: &str) -> Option<Arc<dyn Interpreter>> {
        self.interpreters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|i| i.name() == name)
            .cloned()
    }

    pub fn default_interpreter(&self) -> Option<Arc<dyn Interpreter>> {
        self.interpreters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .cloned()
    }

    fn open(&self) -> Result<()> {
        for interpreter in self.interpreters() {
            interpreter.open()?;
        }
        Ok(())
    }

    fn close(&self) {
        for interpreter in self.interpreters() {
            interpreter.close();
        }
    }

    /// Close every interpreter and replace them with fresh, open instances.
    fn reopen(&self) -> Result<()> {
        self.close();
        let fresh: Vec<_> = self.specs.iter().map(InterpreterSpec::build).collect();
        for interpreter in &fresh {
            interpreter.open()?;
        }
        *self
            .interpreters
            .write()
            .unwrap_or_else(PoisonError::into_inner) = fresh;
        Ok(())
    }
}

impl std::fmt::Debug for InterpreterGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterGroup")
            .field("id", &self.id)
            .field("specs", &self.specs)
            .finish()
    }
}

/// A named, bindable interpreter configuration.
#[derive(Debug)]
pub struct InterpreterSetting {
    id: String,
    name: String,
    group: InterpreterGroup,
}

impl InterpreterSetting {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &InterpreterGroup {
        &self.group
    }
}

/// Called after an interpreter setting restarts.
pub trait RestartListener: Send + Sync {
    fn on_restart(&self, setting: &InterpreterSetting);
}

/// Owns interpreter settings and maps them onto schedulers.
pub struct InterpreterFactory {
    schedulers: Arc<SchedulerFactory>,
    settings: RwLock<Vec<Arc<InterpreterSetting>>>,
    restart_listeners: RwLock<Vec<Arc<dyn RestartListener>>>,
}

impl InterpreterFactory {
    pub fn new(schedulers: Arc<SchedulerFactory>) -> Self {
        Self {
            schedulers,
            settings: RwLock::new(Vec::new()),
            restart_listeners: RwLock::new(Vec::new()),
        }
    }

    /// Create a factory with one setting per backend key (`echo`, `sh`).
    pub fn with_backends(schedulers: Arc<SchedulerFactory>, keys: &[String]) -> Result<Self> {
        let factory = Self::new(schedulers);
        for key in keys {
            let kind = InterpreterKind::from_key(key)?;
            factory.add_setting(key.trim(), vec![InterpreterSpec::new(key.trim(), kind)])?;
        }
        Ok(factory)
    }

    pub fn scheduler_factory(&self) -> &Arc<SchedulerFactory> {
        &self.schedulers
    }

    /// Register a setting and open its interpreters.
    pub fn add_setting(
        &self,
        name: &str,
        specs: Vec<InterpreterSpec>,
    ) -> Result<Arc<InterpreterSetting>> {
        if self.setting_by_name(name).is_some() {
            return Err(Error::Conflict(format!(
                "Interpreter setting '{}' already exists",
                name
            )));
        }

        // Ids are persisted in note bindings, so they must be stable across
        // processes.
        let id = name.to_string();
        let setting = Arc::new(InterpreterSetting {
            group: InterpreterGroup::new(id.clone(), specs),
            id,
            name: name.to_string(),
        });
        setting.group.open()?;

        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(setting.clone());
        tracing::info!("Added interpreter setting '{}'", name);
        Ok(setting)
    }

    pub fn setting(&self, id: &str) -> Option<Arc<InterpreterSetting>> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub fn setting_by_name(&self, name: &str) -> Option<Arc<InterpreterSetting>> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    pub fn settings(&self) -> Vec<Arc<InterpreterSetting>> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ids of all settings, in registration order; new notes bind these.
    pub fn default_settings(&self) -> Vec<String> {
        self.settings().iter().map(|s| s.id.clone()).collect()
    }

    /// Scheduler for a setting's group, created on first use.
    pub fn scheduler_for(&self, setting: &InterpreterSetting) -> Result<Arc<Scheduler>> {
        let group = setting.group();
        self.schedulers
            .create_or_get(&group.scheduler_name(), group.scheduler_policy())
    }

    pub fn add_restart_listener(&self, listener: Arc<dyn RestartListener>) {
        self.restart_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Restart a setting.
    ///
    /// Every waiting or running job on the group's scheduler ends in `ABORT`,
    /// the variable registry is emptied, and the interpreters are replaced
    /// with fresh instances.
    pub fn restart(&self, setting_id: &str) -> Result<()> {
        let setting = self
            .setting(setting_id)
            .ok_or_else(|| Error::NotFound(format!("interpreter setting {}", setting_id)))?;
        let group = setting.group();

        let aborted = self
            .schedulers
            .get(&group.scheduler_name())
            .map(|scheduler| scheduler.abort_all())
            .unwrap_or(0);
        let cleared = group.registry().clear();
        group.reopen()?;

        tracing::info!(
            "Restarted interpreter setting '{}': {} job(s) aborted, {} variable(s) cleared",
            setting.name,
            aborted,
            cleared
        );

        let listeners = self
            .restart_listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_restart(&setting);
        }
        Ok(())
    }

    /// Remove a setting, stopping its scheduler and closing its interpreters.
    pub fn remove_setting(&self, setting_id: &str) -> bool {
        let removed = {
            let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
            let index = settings.iter().position(|s| s.id == setting_id);
            index.map(|i| settings.remove(i))
        };
        let Some(setting) = removed else {
            return false;
        };

        self.schedulers.remove(&setting.group.scheduler_name());
        setting.group.close();
        true
    }

    /// Close every interpreter.
    pub fn close(&self) {
        for setting in self.settings() {
            setting.group.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{FnJob, Job, JobResult, Status};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn echo(name: &str, prefix: &str) -> InterpreterSpec {
        InterpreterSpec::new(
            name,
            InterpreterKind::Echo {
                prefix: prefix.to_string(),
                delay_ms: 0,
            },
        )
    }

    fn factory() -> InterpreterFactory {
        InterpreterFactory::new(Arc::new(SchedulerFactory::new()))
    }

    #[test]
    fn test_with_backends() {
        let keys = vec!["echo".to_string(), "sh".to_string()];
        let factory =
            InterpreterFactory::with_backends(Arc::new(SchedulerFactory::new()), &keys).unwrap();

        let names: Vec<_> = factory
            .settings()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["echo", "sh"]);
        assert_eq!(factory.default_settings().len(), 2);
    }

    #[test]
    fn test_duplicate_setting_conflicts() {
        let factory = factory();
        factory.add_setting("mock", vec![echo("mock1", "repl1")]).unwrap();
        assert!(matches!(
            factory.add_setting("mock", vec![]),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_spec_policy() {
        let factory = factory();
        let setting = factory
            .add_setting("pool", vec![echo("e", "e").with_max_concurrency(4)])
            .unwrap();

        let scheduler = factory.scheduler_for(&setting).unwrap();
        assert_eq!(scheduler.policy(), SchedulerPolicy::Parallel(4));
        assert_eq!(scheduler.name(), setting.group().scheduler_name());
    }

    #[test]
    fn test_restart_clears_registry_and_aborts() {
        let factory = factory();
        let setting = factory.add_setting("mock", vec![echo("mock1", "repl1")]).unwrap();
        let registry = setting.group().registry().clone();
        registry.add("o1", json!("object1"), Some("note"));
        registry.add("o2", json!("object2"), None);

        let scheduler = factory.scheduler_for(&setting).unwrap();
        let blocker = FnJob::new("blocker", |core| {
            core.abort_handle().wait_timeout(Duration::from_secs(10));
            Ok(JobResult::incomplete("aborted"))
        });
        let queued = FnJob::new("queued", |_| Ok(JobResult::success("never")));
        scheduler.submit(blocker.clone()).unwrap();
        scheduler.submit(queued.clone()).unwrap();
        blocker
            .core()
            .wait_for_status(|s| s == Status::Running, Duration::from_secs(5));

        let before = setting.group().default_interpreter().unwrap();
        factory.restart(setting.id()).unwrap();
        let after = setting.group().default_interpreter().unwrap();

        assert!(registry.is_empty());
        assert_eq!(blocker.status(), Status::Abort);
        assert_eq!(queued.status(), Status::Abort);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_restart_notifies_listeners() {
        struct Recorder(Mutex<Vec<String>>);
        impl RestartListener for Recorder {
            fn on_restart(&self, setting: &InterpreterSetting) {
                self.0.lock().unwrap().push(setting.name().to_string());
            }
        }

        let factory = factory();
        let setting = factory.add_setting("mock", vec![echo("mock1", "repl1")]).unwrap();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        factory.add_restart_listener(recorder.clone());

        factory.restart(setting.id()).unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec!["mock"]);
        assert!(matches!(factory.restart("missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_remove_setting() {
        let factory = factory();
        let setting = factory.add_setting("mock", vec![echo("mock1", "repl1")]).unwrap();
        factory.scheduler_for(&setting).unwrap();

        assert!(factory.remove_setting(setting.id()));
        assert!(!factory.remove_setting(setting.id()));
        assert!(
            factory
                .scheduler_factory()
                .get(&setting.group().scheduler_name())
                .is_none()
        );
    }
}

use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use super::task::Task;
use crate::error::{Error, Result};

/// Receives the full task list after every change.
pub trait TaskObserver: Send + Sync {
    fn observe(&self, tasks: &[Task]);
}

/// The current task list plus everyone who wants to hear about changes to it.
#[derive(Default)]
pub struct TaskList {
    tasks: Vec<Task>,
    observers: Vec<Arc<dyn TaskObserver>>,
}

impl TaskList {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            observers: Vec::new(),
        }
    }

    /// Read tasks from a JSON file. A missing file is an empty list.
    ///
    /// Records that fail to parse are skipped so one bad entry does not hide the rest.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::io(path, e)),
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let records: Vec<serde_json::Value> = serde_json::from_str(&content)?;
        let mut tasks = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            match serde_json::from_value::<Task>(record) {
                Ok(task) => tasks.push(task),
                Err(e) => log::warn!("Skipping malformed task #{} in {}: {}", index, path.display(), e),
            }
        }
        log::debug!("Loaded {} tasks from {}", tasks.len(), path.display());
        Ok(Self::new(tasks))
    }

    /// Write tasks as pretty JSON, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(&self.tasks)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| Error::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;
        Ok(())
    }

    /// Register an observer and hand it the current list straight away.
    pub fn subscribe(&mut self, observer: Arc<dyn TaskObserver>) {
        observer.observe(&self.tasks);
        self.observers.push(observer);
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Find the single task whose id starts with `prefix`.
    pub fn find_by_prefix(&self, prefix: &str) -> Option<&Task> {
        let prefix = prefix.to_ascii_lowercase();
        let mut matches = self
            .tasks
            .iter()
            .filter(|t| t.id.to_string().starts_with(&prefix));
        let first = matches.next()?;
        match matches.next() {
            Some(_) => None,
            None => Some(first),
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_active()).count()
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.completed).count()
    }

    /// New tasks go to the top of the list.
    pub fn add(&mut self, task: Task) -> Uuid {
        let id = task.id;
        log::info!("Added task {} ({})", id, task.title);
        self.tasks.insert(0, task);
        self.notify();
        id
    }

    pub fn toggle(&mut self, id: Uuid) -> Result<()> {
        self.update(id, |t| t.toggle())
    }

    /// Apply an edit to one task. Its id is restored if the closure changes it.
    pub fn update(&mut self, id: Uuid, edit: impl FnOnce(&mut Task)) -> Result<()> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(Error::TaskNotFound(id))?;
        let created = task.created;
        edit(task);
        task.id = id;
        task.created = created;
        self.notify();
        Ok(())
    }

    pub fn remove(&mut self, id: Uuid) -> Result<Task> {
        let index = self
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(Error::TaskNotFound(id))?;
        let task = self.tasks.remove(index);
        log::info!("Removed task {} ({})", id, task.title);
        self.notify();
        Ok(task)
    }

    /// Drop every completed task. Returns how many went.
    pub fn clear_completed(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| !t.completed);
        let removed = before - self.tasks.len();
        if removed > 0 {
            self.notify();
        }
        removed
    }

    pub fn add_subtask(&mut self, id: Uuid, title: &str) -> Result<Uuid> {
        let mut subtask_id = Uuid::nil();
        self.update(id, |t| subtask_id = t.add_subtask(title))?;
        Ok(subtask_id)
    }

    pub fn toggle_subtask(&mut self, id: Uuid, subtask: Uuid) -> Result<()> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(Error::TaskNotFound(id))?;
        if !task.toggle_subtask(subtask) {
            return Err(Error::SubtaskNotFound { task: id, subtask });
        }
        self.notify();
        Ok(())
    }

    fn notify(&self) {
        for observer in &self.observers {
            observer.observe(&self.tasks);
        }
    }
}

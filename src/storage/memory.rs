//! In-memory storage implementation
//!
//! Fast, non-persistent storage for tests and ephemeral deploys. Uses
//! DashMap for lock-free concurrent access. Data is lost on process restart
//! and nothing is coordinated across processes, so durable pause/resume only
//! survives a restart with one of the SQL backends.

use super::*;
use dashmap::DashMap;

/// In-memory storage implementation
#[derive(Clone)]
pub struct MemoryStorage {
    runs: Arc<DashMap<Uuid, Run>>,
    steps: Arc<DashMap<Uuid, Vec<StepRun>>>,
    waits: Arc<DashMap<String, Option<i64>>>,
    paused_runs: Arc<DashMap<String, serde_json::Value>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
            steps: Arc::new(DashMap::new()),
            waits: Arc::new(DashMap::new()),
            paused_runs: Arc::new(DashMap::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    // Run methods
    async fn save_run(&self, run: &Run) -> Result<()> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        Ok(self.runs.get(&id).map(|r| r.clone()))
    }

    async fn list_runs(&self) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self.runs.iter().map(|r| r.value().clone()).collect();
        runs.sort_unstable_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    async fn delete_run(&self, id: Uuid) -> Result<()> {
        self.runs.remove(&id);
        self.steps.remove(&id);
        Ok(())
    }

    async fn try_insert_run(&self, run: &Run) -> Result<bool> {
        use dashmap::mapref::entry::Entry;

        match self.runs.entry(run.id) {
            Entry::Vacant(entry) => {
                entry.insert(run.clone());
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
        }
    }

    async fn get_latest_run_by_flow_name(&self, name: &str) -> Result<Option<Run>> {
        Ok(self
            .runs
            .iter()
            .filter(|r| r.value().flow_name == name)
            .max_by_key(|r| r.value().started_at)
            .map(|r| r.value().clone()))
    }

    // Step methods
    async fn save_step(&self, step: &StepRun) -> Result<()> {
        self.steps
            .entry(step.run_id)
            .or_default()
            .push(step.clone());
        Ok(())
    }

    async fn get_steps(&self, run_id: Uuid) -> Result<Vec<StepRun>> {
        Ok(self
            .steps
            .get(&run_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    // Wait/timeout methods
    async fn register_wait(&self, token: &str, wake_at: Option<i64>) -> Result<()> {
        self.waits.insert(token.to_string(), wake_at);
        Ok(())
    }

    async fn resolve_wait(&self, token: &str) -> Result<Option<WaitRegistration>> {
        Ok(self.waits.remove(token).map(|(token, wake_at)| {
            WaitRegistration { token, wake_at }
        }))
    }

    // Paused run methods
    async fn save_paused_run(&self, token: &str, data: serde_json::Value) -> Result<()> {
        self.paused_runs.insert(token.to_string(), data);
        Ok(())
    }

    async fn load_paused_runs(&self) -> Result<HashMap<String, serde_json::Value>> {
        Ok(self
            .paused_runs
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect())
    }

    async fn delete_paused_run(&self, token: &str) -> Result<()> {
        self.paused_runs.remove(token);
        Ok(())
    }

    async fn fetch_and_delete_paused_run(&self, token: &str) -> Result<Option<serde_json::Value>> {
        // DashMap::remove is atomic, so only one caller wins the race.
        Ok(self.paused_runs.remove(token).map(|(_, v)| v))
    }
}

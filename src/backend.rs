//! Account collaborator: who is signed in, how many credits they hold, and
//! the job records kept for every generation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub credits: u32,
    pub role: Role,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobId(pub Uuid);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct JobRecord {
    pub user: String,
    pub prompt: String,
    pub credit_cost: u32,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    NotSignedIn,
    UnknownJob(JobId),
    Unavailable(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::NotSignedIn => write!(f, "not signed in"),
            BackendError::UnknownJob(id) => write!(f, "unknown job {}", id.0),
            BackendError::Unavailable(msg) => write!(f, "account service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

pub trait AccountBackend: Send + Sync {
    fn current_user(&self) -> Result<String, BackendError>;
    fn profile(&self, user: &str) -> Result<Profile, BackendError>;
    /// Overwrite the credit balance.
    fn update_credits(&self, user: &str, credits: u32) -> Result<(), BackendError>;
    fn create_job(&self, record: JobRecord) -> Result<JobId, BackendError>;
    fn update_job(&self, id: JobId, status: JobStatus) -> Result<(), BackendError>;
}

#[derive(Default)]
struct MemoryState {
    user: Option<String>,
    profiles: HashMap<String, Profile>,
    jobs: HashMap<JobId, JobRecord>,
}

/// In-process backend for offline use and tests.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend with one signed-in user holding `credits`.
    pub fn signed_in(user: &str, credits: u32) -> Self {
        let backend = Self::new();
        if let Ok(mut state) = backend.state.lock() {
            state.user = Some(user.to_string());
            state.profiles.insert(
                user.to_string(),
                Profile {
                    credits,
                    role: Role::User,
                },
            );
        }
        backend
    }

    pub fn job(&self, id: JobId) -> Option<JobRecord> {
        self.state.lock().ok()?.jobs.get(&id).cloned()
    }

    pub fn jobs(&self) -> Vec<JobRecord> {
        match self.state.lock() {
            Ok(state) => state.jobs.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> Result<T, BackendError>) -> Result<T, BackendError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BackendError::Unavailable("state lock poisoned".into()))?;
        f(&mut state)
    }
}

impl AccountBackend for MemoryBackend {
    fn current_user(&self) -> Result<String, BackendError> {
        self.with_state(|s| s.user.clone().ok_or(BackendError::NotSignedIn))
    }

    fn profile(&self, user: &str) -> Result<Profile, BackendError> {
        self.with_state(|s| s.profiles.get(user).cloned().ok_or(BackendError::NotSignedIn))
    }

    fn update_credits(&self, user: &str, credits: u32) -> Result<(), BackendError> {
        self.with_state(|s| {
            let profile = s.profiles.get_mut(user).ok_or(BackendError::NotSignedIn)?;
            profile.credits = credits;
            Ok(())
        })
    }

    fn create_job(&self, record: JobRecord) -> Result<JobId, BackendError> {
        self.with_state(|s| {
            let id = JobId(Uuid::new_v4());
            s.jobs.insert(id, record);
            Ok(id)
        })
    }

    fn update_job(&self, id: JobId, status: JobStatus) -> Result<(), BackendError> {
        self.with_state(|s| {
            let job = s.jobs.get_mut(&id).ok_or(BackendError::UnknownJob(id))?;
            job.status = status;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_out_backend_reports_it() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.current_user(), Err(BackendError::NotSignedIn));
    }

    #[test]
    fn credits_and_jobs_round_trip() {
        let backend = MemoryBackend::signed_in("ana", 5);
        let user = backend.current_user().unwrap();
        assert_eq!(backend.profile(&user).unwrap().credits, 5);
        backend.update_credits(&user, 3).unwrap();
        assert_eq!(backend.profile(&user).unwrap().credits, 3);

        let id = backend
            .create_job(JobRecord {
                user: user.clone(),
                prompt: "stage it".into(),
                credit_cost: 2,
                status: JobStatus::Running,
            })
            .unwrap();
        backend.update_job(id, JobStatus::Succeeded).unwrap();
        assert_eq!(backend.job(id).unwrap().status, JobStatus::Succeeded);

        let ghost = JobId(Uuid::new_v4());
        assert_eq!(
            backend.update_job(ghost, JobStatus::Succeeded),
            Err(BackendError::UnknownJob(ghost))
        );
    }
}

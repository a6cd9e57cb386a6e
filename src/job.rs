use crate::env::RuntimeEnv;

/// Driver-side job record: the runtime environment descriptor plus the
/// package URI list the cluster loads for it. The URI list lives inside
/// the descriptor so that it travels with the serialized environment.
#[derive(Debug, Clone, Default)]
pub struct JobConfig {
    runtime_env: RuntimeEnv,
}

impl JobConfig {
    pub fn new(runtime_env: RuntimeEnv) -> Self {
        JobConfig { runtime_env }
    }

    pub fn runtime_env(&self) -> &RuntimeEnv {
        &self.runtime_env
    }

    /// URIs recorded on the job; empty until packaging has run.
    pub fn runtime_env_uris(&self) -> Vec<String> {
        self.runtime_env.uris().unwrap_or_default()
    }

    pub fn set_runtime_env_uris(&mut self, uris: Vec<String>) {
        self.runtime_env.set_uris(uris);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::RuntimeEnv;
    use serde_json::json;

    #[test]
    fn uris_default_to_empty() {
        let job = JobConfig::default();
        assert!(job.runtime_env_uris().is_empty());
    }

    #[test]
    fn set_uris_round_trips() {
        let env = RuntimeEnv::from_value(&json!({ "working_dir": "/w" })).unwrap();
        let mut job = JobConfig::new(env);
        job.set_runtime_env_uris(vec!["gcs://_ray_pkg_aa.zip".to_owned()]);
        assert_eq!(job.runtime_env_uris(), vec!["gcs://_ray_pkg_aa.zip"]);
    }
}

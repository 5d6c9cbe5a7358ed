//! `cron.json` persistence for the job list.

use std::sync::Arc;

use herald_core::persist::JsonFile;

use crate::types::{CronFile, CronJob};

pub struct CronStore {
    file: Arc<JsonFile<CronFile>>,
}

impl CronStore {
    pub fn new(file: JsonFile<CronFile>) -> Self {
        Self {
            file: Arc::new(file),
        }
    }

    pub fn load(&self) -> Vec<CronJob> {
        self.file.load().jobs
    }

    pub async fn save(&self, jobs: &[CronJob]) -> herald_core::Result<()> {
        self.file
            .save(&CronFile {
                jobs: jobs.to_vec(),
            })
            .await
    }

    pub fn spawn_save(&self, jobs: Vec<CronJob>) {
        self.file.spawn_save(CronFile { jobs });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CronStore::new(JsonFile::new(dir.path().join("cron.json")));

        let mut job = CronJob::new("0 9 * * 1-5", "morning summary");
        job.chat_id = Some(12345);
        job.agent = Some("claude".to_string());
        job.timezone = "Europe/Madrid".to_string();
        let jobs = vec![job, CronJob::new("*/10 * * * *", "HEARTBEAT check")];

        store.save(&jobs).await.unwrap();
        assert_eq!(store.load(), jobs);
    }

    #[tokio::test]
    async fn missing_file_yields_no_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = CronStore::new(JsonFile::new(dir.path().join("cron.json")));
        assert!(store.load().is_empty());
    }
}

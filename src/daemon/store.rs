use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::NaiveDate;
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
};
use tracing::{debug, warn};

use crate::{agent::activity::Activity, utils::time::date_to_record_name};

/// Stores activities on disk, one JSON line each, one file per day.
///
/// Files carry advisory locks while touched so a concurrently running
/// analysis process reads consistent lines.
pub struct ActivityStore {
    record_dir: PathBuf,
}

impl ActivityStore {
    pub fn new(record_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&record_dir)?;

        Ok(Self { record_dir })
    }

    fn record_path(&self, date: NaiveDate) -> PathBuf {
        self.record_dir.join(date_to_record_name(date))
    }

    /// Appends the activities to the record file of the given day.
    pub async fn append(&self, date: NaiveDate, activities: &[Activity]) -> Result<()> {
        let mut file = File::options()
            .append(true)
            .create(true)
            .open(self.record_path(date))
            .await?;

        // Semi-safe acquire-release for a file
        file.lock_exclusive()?;
        let result = Self::append_with_file(&mut file, activities).await;
        file.unlock_async().await?;
        result
    }

    async fn append_with_file(file: &mut File, activities: &[Activity]) -> Result<()> {
        let mut buffer = Vec::<u8>::new();
        for activity in activities {
            serde_json::to_writer(&mut buffer, activity)?;
            buffer.push(b'\n');
        }

        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }

    /// Retrieves the activities recorded for a certain day.
    pub async fn read_for(&self, date: NaiveDate) -> Result<Vec<Activity>> {
        let path = self.record_path(date);
        match Self::extract(&path).await {
            Ok(activities) => Ok(activities),
            Err(e) => {
                if e.kind() == ErrorKind::NotFound {
                    Ok(vec![])
                } else {
                    Err(e)?
                }
            }
        }
    }

    async fn extract(path: &Path) -> Result<Vec<Activity>, std::io::Error> {
        debug!("Extracting {path:?}");
        let file = File::open(path).await?;
        file.lock_shared()?;
        let buffer = BufReader::new(file);
        let mut lines = buffer.lines();
        let mut activities = vec![];
        while let Ok(Some(line)) = lines.next_line().await {
            match serde_json::from_str::<Activity>(&line) {
                Ok(activity) => activities.push(activity),
                Err(e) => {
                    // ignore illegal values. Might happen after shutdowns
                    warn!(
                        "During parsing in path {:?} found illegal json string {}:  {e}",
                        path, &line
                    )
                }
            }
        }

        lines.into_inner().into_inner().unlock_async().await?;

        Ok(activities)
    }
}

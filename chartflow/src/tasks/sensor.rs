//! Waiting for a staged object.

use super::failed;
use crate::context::{ExecutionContext, StageContext};
use crate::core::StageOutput;
use crate::storage::{dated_key, ObjectStorage};
use crate::stages::Stage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Polls until `{prefix}/{run date}/{file}` exists.
#[derive(Debug, Clone)]
pub struct ObjectSensorStage {
    name: String,
    storage: Arc<dyn ObjectStorage>,
    prefix: String,
    file: String,
    poke_interval: Duration,
    timeout: Duration,
}

impl ObjectSensorStage {
    /// Creates the sensor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        storage: Arc<dyn ObjectStorage>,
        prefix: impl Into<String>,
        file: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            storage,
            prefix: prefix.into(),
            file: file.into(),
            poke_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(60 * 60 * 24 * 7),
        }
    }

    /// Sets the spacing between checks and the deadline.
    #[must_use]
    pub fn with_timing(mut self, poke_interval: Duration, timeout: Duration) -> Self {
        self.poke_interval = poke_interval;
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Stage for ObjectSensorStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        let key = dated_key(&self.prefix, ctx.run_date(), &self.file);
        let deadline = Instant::now() + self.timeout;

        loop {
            match self.storage.exists(&key).await {
                Ok(true) => {
                    return StageOutput::ok_value("key", serde_json::json!(key));
                }
                Ok(false) => debug!(stage = %self.name, key = %key, "Object not there yet"),
                Err(e) => return failed(&self.name, e),
            }

            if ctx.is_cancelled() {
                return StageOutput::fail(format!("Cancelled while waiting for {key}"));
            }
            if Instant::now() + self.poke_interval > deadline {
                return failed(
                    &self.name,
                    format!(
                        "s3://{}/{key} did not appear within {}s",
                        self.storage.bucket(),
                        self.timeout.as_secs()
                    ),
                );
            }
            tokio::time::sleep(self.poke_interval).await;
        }
    }
}

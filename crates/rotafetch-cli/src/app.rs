//! Fetch, extract and export glue shared by the CLI and the HTTP surface.

use crate::config::AppConfig;
use crate::export::JsonExporter;
use crate::extract::{basic_record, PageRecord};
use anyhow::Result;
use rotafetch::{Credentials, EscalationController, FetchResult};
use serde_json::{json, Value};
use std::path::PathBuf;

/// One processed target.
#[derive(Debug)]
pub struct Processed {
    pub target: String,
    pub result: FetchResult,
    pub record: Option<PageRecord>,
    pub saved_to: Option<PathBuf>,
}

impl Processed {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    /// JSON view. The full record is only included when asked for.
    pub fn to_json(&self, include_record: bool) -> Value {
        match &self.result {
            FetchResult::Success {
                attempts,
                via_fallback,
                proxy_used,
                ..
            } => {
                let mut v = json!({
                    "url": self.target,
                    "status": "success",
                    "identifier": self.record.as_ref().and_then(|r| r.identifier.clone()),
                    "saved_to": self.saved_to.as_ref().map(|p| p.display().to_string()),
                    "attempts": attempts,
                    "via_fallback": via_fallback,
                    "proxy_used": proxy_used,
                });
                if include_record {
                    v["record"] = json!(self.record);
                }
                v
            }
            FetchResult::Failure {
                reason,
                attempts,
                last_status,
            } => json!({
                "url": self.target,
                "status": "error",
                "error": reason.to_string(),
                "reason": reason,
                "attempts": attempts,
                "last_status": last_status,
            }),
        }
    }
}

/// The engine plus the front-end's export and credential settings.
pub struct App {
    pub controller: EscalationController,
    pub exporter: JsonExporter,
    /// Credentials from the environment, used when a request brings none.
    pub credentials: Option<Credentials>,
}

impl App {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let controller = EscalationController::from_config(&config.engine)?;
        let names: Vec<&str> = config
            .credentials
            .cookie_names
            .iter()
            .map(String::as_str)
            .collect();
        let credentials = Credentials::from_env(&config.credentials.env_prefix, &names);
        if let Some(creds) = &credentials {
            tracing::info!("loaded credentials from environment: {:?}", creds.names());
        }
        Ok(Self {
            controller,
            exporter: JsonExporter::new(&config.output.directory),
            credentials,
        })
    }

    pub fn new(controller: EscalationController, exporter: JsonExporter) -> Self {
        Self {
            controller,
            exporter,
            credentials: None,
        }
    }

    fn effective<'a>(&'a self, credentials: Option<&'a Credentials>) -> Option<&'a Credentials> {
        credentials.or(self.credentials.as_ref())
    }

    /// Fetch one target, extract its record and optionally export it.
    pub async fn process(
        &self,
        target: &str,
        credentials: Option<&Credentials>,
        save: bool,
    ) -> Result<Processed> {
        let result = self
            .controller
            .fetch(target, self.effective(credentials))
            .await;
        self.finish(target, result, save)
    }

    /// Fetch targets sequentially; one failing target never stops the rest.
    pub async fn process_batch(
        &self,
        targets: &[String],
        credentials: Option<&Credentials>,
        save: bool,
    ) -> Vec<Result<Processed>> {
        let results = self
            .controller
            .fetch_batch(targets, self.effective(credentials))
            .await;
        targets
            .iter()
            .zip(results)
            .map(|(target, result)| self.finish(target, result, save))
            .collect()
    }

    fn finish(&self, target: &str, result: FetchResult, save: bool) -> Result<Processed> {
        let (record, saved_to) = match result.html() {
            Some(html) => {
                let url = self
                    .controller
                    .normalize_target(target)
                    .unwrap_or_else(|_| target.to_string());
                let record = basic_record(&url, html);
                let saved_to = if save {
                    Some(self.exporter.export(&record)?)
                } else {
                    None
                };
                (Some(record), saved_to)
            }
            None => (None, None),
        };
        Ok(Processed {
            target: target.to_string(),
            result,
            record,
            saved_to,
        })
    }
}

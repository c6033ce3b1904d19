use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use fleet_common::access::{access_info_path, read_access_info};
use fleet_common::AccessEntry;

use crate::client::{chat_completion, message, CompletionParams};

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const SAMPLE_PROMPT: &str = "Hello, how are you?";

/// Chat roles and sampling parameters a model expects.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptConfig {
    pub system_role: &'static str,
    pub user_role: &'static str,
    pub params: CompletionParams,
}

impl PromptConfig {
    pub fn for_model(model: &str) -> Self {
        match model {
            "mgoin/Nemotron-4-340B-Instruct-hf-FP8" => Self {
                system_role: "System",
                user_role: "User",
                params: CompletionParams {
                    max_tokens: 1024,
                    temperature: 0.0,
                    stop: ["<|endoftext|>", "<extra_id_1>", "\x11", "<extra_id_1>User"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                },
            },
            _ => Self {
                system_role: "system",
                user_role: "user",
                params: CompletionParams {
                    max_tokens: 1024,
                    temperature: 0.0,
                    stop: Vec::new(),
                },
            },
        }
    }

    pub fn messages(&self, system_prompt: &str, user_prompt: &str) -> Vec<Value> {
        vec![
            message(self.system_role, system_prompt),
            message(self.user_role, user_prompt),
        ]
    }
}

/// Round-robin over every instance serving one model.
pub struct Router {
    model: String,
    entries: Vec<AccessEntry>,
    next: AtomicUsize,
    config: PromptConfig,
    http: reqwest::Client,
}

impl Router {
    pub fn new(model: &str, entries: Vec<AccessEntry>, http: reqwest::Client) -> anyhow::Result<Self> {
        if entries.is_empty() {
            anyhow::bail!("no endpoints recorded for {model}");
        }
        Ok(Self {
            model: model.to_string(),
            entries,
            next: AtomicUsize::new(0),
            config: PromptConfig::for_model(model),
            http,
        })
    }

    pub async fn load(access_dir: &Path, model: &str, http: reqwest::Client) -> anyhow::Result<Self> {
        let path = access_info_path(access_dir, model);
        let entries = read_access_info(&path)
            .await
            .with_context(|| format!("failed to read access info {}", path.display()))?;
        Self::new(model, entries, http)
    }

    pub fn instances(&self) -> usize {
        self.entries.len()
    }

    fn pick(&self) -> &AccessEntry {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.entries.len();
        &self.entries[i]
    }

    pub async fn ask(&self, user_prompt: &str) -> anyhow::Result<String> {
        let entry = self.pick();
        let messages = self.config.messages(SYSTEM_PROMPT, user_prompt);
        chat_completion(
            &self.http,
            entry.api_base(),
            Some(entry.litellm_params.api_key.as_str()),
            &self.model,
            &messages,
            &self.config.params,
        )
        .await
    }
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub output_dir: PathBuf,
    pub concurrent_tasks_per_instance: usize,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSummary {
    pub ok: usize,
    pub failed: usize,
}

/// `<output_dir>/<model>.jsonl`.
pub fn output_path(output_dir: &Path, model: &str) -> PathBuf {
    output_dir.join(format!("{model}.jsonl"))
}

/// Send the readiness message then `samples` requests, writing one JSON line per result.
pub async fn probe_model(router: &Router, opts: &ProbeOptions) -> anyhow::Result<ProbeSummary> {
    let ready = format!("Print out the text: {} ready!", router.model);
    match router.ask(&ready).await {
        Ok(reply) => println!("Router for {} established successfully - {reply}", router.model),
        Err(e) => tracing::warn!(model=%router.model, error=%format!("{e:#}"), "readiness request failed"),
    }

    let path = output_path(&opts.output_dir, &router.model);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut out = fs::File::create(&path).await?;

    let limit = (opts.concurrent_tasks_per_instance * router.instances()).max(1);
    let mut results = stream::iter(0..opts.samples)
        .map(|_| async move {
            match router.ask(SAMPLE_PROMPT).await {
                Ok(response) => json!({ "response": response, "user_prompt": SAMPLE_PROMPT }),
                Err(e) => json!({ "error": format!("{e:#}") }),
            }
        })
        .buffer_unordered(limit);

    let mut summary = ProbeSummary { ok: 0, failed: 0 };
    while let Some(line) = results.next().await {
        if line.get("error").is_some() {
            summary.failed += 1;
        } else {
            summary.ok += 1;
        }
        out.write_all(serde_json::to_string(&line)?.as_bytes()).await?;
        out.write_all(b"\n").await?;
    }
    out.flush().await?;

    tracing::info!(model=%router.model, ok = summary.ok, failed = summary.failed, output=%path.display(), "probe finished");
    Ok(summary)
}

/// Probe every model concurrently. A model that fails to load is reported and skipped.
pub async fn probe_models(
    access_dir: &Path,
    models: &[String],
    opts: &ProbeOptions,
    http: reqwest::Client,
) -> Vec<(String, anyhow::Result<ProbeSummary>)> {
    let runs = models.iter().map(|model| {
        let http = http.clone();
        async move {
            println!("Establishing router for {model}");
            let res = match Router::load(access_dir, model, http).await {
                Ok(router) => probe_model(&router, opts).await,
                Err(e) => Err(e),
            };
            (model.clone(), res)
        }
    });
    futures_util::future::join_all(runs).await
}

/// Send one chat request to every endpoint until all of them answer.
pub async fn wait_until_ready(
    http: &reqwest::Client,
    model: &str,
    entries: &[AccessEntry],
    interval: Duration,
) -> anyhow::Result<()> {
    let config = PromptConfig::for_model(model);
    let messages = config.messages(SYSTEM_PROMPT, &format!("Print out the text: {model} ready!"));
    let mut pending: Vec<&AccessEntry> = entries.iter().collect();

    loop {
        let checks = pending.iter().map(|entry| {
            let messages = &messages;
            let config = &config;
            async move {
                let res = chat_completion(
                    http,
                    entry.api_base(),
                    Some(entry.litellm_params.api_key.as_str()),
                    model,
                    messages,
                    &config.params,
                )
                .await;
                (*entry, res.is_ok())
            }
        });
        let results = futures_util::future::join_all(checks).await;

        pending = results
            .into_iter()
            .filter_map(|(entry, ok)| {
                if ok {
                    println!("Accessible: {}", entry.api_base());
                    None
                } else {
                    Some(entry)
                }
            })
            .collect();

        if pending.is_empty() {
            println!("All {} instances of {model} are ready", entries.len());
            return Ok(());
        }
        println!(
            "{}/{} not accessible yet. Waiting for {}s...",
            pending.len(),
            entries.len(),
            interval.as_secs()
        );
        tokio::time::sleep(interval).await;
    }
}

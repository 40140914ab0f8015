//! Scriptable stand-ins for the host probe and the model runtime.

#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use local_chat_bridge::core::chat::{ChatRequest, Role};
use local_chat_bridge::core::events::{OutboundEvent, ProgressReport, ProgressSink, UiEndpoints};
use local_chat_bridge::core::traits::{
    AppConfig, CapabilityProbe, ChatEngine, EngineHandle, EngineOptions, ModelRecord,
    ModelRuntime, RuntimeLoader,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct StaticProbe(pub bool);

#[async_trait]
impl CapabilityProbe for StaticProbe {
    async fn probe(&self) -> bool {
        self.0
    }
}

pub struct MockLoader {
    runtime: Arc<MockRuntime>,
    load_error: Option<String>,
    loads: AtomicUsize,
}

impl MockLoader {
    pub fn new(runtime: MockRuntime) -> Arc<Self> {
        Arc::new(Self {
            runtime: Arc::new(runtime),
            load_error: None,
            loads: AtomicUsize::new(0),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            runtime: Arc::new(MockRuntime::default()),
            load_error: Some(message.to_owned()),
            loads: AtomicUsize::new(0),
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn runtime(&self) -> &MockRuntime {
        &self.runtime
    }
}

#[async_trait]
impl RuntimeLoader for MockLoader {
    async fn load(&self) -> anyhow::Result<Arc<dyn ModelRuntime>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match &self.load_error {
            Some(message) => Err(anyhow!("{message}")),
            None => {
                let runtime: Arc<dyn ModelRuntime> = self.runtime.clone();
                Ok(runtime)
            }
        }
    }
}

#[derive(Default)]
pub struct MockRuntime {
    pub catalog: Vec<ModelRecord>,
    pub create_error: Option<String>,
    pub new_error: Option<String>,
    pub progress_steps: Vec<ProgressReport>,
    pub engine: Arc<MockEngine>,
    pub created: Mutex<Vec<(String, Option<AppConfig>)>>,
}

impl MockRuntime {
    pub fn with_progress(steps: &[&str]) -> Self {
        let total = steps.len() as f64;
        Self {
            progress_steps: steps
                .iter()
                .enumerate()
                .map(|(i, text)| ProgressReport {
                    progress: (i + 1) as f64 / total,
                    time_elapsed: i as f64,
                    text: text.to_string(),
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn created(&self) -> Vec<(String, Option<AppConfig>)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelRuntime for MockRuntime {
    fn catalog(&self) -> Vec<ModelRecord> {
        self.catalog.clone()
    }

    async fn create_engine(
        &self,
        model_id: &str,
        options: EngineOptions,
    ) -> anyhow::Result<EngineHandle> {
        self.created
            .lock()
            .unwrap()
            .push((model_id.to_owned(), options.app_config.clone()));
        if let Some(message) = &self.create_error {
            return Err(anyhow!("{message}"));
        }

        for step in &self.progress_steps {
            options.progress.report(step.clone());
        }
        let engine: EngineHandle = self.engine.clone();
        Ok(engine)
    }

    async fn new_engine(&self, options: EngineOptions) -> anyhow::Result<EngineHandle> {
        if let Some(message) = &self.new_error {
            return Err(anyhow!("{message}"));
        }

        self.engine.progress_steps.lock().unwrap().extend(
            self.progress_steps
                .iter()
                .cloned()
                .map(|step| (step, options.progress.clone())),
        );
        let engine: EngineHandle = self.engine.clone();
        Ok(engine)
    }
}

/// Answers with the user message as content, except for a few scripted
/// prompts:
///
/// - `fail*`: the completion fails
/// - `no-content`: a reply without choices
/// - `slow*`: answers after 50 ms
#[derive(Default)]
pub struct MockEngine {
    pub reload_error: Option<String>,
    pub reloads: Mutex<Vec<(String, Option<AppConfig>)>>,
    pub completions: AtomicUsize,
    progress_steps: Mutex<Vec<(ProgressReport, ProgressSink)>>,
}

impl MockEngine {
    pub fn failing_reload(message: &str) -> Self {
        Self {
            reload_error: Some(message.to_owned()),
            ..Self::default()
        }
    }

    pub fn reloads(&self) -> Vec<(String, Option<AppConfig>)> {
        self.reloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatEngine for MockEngine {
    async fn reload(&self, model_id: &str, app_config: Option<AppConfig>) -> anyhow::Result<()> {
        self.reloads
            .lock()
            .unwrap()
            .push((model_id.to_owned(), app_config));
        if let Some(message) = &self.reload_error {
            return Err(anyhow!("{message}"));
        }

        for (step, sink) in self.progress_steps.lock().unwrap().drain(..) {
            sink.report(step);
        }
        Ok(())
    }

    async fn chat_completion(&self, request: ChatRequest) -> anyhow::Result<Value> {
        self.completions.fetch_add(1, Ordering::SeqCst);

        let message = request
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if message.starts_with("fail") {
            return Err(anyhow!("engine exploded"));
        }
        if message == "no-content" {
            return Ok(json!({"choices": []}));
        }
        if message.starts_with("slow") {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        Ok(json!({"choices": [{"message": {"content": message}}]}))
    }
}

pub fn record(model_id: &str, model: &str) -> ModelRecord {
    ModelRecord {
        model_id: Some(model_id.to_owned()),
        model: Some(model.to_owned()),
    }
}

/// Events already delivered to the UI.
pub fn drain(ui: &mut UiEndpoints) -> Vec<OutboundEvent> {
    let mut events = Vec::new();
    while let Ok(payload) = ui.from_bridge.try_recv() {
        events.push(OutboundEvent::from_payload(&payload).expect("valid event payload"));
    }
    events
}

/// Waits for the next event delivered to the UI.
pub async fn next_event(ui: &mut UiEndpoints) -> OutboundEvent {
    let payload = tokio::time::timeout(Duration::from_secs(5), ui.from_bridge.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("outbound channel closed");
    OutboundEvent::from_payload(&payload).expect("valid event payload")
}

//! Llama GGUF models on a wgpu device, through `wgml`.
//!
//! Each engine owns a background task holding the GPU instance and the
//! loaded weights. Loads and completions are sent to it over a task queue and
//! run one at a time.

use crate::core::chat::ChatRequest;
use crate::core::events::{ProgressReport, ProgressSink};
use crate::core::traits::{
    AppConfig, ChatEngine, EngineHandle, EngineOptions, ModelRecord, ModelRuntime, RuntimeLoader,
};
use crate::infrastructure::catalog;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use nalgebra::DVector;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;
use wgcore::gpu::GpuInstance;
use wgcore::kernel::CommandEncoderExt;
use wgcore::shapes::ViewShapeBuffers;
use wgml::gguf::Gguf;
use wgml::models::gpt2::Gpt2Tokenizer;
use wgml::models::llama2::cpu::Llama2Config;
use wgml::models::llama2::{Llama2, Llama2State, Llama2Weights, LlamaModelType};

/// Used when a GGUF file carries no `tokenizer.chat_template`.
pub const FALLBACK_CHAT_TEMPLATE: &str = "{{ bos_token }}{% for message in messages %}<|start_header_id|>{{ message.role }}<|end_header_id|>\n\n{{ message.content }}<|eot_id|>{% endfor %}{% if add_generation_prompt %}<|start_header_id|>assistant<|end_header_id|>\n\n{% endif %}";

const TASK_QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct WgmlSettings {
    pub models_dir: PathBuf,
    pub context_size: usize,
    pub max_completion_tokens: usize,
}

pub struct WgmlLoader {
    settings: WgmlSettings,
}

impl WgmlLoader {
    pub fn new(settings: WgmlSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl RuntimeLoader for WgmlLoader {
    async fn load(&self) -> anyhow::Result<Arc<dyn ModelRuntime>> {
        let catalog = match catalog::scan(&self.settings.models_dir).await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!("Model catalog unavailable: {e:#}");
                Vec::new()
            }
        };
        info!("Found {} model(s) in the catalog", catalog.len());

        Ok(Arc::new(WgmlRuntime {
            settings: self.settings.clone(),
            catalog,
        }))
    }
}

pub struct WgmlRuntime {
    settings: WgmlSettings,
    catalog: Vec<ModelRecord>,
}

#[async_trait]
impl ModelRuntime for WgmlRuntime {
    fn catalog(&self) -> Vec<ModelRecord> {
        self.catalog.clone()
    }

    async fn create_engine(
        &self,
        model_id: &str,
        options: EngineOptions,
    ) -> anyhow::Result<EngineHandle> {
        let app_config = options.app_config.clone();
        let engine = WgmlEngine::spawn(self.settings.clone(), options.progress).await?;
        engine.reload(model_id, app_config).await?;
        Ok(Arc::new(engine))
    }

    async fn new_engine(&self, options: EngineOptions) -> anyhow::Result<EngineHandle> {
        let engine = WgmlEngine::spawn(self.settings.clone(), options.progress).await?;
        Ok(Arc::new(engine))
    }
}

pub struct WgmlEngine {
    settings: WgmlSettings,
    progress: ProgressSink,
    task_sender: mpsc::Sender<Command>,
}

impl WgmlEngine {
    /// Creates the GPU instance and starts the background task, with no
    /// model loaded yet.
    pub async fn spawn(settings: WgmlSettings, progress: ProgressSink) -> anyhow::Result<Self> {
        let gpu = GpuInstance::new()
            .await
            .map_err(|e| anyhow!("failed to create GPU instance: {e:?}"))?;
        info!("GPU device created.");

        let (task_sender, task_receiver) = mpsc::channel(TASK_QUEUE_CAPACITY);
        tokio::spawn(background_task(gpu, settings.context_size, task_receiver));

        Ok(Self {
            settings,
            progress,
            task_sender,
        })
    }

    async fn submit<T>(
        &self,
        command: Command,
        receiver: oneshot::Receiver<anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        self.task_sender
            .send(command)
            .await
            .map_err(|_| anyhow!("engine task stopped"))?;
        receiver
            .await
            .map_err(|_| anyhow!("engine task dropped the request"))?
    }
}

#[async_trait]
impl ChatEngine for WgmlEngine {
    async fn reload(&self, model_id: &str, app_config: Option<AppConfig>) -> anyhow::Result<()> {
        let path = catalog::resolve_model_path(
            model_id,
            app_config.as_ref(),
            &self.settings.models_dir,
        )?;
        let (return_channel, receiver) = oneshot::channel();

        self.submit(
            Command::Load {
                model_id: model_id.to_owned(),
                path,
                progress: self.progress.clone(),
                return_channel,
            },
            receiver,
        )
        .await
    }

    async fn chat_completion(&self, request: ChatRequest) -> anyhow::Result<Value> {
        let (task, receiver) = InferenceTask::new(request, self.settings.max_completion_tokens);
        let generation = self.submit(Command::Generate(task), receiver).await?;
        Ok(completion_json(&generation))
    }
}

enum Command {
    Load {
        model_id: String,
        path: PathBuf,
        progress: ProgressSink,
        return_channel: oneshot::Sender<anyhow::Result<()>>,
    },
    Generate(InferenceTask),
}

pub struct InferenceTask {
    request: ChatRequest,
    max_tokens: usize,
    return_channel: oneshot::Sender<anyhow::Result<Generation>>,
}

impl InferenceTask {
    pub fn new(
        request: ChatRequest,
        max_tokens: usize,
    ) -> (InferenceTask, oneshot::Receiver<anyhow::Result<Generation>>) {
        let (sender, receiver) = oneshot::channel();

        (
            InferenceTask {
                request,
                max_tokens,
                return_channel: sender,
            },
            receiver,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub model_id: String,
    pub text: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub finish_reason: &'static str,
}

/// Shapes a generation like an OpenAI chat completion.
pub fn completion_json(generation: &Generation) -> Value {
    json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4()),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": generation.model_id,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": generation.text,
            },
            "finish_reason": generation.finish_reason,
        }],
        "usage": {
            "prompt_tokens": generation.prompt_tokens,
            "completion_tokens": generation.completion_tokens,
            "total_tokens": generation.prompt_tokens + generation.completion_tokens,
        },
    })
}

async fn background_task(gpu: GpuInstance, context_size: usize, mut task_queue: mpsc::Receiver<Command>) {
    let mut loaded: Option<LoadedModel> = None;

    while let Some(command) = task_queue.recv().await {
        match command {
            Command::Load {
                model_id,
                path,
                progress,
                return_channel,
            } => {
                // Free the previous weights before uploading new ones.
                loaded = None;
                let result = LoadedModel::load(&gpu, model_id, &path, context_size, &progress)
                    .await
                    .map(|model| loaded = Some(model));
                let _ = return_channel.send(result);
            }
            Command::Generate(task) => {
                let result = match &loaded {
                    Some(model) => model.generate(&gpu, &task.request, task.max_tokens).await,
                    None => Err(anyhow!("no model loaded; reload a model first")),
                };
                let _ = task.return_channel.send(result);
            }
        }
    }

    debug!("Engine task queue closed");
}

struct LoadedModel {
    model_id: String,
    transformer: Llama2,
    config: Llama2Config,
    weights: Llama2Weights,
    tokenizer: Gpt2Tokenizer,
    state: Llama2State,
    view_shapes: ViewShapeBuffers,
    chat_template: String,
}

fn progress_report(progress: f64, start: Instant, text: impl Into<String>) -> ProgressReport {
    ProgressReport {
        progress,
        time_elapsed: start.elapsed().as_secs_f64(),
        text: text.into(),
    }
}

impl LoadedModel {
    async fn load(
        gpu: &GpuInstance,
        model_id: String,
        path: &Path,
        context_size: usize,
        progress: &ProgressSink,
    ) -> anyhow::Result<LoadedModel> {
        let start = Instant::now();
        info!("Loading model: {}", path.display());
        progress.report(progress_report(
            0.0,
            start,
            format!("Loading model file {}", path.display()),
        ));

        let gguf_file = File::open(path)
            .await
            .with_context(|| format!("failed to open model file {}", path.display()))?;
        // The file is treated as read-only for the lifetime of the map.
        let gguf_mmap = unsafe { memmap2::Mmap::map(&gguf_file) }.context("failed to map model file")?;
        let gguf = Gguf::from_bytes(&gguf_mmap[..]).map_err(|e| anyhow!("bad gguf: {e:?}"))?;
        info!(
            "GGUF model loaded in {:.2} seconds.",
            start.elapsed().as_secs_f32()
        );
        progress.report(progress_report(0.25, start, "Parsed GGUF metadata"));

        let chat_template = match gguf.metadata.get("tokenizer.chat_template") {
            Some(template) => template.as_string().to_owned(),
            None => {
                warn!("Model has no chat template; using the built-in one");
                FALLBACK_CHAT_TEMPLATE.to_owned()
            }
        };

        let device = gpu.device();
        let transformer = Llama2::new(device, LlamaModelType::Llama)
            .map_err(|e| anyhow!("failed to create Llama model on the GPU: {e:?}"))?;

        let mut config = Llama2Config::from_gguf(&gguf);
        config.seq_len = config.seq_len.min(context_size);

        progress.report(progress_report(0.5, start, "Uploading weights to the GPU"));
        let weights = Llama2Weights::from_gguf(device, &config, &gguf);
        let tokenizer = Gpt2Tokenizer::from_gguf(&gguf);
        let state = Llama2State::new(device, &config);

        progress.report(progress_report(
            1.0,
            start,
            format!(
                "Finish loading on GPU in {:.2} seconds",
                start.elapsed().as_secs_f32()
            ),
        ));

        Ok(LoadedModel {
            model_id,
            transformer,
            config,
            weights,
            tokenizer,
            state,
            view_shapes: ViewShapeBuffers::new(),
            chat_template,
        })
    }

    fn render_prompt(&self, request: &ChatRequest) -> anyhow::Result<String> {
        let mut chat_template_env = minijinja::Environment::new();
        chat_template_env.set_trim_blocks(true);
        chat_template_env.add_global("bos_token", self.tokenizer.bos_str());
        chat_template_env.add_global("eos_token", self.tokenizer.eos_str());
        chat_template_env.add_global("add_generation_prompt", true);
        chat_template_env.add_template("main", &self.chat_template)?;

        Ok(chat_template_env
            .get_template("main")?
            .render(request.as_jinja_input())?)
    }

    async fn generate(
        &self,
        gpu: &GpuInstance,
        request: &ChatRequest,
        max_tokens: usize,
    ) -> anyhow::Result<Generation> {
        let config = &self.config;
        let state = &self.state;
        let weights = &self.weights;

        let prompt_str = self.render_prompt(request)?;
        let prompt_tokens = self.tokenizer.encode(&prompt_str);
        if prompt_tokens.is_empty() {
            return Err(anyhow!("prompt encoded to zero tokens"));
        }
        if prompt_tokens.len() >= config.seq_len {
            return Err(anyhow!(
                "prompt is {} tokens, context holds {}",
                prompt_tokens.len(),
                config.seq_len
            ));
        }

        let mut token = prompt_tokens[0];
        let mut logits = DVector::zeros(config.vocab_size);
        let mut sampler = wgml::models::sampler::Sampler::new(logits.len(), 0.9, 0.95);
        self.view_shapes.clear_tmp();

        let inference_start = Instant::now();
        let mut prefill_time = Instant::now();
        let mut generated_tokens = Vec::new();
        let mut finish_reason = "length";

        for pos in 0..config.seq_len {
            let is_prefill = pos < prompt_tokens.len() - 1;

            let (rope_config, rms_norm_config, attn_params) = config.derived_configs(pos as u32);

            let mut encoder = gpu.device().create_command_encoder(&Default::default());
            gpu.queue().write_buffer(
                state.rope_config().buffer(),
                0,
                bytemuck::cast_slice(&[rope_config]),
            );
            gpu.queue().write_buffer(
                state.rms_norm_config().buffer(),
                0,
                bytemuck::cast_slice(&[rms_norm_config]),
            );
            gpu.queue().write_buffer(
                state.attn_params().buffer(),
                0,
                bytemuck::cast_slice(&[attn_params]),
            );

            if token < (config.vocab_size / 2) {
                state
                    .x
                    .copy_from_view(&mut encoder, weights.token_embd.column(token as u32));
            } else {
                state.x.copy_from_view(
                    &mut encoder,
                    weights
                        .token_embd
                        .column((token - config.vocab_size / 2) as u32),
                );
            }

            if pos % 50 == 0 {
                if is_prefill {
                    debug!("Prefilling token {pos}");
                } else {
                    debug!("Generating token {pos}");
                }
            }

            let mut compute_pass = encoder.compute_pass("transformer", None);
            self.transformer.dispatch(
                gpu.device(),
                &self.view_shapes,
                gpu.queue(),
                &mut compute_pass,
                state,
                weights,
                config,
                &attn_params,
                pos as u32,
            );
            drop(compute_pass);

            if !is_prefill {
                state
                    .logits_readback()
                    .copy_from(&mut encoder, state.logits());

                gpu.queue().submit(Some(encoder.finish()));

                state
                    .logits_readback()
                    .read_to(gpu.device(), logits.as_mut_slice())
                    .await
                    .map_err(|e| anyhow!("failed to read logits from the GPU: {e:?}"))?;
            } else {
                gpu.queue().submit(Some(encoder.finish()));
            }

            if pos + 1 >= prompt_tokens.len() {
                let next_token = sampler.sample(&mut logits);

                if next_token == self.tokenizer.eos() {
                    finish_reason = "stop";
                    break;
                }

                generated_tokens.push(next_token as u32);
                if generated_tokens.len() >= max_tokens {
                    break;
                }

                token = next_token;
            } else {
                token = prompt_tokens[pos + 1];

                prefill_time = Instant::now();
            }
        }

        let total_generated = generated_tokens.len();
        let total_duration = inference_start.elapsed();
        let prefill_duration = prefill_time - inference_start;
        let generation_duration = total_duration.saturating_sub(prefill_duration);

        info!("Inference done, total time: {total_duration:?} for {total_generated} tokens.");
        info!(
            "Prefill time: {prefill_duration:?}, or {:.2} tokens/s",
            (prompt_tokens.len() as f32) / prefill_duration.as_secs_f32()
        );
        info!(
            "Generation time: {generation_duration:?} or {:.2} tokens/s",
            (total_generated as f32) / generation_duration.as_secs_f32()
        );

        Ok(Generation {
            model_id: self.model_id.clone(),
            text: self.tokenizer.decode(&generated_tokens),
            prompt_tokens: prompt_tokens.len(),
            completion_tokens: total_generated,
            finish_reason,
        })
    }
}

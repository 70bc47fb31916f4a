//! Advisory pipeline orchestrator
//!
//! Runs one chat turn through the stages in strict order:
//! classify → plan → scope (+ runtime) → preflight → retrieval → prompt →
//! generate → validate. The sync and streaming entry points share the same
//! stage code; streaming additionally reports progress through an [`EventSink`].

use crate::classifier::IntentClassifier;
use crate::config::Timeouts;
use crate::error::AdvisorError;
use crate::knowledge::{KnowledgeBundle, KnowledgeRetriever};
use crate::models::{ChatResponse, Intent, PipelineMeta, PreflightStatus, ProviderReply};
use crate::planner::{plan_turn, Planner};
use crate::preflight::{refusal_message, run_preflight};
use crate::prompt::{build_messages, PromptInput};
use crate::provider::{key_fingerprint, ChatProvider, ProviderCall};
use crate::request::ChatTurn;
use crate::runtime::{should_build_runtime, RuntimeContextBuilder};
use crate::scope::scope_context;
use crate::stream::{
    relay_stream, EventSink, StreamEvent, PROGRESS_DONE, PROGRESS_GENERATION_START,
    PROGRESS_RETRY,
};
use crate::verification::{validate_with_retry, AnswerValidator};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Stage progress reported to streaming clients
mod progress {
    pub const CLASSIFY: u8 = 5;
    pub const PLAN: u8 = 15;
    pub const CONTEXT: u8 = 25;
    pub const PREFLIGHT: u8 = 32;
    pub const RETRIEVAL: u8 = 38;
}

pub struct AdvisorPipeline {
    planner: Arc<dyn Planner>,
    provider: Arc<dyn ChatProvider>,
    runtime: RuntimeContextBuilder,
    knowledge: KnowledgeRetriever,
    validator: AnswerValidator,
    timeouts: Timeouts,
}

impl AdvisorPipeline {
    pub fn new(
        planner: Arc<dyn Planner>,
        provider: Arc<dyn ChatProvider>,
        runtime: RuntimeContextBuilder,
        knowledge: KnowledgeRetriever,
        validator: AnswerValidator,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            planner,
            provider,
            runtime,
            knowledge,
            validator,
            timeouts,
        }
    }

    /// Answer a turn synchronously
    pub async fn run(&self, turn: ChatTurn) -> Result<ChatResponse> {
        self.execute(turn, None).await
    }

    /// Answer a turn as a stream of events; ends with one `result` or `error`
    pub async fn run_stream(&self, turn: ChatTurn, sink: EventSink) -> Result<()> {
        let request_id = turn.request_id.clone();

        match self.execute(turn, Some(&sink)).await {
            Ok(response) => {
                sink.send(StreamEvent::Final {
                    result: Box::new(response),
                    progress_pct: PROGRESS_DONE,
                })
                .await
            }
            Err(AdvisorError::Cancelled) => {
                info!(request_id = %request_id, "Client went away, stream abandoned");
                Err(AdvisorError::Cancelled)
            }
            Err(e) => {
                warn!(request_id = %request_id, "Streamed turn failed: {}", e);
                sink.send(StreamEvent::Error {
                    error: e.to_string(),
                    progress_pct: PROGRESS_DONE,
                })
                .await
            }
        }
    }

    async fn execute(&self, turn: ChatTurn, sink: Option<&EventSink>) -> Result<ChatResponse> {
        let start_time = Instant::now();
        let mut warnings = Vec::new();
        let mut meta = PipelineMeta {
            request_id: turn.request_id.clone(),
            ..Default::default()
        };

        info!(
            request_id = %turn.request_id,
            provider = %turn.provider,
            model = %turn.model,
            key = %key_fingerprint(&turn.api_key),
            streaming = sink.is_some(),
            "Pipeline: starting turn"
        );

        // === CLASSIFY ===
        report(sink, "classify", progress::CLASSIFY).await?;
        let intent = IntentClassifier::classify(&turn.user_message, &turn.history);
        meta.classified_intent = Some(intent);
        debug!(request_id = %turn.request_id, intent = %intent, "Intent classified");

        // === PLAN ===
        report(sink, "plan", progress::PLAN).await?;
        let outcome = plan_turn(self.planner.as_ref(), &turn, intent).await;
        if outcome.model_called {
            meta.model_calls += 1;
        }
        meta.planner_used = outcome.model_called && outcome.warning.is_none();
        warnings.extend(outcome.warning);
        let plan = outcome.plan;
        meta.plan = Some(plan.clone());

        if let Some(question) = plan.clarification_question() {
            info!(request_id = %turn.request_id, "Planner asked for clarification");
            meta.clarification = true;
            let answer = question.to_string();
            let reply = reply_without_model(&turn, answer);
            return Ok(self.respond(&turn, plan.intent, meta, warnings, reply));
        }

        // === CONTEXT ===
        report(sink, "context", progress::CONTEXT).await?;
        let mut context = turn.context.clone();
        scope_context(&mut context, &plan);

        meta.runtime_requested = should_build_runtime(plan.intent, &turn.user_message);
        if meta.runtime_requested {
            context.runtime = self.runtime.build(turn.locale).await;
            meta.runtime_available = context.runtime.available;
        }

        // === PREFLIGHT ===
        report(sink, "preflight", progress::PREFLIGHT).await?;
        let preflight = run_preflight(&plan, &context, meta.runtime_requested, turn.locale);
        meta.preflight = Some(preflight.clone());

        if preflight.status == PreflightStatus::Fail {
            info!(
                request_id = %turn.request_id,
                missing = ?preflight.missing,
                "Preflight failed, skipping generation"
            );
            let reply = reply_without_model(&turn, refusal_message(&preflight, turn.locale));
            return Ok(self.respond(&turn, plan.intent, meta, warnings, reply));
        }

        // === RETRIEVAL ===
        report(sink, "retrieval", progress::RETRIEVAL).await?;
        let knowledge: KnowledgeBundle = self.knowledge.retrieve(&plan, &turn).await;
        meta.wiki_snippets = knowledge.wiki.len();
        meta.web_snippets = knowledge.web.len();
        warnings.extend(knowledge.warnings.iter().cloned());

        // === PROMPT ===
        let messages = build_messages(&PromptInput {
            turn: &turn,
            plan: &plan,
            context: &context,
            preflight: &preflight,
            knowledge: &knowledge,
            runtime_requested: meta.runtime_requested,
        });

        let call = ProviderCall {
            provider: turn.provider.clone(),
            base_url: turn.base_url.clone(),
            api_key: turn.api_key.clone(),
            model: turn.model.clone(),
            messages,
            temperature: turn.temperature,
            max_tokens: turn.max_tokens,
            timeout: self.timeouts.generation,
        };

        // === GENERATE ===
        report(sink, "generation", PROGRESS_GENERATION_START).await?;
        meta.model_calls += 1;
        let first = match sink {
            Some(sink) => self.generate_streamed(&call, sink).await?,
            None => self.provider.complete(&call).await?,
        };

        // === VALIDATE ===
        let verdict = self.validator.validate(&first.answer, plan.intent);
        if let (Some(sink), Err(reason)) = (sink, verdict) {
            debug!(request_id = %turn.request_id, reason = %reason, "Streamed answer rejected");
            sink.send(StreamEvent::progress("retry", PROGRESS_RETRY)).await?;
        }
        let validated = validate_with_retry(
            self.provider.as_ref(),
            &call,
            first,
            &self.validator,
            plan.intent,
            turn.locale,
        )
        .await;
        meta.model_calls += validated.extra_calls;
        meta.retried = validated.retried();
        warnings.extend(validated.warnings);

        info!(
            request_id = %turn.request_id,
            intent = %plan.intent,
            model_calls = meta.model_calls,
            retried = meta.retried,
            warnings = warnings.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Pipeline: turn completed"
        );

        Ok(self.respond(&turn, plan.intent, meta, warnings, validated.reply))
    }

    async fn generate_streamed(&self, call: &ProviderCall, sink: &EventSink) -> Result<ProviderReply> {
        let stream_timeout = self.timeouts.stream;
        let stream_call = ProviderCall {
            timeout: stream_timeout,
            ..call.clone()
        };
        let relay = async {
            let lines = self.provider.stream(&stream_call).await?;
            relay_stream(lines, &call.model, call.max_tokens, sink).await
        };

        tokio::time::timeout(stream_timeout, relay)
            .await
            .map_err(|_| AdvisorError::Timeout(stream_timeout.as_secs()))?
    }

    fn respond(
        &self,
        turn: &ChatTurn,
        intent: Intent,
        pipeline: PipelineMeta,
        warnings: Vec<String>,
        reply: ProviderReply,
    ) -> ChatResponse {
        ChatResponse {
            answer: reply.answer,
            provider: turn.provider.clone(),
            model: reply.model,
            assistant: turn.assistant_name.clone(),
            intent,
            pipeline,
            warnings,
            provider_id: reply.provider_message_id,
            provider_usage: reply.usage,
        }
    }
}

/// Answers produced without a generation call (clarification, refusal)
fn reply_without_model(turn: &ChatTurn, answer: String) -> ProviderReply {
    ProviderReply {
        answer,
        model: turn.model.clone(),
        ..Default::default()
    }
}

async fn report(sink: Option<&EventSink>, stage: &str, pct: u8) -> Result<()> {
    match sink {
        Some(sink) => sink.send(StreamEvent::progress(stage, pct)).await,
        None => Ok(()),
    }
}

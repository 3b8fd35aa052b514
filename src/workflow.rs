//! # Turn orchestration
//!
//! [`Orchestrator::respond`] drives one user message through the pipeline:
//!
//! ```text
//! RECEIVED -> CACHE_CHECK -+-> hit ------------------------------------------------+-> RESPOND
//!                          +-> miss -> EMBED -> RETRIEVE -> ASSEMBLE -> GENERATE     |
//!                                       -> STORE_CACHE -> UPDATE_VECTOR_STORE ------+
//! ```
//!
//! Each stage is a method over a request-scoped [`TurnContext`]. A remote failure in
//! EMBED, RETRIEVE or GENERATE ends the turn with a [`TurnFailure`] carrying the stage
//! and the original message; nothing has been written to the cache or the vector store
//! at that point. Cache problems never fail a turn, they are logged and the turn runs
//! uncached.
//!
//! New exchanges are buffered and upserted in batches (see [`Orchestrator::flush_pending`]).

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    cache::{ResponseCache, SqliteResponseCache},
    config::BotConfig,
    conversation::{ConversationTurn, HistoryMessage},
    embedding::{EmbedKind, Embedder, HuggingFaceEmbedder},
    error::{BotError, Result},
    generation::{ChatCompletionGenerator, Generator},
    persona::PersonaConfig,
    prompt,
    vector_store::{Exchange, ExchangeStore, PineconeStore},
};

/// Messages that end a conversation and trigger an upsert of the buffer.
pub const CLOSING_KEYWORDS: &[&str] = &[
    "bye",
    "goodbye",
    "see you",
    "good night",
    "gn",
    "take care",
    "ok",
    "okay",
    "okk",
    "okies",
    "thik hai",
    "tik hai",
    "achha",
    "acha",
    "thanks",
    "thank you",
    "thx",
    "ok bye",
    "ok thanks",
];

/// True if `message` contains a closing keyword as a whole word or phrase.
pub fn is_closing_message(message: &str) -> bool {
    let words: Vec<String> = message
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect();
    let padded = format!(" {} ", words.join(" "));
    CLOSING_KEYWORDS
        .iter()
        .any(|kw| padded.contains(&format!(" {kw} ")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    CacheCheck,
    Embed,
    Retrieve,
    Assemble,
    Generate,
    StoreCache,
    UpdateVectorStore,
    Respond,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "RECEIVED",
            Stage::CacheCheck => "CACHE_CHECK",
            Stage::Embed => "EMBED",
            Stage::Retrieve => "RETRIEVE",
            Stage::Assemble => "ASSEMBLE",
            Stage::Generate => "GENERATE",
            Stage::StoreCache => "STORE_CACHE",
            Stage::UpdateVectorStore => "UPDATE_VECTOR_STORE",
            Stage::Respond => "RESPOND",
        };
        f.write_str(name)
    }
}

/// The ERROR terminal state.
#[derive(Debug, Error)]
#[error("turn failed at {stage}: {error}")]
pub struct TurnFailure {
    pub stage: Stage,
    pub user_message: String,
    #[source]
    pub error: BotError,
}

/// A completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    /// Served from the cache; nothing remote was called.
    pub cached: bool,
    pub exemplars: Vec<Exchange>,
    pub elapsed: Duration,
    pub turn: ConversationTurn,
}

/// Per-request state threaded through the stages.
#[derive(Debug)]
pub struct TurnContext {
    pub turn: ConversationTurn,
    pub stage: Stage,
    pub query_vector: Option<Vec<f32>>,
    pub exemplars: Vec<Exchange>,
    started: Instant,
}

impl TurnContext {
    fn new(turn: ConversationTurn) -> Self {
        Self {
            turn,
            stage: Stage::Received,
            query_vector: None,
            exemplars: Vec::new(),
            started: Instant::now(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!("{} -> {} after {:?}", self.stage, stage, self.started.elapsed());
        self.stage = stage;
    }

    fn fail(&self, error: BotError) -> TurnFailure {
        error!(
            "Turn failed at {} after {:?}: {}",
            self.stage,
            self.started.elapsed(),
            error
        );
        TurnFailure {
            stage: self.stage,
            user_message: self.turn.user_message.clone(),
            error,
        }
    }

    fn finish(self, response: String, cached: bool) -> TurnOutcome {
        let elapsed = self.started.elapsed();
        info!(
            "{} {} in {:.2}s",
            Stage::Respond,
            if cached { "cached reply" } else { "generated reply" },
            elapsed.as_secs_f64()
        );
        TurnOutcome {
            response,
            cached,
            exemplars: self.exemplars,
            elapsed,
            turn: self.turn,
        }
    }
}

/// Knobs that shape a turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnSettings {
    pub top_k: usize,
    /// Pending exchanges that trigger an upsert.
    pub upsert_batch_size: usize,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            upsert_batch_size: 1,
        }
    }
}

pub struct Orchestrator {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn ExchangeStore>,
    generator: Arc<dyn Generator>,
    cache: Option<Arc<dyn ResponseCache>>,
    persona: PersonaConfig,
    settings: TurnSettings,
    pending: Mutex<Vec<Exchange>>,
}

impl Orchestrator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn ExchangeStore>,
        generator: Arc<dyn Generator>,
        persona: PersonaConfig,
        settings: TurnSettings,
    ) -> Self {
        Self {
            embedder,
            store,
            generator,
            cache: None,
            persona,
            settings,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Wire up the hosted clients and the SQLite cache from configuration.
    ///
    /// A cache that cannot be opened is logged and skipped.
    pub fn from_config(config: &BotConfig) -> Result<Self> {
        config.validate()?;
        let timeout = config.request_timeout();

        let orchestrator = Self::new(
            Arc::new(HuggingFaceEmbedder::new(&config.embedding, timeout)?),
            Arc::new(PineconeStore::new(&config.vector_store, timeout)?),
            Arc::new(ChatCompletionGenerator::new(&config.generation, timeout)?),
            config.persona_config()?,
            TurnSettings {
                top_k: config.top_k,
                upsert_batch_size: config.upsert_batch_size.max(1),
            },
        );

        if !config.cache.enabled {
            info!("Response cache disabled");
            return Ok(orchestrator);
        }

        let opened = config
            .cache_path()
            .and_then(|path| SqliteResponseCache::open(&path, config.cache.max_entries));
        match opened {
            Ok(cache) => Ok(orchestrator.with_cache(Arc::new(cache))),
            Err(e) => {
                warn!("Response cache unavailable, continuing without it: {}", e);
                Ok(orchestrator)
            }
        }
    }

    pub fn persona(&self) -> &PersonaConfig {
        &self.persona
    }

    pub fn settings(&self) -> TurnSettings {
        self.settings
    }

    /// Run one turn with the configured `top_k`.
    pub async fn respond(
        &self,
        user_message: &str,
        history: Vec<HistoryMessage>,
    ) -> std::result::Result<TurnOutcome, TurnFailure> {
        self.respond_with(user_message, history, self.settings.top_k)
            .await
    }

    /// Run one turn, overriding `top_k`.
    pub async fn respond_with(
        &self,
        user_message: &str,
        history: Vec<HistoryMessage>,
        top_k: usize,
    ) -> std::result::Result<TurnOutcome, TurnFailure> {
        let mut ctx = TurnContext::new(ConversationTurn::new(user_message, history));
        info!(
            "{} message ({} chars, {} history)",
            Stage::Received,
            ctx.turn.user_message.len(),
            ctx.turn.history.len()
        );
        if ctx.turn.user_message.is_empty() {
            return Err(ctx.fail(BotError::EmptyMessage));
        }

        ctx.enter(Stage::CacheCheck);
        if let Some(hit) = self.check_cache(&ctx) {
            ctx.turn.generated_response = Some(hit.clone());
            ctx.enter(Stage::Respond);
            return Ok(ctx.finish(hit, true));
        }

        ctx.enter(Stage::Embed);
        self.embed(&mut ctx).await.map_err(|e| ctx.fail(e))?;

        ctx.enter(Stage::Retrieve);
        self.retrieve(&mut ctx, top_k)
            .await
            .map_err(|e| ctx.fail(e))?;

        ctx.enter(Stage::Assemble);
        self.assemble(&mut ctx);

        ctx.enter(Stage::Generate);
        let response = self.generate(&mut ctx).await.map_err(|e| ctx.fail(e))?;

        ctx.enter(Stage::StoreCache);
        self.store_cache(&ctx, &response);

        ctx.enter(Stage::UpdateVectorStore);
        self.update_vector_store(&ctx, &response).await;

        ctx.enter(Stage::Respond);
        Ok(ctx.finish(response, false))
    }

    fn check_cache(&self, ctx: &TurnContext) -> Option<String> {
        let cache = self.cache.as_ref()?;
        match cache.lookup(&ctx.turn.user_message, &ctx.turn.history) {
            Ok(Some(hit)) => {
                info!("{} hit", Stage::CacheCheck);
                Some(hit)
            }
            Ok(None) => {
                debug!("{} miss", Stage::CacheCheck);
                None
            }
            Err(e) => {
                warn!("Cache lookup failed, continuing uncached: {}", e);
                None
            }
        }
    }

    async fn embed(&self, ctx: &mut TurnContext) -> Result<()> {
        let vector = self
            .embedder
            .embed(&ctx.turn.user_message, EmbedKind::Query)
            .await?;
        debug!("Query vector has {} dimensions", vector.len());
        ctx.query_vector = Some(vector);
        Ok(())
    }

    async fn retrieve(&self, ctx: &mut TurnContext, top_k: usize) -> Result<()> {
        let vector = ctx.query_vector.as_deref().unwrap_or_default();
        let exemplars = self.store.retrieve(vector, top_k).await?;
        info!(
            "{} {} exemplars (best score {:.3})",
            Stage::Retrieve,
            exemplars.len(),
            exemplars.first().map(|e| e.score).unwrap_or_default()
        );
        ctx.exemplars = exemplars
            .into_iter()
            .map(|mut e| {
                e.context = self.persona.anonymize(&e.context).into_owned();
                e.response = self.persona.anonymize(&e.response).into_owned();
                e
            })
            .collect();
        Ok(())
    }

    fn assemble(&self, ctx: &mut TurnContext) {
        let assembled = prompt::build(
            &self.persona,
            &ctx.exemplars,
            &ctx.turn.history,
            &ctx.turn.user_message,
        );
        debug!("Prompt is {} chars", assembled.len());
        ctx.turn.assembled_prompt = Some(assembled);
    }

    async fn generate(&self, ctx: &mut TurnContext) -> Result<String> {
        let prompt = ctx.turn.assembled_prompt.as_deref().unwrap_or_default();
        let raw = self.generator.generate(prompt).await?;

        let response = if raw.trim().is_empty() {
            warn!("Model returned an empty reply, using the fallback");
            self.persona.persona.fallback_reply().to_string()
        } else {
            self.persona.anonymize(raw.trim()).into_owned()
        };
        ctx.turn.generated_response = Some(response.clone());
        Ok(response)
    }

    fn store_cache(&self, ctx: &TurnContext, response: &str) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&ctx.turn.user_message, &ctx.turn.history, response) {
                warn!("Cache store failed: {}", e);
            }
        }
    }

    async fn update_vector_store(&self, ctx: &TurnContext, response: &str) {
        let pending = match self.pending.lock() {
            Ok(mut buffer) => {
                buffer.push(Exchange::new(ctx.turn.user_message.clone(), response));
                buffer.len()
            }
            Err(_) => {
                warn!("Pending exchange buffer poisoned, skipping vector store update");
                return;
            }
        };

        let closing = is_closing_message(&ctx.turn.user_message);
        if pending >= self.settings.upsert_batch_size || closing {
            if let Err(e) = self.flush_pending().await {
                warn!("Vector store update failed: {}", e);
            }
        } else {
            debug!("{} exchanges pending", pending);
        }
    }

    /// Number of exchanges waiting to be upserted.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|b| b.len()).unwrap_or_default()
    }

    /// Embed and upsert every buffered exchange. The buffer is emptied whether or not the
    /// upsert succeeds.
    pub async fn flush_pending(&self) -> Result<usize> {
        let batch: Vec<Exchange> = match self.pending.lock() {
            Ok(mut buffer) => buffer.drain(..).collect(),
            Err(_) => return Err(BotError::cache("pending exchange buffer poisoned")),
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let mut records = Vec::with_capacity(batch.len());
        for exchange in batch {
            let vector = self
                .embedder
                .embed(&exchange.context, EmbedKind::Passage)
                .await?;
            records.push((exchange, vector));
        }

        let written = self.store.upsert(&records).await?;
        info!("{} flushed {} exchanges", Stage::UpdateVectorStore, records.len());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::CacheStats, error::Service, persona::Persona};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeEmbedder {
        calls: AtomicUsize,
        fail: bool,
        kinds: Mutex<Vec<EmbedKind>>,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, text: &str, kind: EmbedKind) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.kinds.lock().unwrap().push(kind);
            if self.fail {
                return Err(BotError::remote(Service::Embedding, "503 Service Unavailable"));
            }
            Ok(vec![text.len() as f32, 1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    #[derive(Default)]
    struct FakeStore {
        exchanges: Vec<Exchange>,
        unreachable: bool,
        retrieves: AtomicUsize,
        upserted: Mutex<Vec<Exchange>>,
    }

    #[async_trait]
    impl ExchangeStore for FakeStore {
        async fn retrieve(&self, _vector: &[f32], top_k: usize) -> Result<Vec<Exchange>> {
            self.retrieves.fetch_add(1, Ordering::SeqCst);
            if self.unreachable {
                return Err(BotError::remote(Service::VectorStore, "connection refused"));
            }
            Ok(self.exchanges.iter().take(top_k).cloned().collect())
        }

        async fn upsert(&self, records: &[(Exchange, Vec<f32>)]) -> Result<usize> {
            let mut upserted = self.upserted.lock().unwrap();
            upserted.extend(records.iter().map(|(e, _)| e.clone()));
            Ok(records.len())
        }
    }

    struct FakeGenerator {
        reply: String,
        rate_limited: bool,
        prompts: Mutex<Vec<String>>,
    }

    impl FakeGenerator {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                rate_limited: false,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.rate_limited {
                return Err(BotError::rate_limit(Service::Generation, "quota exceeded"));
            }
            Ok(self.reply.clone())
        }
    }

    struct BrokenCache;

    impl ResponseCache for BrokenCache {
        fn lookup(&self, _: &str, _: &[HistoryMessage]) -> Result<Option<String>> {
            Err(BotError::cache("database is locked"))
        }
        fn store(&self, _: &str, _: &[HistoryMessage], _: &str) -> Result<()> {
            Err(BotError::cache("database is locked"))
        }
        fn clear(&self) -> Result<()> {
            Ok(())
        }
        fn stats(&self) -> Result<CacheStats> {
            Err(BotError::cache("database is locked"))
        }
    }

    struct Harness {
        embedder: Arc<FakeEmbedder>,
        store: Arc<FakeStore>,
        generator: Arc<FakeGenerator>,
        _dir: tempfile::TempDir,
    }

    fn persona() -> PersonaConfig {
        PersonaConfig::new(
            "iota".into(),
            Some("Riya".into()),
            Persona::default_for("iota"),
        )
        .unwrap()
    }

    fn harness(embedder: FakeEmbedder, reply: &str) -> (Orchestrator, Harness) {
        harness_with(embedder, FakeStore::default(), FakeGenerator::replying(reply))
    }

    fn harness_with(
        embedder: FakeEmbedder,
        store: FakeStore,
        generator: FakeGenerator,
    ) -> (Orchestrator, Harness) {
        let dir = tempfile::tempdir().unwrap();
        let cache = SqliteResponseCache::open(&dir.path().join("responses.db"), 100).unwrap();
        let embedder = Arc::new(embedder);
        let store = Arc::new(FakeStore {
            exchanges: vec![
                Exchange::new("kya kar rahi hai?", "kuch nahi Riya, tu bata"),
                Exchange::new("khana khaya?", "haan abhi"),
            ],
            ..store
        });
        let generator = Arc::new(generator);

        let orchestrator = Orchestrator::new(
            embedder.clone(),
            store.clone(),
            generator.clone(),
            persona(),
            TurnSettings::default(),
        )
        .with_cache(Arc::new(cache));

        (
            orchestrator,
            Harness {
                embedder,
                store,
                generator,
                _dir: dir,
            },
        )
    }

    #[tokio::test]
    async fn test_first_turn_runs_pipeline_and_upserts() {
        let (bot, h) = harness(FakeEmbedder::default(), "Kuch khaas nahi, bas chill. Tu bata?");

        let outcome = bot.respond("kya kar rahi hai?", Vec::new()).await.unwrap();

        assert!(!outcome.cached);
        assert_eq!(outcome.response, "Kuch khaas nahi, bas chill. Tu bata?");
        assert_eq!(outcome.exemplars.len(), 2);
        assert_eq!(h.generator.calls(), 1);

        let prompt = outcome.turn.assembled_prompt.unwrap();
        assert!(prompt.contains("Voice: Hinglish"));
        assert!(prompt.contains("Tone: concise and warm"));
        assert!(prompt.contains("User: kya kar rahi hai?"));
        assert!(!prompt.contains("Riya"));

        let upserted = h.store.upserted.lock().unwrap();
        assert_eq!(upserted.len(), 1);
        assert_eq!(upserted[0].context, "kya kar rahi hai?");
        assert_eq!(upserted[0].response, outcome.response);
        assert_eq!(
            *h.embedder.kinds.lock().unwrap(),
            vec![EmbedKind::Query, EmbedKind::Passage]
        );
    }

    #[tokio::test]
    async fn test_repeat_is_served_from_cache() {
        let (bot, h) = harness(FakeEmbedder::default(), "haan bol");
        let history = vec![HistoryMessage::user("hi"), HistoryMessage::assistant("hello")];

        let first = bot.respond("Kya kar rahi hai?", history.clone()).await.unwrap();
        let embeds_after_first = h.embedder.calls.load(Ordering::SeqCst);
        let second = bot.respond("  kya kar rahi hai?  ", history).await.unwrap();

        assert!(second.cached);
        assert_eq!(second.response, first.response);
        assert_eq!(h.generator.calls(), 1);
        assert_eq!(h.store.retrieves.load(Ordering::SeqCst), 1);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), embeds_after_first);
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts_before_writes() {
        let failing = FakeEmbedder {
            fail: true,
            ..Default::default()
        };
        let (bot, h) = harness(failing, "unused");

        let failure = bot.respond("kya kar rahi hai?", Vec::new()).await.unwrap_err();

        assert_eq!(failure.stage, Stage::Embed);
        assert_eq!(failure.user_message, "kya kar rahi hai?");
        assert!(failure.error.is_remote());
        assert_eq!(h.generator.calls(), 0);
        assert!(h.store.upserted.lock().unwrap().is_empty());
        assert_eq!(bot.pending_len(), 0);

        // Still a miss: the failed turn cached nothing.
        let stats = bot.cache.as_ref().unwrap().stats().unwrap();
        assert_eq!(stats.total_entries, 0);
    }

    #[tokio::test]
    async fn test_retrieval_failure_aborts_before_writes() {
        let store = FakeStore {
            unreachable: true,
            ..Default::default()
        };
        let (bot, h) = harness_with(
            FakeEmbedder::default(),
            store,
            FakeGenerator::replying("unused"),
        );

        let failure = bot.respond("kya kar rahi hai?", Vec::new()).await.unwrap_err();

        assert_eq!(failure.stage, Stage::Retrieve);
        assert!(matches!(
            failure.error,
            BotError::RemoteService {
                service: Service::VectorStore,
                ..
            }
        ));
        assert_eq!(h.generator.calls(), 0);
        assert!(h.store.upserted.lock().unwrap().is_empty());
        assert_eq!(bot.pending_len(), 0);
        let stats = bot.cache.as_ref().unwrap().stats().unwrap();
        assert_eq!(stats.total_entries, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_generation_aborts_before_writes() {
        let generator = FakeGenerator {
            rate_limited: true,
            ..FakeGenerator::replying("unused")
        };
        let (bot, h) = harness_with(FakeEmbedder::default(), FakeStore::default(), generator);

        let failure = bot.respond("kya kar rahi hai?", Vec::new()).await.unwrap_err();

        assert_eq!(failure.stage, Stage::Generate);
        assert!(matches!(
            failure.error,
            BotError::RateLimit {
                service: Service::Generation,
                ..
            }
        ));
        assert_eq!(h.generator.calls(), 1);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 1);
        assert!(h.store.upserted.lock().unwrap().is_empty());
        assert_eq!(bot.pending_len(), 0);
        let stats = bot.cache.as_ref().unwrap().stats().unwrap();
        assert_eq!(stats.total_entries, 0);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let (bot, h) = harness(FakeEmbedder::default(), "unused");
        let failure = bot.respond("   ", Vec::new()).await.unwrap_err();
        assert_eq!(failure.stage, Stage::Received);
        assert!(matches!(failure.error, BotError::EmptyMessage));
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_reply_uses_fallback_and_reply_is_anonymized() {
        let (bot, _h) = harness(FakeEmbedder::default(), "   ");
        let outcome = bot.respond("hello", Vec::new()).await.unwrap();
        assert_eq!(outcome.response, "Okay, bol na… 🙂");

        let (bot, _h) = harness(FakeEmbedder::default(), "RIYA is busy");
        let outcome = bot.respond("hello", Vec::new()).await.unwrap();
        assert_eq!(outcome.response, "iota is busy");
    }

    #[tokio::test]
    async fn test_broken_cache_degrades_to_uncached() {
        let embedder = Arc::new(FakeEmbedder::default());
        let generator = Arc::new(FakeGenerator::replying("haan"));
        let bot = Orchestrator::new(
            embedder,
            Arc::new(FakeStore::default()),
            generator.clone(),
            persona(),
            TurnSettings::default(),
        )
        .with_cache(Arc::new(BrokenCache));

        assert!(!bot.respond("hi", Vec::new()).await.unwrap().cached);
        assert!(!bot.respond("hi", Vec::new()).await.unwrap().cached);
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_buffer_flushes_on_batch_size_or_closing_keyword() {
        let store = Arc::new(FakeStore::default());
        let bot = Orchestrator::new(
            Arc::new(FakeEmbedder::default()),
            store.clone(),
            Arc::new(FakeGenerator::replying("acha")),
            persona(),
            TurnSettings {
                top_k: 3,
                upsert_batch_size: 10,
            },
        );

        bot.respond("hi", Vec::new()).await.unwrap();
        bot.respond("kya scene?", Vec::new()).await.unwrap();
        assert_eq!(bot.pending_len(), 2);
        assert!(store.upserted.lock().unwrap().is_empty());

        bot.respond("ok bye", Vec::new()).await.unwrap();
        assert_eq!(bot.pending_len(), 0);
        assert_eq!(store.upserted.lock().unwrap().len(), 3);

        assert_eq!(bot.flush_pending().await.unwrap(), 0);
    }

    #[test]
    fn test_closing_keywords_match_whole_words() {
        assert!(is_closing_message("Ok bye!"));
        assert!(is_closing_message("chalo, good night"));
        assert!(is_closing_message("THANKS yaar"));
        assert!(!is_closing_message("book padh rahi hu"));
        assert!(!is_closing_message("kya kar rahi hai?"));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::CacheCheck.to_string(), "CACHE_CHECK");
        assert_eq!(Stage::UpdateVectorStore.to_string(), "UPDATE_VECTOR_STORE");
    }
}

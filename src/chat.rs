//! Chat turn orchestration.
//!
//! [`AppContext`] bundles the long-lived collaborators (config, store,
//! retriever, chat provider). [`ChatSession`] holds one user's current
//! conversation, model and mood. [`ChatSession::send`] runs a full turn:
//!
//! 1. append the user message (starting a conversation if needed),
//! 2. retrieve context for the prompt,
//! 3. compose the system instruction and request,
//! 4. negotiate the response into the view,
//! 5. append the assistant message and save the conversation in the
//!    background.
//!
//! Turns are serialized by `&mut self`.

use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;

use olive_core::models::{Conversation, Message};

use crate::config::Config;
use crate::live::{DuckDuckGo, LiveLookup};
use crate::negotiate::{Negotiator, TurnOutcome};
use crate::prompt::{build_request, compose_system};
use crate::provider::{create_provider, ChatCapability};
use crate::retrieve::Retriever;
use crate::store::Store;
use crate::typewriter::TypewriterConfig;
use crate::view::ChatView;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Store,
    pub retriever: Retriever,
    pub live: Option<Arc<dyn LiveLookup>>,
    pub capability: Arc<dyn ChatCapability>,
}

impl AppContext {
    /// Open the store and build the configured live lookup and provider.
    pub async fn from_config(config: Config) -> Result<Self> {
        let store = Store::open(&config).await?;
        let live: Option<Arc<dyn LiveLookup>> = if config.live.enabled {
            Some(Arc::new(DuckDuckGo::new(&config.live)?))
        } else {
            None
        };
        let capability = create_provider(&config.provider)?;
        Ok(Self::new(config, store, live, capability))
    }

    pub fn new(
        config: Config,
        store: Store,
        live: Option<Arc<dyn LiveLookup>>,
        capability: Arc<dyn ChatCapability>,
    ) -> Self {
        let retriever = Retriever::new(store.clone(), live.clone(), config.retrieval.top_k);
        Self {
            config: Arc::new(config),
            store,
            retriever,
            live,
            capability,
        }
    }

    pub fn negotiator(&self) -> Negotiator {
        Negotiator::new(
            self.config.chat.no_token_timeout(),
            TypewriterConfig::from(&self.config.typewriter),
        )
    }
}

/// One user's chat state.
pub struct ChatSession {
    username: String,
    model: String,
    mood: String,
    conversation: Option<Conversation>,
    pending_save: Option<JoinHandle<()>>,
}

impl ChatSession {
    pub fn new(username: impl Into<String>, model: impl Into<String>, mood: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            model: model.into(),
            mood: mood.into(),
            conversation: None,
            pending_save: None,
        }
    }

    /// A session using the configured default model and mood.
    pub fn with_defaults(username: impl Into<String>, config: &Config) -> Self {
        Self::new(
            username,
            config.chat.default_model.clone(),
            config.chat.default_mood.clone(),
        )
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn set_mood(&mut self, mood: impl Into<String>) {
        self.mood = mood.into();
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    /// Drop the current conversation; the next prompt starts a new one.
    pub fn start_new(&mut self) {
        self.conversation = None;
    }

    /// Continue an existing conversation.
    pub fn resume(&mut self, conversation: Conversation) {
        self.conversation = Some(conversation);
    }

    /// Run one turn for `prompt`, revealing the reply in `view`.
    ///
    /// Only a blank prompt is an error. Retrieval and persistence failures
    /// are logged; provider failures end up in the outcome text.
    pub async fn send(
        &mut self,
        ctx: &AppContext,
        prompt: &str,
        view: Arc<dyn ChatView>,
    ) -> Result<TurnOutcome> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            bail!("message must not be empty");
        }

        let conversation = self.conversation.get_or_insert_with(|| {
            Conversation::new(
                uuid::Uuid::new_v4().to_string(),
                prompt,
                self.model.clone(),
                self.mood.clone(),
            )
        });
        conversation.push(Message::user(prompt));

        let results = match ctx.retriever.retrieve(prompt, None).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed; answering without context");
                Vec::new()
            }
        };

        let system = compose_system(&ctx.config.chat.persona, &self.mood, &results);
        let request = build_request(&self.model, system, &conversation.messages);

        tracing::info!(
            conversation = %conversation.id,
            model = %self.model,
            context = results.len(),
            "starting turn"
        );
        let outcome = ctx
            .negotiator()
            .run(Arc::clone(&ctx.capability), request, view)
            .await;

        conversation.push(Message::assistant(outcome.text.trim()));
        conversation.model = self.model.clone();
        conversation.mood = self.mood.clone();

        self.persist(ctx);
        Ok(outcome)
    }

    fn persist(&mut self, ctx: &AppContext) {
        let Some(conversation) = self.conversation.clone() else {
            return;
        };
        if self.username.trim().is_empty() {
            tracing::debug!("no username; conversation not saved");
            return;
        }

        let store = ctx.store.clone();
        let username = self.username.clone();
        // Saves of one session land in turn order.
        let previous = self.pending_save.take();
        self.pending_save = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if let Err(e) = store.save_chat(&username, &conversation).await {
                tracing::warn!(error = %e, conversation = %conversation.id, "failed to save chat");
            }
        }));
    }

    /// Wait for the most recent background save.
    pub async fn flush(&mut self) {
        if let Some(save) = self.pending_save.take() {
            let _ = save.await;
        }
    }
}

//! Per-message orchestration: observe, decide, remember, assemble.

use std::sync::Arc;

use parley_storage::{ChatId, ChatMemoryStore, Member, Message, MessageId};
use serde::Serialize;
use tracing::{debug, info};

use crate::channel::{ChatKind, InboundMessage};
use crate::config::BotConfig;
use crate::eligibility::{Dice, EligibilityEngine, ReplyDecision};
use crate::error::ConfigError;
use crate::history::{Assembly, HistoryAssembler};

/// Recent members listed alongside a reply context.
const ACTIVE_MEMBERS_WINDOW: usize = 20;

/// Everything the text-generation step needs for one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyPlan {
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    pub decision: ReplyDecision,
    pub context: Assembly,
    pub model: String,
    pub hate_mode: bool,
    pub is_comment_thread: bool,
    pub active_members: Vec<Member>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnPlan {
    /// Nothing observable; state untouched.
    Skipped,
    /// Stored, no reply.
    Observed { decision: ReplyDecision },
    Reply(Box<ReplyPlan>),
}

impl TurnPlan {
    pub fn decision(&self) -> Option<&ReplyDecision> {
        match self {
            Self::Skipped => None,
            Self::Observed { decision } => Some(decision),
            Self::Reply(plan) => Some(&plan.decision),
        }
    }
}

#[derive(Debug)]
pub struct ConversationCore {
    store: Arc<ChatMemoryStore>,
    engine: EligibilityEngine,
    assembler: HistoryAssembler,
    config: Arc<BotConfig>,
}

impl ConversationCore {
    pub fn new(
        store: Arc<ChatMemoryStore>,
        config: Arc<BotConfig>,
        assembler: HistoryAssembler,
    ) -> Result<Self, ConfigError> {
        let engine = EligibilityEngine::from_config(&config)?;
        Ok(Self {
            store,
            engine,
            assembler,
            config,
        })
    }

    pub fn store(&self) -> &Arc<ChatMemoryStore> {
        &self.store
    }

    pub fn engine(&self) -> &EligibilityEngine {
        &self.engine
    }

    /// Handle one inbound message.
    ///
    /// The message is stored whenever it is observable, whether or not the
    /// agent replies. Context is only assembled for replies.
    pub async fn handle_inbound(&self, inbound: InboundMessage, dice: &mut dyn Dice) -> TurnPlan {
        if !self.engine.should_observe(&inbound.message) {
            debug!(chat_id = inbound.chat_id, message_id = inbound.message.id, "Message not observed");
            return TurnPlan::Skipped;
        }

        let chat_id = inbound.chat_id;
        let chat_kind = inbound.chat_kind;
        let decision = self
            .store
            .with_chat(chat_id, |chat| self.engine.decide(&inbound, chat, dice));

        let mut message = inbound.message;
        message.addresses_agent = decision.addressed();
        self.store.add_message(chat_id, message);

        if !decision.reply {
            return TurnPlan::Observed { decision };
        }

        let (messages_to_pass, model, hate_mode, is_comment_thread, active_members) =
            self.store.with_chat(chat_id, |chat| {
                (
                    chat.effective_messages_to_pass(self.config.context.messages_to_pass),
                    chat.effective_model(&self.config.model).to_string(),
                    chat.hate_mode(),
                    chat.is_comment_thread(),
                    chat.active_members(ACTIVE_MEMBERS_WINDOW),
                )
            });

        let budget = self.config.context.budget(messages_to_pass);
        let context = self.assembler.assemble_chat(&self.store, chat_id, budget).await;
        info!(
            chat_id,
            reason = %decision.reason,
            random = decision.is_random,
            messages = context.messages.len(),
            "Replying"
        );

        TurnPlan::Reply(Box::new(ReplyPlan {
            chat_id,
            chat_kind,
            decision,
            context,
            model,
            hate_mode,
            is_comment_thread,
            active_members,
        }))
    }

    /// Remember a reply the agent sent.
    pub fn record_reply(&self, chat_id: ChatId, message_id: MessageId, text: impl Into<String>) {
        let agent = self.engine.agent();
        let name = self
            .config
            .names
            .first()
            .cloned()
            .unwrap_or_else(|| agent.handle.clone());
        let mut reply = Message::from_agent(message_id, agent.id, name, text);
        if !agent.handle.is_empty() {
            reply.handle = Some(agent.handle.clone());
        }
        self.store.add_message(chat_id, reply);
    }
}

/// Canned apology for a failed turn.
///
/// Random replies fail silently: nobody asked, so nobody waits for an answer.
pub fn fallback_reply(decision: &ReplyDecision, apologies: &[String], dice: &mut dyn Dice) -> Option<String> {
    if !decision.addressed() || apologies.is_empty() {
        return None;
    }
    let roll = dice.roll().clamp(0.0, 99.999);
    let index = ((roll / 100.0) * apologies.len() as f64) as usize;
    apologies.get(index.min(apologies.len() - 1)).cloned()
}

/// Serializable summary of a plan, for tooling output.
#[derive(Debug, Serialize)]
pub struct PlanSummary<'a> {
    pub decision: Option<&'a ReplyDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_messages: Option<usize>,
}

impl<'a> From<&'a TurnPlan> for PlanSummary<'a> {
    fn from(plan: &'a TurnPlan) -> Self {
        match plan {
            TurnPlan::Reply(reply) => Self {
                decision: Some(&reply.decision),
                model: Some(&reply.model),
                context_messages: Some(reply.context.messages.len()),
            },
            other => Self {
                decision: other.decision(),
                model: None,
                context_messages: None,
            },
        }
    }
}

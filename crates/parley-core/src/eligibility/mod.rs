//! Reply eligibility.
//!
//! Decides, for each observed message, whether the agent should answer. The
//! decision is an ordered list of [`ReplyRule`]s where the first rule that does
//! not pass wins. Probabilistic rules draw from an injected [`Dice`] so the
//! policy is deterministic under test.

mod dice;
mod matcher;
mod rules;

pub use dice::{Dice, SequenceDice, ThreadDice, chance};
pub use matcher::{NameMatcher, NameMatcherCache};
pub use rules::{
    HandleMentionRule, IgnoreRule, NameMentionRule, NudgeRule, PrivateChatRule, RandomReplyRule,
    ReplyRule, ReplyToAgentRule, RuleContext, RuleVerdict,
};

use parley_storage::{ChatState, Message, UserId};
use serde::Serialize;
use tracing::debug;

use crate::channel::{ChatKind, InboundMessage};
use crate::config::{AgentConfig, BotConfig, compile_patterns};
use crate::error::ConfigError;

/// The agent's own identity on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub id: UserId,
    /// Handle without the leading `@`.
    pub handle: String,
}

impl AgentIdentity {
    pub fn new(id: UserId, handle: impl Into<String>) -> Self {
        let handle = handle.into();
        Self {
            id,
            handle: handle.trim().trim_start_matches('@').to_string(),
        }
    }
}

impl From<&AgentConfig> for AgentIdentity {
    fn from(config: &AgentConfig) -> Self {
        Self::new(config.id, config.handle.clone())
    }
}

/// Why the engine decided what it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    PrivateChat,
    ReplyToAgent,
    HandleMention,
    NameMention,
    Ignored,
    Nudge,
    Random,
    NoMatch,
}

impl DecisionReason {
    /// The sender spoke to the agent directly.
    pub fn is_addressed(&self) -> bool {
        matches!(
            self,
            Self::PrivateChat | Self::ReplyToAgent | Self::HandleMention | Self::NameMention
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrivateChat => "private_chat",
            Self::ReplyToAgent => "reply_to_agent",
            Self::HandleMention => "handle_mention",
            Self::NameMention => "name_mention",
            Self::Ignored => "ignored",
            Self::Nudge => "nudge",
            Self::Random => "random",
            Self::NoMatch => "no_match",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyDecision {
    pub reply: bool,
    pub is_random: bool,
    /// `@handle` of the sender to address, for direct mentions in group chats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    pub reason: DecisionReason,
}

impl ReplyDecision {
    fn silent(reason: DecisionReason) -> Self {
        Self {
            reply: false,
            is_random: false,
            target_handle: None,
            reason,
        }
    }

    /// A reply the sender explicitly asked for.
    pub fn addressed(&self) -> bool {
        self.reply && !self.is_random
    }
}

pub struct EligibilityEngine {
    agent: AgentIdentity,
    rules: Vec<Box<dyn ReplyRule>>,
}

impl std::fmt::Debug for EligibilityEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EligibilityEngine")
            .field("agent", &self.agent)
            .field("rules", &self.rule_names())
            .finish()
    }
}

impl EligibilityEngine {
    /// The standard rule order.
    pub fn from_config(config: &BotConfig) -> Result<Self, ConfigError> {
        let rules: Vec<Box<dyn ReplyRule>> = vec![
            Box::new(PrivateChatRule),
            Box::new(ReplyToAgentRule),
            Box::new(HandleMentionRule),
            Box::new(NameMentionRule::new(config.names.clone())),
            Box::new(IgnoreRule::new(
                compile_patterns(&config.ignore.patterns)?,
                config.ignore.probability,
                config.ignore.max_length,
            )),
            Box::new(NudgeRule::new(
                compile_patterns(&config.nudge.patterns)?,
                config.nudge.probability,
            )),
            Box::new(RandomReplyRule::new(config.random_reply_probability)),
        ];
        Ok(Self::with_rules(AgentIdentity::from(&config.agent), rules))
    }

    pub fn with_rules(agent: AgentIdentity, rules: Vec<Box<dyn ReplyRule>>) -> Self {
        Self { agent, rules }
    }

    pub fn agent(&self) -> &AgentIdentity {
        &self.agent
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    /// Whether a message should be stored and considered at all.
    ///
    /// Messages with nothing observable, and messages sent through the agent
    /// itself as an inline bot, are dropped before any state changes.
    pub fn should_observe(&self, message: &Message) -> bool {
        message.has_observable_content() && message.meta.via_bot_id != Some(self.agent.id)
    }

    pub fn decide(
        &self,
        inbound: &InboundMessage,
        chat: &ChatState,
        dice: &mut dyn Dice,
    ) -> ReplyDecision {
        let ctx = RuleContext {
            message: &inbound.message,
            chat_kind: inbound.chat_kind,
            chat,
            agent: &self.agent,
        };

        for rule in &self.rules {
            let decision = match rule.evaluate(&ctx, dice) {
                RuleVerdict::Pass => continue,
                RuleVerdict::Reply(reason) => ReplyDecision {
                    reply: true,
                    is_random: false,
                    target_handle: self.target_handle(&ctx, reason),
                    reason,
                },
                RuleVerdict::RandomReply(reason) => ReplyDecision {
                    reply: true,
                    is_random: true,
                    target_handle: None,
                    reason,
                },
                RuleVerdict::Suppress(reason) => ReplyDecision::silent(reason),
            };
            debug!(
                chat_id = inbound.chat_id,
                message_id = inbound.message.id,
                rule = rule.name(),
                reply = decision.reply,
                "Reply decision"
            );
            return decision;
        }

        ReplyDecision::silent(DecisionReason::NoMatch)
    }

    fn target_handle(&self, ctx: &RuleContext<'_>, reason: DecisionReason) -> Option<String> {
        if ctx.chat_kind == ChatKind::Private || reason == DecisionReason::PrivateChat {
            return None;
        }
        ctx.message.display_handle()
    }
}

//! Individual reply rules, evaluated in order by the engine.

use parley_storage::{ChatState, ForwardOrigin, Message};

use super::dice::{Dice, chance};
use super::matcher::NameMatcherCache;
use super::{AgentIdentity, DecisionReason};
use crate::channel::ChatKind;
use crate::config::MessagePattern;

/// Everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub message: &'a Message,
    pub chat_kind: ChatKind,
    pub chat: &'a ChatState,
    pub agent: &'a AgentIdentity,
}

impl RuleContext<'_> {
    fn text(&self) -> Option<&str> {
        self.message.text_content()
    }
}

/// Outcome of a single rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleVerdict {
    /// Not applicable; ask the next rule.
    Pass,
    Reply(DecisionReason),
    RandomReply(DecisionReason),
    /// Stop evaluating and stay silent.
    Suppress(DecisionReason),
}

pub trait ReplyRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, ctx: &RuleContext<'_>, dice: &mut dyn Dice) -> RuleVerdict;
}

fn any_match(patterns: &[MessagePattern], text: &str) -> bool {
    patterns.iter().any(|pattern| pattern.matches(text))
}

pub struct PrivateChatRule;

impl ReplyRule for PrivateChatRule {
    fn name(&self) -> &'static str {
        "private_chat"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, _dice: &mut dyn Dice) -> RuleVerdict {
        if ctx.chat_kind.is_private() {
            RuleVerdict::Reply(DecisionReason::PrivateChat)
        } else {
            RuleVerdict::Pass
        }
    }
}

pub struct ReplyToAgentRule;

impl ReplyRule for ReplyToAgentRule {
    fn name(&self) -> &'static str {
        "reply_to_agent"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, _dice: &mut dyn Dice) -> RuleVerdict {
        let replies_to_agent = ctx.message.reply_to.as_ref().is_some_and(|reply| {
            reply.is_self || reply.sender_id.is_some_and(|id| id == ctx.agent.id)
        });
        if replies_to_agent {
            RuleVerdict::Reply(DecisionReason::ReplyToAgent)
        } else {
            RuleVerdict::Pass
        }
    }
}

/// Text contains the agent's handle, case-sensitively.
pub struct HandleMentionRule;

impl ReplyRule for HandleMentionRule {
    fn name(&self) -> &'static str {
        "handle_mention"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, _dice: &mut dyn Dice) -> RuleVerdict {
        let handle = ctx.agent.handle.as_str();
        match ctx.text() {
            Some(text) if !handle.is_empty() && text.contains(handle) => {
                RuleVerdict::Reply(DecisionReason::HandleMention)
            }
            _ => RuleVerdict::Pass,
        }
    }
}

pub struct NameMentionRule {
    names: NameMatcherCache,
}

impl NameMentionRule {
    pub fn new(global_names: Vec<String>) -> Self {
        Self {
            names: NameMatcherCache::new(global_names),
        }
    }
}

impl ReplyRule for NameMentionRule {
    fn name(&self) -> &'static str {
        "name_mention"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, _dice: &mut dyn Dice) -> RuleVerdict {
        let Some(text) = ctx.text() else {
            return RuleVerdict::Pass;
        };

        // The agent's own posts forwarded back into the chat mention its name.
        let forwarded_from_agent = matches!(
            ctx.message.meta.forward_origin,
            Some(ForwardOrigin::User { sender_user_id }) if sender_user_id == ctx.agent.id
        );
        if forwarded_from_agent {
            return RuleVerdict::Pass;
        }

        if self.names.matcher(ctx.chat.character_names()).is_match(text) {
            RuleVerdict::Reply(DecisionReason::NameMention)
        } else {
            RuleVerdict::Pass
        }
    }
}

pub struct IgnoreRule {
    patterns: Vec<MessagePattern>,
    probability: f64,
    max_length: usize,
}

impl IgnoreRule {
    pub fn new(patterns: Vec<MessagePattern>, probability: f64, max_length: usize) -> Self {
        Self {
            patterns,
            probability,
            max_length,
        }
    }
}

impl ReplyRule for IgnoreRule {
    fn name(&self) -> &'static str {
        "ignore"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, dice: &mut dyn Dice) -> RuleVerdict {
        let Some(text) = ctx.text() else {
            return RuleVerdict::Pass;
        };
        if any_match(&self.patterns, text)
            && text.chars().count() < self.max_length
            && chance(dice, self.probability)
        {
            RuleVerdict::Suppress(DecisionReason::Ignored)
        } else {
            RuleVerdict::Pass
        }
    }
}

pub struct NudgeRule {
    patterns: Vec<MessagePattern>,
    probability: f64,
}

impl NudgeRule {
    pub fn new(patterns: Vec<MessagePattern>, probability: f64) -> Self {
        Self {
            patterns,
            probability,
        }
    }
}

impl ReplyRule for NudgeRule {
    fn name(&self) -> &'static str {
        "nudge"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, dice: &mut dyn Dice) -> RuleVerdict {
        let Some(text) = ctx.text() else {
            return RuleVerdict::Pass;
        };
        if any_match(&self.patterns, text) && chance(dice, self.probability) {
            RuleVerdict::RandomReply(DecisionReason::Nudge)
        } else {
            RuleVerdict::Pass
        }
    }
}

/// Unprompted reply using the chat's override or the global probability.
pub struct RandomReplyRule {
    default_probability: f64,
}

impl RandomReplyRule {
    pub fn new(default_probability: f64) -> Self {
        Self {
            default_probability,
        }
    }
}

impl ReplyRule for RandomReplyRule {
    fn name(&self) -> &'static str {
        "random"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>, dice: &mut dyn Dice) -> RuleVerdict {
        let probability = ctx
            .chat
            .effective_random_reply_probability(self.default_probability);
        if chance(dice, probability) {
            RuleVerdict::RandomReply(DecisionReason::Random)
        } else {
            RuleVerdict::Pass
        }
    }
}

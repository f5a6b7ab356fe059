use std::sync::Arc;

use parley_core::channel::telegram::convert_update;
use parley_core::channel::{ChatKind, InboundMessage};
use parley_core::config::AgentConfig;
use parley_core::eligibility::{DecisionReason, SequenceDice};
use parley_core::history::{ContentPart, HistoryAssembler, Role};
use parley_core::{BotConfig, ConversationCore, TurnPlan, fallback_reply};
use parley_storage::{ChatMemoryStore, Message, OptOutUser, StoreLimits};
use serde_json::json;
use tempfile::TempDir;

const AGENT_ID: i64 = 4242;
const GROUP: i64 = -100500;

fn config() -> BotConfig {
    let mut config = BotConfig::default();
    config.agent = AgentConfig {
        id: AGENT_ID,
        handle: "parley_bot".to_string(),
    };
    config.random_reply_probability = 0.0;
    config
}

fn core(temp: &TempDir) -> ConversationCore {
    let store = Arc::new(ChatMemoryStore::new(
        temp.path().join("memory.json"),
        StoreLimits::default(),
    ));
    ConversationCore::new(store, Arc::new(config()), HistoryAssembler::offline()).unwrap()
}

fn group(message: Message) -> InboundMessage {
    InboundMessage::new(GROUP, ChatKind::Group, message)
}

fn from_ann(id: i64, body: &str) -> Message {
    Message::text(id, 7, "Ann", body).with_handle("ann")
}

fn reply_plan(plan: TurnPlan) -> Box<parley_core::ReplyPlan> {
    match plan {
        TurnPlan::Reply(plan) => plan,
        other => panic!("expected a reply, got {other:?}"),
    }
}

#[tokio::test]
async fn test_observed_messages_feed_later_reply() {
    let temp = TempDir::new().unwrap();
    let core = core(&temp);
    let mut dice = SequenceDice::default();

    let plan = core.handle_inbound(group(from_ann(1, "anyone up?")), &mut dice).await;
    assert!(matches!(
        plan,
        TurnPlan::Observed { ref decision } if decision.reason == DecisionReason::NoMatch
    ));
    assert!(!core.store().history(GROUP)[0].addresses_agent);

    let plan = core
        .handle_inbound(group(from_ann(2, "Parley, are you up?")), &mut dice)
        .await;
    let plan = reply_plan(plan);
    assert_eq!(plan.decision.reason, DecisionReason::NameMention);
    assert_eq!(plan.decision.target_handle.as_deref(), Some("@ann"));
    assert_eq!(plan.context.message_ids, vec![1, 2]);
    assert_eq!(plan.model, "gemini-2.0-flash");
    assert!(core.store().history(GROUP)[1].addresses_agent);
    assert_eq!(plan.active_members.len(), 1);
}

#[tokio::test]
async fn test_agent_reply_appears_as_assistant() {
    let temp = TempDir::new().unwrap();
    let core = core(&temp);
    let mut dice = SequenceDice::default();

    core.handle_inbound(group(from_ann(1, "parley, hello")), &mut dice)
        .await;
    core.record_reply(GROUP, 2, "hi Ann");

    let question = from_ann(3, "why?").with_reply_to(parley_storage::ReplyTo {
        id: 2,
        text: "hi Ann".to_string(),
        is_self: true,
        sender_id: Some(AGENT_ID),
    });
    let plan = reply_plan(core.handle_inbound(group(question), &mut dice).await);
    assert_eq!(plan.decision.reason, DecisionReason::ReplyToAgent);

    let roles: Vec<Role> = plan.context.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    assert_eq!(
        plan.context.messages[1].content,
        vec![ContentPart::Text {
            text: "hi Ann".to_string()
        }]
    );
}

#[tokio::test]
async fn test_empty_message_is_skipped_without_state() {
    let temp = TempDir::new().unwrap();
    let core = core(&temp);

    let plan = core
        .handle_inbound(group(Message::new(1, 7, "Ann")), &mut SequenceDice::default())
        .await;
    assert_eq!(plan, TurnPlan::Skipped);
    assert!(core.store().is_empty());
}

#[tokio::test]
async fn test_chat_window_override_limits_context() {
    let temp = TempDir::new().unwrap();
    let core = core(&temp);
    let mut dice = SequenceDice::default();

    for id in 1..=5 {
        core.handle_inbound(group(from_ann(id, "chatter")), &mut dice)
            .await;
    }
    core.store().set_messages_to_pass(GROUP, Some(2)).unwrap();

    let plan = reply_plan(
        core.handle_inbound(group(from_ann(6, "@parley_bot thoughts?")), &mut dice)
            .await,
    );
    assert_eq!(plan.decision.reason, DecisionReason::HandleMention);
    assert_eq!(plan.context.message_ids, vec![5, 6]);
}

#[tokio::test]
async fn test_opted_out_member_hidden_from_reply_context() {
    let temp = TempDir::new().unwrap();
    let core = core(&temp);
    let mut dice = SequenceDice::default();

    core.store().opt_out(
        GROUP,
        OptOutUser {
            id: 42,
            first_name: "Bob".to_string(),
            username: None,
        },
    );
    core.handle_inbound(group(Message::text(1, 42, "Bob", "my secret plan")), &mut dice)
        .await;
    let plan = reply_plan(
        core.handle_inbound(group(from_ann(2, "parley what's new")), &mut dice)
            .await,
    );

    assert_eq!(plan.context.message_ids, vec![2]);
    // Still remembered, just never shown.
    assert_eq!(core.store().history(GROUP).len(), 2);
}

#[tokio::test]
async fn test_random_reply_is_not_addressed() {
    let temp = TempDir::new().unwrap();
    let mut config = config();
    config.random_reply_probability = 10.0;
    let store = Arc::new(ChatMemoryStore::new(
        temp.path().join("memory.json"),
        StoreLimits::default(),
    ));
    let core = ConversationCore::new(store, Arc::new(config.clone()), HistoryAssembler::offline())
        .unwrap();

    let plan = reply_plan(
        core.handle_inbound(group(from_ann(1, "lovely weather")), &mut SequenceDice::new([5.0]))
            .await,
    );
    assert!(plan.decision.is_random);
    assert_eq!(plan.decision.target_handle, None);
    assert!(!core.store().history(GROUP)[0].addresses_agent);
    assert_eq!(
        fallback_reply(&plan.decision, &config.apologies, &mut SequenceDice::default()),
        None
    );
}

#[tokio::test]
async fn test_telegram_update_through_core() {
    let temp = TempDir::new().unwrap();
    let core = core(&temp);

    let update = json!({
        "update_id": 1,
        "message": {
            "message_id": 77,
            "date": 1_700_000_000,
            "chat": { "id": GROUP, "type": "supergroup", "title": "Friends" },
            "from": { "id": 7, "is_bot": false, "first_name": "Ann", "username": "ann" },
            "caption": "look at this, parley",
            "photo": [
                { "file_id": "small", "file_unique_id": "s", "width": 90, "height": 90, "file_size": 1000 },
                { "file_id": "large", "file_unique_id": "l", "width": 800, "height": 800, "file_size": 90000 }
            ]
        }
    });

    let inbound = convert_update(&update, AGENT_ID).unwrap().unwrap();
    assert_eq!(inbound.chat_title.as_deref(), Some("Friends"));
    let plan = reply_plan(
        core.handle_inbound(inbound, &mut SequenceDice::default())
            .await,
    );
    assert_eq!(plan.decision.reason, DecisionReason::NameMention);

    // Offline: the photo shows up as a descriptor only, without the structural fields.
    let ContentPart::Text { text } = &plan.context.messages[0].content[0] else {
        panic!("expected a text header");
    };
    let header: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(header["attachments"][0]["kind"], "photo");
    assert!(!text.contains("file_unique_id"));
    assert_eq!(plan.context.messages[0].content.len(), 1);

    let stored = core.store().history(GROUP);
    assert_eq!(stored[0].attachments[0].source_ref, "large");
}

#[tokio::test]
async fn test_state_survives_save_and_reload() {
    let temp = TempDir::new().unwrap();
    let core = core(&temp);
    let mut dice = SequenceDice::default();

    core.handle_inbound(group(from_ann(1, "parley remember me")), &mut dice)
        .await;
    core.record_reply(GROUP, 2, "sure");
    core.store().add_note(GROUP, "Ann likes tea");
    core.store().save().await.unwrap();

    let reloaded = ChatMemoryStore::load(temp.path().join("memory.json"), StoreLimits::default())
        .unwrap();
    let history = reloaded.history(GROUP);
    assert_eq!(history.len(), 2);
    assert!(history[0].addresses_agent);
    assert!(history[1].is_self);
    assert_eq!(
        reloaded.with_chat(GROUP, |chat| chat.notes.clone()),
        vec!["Ann likes tea".to_string()]
    );
}

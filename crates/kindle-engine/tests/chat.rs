mod common;

use std::sync::Barrier;
use std::time::Duration;

use kindle_engine::EngineConfig;
use kindle_types::api::ErrorKind;
use kindle_types::events::{ConversionReason, GatewayEvent, NotificationKind};
use kindle_types::models::{MessageStatus, ModerationCategory, QuotaRemaining};

use common::{harness, harness_with};

#[test]
fn free_tier_stops_after_allotment() {
    let h = harness();
    let (a, _, chat_id) = h.matched_pair();

    for i in 0..5 {
        let sent = h.engine.chat.send_message(chat_id, a, &format!("msg {i}")).unwrap();
        assert_eq!(sent.quota, QuotaRemaining::Limited(4 - i));
    }
    let err = h.engine.chat.send_message(chat_id, a, "msg 6").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    assert_eq!(h.db.count_messages(chat_id).unwrap(), 5);
    assert_eq!(h.db.quota_remaining(chat_id, a).unwrap(), Some(0));

    // Still blocked on retry; the counter never goes negative.
    assert!(h.engine.chat.send_message(chat_id, a, "msg 7").is_err());
    assert_eq!(h.db.quota_remaining(chat_id, a).unwrap(), Some(0));
}

#[test]
fn quota_rejection_prompts_upgrade_once() {
    let h = harness_with(EngineConfig {
        message_allotment: 0,
        retry_base: Duration::from_millis(1),
        ..EngineConfig::default()
    });
    let (a, _, chat_id) = h.matched_pair();

    h.engine.chat.send_message(chat_id, a, "oi").unwrap_err();
    h.engine.chat.send_message(chat_id, a, "oi?").unwrap_err();

    let events = h.sink.sent_to(a);
    let prompts = events
        .iter()
        .filter(|e| matches!(e, GatewayEvent::ConversionPrompt { reason: ConversionReason::Messages, .. }))
        .count();
    assert_eq!(prompts, 1);
    let notices = events
        .iter()
        .filter(|e| matches!(e, GatewayEvent::Notification { kind: NotificationKind::QuotaExceeded, .. }))
        .count();
    assert_eq!(notices, 2);
}

#[test]
fn premium_sender_is_never_throttled() {
    let h = harness();
    let (a, _, chat_id) = h.matched_pair();
    h.make_premium(a);

    for i in 0..100 {
        let sent = h.engine.chat.send_message(chat_id, a, &format!("msg {i}")).unwrap();
        assert_eq!(sent.quota, QuotaRemaining::Unlimited);
    }
    assert_eq!(h.db.count_messages(chat_id).unwrap(), 100);
    assert_eq!(h.db.quota_remaining(chat_id, a).unwrap(), Some(5));
}

#[test]
fn blocked_content_is_not_persisted_or_charged() {
    let h = harness();
    let (a, _, chat_id) = h.matched_pair();

    let err = h
        .engine
        .chat
        .send_message(chat_id, a, "me chama: 11 98765-4321")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BlockedContent);
    assert!(matches!(
        err,
        kindle_engine::EngineError::BlockedContent { category: ModerationCategory::ContactInfo }
    ));
    assert_eq!(h.db.count_messages(chat_id).unwrap(), 0);
    assert_eq!(h.db.quota_remaining(chat_id, a).unwrap(), Some(5));
    assert!(h.sink.sent_to(a).iter().any(|e| matches!(
        e,
        GatewayEvent::ConversionPrompt { reason: ConversionReason::Moderation, .. }
    )));
}

#[test]
fn empty_and_oversized_text_is_invalid() {
    let h = harness();
    let (a, _, chat_id) = h.matched_pair();

    for text in ["", "   \n\t "] {
        let err = h.engine.chat.send_message(chat_id, a, text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    let long = "a".repeat(2001);
    let err = h.engine.chat.send_message(chat_id, a, &long).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.db.quota_remaining(chat_id, a).unwrap(), Some(5));
}

#[test]
fn outsiders_cannot_post() {
    let h = harness();
    let (_, _, chat_id) = h.matched_pair();
    let outsider = h.user("caio", 3.0);

    let err = h.engine.chat.send_message(chat_id, outsider, "oi").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    let err = h.engine.chat.send_message(uuid::Uuid::new_v4(), outsider, "oi").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn sanitized_text_is_what_gets_stored() {
    let h = harness();
    let (a, _, chat_id) = h.matched_pair();

    let sent = h
        .engine
        .chat
        .send_message(chat_id, a, "  porra, que merda, caralho  ")
        .unwrap();
    assert!(sent.message.moderated);
    assert_eq!(sent.message.text, "p***a, que m***a, c*****o");

    let stored = h.engine.chat.recent_messages(chat_id, a, None, 10).unwrap();
    assert_eq!(stored[0].text, sent.message.text);
}

#[test]
fn concurrent_sends_get_distinct_sequences() {
    let h = harness();
    let (a, b, chat_id) = h.matched_pair();
    h.make_premium(a);
    h.make_premium(b);
    let barrier = Barrier::new(2);

    let (x, y) = std::thread::scope(|s| {
        let x = s.spawn(|| {
            barrier.wait();
            h.engine.chat.send_message(chat_id, a, "oi").unwrap()
        });
        let y = s.spawn(|| {
            barrier.wait();
            h.engine.chat.send_message(chat_id, b, "olá").unwrap()
        });
        (x.join().unwrap(), y.join().unwrap())
    });

    let mut seqs = [x.message.server_sequence, y.message.server_sequence];
    seqs.sort();
    assert_eq!(seqs, [1, 2]);
}

#[test]
fn fan_out_follows_commit_order() {
    let h = harness();
    let (a, b, chat_id) = h.matched_pair();
    h.make_premium(a);
    h.make_premium(b);

    std::thread::scope(|s| {
        for (user, n) in [(a, 0), (b, 1), (a, 2), (b, 3)] {
            let h = &h;
            s.spawn(move || {
                for i in 0..10 {
                    h.engine.chat.send_message(chat_id, user, &format!("{n}-{i}")).unwrap();
                }
            });
        }
    });

    let published: Vec<i64> = h
        .sink
        .published()
        .into_iter()
        .filter_map(|e| match e {
            GatewayEvent::MessageCreate { message } => Some(message.server_sequence),
            _ => None,
        })
        .collect();
    assert_eq!(published, (1..=40).collect::<Vec<i64>>());
}

#[test]
fn unread_counts_track_the_log() {
    let h = harness();
    let (a, b, chat_id) = h.matched_pair();

    h.engine.chat.send_message(chat_id, a, "um").unwrap();
    h.engine.chat.send_message(chat_id, a, "dois").unwrap();
    h.engine.chat.send_message(chat_id, b, "três").unwrap();

    let chat = h.db.get_chat(chat_id).unwrap().unwrap();
    assert_eq!(chat.unread_counts[&b], 2);
    assert_eq!(chat.unread_counts[&a], 1);
    for user in [a, b] {
        assert_eq!(chat.unread_counts[&user], h.db.derived_unread_count(chat_id, user).unwrap());
    }
    assert_eq!(chat.last_message.unwrap().text, "três");

    let summaries = h.engine.chat.list_chats(b).unwrap();
    assert_eq!(summaries[0].unread_count, 2);
    assert_eq!(summaries[0].other_user_id, Some(a));
}

#[test]
fn mark_read_is_idempotent() {
    let h = harness();
    let (a, b, chat_id) = h.matched_pair();
    h.engine.chat.send_message(chat_id, a, "um").unwrap();
    h.engine.chat.send_message(chat_id, a, "dois").unwrap();

    let first = h.engine.chat.mark_read(chat_id, b).unwrap();
    assert_eq!(first.updated, 2);
    assert_eq!(first.up_to_sequence, 2);
    let read_at = h.db.last_read_at(chat_id, b).unwrap();

    let second = h.engine.chat.mark_read(chat_id, b).unwrap();
    assert_eq!(second.updated, 0);
    assert_eq!(h.db.last_read_at(chat_id, b).unwrap(), read_at);

    let chat = h.db.get_chat(chat_id).unwrap().unwrap();
    assert_eq!(chat.unread_counts[&b], 0);
    assert_eq!(h.db.derived_unread_count(chat_id, b).unwrap(), 0);

    let reads = h
        .sink
        .published()
        .into_iter()
        .filter(|e| matches!(e, GatewayEvent::MessagesRead { .. }))
        .count();
    assert_eq!(reads, 1);

    // The sender's own messages are untouched by the sender reading.
    let own = h.engine.chat.mark_read(chat_id, a).unwrap();
    assert_eq!(own.updated, 0);
}

#[test]
fn status_only_moves_forward() {
    let h = harness();
    let (a, b, chat_id) = h.matched_pair();
    h.engine.chat.send_message(chat_id, a, "um").unwrap();
    h.engine.chat.mark_read(chat_id, b).unwrap();
    h.engine.chat.send_message(chat_id, a, "dois").unwrap();

    let delivered = h.engine.chat.mark_delivered(chat_id, b).unwrap();
    assert_eq!(delivered.updated, 1);
    assert_eq!(delivered.up_to_sequence, 2);

    let log = h.engine.chat.messages_after(chat_id, b, 0, 50).unwrap();
    assert_eq!(log[0].status, MessageStatus::Read);
    assert_eq!(log[1].status, MessageStatus::Delivered);
}

#[test]
fn backfill_resumes_after_sequence() {
    let h = harness();
    let (a, b, chat_id) = h.matched_pair();
    for i in 0..4 {
        h.engine.chat.send_message(chat_id, a, &format!("m{i}")).unwrap();
    }
    let tail = h.engine.chat.messages_after(chat_id, b, 2, 50).unwrap();
    let seqs: Vec<i64> = tail.iter().map(|m| m.server_sequence).collect();
    assert_eq!(seqs, vec![3, 4]);

    let page = h.engine.chat.recent_messages(chat_id, b, Some(4), 2).unwrap();
    let seqs: Vec<i64> = page.iter().map(|m| m.server_sequence).collect();
    assert_eq!(seqs, vec![2, 3]);
}

#[test]
fn direct_chat_is_unique_per_pair() {
    let h = harness();
    let a = h.user("ana", 1.0);
    let b = h.user("bia", 2.0);

    let (chat, created) = h.engine.chat.open_direct_chat(a, b).unwrap();
    assert!(created);
    assert!(chat.match_id.is_none());
    let (again, created) = h.engine.chat.open_direct_chat(b, a).unwrap();
    assert!(!created);
    assert_eq!(again.id, chat.id);

    assert_eq!(h.engine.chat.quota(chat.id, a).unwrap(), QuotaRemaining::Limited(5));
    let sent = h.engine.chat.send_message(chat.id, b, "oi").unwrap();
    assert_eq!(sent.quota, QuotaRemaining::Limited(4));

    let err = h.engine.chat.open_direct_chat(a, a).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn recipient_is_notified_of_new_messages() {
    let h = harness();
    let (a, b, chat_id) = h.matched_pair();
    h.engine.chat.send_message(chat_id, a, "oi").unwrap();

    assert!(h.sink.sent_to(b).iter().any(|e| matches!(
        e,
        GatewayEvent::Notification { kind: NotificationKind::MessageReceived, .. }
    )));
    assert!(!h.sink.sent_to(a).iter().any(|e| matches!(
        e,
        GatewayEvent::Notification { kind: NotificationKind::MessageReceived, .. }
    )));
}

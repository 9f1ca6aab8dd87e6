use std::time::Duration;

use super::*;
use crate::clock::MockClock;
use crate::error::FailureCategory;
use crate::history::{ConversationTurn, RawMessage};
use crate::mocks::{MockBackend, MockHistory, Scripted, DEFAULT_MOCK_REPLY};

const BOT: u64 = 42;
const USER: u64 = 7;
const NOW: i64 = 1_700_000_000_000;

struct Harness {
    backend: MockBackend,
    clock: MockClock,
    orchestrator: Orchestrator<MockBackend, MockClock>,
}

async fn harness(keys: usize, settings: RelaySettings) -> Harness {
    let backend = MockBackend::new();
    let clock = MockClock::at(NOW);
    let pool = KeyPool::new(backend.clone(), (0..keys).map(|i| format!("key-{}", i))).unwrap();
    pool.activate_first_healthy().await.unwrap();

    let orchestrator = Orchestrator::new(
        Arc::new(pool),
        Arc::new(CooldownTracker::new(settings.cooldown)),
        clock.clone(),
        settings,
    );
    Harness {
        backend,
        clock,
        orchestrator,
    }
}

fn mention(content: &str) -> MentionEvent {
    MentionEvent {
        author_id: USER,
        channel_id: 1,
        content: content.to_string(),
    }
}

fn quota() -> BackendError {
    BackendError::QuotaExceeded("Resource has been exhausted".into())
}

// ── input gates ──────────────────────────────────────────────────────────────

#[test]
fn test_strip_mention_forms() {
    assert_eq!(strip_mention("<@42> hello", BOT), "hello");
    assert_eq!(strip_mention("hey <@!42>  there ", BOT), "hey   there");
    assert_eq!(strip_mention("<@99> hi", BOT), "<@99> hi");
    assert_eq!(strip_mention("  <@42>  ", BOT), "");
}

#[tokio::test]
async fn test_empty_mention_is_refused() {
    let h = harness(1, RelaySettings::default()).await;
    let outcome = h
        .orchestrator
        .handle_mention(&mention("<@42>   "), BOT, &MockHistory::empty())
        .await;
    assert_eq!(outcome, Outcome::Refusal(Refusal::EmptyInput));
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn test_length_gate_counts_characters() {
    let settings = RelaySettings {
        max_message_length: 5,
        ..RelaySettings::default()
    };
    let h = harness(1, settings).await;

    assert!(h.orchestrator.admit(&mention("<@42> ééééé"), BOT).is_ok());
    h.clock.advance(Duration::from_secs(10));
    assert_eq!(
        h.orchestrator.admit(&mention("<@42> 123456"), BOT),
        Err(Refusal::TooLong { max: 5 })
    );
}

#[tokio::test]
async fn test_cooldown_refusal_and_recovery() {
    let h = harness(1, RelaySettings::default()).await;
    let history = MockHistory::empty();

    let first = h
        .orchestrator
        .handle_mention(&mention("<@42> one"), BOT, &history)
        .await;
    assert_eq!(first, Outcome::Reply(DEFAULT_MOCK_REPLY.to_string()));

    h.clock.advance(Duration::from_millis(1_200));
    let second = h
        .orchestrator
        .handle_mention(&mention("<@42> two"), BOT, &history)
        .await;
    assert_eq!(
        second,
        Outcome::Refusal(Refusal::Cooldown {
            retry_after: Duration::from_secs(4)
        })
    );

    h.clock.advance(Duration::from_millis(3_800));
    let third = h
        .orchestrator
        .handle_mention(&mention("<@42> three"), BOT, &history)
        .await;
    assert!(matches!(third, Outcome::Reply(_)));
    assert_eq!(h.backend.call_count(), 2);
}

// ── request framing ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_request_carries_history_prompt_and_generation_config() {
    let settings = RelaySettings {
        system_prompt: "You are helpful.".to_string(),
        ..RelaySettings::default()
    };
    let h = harness(1, settings).await;
    let history = MockHistory::new(vec![
        RawMessage {
            author_id: BOT,
            is_bot_author: true,
            content: "Sure, ask away.".into(),
            created_at_ms: NOW - 1_000,
        },
        RawMessage {
            author_id: USER,
            is_bot_author: false,
            content: "Can I ask something?".into(),
            created_at_ms: NOW - 2_000,
        },
    ]);

    h.orchestrator
        .handle_mention(&mention("<@42> what is rust"), BOT, &history)
        .await;

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 1);
    let req = &calls[0].request;
    assert_eq!(req.message, "what is rust");
    assert_eq!(req.system_prompt, "You are helpful.");
    assert_eq!(req.max_output_tokens, 1000);
    assert_eq!(req.temperature, 0.7);
    assert_eq!(
        req.history,
        vec![
            ConversationTurn::user("Can I ask something?"),
            ConversationTurn::model("Sure, ask away."),
        ]
    );
    assert_eq!(history.requested_limits(), vec![10]);
}

#[tokio::test]
async fn test_history_failure_still_answers() {
    let h = harness(1, RelaySettings::default()).await;
    let outcome = h
        .orchestrator
        .handle_mention(&mention("<@42> hi"), BOT, &MockHistory::failing())
        .await;

    assert!(matches!(outcome, Outcome::Reply(_)));
    assert!(h.backend.calls()[0].request.history.is_empty());
}

// ── output policy ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_whitespace_reply_is_empty_response() {
    let h = harness(1, RelaySettings::default()).await;
    h.backend.reply("key-0", "  \n ");

    let outcome = h
        .orchestrator
        .handle_mention(&mention("<@42> hi"), BOT, &MockHistory::empty())
        .await;
    assert_eq!(outcome, Outcome::Refusal(Refusal::EmptyResponse));
}

#[tokio::test]
async fn test_long_reply_is_truncated() {
    let h = harness(1, RelaySettings::default()).await;
    h.backend.reply("key-0", "x".repeat(2_345));

    match h
        .orchestrator
        .handle_mention(&mention("<@42> essay please"), BOT, &MockHistory::empty())
        .await
    {
        Outcome::TruncatedReply(text) => {
            assert_eq!(text.chars().count(), 2_000);
            assert!(text.ends_with("..."));
        }
        other => panic!("expected truncated reply, got {:?}", other),
    }
}

// ── failover and retry ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_rotation_finds_working_key_without_retrying() {
    let h = harness(3, RelaySettings::default()).await;
    h.backend.fail("key-0", quota());
    h.backend.fail("key-1", quota());
    h.backend.reply("key-2", "from the third key");

    let outcome = h
        .orchestrator
        .handle_mention(&mention("<@42> hello"), BOT, &MockHistory::empty())
        .await;

    assert_eq!(outcome, Outcome::Reply("from the third key".to_string()));
    assert_eq!(h.backend.called_keys(), vec!["key-0", "key-1", "key-2"]);
    assert!(h.clock.sleeps().is_empty());
    assert_eq!(h.orchestrator.pool().active_ordinal(), Some(2));
}

#[tokio::test]
async fn test_rotation_skips_key_that_fails_probe() {
    let h = harness(3, RelaySettings::default()).await;
    h.backend.fail_probe("key-1", BackendError::InvalidCredential("revoked".into()));
    h.backend.fail("key-0", quota());

    let outcome = h
        .orchestrator
        .handle_mention(&mention("<@42> hello"), BOT, &MockHistory::empty())
        .await;

    assert!(matches!(outcome, Outcome::Reply(_)));
    assert_eq!(h.backend.called_keys(), vec!["key-0", "key-2"]);
}

#[tokio::test]
async fn test_non_rotating_error_retries_on_same_key_with_backoff() {
    let h = harness(2, RelaySettings::default()).await;
    h.backend.fail("key-0", BackendError::Generic("500".into()));
    h.backend.fail("key-0", BackendError::Generic("500".into()));

    let outcome = h
        .orchestrator
        .handle_mention(&mention("<@42> hello"), BOT, &MockHistory::empty())
        .await;

    assert_eq!(outcome, Outcome::Reply(DEFAULT_MOCK_REPLY.to_string()));
    assert_eq!(h.backend.called_keys(), vec!["key-0", "key-0", "key-0"]);
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_millis(1_000), Duration::from_millis(2_000)]
    );
}

#[tokio::test]
async fn test_retry_budget_exhausted_maps_to_category() {
    let h = harness(1, RelaySettings::default()).await;
    for _ in 0..3 {
        h.backend.fail("key-0", BackendError::SafetyBlocked("SAFETY".into()));
    }

    let outcome = h
        .orchestrator
        .handle_mention(&mention("<@42> hello"), BOT, &MockHistory::empty())
        .await;

    assert_eq!(outcome, Outcome::Failed(FailureCategory::Safety));
    assert_eq!(h.backend.call_count(), 3);
    assert_eq!(h.clock.sleeps().len(), 2);
}

#[tokio::test]
async fn test_all_keys_exhausted_reports_last_error_category() {
    let settings = RelaySettings {
        max_retries: 0,
        ..RelaySettings::default()
    };
    let h = harness(2, settings).await;
    h.backend.fail("key-0", quota());
    h.backend.fail("key-1", quota());

    let outcome = h
        .orchestrator
        .handle_mention(&mention("<@42> hello"), BOT, &MockHistory::empty())
        .await;

    assert_eq!(outcome, Outcome::Failed(FailureCategory::Quota));
    assert_eq!(h.backend.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_hung_call_times_out() {
    let settings = RelaySettings {
        max_retries: 0,
        call_timeout: Duration::from_secs(30),
        ..RelaySettings::default()
    };
    let h = harness(1, settings).await;
    h.backend.script("key-0", Scripted::Hang);

    let outcome = h
        .orchestrator
        .handle_mention(&mention("<@42> hello"), BOT, &MockHistory::empty())
        .await;

    assert_eq!(outcome, Outcome::Failed(FailureCategory::Timeout));
}

#[tokio::test]
async fn test_backoff_multiplication_saturates() {
    let settings = RelaySettings {
        backoff: Duration::MAX,
        ..RelaySettings::default()
    };
    let h = harness(1, settings).await;
    h.backend.fail("key-0", BackendError::Generic("500".into()));
    h.backend.fail("key-0", BackendError::Generic("500".into()));

    let outcome = h
        .orchestrator
        .handle_mention(&mention("<@42> hello"), BOT, &MockHistory::empty())
        .await;

    assert!(matches!(outcome, Outcome::Reply(_)));
    assert_eq!(h.clock.sleeps(), vec![Duration::MAX, Duration::MAX]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mentions_share_one_rotation() {
    let h = harness(3, RelaySettings::default()).await;
    for _ in 0..4 {
        h.backend.fail("key-0", quota());
    }
    let orchestrator = Arc::new(h.orchestrator);

    let mut tasks = tokio::task::JoinSet::new();
    for author_id in 1..=4u64 {
        let orchestrator = orchestrator.clone();
        tasks.spawn(async move {
            let event = MentionEvent {
                author_id,
                channel_id: 1,
                content: "<@42> hello".to_string(),
            };
            orchestrator
                .handle_mention(&event, BOT, &MockHistory::empty())
                .await
        });
    }

    let outcomes = tokio::time::timeout(Duration::from_secs(5), async {
        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined.unwrap());
        }
        outcomes
    })
    .await
    .expect("concurrent mentions deadlocked");

    assert_eq!(outcomes.len(), 4);
    for outcome in &outcomes {
        assert!(matches!(outcome, Outcome::Reply(_)), "got {:?}", outcome);
    }

    let pool_keys = ["key-0", "key-1", "key-2"];
    for key in h.backend.called_keys() {
        assert!(pool_keys.contains(&key.as_str()), "unexpected key {}", key);
    }
    let active = orchestrator.pool().active_ordinal().unwrap();
    assert!(active < pool_keys.len());
}

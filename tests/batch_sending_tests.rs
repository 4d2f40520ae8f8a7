use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use segmail::dispatch::{DispatchError, DispatchSettings, EmailService, NewEmail, VerificationGate};
use segmail::member::{Member, MemberStatus};
use segmail::provider::MockProvider;
use segmail::render::Visibility;
use segmail::storage::{BatchStatus, DuckDbStorage, EmailStatus, Storage};

const SEGMENTED_HTML: &str = concat!(
    "<p>Hi %%{first_name, \"there\"}%%</p>",
    "<div data-gh-segment=\"status:free\"><p>Upgrade today</p></div>",
    "<div data-gh-segment=\"status:-free\"><p>Thanks for your support</p></div>",
    "<!--members-only--><p>Full story</p>",
);

async fn setup(provider: MockProvider) -> (Arc<EmailService>, Arc<dyn Storage>) {
    let storage: Arc<dyn Storage> = Arc::new(DuckDbStorage::in_memory().unwrap());
    storage.init_schema().await.unwrap();

    let joined = Utc::now() - Duration::hours(1);
    let members = vec![
        Member::new("free1@example.com", MemberStatus::Free, joined).with_name("Jamie Free"),
        Member::new("free2@example.com", MemberStatus::Free, joined).with_label("label-1"),
        Member::new("free3@example.com", MemberStatus::Free, joined),
        Member::new("paid1@example.com", MemberStatus::Paid, joined).with_name("Robin Paid"),
        Member::new("paid2@example.com", MemberStatus::Comped, joined),
        Member::new("gone@example.com", MemberStatus::Free, joined)
            .with_label("label-1")
            .unsubscribed(),
    ];
    storage.insert_members(&members).await.unwrap();

    let settings = DispatchSettings::new("https://blog.example.com").with_concurrency(2);
    let service = EmailService::new(storage.clone(), Arc::new(provider), settings);
    (Arc::new(service), storage)
}

fn new_email(filter: &str) -> NewEmail {
    NewEmail {
        post_id: "post-1".to_string(),
        newsletter_id: None,
        subject: "Weekly update".to_string(),
        from: "Blog <news@example.com>".to_string(),
        reply_to: None,
        html: SEGMENTED_HTML.to_string(),
        visibility: Some(Visibility::Paid),
        recipient_filter: filter.to_string(),
    }
}

#[tokio::test]
async fn test_send_splits_audience_by_segment() {
    let provider = MockProvider::new();
    let (service, storage) = setup(provider.clone()).await;

    let email = service.create_email(new_email("")).await.unwrap();
    let status = service.send(email.id).await.unwrap();
    assert_eq!(status, EmailStatus::Submitted);

    let batches = storage.list_batches(email.id).await.unwrap();
    assert_eq!(batches.len(), 2);
    assert!(batches.iter().all(|b| b.status == BatchStatus::Submitted));
    assert!(batches.iter().all(|b| b.provider_id.is_some()));

    let sent = provider.sent();
    assert_eq!(sent.len(), 2);
    let free = sent
        .iter()
        .find(|p| p.recipients.contains(&"free1@example.com".to_string()))
        .unwrap();
    let paid = sent
        .iter()
        .find(|p| p.recipients.contains(&"paid1@example.com".to_string()))
        .unwrap();

    assert_eq!(free.recipients.len(), 3);
    assert!(free.html.contains("Upgrade today"));
    assert!(!free.html.contains("Thanks for your support"));
    assert!(!free.html.contains("Full story"));

    assert_eq!(paid.recipients.len(), 2);
    assert!(paid.html.contains("Thanks for your support"));
    assert!(paid.html.contains("Full story"));
    assert!(!paid.html.contains("Upgrade today"));

    let stored = service.get_email(email.id).await.unwrap();
    assert_eq!(stored.email_count, 5);
    assert!(stored.submitted_at.is_some());
}

#[tokio::test]
async fn test_merge_fields_become_recipient_variables() {
    let provider = MockProvider::new();
    let (service, _storage) = setup(provider.clone()).await;

    let email = service.create_email(new_email("")).await.unwrap();
    service.send(email.id).await.unwrap();

    for payload in provider.sent() {
        assert!(!payload.html.contains("%%{"));
        assert!(payload.headers.contains_key("List-Unsubscribe"));
        for address in &payload.recipients {
            assert!(payload.recipient_variables.contains_key(address));
        }
    }

    let values: Vec<String> = provider
        .sent()
        .iter()
        .flat_map(|p| p.recipient_variables.get("free1@example.com").cloned())
        .flat_map(|vars| vars.into_values())
        .collect();
    assert!(values.contains(&"Jamie".to_string()));

    let fallback: Vec<String> = provider
        .sent()
        .iter()
        .flat_map(|p| p.recipient_variables.get("free3@example.com").cloned())
        .flat_map(|vars| vars.into_values())
        .collect();
    assert!(fallback.contains(&"there".to_string()));
}

#[tokio::test]
async fn test_batch_size_one_sends_each_member_once() {
    let provider = MockProvider::new().with_batch_size(1);
    let (service, storage) = setup(provider.clone()).await;

    let email = service.create_email(new_email("")).await.unwrap();
    assert_eq!(service.send(email.id).await.unwrap(), EmailStatus::Submitted);

    assert_eq!(provider.send_call_count(), 5);
    assert_eq!(storage.list_batches(email.id).await.unwrap().len(), 5);

    let recipients = storage.list_recipients(email.id, None).await.unwrap();
    let unique: HashSet<_> = recipients.iter().map(|r| r.member_id).collect();
    assert_eq!(recipients.len(), 5);
    assert_eq!(unique.len(), 5);
    assert!(recipients.iter().all(|r| r.member_email != "gone@example.com"));
}

#[tokio::test]
async fn test_failed_batch_is_retried_alone() {
    let provider = MockProvider::new().with_batch_size(1).fail_on_call(4);
    let (service, storage) = setup(provider.clone()).await;

    let email = service.create_email(new_email("")).await.unwrap();
    assert_eq!(service.send(email.id).await.unwrap(), EmailStatus::Failed);

    let batches = storage.list_batches(email.id).await.unwrap();
    let failed: Vec<_> = batches.iter().filter(|b| b.status == BatchStatus::Failed).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_status_code, Some(500));
    assert_eq!(
        failed[0].error_message.as_deref(),
        Some("Internal server error: Something went wrong")
    );
    assert!(failed[0].error_data.is_some());
    let failed_id = failed[0].id;

    let submitted_before: Vec<_> = batches
        .iter()
        .filter(|b| b.status == BatchStatus::Submitted)
        .map(|b| (b.id, b.provider_id.clone()))
        .collect();
    assert_eq!(submitted_before.len(), 4);

    assert_eq!(service.retry(email.id).await.unwrap(), EmailStatus::Submitted);
    assert_eq!(provider.send_call_count(), 6);

    let batches = storage.list_batches(email.id).await.unwrap();
    assert!(batches.iter().all(|b| b.status == BatchStatus::Submitted));
    for (id, provider_id) in submitted_before {
        let batch = batches.iter().find(|b| b.id == id).unwrap();
        assert_eq!(batch.provider_id, provider_id);
    }
    let retried = batches.iter().find(|b| b.id == failed_id).unwrap();
    assert_eq!(retried.provider_id.as_deref(), Some("mock-id-6"));
    assert!(retried.error_message.is_none());

    let delivered: HashSet<String> = provider
        .sent()
        .into_iter()
        .flat_map(|p| p.recipients)
        .collect();
    assert_eq!(delivered.len(), 5);
}

#[tokio::test]
async fn test_retry_without_failures_is_a_no_op() {
    let provider = MockProvider::new();
    let (service, _storage) = setup(provider.clone()).await;

    let email = service.create_email(new_email("")).await.unwrap();
    service.send(email.id).await.unwrap();
    let calls = provider.send_call_count();

    assert_eq!(service.retry(email.id).await.unwrap(), EmailStatus::Submitted);
    assert_eq!(provider.send_call_count(), calls);
}

#[tokio::test]
async fn test_sending_twice_is_rejected() {
    let (service, _storage) = setup(MockProvider::new()).await;

    let email = service.create_email(new_email("")).await.unwrap();
    service.send(email.id).await.unwrap();

    let err = service.send(email.id).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::InvalidState {
            status: EmailStatus::Submitted,
            ..
        }
    ));
}

#[tokio::test]
async fn test_members_joining_after_snapshot_are_excluded() {
    let provider = MockProvider::new();
    let (service, storage) = setup(provider.clone()).await;

    let email = service.create_email(new_email("")).await.unwrap();
    let late = Member::new(
        "late@example.com",
        MemberStatus::Paid,
        email.snapshot_at + Duration::seconds(1),
    );
    storage.insert_members(&[late]).await.unwrap();

    service.send(email.id).await.unwrap();

    let recipients = storage.list_recipients(email.id, None).await.unwrap();
    assert_eq!(recipients.len(), 5);
    assert!(recipients.iter().all(|r| r.member_email != "late@example.com"));

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let next = service.create_email(new_email("")).await.unwrap();
    service.send(next.id).await.unwrap();
    let recipients = storage.list_recipients(next.id, None).await.unwrap();
    assert_eq!(recipients.len(), 6);
    assert!(recipients.iter().any(|r| r.member_email == "late@example.com"));
}

#[tokio::test]
async fn test_recipient_filter_limits_audience() {
    let provider = MockProvider::new();
    let (service, storage) = setup(provider.clone()).await;

    let email = service
        .create_email(new_email("status:-free,label:label-1"))
        .await
        .unwrap();
    service.send(email.id).await.unwrap();

    let recipients = storage.list_recipients(email.id, None).await.unwrap();
    let mut addresses: Vec<_> = recipients.iter().map(|r| r.member_email.as_str()).collect();
    addresses.sort();
    assert_eq!(
        addresses,
        vec!["free2@example.com", "paid1@example.com", "paid2@example.com"]
    );
}

#[tokio::test]
async fn test_unmarked_post_uses_single_rendering() {
    let provider = MockProvider::new();
    let (service, storage) = setup(provider.clone()).await;

    let mut request = new_email("");
    request.html = "<p>Plain news</p>".to_string();
    request.visibility = Some(Visibility::Public);

    let email = service.create_email(request).await.unwrap();
    service.send(email.id).await.unwrap();

    let batches = storage.list_batches(email.id).await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].segment, None);
    assert_eq!(provider.sent()[0].html, "<p>Plain news</p>");
}

#[tokio::test]
async fn test_empty_audience_completes_without_batches() {
    let provider = MockProvider::new();
    let (service, storage) = setup(provider.clone()).await;

    let email = service.create_email(new_email("label:nobody")).await.unwrap();
    assert_eq!(service.send(email.id).await.unwrap(), EmailStatus::Submitted);
    assert!(storage.list_batches(email.id).await.unwrap().is_empty());
    assert_eq!(provider.send_call_count(), 0);
}

#[tokio::test]
async fn test_provider_outage_fails_every_batch() {
    let provider = MockProvider::new().with_batch_size(2);
    provider.set_failing(true);
    let (service, storage) = setup(provider.clone()).await;

    let email = service.create_email(new_email("")).await.unwrap();
    assert_eq!(service.send(email.id).await.unwrap(), EmailStatus::Failed);
    assert!(storage
        .list_batches(email.id)
        .await
        .unwrap()
        .iter()
        .all(|b| b.status == BatchStatus::Failed));

    provider.set_failing(false);
    assert_eq!(service.retry(email.id).await.unwrap(), EmailStatus::Submitted);
}

#[tokio::test]
async fn test_large_recent_import_blocks_new_emails() {
    let provider = MockProvider::new();
    let storage: Arc<dyn Storage> = Arc::new(DuckDbStorage::in_memory().unwrap());
    storage.init_schema().await.unwrap();
    let recent: Vec<Member> = (0..3)
        .map(|i| Member::new(format!("m{}@example.com", i), MemberStatus::Free, Utc::now()))
        .collect();
    storage.insert_members(&recent).await.unwrap();

    let service = EmailService::new(
        storage,
        Arc::new(provider),
        DispatchSettings::new("https://blog.example.com"),
    )
    .with_verification(VerificationGate::new(2, std::time::Duration::from_secs(3600)));

    let err = service.create_email(new_email("")).await.unwrap_err();
    assert!(matches!(err, DispatchError::Precondition(_)));
}

#[tokio::test]
async fn test_label_scoped_blocks_reach_matching_members() {
    let provider = MockProvider::new();
    let (service, storage) = setup(provider.clone()).await;
    let joined = Utc::now() - Duration::hours(1);
    storage
        .insert_members(&[Member::new("vip@example.com", MemberStatus::Paid, joined).with_label("VIP")])
        .await
        .unwrap();

    let mut email = new_email("");
    email.html = concat!(
        "<p>All</p>",
        "<div data-gh-segment=\"label.slug:VIP\"><p>VIP lounge</p></div>",
        "<div data-gh-segment=\"status:free, label.slug:label-1\"><p>Free or label one</p></div>",
        "<div data-gh-segment=\"status:-free\"><p>Paid thanks</p></div>",
    )
    .to_string();
    let email = service.create_email(email).await.unwrap();
    assert_eq!(service.send(email.id).await.unwrap(), EmailStatus::Submitted);

    let batches = storage.list_batches(email.id).await.unwrap();
    assert_eq!(batches.len(), 3);
    assert!(batches
        .iter()
        .any(|b| b.segment.as_deref() == Some("status:-free") && b.scoped_segments == vec!["label:VIP"]));

    let sent = provider.sent();
    let html_for = |address: &str| {
        sent.iter()
            .find(|p| p.recipients.iter().any(|r| r == address))
            .map(|p| p.html.clone())
            .unwrap()
    };

    let vip = html_for("vip@example.com");
    assert!(vip.contains("VIP lounge"));
    assert!(vip.contains("Paid thanks"));
    assert!(!vip.contains("Free or label one"));

    let paid = html_for("paid1@example.com");
    assert!(paid.contains("Paid thanks"));
    assert!(!paid.contains("VIP lounge"));
    assert!(!paid.contains("Free or label one"));

    for address in ["free1@example.com", "free2@example.com"] {
        let free = html_for(address);
        assert!(free.contains("Free or label one"));
        assert!(!free.contains("VIP lounge"));
        assert!(!free.contains("Paid thanks"));
    }
}

#[tokio::test]
async fn test_interrupted_send_is_recovered_and_retried() {
    let provider = MockProvider::new()
        .with_batch_size(1)
        .with_delay(StdDuration::from_millis(100));
    let (service, storage) = setup(provider.clone()).await;
    let email = service.create_email(new_email("")).await.unwrap();

    let handle = service.spawn_send(email.id);
    let mut in_flight = false;
    for _ in 0..200 {
        let batches = storage.list_batches(email.id).await.unwrap();
        if batches.iter().any(|b| b.status == BatchStatus::Sending) {
            in_flight = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    assert!(in_flight, "no batch was ever in flight");

    // Simulates the process stopping mid-send
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    tokio::time::sleep(StdDuration::from_millis(200)).await;
    assert_eq!(service.get_email(email.id).await.unwrap().status, EmailStatus::Submitting);

    let report = service.recover().await.unwrap();
    assert_eq!(report.interrupted, vec![email.id]);
    assert!(report.resumed.is_empty());
    assert_eq!(service.get_email(email.id).await.unwrap().status, EmailStatus::Failed);
    assert!(storage
        .list_batches(email.id)
        .await
        .unwrap()
        .iter()
        .all(|b| b.status != BatchStatus::Sending));

    assert_eq!(service.retry(email.id).await.unwrap(), EmailStatus::Submitted);
    assert_eq!(provider.send_call_count(), 5);
    let delivered: Vec<String> = provider.sent().into_iter().flat_map(|p| p.recipients).collect();
    assert_eq!(delivered.len(), 5);
    assert_eq!(delivered.iter().collect::<HashSet<_>>().len(), 5);
}

#[tokio::test]
async fn test_email_interrupted_before_planning_is_planned_on_retry() {
    let provider = MockProvider::new();
    let (service, storage) = setup(provider.clone()).await;
    let email = service.create_email(new_email("")).await.unwrap();
    let waiting = service.create_email(new_email("status:free")).await.unwrap();

    // Claimed by a process that stopped before writing any batch
    assert!(storage.claim_email(email.id, EmailStatus::Pending).await.unwrap());

    let report = service.recover().await.unwrap();
    assert_eq!(report.interrupted, vec![email.id]);
    assert_eq!(report.resumed, vec![waiting.id]);

    assert_eq!(service.retry(email.id).await.unwrap(), EmailStatus::Submitted);
    let stored = service.get_email(email.id).await.unwrap();
    assert_eq!(stored.email_count, 5);
    assert_eq!(storage.list_batches(email.id).await.unwrap().len(), 2);

    for _ in 0..100 {
        if service.get_email(waiting.id).await.unwrap().status == EmailStatus::Submitted {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    panic!("resumed email was never submitted");
}

#[tokio::test]
async fn test_concurrent_retries_send_each_failed_batch_once() {
    let provider = MockProvider::new()
        .with_batch_size(1)
        .with_delay(StdDuration::from_millis(50));
    provider.set_failing(true);
    let (service, storage) = setup(provider.clone()).await;

    let email = service.create_email(new_email("")).await.unwrap();
    assert_eq!(service.send(email.id).await.unwrap(), EmailStatus::Failed);
    let failed: HashSet<_> = storage
        .list_batches(email.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|b| b.status == BatchStatus::Failed)
        .map(|b| b.id)
        .collect();
    assert_eq!(failed.len(), 5);
    provider.set_failing(false);

    let first = service.spawn_retry(email.id);
    let second = service.spawn_retry(email.id);
    let outcomes = [first.await.unwrap(), second.await.unwrap()];

    let submitted = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(EmailStatus::Submitted)))
        .count();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, Err(DispatchError::InvalidState { .. })))
        .count();
    assert_eq!((submitted, rejected), (1, 1));

    assert_eq!(provider.send_call_count(), 10);
    let resent: Vec<_> = provider.sent().into_iter().map(|p| p.batch_id).collect();
    assert_eq!(resent.len(), 5);
    assert_eq!(resent.into_iter().collect::<HashSet<_>>(), failed);
}

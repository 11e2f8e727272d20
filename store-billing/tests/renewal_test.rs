mod common;

use common::{at, d, date, noon, World};
use store_billing::jobs::RenewalScheduler;
use store_billing::models::{
    PluginSubscriptionStatus, SubscriptionStatus, TransactionStatus, TransactionType,
};

fn scheduler(world: &World) -> RenewalScheduler {
    RenewalScheduler::new(world.store.clone(), world.gateway.clone())
}

#[tokio::test]
async fn due_subscription_is_charged_and_rolled_forward() {
    let world = World::new();
    let plan = world.plan("pro", "299", "0.005");
    let today = date(2024, 3, 15);
    let store_id = world.due_store(&plan, today, 0);
    let token = world.token(store_id);

    let summary = scheduler(&world).run(noon(today)).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total_charged, d("352.82"));
    assert!(summary.errors.is_empty());

    let calls = world.gateway.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].amount, d("352.82"));
    assert_eq!(calls[0].token, token.gateway_token_uid);
    assert_eq!(calls[0].customer_reference, token.gateway_customer_uid);
    assert_eq!(calls[0].metadata.purpose, "renewal_pro");
    assert_eq!(calls[0].metadata.store_reference, store_id.to_string());
    assert_eq!(calls[0].line_items.len(), 1);
    assert_eq!(calls[0].line_items[0].price, d("352.82"));

    let subscription = world.subscription(store_id);
    assert_eq!(subscription.status(), SubscriptionStatus::Active);
    assert_eq!(subscription.current_period_start, Some(today));
    assert_eq!(subscription.current_period_end, Some(date(2024, 4, 15)));
    assert_eq!(subscription.next_payment_date, Some(date(2024, 4, 15)));
    assert_eq!(subscription.last_payment_amount, Some(d("352.82")));
    assert_eq!(subscription.last_payment_status.as_deref(), Some("success"));
    assert_eq!(subscription.failed_payment_count, 0);

    let ledger = world.store.transactions();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].transaction_type(), TransactionType::Subscription);
    assert_eq!(ledger[0].status(), TransactionStatus::Success);
    assert_eq!(ledger[0].subscription_id, Some(subscription.subscription_id));
    assert_eq!(ledger[0].amount, d("299"));
    assert_eq!(ledger[0].vat_amount, d("53.82"));
    assert_eq!(ledger[0].total_amount, d("352.82"));
    assert_eq!(ledger[0].gateway_transaction_uid.as_deref(), Some("txn-1"));
    assert_eq!(ledger[0].gateway_approval_num.as_deref(), Some("appr-1"));

    let token = world.store.token(token.token_id).unwrap();
    assert_eq!(token.last_used_at, Some(noon(today)));
    assert!(world.is_billing_current(store_id));
}

#[tokio::test]
async fn subscriptions_not_yet_due_are_left_alone() {
    let world = World::new();
    let plan = world.plan("lite", "99", "0");
    let store_id = world.due_store(&plan, date(2024, 3, 16), 0);
    world.token(store_id);

    let summary = scheduler(&world).run(noon(date(2024, 3, 15))).await.unwrap();

    assert_eq!(summary.processed, 0);
    assert!(world.gateway.calls().is_empty());
}

#[tokio::test]
async fn third_consecutive_failure_blocks_the_store() {
    let world = World::new();
    let plan = world.plan("pro", "299", "0.005");
    let store_id = world.due_store(&plan, date(2024, 3, 1), 0);
    let token = world.token(store_id);
    world.gateway.decline(&token.gateway_token_uid);

    let first = scheduler(&world).run(noon(date(2024, 3, 1))).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.blocked, 0);
    let subscription = world.subscription(store_id);
    assert_eq!(subscription.failed_payment_count, 1);
    assert_eq!(subscription.status(), SubscriptionStatus::Active);
    assert_eq!(subscription.last_payment_status.as_deref(), Some("failed"));
    assert!(world.is_billing_current(store_id));

    scheduler(&world).run(noon(date(2024, 3, 2))).await.unwrap();
    assert_eq!(world.subscription(store_id).failed_payment_count, 2);
    assert!(world.is_billing_current(store_id));

    let third = scheduler(&world).run(noon(date(2024, 3, 3))).await.unwrap();
    assert_eq!(third.failed, 1);
    assert_eq!(third.blocked, 1);
    assert_eq!(third.delinquent_blocked, 1);
    assert_eq!(world.subscription(store_id).status(), SubscriptionStatus::Blocked);
    assert!(!world.is_billing_current(store_id));

    // Blocked subscriptions are no longer selected.
    let fourth = scheduler(&world).run(noon(date(2024, 3, 4))).await.unwrap();
    assert_eq!(fourth.processed, 0);
    assert_eq!(world.gateway.calls().len(), 3);

    let ledger = world.store.transactions();
    assert_eq!(ledger.len(), 3);
    assert!(ledger.iter().all(|t| t.status() == TransactionStatus::Failed));
    assert!(ledger
        .iter()
        .all(|t| t.failure_reason.as_deref().unwrap_or_default().contains("Card declined")));
    assert!(ledger.iter().all(|t| t.total_amount == d("352.82")));
}

#[tokio::test]
async fn success_before_third_failure_resets_the_count() {
    let world = World::new();
    let plan = world.plan("pro", "299", "0.005");
    let store_id = world.due_store(&plan, date(2024, 3, 1), 0);
    let token = world.token(store_id);

    world.gateway.decline(&token.gateway_token_uid);
    scheduler(&world).run(noon(date(2024, 3, 1))).await.unwrap();
    scheduler(&world).run(noon(date(2024, 3, 2))).await.unwrap();
    assert_eq!(world.subscription(store_id).failed_payment_count, 2);

    world.gateway.approve(&token.gateway_token_uid);
    let summary = scheduler(&world).run(noon(date(2024, 3, 3))).await.unwrap();

    assert_eq!(summary.successful, 1);
    let subscription = world.subscription(store_id);
    assert_eq!(subscription.failed_payment_count, 0);
    assert_eq!(subscription.status(), SubscriptionStatus::Active);
    assert_eq!(subscription.next_payment_date, Some(date(2024, 4, 3)));
    assert!(world.is_billing_current(store_id));
}

#[tokio::test]
async fn missing_token_escalates_without_calling_the_gateway() {
    let world = World::new();
    let plan = world.plan("pro", "299", "0.005");
    let fresh = world.due_store(&plan, date(2024, 3, 1), 0);
    let delinquent = world.due_store(&plan, date(2024, 3, 1), 2);

    let summary = scheduler(&world).run(noon(date(2024, 3, 1))).await.unwrap();

    assert!(world.gateway.calls().is_empty());
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.blocked, 1);
    assert!(summary.errors.iter().all(|e| e.ends_with("No payment token")));

    assert_eq!(world.subscription(fresh).failed_payment_count, 1);
    assert_eq!(world.subscription(fresh).status(), SubscriptionStatus::Active);
    assert_eq!(world.subscription(delinquent).status(), SubscriptionStatus::Blocked);
    assert!(!world.is_billing_current(delinquent));

    // No gateway call, no ledger entry.
    assert!(world.store.transactions().is_empty());
}

#[tokio::test]
async fn one_failing_store_does_not_stop_the_run() {
    let world = World::new();
    let plan = world.plan("pro", "299", "0.005");
    let declined = world.due_store(&plan, date(2024, 3, 1), 0);
    let declined_token = world.token(declined);
    let paying = world.due_store(&plan, date(2024, 3, 1), 0);
    world.token(paying);
    world.gateway.decline(&declined_token.gateway_token_uid);

    let summary = scheduler(&world).run(noon(date(2024, 3, 1))).await.unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with(&format!("Store {}:", declined)));
    assert_eq!(world.subscription(paying).failed_payment_count, 0);
}

#[tokio::test]
async fn trial_ending_before_today_is_blocked() {
    let world = World::new();
    let plan = world.plan("pro", "299", "0.005");
    let today = date(2024, 3, 15);
    let expired = world.subscribed_store(&plan, SubscriptionStatus::Trial, |s| {
        s.trial_ends_at = Some(date(2024, 3, 14));
    });
    let ends_today = world.subscribed_store(&plan, SubscriptionStatus::Trial, |s| {
        s.trial_ends_at = Some(today);
    });
    let ends_later = world.subscribed_store(&plan, SubscriptionStatus::Trial, |s| {
        s.trial_ends_at = Some(date(2024, 3, 20));
    });

    let summary = scheduler(&world).run(noon(today)).await.unwrap();

    assert_eq!(summary.trials_blocked, 1);
    assert_eq!(summary.blocked, 1);
    assert_eq!(world.subscription(expired).status(), SubscriptionStatus::Blocked);
    assert!(!world.is_billing_current(expired));
    for store_id in [ends_today, ends_later] {
        assert_eq!(world.subscription(store_id).status(), SubscriptionStatus::Trial);
        assert!(world.is_billing_current(store_id));
    }
    assert!(world.gateway.calls().is_empty());
}

#[tokio::test]
async fn cancelled_subscription_expires_once_its_period_has_passed() {
    let world = World::new();
    let plan = world.plan("pro", "299", "0.005");
    let today = date(2024, 3, 15);
    let lapsed = world.subscribed_store(&plan, SubscriptionStatus::Cancelled, |s| {
        s.cancel_at_period_end = true;
        s.current_period_end = Some(date(2024, 3, 14));
    });
    let still_paid = world.subscribed_store(&plan, SubscriptionStatus::Cancelled, |s| {
        s.cancel_at_period_end = true;
        s.current_period_end = Some(date(2024, 3, 20));
    });

    let summary = scheduler(&world).run(noon(today)).await.unwrap();

    assert_eq!(summary.cancellations_expired, 1);
    assert_eq!(summary.blocked, 1);
    assert_eq!(world.subscription(lapsed).status(), SubscriptionStatus::Expired);
    assert!(!world.is_billing_current(lapsed));
    assert_eq!(world.subscription(still_paid).status(), SubscriptionStatus::Cancelled);
    assert!(world.is_billing_current(still_paid));
}

#[tokio::test]
async fn status_writes_are_stamped_with_the_run_instant() {
    let world = World::new();
    let plan = world.plan("pro", "299", "0.005");
    let today = date(2024, 3, 15);
    let now = at(today, 2, 30);
    let retrying = world.due_store(&plan, today, 0);
    let delinquent = world.due_store(&plan, today, 2);
    for store_id in [retrying, delinquent] {
        let token = world.token(store_id);
        world.gateway.decline(&token.gateway_token_uid);
    }
    let trial = world.subscribed_store(&plan, SubscriptionStatus::Trial, |s| {
        s.trial_ends_at = Some(date(2024, 3, 1));
    });
    let lapsed = world.subscribed_store(&plan, SubscriptionStatus::Cancelled, |s| {
        s.cancel_at_period_end = true;
        s.current_period_end = Some(date(2024, 3, 1));
    });

    scheduler(&world).run(now).await.unwrap();

    assert_eq!(world.subscription(retrying).failed_payment_count, 1);
    assert_eq!(world.subscription(delinquent).status(), SubscriptionStatus::Blocked);
    assert_eq!(world.subscription(trial).status(), SubscriptionStatus::Blocked);
    assert_eq!(world.subscription(lapsed).status(), SubscriptionStatus::Expired);
    for store_id in [retrying, delinquent, trial, lapsed] {
        assert_eq!(world.subscription(store_id).updated_utc, now);
    }
}

#[tokio::test]
async fn plugin_subscriptions_past_their_end_date_expire() {
    let world = World::new();
    let plan = world.plan("pro", "299", "0.005");
    let today = date(2024, 3, 15);
    let store_id = world.subscribed_store(&plan, SubscriptionStatus::Active, |s| {
        s.next_payment_date = Some(date(2024, 4, 1));
    });
    let lapsed = world.plugin(store_id, PluginSubscriptionStatus::Active, Some(date(2024, 3, 14)));
    let cancelled =
        world.plugin(store_id, PluginSubscriptionStatus::Cancelled, Some(date(2024, 3, 10)));
    let ends_today = world.plugin(store_id, PluginSubscriptionStatus::Active, Some(today));
    let pending = world.plugin(store_id, PluginSubscriptionStatus::Pending, Some(date(2024, 3, 1)));
    let open_ended = world.plugin(store_id, PluginSubscriptionStatus::Active, None);

    let summary = scheduler(&world).run(noon(today)).await.unwrap();

    assert_eq!(summary.plugins_expired, 2);
    assert_eq!(summary.blocked, 0);
    assert!(summary.errors.is_empty());
    for expired in [&lapsed, &cancelled] {
        let row = world
            .store
            .plugin_subscription(expired.plugin_subscription_id)
            .unwrap();
        assert_eq!(row.status(), PluginSubscriptionStatus::Expired);
        assert!(!row.is_active);
        assert_eq!(row.updated_utc, noon(today));
        assert!(!world.store.plugin(expired.plugin_id).unwrap().is_active);
    }
    for untouched in [&ends_today, &pending, &open_ended] {
        let row = world
            .store
            .plugin_subscription(untouched.plugin_subscription_id)
            .unwrap();
        assert_eq!(row.status, untouched.status);
        assert!(world.store.plugin(untouched.plugin_id).unwrap().is_active);
    }
    // Plugins never affect storefront access.
    assert!(world.is_billing_current(store_id));
}

#[tokio::test]
async fn failed_plugin_expiry_is_reported_and_the_run_continues() {
    let world = World::new();
    let plan = world.plan("pro", "299", "0.005");
    let today = date(2024, 3, 15);
    let paying = world.due_store(&plan, today, 0);
    world.token(paying);
    let lapsed = world.subscribed_store(&plan, SubscriptionStatus::Cancelled, |s| {
        s.cancel_at_period_end = true;
        s.current_period_end = Some(date(2024, 3, 14));
    });
    let plugin = world.plugin(paying, PluginSubscriptionStatus::Active, Some(date(2024, 3, 1)));
    world.store.fail_plugin_writes(true);

    let summary = scheduler(&world).run(noon(today)).await.unwrap();

    assert_eq!(summary.successful, 1);
    assert_eq!(summary.plugins_expired, 0);
    assert_eq!(summary.cancellations_expired, 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("Plugin expiry:"));
    assert_eq!(world.subscription(lapsed).status(), SubscriptionStatus::Expired);
    assert!(world.store.plugin(plugin.plugin_id).unwrap().is_active);
}

#[tokio::test]
async fn subscription_cancelling_at_period_end_is_never_charged() {
    let world = World::new();
    let plan = world.plan("pro", "299", "0.005");
    let store_id = world.subscribed_store(&plan, SubscriptionStatus::Active, |s| {
        s.cancel_at_period_end = true;
        s.next_payment_date = Some(date(2024, 3, 1));
        s.current_period_end = Some(date(2024, 3, 1));
    });
    world.token(store_id);

    let summary = scheduler(&world).run(noon(date(2024, 3, 15))).await.unwrap();

    assert_eq!(summary.processed, 0);
    assert!(world.gateway.calls().is_empty());
}

#[tokio::test]
async fn charge_taken_but_not_recorded_is_reported_without_escalation() {
    let world = World::new();
    let plan = world.plan("pro", "299", "0.005");
    let store_id = world.due_store(&plan, date(2024, 3, 1), 1);
    world.token(store_id);
    world.store.fail_ledger_writes(true);

    let summary = scheduler(&world).run(noon(date(2024, 3, 1))).await.unwrap();

    assert_eq!(summary.successful, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total_charged, d("352.82"));
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("ledger entry not written"));

    let subscription = world.subscription(store_id);
    assert_eq!(subscription.failed_payment_count, 0);
    assert_eq!(subscription.next_payment_date, Some(date(2024, 4, 1)));
}

#[tokio::test]
async fn unreadable_due_list_aborts_the_run() {
    let world = World::new();
    let plan = world.plan("pro", "299", "0.005");
    let store_id = world.due_store(&plan, date(2024, 3, 1), 0);
    world.token(store_id);
    world.store.set_unavailable(true);

    let result = scheduler(&world).run(noon(date(2024, 3, 1))).await;

    assert!(result.is_err());
    assert!(world.gateway.calls().is_empty());
}

use super::*;
use crate::db::connect_in_memory;

async fn make_store() -> RegistryStore {
    RegistryStore::new(connect_in_memory().await.unwrap())
}

fn make_server(id: &str, model: &str, url: &str) -> NewServer {
    NewServer {
        registration_id: id.to_string(),
        model_name: model.to_string(),
        endpoint_url: url.to_string(),
        backend_api_key: None,
        capabilities: Capabilities::default(),
        owner: OwnerInfo::default(),
        health_status: HealthStatus::Unknown,
        last_latency_ms: None,
    }
}

fn make_healthy_server(id: &str, model: &str, url: &str) -> NewServer {
    NewServer {
        health_status: HealthStatus::Healthy,
        last_latency_ms: Some(42),
        ..make_server(id, model, url)
    }
}

#[test]
fn test_generate_registration_id_format() {
    let id = generate_registration_id();
    assert_eq!(id.len(), 20);
    assert!(id.starts_with("srv_"));
    assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn test_generate_registration_id_uniqueness() {
    assert_ne!(generate_registration_id(), generate_registration_id());
}

#[tokio::test]
async fn test_insert_and_get_roundtrip() {
    let store = make_store().await;
    store
        .insert(make_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();

    let record = store.get("srv_0000000000000001").await.unwrap();
    assert_eq!(record.model_name, "m1");
    assert_eq!(record.endpoint_url, "https://a.example.com");
    assert_eq!(record.health_status, HealthStatus::Unknown);
    assert_eq!(record.consecutive_failures, 0);
    assert!(record.is_active);
    assert!(record.last_checked_at.is_none());
}

#[tokio::test]
async fn test_insert_probed_server_stamps_last_checked() {
    let store = make_store().await;
    store
        .insert(make_healthy_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();

    let record = store.get("srv_0000000000000001").await.unwrap();
    let checked = record.last_checked_at.expect("probed server has last_checked_at");
    assert!(checked >= record.registered_at);
    assert_eq!(record.last_latency_ms, Some(42));
}

#[tokio::test]
async fn test_get_unknown_id_is_not_found() {
    let store = make_store().await;
    assert!(matches!(
        store.get("srv_ffffffffffffffff").await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_insert_duplicate_endpoint_conflicts() {
    let store = make_store().await;
    store
        .insert(make_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();

    // Same endpoint modulo normalization: default port and trailing slash.
    let result = store
        .insert(make_server("srv_0000000000000002", "m1", "https://A.example.com:443/"))
        .await;
    assert!(matches!(result, Err(RegistryError::Conflict { .. })));
}

#[tokio::test]
async fn test_same_endpoint_different_model_is_allowed() {
    let store = make_store().await;
    store
        .insert(make_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();
    store
        .insert(make_server("srv_0000000000000002", "m2", "https://a.example.com"))
        .await
        .unwrap();

    assert_eq!(store.count_servers().await.unwrap(), 2);
    assert_eq!(store.count_models().await.unwrap(), 2);
}

#[tokio::test]
async fn test_soft_deleted_endpoint_can_be_reregistered() {
    let store = make_store().await;
    store
        .insert(make_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();
    store.soft_delete("srv_0000000000000001").await.unwrap();

    // Uniqueness only binds the active set.
    store
        .insert(make_server("srv_0000000000000002", "m1", "https://a.example.com"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_patch_updates_fields_and_preserves_registered_at() {
    let store = make_store().await;
    let before = store
        .insert(make_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();

    let after = store
        .patch(
            "srv_0000000000000001",
            ServerPatch {
                model_name: Some("m2".to_string()),
                owner: Some(OwnerInfo {
                    student_id: Some("s123".to_string()),
                    description: None,
                    email: Some("s123@example.edu".to_string()),
                }),
                ..ServerPatch::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(after.model_name, "m2");
    assert_eq!(after.owner.student_id.as_deref(), Some("s123"));
    assert_eq!(after.registered_at, before.registered_at);
    assert!(after.updated_at >= before.updated_at);
}

#[tokio::test]
async fn test_patch_clears_api_key_with_empty_string() {
    let store = make_store().await;
    let mut new = make_server("srv_0000000000000001", "m1", "https://a.example.com");
    new.backend_api_key = Some("sk-secret".to_string());
    store.insert(new).await.unwrap();

    let after = store
        .patch(
            "srv_0000000000000001",
            ServerPatch {
                backend_api_key: Some(String::new()),
                ..ServerPatch::default()
            },
        )
        .await
        .unwrap();

    assert!(after.backend_api_key.is_none());
}

#[tokio::test]
async fn test_patch_unknown_id_is_not_found() {
    let store = make_store().await;
    let result = store
        .patch(
            "srv_ffffffffffffffff",
            ServerPatch {
                model_name: Some("m1".to_string()),
                ..ServerPatch::default()
            },
        )
        .await;
    assert!(matches!(result, Err(RegistryError::NotFound(_))));
}

#[tokio::test]
async fn test_patch_to_conflicting_endpoint_is_rejected() {
    let store = make_store().await;
    store
        .insert(make_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();
    store
        .insert(make_server("srv_0000000000000002", "m1", "https://b.example.com"))
        .await
        .unwrap();

    let result = store
        .patch(
            "srv_0000000000000002",
            ServerPatch {
                endpoint_url: Some("https://a.example.com/".to_string()),
                ..ServerPatch::default()
            },
        )
        .await;
    assert!(matches!(result, Err(RegistryError::Conflict { .. })));
}

#[tokio::test]
async fn test_soft_delete_is_idempotent() {
    let store = make_store().await;
    store
        .insert(make_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();

    store.soft_delete("srv_0000000000000001").await.unwrap();
    store.soft_delete("srv_0000000000000001").await.unwrap();

    let record = store.get("srv_0000000000000001").await.unwrap();
    assert!(!record.is_active);
}

#[tokio::test]
async fn test_soft_delete_unknown_id_is_not_found() {
    let store = make_store().await;
    assert!(matches!(
        store.soft_delete("srv_ffffffffffffffff").await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_soft_deleted_record_invisible_to_find_healthy() {
    let store = make_store().await;
    store
        .insert(make_healthy_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();

    assert_eq!(store.find_healthy("m1").await.unwrap().len(), 1);
    store.soft_delete("srv_0000000000000001").await.unwrap();
    assert!(store.find_healthy("m1").await.unwrap().is_empty());
    assert!(!store.model_exists("m1").await.unwrap());
}

#[tokio::test]
async fn test_find_healthy_excludes_unhealthy_and_unknown() {
    let store = make_store().await;
    store
        .insert(make_healthy_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();
    store
        .insert(make_server("srv_0000000000000002", "m1", "https://b.example.com"))
        .await
        .unwrap();
    let mut unhealthy = make_server("srv_0000000000000003", "m1", "https://c.example.com");
    unhealthy.health_status = HealthStatus::Unhealthy;
    store.insert(unhealthy).await.unwrap();

    let healthy = store.find_healthy("m1").await.unwrap();
    assert_eq!(healthy.len(), 1);
    assert_eq!(healthy[0].registration_id, "srv_0000000000000001");
}

#[tokio::test]
async fn test_find_healthy_order_is_deterministic() {
    let store = make_store().await;
    // Inserted within the same instant; registration_id breaks the tie.
    for id in ["srv_000000000000000c", "srv_000000000000000a", "srv_000000000000000b"] {
        store
            .insert(make_healthy_server(id, "m1", &format!("https://{}.example.com", id)))
            .await
            .unwrap();
    }

    let first: Vec<String> = store
        .find_healthy("m1")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.registration_id)
        .collect();
    let second: Vec<String> = store
        .find_healthy("m1")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.registration_id)
        .collect();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_record_failure_increments_and_success_resets() {
    let store = make_store().await;
    store
        .insert(make_healthy_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();

    assert_eq!(store.record_failure("srv_0000000000000001").await.unwrap(), 1);
    assert_eq!(store.record_failure("srv_0000000000000001").await.unwrap(), 2);

    let record = store.get("srv_0000000000000001").await.unwrap();
    assert_eq!(record.health_status, HealthStatus::Unhealthy);
    assert_eq!(record.consecutive_failures, 2);

    store
        .record_success("srv_0000000000000001", Some(17))
        .await
        .unwrap();
    let record = store.get("srv_0000000000000001").await.unwrap();
    assert_eq!(record.health_status, HealthStatus::Healthy);
    assert_eq!(record.consecutive_failures, 0);
    assert_eq!(record.last_latency_ms, Some(17));
}

#[tokio::test]
async fn test_record_success_without_latency_keeps_previous() {
    let store = make_store().await;
    store
        .insert(make_healthy_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();

    store
        .record_success("srv_0000000000000001", None)
        .await
        .unwrap();
    let record = store.get("srv_0000000000000001").await.unwrap();
    assert_eq!(record.last_latency_ms, Some(42));
}

#[tokio::test]
async fn test_list_filters() {
    let store = make_store().await;
    store
        .insert(make_healthy_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();
    store
        .insert(make_server("srv_0000000000000002", "m2", "https://b.example.com"))
        .await
        .unwrap();
    store.soft_delete("srv_0000000000000002").await.unwrap();

    let active = store.list(ListFilter::default()).await.unwrap();
    assert_eq!(active.len(), 1);

    let all = store
        .list(ListFilter {
            include_inactive: true,
            ..ListFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let healthy = store
        .list(ListFilter {
            health_status: Some(HealthStatus::Healthy),
            ..ListFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(healthy.len(), 1);
    assert_eq!(healthy[0].registration_id, "srv_0000000000000001");

    let by_model = store
        .list(ListFilter {
            model_name: Some("m1".to_string()),
            ..ListFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(by_model.len(), 1);
}

#[tokio::test]
async fn test_model_summaries_groups_active_records() {
    let store = make_store().await;
    store
        .insert(make_healthy_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();
    store
        .insert(make_server("srv_0000000000000002", "m1", "https://b.example.com"))
        .await
        .unwrap();
    store
        .insert(make_server("srv_0000000000000003", "m2", "https://c.example.com"))
        .await
        .unwrap();
    store.soft_delete("srv_0000000000000003").await.unwrap();

    let summaries = store.model_summaries().await.unwrap();
    assert_eq!(summaries.len(), 1, "m2 has no active records and is omitted");
    assert_eq!(summaries[0].model_name, "m1");
    assert_eq!(summaries[0].active_servers, 2);
    assert_eq!(summaries[0].healthy_servers, 1);
}

#[tokio::test]
async fn test_stats_breakdown() {
    let store = make_store().await;
    store
        .insert(make_healthy_server("srv_0000000000000001", "m1", "https://a.example.com"))
        .await
        .unwrap();
    store
        .insert(make_server("srv_0000000000000002", "m1", "https://b.example.com"))
        .await
        .unwrap();
    let mut unhealthy = make_server("srv_0000000000000003", "m2", "https://c.example.com");
    unhealthy.health_status = HealthStatus::Unhealthy;
    store.insert(unhealthy).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_servers, 3);
    assert_eq!(stats.healthy, 1);
    assert_eq!(stats.unhealthy, 1);
    assert_eq!(stats.unknown, 1);
    assert_eq!(stats.models, 2);
}

#[tokio::test]
async fn test_server_view_never_carries_api_key() {
    let store = make_store().await;
    let mut new = make_server("srv_0000000000000001", "m1", "https://a.example.com");
    new.backend_api_key = Some("sk-secret".to_string());
    let record = store.insert(new).await.unwrap();

    let view: ServerView = record.into();
    let json = serde_json::to_string(&view).unwrap();
    assert!(!json.contains("sk-secret"));
    assert!(!json.contains("backend_api_key"));
}

//! End-to-end synchronization scenarios against mock FHIR directories.
//!
//! Each test stands up one wiremock server hosting the federation: root and
//! provider directories under distinct path prefixes, and the query
//! directory receiving the transaction bundles.

use mcsd_sync::{default_directory_resource_types, SyncConfig, UpdateClient};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const URA_SYSTEM: &str = "http://fhir.nl/fhir/NamingSystem/ura";
const PAYLOAD_SYSTEM: &str =
    "http://nuts-foundation.github.io/nl-generic-functions-ig/CodeSystem/nl-gf-data-exchange-capabilities";
const PAYLOAD_CODE: &str =
    "http://nuts-foundation.github.io/nl-generic-functions-ig/CapabilityStatement/nl-gf-admin-directory-update-client";

fn organization(id: &str, ura: Option<&str>, endpoints: &[&str]) -> Value {
    let mut resource = json!({
        "resourceType": "Organization",
        "id": id,
        "meta": {"lastUpdated": "2026-01-10T08:00:00.000Z"},
        "name": format!("Organization {id}")
    });
    if let Some(ura) = ura {
        resource["identifier"] = json!([{"system": URA_SYSTEM, "value": ura}]);
    }
    if !endpoints.is_empty() {
        let refs: Vec<Value> = endpoints
            .iter()
            .map(|id| json!({"reference": format!("Endpoint/{id}")}))
            .collect();
        resource["endpoint"] = json!(refs);
    }
    resource
}

fn directory_endpoint(id: &str, address: &str) -> Value {
    json!({
        "resourceType": "Endpoint",
        "id": id,
        "meta": {"lastUpdated": "2026-01-10T08:00:00.000Z"},
        "status": "active",
        "address": address,
        "payloadType": [{"coding": [{"system": PAYLOAD_SYSTEM, "code": PAYLOAD_CODE}]}]
    })
}

/// A searchset page: entries carry no request, like real search results.
fn searchset(resources: Vec<Value>, last_updated: &str) -> Value {
    let entries: Vec<Value> = resources
        .into_iter()
        .map(|resource| {
            let resource_type = resource["resourceType"].as_str().unwrap().to_string();
            let id = resource["id"].as_str().unwrap().to_string();
            json!({
                "fullUrl": format!("http://directories.example.org/{resource_type}/{id}"),
                "resource": resource
            })
        })
        .collect();
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "meta": {"lastUpdated": last_updated},
        "entry": entries
    })
}

/// A history page: entries carry request verbs.
fn history(entries: Vec<Value>, last_updated: &str) -> Value {
    json!({
        "resourceType": "Bundle",
        "type": "history",
        "meta": {"lastUpdated": last_updated},
        "entry": entries
    })
}

fn history_put(prefix: &str, resource: Value) -> Value {
    let resource_type = resource["resourceType"].as_str().unwrap().to_string();
    let id = resource["id"].as_str().unwrap().to_string();
    json!({
        "fullUrl": format!("{prefix}/{resource_type}/{id}"),
        "resource": resource,
        "request": {"method": "PUT", "url": format!("{resource_type}/{id}")}
    })
}

fn history_delete(prefix: &str, resource_type: &str, id: &str) -> Value {
    json!({
        "fullUrl": format!("{prefix}/{resource_type}/{id}"),
        "request": {"method": "DELETE", "url": format!("{resource_type}/{id}")}
    })
}

fn transaction_response(statuses: &[&str]) -> Value {
    let entries: Vec<Value> = statuses
        .iter()
        .map(|status| json!({"response": {"status": status}}))
        .collect();
    json!({
        "resourceType": "Bundle",
        "type": "transaction-response",
        "entry": entries
    })
}

async fn mount_search(server: &MockServer, url_path: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_query_response(server: &MockServer, statuses: &[&str]) {
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(transaction_response(statuses)))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

fn config_for(server: &MockServer, roots: &[&str]) -> SyncConfig {
    SyncConfig {
        query_directory_url: format!("{}/query", server.uri()),
        root_directories: roots
            .iter()
            .map(|prefix| format!("{}{prefix}", server.uri()))
            .collect(),
        exclude_directories: vec![],
        directory_resource_types: default_directory_resource_types(),
        state_file: None,
        snapshot_mode_support: true,
    }
}

// ---------------------------------------------------------------------------
// Scenario: initial snapshot with discovery, then an idempotent delta run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn initial_snapshot_discovers_providers_then_delta_is_idempotent() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let sunflower = format!("{}/sunflower", server.uri());
    let care2cure = format!("{}/care2cure", server.uri());

    // Root directory: two URA-bearing organizations, each pointing at the
    // mCSD directory endpoint of its own administration directory.
    mount_search(
        &server,
        "/root/Organization",
        searchset(
            vec![
                organization("org-100", Some("100"), &["ep-100"]),
                organization("org-200", Some("200"), &["ep-200"]),
            ],
            "2026-01-10T09:00:00.000Z",
        ),
    )
    .await;
    mount_search(
        &server,
        "/root/Endpoint",
        searchset(
            vec![
                directory_endpoint("ep-100", &sunflower),
                directory_endpoint("ep-200", &care2cure),
            ],
            "2026-01-10T09:00:00.000Z",
        ),
    )
    .await;

    // Provider directories: one organization each, restricted to the
    // configured resource-type whitelist.
    for (prefix, id, ura) in [("/sunflower", "sf-org", "100"), ("/care2cure", "cc-org", "200")] {
        mount_search(
            &server,
            &format!("{prefix}/Organization"),
            searchset(
                vec![organization(id, Some(ura), &[])],
                "2026-01-10T09:30:00.000Z",
            ),
        )
        .await;
        for resource_type in [
            "Endpoint",
            "Location",
            "HealthcareService",
            "PractitionerRole",
            "Practitioner",
        ] {
            mount_search(
                &server,
                &format!("{prefix}/{resource_type}"),
                searchset(vec![], "2026-01-10T09:30:00.000Z"),
            )
            .await;
        }
    }

    // Root transaction: the two directory endpoints pass through.
    mount_query_response(&server, &["201 Created", "201 Created"]).await;
    // One created organization per provider directory.
    mount_query_response(&server, &["201 Created"]).await;
    mount_query_response(&server, &["201 Created"]).await;

    let config = config_for(&server, &["/root"]);
    let root_key = format!("{}/root", server.uri());
    let client = UpdateClient::new(config, reqwest::Client::new(), None)?;

    let report = client.run_update().await;

    // Discovery appended both providers and they were synced in the same run.
    assert_eq!(client.registry().len(), 3);
    assert_eq!(report.len(), 3);

    let root_report = &report[&root_key];
    assert_eq!(root_report.created, 2);
    assert!(root_report.errors.is_empty(), "{:?}", root_report.errors);

    let sunflower_report = &report[&format!("{sunflower}|100")];
    assert_eq!(sunflower_report.created, 1);
    let care2cure_report = &report[&format!("{care2cure}|200")];
    assert_eq!(care2cure_report.created, 1);

    // Second run: every source now has a cursor and issues `_since` on its
    // `_history` requests; nothing changed, so nothing is submitted.
    for resource_type in ["Organization", "Endpoint"] {
        Mock::given(method("GET"))
            .and(path(format!("/root/{resource_type}/_history")))
            .and(query_param("_since", "2026-01-10T09:00:00.000Z"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(history(vec![], "2026-01-10T10:00:00.000Z")),
            )
            .expect(1)
            .mount(&server)
            .await;
    }
    for prefix in ["/sunflower", "/care2cure"] {
        for resource_type in default_directory_resource_types() {
            Mock::given(method("GET"))
                .and(path(format!("{prefix}/{resource_type}/_history")))
                .and(query_param("_since", "2026-01-10T09:30:00.000Z"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(history(vec![], "2026-01-10T10:00:00.000Z")),
                )
                .expect(1)
                .mount(&server)
                .await;
        }
    }

    let second = client.run_update().await;
    for (_, directory_report) in &second {
        assert_eq!(directory_report.created, 0);
        assert_eq!(directory_report.updated, 0);
        assert_eq!(directory_report.deleted, 0);
        assert!(directory_report.errors.is_empty());
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario: delta update after an Endpoint address change
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delta_update_reflects_endpoint_address_change() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let provider = format!("{}/provider", server.uri());

    mount_search(
        &server,
        "/provider/Organization",
        searchset(
            vec![organization("org", Some("100"), &["ep-1"])],
            "2026-02-01T08:00:00.000Z",
        ),
    )
    .await;
    mount_search(
        &server,
        "/provider/Endpoint",
        searchset(
            vec![json!({
                "resourceType": "Endpoint",
                "id": "ep-1",
                "meta": {"lastUpdated": "2026-02-01T07:00:00.000Z"},
                "status": "active",
                "address": "https://old.example.org/fhir"
            })],
            "2026-02-01T08:00:00.000Z",
        ),
    )
    .await;
    mount_query_response(&server, &["201 Created", "201 Created"]).await;

    let config = config_for(&server, &[]);
    let client = UpdateClient::new(config, reqwest::Client::new(), None)?;
    client.registry().register(
        &provider,
        vec!["Organization".into(), "Endpoint".into()],
        false,
        "",
        "100",
    )?;

    let first = client.run_update().await;
    assert_eq!(first[&format!("{provider}|100")].created, 2);

    // The provider changes the Endpoint address; only that shows up in the
    // history window.
    for resource_type in ["Organization", "Endpoint"] {
        Mock::given(method("GET"))
            .and(path(format!("/provider/{resource_type}/_history")))
            .and(query_param("_since", "2026-02-01T08:00:00.000Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(history(
                if resource_type == "Endpoint" {
                    vec![history_put(
                        &provider,
                        json!({
                            "resourceType": "Endpoint",
                            "id": "ep-1",
                            "meta": {"lastUpdated": "2026-02-01T09:00:00.000Z"},
                            "status": "active",
                            "address": "https://new.example.org/fhir"
                        }),
                    )]
                } else {
                    vec![]
                },
                "2026-02-01T09:30:00.000Z",
            )))
            .mount(&server)
            .await;
    }
    mount_query_response(&server, &["200 OK"]).await;

    let second = client.run_update().await;
    let directory_report = &second[&format!("{provider}|100")];
    assert_eq!(directory_report.created, 0);
    assert_eq!(directory_report.updated, 1);
    assert_eq!(directory_report.deleted, 0);
    assert!(directory_report.errors.is_empty(), "{:?}", directory_report.errors);

    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario: create-then-update-twice collapses to one PUT
// ---------------------------------------------------------------------------

#[tokio::test]
async fn history_versions_collapse_to_single_put() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let provider = format!("{}/provider", server.uri());

    let versions: Vec<Value> = ["08:00:00", "08:05:00", "08:10:00"]
        .iter()
        .enumerate()
        .map(|(version, time)| {
            history_put(
                &provider,
                json!({
                    "resourceType": "Organization",
                    "id": "org",
                    "meta": {
                        "versionId": (version + 1).to_string(),
                        "lastUpdated": format!("2026-02-01T{time}.000Z")
                    },
                    "identifier": [{"system": URA_SYSTEM, "value": "100"}],
                    "name": format!("Name v{}", version + 1)
                }),
            )
        })
        .collect();

    Mock::given(method("GET"))
        .and(path("/provider/Organization/_history"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(history(versions, "2026-02-01T08:30:00.000Z")),
        )
        .mount(&server)
        .await;
    mount_search(
        &server,
        "/provider/Organization",
        searchset(
            vec![organization("org", Some("100"), &[])],
            "2026-02-01T08:30:00.000Z",
        ),
    )
    .await;
    mount_query_response(&server, &["201 Created"]).await;

    let mut config = config_for(&server, &[]);
    config.snapshot_mode_support = false;
    let client = UpdateClient::new(config, reqwest::Client::new(), None)?;
    client
        .registry()
        .register(&provider, vec!["Organization".into()], false, "", "100")?;

    let report = client.run_update().await;
    let directory_report = &report[&format!("{provider}|100")];
    assert_eq!(directory_report.created, 1);
    assert!(directory_report.warnings.is_empty(), "{:?}", directory_report.warnings);

    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario: create, then delete at the source
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deletion_at_source_is_replicated() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let provider = format!("{}/provider", server.uri());

    Mock::given(method("GET"))
        .and(path("/provider/Organization/_history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(history(
            vec![history_put(
                &provider,
                organization("org", Some("100"), &[]),
            )],
            "2026-02-01T08:00:00.000Z",
        )))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_search(
        &server,
        "/provider/Organization",
        searchset(
            vec![organization("org", Some("100"), &[])],
            "2026-02-01T08:00:00.000Z",
        ),
    )
    .await;
    mount_query_response(&server, &["201 Created"]).await;

    let mut config = config_for(&server, &[]);
    config.snapshot_mode_support = false;
    let client = UpdateClient::new(config, reqwest::Client::new(), None)?;
    client
        .registry()
        .register(&provider, vec!["Organization".into()], false, "", "100")?;

    let first = client.run_update().await;
    assert_eq!(first[&format!("{provider}|100")].created, 1);

    Mock::given(method("GET"))
        .and(path("/provider/Organization/_history"))
        .and(query_param("_since", "2026-02-01T08:00:00.000Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(history(
            vec![history_delete(&provider, "Organization", "org")],
            "2026-02-01T09:00:00.000Z",
        )))
        .mount(&server)
        .await;
    mount_query_response(&server, &["204 No Content"]).await;

    let second = client.run_update().await;
    let directory_report = &second[&format!("{provider}|100")];
    assert_eq!(directory_report.deleted, 1);
    assert_eq!(directory_report.created, 0);

    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario: orphan HealthcareService becomes a warning, sync continues
// ---------------------------------------------------------------------------

#[tokio::test]
async fn orphan_healthcare_service_is_skipped_with_warning() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let provider = format!("{}/provider", server.uri());

    mount_search(
        &server,
        "/provider/Organization",
        searchset(
            vec![organization("org", Some("100"), &[])],
            "2026-02-01T08:00:00.000Z",
        ),
    )
    .await;
    mount_search(
        &server,
        "/provider/HealthcareService",
        searchset(
            vec![json!({
                "resourceType": "HealthcareService",
                "id": "hcs-orphan",
                "meta": {"lastUpdated": "2026-02-01T07:00:00.000Z"},
                "name": "Service without providedBy"
            })],
            "2026-02-01T08:00:00.000Z",
        ),
    )
    .await;
    // Only the organization makes it into the transaction.
    mount_query_response(&server, &["201 Created"]).await;

    let config = config_for(&server, &[]);
    let client = UpdateClient::new(config, reqwest::Client::new(), None)?;
    client.registry().register(
        &provider,
        vec!["Organization".into(), "HealthcareService".into()],
        false,
        "",
        "100",
    )?;

    let report = client.run_update().await;
    let directory_report = &report[&format!("{provider}|100")];
    assert_eq!(directory_report.created, 1);
    assert!(directory_report.errors.is_empty());
    assert!(
        directory_report
            .warnings
            .iter()
            .any(|warning| warning.contains("hcs-orphan")),
        "{:?}",
        directory_report.warnings
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// Scenario: 410 Gone fallback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn history_gone_falls_back_to_snapshot_when_supported() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let provider = format!("{}/provider", server.uri());

    mount_search(
        &server,
        "/provider/Organization",
        searchset(
            vec![organization("org", Some("100"), &[])],
            "2026-02-01T08:00:00.000Z",
        ),
    )
    .await;
    mount_query_response(&server, &["201 Created"]).await;

    let config = config_for(&server, &[]);
    let client = UpdateClient::new(config, reqwest::Client::new(), None)?;
    client
        .registry()
        .register(&provider, vec!["Organization".into()], false, "", "100")?;

    // First run snapshots and stores a cursor.
    let first = client.run_update().await;
    assert_eq!(first[&format!("{provider}|100")].created, 1);

    // The provider can no longer serve that history window.
    Mock::given(method("GET"))
        .and(path("/provider/Organization/_history"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    mount_query_response(&server, &["200 OK"]).await;

    let second = client.run_update().await;
    let directory_report = &second[&format!("{provider}|100")];
    assert!(directory_report.errors.is_empty(), "{:?}", directory_report.errors);
    assert_eq!(directory_report.updated, 1);

    Ok(())
}

#[tokio::test]
async fn history_gone_without_snapshot_support_is_fatal() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let provider = format!("{}/provider", server.uri());

    Mock::given(method("GET"))
        .and(path("/provider/Organization/_history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(history(
            vec![history_put(
                &provider,
                organization("org", Some("100"), &[]),
            )],
            "2026-02-01T08:00:00.000Z",
        )))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_search(
        &server,
        "/provider/Organization",
        searchset(
            vec![organization("org", Some("100"), &[])],
            "2026-02-01T08:00:00.000Z",
        ),
    )
    .await;
    mount_query_response(&server, &["201 Created"]).await;

    let mut config = config_for(&server, &[]);
    config.snapshot_mode_support = false;
    let client = UpdateClient::new(config, reqwest::Client::new(), None)?;
    client
        .registry()
        .register(&provider, vec!["Organization".into()], false, "", "100")?;

    let first = client.run_update().await;
    assert_eq!(first[&format!("{provider}|100")].created, 1);

    Mock::given(method("GET"))
        .and(path("/provider/Organization/_history"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let second = client.run_update().await;
    let directory_report = &second[&format!("{provider}|100")];
    assert_eq!(directory_report.created, 0);
    assert_eq!(
        directory_report.errors.len(),
        1,
        "{:?}",
        directory_report.errors
    );
    assert!(directory_report.errors[0].contains("410"));

    Ok(())
}

// ---------------------------------------------------------------------------
// Multiple directories sharing one FHIR base URL
// ---------------------------------------------------------------------------

#[tokio::test]
async fn same_base_url_with_different_uras_keeps_separate_state() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let shared = format!("{}/shared", server.uri());

    // One FHIR server hosts the administration data of two organizations.
    mount_search(
        &server,
        "/shared/Organization",
        searchset(
            vec![
                organization("org-a", Some("100"), &[]),
                organization("org-b", Some("200"), &[]),
            ],
            "2026-02-01T08:00:00.000Z",
        ),
    )
    .await;
    // Each registry entry syncs its own authoritative slice.
    mount_query_response(&server, &["201 Created"]).await;
    mount_query_response(&server, &["201 Created"]).await;

    let config = config_for(&server, &[]);
    let client = UpdateClient::new(config, reqwest::Client::new(), None)?;
    client
        .registry()
        .register(&shared, vec!["Organization".into()], false, "", "100")?;
    client
        .registry()
        .register(&shared, vec!["Organization".into()], false, "", "200")?;
    assert_eq!(client.registry().len(), 2);

    let report = client.run_update().await;
    assert_eq!(report.len(), 2);
    let report_a = &report[&format!("{shared}|100")];
    let report_b = &report[&format!("{shared}|200")];
    // The foreign organization is rejected by URA filtering in both syncs.
    assert_eq!(report_a.created, 1);
    assert_eq!(report_b.created, 1);
    assert!(report_a
        .warnings
        .iter()
        .any(|warning| warning.contains("Organization/org-b")));
    assert!(report_b
        .warnings
        .iter()
        .any(|warning| warning.contains("Organization/org-a")));

    Ok(())
}

// ---------------------------------------------------------------------------
// Endpoint deletion at the root unregisters the discovered directory
// ---------------------------------------------------------------------------

#[tokio::test]
async fn endpoint_deletion_at_root_unregisters_provider() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let provider = format!("{}/provider", server.uri());

    mount_search(
        &server,
        "/root/Organization",
        searchset(
            vec![organization("org-100", Some("100"), &["ep-100"])],
            "2026-01-10T09:00:00.000Z",
        ),
    )
    .await;
    mount_search(
        &server,
        "/root/Endpoint",
        searchset(
            vec![directory_endpoint("ep-100", &provider)],
            "2026-01-10T09:00:00.000Z",
        ),
    )
    .await;
    mount_search(
        &server,
        "/provider/Organization",
        searchset(
            vec![organization("p-org", Some("100"), &[])],
            "2026-01-10T09:30:00.000Z",
        ),
    )
    .await;
    for resource_type in [
        "Endpoint",
        "Location",
        "HealthcareService",
        "PractitionerRole",
        "Practitioner",
    ] {
        mount_search(
            &server,
            &format!("/provider/{resource_type}"),
            searchset(vec![], "2026-01-10T09:30:00.000Z"),
        )
        .await;
    }
    mount_query_response(&server, &["201 Created"]).await;
    mount_query_response(&server, &["201 Created"]).await;

    let config = config_for(&server, &["/root"]);
    let client = UpdateClient::new(config, reqwest::Client::new(), None)?;
    let first = client.run_update().await;
    assert_eq!(first.len(), 2);
    assert_eq!(client.registry().len(), 2);

    // The root deletes the Endpoint: the provider entry disappears from the
    // registry before it would be synced, and the deletion is forwarded.
    let deleted_full_url = "http://directories.example.org/Endpoint/ep-100";
    for resource_type in ["Organization", "Endpoint"] {
        Mock::given(method("GET"))
            .and(path(format!("/root/{resource_type}/_history")))
            .and(query_param("_since", "2026-01-10T09:00:00.000Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(history(
                if resource_type == "Endpoint" {
                    vec![json!({
                        "fullUrl": deleted_full_url,
                        "request": {"method": "DELETE", "url": "Endpoint/ep-100"}
                    })]
                } else {
                    vec![]
                },
                "2026-01-10T10:00:00.000Z",
            )))
            .mount(&server)
            .await;
    }
    mount_query_response(&server, &["204 No Content"]).await;

    let second = client.run_update().await;
    assert_eq!(client.registry().len(), 1);
    assert_eq!(second.len(), 1);
    let root_report = &second[&format!("{}/root", server.uri())];
    assert_eq!(root_report.deleted, 1);

    Ok(())
}

// ---------------------------------------------------------------------------
// Disallowed resource types and pagination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disallowed_resource_type_in_history_is_a_warning() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let provider = format!("{}/provider", server.uri());

    Mock::given(method("GET"))
        .and(path("/provider/Organization/_history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(history(
            vec![
                history_put(&provider, organization("org", Some("100"), &[])),
                // Pushed into the feed by a misbehaving server.
                history_put(
                    &provider,
                    json!({
                        "resourceType": "Patient",
                        "id": "pat-1",
                        "meta": {"lastUpdated": "2026-02-01T07:00:00.000Z"}
                    }),
                ),
            ],
            "2026-02-01T08:00:00.000Z",
        )))
        .mount(&server)
        .await;
    mount_search(
        &server,
        "/provider/Organization",
        searchset(
            vec![organization("org", Some("100"), &[])],
            "2026-02-01T08:00:00.000Z",
        ),
    )
    .await;
    mount_query_response(&server, &["201 Created"]).await;

    let mut config = config_for(&server, &[]);
    config.snapshot_mode_support = false;
    let client = UpdateClient::new(config, reqwest::Client::new(), None)?;
    client
        .registry()
        .register(&provider, vec!["Organization".into()], false, "", "100")?;

    let report = client.run_update().await;
    let directory_report = &report[&format!("{provider}|100")];
    assert_eq!(directory_report.created, 1);
    assert!(directory_report
        .warnings
        .iter()
        .any(|warning| warning.contains("Patient") && warning.contains("not allowed")));

    Ok(())
}

#[tokio::test]
async fn paginated_search_results_are_fully_consumed() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let provider = format!("{}/provider", server.uri());

    let mut page_one = searchset(
        vec![organization("org-1", Some("100"), &[])],
        "2026-02-01T08:00:00.000Z",
    );
    page_one["link"] = json!([{"relation": "next", "url": format!("{}/page2", server.uri())}]);
    let page_two = searchset(
        vec![organization("org-2", None, &[])],
        "2026-02-01T08:00:00.000Z",
    );
    // The second organization belongs to the first via partOf.
    let page_two = {
        let mut page = page_two;
        page["entry"][0]["resource"]["partOf"] = json!({"reference": "Organization/org-1"});
        page
    };

    mount_search(&server, "/provider/Organization", page_one).await;
    mount_search(&server, "/page2", page_two).await;
    mount_query_response(&server, &["201 Created", "201 Created"]).await;

    let config = config_for(&server, &[]);
    let client = UpdateClient::new(config, reqwest::Client::new(), None)?;
    client
        .registry()
        .register(&provider, vec!["Organization".into()], false, "", "100")?;

    let report = client.run_update().await;
    let directory_report = &report[&format!("{provider}|100")];
    assert_eq!(directory_report.created, 2);
    assert!(directory_report.warnings.is_empty(), "{:?}", directory_report.warnings);

    Ok(())
}

// ---------------------------------------------------------------------------
// Exclusion list and cursor persistence across restarts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn excluded_directories_are_never_registered() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let excluded = format!("{}/excluded", server.uri());

    mount_search(
        &server,
        "/root/Organization",
        searchset(
            vec![organization("org-100", Some("100"), &["ep-100"])],
            "2026-01-10T09:00:00.000Z",
        ),
    )
    .await;
    mount_search(
        &server,
        "/root/Endpoint",
        searchset(
            vec![directory_endpoint("ep-100", &excluded)],
            "2026-01-10T09:00:00.000Z",
        ),
    )
    .await;
    mount_query_response(&server, &["201 Created"]).await;

    let mut config = config_for(&server, &["/root"]);
    // Exclusion matches after trimming one trailing slash.
    config.exclude_directories = vec![format!("{excluded}/")];
    let client = UpdateClient::new(config, reqwest::Client::new(), None)?;

    let report = client.run_update().await;
    assert_eq!(client.registry().len(), 1);
    assert_eq!(report.len(), 1);
    let root_report = &report[&format!("{}/root", server.uri())];
    assert!(root_report.errors.is_empty());
    assert!(root_report.warnings.is_empty());

    Ok(())
}

#[tokio::test]
async fn cursors_survive_engine_restarts() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let state_dir = tempfile::tempdir()?;
    let state_file = state_dir.path().join("mcsd-state.json");
    let excluded = format!("{}/provider", server.uri());

    mount_search(
        &server,
        "/root/Organization",
        searchset(
            vec![organization("org-100", Some("100"), &["ep-100"])],
            "2026-01-10T09:00:00.000Z",
        ),
    )
    .await;
    mount_search(
        &server,
        "/root/Endpoint",
        searchset(
            vec![directory_endpoint("ep-100", &excluded)],
            "2026-01-10T09:00:00.000Z",
        ),
    )
    .await;
    mount_query_response(&server, &["201 Created"]).await;

    let mut config = config_for(&server, &["/root"]);
    config.state_file = Some(state_file.clone());
    config.exclude_directories = vec![excluded];

    let client = UpdateClient::new(config.clone(), reqwest::Client::new(), None)?;
    let first = client.run_update().await;
    assert_eq!(first[&format!("{}/root", server.uri())].created, 1);
    assert!(state_file.exists());
    drop(client);

    // A fresh engine picks the cursor up from disk and goes straight to
    // delta mode.
    for resource_type in ["Organization", "Endpoint"] {
        Mock::given(method("GET"))
            .and(path(format!("/root/{resource_type}/_history")))
            .and(query_param("_since", "2026-01-10T09:00:00.000Z"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(history(vec![], "2026-01-10T10:00:00.000Z")),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let restarted = UpdateClient::new(config, reqwest::Client::new(), None)?;
    let second = restarted.run_update().await;
    let root_report = &second[&format!("{}/root", server.uri())];
    assert_eq!(root_report.created, 0);
    assert!(root_report.errors.is_empty(), "{:?}", root_report.errors);

    Ok(())
}

//! End-to-end fetch behavior against a scripted transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use offerwatch_cache::{DescriptionCache, Persistence, SqliteStorage};
use offerwatch_models::{ClassKey, ItemDescription, OfferFilter};
use offerwatch_remote::test_support::{class_info_for, offer_json, offers_page, MockTransport};
use offerwatch_remote::{
    ApiClient, BatchDescriptionFetcher, Credentials, HttpResponse, OfferFetcher, OfferQuery,
    RemoteError,
};

fn api(transport: Arc<MockTransport>) -> Arc<ApiClient> {
    Arc::new(ApiClient::new(
        transport,
        Credentials {
            api_key: Some("KEY".to_string()),
            ..Credentials::default()
        },
    ))
}

fn description(appid: u32, classid: &str) -> Arc<ItemDescription> {
    Arc::new(
        ItemDescription::from_value(serde_json::json!({
            "appid": appid, "classid": classid, "instanceid": "0", "name": "cached"
        }))
        .unwrap(),
    )
}

#[tokio::test]
async fn cursor_pages_concatenate_in_order() {
    let transport = Arc::new(MockTransport::scripted(vec![
        offers_page(
            vec![offer_json("1", 2, true, 100), offer_json("2", 2, true, 100)],
            vec![offer_json("10", 2, false, 100)],
            5,
        ),
        offers_page(vec![offer_json("3", 2, true, 100)], vec![], 9),
        offers_page(vec![], vec![offer_json("11", 2, false, 100)], 0),
    ]));
    let fetcher = OfferFetcher::new(api(transport.clone()), None);

    let listing = fetcher
        .fetch(&OfferQuery::new(OfferFilter::All, Some(1)))
        .await
        .unwrap();

    let sent: Vec<&str> = listing.sent.iter().map(|o| o.tradeofferid.as_str()).collect();
    let received: Vec<&str> = listing
        .received
        .iter()
        .map(|o| o.tradeofferid.as_str())
        .collect();
    assert_eq!(sent, vec!["1", "2", "3"]);
    assert_eq!(received, vec!["10", "11"]);

    let cursors: Vec<String> = transport
        .requests()
        .iter()
        .map(|r| r.query_param("cursor").unwrap_or_default().to_string())
        .collect();
    assert_eq!(cursors, vec!["0", "5", "9"]);
}

#[tokio::test]
async fn failing_page_aborts_listing() {
    let transport = Arc::new(MockTransport::scripted(vec![
        offers_page(vec![offer_json("1", 2, true, 100)], vec![], 5),
        HttpResponse::new(503, "busy"),
    ]));
    let fetcher = OfferFetcher::new(api(transport), None);

    let err = fetcher
        .fetch(&OfferQuery::new(OfferFilter::All, Some(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Transport(_)));
}

#[tokio::test]
async fn fully_cached_input_issues_no_requests() {
    let transport = Arc::new(MockTransport::new(|r| Ok(class_info_for(r))));
    let cache = Arc::new(DescriptionCache::new(100));
    let keys = vec![ClassKey::new(440, "1", None), ClassKey::new(730, "2", Some("5"))];
    for key in &keys {
        cache.put(key.clone(), description(key.appid, &key.classid)).await;
    }
    let fetcher = BatchDescriptionFetcher::new(api(transport.clone()), cache, Some("english".into()));

    let resolved = fetcher.resolve(&keys).await.unwrap();
    assert_eq!(resolved.len(), 2);
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn duplicate_keys_are_fetched_once() {
    let transport = Arc::new(MockTransport::new(|r| Ok(class_info_for(r))));
    let cache = Arc::new(DescriptionCache::new(100));
    let fetcher =
        BatchDescriptionFetcher::new(api(transport.clone()), cache.clone(), Some("english".into()));

    // The same class appears on both sides of an offer.
    let shared = ClassKey::new(440, "77", None);
    let keys = vec![shared.clone(), ClassKey::new(440, "78", None), shared.clone()];
    assert_eq!(fetcher.resolve(&keys).await.unwrap().len(), 2);

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].query_param("class_count"), Some("2"));
    assert_eq!(requests[0].query_param("appid"), Some("440"));
    let named = cache.get(&shared).await.unwrap();
    assert_eq!(named.name.as_deref(), Some("Item 77"));
}

#[tokio::test]
async fn chunks_split_by_app_and_size() {
    let transport = Arc::new(MockTransport::new(|r| Ok(class_info_for(r))));
    let cache = Arc::new(DescriptionCache::new(1000));
    let fetcher =
        BatchDescriptionFetcher::new(api(transport.clone()), cache.clone(), Some("english".into()));

    let mut keys: Vec<ClassKey> = (0..150)
        .map(|i| ClassKey::new(440, i.to_string(), None))
        .collect();
    keys.push(ClassKey::new(730, "1", None));
    assert_eq!(fetcher.resolve(&keys).await.unwrap().len(), 151);

    let mut counts: Vec<(String, String)> = transport
        .requests()
        .iter()
        .map(|r| {
            (
                r.query_param("appid").unwrap_or_default().to_string(),
                r.query_param("class_count").unwrap_or_default().to_string(),
            )
        })
        .collect();
    counts.sort();
    assert_eq!(
        counts,
        vec![
            ("440".to_string(), "100".to_string()),
            ("440".to_string(), "50".to_string()),
            ("730".to_string(), "1".to_string()),
        ]
    );
    for key in &keys {
        assert!(cache.exists(key), "{key} missing");
    }
}

#[tokio::test]
async fn partial_failure_keeps_successful_chunks() {
    let transport = Arc::new(MockTransport::new(|r| {
        if r.query_param("appid") == Some("730") {
            Ok(HttpResponse::new(500, ""))
        } else {
            Ok(class_info_for(r))
        }
    }));
    let cache = Arc::new(DescriptionCache::new(100));
    let fetcher =
        BatchDescriptionFetcher::new(api(transport.clone()), cache.clone(), Some("english".into()));

    let good = ClassKey::new(440, "1", None);
    let bad = ClassKey::new(730, "1", None);
    let err = fetcher.resolve(&[good.clone(), bad.clone()]).await.unwrap_err();

    assert!(matches!(err, RemoteError::Transport(_)));
    assert!(cache.exists(&good));
    assert!(!cache.exists(&bad));
}

#[tokio::test]
async fn persisted_descriptions_avoid_remote_fetch() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let persistence = Persistence::new(storage);
    let key = ClassKey::new(440, "9", None);
    DescriptionCache::new(10)
        .with_persistence(persistence.clone())
        .put(key.clone(), description(440, "9"))
        .await;

    let transport = Arc::new(MockTransport::new(|r| Ok(class_info_for(r))));
    let cache = Arc::new(DescriptionCache::new(10).with_persistence(persistence));
    let fetcher = BatchDescriptionFetcher::new(api(transport.clone()), cache.clone(), Some("english".into()));

    let resolved = fetcher.resolve(&[key.clone()]).await.unwrap();
    assert_eq!(resolved[&key].name.as_deref(), Some("cached"));
    assert_eq!(transport.request_count(), 0);
    assert_eq!(cache.get(&key).await.unwrap().name.as_deref(), Some("cached"));
}

#[tokio::test]
async fn no_language_means_no_fetch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let transport = Arc::new(MockTransport::new(move |r| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(class_info_for(r))
    }));
    let fetcher = BatchDescriptionFetcher::new(api(transport), Arc::new(DescriptionCache::new(10)), None);

    assert!(fetcher.resolve(&[ClassKey::new(440, "1", None)]).await.unwrap().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn absorb_stores_inline_descriptions() {
    let transport = Arc::new(MockTransport::failing("unused"));
    let cache = Arc::new(DescriptionCache::new(10));
    let fetcher = BatchDescriptionFetcher::new(api(transport), cache.clone(), Some("english".into()));

    let absorbed = fetcher
        .absorb(vec![
            serde_json::json!({"appid": 440, "classid": "5", "name": "Key"}),
            serde_json::json!({"name": "no class"}),
        ])
        .await;
    assert_eq!(absorbed.len(), 1);
    assert!(cache.exists(&ClassKey::new(440, "5", None)));
}

#[tokio::test]
async fn resolved_map_outlives_cache_capacity() {
    let transport = Arc::new(MockTransport::new(|r| Ok(class_info_for(r))));
    let cache = Arc::new(DescriptionCache::new(10));
    let fetcher =
        BatchDescriptionFetcher::new(api(transport.clone()), cache.clone(), Some("english".into()));

    let keys: Vec<ClassKey> = (0..120)
        .map(|i| ClassKey::new(440, i.to_string(), None))
        .collect();
    let resolved = fetcher.resolve(&keys).await.unwrap();
    cache.sweep().await;

    assert_eq!(resolved.len(), 120);
    assert!(keys.iter().all(|k| resolved[k].name.is_some()));
    assert!(cache.entry_count() <= 10);
}

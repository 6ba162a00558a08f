//! Shared contract tests for baskets database backends.
//!
//! Every backend test module runs the same two suites against its own
//! database instance, so the three implementations cannot drift apart.

use std::collections::HashMap;

use super::BasketsDatabase;
use crate::basket::{BasketConfig, Headers, RequestData, ResponseConfig};

/// A captured POST request with the given body, as the capture pipeline
/// would have built it.
pub fn test_request(body: &str) -> RequestData {
    test_request_with_headers(body, &[])
}

/// Same as [`test_request`] with extra headers.
pub fn test_request_with_headers(body: &str, extra: &[(&str, &str)]) -> RequestData {
    let mut header = Headers::new();
    header.insert("Content-Type".to_string(), vec!["text/plain".to_string()]);
    header.insert("User-Agent".to_string(), vec!["Unit-Test".to_string()]);
    header.insert("Accept".to_string(), vec!["application/json".to_string()]);
    for (name, value) in extra {
        header
            .entry((*name).to_string())
            .or_default()
            .push((*value).to_string());
    }

    RequestData {
        date: chrono::Utc::now().timestamp_millis(),
        header,
        content_length: body.len() as i64,
        body: body.to_string(),
        method: "POST".to_string(),
        path: "/test/demo".to_string(),
        query: "name=abc&version=12".to_string(),
    }
}

/// Contract of the baskets collection: create/get/delete/size and name pages.
pub fn run_database_suite(db: &dyn BasketsDatabase) {
    create_returns_secure_token(db);
    create_rejects_name_conflict(db);
    get_returns_authorized_basket(db);
    get_unknown_returns_none(db);
    delete_removes_basket(db);
    size_counts_baskets(db);
    get_names_pages(db);
    find_names_filters(db);
}

/// Contract of a single basket: ring policy, paging, search, responses.
pub fn run_basket_suite(db: &dyn BasketsDatabase) {
    add_collects_requests(db);
    add_evicts_over_capacity(db);
    get_requests_pages_newest_first(db);
    find_requests_filters_headers(db);
    clear_keeps_total_count(db);
    update_shrinks_ring(db);
    responses_per_method(db);
    update_replaces_config(db);
}

fn create_returns_secure_token(db: &dyn BasketsDatabase) {
    let auth = db
        .create("suite_create", BasketConfig::with_capacity(20))
        .expect("create failed");
    assert!(
        auth.token.len() >= 30,
        "insecure token is generated: {}",
        auth.token
    );
}

fn create_rejects_name_conflict(db: &dyn BasketsDatabase) {
    let name = "suite_conflict";
    db.create(name, BasketConfig::with_capacity(20)).unwrap();
    let err = db
        .create(name, BasketConfig::with_capacity(20))
        .expect_err("conflict error is expected");
    assert!(
        err.to_string().contains(&format!("'{name}'")),
        "error is not detailed enough: {err}"
    );
}

fn get_returns_authorized_basket(db: &dyn BasketsDatabase) {
    let name = "suite_get";
    let auth = db.create(name, BasketConfig::with_capacity(16)).unwrap();

    let basket = db.get(name).expect("basket is expected");
    assert!(basket.authorize(&auth.token), "authorization has failed");
    assert!(!basket.authorize("wrong-token"));
    assert!(!basket.authorize(""));
    assert_eq!(basket.config().capacity, 16);
}

fn get_unknown_returns_none(db: &dyn BasketsDatabase) {
    assert!(db.get("suite_missing").is_none());
}

fn delete_removes_basket(db: &dyn BasketsDatabase) {
    let name = "suite_delete";
    db.create(name, BasketConfig::with_capacity(10)).unwrap();
    assert!(db.get(name).is_some());

    db.delete(name);
    assert!(db.get(name).is_none());

    // idempotent
    db.delete(name);
    db.delete("suite_never_existed");
}

fn size_counts_baskets(db: &dyn BasketsDatabase) {
    let before = db.size();
    for i in 0..7 {
        db.create(&format!("suite_size{i}"), BasketConfig::with_capacity(15))
            .unwrap();
    }
    assert_eq!(db.size(), before + 7);

    db.delete("suite_size3");
    assert_eq!(db.size(), before + 6);
}

fn get_names_pages(db: &dyn BasketsDatabase) {
    let before = db.size();
    for i in 0..45 {
        db.create(
            &format!("suite_names{i:02}"),
            BasketConfig::with_capacity(15),
        )
        .unwrap();
    }
    let total = before + 45;

    let page1 = db.get_names(10, 0);
    assert_eq!(page1.count, total, "wrong baskets count");
    assert!(page1.has_more, "expected more names");
    assert_eq!(page1.names.len(), 10, "wrong page size");

    let tail = db.get_names(10, total - 5);
    assert_eq!(tail.count, total);
    assert!(!tail.has_more, "no more names are expected");
    assert_eq!(tail.names.len(), 5);

    // corner cases
    assert!(db.get_names(0, 0).names.is_empty());
    assert!(!db.get_names(5, total).has_more);
    assert!(db.get_names(5, total).names.is_empty());
}

fn find_names_filters(db: &dyn BasketsDatabase) {
    for i in 0..35 {
        db.create(&format!("suite_find{i}"), BasketConfig::with_capacity(5))
            .unwrap();
    }

    // suite_find2, suite_find20 .. suite_find29
    let res1 = db.find_names("suite_find2", 20, 0);
    assert!(!res1.has_more, "no more names are expected");
    assert_eq!(res1.names.len(), 11, "wrong number of found names");
    for name in &res1.names {
        assert!(name.contains("suite_find2"), "invalid name: {name}");
    }

    let res2 = db.find_names("suite_find1", 5, 0);
    assert!(res2.has_more, "more names are expected");
    assert_eq!(res2.names.len(), 5);

    // corner cases
    assert_eq!(db.find_names("suite_find1", 5, 10).names.len(), 1);
    assert_eq!(db.find_names("suite_find2", 5, 20).names.len(), 0);
    assert!(!db.find_names("suite_find3", 5, 6).has_more);
    assert!(!db.find_names("no_such_name", 5, 0).has_more);
    assert!(db.find_names("no_such_name", 5, 0).names.is_empty());
}

fn add_collects_requests(db: &dyn BasketsDatabase) {
    let name = "suite_add";
    db.create(name, BasketConfig::with_capacity(20)).unwrap();
    let basket = db.get(name).expect("basket is expected");

    let content = r#"{ "user": "tester", "age": 24 }"#;
    let data = basket.add(test_request(content));
    assert_eq!(basket.size(), 1);
    assert_eq!(data.body, content);
    assert_eq!(data.content_length, content.len() as i64);

    basket.add(test_request("Hello world"));
    assert_eq!(basket.size(), 2);
}

fn add_evicts_over_capacity(db: &dyn BasketsDatabase) {
    let name = "suite_evict";
    db.create(name, BasketConfig::with_capacity(10)).unwrap();
    let basket = db.get(name).expect("basket is expected");

    for i in 1..=35 {
        basket.add(test_request(&format!("req{i}")));
    }
    assert_eq!(basket.size(), 10, "wrong basket size");

    let page = basket.get_requests(20, 0);
    assert_eq!(page.count, 10);
    assert_eq!(page.total_count, 35);
    assert!(!page.has_more);
    // newest first, the oldest 25 are gone
    assert_eq!(page.requests[0].body, "req35");
    assert_eq!(page.requests[9].body, "req26");
}

fn get_requests_pages_newest_first(db: &dyn BasketsDatabase) {
    let name = "suite_pages";
    db.create(name, BasketConfig::with_capacity(25)).unwrap();
    let basket = db.get(name).expect("basket is expected");

    for i in 1..=35 {
        basket.add(test_request(&format!("req{i}")));
    }
    assert_eq!(basket.size(), 25);

    let page1 = basket.get_requests(10, 0);
    assert_eq!(page1.count, 25);
    assert_eq!(page1.total_count, 35);
    assert!(page1.has_more);
    assert_eq!(page1.requests.len(), 10);
    assert_eq!(page1.requests[0].body, "req35");
    assert_eq!(page1.requests[9].body, "req26");

    let page3 = basket.get_requests(10, 20);
    assert!(!page3.has_more, "no more requests are expected");
    assert_eq!(page3.requests.len(), 5);
    assert_eq!(page3.requests[0].body, "req15");
    assert_eq!(page3.requests[4].body, "req11");

    // skip beyond the ring
    let empty = basket.get_requests(10, 30);
    assert!(empty.requests.is_empty());
    assert!(!empty.has_more);
}

fn find_requests_filters_headers(db: &dyn BasketsDatabase) {
    let name = "suite_search";
    db.create(name, BasketConfig::with_capacity(100)).unwrap();
    let basket = db.get(name).expect("basket is expected");

    for i in 1..=30 {
        let mut extra = Vec::new();
        if i <= 10 {
            extra.push(("ChocoPie", "yummy"));
        }
        if i <= 20 {
            extra.push(("Muffin", "tasty"));
        }
        basket.add(test_request_with_headers(&format!("req{i}"), &extra));
    }

    assert_eq!(
        basket.find_requests("yummy", "headers", 100, 0).requests.len(),
        10
    );
    assert_eq!(
        basket.find_requests("tasty", "headers", 100, 0).requests.len(),
        20
    );
    assert_eq!(
        basket.find_requests("req1", "headers", 100, 0).requests.len(),
        0
    );
    assert_eq!(
        basket.find_requests("req1", "body", 100, 0).requests.len(),
        11
    );

    // paging over matches: 20 tasty requests in total
    let page = basket.find_requests("tasty", "headers", 5, 0);
    assert_eq!(page.requests.len(), 5);
    assert!(page.has_more, "more requests are expected");

    let tail = basket.find_requests("tasty", "headers", 100, 15);
    assert_eq!(tail.requests.len(), 5);
    assert!(!tail.has_more);
}

fn clear_keeps_total_count(db: &dyn BasketsDatabase) {
    let name = "suite_clear";
    db.create(name, BasketConfig::with_capacity(20)).unwrap();
    let basket = db.get(name).expect("basket is expected");

    for i in 1..=15 {
        basket.add(test_request(&format!("req{i}")));
    }
    assert_eq!(basket.size(), 15);

    basket.clear();
    assert_eq!(basket.size(), 0, "expected empty basket");

    let page = basket.get_requests(10, 0);
    assert!(page.requests.is_empty());
    assert_eq!(page.count, 0);
    assert_eq!(page.total_count, 15, "total counter must survive clear");

    // the ring keeps working after a clear
    basket.add(test_request("after"));
    assert_eq!(basket.size(), 1);
    assert_eq!(basket.get_requests(10, 0).total_count, 16);
}

fn update_shrinks_ring(db: &dyn BasketsDatabase) {
    let name = "suite_shrink";
    db.create(name, BasketConfig::with_capacity(30)).unwrap();
    let basket = db.get(name).expect("basket is expected");

    for i in 1..=25 {
        basket.add(test_request(&format!("req{i}")));
    }
    assert_eq!(basket.size(), 25);

    let mut config = basket.config();
    config.capacity = 12;
    basket.update(config);

    assert_eq!(basket.size(), 12, "wrong basket size after shrink");
    let page = basket.get_requests(20, 0);
    assert_eq!(page.requests.len(), 12);
    assert_eq!(page.total_count, 25, "total counter is not affected");
    // the newest 12 survive
    assert_eq!(page.requests[0].body, "req25");
    assert_eq!(page.requests[11].body, "req14");

    // growing the capacity back does not resurrect anything
    let mut config = basket.config();
    config.capacity = 30;
    basket.update(config);
    assert_eq!(basket.size(), 12);
}

fn responses_per_method(db: &dyn BasketsDatabase) {
    let name = "suite_responses";
    db.create(name, BasketConfig::with_capacity(5)).unwrap();
    let basket = db.get(name).expect("basket is expected");

    assert!(basket.get_response("GET").is_none());
    assert!(basket.get_response("POST").is_none());

    let mut headers = HashMap::new();
    headers.insert("Content-Type".to_string(), vec!["text/xml".to_string()]);
    basket.set_response(
        "GET",
        ResponseConfig {
            status: 503,
            headers,
            body: "<error/>".to_string(),
            is_template: false,
        },
    );

    let response = basket.get_response("GET").expect("response is expected");
    assert_eq!(response.status, 503);
    assert_eq!(response.body, "<error/>");
    assert_eq!(
        response.headers.get("Content-Type"),
        Some(&vec!["text/xml".to_string()])
    );
    assert!(basket.get_response("POST").is_none());

    // replace
    basket.set_response(
        "GET",
        ResponseConfig {
            status: 204,
            ..Default::default()
        },
    );
    assert_eq!(basket.get_response("GET").unwrap().status, 204);
}

fn update_replaces_config(db: &dyn BasketsDatabase) {
    let name = "suite_update";
    db.create(name, BasketConfig::with_capacity(20)).unwrap();
    let basket = db.get(name).expect("basket is expected");

    let config = BasketConfig {
        forward_url: "http://localhost:12345/notify".to_string(),
        proxy_response: true,
        insecure_tls: true,
        expand_path: true,
        capacity: 18,
    };
    basket.update(config.clone());

    assert_eq!(basket.config(), config);
}

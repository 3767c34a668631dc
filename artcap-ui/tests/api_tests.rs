//! Integration tests for the artcap-ui API endpoints
//!
//! Runs the real router against an in-memory database and a temporary
//! content directory; no network involved.

use artcap_common::config::ArtcapConfig;
use artcap_common::db;
use artcap_ui::{build_router, AppState};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use image::{DynamicImage, RgbImage};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`

const BOUNDARY: &str = "artcap-test-boundary";

struct TestApp {
    router: axum::Router,
    // kept alive so the content directory survives the test
    _upload_dir: TempDir,
}

async fn setup_app() -> TestApp {
    let upload_dir = TempDir::new().unwrap();
    let config_text = format!(
        r#"
        [capture]
        max_dim = 800
        thumb_dim = 80

        [paths]
        upload_dir = "{}"

        [object_types.artifacts]
        label = "Artifacts"
        filename_format = "ART_{{unit}}_T{{tnumber}}_ID{{record_id}}"
        input_fields = [
            ["Excavation Unit", "unit", "TEXT"],
            ["Level", "level", "TEXT"],
            ["T-Number", "tnumber", "TEXT"],
            ["Context", "context", "TEXT"],
            ["Typology", "typology_number", "INT"],
        ]
        required_fields = ["unit", "level"]
        "#,
        upload_dir.path().display()
    );
    let config = ArtcapConfig::from_toml_str(&config_text, None).unwrap();

    let pool = db::init_memory_database().await.unwrap();
    db::ensure_tables(&pool, config.schemas.values())
        .await
        .unwrap();

    let state = AppState::new(pool, Arc::new(config));
    TestApp {
        router: build_router(state),
        _upload_dir: upload_dir,
    }
}

fn multipart_body(fields: &[(&str, &str)], photo: Option<&[u8]>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some(bytes) = photo {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"p.png\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                BOUNDARY
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn submit_request(fields: &[(&str, &str)], photo: Option<&[u8]>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/submit")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(fields, photo)))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn photo_png() -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(120, 90, |x, y| {
        image::Rgb([(x % 200) as u8, (y % 200) as u8, 40])
    }));
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

const STANDARD_FIELDS: &[(&str, &str)] = &[
    ("object_type", "artifacts"),
    ("unit", "A"),
    ("level", "2"),
    ("tnumber", "T5"),
    ("context", "X"),
];

fn with_action<'a>(action: &'a str) -> Vec<(&'a str, &'a str)> {
    let mut fields = STANDARD_FIELDS.to_vec();
    fields.push(("action", action));
    fields
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup_app().await;
    let response = app.router.oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "artcap-ui");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_metadata_submission_creates_record() {
    let app = setup_app().await;

    let response = app
        .router
        .clone()
        .oneshot(submit_request(&with_action("new"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // a fresh client gets a session cookie
    assert!(response.headers().contains_key(header::SET_COOKIE));

    let body = body_json(response).await;
    assert_eq!(body["created"], json!(true));
    let id = body["id"].as_i64().unwrap();

    let response = app
        .router
        .oneshot(get_request(&format!("/api/records/artifacts/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await;
    assert_eq!(record["fields"]["unit"], json!("A"));
    assert_eq!(record["files"]["images"], json!([]));
}

#[tokio::test]
async fn test_required_field_gate() {
    let app = setup_app().await;

    let mut fields = vec![
        ("object_type", "artifacts"),
        ("unit", "A"),
        ("tnumber", "T5"),
        ("action", "new"),
    ];
    let response = app
        .router
        .clone()
        .oneshot(submit_request(&fields, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("level"));

    // nothing was inserted
    let response = app
        .router
        .clone()
        .oneshot(get_request("/api/records/artifacts"))
        .await
        .unwrap();
    let listing = body_json(response).await;
    assert_eq!(listing["total"], json!(0));

    // empty string counts as missing too
    fields.push(("level", "   "));
    let response = app
        .router
        .oneshot(submit_request(&fields, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unknown_object_type_is_not_found() {
    let app = setup_app().await;
    let response = app
        .router
        .clone()
        .oneshot(submit_request(
            &[("object_type", "potsherds"), ("action", "new")],
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .router
        .oneshot(get_request("/api/records/potsherds"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_attach_image_find_or_create_flow() {
    let app = setup_app().await;
    let photo = photo_png();

    // first add_image with fresh metadata creates the record
    let response = app
        .router
        .clone()
        .oneshot(submit_request(&with_action("add_image"), Some(&photo)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["created"], json!(true));
    let id = body["id"].as_i64().unwrap();
    assert_eq!(body["files"]["images"].as_array().unwrap().len(), 1);
    assert!(body["files"]["images"][0]
        .as_str()
        .unwrap()
        .contains("_IMG1"));

    // identical metadata attaches to the same record (no session cookie)
    let response = app
        .router
        .clone()
        .oneshot(submit_request(&with_action("add_image"), Some(&photo)))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["created"], json!(false));
    assert_eq!(body["id"].as_i64().unwrap(), id);
    assert_eq!(body["files"]["images"].as_array().unwrap().len(), 2);
    assert!(body["files"]["images"][1]
        .as_str()
        .unwrap()
        .contains("_IMG2"));

    // explicit new record with the same metadata still creates a new row
    let response = app
        .router
        .clone()
        .oneshot(submit_request(&with_action("new"), None))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["created"], json!(true));
    assert_ne!(body["id"].as_i64().unwrap(), id);
}

#[tokio::test]
async fn test_add_image_without_photo_is_rejected() {
    let app = setup_app().await;
    let response = app
        .router
        .oneshot(submit_request(&with_action("add_image"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_undecodable_photo_is_rejected() {
    let app = setup_app().await;
    let response = app
        .router
        .clone()
        .oneshot(submit_request(&with_action("add_image"), Some(b"not a photo")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // rejected before resolution: no record was created at all
    let response = app
        .router
        .oneshot(get_request("/api/records/artifacts"))
        .await
        .unwrap();
    let listing = body_json(response).await;
    assert_eq!(listing["total"], json!(0));
}

#[tokio::test]
async fn test_exists_check() {
    let app = setup_app().await;

    let response = app
        .router
        .clone()
        .oneshot(submit_request(&with_action("new"), None))
        .await
        .unwrap();
    let id = body_json(response).await["id"].as_i64().unwrap();

    let probe = json!({
        "object_type": "artifacts",
        "unit": "A", "level": "2", "tnumber": "T5", "context": "X",
    });
    let response = app
        .router
        .clone()
        .oneshot(json_request("POST", "/api/exists", &probe))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["exists"], json!(true));
    assert_eq!(body["id"].as_i64().unwrap(), id);

    let probe = json!({
        "object_type": "artifacts",
        "unit": "A", "level": "3", "tnumber": "T5", "context": "X",
    });
    let response = app
        .router
        .clone()
        .oneshot(json_request("POST", "/api/exists", &probe))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["exists"], json!(false));
    assert_eq!(body["id"], json!(null));

    // unknown object types report non-existence, not an error
    let probe = json!({ "object_type": "potsherds", "unit": "A" });
    let response = app
        .router
        .oneshot(json_request("POST", "/api/exists", &probe))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["exists"], json!(false));
}

#[tokio::test]
async fn test_listing_search_and_pagination() {
    let app = setup_app().await;

    for i in 0..12 {
        let level = i.to_string();
        let tnumber = format!("T{}", i);
        let fields = vec![
            ("object_type", "artifacts"),
            ("unit", "A"),
            ("level", level.as_str()),
            ("tnumber", tnumber.as_str()),
            ("action", "new"),
        ];
        app.router
            .clone()
            .oneshot(submit_request(&fields, None))
            .await
            .unwrap();
    }

    let response = app
        .router
        .clone()
        .oneshot(get_request("/api/records/artifacts?page=1&per_page=10"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], json!(12));
    assert_eq!(body["total_pages"], json!(2));
    assert_eq!(body["records"].as_array().unwrap().len(), 10);

    // unsupported page size falls back to the default
    let response = app
        .router
        .clone()
        .oneshot(get_request("/api/records/artifacts?per_page=7"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["per_page"], json!(25));

    let response = app
        .router
        .oneshot(get_request("/api/records/artifacts?q=T11"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total"], json!(1));
    assert_eq!(body["records"][0]["fields"]["tnumber"], json!("T11"));
}

#[tokio::test]
async fn test_partial_edit() {
    let app = setup_app().await;

    let response = app
        .router
        .clone()
        .oneshot(submit_request(&with_action("new"), None))
        .await
        .unwrap();
    let id = body_json(response).await["id"].as_i64().unwrap();

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/records/artifacts/{}", id),
            &json!({ "level": "9", "typology_number": "14" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await;
    assert_eq!(record["fields"]["level"], json!("9"));
    assert_eq!(record["fields"]["typology_number"], json!(14));
    // unsubmitted fields are untouched
    assert_eq!(record["fields"]["unit"], json!("A"));

    let response = app
        .router
        .oneshot(json_request(
            "POST",
            "/api/records/artifacts/9999",
            &json!({ "level": "9" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_image_detach_and_record_delete() {
    let app = setup_app().await;
    let photo = photo_png();

    let response = app
        .router
        .clone()
        .oneshot(submit_request(&with_action("add_image"), Some(&photo)))
        .await
        .unwrap();
    let body = body_json(response).await;
    let id = body["id"].as_i64().unwrap();

    app.router
        .clone()
        .oneshot(submit_request(&with_action("add_image"), Some(&photo)))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/records/artifacts/{}/images/0/delete", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(get_request(&format!("/api/records/artifacts/{}", id)))
        .await
        .unwrap();
    let record = body_json(response).await;
    assert_eq!(record["files"]["images"].as_array().unwrap().len(), 1);

    // out-of-range detach
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/records/artifacts/{}/images/9/delete", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/records/artifacts/{}/delete", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .oneshot(get_request(&format!("/api/records/artifacts/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_csv_export() {
    let app = setup_app().await;

    app.router
        .clone()
        .oneshot(submit_request(&with_action("new"), None))
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(get_request("/api/export/csv/artifacts"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/csv"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let header_line = text.trim_start_matches('\u{feff}').lines().next().unwrap();
    assert!(header_line.contains("\"id\""));
    assert!(header_line.contains("\"unit\""));
    assert!(header_line.contains("\"meta_signature\""));
    assert!(text.contains("\"A\""));
}

#[tokio::test]
async fn test_csv_import_clears_bad_dates() {
    let app = setup_app().await;

    // schema has no DATE field, so import plain fields and verify counts
    let csv = "unit,level,tnumber\nA,1,T1\nB,2,T2\n";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"csv_file\"; filename=\"r.csv\"\r\n\
             Content-Type: text/csv\r\n\r\n{}\r\n--{}--\r\n",
            BOUNDARY, csv, BOUNDARY
        )
        .as_bytes(),
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/import/csv/artifacts")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["imported"], json!(2));

    let response = app
        .router
        .oneshot(get_request("/api/records/artifacts"))
        .await
        .unwrap();
    let listing = body_json(response).await;
    assert_eq!(listing["total"], json!(2));
}

#[tokio::test]
async fn test_geojson_export_requires_coordinates() {
    let app = setup_app().await;

    // record without GPS
    app.router
        .clone()
        .oneshot(submit_request(&with_action("new"), None))
        .await
        .unwrap();

    // record with client GPS
    let mut fields = with_action("new");
    fields.push(("gps_lat", "15.24"));
    fields.push(("gps_lon", "102.26"));
    fields.push(("level", "7"));
    app.router
        .clone()
        .oneshot(submit_request(&fields, None))
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(get_request("/api/export/geojson/artifacts"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["type"], json!("FeatureCollection"));
    let features = body["features"].as_array().unwrap();
    assert_eq!(features.len(), 1);
    assert_eq!(
        features[0]["geometry"]["coordinates"],
        json!([102.26, 15.24])
    );
    assert!(features[0]["properties"].get("gps_lat").is_none());
    assert_eq!(features[0]["properties"]["unit"], json!("A"));
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::create_router;
use crate::{
    app_state::AppState,
    collaborators::{BotReply, ChatResponder, MoodAnalyzer, MoodReading},
    config::{AppConfig, LlmProvider, StoreBackend, EMBEDDING_DIM},
    llm::Classifier,
    models::{ChatCategory, ChatHistory, MessageRecord, ResponseModality, User},
    store::{MemoryStore, Store},
    vector_index::VectorIndex,
};

struct StubClassifier(&'static str);

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(&self, _message: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

struct StubMood;

#[async_trait]
impl MoodAnalyzer for StubMood {
    async fn analyze(&self, _message: &str) -> Result<MoodReading> {
        Ok(MoodReading {
            emotion: "annoyance".to_string(),
            mental_health_status: None,
        })
    }
}

#[derive(Default)]
struct StubResponder {
    fail: bool,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ChatResponder for StubResponder {
    async fn reply_text(&self, message: &str, modality: ResponseModality) -> Result<BotReply> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("text:{}:{message}", modality.as_str()));
        if self.fail {
            return Err(anyhow!("connection refused"));
        }
        Ok(BotReply {
            response: format!("echo {message}"),
            audio_url: Some("https://storage/response.webm".to_string()),
        })
    }

    async fn reply_audio(
        &self,
        audio_url: &str,
        modality: ResponseModality,
        user_id: &str,
    ) -> Result<BotReply> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("audio:{}:{audio_url}:{user_id}", modality.as_str()));
        if self.fail {
            return Err(anyhow!("connection refused"));
        }
        Ok(BotReply {
            response: "transcribed reply".to_string(),
            audio_url: Some("https://storage/response.webm".to_string()),
        })
    }
}

/// Almacén en memoria cuya escritura de mensajes clasificados siempre falla.
#[derive(Default)]
struct BrokenMessages(MemoryStore);

#[async_trait]
impl Store for BrokenMessages {
    fn backend(&self) -> &'static str {
        "broken"
    }
    async fn insert_user(&self, user: &User) -> Result<()> {
        self.0.insert_user(user).await
    }
    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        self.0.find_user(id).await
    }
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.0.find_user_by_email(email).await
    }
    async fn list_users(&self) -> Result<Vec<User>> {
        self.0.list_users().await
    }
    async fn update_user(&self, user: &User) -> Result<()> {
        self.0.update_user(user).await
    }
    async fn insert_category(&self, category: &ChatCategory) -> Result<()> {
        self.0.insert_category(category).await
    }
    async fn find_category(&self, id: &str) -> Result<Option<ChatCategory>> {
        self.0.find_category(id).await
    }
    async fn list_categories(&self, user_id: &str) -> Result<Vec<ChatCategory>> {
        self.0.list_categories(user_id).await
    }
    async fn update_category(&self, category: &ChatCategory) -> Result<()> {
        self.0.update_category(category).await
    }
    async fn delete_category(&self, id: &str) -> Result<bool> {
        self.0.delete_category(id).await
    }
    async fn insert_message(&self, _message: &MessageRecord) -> Result<()> {
        Err(anyhow!("disk full"))
    }
    async fn list_messages(
        &self,
        user_id: &str,
        chat_category_id: &str,
    ) -> Result<Vec<MessageRecord>> {
        self.0.list_messages(user_id, chat_category_id).await
    }
    async fn insert_chat(&self, chat: &ChatHistory) -> Result<()> {
        self.0.insert_chat(chat).await
    }
    async fn list_chats(
        &self,
        user_id: &str,
        chat_category_id: Option<&str>,
    ) -> Result<Vec<ChatHistory>> {
        self.0.list_chats(user_id, chat_category_id).await
    }
    async fn find_chats(&self, ids: &[String]) -> Result<Vec<ChatHistory>> {
        self.0.find_chats(ids).await
    }
    async fn embedded_chats(&self) -> Result<Vec<ChatHistory>> {
        self.0.embedded_chats().await
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        server_addr: "127.0.0.1:0".to_string(),
        store: StoreBackend::Memory,
        jwt_secret: "test-secret".to_string(),
        token_ttl_hours: 1,
        bcrypt_cost: 4,
        llm_provider: LlmProvider::Gemini,
        llm_classifier_model: "gemini-1.5-flash".to_string(),
        model_service_url: "http://localhost:8000".to_string(),
        collaborator_timeout: Duration::from_secs(5),
        max_audio_bytes: 1024 * 1024,
    }
}

struct TestApp {
    router: Router,
    responder: Arc<StubResponder>,
}

fn app_with(label: &'static str, responder: StubResponder) -> TestApp {
    app_on(Arc::new(MemoryStore::default()), label, responder)
}

fn app_on(store: Arc<dyn Store>, label: &'static str, responder: StubResponder) -> TestApp {
    let responder = Arc::new(responder);
    let state = AppState {
        config: test_config(),
        store,
        classifier: Arc::new(StubClassifier(label)),
        mood: Arc::new(StubMood),
        responder: responder.clone(),
        user_index: Arc::new(VectorIndex::new(EMBEDDING_DIM)),
        chat_index: Arc::new(VectorIndex::new(EMBEDDING_DIM)),
    };
    TestApp {
        router: create_router(state),
        responder,
    }
}

fn app() -> TestApp {
    app_with("Tech", StubResponder::default())
}

impl TestApp {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(body), None).await
    }

    async fn post_raw(&self, uri: &str, body: &'static str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, None, None).await
    }

    async fn register(&self, name: &str, email: &str) -> (String, String) {
        let (status, body) = self
            .post(
                "/api/user/register",
                json!({ "name": name, "email": email, "password": "secret1" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        (
            body["userId"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }
}

fn embedding(head: f64) -> Vec<f64> {
    let mut v = vec![0.0; EMBEDDING_DIM];
    v[0] = head;
    v
}

#[tokio::test]
async fn health_reports_the_store_backend() {
    let (status, body) = app().get("/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "store": "memory" }));
}

// --- Usuarios ---

#[tokio::test]
async fn register_then_login_returns_token_and_public_user() {
    let app = app();
    let (status, body) = app
        .post(
            "/api/user/register",
            json!({ "name": "A", "email": "a@x.com", "password": "secret1" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
    let user_id = body["userId"].as_str().unwrap().to_string();

    let (status, body) = app
        .post(
            "/api/user/login",
            json!({ "email": "a@x.com", "password": "secret1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].is_string());
    assert_eq!(
        body["user"],
        json!({ "id": user_id, "name": "A", "email": "a@x.com" })
    );
}

#[tokio::test]
async fn login_with_wrong_password_is_rejected() {
    let app = app();
    app.register("A", "a@x.com").await;
    let (status, body) = app
        .post(
            "/api/user/login",
            json!({ "email": "a@x.com", "password": "wrong-one" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Invalid credentials");
}

#[tokio::test]
async fn short_password_is_rejected_server_side() {
    let (status, _) = app()
        .post(
            "/api/user/register",
            json!({ "name": "A", "email": "a@x.com", "password": "12345" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let app = app();
    app.register("A", "a@x.com").await;
    let (status, body) = app
        .post(
            "/api/user/register",
            json!({ "name": "B", "email": "a@x.com", "password": "secret1" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "User already exists");
}

#[tokio::test]
async fn registration_embedding_must_have_the_index_dimension() {
    let (status, body) = app()
        .post(
            "/api/user/register",
            json!({ "name": "A", "email": "a@x.com", "password": "secret1", "embedding": [1.0, 2.0] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Invalid embedding size");
}

#[tokio::test]
async fn fetched_user_never_exposes_the_password() {
    let app = app();
    let (user_id, _) = app.register("A", "a@x.com").await;

    let (status, body) = app.get(&format!("/api/user/user/{user_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "A");
    assert_eq!(body["email"], "a@x.com");
    assert!(body.get("password").is_none());
    assert!(body.get("passwordHash").is_none());

    let (status, _) = app.get("/api/user/user/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn user_endpoints_behind_auth_require_a_valid_token() {
    let app = app();
    let (alice, alice_token) = app.register("Alice", "alice@x.com").await;
    let (_bob, bob_token) = app.register("Bob", "bob@x.com").await;
    let update = json!({ "name": "Alicia" });
    let uri = format!("/api/user/update/{alice}");

    let (status, _) = app.call(Method::PUT, &uri, Some(update.clone()), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(Method::PUT, &uri, Some(update.clone()), Some("garbage"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(Method::PUT, &uri, Some(update.clone()), Some(&bob_token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(Method::PUT, &uri, Some(update), Some(&alice_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "User updated successfully");

    let (status, users) = app
        .call(Method::GET, "/api/user/all-users", None, Some(&alice_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = users
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Alicia", "Bob"]);
}

#[tokio::test]
async fn updated_embedding_replaces_the_indexed_vector() {
    let app = app();
    let (alice, token) = app.register("Alice", "alice@x.com").await;
    let uri = format!("/api/user/update/{alice}");

    let (status, _) = app
        .call(
            Method::PUT,
            &uri,
            Some(json!({ "embedding": embedding(10.0) })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .call(
            Method::PUT,
            &uri,
            Some(json!({ "embedding": embedding(1.0) })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post("/api/user/find-similar", json!({ "embedding": embedding(0.0) }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userIds"], json!([alice]));
    assert_eq!(body["distances"], json!([1.0]));
}

// --- Categorías ---

#[tokio::test]
async fn chat_category_crud() {
    let app = app();
    let (status, created) = app
        .post(
            "/api/chat/create-category",
            json!({ "userId": "u1", "topic": "Exams" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["topic"], "Exams");
    let id = created["id"].as_str().unwrap().to_string();

    let (_, listed) = app.get("/api/chat/categoryByUser/u1").await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, updated) = app
        .call(
            Method::PUT,
            &format!("/api/chat/updatecategory/{id}"),
            Some(json!({ "topic": "Finals" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["topic"], "Finals");

    let uri = format!("/api/chat/category/{id}");
    let (status, body) = app.call(Method::DELETE, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "Chat category deleted.");

    let (status, _) = app.call(Method::DELETE, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn category_without_topic_is_rejected() {
    let (status, _) = app()
        .post("/api/chat/create-category", json!({ "userId": "u1" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// --- Clasificación ---

#[tokio::test]
async fn classify_persists_a_retrievable_record() {
    let app = app();
    let (status, record) = app
        .post(
            "/api/chat/classify",
            json!({ "message": "My code won't compile", "userId": "u1", "chatCategoryId": "c1" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(record["category"], "Tech");
    assert_eq!(record["mood"], "annoyance");
    assert_eq!(record["userMessage"], "My code won't compile");
    assert_eq!(record["responseType"], "text");

    let (status, stats) = app.get("/api/chat/get-analytic/u1/c1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["totalChats"], 1);
    assert_eq!(stats["labelCounts"], json!({ "Tech": 1 }));
    assert_eq!(stats["emotions"], json!({ "annoyance": 1 }));
}

#[tokio::test]
async fn label_outside_the_enum_fails_without_persisting() {
    let app = app_with("Entertainment", StubResponder::default());
    let (status, body) = app
        .post(
            "/api/chat/classify",
            json!({ "message": "Great movie", "userId": "u1", "chatCategoryId": "c1" }),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["msg"], "Classification failed");

    let (_, stats) = app.get("/api/chat/get-analytic/u1/c1").await;
    assert_eq!(stats["totalChats"], 0);
}

#[tokio::test]
async fn classify_without_references_only_reports_the_result() {
    let (status, body) = app()
        .post("/api/chat/classify", json!({ "message": "What is Rust?" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "category": "Tech", "mood": "annoyance", "messageLabel": "Tech" })
    );
}

// --- Turno de chat ---

#[tokio::test]
async fn invalid_modality_is_rejected_before_any_call() {
    let app = app();
    let (status, body) = app
        .post(
            "/api/chat/generate-response",
            json!({ "userMessage": "hi", "userId": "u1", "responseType": "video" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Invalid response type");
    assert!(app.responder.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn chat_turn_is_persisted_after_a_reply() {
    let app = app();
    let (status, body) = app
        .post(
            "/api/chat/generate-response",
            json!({ "userMessage": "hello", "userId": "u1", "responseType": "text", "chatCategoryId": "c1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "botResponse": "echo hello", "msg": "Response generated" })
    );

    let (_, history) = app.get("/api/chat/history/u1/c1").await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["userMessage"], "hello");
    assert_eq!(history[0]["botResponse"], "echo hello");
}

#[tokio::test]
async fn failed_reply_returns_500_and_persists_nothing() {
    let app = app_with(
        "Tech",
        StubResponder {
            fail: true,
            ..Default::default()
        },
    );
    let (status, body) = app
        .post(
            "/api/chat/generate-response",
            json!({ "userMessage": "hello", "userId": "u1", "responseType": "text" }),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["msg"], "Failed to generate response");

    let (_, history) = app.get("/api/chat/history/u1").await;
    assert_eq!(history, json!([]));
}

#[tokio::test]
async fn audio_message_uses_the_audio_collaborator() {
    let app = app();
    let (status, body) = app
        .post(
            "/api/chat/generate-response",
            json!({
                "userMessage": { "isAudio": true, "audioUrl": "https://storage/in.webm" },
                "userId": "u1",
                "responseType": "both"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["botResponse"], "transcribed reply");
    assert_eq!(body["audioUrl"], "https://storage/response.webm");
    assert_eq!(
        *app.responder.calls.lock().unwrap(),
        vec!["audio:both:https://storage/in.webm:u1".to_string()]
    );
}

#[tokio::test]
async fn object_message_without_audio_flag_is_rejected() {
    let (status, _) = app()
        .post(
            "/api/chat/generate-response",
            json!({ "userMessage": { "audioUrl": "x" }, "userId": "u1", "responseType": "text" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// --- Búsqueda semántica ---

#[tokio::test]
async fn semantic_search_rejects_wrong_dimension() {
    let (status, body) = app()
        .post(
            "/api/chat/semantic-search",
            json!({ "embedding": vec![0.5; 64] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Invalid embedding size");
}

#[tokio::test]
async fn saved_chats_are_found_closest_first() {
    let app = app();
    for (text, head) in [("far", 9.0), ("near", 1.0)] {
        let (status, _) = app
            .post(
                "/api/chat/save-chat",
                json!({
                    "userId": "u1",
                    "userMessage": text,
                    "botResponse": "ok",
                    "embedding": embedding(head)
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = app
        .post(
            "/api/chat/semantic-search",
            json!({ "embedding": embedding(0.0) }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let messages: Vec<&str> = body["chats"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["userMessage"].as_str().unwrap())
        .collect();
    assert_eq!(messages, vec!["near", "far"]);
    assert_eq!(body["distances"], json!([1.0, 9.0]));
}

// --- Cuerpos inválidos y concurrencia ---

#[tokio::test]
async fn malformed_json_body_is_a_400_with_message() {
    let (status, body) = app().post_raw("/api/user/register", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["msg"].as_str().is_some_and(|m| m.starts_with("Invalid request body")));
}

#[tokio::test]
async fn user_message_of_unknown_shape_is_a_400() {
    let app = app();
    let (status, body) = app
        .post(
            "/api/chat/generate-response",
            json!({ "userMessage": 42, "userId": "u1", "responseType": "text" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["msg"].is_string());
    assert!(app.responder.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn audio_url_pointing_inside_the_network_is_rejected() {
    let app = app();
    let (status, _) = app
        .post(
            "/api/chat/generate-response",
            json!({
                "userMessage": { "isAudio": true, "audioUrl": "http://127.0.0.1:8000/secret" },
                "userId": "u1",
                "responseType": "text"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.responder.calls.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_keep_email_unique() {
    let app = app();
    let body = || json!({ "name": "A", "email": "a@x.com", "password": "secret1" });
    let (first, second) = tokio::join!(
        app.post("/api/user/register", body()),
        app.post("/api/user/register", body())
    );

    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::BAD_REQUEST]);
    let rejected = if first.0 == StatusCode::BAD_REQUEST { first.1 } else { second.1 };
    assert_eq!(rejected["msg"], "User already exists");
}

#[tokio::test]
async fn find_similar_rejects_wrong_dimension() {
    let (status, body) = app()
        .post("/api/user/find-similar", json!({ "embedding": vec![0.5; 64] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Invalid embedding size");
}

#[tokio::test]
async fn classify_rejects_unknown_response_type() {
    let (status, body) = app()
        .post(
            "/api/chat/classify",
            json!({ "message": "hi", "userId": "u1", "chatCategoryId": "c1", "responseType": "hologram" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Invalid response type");
}

#[tokio::test]
async fn classify_reports_result_when_saving_fails() {
    let app = app_on(
        Arc::new(BrokenMessages::default()),
        "Knowledge",
        StubResponder::default(),
    );
    let (status, body) = app
        .post(
            "/api/chat/classify",
            json!({ "message": "Who wrote Dune?", "userId": "u1", "chatCategoryId": "c1" }),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["category"], "Knowledge");
    assert_eq!(body["mood"], "annoyance");
    assert!(body["error"].as_str().is_some_and(|e| e.contains("disk full")));
}

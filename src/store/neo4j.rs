//! Backend Neo4j: usuarios, categorías, mensajes e historial como nodos
//! (:User, :ChatCategory, :Message, :ChatHistory).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use neo4rs::{query, Graph, Query, Row};
use tracing::info;
use url::Url;

use super::{Store, StoreError};
use crate::config::{AppConfig, StoreBackend};
use crate::models::{ChatCategory, ChatHistory, MessageCategory, MessageRecord, ResponseType, User};

const USER_FIELDS: &str = "u.id AS id, u.name AS name, u.email AS email, \
     u.password_hash AS password_hash, u.embedding AS embedding, u.created_at AS created_at";

const CATEGORY_FIELDS: &str = "c.id AS id, c.user_id AS user_id, c.topic AS topic, \
     c.created_at AS created_at, c.updated_at AS updated_at";

const MESSAGE_FIELDS: &str = "m.id AS id, m.category AS category, m.mood AS mood, \
     m.user_id AS user_id, m.user_message AS user_message, m.response_type AS response_type, \
     m.chat_category_id AS chat_category_id, m.timestamp AS timestamp, m.message_label AS message_label";

const CHAT_FIELDS: &str = "h.id AS id, h.user_id AS user_id, h.chat_category_id AS chat_category_id, \
     h.user_message AS user_message, h.bot_response AS bot_response, h.audio_url AS audio_url, \
     h.timestamp AS timestamp, h.embedding AS embedding";

pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub async fn connect(cfg: &AppConfig) -> Result<Self> {
        let StoreBackend::Neo4j {
            uri,
            user,
            password,
        } = &cfg.store
        else {
            return Err(anyhow!("La configuración no apunta a Neo4j"));
        };

        let url = Url::parse(uri).with_context(|| format!("NEO4J_URI inválida: {uri}"))?;
        let host = url.host_str().unwrap_or("localhost");
        let port = url.port().unwrap_or(7687);
        let addr = format!("{host}:{port}");

        info!("Conectando a Neo4j en {addr}...");
        let graph = Graph::new(&addr, user, password).await?;
        info!("Conexión a Neo4j OK");
        Ok(Self { graph })
    }

    /// Crea los constraints de unicidad de cada etiqueta.
    pub async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            "CREATE CONSTRAINT user_id IF NOT EXISTS
             FOR (u:User)
             REQUIRE u.id IS UNIQUE",
            "CREATE CONSTRAINT user_email IF NOT EXISTS
             FOR (u:User)
             REQUIRE u.email IS UNIQUE",
            "CREATE CONSTRAINT chat_category_id IF NOT EXISTS
             FOR (c:ChatCategory)
             REQUIRE c.id IS UNIQUE",
            "CREATE CONSTRAINT message_id IF NOT EXISTS
             FOR (m:Message)
             REQUIRE m.id IS UNIQUE",
            "CREATE CONSTRAINT chat_history_id IF NOT EXISTS
             FOR (h:ChatHistory)
             REQUIRE h.id IS UNIQUE",
        ];

        for stmt in statements {
            self.graph.run(query(stmt)).await?;
        }

        info!("Esquema de Neo4j asegurado (constraints básicos creados).");
        Ok(())
    }

    async fn fetch<T>(&self, q: Query, map: fn(&Row) -> Result<T>) -> Result<Vec<T>> {
        let mut cursor = self.graph.execute(q).await?;
        let mut out = Vec::new();
        while let Some(row) = cursor.next().await? {
            out.push(map(&row)?);
        }
        Ok(out)
    }
}

fn ts(at: &DateTime<Utc>) -> String {
    // Ancho fijo para que el orden lexicográfico coincida con el cronológico.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn get(row: &Row, key: &str) -> Result<String> {
    row.get::<String>(key)
        .ok_or_else(|| anyhow!("Falta campo '{key}' en resultado de Neo4j"))
}

fn get_time(row: &Row, key: &str) -> Result<DateTime<Utc>> {
    let raw = get(row, key)?;
    Ok(DateTime::parse_from_rfc3339(&raw)
        .with_context(|| format!("Fecha inválida en '{key}': {raw}"))?
        .with_timezone(&Utc))
}

/// El constraint `user_email` violado llega como `UnexpectedMessage` con el código de Neo4j.
fn map_user_write(err: neo4rs::Error, email: &str) -> anyhow::Error {
    match &err {
        neo4rs::Error::UnexpectedMessage(detail)
            if detail.contains("ConstraintValidationFailed") && detail.contains("email") =>
        {
            StoreError::DuplicateEmail(email.to_string()).into()
        }
        _ => err.into(),
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn user_from_row(row: &Row) -> Result<User> {
    Ok(User {
        id: get(row, "id")?,
        name: get(row, "name")?,
        email: get(row, "email")?,
        password_hash: get(row, "password_hash")?,
        embedding: row.get("embedding").unwrap_or_default(),
        created_at: get_time(row, "created_at")?,
    })
}

fn category_from_row(row: &Row) -> Result<ChatCategory> {
    Ok(ChatCategory {
        id: get(row, "id")?,
        user_id: get(row, "user_id")?,
        topic: get(row, "topic")?,
        created_at: get_time(row, "created_at")?,
        updated_at: get_time(row, "updated_at")?,
    })
}

fn message_from_row(row: &Row) -> Result<MessageRecord> {
    let category = get(row, "category")?;
    let response_type = get(row, "response_type")?;
    Ok(MessageRecord {
        id: get(row, "id")?,
        category: MessageCategory::from_label(&category)
            .ok_or_else(|| anyhow!("Categoría desconocida en Neo4j: {category}"))?,
        mood: get(row, "mood")?,
        user_id: get(row, "user_id")?,
        user_message: get(row, "user_message")?,
        response_type: ResponseType::parse(&response_type)
            .ok_or_else(|| anyhow!("Tipo de respuesta desconocido en Neo4j: {response_type}"))?,
        chat_category_id: get(row, "chat_category_id")?,
        timestamp: get_time(row, "timestamp")?,
        message_label: get(row, "message_label")?,
    })
}

fn chat_from_row(row: &Row) -> Result<ChatHistory> {
    let embedding: Vec<f64> = row.get("embedding").unwrap_or_default();
    Ok(ChatHistory {
        id: get(row, "id")?,
        user_id: get(row, "user_id")?,
        chat_category_id: row.get::<String>("chat_category_id").and_then(non_empty),
        user_message: get(row, "user_message")?,
        bot_response: get(row, "bot_response")?,
        audio_url: row.get::<String>("audio_url").and_then(non_empty),
        timestamp: get_time(row, "timestamp")?,
        embedding: (!embedding.is_empty()).then_some(embedding),
    })
}

#[async_trait]
impl Store for Neo4jStore {
    fn backend(&self) -> &'static str {
        "neo4j"
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        self.graph
            .run(
                query(
                    "CREATE (u:User {id: $id, name: $name, email: $email,
                     password_hash: $password_hash, embedding: $embedding, created_at: $created_at})",
                )
                .param("id", user.id.clone())
                .param("name", user.name.clone())
                .param("email", user.email.clone())
                .param("password_hash", user.password_hash.clone())
                .param("embedding", user.embedding.clone())
                .param("created_at", ts(&user.created_at)),
            )
            .await
            .map_err(|e| map_user_write(e, &user.email))
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        let q = query(&format!("MATCH (u:User {{id: $id}}) RETURN {USER_FIELDS}"))
            .param("id", id.to_string());
        Ok(self.fetch(q, user_from_row).await?.into_iter().next())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let q = query(&format!("MATCH (u:User {{email: $email}}) RETURN {USER_FIELDS}"))
            .param("email", email.to_string());
        Ok(self.fetch(q, user_from_row).await?.into_iter().next())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let q = query(&format!(
            "MATCH (u:User) RETURN {USER_FIELDS} ORDER BY u.created_at"
        ));
        self.fetch(q, user_from_row).await
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        self.graph
            .run(
                query(
                    "MATCH (u:User {id: $id})
                     SET u.name = $name, u.email = $email,
                         u.password_hash = $password_hash, u.embedding = $embedding",
                )
                .param("id", user.id.clone())
                .param("name", user.name.clone())
                .param("email", user.email.clone())
                .param("password_hash", user.password_hash.clone())
                .param("embedding", user.embedding.clone()),
            )
            .await
            .map_err(|e| map_user_write(e, &user.email))
    }

    async fn insert_category(&self, category: &ChatCategory) -> Result<()> {
        // La relación :OWNS sólo se crea si el usuario existe.
        self.graph
            .run(
                query(
                    "CREATE (c:ChatCategory {id: $id, user_id: $user_id, topic: $topic,
                     created_at: $created_at, updated_at: $updated_at})
                     WITH c
                     MATCH (u:User {id: $user_id})
                     MERGE (u)-[:OWNS]->(c)",
                )
                .param("id", category.id.clone())
                .param("user_id", category.user_id.clone())
                .param("topic", category.topic.clone())
                .param("created_at", ts(&category.created_at))
                .param("updated_at", ts(&category.updated_at)),
            )
            .await?;
        Ok(())
    }

    async fn find_category(&self, id: &str) -> Result<Option<ChatCategory>> {
        let q = query(&format!(
            "MATCH (c:ChatCategory {{id: $id}}) RETURN {CATEGORY_FIELDS}"
        ))
        .param("id", id.to_string());
        Ok(self.fetch(q, category_from_row).await?.into_iter().next())
    }

    async fn list_categories(&self, user_id: &str) -> Result<Vec<ChatCategory>> {
        let q = query(&format!(
            "MATCH (c:ChatCategory {{user_id: $user_id}})
             RETURN {CATEGORY_FIELDS} ORDER BY c.created_at DESC"
        ))
        .param("user_id", user_id.to_string());
        self.fetch(q, category_from_row).await
    }

    async fn update_category(&self, category: &ChatCategory) -> Result<()> {
        self.graph
            .run(
                query(
                    "MATCH (c:ChatCategory {id: $id})
                     SET c.topic = $topic, c.updated_at = $updated_at",
                )
                .param("id", category.id.clone())
                .param("topic", category.topic.clone())
                .param("updated_at", ts(&category.updated_at)),
            )
            .await?;
        Ok(())
    }

    async fn delete_category(&self, id: &str) -> Result<bool> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (c:ChatCategory {id: $id})
                     WITH c, c.id AS removed
                     DETACH DELETE c
                     RETURN count(removed) AS deleted",
                )
                .param("id", id.to_string()),
            )
            .await?;
        let deleted = match cursor.next().await? {
            Some(row) => row.get::<i64>("deleted").unwrap_or(0),
            None => 0,
        };
        Ok(deleted > 0)
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<()> {
        self.graph
            .run(
                query(
                    "CREATE (m:Message {id: $id, category: $category, mood: $mood,
                     user_id: $user_id, user_message: $user_message, response_type: $response_type,
                     chat_category_id: $chat_category_id, timestamp: $timestamp,
                     message_label: $message_label})
                     WITH m
                     MATCH (c:ChatCategory {id: $chat_category_id})
                     MERGE (c)-[:HAS_MESSAGE]->(m)",
                )
                .param("id", message.id.clone())
                .param("category", message.category.label().to_string())
                .param("mood", message.mood.clone())
                .param("user_id", message.user_id.clone())
                .param("user_message", message.user_message.clone())
                .param("response_type", message.response_type.as_str().to_string())
                .param("chat_category_id", message.chat_category_id.clone())
                .param("timestamp", ts(&message.timestamp))
                .param("message_label", message.message_label.clone()),
            )
            .await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        user_id: &str,
        chat_category_id: &str,
    ) -> Result<Vec<MessageRecord>> {
        let q = query(&format!(
            "MATCH (m:Message {{user_id: $user_id, chat_category_id: $chat_category_id}})
             RETURN {MESSAGE_FIELDS} ORDER BY m.timestamp"
        ))
        .param("user_id", user_id.to_string())
        .param("chat_category_id", chat_category_id.to_string());
        self.fetch(q, message_from_row).await
    }

    async fn insert_chat(&self, chat: &ChatHistory) -> Result<()> {
        self.graph
            .run(
                query(
                    "CREATE (h:ChatHistory {id: $id, user_id: $user_id,
                     chat_category_id: $chat_category_id, user_message: $user_message,
                     bot_response: $bot_response, audio_url: $audio_url,
                     timestamp: $timestamp, embedding: $embedding})
                     WITH h
                     MATCH (u:User {id: $user_id})
                     MERGE (u)-[:CHATTED]->(h)",
                )
                .param("id", chat.id.clone())
                .param("user_id", chat.user_id.clone())
                .param(
                    "chat_category_id",
                    chat.chat_category_id.clone().unwrap_or_default(),
                )
                .param("user_message", chat.user_message.clone())
                .param("bot_response", chat.bot_response.clone())
                .param("audio_url", chat.audio_url.clone().unwrap_or_default())
                .param("timestamp", ts(&chat.timestamp))
                .param("embedding", chat.embedding.clone().unwrap_or_default()),
            )
            .await?;
        Ok(())
    }

    async fn list_chats(
        &self,
        user_id: &str,
        chat_category_id: Option<&str>,
    ) -> Result<Vec<ChatHistory>> {
        let q = query(&format!(
            "MATCH (h:ChatHistory {{user_id: $user_id}})
             WHERE $chat_category_id = '' OR h.chat_category_id = $chat_category_id
             RETURN {CHAT_FIELDS} ORDER BY h.timestamp"
        ))
        .param("user_id", user_id.to_string())
        .param(
            "chat_category_id",
            chat_category_id.unwrap_or_default().to_string(),
        );
        self.fetch(q, chat_from_row).await
    }

    async fn find_chats(&self, ids: &[String]) -> Result<Vec<ChatHistory>> {
        let q = query(&format!(
            "MATCH (h:ChatHistory) WHERE h.id IN $ids RETURN {CHAT_FIELDS}"
        ))
        .param("ids", ids.to_vec());
        self.fetch(q, chat_from_row).await
    }

    async fn embedded_chats(&self) -> Result<Vec<ChatHistory>> {
        let q = query(&format!(
            "MATCH (h:ChatHistory) WHERE size(h.embedding) > 0 RETURN {CHAT_FIELDS}"
        ));
        self.fetch(q, chat_from_row).await
    }
}

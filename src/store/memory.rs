use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use super::{Store, StoreError};
use crate::models::{ChatCategory, ChatHistory, MessageRecord, User};

#[derive(Default)]
struct Collections {
    users: Vec<User>,
    categories: Vec<ChatCategory>,
    messages: Vec<MessageRecord>,
    chats: Vec<ChatHistory>,
}

/// Almacén en memoria; se pierde al reiniciar el proceso.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Collections>,
}

impl MemoryStore {
    fn read<T>(&self, f: impl FnOnce(&Collections) -> T) -> T {
        f(&self.data.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Collections) -> T) -> T {
        f(&mut self.data.write().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        self.write(|d| {
            if d.users.iter().any(|u| u.email == user.email) {
                return Err(StoreError::DuplicateEmail(user.email.clone()).into());
            }
            d.users.push(user.clone());
            Ok(())
        })
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.read(|d| d.users.iter().find(|u| u.id == id).cloned()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.read(|d| d.users.iter().find(|u| u.email == email).cloned()))
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.read(|d| d.users.clone()))
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        self.write(|d| {
            if d.users.iter().any(|u| u.email == user.email && u.id != user.id) {
                return Err(StoreError::DuplicateEmail(user.email.clone()).into());
            }
            if let Some(existing) = d.users.iter_mut().find(|u| u.id == user.id) {
                *existing = user.clone();
            }
            Ok(())
        })
    }

    async fn insert_category(&self, category: &ChatCategory) -> Result<()> {
        self.write(|d| d.categories.push(category.clone()));
        Ok(())
    }

    async fn find_category(&self, id: &str) -> Result<Option<ChatCategory>> {
        Ok(self.read(|d| d.categories.iter().find(|c| c.id == id).cloned()))
    }

    async fn list_categories(&self, user_id: &str) -> Result<Vec<ChatCategory>> {
        let mut found: Vec<ChatCategory> = self.read(|d| {
            d.categories
                .iter()
                .filter(|c| c.user_id == user_id)
                .cloned()
                .collect()
        });
        found.reverse();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn update_category(&self, category: &ChatCategory) -> Result<()> {
        self.write(|d| {
            if let Some(existing) = d.categories.iter_mut().find(|c| c.id == category.id) {
                *existing = category.clone();
            }
        });
        Ok(())
    }

    async fn delete_category(&self, id: &str) -> Result<bool> {
        Ok(self.write(|d| {
            let before = d.categories.len();
            d.categories.retain(|c| c.id != id);
            d.categories.len() != before
        }))
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<()> {
        self.write(|d| d.messages.push(message.clone()));
        Ok(())
    }

    async fn list_messages(
        &self,
        user_id: &str,
        chat_category_id: &str,
    ) -> Result<Vec<MessageRecord>> {
        Ok(self.read(|d| {
            d.messages
                .iter()
                .filter(|m| m.user_id == user_id && m.chat_category_id == chat_category_id)
                .cloned()
                .collect()
        }))
    }

    async fn insert_chat(&self, chat: &ChatHistory) -> Result<()> {
        self.write(|d| d.chats.push(chat.clone()));
        Ok(())
    }

    async fn list_chats(
        &self,
        user_id: &str,
        chat_category_id: Option<&str>,
    ) -> Result<Vec<ChatHistory>> {
        Ok(self.read(|d| {
            d.chats
                .iter()
                .filter(|c| c.user_id == user_id)
                .filter(|c| match chat_category_id {
                    Some(category) => c.chat_category_id.as_deref() == Some(category),
                    None => true,
                })
                .cloned()
                .collect()
        }))
    }

    async fn find_chats(&self, ids: &[String]) -> Result<Vec<ChatHistory>> {
        Ok(self.read(|d| {
            d.chats
                .iter()
                .filter(|c| ids.contains(&c.id))
                .cloned()
                .collect()
        }))
    }

    async fn embedded_chats(&self) -> Result<Vec<ChatHistory>> {
        Ok(self.read(|d| {
            d.chats
                .iter()
                .filter(|c| c.embedding.is_some())
                .cloned()
                .collect()
        }))
    }
}

//! Estadísticas de una conversación a partir de sus mensajes clasificados.

use std::collections::BTreeMap;

use chrono::Timelike;
use serde::Serialize;

use crate::models::MessageRecord;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAnalytics {
    pub total_chats: usize,
    /// Mensajes por categoría.
    pub label_counts: BTreeMap<String, usize>,
    /// Mensajes por hora UTC ("0".."23").
    pub active_hours: BTreeMap<String, usize>,
    /// Mensajes por estado de ánimo.
    pub emotions: BTreeMap<String, usize>,
}

pub fn summarize(messages: &[MessageRecord]) -> ChatAnalytics {
    let mut analytics = ChatAnalytics {
        total_chats: messages.len(),
        ..Default::default()
    };
    for message in messages {
        *analytics
            .label_counts
            .entry(message.category.label().to_string())
            .or_default() += 1;
        *analytics
            .active_hours
            .entry(message.timestamp.hour().to_string())
            .or_default() += 1;
        *analytics.emotions.entry(message.mood.clone()).or_default() += 1;
    }
    analytics
}

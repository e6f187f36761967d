//! Índice vectorial en memoria (búsqueda exacta k-NN por distancia euclídea).
//!
//! API pública:
//!   - `VectorIndex::upsert(id, vector)`
//!   - `VectorIndex::search(query, k)`
//!   - `warm_up(&Store, &users, &chats)` para reconstruir los índices al arrancar.

use std::sync::RwLock;

use anyhow::Result;
use tracing::info;

use crate::store::Store;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("dimensión inválida: se esperaban {expected} elementos, se recibieron {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Vecino devuelto por una búsqueda.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub distance: f64,
}

/// Índice plano protegido por un `RwLock`; las entradas se identifican por id.
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    entries: RwLock<Vec<(String, Vec<f64>)>>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn check_dimension(&self, vector: &[f64]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Inserta el vector o reemplaza el que ya existía para ese id.
    pub fn upsert(&self, id: &str, vector: &[f64]) -> Result<(), IndexError> {
        self.check_dimension(vector)?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.iter_mut().find(|(existing, _)| existing == id) {
            Some((_, stored)) => *stored = vector.to_vec(),
            None => entries.push((id.to_string(), vector.to_vec())),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Devuelve los `k` vecinos más cercanos en orden ascendente de distancia.
    pub fn search(&self, query: &[f64], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.check_dimension(query)?;
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());

        let mut scored: Vec<Neighbor> = entries
            .iter()
            .map(|(id, vector)| Neighbor {
                id: id.clone(),
                distance: euclidean(query, vector),
            })
            .collect();
        // sort_by es estable: los empates conservan el orden de inserción.
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        Ok(scored)
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Reconstruye los índices a partir de los embeddings persistidos.
pub async fn warm_up(store: &dyn Store, users: &VectorIndex, chats: &VectorIndex) -> Result<()> {
    let (all_users, embedded_chats) = futures::try_join!(store.list_users(), store.embedded_chats())?;

    let mut skipped = 0usize;
    for user in all_users.iter().filter(|u| !u.embedding.is_empty()) {
        if users.upsert(&user.id, &user.embedding).is_err() {
            skipped += 1;
        }
    }
    for chat in &embedded_chats {
        if let Some(embedding) = &chat.embedding {
            if chats.upsert(&chat.id, embedding).is_err() {
                skipped += 1;
            }
        }
    }

    info!(
        "Índices vectoriales reconstruidos: {} usuarios, {} chats ({} vectores omitidos por dimensión).",
        users.len(),
        chats.len(),
        skipped
    );
    Ok(())
}
